use candle_core::{Result, Tensor};

/// added inside each logarithm of the Bernoulli likelihood
pub const BERNOULLI_LOG_EPS: f64 = 1e-8;

/// KL divergence of N(mean, stddev^2) from the standard normal prior,
/// parameterized by the standard deviation
///
/// kl(i) = 0.5 * sum_k [ sd(i,k)^2 + mu(i,k)^2 - 1 - log(sd(i,k)^2) ]
///
/// * `z_mean` - mean (n x k)
/// * `z_stddev` - standard deviation (n x k), strictly positive
///
pub fn normal_kl_divergence(z_mean: &Tensor, z_stddev: &Tensor) -> Result<Tensor> {
    let z_var = z_stddev.sqr()?;
    let z_lnvar = z_var.log()?;
    ((z_var + z_mean.sqr()?)? - 1. - z_lnvar)?.sum(z_mean.rank() - 1)? * 0.5
}

/// Bernoulli log-likelihood of pixel intensities in [0, 1]
///
/// llik(i) = sum_w x(i,w) * log(p(i,w) + eps) + (1 - x(i,w)) * log(1 - p(i,w) + eps)
///
/// * `x_nd` - data tensor (observed data)
/// * `prob_nd` - probability tensor (reconstruction)
///
pub fn bernoulli_likelihood(x_nd: &Tensor, prob_nd: &Tensor) -> Result<Tensor> {
    let log_p = (prob_nd + BERNOULLI_LOG_EPS)?.log()?;
    let log_1mp = (prob_nd.affine(-1., 1.)? + BERNOULLI_LOG_EPS)?.log()?;
    let x_1m = x_nd.affine(-1., 1.)?;

    (x_nd.mul(&log_p)? + x_1m.mul(&log_1mp)?)?.sum(x_nd.rank() - 1)
}
