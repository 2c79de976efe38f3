use candle_core::{Result, Tensor};

/// A sample from the variational distribution together with the
/// parameters that produced it
pub struct LatentSample {
    /// reparameterized latent states (n x k)
    pub z_nk: Tensor,
    /// mean (n x k)
    pub mean_nk: Tensor,
    /// standard deviation (n x k)
    pub stddev_nk: Tensor,
}

pub trait EncoderModuleT {
    /// Evaluate the mean-field Gaussian parameters `(mean, stddev)`
    ///
    /// # Arguments
    /// * `x_nd` - input data (n x d)
    /// * `train` - whether to use dropout/batchnorm or not
    fn latent_gaussian_params(&self, x_nd: &Tensor, train: bool) -> Result<(Tensor, Tensor)>;

    /// An encoder that spits out a reparameterized latent sample
    ///
    /// # Arguments
    /// * `x_nd` - input data (n x d)
    /// * `eps_nk` - standard normal noise (n x k)
    /// * `train` - whether to use dropout/batchnorm or not
    fn forward_t(&self, x_nd: &Tensor, eps_nk: &Tensor, train: bool) -> Result<LatentSample> {
        let (mean_nk, stddev_nk) = self.latent_gaussian_params(x_nd, train)?;
        let z_nk = reparameterize(&mean_nk, &stddev_nk, eps_nk)?;
        Ok(LatentSample {
            z_nk,
            mean_nk,
            stddev_nk,
        })
    }

    fn dim_obs(&self) -> usize;

    fn dim_latent(&self) -> usize;
}

pub trait DecoderModuleT {
    /// A decoder that spits out reconstruction
    fn forward_t(&self, z_nk: &Tensor, train: bool) -> Result<Tensor>;

    /// A decoder that spits out reconstruction and log-likelihood
    /// * `z_nk` - latent states
    /// * `x_nd` - observed data to validate with
    /// * `llik` - fn (observed, reconstruction) -> log-likelihood
    /// * `train` - whether to use batchnorm statistics of this batch
    fn forward_with_llik<LlikFn>(
        &self,
        z_nk: &Tensor,
        x_nd: &Tensor,
        llik: &LlikFn,
        train: bool,
    ) -> Result<(Tensor, Tensor)>
    where
        LlikFn: Fn(&Tensor, &Tensor) -> Result<Tensor>,
    {
        let recon_nd = self.forward_t(z_nk, train)?;
        let llik_n = llik(x_nd, &recon_nd)?;
        Ok((recon_nd, llik_n))
    }

    fn dim_obs(&self) -> usize;

    fn dim_latent(&self) -> usize;
}

///
/// z = mu + sigma * eps
/// where eps ~ N(0, 1)
///
/// # Arguments
/// * `z_mean` - mean of Gaussian distribution
/// * `z_stddev` - standard deviation of Gaussian distribution
/// * `eps` - noise of the same shape
pub fn reparameterize(z_mean: &Tensor, z_stddev: &Tensor, eps: &Tensor) -> Result<Tensor> {
    z_mean + z_stddev.mul(eps)?
}
