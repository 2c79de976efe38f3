use crate::candle_data_loader::*;
use crate::candle_inference::{uncorrected_adam_epsilon, TrainConfig};
use crate::candle_loss_functions::normal_kl_divergence;
use crate::candle_model_traits::{DecoderModuleT, EncoderModuleT};
use crate::candle_sampling::{randn_from_rng, sample_prior};

use candle_core::{Device, Result, Tensor};
use candle_nn::{AdamW, Optimizer, ParamsAdamW};
use indicatif::{ProgressBar, ProgressDrawTarget, ProgressStyle};
use log::info;
use rand::Rng;

pub struct Vae<'a, Enc, Dec>
where
    Enc: EncoderModuleT,
    Dec: DecoderModuleT,
{
    pub encoder: &'a Enc,
    pub decoder: &'a Dec,
    pub variable_map: &'a candle_nn::VarMap,
}

/// What the training loop reports at the end of every epoch
pub struct EpochSummary {
    /// zero-based epoch index
    pub epoch: usize,
    /// sum of the negative ELBO over all updates of this epoch
    pub loss_sum: f64,
    /// `loss_sum / (updates_per_epoch * dim_obs * batch_size)`, an
    /// upper bound of -log p(x) per pixel
    pub bound_per_pixel: f32,
    /// decoded prior samples (batch_size x dim_obs)
    pub samples: Tensor,
}

pub trait VaeT<'a, Enc, Dec>
where
    Enc: EncoderModuleT,
    Dec: DecoderModuleT,
{
    /// Train the VAE model
    /// * `data` - data loader should have `next_minibatch`
    /// * `llik` - log likelihood function
    /// * `train_config` - training configuration
    /// * `rng` - source of all noise, prior draws and minibatches
    /// * `on_epoch_end` - called once per epoch with the summary
    ///
    /// Returns the per-pixel bound of each epoch
    fn train_encoder_decoder<DataL, LlikFn, R, EpochFn>(
        &mut self,
        data: &mut DataL,
        llik: &LlikFn,
        train_config: &TrainConfig,
        rng: &mut R,
        on_epoch_end: EpochFn,
    ) -> anyhow::Result<Vec<f32>>
    where
        DataL: DataLoader,
        LlikFn: Fn(&Tensor, &Tensor) -> Result<Tensor>,
        R: Rng,
        EpochFn: FnMut(&EpochSummary) -> anyhow::Result<()>;

    /// Negative evidence lower bound summed over the minibatch
    ///
    /// -[ sum_i llik(x_i | z_i) - sum_i KL(q(z_i | x_i) || N(0, I)) ]
    fn negative_elbo<LlikFn, R>(
        &self,
        x_nd: &Tensor,
        llik: &LlikFn,
        rng: &mut R,
        train: bool,
    ) -> Result<Tensor>
    where
        LlikFn: Fn(&Tensor, &Tensor) -> Result<Tensor>,
        R: Rng;

    /// Decode `n` draws from the standard normal prior
    fn generate<R>(&self, n: usize, rng: &mut R, device: &Device) -> Result<Tensor>
    where
        R: Rng;

    /// Build a VAE model
    /// * `encoder` - encoder module
    /// * `decoder` - decoder module
    fn build(
        encoder: &'a Enc,
        decoder: &'a Dec,
        variable_map: &'a candle_nn::VarMap,
    ) -> anyhow::Result<Self>
    where
        Self: Sized;
}

impl<'a, Enc, Dec> VaeT<'a, Enc, Dec> for Vae<'a, Enc, Dec>
where
    Enc: EncoderModuleT,
    Dec: DecoderModuleT,
{
    fn train_encoder_decoder<DataL, LlikFn, R, EpochFn>(
        &mut self,
        data: &mut DataL,
        llik_func: &LlikFn,
        train_config: &TrainConfig,
        rng: &mut R,
        mut on_epoch_end: EpochFn,
    ) -> anyhow::Result<Vec<f32>>
    where
        DataL: DataLoader,
        LlikFn: Fn(&Tensor, &Tensor) -> Result<Tensor>,
        R: Rng,
        EpochFn: FnMut(&EpochSummary) -> anyhow::Result<()>,
    {
        train_config.validate()?;

        if data.dim_obs() != self.encoder.dim_obs() {
            anyhow::bail!(
                "data has {} features, the model expects {}",
                data.dim_obs(),
                self.encoder.dim_obs()
            );
        }

        let device = &train_config.device;
        let batch_size = train_config.batch_size;
        let num_updates = train_config.updates_per_epoch;

        let params = ParamsAdamW {
            lr: train_config.learning_rate.into(),
            eps: train_config.adam_epsilon,
            weight_decay: 0.0,
            ..Default::default()
        };
        let mut adam = AdamW::new(self.variable_map.all_vars(), params)?;

        let style = ProgressStyle::with_template("{prefix}{percent:>3}% |{wide_bar}| ETA {eta}")?;
        let pixels_per_epoch = (num_updates * self.encoder.dim_obs() * batch_size) as f64;

        let eps_hat = train_config.adam_epsilon;
        let mut bound_trace = vec![];
        let mut step = 0;

        for epoch in 0..train_config.num_epochs {
            let pb = ProgressBar::new(num_updates as u64).with_style(style.clone());
            pb.set_prefix(format!("epoch #{}|", epoch));

            if !train_config.show_progress || train_config.verbose {
                pb.set_draw_target(ProgressDrawTarget::hidden());
            }

            let mut loss_tot = 0f64;

            for _ in 0..num_updates {
                let minibatch = data.next_minibatch(batch_size, rng, device)?;
                let loss = self.negative_elbo(&minibatch.input, llik_func, rng, true)?;

                // epsilon is added before bias correction
                step += 1;
                let mut params = adam.params().clone();
                params.eps = uncorrected_adam_epsilon(eps_hat, params.beta2, step);
                adam.set_params(params);
                adam.backward_step(&loss)?;

                let loss_val = loss.to_scalar::<f32>()?;
                if !loss_val.is_finite() {
                    pb.abandon();
                    anyhow::bail!("non-finite loss {} at epoch {}", loss_val, epoch);
                }
                loss_tot += loss_val as f64;
                pb.inc(1);
            }
            pb.finish_and_clear();

            let bound = (loss_tot / pixels_per_epoch) as f32;
            bound_trace.push(bound);

            if train_config.verbose {
                info!("[{}] -log p(x) <= {}", epoch + 1, bound);
            }

            let samples = self.generate(batch_size, rng, device)?;

            on_epoch_end(&EpochSummary {
                epoch,
                loss_sum: loss_tot,
                bound_per_pixel: bound,
                samples,
            })?;
        } // each epoch

        Ok(bound_trace)
    }

    fn negative_elbo<LlikFn, R>(
        &self,
        x_nd: &Tensor,
        llik_func: &LlikFn,
        rng: &mut R,
        train: bool,
    ) -> Result<Tensor>
    where
        LlikFn: Fn(&Tensor, &Tensor) -> Result<Tensor>,
        R: Rng,
    {
        let (n, _) = x_nd.dims2()?;
        let eps_nk = randn_from_rng((n, self.encoder.dim_latent()), rng, x_nd.device())?;

        let latent = self.encoder.forward_t(x_nd, &eps_nk, train)?;
        let (_, llik) = self
            .decoder
            .forward_with_llik(&latent.z_nk, x_nd, llik_func, train)?;
        let kl = normal_kl_divergence(&latent.mean_nk, &latent.stddev_nk)?;

        kl.sum_all()? - llik.sum_all()?
    }

    /// Prior samples are decoded with the statistics of the sampled
    /// batch itself, the same normalization used while training.
    fn generate<R>(&self, n: usize, rng: &mut R, device: &Device) -> Result<Tensor>
    where
        R: Rng,
    {
        let z_nk = sample_prior(n, self.decoder.dim_latent(), rng, device)?;
        self.decoder.forward_t(&z_nk, true)?.detach().contiguous()
    }

    fn build(
        encoder: &'a Enc,
        decoder: &'a Dec,
        variable_map: &'a candle_nn::VarMap,
    ) -> anyhow::Result<Self> {
        if encoder.dim_latent() != decoder.dim_latent() {
            anyhow::bail!(
                "latent dims differ: encoder {} vs. decoder {}",
                encoder.dim_latent(),
                decoder.dim_latent()
            );
        }
        if encoder.dim_obs() != decoder.dim_obs() {
            anyhow::bail!(
                "observed dims differ: encoder {} vs. decoder {}",
                encoder.dim_obs(),
                decoder.dim_obs()
            );
        }

        Ok(Self {
            encoder,
            decoder,
            variable_map,
        })
    }
}
