use crate::candle_aux_layers::*;
use crate::candle_model_traits::*;
use candle_core::{Result, Tensor};
use candle_nn::{BatchNormConfig, Dropout, Linear, Module, ModuleT, VarBuilder};

/// sigma^2 = exp(-80) is still a normal f32, so log(sigma^2) in the
/// KL term stays finite
pub const MIN_LOG_VARIANCE: f64 = -80.;

/// Mean-field Gaussian encoder for square single-channel images:
/// conv stack -> dropout -> flatten -> linear (2k), split into mean
/// and log-variance halves.
pub struct ConvGaussianEncoder {
    n_features: usize,
    n_latent: usize,
    image_size: usize,
    conv: StackLayers<ConvLayer>,
    dropout: Dropout,
    fc: Linear,
}

impl EncoderModuleT for ConvGaussianEncoder {
    ///
    /// Evaluate latent Gaussian parameters: mu and sigma
    /// z ~ N(mu(x), sigma(x)^2), sigma = sqrt(exp(log_var(x)))
    fn latent_gaussian_params(&self, x_nd: &Tensor, train: bool) -> Result<(Tensor, Tensor)> {

        let (n, d) = x_nd.dims2()?;
        if d != self.n_features {
            candle_core::bail!(
                "encoder expects {} features, got {}",
                self.n_features,
                d
            );
        }

        let x_nchw = x_nd.reshape((n, 1, self.image_size, self.image_size))?;
        let h = self.conv.forward_t(&x_nchw, train)?;
        let h = self.dropout.forward_t(&h, train)?;
        let h_nl = h.flatten_from(1)?;
        let out_n2k = self.fc.forward(&h_nl)?;

        let k = self.n_latent;
        let z_mean_nk = out_n2k.narrow(1, 0, k)?;
        let z_lnvar_nk = out_n2k.narrow(1, k, k)?.maximum(MIN_LOG_VARIANCE)?;
        let z_stddev_nk = (z_lnvar_nk * 0.5)?.exp()?;

        Ok((z_mean_nk, z_stddev_nk))
    }

    fn dim_obs(&self) -> usize {
        self.n_features
    }

    fn dim_latent(&self) -> usize {
        self.n_latent
    }
}

impl ConvGaussianEncoder {
    /// 28 -> 14 -> 7 -> 3 with 32, 64, 128 channels
    pub fn default_layers() -> Vec<ConvLayerSpec> {
        vec![
            ConvLayerSpec::new(5, 32).stride(2),
            ConvLayerSpec::new(5, 64).stride(2),
            ConvLayerSpec::new(5, 128).valid(),
        ]
    }

    /// Will create a new convolutional encoder module
    /// with these variables:
    ///
    /// * `nn.enc.conv.{}.weight` where {} is the layer index
    /// * `nn.enc.conv.{}.bn.*` for normalized layers
    /// * `nn.enc.z.weight`, `nn.enc.z.bias`
    ///
    /// # Arguments
    /// * `image_size` - width (= height) of the input images
    /// * `n_latent` - latent dimension
    /// * `layers` - convolution layers
    /// * `drop_prob` - dropout probability before the linear layer
    /// * `bn_config` - batch normalization settings
    /// * `vs` - variable builder
    pub fn new(
        image_size: usize,
        n_latent: usize,
        layers: &[ConvLayerSpec],
        drop_prob: f32,
        bn_config: BatchNormConfig,
        vs: VarBuilder,
    ) -> Result<Self> {
        if layers.is_empty() {
            candle_core::bail!("encoder needs at least one convolution layer");
        }

        let out_size = layers.iter().try_fold(image_size, |size, spec| {
            let padded = match spec.padding {
                Padding::Same => size + spec.kernel - 1,
                Padding::Valid => size,
            };
            if padded < spec.kernel {
                None
            } else {
                Some(spec.conv_output_size(size))
            }
        });

        let out_size = match out_size {
            Some(s) if s > 0 => s,
            _ => candle_core::bail!("image size {} too small for the encoder", image_size),
        };

        let conv = conv_stack(
            1,
            layers,
            ConvDirection::Forward,
            bn_config,
            vs.pp("nn.enc.conv"),
        )?;

        let last_channels = layers[layers.len() - 1].channels;
        let flat_dim = last_channels * out_size * out_size;

        let dropout = Dropout::new(drop_prob);
        let fc = candle_nn::linear(flat_dim, 2 * n_latent, vs.pp("nn.enc.z"))?;

        Ok(Self {
            n_features: image_size * image_size,
            n_latent,
            image_size,
            conv,
            dropout,
            fc,
        })
    }
}
