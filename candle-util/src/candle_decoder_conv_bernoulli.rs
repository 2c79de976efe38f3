use crate::candle_aux_layers::*;
use crate::candle_model_traits::*;
use candle_core::{Result, Tensor};
use candle_nn::{Activation, BatchNormConfig, ModuleT, VarBuilder};

////////////////////////////////////////
// Bernoulli decoder by deconvolution //
////////////////////////////////////////

pub struct ConvBernoulliDecoder {
    n_features: usize,
    n_latent: usize,
    deconv: StackLayers<ConvLayer>,
}

impl ConvBernoulliDecoder {
    /// 1 -> 3 -> 7 -> 14 -> 28; the last layer squashes to [0, 1]
    pub fn default_layers() -> Vec<ConvLayerSpec> {
        vec![
            ConvLayerSpec::new(3, 128).valid(),
            ConvLayerSpec::new(5, 64).valid(),
            ConvLayerSpec::new(5, 32).stride(2),
            ConvLayerSpec::new(5, 1)
                .stride(2)
                .activation(Some(Activation::Sigmoid))
                .without_batch_norm(),
        ]
    }

    /// Will create a new transposed-convolution decoder with these
    /// variables:
    ///
    /// * `nn.dec.deconv.{}.weight` where {} is the layer index
    /// * `nn.dec.deconv.{}.bn.*` for normalized layers
    /// * `nn.dec.deconv.{}.bias` otherwise
    ///
    /// The latent vector is treated as a 1 x 1 grid with `n_latent`
    /// channels; the layers must grow it to a single-channel
    /// `image_size` x `image_size` grid.
    pub fn new(
        image_size: usize,
        n_latent: usize,
        layers: &[ConvLayerSpec],
        bn_config: BatchNormConfig,
        vs: VarBuilder,
    ) -> Result<Self> {
        let out_size = stack_output_size(1, layers, ConvDirection::Transpose);
        if out_size != image_size {
            candle_core::bail!(
                "decoder layers produce {} x {} images, expected {} x {}",
                out_size,
                out_size,
                image_size,
                image_size
            );
        }

        match layers.last() {
            Some(spec) if spec.channels == 1 => {}
            _ => candle_core::bail!("decoder must end with a single-channel layer"),
        }

        let deconv = conv_stack(
            n_latent,
            layers,
            ConvDirection::Transpose,
            bn_config,
            vs.pp("nn.dec.deconv"),
        )?;

        Ok(Self {
            n_features: image_size * image_size,
            n_latent,
            deconv,
        })
    }
}

impl DecoderModuleT for ConvBernoulliDecoder {
    /// Per-pixel Bernoulli probabilities (n x d)
    fn forward_t(&self, z_nk: &Tensor, train: bool) -> Result<Tensor> {
        let (n, k) = z_nk.dims2()?;
        if k != self.n_latent {
            candle_core::bail!("decoder expects {} latent dims, got {}", self.n_latent, k);
        }
        let z_nk11 = z_nk.reshape((n, k, 1, 1))?;
        self.deconv.forward_t(&z_nk11, train)?.flatten_from(1)
    }

    fn dim_obs(&self) -> usize {
        self.n_features
    }

    fn dim_latent(&self) -> usize {
        self.n_latent
    }
}
