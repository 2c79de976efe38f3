use candle_core::{Result, Tensor};
use candle_nn::{
    Activation, BatchNorm, BatchNormConfig, Conv2d, Conv2dConfig, ConvTranspose2d,
    ConvTranspose2dConfig, Module, ModuleT, VarBuilder,
};

/// build a stack of `M` layers, each optionally followed by batch
/// normalization and an activation
pub struct StackLayers<M>
where
    M: Module,
{
    module_layers: Vec<M>,
    norm_layers: Vec<Option<BatchNorm>>,
    activation_layers: Vec<Option<Activation>>,
}

impl<M> ModuleT for StackLayers<M>
where
    M: Module,
{
    fn forward_t(&self, input: &Tensor, train: bool) -> Result<Tensor> {
        let mut x = input.clone();
        for ((module, norm), activation) in self
            .module_layers
            .iter()
            .zip(self.norm_layers.iter())
            .zip(self.activation_layers.iter())
        {
            x = module.forward(&x)?;
            if let Some(norm) = norm {
                x = norm.forward_t(&x, train)?;
            }
            if let Some(activation) = activation {
                x = activation.forward(&x)?;
            }
        }
        Ok(x)
    }
}

impl<M> StackLayers<M>
where
    M: Module,
{
    pub fn new() -> Self {
        Self {
            module_layers: Vec::new(),
            norm_layers: Vec::new(),
            activation_layers: Vec::new(),
        }
    }

    /// Appends `layer -> norm -> activation` after all the current
    /// layers; either of the last two can be skipped.
    pub fn push_with_norm_act(
        &mut self,
        layer: M,
        norm: Option<BatchNorm>,
        activation: Option<Activation>,
    ) {
        self.module_layers.push(layer);
        self.norm_layers.push(norm);
        self.activation_layers.push(activation);
    }

    pub fn len(&self) -> usize {
        self.module_layers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.module_layers.is_empty()
    }
}

impl<M> Default for StackLayers<M>
where
    M: Module,
{
    fn default() -> Self {
        Self::new()
    }
}

//////////////////////////////////////
// Convolution layer specifications //
//////////////////////////////////////

/// How the spatial border is handled
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Padding {
    /// output size = ceil(input / stride) for a convolution and
    /// input * stride for a transposed convolution (odd kernels)
    Same,
    /// no padding at all
    Valid,
}

/// Whether a stack shrinks (convolution) or grows (transposed
/// convolution) the spatial grid
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ConvDirection {
    Forward,
    Transpose,
}

/// One square convolution layer: kernel size, output channels,
/// stride, padding, activation, and whether batch normalization
/// replaces the bias term.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct ConvLayerSpec {
    pub kernel: usize,
    pub channels: usize,
    pub stride: usize,
    pub padding: Padding,
    pub activation: Option<Activation>,
    pub batch_norm: bool,
}

impl ConvLayerSpec {
    /// stride 1, same padding, ELU, batch normalization
    pub fn new(kernel: usize, channels: usize) -> Self {
        Self {
            kernel,
            channels,
            stride: 1,
            padding: Padding::Same,
            activation: Some(Activation::Elu(1.0)),
            batch_norm: true,
        }
    }

    pub fn stride(mut self, stride: usize) -> Self {
        self.stride = stride;
        self
    }

    pub fn valid(mut self) -> Self {
        self.padding = Padding::Valid;
        self
    }

    pub fn activation(mut self, activation: Option<Activation>) -> Self {
        self.activation = activation;
        self
    }

    pub fn without_batch_norm(mut self) -> Self {
        self.batch_norm = false;
        self
    }

    fn padding_size(&self) -> usize {
        match self.padding {
            Padding::Same => (self.kernel - 1) / 2,
            Padding::Valid => 0,
        }
    }

    fn output_padding(&self) -> usize {
        match self.padding {
            Padding::Same => self.stride - 1,
            Padding::Valid => 0,
        }
    }

    /// spatial size after a convolution
    pub fn conv_output_size(&self, input: usize) -> usize {
        (input + 2 * self.padding_size() - self.kernel) / self.stride + 1
    }

    /// spatial size after a transposed convolution
    pub fn conv_transpose_output_size(&self, input: usize) -> usize {
        (input - 1) * self.stride + self.kernel + self.output_padding() - 2 * self.padding_size()
    }

    pub fn output_size(&self, input: usize, direction: ConvDirection) -> usize {
        match direction {
            ConvDirection::Forward => self.conv_output_size(input),
            ConvDirection::Transpose => self.conv_transpose_output_size(input),
        }
    }

    fn conv2d_config(&self) -> Conv2dConfig {
        Conv2dConfig {
            padding: self.padding_size(),
            stride: self.stride,
            ..Default::default()
        }
    }

    fn conv_transpose2d_config(&self) -> ConvTranspose2dConfig {
        ConvTranspose2dConfig {
            padding: self.padding_size(),
            output_padding: self.output_padding(),
            stride: self.stride,
            ..Default::default()
        }
    }
}

/// Spatial size after running `specs` over a square `input` grid
pub fn stack_output_size(input: usize, specs: &[ConvLayerSpec], direction: ConvDirection) -> usize {
    specs
        .iter()
        .fold(input, |size, spec| spec.output_size(size, direction))
}

/// Either kind of convolution, so that both fit in one `StackLayers`
pub enum ConvLayer {
    Conv(Conv2d),
    Transpose(ConvTranspose2d),
}

impl Module for ConvLayer {
    fn forward(&self, x: &Tensor) -> Result<Tensor> {
        match self {
            ConvLayer::Conv(conv) => conv.forward(x),
            ConvLayer::Transpose(conv) => conv.forward(x),
        }
    }
}

/// Build a convolution stack from explicit layer specifications.
/// Variables are named `{j}.weight`, `{j}.bias` (only without batch
/// normalization) and `{j}.bn.*` under `vs`.
///
/// * `in_channels` - channels of the input grid
/// * `specs` - one entry per layer
/// * `direction` - convolution or transposed convolution
/// * `bn_config` - shared by all normalized layers
/// * `vs` - variable builder
pub fn conv_stack(
    in_channels: usize,
    specs: &[ConvLayerSpec],
    direction: ConvDirection,
    bn_config: BatchNormConfig,
    vs: VarBuilder,
) -> Result<StackLayers<ConvLayer>> {
    let mut stack = StackLayers::<ConvLayer>::new();
    let mut prev_channels = in_channels;

    for (j, spec) in specs.iter().enumerate() {
        let vs_j = vs.pp(j.to_string());
        let (c_in, c_out, k) = (prev_channels, spec.channels, spec.kernel);

        let layer = match (direction, spec.batch_norm) {
            (ConvDirection::Forward, true) => ConvLayer::Conv(candle_nn::conv2d_no_bias(
                c_in,
                c_out,
                k,
                spec.conv2d_config(),
                vs_j.clone(),
            )?),
            (ConvDirection::Forward, false) => ConvLayer::Conv(candle_nn::conv2d(
                c_in,
                c_out,
                k,
                spec.conv2d_config(),
                vs_j.clone(),
            )?),
            (ConvDirection::Transpose, true) => {
                ConvLayer::Transpose(candle_nn::conv_transpose2d_no_bias(
                    c_in,
                    c_out,
                    k,
                    spec.conv_transpose2d_config(),
                    vs_j.clone(),
                )?)
            }
            (ConvDirection::Transpose, false) => {
                ConvLayer::Transpose(candle_nn::conv_transpose2d(
                    c_in,
                    c_out,
                    k,
                    spec.conv_transpose2d_config(),
                    vs_j.clone(),
                )?)
            }
        };

        let norm = if spec.batch_norm {
            Some(candle_nn::batch_norm(c_out, bn_config, vs_j.pp("bn"))?)
        } else {
            None
        };

        stack.push_with_norm_act(layer, norm, spec.activation);
        prev_channels = c_out;
    }

    Ok(stack)
}
