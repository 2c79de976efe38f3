use crate::image_output::save_image_batch;
use crate::mnist_input::*;

use anyhow::Result;
use candle_core::{DType, Device};
use candle_nn::{BatchNormConfig, VarBuilder, VarMap};
use candle_util::candle_data_loader::*;
use candle_util::candle_decoder_conv_bernoulli::ConvBernoulliDecoder;
use candle_util::candle_encoder_conv_gaussian::ConvGaussianEncoder;
use candle_util::candle_inference::TrainConfig;
use candle_util::candle_loss_functions::bernoulli_likelihood;
use candle_util::candle_sampling::reinitialize_variables;
use candle_util::candle_vae_inference::{Vae, VaeT};
use clap::{Parser, ValueEnum};
use log::info;
use rand::rngs::StdRng;
use rand::SeedableRng;
use std::path::PathBuf;

#[derive(ValueEnum, Clone, Debug, PartialEq)]
#[clap(rename_all = "lowercase")]
pub enum ComputeDevice {
    Cpu,
    Cuda,
    Metal,
}

#[derive(Parser, Debug, Clone)]
#[command(
    version,
    about = "Convolutional VAE for MNIST",
    long_about = "Train a convolutional variational auto-encoder on MNIST.\n\
		  Prior: standard normal. Likelihood: Bernoulli over pixels,\n\
		  parameterized by a deconvolution network.\n\
		  Variational model: mean-field Gaussian parameterized by\n\
		  a convolution network.\n\
		  At the end of every epoch, prior samples are decoded and\n\
		  written to {working-directory}/img/{index}.png."
)]
pub struct ConvVaeArgs {
    #[arg(long, default_value_t = 128, help = "batch size")]
    pub batch_size: usize,

    #[arg(long, default_value_t = 1000, help = "number of updates per epoch")]
    pub updates_per_epoch: usize,

    #[arg(long, default_value_t = 100, help = "max epoch")]
    pub max_epoch: usize,

    #[arg(long, default_value_t = 1e-2, help = "learning rate")]
    pub learning_rate: f32,

    #[arg(
        long,
        default_value = "",
        help = "Working directory",
        long_help = "Working directory.\n\
		     MNIST is cached in {dir}/data/mnist and\n\
		     sample images are written to {dir}/img."
    )]
    pub working_directory: Box<str>,

    #[arg(long, default_value_t = 10, help = "size of the hidden VAE unit")]
    pub hidden_size: usize,

    #[arg(long, default_value_t = 42, help = "random seed")]
    pub seed: u64,

    #[arg(long, default_value_t = 1.0, help = "epsilon of the Adam optimizer")]
    pub adam_epsilon: f64,

    #[arg(long, value_enum, default_value = "cpu", help = "candle device")]
    pub device: ComputeDevice,

    #[arg(long, default_value_t = 0, help = "device number for cuda/metal")]
    pub device_no: usize,

    #[arg(long, default_value = MNIST_URL, help = "base URL of the gzipped MNIST files")]
    pub mnist_url: Box<str>,

    #[arg(
        long,
        default_value_t = false,
        help = "Verbosity",
        long_help = "Log each epoch instead of drawing progress bars."
    )]
    pub verbose: bool,

    #[arg(long, default_value_t = false, help = "no progress bars")]
    pub quiet: bool,
}

/// Model shape, fixed once at start-up
pub struct ConvVaeConfig {
    pub image_size: usize,
    pub hidden_size: usize,
    pub drop_prob: f32,
    pub bn_config: BatchNormConfig,
}

impl ConvVaeConfig {
    pub fn new(hidden_size: usize) -> Result<Self> {
        if hidden_size == 0 {
            anyhow::bail!("hidden size must be positive");
        }
        Ok(Self {
            image_size: IMAGE_SIZE,
            hidden_size,
            drop_prob: 0.1,
            bn_config: BatchNormConfig {
                eps: 1e-3,
                remove_mean: true,
                affine: true,
                momentum: 3e-4,
            },
        })
    }
}

impl ConvVaeArgs {
    pub fn data_directory(&self) -> PathBuf {
        PathBuf::from(self.working_directory.as_ref()).join("data").join("mnist")
    }

    pub fn image_directory(&self) -> PathBuf {
        PathBuf::from(self.working_directory.as_ref()).join("img")
    }

    pub fn compute_device(&self) -> Result<Device> {
        Ok(match self.device {
            ComputeDevice::Metal => Device::new_metal(self.device_no)?,
            ComputeDevice::Cuda => Device::new_cuda(self.device_no)?,
            _ => Device::Cpu,
        })
    }

    pub fn train_config(&self) -> Result<TrainConfig> {
        let config = TrainConfig {
            learning_rate: self.learning_rate,
            adam_epsilon: self.adam_epsilon,
            batch_size: self.batch_size,
            updates_per_epoch: self.updates_per_epoch,
            num_epochs: self.max_epoch,
            device: self.compute_device()?,
            verbose: self.verbose,
            show_progress: !self.quiet,
        };
        config.validate()?;
        Ok(config)
    }
}

/// Download (if needed) and load MNIST, then train on the train split
/// minus its first `VALIDATION_SIZE` images
pub fn fit_conv_vae(args: &ConvVaeArgs) -> Result<Vec<f32>> {
    let train_config = args.train_config()?;

    let images = read_mnist_images(&args.data_directory(), MnistSplit::Train, &args.mnist_url)?;
    let (validation, train) = images.split_at(VALIDATION_SIZE)?;
    info!(
        "holding out {} validation images, training on {}",
        validation.num_images, train.num_images
    );
    let mut data = InMemoryData::new(&train.to_tensor(&Device::Cpu)?)?;

    train_conv_vae(args, &mut data, &train_config)
}

/// Build the encoder and decoder, train them on `data`, and write the
/// prior samples of every epoch to the image directory
pub fn train_conv_vae<D>(
    args: &ConvVaeArgs,
    data: &mut D,
    train_config: &TrainConfig,
) -> Result<Vec<f32>>
where
    D: DataLoader,
{
    let config = ConvVaeConfig::new(args.hidden_size)?;
    let dev = &train_config.device;

    let parameters = VarMap::new();
    let param_builder = VarBuilder::from_varmap(&parameters, DType::F32, dev);

    let encoder = ConvGaussianEncoder::new(
        config.image_size,
        config.hidden_size,
        &ConvGaussianEncoder::default_layers(),
        config.drop_prob,
        config.bn_config,
        param_builder.clone(),
    )?;

    let decoder = ConvBernoulliDecoder::new(
        config.image_size,
        config.hidden_size,
        &ConvBernoulliDecoder::default_layers(),
        config.bn_config,
        param_builder,
    )?;

    let mut rng = StdRng::seed_from_u64(args.seed);
    reinitialize_variables(&parameters, &mut rng)?;

    info!(
        "input: {} -> encoder -> {} -> decoder -> output: {}",
        config.image_size * config.image_size,
        config.hidden_size,
        config.image_size * config.image_size
    );
    info!(
        "training on {} samples: {} epochs x {} updates, batch size {}",
        data.num_samples(),
        train_config.num_epochs,
        train_config.updates_per_epoch,
        train_config.batch_size
    );

    let img_dir = args.image_directory();
    let mut vae = Vae::build(&encoder, &decoder, &parameters)?;

    let trace = vae.train_encoder_decoder(
        data,
        &bernoulli_likelihood,
        train_config,
        &mut rng,
        |summary| {
            println!("-log p(x) <= {:.6}", summary.bound_per_pixel);
            let paths = save_image_batch(&summary.samples, config.image_size, &img_dir)?;
            info!(
                "epoch #{}: wrote {} samples to {:?}",
                summary.epoch,
                paths.len(),
                img_dir
            );
            Ok(())
        },
    )?;

    Ok(trace)
}
