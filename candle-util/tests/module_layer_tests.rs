use candle_core::{DType, Device, Result, Tensor};
use candle_nn::{BatchNormConfig, ModuleT, VarBuilder, VarMap};
use candle_util::candle_aux_layers::*;
use candle_util::candle_data_loader::InMemoryData;
use candle_util::candle_decoder_conv_bernoulli::ConvBernoulliDecoder;
use candle_util::candle_encoder_conv_gaussian::ConvGaussianEncoder;
use candle_util::candle_inference::TrainConfig;
use candle_util::candle_loss_functions::bernoulli_likelihood;
use candle_util::candle_sampling::reinitialize_variables;
use candle_util::candle_vae_inference::{Vae, VaeT};
use rand::rngs::StdRng;
use rand::SeedableRng;

fn bn_config() -> BatchNormConfig {
    BatchNormConfig {
        eps: 1e-3,
        remove_mean: true,
        affine: true,
        momentum: 3e-4,
    }
}

fn train_config(batch_size: usize, updates_per_epoch: usize, num_epochs: usize) -> TrainConfig {
    TrainConfig {
        learning_rate: 0.01,
        adam_epsilon: 1.0,
        batch_size,
        updates_per_epoch,
        num_epochs,
        device: Device::Cpu,
        verbose: false,
        show_progress: false,
    }
}

#[test]
fn conv_stack_shapes() -> Result<()> {
    let varmap = VarMap::new();
    let vs = VarBuilder::from_varmap(&varmap, DType::F32, &Device::Cpu);
    let specs = ConvGaussianEncoder::default_layers();
    let stack = conv_stack(1, &specs, ConvDirection::Forward, bn_config(), vs.pp("enc"))?;
    assert_eq!(stack.len(), 3);

    let x = Tensor::zeros((2, 1, 28, 28), DType::F32, &Device::Cpu)?;
    let h = stack.forward_t(&x, true)?;
    assert_eq!(h.dims(), &[2, 128, 3, 3]);

    // normalized layers carry no bias
    let names = varmap.data().lock().expect("lock").keys().cloned().collect::<Vec<_>>();
    assert!(names.contains(&"enc.0.weight".to_string()));
    assert!(names.contains(&"enc.0.bn.weight".to_string()));
    assert!(!names.contains(&"enc.0.bias".to_string()));
    Ok(())
}

#[test]
fn deconv_stack_shapes() -> Result<()> {
    let varmap = VarMap::new();
    let vs = VarBuilder::from_varmap(&varmap, DType::F32, &Device::Cpu);
    let specs = ConvBernoulliDecoder::default_layers();
    let stack = conv_stack(10, &specs, ConvDirection::Transpose, bn_config(), vs.pp("dec"))?;

    let z = Tensor::zeros((2, 10, 1, 1), DType::F32, &Device::Cpu)?;
    let h = stack.forward_t(&z, false)?;
    assert_eq!(h.dims(), &[2, 1, 28, 28]);

    let names = varmap.data().lock().expect("lock").keys().cloned().collect::<Vec<_>>();
    assert!(names.contains(&"dec.3.bias".to_string()));
    Ok(())
}

#[test]
fn vae_training_reports_finite_bounds() -> anyhow::Result<()> {
    let dev = Device::Cpu;
    let varmap = VarMap::new();
    let vs = VarBuilder::from_varmap(&varmap, DType::F32, &dev);

    let encoder = ConvGaussianEncoder::new(
        28,
        4,
        &ConvGaussianEncoder::default_layers(),
        0.1,
        bn_config(),
        vs.clone(),
    )?;
    let decoder = ConvBernoulliDecoder::new(
        28,
        4,
        &ConvBernoulliDecoder::default_layers(),
        bn_config(),
        vs,
    )?;

    let mut rng = StdRng::seed_from_u64(42);
    reinitialize_variables(&varmap, &mut rng)?;

    let rows: Vec<Vec<f32>> = (0..3)
        .map(|i| (0..784).map(|j| ((i + j) % 2) as f32).collect())
        .collect();
    let mut data = InMemoryData::new(&rows)?;

    let mut vae = Vae::build(&encoder, &decoder, &varmap)?;
    let mut epochs_seen = vec![];

    let trace = vae.train_encoder_decoder(
        &mut data,
        &bernoulli_likelihood,
        &train_config(2, 3, 2),
        &mut rng,
        |summary| {
            assert_eq!(summary.samples.dims(), &[2, 784]);
            epochs_seen.push(summary.epoch);
            Ok(())
        },
    )?;

    assert_eq!(trace.len(), 2);
    assert!(trace.iter().all(|b| b.is_finite() && *b > 0.0));
    assert_eq!(epochs_seen, vec![0, 1]);
    Ok(())
}

#[test]
fn mismatched_latent_dims_fail_to_build() -> anyhow::Result<()> {
    let dev = Device::Cpu;
    let varmap = VarMap::new();
    let vs = VarBuilder::from_varmap(&varmap, DType::F32, &dev);

    let encoder = ConvGaussianEncoder::new(
        28,
        4,
        &ConvGaussianEncoder::default_layers(),
        0.1,
        bn_config(),
        vs.clone(),
    )?;
    let decoder = ConvBernoulliDecoder::new(
        28,
        5,
        &ConvBernoulliDecoder::default_layers(),
        bn_config(),
        vs,
    )?;

    assert!(Vae::build(&encoder, &decoder, &varmap).is_err());
    Ok(())
}

#[test]
fn invalid_config_is_rejected() {
    assert!(train_config(0, 1, 1).validate().is_err());
    assert!(train_config(1, 0, 1).validate().is_err());
    assert!(train_config(1, 1, 0).validate().is_ok());
}
