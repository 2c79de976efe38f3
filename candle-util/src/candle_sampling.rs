use candle_core::{DType, Device, Result, Tensor};
use candle_nn::VarMap;
use rand::Rng;
use rand_distr::StandardNormal;

/// Draw a standard normal tensor from an explicit random generator
/// so that sampling is reproducible for a fixed seed.
///
/// * `shape` - (rows, cols)
/// * `rng` - random number generator
/// * `device` - target device
pub fn randn_from_rng<R: Rng + ?Sized>(
    shape: (usize, usize),
    rng: &mut R,
    device: &Device,
) -> Result<Tensor> {
    let (nrow, ncol) = shape;
    let values: Vec<f32> = (0..nrow * ncol)
        .map(|_| rng.sample::<f32, _>(StandardNormal))
        .collect();
    Tensor::from_vec(values, (nrow, ncol), device)
}

/// z ~ N(0, I) for `n` samples of a `k`-dimensional latent vector
pub fn sample_prior<R: Rng + ?Sized>(
    n: usize,
    k: usize,
    rng: &mut R,
    device: &Device,
) -> Result<Tensor> {
    randn_from_rng((n, k), rng, device)
}

/// Redraw the trainable weights of `variable_map` from `rng`.
///
/// Weight tensors (rank >= 2) get N(0, 2 / fan_in) with fan_in being
/// the product of all but the first dimension; other tensors (biases)
/// are reset to zero. Batch normalization variables (`.bn.` in the
/// name) keep their constant initialization. Variables are visited
/// in name order so the draw sequence only depends on the seed.
pub fn reinitialize_variables<R: Rng + ?Sized>(variable_map: &VarMap, rng: &mut R) -> Result<()> {
    let data = variable_map
        .data()
        .lock()
        .map_err(|e| candle_core::Error::Msg(format!("variable map lock: {e}")))?;

    let mut names: Vec<&String> = data.keys().collect();
    names.sort();

    for name in names {
        if name.contains(".bn.") {
            continue;
        }
        let var = &data[name];
        let dims = var.dims().to_vec();
        let device = var.device().clone();
        let dtype = var.dtype();

        let values = if dims.len() >= 2 {
            let fan_in: usize = dims[1..].iter().product();
            let std = (2.0 / fan_in.max(1) as f64).sqrt() as f32;
            let n: usize = dims.iter().product();
            let v: Vec<f32> = (0..n)
                .map(|_| rng.sample::<f32, _>(StandardNormal) * std)
                .collect();
            Tensor::from_vec(v, dims.as_slice(), &device)?
        } else {
            Tensor::zeros(dims.as_slice(), DType::F32, &device)?
        };

        var.set(&values.to_dtype(dtype)?)?;
    }
    Ok(())
}
