use anyhow::{Context, Result};
use candle_core::{Device, Tensor};
use image::GrayImage;
use std::fs;
use std::path::{Path, PathBuf};

/// Pixel probabilities in [0, 1] -> 8-bit grayscale
pub fn probabilities_to_gray(prob: &[f32], image_size: usize) -> Result<GrayImage> {
    if prob.len() != image_size * image_size {
        anyhow::bail!(
            "{} pixels do not fill a {} x {} image",
            prob.len(),
            image_size,
            image_size
        );
    }

    let bytes: Vec<u8> = prob
        .iter()
        .map(|&p| (p * 255.0).round().clamp(0.0, 255.0) as u8)
        .collect();

    GrayImage::from_raw(image_size as u32, image_size as u32, bytes)
        .ok_or_else(|| anyhow::anyhow!("cannot build a {0} x {0} image", image_size))
}

/// Write each row of `samples_nd` to `{img_dir}/{row}.png`, creating
/// the directory if needed. Existing files of the same name are
/// replaced.
pub fn save_image_batch(
    samples_nd: &Tensor,
    image_size: usize,
    img_dir: &Path,
) -> Result<Vec<PathBuf>> {
    fs::create_dir_all(img_dir).with_context(|| format!("failed to create {:?}", img_dir))?;

    let rows = samples_nd
        .to_device(&Device::Cpu)?
        .to_dtype(candle_core::DType::F32)?
        .to_vec2::<f32>()?;

    let mut paths = Vec::with_capacity(rows.len());
    for (b, row) in rows.iter().enumerate() {
        let path = img_dir.join(format!("{}.png", b));
        probabilities_to_gray(row, image_size)?
            .save(&path)
            .with_context(|| format!("failed to write {:?}", path))?;
        paths.push(path);
    }
    Ok(paths)
}
