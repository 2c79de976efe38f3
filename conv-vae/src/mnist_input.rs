use anyhow::{Context, Result};
use candle_core::{Device, Tensor};
use flate2::read::GzDecoder;
use log::{debug, info};
use std::fs::{self, File};
use std::io::Read;
use std::path::{Path, PathBuf};

/// CVDF mirror of http://yann.lecun.com/exdb/mnist/
pub const MNIST_URL: &str = "https://storage.googleapis.com/cvdf-datasets/mnist/";

pub const IMAGE_SIZE: usize = 28;

/// leading images of the train split kept out of training
pub const VALIDATION_SIZE: usize = 5000;

const IMAGES_MAGIC: u32 = 2051;
const LABELS_MAGIC: u32 = 2049;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum MnistSplit {
    Train,
    Test,
}

impl MnistSplit {
    pub fn images_file(&self) -> &'static str {
        match self {
            MnistSplit::Train => "train-images-idx3-ubyte",
            MnistSplit::Test => "t10k-images-idx3-ubyte",
        }
    }

    pub fn labels_file(&self) -> &'static str {
        match self {
            MnistSplit::Train => "train-labels-idx1-ubyte",
            MnistSplit::Test => "t10k-labels-idx1-ubyte",
        }
    }
}

/// Raw images of one split, row-major, one byte per pixel
pub struct MnistImages {
    pub num_images: usize,
    pub rows: usize,
    pub cols: usize,
    pub pixels: Vec<u8>,
}

impl MnistImages {
    /// (num_images x rows * cols) tensor with intensities in [0, 1]
    pub fn to_tensor(&self, device: &Device) -> candle_core::Result<Tensor> {
        let values: Vec<f32> = self.pixels.iter().map(|&p| p as f32 / 255.0).collect();
        Tensor::from_vec(values, (self.num_images, self.rows * self.cols), device)
    }

    /// Split into (the first `n` images, the rest)
    pub fn split_at(self, n: usize) -> Result<(MnistImages, MnistImages)> {
        if n > self.num_images {
            anyhow::bail!("cannot hold out {} of {} images", n, self.num_images);
        }
        let mut head = self.pixels;
        let tail = head.split_off(n * self.rows * self.cols);

        let part = |num_images, pixels| MnistImages {
            num_images,
            rows: self.rows,
            cols: self.cols,
            pixels,
        };
        Ok((part(n, head), part(self.num_images - n, tail)))
    }
}

fn read_be_u32(bytes: &[u8], offset: usize) -> Result<u32> {
    let word = bytes
        .get(offset..offset + 4)
        .ok_or_else(|| anyhow::anyhow!("truncated IDX header at byte {}", offset))?;
    Ok(u32::from_be_bytes([word[0], word[1], word[2], word[3]]))
}

/// Parse an IDX3 image file: magic 2051, then big-endian counts of
/// images, rows and columns, followed by the pixels
pub fn parse_idx_images(bytes: &[u8]) -> Result<MnistImages> {
    let magic = read_be_u32(bytes, 0)?;
    if magic != IMAGES_MAGIC {
        anyhow::bail!("bad IDX image magic number {} (expected {})", magic, IMAGES_MAGIC);
    }
    let num_images = read_be_u32(bytes, 4)? as usize;
    let rows = read_be_u32(bytes, 8)? as usize;
    let cols = read_be_u32(bytes, 12)? as usize;

    let ntot = num_images * rows * cols;
    let pixels = bytes.get(16..16 + ntot).ok_or_else(|| {
        anyhow::anyhow!(
            "IDX image file has {} pixel bytes, expected {}",
            bytes.len().saturating_sub(16),
            ntot
        )
    })?;

    Ok(MnistImages {
        num_images,
        rows,
        cols,
        pixels: pixels.to_vec(),
    })
}

/// Parse an IDX1 label file: magic 2049, big-endian count, labels
pub fn parse_idx_labels(bytes: &[u8]) -> Result<Vec<u8>> {
    let magic = read_be_u32(bytes, 0)?;
    if magic != LABELS_MAGIC {
        anyhow::bail!("bad IDX label magic number {} (expected {})", magic, LABELS_MAGIC);
    }
    let n = read_be_u32(bytes, 4)? as usize;
    let labels = bytes.get(8..8 + n).ok_or_else(|| {
        anyhow::anyhow!(
            "IDX label file has {} labels, expected {}",
            bytes.len().saturating_sub(8),
            n
        )
    })?;
    Ok(labels.to_vec())
}

fn download_file(url: &str, dest: &Path) -> Result<()> {
    info!("Downloading {}", url);
    let response = ureq::get(url)
        .call()
        .with_context(|| format!("failed to download {}", url))?;

    let mut bytes = vec![];
    response
        .into_reader()
        .read_to_end(&mut bytes)
        .with_context(|| format!("failed to read the response of {}", url))?;

    // only complete downloads may appear under the cached name
    let partial = dest.with_extension("part");
    fs::write(&partial, &bytes).with_context(|| format!("failed to write {:?}", partial))?;
    fs::rename(&partial, dest).with_context(|| format!("failed to move {:?}", partial))?;
    info!("Saved {} bytes to {:?}", bytes.len(), dest);
    Ok(())
}

/// Read the decompressed content of `name` in `data_dir`, downloading
/// `{base_url}{name}.gz` first if neither `name` nor `name.gz` exists
pub fn read_or_download(data_dir: &Path, name: &str, base_url: &str) -> Result<Vec<u8>> {
    let raw_path = data_dir.join(name);
    if raw_path.exists() {
        debug!("Using cached {:?}", raw_path);
        return fs::read(&raw_path).with_context(|| format!("failed to read {:?}", raw_path));
    }

    let gz_path: PathBuf = data_dir.join(format!("{}.gz", name));
    if gz_path.exists() {
        debug!("Using cached {:?}", gz_path);
    } else {
        fs::create_dir_all(data_dir)
            .with_context(|| format!("failed to create {:?}", data_dir))?;
        download_file(&format!("{}{}.gz", base_url, name), &gz_path)?;
    }

    let file = File::open(&gz_path).with_context(|| format!("failed to open {:?}", gz_path))?;
    let mut bytes = vec![];
    GzDecoder::new(file)
        .read_to_end(&mut bytes)
        .with_context(|| format!("failed to decompress {:?}", gz_path))?;
    Ok(bytes)
}

/// Load the images of `split`, fetching the files into `data_dir`
/// when they are not there yet. Labels are checked for consistency
/// but not returned.
pub fn read_mnist_images(
    data_dir: &Path,
    split: MnistSplit,
    base_url: &str,
) -> Result<MnistImages> {
    let images = parse_idx_images(&read_or_download(data_dir, split.images_file(), base_url)?)
        .with_context(|| format!("in {}", split.images_file()))?;
    let labels = parse_idx_labels(&read_or_download(data_dir, split.labels_file(), base_url)?)
        .with_context(|| format!("in {}", split.labels_file()))?;

    if labels.len() != images.num_images {
        anyhow::bail!(
            "{} labels for {} images in {:?}",
            labels.len(),
            images.num_images,
            split
        );
    }
    if images.rows != IMAGE_SIZE || images.cols != IMAGE_SIZE {
        anyhow::bail!(
            "expected {} x {} images, found {} x {}",
            IMAGE_SIZE,
            IMAGE_SIZE,
            images.rows,
            images.cols
        );
    }

    info!(
        "MNIST {:?}: {} images of {} x {}",
        split, images.num_images, images.rows, images.cols
    );
    Ok(images)
}
