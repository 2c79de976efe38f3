use candle_core::{Device, Tensor};
use rand::Rng;
use rand::prelude::SliceRandom;

pub struct MinibatchData {
    pub input: Tensor,
}

/// `DataLoader` for minibatch learning
pub trait DataLoader {
    /// Draw the next minibatch of `batch_size` samples
    fn next_minibatch<R: Rng>(
        &mut self,
        batch_size: usize,
        rng: &mut R,
        target_device: &Device,
    ) -> anyhow::Result<MinibatchData>;

    fn num_samples(&self) -> usize;

    fn dim_obs(&self) -> usize;
}

///
/// A simple data loader for in-memory 2d matrix.  Each row will be
/// considered as a feature vector. The number of samples is the
/// number of rows.
///
pub struct InMemoryData {
    input_data: Vec<Tensor>,
    dim_obs: usize,
    minibatches: Minibatches,
}

impl InMemoryData {
    ///
    /// Create a data loader with the main data tensor `data`
    ///
    pub fn new<D>(data: &D) -> anyhow::Result<Self>
    where
        D: RowsToTensorVec,
    {
        let data = data.rows_to_tensor_vec()?;

        if data.is_empty() {
            return Err(anyhow::anyhow!("empty data"));
        }

        let dim_obs = data[0].dim(1)?;
        if let Some(row) = data.iter().find(|x| x.dims() != [1, dim_obs].as_slice()) {
            return Err(anyhow::anyhow!(
                "inconsistent row shape {:?} vs. [1, {}]",
                row.dims(),
                dim_obs
            ));
        }

        let rows = (0..data.len()).collect();

        Ok(InMemoryData {
            input_data: data,
            dim_obs,
            minibatches: Minibatches::new(rows),
        })
    }
}

impl DataLoader for InMemoryData {
    fn next_minibatch<R: Rng>(
        &mut self,
        batch_size: usize,
        rng: &mut R,
        target_device: &Device,
    ) -> anyhow::Result<MinibatchData> {
        let samples = self.minibatches.next_batch(batch_size, rng)?;
        let chunk: Vec<Tensor> = samples
            .iter()
            .map(|&i| self.input_data[i].clone())
            .collect();

        let input = Tensor::cat(&chunk, 0)?.to_device(target_device)?;
        Ok(MinibatchData { input })
    }

    fn num_samples(&self) -> usize {
        self.input_data.len()
    }

    fn dim_obs(&self) -> usize {
        self.dim_obs
    }
}

///
/// A helper `struct` for drawing minibatch indexes. Samples are
/// visited in a shuffled order; once every sample has been visited
/// the order is reshuffled and drawing continues, so a minibatch can
/// straddle two passes (or several, if it is larger than the data).
///
pub struct Minibatches {
    samples: Vec<usize>,
    cursor: usize,
}

impl Minibatches {
    pub fn new(samples: Vec<usize>) -> Self {
        let cursor = samples.len();
        Self { samples, cursor }
    }

    pub fn next_batch<R: Rng>(
        &mut self,
        batch_size: usize,
        rng: &mut R,
    ) -> anyhow::Result<Vec<usize>> {
        if self.samples.is_empty() {
            return Err(anyhow::anyhow!("no samples to draw a minibatch from"));
        }

        let mut batch = Vec::with_capacity(batch_size);
        while batch.len() < batch_size {
            if self.cursor >= self.samples.len() {
                self.samples.shuffle(rng);
                self.cursor = 0;
            }
            let take = (batch_size - batch.len()).min(self.samples.len() - self.cursor);
            batch.extend_from_slice(&self.samples[self.cursor..(self.cursor + take)]);
            self.cursor += take;
        }
        Ok(batch)
    }
}

///
/// Convert rows of a matrix to a vector of `Tensor`
///
pub trait RowsToTensorVec {
    fn rows_to_tensor_vec(&self) -> candle_core::Result<Vec<Tensor>>;
}

impl RowsToTensorVec for Tensor {
    fn rows_to_tensor_vec(&self) -> candle_core::Result<Vec<Tensor>> {
        let (nrow, _) = self.dims2()?;
        (0..nrow).map(|i| self.narrow(0, i, 1)).collect()
    }
}

impl RowsToTensorVec for Vec<Vec<f32>> {
    fn rows_to_tensor_vec(&self) -> candle_core::Result<Vec<Tensor>> {
        self.iter()
            .map(|row| Tensor::from_slice(row.as_slice(), (1, row.len()), &Device::Cpu))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    #[test]
    fn batches_wrap_around_small_data() -> anyhow::Result<()> {
        let mut rng = StdRng::seed_from_u64(1);
        let mut mb = Minibatches::new(vec![0, 1]);

        let batch = mb.next_batch(4, &mut rng)?;
        assert_eq!(batch.len(), 4);
        // each pass over the data visits every sample once
        let mut first = batch[..2].to_vec();
        first.sort();
        assert_eq!(first, vec![0, 1]);
        let mut second = batch[2..].to_vec();
        second.sort();
        assert_eq!(second, vec![0, 1]);
        Ok(())
    }

    #[test]
    fn batches_cover_every_sample_per_pass() -> anyhow::Result<()> {
        let mut rng = StdRng::seed_from_u64(2);
        let mut mb = Minibatches::new((0..10).collect());

        let mut seen = mb.next_batch(4, &mut rng)?;
        seen.extend(mb.next_batch(4, &mut rng)?);
        seen.extend(mb.next_batch(2, &mut rng)?);
        seen.sort();
        assert_eq!(seen, (0..10).collect::<Vec<_>>());
        Ok(())
    }

    #[test]
    fn loader_stacks_rows() -> anyhow::Result<()> {
        let rows = vec![vec![0.0f32, 0.5, 1.0], vec![1.0f32, 0.5, 0.0]];
        let mut data = InMemoryData::new(&rows)?;
        assert_eq!(data.num_samples(), 2);
        assert_eq!(data.dim_obs(), 3);

        let mut rng = StdRng::seed_from_u64(3);
        let mb = data.next_minibatch(5, &mut rng, &Device::Cpu)?;
        assert_eq!(mb.input.dims(), &[5, 3]);
        Ok(())
    }

    #[test]
    fn empty_data_is_rejected() {
        let rows: Vec<Vec<f32>> = vec![];
        assert!(InMemoryData::new(&rows).is_err());
    }
}
