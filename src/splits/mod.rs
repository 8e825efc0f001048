use anyhow::bail;
use thiserror::Error;

use crate::{
    fs::DbFile,
    seqfile::{SeqFileReader, SeqFileWriter},
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum SplitError {
    #[error("cannot choose split points from an empty sample")]
    InsufficientSample,
    #[error("partition count must be positive")]
    ZeroPartitions,
}

/// Ordered boundary keys. Boundary `i` is the smallest row key that belongs
/// to partition `i + 1`; there is always one more partition than boundary.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SplitPoints {
    boundaries: Vec<Vec<u8>>,
}

impl SplitPoints {
    pub fn new(boundaries: Vec<Vec<u8>>) -> anyhow::Result<Self> {
        if let Some(w) = boundaries.windows(2).find(|w| w[0] >= w[1]) {
            bail!(
                "split points out of order: {:?} is not below {:?}",
                String::from_utf8_lossy(&w[0]),
                String::from_utf8_lossy(&w[1])
            );
        }
        Ok(SplitPoints { boundaries })
    }

    pub fn boundaries(&self) -> &[Vec<u8>] {
        &self.boundaries
    }

    pub fn partition_count(&self) -> usize {
        self.boundaries.len() + 1
    }

    pub fn write<D: DbFile>(&self, file: D) -> anyhow::Result<()> {
        let mut w = SeqFileWriter::new(file);
        for b in &self.boundaries {
            w.append(b)?;
        }
        w.finish()?;
        Ok(())
    }

    pub fn read<D: DbFile>(file: D) -> anyhow::Result<Self> {
        let boundaries = SeqFileReader::<_, Vec<u8>>::open(file).collect::<anyhow::Result<_>>()?;
        Self::new(boundaries)
    }
}

/// Chooses up to `partitions - 1` boundaries from a key sample.
///
/// The sample is sorted and the key at rank `round(i * m / partitions)` is
/// taken for each `i` in `1..partitions`. Equal neighbours collapse into one
/// boundary, so a sparse or skewed sample yields fewer partitions than
/// asked for.
pub fn select_split_points(
    mut sample: Vec<Vec<u8>>,
    partitions: usize,
) -> Result<SplitPoints, SplitError> {
    if partitions == 0 {
        return Err(SplitError::ZeroPartitions);
    }
    if sample.is_empty() {
        return Err(SplitError::InsufficientSample);
    }
    sample.sort_unstable();

    let m = sample.len();
    let mut boundaries: Vec<Vec<u8>> = Vec::with_capacity(partitions - 1);
    for i in 1..partitions {
        // round(i * m / partitions), halves rounding up.
        let rank = ((2 * i * m + partitions) / (2 * partitions)).min(m - 1);
        if boundaries.last() != Some(&sample[rank]) {
            boundaries.push(sample[rank].clone());
        }
    }

    Ok(SplitPoints { boundaries })
}
