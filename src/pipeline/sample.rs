use rand::rngs::StdRng;
use rayon::prelude::*;
use tracing::{debug, warn};

use crate::{
    config::PipelineConfig,
    fs::{create_new, open_existing, DbDir},
    reservoir::{shard_rng, Reservoir},
    schema::Cell,
    seqfile::SeqFileReader,
    splits::{select_split_points, SplitError, SplitPoints},
};

pub const SPLITS_FILE: &str = "_splits";

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SampleSummary {
    pub shards: usize,
    pub rows_inspected: u64,
    pub sample_len: usize,
    pub boundaries: Vec<Vec<u8>>,
}

/// Samples row keys from every prepared file and writes the chosen split
/// points to `splits`.
pub fn run<D: DbDir>(config: &PipelineConfig, prepared: &D, splits: &D) -> anyhow::Result<SampleSummary> {
    let shards = prepared.clone().ls()?;
    let capacity = config.sample_size();
    let max_records = config.max_sample_records_per_shard;

    let reservoirs = shards
        .par_iter()
        .enumerate()
        .map(|(shard, name)| {
            sample_shard(
                prepared.clone(),
                name,
                Reservoir::with_max_records(capacity, max_records),
                shard_rng(config.seed, shard),
            )
        })
        .collect::<anyhow::Result<Vec<_>>>()?;

    // Fold in shard order so a seeded run merges identically every time.
    let mut rng = shard_rng(config.seed, shards.len());
    let sample = reservoirs
        .into_iter()
        .fold(Reservoir::new(capacity), |acc, r| acc.merge(r, &mut rng));
    let rows_inspected = sample.seen();
    let sample_len = sample.len();

    let split_points = match select_split_points(sample.into_items(), config.target_partition_count) {
        Ok(split_points) => split_points,
        Err(SplitError::InsufficientSample) => {
            warn!("no rows to sample, output will be empty");
            SplitPoints::default()
        }
        Err(e) => return Err(e.into()),
    };

    let mut splits = splits.clone();
    split_points.write(create_new(&mut splits, &SPLITS_FILE)?)?;
    debug!(
        partitions = split_points.partition_count(),
        location = %splits.location(),
        "wrote split points"
    );

    Ok(SampleSummary {
        shards: shards.len(),
        rows_inspected,
        sample_len,
        boundaries: split_points.boundaries().to_vec(),
    })
}

fn sample_shard<D: DbDir>(
    mut prepared: D,
    name: &str,
    mut reservoir: Reservoir<Vec<u8>>,
    mut rng: StdRng,
) -> anyhow::Result<Reservoir<Vec<u8>>> {
    let mut cells = SeqFileReader::<_, Cell>::open(open_existing(&mut prepared, &name)?);
    // Nothing past the cap is read from the file.
    while !reservoir.is_capped() {
        match cells.next() {
            Some(cell) => {
                reservoir.offer(cell?.row, &mut rng);
            }
            None => return Ok(reservoir),
        }
    }
    debug!(file = name, seen = reservoir.seen(), "sample cap reached");
    Ok(reservoir)
}
