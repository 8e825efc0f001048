use anyhow::bail;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

use crate::{
    fs::{create_new, open_existing, DbDir},
    partition::TotalOrderPartitioner,
    root::Root,
    run::{MergingIter, Run},
    schema::{Cell, Schema},
    seqfile::{SeqFileReader, SeqFileWriter},
    splits::SplitPoints,
    sst::{writer::SstWriter, SstMeta},
};

#[derive(Debug, Error)]
pub enum BuildError {
    #[error("failed to write sorted file for partition {partition}")]
    PartitionWriteFailure {
        partition: usize,
        #[source]
        source: anyhow::Error,
    },
}

/// The completion record of a build, kept in `sorted/MANIFEST`. Row keys are
/// hex encoded since they are arbitrary bytes.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Manifest {
    pub schema: Option<Schema>,
    pub boundaries: Vec<String>,
    pub files: Vec<ManifestFile>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ManifestFile {
    pub name: String,
    pub partition: usize,
    pub cells: u64,
    pub size: u64,
    pub first_row: String,
    pub last_row: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BuildSummary {
    pub partitions: usize,
    pub cells: u64,
    pub files: Vec<ManifestFile>,
}

pub fn sst_name(partition: usize) -> String {
    format!("part-{:05}.sst", partition)
}

/// Reads the split points from the one file in `splits`.
pub fn read_split_points<D: DbDir>(splits: &D) -> anyhow::Result<SplitPoints> {
    let mut splits = splits.clone();
    let names = splits.ls()?;
    if names.len() != 1 {
        bail!(
            "expected exactly one splits file in {}, found {:?}",
            splits.location(),
            names
        );
    }
    SplitPoints::read(open_existing(&mut splits, &names[0])?)
}

pub fn run_dir_name(partition: usize) -> String {
    format!("part-{:05}", partition)
}

pub fn run_name(shard: usize) -> String {
    format!("shard-{:05}", shard)
}

/// Writes one sorted file per non-empty partition, then the manifest.
///
/// Each prepared file is split by partition and every part is spilled,
/// sorted, to `runs/part-<partition>/shard-<shard>`. A partition's file is
/// then merged from its spilled runs, so no worker holds more than one
/// prepared file's cells at a time.
pub fn run<D: DbDir>(
    schema: Schema,
    prepared: &D,
    splits: &D,
    runs: &D,
    sorted: &D,
) -> anyhow::Result<BuildSummary> {
    let partitioner = TotalOrderPartitioner::new(read_split_points(splits)?);
    let partitions = partitioner.partition_count();

    let shards = prepared.clone().ls()?;
    let spilled = shards
        .par_iter()
        .enumerate()
        .map(|(shard, name)| spill_shard(prepared.clone(), runs, shard, name, &partitioner))
        .try_reduce(|| 0, |a, b| Ok(a + b))?;
    debug!(shards = shards.len(), runs = spilled, "spilled sorted runs");

    let files = (0..partitions)
        .into_par_iter()
        .map(|partition| write_partition(runs.cd(&run_dir_name(partition)), sorted.clone(), partition))
        .collect::<Result<Vec<Option<ManifestFile>>, BuildError>>()?
        .into_iter()
        .flatten()
        .collect::<Vec<_>>();

    // The manifest goes last; nothing may fail after it is in place.
    runs.clone().remove_all()?;

    let mut root: Root<Manifest, D> = Root::load(sorted.clone())?;
    root.write(Manifest {
        schema: Some(schema),
        boundaries: partitioner
            .splits()
            .boundaries()
            .iter()
            .map(hex::encode)
            .collect(),
        files: files.clone(),
    })?;

    Ok(BuildSummary {
        partitions,
        cells: files.iter().map(|f| f.cells).sum(),
        files,
    })
}

/// Splits one prepared file by partition and spills each non-empty part as
/// a sorted run. Returns the number of runs written.
fn spill_shard<D: DbDir>(
    mut prepared: D,
    runs: &D,
    shard: usize,
    name: &str,
    partitioner: &TotalOrderPartitioner,
) -> anyhow::Result<usize> {
    let mut buckets: Vec<Vec<Cell>> = (0..partitioner.partition_count()).map(|_| Vec::new()).collect();
    for cell in SeqFileReader::<_, Cell>::open(open_existing(&mut prepared, &name)?) {
        let cell = cell?;
        buckets[partitioner.partition(&cell)].push(cell);
    }

    let mut written = 0;
    for (partition, cells) in buckets.into_iter().enumerate() {
        let run = Run::sorted(cells);
        if run.remaining() == 0 {
            continue;
        }
        let mut dir = runs.cd(&run_dir_name(partition));
        let mut w = SeqFileWriter::new(create_new(&mut dir, &run_name(shard))?);
        for cell in run {
            w.append(&cell)?;
        }
        w.finish()?;
        written += 1;
    }
    Ok(written)
}

fn write_partition<D: DbDir>(
    mut runs: D,
    mut sorted: D,
    partition: usize,
) -> Result<Option<ManifestFile>, BuildError> {
    let names = runs
        .ls()
        .map_err(|source| BuildError::PartitionWriteFailure { partition, source })?;
    if names.is_empty() {
        return Ok(None);
    }

    let name = sst_name(partition);
    let meta = write_sst(&mut runs, &names, &mut sorted, &name)
        .map_err(|source| BuildError::PartitionWriteFailure { partition, source })?;
    debug!(partition, runs = names.len(), cells = meta.cells, bytes = meta.size, "wrote {}", name);

    Ok(Some(ManifestFile {
        name,
        partition,
        cells: meta.cells,
        size: meta.size,
        first_row: hex::encode(&meta.first_row),
        last_row: hex::encode(&meta.last_row),
    }))
}

fn write_sst<D: DbDir>(
    runs: &mut D,
    names: &[String],
    sorted: &mut D,
    name: &str,
) -> anyhow::Result<SstMeta> {
    let sources = names
        .iter()
        .map(|run| Ok(SeqFileReader::<_, Cell>::open(open_existing(runs, run)?)))
        .collect::<anyhow::Result<Vec<_>>>()?;
    let file = create_new(sorted, &name)?;
    SstWriter::new(MergingIter::new(sources), file).write()
}
