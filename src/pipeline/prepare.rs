use rayon::prelude::*;
use tracing::{debug, warn};

use crate::{
    fs::{create_new, open_existing, DbDir, DbFile},
    record::{self, read_lines},
    schema::{Cell, Schema},
    seqfile::SeqFileWriter,
};

/// Per-stage totals. Each shard fills in its own and they are summed once the
/// stage is done.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PrepareCounters {
    pub shards: usize,
    pub lines_read: u64,
    pub observations: u64,
    pub cells_written: u64,
    pub bad_file_names: u64,
    pub bad_records: u64,
}

impl PrepareCounters {
    pub fn merge(self, other: PrepareCounters) -> PrepareCounters {
        PrepareCounters {
            shards: self.shards + other.shards,
            lines_read: self.lines_read + other.lines_read,
            observations: self.observations + other.observations,
            cells_written: self.cells_written + other.cells_written,
            bad_file_names: self.bad_file_names + other.bad_file_names,
            bad_records: self.bad_records + other.bad_records,
        }
    }

    pub fn warnings(&self) -> u64 {
        self.bad_file_names + self.bad_records
    }
}

pub fn prepared_name(shard: usize) -> String {
    format!("part-m-{:05}", shard)
}

/// Decodes every input file into cells, one prepared file per input file.
pub fn run<D: DbDir>(schema: Schema, input: &D, prepared: &D) -> anyhow::Result<PrepareCounters> {
    let sources = input.clone().ls()?;
    debug!(shards = sources.len(), input = %input.location(), "preparing");

    sources
        .into_par_iter()
        .enumerate()
        .map(|(shard, source)| prepare_shard(schema, input.clone(), prepared.clone(), shard, &source))
        .try_reduce(PrepareCounters::default, |a, b| Ok(a.merge(b)))
}

fn prepare_shard<D: DbDir>(
    schema: Schema,
    mut input: D,
    mut prepared: D,
    shard: usize,
    source: &str,
) -> anyhow::Result<PrepareCounters> {
    let mut counters = PrepareCounters {
        shards: 1,
        ..PrepareCounters::default()
    };
    let data = open_existing(&mut input, &source)?.read_all()?;
    let mut writer = SeqFileWriter::<_, Cell>::new(create_new(&mut prepared, &prepared_name(shard))?);

    // Every line of a badly named file would fail the same way; say so once.
    if let Err(e) = record::date_time_of(source) {
        warn!(shard, "{}", e);
        counters.bad_file_names += 1;
        counters.lines_read = read_lines(source, &data).count() as u64;
        writer.finish()?;
        return Ok(counters);
    }

    for line in read_lines(source, &data) {
        counters.lines_read += 1;
        match record::decode(&line) {
            Ok(obs) => {
                counters.observations += 1;
                for cell in schema.encode(&obs)? {
                    writer.append(&cell)?;
                    counters.cells_written += 1;
                }
            }
            Err(e) => {
                warn!(file = source, offset = line.offset, "{}", e);
                counters.bad_records += 1;
            }
        }
    }

    writer.finish()?;
    debug!(shard, file = source, cells = counters.cells_written, "prepared shard");
    Ok(counters)
}
