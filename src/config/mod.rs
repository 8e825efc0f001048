use std::path::{Path, PathBuf};

use anyhow::Context;
use serde::{Deserialize, Serialize};

use crate::schema::Schema;

pub const DEFAULT_MAX_SAMPLE_RECORDS_PER_SHARD: u64 = 10_000;

/// Everything one run of the pipeline needs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PipelineConfig {
    pub schema: Schema,
    pub target_partition_count: usize,
    pub input_path: PathBuf,
    pub working_path: PathBuf,

    /// Rows each sampling worker inspects before it stops reading its shard.
    #[serde(default = "default_max_sample_records")]
    pub max_sample_records_per_shard: u64,

    /// Reservoir capacity. Defaults to the partition count.
    #[serde(default)]
    pub sample_size: Option<usize>,

    /// Seeds the sampling generators so reruns pick the same boundaries.
    #[serde(default)]
    pub seed: Option<u64>,

    /// Size of a dedicated worker pool. The global rayon pool is used when
    /// unset.
    #[serde(default)]
    pub workers: Option<usize>,
}

fn default_max_sample_records() -> u64 {
    DEFAULT_MAX_SAMPLE_RECORDS_PER_SHARD
}

impl PipelineConfig {
    pub fn new<P, Q>(schema: Schema, target_partition_count: usize, input_path: P, working_path: Q) -> Self
    where
        P: Into<PathBuf>,
        Q: Into<PathBuf>,
    {
        PipelineConfig {
            schema,
            target_partition_count,
            input_path: input_path.into(),
            working_path: working_path.into(),
            max_sample_records_per_shard: DEFAULT_MAX_SAMPLE_RECORDS_PER_SHARD,
            sample_size: None,
            seed: None,
            workers: None,
        }
    }

    pub fn load<P: AsRef<Path>>(path: P) -> anyhow::Result<Self> {
        let path = path.as_ref();
        let contents = std::fs::read(path)
            .with_context(|| format!("reading config {}", path.display()))?;
        let config = serde_json::from_slice(&contents)
            .with_context(|| format!("parsing config {}", path.display()))?;
        Ok(config)
    }

    pub fn sample_size(&self) -> usize {
        self.sample_size.unwrap_or(self.target_partition_count)
    }

    pub fn validate(&self) -> Result<(), String> {
        if self.target_partition_count == 0 {
            return Err("target_partition_count must be > 0".to_string());
        }
        if self.max_sample_records_per_shard == 0 {
            return Err("max_sample_records_per_shard must be > 0".to_string());
        }
        if self.sample_size == Some(0) {
            return Err("sample_size must be > 0".to_string());
        }
        if self.workers == Some(0) {
            return Err("workers must be > 0".to_string());
        }
        if self.input_path.as_os_str().is_empty() {
            return Err("input_path must be set".to_string());
        }
        if self.working_path.as_os_str().is_empty() {
            return Err("working_path must be set".to_string());
        }
        Ok(())
    }
}
