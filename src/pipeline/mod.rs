pub mod build;
pub mod prepare;
pub mod sample;

use std::{
    fmt,
    time::{Duration, Instant},
};

use thiserror::Error;
use tracing::{error, info};

use crate::{
    config::PipelineConfig,
    fs::{DbDir, OsDir},
};

pub use build::{BuildError, BuildSummary, Manifest, ManifestFile};
pub use prepare::PrepareCounters;
pub use sample::SampleSummary;

pub const PREPARED_DIR: &str = "prepared";
pub const SPLITS_DIR: &str = "splits";
pub const RUNS_DIR: &str = "runs";
pub const SORTED_DIR: &str = "sorted";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Stage {
    Prepare,
    Sample,
    Build,
}

impl Stage {
    pub fn name(&self) -> &'static str {
        match self {
            Stage::Prepare => "prepare",
            Stage::Sample => "sample",
            Stage::Build => "build",
        }
    }

    fn running(&self) -> PipelineState {
        match self {
            Stage::Prepare => PipelineState::Preparing,
            Stage::Sample => PipelineState::Sampling,
            Stage::Build => PipelineState::Building,
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PipelineState {
    Idle,
    Preparing,
    Sampling,
    Building,
    Done,
    Failed { stage: Stage },
}

#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
    /// Output of an earlier run could not be cleared. No stage was started.
    #[error("failed to clear {location}")]
    CleanupFailed {
        location: String,
        #[source]
        source: anyhow::Error,
    },
    #[error("{stage} stage failed")]
    StageFailed {
        stage: Stage,
        #[source]
        source: anyhow::Error,
    },
}

impl PipelineError {
    pub fn stage(&self) -> Option<Stage> {
        match self {
            PipelineError::InvalidConfig(_) | PipelineError::CleanupFailed { .. } => None,
            PipelineError::StageFailed { stage, .. } => Some(*stage),
        }
    }
}

#[derive(Debug, Clone)]
pub struct RunSummary {
    pub prepare: PrepareCounters,
    pub sample: SampleSummary,
    pub build: BuildSummary,
    pub elapsed: Vec<(Stage, Duration)>,
}

impl RunSummary {
    pub fn files(&self) -> &[ManifestFile] {
        &self.build.files
    }
}

/// Runs prepare, sample and build in order over one input directory. Each
/// stage reads only what the previous one wrote under the working directory:
///
/// ```text
/// <working>/prepared/part-m-00000 ...
/// <working>/splits/_splits
/// <working>/runs/part-00000/shard-00000 ...   (during build only)
/// <working>/sorted/part-00000.sst ... MANIFEST
/// ```
pub struct Pipeline<D: DbDir> {
    config: PipelineConfig,
    input: D,
    working: D,
    state: PipelineState,
    pool: Option<rayon::ThreadPool>,
}

impl Pipeline<OsDir> {
    pub fn open(config: PipelineConfig) -> Result<Self, PipelineError> {
        if !config.input_path.is_dir() {
            return Err(PipelineError::InvalidConfig(format!(
                "input path {} is not a directory",
                config.input_path.display()
            )));
        }
        let input = OsDir::new(&config.input_path);
        let working = OsDir::new(&config.working_path);
        Self::new(config, input, working)
    }
}

impl<D: DbDir> Pipeline<D> {
    pub fn new(config: PipelineConfig, input: D, working: D) -> Result<Self, PipelineError> {
        config.validate().map_err(PipelineError::InvalidConfig)?;
        let pool = match config.workers {
            Some(n) => Some(
                rayon::ThreadPoolBuilder::new()
                    .num_threads(n)
                    .thread_name(|i| format!("bulkload-{}", i))
                    .build()
                    .map_err(|e| PipelineError::InvalidConfig(e.to_string()))?,
            ),
            None => None,
        };
        Ok(Pipeline {
            config,
            input,
            working,
            state: PipelineState::Idle,
            pool,
        })
    }

    pub fn state(&self) -> PipelineState {
        self.state
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    pub fn run(&mut self) -> Result<RunSummary, PipelineError> {
        self.state = PipelineState::Idle;
        let config = self.config.clone();
        let input = self.input.clone();
        let prepared = self.working.cd(&PREPARED_DIR);
        let splits = self.working.cd(&SPLITS_DIR);
        let runs = self.working.cd(&RUNS_DIR);
        let sorted = self.working.cd(&SORTED_DIR);
        info!(
            schema = %config.schema,
            partitions = config.target_partition_count,
            input = %input.location(),
            working = %self.working.location(),
            "starting bulk load"
        );

        // Anything left by an earlier run, finished or not, would be read as
        // input by the next stage.
        for dir in [&prepared, &splits, &runs, &sorted] {
            if let Err(source) = dir.clone().remove_all() {
                let location = dir.location();
                error!(%location, "failed to clear earlier output: {:#}", source);
                return Err(PipelineError::CleanupFailed { location, source });
            }
        }

        let mut elapsed = Vec::with_capacity(3);

        let (prepare, took) = self.stage(Stage::Prepare, || {
            prepare::run(config.schema, &input, &prepared)
        })?;
        elapsed.push((Stage::Prepare, took));
        info!(
            shards = prepare.shards,
            lines = prepare.lines_read,
            cells = prepare.cells_written,
            warnings = prepare.warnings(),
            "prepared input"
        );

        let (sample, took) = self.stage(Stage::Sample, || sample::run(&config, &prepared, &splits))?;
        elapsed.push((Stage::Sample, took));
        info!(
            inspected = sample.rows_inspected,
            sampled = sample.sample_len,
            boundaries = sample.boundaries.len(),
            "chose split points"
        );

        let (build, took) = self.stage(Stage::Build, || {
            build::run(config.schema, &prepared, &splits, &runs, &sorted)
        })?;
        elapsed.push((Stage::Build, took));
        info!(
            partitions = build.partitions,
            files = build.files.len(),
            cells = build.cells,
            location = %sorted.location(),
            "built sorted files"
        );

        self.state = PipelineState::Done;
        Ok(RunSummary {
            prepare,
            sample,
            build,
            elapsed,
        })
    }

    fn stage<T, F>(&mut self, stage: Stage, f: F) -> Result<(T, Duration), PipelineError>
    where
        T: Send,
        F: FnOnce() -> anyhow::Result<T> + Send,
    {
        self.state = stage.running();
        let start = Instant::now();
        let result = match &self.pool {
            Some(pool) => pool.install(f),
            None => f(),
        };
        match result {
            Ok(t) => {
                let took = start.elapsed();
                info!(%stage, ?took, "stage done");
                Ok((t, took))
            }
            Err(source) => {
                self.state = PipelineState::Failed { stage };
                error!(%stage, "stage failed: {:#}", source);
                Err(PipelineError::StageFailed { stage, source })
            }
        }
    }
}
