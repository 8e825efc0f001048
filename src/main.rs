use std::{path::PathBuf, process::ExitCode};

use anyhow::bail;
use bulkload::{Pipeline, PipelineConfig, Schema};
use clap::Parser;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

/// Builds globally sorted, non-overlapping SSTs from hourly page-view logs,
/// ready to be bulk loaded into the store.
///
/// Logging is controlled with RUST_LOG (default: info).
#[derive(Parser, Debug)]
#[command(name = "pagecount-bulkload")]
struct Cli {
    /// JSON pipeline config. Flags given alongside it override its values.
    #[arg(long, conflicts_with_all = ["schema", "partitions", "input", "working"])]
    config: Option<PathBuf>,

    /// Row layout: `tall` (one row per page and hour) or `wide` (one row per
    /// page, one column per hour).
    #[arg(required_unless_present = "config", allow_hyphen_values = true)]
    schema: Option<Schema>,

    /// Number of output files to aim for. Fewer are written when the sample
    /// does not have enough distinct rows.
    #[arg(required_unless_present = "config")]
    partitions: Option<usize>,

    /// Directory of pagecounts-<YYYYMMDD-HHMMSS>.* files.
    #[arg(required_unless_present = "config")]
    input: Option<PathBuf>,

    /// Working directory. prepared/, splits/, runs/ and sorted/ beneath it
    /// are replaced on every run.
    #[arg(required_unless_present = "config")]
    working: Option<PathBuf>,

    /// Rows each sampling worker inspects before it stops.
    #[arg(long, env = "BULKLOAD_MAX_SAMPLE_RECORDS")]
    max_sample_records: Option<u64>,

    /// Reservoir size (default: the partition count).
    #[arg(long)]
    sample_size: Option<usize>,

    /// Seed for sampling, for reproducible split points.
    #[arg(long)]
    seed: Option<u64>,

    /// Worker threads (default: one per core).
    #[arg(long)]
    workers: Option<usize>,
}

impl Cli {
    fn into_config(self) -> anyhow::Result<PipelineConfig> {
        let mut config = match self.config {
            Some(path) => PipelineConfig::load(path)?,
            None => match (self.schema, self.partitions, self.input, self.working) {
                (Some(schema), Some(partitions), Some(input), Some(working)) => {
                    PipelineConfig::new(schema, partitions, input, working)
                }
                _ => bail!("expected <tall|wide> <partitions> <input> <working>, or --config"),
            },
        };
        if let Some(n) = self.max_sample_records {
            config.max_sample_records_per_shard = n;
        }
        if self.sample_size.is_some() {
            config.sample_size = self.sample_size;
        }
        if self.seed.is_some() {
            config.seed = self.seed;
        }
        if self.workers.is_some() {
            config.workers = self.workers;
        }
        Ok(config)
    }
}

fn run(cli: Cli) -> anyhow::Result<()> {
    let config = cli.into_config()?;
    let summary = Pipeline::open(config)?.run()?;
    for file in summary.files() {
        info!(
            name = %file.name,
            partition = file.partition,
            cells = file.cells,
            bytes = file.size,
            "output file"
        );
    }
    let total: std::time::Duration = summary.elapsed.iter().map(|(_, d)| *d).sum();
    info!(
        files = summary.files().len(),
        cells = summary.build.cells,
        warnings = summary.prepare.warnings(),
        ?total,
        "bulk load files ready"
    );
    Ok(())
}

fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    match run(Cli::parse()) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("{:#}", e);
            eprintln!("error: {:#}", e);
            ExitCode::FAILURE
        }
    }
}

#[cfg(test)]
mod test {
    use bulkload::Schema;
    use clap::Parser;

    use super::Cli;

    #[test]
    fn test_positional() -> anyhow::Result<()> {
        let cli = Cli::try_parse_from(["pagecount-bulkload", "-wide", "16", "in", "out", "--seed", "3"])?;
        let config = cli.into_config()?;
        assert_eq!(config.schema, Schema::Wide);
        assert_eq!(config.target_partition_count, 16);
        assert_eq!(config.input_path.to_str(), Some("in"));
        assert_eq!(config.seed, Some(3));
        assert_eq!(config.sample_size(), 16);
        Ok(())
    }

    #[test]
    fn test_config_file() -> anyhow::Result<()> {
        let f = tempfile::NamedTempFile::new()?;
        std::fs::write(
            f.path(),
            r#"{"schema": "tall", "target_partition_count": 2, "input_path": "a", "working_path": "b"}"#,
        )?;
        let path = f.path().to_str().unwrap_or_default().to_owned();
        let cli = Cli::try_parse_from(["pagecount-bulkload", "--config", path.as_str(), "--workers", "2"])?;
        let config = cli.into_config()?;
        assert_eq!(config.schema, Schema::Tall);
        assert_eq!(config.workers, Some(2));
        Ok(())
    }

    #[test]
    fn test_bad_args() {
        assert!(Cli::try_parse_from(["pagecount-bulkload", "diagonal", "4", "in", "out"]).is_err());
        assert!(Cli::try_parse_from(["pagecount-bulkload", "tall", "4"]).is_err());
    }
}
