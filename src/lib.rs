//! Offline bulk loading of hourly page-view counts.
//!
//! Raw `pagecounts-*` logs are decoded into cells (`prepare`), their row keys
//! are sampled to choose partition boundaries (`sample`), and every partition
//! is sorted into one immutable SST (`build`). Concatenating the SSTs in
//! partition order gives one globally sorted stream, ready to be handed to
//! the store as-is.

pub mod config;
pub mod encoding;
pub mod fs;
pub mod partition;
pub mod pipeline;
pub mod record;
pub mod reservoir;
pub mod root;
pub mod run;
pub mod schema;
pub mod seqfile;
pub mod splits;
pub mod sst;

pub use config::PipelineConfig;
pub use pipeline::{Pipeline, PipelineError, PipelineState, RunSummary, Stage};
pub use schema::Schema;
