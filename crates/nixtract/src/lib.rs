//! nixtract - concurrent flake dependency graph extractor
//!
//! Library components for the `nixtract` binary: a producer/consumer
//! pipeline that discovers a flake's derivations via a long-running
//! evaluator process, describes each one through a bounded worker pool,
//! deduplicates by output path, and streams the result as JSONL.

pub mod config;
pub mod coordinator;
pub mod evaluator;
pub mod finder;
pub mod state;
pub mod worker;

use std::io;

use tokio_util::sync::CancellationToken;

pub use config::ExtractConfig;
pub use coordinator::{Coordinator, CoordinatorError, Outcome};
pub use state::OutputSink;

/// Run one extraction end to end: open the configured output sink, drive
/// the traversal coordinator to quiescence, and return its outcome.
///
/// `cancel` is raced against the drive loop by the caller (typically
/// wired to `ctrl_c` in `main`); this function does not install its own
/// signal handler.
pub async fn run(config: ExtractConfig, cancel: CancellationToken) -> Result<Outcome, RunError> {
    let output = match &config.output_path {
        Some(path) => OutputSink::file(path).map_err(RunError::OpenOutput)?,
        None => OutputSink::stdout(),
    };

    let coordinator = Coordinator::new(config, output);
    coordinator.run(cancel).await.map_err(RunError::Coordinator)
}

#[derive(Debug, thiserror::Error)]
pub enum RunError {
    #[error("failed to open output file: {0}")]
    OpenOutput(#[source] io::Error),
    #[error(transparent)]
    Coordinator(#[from] CoordinatorError),
}
