//! nixtract - concurrent flake dependency graph extractor
//!
//! Main entry point for the `nixtract` binary.

use std::path::PathBuf;

use clap::Parser;
use nixtract::ExtractConfig;
use tokio_util::sync::CancellationToken;
use tracing::error;
use tracing_subscriber::{fmt, EnvFilter};

/// Extract a flake's transitive derivation graph as JSONL.
#[derive(Parser)]
#[command(name = "nixtract")]
#[command(about = "Extract a flake's transitive derivation graph as JSONL")]
#[command(version)]
struct Cli {
    /// Output file, or "-" for stdout
    #[arg(default_value = "-")]
    outfile: String,

    /// Flake reference to evaluate
    #[arg(long, default_value = "github:nixos/nixpkgs/master")]
    target_flake_ref: String,

    /// Target platform triple
    #[arg(long, default_value = "x86_64-linux")]
    target_system: String,

    /// Dot path restricting the evaluated root; empty means the flake root
    #[arg(long, default_value = "")]
    target_attribute_path: String,

    /// Size of the describer worker pool
    #[arg(long, default_value_t = 1)]
    n_workers: usize,

    /// Pass `--offline` through to the evaluator
    #[arg(long)]
    offline: bool,

    /// Path to the evaluator binary
    #[arg(long, default_value = "nix", env = "NIXTRACT_EVALUATOR")]
    evaluator: String,

    /// Per-call describer timeout in seconds (0 disables the timeout)
    #[arg(long, default_value_t = 0)]
    describer_timeout_sec: u32,

    /// Increase log verbosity (repeatable)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,
}

fn main() {
    let cli = Cli::parse();

    let default_filter = if cli.verbose > 0 { "debug" } else { "info" };
    fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter)),
        )
        .init();

    let output_path = match cli.outfile.as_str() {
        "-" => None,
        path => Some(PathBuf::from(path)),
    };

    let config = ExtractConfig {
        target_flake_ref: cli.target_flake_ref,
        target_system: cli.target_system,
        target_attribute_path: cli.target_attribute_path,
        n_workers: cli.n_workers.max(1),
        offline: cli.offline,
        evaluator_binary: cli.evaluator,
        output_path,
        describer_timeout_sec: cli.describer_timeout_sec,
        ..ExtractConfig::default()
    };

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .expect("failed to create tokio runtime");

    let exit_code = runtime.block_on(async move {
        let cancel = CancellationToken::new();
        let mut run_task = tokio::spawn(nixtract::run(config, cancel.clone()));

        loop {
            tokio::select! {
                result = &mut run_task => {
                    break match result {
                        Ok(Ok(outcome)) => outcome.exit_code(),
                        Ok(Err(e)) => {
                            error!("extraction failed: {e}");
                            1
                        }
                        Err(join_err) => {
                            error!("extraction task panicked: {join_err}");
                            1
                        }
                    };
                }
                _ = tokio::signal::ctrl_c() => {
                    tracing::info!("received SIGINT; cancelling extraction");
                    cancel.cancel();
                }
            }
        }
    });

    std::process::exit(exit_code);
}
