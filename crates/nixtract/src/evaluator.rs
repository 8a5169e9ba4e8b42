//! Evaluator driver: thin wrapper around the external evaluator binary.
//!
//! The evaluator runs in two modes. Finder mode launches a long-running
//! child whose stderr is a stream of structured trace events; describer
//! mode runs a short-lived child to completion and captures stdout.
//! Neither mode interprets the evaluator's output — that is the job of
//! [`crate::finder`] and [`crate::worker`].

use std::collections::HashMap;
use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;
use tokio::process::{Child, Command};
use tokio::time::timeout;

use crate::config::ExtractConfig;

#[derive(Debug, Error)]
pub enum EvaluatorError {
    #[error("evaluator binary `{0}` not found")]
    NotFound(String),
    #[error("failed to spawn evaluator: {0}")]
    Spawn(#[from] std::io::Error),
    #[error("describer timed out after {0}s")]
    Timeout(u32),
}

/// Runs the evaluator in describer mode. Implemented by [`Evaluator`] for
/// real `nix` invocations and by test doubles that substitute canned
/// output for a subprocess, so [`crate::worker::describe_one`] is testable
/// without a real Nix installation (Section 8).
#[async_trait]
pub trait Describe: Send + Sync {
    async fn run_describer(
        &self,
        config: &ExtractConfig,
        attribute_path: &str,
    ) -> Result<DescriberOutput>;
}

pub type Result<T> = std::result::Result<T, EvaluatorError>;

/// Output of a completed describer invocation.
#[derive(Debug, Clone)]
pub struct DescriberOutput {
    pub exit_code: i32,
    pub stdout: Vec<u8>,
}

impl DescriberOutput {
    /// Treat a non-zero exit or empty stdout as "skip this attribute path"
    /// (Section 4.2: non-fatal describer errors).
    pub fn is_skip(&self) -> bool {
        self.exit_code != 0 || self.stdout.is_empty()
    }
}

/// Drives the evaluator binary in finder and describer modes.
#[derive(Debug, Clone)]
pub struct Evaluator {
    binary: String,
    finder_expr: String,
    describer_expr: String,
    offline: bool,
}

impl Evaluator {
    pub fn new(config: &ExtractConfig) -> Self {
        Self {
            binary: config.evaluator_binary.clone(),
            finder_expr: config.finder_expr_path.clone(),
            describer_expr: config.describer_expr_path.clone(),
            offline: config.offline,
        }
    }

    fn base_env(&self, config: &ExtractConfig) -> HashMap<&'static str, String> {
        let mut env = HashMap::new();
        env.insert("NIXPKGS_ALLOW_BROKEN", "1".to_string());
        env.insert("NIXPKGS_ALLOW_INSECURE", "1".to_string());
        env.insert("TARGET_FLAKE_REF", config.target_flake_ref.clone());
        env.insert("TARGET_SYSTEM", config.target_system.clone());
        // Restricts the finder's traversal root (Section 6's
        // `target_attribute_path` option). The describer overrides this
        // per call with the specific attribute path it is describing.
        env.insert(
            "TARGET_ATTRIBUTE_PATH",
            config.target_attribute_path.clone(),
        );
        env
    }

    /// Spawn the evaluator in finder mode.
    ///
    /// Stdout is discarded; stderr is piped for [`crate::finder::run`] to
    /// consume. No wait occurs here — the caller polls/awaits exit status.
    /// `config.target_attribute_path` restricts the traversal root via the
    /// `TARGET_ATTRIBUTE_PATH` env var; an empty path means the flake root.
    pub fn spawn_finder(&self, config: &ExtractConfig) -> Result<Child> {
        let mut cmd = Command::new(&self.binary);
        if self.offline {
            cmd.arg("--offline");
        }
        cmd.arg("eval")
            .arg("--extra-experimental-features")
            .arg("nix-command flakes")
            .arg("--json")
            .arg("--file")
            .arg(&self.finder_expr)
            .envs(self.base_env(config))
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        tracing::debug!(binary = %self.binary, expr = %self.finder_expr, "spawning finder");

        cmd.spawn().map_err(|e| self.map_spawn_error(e))
    }

    /// Run the evaluator in describer mode to completion.
    ///
    /// Safe to call concurrently: every call builds a fresh command and a
    /// fresh environment copy (Section 4.2).
    pub async fn run_describer(
        &self,
        config: &ExtractConfig,
        attribute_path: &str,
    ) -> Result<DescriberOutput> {
        let mut cmd = Command::new(&self.binary);
        cmd.arg("eval");
        if self.offline {
            cmd.arg("--offline");
        }
        cmd.arg("--extra-experimental-features")
            .arg("nix-command flakes")
            .arg("--json")
            .arg("--file")
            .arg(&self.describer_expr)
            .envs(self.base_env(config))
            .env("TARGET_ATTRIBUTE_PATH", attribute_path)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        tracing::debug!(
            binary = %self.binary,
            attribute_path,
            "spawning describer"
        );

        let child = cmd.spawn().map_err(|e| self.map_spawn_error(e))?;

        // Optional per-call timeout (Section 4.2 AMBIENT), `0` disables it,
        // matching the teacher's `timeout_sec: u32` convention. `kill_on_drop`
        // on the command above guarantees the child is killed when the
        // timed-out `Child` is dropped.
        let output = if config.describer_timeout_sec > 0 {
            let timeout_duration = Duration::from_secs(u64::from(config.describer_timeout_sec));
            match timeout(timeout_duration, child.wait_with_output()).await {
                Ok(result) => result?,
                Err(_) => {
                    tracing::warn!(
                        attribute_path,
                        timeout_sec = config.describer_timeout_sec,
                        "describer timed out"
                    );
                    return Err(EvaluatorError::Timeout(config.describer_timeout_sec));
                }
            }
        } else {
            child.wait_with_output().await?
        };

        Ok(DescriberOutput {
            exit_code: output.status.code().unwrap_or(-1),
            stdout: output.stdout,
        })
    }

    fn map_spawn_error(&self, e: std::io::Error) -> EvaluatorError {
        if e.kind() == std::io::ErrorKind::NotFound {
            EvaluatorError::NotFound(self.binary.clone())
        } else {
            EvaluatorError::Spawn(e)
        }
    }
}

#[async_trait]
impl Describe for Evaluator {
    async fn run_describer(
        &self,
        config: &ExtractConfig,
        attribute_path: &str,
    ) -> Result<DescriberOutput> {
        Evaluator::run_describer(self, config, attribute_path).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_config() -> ExtractConfig {
        ExtractConfig {
            evaluator_binary: "definitely-not-a-real-evaluator-binary".to_string(),
            ..ExtractConfig::default()
        }
    }

    #[test]
    fn describer_output_is_skip_on_nonzero_exit() {
        let output = DescriberOutput {
            exit_code: 1,
            stdout: b"{}".to_vec(),
        };
        assert!(output.is_skip());
    }

    #[test]
    fn describer_output_is_skip_on_empty_stdout() {
        let output = DescriberOutput {
            exit_code: 0,
            stdout: Vec::new(),
        };
        assert!(output.is_skip());
    }

    #[test]
    fn describer_output_is_not_skip_on_success_with_output() {
        let output = DescriberOutput {
            exit_code: 0,
            stdout: b"{\"name\":\"x\"}".to_vec(),
        };
        assert!(!output.is_skip());
    }

    #[tokio::test]
    async fn spawn_finder_reports_not_found_for_missing_binary() {
        let config = test_config();
        let evaluator = Evaluator::new(&config);
        let err = evaluator.spawn_finder(&config).unwrap_err();
        assert!(matches!(err, EvaluatorError::NotFound(_)));
    }

    #[tokio::test]
    async fn run_describer_reports_not_found_for_missing_binary() {
        let config = test_config();
        let evaluator = Evaluator::new(&config);
        let err = evaluator.run_describer(&config, "pkg").await.unwrap_err();
        assert!(matches!(err, EvaluatorError::NotFound(_)));
    }
}
