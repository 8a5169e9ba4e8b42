//! Extraction configuration.
//!
//! Precedence: CLI flags > environment variables > defaults, matching
//! the `Config` precedence convention used throughout the daemon this
//! crate was adapted from.

use std::path::PathBuf;

/// Configuration for one extraction run (Section 6, "Recognized
/// configuration options").
#[derive(Debug, Clone)]
pub struct ExtractConfig {
    /// Flake reference to evaluate (e.g. `github:nixos/nixpkgs/master`).
    pub target_flake_ref: String,
    /// Target platform triple (e.g. `x86_64-linux`).
    pub target_system: String,
    /// Dot path restricting the evaluated root; empty means the flake root.
    /// Passed to the finder as `TARGET_ATTRIBUTE_PATH` (see
    /// [`crate::evaluator::Evaluator::spawn_finder`]).
    pub target_attribute_path: String,
    /// Size of the describer worker pool. Must be >= 1.
    pub n_workers: usize,
    /// Pass `--offline` through to the evaluator.
    pub offline: bool,
    /// Path to the evaluator binary.
    pub evaluator_binary: String,
    /// Path to the finder expression file passed to the evaluator.
    pub finder_expr_path: String,
    /// Path to the describer expression file passed to the evaluator.
    pub describer_expr_path: String,
    /// Output path, or `None` to write to stdout (`"-"` on the CLI).
    pub output_path: Option<PathBuf>,
    /// Per-call describer timeout. `0` disables the timeout.
    pub describer_timeout_sec: u32,
}

impl Default for ExtractConfig {
    fn default() -> Self {
        Self {
            target_flake_ref: "github:nixos/nixpkgs/master".to_string(),
            target_system: "x86_64-linux".to_string(),
            target_attribute_path: String::new(),
            n_workers: 1,
            offline: false,
            evaluator_binary: "nix".to_string(),
            finder_expr_path: "finder.nix".to_string(),
            describer_expr_path: "describer.nix".to_string(),
            output_path: None,
            describer_timeout_sec: 0,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_targets_nixpkgs_master() {
        let config = ExtractConfig::default();
        assert_eq!(config.target_flake_ref, "github:nixos/nixpkgs/master");
        assert_eq!(config.target_system, "x86_64-linux");
        assert_eq!(config.n_workers, 1);
        assert!(!config.offline);
        assert!(config.output_path.is_none());
        assert_eq!(config.describer_timeout_sec, 0);
    }
}
