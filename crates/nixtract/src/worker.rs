//! Describer workers: describe one attribute path per invocation.
//!
//! Section 4.4. A bounded pool of these run concurrently, each calling
//! the evaluator in describer mode, parsing the result into a
//! [`nixtract_core::Record`], emitting it under the output lock, and
//! enqueuing any not-yet-queued build-input edges.

use std::sync::Arc;

use nixtract_core::Record;
use thiserror::Error;

use crate::config::ExtractConfig;
use crate::evaluator::{Describe, DescriberOutput};
use crate::state::SharedState;

#[derive(Debug, Error)]
pub enum WorkerError {
    #[error("evaluator error describing {attribute_path}: {source}")]
    Evaluator {
        attribute_path: String,
        #[source]
        source: crate::evaluator::EvaluatorError,
    },
    #[error("malformed describer output for {attribute_path}: {source}")]
    Parse {
        attribute_path: String,
        #[source]
        source: nixtract_core::ParseError,
    },
    #[error("failed to write record for {attribute_path}: {source}")]
    Write {
        attribute_path: String,
        #[source]
        source: std::io::Error,
    },
}

/// Describe one attribute path and fold its result into the shared state.
///
/// Returns `Ok(())` both when a record was emitted and when the
/// attribute path was skipped (empty describer output) — those are not
/// failures of the run (Section 4.4, Section 7).
pub async fn describe_one(
    config: Arc<ExtractConfig>,
    evaluator: Arc<dyn Describe>,
    state: Arc<SharedState>,
    attribute_path: String,
) -> Result<(), WorkerError> {
    let output = evaluator
        .run_describer(&config, &attribute_path)
        .await
        .map_err(|source| WorkerError::Evaluator {
            attribute_path: attribute_path.clone(),
            source,
        })?;

    if output.is_skip() {
        tracing::warn!(attribute_path, "describer produced no output; skipping");
        return Ok(());
    }

    let record: Record =
        nixtract_core::parse(&output.stdout).map_err(|source| WorkerError::Parse {
            attribute_path: attribute_path.clone(),
            source,
        })?;

    if record.output_path.is_none() {
        tracing::debug!(
            attribute_path,
            name = %record.name,
            "record has no output path (unbuildable); not deduped"
        );
        return Ok(());
    }

    let bytes = nixtract_core::serialize(&record).map_err(|source| WorkerError::Parse {
        attribute_path: attribute_path.clone(),
        source,
    })?;

    state
        .output
        .write_record(&bytes)
        .map_err(|source| WorkerError::Write {
            attribute_path: attribute_path.clone(),
            source,
        })?;

    if let Some(output_path) = &record.output_path {
        state.visited_output_paths.insert_if_absent(output_path);
    }

    for edge in &record.build_inputs {
        match &edge.output_path {
            Some(edge_output_path) => {
                if state.queued_output_paths.insert_if_absent(edge_output_path) {
                    state.enqueue(&edge.attribute_path.as_dotted());
                }
            }
            None => {
                // Absent output_path (unbuildable): there is nothing to
                // dedup against in `queued_output_paths`, so guard against
                // redundant describer calls via `attempted_attribute_paths`
                // instead, keyed on the attribute path itself (Section 3
                // SUPPLEMENT).
                let dotted = edge.attribute_path.as_dotted();
                if state.attempted_attribute_paths.insert_if_absent(&dotted) {
                    state.enqueue(&dotted);
                }
            }
        }
    }

    Ok(())
}
