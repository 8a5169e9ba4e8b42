//! Finder reader: consumes the finder child's stderr trace stream.
//!
//! Section 4.3. A single task reads stderr line-by-line until EOF. Each
//! `trace: {...}` line carrying a `foundDrvs` array contributes fresh
//! (attribute path, output path) pairs to the work queue; everything
//! else is passthrough diagnostics. This task does not decide global
//! termination — it just runs until EOF and returns.

use std::sync::Arc;

use serde::Deserialize;
use thiserror::Error;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};

use crate::state::SharedState;

/// The literal gate Section 4.3 requires before attempting to parse a line.
const TRACE_PREFIX: &str = "trace: ";
/// Byte length of `"trace:"` plus the one slack character the prefix check matched.
const STRIP_LEN: usize = 7;

#[derive(Debug, Error)]
pub enum FinderError {
    #[error("error reading finder stderr: {0}")]
    Io(#[from] std::io::Error),
}

#[derive(Debug, Deserialize)]
struct TraceEvent {
    #[serde(default, rename = "foundDrvs")]
    found_drvs: Option<Vec<FoundDrv>>,
}

#[derive(Debug, Deserialize)]
struct FoundDrv {
    #[serde(rename = "attributePath")]
    attribute_path: Option<String>,
    #[serde(rename = "outputPath")]
    output_path: Option<String>,
}

/// Runs the finder-reader loop to completion (stderr EOF).
///
/// Generic over the stream type so tests can drive it with an in-memory
/// duplex stream instead of a real child's stderr (Section 8).
pub async fn run<R>(stderr: R, state: Arc<SharedState>) -> Result<(), FinderError>
where
    R: AsyncRead + Unpin + Send,
{
    let mut lines = BufReader::new(stderr).lines();
    while let Some(line) = lines.next_line().await? {
        handle_line(&line, &state);
    }
    Ok(())
}

fn handle_line(line: &str, state: &SharedState) {
    if !line.starts_with(TRACE_PREFIX) {
        passthrough(line);
        return;
    }

    // Strip "trace:" plus the matched slack character, then trim any
    // further leading whitespace (Section 9: the slack character is not
    // guaranteed to always be exactly one space).
    let remainder = line[STRIP_LEN..].trim_start();

    let event: TraceEvent = match serde_json::from_str(remainder) {
        Ok(event) => event,
        Err(_) => {
            passthrough(line);
            return;
        }
    };

    let Some(found_drvs) = event.found_drvs else {
        passthrough(line);
        return;
    };

    for entry in found_drvs {
        let (Some(attribute_path), Some(output_path)) = (entry.attribute_path, entry.output_path)
        else {
            tracing::warn!("trace event missing attributePath or outputPath; skipping entry");
            continue;
        };

        if state.queued_output_paths.insert_if_absent(&output_path) {
            state.enqueue(&attribute_path);
        }
    }
}

/// Forward a non-trace or malformed-trace line unchanged to the host's
/// own stderr, per Section 4.3's passthrough requirement.
fn passthrough(line: &str) {
    eprintln!("{line}");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::OutputSink;

    fn new_state() -> (Arc<SharedState>, tokio::sync::mpsc::UnboundedReceiver<String>) {
        let (state, rx) = SharedState::new(OutputSink::from_vec().0);
        (Arc::new(state), rx)
    }

    #[tokio::test]
    async fn found_drvs_entry_enqueues_new_output_path() {
        let (state, mut rx) = new_state();
        let line = r#"trace: {"foundDrvs":[{"attributePath":"pkg1","outputPath":"/nix/store/a-pkg1"}]}"#;
        handle_line(line, &state);

        let queued = rx.try_recv().unwrap();
        assert_eq!(queued, "pkg1");
        assert!(state.queued_output_paths.contains("/nix/store/a-pkg1"));
    }

    #[tokio::test]
    async fn duplicate_output_path_is_not_requeued() {
        let (state, mut rx) = new_state();
        let line = r#"trace: {"foundDrvs":[{"attributePath":"pkg1","outputPath":"/nix/store/a-pkg1"}]}"#;
        handle_line(line, &state);
        handle_line(line, &state);

        assert_eq!(rx.try_recv().unwrap(), "pkg1");
        assert!(rx.try_recv().is_err(), "second occurrence must not requeue");
    }

    #[tokio::test]
    async fn multiple_entries_in_one_event_all_enqueue() {
        let (state, mut rx) = new_state();
        let line = r#"trace: {"foundDrvs":[
            {"attributePath":"pkg1","outputPath":"/nix/store/a-pkg1"},
            {"attributePath":"pkg2","outputPath":"/nix/store/b-pkg2"}
        ]}"#;
        handle_line(line, &state);

        let mut seen = vec![rx.try_recv().unwrap(), rx.try_recv().unwrap()];
        seen.sort();
        assert_eq!(seen, vec!["pkg1".to_string(), "pkg2".to_string()]);
    }

    #[tokio::test]
    async fn entry_missing_output_path_is_skipped() {
        let (state, mut rx) = new_state();
        let line = r#"trace: {"foundDrvs":[{"attributePath":"pkg1"}]}"#;
        handle_line(line, &state);
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn non_trace_line_does_not_panic_or_enqueue() {
        let (state, mut rx) = new_state();
        handle_line("evaluation warning: something", &state);
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn malformed_trace_json_does_not_panic_or_enqueue() {
        let (state, mut rx) = new_state();
        handle_line("trace: {not json at all", &state);
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn trace_line_without_found_drvs_is_passthrough_only() {
        let (state, mut rx) = new_state();
        handle_line(r#"trace: {"somethingElse":true}"#, &state);
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn extra_whitespace_after_prefix_still_parses() {
        let (state, mut rx) = new_state();
        let line = "trace:   {\"foundDrvs\":[{\"attributePath\":\"pkg1\",\"outputPath\":\"/nix/store/a-pkg1\"}]}";
        handle_line(line, &state);
        assert_eq!(rx.try_recv().unwrap(), "pkg1");
    }

    /// Drives `run` over an in-memory duplex stream standing in for a
    /// child's stderr: several trace lines and a passthrough line,
    /// terminated by closing the write half (EOF), exercising the reader
    /// loop itself rather than just `handle_line`.
    #[tokio::test]
    async fn run_reads_every_line_up_to_eof() {
        let (state, mut rx) = new_state();
        let (mut writer, reader) = tokio::io::duplex(4096);

        let handle = tokio::spawn(run(reader, Arc::clone(&state)));

        use tokio::io::AsyncWriteExt;
        writer
            .write_all(
                b"trace: {\"foundDrvs\":[{\"attributePath\":\"pkg1\",\"outputPath\":\"/nix/store/a-pkg1\"}]}\n\
                   evaluation warning: unrelated diagnostic\n\
                   trace: {\"foundDrvs\":[{\"attributePath\":\"pkg2\",\"outputPath\":\"/nix/store/b-pkg2\"}]}\n",
            )
            .await
            .unwrap();
        drop(writer);

        handle.await.unwrap().unwrap();

        let mut queued = vec![rx.try_recv().unwrap(), rx.try_recv().unwrap()];
        queued.sort();
        assert_eq!(queued, vec!["pkg1".to_string(), "pkg2".to_string()]);
        assert!(rx.try_recv().is_err());
    }
}
