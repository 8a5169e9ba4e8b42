//! Traversal coordinator: the producer/consumer supervisor.
//!
//! Section 4.5. Owns the shared state, starts the finder and its reader
//! task, feeds the describer worker pool, applies the four-condition
//! termination predicate, and joins every task before reporting the
//! run's outcome.

use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;

use crate::config::ExtractConfig;
use crate::evaluator::{Evaluator, EvaluatorError};
use crate::finder;
use crate::state::{OutputSink, SharedState};
use crate::worker::{self, WorkerError};

/// Bounded poll interval for dequeue attempts (Section 4.5, Section 5).
const DEQUEUE_POLL: Duration = Duration::from_secs(1);

#[derive(Debug, Error)]
pub enum CoordinatorError {
    #[error("failed to spawn finder: {0}")]
    FinderSpawn(#[from] EvaluatorError),
    #[error("failed to write record for {attribute_path}: {source}")]
    Write {
        attribute_path: String,
        #[source]
        source: std::io::Error,
    },
}

/// Outcome of one extraction run (Section 6: exit codes, Section 7:
/// `QuiescenceWithResidue`).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    /// The queue drained and every discoverable attribute path was described.
    Quiescent,
    /// The run ended with the queue non-empty (cancellation or a fatal error
    /// cut the drive loop short). Already-emitted records remain valid.
    QuiescenceWithResidue,
}

impl Outcome {
    pub fn exit_code(self) -> i32 {
        match self {
            Outcome::Quiescent => 0,
            Outcome::QuiescenceWithResidue => 1,
        }
    }
}

/// Continue-looping predicate, Section 4.5: "Continue looping while any
/// of these holds." Pulled out as a pure function so the load-bearing
/// four-condition logic is testable without a real subprocess tree.
fn should_continue(
    dequeued_an_item: bool,
    queue_non_empty: bool,
    finder_exited: bool,
    workers_in_flight: bool,
) -> bool {
    dequeued_an_item || queue_non_empty || !finder_exited || workers_in_flight
}

pub struct Coordinator {
    config: Arc<ExtractConfig>,
    evaluator: Arc<Evaluator>,
    state: Arc<SharedState>,
    queue_rx: tokio::sync::mpsc::UnboundedReceiver<String>,
}

impl Coordinator {
    /// Init: build the evaluator, the shared state, and an empty queue
    /// (Section 4.5 "Init").
    pub fn new(config: ExtractConfig, output: OutputSink) -> Self {
        let evaluator = Arc::new(Evaluator::new(&config));
        let (state, queue_rx) = SharedState::new(output);
        Self {
            config: Arc::new(config),
            evaluator,
            state: Arc::new(state),
            queue_rx,
        }
    }

    /// Run one extraction to completion. `cancel` is observed cooperatively
    /// on every loop iteration; on cancellation the finder and in-flight
    /// describer children are killed before this returns (Section 5).
    pub async fn run(mut self, cancel: CancellationToken) -> Result<Outcome, CoordinatorError> {
        // Spawn.
        let mut finder_child = self.evaluator.spawn_finder(&self.config)?;
        let stderr = finder_child
            .stderr
            .take()
            .expect("finder spawned with piped stderr");
        let reader_handle = tokio::spawn(finder::run(stderr, Arc::clone(&self.state)));

        let n_workers = self.config.n_workers.max(1);
        let semaphore = Arc::new(Semaphore::new(n_workers));
        let mut workers: JoinSet<Result<(), WorkerError>> = JoinSet::new();

        tracing::info!(n_workers, "traversal coordinator entering drive loop");

        let mut finder_exited = false;
        let mut fatal: Option<CoordinatorError> = None;

        loop {
            reap_workers(&mut workers, &mut fatal);
            if fatal.is_some() {
                cancel.cancel();
            }

            if !finder_exited {
                match finder_child.try_wait() {
                    Ok(Some(status)) => {
                        tracing::debug!(?status, "finder process exited");
                        finder_exited = true;
                    }
                    Ok(None) => {}
                    Err(e) => {
                        tracing::warn!(error = %e, "error polling finder exit status");
                        finder_exited = true;
                    }
                }
            }

            let dequeued = tokio::select! {
                biased;
                _ = cancel.cancelled() => None,
                result = tokio::time::timeout(DEQUEUE_POLL, self.queue_rx.recv()) => {
                    match result {
                        Ok(Some(attribute_path)) => {
                            self.state.mark_dequeued();
                            Some(attribute_path)
                        }
                        Ok(None) | Err(_) => None,
                    }
                }
            };

            let dequeued_an_item = dequeued.is_some();
            if let Some(attribute_path) = dequeued {
                let permit = Arc::clone(&semaphore)
                    .acquire_owned()
                    .await
                    .expect("worker semaphore is never closed");
                let config = Arc::clone(&self.config);
                let evaluator = Arc::clone(&self.evaluator);
                let state = Arc::clone(&self.state);
                workers.spawn(async move {
                    let _permit = permit;
                    worker::describe_one(config, evaluator, state, attribute_path).await
                });
            }

            if cancel.is_cancelled() {
                tracing::info!("cancellation observed; exiting drive loop");
                break;
            }

            let queue_non_empty = !self.state.queue_is_empty();
            let workers_in_flight = !workers.is_empty();
            if !should_continue(dequeued_an_item, queue_non_empty, finder_exited, workers_in_flight)
            {
                break;
            }
        }

        // Drain.
        if cancel.is_cancelled() {
            let _ = finder_child.kill().await;
            workers.abort_all();
            while workers.join_next().await.is_some() {}
        } else {
            let _ = finder_child.wait().await;
            while let Some(joined) = workers.join_next().await {
                reap_one(joined, &mut fatal);
                if fatal.is_some() {
                    break;
                }
            }
        }

        match reader_handle.await {
            Ok(Ok(())) => {}
            Ok(Err(err)) => tracing::warn!(error = %err, "finder reader ended with an error"),
            Err(join_err) => tracing::warn!(error = %join_err, "finder reader task panicked"),
        }

        if let Some(err) = fatal {
            return Err(err);
        }

        // Verify.
        if self.state.queue_is_empty() {
            tracing::info!("traversal quiesced with an empty queue");
            Ok(Outcome::Quiescent)
        } else {
            tracing::warn!("traversal ended with residue in the queue");
            Ok(Outcome::QuiescenceWithResidue)
        }
    }
}

/// Non-blocking reap of every worker future that has already completed,
/// per Section 4.5's drive-loop step. A `WorkerError::Write` is fatal
/// (Section 7) and is recorded in `fatal`; every other error is logged
/// and the run continues.
fn reap_workers(workers: &mut JoinSet<Result<(), WorkerError>>, fatal: &mut Option<CoordinatorError>) {
    while let Some(joined) = workers.try_join_next() {
        reap_one(joined, fatal);
        if fatal.is_some() {
            return;
        }
    }
}

fn reap_one(
    joined: Result<Result<(), WorkerError>, tokio::task::JoinError>,
    fatal: &mut Option<CoordinatorError>,
) {
    match joined {
        Ok(Ok(())) => {}
        Ok(Err(WorkerError::Write {
            attribute_path,
            source,
        })) => {
            tracing::error!(attribute_path, error = %source, "fatal write error; aborting run");
            *fatal = Some(CoordinatorError::Write {
                attribute_path,
                source,
            });
        }
        Ok(Err(err)) => {
            tracing::warn!(error = %err, "worker failed; continuing (non-fatal)");
        }
        Err(join_err) => {
            tracing::warn!(error = %join_err, "worker task panicked; continuing");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn continues_while_last_dequeue_returned_an_item() {
        assert!(should_continue(true, false, true, false));
    }

    #[test]
    fn continues_while_queue_non_empty() {
        assert!(should_continue(false, true, true, false));
    }

    #[test]
    fn continues_while_finder_not_exited() {
        assert!(should_continue(false, false, false, false));
    }

    #[test]
    fn continues_while_worker_in_flight() {
        assert!(should_continue(false, false, true, true));
    }

    #[test]
    fn stops_only_when_all_four_conditions_are_false() {
        assert!(!should_continue(false, false, true, false));
    }

    #[test]
    fn exhaustive_sixteen_combinations_match_the_or_of_four_terms() {
        for bits in 0u8..16 {
            let a = bits & 0b0001 != 0;
            let b = bits & 0b0010 != 0;
            let finder_exited = bits & 0b0100 == 0; // invert: bit means "not exited"
            let d = bits & 0b1000 != 0;
            let expected = a || b || !finder_exited || d;
            assert_eq!(should_continue(a, b, finder_exited, d), expected);
        }
    }
}
