//! One loop per reconciliation operation, all sharing a cancellation token.
//!
//! A loop runs its operation, sleeps for its interval, and repeats until the
//! token is cancelled. A dropped queue-store connection is logged and the
//! loop carries on; any other failure cancels every loop and is returned
//! from [`Scheduler::run`].

use std::fmt;
use std::time::Duration;

use frontier_core::{Operation, ReconcileError, Reconciler};
use thiserror::Error;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

#[derive(Debug, Error)]
pub enum WorkerError {
    #[error("worker {worker} failed after {completed} completed update(s): {source}")]
    Failed {
        worker: &'static str,
        completed: u64,
        source: ReconcileError,
    },

    #[error("worker task aborted: {0}")]
    Aborted(String),
}

pub struct Scheduler {
    reconciler: Reconciler,
    intervals: Vec<(Operation, Duration)>,
    shutdown: CancellationToken,
}

impl fmt::Debug for Scheduler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Scheduler")
            .field("intervals", &self.intervals)
            .field("shutdown_cancelled", &self.shutdown.is_cancelled())
            .finish_non_exhaustive()
    }
}

impl Scheduler {
    pub fn new(
        reconciler: Reconciler,
        intervals: impl IntoIterator<Item = (Operation, Duration)>,
    ) -> Self {
        Self {
            reconciler,
            intervals: intervals.into_iter().collect(),
            shutdown: CancellationToken::new(),
        }
    }

    /// Token that stops every loop when cancelled.
    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown.clone()
    }

    /// Run every loop until the token is cancelled or one of them fails.
    /// Waits for all loops to exit and returns the first fatal error.
    pub async fn run(self) -> Result<(), WorkerError> {
        let mut tasks = JoinSet::new();
        for (operation, interval) in self.intervals {
            tasks.spawn(run_worker(
                self.reconciler.clone(),
                operation,
                interval,
                self.shutdown.clone(),
            ));
        }

        let mut first_error = None;
        while let Some(joined) = tasks.join_next().await {
            let err = match joined {
                Ok(Ok(())) => continue,
                Ok(Err(err)) => err,
                Err(join_err) => WorkerError::Aborted(join_err.to_string()),
            };
            self.shutdown.cancel();
            first_error.get_or_insert(err);
        }

        match first_error {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }
}

async fn run_worker(
    reconciler: Reconciler,
    operation: Operation,
    interval: Duration,
    shutdown: CancellationToken,
) -> Result<(), WorkerError> {
    let worker = operation.name();
    info!(
        worker,
        interval_ms = interval.as_millis() as u64,
        "Starting worker"
    );

    while !shutdown.is_cancelled() {
        match reconciler.run(operation).await {
            Ok(0) => {}
            Ok(count) => debug!(worker, count, "worker cycle complete"),
            Err(err) if err.is_transient() => {
                warn!(worker, error = %err, "queue store connection dropped, retrying next cycle");
            }
            Err(source) => {
                shutdown.cancel();
                return Err(WorkerError::Failed {
                    worker,
                    completed: source.completed(),
                    source,
                });
            }
        }

        tokio::select! {
            _ = shutdown.cancelled() => break,
            _ = tokio::time::sleep(interval) => {}
        }
    }

    info!(worker, "Worker stopped");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use frontier_core::keys::{CEID_TIMEOUT, CHG_READY, CHG_WAIT};
    use frontier_core::queue::{InMemoryQueueStore, QueueCall, QueueStore};
    use frontier_core::records::{InMemoryRecordStore, RecordStore};
    use frontier_core::{ManualClock, QueueStoreError};

    const TICK: Duration = Duration::from_millis(1);
    const GUARD: Duration = Duration::from_secs(5);

    fn scheduler(queues: &Arc<InMemoryQueueStore>, now_ms: i64) -> Scheduler {
        let records = Arc::new(InMemoryRecordStore::new());
        let reconciler = Reconciler::new(
            Arc::clone(queues) as Arc<dyn QueueStore>,
            records as Arc<dyn RecordStore>,
        )
        .with_clock(Arc::new(ManualClock::new(now_ms)));
        Scheduler::new(reconciler, Operation::ALL.map(|op| (op, TICK)))
    }

    #[tokio::test]
    async fn cancellation_stops_every_loop_cleanly() {
        let queues = Arc::new(InMemoryQueueStore::new());
        queues.add_scored(CHG_WAIT, "chg-1", 10).await;
        let scheduler = scheduler(&queues, 100);
        let token = scheduler.shutdown_token();

        let run = tokio::spawn(scheduler.run());
        while queues.list(CHG_READY).await.is_empty() {
            tokio::time::sleep(TICK).await;
        }
        token.cancel();

        let result = tokio::time::timeout(GUARD, run).await.unwrap().unwrap();
        assert!(result.is_ok());
        assert_eq!(queues.list(CHG_READY).await, vec!["chg-1"]);
    }

    #[tokio::test]
    async fn fatal_error_cancels_all_workers() {
        let queues = Arc::new(InMemoryQueueStore::new());
        queues.push_back(CEID_TIMEOUT, "ce-1").await.unwrap();
        queues
            .fail_next(QueueCall::PopFront, QueueStoreError::command("LPOP", "WRONGTYPE"))
            .await;
        let scheduler = scheduler(&queues, 0);
        let token = scheduler.shutdown_token();

        let err = tokio::time::timeout(GUARD, scheduler.run())
            .await
            .unwrap()
            .unwrap_err();

        match err {
            WorkerError::Failed {
                worker, completed, ..
            } => {
                assert_eq!(worker, "ceid-timeout-queue");
                assert_eq!(completed, 0);
            }
            other => panic!("unexpected {other:?}"),
        }
        assert!(token.is_cancelled());
    }

    #[tokio::test]
    async fn dropped_queue_connection_is_tolerated() {
        let queues = Arc::new(InMemoryQueueStore::new());
        queues
            .fail_next(QueueCall::MoveDue, QueueStoreError::ConnectionDropped("EOF".into()))
            .await;
        let scheduler = scheduler(&queues, 0);
        let token = scheduler.shutdown_token();

        let run = tokio::spawn(scheduler.run());
        while queues.calls(QueueCall::MoveDue).await < 10 {
            tokio::time::sleep(TICK).await;
        }
        assert!(!token.is_cancelled());
        token.cancel();

        let result = tokio::time::timeout(GUARD, run).await.unwrap().unwrap();
        assert!(result.is_ok());
    }
}
