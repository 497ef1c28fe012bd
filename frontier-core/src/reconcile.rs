//! The six periodic reconciliation operations.
//!
//! Three are delayed moves inside the queue store. The other three drain a
//! queue-store structure into conditional writes against the durable store.
//! Every operation returns how many items it changed; on failure the error
//! carries the count completed before it.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, trace, warn};

use crate::clock::{Clock, SystemClock};
use crate::error::{ReconcileError, Result};
use crate::keys::{
    CEID_TIMEOUT, JOB_EXECUTION_PREFIX, QueuePair, REMOVE_URI_BATCH, REMOVE_URI_QUEUE,
    job_execution_id,
};
use crate::model::JobExecutionStatus;
use crate::mover::DelayedMover;
use crate::queue::QueueStore;
use crate::records::RecordStore;

/// A periodic unit of work.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Operation {
    UpdateJobExecutions,
    TimeoutCrawlExecutions,
    RemoveFromUriQueue,
    MoveBusyToTimeout,
    MoveWaitToReady,
    MoveRunningToTimeout,
}

impl Operation {
    pub const ALL: [Operation; 6] = [
        Self::UpdateJobExecutions,
        Self::TimeoutCrawlExecutions,
        Self::RemoveFromUriQueue,
        Self::MoveBusyToTimeout,
        Self::MoveWaitToReady,
        Self::MoveRunningToTimeout,
    ];

    /// Worker name used in logs and as the configuration key.
    pub fn name(self) -> &'static str {
        match self {
            Self::UpdateJobExecutions => "update-job-executions",
            Self::TimeoutCrawlExecutions => "ceid-timeout-queue",
            Self::RemoveFromUriQueue => "remuri-queue",
            Self::MoveBusyToTimeout => "busy-queue",
            Self::MoveWaitToReady => "wait-queue",
            Self::MoveRunningToTimeout => "ceid-running-queue",
        }
    }

    pub fn default_interval(self) -> Duration {
        match self {
            Self::UpdateJobExecutions => Duration::from_secs(5),
            Self::TimeoutCrawlExecutions => Duration::from_millis(1100),
            Self::RemoveFromUriQueue => Duration::from_millis(200),
            Self::MoveBusyToTimeout | Self::MoveWaitToReady | Self::MoveRunningToTimeout => {
                Duration::from_millis(50)
            }
        }
    }
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Runs reconciliation operations against a pair of stores.
#[derive(Clone)]
pub struct Reconciler {
    mover: DelayedMover,
    queues: Arc<dyn QueueStore>,
    records: Arc<dyn RecordStore>,
    clock: Arc<dyn Clock>,
}

impl fmt::Debug for Reconciler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Reconciler")
            .field("mover", &self.mover)
            .finish_non_exhaustive()
    }
}

impl Reconciler {
    pub fn new(queues: Arc<dyn QueueStore>, records: Arc<dyn RecordStore>) -> Self {
        Self {
            mover: DelayedMover::new(Arc::clone(&queues)),
            queues,
            records,
            clock: Arc::new(SystemClock),
        }
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub async fn run(&self, operation: Operation) -> Result<u64> {
        match operation {
            Operation::UpdateJobExecutions => self.update_job_executions().await,
            Operation::TimeoutCrawlExecutions => self.timeout_crawl_executions().await,
            Operation::RemoveFromUriQueue => self.remove_from_uri_queue().await,
            Operation::MoveBusyToTimeout => self.move_busy_to_timeout().await,
            Operation::MoveWaitToReady => self.move_wait_to_ready().await,
            Operation::MoveRunningToTimeout => self.move_running_to_timeout().await,
        }
    }

    /// Host groups whose politeness delay has passed become fetchable.
    pub async fn move_wait_to_ready(&self) -> Result<u64> {
        self.delayed_move(QueuePair::WAIT_TO_READY, "move wait queue to ready queue")
            .await
    }

    /// Host groups whose fetcher lease expired are flagged as timed out.
    pub async fn move_busy_to_timeout(&self) -> Result<u64> {
        self.delayed_move(QueuePair::BUSY_TO_TIMEOUT, "move busy queue to timeout queue")
            .await
    }

    /// Crawl executions past their deadline are queued for a durable abort.
    pub async fn move_running_to_timeout(&self) -> Result<u64> {
        self.delayed_move(
            QueuePair::RUNNING_TO_TIMEOUT,
            "move running crawl executions to timeout queue",
        )
        .await
    }

    async fn delayed_move(&self, pair: QueuePair, context: &'static str) -> Result<u64> {
        self.mover
            .move_due(pair, self.clock.now_ms())
            .await
            .map_err(|source| ReconcileError::Queue {
                context,
                completed: 0,
                source,
            })
    }

    /// Drain the crawl-execution timeout queue, marking each execution
    /// `ABORTED_TIMEOUT` unless it has already ended.
    ///
    /// An execution whose update fails is pushed back to the tail of the
    /// queue and draining stops, so the next cycle meets it again. If that
    /// push also fails the execution is lost from the queue and the error is
    /// [`ReconcileError::RollbackFailed`].
    pub async fn timeout_crawl_executions(&self) -> Result<u64> {
        let mut aborted = 0;
        loop {
            let ceid = match self.queues.pop_front(CEID_TIMEOUT).await {
                Ok(Some(ceid)) => ceid,
                Ok(None) => return Ok(aborted),
                Err(source) => {
                    return Err(ReconcileError::Queue {
                        context: "pop timed out crawl execution",
                        completed: aborted,
                        source,
                    });
                }
            };

            match self.records.abort_timed_out_execution(&ceid).await {
                Ok(0) => trace!(ceid = %ceid, "crawl execution already ended, not aborted"),
                Ok(changed) => aborted += changed,
                Err(update) => {
                    if let Err(rollback) = self.queues.push_back(CEID_TIMEOUT, &ceid).await {
                        return Err(ReconcileError::RollbackFailed {
                            ceid,
                            completed: aborted,
                            update,
                            rollback,
                        });
                    }
                    warn!(ceid = %ceid, "abort failed, crawl execution returned to timeout queue");
                    return Err(ReconcileError::Record {
                        context: format!("abort timed out crawl execution {ceid}"),
                        completed: aborted,
                        source: update,
                    });
                }
            }
        }
    }

    /// Delete one batch of queued URIs from the durable store and then from
    /// the removal queue.
    ///
    /// The batch is only acknowledged after the durable delete succeeded, so
    /// a failure leaves every id in place for the next cycle. Ids without a
    /// durable row are acknowledged too.
    pub async fn remove_from_uri_queue(&self) -> Result<u64> {
        let ids = self
            .queues
            .peek(REMOVE_URI_QUEUE, REMOVE_URI_BATCH)
            .await
            .map_err(|source| ReconcileError::Queue {
                context: "read uri removal queue",
                completed: 0,
                source,
            })?;
        if ids.is_empty() {
            return Ok(0);
        }

        let deleted = self
            .records
            .delete_queued_uris(&ids)
            .await
            .map_err(|source| ReconcileError::Record {
                context: format!("delete {} queued uri(s)", ids.len()),
                completed: 0,
                source,
            })?;

        self.queues
            .acknowledge(REMOVE_URI_QUEUE, &ids)
            .await
            .map_err(|source| ReconcileError::Acknowledge {
                completed: deleted,
                source,
            })?;

        if deleted < ids.len() as u64 {
            debug!(
                requested = ids.len(),
                deleted, "some queued uris had no durable row"
            );
        }
        Ok(deleted)
    }

    /// Copy every job execution's live counters into its durable row.
    /// Terminal rows are left alone. The first failure ends the cycle.
    pub async fn update_job_executions(&self) -> Result<u64> {
        let keys = self
            .queues
            .scan_prefix(JOB_EXECUTION_PREFIX)
            .await
            .map_err(|source| ReconcileError::Queue {
                context: "scan job execution keys",
                completed: 0,
                source,
            })?;

        let mut updated = 0;
        for key in &keys {
            let Some(jeid) = job_execution_id(key) else {
                continue;
            };
            let fields = match self.queues.hash_fields(key).await {
                Ok(Some(fields)) => fields,
                Ok(None) => {
                    trace!(key = %key, "job execution key vanished before read");
                    continue;
                }
                Err(source) => {
                    return Err(ReconcileError::Queue {
                        context: "read job execution counters",
                        completed: updated,
                        source,
                    });
                }
            };

            let status = JobExecutionStatus::from_hash(jeid, &fields);
            updated += self
                .records
                .update_job_execution(&status)
                .await
                .map_err(|source| ReconcileError::Record {
                    context: format!("update job execution {jeid}"),
                    completed: updated,
                    source,
                })?;
        }
        Ok(updated)
    }
}
