//! Durable record store port.

pub mod memory;
pub mod postgres;
pub mod retry;

use async_trait::async_trait;

use crate::error::RecordResult;
use crate::model::JobExecutionStatus;

pub use memory::{CrawlExecutionRecord, InMemoryRecordStore, JobExecutionRecord, RecordCall};
pub use postgres::{PostgresOptions, PostgresRecordStore};

/// Conditional writes against the durable store. Each call is one retried
/// round trip; a guard that rejects the write is not an error, it affects
/// zero rows.
#[async_trait]
pub trait RecordStore: Send + Sync {
    /// Delete queued URIs by id. Returns the number of rows deleted; ids with
    /// no row are ignored.
    async fn delete_queued_uris(&self, ids: &[String]) -> RecordResult<u64>;

    /// Set `desired_state = ABORTED_TIMEOUT` on a crawl execution unless it
    /// already has an end time. Returns the number of rows changed.
    async fn abort_timed_out_execution(&self, ceid: &str) -> RecordResult<u64>;

    /// Overwrite a job execution's counters unless its state is terminal.
    /// Returns the number of rows changed.
    async fn update_job_execution(&self, status: &JobExecutionStatus) -> RecordResult<u64>;
}
