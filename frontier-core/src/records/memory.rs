use std::collections::{BTreeSet, HashMap, VecDeque};
use std::fmt;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::Mutex;

use super::RecordStore;
use crate::error::{RecordResult, RecordStoreError};
use crate::model::{CrawlExecutionState, JobExecutionStatus, is_terminal_job_state};

/// Identifies a [`RecordStore`] method for fault injection and call counting.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum RecordCall {
    DeleteQueuedUris,
    AbortTimedOutExecution,
    UpdateJobExecution,
}

/// Row of the crawl executions table, reduced to the columns the reconciler
/// touches.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct CrawlExecutionRecord {
    pub end_time: Option<DateTime<Utc>>,
    pub desired_state: Option<CrawlExecutionState>,
}

/// Row of the job executions table.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct JobExecutionRecord {
    pub state: Option<String>,
    /// Last counters written, `None` until the first update.
    pub status: Option<JobExecutionStatus>,
}

#[derive(Debug, Default)]
struct RecordState {
    queued_uris: BTreeSet<String>,
    executions: HashMap<String, CrawlExecutionRecord>,
    job_executions: HashMap<String, JobExecutionRecord>,
    delete_batches: Vec<Vec<String>>,
    faults: HashMap<RecordCall, VecDeque<RecordStoreError>>,
    execution_faults: HashMap<String, RecordStoreError>,
    calls: HashMap<RecordCall, usize>,
}

impl RecordState {
    fn enter(&mut self, call: RecordCall) -> RecordResult<()> {
        *self.calls.entry(call).or_default() += 1;
        match self.faults.get_mut(&call).and_then(VecDeque::pop_front) {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }
}

/// In-process record store applying the same guards as the PostgreSQL
/// statements.
#[derive(Default)]
pub struct InMemoryRecordStore {
    state: Mutex<RecordState>,
}

impl fmt::Debug for InMemoryRecordStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut debug = f.debug_struct("InMemoryRecordStore");
        match self.state.try_lock() {
            Ok(state) => {
                debug
                    .field("queued_uris", &state.queued_uris.len())
                    .field("executions", &state.executions.len())
                    .field("job_executions", &state.job_executions.len());
            }
            Err(_) => {
                debug.field("state", &"<locked>");
            }
        }
        debug.finish()
    }
}

impl InMemoryRecordStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn insert_queued_uris<I, S>(&self, ids: I)
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut state = self.state.lock().await;
        state.queued_uris.extend(ids.into_iter().map(Into::into));
    }

    pub async fn queued_uris(&self) -> Vec<String> {
        let state = self.state.lock().await;
        state.queued_uris.iter().cloned().collect()
    }

    pub async fn insert_execution(&self, id: &str, end_time: Option<DateTime<Utc>>) {
        let mut state = self.state.lock().await;
        state.executions.insert(
            id.to_string(),
            CrawlExecutionRecord {
                end_time,
                desired_state: None,
            },
        );
    }

    pub async fn execution(&self, id: &str) -> Option<CrawlExecutionRecord> {
        let state = self.state.lock().await;
        state.executions.get(id).cloned()
    }

    pub async fn insert_job_execution(&self, id: &str, state_name: Option<&str>) {
        let mut state = self.state.lock().await;
        state.job_executions.insert(
            id.to_string(),
            JobExecutionRecord {
                state: state_name.map(str::to_string),
                status: None,
            },
        );
    }

    pub async fn job_execution(&self, id: &str) -> Option<JobExecutionRecord> {
        let state = self.state.lock().await;
        state.job_executions.get(id).cloned()
    }

    /// Every id batch passed to `delete_queued_uris`, failed calls included.
    pub async fn delete_batches(&self) -> Vec<Vec<String>> {
        let state = self.state.lock().await;
        state.delete_batches.clone()
    }

    /// Make the next `call` fail with `err`. Faults queue up per call.
    pub async fn fail_next(&self, call: RecordCall, err: RecordStoreError) {
        let mut state = self.state.lock().await;
        state.faults.entry(call).or_default().push_back(err);
    }

    /// Make the next abort of `ceid` fail with `err`, leaving other
    /// executions unaffected.
    pub async fn fail_execution(&self, ceid: &str, err: RecordStoreError) {
        let mut state = self.state.lock().await;
        state.execution_faults.insert(ceid.to_string(), err);
    }

    pub async fn calls(&self, call: RecordCall) -> usize {
        let state = self.state.lock().await;
        state.calls.get(&call).copied().unwrap_or(0)
    }
}

#[async_trait]
impl RecordStore for InMemoryRecordStore {
    async fn delete_queued_uris(&self, ids: &[String]) -> RecordResult<u64> {
        let mut state = self.state.lock().await;
        state.delete_batches.push(ids.to_vec());
        state.enter(RecordCall::DeleteQueuedUris)?;
        let deleted = ids
            .iter()
            .filter(|id| state.queued_uris.remove(id.as_str()))
            .count();
        Ok(deleted as u64)
    }

    async fn abort_timed_out_execution(&self, ceid: &str) -> RecordResult<u64> {
        let mut state = self.state.lock().await;
        state.enter(RecordCall::AbortTimedOutExecution)?;
        if let Some(err) = state.execution_faults.remove(ceid) {
            return Err(err);
        }
        match state.executions.get_mut(ceid) {
            Some(record) if record.end_time.is_none() => {
                record.desired_state = Some(CrawlExecutionState::AbortedTimeout);
                Ok(1)
            }
            _ => Ok(0),
        }
    }

    async fn update_job_execution(&self, status: &JobExecutionStatus) -> RecordResult<u64> {
        let mut state = self.state.lock().await;
        state.enter(RecordCall::UpdateJobExecution)?;
        match state.job_executions.get_mut(&status.id) {
            Some(record) if !record.state.as_deref().is_some_and(is_terminal_job_state) => {
                record.status = Some(status.clone());
                Ok(1)
            }
            _ => Ok(0),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::StoreFault;

    #[tokio::test]
    async fn abort_skips_executions_that_already_ended() {
        let store = InMemoryRecordStore::new();
        store.insert_execution("running", None).await;
        store.insert_execution("ended", Some(Utc::now())).await;

        assert_eq!(store.abort_timed_out_execution("running").await, Ok(1));
        assert_eq!(store.abort_timed_out_execution("ended").await, Ok(0));
        assert_eq!(store.abort_timed_out_execution("missing").await, Ok(0));

        assert_eq!(
            store.execution("running").await.unwrap().desired_state,
            Some(CrawlExecutionState::AbortedTimeout)
        );
        assert_eq!(store.execution("ended").await.unwrap().desired_state, None);
    }

    #[tokio::test]
    async fn terminal_job_executions_are_frozen() {
        let store = InMemoryRecordStore::new();
        store.insert_job_execution("live", Some("RUNNING")).await;
        store.insert_job_execution("new", None).await;
        store.insert_job_execution("done", Some("FINISHED")).await;

        for id in ["live", "new", "done"] {
            let status = JobExecutionStatus {
                id: id.into(),
                documents_crawled: 5,
                ..Default::default()
            };
            let expected = if id == "done" { 0 } else { 1 };
            assert_eq!(store.update_job_execution(&status).await, Ok(expected));
        }
        assert!(store.job_execution("done").await.unwrap().status.is_none());
        assert_eq!(
            store
                .job_execution("new")
                .await
                .unwrap()
                .status
                .unwrap()
                .documents_crawled,
            5
        );
    }

    #[tokio::test]
    async fn delete_counts_only_existing_rows() {
        let store = InMemoryRecordStore::new();
        store.insert_queued_uris(["u1", "u2"]).await;

        let deleted = store
            .delete_queued_uris(&["u1".into(), "u9".into()])
            .await
            .unwrap();

        assert_eq!(deleted, 1);
        assert_eq!(store.queued_uris().await, vec!["u2"]);
    }

    #[tokio::test]
    async fn injected_fault_is_returned_and_counted() {
        let store = InMemoryRecordStore::new();
        let err = RecordStoreError::Query {
            operation: "delete-queued-uris",
            attempts: 1,
            source: StoreFault::Rejected("permission denied".into()),
        };
        store.fail_next(RecordCall::DeleteQueuedUris, err.clone()).await;

        assert_eq!(store.delete_queued_uris(&["u1".into()]).await, Err(err));
        assert_eq!(store.calls(RecordCall::DeleteQueuedUris).await, 1);
        assert_eq!(store.delete_batches().await, vec![vec!["u1".to_string()]]);
    }
}
