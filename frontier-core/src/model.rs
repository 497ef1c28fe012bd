use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Lifecycle state of a single crawl execution.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CrawlExecutionState {
    Undefined,
    Created,
    Fetching,
    Sleeping,
    Finished,
    AbortedTimeout,
    AbortedSize,
    AbortedManual,
    Failed,
    Died,
}

impl CrawlExecutionState {
    pub const ALL: [CrawlExecutionState; 10] = [
        Self::Undefined,
        Self::Created,
        Self::Fetching,
        Self::Sleeping,
        Self::Finished,
        Self::AbortedTimeout,
        Self::AbortedSize,
        Self::AbortedManual,
        Self::Failed,
        Self::Died,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Undefined => "UNDEFINED",
            Self::Created => "CREATED",
            Self::Fetching => "FETCHING",
            Self::Sleeping => "SLEEPING",
            Self::Finished => "FINISHED",
            Self::AbortedTimeout => "ABORTED_TIMEOUT",
            Self::AbortedSize => "ABORTED_SIZE",
            Self::AbortedManual => "ABORTED_MANUAL",
            Self::Failed => "FAILED",
            Self::Died => "DIED",
        }
    }
}

impl fmt::Display for CrawlExecutionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for CrawlExecutionState {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|state| state.as_str() == s)
            .ok_or(())
    }
}

/// Durable job execution states after which the record is frozen.
pub const TERMINAL_JOB_STATES: [&str; 6] = [
    "FINISHED",
    "ABORTED_TIMEOUT",
    "ABORTED_SIZE",
    "ABORTED_MANUAL",
    "FAILED",
    "DIED",
];

pub fn is_terminal_job_state(state: &str) -> bool {
    TERMINAL_JOB_STATES.contains(&state)
}

/// Where a crawl host group currently sits. Derived from queue membership;
/// never stored.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum HostGroupState {
    Wait,
    Ready,
    Busy,
    TimedOut,
}

/// Counters for one job execution as aggregated by the fetch workers in the
/// queue store.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobExecutionStatus {
    pub id: String,
    pub documents_crawled: i64,
    pub documents_denied: i64,
    pub documents_failed: i64,
    pub documents_out_of_scope: i64,
    pub documents_retried: i64,
    pub uris_crawled: i64,
    pub bytes_crawled: i64,
    pub executions_state: BTreeMap<CrawlExecutionState, i32>,
}

impl JobExecutionStatus {
    /// Decode a `JEID:<id>` hash. Missing or malformed counters read as zero
    /// and every crawl execution state gets an entry.
    pub fn from_hash(id: impl Into<String>, fields: &HashMap<String, String>) -> Self {
        let int = |name: &str| -> i64 {
            fields
                .get(name)
                .and_then(|raw| raw.trim().parse::<i64>().ok())
                .unwrap_or(0)
        };

        let executions_state = CrawlExecutionState::ALL
            .into_iter()
            .map(|state| {
                let count = fields
                    .get(state.as_str())
                    .and_then(|raw| raw.trim().parse::<i32>().ok())
                    .unwrap_or(0);
                (state, count)
            })
            .collect();

        Self {
            id: id.into(),
            documents_crawled: int("documentsCrawled"),
            documents_denied: int("documentsDenied"),
            documents_failed: int("documentsFailed"),
            documents_out_of_scope: int("documentsOutOfScope"),
            documents_retried: int("documentsRetried"),
            uris_crawled: int("urisCrawled"),
            bytes_crawled: int("bytesCrawled"),
            executions_state,
        }
    }

    /// Per-state counters keyed by state name, as persisted in the
    /// `executions_state` column.
    pub fn executions_state_json(&self) -> serde_json::Value {
        let map: serde_json::Map<String, serde_json::Value> = self
            .executions_state
            .iter()
            .map(|(state, count)| (state.as_str().to_string(), (*count).into()))
            .collect();
        serde_json::Value::Object(map)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn hash(pairs: &[(&str, &str)]) -> HashMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn decodes_counters_and_state_map() {
        let fields = hash(&[
            ("documentsCrawled", "12"),
            ("documentsDenied", "1"),
            ("bytesCrawled", "4096"),
            ("urisCrawled", "14"),
            ("FETCHING", "2"),
            ("FINISHED", "9"),
        ]);

        let status = JobExecutionStatus::from_hash("je-1", &fields);

        assert_eq!(status.id, "je-1");
        assert_eq!(status.documents_crawled, 12);
        assert_eq!(status.documents_denied, 1);
        assert_eq!(status.bytes_crawled, 4096);
        assert_eq!(status.uris_crawled, 14);
        assert_eq!(status.documents_failed, 0);
        assert_eq!(status.executions_state.len(), CrawlExecutionState::ALL.len());
        assert_eq!(status.executions_state[&CrawlExecutionState::Fetching], 2);
        assert_eq!(status.executions_state[&CrawlExecutionState::Finished], 9);
        assert_eq!(status.executions_state[&CrawlExecutionState::Died], 0);
    }

    #[test]
    fn malformed_counters_read_as_zero() {
        let fields = hash(&[("documentsRetried", "lots"), ("SLEEPING", "")]);
        let status = JobExecutionStatus::from_hash("je-2", &fields);
        assert_eq!(status.documents_retried, 0);
        assert_eq!(status.executions_state[&CrawlExecutionState::Sleeping], 0);
    }

    #[test]
    fn state_json_uses_wire_names() {
        let fields = hash(&[("ABORTED_TIMEOUT", "3")]);
        let json = JobExecutionStatus::from_hash("je-3", &fields).executions_state_json();
        assert_eq!(json["ABORTED_TIMEOUT"], 3);
        assert_eq!(json["CREATED"], 0);
    }

    #[test]
    fn terminal_states_match_crawl_state_names() {
        for state in TERMINAL_JOB_STATES {
            assert!(state.parse::<CrawlExecutionState>().is_ok(), "{state}");
        }
        assert!(is_terminal_job_state("FINISHED"));
        assert!(!is_terminal_job_state("RUNNING"));
    }
}
