//! Queue-store key names and durable table names shared with the fetch
//! workers. These are a wire contract; do not rename.

/// Crawl host groups waiting for their politeness delay. Sorted set scored by
/// the instant (ms since epoch) they become ready.
pub const CHG_WAIT: &str = "chg_wait{chg}";
/// Crawl host groups ready to be fetched. List.
pub const CHG_READY: &str = "chg_ready{chg}";
/// Crawl host groups leased by a fetcher. Sorted set scored by busy deadline.
pub const CHG_BUSY: &str = "chg_busy{chg}";
/// Crawl host groups whose busy deadline passed. List.
pub const CHG_TIMEOUT: &str = "chg_timeout{chg}";

/// Running crawl executions, scored by their deadline.
pub const CEID_RUNNING: &str = "ceid_running";
/// Crawl executions whose deadline passed, awaiting a durable abort.
pub const CEID_TIMEOUT: &str = "ceid_timeout";

/// Queued URI ids whose durable row must be deleted.
pub const REMOVE_URI_QUEUE: &str = "REMURI";
/// Prefix of the per-job-execution counter hashes.
pub const JOB_EXECUTION_PREFIX: &str = "JEID:";

/// Upper bound on ids taken from [`REMOVE_URI_QUEUE`] per cycle.
pub const REMOVE_URI_BATCH: usize = 10_000;

pub const TABLE_URI_QUEUE: &str = "uri_queue";
pub const TABLE_CRAWL_EXECUTIONS: &str = "executions";
pub const TABLE_JOB_EXECUTIONS: &str = "job_executions";

/// Source/destination of one delayed move.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct QueuePair {
    pub from: &'static str,
    pub to: &'static str,
}

impl QueuePair {
    pub const WAIT_TO_READY: QueuePair = QueuePair {
        from: CHG_WAIT,
        to: CHG_READY,
    };
    pub const BUSY_TO_TIMEOUT: QueuePair = QueuePair {
        from: CHG_BUSY,
        to: CHG_TIMEOUT,
    };
    pub const RUNNING_TO_TIMEOUT: QueuePair = QueuePair {
        from: CEID_RUNNING,
        to: CEID_TIMEOUT,
    };
}

pub fn job_execution_id(key: &str) -> Option<&str> {
    key.strip_prefix(JOB_EXECUTION_PREFIX)
}
