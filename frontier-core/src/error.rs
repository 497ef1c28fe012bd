use thiserror::Error;

/// Failure talking to the queue store.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum QueueStoreError {
    /// The connection went away mid-command. The connection manager
    /// reconnects on its own, so the next cycle normally succeeds.
    #[error("queue store connection dropped: {0}")]
    ConnectionDropped(String),

    #[error("queue store command {command} failed: {message}")]
    Command {
        command: &'static str,
        message: String,
    },

    #[error("delayed move script error: {0}")]
    Script(String),
}

impl QueueStoreError {
    pub fn command(command: &'static str, message: impl Into<String>) -> Self {
        Self::Command {
            command,
            message: message.into(),
        }
    }

    pub fn is_transient(&self) -> bool {
        matches!(self, Self::ConnectionDropped(_))
    }
}

pub type QueueResult<T> = std::result::Result<T, QueueStoreError>;

/// Outcome of a single durable-store attempt, classified by how the retry
/// loop should recover from it.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StoreFault {
    /// Wait for the database to report ready, then retry.
    #[error("query timed out: {0}")]
    Timeout(String),

    /// Reconnect, then retry.
    #[error("connection closed: {0}")]
    ConnectionClosed(String),

    /// Not recoverable by retrying.
    #[error("{0}")]
    Rejected(String),
}

/// Failure surfaced by the record store after the retry discipline gave up.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RecordStoreError {
    #[error("failed to {operation} after {attempts} of {max_attempts} attempts: {source}")]
    RetriesExhausted {
        operation: &'static str,
        attempts: u32,
        max_attempts: u32,
        source: StoreFault,
    },

    #[error("failed to {operation} after {attempts} attempt(s): {source}")]
    Query {
        operation: &'static str,
        attempts: u32,
        source: StoreFault,
    },

    #[error("failed to connect to database at {address}: {message}")]
    Connect { address: String, message: String },
}

pub type RecordResult<T> = std::result::Result<T, RecordStoreError>;

/// Failure of one reconciliation cycle. Every variant records how many
/// sub-operations completed before the failure so partial progress can be
/// logged.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ReconcileError {
    #[error("{context}: {source}")]
    Queue {
        context: &'static str,
        completed: u64,
        source: QueueStoreError,
    },

    #[error("{context}: {source}")]
    Record {
        context: String,
        completed: u64,
        source: RecordStoreError,
    },

    /// Durable delete succeeded but the ids could not be removed from the
    /// removal queue. They will be deleted again next cycle.
    #[error("removed {completed} queued uri(s) but failed to acknowledge the batch: {source}")]
    Acknowledge {
        completed: u64,
        source: QueueStoreError,
    },

    /// The popped crawl execution is in neither the timeout queue nor
    /// durably aborted.
    #[error(
        "{update}: failed to recover ceid {ceid}, it must be inserted into the timeout queue manually: {rollback}"
    )]
    RollbackFailed {
        ceid: String,
        completed: u64,
        update: RecordStoreError,
        rollback: QueueStoreError,
    },
}

impl ReconcileError {
    pub fn completed(&self) -> u64 {
        match self {
            Self::Queue { completed, .. }
            | Self::Record { completed, .. }
            | Self::Acknowledge { completed, .. }
            | Self::RollbackFailed { completed, .. } => *completed,
        }
    }

    /// A dropped queue-store connection is the one failure the scheduler
    /// tolerates without shutting the process down.
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Queue { source, .. } => source.is_transient(),
            _ => false,
        }
    }
}

pub type Result<T> = std::result::Result<T, ReconcileError>;
