//! # Frontier Core
//!
//! Reconciliation engine for the crawl frontier. Fetch workers keep the live
//! state of a crawl in Redis: host groups waiting, ready, busy or timed out,
//! crawl executions running against a deadline, counters per job execution
//! and a queue of URIs to forget. This crate moves that state forward on a
//! schedule and copies what must outlive Redis into PostgreSQL.
//!
//! ## Architecture
//!
//! - [`queue`]: the [`QueueStore`](queue::QueueStore) port with Redis and
//!   in-memory adapters
//! - [`records`]: the [`RecordStore`](records::RecordStore) port with
//!   PostgreSQL and in-memory adapters, plus the bounded retry loop
//! - [`mover`]: the atomic delayed move between a scored queue and a list
//! - [`reconcile`]: the six periodic operations built on the two ports
//!
//! Store handles are created once by the binary and passed in as
//! `Arc<dyn QueueStore>` / `Arc<dyn RecordStore>`.
#![allow(missing_docs)]

pub mod clock;
pub mod error;
pub mod keys;
pub mod model;
pub mod mover;
pub mod queue;
pub mod reconcile;
pub mod records;

pub use clock::{Clock, ManualClock, SystemClock};
pub use error::{QueueStoreError, ReconcileError, RecordStoreError, Result, StoreFault};
pub use model::{CrawlExecutionState, HostGroupState, JobExecutionStatus};
pub use mover::{DelayedMoveScript, DelayedMover};
pub use queue::{QueueStore, RedisQueueStore};
pub use reconcile::{Operation, Reconciler};
pub use records::{PostgresOptions, PostgresRecordStore, RecordStore};

/// Schema of the durable tables the reconciler writes to.
pub static MIGRATOR: sqlx::migrate::Migrator = sqlx::migrate!("./migrations");
