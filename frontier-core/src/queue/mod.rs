//! Queue-store port. The fetch workers own the contents; the reconciler only
//! moves, drains and acknowledges.

pub mod memory;
pub mod redis_store;

use std::collections::HashMap;

use async_trait::async_trait;

use crate::error::QueueResult;

pub use memory::{InMemoryQueueStore, QueueCall};
pub use redis_store::RedisQueueStore;

/// Typed operations against the queue store. Implementations must be safe to
/// share between every reconciliation loop.
#[async_trait]
pub trait QueueStore: Send + Sync {
    /// Atomically move every member of the scored queue `from` whose score is
    /// `<= now_ms` to the tail of list `to`, in ascending score order.
    /// Returns the number moved.
    async fn move_due(&self, from: &str, to: &str, now_ms: i64) -> QueueResult<u64>;

    /// Remove and return the head of a list.
    async fn pop_front(&self, list: &str) -> QueueResult<Option<String>>;

    /// Append to the tail of a list.
    async fn push_back(&self, list: &str, member: &str) -> QueueResult<()>;

    /// Read up to `limit` members from the head of a list without removing
    /// them.
    async fn peek(&self, list: &str, limit: usize) -> QueueResult<Vec<String>>;

    /// Remove one occurrence of each member from a list.
    async fn acknowledge(&self, list: &str, members: &[String]) -> QueueResult<()>;

    /// All keys starting with `prefix`.
    async fn scan_prefix(&self, prefix: &str) -> QueueResult<Vec<String>>;

    /// Fields of a hash, or `None` when the key no longer exists.
    async fn hash_fields(&self, key: &str) -> QueueResult<Option<HashMap<String, String>>>;
}
