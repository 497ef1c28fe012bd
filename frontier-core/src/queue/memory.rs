use std::collections::{HashMap, HashSet, VecDeque};
use std::fmt;

use async_trait::async_trait;
use tokio::sync::Mutex;

use super::QueueStore;
use crate::error::{QueueResult, QueueStoreError};
use crate::keys::{CHG_BUSY, CHG_READY, CHG_TIMEOUT, CHG_WAIT};
use crate::model::HostGroupState;

/// Identifies a [`QueueStore`] method for fault injection and call counting.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum QueueCall {
    MoveDue,
    PopFront,
    PushBack,
    Peek,
    Acknowledge,
    ScanPrefix,
    HashFields,
}

#[derive(Debug, Default)]
struct QueueState {
    /// Sorted by (score, member), matching Redis tie ordering.
    scored: HashMap<String, Vec<(i64, String)>>,
    lists: HashMap<String, VecDeque<String>>,
    hashes: HashMap<String, HashMap<String, String>>,
    /// Hash keys deleted just before their next read.
    expiring: HashSet<String>,
    faults: HashMap<QueueCall, VecDeque<QueueStoreError>>,
    calls: HashMap<QueueCall, usize>,
}

impl QueueState {
    fn enter(&mut self, call: QueueCall) -> QueueResult<()> {
        *self.calls.entry(call).or_default() += 1;
        match self.faults.get_mut(&call).and_then(VecDeque::pop_front) {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }
}

/// In-process queue store with the same semantics as the Redis adapter.
/// Every operation runs under one lock, so moves are atomic.
#[derive(Default)]
pub struct InMemoryQueueStore {
    state: Mutex<QueueState>,
}

impl fmt::Debug for InMemoryQueueStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut debug = f.debug_struct("InMemoryQueueStore");
        match self.state.try_lock() {
            Ok(state) => {
                debug
                    .field("scored_queues", &state.scored.len())
                    .field("lists", &state.lists.len())
                    .field("hashes", &state.hashes.len());
            }
            Err(_) => {
                debug.field("state", &"<locked>");
            }
        }
        debug.finish()
    }
}

impl InMemoryQueueStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add `member` to a scored queue, replacing any previous score.
    pub async fn add_scored(&self, queue: &str, member: &str, score: i64) {
        let mut state = self.state.lock().await;
        let entries = state.scored.entry(queue.to_string()).or_default();
        entries.retain(|(_, m)| m != member);
        entries.push((score, member.to_string()));
        entries.sort();
    }

    pub async fn set_hash(&self, key: &str, fields: &[(&str, &str)]) {
        let mut state = self.state.lock().await;
        state.hashes.insert(
            key.to_string(),
            fields
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect(),
        );
    }

    /// Delete hash `key` right before the next read of it, as if it expired
    /// after a scan listed it.
    pub async fn expire_before_read(&self, key: &str) {
        let mut state = self.state.lock().await;
        state.expiring.insert(key.to_string());
    }

    /// Snapshot of a list, head first.
    pub async fn list(&self, list: &str) -> Vec<String> {
        let state = self.state.lock().await;
        state
            .lists
            .get(list)
            .map(|l| l.iter().cloned().collect())
            .unwrap_or_default()
    }

    /// Snapshot of a scored queue in ascending score order.
    pub async fn scored(&self, queue: &str) -> Vec<(String, i64)> {
        let state = self.state.lock().await;
        state
            .scored
            .get(queue)
            .map(|entries| entries.iter().map(|(s, m)| (m.clone(), *s)).collect())
            .unwrap_or_default()
    }

    /// Every host-group state whose queue currently holds `chg`. Healthy
    /// data yields at most one.
    pub async fn host_group_states(&self, chg: &str) -> Vec<HostGroupState> {
        let state = self.state.lock().await;
        let in_scored = |queue: &str| {
            state
                .scored
                .get(queue)
                .is_some_and(|entries| entries.iter().any(|(_, m)| m == chg))
        };
        let in_list = |list: &str| {
            state
                .lists
                .get(list)
                .is_some_and(|l| l.iter().any(|m| m == chg))
        };

        let mut found = Vec::new();
        if in_scored(CHG_WAIT) {
            found.push(HostGroupState::Wait);
        }
        if in_list(CHG_READY) {
            found.push(HostGroupState::Ready);
        }
        if in_scored(CHG_BUSY) {
            found.push(HostGroupState::Busy);
        }
        if in_list(CHG_TIMEOUT) {
            found.push(HostGroupState::TimedOut);
        }
        found
    }

    /// Make the next `call` fail with `err`. Faults queue up per call.
    pub async fn fail_next(&self, call: QueueCall, err: QueueStoreError) {
        let mut state = self.state.lock().await;
        state.faults.entry(call).or_default().push_back(err);
    }

    /// How many times `call` was invoked, including failed invocations.
    pub async fn calls(&self, call: QueueCall) -> usize {
        let state = self.state.lock().await;
        state.calls.get(&call).copied().unwrap_or(0)
    }
}

#[async_trait]
impl QueueStore for InMemoryQueueStore {
    async fn move_due(&self, from: &str, to: &str, now_ms: i64) -> QueueResult<u64> {
        let mut state = self.state.lock().await;
        state.enter(QueueCall::MoveDue)?;

        let due: Vec<String> = match state.scored.get_mut(from) {
            Some(entries) => {
                let split = entries.partition_point(|(score, _)| *score <= now_ms);
                entries.drain(..split).map(|(_, member)| member).collect()
            }
            None => Vec::new(),
        };

        let moved = due.len() as u64;
        if moved > 0 {
            state.lists.entry(to.to_string()).or_default().extend(due);
        }
        Ok(moved)
    }

    async fn pop_front(&self, list: &str) -> QueueResult<Option<String>> {
        let mut state = self.state.lock().await;
        state.enter(QueueCall::PopFront)?;
        Ok(state.lists.get_mut(list).and_then(VecDeque::pop_front))
    }

    async fn push_back(&self, list: &str, member: &str) -> QueueResult<()> {
        let mut state = self.state.lock().await;
        state.enter(QueueCall::PushBack)?;
        state
            .lists
            .entry(list.to_string())
            .or_default()
            .push_back(member.to_string());
        Ok(())
    }

    async fn peek(&self, list: &str, limit: usize) -> QueueResult<Vec<String>> {
        let mut state = self.state.lock().await;
        state.enter(QueueCall::Peek)?;
        Ok(state
            .lists
            .get(list)
            .map(|l| l.iter().take(limit).cloned().collect())
            .unwrap_or_default())
    }

    async fn acknowledge(&self, list: &str, members: &[String]) -> QueueResult<()> {
        let mut state = self.state.lock().await;
        state.enter(QueueCall::Acknowledge)?;
        if let Some(entries) = state.lists.get_mut(list) {
            for member in members {
                if let Some(pos) = entries.iter().position(|m| m == member) {
                    entries.remove(pos);
                }
            }
        }
        Ok(())
    }

    async fn scan_prefix(&self, prefix: &str) -> QueueResult<Vec<String>> {
        let mut state = self.state.lock().await;
        state.enter(QueueCall::ScanPrefix)?;
        let mut keys: Vec<String> = state
            .hashes
            .keys()
            .chain(state.lists.keys())
            .chain(state.scored.keys())
            .filter(|key| key.starts_with(prefix))
            .cloned()
            .collect();
        keys.sort();
        keys.dedup();
        Ok(keys)
    }

    async fn hash_fields(&self, key: &str) -> QueueResult<Option<HashMap<String, String>>> {
        let mut state = self.state.lock().await;
        state.enter(QueueCall::HashFields)?;
        if state.expiring.remove(key) {
            state.hashes.remove(key);
        }
        Ok(state.hashes.get(key).cloned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn injected_faults_fire_once_in_order() {
        let store = InMemoryQueueStore::new();
        store
            .fail_next(QueueCall::PushBack, QueueStoreError::command("RPUSH", "oom"))
            .await;

        assert!(store.push_back("l", "a").await.is_err());
        store.push_back("l", "b").await.unwrap();

        assert_eq!(store.list("l").await, vec!["b"]);
        assert_eq!(store.calls(QueueCall::PushBack).await, 2);
    }

    #[tokio::test]
    async fn acknowledge_removes_one_occurrence_per_member() {
        let store = InMemoryQueueStore::new();
        for member in ["u1", "u2", "u1", "u3"] {
            store.push_back("REMURI", member).await.unwrap();
        }
        store
            .acknowledge("REMURI", &["u1".to_string(), "u3".to_string(), "u9".to_string()])
            .await
            .unwrap();
        assert_eq!(store.list("REMURI").await, vec!["u2", "u1"]);
    }

    #[tokio::test]
    async fn expired_hash_is_listed_but_unreadable() {
        let store = InMemoryQueueStore::new();
        store.set_hash("JEID:gone", &[("urisCrawled", "1")]).await;
        store.expire_before_read("JEID:gone").await;

        assert_eq!(store.scan_prefix("JEID:").await.unwrap(), vec!["JEID:gone"]);
        assert_eq!(store.hash_fields("JEID:gone").await, Ok(None));
        assert!(store.scan_prefix("JEID:").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn rescoring_replaces_previous_entry() {
        let store = InMemoryQueueStore::new();
        store.add_scored("z", "m", 10).await;
        store.add_scored("z", "m", 5).await;
        assert_eq!(store.scored("z").await, vec![("m".to_string(), 5)]);
    }
}
