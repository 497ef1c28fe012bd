//! Delayed move: the one atomic primitive everything else builds on.
//!
//! Members of a scored queue become due once their score (a millisecond
//! epoch timestamp) is at or before "now". A move relocates every due member
//! to the tail of a list in a single server-side script execution, so a
//! concurrent reader never observes a member in both queues or in neither.
//! Running it again with a later "now" only picks up newly due members.

use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use tracing::trace;

use crate::error::{QueueResult, QueueStoreError};
use crate::keys::QueuePair;
use crate::queue::QueueStore;

/// File name of the delayed-move script inside the configured script
/// directory.
pub const DELAYED_MOVE_SCRIPT: &str = "chg_delayed_queue.lua";

/// Source of the delayed-move Lua script, read from disk at startup.
#[derive(Clone)]
pub struct DelayedMoveScript {
    path: PathBuf,
    source: String,
}

impl fmt::Debug for DelayedMoveScript {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DelayedMoveScript")
            .field("path", &self.path)
            .field("bytes", &self.source.len())
            .finish()
    }
}

impl DelayedMoveScript {
    /// Read [`DELAYED_MOVE_SCRIPT`] from `dir`.
    pub fn load(dir: &Path) -> QueueResult<Self> {
        let path = dir.join(DELAYED_MOVE_SCRIPT);
        let source = std::fs::read_to_string(&path).map_err(|e| {
            QueueStoreError::Script(format!("failed to read {}: {e}", path.display()))
        })?;
        if source.trim().is_empty() {
            return Err(QueueStoreError::Script(format!(
                "{} is empty",
                path.display()
            )));
        }
        Ok(Self { path, source })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn source(&self) -> &str {
        &self.source
    }
}

/// Runs delayed moves against a queue store.
#[derive(Clone)]
pub struct DelayedMover {
    queues: Arc<dyn QueueStore>,
}

impl fmt::Debug for DelayedMover {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DelayedMover").finish_non_exhaustive()
    }
}

impl DelayedMover {
    pub fn new(queues: Arc<dyn QueueStore>) -> Self {
        Self { queues }
    }

    /// Move every member of `pair.from` due at `now_ms` to `pair.to`.
    pub async fn move_due(&self, pair: QueuePair, now_ms: i64) -> QueueResult<u64> {
        let moved = self.queues.move_due(pair.from, pair.to, now_ms).await?;
        trace!(from = pair.from, to = pair.to, now_ms, moved, "delayed move");
        Ok(moved)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::keys::{CHG_BUSY, CHG_READY, CHG_TIMEOUT, CHG_WAIT};
    use crate::model::HostGroupState;
    use crate::queue::InMemoryQueueStore;
    use std::io::Write;

    fn mover(store: &Arc<InMemoryQueueStore>) -> DelayedMover {
        DelayedMover::new(Arc::clone(store) as Arc<dyn QueueStore>)
    }

    #[tokio::test]
    async fn moves_only_due_members_and_is_idempotent() {
        let store = Arc::new(InMemoryQueueStore::new());
        store.add_scored(CHG_WAIT, "a", 10).await;
        store.add_scored(CHG_WAIT, "b", 20).await;
        store.add_scored(CHG_WAIT, "c", 30).await;
        let mover = mover(&store);

        let moved = mover.move_due(QueuePair::WAIT_TO_READY, 20).await.unwrap();
        assert_eq!(moved, 2);
        assert_eq!(store.list(CHG_READY).await, vec!["a", "b"]);
        assert_eq!(store.scored(CHG_WAIT).await, vec![("c".to_string(), 30)]);

        let again = mover.move_due(QueuePair::WAIT_TO_READY, 20).await.unwrap();
        assert_eq!(again, 0);
        assert_eq!(store.list(CHG_READY).await.len(), 2);
    }

    #[tokio::test]
    async fn nothing_due_is_not_an_error() {
        let store = Arc::new(InMemoryQueueStore::new());
        store.add_scored(CHG_BUSY, "x", 1_000).await;
        let moved = mover(&store)
            .move_due(QueuePair::BUSY_TO_TIMEOUT, 999)
            .await
            .unwrap();
        assert_eq!(moved, 0);
        assert!(store.list(CHG_TIMEOUT).await.is_empty());
    }

    #[tokio::test]
    async fn moved_members_append_in_score_order() {
        let store = Arc::new(InMemoryQueueStore::new());
        store.push_back(CHG_READY, "existing").await.unwrap();
        store.add_scored(CHG_WAIT, "late", 50).await;
        store.add_scored(CHG_WAIT, "early", 5).await;
        store.add_scored(CHG_WAIT, "tie-b", 20).await;
        store.add_scored(CHG_WAIT, "tie-a", 20).await;

        mover(&store)
            .move_due(QueuePair::WAIT_TO_READY, 100)
            .await
            .unwrap();

        assert_eq!(
            store.list(CHG_READY).await,
            vec!["existing", "early", "tie-a", "tie-b", "late"]
        );
    }

    #[tokio::test]
    async fn host_group_is_never_in_two_states() {
        let store = Arc::new(InMemoryQueueStore::new());
        let mover = mover(&store);
        for (i, chg) in ["h1", "h2", "h3", "h4"].iter().enumerate() {
            store.add_scored(CHG_WAIT, chg, (i as i64 + 1) * 10).await;
        }
        store.add_scored(CHG_BUSY, "h5", 15).await;

        for now in [0, 10, 15, 25, 40, 100] {
            mover.move_due(QueuePair::WAIT_TO_READY, now).await.unwrap();
            mover.move_due(QueuePair::BUSY_TO_TIMEOUT, now).await.unwrap();
            for chg in ["h1", "h2", "h3", "h4", "h5"] {
                let states = store.host_group_states(chg).await;
                assert_eq!(states.len(), 1, "{chg} at {now}: {states:?}");
            }
        }

        assert_eq!(
            store.host_group_states("h5").await,
            vec![HostGroupState::TimedOut]
        );
        assert_eq!(
            store.host_group_states("h4").await,
            vec![HostGroupState::Ready]
        );
    }

    #[test]
    fn script_loads_from_directory() {
        let dir = tempfile::tempdir().unwrap();
        let mut file = std::fs::File::create(dir.path().join(DELAYED_MOVE_SCRIPT)).unwrap();
        writeln!(file, "return 0").unwrap();

        let script = DelayedMoveScript::load(dir.path()).unwrap();
        assert_eq!(script.source().trim(), "return 0");
        assert!(script.path().starts_with(dir.path()));
        assert!(script.path().ends_with(DELAYED_MOVE_SCRIPT));
    }

    #[test]
    fn blank_script_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join(DELAYED_MOVE_SCRIPT), "  \n").unwrap();

        let err = DelayedMoveScript::load(dir.path()).unwrap_err();
        assert!(matches!(err, QueueStoreError::Script(message) if message.ends_with("is empty")));
    }

    #[test]
    fn missing_script_is_reported_with_path() {
        let err = DelayedMoveScript::load(Path::new("/nonexistent/frontier")).unwrap_err();
        match err {
            QueueStoreError::Script(message) => assert!(message.contains(DELAYED_MOVE_SCRIPT)),
            other => panic!("unexpected error {other:?}"),
        }
    }

    #[test]
    fn shipped_script_is_loadable() {
        let dir = Path::new(env!("CARGO_MANIFEST_DIR")).join("../lua");
        let script = DelayedMoveScript::load(&dir).unwrap();
        assert!(script.source().contains("ZRANGEBYSCORE"));
        assert!(script.source().contains("RPUSH"));
    }
}
