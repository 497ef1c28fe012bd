use std::collections::{BTreeSet, HashMap};
use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use redis::{AsyncCommands, RedisError, Script, aio::ConnectionManager};
use tracing::{debug, info, instrument};

use super::QueueStore;
use crate::error::{QueueResult, QueueStoreError};
use crate::mover::DelayedMoveScript;

const SCAN_BATCH: usize = 100;

/// Queue store backed by Redis. Cheap to clone; every clone shares one
/// multiplexed, self-reconnecting connection.
#[derive(Clone)]
pub struct RedisQueueStore {
    conn: ConnectionManager,
    move_script: Arc<Script>,
}

impl fmt::Debug for RedisQueueStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RedisQueueStore")
            .field("connection", &"ConnectionManager")
            .field("move_script", &self.move_script.get_hash())
            .finish()
    }
}

/// Only a stream that ended or reset mid-command is recoverable. A server
/// that refuses or never answers connections is fatal.
fn is_dropped_stream(err: &RedisError) -> bool {
    err.is_connection_dropped() && !err.is_connection_refusal() && !err.is_timeout()
}

fn classify(command: &'static str, err: RedisError) -> QueueStoreError {
    if is_dropped_stream(&err) {
        QueueStoreError::ConnectionDropped(format!("{command}: {err}"))
    } else {
        QueueStoreError::command(command, err.to_string())
    }
}

impl RedisQueueStore {
    /// Connect, verify the server answers, and register the delayed-move
    /// script so cycles can run it by hash.
    pub async fn connect(host: &str, port: u16, script: &DelayedMoveScript) -> QueueResult<Self> {
        let url = format!("redis://{host}:{port}/");
        info!("Connecting to Redis at {}", url);

        let client = redis::Client::open(url.as_str())
            .map_err(|e| QueueStoreError::command("CONNECT", format!("invalid Redis address {url}: {e}")))?;
        let mut conn = ConnectionManager::new(client)
            .await
            .map_err(|e| classify("CONNECT", e))?;

        redis::cmd("PING")
            .query_async::<String>(&mut conn)
            .await
            .map_err(|e| classify("PING", e))?;

        let move_script = Script::new(script.source());
        let sha: String = redis::cmd("SCRIPT")
            .arg("LOAD")
            .arg(script.source())
            .query_async(&mut conn)
            .await
            .map_err(|e| QueueStoreError::Script(format!("failed to load {}: {e}", script.path().display())))?;
        if sha != move_script.get_hash() {
            return Err(QueueStoreError::Script(format!(
                "server returned sha {sha} for {}, expected {}",
                script.path().display(),
                move_script.get_hash()
            )));
        }

        info!(script = %script.path().display(), sha = %sha, "Connected to Redis, delayed move script loaded");

        Ok(Self {
            conn,
            move_script: Arc::new(move_script),
        })
    }
}

#[async_trait]
impl QueueStore for RedisQueueStore {
    #[instrument(level = "debug", skip(self))]
    async fn move_due(&self, from: &str, to: &str, now_ms: i64) -> QueueResult<u64> {
        let mut conn = self.conn.clone();
        let moved: i64 = self
            .move_script
            .key(from)
            .key(to)
            .arg(now_ms)
            .invoke_async(&mut conn)
            .await
            .map_err(|e| {
                if e.is_io_error() {
                    classify("EVALSHA", e)
                } else {
                    QueueStoreError::Script(e.to_string())
                }
            })?;
        Ok(moved.max(0) as u64)
    }

    async fn pop_front(&self, list: &str) -> QueueResult<Option<String>> {
        let mut conn = self.conn.clone();
        conn.lpop(list, None)
            .await
            .map_err(|e| classify("LPOP", e))
    }

    async fn push_back(&self, list: &str, member: &str) -> QueueResult<()> {
        let mut conn = self.conn.clone();
        conn.rpush::<_, _, ()>(list, member)
            .await
            .map_err(|e| classify("RPUSH", e))
    }

    async fn peek(&self, list: &str, limit: usize) -> QueueResult<Vec<String>> {
        if limit == 0 {
            return Ok(Vec::new());
        }
        let mut conn = self.conn.clone();
        conn.lrange(list, 0, limit as isize - 1)
            .await
            .map_err(|e| classify("LRANGE", e))
    }

    #[instrument(level = "debug", skip(self, members), fields(count = members.len()))]
    async fn acknowledge(&self, list: &str, members: &[String]) -> QueueResult<()> {
        if members.is_empty() {
            return Ok(());
        }
        let mut pipe = redis::pipe();
        for member in members {
            pipe.lrem(list, 1, member).ignore();
        }
        let mut conn = self.conn.clone();
        pipe.query_async::<()>(&mut conn)
            .await
            .map_err(|e| classify("LREM", e))
    }

    async fn scan_prefix(&self, prefix: &str) -> QueueResult<Vec<String>> {
        let pattern = format!("{prefix}*");
        let mut conn = self.conn.clone();
        // SCAN may return a key more than once
        let mut found = BTreeSet::new();
        let mut cursor: u64 = 0;
        loop {
            let (next, keys): (u64, Vec<String>) = redis::cmd("SCAN")
                .arg(cursor)
                .arg("MATCH")
                .arg(&pattern)
                .arg("COUNT")
                .arg(SCAN_BATCH)
                .query_async(&mut conn)
                .await
                .map_err(|e| classify("SCAN", e))?;
            found.extend(keys);
            cursor = next;
            if cursor == 0 {
                break;
            }
        }
        debug!(pattern = %pattern, keys = found.len(), "scanned keys");
        Ok(found.into_iter().collect())
    }

    async fn hash_fields(&self, key: &str) -> QueueResult<Option<HashMap<String, String>>> {
        let mut conn = self.conn.clone();
        let fields: HashMap<String, String> = conn
            .hgetall(key)
            .await
            .map_err(|e| classify("HGETALL", e))?;
        // Redis never stores an empty hash, so no fields means the key is gone
        if fields.is_empty() {
            Ok(None)
        } else {
            Ok(Some(fields))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io;

    fn io_failure(kind: io::ErrorKind) -> RedisError {
        io::Error::from(kind).into()
    }

    #[test]
    fn stream_end_and_reset_are_transient() {
        for kind in [
            io::ErrorKind::UnexpectedEof,
            io::ErrorKind::ConnectionReset,
            io::ErrorKind::BrokenPipe,
        ] {
            let err = classify("LPOP", io_failure(kind));
            assert!(
                matches!(err, QueueStoreError::ConnectionDropped(_)),
                "{kind:?} gave {err:?}"
            );
            assert!(err.is_transient());
        }
    }

    #[test]
    fn unreachable_server_is_fatal() {
        for kind in [io::ErrorKind::ConnectionRefused, io::ErrorKind::TimedOut] {
            let err = classify("LPOP", io_failure(kind));
            assert!(
                matches!(err, QueueStoreError::Command { command: "LPOP", .. }),
                "{kind:?} gave {err:?}"
            );

            let cycle = crate::ReconcileError::Queue {
                context: "pop timed out crawl execution",
                completed: 0,
                source: err,
            };
            assert!(!cycle.is_transient());
        }
    }

    #[test]
    fn server_replies_are_fatal() {
        let reply = RedisError::from((redis::ErrorKind::Parse, "unexpected reply"));
        assert!(!classify("HGETALL", reply).is_transient());
    }
}
