#![cfg(feature = "integration")]

use std::path::Path;
use std::time::{SystemTime, UNIX_EPOCH};

use frontier_core::mover::DelayedMoveScript;
use frontier_core::queue::{QueueStore, RedisQueueStore};

async fn connect() -> RedisQueueStore {
    let host = std::env::var("REDIS_HOST").unwrap_or_else(|_| "localhost".into());
    let port = std::env::var("REDIS_PORT")
        .ok()
        .and_then(|p| p.parse().ok())
        .unwrap_or(6379);
    let script = DelayedMoveScript::load(&Path::new(env!("CARGO_MANIFEST_DIR")).join("../lua"))
        .expect("shipped script");
    RedisQueueStore::connect(&host, port, &script)
        .await
        .expect("redis available")
}

/// Hash-tagged key names unique to one test run.
fn keys(name: &str) -> (String, String) {
    let nonce = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .expect("clock")
        .as_nanos();
    (
        format!("test_{name}_from{{{nonce}}}"),
        format!("test_{name}_to{{{nonce}}}"),
    )
}

#[tokio::test]
async fn script_moves_due_members_in_score_order() {
    let store = connect().await;
    let (from, to) = keys("move");
    let client = redis::Client::open(format!(
        "redis://{}:{}/",
        std::env::var("REDIS_HOST").unwrap_or_else(|_| "localhost".into()),
        std::env::var("REDIS_PORT").unwrap_or_else(|_| "6379".into())
    ))
    .expect("client");
    let mut conn = client
        .get_multiplexed_async_connection()
        .await
        .expect("connection");
    redis::cmd("ZADD")
        .arg(&from)
        .arg(30)
        .arg("c")
        .arg(10)
        .arg("a")
        .arg(20)
        .arg("b")
        .query_async::<()>(&mut conn)
        .await
        .expect("seed");

    assert_eq!(store.move_due(&from, &to, 20).await, Ok(2));
    assert_eq!(store.move_due(&from, &to, 20).await, Ok(0));
    assert_eq!(store.peek(&to, 10).await, Ok(vec!["a".to_string(), "b".to_string()]));

    store.acknowledge(&to, &["a".into(), "b".into()]).await.expect("ack");
    assert_eq!(store.peek(&to, 10).await, Ok(Vec::new()));
    redis::cmd("DEL")
        .arg(&from)
        .query_async::<()>(&mut conn)
        .await
        .expect("cleanup");
}

#[tokio::test]
async fn pop_push_and_hash_reads() {
    let store = connect().await;
    let (list, _) = keys("list");

    store.push_back(&list, "one").await.expect("push");
    store.push_back(&list, "two").await.expect("push");
    assert_eq!(store.pop_front(&list).await, Ok(Some("one".to_string())));
    assert_eq!(store.pop_front(&list).await, Ok(Some("two".to_string())));
    assert_eq!(store.pop_front(&list).await, Ok(None));

    assert_eq!(store.hash_fields("JEID:definitely-not-there").await, Ok(None));
}
