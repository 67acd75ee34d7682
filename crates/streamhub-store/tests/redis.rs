//! Integration tests for the Redis backend.
//!
//! These tests require a live Redis-compatible server. Run with:
//!
//! ```bash
//! docker compose up -d
//! cargo test -p streamhub-store -- --ignored
//! docker compose down
//! ```
//!
//! All tests are marked `#[ignore]` so they are skipped during normal
//! `cargo test` runs. Each test works under its own random key prefix.

#![allow(
    clippy::expect_used,
    clippy::unwrap_used,
    clippy::missing_panics_doc,
    clippy::indexing_slicing
)]

use std::time::Duration;

use fred::prelude::*;
use fred::types::client::{ClientKillFilter, ClientKillType};
use streamhub_store::{EventLog, KeyedStore, RedisStore, decode_entries};
use streamhub_types::{EntryId, StreamRange};

/// Redis connection URL for the local Docker instance.
const REDIS_URL: &str = "redis://localhost:6379";

async fn connect() -> RedisStore {
    RedisStore::connect(REDIS_URL)
        .await
        .expect("Failed to connect to Redis -- is Docker running?")
}

fn scoped(name: &str) -> String {
    format!("streamhub-test:{}:{name}", uuid::Uuid::now_v7())
}

#[tokio::test]
#[ignore = "requires live Redis instance (docker compose up -d)"]
async fn redis_set_get_del() {
    let store = connect().await;
    let key = scoped("key");

    store.set(&key, "{\"a\":1}").await.unwrap();
    assert_eq!(store.get(&key).await.unwrap().as_deref(), Some("{\"a\":1}"));
    assert_eq!(store.del(&key).await.unwrap(), 1);
    assert_eq!(store.get(&key).await.unwrap(), None);
}

#[tokio::test]
#[ignore = "requires live Redis instance (docker compose up -d)"]
async fn redis_append_and_range_in_order() {
    let store = connect().await;
    let stream = scoped("stream");

    let mut ids = Vec::new();
    for n in 0..5 {
        ids.push(
            store
                .append(&stream, "n", &n.to_string())
                .await
                .unwrap(),
        );
    }
    let events = decode_entries(&stream, store.read_range(&stream, &StreamRange::all()).await.unwrap());
    assert_eq!(events.iter().map(|e| e.id).collect::<Vec<_>>(), ids);
    assert_eq!(events[4].data, serde_json::json!(4));
    assert_eq!(store.last_id(&stream).await.unwrap(), ids.last().copied());

    store.del(&stream).await.unwrap();
}

#[tokio::test]
#[ignore = "requires live Redis instance (docker compose up -d)"]
async fn redis_reader_blocks_then_receives() {
    let store = connect().await;
    let stream = scoped("tail");

    let mut reader = store.open_reader().await.unwrap();
    let writer = store.clone();
    let writer_stream = stream.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(100)).await;
        writer.append(&writer_stream, "late", "{}").await.unwrap();
    });

    let batch = tokio::time::timeout(
        Duration::from_secs(5),
        reader.read_after(&stream, EntryId::ZERO),
    )
    .await
    .expect("reader never woke")
    .unwrap();
    assert_eq!(batch.len(), 1);
    reader.close().await;

    store.del(&stream).await.unwrap();
}

#[tokio::test]
#[ignore = "requires live Redis instance (docker compose up -d)"]
async fn redis_close_releases_parked_reader() {
    let store = connect().await;
    let stream = scoped("parked");

    let mut reader = store.open_reader().await.unwrap();
    let wait = tokio::time::timeout(
        Duration::from_millis(200),
        reader.read_after(&stream, EntryId::ZERO),
    )
    .await;
    assert!(wait.is_err(), "nothing was appended, the read must still be waiting");

    tokio::time::timeout(Duration::from_secs(5), reader.close())
        .await
        .expect("close hung on a parked reader");
}

#[tokio::test]
#[ignore = "requires live Redis instance (docker compose up -d)"]
async fn redis_reader_recovers_after_connections_are_killed() {
    let store = connect().await;
    let stream = scoped("reconnect");
    let mut reader = store.open_reader().await.unwrap();

    // Drop every other normal connection, the shared one and the reader's.
    let killer = connect().await;
    let killed: i64 = killer
        .client()
        .client_kill(vec![
            ClientKillFilter::Type(ClientKillType::Normal),
            ClientKillFilter::SkipMe(true),
        ])
        .await
        .unwrap();
    assert!(killed >= 2, "expected the store and reader connections to drop");

    let id = tokio::time::timeout(Duration::from_secs(10), async {
        loop {
            match store.append(&stream, "after-kill", "1").await {
                Ok(id) => break id,
                Err(e) => {
                    assert!(e.is_transient(), "unexpected error: {e}");
                    tokio::time::sleep(Duration::from_millis(50)).await;
                }
            }
        }
    })
    .await
    .expect("shared connection never came back");

    let batch = tokio::time::timeout(Duration::from_secs(10), async {
        loop {
            match reader.read_after(&stream, EntryId::ZERO).await {
                Ok(batch) => break batch,
                Err(e) => {
                    assert!(e.is_transient(), "unexpected error: {e}");
                    tokio::time::sleep(Duration::from_millis(50)).await;
                }
            }
        }
    })
    .await
    .expect("tail reader never came back");
    assert_eq!(batch.len(), 1);
    assert_eq!(batch[0].id, id);

    reader.close().await;
    store.del(&stream).await.unwrap();
}

#[tokio::test]
#[ignore = "requires live Redis instance (docker compose up -d)"]
async fn redis_pattern_delete() {
    let store = connect().await;
    let base = scoped("pattern");

    store.set(&format!("{base}:a"), "1").await.unwrap();
    store.set(&format!("{base}:b"), "1").await.unwrap();
    store.append(&format!("{base}:s"), "t", "{}").await.unwrap();

    let keys = store.keys(&format!("{base}:*")).await.unwrap();
    assert_eq!(keys.len(), 3);
    assert_eq!(store.del_matching(&format!("{base}:*")).await.unwrap(), 3);
    assert!(store.keys(&format!("{base}:*")).await.unwrap().is_empty());
}
