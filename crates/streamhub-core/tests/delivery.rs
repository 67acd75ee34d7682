//! Delivery tests for `Hub::listen` against the in-process store.
//!
//! These run without external services.

#![allow(
    clippy::expect_used,
    clippy::unwrap_used,
    clippy::missing_panics_doc,
    clippy::indexing_slicing
)]

use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::json;
use streamhub_core::{Flow, Hub, HubConfig, ListenOptions, SubscriptionEnd};
use streamhub_store::{
    EventLog, KeyedStore, MemoryStore, RawEntry, StoreError, StoreResult, TailReader,
};
use streamhub_types::{EntryId, StreamEvent, StreamRange};
use tokio::sync::mpsc;

// =============================================================================
// Helpers
// =============================================================================

const WAIT: Duration = Duration::from_secs(2);

fn memory_hub(prefix: &str) -> (Arc<MemoryStore>, Hub) {
    let store = Arc::new(MemoryStore::new());
    let hub = Hub::with_prefix(store.clone(), prefix);
    (store, hub)
}

/// Handler that forwards every event into a channel.
fn forward(
    tx: mpsc::UnboundedSender<StreamEvent>,
) -> impl FnMut(StreamEvent) -> std::future::Ready<Flow> + Send + 'static {
    move |event| {
        let _ = tx.send(event);
        std::future::ready(Flow::Continue)
    }
}

async fn recv(rx: &mut mpsc::UnboundedReceiver<StreamEvent>) -> StreamEvent {
    tokio::time::timeout(WAIT, rx.recv())
        .await
        .expect("timed out waiting for an event")
        .expect("subscription dropped its handler")
}

async fn assert_quiet(rx: &mut mpsc::UnboundedReceiver<StreamEvent>) {
    let extra = tokio::time::timeout(Duration::from_millis(100), rx.recv()).await;
    assert!(
        !matches!(extra, Ok(Some(_))),
        "unexpected extra event: {extra:?}"
    );
}

// =============================================================================
// Ordering and positions
// =============================================================================

#[tokio::test]
async fn delivers_in_append_order() {
    let (_, hub) = memory_hub("app");
    let (tx, mut rx) = mpsc::unbounded_channel();
    let sub = hub
        .listen("numbers", forward(tx), ListenOptions::latest())
        .await
        .unwrap();

    let mut published = Vec::new();
    for n in 0..100 {
        published.push(hub.publish("numbers", "n", &n).await.unwrap());
    }
    for (n, id) in published.iter().enumerate() {
        let event = recv(&mut rx).await;
        assert_eq!(event.id, *id);
        assert_eq!(event.data, json!(n));
    }
    sub.cancel_and_join().await;
}

#[tokio::test]
async fn latest_skips_history_but_not_later_events() {
    let (_, hub) = memory_hub("app");
    hub.publish("chat", "message", &json!({"old": true}))
        .await
        .unwrap();

    let (tx, mut rx) = mpsc::unbounded_channel();
    let sub = hub
        .listen("chat", forward(tx), ListenOptions::latest())
        .await
        .unwrap();
    hub.publish("chat", "message", &json!({"old": false}))
        .await
        .unwrap();

    assert_eq!(recv(&mut rx).await.data, json!({"old": false}));
    assert_quiet(&mut rx).await;
    sub.cancel_and_join().await;
}

#[tokio::test]
async fn after_replays_history_then_follows() {
    let (_, hub) = memory_hub("app");
    let first = hub.publish("s", "a", &1).await.unwrap();
    hub.publish("s", "b", &2).await.unwrap();

    let (tx, mut rx) = mpsc::unbounded_channel();
    let sub = hub
        .listen("s", forward(tx), ListenOptions::after(first))
        .await
        .unwrap();
    hub.publish("s", "c", &3).await.unwrap();

    assert_eq!(recv(&mut rx).await.event_type, "b");
    assert_eq!(recv(&mut rx).await.event_type, "c");
    sub.cancel_and_join().await;
}

#[tokio::test]
async fn listen_on_missing_stream_waits_for_first_append() {
    let (_, hub) = memory_hub("");
    let (tx, mut rx) = mpsc::unbounded_channel();
    let sub = hub
        .listen("fresh", forward(tx), ListenOptions::latest())
        .await
        .unwrap();
    tokio::time::sleep(Duration::from_millis(20)).await;
    hub.publish("fresh", "first", &json!({})).await.unwrap();
    assert_eq!(recv(&mut rx).await.event_type, "first");
    sub.cancel_and_join().await;
}

// =============================================================================
// Namespacing
// =============================================================================

#[tokio::test]
async fn prefixes_isolate_streams_over_one_store() {
    let store = Arc::new(MemoryStore::new());
    let hub_a = Hub::with_prefix(store.clone(), "a");
    let hub_a_again = Hub::with_prefix(store.clone(), "a");
    let hub_b = Hub::with_prefix(store.clone(), "b");

    let (tx, mut rx) = mpsc::unbounded_channel();
    let sub = hub_a
        .listen("chat", forward(tx), ListenOptions::latest())
        .await
        .unwrap();

    hub_b.publish("chat", "message", &"from b").await.unwrap();
    hub_a_again.publish("chat", "message", &"from a").await.unwrap();

    assert_eq!(recv(&mut rx).await.data, json!("from a"));
    assert_quiet(&mut rx).await;
    sub.cancel_and_join().await;

    hub_a.set_val("k", &1).await.unwrap();
    assert_eq!(hub_a_again.get_val::<i32>("k").await.unwrap(), Some(1));
    assert_eq!(hub_b.get_val::<i32>("k").await.unwrap(), None);
}

// =============================================================================
// Malformed payloads
// =============================================================================

#[tokio::test]
async fn malformed_entries_are_skipped() {
    let (store, hub) = memory_hub("app");
    let (tx, mut rx) = mpsc::unbounded_channel();
    let sub = hub
        .listen("s", forward(tx), ListenOptions::latest())
        .await
        .unwrap();

    hub.publish("s", "good", &1).await.unwrap();
    store
        .append_raw("app:s", vec![("bad".to_owned(), "{nope".to_owned())])
        .await
        .unwrap();
    store.append_raw("app:s", Vec::new()).await.unwrap();
    hub.publish("s", "good", &2).await.unwrap();

    assert_eq!(recv(&mut rx).await.data, json!(1));
    assert_eq!(recv(&mut rx).await.data, json!(2));
    assert_quiet(&mut rx).await;
    sub.cancel_and_join().await;
}

#[tokio::test]
async fn batch_of_only_malformed_entries_does_not_wedge_the_loop() {
    let (store, hub) = memory_hub("");
    let (tx, mut rx) = mpsc::unbounded_channel();
    let sub = hub
        .listen("s", forward(tx), ListenOptions::latest())
        .await
        .unwrap();

    store
        .append_raw("s", vec![("bad".to_owned(), "{nope".to_owned())])
        .await
        .unwrap();
    tokio::time::sleep(Duration::from_millis(50)).await;
    hub.publish("s", "good", &"after").await.unwrap();

    assert_eq!(recv(&mut rx).await.data, json!("after"));
    assert_quiet(&mut rx).await;
    sub.cancel_and_join().await;
}

// =============================================================================
// Ending a subscription
// =============================================================================

#[tokio::test]
async fn handler_stop_ends_subscription() {
    let (_, hub) = memory_hub("app");
    let (tx, mut rx) = mpsc::unbounded_channel();
    let sub = hub
        .listen(
            "s",
            move |event: StreamEvent| {
                let stop = event.event_type == "last";
                let _ = tx.send(event);
                async move { if stop { Flow::Stop } else { Flow::Continue } }
            },
            ListenOptions::latest(),
        )
        .await
        .unwrap();

    hub.publish("s", "one", &1).await.unwrap();
    hub.publish("s", "last", &2).await.unwrap();
    hub.publish("s", "never", &3).await.unwrap();

    assert_eq!(recv(&mut rx).await.event_type, "one");
    assert_eq!(recv(&mut rx).await.event_type, "last");
    let end = tokio::time::timeout(WAIT, sub.join()).await.unwrap();
    assert_eq!(end, SubscriptionEnd::Stopped);
    assert_quiet(&mut rx).await;
}

#[tokio::test]
async fn complete_is_terminal_by_default() {
    let (_, hub) = memory_hub("app");
    let (tx, mut rx) = mpsc::unbounded_channel();
    let sub = hub
        .listen("job", forward(tx), ListenOptions::latest())
        .await
        .unwrap();

    hub.publish("job", "progress", &50).await.unwrap();
    hub.publish("job", "complete", &100).await.unwrap();
    hub.publish("job", "progress", &101).await.unwrap();

    assert_eq!(recv(&mut rx).await.event_type, "progress");
    assert_eq!(recv(&mut rx).await.event_type, "complete");
    let end = tokio::time::timeout(WAIT, sub.join()).await.unwrap();
    assert_eq!(end, SubscriptionEnd::Terminal("complete".to_owned()));
}

#[tokio::test]
async fn terminal_types_can_be_disabled() {
    let (_, hub) = memory_hub("app");
    let (tx, mut rx) = mpsc::unbounded_channel();
    let sub = hub
        .listen(
            "job",
            forward(tx),
            ListenOptions::latest().without_terminal_types(),
        )
        .await
        .unwrap();

    hub.publish("job", "complete", &1).await.unwrap();
    hub.publish("job", "more", &2).await.unwrap();

    assert_eq!(recv(&mut rx).await.event_type, "complete");
    assert_eq!(recv(&mut rx).await.event_type, "more");
    assert!(!sub.is_finished());
    sub.cancel_and_join().await;
}

#[tokio::test]
async fn cancel_interrupts_a_blocked_read() {
    let (_, hub) = memory_hub("app");
    let sub = hub
        .listen(
            "idle",
            |_event: StreamEvent| async { Flow::Continue },
            ListenOptions::latest(),
        )
        .await
        .unwrap();
    tokio::time::sleep(Duration::from_millis(20)).await;

    let end = tokio::time::timeout(WAIT, sub.cancel_and_join())
        .await
        .expect("cancel did not interrupt the blocked read");
    assert_eq!(end, SubscriptionEnd::Cancelled);
}

#[tokio::test]
async fn cancelling_one_subscriber_leaves_others_running() {
    let (_, hub) = memory_hub("app");
    let (tx_a, mut rx_a) = mpsc::unbounded_channel();
    let (tx_b, mut rx_b) = mpsc::unbounded_channel();
    let sub_a = hub
        .listen("s", forward(tx_a), ListenOptions::latest())
        .await
        .unwrap();
    let sub_b = hub
        .listen("s", forward(tx_b), ListenOptions::latest())
        .await
        .unwrap();

    sub_a.cancel_and_join().await;
    hub.publish("s", "after-cancel", &1).await.unwrap();

    assert_eq!(recv(&mut rx_b).await.event_type, "after-cancel");
    assert!(rx_a.recv().await.is_none());
    sub_b.cancel_and_join().await;
}

// =============================================================================
// End-to-end scenarios
// =============================================================================

#[tokio::test]
async fn scenario_chat_message() {
    let (_, hub) = memory_hub("app");
    let (tx, mut rx) = mpsc::unbounded_channel();
    let sub = hub
        .listen("chat", forward(tx), ListenOptions::latest())
        .await
        .unwrap();

    hub.publish("chat", "message", &json!({"user": "a", "text": "hi"}))
        .await
        .unwrap();

    let event = recv(&mut rx).await;
    assert_eq!(event.event_type, "message");
    assert_eq!(event.data, json!({"user": "a", "text": "hi"}));
    sub.cancel_and_join().await;
}

#[tokio::test]
async fn scenario_set_get_del() {
    let (_, hub) = memory_hub("app");
    hub.set_val("foo", "bar").await.unwrap();
    assert_eq!(hub.get_val::<String>("foo").await.unwrap().as_deref(), Some("bar"));
    assert!(hub.del_key("foo").await.unwrap());
    assert_eq!(hub.get_val::<String>("foo").await.unwrap(), None);
}

#[tokio::test]
async fn scenario_two_listeners_each_receive_once() {
    let (_, hub) = memory_hub("app");
    let (tx_a, mut rx_a) = mpsc::unbounded_channel();
    let (tx_b, mut rx_b) = mpsc::unbounded_channel();
    let sub_a = hub
        .listen("fan", forward(tx_a), ListenOptions::latest())
        .await
        .unwrap();
    let sub_b = hub
        .listen("fan", forward(tx_b), ListenOptions::latest())
        .await
        .unwrap();

    let id = hub.publish("fan", "e", &json!({})).await.unwrap();

    assert_eq!(recv(&mut rx_a).await.id, id);
    assert_eq!(recv(&mut rx_b).await.id, id);
    assert_quiet(&mut rx_a).await;
    assert_quiet(&mut rx_b).await;
    sub_a.cancel_and_join().await;
    sub_b.cancel_and_join().await;
}

#[tokio::test]
async fn stream_values_with_range_and_count() {
    let (store, hub) = memory_hub("app");
    let mut ids = Vec::new();
    for n in 0..10 {
        ids.push(hub.publish("h", "n", &n).await.unwrap());
    }
    store
        .append_raw("app:h", vec![("bad".to_owned(), "{".to_owned())])
        .await
        .unwrap();

    let all = hub.get_stream_values("h", &StreamRange::all()).await.unwrap();
    assert_eq!(all.len(), 10);

    let range = StreamRange::parse(Some(&ids[2].to_string()), None, Some(3)).unwrap();
    let some = hub.get_stream_values("h", &range).await.unwrap();
    assert_eq!(
        some.iter().map(|e| e.id).collect::<Vec<_>>(),
        ids[2..5].to_vec()
    );
}

#[tokio::test]
async fn del_keys_removes_streams_and_values_under_pattern() {
    let (store, hub) = memory_hub("app");
    hub.set_val("job:1:data", &1).await.unwrap();
    hub.publish("job:1:events", "start", &json!({})).await.unwrap();
    hub.unprefixed().set_val("job:1:data", &"outside").await.unwrap();

    assert_eq!(hub.del_keys("job:*").await.unwrap(), 2);
    assert_eq!(store.stream_len("app:job:1:events").await, 0);
    assert_eq!(
        hub.unprefixed().get_val::<String>("job:1:data").await.unwrap().as_deref(),
        Some("outside")
    );
}

// =============================================================================
// Transport failures
// =============================================================================

/// Store whose readers fail while `failures` is non-zero.
struct FlakyStore {
    inner: MemoryStore,
    failures: Arc<AtomicU32>,
}

fn injected() -> StoreError {
    StoreError::Redis(fred::error::Error::new(
        fred::error::ErrorKind::IO,
        "injected failure",
    ))
}

#[async_trait]
impl KeyedStore for FlakyStore {
    async fn get(&self, key: &str) -> StoreResult<Option<String>> {
        self.inner.get(key).await
    }
    async fn set(&self, key: &str, value: &str) -> StoreResult<()> {
        self.inner.set(key, value).await
    }
    async fn del(&self, key: &str) -> StoreResult<u64> {
        self.inner.del(key).await
    }
    async fn keys(&self, pattern: &str) -> StoreResult<Vec<String>> {
        self.inner.keys(pattern).await
    }
    async fn ping(&self) -> StoreResult<()> {
        if self.failures.load(Ordering::SeqCst) > 0 {
            return Err(injected());
        }
        Ok(())
    }
}

#[async_trait]
impl EventLog for FlakyStore {
    async fn append(&self, stream: &str, event_type: &str, payload: &str) -> StoreResult<EntryId> {
        self.inner.append(stream, event_type, payload).await
    }
    async fn read_range(&self, stream: &str, range: &StreamRange) -> StoreResult<Vec<RawEntry>> {
        self.inner.read_range(stream, range).await
    }
    async fn last_id(&self, stream: &str) -> StoreResult<Option<EntryId>> {
        self.inner.last_id(stream).await
    }
    async fn open_reader(&self) -> StoreResult<Box<dyn TailReader>> {
        Ok(Box::new(FlakyReader {
            inner: self.inner.open_reader().await?,
            failures: Arc::clone(&self.failures),
        }))
    }
}

struct FlakyReader {
    inner: Box<dyn TailReader>,
    failures: Arc<AtomicU32>,
}

#[async_trait]
impl TailReader for FlakyReader {
    async fn read_after(&mut self, stream: &str, after: EntryId) -> StoreResult<Vec<RawEntry>> {
        let failed = self
            .failures
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if failed {
            return Err(injected());
        }
        self.inner.read_after(stream, after).await
    }

    async fn close(self: Box<Self>) {
        self.inner.close().await;
    }
}

fn fast_retry() -> HubConfig {
    HubConfig {
        retry_initial_ms: 1,
        retry_max_ms: 4,
        ready_attempts: 3,
        ready_interval_ms: 1,
        ..HubConfig::with_prefix("app")
    }
}

#[tokio::test]
async fn transport_errors_retry_without_skipping() {
    let failures = Arc::new(AtomicU32::new(0));
    let store = Arc::new(FlakyStore {
        inner: MemoryStore::new(),
        failures: Arc::clone(&failures),
    });
    let hub = Hub::new(store, &fast_retry());

    let first = hub.publish("s", "a", &1).await.unwrap();
    hub.publish("s", "b", &2).await.unwrap();
    failures.store(3, Ordering::SeqCst);

    let (tx, mut rx) = mpsc::unbounded_channel();
    let sub = hub
        .listen("s", forward(tx), ListenOptions::after(EntryId::ZERO))
        .await
        .unwrap();
    assert_eq!(recv(&mut rx).await.id, first);
    assert_eq!(recv(&mut rx).await.event_type, "b");

    failures.store(2, Ordering::SeqCst);
    hub.publish("s", "c", &3).await.unwrap();
    assert_eq!(recv(&mut rx).await.event_type, "c");
    assert_quiet(&mut rx).await;
    sub.cancel_and_join().await;
}

#[tokio::test]
async fn wait_ready_gives_up_after_configured_attempts() {
    let store = Arc::new(FlakyStore {
        inner: MemoryStore::new(),
        failures: Arc::new(AtomicU32::new(1)),
    });
    let hub = Hub::new(store, &fast_retry());
    assert!(matches!(
        hub.wait_ready().await,
        Err(streamhub_core::HubError::NotReady { attempts: 3 })
    ));
}
