//! `GatewayClient` against a gateway on a real TCP listener.

#![allow(
    clippy::expect_used,
    clippy::unwrap_used,
    clippy::missing_panics_doc,
    clippy::arithmetic_side_effects
)]

use std::sync::Arc;
use std::time::Duration;

use futures::StreamExt;
use serde_json::{Value, json};
use streamhub_core::{GatewayConfig, Hub};
use streamhub_gateway::{ClientError, GatewayClient, GatewayHandle, GatewayState, spawn_gateway};
use streamhub_store::MemoryStore;
use streamhub_types::StreamRange;
use tokio::net::TcpListener;

const WAIT: Duration = Duration::from_secs(2);

async fn start() -> (Arc<GatewayState>, GatewayHandle) {
    let hub = Hub::with_prefix(Arc::new(MemoryStore::new()), "client");
    let config = GatewayConfig {
        host: "127.0.0.1".to_owned(),
        port: 0,
        ..GatewayConfig::default()
    };
    let state = Arc::new(GatewayState::new(hub, config));
    let handle = spawn_gateway(Arc::clone(&state)).await.unwrap();
    (state, handle)
}

async fn connect(handle: &GatewayHandle) -> GatewayClient {
    GatewayClient::connect(&format!("ws://{}/ws", handle.addr))
        .await
        .unwrap()
}

async fn wait_until(check: impl Fn() -> bool) {
    tokio::time::timeout(WAIT, async {
        while !check() {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("condition not reached");
}

#[tokio::test]
async fn published_events_reach_a_listener() {
    let (_state, handle) = start().await;
    let subscriber = connect(&handle).await;
    let publisher = connect(&handle).await;

    let mut chat = subscriber.listen("chat").await.unwrap();
    assert_eq!(chat.stream(), "chat");
    publisher
        .publish("chat", "message", &json!({"text": "hello"}))
        .await
        .unwrap();

    let event = tokio::time::timeout(WAIT, chat.recv())
        .await
        .expect("timed out")
        .expect("listener closed");
    assert_eq!(event.event_type, "message");
    assert_eq!(event.data, json!({"text": "hello"}));
}

#[tokio::test]
async fn values_can_be_set_read_and_deleted() {
    let (_state, handle) = start().await;
    let client = connect(&handle).await;

    client.set_val("settings", &json!({"theme": "dark"})).await.unwrap();
    let stored: Option<Value> = client.get_val("settings").await.unwrap();
    assert_eq!(stored, Some(json!({"theme": "dark"})));
    assert_eq!(
        client.get_raw_val("settings").await.unwrap().as_deref(),
        Some(r#"{"theme":"dark"}"#)
    );

    client.del_key("settings").await.unwrap();
    assert_eq!(client.get_val::<Value>("settings").await.unwrap(), None);
    assert_eq!(client.get_raw_val("settings").await.unwrap(), None);

    client.set_val("cache:a", &1).await.unwrap();
    client.set_val("cache:b", &2).await.unwrap();
    client.set_val("keep", &3).await.unwrap();
    client.del_keys("cache:*").await.unwrap();
    assert_eq!(client.get_val::<u32>("cache:a").await.unwrap(), None);
    assert_eq!(client.get_val::<u32>("cache:b").await.unwrap(), None);
    assert_eq!(client.get_val::<u32>("keep").await.unwrap(), Some(3));
}

#[tokio::test]
async fn stream_history_is_returned_in_order() {
    let (_state, handle) = start().await;
    let client = connect(&handle).await;

    for n in 0..3 {
        client.publish("orders", "created", &json!({"n": n})).await.unwrap();
    }
    let history = client
        .get_stream_values("orders", &StreamRange::all())
        .await
        .unwrap();
    let numbers: Vec<Value> = history.iter().map(|e| e.data["n"].clone()).collect();
    assert_eq!(numbers, vec![json!(0), json!(1), json!(2)]);
    assert!(history.windows(2).all(|w| w[0].id < w[1].id));
}

#[tokio::test]
async fn server_subscription_lives_until_the_last_listener_leaves() {
    let (state, handle) = start().await;
    let client = connect(&handle).await;

    let first = client.listen("news").await.unwrap();
    let mut second = client.listen("news").await.unwrap();
    wait_until(|| state.active_subscriptions() == 1).await;

    client.unlisten(first).await.unwrap();
    client.publish("news", "headline", &"still here").await.unwrap();
    let event = tokio::time::timeout(WAIT, second.recv())
        .await
        .expect("timed out")
        .expect("listener closed");
    assert_eq!(event.data, json!("still here"));
    assert_eq!(state.active_subscriptions(), 1);

    client.unlisten(second).await.unwrap();
    wait_until(|| state.active_subscriptions() == 0).await;
}

#[tokio::test]
async fn gateway_errors_are_returned_to_the_caller() {
    let (_state, handle) = start().await;
    let client = connect(&handle).await;

    let err = client.publish("", "message", &json!({})).await.unwrap_err();
    assert!(matches!(err, ClientError::Server(_)), "{err:?}");

    // The connection stays usable after a failed request.
    client.set_val("after", &true).await.unwrap();
    assert_eq!(client.get_val::<bool>("after").await.unwrap(), Some(true));
}

#[tokio::test]
async fn close_ends_the_server_session() {
    let (state, handle) = start().await;
    let client = connect(&handle).await;
    let _feed = client.listen("feed").await.unwrap();
    wait_until(|| state.live_sessions() == 1 && state.active_subscriptions() == 1).await;

    client.close().await;
    wait_until(|| state.live_sessions() == 0 && state.active_subscriptions() == 0).await;
}

#[tokio::test]
async fn pending_requests_fail_when_the_socket_drops() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    // Accepts one socket, reads one request, then hangs up without answering.
    let server = tokio::spawn(async move {
        let (tcp, _) = listener.accept().await.unwrap();
        let mut socket = tokio_tungstenite::accept_async(tcp).await.unwrap();
        let _request = socket.next().await;
    });

    let client = GatewayClient::connect(&format!("ws://{addr}/ws"))
        .await
        .unwrap();
    let err = client.set_val("k", &1).await.unwrap_err();
    assert!(matches!(err, ClientError::Closed), "{err:?}");
    server.await.unwrap();

    wait_until(|| !client.is_connected()).await;
    assert!(matches!(
        client.get_val::<u32>("k").await,
        Err(ClientError::Closed)
    ));
}
