//! Per-connection session actor.
//!
//! A [`Session`] is owned by the task reading one socket, so its
//! subscription map has a single writer and needs no lock. Replies and
//! pushed events leave through one bounded channel that a separate writer
//! task drains into the socket.
//!
//! # Subscriptions
//!
//! At most one subscription exists per store key and session. A repeated
//! `listen` is acknowledged without creating a second one, unless the
//! previous subscription already ended (for example on a `complete`
//! event), in which case it is replaced. Closing the session cancels every
//! subscription and waits for all of them to exit.
//!
//! A new subscription holds its first push until the `subscribed` ack is
//! queued, so the ack is always the first frame for that `requestId`.

use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;

use axum::extract::ws::Message;
use futures::FutureExt;
use futures::future::{Shared, join_all};
use streamhub_core::{Flow, ListenOptions, Subscription};
use streamhub_types::{
    ClientRequest, ConnectionId, Envelope, Inbound, ServerFrame, StreamEvent, StreamRange,
    StreamTarget, parse_inbound,
};
use tokio::sync::{mpsc, oneshot};

use crate::error::GatewayError;
use crate::state::{Gauge, GatewayState};

/// One client connection's subscriptions and outbound channel.
#[derive(Debug)]
pub struct Session {
    connection: ConnectionId,
    state: Arc<GatewayState>,
    outbound: mpsc::Sender<Message>,
    subscriptions: HashMap<String, Subscription>,
    /// Released once the reply to the current `listen` is queued.
    held: Option<oneshot::Sender<()>>,
    _live: Gauge,
}

impl Session {
    /// Start a session whose frames are written to `outbound`.
    pub fn new(state: Arc<GatewayState>, outbound: mpsc::Sender<Message>) -> Self {
        let live = state.track_session();
        Self {
            connection: ConnectionId::new(),
            state,
            outbound,
            subscriptions: HashMap::new(),
            held: None,
            _live: live,
        }
    }

    /// Identifier used in logs.
    pub const fn connection(&self) -> ConnectionId {
        self.connection
    }

    /// Number of streams this session tracks.
    pub fn subscription_count(&self) -> usize {
        self.subscriptions.len()
    }

    /// Handle one text frame and send the reply. Returns `false` once the
    /// outbound channel is closed.
    pub async fn handle_text(&mut self, text: &str) -> bool {
        let Inbound { envelope, request } = parse_inbound(text);
        let reply = match request {
            Ok(request) => {
                tracing::debug!(connection = %self.connection, kind = request.kind(), "request");
                self.dispatch(request, &envelope).await
            }
            Err(e) => Err(GatewayError::from(e)),
        };
        let frame = reply.unwrap_or_else(|e| {
            tracing::debug!(connection = %self.connection, error = %e, "request failed");
            e.into_frame()
        });
        let open = send(&self.outbound, &frame.with_envelope(&envelope)).await;
        if let Some(gate) = self.held.take()
            && gate.send(()).is_err()
        {
            tracing::debug!(connection = %self.connection, "subscription ended before its ack");
        }
        open
    }

    /// Cancel every subscription and wait for all of them to exit.
    pub async fn close(mut self) {
        let subscriptions: Vec<Subscription> =
            self.subscriptions.drain().map(|(_, sub)| sub).collect();
        let count = subscriptions.len();
        join_all(subscriptions.into_iter().map(Subscription::cancel_and_join)).await;
        tracing::info!(connection = %self.connection, subscriptions = count, "session closed");
    }

    async fn dispatch(
        &mut self,
        request: ClientRequest,
        envelope: &Envelope,
    ) -> Result<ServerFrame, GatewayError> {
        let state = Arc::clone(&self.state);
        let hub = state.hub();
        let frame = match request {
            ClientRequest::Listen(target) => return self.listen(target, envelope).await,
            ClientRequest::Unlisten(target) => self.unlisten(&target).await,
            ClientRequest::Publish(req) => {
                hub.scoped(req.ignore_prefix)
                    .publish(&req.stream, &req.event_type, &req.data)
                    .await?;
                ServerFrame::published(&req.stream)
            }
            ClientRequest::GetStreamValues(req) => {
                let range =
                    StreamRange::parse(req.start.as_deref(), req.end.as_deref(), req.count)?;
                let values = hub
                    .scoped(req.ignore_prefix)
                    .get_stream_values(&req.stream, &range)
                    .await?;
                ServerFrame::values(values)
            }
            ClientRequest::GetVal(req) => {
                let value = hub
                    .scoped(req.ignore_prefix)
                    .get_val::<serde_json::Value>(&req.key)
                    .await?;
                ServerFrame::value(value)
            }
            ClientRequest::SetVal(req) => {
                hub.scoped(req.ignore_prefix)
                    .set_val(&req.key, &req.value)
                    .await?;
                ServerFrame::ack()
            }
            ClientRequest::GetRawVal(req) => {
                let raw = hub.scoped(req.ignore_prefix).get_raw_val(&req.key).await?;
                ServerFrame::value(raw.map(serde_json::Value::String))
            }
            ClientRequest::DelKey(req) => {
                hub.scoped(req.ignore_prefix).del_key(&req.key).await?;
                ServerFrame::ack()
            }
            ClientRequest::DelKeys(req) => {
                hub.scoped(req.ignore_prefix).del_keys(&req.pattern).await?;
                ServerFrame::ack()
            }
        };
        Ok(frame)
    }

    async fn listen(
        &mut self,
        target: StreamTarget,
        envelope: &Envelope,
    ) -> Result<ServerFrame, GatewayError> {
        let hub = self.state.hub().scoped(target.ignore_prefix);
        let key = hub.key(&target.stream);

        if let Some(existing) = self.subscriptions.remove(&key) {
            if !existing.is_finished() {
                self.subscriptions.insert(key, existing);
                return Ok(ServerFrame::subscribed(&target.stream));
            }
            let end = existing.join().await;
            tracing::debug!(connection = %self.connection, stream = %key, ?end, "replacing finished subscription");
        }

        let (gate, acked) = oneshot::channel();
        let forwarder = Forwarder {
            stream: target.stream.clone(),
            envelope: envelope.clone(),
            outbound: self.outbound.clone(),
            acked: acked.shared(),
            _active: self.state.track_subscription(),
        };
        let subscription = hub
            .listen(
                &target.stream,
                move |event: StreamEvent| forwarder.forward(&event),
                ListenOptions::latest(),
            )
            .await?;
        tracing::info!(connection = %self.connection, stream = %key, "subscribed");
        self.subscriptions.insert(key, subscription);
        self.held = Some(gate);
        Ok(ServerFrame::subscribed(&target.stream))
    }

    async fn unlisten(&mut self, target: &StreamTarget) -> ServerFrame {
        let key = self
            .state
            .hub()
            .scoped(target.ignore_prefix)
            .key(&target.stream);
        if let Some(subscription) = self.subscriptions.remove(&key) {
            let end = subscription.cancel_and_join().await;
            tracing::info!(connection = %self.connection, stream = %key, ?end, "unsubscribed");
        }
        ServerFrame::unsubscribed(&target.stream)
    }
}

/// Turns stream events into push frames on one session's channel.
struct Forwarder {
    stream: String,
    envelope: Envelope,
    outbound: mpsc::Sender<Message>,
    acked: Shared<oneshot::Receiver<()>>,
    _active: Gauge,
}

impl Forwarder {
    fn forward(&self, event: &StreamEvent) -> impl Future<Output = Flow> + Send + use<> {
        let frame = ServerFrame::event(&self.stream, event).with_envelope(&self.envelope);
        let outbound = self.outbound.clone();
        let acked = self.acked.clone();
        async move {
            // A dropped gate means the session went away before acking.
            if acked.await.is_err() {
                return Flow::Stop;
            }
            if send(&outbound, &frame).await {
                Flow::Continue
            } else {
                Flow::Stop
            }
        }
    }
}

/// Queue `frame` for the socket; `false` when the writer is gone.
async fn send(outbound: &mpsc::Sender<Message>, frame: &ServerFrame) -> bool {
    match serde_json::to_string(frame) {
        Ok(text) => outbound.send(Message::Text(text.into())).await.is_ok(),
        Err(e) => {
            tracing::warn!(error = %e, "failed to encode frame");
            true
        }
    }
}
