//! Client for the gateway's `WebSocket` protocol.
//!
//! [`GatewayClient`] connects with `tokio-tungstenite` and runs two tasks:
//! a writer draining a bounded channel into the socket, and a reader that
//! routes every incoming frame. Requests carry a generated `requestId`;
//! the reader hands the matching answer to the waiting caller. Pushed
//! events are routed by stream name to every [`Listener`] of that stream.
//!
//! ```text
//! caller --> encode + requestId --> writer task --> socket
//!   ^                                                 |
//!   +-- pending[requestId] <-- reader task <----------+
//!                                  |
//!                                  +--> listeners[stream] --> Listener
//! ```
//!
//! The connection is not re-established after it drops: pending requests
//! fail with [`ClientError::Closed`] and every listener ends.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use futures::stream::{SplitSink, SplitStream};
use futures::{SinkExt, StreamExt};
use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value;
use streamhub_types::{
    ClientRequest, KeyTarget, PatternTarget, PublishRequest, ServerFrame, SetValRequest,
    StreamEvent, StreamRange, StreamTarget, StreamValuesRequest,
};
use tokio::net::TcpStream;
use tokio::sync::{Mutex, mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async};
use tracing::{debug, trace, warn};

use crate::error::ClientError;

type Socket = WebSocketStream<MaybeTlsStream<TcpStream>>;
type Pending = Arc<Mutex<PendingReplies>>;
type Listeners = Arc<Mutex<HashMap<String, Vec<Slot>>>>;

/// Frames queued for the writer before requests wait.
const OUTBOUND_BUFFER: usize = 64;

/// How long a request waits for its answer by default.
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Requests waiting for their answer.
#[derive(Debug, Default)]
struct PendingReplies {
    /// Set once the reader has stopped; no answer can arrive after that.
    closed: bool,
    replies: HashMap<String, oneshot::Sender<ServerFrame>>,
}

/// One registered listener.
#[derive(Debug)]
struct Slot {
    id: u64,
    events: mpsc::UnboundedSender<StreamEvent>,
}

/// Events pushed for one stream.
///
/// Dropping a listener detaches it; the server subscription is released
/// once the last listener of the stream is gone.
#[derive(Debug)]
pub struct Listener {
    stream: String,
    id: u64,
    events: mpsc::UnboundedReceiver<StreamEvent>,
}

impl Listener {
    /// Stream this listener receives.
    pub fn stream(&self) -> &str {
        &self.stream
    }

    /// Next pushed event; `None` once the connection is gone.
    pub async fn recv(&mut self) -> Option<StreamEvent> {
        self.events.recv().await
    }
}

/// A connection to a streamhub gateway.
#[derive(Debug)]
pub struct GatewayClient {
    outbound: mpsc::Sender<Message>,
    pending: Pending,
    listeners: Listeners,
    next_id: AtomicU64,
    request_timeout: Duration,
    reader: JoinHandle<()>,
    writer: JoinHandle<()>,
}

impl GatewayClient {
    /// Connect to `url` (`ws://host:port/ws`).
    ///
    /// # Errors
    ///
    /// Returns [`ClientError::Connect`] if the handshake fails.
    pub async fn connect(url: &str) -> Result<Self, ClientError> {
        let (socket, _) = connect_async(url)
            .await
            .map_err(|e| ClientError::Connect(format!("{url}: {e}")))?;
        let (sink, incoming) = socket.split();
        let (outbound, frames) = mpsc::channel(OUTBOUND_BUFFER);
        let pending = Pending::default();
        let listeners = Listeners::default();

        let writer = tokio::spawn(write_frames(sink, frames));
        let reader = tokio::spawn(read_frames(
            incoming,
            Arc::clone(&pending),
            Arc::clone(&listeners),
            outbound.clone(),
        ));
        debug!(url, "connected to gateway");

        Ok(Self {
            outbound,
            pending,
            listeners,
            next_id: AtomicU64::new(1),
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
            reader,
            writer,
        })
    }

    /// Use `timeout` for every later request.
    #[must_use]
    pub const fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    /// Whether the reader is still running.
    pub fn is_connected(&self) -> bool {
        !self.reader.is_finished()
    }

    /// Subscribe to `stream` and wait for the gateway's acknowledgement.
    ///
    /// # Errors
    ///
    /// Returns [`ClientError::Server`] if the gateway refuses the stream.
    pub async fn listen(&self, stream: &str) -> Result<Listener, ClientError> {
        let id = self.next_id();
        let (events, receiver) = mpsc::unbounded_channel();
        self.listeners
            .lock()
            .await
            .entry(stream.to_owned())
            .or_default()
            .push(Slot { id, events });
        let listener = Listener {
            stream: stream.to_owned(),
            id,
            events: receiver,
        };

        match self.call(ClientRequest::Listen(target(stream))).await {
            Ok(_ack) => Ok(listener),
            Err(e) => {
                if let Err(cleanup) = self.unlisten(listener).await {
                    debug!(stream, error = %cleanup, "cleanup after failed listen");
                }
                Err(e)
            }
        }
    }

    /// Detach `listener`. The gateway is told to unsubscribe once no
    /// listener of the stream remains.
    pub async fn unlisten(&self, listener: Listener) -> Result<(), ClientError> {
        let Listener { stream, id, events } = listener;
        drop(events);
        let last = {
            let mut listeners = self.listeners.lock().await;
            let slots = listeners.entry(stream.clone()).or_default();
            slots.retain(|slot| slot.id != id);
            let last = slots.is_empty();
            if last {
                listeners.remove(&stream);
            }
            last
        };
        if last {
            self.call(ClientRequest::Unlisten(target(&stream))).await?;
        }
        Ok(())
    }

    /// Append an event to `stream`.
    pub async fn publish<T: Serialize + ?Sized>(
        &self,
        stream: &str,
        event_type: &str,
        data: &T,
    ) -> Result<(), ClientError> {
        self.call(ClientRequest::Publish(PublishRequest {
            stream: stream.to_owned(),
            event_type: event_type.to_owned(),
            data: serde_json::to_value(data)?,
            ignore_prefix: false,
        }))
        .await?;
        Ok(())
    }

    /// Historical events of `stream` inside `range`.
    pub async fn get_stream_values(
        &self,
        stream: &str,
        range: &StreamRange,
    ) -> Result<Vec<StreamEvent>, ClientError> {
        let frame = self
            .call(ClientRequest::GetStreamValues(StreamValuesRequest {
                stream: stream.to_owned(),
                start: Some(range.start_arg()),
                end: Some(range.end_arg()),
                count: Some(range.count),
                ignore_prefix: false,
            }))
            .await?;
        Ok(frame.values.unwrap_or_default())
    }

    /// Read the JSON value at `key`; `None` when absent.
    pub async fn get_val<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>, ClientError> {
        let frame = self.call(ClientRequest::GetVal(key_target(key))).await?;
        Ok(frame.value.map(serde_json::from_value).transpose()?)
    }

    /// Store `value` at `key`.
    pub async fn set_val<T: Serialize + ?Sized>(&self, key: &str, value: &T) -> Result<(), ClientError> {
        self.call(ClientRequest::SetVal(SetValRequest {
            key: key.to_owned(),
            value: serde_json::to_value(value)?,
            ignore_prefix: false,
        }))
        .await?;
        Ok(())
    }

    /// Read the stored string at `key` without decoding it.
    pub async fn get_raw_val(&self, key: &str) -> Result<Option<String>, ClientError> {
        let frame = self.call(ClientRequest::GetRawVal(key_target(key))).await?;
        match frame.value {
            None => Ok(None),
            Some(Value::String(raw)) => Ok(Some(raw)),
            Some(other) => Err(ClientError::UnexpectedReply(format!(
                "getRawVal returned {other}"
            ))),
        }
    }

    /// Delete `key`.
    pub async fn del_key(&self, key: &str) -> Result<(), ClientError> {
        self.call(ClientRequest::DelKey(key_target(key))).await?;
        Ok(())
    }

    /// Delete every key matching `pattern`.
    pub async fn del_keys(&self, pattern: &str) -> Result<(), ClientError> {
        self.call(ClientRequest::DelKeys(PatternTarget {
            pattern: pattern.to_owned(),
            ignore_prefix: false,
        }))
        .await?;
        Ok(())
    }

    /// Close the socket and wait for both tasks to finish.
    pub async fn close(mut self) {
        if self.outbound.send(Message::Close(None)).await.is_err() {
            trace!("writer already gone");
        }
        for task in [&mut self.writer, &mut self.reader] {
            match tokio::time::timeout(Duration::from_secs(2), task).await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => warn!(error = %e, "client task failed"),
                Err(_elapsed) => debug!("client task did not stop in time"),
            }
        }
    }

    fn next_id(&self) -> u64 {
        self.next_id.fetch_add(1, Ordering::Relaxed)
    }

    /// Send `request` and wait for the frame answering it.
    async fn call(&self, request: ClientRequest) -> Result<ServerFrame, ClientError> {
        let request_id = format!("req-{}", self.next_id());
        let text = encode(&request, &request_id)?;

        let (reply, answer) = oneshot::channel();
        {
            let mut pending = self.pending.lock().await;
            if pending.closed {
                return Err(ClientError::Closed);
            }
            pending.replies.insert(request_id.clone(), reply);
        }
        if self.outbound.send(Message::text(text)).await.is_err() {
            self.pending.lock().await.replies.remove(&request_id);
            return Err(ClientError::Closed);
        }
        trace!(kind = request.kind(), %request_id, "request sent");

        let frame = match tokio::time::timeout(self.request_timeout, answer).await {
            Ok(Ok(frame)) => frame,
            Ok(Err(_closed)) => return Err(ClientError::Closed),
            Err(_elapsed) => {
                self.pending.lock().await.replies.remove(&request_id);
                return Err(ClientError::Timeout(request_id));
            }
        };
        match frame.error {
            Some(message) => Err(ClientError::Server(message)),
            None => Ok(frame),
        }
    }
}

impl Drop for GatewayClient {
    fn drop(&mut self) {
        self.reader.abort();
        self.writer.abort();
    }
}

fn target(stream: &str) -> StreamTarget {
    StreamTarget {
        stream: stream.to_owned(),
        ignore_prefix: false,
    }
}

fn key_target(key: &str) -> KeyTarget {
    KeyTarget {
        key: key.to_owned(),
        ignore_prefix: false,
    }
}

/// Serialize `request` with `requestId` added.
fn encode(request: &ClientRequest, request_id: &str) -> Result<String, ClientError> {
    let mut value = serde_json::to_value(request)?;
    if let Some(object) = value.as_object_mut() {
        object.insert("requestId".to_owned(), Value::String(request_id.to_owned()));
    }
    Ok(serde_json::to_string(&value)?)
}

/// The event carried by a push frame, with its stream.
fn push_event(frame: ServerFrame) -> Option<(String, StreamEvent)> {
    let stream = frame.stream?;
    let event = StreamEvent {
        id: frame.id?,
        event_type: frame.event_type?,
        data: frame.data.unwrap_or(Value::Null),
    };
    Some((stream, event))
}

async fn write_frames(mut sink: SplitSink<Socket, Message>, mut frames: mpsc::Receiver<Message>) {
    while let Some(message) = frames.recv().await {
        let closing = matches!(message, Message::Close(_));
        if let Err(e) = sink.send(message).await {
            debug!(error = %e, "gateway send failed");
            return;
        }
        if closing {
            break;
        }
    }
    if let Err(e) = sink.close().await {
        trace!(error = %e, "gateway socket close failed");
    }
}

async fn read_frames(
    mut incoming: SplitStream<Socket>,
    pending: Pending,
    listeners: Listeners,
    outbound: mpsc::Sender<Message>,
) {
    while let Some(message) = incoming.next().await {
        let text = match message {
            Ok(Message::Text(text)) => text,
            Ok(Message::Close(_)) => break,
            Ok(_) => continue,
            Err(e) => {
                debug!(error = %e, "gateway read failed");
                break;
            }
        };
        let frame: ServerFrame = match serde_json::from_str(text.as_str()) {
            Ok(frame) => frame,
            Err(e) => {
                warn!(error = %e, "skipping undecodable gateway frame");
                continue;
            }
        };

        // Pushes echo the listen's requestId, so they are routed first.
        if frame.is_push() {
            if let Some((stream, event)) = push_event(frame) {
                deliver(&listeners, &outbound, &stream, &event).await;
            }
            continue;
        }
        let answered = match &frame.request_id {
            Some(Value::String(id)) => pending.lock().await.replies.remove(id),
            _ => None,
        };
        match answered {
            Some(reply) => {
                if reply.send(frame).is_err() {
                    trace!("request abandoned before its answer");
                }
            }
            None => trace!(?frame, "unsolicited gateway frame"),
        }
    }

    // Dropping the senders fails every waiting request and ends listeners.
    {
        let mut pending = pending.lock().await;
        pending.closed = true;
        pending.replies.clear();
    }
    listeners.lock().await.clear();
    debug!("gateway connection closed");
}

/// Hand `event` to every live listener of `stream`; unsubscribe when the
/// last one has been dropped.
async fn deliver(
    listeners: &Listeners,
    outbound: &mpsc::Sender<Message>,
    stream: &str,
    event: &StreamEvent,
) {
    let abandoned = {
        let mut listeners = listeners.lock().await;
        let Some(slots) = listeners.get_mut(stream) else {
            trace!(%stream, "push for a stream with no listeners");
            return;
        };
        slots.retain(|slot| slot.events.send(event.clone()).is_ok());
        let abandoned = slots.is_empty();
        if abandoned {
            listeners.remove(stream);
        }
        abandoned
    };
    if abandoned {
        debug!(%stream, "last listener dropped; unsubscribing");
        match serde_json::to_string(&ClientRequest::Unlisten(target(stream))) {
            Ok(text) => {
                if outbound.send(Message::text(text)).await.is_err() {
                    trace!("writer gone before unlisten");
                }
            }
            Err(e) => warn!(error = %e, "failed to encode unlisten"),
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use serde_json::json;
    use streamhub_types::EntryId;

    use super::*;

    #[test]
    fn requests_carry_their_id() {
        let text = encode(&ClientRequest::GetVal(key_target("k")), "req-7").unwrap();
        let value: Value = serde_json::from_str(&text).unwrap();
        assert_eq!(value, json!({"type": "getVal", "key": "k", "ignorePrefix": false, "requestId": "req-7"}));
    }

    #[test]
    fn push_frames_become_events() {
        let pushed = StreamEvent {
            id: EntryId::new(5, 1),
            event_type: "message".to_owned(),
            data: json!({"text": "hi"}),
        };
        let frame = ServerFrame::event("chat", &pushed);
        let (stream, event) = push_event(frame).unwrap();
        assert_eq!(stream, "chat");
        assert_eq!(event.id, EntryId::new(5, 1));
        assert_eq!(event.event_type, "message");
        assert_eq!(event.data, json!({"text": "hi"}));

        assert!(push_event(ServerFrame::ack()).is_none());
    }
}
