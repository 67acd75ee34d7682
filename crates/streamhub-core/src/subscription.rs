//! Per-subscription delivery loop.
//!
//! Every [`Hub::listen`](crate::Hub::listen) call spawns one task that owns
//! a cursor and a [`TailReader`]. The task blocks on the reader, decodes
//! the batch, hands each event to the handler in order and only then moves
//! the cursor. Nothing about a subscription is shared with any other
//! subscription, so one slow or failing consumer never affects another.

use std::future::Future;
use std::time::Duration;

use streamhub_store::{TailReader, decode_entries};
use streamhub_types::{EntryId, StreamEvent, StreamPosition};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::config::RetryPolicy;

/// Event type that ends a subscription unless configured otherwise.
pub const DEFAULT_TERMINAL_TYPE: &str = "complete";

/// What a handler wants after seeing an event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Flow {
    /// Keep delivering.
    #[default]
    Continue,
    /// End the subscription after this event.
    Stop,
}

impl From<()> for Flow {
    fn from((): ()) -> Self {
        Self::Continue
    }
}

/// Receives the events of one subscription, one at a time, in order.
///
/// Implemented for every `FnMut(StreamEvent) -> impl Future<Output = Flow>`,
/// so an `async` closure (or a closure returning an `async` block) is a
/// handler.
pub trait EventHandler: Send + 'static {
    /// Handle one event. The next event is not delivered until the
    /// returned future completes.
    fn handle(&mut self, event: StreamEvent) -> impl Future<Output = Flow> + Send;
}

impl<F, Fut> EventHandler for F
where
    F: FnMut(StreamEvent) -> Fut + Send + 'static,
    Fut: Future<Output = Flow> + Send,
{
    fn handle(&mut self, event: StreamEvent) -> impl Future<Output = Flow> + Send {
        self(event)
    }
}

/// Options for [`Hub::listen`](crate::Hub::listen).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ListenOptions {
    /// Where delivery starts.
    pub start: StreamPosition,
    /// Event types that end the subscription once delivered.
    pub terminal_types: Vec<String>,
}

impl Default for ListenOptions {
    fn default() -> Self {
        Self {
            start: StreamPosition::Latest,
            terminal_types: vec![DEFAULT_TERMINAL_TYPE.to_owned()],
        }
    }
}

impl ListenOptions {
    /// Only events appended after `listen` returns.
    pub fn latest() -> Self {
        Self::default()
    }

    /// Replay everything after `id`, then follow the stream.
    pub fn after(id: EntryId) -> Self {
        Self {
            start: StreamPosition::After(id),
            ..Self::default()
        }
    }

    /// Replace the terminal event types.
    #[must_use]
    pub fn terminal_types<I, S>(mut self, types: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.terminal_types = types.into_iter().map(Into::into).collect();
        self
    }

    /// Never end on an event type; only `Flow::Stop` or cancellation end
    /// the subscription.
    #[must_use]
    pub fn without_terminal_types(mut self) -> Self {
        self.terminal_types.clear();
        self
    }

    fn is_terminal(&self, event_type: &str) -> bool {
        self.terminal_types.iter().any(|t| t == event_type)
    }
}

/// Why a subscription ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SubscriptionEnd {
    /// The handler returned [`Flow::Stop`].
    Stopped,
    /// A terminal event type was delivered.
    Terminal(String),
    /// The subscription was cancelled.
    Cancelled,
    /// The store failed in a way retrying cannot fix, or the task panicked.
    Failed(String),
}

/// Handle to a running subscription.
///
/// Dropping the handle detaches the task; it keeps running until the
/// handler stops it or a terminal event arrives. Call
/// [`Subscription::cancel`] to end it explicitly.
#[derive(Debug)]
pub struct Subscription {
    stream: String,
    cancel: CancellationToken,
    task: JoinHandle<SubscriptionEnd>,
}

impl Subscription {
    /// Full (prefixed) stream name this subscription reads.
    pub fn stream(&self) -> &str {
        &self.stream
    }

    /// Request cancellation. A blocked read is interrupted immediately;
    /// a running handler finishes its current event first.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    /// Whether the task has ended.
    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }

    /// Wait for the task to end.
    pub async fn join(self) -> SubscriptionEnd {
        match self.task.await {
            Ok(end) => end,
            Err(e) => {
                tracing::error!(stream = %self.stream, error = %e, "subscription task failed");
                SubscriptionEnd::Failed(e.to_string())
            }
        }
    }

    /// Cancel, then wait for the task to end and release its reader.
    pub async fn cancel_and_join(self) -> SubscriptionEnd {
        self.cancel();
        self.join().await
    }
}

/// Everything the loop task owns.
pub(crate) struct DeliveryLoop<H> {
    pub stream: String,
    pub cursor: EntryId,
    pub reader: Box<dyn TailReader>,
    pub handler: H,
    pub options: ListenOptions,
    pub retry: RetryPolicy,
}

impl<H: EventHandler> DeliveryLoop<H> {
    /// Spawn the loop on the current runtime.
    pub fn spawn(self) -> Subscription {
        let cancel = CancellationToken::new();
        let stream = self.stream.clone();
        let task = tokio::spawn(self.run(cancel.clone()));
        Subscription {
            stream,
            cancel,
            task,
        }
    }

    async fn run(mut self, cancel: CancellationToken) -> SubscriptionEnd {
        tracing::debug!(stream = %self.stream, cursor = %self.cursor, "subscription started");
        let end = self.deliver(&cancel).await;
        self.reader.close().await;
        tracing::debug!(stream = %self.stream, ?end, "subscription ended");
        end
    }

    async fn deliver(&mut self, cancel: &CancellationToken) -> SubscriptionEnd {
        let mut delay = self.retry.initial;
        loop {
            let batch = tokio::select! {
                biased;
                () = cancel.cancelled() => return SubscriptionEnd::Cancelled,
                batch = self.reader.read_after(&self.stream, self.cursor) => batch,
            };
            let entries = match batch {
                Ok(entries) => {
                    delay = self.retry.initial;
                    entries
                }
                Err(e) if e.is_transient() => {
                    tracing::warn!(
                        stream = %self.stream,
                        cursor = %self.cursor,
                        error = %e,
                        retry_in_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
                        "stream read failed, retrying"
                    );
                    if sleep_or_cancel(delay, cancel).await {
                        return SubscriptionEnd::Cancelled;
                    }
                    delay = self.retry.next(delay);
                    continue;
                }
                Err(e) => {
                    tracing::error!(stream = %self.stream, error = %e, "stream read failed permanently");
                    return SubscriptionEnd::Failed(e.to_string());
                }
            };

            let Some(last_raw) = entries.last().map(|e| e.id) else {
                continue;
            };
            for event in decode_entries(&self.stream, entries) {
                let id = event.id;
                let terminal = self.options.is_terminal(&event.event_type);
                let event_type = terminal.then(|| event.event_type.clone());
                let flow = self.handler.handle(event).await;
                self.cursor = id;
                if flow == Flow::Stop {
                    return SubscriptionEnd::Stopped;
                }
                if let Some(event_type) = event_type {
                    return SubscriptionEnd::Terminal(event_type);
                }
                if cancel.is_cancelled() {
                    return SubscriptionEnd::Cancelled;
                }
            }
            // Malformed entries at the tail of the batch were skipped by
            // decoding; step past them so they are not read again.
            self.cursor = self.cursor.max(last_raw);
        }
    }
}

/// Sleep for `delay`; `true` if cancelled first.
async fn sleep_or_cancel(delay: Duration, cancel: &CancellationToken) -> bool {
    tokio::select! {
        biased;
        () = cancel.cancelled() => true,
        () = tokio::time::sleep(delay) => false,
    }
}
