//! Gateway wire protocol (JSON text frames).
//!
//! Client requests are a closed, internally tagged union keyed by `type`.
//! Every server frame carries `response: true` and echoes the request's
//! `requestId` / `requestMeta` when present.
//!
//! | type | required fields |
//! |------|-----------------|
//! | `listen` / `unlisten` | `stream` |
//! | `publish` | `stream`, `eventType`, `data` |
//! | `getStreamValues` | `stream` (`start`, `end`, `count` optional) |
//! | `getVal` / `getRawVal` / `delKey` | `key` |
//! | `setVal` | `key`, `value` |
//! | `delKeys` | `pattern` |
//!
//! Every request also accepts an optional `ignorePrefix` flag.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use ts_rs::TS;

use crate::event::StreamEvent;
use crate::ids::EntryId;

/// A request targeting one stream.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, TS)]
#[serde(rename_all = "camelCase")]
#[ts(export, export_to = "bindings/")]
pub struct StreamTarget {
    /// Stream name (namespaced by the hub prefix unless `ignorePrefix`).
    pub stream: String,
    /// Skip the hub prefix.
    #[serde(default)]
    pub ignore_prefix: bool,
}

/// Append one event to a stream.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TS)]
#[serde(rename_all = "camelCase")]
#[ts(export, export_to = "bindings/")]
pub struct PublishRequest {
    /// Target stream.
    pub stream: String,
    /// Event type recorded with the entry.
    pub event_type: String,
    /// JSON payload.
    pub data: Value,
    /// Skip the hub prefix.
    #[serde(default)]
    pub ignore_prefix: bool,
}

/// Read a historical slice of a stream.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, TS)]
#[serde(rename_all = "camelCase")]
#[ts(export, export_to = "bindings/")]
pub struct StreamValuesRequest {
    /// Stream to read.
    pub stream: String,
    /// Start bound (`-` when omitted).
    #[serde(default)]
    #[ts(optional)]
    pub start: Option<String>,
    /// End bound (`+` when omitted).
    #[serde(default)]
    #[ts(optional)]
    pub end: Option<String>,
    /// Maximum number of entries (1000 when omitted).
    #[serde(default)]
    #[ts(optional)]
    pub count: Option<usize>,
    /// Skip the hub prefix.
    #[serde(default)]
    pub ignore_prefix: bool,
}

/// A request targeting one key.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, TS)]
#[serde(rename_all = "camelCase")]
#[ts(export, export_to = "bindings/")]
pub struct KeyTarget {
    /// Key name.
    pub key: String,
    /// Skip the hub prefix.
    #[serde(default)]
    pub ignore_prefix: bool,
}

/// Store a JSON value at a key.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TS)]
#[serde(rename_all = "camelCase")]
#[ts(export, export_to = "bindings/")]
pub struct SetValRequest {
    /// Key name.
    pub key: String,
    /// Value to store (any JSON, including `null`).
    pub value: Value,
    /// Skip the hub prefix.
    #[serde(default)]
    pub ignore_prefix: bool,
}

/// Delete every key matching a glob pattern.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, TS)]
#[serde(rename_all = "camelCase")]
#[ts(export, export_to = "bindings/")]
pub struct PatternTarget {
    /// Glob pattern (`*`, `?`, `[...]`).
    pub pattern: String,
    /// Skip the hub prefix.
    #[serde(default)]
    pub ignore_prefix: bool,
}

/// Every request a gateway client may send.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TS)]
#[serde(tag = "type", rename_all = "camelCase")]
#[ts(export, export_to = "bindings/")]
pub enum ClientRequest {
    /// Subscribe this connection to a stream.
    Listen(StreamTarget),
    /// Drop this connection's subscription to a stream.
    Unlisten(StreamTarget),
    /// Append an event.
    Publish(PublishRequest),
    /// Ranged historical read.
    GetStreamValues(StreamValuesRequest),
    /// Read a JSON value.
    GetVal(KeyTarget),
    /// Write a JSON value.
    SetVal(SetValRequest),
    /// Read the raw stored string.
    GetRawVal(KeyTarget),
    /// Delete one key.
    DelKey(KeyTarget),
    /// Delete keys by pattern.
    DelKeys(PatternTarget),
}

impl ClientRequest {
    /// The wire `type` of this request, for logging.
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::Listen(_) => "listen",
            Self::Unlisten(_) => "unlisten",
            Self::Publish(_) => "publish",
            Self::GetStreamValues(_) => "getStreamValues",
            Self::GetVal(_) => "getVal",
            Self::SetVal(_) => "setVal",
            Self::GetRawVal(_) => "getRawVal",
            Self::DelKey(_) => "delKey",
            Self::DelKeys(_) => "delKeys",
        }
    }
}

/// Correlation fields echoed back on every frame answering a request.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Envelope {
    /// Client-chosen request id.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub request_id: Option<Value>,
    /// Opaque client metadata.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub request_meta: Option<Value>,
}

/// Why an inbound frame could not be turned into a [`ClientRequest`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum ProtocolError {
    /// The frame is not valid JSON.
    #[error("Invalid JSON")]
    InvalidJson,
    /// Valid JSON, but not an object with a string `type`.
    #[error("Invalid message format")]
    InvalidFormat,
    /// Unrecognized `type`, or required fields are missing.
    #[error("Unknown message type or missing fields")]
    UnknownType,
}

/// A parsed inbound frame: the correlation envelope plus the request, or
/// the reason the request could not be decoded.
#[derive(Debug, Clone, PartialEq)]
pub struct Inbound {
    /// Correlation fields (recovered even when the request is invalid).
    pub envelope: Envelope,
    /// The decoded request.
    pub request: Result<ClientRequest, ProtocolError>,
}

/// Parse one text frame.
///
/// The envelope is extracted before the request itself so that error
/// frames still carry the caller's `requestId`.
pub fn parse_inbound(text: &str) -> Inbound {
    let Ok(value) = serde_json::from_str::<Value>(text) else {
        return Inbound {
            envelope: Envelope::default(),
            request: Err(ProtocolError::InvalidJson),
        };
    };
    let envelope = Envelope {
        request_id: value.get("requestId").filter(|v| !v.is_null()).cloned(),
        request_meta: value.get("requestMeta").filter(|v| !v.is_null()).cloned(),
    };
    let has_type = value.get("type").is_some_and(Value::is_string);
    let request = if has_type {
        serde_json::from_value(value).map_err(|_e| ProtocolError::UnknownType)
    } else {
        Err(ProtocolError::InvalidFormat)
    };
    Inbound { envelope, request }
}

/// Discriminator for frames that carry a `type`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, TS)]
#[serde(rename_all = "camelCase")]
#[ts(export, export_to = "bindings/")]
pub enum FrameType {
    /// A pushed stream event.
    Response,
    /// A protocol-level error.
    Error,
}

/// One frame sent from the gateway to a client.
///
/// A flat record of optional fields, so the JSON matches what browser
/// clients already consume: only populated fields are serialized.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, TS)]
#[serde(rename_all = "camelCase")]
#[ts(export, export_to = "bindings/")]
pub struct ServerFrame {
    /// Always `true`.
    pub response: bool,
    /// Echo of the request id.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    #[ts(optional)]
    pub request_id: Option<Value>,
    /// Echo of the request metadata.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    #[ts(optional)]
    pub request_meta: Option<Value>,
    /// Frame discriminator for pushes and protocol errors.
    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    #[ts(optional)]
    pub frame_type: Option<FrameType>,
    /// Success flag.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    #[ts(optional)]
    pub ok: Option<bool>,
    /// Error message.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    #[ts(optional)]
    pub error: Option<String>,
    /// Stream acknowledged by `listen`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    #[ts(optional)]
    pub subscribed: Option<String>,
    /// Stream acknowledged by `unlisten`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    #[ts(optional)]
    pub unsubscribed: Option<String>,
    /// Stream acknowledged by `publish`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    #[ts(optional)]
    pub published: Option<String>,
    /// Stream a pushed event belongs to.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    #[ts(optional)]
    pub stream: Option<String>,
    /// Type of a pushed event.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    #[ts(optional)]
    pub event_type: Option<String>,
    /// Payload of a pushed event.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    #[ts(optional)]
    pub data: Option<Value>,
    /// Entry id of a pushed event.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    #[ts(optional, as = "Option<String>")]
    pub id: Option<EntryId>,
    /// Result of `getStreamValues`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    #[ts(optional)]
    pub values: Option<Vec<StreamEvent>>,
    /// Result of `getVal` / `getRawVal` (omitted when the key is absent).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    #[ts(optional)]
    pub value: Option<Value>,
}

impl ServerFrame {
    fn ok() -> Self {
        Self {
            response: true,
            ok: Some(true),
            ..Self::default()
        }
    }

    /// Plain `{ok: true}` acknowledgement.
    pub fn ack() -> Self {
        Self::ok()
    }

    /// `listen` acknowledgement.
    pub fn subscribed(stream: &str) -> Self {
        Self {
            subscribed: Some(stream.to_owned()),
            ..Self::ok()
        }
    }

    /// `unlisten` acknowledgement.
    pub fn unsubscribed(stream: &str) -> Self {
        Self {
            unsubscribed: Some(stream.to_owned()),
            ..Self::ok()
        }
    }

    /// `publish` acknowledgement.
    pub fn published(stream: &str) -> Self {
        Self {
            published: Some(stream.to_owned()),
            ..Self::ok()
        }
    }

    /// `getStreamValues` result.
    pub fn values(values: Vec<StreamEvent>) -> Self {
        Self {
            values: Some(values),
            ..Self::ok()
        }
    }

    /// `getVal` / `getRawVal` result.
    pub fn value(value: Option<Value>) -> Self {
        Self {
            value,
            ..Self::ok()
        }
    }

    /// A request-level failure (`{error}` without a `type`).
    pub fn failure(message: impl Into<String>) -> Self {
        Self {
            response: true,
            error: Some(message.into()),
            ..Self::default()
        }
    }

    /// A frame answering an undecodable request.
    pub fn protocol_error(error: ProtocolError) -> Self {
        match error {
            ProtocolError::InvalidJson | ProtocolError::InvalidFormat => Self {
                frame_type: Some(FrameType::Error),
                ..Self::failure(error.to_string())
            },
            ProtocolError::UnknownType => Self::failure(error.to_string()),
        }
    }

    /// An unsolicited push of one stream event.
    pub fn event(stream: &str, event: &StreamEvent) -> Self {
        Self {
            response: true,
            frame_type: Some(FrameType::Response),
            stream: Some(stream.to_owned()),
            event_type: Some(event.event_type.clone()),
            data: Some(event.data.clone()),
            id: Some(event.id),
            ..Self::default()
        }
    }

    /// Attach the request's correlation fields.
    #[must_use]
    pub fn with_envelope(mut self, envelope: &Envelope) -> Self {
        self.request_id.clone_from(&envelope.request_id);
        self.request_meta.clone_from(&envelope.request_meta);
        self
    }

    /// Whether this frame is a pushed stream event.
    pub fn is_push(&self) -> bool {
        self.frame_type == Some(FrameType::Response)
    }
}
