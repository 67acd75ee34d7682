//! Entity records persisted by the repository layer.
//!
//! All records are stored as JSON values under `{baseKey}:{id}:{subkind}`
//! keys and use camelCase field names so browser clients can read them
//! directly.

use std::collections::BTreeMap;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use ts_rs::TS;

use crate::event::StreamEvent;
use crate::ids::{ActionId, LogId, WorkerId};

/// Current wall-clock time as milliseconds since the Unix epoch.
pub fn now_millis() -> u64 {
    u64::try_from(Utc::now().timestamp_millis()).unwrap_or_default()
}

// ---------------------------------------------------------------------------
// Actions
// ---------------------------------------------------------------------------

/// Lifecycle state of an action request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize, TS)]
#[serde(rename_all = "lowercase")]
#[ts(export, export_to = "bindings/")]
pub enum ActionStatus {
    /// Created but not started.
    #[default]
    Pending,
    /// Started and queued for a worker.
    Running,
    /// Finished successfully.
    Completed,
    /// Finished with an error.
    Failed,
    /// Cancelled before completion.
    Cancelled,
}

impl ActionStatus {
    /// Whether the action can no longer change state.
    pub const fn is_finished(self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Cancelled)
    }
}

/// Persisted state of one action request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TS)]
#[serde(rename_all = "camelCase")]
#[ts(export, export_to = "bindings/")]
pub struct ActionRecord {
    /// Action identifier.
    pub id: ActionId,
    /// Action name (what the worker should do).
    pub name: String,
    /// Creation time, ms since epoch.
    pub created: u64,
    /// Input argument.
    #[serde(default = "empty_object")]
    pub arg: Value,
    /// Mutable progress data.
    #[serde(default = "empty_object")]
    pub data: Value,
    /// Lifecycle state.
    #[serde(default)]
    pub status: ActionStatus,
    /// Error details once failed or cancelled.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    #[ts(optional)]
    pub error: Option<Value>,
    /// Result once completed.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    #[ts(optional)]
    pub output: Option<Value>,
}

impl ActionRecord {
    /// A fresh pending action with a generated id.
    pub fn new(name: impl Into<String>, arg: Value) -> Self {
        Self {
            id: ActionId::generate(),
            name: name.into(),
            created: now_millis(),
            arg,
            data: empty_object(),
            status: ActionStatus::Pending,
            error: None,
            output: None,
        }
    }
}

/// An action record together with the event trail known at save time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TS)]
#[serde(rename_all = "camelCase")]
#[ts(export, export_to = "bindings/")]
pub struct ActionSnapshot {
    /// The record itself.
    #[serde(flatten)]
    pub record: ActionRecord,
    /// Events observed so far.
    #[serde(default)]
    pub events: Vec<StreamEvent>,
}

fn empty_object() -> Value {
    Value::Object(serde_json::Map::new())
}

// ---------------------------------------------------------------------------
// Logs
// ---------------------------------------------------------------------------

/// One application log line published to the log stream.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TS)]
#[serde(rename_all = "camelCase")]
#[ts(export, export_to = "bindings/")]
pub struct LogRecord {
    /// Record identifier.
    pub id: LogId,
    /// Category, also used as the stream event type.
    #[serde(rename = "type")]
    pub log_type: String,
    /// Severity (`info`, `warn`, `error`, ...).
    pub level: String,
    /// Human-readable message.
    pub message: String,
    /// Structured context.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    #[ts(optional)]
    pub data: Option<Value>,
    /// Creation time, ms since epoch.
    pub timestamp: u64,
}

impl LogRecord {
    /// A fresh `info`-level record with a generated id.
    pub fn new(log_type: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            id: LogId::generate(),
            log_type: log_type.into(),
            level: "info".to_owned(),
            message: message.into(),
            data: None,
            timestamp: now_millis(),
        }
    }

    /// Set the severity.
    #[must_use]
    pub fn with_level(mut self, level: impl Into<String>) -> Self {
        self.level = level.into();
        self
    }

    /// Attach structured context.
    #[must_use]
    pub fn with_data(mut self, data: Value) -> Self {
        self.data = Some(data);
        self
    }
}

// ---------------------------------------------------------------------------
// Workers
// ---------------------------------------------------------------------------

/// Availability of a registered worker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize, TS)]
#[serde(rename_all = "lowercase")]
#[ts(export, export_to = "bindings/")]
pub enum WorkerStatus {
    /// Waiting for work.
    #[default]
    Idle,
    /// Processing work.
    Busy,
    /// Shut down or unreachable.
    Offline,
    /// Failed.
    Error,
}

/// Registry entry for one worker process.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TS)]
#[serde(rename_all = "camelCase")]
#[ts(export, export_to = "bindings/")]
pub struct WorkerInfo {
    /// Worker identifier.
    pub id: WorkerId,
    /// Display name.
    pub name: String,
    /// Availability.
    pub status: WorkerStatus,
    /// Last heartbeat or status change, ms since epoch.
    pub last_seen: u64,
    /// Free-form metadata.
    #[serde(default)]
    pub meta: BTreeMap<String, Value>,
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn action_status_is_lowercase_on_the_wire() {
        let json = serde_json::to_string(&ActionStatus::Cancelled).unwrap();
        assert_eq!(json, "\"cancelled\"");
        assert!(ActionStatus::Failed.is_finished());
        assert!(!ActionStatus::Running.is_finished());
    }

    #[test]
    fn snapshot_flattens_record_fields() {
        let record = ActionRecord::new("resize", serde_json::json!({"w": 10}));
        let snapshot = ActionSnapshot {
            record,
            events: Vec::new(),
        };
        let json = serde_json::to_value(&snapshot).unwrap();
        assert_eq!(json["name"], "resize");
        assert_eq!(json["status"], "pending");
        assert_eq!(json["arg"]["w"], 10);
        assert!(json["events"].as_array().is_some_and(Vec::is_empty));
        assert!(json.get("error").is_none());
    }

    #[test]
    fn partial_action_json_fills_defaults() {
        let record: ActionRecord =
            serde_json::from_str(r#"{"id":"a1","name":"n","created":5}"#).unwrap();
        assert_eq!(record.status, ActionStatus::Pending);
        assert_eq!(record.data, serde_json::json!({}));
        assert_eq!(record.output, None);
    }

    #[test]
    fn worker_info_uses_last_seen_camel_case() {
        let info = WorkerInfo {
            id: WorkerId::from("w1"),
            name: "resizer".to_owned(),
            status: WorkerStatus::Busy,
            last_seen: 42,
            meta: BTreeMap::new(),
        };
        let json = serde_json::to_value(&info).unwrap();
        assert_eq!(json["lastSeen"], 42);
        assert_eq!(json["status"], "busy");
    }

    #[test]
    fn log_record_type_field() {
        let log = LogRecord::new("audit", "hello");
        let json = serde_json::to_value(&log).unwrap();
        assert_eq!(json["type"], "audit");
        assert_eq!(json["level"], "info");
        assert!(json.get("data").is_none());

        let json = serde_json::to_value(log.with_level("warn").with_data(serde_json::json!(1))).unwrap();
        assert_eq!(json["level"], "warn");
        assert_eq!(json["data"], 1);
    }
}
