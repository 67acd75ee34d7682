//! Raw entry to [`StreamEvent`] decoding.
//!
//! The first field of an entry is the event type and its value the JSON
//! payload. An empty payload decodes as `{}`. Entries without fields, or
//! whose payload is not JSON, are skipped with a warning so one bad
//! producer cannot wedge every consumer of the stream.

use serde_json::Value;
use streamhub_types::StreamEvent;

use crate::traits::RawEntry;

/// Decode one entry, or `None` if it is malformed.
pub fn decode_entry(stream: &str, entry: RawEntry) -> Option<StreamEvent> {
    let RawEntry { id, fields } = entry;
    let Some((event_type, payload)) = fields.into_iter().next() else {
        tracing::warn!(stream, %id, "skipping stream entry without fields");
        return None;
    };
    let data = if payload.is_empty() {
        Value::Object(serde_json::Map::new())
    } else {
        match serde_json::from_str(&payload) {
            Ok(value) => value,
            Err(e) => {
                tracing::warn!(
                    stream,
                    %id,
                    event_type = %event_type,
                    error = %e,
                    "skipping stream entry with malformed payload"
                );
                return None;
            }
        }
    };
    Some(StreamEvent {
        id,
        event_type,
        data,
    })
}

/// Decode a batch in order, dropping malformed entries.
pub fn decode_entries(stream: &str, entries: Vec<RawEntry>) -> Vec<StreamEvent> {
    entries
        .into_iter()
        .filter_map(|entry| decode_entry(stream, entry))
        .collect()
}
