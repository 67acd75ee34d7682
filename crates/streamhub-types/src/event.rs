//! Stream events, cursor start positions, and historical read ranges.

use core::fmt;
use core::str::FromStr;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use ts_rs::TS;

use crate::ids::{EntryId, ParseIdError};

/// Default maximum number of entries returned by a ranged read.
pub const DEFAULT_RANGE_COUNT: usize = 1000;

/// One immutable entry of a stream.
///
/// Created by an append; never modified and never deleted on its own
/// (only whole streams can be removed).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TS)]
#[ts(export, export_to = "bindings/")]
pub struct StreamEvent {
    /// Entry id assigned by the event log.
    #[ts(as = "String")]
    pub id: EntryId,
    /// Application-defined event type.
    #[serde(rename = "type")]
    pub event_type: String,
    /// JSON payload.
    pub data: serde_json::Value,
}

impl StreamEvent {
    /// Deserialize the payload into a concrete type.
    ///
    /// # Errors
    ///
    /// Returns the `serde_json` error if the payload does not match `T`.
    pub fn data_as<T: DeserializeOwned>(&self) -> Result<T, serde_json::Error> {
        T::deserialize(&self.data)
    }
}

/// Where a new subscription starts reading.
///
/// `Latest` (`"$"` on the wire) delivers only entries appended after the
/// subscription starts; `After(id)` replays everything after `id`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum StreamPosition {
    /// Only entries appended after subscribe time.
    #[default]
    Latest,
    /// Entries strictly after the given id.
    After(EntryId),
}

impl fmt::Display for StreamPosition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Latest => f.write_str("$"),
            Self::After(id) => write!(f, "{id}"),
        }
    }
}

impl FromStr for StreamPosition {
    type Err = ParseIdError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s == "$" {
            return Ok(Self::Latest);
        }
        s.parse().map(Self::After)
    }
}

impl Serialize for StreamPosition {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for StreamPosition {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

/// One end of a ranged read.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RangeBound {
    /// Open end (`-` as a start, `+` as an end).
    #[default]
    Unbounded,
    /// Inclusive bound at the given id.
    Id(EntryId),
}

impl RangeBound {
    /// Parse a start bound: `-`, `ms-seq`, or a bare `ms` (meaning `ms-0`).
    ///
    /// # Errors
    ///
    /// Returns [`ParseIdError::Malformed`] for anything else.
    pub fn parse_start(s: &str) -> Result<Self, ParseIdError> {
        if s == "-" {
            return Ok(Self::Unbounded);
        }
        parse_bound(s, 0)
    }

    /// Parse an end bound: `+`, `ms-seq`, or a bare `ms` (meaning `ms-MAX`).
    ///
    /// # Errors
    ///
    /// Returns [`ParseIdError::Malformed`] for anything else.
    pub fn parse_end(s: &str) -> Result<Self, ParseIdError> {
        if s == "+" {
            return Ok(Self::Unbounded);
        }
        parse_bound(s, u64::MAX)
    }
}

fn parse_bound(s: &str, default_seq: u64) -> Result<RangeBound, ParseIdError> {
    if s.contains('-') {
        return s.parse().map(RangeBound::Id);
    }
    s.parse::<u64>()
        .map(|ms| RangeBound::Id(EntryId::new(ms, default_seq)))
        .map_err(|_e| ParseIdError::Malformed(s.to_owned()))
}

/// An inclusive id range plus a result cap, used for historical replay.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StreamRange {
    /// Lower bound (inclusive).
    pub start: RangeBound,
    /// Upper bound (inclusive).
    pub end: RangeBound,
    /// Maximum number of entries to return.
    pub count: usize,
}

impl Default for StreamRange {
    fn default() -> Self {
        Self {
            start: RangeBound::Unbounded,
            end: RangeBound::Unbounded,
            count: DEFAULT_RANGE_COUNT,
        }
    }
}

impl StreamRange {
    /// The whole stream, capped at [`DEFAULT_RANGE_COUNT`] entries.
    pub fn all() -> Self {
        Self::default()
    }

    /// Build a range from the optional textual bounds used on the wire.
    ///
    /// # Errors
    ///
    /// Returns [`ParseIdError`] if either bound is malformed.
    pub fn parse(
        start: Option<&str>,
        end: Option<&str>,
        count: Option<usize>,
    ) -> Result<Self, ParseIdError> {
        Ok(Self {
            start: start.map_or(Ok(RangeBound::Unbounded), RangeBound::parse_start)?,
            end: end.map_or(Ok(RangeBound::Unbounded), RangeBound::parse_end)?,
            count: count.unwrap_or(DEFAULT_RANGE_COUNT),
        })
    }

    /// Whether `id` falls inside the bounds (ignoring the count cap).
    pub fn contains(&self, id: EntryId) -> bool {
        let after_start = match self.start {
            RangeBound::Unbounded => true,
            RangeBound::Id(start) => id >= start,
        };
        let before_end = match self.end {
            RangeBound::Unbounded => true,
            RangeBound::Id(end) => id <= end,
        };
        after_start && before_end
    }

    /// The textual start bound as Redis expects it.
    pub fn start_arg(&self) -> String {
        match self.start {
            RangeBound::Unbounded => "-".to_owned(),
            RangeBound::Id(id) => id.to_string(),
        }
    }

    /// The textual end bound as Redis expects it.
    pub fn end_arg(&self) -> String {
        match self.end {
            RangeBound::Unbounded => "+".to_owned(),
            RangeBound::Id(id) => id.to_string(),
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn stream_event_uses_type_on_the_wire() {
        let event = StreamEvent {
            id: EntryId::new(1, 0),
            event_type: "msg".to_owned(),
            data: serde_json::json!({"text": "hi"}),
        };
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["type"], "msg");
        assert_eq!(json["id"], "1-0");
        assert_eq!(json["data"]["text"], "hi");
    }

    #[test]
    fn data_as_decodes_payload() {
        #[derive(Deserialize)]
        struct Chat {
            text: String,
        }
        let event = StreamEvent {
            id: EntryId::new(1, 0),
            event_type: "msg".to_owned(),
            data: serde_json::json!({"text": "hi"}),
        };
        let chat: Result<Chat, _> = event.data_as();
        assert_eq!(chat.map(|c| c.text).ok().as_deref(), Some("hi"));
    }

    #[test]
    fn position_parses_dollar_as_latest() {
        assert_eq!("$".parse(), Ok(StreamPosition::Latest));
        assert_eq!(
            "5-1".parse(),
            Ok(StreamPosition::After(EntryId::new(5, 1)))
        );
        assert_eq!(StreamPosition::Latest.to_string(), "$");
    }

    #[test]
    fn range_defaults_to_whole_stream() {
        let range = StreamRange::parse(None, None, None);
        assert_eq!(range, Ok(StreamRange::all()));
        assert_eq!(StreamRange::all().start_arg(), "-");
        assert_eq!(StreamRange::all().end_arg(), "+");
    }

    #[test]
    fn bare_millisecond_bounds_expand() {
        let range = StreamRange::parse(Some("10"), Some("20"), Some(5)).unwrap();
        assert!(range.contains(EntryId::new(10, 0)));
        assert!(range.contains(EntryId::new(20, 999)));
        assert!(!range.contains(EntryId::new(21, 0)));
        assert!(!range.contains(EntryId::new(9, u64::MAX)));
        assert_eq!(range.count, 5);
    }

    #[test]
    fn malformed_bounds_are_rejected() {
        assert!(StreamRange::parse(Some("x"), None, None).is_err());
        assert!(StreamRange::parse(None, Some("1-y"), None).is_err());
    }
}
