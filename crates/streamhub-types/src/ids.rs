//! Identifier types.
//!
//! [`EntryId`] is the Redis stream entry id (`{ms}-{seq}`) that orders
//! events inside one stream. Connection and entity identifiers are
//! strongly-typed wrappers so a worker id can never be passed where an
//! action id is expected.

use core::fmt;
use core::str::FromStr;

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use ts_rs::TS;
use uuid::Uuid;

/// Errors produced when parsing an [`EntryId`] from text.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ParseIdError {
    /// The text is not of the form `{ms}-{seq}`.
    #[error("malformed stream entry id: {0:?}")]
    Malformed(String),
}

/// Position of an entry within a single stream.
///
/// Ordered by `(ms, seq)`. Ids are unique and strictly increasing within
/// one stream; comparing ids taken from two different streams carries no
/// meaning.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct EntryId {
    /// Millisecond timestamp part.
    pub ms: u64,
    /// Sequence number within the millisecond.
    pub seq: u64,
}

impl EntryId {
    /// The smallest possible id (`0-0`). Every real entry sorts after it.
    pub const ZERO: Self = Self { ms: 0, seq: 0 };

    /// The largest possible id.
    pub const MAX: Self = Self {
        ms: u64::MAX,
        seq: u64::MAX,
    };

    /// Construct an id from its two parts.
    pub const fn new(ms: u64, seq: u64) -> Self {
        Self { ms, seq }
    }

    /// The id an append would receive if it happened at `now_ms` right
    /// after `self`.
    ///
    /// Mirrors the Redis `XADD *` rule: use the wall clock when it has moved
    /// forward, otherwise bump the sequence of the last id so ids stay
    /// strictly increasing even when the clock steps back.
    pub const fn successor(self, now_ms: u64) -> Self {
        if now_ms > self.ms {
            return Self { ms: now_ms, seq: 0 };
        }
        match self.seq.checked_add(1) {
            Some(seq) => Self { ms: self.ms, seq },
            None => Self {
                ms: self.ms.saturating_add(1),
                seq: 0,
            },
        }
    }
}

impl fmt::Display for EntryId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}", self.ms, self.seq)
    }
}

impl FromStr for EntryId {
    type Err = ParseIdError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (ms, seq) = s
            .split_once('-')
            .ok_or_else(|| ParseIdError::Malformed(s.to_owned()))?;
        let ms = ms
            .parse()
            .map_err(|_e| ParseIdError::Malformed(s.to_owned()))?;
        let seq = seq
            .parse()
            .map_err(|_e| ParseIdError::Malformed(s.to_owned()))?;
        Ok(Self { ms, seq })
    }
}

impl Serialize for EntryId {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for EntryId {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

/// Generates a newtype wrapper around [`Uuid`] with standard derives.
macro_rules! define_id {
    (
        $(#[$meta:meta])*
        $name:ident
    ) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, TS)]
        #[ts(export, export_to = "bindings/")]
        pub struct $name(pub Uuid);

        impl $name {
            /// Create a new identifier using UUID v7 (time-ordered).
            pub fn new() -> Self {
                Self(Uuid::now_v7())
            }

            /// Return the inner [`Uuid`] value.
            pub const fn into_inner(self) -> Uuid {
                self.0
            }
        }

        impl Default for $name {
            fn default() -> Self {
                Self::new()
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }
    };
}

/// Generates a string-backed entity identifier.
///
/// Entity ids are free-form strings on the wire (clients may pick their
/// own, e.g. `worker-1`); generated ids are UUID v7 strings.
macro_rules! define_entity_id {
    (
        $(#[$meta:meta])*
        $name:ident
    ) => {
        $(#[$meta])*
        #[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, TS)]
        #[serde(transparent)]
        #[ts(export, export_to = "bindings/")]
        pub struct $name(pub String);

        impl $name {
            /// Generate a fresh identifier (UUID v7 string).
            pub fn generate() -> Self {
                Self(Uuid::now_v7().to_string())
            }

            /// Borrow the identifier text.
            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl From<&str> for $name {
            fn from(id: &str) -> Self {
                Self(id.to_owned())
            }
        }

        impl From<String> for $name {
            fn from(id: String) -> Self {
                Self(id)
            }
        }

        impl AsRef<str> for $name {
            fn as_ref(&self) -> &str {
                &self.0
            }
        }
    };
}

define_id! {
    /// Identifier of one gateway WebSocket connection.
    ConnectionId
}

define_entity_id! {
    /// Identifier of an action request.
    ActionId
}

define_entity_id! {
    /// Identifier of a log record.
    LogId
}

define_entity_id! {
    /// Identifier of a registered worker.
    WorkerId
}
