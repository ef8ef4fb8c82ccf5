//! Identifier types for conversations and messages.
//!
//! The backend hands out ids as JSON numbers or strings depending on the
//! endpoint, so every id here is string-backed and accepts both on decode.
//! Optimistic messages get a synthesized `temp-<millis>` id that can never
//! collide with a server id.

use core::fmt;
use core::str::FromStr;

use serde::de::{self, Visitor};
use serde::{Deserialize, Deserializer, Serialize};

/// Prefix of synthesized ids for optimistic messages.
pub const TEMP_PREFIX: &str = "temp-";

/// Errors returned when parsing an identifier.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IdError {
    /// Empty (or whitespace-only) identifier.
    Empty,
}

impl fmt::Display for IdError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Empty => write!(f, "id must not be empty"),
        }
    }
}

impl std::error::Error for IdError {}

/// Serde visitor accepting a string or an integer.
struct FlexibleIdVisitor;

impl Visitor<'_> for FlexibleIdVisitor {
    type Value = String;

    fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("a string or integer id")
    }

    fn visit_str<E: de::Error>(self, v: &str) -> Result<Self::Value, E> {
        Ok(v.to_owned())
    }

    fn visit_string<E: de::Error>(self, v: String) -> Result<Self::Value, E> {
        Ok(v)
    }

    fn visit_u64<E: de::Error>(self, v: u64) -> Result<Self::Value, E> {
        Ok(v.to_string())
    }

    fn visit_i64<E: de::Error>(self, v: i64) -> Result<Self::Value, E> {
        Ok(v.to_string())
    }
}

/// Declare a string-backed id newtype with a consistent API.
macro_rules! define_string_id {
    (
        $(#[$meta:meta])*
        $name:ident
    ) => {
        $(#[$meta])*
        #[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
        #[repr(transparent)]
        #[serde(transparent)]
        pub struct $name(String);

        impl $name {
            /// Build an id from any string-like value.
            ///
            /// # Errors
            /// Returns `IdError::Empty` if the value is blank.
            pub fn new(raw: impl Into<String>) -> Result<Self, IdError> {
                let raw = raw.into();
                if raw.trim().is_empty() {
                    return Err(IdError::Empty);
                }
                Ok(Self(raw))
            }

            /// Borrow as `&str`.
            #[inline]
            #[must_use]
            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl FromStr for $name {
            type Err = IdError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                Self::new(s)
            }
        }

        impl From<u64> for $name {
            fn from(value: u64) -> Self {
                Self(value.to_string())
            }
        }

        impl<'de> Deserialize<'de> for $name {
            fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
                let raw = deserializer.deserialize_any(FlexibleIdVisitor)?;
                Self::new(raw).map_err(de::Error::custom)
            }
        }
    };
}

define_string_id!(
    /// Identifier of a support conversation.
    ConversationId
);

define_string_id!(
    /// Identifier of a message: a server id or a synthesized `temp-<millis>` id.
    MessageId
);

impl ConversationId {
    /// Realtime channel carrying this conversation's events.
    #[must_use]
    pub fn channel_name(&self) -> String {
        format!("conversation.{}", self.0)
    }
}

impl MessageId {
    /// Synthesize a placeholder id for an optimistic message.
    #[must_use]
    pub fn temp(millis: i64) -> Self {
        Self(format!("{TEMP_PREFIX}{millis}"))
    }

    /// Whether this id was synthesized locally.
    #[must_use]
    pub fn is_temp(&self) -> bool {
        self.0.starts_with(TEMP_PREFIX)
    }

    /// Millisecond stamp embedded in a temp id.
    #[must_use]
    pub fn temp_millis(&self) -> Option<i64> {
        self.0.strip_prefix(TEMP_PREFIX)?.parse().ok()
    }
}
