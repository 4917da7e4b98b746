//! Identifier newtypes and monotonic ULID generation
//!
//! User-authored entities (flows, levels, branches, tasks, triggers) carry
//! string identifiers chosen by the builder UI. Runtime entities (flow
//! instances, execution records) get monotonic ULIDs so that their ids sort
//! in creation order.

use std::sync::{Mutex, OnceLock};
use thiserror::Error;
use ulid::{Generator, Ulid};

/// Errors raised when constructing identifiers
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum IdError {
    /// Identifier was empty or whitespace only
    #[error("{kind} cannot be empty or whitespace only")]
    Empty {
        /// Kind of identifier that was rejected
        kind: &'static str,
    },
    /// Identifier was not a valid ULID
    #[error("Invalid {kind} '{value}': {reason}")]
    InvalidUlid {
        /// Kind of identifier that was rejected
        kind: &'static str,
        /// The rejected input
        value: String,
        /// Parser message
        reason: String,
    },
}

static ULID_GENERATOR: OnceLock<Mutex<Generator>> = OnceLock::new();

/// Generate a ULID strictly greater than every ULID previously returned
///
/// Falls back to a fresh random ULID if the generator overflows within a
/// single millisecond, which keeps id creation infallible.
pub fn generate_monotonic_ulid() -> Ulid {
    let generator = ULID_GENERATOR.get_or_init(|| Mutex::new(Generator::new()));
    let mut generator = generator
        .lock()
        .unwrap_or_else(|poisoned| poisoned.into_inner());
    generator.generate().unwrap_or_else(|_| Ulid::new())
}

/// Declares a string-backed identifier newtype
macro_rules! string_id {
    ($(#[$meta:meta])* $name:ident, $kind:literal) => {
        $(#[$meta])*
        #[derive(
            Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash,
            serde::Serialize, serde::Deserialize,
        )]
        #[serde(try_from = "String", into = "String")]
        pub struct $name(String);

        impl $name {
            /// Create an identifier without validation
            pub fn new(id: impl Into<String>) -> Self {
                Self(id.into())
            }

            /// Create an identifier, rejecting empty or whitespace-only input
            pub fn try_new(id: impl Into<String>) -> Result<Self, $crate::common::IdError> {
                let id = id.into();
                if id.trim().is_empty() {
                    return Err($crate::common::IdError::Empty { kind: $kind });
                }
                Ok(Self(id))
            }

            /// Get the inner string value
            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl TryFrom<String> for $name {
            type Error = $crate::common::IdError;

            fn try_from(value: String) -> Result<Self, Self::Error> {
                Self::try_new(value)
            }
        }

        impl From<$name> for String {
            fn from(id: $name) -> Self {
                id.0
            }
        }

        impl From<&str> for $name {
            fn from(s: &str) -> Self {
                Self(s.to_string())
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                write!(f, "{}", self.0)
            }
        }
    };
}

/// Declares a ULID-backed identifier newtype
macro_rules! ulid_id {
    ($(#[$meta:meta])* $name:ident, $kind:literal) => {
        $(#[$meta])*
        #[derive(
            Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash,
            serde::Serialize, serde::Deserialize,
        )]
        pub struct $name(ulid::Ulid);

        impl $name {
            /// Create a new monotonic identifier
            pub fn new() -> Self {
                Self($crate::common::generate_monotonic_ulid())
            }

            /// Parse an identifier from its string representation
            pub fn parse(s: &str) -> Result<Self, $crate::common::IdError> {
                ulid::Ulid::from_string(s).map(Self).map_err(|e| {
                    $crate::common::IdError::InvalidUlid {
                        kind: $kind,
                        value: s.to_string(),
                        reason: e.to_string(),
                    }
                })
            }
        }

        impl Default for $name {
            fn default() -> Self {
                Self::new()
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                write!(f, "{}", self.0)
            }
        }
    };
}

pub(crate) use string_id;
pub(crate) use ulid_id;

#[cfg(test)]
mod tests {
    use super::*;

    string_id!(
        /// Test identifier
        SampleId,
        "Sample ID"
    );

    ulid_id!(
        /// Test run identifier
        SampleRunId,
        "sample run ID"
    );

    #[test]
    fn test_string_id_rejects_blank() {
        assert!(SampleId::try_new("level-1").is_ok());
        assert_eq!(
            SampleId::try_new("   "),
            Err(IdError::Empty { kind: "Sample ID" })
        );
    }

    #[test]
    fn test_string_id_deserialization_validates() {
        let id: SampleId = serde_json::from_str("\"abc\"").unwrap();
        assert_eq!(id.as_str(), "abc");
        assert!(serde_json::from_str::<SampleId>("\"\"").is_err());
    }

    #[test]
    fn test_ulid_ids_are_monotonic() {
        let first = SampleRunId::new();
        let second = SampleRunId::new();
        assert!(first < second);
        assert_eq!(SampleRunId::parse(&first.to_string()).unwrap(), first);
        assert!(SampleRunId::parse("not-a-ulid").is_err());
    }
}
