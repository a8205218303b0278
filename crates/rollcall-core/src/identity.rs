//! Composite identity keys: `"<name>_<student_id>"`.
//!
//! The key is what the label map stores and what the ledger deduplicates
//! on. Parsing splits on the *last* separator, so names may contain `_`
//! but student ids may not.

use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

pub const SEPARATOR: char = '_';
/// Student id used when a key carries none.
pub const DEFAULT_STUDENT_ID: &str = "000";
pub const UNKNOWN_NAME: &str = "Unknown";
/// Key the pipeline reports for faces it could not match.
pub const UNKNOWN_KEY: &str = "Unknown_000";

#[derive(Error, Debug, Clone, PartialEq)]
pub enum DecodeError {
    #[error("empty identity key")]
    EmptyKey,
    #[error("identity key has no name: {0:?}")]
    EmptyName(String),
    #[error("malformed ledger row at line {line}: {reason}")]
    MalformedRow { line: u64, reason: String },
}

/// A person as known to the attendance system.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Identity {
    pub name: String,
    pub student_id: String,
}

impl Identity {
    /// Build an identity; an empty student id becomes [`DEFAULT_STUDENT_ID`].
    pub fn new(name: impl Into<String>, student_id: impl Into<String>) -> Self {
        let student_id = student_id.into();
        Self {
            name: name.into(),
            student_id: if student_id.is_empty() {
                DEFAULT_STUDENT_ID.to_string()
            } else {
                student_id
            },
        }
    }

    pub fn unknown() -> Self {
        Self::new(UNKNOWN_NAME, DEFAULT_STUDENT_ID)
    }

    pub fn is_unknown(&self) -> bool {
        self.name == UNKNOWN_NAME && self.student_id == DEFAULT_STUDENT_ID
    }

    /// Composite key for this identity.
    pub fn key(&self) -> String {
        encode(&self.name, &self.student_id)
    }

    /// Parse a composite key, reporting why it could not be parsed.
    pub fn try_decode(key: &str) -> Result<Self, DecodeError> {
        if key.is_empty() {
            return Err(DecodeError::EmptyKey);
        }

        let (name, student_id) = match key.rsplit_once(SEPARATOR) {
            Some((name, id)) => (name, id),
            None => (key, DEFAULT_STUDENT_ID),
        };

        if name.is_empty() {
            return Err(DecodeError::EmptyName(key.to_string()));
        }

        Ok(Self::new(name, student_id))
    }

    /// Parse a composite key, substituting the unknown identity on failure.
    pub fn decode(key: &str) -> Self {
        Self::try_decode(key).unwrap_or_else(|e| {
            tracing::debug!(key, error = %e, "undecodable identity key");
            Self::unknown()
        })
    }
}

impl fmt::Display for Identity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.name, self.student_id)
    }
}

/// Join a name and student id into a composite key.
pub fn encode(name: &str, student_id: &str) -> String {
    let student_id = if student_id.is_empty() {
        DEFAULT_STUDENT_ID
    } else {
        student_id
    };
    format!("{name}{SEPARATOR}{student_id}")
}

/// Split a composite key into `(name, student_id)`.
pub fn decode(key: &str) -> (String, String) {
    let identity = Identity::decode(key);
    (identity.name, identity.student_id)
}
