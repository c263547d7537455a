//! Atom types for the lifecycle kernel.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::digest::compute_content_hash;

/// Lifecycle status of an atom.
///
/// The status column is the only mutable coordination point in the system.
/// All transitions go through the table enforced by
/// [`AtomStore`](crate::atoms::AtomStore):
///
/// ```text
/// Hollow    --reserve(generate)-->          Busy
/// Busy      --generation success-->         Claimed
/// Busy      --generation failure-->         Hollow
/// Claimed   --reserve(validate)-->          Busy
/// Busy      --validator exit 0-->           Endorsed
/// Busy      --validator exit != 0 / crash-->Claimed
/// Endorsed  --content overwritten-->        Claimed
/// {Hollow,Claimed,Endorsed} --revive-->     Claimed
/// Fossil    --(no outgoing transitions)
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AtomStatus {
    /// Placeholder, no generated content yet.
    Hollow,
    /// Content present, not yet validated.
    Claimed,
    /// Reservation held for generation or validation work.
    Busy,
    /// Content passed domain validation.
    Endorsed,
    /// Immutable historical snapshot. Terminal.
    Fossil,
}

/// Error when decoding a persisted status code.
#[derive(Debug, Clone, thiserror::Error)]
#[error("Unknown atom status code: {0}")]
pub struct StatusCodeError(pub i16);

impl AtomStatus {
    /// Wire code used by the durable store's status column.
    pub fn code(&self) -> i16 {
        match self {
            Self::Hollow => 0,
            Self::Claimed => 1,
            Self::Busy => 2,
            Self::Endorsed => 3,
            Self::Fossil => 4,
        }
    }

    /// Decode a persisted status code.
    pub fn from_code(code: i16) -> Result<Self, StatusCodeError> {
        match code {
            0 => Ok(Self::Hollow),
            1 => Ok(Self::Claimed),
            2 => Ok(Self::Busy),
            3 => Ok(Self::Endorsed),
            4 => Ok(Self::Fossil),
            other => Err(StatusCodeError(other)),
        }
    }

    /// Parse status from string.
    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "hollow" => Some(Self::Hollow),
            "claimed" => Some(Self::Claimed),
            "busy" => Some(Self::Busy),
            "endorsed" => Some(Self::Endorsed),
            "fossil" => Some(Self::Fossil),
            _ => None,
        }
    }

    /// Whether a reservation may start from this status.
    ///
    /// `Hollow` reserves for generation, `Claimed` for validation.
    pub fn is_reservable(&self) -> bool {
        matches!(self, Self::Hollow | Self::Claimed)
    }

    /// Whether a `Busy` reservation may be released into this status.
    pub fn is_release_target(&self) -> bool {
        matches!(self, Self::Hollow | Self::Claimed | Self::Endorsed)
    }

    /// Whether a live atom in this status may be revived over.
    pub fn is_revivable(&self) -> bool {
        matches!(self, Self::Hollow | Self::Claimed | Self::Endorsed)
    }
}

impl Default for AtomStatus {
    fn default() -> Self {
        Self::Hollow
    }
}

impl fmt::Display for AtomStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Hollow => write!(f, "hollow"),
            Self::Claimed => write!(f, "claimed"),
            Self::Busy => write!(f, "busy"),
            Self::Endorsed => write!(f, "endorsed"),
            Self::Fossil => write!(f, "fossil"),
        }
    }
}

/// Authoritative record of a single atom.
///
/// `id` is an opaque path-like token, unique and immutable after creation.
/// `content_hash` always matches `content`; both are rewritten together.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AtomRecord {
    /// Unique atom identifier.
    pub id: String,
    /// Current content text.
    pub content: String,
    /// Classification tag selecting the validator persona.
    pub domain: String,
    /// Lifecycle status.
    pub status: AtomStatus,
    /// SHA-256 hash of `content`, lowercase hex.
    pub content_hash: String,
    /// Timestamp of the most recent validation attempt, if any.
    pub last_validated: Option<DateTime<Utc>>,
}

impl AtomRecord {
    /// Create a new record, computing the content hash.
    pub fn new(id: impl Into<String>, content: impl Into<String>, domain: impl Into<String>, status: AtomStatus) -> Self {
        let content = content.into();
        let content_hash = compute_content_hash(&content);
        Self {
            id: id.into(),
            content,
            domain: domain.into(),
            status,
            content_hash,
            last_validated: None,
        }
    }

    /// Replace the content, recomputing the hash.
    pub fn set_content(&mut self, content: impl Into<String>) {
        self.content = content.into();
        self.content_hash = compute_content_hash(&self.content);
    }

    /// Whether this record is an immutable historical snapshot.
    pub fn is_fossil(&self) -> bool {
        self.status == AtomStatus::Fossil
    }
}

// Ordering by id for deterministic listings.
impl PartialEq for AtomRecord {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for AtomRecord {}

impl PartialOrd for AtomRecord {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for AtomRecord {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.id.cmp(&other.id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_code_round_trip() {
        for status in [
            AtomStatus::Hollow,
            AtomStatus::Claimed,
            AtomStatus::Busy,
            AtomStatus::Endorsed,
            AtomStatus::Fossil,
        ] {
            assert_eq!(AtomStatus::from_code(status.code()).unwrap(), status);
        }
        assert!(AtomStatus::from_code(5).is_err());
    }

    #[test]
    fn test_status_parsing() {
        assert_eq!(AtomStatus::from_str("hollow"), Some(AtomStatus::Hollow));
        assert_eq!(AtomStatus::from_str("ENDORSED"), Some(AtomStatus::Endorsed));
        assert_eq!(AtomStatus::from_str("zombie"), None);
    }

    #[test]
    fn test_transition_predicates() {
        assert!(AtomStatus::Hollow.is_reservable());
        assert!(AtomStatus::Claimed.is_reservable());
        assert!(!AtomStatus::Busy.is_reservable());
        assert!(!AtomStatus::Endorsed.is_reservable());
        assert!(!AtomStatus::Fossil.is_reservable());

        assert!(AtomStatus::Claimed.is_release_target());
        assert!(AtomStatus::Hollow.is_release_target());
        assert!(AtomStatus::Endorsed.is_release_target());
        assert!(!AtomStatus::Busy.is_release_target());
        assert!(!AtomStatus::Fossil.is_release_target());

        // Fossils and busy atoms cannot be revived over.
        assert!(!AtomStatus::Fossil.is_revivable());
        assert!(!AtomStatus::Busy.is_revivable());
        assert!(AtomStatus::Endorsed.is_revivable());
    }

    #[test]
    fn test_record_hash_tracks_content() {
        let mut record = AtomRecord::new("doc.txt", "x", "generic", AtomStatus::Claimed);
        let first = record.content_hash.clone();
        assert_eq!(first, compute_content_hash("x"));

        record.set_content("y");
        assert_ne!(record.content_hash, first);
        assert_eq!(record.content_hash, compute_content_hash("y"));
    }
}
