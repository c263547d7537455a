//! Observable state-change events.
//!
//! One event is published to the [`EventBus`](crate::bus::EventBus) for every
//! state mutation. For a single atom id the sequence of `AtomChanged` statuses
//! seen by a subscriber is exactly the sequence produced by the transition
//! table; interleavings across different atom ids are unordered.

use serde::{Deserialize, Serialize};

use super::atom::AtomStatus;

/// A state-change notification fanned out to subscribers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AtomEvent {
    /// An atom's content or status changed.
    AtomChanged {
        /// Atom that changed.
        atom_id: String,
        /// Status after the change.
        status: AtomStatus,
    },
    /// A prior content version was preserved as a fossil.
    Fossilized {
        /// Live atom whose content was snapshotted.
        atom_id: String,
        /// Id of the new fossil record.
        fossil_id: String,
    },
    /// A fossil's content was promoted back onto its live atom.
    Revived {
        /// Live atom that received the fossil content.
        atom_id: String,
        /// Fossil that was revived.
        fossil_id: String,
    },
    /// A new thread edge was inserted.
    ThreadLinked {
        /// Source atom id.
        source: String,
        /// Target atom id.
        target: String,
    },
    /// Startup recovery reset interrupted reservations.
    RecoveryCompleted {
        /// Number of atoms reset from `Busy` to `Claimed`.
        reclaimed: u64,
    },
}

impl AtomEvent {
    /// Serialize to the JSON shape wire subscribers see.
    pub fn to_json(&self) -> String {
        serde_json::to_string(self).unwrap_or_else(|_| "{}".to_string())
    }

    /// The atom id this event concerns, when it concerns exactly one.
    pub fn atom_id(&self) -> Option<&str> {
        match self {
            Self::AtomChanged { atom_id, .. }
            | Self::Fossilized { atom_id, .. }
            | Self::Revived { atom_id, .. } => Some(atom_id),
            Self::ThreadLinked { .. } | Self::RecoveryCompleted { .. } => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_serialization_shape() {
        let event = AtomEvent::AtomChanged {
            atom_id: "doc.txt".to_string(),
            status: AtomStatus::Busy,
        };
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["type"], "atom_changed");
        assert_eq!(json["atom_id"], "doc.txt");
        assert_eq!(json["status"], "busy");
    }

    #[test]
    fn test_event_atom_id() {
        let event = AtomEvent::Fossilized {
            atom_id: "a".into(),
            fossil_id: "a@t".into(),
        };
        assert_eq!(event.atom_id(), Some("a"));

        let event = AtomEvent::ThreadLinked { source: "a".into(), target: "b".into() };
        assert_eq!(event.atom_id(), None);
    }
}
