//! Spatial and graph metadata types.
//!
//! Anchors, envelopes and threads are independent of the atom lifecycle.
//! They round-trip through the textual projection format, see
//! [`GeometryProjector`](crate::projector::GeometryProjector).

use serde::{Deserialize, Serialize};

/// Spatial coordinate of an atom. One per atom, `(0, 0)` when absent.
///
/// Copied under the fossil's id when an atom is fossilized, preserving the
/// snapshot's former position.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Anchor {
    /// Atom (or fossil) this anchor positions.
    pub atom_id: String,
    /// X coordinate, non-negative.
    pub x: i64,
    /// Y coordinate, non-negative.
    pub y: i64,
}

impl Anchor {
    /// Create a new anchor.
    pub fn new(atom_id: impl Into<String>, x: i64, y: i64) -> Self {
        Self { atom_id: atom_id.into(), x, y }
    }

    /// Anchor at the origin for an atom with no stored position.
    pub fn origin(atom_id: impl Into<String>) -> Self {
        Self::new(atom_id, 0, 0)
    }
}

/// Named rectangular region, independent of atoms. Own primary key.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Envelope {
    /// Envelope identifier.
    pub id: String,
    /// Domain tag displayed with the region.
    pub domain: String,
    /// X coordinate of the top-left corner.
    pub x: i64,
    /// Y coordinate of the top-left corner.
    pub y: i64,
    /// Width, non-negative.
    pub w: i64,
    /// Height, non-negative.
    pub h: i64,
}

impl Envelope {
    /// Create a new envelope.
    pub fn new(id: impl Into<String>, domain: impl Into<String>, x: i64, y: i64, w: i64, h: i64) -> Self {
        Self { id: id.into(), domain: domain.into(), x, y, w, h }
    }
}

/// Directed edge between atom ids. Duplicate edges are no-ops.
///
/// Implements `Ord` for deterministic ordering: (source, target).
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Thread {
    /// Source atom id.
    pub source: String,
    /// Target atom id.
    pub target: String,
}

impl Thread {
    /// Create a new thread.
    pub fn new(source: impl Into<String>, target: impl Into<String>) -> Self {
        Self { source: source.into(), target: target.into() }
    }
}

/// Named external reference attached to an atom.
///
/// Consumed as read-only context by the generation collaborator; never
/// mutated by the kernel.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Portal {
    /// Atom this portal belongs to.
    pub atom_id: String,
    /// External path the portal points at.
    pub path: String,
    /// Optional human description.
    pub description: Option<String>,
}

impl Portal {
    /// Create a new portal.
    pub fn new(atom_id: impl Into<String>, path: impl Into<String>, description: Option<String>) -> Self {
        Self { atom_id: atom_id.into(), path: path.into(), description }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_thread_ordering() {
        let t1 = Thread::new("a", "b");
        let t2 = Thread::new("a", "c");
        let t3 = Thread::new("b", "a");

        assert!(t1 < t2);
        assert!(t2 < t3);
    }

    #[test]
    fn test_anchor_origin() {
        let anchor = Anchor::origin("atom1");
        assert_eq!(anchor.x, 0);
        assert_eq!(anchor.y, 0);
    }
}
