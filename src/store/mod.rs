//! Durable record storage backends.

pub mod memory;

#[cfg(feature = "postgres")]
pub mod postgres;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::types::{Anchor, AtomRecord, AtomStatus, Envelope, Portal, Thread};

/// Outcome of a conditional status update.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CasOutcome {
    /// The row matched the expected status and was updated.
    Swapped,
    /// The row exists but its status had already changed.
    Mismatch(AtomStatus),
    /// No row with that id.
    Missing,
}

/// Trait for durable record storage backends.
///
/// This is the row-level interface only. The transition table, fossilization
/// and event mirroring live above it, in [`AtomStore`](crate::atoms::AtomStore)
/// and friends; a backend just has to make `compare_and_swap_status` atomic
/// (a conditional update that succeeds only if the observed status still
/// matches). All methods are async to support async database access.
#[async_trait]
pub trait RecordStore: Send + Sync {
    /// Error type for store operations.
    type Error: std::error::Error + Send + Sync + 'static;

    // ── atoms ────────────────────────────────────────────────────────────

    /// Fetch an atom by id.
    async fn get_atom(&self, id: &str) -> Result<Option<AtomRecord>, Self::Error>;

    /// Fetch all atoms, ordered by id for determinism.
    async fn list_atoms(&self) -> Result<Vec<AtomRecord>, Self::Error>;

    /// Insert or fully replace an atom row.
    async fn put_atom(&self, record: AtomRecord) -> Result<(), Self::Error>;

    /// Atomically transition `expected -> next` iff the current status still
    /// equals `expected`.
    async fn compare_and_swap_status(
        &self,
        id: &str,
        expected: AtomStatus,
        next: AtomStatus,
    ) -> Result<CasOutcome, Self::Error>;

    /// Record a validation attempt timestamp. Returns false for a missing id.
    async fn set_last_validated(
        &self,
        id: &str,
        at: DateTime<Utc>,
    ) -> Result<bool, Self::Error>;

    /// Reset every `Busy` atom to `fallback`, returning the affected ids.
    async fn reset_busy(&self, fallback: AtomStatus) -> Result<Vec<String>, Self::Error>;

    // ── geometry ─────────────────────────────────────────────────────────

    /// Fetch the anchor for an atom, if one is stored.
    async fn get_anchor(&self, atom_id: &str) -> Result<Option<Anchor>, Self::Error>;

    /// Fetch all anchors.
    async fn list_anchors(&self) -> Result<Vec<Anchor>, Self::Error>;

    /// Insert or replace an anchor by atom id.
    async fn upsert_anchor(&self, anchor: Anchor) -> Result<(), Self::Error>;

    /// Fetch all envelopes.
    async fn list_envelopes(&self) -> Result<Vec<Envelope>, Self::Error>;

    /// Insert or replace an envelope by id.
    async fn upsert_envelope(&self, envelope: Envelope) -> Result<(), Self::Error>;

    /// Delete an envelope. Returns false if it did not exist.
    async fn delete_envelope(&self, id: &str) -> Result<bool, Self::Error>;

    /// Fetch all threads.
    async fn list_threads(&self) -> Result<Vec<Thread>, Self::Error>;

    /// Insert a thread edge. Returns false if the pair already existed.
    async fn insert_thread(&self, thread: Thread) -> Result<bool, Self::Error>;

    /// Atom ids connected to `atom_id` by a thread in either direction,
    /// deduplicated and ordered.
    async fn neighbors(&self, atom_id: &str) -> Result<Vec<String>, Self::Error>;

    // ── portals ──────────────────────────────────────────────────────────

    /// Fetch the portals attached to an atom.
    async fn list_portals(&self, atom_id: &str) -> Result<Vec<Portal>, Self::Error>;

    /// Attach a portal to an atom.
    async fn add_portal(&self, portal: Portal) -> Result<(), Self::Error>;
}

pub use memory::InMemoryRecordStore;

#[cfg(feature = "postgres")]
pub use postgres::{PostgresConfig, PostgresRecordStore};
