//! # sentinel-kernel
//!
//! Lifecycle engine for versioned, domain-classified content units ("atoms").
//!
//! Atoms progress through a generate → validate → endorse lifecycle:
//!
//! > `Hollow` → `Busy` → `Claimed` → `Busy` → `Endorsed`
//!
//! with every prior content version preserved as an immutable `Fossil`.
//!
//! ## Core Contract
//!
//! 1. Only a CAS-guarded reservation may move an atom into `Busy`, so at most
//!    one actor works on an atom at a time
//! 2. Overwriting content with a different hash always fossilizes the prior
//!    version first (append-only history per atom id)
//! 3. Every state mutation is mirrored to the [`EventBus`], in transition
//!    order per atom id
//! 4. No atom survives a restart stuck in `Busy` (see
//!    [`AtomStore::recover_stuck`])
//!
//! ## Architecture
//!
//! ```text
//! caller ──► AtomStore ──► FossilVault ──► Materializer
//!               ▲  │
//!  WitnessCoordinator ──► Generator / DomainWitness
//!                  │
//!                  ▼
//!       RecordStore (Postgres or Memory)       EventBus ──► subscribers
//! ```
//!
//! ## Geometry
//!
//! Spatial metadata (anchors, envelopes, threads) lives beside the atoms and
//! round-trips through a textual projection format, see [`GeometryProjector`].

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod types;
pub mod digest;
pub mod store;
pub mod atoms;
pub mod vault;
pub mod witness;
pub mod projector;
pub mod bus;

// Re-exports
pub use types::{AtomRecord, AtomStatus, Anchor, Envelope, Thread, Portal, AtomEvent};
pub use digest::{compute_content_hash, validate_content_hash, HashValidation};
pub use store::{RecordStore, CasOutcome, InMemoryRecordStore};
#[cfg(feature = "postgres")]
pub use store::PostgresRecordStore;
pub use atoms::{AtomStore, AtomStoreError};
pub use vault::{FossilVault, VaultError, Materializer, FsMaterializer, NullMaterializer};
pub use witness::{
    WitnessCoordinator, WitnessError, WitnessConfig,
    Generator, DomainWitness, GenerationRequest, Verdict, CollaboratorError,
    ProcessWitness, GenerationOutcome, ValidationOutcome,
};
pub use projector::{GeometryProjector, ProjectorError, ShatterReport};
pub use bus::{EventBus, Subscription, SubscriberId};

/// Schema version for all persisted kernel types.
/// Increment on breaking changes to any schema type.
pub const SENTINEL_SCHEMA_VERSION: &str = "1.0.0";

/// Domain assigned to atoms with no recognized classification.
pub const GENERIC_DOMAIN: &str = "generic";
