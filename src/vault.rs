//! Append-only content history per atom id.
//!
//! A fossil is a full copy of an atom's content at the moment it was about to
//! be overwritten, stored under `{originalId}@{timestamp}` with status
//! `Fossil`. Fossils are never updated or deleted. Reviving a fossil promotes
//! its content back onto the live atom, fossilizing the current live content
//! first so the operation is never destructive.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{SecondsFormat, Utc};

use crate::bus::EventBus;
use crate::store::RecordStore;
use crate::types::{Anchor, AtomEvent, AtomRecord, AtomStatus};
use crate::witness::CollaboratorError;

/// Error type for vault operations.
#[derive(Debug, thiserror::Error)]
pub enum VaultError {
    /// Unknown atom or fossil id.
    #[error("Record not found: {0}")]
    NotFound(String),
    /// Fossil id does not contain the `@` separator.
    #[error("Invalid fossil id (missing '@'): {0}")]
    InvalidFormat(String),
    /// The requested revive is not a legal transition.
    #[error("Invalid transition: {from} -> {to}")]
    InvalidTransition {
        /// Current status of the record blocking the revive.
        from: AtomStatus,
        /// Requested status.
        to: AtomStatus,
    },
    /// Backing store failure.
    #[error("Store error: {0}")]
    Store(String),
}

impl VaultError {
    fn from_store<E: std::error::Error>(e: E) -> Self {
        Self::Store(e.to_string())
    }
}

/// Build a fossil id from an original id and a timestamp string.
pub fn fossil_id(original_id: &str, timestamp: &str) -> String {
    format!("{original_id}@{timestamp}")
}

/// Recover the original atom id from a fossil id.
///
/// Splits on the first `@`; atom ids themselves never contain one.
pub fn split_fossil_id(id: &str) -> Result<(&str, &str), VaultError> {
    match id.split_once('@') {
        Some((original, timestamp)) if !original.is_empty() => Ok((original, timestamp)),
        _ => Err(VaultError::InvalidFormat(id.to_string())),
    }
}

/// Collaborator that writes revived content to its durable external
/// representation. Best-effort: failures are logged, never fatal.
#[async_trait]
pub trait Materializer: Send + Sync {
    /// Write the atom's content to its external representation.
    async fn materialize(&self, atom_id: &str, content: &str) -> Result<(), CollaboratorError>;
}

/// Materializer that does nothing. Default for embedded use.
#[derive(Debug, Clone, Copy, Default)]
pub struct NullMaterializer;

#[async_trait]
impl Materializer for NullMaterializer {
    async fn materialize(&self, _atom_id: &str, _content: &str) -> Result<(), CollaboratorError> {
        Ok(())
    }
}

/// Materializer that treats atom ids as relative file paths under a root.
///
/// Refuses absolute ids, creates missing parent directories.
#[derive(Debug, Clone)]
pub struct FsMaterializer {
    root: PathBuf,
}

impl FsMaterializer {
    /// Create a materializer rooted at the given directory.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }
}

#[async_trait]
impl Materializer for FsMaterializer {
    async fn materialize(&self, atom_id: &str, content: &str) -> Result<(), CollaboratorError> {
        let relative = Path::new(atom_id);
        if relative.is_absolute() {
            return Err(CollaboratorError::Failed(format!(
                "refusing absolute path atom id: {atom_id}"
            )));
        }

        let full = self.root.join(relative);
        if let Some(parent) = full.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::write(&full, content).await?;
        tracing::debug!(atom_id, path = %full.display(), "Materialized");
        Ok(())
    }
}

/// Append-only fossil history over a record store.
pub struct FossilVault<S> {
    store: Arc<S>,
    bus: Arc<EventBus>,
    materializer: Arc<dyn Materializer>,
}

impl<S: RecordStore> FossilVault<S> {
    /// Create a vault with a no-op materializer.
    pub fn new(store: Arc<S>, bus: Arc<EventBus>) -> Self {
        Self {
            store,
            bus,
            materializer: Arc::new(NullMaterializer),
        }
    }

    /// Replace the materializer collaborator.
    pub fn with_materializer(mut self, materializer: Arc<dyn Materializer>) -> Self {
        self.materializer = materializer;
        self
    }

    /// Snapshot an atom's current content into a new fossil record.
    ///
    /// The fossil carries the captured content, hash, validation timestamp
    /// and domain. The atom's anchor, if any, is copied under the fossil's id
    /// so the snapshot keeps its former position. Returns the fossil id.
    pub async fn snapshot(&self, atom_id: &str) -> Result<String, VaultError> {
        let atom = self
            .store
            .get_atom(atom_id)
            .await
            .map_err(VaultError::from_store)?
            .ok_or_else(|| VaultError::NotFound(atom_id.to_string()))?;

        let timestamp = Utc::now().to_rfc3339_opts(SecondsFormat::Micros, true);
        let id = fossil_id(atom_id, &timestamp);

        let fossil = AtomRecord {
            id: id.clone(),
            content: atom.content,
            domain: atom.domain,
            status: AtomStatus::Fossil,
            content_hash: atom.content_hash,
            last_validated: atom.last_validated,
        };
        self.store
            .put_atom(fossil)
            .await
            .map_err(VaultError::from_store)?;

        if let Some(anchor) = self
            .store
            .get_anchor(atom_id)
            .await
            .map_err(VaultError::from_store)?
        {
            self.store
                .upsert_anchor(Anchor::new(id.clone(), anchor.x, anchor.y))
                .await
                .map_err(VaultError::from_store)?;
        }

        tracing::info!(atom_id, fossil_id = %id, "Snapshot created");
        self.bus.publish(AtomEvent::Fossilized {
            atom_id: atom_id.to_string(),
            fossil_id: id.clone(),
        });
        Ok(id)
    }

    /// Promote a fossil's content back onto its live atom.
    ///
    /// The current live content, if any, is snapshotted first, so no history
    /// is lost. The revived atom lands in `Claimed`: it is unverified until
    /// re-validated. Materialization is triggered best-effort.
    pub async fn revive(&self, fossil_id: &str) -> Result<AtomRecord, VaultError> {
        let (original_id, _timestamp) = split_fossil_id(fossil_id)?;

        let fossil = self
            .store
            .get_atom(fossil_id)
            .await
            .map_err(VaultError::from_store)?
            .ok_or_else(|| VaultError::NotFound(fossil_id.to_string()))?;
        if !fossil.is_fossil() {
            // Only fossils can be revived.
            return Err(VaultError::InvalidTransition {
                from: fossil.status,
                to: AtomStatus::Claimed,
            });
        }

        let live = self
            .store
            .get_atom(original_id)
            .await
            .map_err(VaultError::from_store)?;

        let revived = match live {
            Some(current) => {
                if !current.status.is_revivable() {
                    return Err(VaultError::InvalidTransition {
                        from: current.status,
                        to: AtomStatus::Claimed,
                    });
                }
                self.snapshot(original_id).await?;
                AtomRecord {
                    id: original_id.to_string(),
                    content: fossil.content.clone(),
                    domain: current.domain,
                    status: AtomStatus::Claimed,
                    content_hash: fossil.content_hash.clone(),
                    last_validated: current.last_validated,
                }
            }
            None => AtomRecord {
                id: original_id.to_string(),
                content: fossil.content.clone(),
                domain: fossil.domain.clone(),
                status: AtomStatus::Claimed,
                content_hash: fossil.content_hash.clone(),
                last_validated: None,
            },
        };

        self.store
            .put_atom(revived.clone())
            .await
            .map_err(VaultError::from_store)?;

        if let Err(e) = self
            .materializer
            .materialize(original_id, &revived.content)
            .await
        {
            // Materialization is a side effect, not part of the transition.
            tracing::warn!(atom_id = original_id, error = %e, "Materialization failed");
        }

        tracing::info!(atom_id = original_id, fossil_id, "Fossil revived");
        self.bus.publish(AtomEvent::Revived {
            atom_id: original_id.to_string(),
            fossil_id: fossil_id.to_string(),
        });
        self.bus.publish(AtomEvent::AtomChanged {
            atom_id: original_id.to_string(),
            status: AtomStatus::Claimed,
        });
        Ok(revived)
    }
}
