//! Authoritative atom store: transition table, CAS reservation, recovery.
//!
//! ## Reservation protocol
//!
//! [`AtomStore::reserve`] is the only path into `Busy` and is implemented as
//! a compare-and-swap against the backing store, so at most one caller wins a
//! reservation per atom. Losers get [`AtomStoreError::Conflict`] and decide
//! for themselves whether to retry. No lock is held across operations.
//!
//! ## Crash recovery
//!
//! A process that dies holding a reservation leaves its atom `Busy`.
//! [`AtomStore::recover_stuck`] runs once at startup and resets every such
//! atom to `Claimed`: content, if any, is still intact, so `Claimed` is the
//! safe fallback.

use std::sync::Arc;

use crate::bus::EventBus;
use crate::digest::compute_content_hash;
use crate::store::{CasOutcome, RecordStore};
use crate::types::{Anchor, AtomEvent, AtomRecord, AtomStatus};
use crate::vault::{FossilVault, Materializer};

/// Error type for atom store operations.
#[derive(Debug, thiserror::Error)]
pub enum AtomStoreError {
    /// Unknown atom id.
    #[error("Atom not found: {0}")]
    NotFound(String),
    /// Optimistic reservation lost the race.
    #[error("Reservation conflict on {atom_id}: expected {expected}, found {actual}")]
    Conflict {
        /// Atom the reservation targeted.
        atom_id: String,
        /// Status the caller observed.
        expected: AtomStatus,
        /// Status actually present.
        actual: AtomStatus,
    },
    /// Requested edge is not in the transition table.
    #[error("Invalid transition: {from} -> {to}")]
    InvalidTransition {
        /// Current status.
        from: AtomStatus,
        /// Requested status.
        to: AtomStatus,
    },
    /// Backing store failure.
    #[error("Store error: {0}")]
    Store(String),
}

impl AtomStoreError {
    /// Create a store error from any backend error type.
    pub fn from_store<E: std::error::Error>(e: E) -> Self {
        Self::Store(e.to_string())
    }
}

/// Single source of truth for atom status and content.
///
/// Enforces the transition table and mirrors every mutation to the
/// [`EventBus`]. Content overwrites with a differing hash go through the
/// [`FossilVault`] first, so history is append-only.
pub struct AtomStore<S> {
    store: Arc<S>,
    vault: FossilVault<S>,
    bus: Arc<EventBus>,
}

impl<S: RecordStore> AtomStore<S> {
    /// Create a store over the given backend and bus.
    pub fn new(store: Arc<S>, bus: Arc<EventBus>) -> Self {
        let vault = FossilVault::new(Arc::clone(&store), Arc::clone(&bus));
        Self { store, vault, bus }
    }

    /// Create a store whose vault materializes revived content through the
    /// given collaborator.
    pub fn with_materializer(
        store: Arc<S>,
        bus: Arc<EventBus>,
        materializer: Arc<dyn Materializer>,
    ) -> Self {
        let vault = FossilVault::new(Arc::clone(&store), Arc::clone(&bus))
            .with_materializer(materializer);
        Self { store, vault, bus }
    }

    /// The fossil vault sharing this store's backend and bus.
    pub fn vault(&self) -> &FossilVault<S> {
        &self.vault
    }

    /// Upsert an atom.
    ///
    /// A new atom starts `Hollow` when no content is supplied, `Claimed`
    /// otherwise. Overwriting an existing atom with a differing content hash
    /// fossilizes the prior version first; an `Endorsed` atom whose content
    /// changes re-enters the lifecycle as `Claimed`.
    pub async fn create(
        &self,
        id: &str,
        content: Option<&str>,
        domain: &str,
    ) -> Result<AtomRecord, AtomStoreError> {
        let existing = self
            .store
            .get_atom(id)
            .await
            .map_err(AtomStoreError::from_store)?;

        let record = match existing {
            None => {
                let status = if content.is_some() {
                    AtomStatus::Claimed
                } else {
                    AtomStatus::Hollow
                };
                let record = AtomRecord::new(id, content.unwrap_or(""), domain, status);
                self.store
                    .put_atom(record.clone())
                    .await
                    .map_err(AtomStoreError::from_store)?;
                tracing::info!(atom_id = id, status = %status, "Atom created");
                record
            }
            Some(mut atom) => {
                if atom.is_fossil() {
                    // Fossils are immutable; a fossil id is not a live atom.
                    return Err(AtomStoreError::InvalidTransition {
                        from: AtomStatus::Fossil,
                        to: AtomStatus::Claimed,
                    });
                }

                let new_content = content.unwrap_or("");
                let content_changed = compute_content_hash(new_content) != atom.content_hash;
                if content_changed {
                    let fossil_id = self
                        .vault
                        .snapshot(id)
                        .await
                        .map_err(|e| AtomStoreError::Store(e.to_string()))?;
                    tracing::info!(atom_id = id, fossil_id = %fossil_id, "Prior content fossilized");
                }

                atom.set_content(new_content);
                atom.domain = domain.to_string();
                if content_changed && atom.status == AtomStatus::Endorsed {
                    atom.status = AtomStatus::Claimed;
                }
                self.store
                    .put_atom(atom.clone())
                    .await
                    .map_err(AtomStoreError::from_store)?;
                atom
            }
        };

        // Every live atom has a position, (0, 0) until moved.
        if self
            .store
            .get_anchor(&record.id)
            .await
            .map_err(AtomStoreError::from_store)?
            .is_none()
        {
            self.store
                .upsert_anchor(Anchor::origin(&record.id))
                .await
                .map_err(AtomStoreError::from_store)?;
        }

        self.bus.publish(AtomEvent::AtomChanged {
            atom_id: record.id.clone(),
            status: record.status,
        });
        Ok(record)
    }

    /// Atomically transition `expected -> Busy`.
    ///
    /// The only sanctioned way to begin generation (`expected = Hollow`) or
    /// validation (`expected = Claimed`) work.
    pub async fn reserve(&self, id: &str, expected: AtomStatus) -> Result<(), AtomStoreError> {
        if !expected.is_reservable() {
            return Err(AtomStoreError::InvalidTransition {
                from: expected,
                to: AtomStatus::Busy,
            });
        }

        match self
            .store
            .compare_and_swap_status(id, expected, AtomStatus::Busy)
            .await
            .map_err(AtomStoreError::from_store)?
        {
            CasOutcome::Swapped => {
                tracing::debug!(atom_id = id, from = %expected, "Reservation acquired");
                self.bus.publish(AtomEvent::AtomChanged {
                    atom_id: id.to_string(),
                    status: AtomStatus::Busy,
                });
                Ok(())
            }
            CasOutcome::Mismatch(actual) => Err(AtomStoreError::Conflict {
                atom_id: id.to_string(),
                expected,
                actual,
            }),
            CasOutcome::Missing => Err(AtomStoreError::NotFound(id.to_string())),
        }
    }

    /// End a reservation, transitioning `Busy -> next`.
    pub async fn release(&self, id: &str, next: AtomStatus) -> Result<(), AtomStoreError> {
        if !next.is_release_target() {
            return Err(AtomStoreError::InvalidTransition {
                from: AtomStatus::Busy,
                to: next,
            });
        }

        match self
            .store
            .compare_and_swap_status(id, AtomStatus::Busy, next)
            .await
            .map_err(AtomStoreError::from_store)?
        {
            CasOutcome::Swapped => {
                tracing::debug!(atom_id = id, to = %next, "Reservation released");
                self.bus.publish(AtomEvent::AtomChanged {
                    atom_id: id.to_string(),
                    status: next,
                });
                Ok(())
            }
            CasOutcome::Mismatch(actual) => Err(AtomStoreError::InvalidTransition {
                from: actual,
                to: next,
            }),
            CasOutcome::Missing => Err(AtomStoreError::NotFound(id.to_string())),
        }
    }

    /// Fetch an atom by id.
    pub async fn get(&self, id: &str) -> Result<AtomRecord, AtomStoreError> {
        self.store
            .get_atom(id)
            .await
            .map_err(AtomStoreError::from_store)?
            .ok_or_else(|| AtomStoreError::NotFound(id.to_string()))
    }

    /// Fetch all atoms, fossils included.
    pub async fn list(&self) -> Result<Vec<AtomRecord>, AtomStoreError> {
        self.store
            .list_atoms()
            .await
            .map_err(AtomStoreError::from_store)
    }

    /// Reset every atom stuck in `Busy` to `Claimed`.
    ///
    /// Run once at process startup. A reservation that survived a restart
    /// belongs to a crashed holder whose in-flight work is lost.
    pub async fn recover_stuck(&self) -> Result<Vec<String>, AtomStoreError> {
        let reclaimed = self
            .store
            .reset_busy(AtomStatus::Claimed)
            .await
            .map_err(AtomStoreError::from_store)?;

        if !reclaimed.is_empty() {
            tracing::info!(count = reclaimed.len(), "Reset stuck reservations to claimed");
            for atom_id in &reclaimed {
                self.bus.publish(AtomEvent::AtomChanged {
                    atom_id: atom_id.clone(),
                    status: AtomStatus::Claimed,
                });
            }
            self.bus.publish(AtomEvent::RecoveryCompleted {
                reclaimed: reclaimed.len() as u64,
            });
        }
        Ok(reclaimed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::InMemoryRecordStore;

    fn make_store() -> (AtomStore<InMemoryRecordStore>, Arc<EventBus>) {
        let backend = Arc::new(InMemoryRecordStore::new());
        let bus = Arc::new(EventBus::new());
        (AtomStore::new(backend, Arc::clone(&bus)), bus)
    }

    #[tokio::test]
    async fn test_create_without_content_is_hollow() {
        let (atoms, _bus) = make_store();
        let record = atoms.create("h1", None, "generic").await.unwrap();
        assert_eq!(record.status, AtomStatus::Hollow);
        assert_eq!(record.content, "");
    }

    #[tokio::test]
    async fn test_create_with_content_is_claimed() {
        let (atoms, _bus) = make_store();
        let record = atoms.create("doc.txt", Some("x"), "generic").await.unwrap();
        assert_eq!(record.status, AtomStatus::Claimed);
        assert_eq!(record.content_hash, compute_content_hash("x"));
    }

    #[tokio::test]
    async fn test_create_seeds_origin_anchor() {
        let backend = Arc::new(InMemoryRecordStore::new());
        let bus = Arc::new(EventBus::new());
        let atoms = AtomStore::new(Arc::clone(&backend), bus);

        atoms.create("doc.txt", Some("x"), "generic").await.unwrap();
        let anchor = backend.get_anchor("doc.txt").await.unwrap().unwrap();
        assert_eq!((anchor.x, anchor.y), (0, 0));

        // An existing position survives overwrites.
        backend.upsert_anchor(Anchor::new("doc.txt", 5, 7)).await.unwrap();
        atoms.create("doc.txt", Some("y"), "generic").await.unwrap();
        let anchor = backend.get_anchor("doc.txt").await.unwrap().unwrap();
        assert_eq!((anchor.x, anchor.y), (5, 7));
    }

    #[tokio::test]
    async fn test_overwrite_fossilizes_prior_content() {
        let (atoms, _bus) = make_store();
        atoms.create("doc.txt", Some("x"), "generic").await.unwrap();
        atoms.create("doc.txt", Some("y"), "generic").await.unwrap();

        let all = atoms.list().await.unwrap();
        let fossils: Vec<_> = all.iter().filter(|a| a.is_fossil()).collect();
        assert_eq!(fossils.len(), 1);
        assert!(fossils[0].id.starts_with("doc.txt@"));
        assert_eq!(fossils[0].content, "x");

        let live = atoms.get("doc.txt").await.unwrap();
        assert_eq!(live.content, "y");
        assert_eq!(live.content_hash, compute_content_hash("y"));
    }

    #[tokio::test]
    async fn test_overwrite_same_content_no_fossil() {
        let (atoms, _bus) = make_store();
        atoms.create("doc.txt", Some("x"), "generic").await.unwrap();
        atoms.create("doc.txt", Some("x"), "legal").await.unwrap();

        let all = atoms.list().await.unwrap();
        assert_eq!(all.len(), 1);
        // Domain is still overwritten.
        assert_eq!(all[0].domain, "legal");
    }

    #[tokio::test]
    async fn test_overwrite_demotes_endorsed() {
        let (atoms, _bus) = make_store();
        atoms.create("doc.txt", Some("x"), "generic").await.unwrap();
        atoms.reserve("doc.txt", AtomStatus::Claimed).await.unwrap();
        atoms.release("doc.txt", AtomStatus::Endorsed).await.unwrap();

        let updated = atoms.create("doc.txt", Some("y"), "generic").await.unwrap();
        assert_eq!(updated.status, AtomStatus::Claimed);
    }

    #[tokio::test]
    async fn test_create_over_fossil_rejected() {
        let (atoms, _bus) = make_store();
        atoms.create("doc.txt", Some("x"), "generic").await.unwrap();
        atoms.create("doc.txt", Some("y"), "generic").await.unwrap();

        let fossil_id = atoms
            .list()
            .await
            .unwrap()
            .into_iter()
            .find(|a| a.is_fossil())
            .unwrap()
            .id;
        let err = atoms.create(&fossil_id, Some("z"), "generic").await.unwrap_err();
        assert!(matches!(err, AtomStoreError::InvalidTransition { from: AtomStatus::Fossil, .. }));
    }

    #[tokio::test]
    async fn test_reserve_conflict_after_first_win() {
        let (atoms, _bus) = make_store();
        atoms.create("h1", None, "generic").await.unwrap();

        atoms.reserve("h1", AtomStatus::Hollow).await.unwrap();
        let err = atoms.reserve("h1", AtomStatus::Hollow).await.unwrap_err();
        assert!(matches!(
            err,
            AtomStoreError::Conflict { expected: AtomStatus::Hollow, actual: AtomStatus::Busy, .. }
        ));
    }

    #[tokio::test]
    async fn test_concurrent_reserve_exactly_one_winner() {
        let backend = Arc::new(InMemoryRecordStore::new());
        let bus = Arc::new(EventBus::new());
        let atoms = Arc::new(AtomStore::new(backend, bus));
        atoms.create("h1", None, "generic").await.unwrap();

        let a = {
            let atoms = Arc::clone(&atoms);
            tokio::spawn(async move { atoms.reserve("h1", AtomStatus::Hollow).await })
        };
        let b = {
            let atoms = Arc::clone(&atoms);
            tokio::spawn(async move { atoms.reserve("h1", AtomStatus::Hollow).await })
        };

        let results = [a.await.unwrap(), b.await.unwrap()];
        let wins = results.iter().filter(|r| r.is_ok()).count();
        let conflicts = results
            .iter()
            .filter(|r| matches!(r, Err(AtomStoreError::Conflict { .. })))
            .count();
        assert_eq!(wins, 1);
        assert_eq!(conflicts, 1);
    }

    #[tokio::test]
    async fn test_reserve_rejects_non_reservable_expected() {
        let (atoms, _bus) = make_store();
        atoms.create("doc.txt", Some("x"), "generic").await.unwrap();

        let err = atoms.reserve("doc.txt", AtomStatus::Endorsed).await.unwrap_err();
        assert!(matches!(err, AtomStoreError::InvalidTransition { .. }));
    }

    #[tokio::test]
    async fn test_reserve_missing_atom() {
        let (atoms, _bus) = make_store();
        let err = atoms.reserve("ghost", AtomStatus::Hollow).await.unwrap_err();
        assert!(matches!(err, AtomStoreError::NotFound(_)));
    }

    #[tokio::test]
    async fn test_release_requires_busy() {
        let (atoms, _bus) = make_store();
        atoms.create("doc.txt", Some("x"), "generic").await.unwrap();

        let err = atoms.release("doc.txt", AtomStatus::Endorsed).await.unwrap_err();
        assert!(matches!(
            err,
            AtomStoreError::InvalidTransition { from: AtomStatus::Claimed, to: AtomStatus::Endorsed }
        ));
    }

    #[tokio::test]
    async fn test_release_rejects_busy_and_fossil_targets() {
        let (atoms, _bus) = make_store();
        atoms.create("doc.txt", Some("x"), "generic").await.unwrap();
        atoms.reserve("doc.txt", AtomStatus::Claimed).await.unwrap();

        for bad in [AtomStatus::Busy, AtomStatus::Fossil] {
            let err = atoms.release("doc.txt", bad).await.unwrap_err();
            assert!(matches!(err, AtomStoreError::InvalidTransition { .. }));
        }
    }

    #[tokio::test]
    async fn test_recover_stuck_resets_to_claimed() {
        let (atoms, _bus) = make_store();
        atoms.create("a", None, "generic").await.unwrap();
        atoms.create("b", Some("x"), "generic").await.unwrap();
        atoms.reserve("a", AtomStatus::Hollow).await.unwrap();
        atoms.reserve("b", AtomStatus::Claimed).await.unwrap();

        let reclaimed = atoms.recover_stuck().await.unwrap();
        assert_eq!(reclaimed.len(), 2);

        for atom in atoms.list().await.unwrap() {
            assert_ne!(atom.status, AtomStatus::Busy);
            assert_eq!(atom.status, AtomStatus::Claimed);
        }
    }

    #[tokio::test]
    async fn test_event_sequence_for_lifecycle() {
        let backend = Arc::new(InMemoryRecordStore::new());
        let bus = Arc::new(EventBus::new());
        let atoms = AtomStore::new(backend, Arc::clone(&bus));
        let mut sub = bus.subscribe();

        atoms.create("doc.txt", Some("x"), "generic").await.unwrap();
        atoms.reserve("doc.txt", AtomStatus::Claimed).await.unwrap();
        atoms.release("doc.txt", AtomStatus::Endorsed).await.unwrap();

        let expected = [AtomStatus::Claimed, AtomStatus::Busy, AtomStatus::Endorsed];
        for status in expected {
            match sub.recv().await.unwrap() {
                AtomEvent::AtomChanged { atom_id, status: seen } => {
                    assert_eq!(atom_id, "doc.txt");
                    assert_eq!(seen, status);
                }
                other => panic!("unexpected event: {other:?}"),
            }
        }
    }
}
