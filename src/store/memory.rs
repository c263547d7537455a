//! In-memory record store for testing and embedding.

use std::collections::{BTreeMap, BTreeSet};
use std::convert::Infallible;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::RwLock;

use crate::types::{Anchor, AtomRecord, AtomStatus, Envelope, Portal, Thread};
use super::{CasOutcome, RecordStore};

#[derive(Debug, Default)]
struct Inner {
    atoms: BTreeMap<String, AtomRecord>,
    anchors: BTreeMap<String, Anchor>,
    envelopes: BTreeMap<String, Envelope>,
    threads: BTreeSet<(String, String)>,
    portals: Vec<Portal>,
}

/// In-memory record store.
///
/// Uses BTree collections for deterministic iteration order. The whole store
/// sits behind one `parking_lot::RwLock`, which makes the status CAS trivially
/// atomic; lock hold times are a single map operation.
#[derive(Debug, Default)]
pub struct InMemoryRecordStore {
    inner: RwLock<Inner>,
}

impl InMemoryRecordStore {
    /// Create a new empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of atom rows, fossils included.
    pub fn num_atoms(&self) -> usize {
        self.inner.read().atoms.len()
    }

    /// Number of thread edges.
    pub fn num_threads(&self) -> usize {
        self.inner.read().threads.len()
    }
}

#[async_trait]
impl RecordStore for InMemoryRecordStore {
    type Error = Infallible;

    async fn get_atom(&self, id: &str) -> Result<Option<AtomRecord>, Self::Error> {
        Ok(self.inner.read().atoms.get(id).cloned())
    }

    async fn list_atoms(&self) -> Result<Vec<AtomRecord>, Self::Error> {
        Ok(self.inner.read().atoms.values().cloned().collect())
    }

    async fn put_atom(&self, record: AtomRecord) -> Result<(), Self::Error> {
        self.inner.write().atoms.insert(record.id.clone(), record);
        Ok(())
    }

    async fn compare_and_swap_status(
        &self,
        id: &str,
        expected: AtomStatus,
        next: AtomStatus,
    ) -> Result<CasOutcome, Self::Error> {
        let mut inner = self.inner.write();
        match inner.atoms.get_mut(id) {
            None => Ok(CasOutcome::Missing),
            Some(atom) if atom.status == expected => {
                atom.status = next;
                Ok(CasOutcome::Swapped)
            }
            Some(atom) => Ok(CasOutcome::Mismatch(atom.status)),
        }
    }

    async fn set_last_validated(
        &self,
        id: &str,
        at: DateTime<Utc>,
    ) -> Result<bool, Self::Error> {
        let mut inner = self.inner.write();
        match inner.atoms.get_mut(id) {
            None => Ok(false),
            Some(atom) => {
                atom.last_validated = Some(at);
                Ok(true)
            }
        }
    }

    async fn reset_busy(&self, fallback: AtomStatus) -> Result<Vec<String>, Self::Error> {
        let mut inner = self.inner.write();
        let mut reclaimed = Vec::new();
        for atom in inner.atoms.values_mut() {
            if atom.status == AtomStatus::Busy {
                atom.status = fallback;
                reclaimed.push(atom.id.clone());
            }
        }
        Ok(reclaimed)
    }

    async fn get_anchor(&self, atom_id: &str) -> Result<Option<Anchor>, Self::Error> {
        Ok(self.inner.read().anchors.get(atom_id).cloned())
    }

    async fn list_anchors(&self) -> Result<Vec<Anchor>, Self::Error> {
        Ok(self.inner.read().anchors.values().cloned().collect())
    }

    async fn upsert_anchor(&self, anchor: Anchor) -> Result<(), Self::Error> {
        self.inner.write().anchors.insert(anchor.atom_id.clone(), anchor);
        Ok(())
    }

    async fn list_envelopes(&self) -> Result<Vec<Envelope>, Self::Error> {
        Ok(self.inner.read().envelopes.values().cloned().collect())
    }

    async fn upsert_envelope(&self, envelope: Envelope) -> Result<(), Self::Error> {
        self.inner.write().envelopes.insert(envelope.id.clone(), envelope);
        Ok(())
    }

    async fn delete_envelope(&self, id: &str) -> Result<bool, Self::Error> {
        Ok(self.inner.write().envelopes.remove(id).is_some())
    }

    async fn list_threads(&self) -> Result<Vec<Thread>, Self::Error> {
        Ok(self
            .inner
            .read()
            .threads
            .iter()
            .map(|(source, target)| Thread::new(source.clone(), target.clone()))
            .collect())
    }

    async fn insert_thread(&self, thread: Thread) -> Result<bool, Self::Error> {
        Ok(self
            .inner
            .write()
            .threads
            .insert((thread.source, thread.target)))
    }

    async fn neighbors(&self, atom_id: &str) -> Result<Vec<String>, Self::Error> {
        let inner = self.inner.read();
        let mut neighbors: BTreeSet<String> = BTreeSet::new();
        for (source, target) in &inner.threads {
            if source == atom_id {
                neighbors.insert(target.clone());
            } else if target == atom_id {
                neighbors.insert(source.clone());
            }
        }
        Ok(neighbors.into_iter().collect())
    }

    async fn list_portals(&self, atom_id: &str) -> Result<Vec<Portal>, Self::Error> {
        Ok(self
            .inner
            .read()
            .portals
            .iter()
            .filter(|p| p.atom_id == atom_id)
            .cloned()
            .collect())
    }

    async fn add_portal(&self, portal: Portal) -> Result<(), Self::Error> {
        self.inner.write().portals.push(portal);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn make_atom(id: &str, status: AtomStatus) -> AtomRecord {
        AtomRecord::new(id, "content", "generic", status)
    }

    #[tokio::test]
    async fn test_cas_swaps_only_on_match() {
        let store = InMemoryRecordStore::new();
        store.put_atom(make_atom("a", AtomStatus::Hollow)).await.unwrap();

        let outcome = store
            .compare_and_swap_status("a", AtomStatus::Hollow, AtomStatus::Busy)
            .await
            .unwrap();
        assert_eq!(outcome, CasOutcome::Swapped);

        // Second CAS against the stale expectation observes the new status.
        let outcome = store
            .compare_and_swap_status("a", AtomStatus::Hollow, AtomStatus::Busy)
            .await
            .unwrap();
        assert_eq!(outcome, CasOutcome::Mismatch(AtomStatus::Busy));

        let outcome = store
            .compare_and_swap_status("missing", AtomStatus::Hollow, AtomStatus::Busy)
            .await
            .unwrap();
        assert_eq!(outcome, CasOutcome::Missing);
    }

    #[tokio::test]
    async fn test_reset_busy() {
        let store = InMemoryRecordStore::new();
        store.put_atom(make_atom("a", AtomStatus::Busy)).await.unwrap();
        store.put_atom(make_atom("b", AtomStatus::Endorsed)).await.unwrap();
        store.put_atom(make_atom("c", AtomStatus::Busy)).await.unwrap();

        let reclaimed = store.reset_busy(AtomStatus::Claimed).await.unwrap();
        assert_eq!(reclaimed, vec!["a".to_string(), "c".to_string()]);

        for atom in store.list_atoms().await.unwrap() {
            assert_ne!(atom.status, AtomStatus::Busy);
        }
        assert_eq!(store.get_atom("b").await.unwrap().unwrap().status, AtomStatus::Endorsed);
    }

    #[tokio::test]
    async fn test_thread_insert_is_idempotent() {
        let store = InMemoryRecordStore::new();
        assert!(store.insert_thread(Thread::new("a", "b")).await.unwrap());
        assert!(!store.insert_thread(Thread::new("a", "b")).await.unwrap());
        assert_eq!(store.num_threads(), 1);
    }

    #[tokio::test]
    async fn test_neighbors_both_directions() {
        let store = InMemoryRecordStore::new();
        store.insert_thread(Thread::new("a", "b")).await.unwrap();
        store.insert_thread(Thread::new("c", "a")).await.unwrap();
        store.insert_thread(Thread::new("b", "c")).await.unwrap();

        assert_eq!(store.neighbors("a").await.unwrap(), vec!["b".to_string(), "c".to_string()]);
        assert!(store.neighbors("x").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_envelope_crud() {
        let store = InMemoryRecordStore::new();
        store
            .upsert_envelope(Envelope::new("env-1", "legal", 0, 0, 100, 50))
            .await
            .unwrap();
        store
            .upsert_envelope(Envelope::new("env-1", "legal", 10, 10, 100, 50))
            .await
            .unwrap();

        let envelopes = store.list_envelopes().await.unwrap();
        assert_eq!(envelopes.len(), 1);
        assert_eq!(envelopes[0].x, 10);

        assert!(store.delete_envelope("env-1").await.unwrap());
        assert!(!store.delete_envelope("env-1").await.unwrap());
    }

    #[tokio::test]
    async fn test_portals_filter_by_atom() {
        let store = InMemoryRecordStore::new();
        store.add_portal(Portal::new("a", "/spec.pdf", Some("spec".into()))).await.unwrap();
        store.add_portal(Portal::new("b", "/other", None)).await.unwrap();

        let portals = store.list_portals("a").await.unwrap();
        assert_eq!(portals.len(), 1);
        assert_eq!(portals[0].path, "/spec.pdf");
    }
}
