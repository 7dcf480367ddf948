//! Persistence collaborator
//!
//! The engine works on a fully loaded revision graph. A store supplies that
//! graph, tells which revision an entity belongs to, and receives the
//! recalculated graph back.

use crate::error::Result;
use fabcalc_core::{EntityId, Revision};
use std::collections::BTreeMap;

/// An entity addressed by a trigger point
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EntityRef {
    Row(EntityId),
    Worksheet(EntityId),
    Package(EntityId),
    Revision(EntityId),
}

/// Loads and saves revision graphs
pub trait EstimateStore {
    /// Load a revision with everything it owns, or `None` if it does not exist
    fn load_revision(&self, revision_id: EntityId) -> Result<Option<Revision>>;

    /// Id of the revision owning an entity
    fn find_revision_of(&self, entity: EntityRef) -> Result<Option<EntityId>>;

    /// Persist a recalculated revision
    fn save_revision(&mut self, revision: &Revision) -> Result<()>;
}

/// Store keeping revisions in memory
#[derive(Debug, Clone, Default)]
pub struct InMemoryStore {
    revisions: BTreeMap<EntityId, Revision>,
}

impl InMemoryStore {
    /// Create an empty store
    pub fn new() -> Self {
        Self::default()
    }

    /// Add or replace a revision
    pub fn insert(&mut self, revision: Revision) {
        self.revisions.insert(revision.id, revision);
    }

    /// Stored revision by id
    pub fn revision(&self, revision_id: EntityId) -> Option<&Revision> {
        self.revisions.get(&revision_id)
    }

    /// Stored revision by id, mutably
    pub fn revision_mut(&mut self, revision_id: EntityId) -> Option<&mut Revision> {
        self.revisions.get_mut(&revision_id)
    }

    /// All stored revisions
    pub fn revisions(&self) -> impl Iterator<Item = &Revision> {
        self.revisions.values()
    }

    /// Consume the store, returning its revisions in id order
    pub fn into_revisions(self) -> Vec<Revision> {
        self.revisions.into_values().collect()
    }
}

impl FromIterator<Revision> for InMemoryStore {
    fn from_iter<I: IntoIterator<Item = Revision>>(iter: I) -> Self {
        let mut store = Self::new();
        for revision in iter {
            store.insert(revision);
        }
        store
    }
}

impl EstimateStore for InMemoryStore {
    fn load_revision(&self, revision_id: EntityId) -> Result<Option<Revision>> {
        Ok(self.revisions.get(&revision_id).cloned())
    }

    fn find_revision_of(&self, entity: EntityRef) -> Result<Option<EntityId>> {
        let owner = self.revisions.values().find(|rev| match entity {
            EntityRef::Revision(id) => rev.id == id,
            EntityRef::Package(id) => rev.package(id).is_some(),
            EntityRef::Worksheet(id) => rev.find_worksheet(id).is_some(),
            EntityRef::Row(id) => rev.find_row(id).is_some(),
        });
        Ok(owner.map(|rev| rev.id))
    }

    fn save_revision(&mut self, revision: &Revision) -> Result<()> {
        self.revisions.insert(revision.id, revision.clone());
        Ok(())
    }
}
