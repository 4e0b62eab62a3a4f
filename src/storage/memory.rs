//! In-memory storage backend.
//!
//! Thread-safe in-memory implementation of [`GraphStore`]. It is intended
//! for embedded usage, tests, and as the reference for upsert semantics.
//! The persistent backend replays its log into the same [`GraphState`].

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::RwLock;

use chrono::{DateTime, Utc};

use crate::entity::{normalize_name, Entity, EntityId, Relationship, RelationshipId};
use crate::storage::traits::{GraphStore, StorageError};

pub(crate) fn lock_err(context: &'static str) -> StorageError {
    StorageError::BackendError(format!("poisoned lock: {context}"))
}

/// Outcome of applying one upsert to a [`GraphState`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Applied {
    Created,
    Changed,
    Unchanged,
}

impl Applied {
    pub(crate) fn is_write(self) -> bool {
        !matches!(self, Self::Unchanged)
    }
}

/// Graph contents plus secondary indexes.
#[derive(Debug, Default, Clone)]
pub(crate) struct GraphState {
    pub(crate) entities: HashMap<EntityId, Entity>,
    pub(crate) by_name: BTreeMap<String, EntityId>,
    pub(crate) relationships: BTreeMap<RelationshipId, Relationship>,
    pub(crate) by_entity: HashMap<EntityId, BTreeSet<RelationshipId>>,
}

impl GraphState {
    pub(crate) fn lookup(&self, name: &str) -> Option<&Entity> {
        self.by_name
            .get(&normalize_name(name))
            .and_then(|id| self.entities.get(id))
    }

    /// Returns the entity for `name`, creating it if needed.
    pub(crate) fn upsert_entity(&mut self, name: &str) -> Result<(Entity, Applied), StorageError> {
        let key = normalize_name(name);
        if key.is_empty() {
            return Err(StorageError::EmptyName);
        }
        if let Some(existing) = self.by_name.get(&key).and_then(|id| self.entities.get(id)) {
            return Ok((existing.clone(), Applied::Unchanged));
        }
        let entity = Entity::new(&key);
        self.insert_entity(entity.clone());
        Ok((entity, Applied::Created))
    }

    /// Inserts or replaces a full entity record (used by log replay).
    pub(crate) fn insert_entity(&mut self, entity: Entity) {
        self.by_name.insert(entity.name.clone(), entity.id);
        self.entities.insert(entity.id, entity);
    }

    pub(crate) fn set_property(
        &mut self,
        id: EntityId,
        key: &str,
        value: &str,
        at: DateTime<Utc>,
    ) -> Result<Applied, StorageError> {
        let entity = self
            .entities
            .get_mut(&id)
            .ok_or(StorageError::EntityNotFound(id))?;
        Ok(if entity.set_attribute_at(key, value, at) {
            Applied::Changed
        } else {
            Applied::Unchanged
        })
    }

    /// Checks a prospective edge without mutating anything.
    ///
    /// Returns the edge as it would look after the merge and whether the
    /// merge changes stored state.
    pub(crate) fn preview_relationship(
        &self,
        from: EntityId,
        label: &str,
        to: EntityId,
        image_id: i64,
    ) -> Result<(Relationship, Applied), StorageError> {
        if label.is_empty() {
            return Err(StorageError::EmptyPredicate);
        }
        for endpoint in [from, to] {
            if !self.entities.contains_key(&endpoint) {
                return Err(StorageError::EntityNotFound(endpoint));
            }
        }

        let id = RelationshipId::for_edge(from, label, to);
        match self.relationships.get(&id) {
            Some(existing) => {
                let mut edge = existing.clone();
                let applied = if edge.add_provenance(image_id) {
                    Applied::Changed
                } else {
                    Applied::Unchanged
                };
                Ok((edge, applied))
            }
            None => Ok((Relationship::new(from, label, to, image_id), Applied::Created)),
        }
    }

    /// Records `image_id` as evidence for an existing edge (used by log replay).
    pub(crate) fn add_provenance(
        &mut self,
        id: RelationshipId,
        image_id: i64,
        at: DateTime<Utc>,
    ) -> Result<Applied, StorageError> {
        let edge = self
            .relationships
            .get_mut(&id)
            .ok_or(StorageError::RelationshipNotFound(id))?;
        Ok(if edge.add_provenance_at(image_id, at) {
            Applied::Changed
        } else {
            Applied::Unchanged
        })
    }

    /// Inserts or replaces a full edge record.
    pub(crate) fn put_relationship(&mut self, edge: Relationship) {
        for endpoint in [edge.subject, edge.object] {
            self.by_entity.entry(endpoint).or_default().insert(edge.id);
        }
        self.relationships.insert(edge.id, edge);
    }

    pub(crate) fn sorted_entities(&self) -> Vec<Entity> {
        self.by_name
            .values()
            .filter_map(|id| self.entities.get(id).cloned())
            .collect()
    }

    pub(crate) fn relationships_for(&self, id: EntityId) -> Vec<Relationship> {
        self.by_entity
            .get(&id)
            .map(|ids| {
                ids.iter()
                    .filter_map(|rid| self.relationships.get(rid).cloned())
                    .collect()
            })
            .unwrap_or_default()
    }
}

/// Thread-safe in-memory graph store.
#[derive(Debug, Default)]
pub struct InMemoryGraphStore {
    state: RwLock<GraphState>,
}

impl InMemoryGraphStore {
    /// Create a new empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

impl GraphStore for InMemoryGraphStore {
    fn merge_entity(&self, name: &str) -> Result<Entity, StorageError> {
        let mut state = self.state.write().map_err(|_| lock_err("graph.merge_entity"))?;
        state.upsert_entity(name).map(|(entity, _)| entity)
    }

    fn set_property(&self, id: EntityId, key: &str, value: &str) -> Result<(), StorageError> {
        let mut state = self.state.write().map_err(|_| lock_err("graph.set_property"))?;
        state.set_property(id, key, value, Utc::now()).map(|_| ())
    }

    fn merge_relationship(
        &self,
        from: EntityId,
        label: &str,
        to: EntityId,
        image_id: i64,
    ) -> Result<Relationship, StorageError> {
        let mut state = self
            .state
            .write()
            .map_err(|_| lock_err("graph.merge_relationship"))?;
        let (edge, applied) = state.preview_relationship(from, label, to, image_id)?;
        if applied.is_write() {
            state.put_relationship(edge.clone());
        }
        Ok(edge)
    }

    fn get_entity(&self, id: EntityId) -> Result<Option<Entity>, StorageError> {
        let state = self.state.read().map_err(|_| lock_err("graph.get_entity"))?;
        Ok(state.entities.get(&id).cloned())
    }

    fn find_entity(&self, name: &str) -> Result<Option<Entity>, StorageError> {
        let state = self.state.read().map_err(|_| lock_err("graph.find_entity"))?;
        Ok(state.lookup(name).cloned())
    }

    fn entities(&self) -> Result<Vec<Entity>, StorageError> {
        let state = self.state.read().map_err(|_| lock_err("graph.entities"))?;
        Ok(state.sorted_entities())
    }

    fn relationships(&self) -> Result<Vec<Relationship>, StorageError> {
        let state = self.state.read().map_err(|_| lock_err("graph.relationships"))?;
        Ok(state.relationships.values().cloned().collect())
    }

    fn relationships_for(&self, id: EntityId) -> Result<Vec<Relationship>, StorageError> {
        let state = self
            .state
            .read()
            .map_err(|_| lock_err("graph.relationships_for"))?;
        Ok(state.relationships_for(id))
    }

    fn entity_count(&self) -> Result<usize, StorageError> {
        let state = self.state.read().map_err(|_| lock_err("graph.entity_count"))?;
        Ok(state.entities.len())
    }

    fn relationship_count(&self) -> Result<usize, StorageError> {
        let state = self
            .state
            .read()
            .map_err(|_| lock_err("graph.relationship_count"))?;
        Ok(state.relationships.len())
    }
}
