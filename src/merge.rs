//! Idempotent graph merge operations.
//!
//! [`GraphMerger`] holds no state of its own; durable identity lives in the
//! [`GraphStore`]. Every operation may be repeated with the same arguments
//! without changing the graph, which is what makes reprocessing an image
//! after a crash safe.

use std::sync::Arc;

use crate::entity::{EntityHandle, Relationship};
use crate::storage::{GraphStore, StorageError};

/// Upsert front end over a graph store.
#[derive(Clone)]
pub struct GraphMerger {
    store: Arc<dyn GraphStore>,
}

impl GraphMerger {
    /// Wraps a store.
    #[must_use]
    pub fn new(store: Arc<dyn GraphStore>) -> Self {
        Self { store }
    }

    /// The underlying store.
    #[must_use]
    pub fn store(&self) -> &Arc<dyn GraphStore> {
        &self.store
    }

    /// Creates the entity if absent, else returns the existing one.
    pub fn merge_entity(&self, name: &str) -> Result<EntityHandle, StorageError> {
        let entity = self.store.merge_entity(name)?;
        tracing::trace!(entity = %entity.name, "merged entity");
        Ok(entity.handle())
    }

    /// Overwrites one attribute on an existing entity.
    pub fn set_attribute(
        &self,
        entity: &EntityHandle,
        name: &str,
        value: &str,
    ) -> Result<(), StorageError> {
        self.store.set_property(entity.id, name, value)?;
        tracing::trace!(entity = %entity.name, attribute = name, value, "set attribute");
        Ok(())
    }

    /// Creates the edge if absent and records `image_id` as provenance.
    pub fn merge_relationship(
        &self,
        subject: &EntityHandle,
        predicate: &str,
        object: &EntityHandle,
        image_id: i64,
    ) -> Result<Relationship, StorageError> {
        let edge = self
            .store
            .merge_relationship(subject.id, predicate, object.id, image_id)?;
        tracing::trace!(
            subject = %subject.name,
            predicate,
            object = %object.name,
            image_id,
            "merged relationship"
        );
        Ok(edge)
    }
}

impl std::fmt::Debug for GraphMerger {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GraphMerger").finish_non_exhaustive()
    }
}
