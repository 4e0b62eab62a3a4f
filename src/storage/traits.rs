//! Abstract graph storage contract.
//!
//! The pipeline only needs upserts keyed by identity plus a handful of
//! reads. Backends:
//! - [`InMemoryGraphStore`](super::InMemoryGraphStore) for tests and embedded use
//! - `PersistentGraphStore` (feature `persistent`) for durable runs

use thiserror::Error;

use crate::entity::{Entity, EntityId, Relationship, RelationshipId};

/// Errors that can occur during storage operations.
#[derive(Debug, Error)]
pub enum StorageError {
    /// Entity not found.
    #[error("Entity not found: {0}")]
    EntityNotFound(EntityId),

    /// Relationship not found.
    #[error("Relationship not found: {0}")]
    RelationshipNotFound(RelationshipId),

    /// Name is empty after normalization.
    #[error("Entity name cannot be empty")]
    EmptyName,

    /// Predicate is empty.
    #[error("Relationship predicate cannot be empty")]
    EmptyPredicate,

    /// Backend error.
    #[error("Storage backend error: {0}")]
    BackendError(String),

    /// Serialization failed.
    #[error("Serialization error: {0}")]
    SerializationError(String),

    /// Connection failed.
    #[error("Connection error: {0}")]
    ConnectionError(String),
}

/// Storage contract for the caption graph.
///
/// Every mutation is an upsert keyed by identity, so calling it again with
/// the same arguments leaves the graph unchanged.
pub trait GraphStore: Send + Sync {
    /// Create the entity if absent, else return the existing one.
    ///
    /// The name is normalized before lookup.
    fn merge_entity(&self, name: &str) -> Result<Entity, StorageError>;

    /// Overwrite a single attribute on an existing entity.
    ///
    /// # Errors
    /// - `EntityNotFound` if `id` does not exist
    fn set_property(&self, id: EntityId, key: &str, value: &str) -> Result<(), StorageError>;

    /// Create the edge `(from, label, to)` if absent and record `image_id`
    /// as provenance. Returns the post-merge edge.
    ///
    /// # Errors
    /// - `EntityNotFound` if either endpoint does not exist
    /// - `EmptyPredicate` if `label` is empty
    fn merge_relationship(
        &self,
        from: EntityId,
        label: &str,
        to: EntityId,
        image_id: i64,
    ) -> Result<Relationship, StorageError>;

    /// Get an entity by ID.
    fn get_entity(&self, id: EntityId) -> Result<Option<Entity>, StorageError>;

    /// Find an entity by name (normalized before lookup).
    fn find_entity(&self, name: &str) -> Result<Option<Entity>, StorageError>;

    /// All entities, ordered by name.
    fn entities(&self) -> Result<Vec<Entity>, StorageError>;

    /// All relationships, ordered by id.
    fn relationships(&self) -> Result<Vec<Relationship>, StorageError>;

    /// Relationships where the entity is subject or object.
    fn relationships_for(&self, id: EntityId) -> Result<Vec<Relationship>, StorageError>;

    /// Number of entities.
    fn entity_count(&self) -> Result<usize, StorageError>;

    /// Number of relationships.
    fn relationship_count(&self) -> Result<usize, StorageError>;
}
