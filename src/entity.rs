//! Entity and relationship types.
//!
//! Graph identity is name-based: an entity is identified by its normalized
//! canonical name and a relationship by the ordered triple
//! `(subject, predicate, object)`. Ids are derived from those keys with
//! UUID v5, so the same name yields the same id in every store and run.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

const ENTITY_NAMESPACE: Uuid = Uuid::from_u128(0x6c1e_5c0b_8f7a_4d2e_9b3f_0a4c_2d1e_7f01);
const RELATIONSHIP_NAMESPACE: Uuid = Uuid::from_u128(0x6c1e_5c0b_8f7a_4d2e_9b3f_0a4c_2d1e_7f02);

/// Normalizes an entity name into its identity key.
///
/// Trims, collapses internal whitespace to single spaces and lowercases.
///
/// ```
/// use captiongraph::entity::normalize_name;
///
/// assert_eq!(normalize_name("  A   Black Dog "), "a black dog");
/// ```
#[must_use]
pub fn normalize_name(name: &str) -> String {
    name.split_whitespace()
        .map(str::to_lowercase)
        .collect::<Vec<_>>()
        .join(" ")
}

/// Stable entity identifier derived from the normalized entity name.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EntityId(Uuid);

impl EntityId {
    /// Derives the id for an entity name. The name is normalized first.
    #[must_use]
    pub fn for_name(name: &str) -> Self {
        Self(Uuid::new_v5(&ENTITY_NAMESPACE, normalize_name(name).as_bytes()))
    }

    /// Creates an entity ID from an existing UUID.
    #[must_use]
    pub const fn from_uuid(uuid: Uuid) -> Self {
        Self(uuid)
    }

    /// Returns the underlying UUID.
    #[must_use]
    pub const fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl fmt::Display for EntityId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Stable relationship identifier derived from `(subject, predicate, object)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RelationshipId(Uuid);

impl RelationshipId {
    /// Derives the id for an edge.
    #[must_use]
    pub fn for_edge(subject: EntityId, predicate: &str, object: EntityId) -> Self {
        let mut key = Vec::with_capacity(32 + predicate.len() + 2);
        key.extend_from_slice(subject.as_uuid().as_bytes());
        key.push(0);
        key.extend_from_slice(predicate.as_bytes());
        key.push(0);
        key.extend_from_slice(object.as_uuid().as_bytes());
        Self(Uuid::new_v5(&RELATIONSHIP_NAMESPACE, &key))
    }
}

impl fmt::Display for RelationshipId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A named node in the caption graph.
///
/// Attributes form an open map; the most recent write for a given
/// attribute name wins.
///
/// ```
/// use captiongraph::Entity;
///
/// let entity = Entity::new("Black Dog");
/// assert_eq!(entity.name, "black dog");
/// assert_eq!(entity.version, 1);
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Entity {
    pub id: EntityId,

    /// Normalized canonical name. This is the entity's identity.
    pub name: String,

    #[serde(default)]
    pub attributes: BTreeMap<String, String>,

    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,

    /// Starts at 1 and increments on every attribute change.
    pub version: u64,
}

impl Entity {
    /// Creates a new entity with no attributes.
    #[must_use]
    pub fn new(name: &str) -> Self {
        let name = normalize_name(name);
        let now = Utc::now();
        Self {
            id: EntityId::for_name(&name),
            name,
            attributes: BTreeMap::new(),
            created_at: now,
            updated_at: now,
            version: 1,
        }
    }

    /// Looks up an attribute value.
    #[must_use]
    pub fn attribute(&self, key: &str) -> Option<&str> {
        self.attributes.get(key).map(String::as_str)
    }

    /// Sets an attribute, returning true if the stored value changed.
    pub fn set_attribute(&mut self, key: &str, value: &str) -> bool {
        self.set_attribute_at(key, value, Utc::now())
    }

    /// Like [`Entity::set_attribute`] with an explicit change time (log replay).
    pub fn set_attribute_at(&mut self, key: &str, value: &str, at: DateTime<Utc>) -> bool {
        if self.attribute(key) == Some(value) {
            return false;
        }
        self.attributes.insert(key.to_string(), value.to_string());
        self.updated_at = at;
        self.version += 1;
        true
    }

    /// Returns the lightweight handle for this entity.
    #[must_use]
    pub fn handle(&self) -> EntityHandle {
        EntityHandle {
            id: self.id,
            name: self.name.clone(),
        }
    }
}

/// Reference to a merged entity, returned by merge operations.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct EntityHandle {
    pub id: EntityId,
    pub name: String,
}

/// A directed labeled edge between two entities.
///
/// One edge exists per `(subject, predicate, object)`; every image that
/// evidenced the edge is recorded in `provenance`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Relationship {
    pub id: RelationshipId,
    pub subject: EntityId,
    /// Uppercased relation label.
    pub predicate: String,
    pub object: EntityId,
    #[serde(default)]
    pub provenance: BTreeSet<i64>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Relationship {
    /// Creates an edge observed in a single image.
    #[must_use]
    pub fn new(subject: EntityId, predicate: &str, object: EntityId, image_id: i64) -> Self {
        let now = Utc::now();
        Self {
            id: RelationshipId::for_edge(subject, predicate, object),
            subject,
            predicate: predicate.to_string(),
            object,
            provenance: BTreeSet::from([image_id]),
            created_at: now,
            updated_at: now,
        }
    }

    /// Records an image as evidence, returning true if it was not yet recorded.
    pub fn add_provenance(&mut self, image_id: i64) -> bool {
        self.add_provenance_at(image_id, Utc::now())
    }

    /// Like [`Relationship::add_provenance`], stamping the change with `at`.
    pub fn add_provenance_at(&mut self, image_id: i64, at: DateTime<Utc>) -> bool {
        if self.provenance.insert(image_id) {
            self.updated_at = at;
            true
        } else {
            false
        }
    }

    /// Returns true if either endpoint is the given entity.
    #[must_use]
    pub fn touches(&self, entity: EntityId) -> bool {
        self.subject == entity || self.object == entity
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_name() {
        assert_eq!(normalize_name("Child"), "child");
        assert_eq!(normalize_name("two  Child\tand a car"), "two child and a car");
        assert_eq!(normalize_name("   "), "");
    }

    #[test]
    fn test_entity_id_is_stable_across_case_and_spacing() {
        assert_eq!(EntityId::for_name("Black Dog"), EntityId::for_name(" black  dog"));
        assert_ne!(EntityId::for_name("dog"), EntityId::for_name("cat"));
    }

    #[test]
    fn test_relationship_id_is_directional() {
        let dog = EntityId::for_name("dog");
        let ball = EntityId::for_name("ball");
        assert_eq!(
            RelationshipId::for_edge(dog, "CHASES", ball),
            RelationshipId::for_edge(dog, "CHASES", ball)
        );
        assert_ne!(
            RelationshipId::for_edge(dog, "CHASES", ball),
            RelationshipId::for_edge(ball, "CHASES", dog)
        );
        assert_ne!(
            RelationshipId::for_edge(dog, "CHASES", ball),
            RelationshipId::for_edge(dog, "BITES", ball)
        );
    }

    #[test]
    fn test_set_attribute_last_write_wins() {
        let mut entity = Entity::new("dog");
        assert!(entity.set_attribute("color", "black"));
        assert!(entity.set_attribute("color", "brown"));
        assert!(!entity.set_attribute("color", "brown"));
        assert_eq!(entity.attribute("color"), Some("brown"));
        assert_eq!(entity.attributes.len(), 1);
        assert_eq!(entity.version, 3);
    }

    #[test]
    fn test_add_provenance_is_set_like() {
        let mut rel = Relationship::new(EntityId::for_name("a"), "NEAR", EntityId::for_name("b"), 1);
        assert!(!rel.add_provenance(1));
        assert!(rel.add_provenance(2));
        assert_eq!(rel.provenance.iter().copied().collect::<Vec<_>>(), vec![1, 2]);
    }

    #[test]
    fn test_entity_serde_roundtrip_keeps_attributes() {
        let mut entity = Entity::new("dog");
        entity.set_attribute("size", "small");
        let json = serde_json::to_string(&entity).unwrap();
        let back: Entity = serde_json::from_str(&json).unwrap();
        assert_eq!(back, entity);
    }
}
