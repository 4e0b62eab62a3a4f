//! Durable graph store.
//!
//! Wraps:
//! - A [`GraphState`] for reads, rebuilt from the log on open
//! - A [`WriteAheadLog`]; every state change is logged before it is applied
//! - A [`DirLock`] so only one process writes the graph
//!
//! Merges that would not change the graph write nothing to the log, so
//! rerunning a batch over already-ingested images does not grow it. A new
//! image on an existing edge logs only that image id, not the whole edge.

use std::path::{Path, PathBuf};
use std::sync::RwLock;

use chrono::Utc;

use crate::entity::{Entity, EntityId, Relationship};
use crate::storage::memory::{lock_err, Applied, GraphState};
use crate::storage::traits::{GraphStore, StorageError};

use super::file_lock::DirLock;
use super::wal::{WalEntryKind, WriteAheadLog};
use super::PersistentConfig;

/// Name of the log file inside the data directory.
pub const WAL_FILE: &str = "graph.wal";

fn backend(context: &str, e: impl std::fmt::Display) -> StorageError {
    StorageError::BackendError(format!("{context}: {e}"))
}

/// Result of a compaction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompactionResult {
    /// Entries in the rewritten log.
    pub entries_written: u64,
    pub wal_size_before: u64,
    pub wal_size_after: u64,
}

/// Write-ahead-logged graph store backed by a data directory.
#[derive(Debug)]
pub struct PersistentGraphStore {
    dir: PathBuf,
    _lock: DirLock,
    wal: WriteAheadLog,
    state: RwLock<GraphState>,
    config: PersistentConfig,
}

impl PersistentGraphStore {
    /// Open or create a graph in `dir`, replaying its log.
    ///
    /// # Errors
    /// - If the directory cannot be created
    /// - If another process holds the directory lock
    /// - If the log is corrupt (an incomplete trailing frame is not corruption)
    pub fn open(dir: &Path, config: PersistentConfig) -> Result<Self, StorageError> {
        std::fs::create_dir_all(dir)
            .map_err(|e| backend("failed to create graph directory", e))?;
        let lock = DirLock::acquire(dir).map_err(|e| backend("failed to acquire lock", e))?;

        let (wal, recovery) = WriteAheadLog::open(&dir.join(WAL_FILE), config.sync_on_write)
            .map_err(|e| backend("failed to open WAL", e))?;

        let mut state = GraphState::default();
        let replayed = recovery.entries.len();
        for entry in recovery.entries {
            apply(&mut state, entry.kind).map_err(|e| {
                backend(&format!("failed to replay WAL entry {}", entry.sequence), e)
            })?;
        }
        if replayed > 0 {
            tracing::info!(
                dir = %dir.display(),
                replayed,
                entities = state.entities.len(),
                relationships = state.relationships.len(),
                "graph restored from WAL"
            );
        }

        Ok(Self {
            dir: dir.to_path_buf(),
            _lock: lock,
            wal,
            state: RwLock::new(state),
            config,
        })
    }

    /// The data directory.
    #[must_use]
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Current log size in bytes.
    pub fn wal_size(&self) -> Result<u64, StorageError> {
        self.wal.size_bytes().map_err(|e| backend("failed to stat WAL", e))
    }

    /// Returns true once the log has outgrown `max_wal_size`.
    pub fn needs_compaction(&self) -> Result<bool, StorageError> {
        Ok(self.wal_size()? > self.config.max_wal_size)
    }

    /// Rewrite the log as a minimal snapshot of the current graph.
    ///
    /// Safe to interrupt: the old log stays in place until the snapshot is
    /// fully written and renamed over it.
    pub fn compact(&self) -> Result<CompactionResult, StorageError> {
        // Holding the write lock keeps merges out while the snapshot is taken.
        let state = self.state.write().map_err(|_| lock_err("graph.compact"))?;
        let wal_size_before = self.wal_size()?;
        let up_to_sequence = self
            .wal
            .current_sequence()
            .map_err(|e| backend("failed to read WAL sequence", e))?;

        let mut snapshot: Vec<WalEntryKind> = state
            .sorted_entities()
            .into_iter()
            .map(WalEntryKind::EntityUpsert)
            .collect();
        snapshot.extend(
            state
                .relationships
                .values()
                .cloned()
                .map(WalEntryKind::RelationshipUpsert),
        );
        snapshot.push(WalEntryKind::Checkpoint { up_to_sequence });

        let entries_written = self
            .wal
            .rewrite(snapshot)
            .map_err(|e| backend("failed to rewrite WAL", e))?;
        drop(state);

        let result = CompactionResult {
            entries_written,
            wal_size_before,
            wal_size_after: self.wal_size()?,
        };
        tracing::info!(
            entries = result.entries_written,
            before = result.wal_size_before,
            after = result.wal_size_after,
            "WAL compacted"
        );
        Ok(result)
    }

    fn log(&self, kind: WalEntryKind) -> Result<(), StorageError> {
        self.wal
            .append(kind)
            .map(|_| ())
            .map_err(|e| backend("failed to append to WAL", e))
    }
}

/// Applies one logged mutation. Replaying the same entry twice is harmless.
fn apply(state: &mut GraphState, kind: WalEntryKind) -> Result<(), StorageError> {
    match kind {
        WalEntryKind::EntityUpsert(entity) => state.insert_entity(entity),
        WalEntryKind::PropertySet {
            entity_id,
            key,
            value,
            at,
        } => {
            state.set_property(entity_id, &key, &value, at)?;
        }
        WalEntryKind::RelationshipUpsert(edge) => state.put_relationship(edge),
        WalEntryKind::ProvenanceAdded {
            relationship_id,
            image_id,
            at,
        } => {
            state.add_provenance(relationship_id, image_id, at)?;
        }
        WalEntryKind::Checkpoint { .. } => {}
    }
    Ok(())
}

impl GraphStore for PersistentGraphStore {
    fn merge_entity(&self, name: &str) -> Result<Entity, StorageError> {
        let mut state = self.state.write().map_err(|_| lock_err("graph.merge_entity"))?;
        let key = crate::entity::normalize_name(name);
        if key.is_empty() {
            return Err(StorageError::EmptyName);
        }
        if let Some(existing) = state.lookup(&key) {
            return Ok(existing.clone());
        }

        let entity = Entity::new(&key);
        self.log(WalEntryKind::EntityUpsert(entity.clone()))?;
        state.insert_entity(entity.clone());
        Ok(entity)
    }

    fn set_property(&self, id: EntityId, key: &str, value: &str) -> Result<(), StorageError> {
        let mut state = self.state.write().map_err(|_| lock_err("graph.set_property"))?;
        let current = state
            .entities
            .get(&id)
            .ok_or(StorageError::EntityNotFound(id))?
            .attribute(key);
        if current == Some(value) {
            return Ok(());
        }

        let at = Utc::now();
        self.log(WalEntryKind::PropertySet {
            entity_id: id,
            key: key.to_string(),
            value: value.to_string(),
            at,
        })?;
        state.set_property(id, key, value, at).map(|_| ())
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
        match applied {
            Applied::Unchanged => return Ok(edge),
            Applied::Created => self.log(WalEntryKind::RelationshipUpsert(edge.clone()))?,
            Applied::Changed => self.log(WalEntryKind::ProvenanceAdded {
                relationship_id: edge.id,
                image_id,
                at: edge.updated_at,
            })?,
        }
        state.put_relationship(edge.clone());
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

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn open(dir: &Path) -> PersistentGraphStore {
        PersistentGraphStore::open(dir, PersistentConfig::default()).unwrap()
    }

    #[test]
    fn noop_merges_do_not_grow_the_log() {
        let dir = tempdir().unwrap();
        let store = open(dir.path());
        let dog = store.merge_entity("dog").unwrap();
        let ball = store.merge_entity("ball").unwrap();
        store.set_property(dog.id, "color", "black").unwrap();
        store.merge_relationship(dog.id, "CHASES", ball.id, 4).unwrap();
        let size = store.wal_size().unwrap();

        store.merge_entity("Dog").unwrap();
        store.set_property(dog.id, "color", "black").unwrap();
        store.merge_relationship(dog.id, "CHASES", ball.id, 4).unwrap();
        assert_eq!(store.wal_size().unwrap(), size);
    }

    #[test]
    fn state_survives_reopen() {
        let dir = tempdir().unwrap();
        {
            let store = open(dir.path());
            let dog = store.merge_entity("dog").unwrap();
            let ball = store.merge_entity("ball").unwrap();
            store.set_property(dog.id, "color", "black").unwrap();
            store.set_property(dog.id, "color", "brown").unwrap();
            store.merge_relationship(dog.id, "CHASES", ball.id, 1).unwrap();
            store.merge_relationship(dog.id, "CHASES", ball.id, 2).unwrap();
        }

        let store = open(dir.path());
        assert_eq!(store.entity_count().unwrap(), 2);
        let dog = store.find_entity("dog").unwrap().unwrap();
        assert_eq!(dog.attribute("color"), Some("brown"));
        let edges = store.relationships().unwrap();
        assert_eq!(edges.len(), 1);
        assert_eq!(edges[0].provenance.len(), 2);
    }

    #[test]
    fn new_provenance_logs_a_fixed_size_entry() {
        let dir = tempdir().unwrap();
        let store = open(dir.path());
        let man = store.merge_entity("man").unwrap();
        let shirt = store.merge_entity("shirt").unwrap();
        store.merge_relationship(man.id, "WEARING", shirt.id, 1).unwrap();

        let mut growth = Vec::new();
        for image_id in 100..160 {
            let before = store.wal_size().unwrap();
            store.merge_relationship(man.id, "WEARING", shirt.id, image_id).unwrap();
            growth.push(store.wal_size().unwrap() - before);
        }
        // Only timestamp precision and sequence digits may vary.
        let (first, last) = (growth[0], growth[growth.len() - 1]);
        assert!(last <= first + 24, "entry sizes grew: {first} -> {last}");

        let edges = store.relationships().unwrap();
        drop(store);
        let reopened = open(dir.path());
        assert_eq!(reopened.relationships().unwrap(), edges);
        assert_eq!(edges[0].provenance.len(), 61);
    }

    #[test]
    fn second_open_is_rejected_while_locked() {
        let dir = tempdir().unwrap();
        let _store = open(dir.path());
        let err = PersistentGraphStore::open(dir.path(), PersistentConfig::default()).unwrap_err();
        assert!(err.to_string().contains("lock"));
    }

    #[test]
    fn compaction_preserves_graph_and_shrinks_log() {
        let dir = tempdir().unwrap();
        let before_entities;
        {
            let store = open(dir.path());
            let dog = store.merge_entity("dog").unwrap();
            for i in 0..20 {
                store.set_property(dog.id, "action", &format!("run-{i}")).unwrap();
            }
            let ball = store.merge_entity("ball").unwrap();
            store.merge_relationship(dog.id, "CHASES", ball.id, 1).unwrap();

            let result = store.compact().unwrap();
            assert_eq!(result.entries_written, 4);
            assert!(result.wal_size_after < result.wal_size_before);
            before_entities = store.entities().unwrap();

            // Writes after compaction still land in the log.
            let cat = store.merge_entity("cat").unwrap();
            store.merge_relationship(cat.id, "WATCHES", dog.id, 2).unwrap();
        }

        let store = open(dir.path());
        let after = store.entities().unwrap();
        assert_eq!(after.len(), before_entities.len() + 1);
        let dog = store.find_entity("dog").unwrap().unwrap();
        assert_eq!(dog.attribute("action"), Some("run-19"));
        assert_eq!(store.relationship_count().unwrap(), 2);
    }
}
