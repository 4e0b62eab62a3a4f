//! Persistent storage backend.
//!
//! Durable, crash-safe graph storage with:
//! - Write-Ahead Logging (WAL) for crash recovery
//! - File locking for single-process access
//! - CRC32 checksums for corruption detection
//! - Snapshot compaction via write-temp-then-rename
//!
//! # Architecture
//!
//! ```text
//! ┌───────────────────────────────────────────┐
//! │           PersistentGraphStore            │
//! ├───────────────────────────────────────────┤
//! │  ┌────────────────┐  ┌─────────────────┐  │
//! │  │ WriteAheadLog  │  │   GraphState    │  │
//! │  │ (append-only)  │→ │ (in-memory view)│  │
//! │  └───────┬────────┘  └─────────────────┘  │
//! │          ↓                                │
//! │  ┌────────────────┐                       │
//! │  │ DirLock (flock)│                       │
//! │  └────────────────┘                       │
//! └───────────────────────────────────────────┘
//! ```

mod codec;
mod file_lock;
mod store;
mod wal;

pub use file_lock::DirLock;
pub use store::{CompactionResult, PersistentGraphStore, WAL_FILE};
pub use wal::{WalEntry, WalEntryKind, WalRecovery, WriteAheadLog};

use std::path::Path;

use crate::error::ConfigError;
use crate::storage::StorageError;

/// Configuration for persistent storage.
#[derive(Debug, Clone)]
pub struct PersistentConfig {
    /// WAL size above which compaction is recommended (bytes).
    pub max_wal_size: u64,
    /// Whether to fsync after every append (slower but safer).
    pub sync_on_write: bool,
}

impl Default for PersistentConfig {
    fn default() -> Self {
        Self {
            max_wal_size: 64 * 1024 * 1024, // 64 MB
            sync_on_write: true,
        }
    }
}

impl PersistentConfig {
    const MIN_WAL_SIZE: u64 = 4 * 1024; // 4 KiB minimum to avoid degenerate compaction loops

    /// Checks the configuration.
    ///
    /// # Errors
    /// `ConfigError::Invalid` if `max_wal_size` is below 4 KiB.
    pub fn validate(self) -> Result<Self, ConfigError> {
        if self.max_wal_size < Self::MIN_WAL_SIZE {
            return Err(ConfigError::Invalid {
                field: "storage.max_wal_size".to_string(),
                reason: format!(
                    "must be at least {} bytes (got {})",
                    Self::MIN_WAL_SIZE,
                    self.max_wal_size
                ),
            });
        }
        Ok(self)
    }
}

/// Open or create a persistent graph at `path`.
///
/// # Example
/// ```rust,no_run
/// use captiongraph::storage::persistent::open_graph;
/// use captiongraph::GraphStore;
///
/// let graph = open_graph("./graph.cg", None)?;
/// let dog = graph.merge_entity("dog")?;
/// # Ok::<(), Box<dyn std::error::Error>>(())
/// ```
pub fn open_graph(
    path: impl AsRef<Path>,
    config: Option<PersistentConfig>,
) -> Result<PersistentGraphStore, StorageError> {
    let cfg = config
        .unwrap_or_default()
        .validate()
        .map_err(|e| StorageError::BackendError(e.to_string()))?;
    PersistentGraphStore::open(path.as_ref(), cfg)
}
