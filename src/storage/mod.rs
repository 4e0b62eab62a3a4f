//! Graph storage: the [`GraphStore`] contract and its backends.

mod memory;
mod traits;

#[cfg(feature = "persistent")]
pub mod persistent;

pub use memory::InMemoryGraphStore;
pub use traits::{GraphStore, StorageError};

#[cfg(feature = "persistent")]
pub use persistent::{open_graph, PersistentConfig, PersistentGraphStore};
