//! Read-side helpers: which images mention an entity.

use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};

use crate::canonical::Canonicalizer;
use crate::storage::{GraphStore, StorageError};

/// Image ids recorded on any relationship touching `name`.
///
/// `name` goes through the same canonicalization as ingested text, so
/// searching for "kids" finds the `child` entity. Unknown names yield an
/// empty set.
pub fn images_for_entity(
    store: &dyn GraphStore,
    canonicalizer: &Canonicalizer,
    name: &str,
) -> Result<BTreeSet<i64>, StorageError> {
    let canonical = canonicalizer.canonicalize(name);
    let Some(entity) = store.find_entity(&canonical)? else {
        tracing::debug!(query = name, canonical = %canonical, "entity not in graph");
        return Ok(BTreeSet::new());
    };

    let images: BTreeSet<i64> = store
        .relationships_for(entity.id)?
        .into_iter()
        .flat_map(|edge| edge.provenance)
        .collect();
    tracing::debug!(entity = %entity.name, images = images.len(), "entity image lookup");
    Ok(images)
}

/// Maps image ids to `root/filename`, skipping ids missing from the index.
#[must_use]
pub fn resolve_image_paths(
    ids: &BTreeSet<i64>,
    index: &BTreeMap<i64, String>,
    root: &Path,
) -> Vec<PathBuf> {
    ids.iter()
        .filter_map(|id| index.get(id))
        .map(|filename| root.join(filename))
        .collect()
}
