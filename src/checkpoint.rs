//! Durable batch progress.
//!
//! A checkpoint is one record, `{"last_processed": <image id>}`, read once
//! when a batch starts and overwritten after every fully processed image.
//! A missing record means nothing has been processed yet.

use std::fs::{self, File};
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use serde::{Deserialize, Serialize};

use crate::error::CheckpointError;

/// Progress marker: the id of the last image whose captions all succeeded.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Checkpoint {
    #[serde(rename = "last_processed", alias = "lastProcessedImageId")]
    pub last_processed_image_id: i64,
}

impl Checkpoint {
    /// Value meaning "nothing processed yet".
    pub const NONE: i64 = -1;

    /// Checkpoint after the given image.
    #[must_use]
    pub const fn at(image_id: i64) -> Self {
        Self {
            last_processed_image_id: image_id,
        }
    }

    /// Returns true if `image_id` was already fully processed.
    #[must_use]
    pub const fn covers(&self, image_id: i64) -> bool {
        image_id <= self.last_processed_image_id
    }
}

impl Default for Checkpoint {
    fn default() -> Self {
        Self::at(Self::NONE)
    }
}

/// Storage for the single checkpoint record.
pub trait CheckpointStore: Send + Sync {
    /// Reads the record, or the default if none exists.
    fn load(&self) -> Result<Checkpoint, CheckpointError>;

    /// Replaces the record as a whole.
    fn save(&self, checkpoint: Checkpoint) -> Result<(), CheckpointError>;
}

/// JSON file checkpoint. Writes go to a temp file that is synced and then
/// renamed over the target, so readers never see a partial record.
#[derive(Debug, Clone)]
pub struct FileCheckpointStore {
    path: PathBuf,
}

impl FileCheckpointStore {
    /// Store backed by `path`. The file is created on first save.
    #[must_use]
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// The checkpoint file path.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn io_err(&self, source: std::io::Error) -> CheckpointError {
        CheckpointError::Io {
            path: self.path.clone(),
            source,
        }
    }
}

impl CheckpointStore for FileCheckpointStore {
    fn load(&self) -> Result<Checkpoint, CheckpointError> {
        let raw = match fs::read_to_string(&self.path) {
            Ok(raw) => raw,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Checkpoint::default()),
            Err(e) => return Err(self.io_err(e)),
        };
        serde_json::from_str(&raw).map_err(|e| CheckpointError::Corrupt {
            path: self.path.clone(),
            message: e.to_string(),
        })
    }

    fn save(&self, checkpoint: Checkpoint) -> Result<(), CheckpointError> {
        let bytes = serde_json::to_vec(&checkpoint).map_err(|e| CheckpointError::Corrupt {
            path: self.path.clone(),
            message: e.to_string(),
        })?;

        let mut temp_name = self.path.file_name().unwrap_or_default().to_os_string();
        temp_name.push(".tmp");
        let temp_path = self.path.with_file_name(temp_name);

        let write = || -> std::io::Result<()> {
            if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
                fs::create_dir_all(parent)?;
            }
            let mut file = File::create(&temp_path)?;
            file.write_all(&bytes)?;
            file.sync_all()?;
            fs::rename(&temp_path, &self.path)
        };
        write().map_err(|e| {
            let _ = fs::remove_file(&temp_path);
            self.io_err(e)
        })
    }
}

/// Checkpoint held in memory; for tests and dry runs.
#[derive(Debug, Default)]
pub struct InMemoryCheckpointStore {
    current: Mutex<Option<Checkpoint>>,
    saves: Mutex<Vec<Checkpoint>>,
}

impl InMemoryCheckpointStore {
    /// Store starting at the given checkpoint.
    #[must_use]
    pub fn starting_at(image_id: i64) -> Self {
        Self {
            current: Mutex::new(Some(Checkpoint::at(image_id))),
            saves: Mutex::new(Vec::new()),
        }
    }

    /// Every checkpoint saved so far, in order.
    #[must_use]
    pub fn history(&self) -> Vec<Checkpoint> {
        self.saves.lock().map(|s| s.clone()).unwrap_or_default()
    }
}

impl CheckpointStore for InMemoryCheckpointStore {
    fn load(&self) -> Result<Checkpoint, CheckpointError> {
        Ok(self
            .current
            .lock()
            .map(|c| c.unwrap_or_default())
            .unwrap_or_default())
    }

    fn save(&self, checkpoint: Checkpoint) -> Result<(), CheckpointError> {
        if let Ok(mut current) = self.current.lock() {
            *current = Some(checkpoint);
        }
        if let Ok(mut saves) = self.saves.lock() {
            saves.push(checkpoint);
        }
        Ok(())
    }
}
