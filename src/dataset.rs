//! Caption dataset loading.
//!
//! Reads the Karpathy-split Flickr8k JSON layout:
//! ```json
//! { "images": [ { "imgid": 0, "filename": "x.jpg", "sentences": [ { "raw": "..." } ] } ] }
//! ```
//! Unknown fields are ignored.

use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::DatasetError;

/// One caption sentence.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Caption {
    #[serde(rename = "raw", default)]
    pub text: String,
}

/// One image and its captions.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImageRecord {
    #[serde(rename = "imgid")]
    pub image_id: i64,
    #[serde(default)]
    pub filename: Option<String>,
    #[serde(rename = "sentences", default)]
    pub captions: Vec<Caption>,
}

/// The whole dataset, in file order.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Dataset {
    #[serde(default)]
    pub images: Vec<ImageRecord>,
}

impl Dataset {
    /// Loads a dataset file.
    ///
    /// # Errors
    /// `DatasetError` if the file cannot be read or is not a valid dataset.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, DatasetError> {
        let path = path.as_ref();
        let raw = fs::read_to_string(path).map_err(|source| DatasetError::Unreadable {
            path: path.to_path_buf(),
            source,
        })?;
        let dataset = Self::parse(&raw).map_err(|e| DatasetError::Malformed {
            path: path.to_path_buf(),
            message: e.to_string(),
        })?;
        tracing::info!(
            path = %path.display(),
            images = dataset.images.len(),
            captions = dataset.caption_count(),
            "dataset loaded"
        );
        Ok(dataset)
    }

    /// Parses dataset JSON.
    pub fn parse(raw: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(raw)
    }

    /// Total captions across all images.
    #[must_use]
    pub fn caption_count(&self) -> usize {
        self.images.iter().map(|i| i.captions.len()).sum()
    }

    /// Map of image id to filename, for images that have one.
    #[must_use]
    pub fn image_index(&self) -> BTreeMap<i64, String> {
        self.images
            .iter()
            .filter_map(|img| img.filename.clone().map(|f| (img.image_id, f)))
            .collect()
    }
}

/// Writes an image index as a JSON object keyed by stringified id.
///
/// # Errors
/// `DatasetError::Unreadable` if the file cannot be written.
pub fn write_image_index(
    index: &BTreeMap<i64, String>,
    path: impl AsRef<Path>,
) -> Result<(), DatasetError> {
    let path = path.as_ref();
    let json = serde_json::to_string(index).map_err(|e| DatasetError::Malformed {
        path: path.to_path_buf(),
        message: e.to_string(),
    })?;
    fs::write(path, json).map_err(|source| DatasetError::Unreadable {
        path: path.to_path_buf(),
        source,
    })
}

/// Reads an index written by [`write_image_index`].
///
/// # Errors
/// `DatasetError` if the file cannot be read or parsed.
pub fn read_image_index(path: impl AsRef<Path>) -> Result<BTreeMap<i64, String>, DatasetError> {
    let path = path.as_ref();
    let raw = fs::read_to_string(path).map_err(|source| DatasetError::Unreadable {
        path: path.to_path_buf(),
        source,
    })?;
    serde_json::from_str(&raw).map_err(|e| DatasetError::Malformed {
        path: path.to_path_buf(),
        message: e.to_string(),
    })
}
