//! # captiongraph - Image Captions to Knowledge Graph
//!
//! captiongraph turns a corpus of image captions into a property graph.
//! Each caption is run through an open information extractor, the resulting
//! `(subject, relation, object)` triples are canonicalized and classified,
//! and then merged into a graph store with idempotent upserts.
//!
//! ## Core Concepts
//!
//! - **Entity**: A node keyed by its normalized name; carries attributes
//! - **Relationship**: A directed edge keyed by `(subject, predicate, object)`,
//!   tagged with the ids of every image that produced it
//! - **Canonicalizer**: A static synonym table applied word by word
//! - **TripleClassifier**: Decides whether a relation is an attribute or an edge
//! - **Checkpoint**: The id of the last fully processed image, so an
//!   interrupted batch resumes where it stopped
//!
//! ## Usage
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use captiongraph::{
//!     BatchRunner, CaptionProcessor, CoreNlpConfig, CoreNlpExtractor, Dataset,
//!     FileCheckpointStore, GraphMerger, InMemoryGraphStore,
//! };
//!
//! let dataset = Dataset::load("data/dataset_flickr8k.json")?;
//! let extractor = Arc::new(CoreNlpExtractor::new(CoreNlpConfig::default())?);
//! let merger = GraphMerger::new(Arc::new(InMemoryGraphStore::new()));
//! let runner = BatchRunner::new(
//!     CaptionProcessor::new(extractor, merger),
//!     Arc::new(FileCheckpointStore::new("progress.json")),
//! );
//! let report = runner.run(&dataset)?;
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

// Core types
pub mod entity;
pub mod error;

// Text processing
pub mod canonical;
pub mod classify;
pub mod extract;

// Graph and pipeline
pub mod batch;
pub mod caption;
pub mod checkpoint;
pub mod config;
pub mod dataset;
pub mod merge;
pub mod query;
pub mod storage;

// Re-export primary types at crate root for convenience
pub use batch::{BatchReport, BatchRunner, FailurePolicy};
pub use canonical::Canonicalizer;
pub use caption::{CaptionOutcome, CaptionProcessor};
pub use checkpoint::{Checkpoint, CheckpointStore, FileCheckpointStore, InMemoryCheckpointStore};
pub use classify::{TripleClassifier, TripleKind};
pub use config::PipelineConfig;
pub use dataset::{Caption, Dataset, ImageRecord};
pub use entity::{Entity, EntityHandle, EntityId, Relationship, RelationshipId};
pub use error::{
    CheckpointError, ConfigError, DatasetError, ExtractionError, PipelineError, PipelineResult,
};
pub use extract::{CoreNlpConfig, CoreNlpExtractor, RawTriple, TripleExtractor};
pub use merge::GraphMerger;
pub use query::{images_for_entity, resolve_image_paths};
pub use storage::{GraphStore, InMemoryGraphStore, StorageError};

#[cfg(feature = "persistent")]
pub use storage::{open_graph, PersistentConfig, PersistentGraphStore};
