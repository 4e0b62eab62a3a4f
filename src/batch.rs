//! Resumable batch ingestion over a dataset.
//!
//! The unit of recovery is one image: the checkpoint only advances after
//! every caption of an image has been merged. A run that dies midway through
//! an image leaves the checkpoint at the previous image, so the next run
//! starts that image over from its first caption. Because every merge is an
//! upsert, the repeated work converges to the same graph.

use std::sync::Arc;
use std::time::Instant;

use serde::{Deserialize, Serialize};

use crate::caption::{CaptionOutcome, CaptionProcessor};
use crate::checkpoint::{Checkpoint, CheckpointStore};
use crate::dataset::{Dataset, ImageRecord};
use crate::error::{PipelineError, PipelineResult};

/// What to do when an image fails.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FailurePolicy {
    /// Stop the run and return the error.
    #[default]
    Abort,
    /// Log the failure and keep going. The checkpoint stays at the last
    /// image completed before the first failure, so a rerun retries it.
    Continue,
}

/// Summary of one run.
#[derive(Debug, Clone, Default)]
pub struct BatchReport {
    /// Checkpoint loaded at start.
    pub resumed_from: i64,
    /// Checkpoint persisted at the end of the run.
    pub checkpoint: i64,
    /// Images fully processed in this run.
    pub processed: usize,
    /// Images skipped as already done.
    pub skipped: usize,
    /// Images that failed, with their error message.
    pub failed: Vec<(i64, String)>,
    /// Captions processed in this run.
    pub captions: usize,
    /// Triple counters summed over the run.
    pub triples: CaptionOutcome,
}

impl BatchReport {
    /// Returns true if no image failed.
    #[must_use]
    pub fn is_clean(&self) -> bool {
        self.failed.is_empty()
    }
}

/// Walks a dataset, skipping completed images and checkpointing after each one.
pub struct BatchRunner {
    processor: CaptionProcessor,
    checkpoints: Arc<dyn CheckpointStore>,
    policy: FailurePolicy,
}

impl BatchRunner {
    /// Runner with the default `Abort` policy.
    #[must_use]
    pub fn new(processor: CaptionProcessor, checkpoints: Arc<dyn CheckpointStore>) -> Self {
        Self {
            processor,
            checkpoints,
            policy: FailurePolicy::default(),
        }
    }

    /// Sets the failure policy.
    #[must_use]
    pub fn with_policy(mut self, policy: FailurePolicy) -> Self {
        self.policy = policy;
        self
    }

    /// The caption processor driven by this runner.
    #[must_use]
    pub fn processor(&self) -> &CaptionProcessor {
        &self.processor
    }

    /// Processes every image not covered by the stored checkpoint.
    ///
    /// # Errors
    /// - Checkpoint load/save failures (always fatal)
    /// - With `Abort`, the first image failure, wrapped in `PipelineError::Image`
    pub fn run(&self, dataset: &Dataset) -> PipelineResult<BatchReport> {
        let start = self.checkpoints.load()?;
        let started = Instant::now();
        tracing::info!(
            last_processed = start.last_processed_image_id,
            images = dataset.images.len(),
            policy = ?self.policy,
            "batch starting"
        );

        let mut report = BatchReport {
            resumed_from: start.last_processed_image_id,
            checkpoint: start.last_processed_image_id,
            ..BatchReport::default()
        };
        let mut frozen = false;

        for image in &dataset.images {
            if start.covers(image.image_id) {
                report.skipped += 1;
                continue;
            }

            match self.process_image(image) {
                Ok(outcome) => {
                    report.processed += 1;
                    report.captions += image.captions.len();
                    report.triples.absorb(outcome);
                    if frozen {
                        tracing::info!(
                            image_id = image.image_id,
                            "image processed; checkpoint held back by earlier failure"
                        );
                        continue;
                    }
                    self.checkpoints.save(Checkpoint::at(image.image_id))?;
                    report.checkpoint = image.image_id;
                    tracing::info!(
                        image_id = image.image_id,
                        captions = image.captions.len(),
                        relationships = outcome.relationships,
                        attributes = outcome.attributes,
                        "image processed, progress saved"
                    );
                }
                Err(e) if e.is_fatal() || self.policy == FailurePolicy::Abort => {
                    tracing::error!(
                        image_id = image.image_id,
                        error = %e,
                        checkpoint = report.checkpoint,
                        "image failed, stopping batch"
                    );
                    return Err(PipelineError::image(image.image_id, e));
                }
                Err(e) => {
                    tracing::warn!(
                        image_id = image.image_id,
                        error = %e,
                        checkpoint = report.checkpoint,
                        "image failed, continuing"
                    );
                    report.failed.push((image.image_id, e.to_string()));
                    frozen = true;
                }
            }
        }

        tracing::info!(
            processed = report.processed,
            skipped = report.skipped,
            failed = report.failed.len(),
            checkpoint = report.checkpoint,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "batch finished"
        );
        Ok(report)
    }

    fn process_image(&self, image: &ImageRecord) -> PipelineResult<CaptionOutcome> {
        let mut total = CaptionOutcome::default();
        for caption in &image.captions {
            total.absorb(self.processor.process(&caption.text, image.image_id)?);
        }
        Ok(total)
    }
}

impl std::fmt::Debug for BatchRunner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BatchRunner")
            .field("processor", &self.processor)
            .field("policy", &self.policy)
            .finish_non_exhaustive()
    }
}
