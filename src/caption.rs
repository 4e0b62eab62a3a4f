//! Per-caption pipeline: extract, canonicalize, classify, merge.

use std::sync::Arc;

use crate::canonical::Canonicalizer;
use crate::classify::{TripleClassifier, TripleKind};
use crate::error::PipelineResult;
use crate::extract::{Triple, TripleExtractor};
use crate::merge::GraphMerger;

/// Counters for one processed caption.
///
/// Informational only: the caption's effect is what it merged into the graph.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CaptionOutcome {
    /// Raw triples returned by the extractor.
    pub extracted: usize,
    /// Triples dropped for a missing or blank field.
    pub dropped: usize,
    /// Attribute writes issued.
    pub attributes: usize,
    /// Relationship merges issued.
    pub relationships: usize,
}

impl CaptionOutcome {
    /// Adds another outcome's counts to this one.
    pub fn absorb(&mut self, other: Self) {
        self.extracted += other.extracted;
        self.dropped += other.dropped;
        self.attributes += other.attributes;
        self.relationships += other.relationships;
    }
}

/// Drives one caption through extraction and merging.
pub struct CaptionProcessor {
    extractor: Arc<dyn TripleExtractor>,
    merger: GraphMerger,
    canonicalizer: Canonicalizer,
    classifier: TripleClassifier,
}

impl CaptionProcessor {
    /// Builds a processor with the default synonym table and keyword list.
    #[must_use]
    pub fn new(extractor: Arc<dyn TripleExtractor>, merger: GraphMerger) -> Self {
        Self::with_tables(
            extractor,
            merger,
            Canonicalizer::default(),
            TripleClassifier::default(),
        )
    }

    /// Builds a processor with explicit tables.
    #[must_use]
    pub fn with_tables(
        extractor: Arc<dyn TripleExtractor>,
        merger: GraphMerger,
        canonicalizer: Canonicalizer,
        classifier: TripleClassifier,
    ) -> Self {
        Self {
            extractor,
            merger,
            canonicalizer,
            classifier,
        }
    }

    /// The synonym table in use.
    #[must_use]
    pub fn canonicalizer(&self) -> &Canonicalizer {
        &self.canonicalizer
    }

    /// The merge layer in use.
    #[must_use]
    pub fn merger(&self) -> &GraphMerger {
        &self.merger
    }

    /// Extracts triples from `caption` and merges them, tagging edges with `image_id`.
    ///
    /// Incomplete triples are skipped silently. The first extractor or
    /// storage failure aborts the caption; anything merged before it stays
    /// merged and is safe to merge again.
    pub fn process(&self, caption: &str, image_id: i64) -> PipelineResult<CaptionOutcome> {
        let raw = self.extractor.extract(caption)?;
        let mut outcome = CaptionOutcome {
            extracted: raw.len(),
            ..CaptionOutcome::default()
        };

        for triple in &raw {
            let Some(triple) = triple.complete() else {
                outcome.dropped += 1;
                continue;
            };
            match self.merge_triple(triple, image_id)? {
                TripleKind::Attribute(_) => outcome.attributes += 1,
                TripleKind::Relationship(_) => outcome.relationships += 1,
            }
        }

        tracing::debug!(
            image_id,
            caption,
            extracted = outcome.extracted,
            dropped = outcome.dropped,
            attributes = outcome.attributes,
            relationships = outcome.relationships,
            "caption processed"
        );
        Ok(outcome)
    }

    fn merge_triple(&self, triple: Triple<'_>, image_id: i64) -> PipelineResult<TripleKind> {
        let subject_name = self.canonicalizer.canonicalize(triple.subject);
        let object_name = self.canonicalizer.canonicalize(triple.object);

        let subject = self.merger.merge_entity(&subject_name)?;
        let kind = self.classifier.classify(triple.relation);
        match &kind {
            TripleKind::Attribute(attribute) => {
                self.merger.set_attribute(&subject, attribute, &object_name)?;
            }
            TripleKind::Relationship(predicate) => {
                let object = self.merger.merge_entity(&object_name)?;
                self.merger
                    .merge_relationship(&subject, predicate, &object, image_id)?;
            }
        }
        Ok(kind)
    }
}

impl std::fmt::Debug for CaptionProcessor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CaptionProcessor")
            .field("canonicalizer", &self.canonicalizer)
            .field("classifier", &self.classifier)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::sync::Mutex;

    use crate::error::{ExtractionError, PipelineError};
    use crate::extract::RawTriple;
    use crate::storage::{GraphStore, InMemoryGraphStore};

    #[derive(Default)]
    struct ScriptedExtractor {
        script: HashMap<String, Vec<RawTriple>>,
        calls: Mutex<usize>,
    }

    impl ScriptedExtractor {
        fn with(mut self, sentence: &str, triples: Vec<RawTriple>) -> Self {
            self.script.insert(sentence.to_string(), triples);
            self
        }
    }

    impl TripleExtractor for ScriptedExtractor {
        fn extract(&self, sentence: &str) -> Result<Vec<RawTriple>, ExtractionError> {
            *self.calls.lock().unwrap() += 1;
            self.script
                .get(sentence)
                .cloned()
                .ok_or_else(|| ExtractionError::Request {
                    message: format!("no script for {sentence:?}"),
                })
        }
    }

    fn processor(extractor: ScriptedExtractor) -> (CaptionProcessor, Arc<InMemoryGraphStore>) {
        let store = Arc::new(InMemoryGraphStore::new());
        let merger = GraphMerger::new(store.clone());
        (CaptionProcessor::new(Arc::new(extractor), merger), store)
    }

    #[test]
    fn attribute_and_relationship_triples_are_merged() {
        let extractor = ScriptedExtractor::default().with(
            "Two kids push a black truck",
            vec![
                RawTriple::new("Two kids", "push", "a truck"),
                RawTriple::new("truck", "has color", "black"),
            ],
        );
        let (processor, store) = processor(extractor);

        let outcome = processor.process("Two kids push a black truck", 3).unwrap();
        assert_eq!(outcome.relationships, 1);
        assert_eq!(outcome.attributes, 1);

        let car = store.find_entity("car").unwrap().unwrap();
        assert_eq!(car.attribute("color"), Some("black"));
        let kids = store.find_entity("two child").unwrap().unwrap();
        let edges = store.relationships_for(kids.id).unwrap();
        assert_eq!(edges.len(), 1);
        assert_eq!(edges[0].predicate, "PUSH");
        assert!(edges[0].provenance.contains(&3));
        assert_eq!(store.entity_count().unwrap(), 3);
    }

    #[test]
    fn attribute_triples_do_not_create_object_entities() {
        let extractor = ScriptedExtractor::default()
            .with("a red ball", vec![RawTriple::new("ball", "colour", "red")]);
        let (processor, store) = processor(extractor);

        processor.process("a red ball", 1).unwrap();
        assert_eq!(store.entity_count().unwrap(), 1);
        assert!(store.find_entity("red").unwrap().is_none());
    }

    #[test]
    fn incomplete_triples_cause_no_merges() {
        let missing_object = RawTriple {
            object: None,
            ..RawTriple::new("dog", "chases", "ball")
        };
        let extractor = ScriptedExtractor::default().with("dog chases", vec![missing_object]);
        let (processor, store) = processor(extractor);

        let outcome = processor.process("dog chases", 1).unwrap();
        assert_eq!(outcome.dropped, 1);
        assert_eq!(store.entity_count().unwrap(), 0);
        assert_eq!(store.relationship_count().unwrap(), 0);
    }

    #[test]
    fn zero_triples_is_a_noop() {
        let extractor = ScriptedExtractor::default().with("nothing here", Vec::new());
        let (processor, store) = processor(extractor);
        assert_eq!(processor.process("nothing here", 1).unwrap(), CaptionOutcome::default());
        assert_eq!(store.entity_count().unwrap(), 0);
    }

    #[test]
    fn extractor_failure_is_propagated() {
        let (processor, _) = processor(ScriptedExtractor::default());
        let err = processor.process("unscripted", 1).unwrap_err();
        assert!(matches!(err, PipelineError::Extraction(_)));
    }

    #[test]
    fn processing_twice_gives_same_graph() {
        let extractor = ScriptedExtractor::default().with(
            "a dog chases a ball",
            vec![
                RawTriple::new("a dog", "chases", "a ball"),
                RawTriple::new("a dog", "has size", "small"),
            ],
        );
        let (processor, store) = processor(extractor);

        processor.process("a dog chases a ball", 5).unwrap();
        let entities = store.entities().unwrap();
        let edges = store.relationships().unwrap();

        processor.process("a dog chases a ball", 5).unwrap();
        assert_eq!(store.entities().unwrap(), entities);
        assert_eq!(store.relationships().unwrap(), edges);
    }
}
