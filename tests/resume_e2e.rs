//! End-to-end batch tests: interrupted runs resume from the checkpoint and
//! converge to the same graph as an uninterrupted run.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use captiongraph::{
    BatchRunner, CaptionProcessor, Checkpoint, CheckpointStore, Dataset, ExtractionError,
    FailurePolicy, GraphMerger, GraphStore, InMemoryCheckpointStore, InMemoryGraphStore,
    PipelineError, RawTriple, TripleExtractor,
};

/// Reads a caption as consecutive `subject relation object` word triples.
/// Underscores inside a word become spaces. Fails on the `fail_on`-th call
/// (1-based) to simulate the extractor dying mid-run.
struct WordTripleExtractor {
    calls: AtomicUsize,
    fail_on: Option<usize>,
}

impl WordTripleExtractor {
    fn healthy() -> Self {
        Self {
            calls: AtomicUsize::new(0),
            fail_on: None,
        }
    }

    fn failing_on_call(n: usize) -> Self {
        Self {
            calls: AtomicUsize::new(0),
            fail_on: Some(n),
        }
    }

    fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl TripleExtractor for WordTripleExtractor {
    fn extract(&self, sentence: &str) -> Result<Vec<RawTriple>, ExtractionError> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
        if self.fail_on == Some(call) {
            return Err(ExtractionError::Request {
                message: "connection reset".to_string(),
            });
        }
        let words: Vec<String> = sentence
            .split_whitespace()
            .map(|w| w.replace('_', " "))
            .collect();
        Ok(words
            .chunks_exact(3)
            .map(|t| RawTriple::new(&t[0], &t[1], &t[2]))
            .collect())
    }
}

const DATASET: &str = r#"{
    "images": [
        {"imgid": 0, "filename": "0.jpg", "sentences": [
            {"raw": "kids push truck"},
            {"raw": "truck has_color red"}
        ]},
        {"imgid": 1, "filename": "1.jpg", "sentences": [
            {"raw": "dog chases ball"},
            {"raw": "dog has_size small"},
            {"raw": "baby watches dog"}
        ]},
        {"imgid": 2, "filename": "2.jpg", "sentences": [
            {"raw": "children ride cars"},
            {"raw": "dog chases ball"}
        ]}
    ]
}"#;

fn dataset() -> Dataset {
    Dataset::parse(DATASET).unwrap()
}

/// Graph contents without timestamps, for comparing independently built graphs.
#[derive(Debug, PartialEq, Eq)]
struct GraphShape {
    entities: BTreeMap<String, BTreeMap<String, String>>,
    edges: BTreeSet<(String, String, String, Vec<i64>)>,
}

fn shape(store: &dyn GraphStore) -> GraphShape {
    let entities: Vec<_> = store.entities().unwrap();
    let names: BTreeMap<_, _> = entities.iter().map(|e| (e.id, e.name.clone())).collect();
    GraphShape {
        entities: entities
            .iter()
            .map(|e| (e.name.clone(), e.attributes.clone()))
            .collect(),
        edges: store
            .relationships()
            .unwrap()
            .into_iter()
            .map(|r| {
                (
                    names[&r.subject].clone(),
                    r.predicate.clone(),
                    names[&r.object].clone(),
                    r.provenance.into_iter().collect(),
                )
            })
            .collect(),
    }
}

fn runner(
    extractor: Arc<WordTripleExtractor>,
    store: Arc<dyn GraphStore>,
    checkpoints: Arc<dyn CheckpointStore>,
) -> BatchRunner {
    BatchRunner::new(
        CaptionProcessor::new(extractor, GraphMerger::new(store)),
        checkpoints,
    )
}

fn clean_shape() -> GraphShape {
    let store = Arc::new(InMemoryGraphStore::new());
    let checkpoints = Arc::new(InMemoryCheckpointStore::default());
    runner(
        Arc::new(WordTripleExtractor::healthy()),
        store.clone(),
        checkpoints,
    )
    .run(&dataset())
    .unwrap();
    shape(&*store)
}

#[test]
fn clean_run_builds_expected_graph() {
    let graph = clean_shape();

    assert_eq!(graph.entities["car"].get("color").map(String::as_str), Some("red"));
    assert_eq!(graph.entities["dog"].get("size").map(String::as_str), Some("small"));
    assert!(!graph.entities.contains_key("red"));
    assert!(graph.edges.contains(&(
        "dog".to_string(),
        "CHASES".to_string(),
        "ball".to_string(),
        vec![1, 2]
    )));
    assert!(graph.edges.contains(&(
        "child".to_string(),
        "RIDE".to_string(),
        "car".to_string(),
        vec![2]
    )));
}

#[test]
fn crash_mid_image_resumes_and_converges() {
    let store = Arc::new(InMemoryGraphStore::new());
    let checkpoints = Arc::new(InMemoryCheckpointStore::default());

    // Calls 1-2 are image 0; call 5 is the third caption of image 1.
    let crashing = Arc::new(WordTripleExtractor::failing_on_call(5));
    let err = runner(crashing, store.clone(), checkpoints.clone())
        .run(&dataset())
        .unwrap_err();
    assert_eq!(err.image_id(), Some(1));
    assert!(matches!(err, PipelineError::Image { .. }));
    assert_eq!(checkpoints.load().unwrap(), Checkpoint::at(0));

    // Partial effects of image 1 are already in the graph.
    assert!(store.find_entity("ball").unwrap().is_some());

    let healthy = Arc::new(WordTripleExtractor::healthy());
    let report = runner(healthy.clone(), store.clone(), checkpoints.clone())
        .run(&dataset())
        .unwrap();
    assert_eq!(report.resumed_from, 0);
    assert_eq!(report.skipped, 1);
    assert_eq!(report.processed, 2);
    // Image 1 restarts from its first caption.
    assert_eq!(healthy.calls(), 5);
    assert_eq!(checkpoints.load().unwrap(), Checkpoint::at(2));

    assert_eq!(shape(&*store), clean_shape());
}

#[test]
fn rerun_after_completion_does_nothing() {
    let store = Arc::new(InMemoryGraphStore::new());
    let checkpoints = Arc::new(InMemoryCheckpointStore::default());
    runner(
        Arc::new(WordTripleExtractor::healthy()),
        store.clone(),
        checkpoints.clone(),
    )
    .run(&dataset())
    .unwrap();
    let before = shape(&*store);

    let extractor = Arc::new(WordTripleExtractor::healthy());
    let report = runner(extractor.clone(), store.clone(), checkpoints.clone())
        .run(&dataset())
        .unwrap();
    assert_eq!(report.skipped, 3);
    assert_eq!(report.processed, 0);
    assert_eq!(extractor.calls(), 0);
    assert_eq!(shape(&*store), before);
}

#[test]
fn reprocessing_everything_is_idempotent() {
    let store = Arc::new(InMemoryGraphStore::new());
    for _ in 0..2 {
        // Fresh checkpoint each time forces a full reprocess.
        runner(
            Arc::new(WordTripleExtractor::healthy()),
            store.clone(),
            Arc::new(InMemoryCheckpointStore::default()),
        )
        .run(&dataset())
        .unwrap();
    }
    assert_eq!(shape(&*store), clean_shape());
}

#[test]
fn continue_policy_then_rerun_converges() {
    let store = Arc::new(InMemoryGraphStore::new());
    let checkpoints = Arc::new(InMemoryCheckpointStore::default());

    let flaky = Arc::new(WordTripleExtractor::failing_on_call(3));
    let report = runner(flaky, store.clone(), checkpoints.clone())
        .with_policy(FailurePolicy::Continue)
        .run(&dataset())
        .unwrap();
    assert_eq!(report.failed.len(), 1);
    assert_eq!(report.failed[0].0, 1);
    assert_eq!(report.processed, 2);
    assert_eq!(checkpoints.load().unwrap(), Checkpoint::at(0));

    let healthy = Arc::new(WordTripleExtractor::healthy());
    let report = runner(healthy.clone(), store.clone(), checkpoints.clone())
        .run(&dataset())
        .unwrap();
    assert!(report.is_clean());
    assert_eq!(report.processed, 2);
    assert_eq!(shape(&*store), clean_shape());
}

#[cfg(feature = "persistent")]
mod persistent {
    use super::*;
    use captiongraph::storage::persistent::WAL_FILE;
    use captiongraph::{open_graph, FileCheckpointStore};
    use tempfile::tempdir;

    #[test]
    fn process_restart_resumes_from_disk() {
        let dir = tempdir().unwrap();
        let graph_dir = dir.path().join("graph.cg");
        let checkpoint_path = dir.path().join("progress.json");

        // First process: dies on the first caption of image 2.
        {
            let store = Arc::new(open_graph(&graph_dir, None).unwrap());
            let checkpoints = Arc::new(FileCheckpointStore::new(&checkpoint_path));
            let crashing = Arc::new(WordTripleExtractor::failing_on_call(6));
            let err = runner(crashing, store, checkpoints).run(&dataset()).unwrap_err();
            assert_eq!(err.image_id(), Some(2));
        }
        assert_eq!(
            std::fs::read_to_string(&checkpoint_path).unwrap(),
            r#"{"last_processed":1}"#
        );

        // Second process: fresh handles on the same files.
        let store = Arc::new(open_graph(&graph_dir, None).unwrap());
        let checkpoints = Arc::new(FileCheckpointStore::new(&checkpoint_path));
        let healthy = Arc::new(WordTripleExtractor::healthy());
        let report = runner(healthy.clone(), store.clone(), checkpoints.clone())
            .run(&dataset())
            .unwrap();
        assert_eq!(report.skipped, 2);
        assert_eq!(healthy.calls(), 2);
        assert_eq!(checkpoints.load().unwrap(), Checkpoint::at(2));
        assert_eq!(shape(&*store), clean_shape());
    }

    #[test]
    fn forced_reprocess_does_not_grow_the_log() {
        let dir = tempdir().unwrap();
        let graph_dir = dir.path().join("graph.cg");

        let store = Arc::new(open_graph(&graph_dir, None).unwrap());
        let run = || {
            runner(
                Arc::new(WordTripleExtractor::healthy()),
                store.clone(),
                Arc::new(InMemoryCheckpointStore::default()),
            )
            .run(&dataset())
            .unwrap();
        };

        run();
        let wal_size = std::fs::metadata(graph_dir.join(WAL_FILE)).unwrap().len();
        run();
        assert_eq!(std::fs::metadata(graph_dir.join(WAL_FILE)).unwrap().len(), wal_size);
        assert_eq!(shape(&*store), clean_shape());
    }
}
