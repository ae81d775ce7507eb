//! End-to-end scenarios over the full pipeline

mod common;

use std::fs;
use std::sync::Arc;

use parking_lot::Mutex;

use repocontext::evaluation::EvalAction;
use repocontext::hnsw::{HnswConfig, HnswIndex};
use repocontext::manager::OverlayHooks;
use repocontext::pipeline::{Pipeline, PipelineConfig, PipelineRequest};
use repocontext::trace::TraceStatus;

use common::{manager_for, write_auth_fixture};

fn paths(values: &[&str]) -> Vec<String> {
    values.iter().map(|v| v.to_string()).collect()
}

#[test]
fn auth_refactor_passes_on_first_iteration() {
    let dir = tempfile::tempdir().unwrap();
    write_auth_fixture(dir.path());
    let mut manager = manager_for(dir.path());
    let mut pipeline = Pipeline::new(&mut manager, PipelineConfig::default());

    let result = pipeline.run(&PipelineRequest {
        query: "refactor authenticateUser".to_string(),
        ground_truth: paths(&["src/auth.ts", "src/login.ts"]),
        ..PipelineRequest::default()
    });

    assert!(result.error.is_none(), "unexpected error: {:?}", result.error);
    assert!(result.passed());
    assert_eq!(result.iterations, 1);
    assert_eq!(result.trace.len(), 6);
    assert_eq!(
        result
            .trace
            .iter()
            .map(|e| e.node.as_str())
            .collect::<Vec<_>>(),
        vec![
            "graph.load",
            "components.build",
            "retriever.initialize",
            "target.resolve",
            "context.build",
            "agent.evaluate"
        ]
    );
    assert!(result.trace.iter().all(|e| e.status == TraceStatus::Ok));

    let evaluation = result.evaluation.unwrap();
    assert!((0.0..=1.0).contains(&evaluation.precision));
    assert!((0.0..=1.0).contains(&evaluation.recall));
}

#[test]
fn strict_thresholds_fail_and_widen() {
    let dir = tempfile::tempdir().unwrap();
    write_auth_fixture(dir.path());
    let mut manager = manager_for(dir.path());
    let config = PipelineConfig {
        precision_threshold: 0.95,
        recall_threshold: 1.0,
        coverage_threshold: 0.5,
        ..PipelineConfig::default()
    };
    let mut pipeline = Pipeline::new(&mut manager, config);

    let result = pipeline.run(&PipelineRequest {
        query: "audit authentication pipeline".to_string(),
        target_file: Some("src/auth.ts".to_string()),
        candidate_paths: paths(&["src/auth.ts"]),
        ground_truth: paths(&[
            "src/auth.ts",
            "src/login.ts",
            "src/ui.ts",
            "src/missing.ts",
        ]),
        token_budget: None,
    });

    assert!(!result.passed());
    assert!(result.iterations > 1);
    for action in [
        EvalAction::EnableCrossEncoder,
        EvalAction::IncreaseWalkDepth,
        EvalAction::ExpandRelated,
    ] {
        assert!(
            result.actions_history.contains(&action),
            "expected {:?} in {:?}",
            action,
            result.actions_history
        );
    }
}

#[test]
fn dependency_surfacing_includes_callers() {
    let dir = tempfile::tempdir().unwrap();
    write_auth_fixture(dir.path());
    let mut manager = manager_for(dir.path());
    let mut pipeline = Pipeline::new(&mut manager, PipelineConfig::default());

    let result = pipeline.run(&PipelineRequest {
        query: "refactor authenticateUser function".to_string(),
        target_file: Some("src/auth.ts".to_string()),
        token_budget: Some(10_000),
        ground_truth: paths(&["src/auth.ts", "src/login.ts"]),
        ..PipelineRequest::default()
    });

    let context = result.context.expect("context");
    assert!(context.formatted.contains("# TARGET CODE"));
    assert!(context.formatted.contains("# DEPENDENTS"));
    assert!(context.formatted.contains("authenticateUser"));
    assert!(
        context
            .backward_deps
            .iter()
            .any(|n| n.name == "handleLogin"),
        "backward deps: {:?}",
        context
            .backward_deps
            .iter()
            .map(|n| n.name.as_str())
            .collect::<Vec<_>>()
    );
}

#[test]
fn requested_budget_below_minimum_is_clamped() {
    let dir = tempfile::tempdir().unwrap();
    write_auth_fixture(dir.path());
    let mut manager = manager_for(dir.path());
    let mut pipeline = Pipeline::new(&mut manager, PipelineConfig::default());

    let result = pipeline.run(&PipelineRequest {
        query: "refactor authenticateUser".to_string(),
        target_file: Some("src/auth.ts".to_string()),
        token_budget: Some(4_000),
        ground_truth: paths(&["src/auth.ts"]),
        ..PipelineRequest::default()
    });

    let context = result.context.expect("context");
    assert_eq!(context.telemetry.token_budget, 6_000);
    assert!(context.tokens_used <= 6_000);
}

#[derive(Default)]
struct RecordingHooks {
    events: Arc<Mutex<Vec<String>>>,
}

impl OverlayHooks for RecordingHooks {
    fn created(&self, _overlay_id: &str) {
        self.events.lock().push("created".to_string());
    }
    fn updated(&self, _overlay_id: &str, _path: &str) {
        self.events.lock().push("updated".to_string());
    }
    fn committed(&self, _overlay_json: &serde_json::Value) {
        self.events.lock().push("committed".to_string());
    }
    fn discarded(&self, _overlay_id: &str) {
        self.events.lock().push("discarded".to_string());
    }
}

#[test]
fn overlay_lifecycle_end_to_end() {
    let dir = tempfile::tempdir().unwrap();
    fs::write(
        dir.path().join("first.ts"),
        "export function first() { return 1; }\n",
    )
    .unwrap();

    let mut manager = manager_for(dir.path());
    let events = Arc::new(Mutex::new(Vec::new()));
    manager.add_hooks(Box::new(RecordingHooks {
        events: Arc::clone(&events),
    }));

    manager.initialize(false).unwrap();
    assert!(!manager.has_pending_overlay());

    fs::write(
        dir.path().join("first.ts"),
        "export function first() { return 1; }\nexport function second() { return 2; }\n",
    )
    .unwrap();
    manager.record_file_modification("first.ts").unwrap();
    assert!(manager.has_pending_overlay());

    manager.merge_overlay().unwrap();
    assert!(!manager.has_pending_overlay());

    // The rebuilt base graph contains the new symbol
    let graph = manager.graph().unwrap();
    assert!(graph.get_all_nodes().any(|n| n.name == "second"));

    assert_eq!(
        events.lock().as_slice(),
        &["created".to_string(), "updated".to_string(), "committed".to_string()]
    );
}

#[test]
fn hnsw_survives_removal_of_best_match() {
    let mut index = HnswIndex::new(HnswConfig::default());
    index.add("alpha", &[1.0, 0.0, 0.0]).unwrap();
    index.add("beta", &[0.0, 1.0, 0.0]).unwrap();
    index.add("gamma", &[0.0, 0.0, 1.0]).unwrap();

    let near_alpha = [0.95, 0.3, 0.05];
    let hits = index.search(&near_alpha, 1, None).unwrap();
    assert_eq!(hits[0].id, "alpha");

    index.remove("alpha");
    let hits = index.search(&near_alpha, 1, None).unwrap();
    assert_eq!(hits[0].id, "beta");
    assert!(hits[0].similarity > 0.0);
}

#[test]
fn graph_persists_through_json_round_trip() {
    let dir = tempfile::tempdir().unwrap();
    write_auth_fixture(dir.path());
    let mut manager = manager_for(dir.path());
    manager.initialize(false).unwrap();

    let graph = manager.graph().unwrap();
    let json = graph.to_json();
    let restored = repocontext::CodeGraph::from_json(&json).unwrap();
    assert_eq!(restored.node_count(), graph.node_count());
    assert_eq!(restored.edge_count(), graph.edge_count());
    assert_eq!(
        serde_json::to_string(&restored.to_json()).unwrap(),
        serde_json::to_string(&json).unwrap()
    );
}
