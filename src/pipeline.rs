//! Iterative retrieval pipeline
//!
//! One run: load the graph, then loop (build components, initialise the
//! retriever, resolve, build context, evaluate) up to a bounded iteration
//! count. A failed evaluation widens the search state monotonically (deeper
//! walks, broader related sets, cross-encoder on, larger budget) and feeds
//! this iteration's candidate paths back in as seeds. Every stage is wrapped
//! in a trace record; any stage error short-circuits the run with the
//! partial result.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tracing::{debug, info};

use crate::embedding::{load_cross_encoder, load_embedder};
use crate::evaluation::{EvalAction, EvalConfig, Evaluation, EvaluationAgent};
use crate::graph::CodeGraph;
use crate::manager::GraphManager;
use crate::resolver::{Resolution, ResolverConfig, TargetResolver};
use crate::retriever::{DependencyAwareRetriever, DependencyContext, RetrieverOptions};
use crate::tokens::{MAX_TOKEN_BUDGET, MIN_TOKEN_BUDGET};
use crate::trace::{TraceEntry, TraceRecorder};

/// Pipeline configuration
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    pub max_iterations: usize,
    pub precision_threshold: f64,
    pub recall_threshold: f64,
    pub max_k: Option<usize>,
    pub coverage_threshold: f64,
    /// Rebuild the graph even when the store has one
    pub force_rebuild: bool,
    /// Resolver candidate limit
    pub candidate_limit: usize,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            max_iterations: 2,
            precision_threshold: 0.5,
            recall_threshold: 0.5,
            max_k: None,
            coverage_threshold: 0.85,
            force_rebuild: false,
            candidate_limit: 8,
        }
    }
}

/// One retrieval request
#[derive(Debug, Clone, Default)]
pub struct PipelineRequest {
    pub query: String,
    pub target_file: Option<String>,
    /// Candidate path hints (dataset-provided)
    pub candidate_paths: Vec<String>,
    pub ground_truth: Vec<String>,
    /// Initial token budget; defaults to the minimum
    pub token_budget: Option<usize>,
}

/// Widening state carried across iterations; every step is monotone
#[derive(Debug, Clone, PartialEq)]
struct SearchState {
    token_budget: usize,
    walk_depth: usize,
    related_limit: usize,
    breadth_limit: usize,
    use_cross_encoder: bool,
}

impl SearchState {
    fn initial(token_budget: usize) -> Self {
        Self {
            token_budget,
            walk_depth: 2,
            related_limit: 5,
            breadth_limit: 3,
            use_cross_encoder: false,
        }
    }

    fn apply(&mut self, actions: &[EvalAction]) {
        for action in actions {
            match action {
                EvalAction::EnableCrossEncoder => self.use_cross_encoder = true,
                EvalAction::IncreaseWalkDepth => {
                    self.walk_depth = (self.walk_depth + 1).min(5);
                }
                EvalAction::ExpandRelated => {
                    self.related_limit += 2;
                    self.breadth_limit = (self.breadth_limit + 1).min(6);
                }
                EvalAction::IncreaseTokenBudget => {
                    self.token_budget = (self.token_budget + 2_000).min(MAX_TOKEN_BUDGET);
                }
            }
        }
    }

    fn retriever_options(&self, candidate_paths: Vec<String>) -> RetrieverOptions {
        RetrieverOptions {
            candidate_paths,
            walk_depth: self.walk_depth,
            related_limit: self.related_limit,
            breadth_limit: self.breadth_limit,
        }
    }
}

/// Final state of one pipeline run
#[derive(Debug)]
pub struct PipelineResult {
    pub context: Option<DependencyContext>,
    pub resolution: Option<Resolution>,
    pub evaluation: Option<Evaluation>,
    pub iterations: usize,
    pub trace: Vec<TraceEntry>,
    /// Concatenated action history across iterations
    pub actions_history: Vec<EvalAction>,
    /// Set when a stage failed; the trace holds the failing entry
    pub error: Option<String>,
}

impl PipelineResult {
    pub fn passed(&self) -> bool {
        self.evaluation.as_ref().map(|e| e.passed).unwrap_or(false)
    }
}

/// The orchestrator
pub struct Pipeline<'a> {
    manager: &'a mut GraphManager,
    config: PipelineConfig,
    cancel: Option<Arc<AtomicBool>>,
}

impl<'a> Pipeline<'a> {
    pub fn new(manager: &'a mut GraphManager, config: PipelineConfig) -> Self {
        Self {
            manager,
            config,
            cancel: None,
        }
    }

    /// Install a cooperative cancellation flag, checked between stages and
    /// between iterations
    pub fn with_cancellation(mut self, cancel: Arc<AtomicBool>) -> Self {
        self.cancel = Some(cancel);
        self
    }

    fn cancelled(&self) -> bool {
        self.cancel
            .as_ref()
            .map(|c| c.load(Ordering::Relaxed))
            .unwrap_or(false)
    }

    /// Execute one request
    pub fn run(&mut self, request: &PipelineRequest) -> PipelineResult {
        let mut trace = TraceRecorder::new();
        let mut result = PipelineResult {
            context: None,
            resolution: None,
            evaluation: None,
            iterations: 0,
            trace: Vec::new(),
            actions_history: Vec::new(),
            error: None,
        };

        // graph.load, once per run
        let force = self.config.force_rebuild;
        let manager = &mut *self.manager;
        let graph: CodeGraph = match trace.stage("graph.load", || {
            manager.initialize(force)?;
            let graph = manager.graph()?.clone();
            let metadata = serde_json::json!({
                "nodes": graph.node_count(),
                "edges": graph.edge_count(),
            });
            Ok::<_, crate::error::RetrievalError>((graph, Some(metadata)))
        }) {
            Ok(graph) => graph,
            Err(e) => {
                result.error = Some(e.to_string());
                result.trace = trace.into_entries();
                return result;
            }
        };

        let mut state = SearchState::initial(
            request
                .token_budget
                .unwrap_or(MIN_TOKEN_BUDGET)
                .clamp(MIN_TOKEN_BUDGET, MAX_TOKEN_BUDGET),
        );
        let mut seed_paths: Vec<String> = request.candidate_paths.clone();
        let agent = EvaluationAgent::new(EvalConfig {
            precision_threshold: self.config.precision_threshold,
            recall_threshold: self.config.recall_threshold,
            max_k: self.config.max_k,
            coverage_threshold: self.config.coverage_threshold,
        });

        for iteration in 1..=self.config.max_iterations {
            if self.cancelled() {
                debug!("pipeline cancelled before iteration {}", iteration);
                break;
            }
            result.iterations = iteration;

            match self.run_iteration(
                &mut trace,
                &graph,
                request,
                &state,
                seed_paths.clone(),
                &agent,
                iteration,
            ) {
                Ok(None) => {
                    debug!("pipeline cancelled during iteration {}", iteration);
                    break;
                }
                Ok(Some((context, resolution, evaluation))) => {
                    // Accumulate this iteration's candidates as seeds
                    for path in resolution.paths() {
                        if !seed_paths.iter().any(|p| p == path) {
                            seed_paths.push(path.to_string());
                        }
                    }
                    let actions = evaluation.actions.clone();
                    let passed = evaluation.passed;

                    result.context = Some(context);
                    result.resolution = Some(resolution);
                    result.evaluation = Some(evaluation);
                    result.actions_history.extend(actions.iter().copied());

                    if passed || actions.is_empty() {
                        info!(
                            "pipeline done after {} iteration(s), passed={}",
                            iteration, passed
                        );
                        break;
                    }
                    state.apply(&actions);
                    debug!("widened state for next iteration: {:?}", state);
                }
                Err(e) => {
                    result.error = Some(e.to_string());
                    break;
                }
            }
        }

        result.trace = trace.into_entries();
        result
    }

    #[allow(clippy::too_many_arguments)]
    fn run_iteration(
        &self,
        trace: &mut TraceRecorder,
        graph: &CodeGraph,
        request: &PipelineRequest,
        state: &SearchState,
        seed_paths: Vec<String>,
        agent: &EvaluationAgent,
        iteration: usize,
    ) -> crate::error::Result<Option<(DependencyContext, Resolution, Evaluation)>> {
        type Stage<T> = crate::error::Result<T>;

        // components.build: a fresh resolver per iteration; enabling the
        // cross-encoder is a rebuild, not a stateful toggle
        let use_cross = state.use_cross_encoder;
        let candidate_limit = self.config.candidate_limit;
        let resolver: TargetResolver = trace.stage("components.build", || {
            let embedder = load_embedder();
            let cross_encoder = if use_cross {
                load_cross_encoder(true, None)
            } else {
                None
            };
            let has_cross = cross_encoder.is_some();
            let resolver = TargetResolver::new(
                graph,
                embedder,
                cross_encoder,
                ResolverConfig {
                    limit: candidate_limit,
                },
            );
            let metadata = serde_json::json!({
                "cross_encoder": has_cross,
                "embeddings": !crate::embedding::embeddings_disabled(),
            });
            Ok::<_, crate::error::RetrievalError>((resolver, Some(metadata)))
        })?;

        if self.cancelled() {
            return Ok(None);
        }

        let retriever: DependencyAwareRetriever = trace.stage("retriever.initialize", || {
            let retriever = DependencyAwareRetriever::new(graph, &resolver, load_embedder());
            let metadata = serde_json::json!({
                "walk_depth": state.walk_depth,
                "related_limit": state.related_limit,
                "breadth_limit": state.breadth_limit,
            });
            Ok::<_, crate::error::RetrievalError>((retriever, Some(metadata)))
        })?;

        let options = state.retriever_options(seed_paths);

        if self.cancelled() {
            return Ok(None);
        }

        let resolution: Resolution = trace.stage("target.resolve", || {
            let resolution = retriever.resolve(&request.query, &options);
            let metadata = serde_json::json!({
                "candidates": resolution.candidates.len(),
                "primary": resolution.primary().map(|c| c.path.clone()),
            });
            Ok::<_, crate::error::RetrievalError>((resolution, Some(metadata)))
        })?;

        if self.cancelled() {
            return Ok(None);
        }

        let context: DependencyContext = trace.stage("context.build", || {
            let context = retriever.build_with_resolution(
                &request.query,
                &resolution,
                request.target_file.as_deref(),
                state.token_budget,
                &options,
            )?;
            let metadata = serde_json::json!({
                "tokens_used": context.tokens_used,
                "token_budget": context.telemetry.token_budget,
                "backward": context.backward_deps.len(),
                "forward": context.forward_deps.len(),
            });
            Ok::<_, crate::error::RetrievalError>((context, Some(metadata)))
        })?;

        let evaluation: Evaluation = trace.stage("agent.evaluate", || {
            let evaluation = agent.evaluate(&resolution, &context, &request.ground_truth, iteration);
            let metadata = serde_json::json!({
                "precision": evaluation.precision,
                "recall": evaluation.recall,
                "coverage": evaluation.coverage,
                "passed": evaluation.passed,
            });
            let ok: Stage<(Evaluation, Option<serde_json::Value>)> =
                Ok((evaluation, Some(metadata)));
            ok
        })?;

        Ok(Some((context, resolution, evaluation)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::builder::GraphBuilder;
    use crate::embedding::cache::EmbeddingCache;
    use crate::embedding::HashingEmbedder;
    use crate::store::InMemoryGraphStore;
    use std::fs;
    use std::path::Path;

    fn write_auth_fixture(root: &Path) {
        fs::create_dir_all(root.join("src")).unwrap();
        fs::write(
            root.join("src/auth.ts"),
            "export function authenticateUser(name: string, secret: string) { return secret.length > 0; }\n",
        )
        .unwrap();
        fs::write(
            root.join("src/login.ts"),
            "import { authenticateUser } from './auth';\nexport function handleLogin(name: string, secret: string) { return authenticateUser(name, secret); }\n",
        )
        .unwrap();
        fs::write(
            root.join("src/ui.ts"),
            "import { handleLogin } from './login';\nexport function renderLogin() { return handleLogin('guest', 'pw'); }\n",
        )
        .unwrap();
    }

    fn manager_for(root: &Path) -> GraphManager {
        let cache = Arc::new(EmbeddingCache::open(root.join(".cache.json")));
        let builder =
            GraphBuilder::with_embedder(root, Arc::new(HashingEmbedder::default()), cache);
        GraphManager::new(builder, Box::new(InMemoryGraphStore::new()))
    }

    #[test]
    fn test_passing_run_has_one_iteration_and_six_stages() {
        let dir = tempfile::tempdir().unwrap();
        write_auth_fixture(dir.path());
        let mut manager = manager_for(dir.path());
        let mut pipeline = Pipeline::new(&mut manager, PipelineConfig::default());

        let result = pipeline.run(&PipelineRequest {
            query: "refactor authenticateUser".to_string(),
            ground_truth: vec!["src/auth.ts".to_string(), "src/login.ts".to_string()],
            ..PipelineRequest::default()
        });

        assert!(result.error.is_none(), "error: {:?}", result.error);
        assert!(result.passed());
        assert_eq!(result.iterations, 1);

        let nodes: Vec<&TraceEntry> = result.trace.iter().collect();
        let names: Vec<&str> = nodes.iter().map(|e| e.node.as_str()).collect();
        assert_eq!(
            names,
            vec![
                "graph.load",
                "components.build",
                "retriever.initialize",
                "target.resolve",
                "context.build",
                "agent.evaluate"
            ]
        );
    }

    #[test]
    fn test_failing_run_widens_and_iterates() {
        let dir = tempfile::tempdir().unwrap();
        write_auth_fixture(dir.path());
        // A distractor the query matches lexically but ground truth omits,
        // so precision genuinely misses the strict threshold
        fs::write(
            dir.path().join("src/telemetry.ts"),
            "// Audit pipeline for telemetry events.\nexport function auditPipeline(events: string[]) { return events.length; }\n",
        )
        .unwrap();
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
            candidate_paths: vec!["src/auth.ts".to_string()],
            ground_truth: vec![
                "src/auth.ts".to_string(),
                "src/login.ts".to_string(),
                "src/ui.ts".to_string(),
                "src/missing.ts".to_string(),
            ],
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
                "missing {:?} in {:?}",
                action,
                result.actions_history
            );
        }
    }

    #[test]
    fn test_cancellation_stops_between_iterations() {
        let dir = tempfile::tempdir().unwrap();
        write_auth_fixture(dir.path());
        let mut manager = manager_for(dir.path());
        let cancel = Arc::new(AtomicBool::new(true));
        let mut pipeline =
            Pipeline::new(&mut manager, PipelineConfig::default()).with_cancellation(cancel);

        let result = pipeline.run(&PipelineRequest {
            query: "refactor authenticateUser".to_string(),
            ..PipelineRequest::default()
        });

        // graph.load happened, nothing else; base graph is intact
        assert_eq!(result.trace.len(), 1);
        assert_eq!(result.trace[0].node, "graph.load");
        assert!(result.error.is_none());
    }

    #[test]
    fn test_error_short_circuits_with_partial_trace() {
        let dir = tempfile::tempdir().unwrap();
        // Empty tree: the graph is empty, resolution finds nothing and
        // context building fails with no target
        fs::create_dir_all(dir.path().join("src")).unwrap();
        let mut manager = manager_for(dir.path());
        let mut pipeline = Pipeline::new(&mut manager, PipelineConfig::default());

        let result = pipeline.run(&PipelineRequest {
            query: "anything at all".to_string(),
            ..PipelineRequest::default()
        });

        assert!(result.error.is_some());
        let last = result.trace.last().unwrap();
        assert_eq!(last.node, "context.build");
        assert_eq!(last.status, crate::trace::TraceStatus::Error);
    }
}
