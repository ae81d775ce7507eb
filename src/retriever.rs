//! Dependency-aware context retriever
//!
//! Assembles the bundle of code an assistant must see before editing a
//! target: the target symbols themselves, their forward dependencies, the
//! backward dependents (callers that break if a signature changes — the
//! critical set), and semantically related context, all packed under a token
//! budget with a strict priority order.

use std::collections::{BTreeMap, HashSet, VecDeque};
use std::sync::Arc;

use serde::Serialize;
use tracing::debug;

use crate::bm25::Bm25Index;
use crate::embedding::Embedder;
use crate::error::{Result, RetrievalError};
use crate::graph::{CodeGraph, EdgeType, Node, NodeType};
use crate::resolver::{Resolution, ResolveOptions, TargetResolver};
use crate::tokens::{clamp_budget, estimate_tokens};

/// Similarity floor below which semantic ranking is blended with BM25
const WEAK_SEMANTIC_THRESHOLD: f64 = 0.6;
/// Weights for the weak-semantic blend
const SEMANTIC_BLEND: f64 = 0.6;
const LEXICAL_BLEND: f64 = 0.4;

/// Budget fractions per category tier
const BACKWARD_BUDGET_FRACTION: f64 = 0.80;
const FORWARD_BUDGET_FRACTION: f64 = 0.95;

/// Options for one context build
#[derive(Debug, Clone)]
pub struct RetrieverOptions {
    /// Candidate paths from the caller (dataset hints, prior iterations)
    pub candidate_paths: Vec<String>,
    /// BFS depth for dependency walks
    pub walk_depth: usize,
    /// Size of the related-context set
    pub related_limit: usize,
    /// Per-direction cap on dependency nodes
    pub breadth_limit: usize,
}

impl Default for RetrieverOptions {
    fn default() -> Self {
        Self {
            candidate_paths: Vec::new(),
            walk_depth: 2,
            related_limit: 5,
            breadth_limit: 3,
        }
    }
}

/// Telemetry for one assembled context
#[derive(Debug, Clone, Serialize)]
pub struct ContextTelemetry {
    pub primary_path: String,
    pub candidate_count: usize,
    /// Aggregate raw per-source scores across all candidates
    pub source_scores: BTreeMap<String, f64>,
    pub token_budget: usize,
    pub tokens_used: usize,
    pub tokens_saved: usize,
    pub budget_used_percent: f64,
}

/// Categorised, budget-bounded context
#[derive(Debug, Clone, Serialize)]
pub struct DependencyContext {
    pub target_nodes: Vec<Node>,
    pub forward_deps: Vec<Node>,
    pub backward_deps: Vec<Node>,
    pub related: Vec<Node>,
    /// The packed, formatted context handed to the assistant
    pub formatted: String,
    pub tokens_used: usize,
    pub tokens_saved: usize,
    pub telemetry: ContextTelemetry,
}

/// Builds dependency-aware contexts over one graph + resolver pair
pub struct DependencyAwareRetriever<'a> {
    graph: &'a CodeGraph,
    resolver: &'a TargetResolver,
    embedder: Arc<dyn Embedder>,
}

impl<'a> DependencyAwareRetriever<'a> {
    pub fn new(
        graph: &'a CodeGraph,
        resolver: &'a TargetResolver,
        embedder: Arc<dyn Embedder>,
    ) -> Self {
        Self {
            graph,
            resolver,
            embedder,
        }
    }

    /// Resolve and build in one step
    ///
    /// The target file is the explicit option when given, else the resolver's
    /// primary, else the first candidate path. The budget is clamped into the
    /// supported range before packing.
    pub fn build_context(
        &self,
        query: &str,
        target_file: Option<&str>,
        token_budget: usize,
        options: &RetrieverOptions,
    ) -> Result<(DependencyContext, Resolution)> {
        let resolution = self.resolve(query, options);
        let context =
            self.build_with_resolution(query, &resolution, target_file, token_budget, options)?;
        Ok((context, resolution))
    }

    /// Run the resolver leg on its own (the pipeline traces it as a
    /// separate stage)
    pub fn resolve(&self, query: &str, options: &RetrieverOptions) -> Resolution {
        self.resolver.resolve(
            query,
            &ResolveOptions {
                recent_paths: options.candidate_paths.clone(),
            },
        )
    }

    /// Build a context from an existing resolution
    pub fn build_with_resolution(
        &self,
        query: &str,
        resolution: &Resolution,
        target_file: Option<&str>,
        token_budget: usize,
        options: &RetrieverOptions,
    ) -> Result<DependencyContext> {
        let budget = clamp_budget(token_budget);

        let target_path = target_file
            .map(str::to_string)
            .or_else(|| resolution.primary().map(|c| c.path.clone()))
            .or_else(|| options.candidate_paths.first().cloned())
            .ok_or_else(|| {
                RetrievalError::config("no target file: query resolved to no candidates")
            })?;

        let target_nodes = self.identify_target_nodes(query, &target_path, resolution);
        if target_nodes.is_empty() {
            return Err(RetrievalError::graph(format!(
                "no nodes found for target file {}",
                target_path
            )));
        }
        let target_ids: HashSet<String> = target_nodes.iter().map(|n| n.id.clone()).collect();

        // Dependency walks
        let forward_all = self.walk_dependencies(&target_ids, options.walk_depth, Direction::Forward);
        let backward_all =
            self.walk_dependencies(&target_ids, options.walk_depth, Direction::Backward);

        let forward = pick_by_priority(forward_all, options.breadth_limit);
        let mut backward = pick_by_priority(backward_all, options.breadth_limit);

        // Disjoint categories: target > forward > backward > related
        let forward_ids: HashSet<&str> = forward.iter().map(|n| n.id.as_str()).collect();
        backward.retain(|n| !forward_ids.contains(n.id.as_str()));
        let backward_ids: HashSet<&str> = backward.iter().map(|n| n.id.as_str()).collect();

        let mut placed: HashSet<String> = target_ids.iter().cloned().collect();
        placed.extend(forward_ids.iter().map(|s| s.to_string()));
        placed.extend(backward_ids.iter().map(|s| s.to_string()));

        let related = self.related_context(query, &target_nodes, &placed, options.related_limit);

        // Budget packing, strictest priority first
        let packed = pack_context(
            budget,
            &target_nodes,
            &backward,
            &forward,
            &related,
        );

        let tokens_used = estimate_tokens(&packed.formatted);
        let tokens_saved = self.tokens_saved(&packed, tokens_used);

        let telemetry = ContextTelemetry {
            primary_path: target_path,
            candidate_count: resolution.candidates.len(),
            source_scores: aggregate_source_scores(resolution),
            token_budget: budget,
            tokens_used,
            tokens_saved,
            budget_used_percent: if budget > 0 {
                (tokens_used as f64 / budget as f64) * 100.0
            } else {
                0.0
            },
        };

        debug!(
            "context for {}: {} target, {} backward, {} forward, {} related, {} tokens",
            telemetry.primary_path,
            target_nodes.len(),
            packed.backward.len(),
            packed.forward.len(),
            packed.related.len(),
            tokens_used
        );

        Ok(DependencyContext {
            target_nodes,
            forward_deps: packed.forward,
            backward_deps: packed.backward,
            related: packed.related,
            formatted: packed.formatted,
            tokens_used,
            tokens_saved,
            telemetry,
        })
    }

    /// Target nodes for a file: resolver nodes for the primary path, else
    /// query-scored in-file symbols, else all functions/classes, else the
    /// file node itself
    fn identify_target_nodes(
        &self,
        query: &str,
        target_path: &str,
        resolution: &Resolution,
    ) -> Vec<Node> {
        // Resolver-nominated nodes first
        if let Some(candidate) = resolution
            .candidates
            .iter()
            .find(|c| c.path == target_path)
        {
            let nodes: Vec<Node> = candidate
                .nodes
                .iter()
                .filter_map(|id| self.graph.get_node(id))
                .filter(|n| n.node_type != NodeType::File && n.path == target_path)
                .cloned()
                .collect();
            if !nodes.is_empty() {
                return nodes;
            }
        }

        let in_file: Vec<&Node> = self.graph.get_nodes_by_path(target_path);
        let symbols: Vec<&Node> = in_file
            .iter()
            .copied()
            .filter(|n| n.node_type != NodeType::File)
            .collect();

        // Score symbols by query affinity
        let mut scored: Vec<(f64, &Node)> = symbols
            .iter()
            .map(|n| (query_affinity(query, n), *n))
            .filter(|(score, _)| *score > 0.0)
            .collect();
        if !scored.is_empty() {
            scored.sort_by(|a, b| {
                b.0.partial_cmp(&a.0)
                    .unwrap_or(std::cmp::Ordering::Equal)
                    .then_with(|| a.1.id.cmp(&b.1.id))
            });
            return scored.into_iter().take(3).map(|(_, n)| n.clone()).collect();
        }

        // All functions and classes
        let functional: Vec<Node> = symbols
            .iter()
            .filter(|n| matches!(n.node_type, NodeType::Function | NodeType::Class))
            .map(|n| (*n).clone())
            .collect();
        if !functional.is_empty() {
            return functional;
        }

        // The bare file node
        in_file
            .into_iter()
            .filter(|n| n.node_type == NodeType::File)
            .cloned()
            .collect()
    }

    /// BFS along dependency edges ({imports, calls, references}), excluding
    /// the seeds and file-typed nodes
    fn walk_dependencies(
        &self,
        seeds: &HashSet<String>,
        depth_limit: usize,
        direction: Direction,
    ) -> Vec<Node> {
        let mut visited: HashSet<String> = seeds.clone();
        let mut found: Vec<Node> = Vec::new();
        let mut queue: VecDeque<(String, usize)> =
            seeds.iter().map(|id| (id.clone(), 0)).collect();

        while let Some((current, depth)) = queue.pop_front() {
            if depth >= depth_limit {
                continue;
            }
            let edges = match direction {
                Direction::Forward => self.graph.get_outgoing_edges(&current),
                Direction::Backward => self.graph.get_incoming_edges(&current),
            };
            for edge in edges {
                if !edge.edge_type.is_dependency() {
                    continue;
                }
                let next_id = match direction {
                    Direction::Forward => &edge.to,
                    Direction::Backward => &edge.from,
                };
                if visited.contains(next_id) {
                    continue;
                }
                visited.insert(next_id.clone());
                let Some(node) = self.graph.get_node(next_id) else {
                    continue;
                };
                if node.node_type != NodeType::File {
                    found.push(node.clone());
                }
                queue.push_back((next_id.clone(), depth + 1));
            }
        }
        found
    }

    /// Related context: semantic ranking of the remaining nodes (blended
    /// with BM25 when the best similarity is weak), padded from graph
    /// expansion up to `related_limit`
    fn related_context(
        &self,
        query: &str,
        targets: &[Node],
        placed: &HashSet<String>,
        related_limit: usize,
    ) -> Vec<Node> {
        let mut related: Vec<Node> = Vec::new();
        let mut taken: HashSet<String> = placed.clone();

        let remaining: Vec<&Node> = self
            .graph
            .get_all_nodes()
            .filter(|n| n.node_type != NodeType::File && !taken.contains(&n.id))
            .collect();

        if self.embedder.is_enabled() && !remaining.is_empty() {
            let query_vector = self.embedder.embed(query);
            if !query_vector.is_empty() {
                let mut scored: Vec<(f64, &Node)> = remaining
                    .iter()
                    .map(|n| (cosine(&query_vector, n.embedding.as_deref()), *n))
                    .collect();
                let top = scored
                    .iter()
                    .map(|(s, _)| *s)
                    .fold(f64::NEG_INFINITY, f64::max);

                if top < WEAK_SEMANTIC_THRESHOLD {
                    // Weak semantic signal: blend with lexical scores
                    let lexical = self.lexical_scores(query, &remaining);
                    scored = scored
                        .into_iter()
                        .map(|(s, n)| {
                            let blended = SEMANTIC_BLEND * s
                                + LEXICAL_BLEND * lexical.get(n.id.as_str()).copied().unwrap_or(0.0);
                            (blended, n)
                        })
                        .collect();
                }

                scored.sort_by(|a, b| {
                    b.0.partial_cmp(&a.0)
                        .unwrap_or(std::cmp::Ordering::Equal)
                        .then_with(|| a.1.id.cmp(&b.1.id))
                });
                for (score, node) in scored.into_iter().take(related_limit) {
                    if score <= 0.0 {
                        break;
                    }
                    if taken.insert(node.id.clone()) {
                        related.push(node.clone());
                    }
                }
            }
        }

        // Graph expansion pads the set: exported same-file siblings, outgoing
        // neighbours (contains included here), and 1-depth dependents
        if related.len() < related_limit {
            for node in self.expansion_candidates(targets) {
                if related.len() >= related_limit {
                    break;
                }
                if taken.insert(node.id.clone()) {
                    related.push(node);
                }
            }
        }

        related
    }

    fn expansion_candidates(&self, targets: &[Node]) -> Vec<Node> {
        let mut out: Vec<Node> = Vec::new();

        // Exported siblings in the same file
        for target in targets {
            for sibling in self.graph.get_nodes_by_path(&target.path) {
                if sibling.node_type != NodeType::File
                    && sibling.attrs.exported
                    && sibling.id != target.id
                {
                    out.push(sibling.clone());
                }
            }
        }
        // Outgoing neighbours, contains included
        for target in targets {
            for edge in self.graph.get_outgoing_edges(&target.id) {
                if matches!(
                    edge.edge_type,
                    EdgeType::Calls | EdgeType::Imports | EdgeType::References | EdgeType::Contains
                ) {
                    if let Some(node) = self.graph.get_node(&edge.to) {
                        if node.node_type != NodeType::File {
                            out.push(node.clone());
                        }
                    }
                }
            }
        }
        // 1-depth backward dependents
        for target in targets {
            for edge in self.graph.get_incoming_edges(&target.id) {
                if edge.edge_type.is_dependency() {
                    if let Some(node) = self.graph.get_node(&edge.from) {
                        if node.node_type != NodeType::File {
                            out.push(node.clone());
                        }
                    }
                }
            }
        }
        out
    }

    /// Min-max-normalised BM25 scores over a node subset
    fn lexical_scores(
        &self,
        query: &str,
        nodes: &[&Node],
    ) -> std::collections::HashMap<String, f64> {
        let mut index = Bm25Index::new();
        for node in nodes {
            index.add_document(&node.id, &format!("{} {} {}", node.name, node.path, node.content));
        }
        let hits = index.search(query, nodes.len());
        let max = hits.iter().map(|h| h.score).fold(f64::NEG_INFINITY, f64::max);
        hits.into_iter()
            .map(|h| {
                let normalised = if max > 0.0 { h.score / max } else { 0.0 };
                (h.id, normalised)
            })
            .collect()
    }

    /// Estimated tokens saved versus pasting the involved files whole
    fn tokens_saved(&self, packed: &PackedContext, tokens_used: usize) -> usize {
        let mut paths: HashSet<&str> = HashSet::new();
        for node in packed
            .targets
            .iter()
            .chain(packed.backward.iter())
            .chain(packed.forward.iter())
            .chain(packed.related.iter())
        {
            paths.insert(node.path.as_str());
        }
        let full_file_text: String = paths
            .iter()
            .filter_map(|path| {
                self.graph
                    .get_nodes_by_path(path)
                    .into_iter()
                    .find(|n| n.node_type == NodeType::File)
            })
            .map(|n| n.content.as_str())
            .collect::<Vec<_>>()
            .join("\n");
        let full_estimate = 3 * estimate_tokens(&full_file_text);
        full_estimate.saturating_sub(tokens_used)
    }
}

#[derive(Debug, Clone, Copy)]
enum Direction {
    Forward,
    Backward,
}

/// Dependency priority: exported × 2 + locality, a proxy for the callers
/// most likely to matter
fn dependency_priority(node: &Node) -> f64 {
    let exported = if node.attrs.exported { 2.0 } else { 0.0 };
    let span = node.line_span() as f64;
    exported + (1.0 / (span + 1.0).ln().max(f64::MIN_POSITIVE)).min(1.0)
}

fn pick_by_priority(mut nodes: Vec<Node>, limit: usize) -> Vec<Node> {
    nodes.sort_by(|a, b| {
        dependency_priority(b)
            .partial_cmp(&dependency_priority(a))
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| a.id.cmp(&b.id))
    });
    nodes.truncate(limit);
    nodes
}

fn query_affinity(query: &str, node: &Node) -> f64 {
    let query_lower = query.to_lowercase();
    let query_tokens: HashSet<String> = crate::bm25::tokenize(query).into_iter().collect();
    let name_tokens: HashSet<String> = crate::bm25::tokenize(&node.name).into_iter().collect();

    let mut score = query_tokens.intersection(&name_tokens).count() as f64;
    if query_lower.contains(&node.name.to_lowercase()) {
        score += 2.0;
    }
    // Type and action keyword bonuses
    let kind_word = match node.node_type {
        NodeType::Function => "function",
        NodeType::Class => "class",
        NodeType::Import => "import",
        NodeType::File => "file",
    };
    if query_tokens.contains(kind_word) {
        score += 0.5;
    }
    for action in ["refactor", "fix", "change", "update", "rename"] {
        if query_tokens.contains(action) && node.node_type == NodeType::Function {
            score += 0.25;
            break;
        }
    }
    score
}

fn cosine(query: &[f32], embedding: Option<&[f32]>) -> f64 {
    let Some(embedding) = embedding else {
        return 0.0;
    };
    if embedding.len() != query.len() {
        return 0.0;
    }
    embedding
        .iter()
        .zip(query.iter())
        .map(|(a, b)| f64::from(*a) * f64::from(*b))
        .sum()
}

fn aggregate_source_scores(resolution: &Resolution) -> BTreeMap<String, f64> {
    let mut totals: BTreeMap<String, f64> = BTreeMap::new();
    for candidate in &resolution.candidates {
        for (source, score) in &candidate.source_scores {
            *totals.entry(source.clone()).or_insert(0.0) += score;
        }
    }
    totals
}

// ============================================================================
// Packing and formatting
// ============================================================================

struct PackedContext {
    targets: Vec<Node>,
    backward: Vec<Node>,
    forward: Vec<Node>,
    related: Vec<Node>,
    formatted: String,
}

/// Priority packer: targets always; backward within 80% of budget, forward
/// within 95%, related within 100%
fn pack_context(
    budget: usize,
    targets: &[Node],
    backward: &[Node],
    forward: &[Node],
    related: &[Node],
) -> PackedContext {
    let mut used = estimate_tokens(&render_section(TARGET_HEADER, targets));

    let mut take = |nodes: &[Node], fraction: f64, header: &str| -> Vec<Node> {
        if nodes.is_empty() {
            return Vec::new();
        }
        let ceiling = (budget as f64 * fraction) as usize;
        let mut kept: Vec<Node> = Vec::new();
        let mut section_overhead = estimate_tokens(header) + 1;
        for node in nodes {
            let node_tokens = estimate_tokens(&render_node(node));
            if used + section_overhead + node_tokens <= ceiling {
                used += section_overhead + node_tokens;
                section_overhead = 0;
                kept.push(node.clone());
            }
        }
        kept
    };

    let backward_kept = take(backward, BACKWARD_BUDGET_FRACTION, DEPENDENTS_HEADER);
    let forward_kept = take(forward, FORWARD_BUDGET_FRACTION, DEPENDENCIES_HEADER);
    let related_kept = take(related, 1.0, RELATED_HEADER);

    let mut formatted = render_section(TARGET_HEADER, targets);
    if !backward_kept.is_empty() {
        formatted.push('\n');
        formatted.push_str(&render_section(DEPENDENTS_HEADER, &backward_kept));
    }
    if !forward_kept.is_empty() {
        formatted.push('\n');
        formatted.push_str(&render_section(DEPENDENCIES_HEADER, &forward_kept));
    }
    if !related_kept.is_empty() {
        formatted.push('\n');
        formatted.push_str(&render_section(RELATED_HEADER, &related_kept));
    }

    PackedContext {
        targets: targets.to_vec(),
        backward: backward_kept,
        forward: forward_kept,
        related: related_kept,
        formatted,
    }
}

const TARGET_HEADER: &str = "# TARGET CODE (being modified)";
const DEPENDENTS_HEADER: &str =
    "# DEPENDENTS (these call the target and MUST update if signature changes)";
const DEPENDENCIES_HEADER: &str = "# DEPENDENCIES";
const RELATED_HEADER: &str = "# RELATED CONTEXT";

fn render_section(header: &str, nodes: &[Node]) -> String {
    let mut out = String::with_capacity(256);
    out.push_str(header);
    out.push('\n');
    for node in nodes {
        out.push_str(&render_node(node));
    }
    out
}

fn render_node(node: &Node) -> String {
    format!(
        "\n## {}: {}\n{} (lines {}-{})\n```\n{}\n```\n",
        node.node_type, node.name, node.path, node.start_line, node.end_line, node.content
    )
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::embedding::HashingEmbedder;
    use crate::graph::{Edge, NodeAttributes};
    use crate::resolver::ResolverConfig;

    fn symbol(name: &str, path: &str, content: &str, embedder: &dyn Embedder) -> Node {
        Node {
            id: Node::symbol_id(path, NodeType::Function, name, 1, 4, "function"),
            node_type: NodeType::Function,
            name: name.to_string(),
            path: path.to_string(),
            content: content.to_string(),
            start_line: 1,
            end_line: 4,
            embedding: Some(embedder.embed(&format!("{} {}", name, content))),
            attrs: NodeAttributes {
                exported: true,
                kind: Some("function".to_string()),
                ..NodeAttributes::default()
            },
        }
    }

    fn file_node(path: &str, content: &str) -> Node {
        Node {
            id: Node::file_id(path),
            node_type: NodeType::File,
            name: path.rsplit('/').next().unwrap_or(path).to_string(),
            path: path.to_string(),
            content: content.to_string(),
            start_line: 1,
            end_line: content.lines().count().max(1),
            embedding: None,
            attrs: NodeAttributes::default(),
        }
    }

    /// The auth fixture: ui.renderLogin -> login.handleLogin -> auth.authenticateUser
    fn auth_graph(embedder: &dyn Embedder) -> CodeGraph {
        let mut graph = CodeGraph::new();
        let auth = symbol(
            "authenticateUser",
            "src/auth.ts",
            "export function authenticateUser(name, secret) { return secret.length > 0; }",
            embedder,
        );
        let login = symbol(
            "handleLogin",
            "src/login.ts",
            "export function handleLogin(name, secret) { return authenticateUser(name, secret); }",
            embedder,
        );
        let render = symbol(
            "renderLogin",
            "src/ui.ts",
            "export function renderLogin() { return handleLogin('guest', 'pw'); }",
            embedder,
        );
        let (auth_id, login_id, render_id) = (auth.id.clone(), login.id.clone(), render.id.clone());

        let files = [
            file_node("src/auth.ts", "export function authenticateUser(name, secret) {}"),
            file_node("src/login.ts", "export function handleLogin(name, secret) {}"),
            file_node("src/ui.ts", "export function renderLogin() {}"),
        ];
        let file_ids: Vec<String> = files.iter().map(|f| f.id.clone()).collect();
        for node in files {
            graph.upsert_node(node);
        }
        for node in [auth.clone(), login.clone(), render.clone()] {
            graph.upsert_node(node);
        }
        for (file_id, sym_id) in file_ids.iter().zip([&auth_id, &login_id, &render_id]) {
            graph
                .add_edge(Edge::new(file_id.clone(), sym_id.clone(), EdgeType::Contains))
                .unwrap();
        }
        graph
            .add_edge(Edge::new(login_id.clone(), auth_id.clone(), EdgeType::Calls))
            .unwrap();
        graph
            .add_edge(Edge::new(render_id, login_id, EdgeType::Calls))
            .unwrap();
        graph
    }

    fn build(
        graph: &CodeGraph,
        query: &str,
        target: Option<&str>,
        budget: usize,
    ) -> (DependencyContext, Resolution) {
        let embedder: Arc<dyn Embedder> = Arc::new(HashingEmbedder::default());
        let resolver = TargetResolver::new(
            graph,
            Arc::clone(&embedder),
            None,
            ResolverConfig::default(),
        );
        let retriever = DependencyAwareRetriever::new(graph, &resolver, embedder);
        retriever
            .build_context(query, target, budget, &RetrieverOptions::default())
            .unwrap()
    }

    #[test]
    fn test_backward_dependents_are_surfaced() {
        let embedder = HashingEmbedder::default();
        let graph = auth_graph(&embedder);
        let (context, _) = build(
            &graph,
            "refactor authenticateUser function",
            Some("src/auth.ts"),
            10_000,
        );

        assert!(context
            .target_nodes
            .iter()
            .any(|n| n.name == "authenticateUser"));
        let backward_names: Vec<&str> =
            context.backward_deps.iter().map(|n| n.name.as_str()).collect();
        assert!(backward_names.contains(&"handleLogin"));

        assert!(context.formatted.contains("# TARGET CODE"));
        assert!(context.formatted.contains("# DEPENDENTS"));
        assert!(context.formatted.contains("authenticateUser"));
    }

    #[test]
    fn test_walk_depth_two_reaches_transitive_dependents() {
        let embedder = HashingEmbedder::default();
        let graph = auth_graph(&embedder);
        let (context, _) = build(&graph, "refactor authenticateUser", Some("src/auth.ts"), 10_000);
        let backward_names: Vec<&str> =
            context.backward_deps.iter().map(|n| n.name.as_str()).collect();
        // depth 2: handleLogin (direct) and renderLogin (transitive)
        assert!(backward_names.contains(&"handleLogin"));
        assert!(backward_names.contains(&"renderLogin"));
    }

    #[test]
    fn test_budget_clamp_reported_in_telemetry() {
        let embedder = HashingEmbedder::default();
        let graph = auth_graph(&embedder);
        let (context, _) = build(&graph, "refactor authenticateUser", Some("src/auth.ts"), 4_000);
        assert_eq!(context.telemetry.token_budget, 6_000);
        assert!(context.tokens_used <= 6_000);
    }

    #[test]
    fn test_categories_are_disjoint() {
        let embedder = HashingEmbedder::default();
        let graph = auth_graph(&embedder);
        let (context, _) = build(&graph, "refactor authenticateUser", Some("src/auth.ts"), 8_000);

        let mut seen: HashSet<&str> = HashSet::new();
        for node in context
            .target_nodes
            .iter()
            .chain(context.forward_deps.iter())
            .chain(context.backward_deps.iter())
            .chain(context.related.iter())
        {
            assert!(seen.insert(node.id.as_str()), "node {} in two categories", node.name);
        }
    }

    #[test]
    fn test_formatted_output_within_budget() {
        let embedder = HashingEmbedder::default();
        let mut graph = auth_graph(&embedder);
        // Add bulk so packing actually has to choose
        for i in 0..40 {
            let name = format!("helper{}", i);
            let content = format!(
                "export function helper{}() {{ return authenticateUser('x', '{}'); }}",
                i,
                "y".repeat(600)
            );
            let node = symbol(&name, "src/helpers.ts", &content, &embedder);
            let auth_id = graph
                .get_all_nodes()
                .find(|n| n.name == "authenticateUser")
                .unwrap()
                .id
                .clone();
            let node_id = node.id.clone();
            graph.upsert_node(node);
            graph
                .add_edge(Edge::new(node_id, auth_id, EdgeType::Calls))
                .unwrap();
        }

        let (context, _) = build(&graph, "refactor authenticateUser", Some("src/auth.ts"), 6_000);
        assert!(context.tokens_used <= 6_000, "used {}", context.tokens_used);
        assert!(!context.target_nodes.is_empty());
    }

    #[test]
    fn test_explicit_target_overrides_resolution() {
        let embedder = HashingEmbedder::default();
        let graph = auth_graph(&embedder);
        let (context, _) = build(&graph, "refactor authenticateUser", Some("src/ui.ts"), 8_000);
        assert_eq!(context.telemetry.primary_path, "src/ui.ts");
        assert!(context.target_nodes.iter().all(|n| n.path == "src/ui.ts"));
    }

    #[test]
    fn test_no_target_fails() {
        let embedder = HashingEmbedder::default();
        let graph = auth_graph(&embedder);
        let resolver = TargetResolver::new(
            &graph,
            Arc::new(HashingEmbedder::default()),
            None,
            ResolverConfig::default(),
        );
        let retriever = DependencyAwareRetriever::new(
            &graph,
            &resolver,
            Arc::new(HashingEmbedder::default()),
        );
        let result = retriever.build_context("", None, 8_000, &RetrieverOptions::default());
        assert!(result.is_err());
    }

    #[test]
    fn test_related_padded_from_graph_expansion() {
        let embedder = HashingEmbedder::default();
        let mut graph = auth_graph(&embedder);
        // An exported sibling in the target file, invisible to both indexes
        // (no embedding, no query-term overlap), so only graph expansion can
        // surface it
        let mut sibling = symbol(
            "rotateKeys",
            "src/auth.ts",
            "export function rotateKeys() { return 1; }",
            &embedder,
        );
        sibling.embedding = None;
        graph.upsert_node(sibling);

        let (context, _) = build(&graph, "refactor authenticateUser", Some("src/auth.ts"), 10_000);
        let related_names: Vec<&str> = context.related.iter().map(|n| n.name.as_str()).collect();
        assert!(related_names.contains(&"rotateKeys"));
    }

    #[test]
    fn test_tokens_saved_accounting() {
        let embedder = HashingEmbedder::default();
        let graph = auth_graph(&embedder);
        let (context, _) = build(&graph, "refactor authenticateUser", Some("src/auth.ts"), 8_000);
        // full estimate is 3x the involved file contents; always >= 0
        assert_eq!(
            context.tokens_saved,
            context.telemetry.tokens_saved
        );
    }
}
