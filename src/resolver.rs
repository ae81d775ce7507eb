//! Target resolver: natural-language query -> ranked candidate files
//!
//! At construction the resolver derives its two indexes (ANN + BM25) from the
//! graph it is given; the graph itself never learns about them, and the
//! indexes never mutate afterwards. Resolution fuses both rankings, reranks
//! node-by-node, aggregates to file-level candidates, then applies seed-path
//! injection, recent-focus and intent boosts.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Arc;

use once_cell::sync::Lazy;
use regex::Regex;
use serde::Serialize;
use tracing::debug;

use crate::bm25::Bm25Index;
use crate::embedding::{CrossEncoder, Embedder};
use crate::fusion::{rrf_fuse, FusedHit, HybridReranker};
use crate::graph::{CodeGraph, Node, NodeType};
use crate::hnsw::{HnswConfig, HnswIndex};

/// Fixed score bonus for seed paths injected from hints
const SEED_SCORE: f64 = 5.0;
const SEED_REASON: &str = "Seed path (dataset hint)";
/// Boost for candidates on recently-touched paths
const RECENT_FOCUS_BOOST: f64 = 1.0;

/// Per-file aggregate of scoring signals
#[derive(Debug, Clone, Serialize)]
pub struct Candidate {
    /// Normalised file path
    pub path: String,
    /// Total score; candidate ordering is strictly by this, descending
    pub score: f64,
    pub semantic: f64,
    pub lexical: f64,
    pub structural: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cross: Option<f64>,
    /// Raw per-source score sums, for telemetry
    pub source_scores: BTreeMap<String, f64>,
    pub reasons: Vec<String>,
    /// Ids of the graph nodes that contributed
    pub nodes: Vec<String>,
}

impl Candidate {
    fn empty(path: String) -> Self {
        Self {
            path,
            score: 0.0,
            semantic: 0.0,
            lexical: 0.0,
            structural: 0.0,
            cross: None,
            source_scores: BTreeMap::new(),
            reasons: Vec::new(),
            nodes: Vec::new(),
        }
    }
}

/// Ordered list of candidates; `primary` aliases the top element
#[derive(Debug, Clone, Default, Serialize)]
pub struct Resolution {
    pub candidates: Vec<Candidate>,
}

impl Resolution {
    pub fn primary(&self) -> Option<&Candidate> {
        self.candidates.first()
    }

    pub fn is_empty(&self) -> bool {
        self.candidates.is_empty()
    }

    pub fn paths(&self) -> Vec<&str> {
        self.candidates.iter().map(|c| c.path.as_str()).collect()
    }
}

/// Options for one resolution call
#[derive(Debug, Clone, Default)]
pub struct ResolveOptions {
    /// Recently-touched paths; injected as seeds and given the focus boost
    pub recent_paths: Vec<String>,
}

/// Resolver configuration
#[derive(Debug, Clone)]
pub struct ResolverConfig {
    /// Maximum number of candidates returned
    pub limit: usize,
}

impl Default for ResolverConfig {
    fn default() -> Self {
        Self { limit: 8 }
    }
}

/// Query -> ranked candidate files over one graph
pub struct TargetResolver {
    config: ResolverConfig,
    embedder: Arc<dyn Embedder>,
    reranker: HybridReranker,
    ann: HnswIndex,
    bm25: Bm25Index,
    /// Node metadata needed after index lookups, keyed by node id
    nodes: HashMap<String, Node>,
    /// lowercased symbol name -> normalised paths declaring it
    name_lookup: HashMap<String, HashSet<String>>,
}

impl TargetResolver {
    /// Build both indexes from all graph nodes
    pub fn new(
        graph: &CodeGraph,
        embedder: Arc<dyn Embedder>,
        cross_encoder: Option<Arc<dyn CrossEncoder>>,
        config: ResolverConfig,
    ) -> Self {
        let mut ann = HnswIndex::new(HnswConfig::default());
        let mut bm25 = Bm25Index::new();
        let mut nodes = HashMap::new();
        let mut name_lookup: HashMap<String, HashSet<String>> = HashMap::new();

        for node in graph.get_all_nodes() {
            let document = format!("{} {} {}", node.name, node.path, node.content);
            bm25.add_document(&node.id, &document);

            if let Some(embedding) = &node.embedding {
                if let Err(e) = ann.add(&node.id, embedding) {
                    debug!("skipping vector for {}: {}", node.id, e);
                }
            }

            if node.node_type != NodeType::File {
                name_lookup
                    .entry(node.name.to_lowercase())
                    .or_default()
                    .insert(normalize(&node.path));
            }
            nodes.insert(node.id.clone(), node.clone());
        }

        debug!(
            "resolver indexes ready: {} documents, {} vectors",
            bm25.len(),
            ann.len()
        );

        Self {
            config,
            embedder,
            reranker: HybridReranker::new(cross_encoder),
            ann,
            bm25,
            nodes,
            name_lookup,
        }
    }

    pub fn has_cross_encoder(&self) -> bool {
        self.reranker.has_cross_encoder()
    }

    /// Resolve a query to ranked candidate files
    pub fn resolve(&self, query: &str, options: &ResolveOptions) -> Resolution {
        let limit = self.config.limit;
        let seed_count = (limit * 3).max(limit);

        // The semantic leg is best-effort: an empty embedder output or a
        // dimension mismatch degrades to lexical-only.
        let query_vector = self.embedder.embed(query);
        let mut ann_hits = if query_vector.is_empty() {
            Vec::new()
        } else {
            self.ann
                .search(&query_vector, seed_count, None)
                .unwrap_or_default()
        };
        // Nodes with no similarity at all are noise, not candidates
        ann_hits.retain(|h| h.similarity > 0.0);
        let bm25_hits = self.bm25.search(query, seed_count);

        let mut by_path: HashMap<String, Candidate> = HashMap::new();

        if !ann_hits.is_empty() || !bm25_hits.is_empty() {
            let fused = rrf_fuse(&ann_hits, &bm25_hits, seed_count);
            self.aggregate(query, &fused, &mut by_path);
        }

        self.inject_seed_paths(query, options, &mut by_path);
        if by_path.is_empty() {
            // No signal fired at all
            return Resolution::default();
        }
        self.finalize(query, by_path, options)
    }

    /// Rerank fused node hits and fold them into file-level candidates
    fn aggregate(&self, query: &str, fused: &[FusedHit], by_path: &mut HashMap<String, Candidate>) {
        let known: Vec<&FusedHit> = fused
            .iter()
            .filter(|hit| self.nodes.contains_key(&hit.id))
            .collect();
        let fused_owned: Vec<FusedHit> = known.iter().map(|h| (*h).clone()).collect();
        let node_refs: Vec<&Node> = known
            .iter()
            .filter_map(|hit| self.nodes.get(&hit.id))
            .collect();
        let raw_by_id: HashMap<&str, &FusedHit> =
            known.iter().map(|hit| (hit.id.as_str(), *hit)).collect();

        let reranked = self.reranker.rerank(query, &fused_owned, &node_refs);

        for hit in &reranked {
            let Some(node) = self.nodes.get(&hit.id) else {
                continue;
            };
            let path = normalize(&node.path);
            let candidate = by_path
                .entry(path.clone())
                .or_insert_with(|| Candidate::empty(path));

            candidate.score += hit.total;
            candidate.semantic += hit.semantic;
            candidate.lexical += hit.lexical;
            candidate.structural += hit.structural;
            if let Some(cross) = hit.cross {
                *candidate.cross.get_or_insert(0.0) += cross;
            }

            if let Some(raw) = raw_by_id.get(hit.id.as_str()) {
                if let Some(semantic) = raw.semantic {
                    *candidate
                        .source_scores
                        .entry("semantic".to_string())
                        .or_insert(0.0) += semantic;
                }
                if let Some(lexical) = raw.lexical {
                    *candidate
                        .source_scores
                        .entry("lexical".to_string())
                        .or_insert(0.0) += lexical;
                }
                *candidate
                    .source_scores
                    .entry("fused".to_string())
                    .or_insert(0.0) += raw.fused;
            }

            candidate.nodes.push(hit.id.clone());
            candidate
                .reasons
                .push(format!("Matched {} {}", node.node_type, node.name));
        }
    }

    /// Inject seed paths from recent-path hints and query inference
    fn inject_seed_paths(
        &self,
        query: &str,
        options: &ResolveOptions,
        by_path: &mut HashMap<String, Candidate>,
    ) {
        let mut seeds: Vec<String> = options.recent_paths.iter().map(|p| normalize(p)).collect();
        seeds.extend(self.infer_paths_from_query(query));
        let mut seen = HashSet::new();
        seeds.retain(|p| seen.insert(p.clone()));

        for path in seeds {
            let candidate = by_path
                .entry(path.clone())
                .or_insert_with(|| Candidate::empty(path));
            candidate.score += SEED_SCORE;
            candidate.reasons.push(SEED_REASON.to_string());
            candidate
                .source_scores
                .entry("seed".to_string())
                .and_modify(|s| *s += SEED_SCORE)
                .or_insert(SEED_SCORE);
        }
    }

    /// Paths inferred from the query text: literal file tokens with known
    /// extensions, plus name-lookup hits for tokens matching indexed symbols
    fn infer_paths_from_query(&self, query: &str) -> Vec<String> {
        let mut paths = Vec::new();

        for capture in FILE_TOKEN.find_iter(query) {
            paths.push(normalize(capture.as_str()));
        }
        for token in query.split(|c: char| !c.is_alphanumeric() && c != '_') {
            if token.len() < 2 {
                continue;
            }
            if let Some(known) = self.name_lookup.get(&token.to_lowercase()) {
                let mut sorted: Vec<String> = known.iter().cloned().collect();
                sorted.sort();
                paths.extend(sorted);
            }
        }

        paths
    }

    /// Apply boosts, order, deduplicate reasons, truncate
    fn finalize(
        &self,
        query: &str,
        by_path: HashMap<String, Candidate>,
        options: &ResolveOptions,
    ) -> Resolution {
        let recent: HashSet<String> = options.recent_paths.iter().map(|p| normalize(p)).collect();

        let mut candidates: Vec<Candidate> = by_path.into_values().collect();
        for candidate in &mut candidates {
            if recent.contains(&candidate.path) {
                candidate.score += RECENT_FOCUS_BOOST;
                candidate.reasons.push("Recent focus".to_string());
            }
        }
        apply_intent_boosts(query, &mut candidates);

        candidates.sort_by(|a, b| {
            b.score
                .partial_cmp(&a.score)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.path.cmp(&b.path))
        });

        for candidate in &mut candidates {
            let mut seen = HashSet::new();
            candidate
                .reasons
                .retain(|r| !r.is_empty() && seen.insert(r.clone()));
        }
        candidates.truncate(self.config.limit);
        Resolution { candidates }
    }
}

static FILE_TOKEN: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"[\w./-]+\.(?:tsx?|jsx?|py|mts|cts|mjs|cjs|pyi)\b")
        .expect("file token pattern compiles")
});

/// Hard-coded intent boost table
///
/// Query vocabulary pulls well-known directory families up the ranking:
/// auth-flavoured queries boost `src/auth/`, ui-flavoured queries boost
/// `src/ui/`, test-flavoured queries boost paths containing `tests/`.
fn apply_intent_boosts(query: &str, candidates: &mut [Candidate]) {
    const AUTH_TERMS: &[&str] = &["auth", "token", "login", "oauth"];
    const UI_TERMS: &[&str] = &[
        "ui", "component", "tsx", "react", "form", "input", "button", "validation",
    ];
    const TEST_TERMS: &[&str] = &["test", "spec"];

    let tokens: HashSet<String> = query
        .split(|c: char| !c.is_alphanumeric() && c != '_')
        .filter(|t| !t.is_empty())
        .map(str::to_lowercase)
        .collect();
    let has = |terms: &[&str]| terms.iter().any(|t| tokens.contains(*t));

    let auth = has(AUTH_TERMS);
    let ui = has(UI_TERMS);
    let test = has(TEST_TERMS);
    if !auth && !ui && !test {
        return;
    }

    for candidate in candidates {
        if auth && candidate.path.starts_with("src/auth/") {
            candidate.score += 2.0;
            candidate.reasons.push("Query intent: auth".to_string());
        }
        if ui && candidate.path.starts_with("src/ui/") {
            candidate.score += 2.0;
            candidate.reasons.push("Query intent: ui".to_string());
        }
        if test && candidate.path.contains("tests/") {
            candidate.score += 1.5;
            candidate.reasons.push("Query intent: tests".to_string());
        }
    }
}

fn normalize(path: &str) -> String {
    path.trim_start_matches("./").replace('\\', "/")
}
