//! Reciprocal Rank Fusion and hybrid reranking
//!
//! RRF merges the ANN and BM25 ranked lists without needing their scores to
//! be commensurable. The reranker then blends min-max-normalised signals
//! (semantic, lexical, structural, optional cross-encoder) into one score
//! per node; normalising per batch keeps the weighted blend meaningful even
//! at small candidate counts.

use std::sync::Arc;

use crate::bm25::Bm25Hit;
use crate::embedding::CrossEncoder;
use crate::graph::Node;
use crate::hnsw::AnnHit;

/// RRF constant: contribution of rank r is 1/(k + r + 1)
const RRF_K: f64 = 60.0;

/// A node id after fusion, with raw per-source scores retained for telemetry
#[derive(Debug, Clone, PartialEq)]
pub struct FusedHit {
    pub id: String,
    pub fused: f64,
    /// Raw ANN cosine similarity, when the id appeared in the semantic list
    pub semantic: Option<f64>,
    /// Raw BM25 score, when the id appeared in the lexical list
    pub lexical: Option<f64>,
}

/// Fuse the ANN and BM25 lists with Reciprocal Rank Fusion
pub fn rrf_fuse(semantic: &[AnnHit], lexical: &[Bm25Hit], top_k: usize) -> Vec<FusedHit> {
    let mut by_id: ahash::AHashMap<&str, FusedHit> = ahash::AHashMap::new();

    for (rank, hit) in semantic.iter().enumerate() {
        let entry = by_id.entry(&hit.id).or_insert_with(|| FusedHit {
            id: hit.id.clone(),
            fused: 0.0,
            semantic: None,
            lexical: None,
        });
        entry.fused += 1.0 / (RRF_K + rank as f64 + 1.0);
        entry.semantic = Some(f64::from(hit.similarity));
    }
    for (rank, hit) in lexical.iter().enumerate() {
        let entry = by_id.entry(&hit.id).or_insert_with(|| FusedHit {
            id: hit.id.clone(),
            fused: 0.0,
            semantic: None,
            lexical: None,
        });
        entry.fused += 1.0 / (RRF_K + rank as f64 + 1.0);
        entry.lexical = Some(hit.score);
    }

    let mut fused: Vec<FusedHit> = by_id.into_values().collect();
    fused.sort_by(|a, b| {
        b.fused
            .partial_cmp(&a.fused)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| a.id.cmp(&b.id))
    });
    fused.truncate(top_k);
    fused
}

/// Blend weights over the normalised signals; always sum to 1
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RerankWeights {
    pub semantic: f64,
    pub lexical: f64,
    pub structural: f64,
    pub cross: f64,
}

impl RerankWeights {
    /// Default blend without a cross-encoder
    pub fn standard() -> Self {
        Self {
            semantic: 0.5,
            lexical: 0.3,
            structural: 0.2,
            cross: 0.0,
        }
    }

    /// Blend with the cross-encoder signal added and all weights
    /// renormalised to sum to 1
    pub fn with_cross_encoder() -> Self {
        let raw = Self {
            semantic: 0.5,
            lexical: 0.3,
            structural: 0.2,
            cross: 0.2,
        };
        let sum = raw.semantic + raw.lexical + raw.structural + raw.cross;
        Self {
            semantic: raw.semantic / sum,
            lexical: raw.lexical / sum,
            structural: raw.structural / sum,
            cross: raw.cross / sum,
        }
    }
}

/// One candidate node scored by the reranker
#[derive(Debug, Clone)]
pub struct RerankedHit {
    pub id: String,
    /// Weighted blend of the normalised signals
    pub total: f64,
    pub semantic: f64,
    pub lexical: f64,
    pub structural: f64,
    /// Present only when a cross-encoder is configured
    pub cross: Option<f64>,
}

/// Weighted blend of semantic, lexical, structural and cross-encoder signals
pub struct HybridReranker {
    weights: RerankWeights,
    cross_encoder: Option<Arc<dyn CrossEncoder>>,
}

impl HybridReranker {
    pub fn new(cross_encoder: Option<Arc<dyn CrossEncoder>>) -> Self {
        let weights = if cross_encoder.is_some() {
            RerankWeights::with_cross_encoder()
        } else {
            RerankWeights::standard()
        };
        Self {
            weights,
            cross_encoder,
        }
    }

    pub fn weights(&self) -> RerankWeights {
        self.weights
    }

    pub fn has_cross_encoder(&self) -> bool {
        self.cross_encoder.is_some()
    }

    /// Rerank fused hits; `nodes` supplies the graph node for each hit in
    /// the same order
    pub fn rerank(&self, query: &str, hits: &[FusedHit], nodes: &[&Node]) -> Vec<RerankedHit> {
        if hits.is_empty() {
            return Vec::new();
        }

        let semantic_raw: Vec<f64> = hits.iter().map(|h| h.semantic.unwrap_or(0.0)).collect();
        let lexical_raw: Vec<f64> = hits.iter().map(|h| h.lexical.unwrap_or(0.0)).collect();
        let structural_raw: Vec<f64> = nodes.iter().map(|n| structural_signal(n)).collect();
        let cross_raw: Option<Vec<f64>> = self.cross_encoder.as_ref().map(|encoder| {
            nodes
                .iter()
                .map(|n| f64::from(encoder.score(query, &n.content).clamp(0.0, 1.0)))
                .collect()
        });

        let semantic = min_max_normalize(&semantic_raw);
        let lexical = min_max_normalize(&lexical_raw);
        let structural = min_max_normalize(&structural_raw);
        let cross = cross_raw.as_deref().map(min_max_normalize);

        let mut reranked: Vec<RerankedHit> = hits
            .iter()
            .enumerate()
            .map(|(i, hit)| {
                let cross_value = cross.as_ref().map(|c| c[i]);
                let total = self.weights.semantic * semantic[i]
                    + self.weights.lexical * lexical[i]
                    + self.weights.structural * structural[i]
                    + self.weights.cross * cross_value.unwrap_or(0.0);
                RerankedHit {
                    id: hit.id.clone(),
                    total,
                    semantic: semantic[i],
                    lexical: lexical[i],
                    structural: structural[i],
                    cross: cross_value,
                }
            })
            .collect();

        reranked.sort_by(|a, b| {
            b.total
                .partial_cmp(&a.total)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.id.cmp(&b.id))
        });
        reranked
    }
}

/// Structural signal: exported bit (0.7) plus a locality factor (0.3) that
/// favours compact nodes over sprawling ones
fn structural_signal(node: &Node) -> f64 {
    let exported = if node.attrs.exported { 1.0 } else { 0.0 };
    let span = node.line_span() as f64;
    let locality = 1.0 / (span + 1.0).ln().max(f64::MIN_POSITIVE);
    0.7 * exported + 0.3 * locality.min(1.0)
}

/// Min-max over the candidate set; a constant vector normalises to all-ones
fn min_max_normalize(values: &[f64]) -> Vec<f64> {
    let min = values.iter().cloned().fold(f64::INFINITY, f64::min);
    let max = values.iter().cloned().fold(f64::NEG_INFINITY, f64::max);
    if values.is_empty() {
        return Vec::new();
    }
    if (max - min).abs() < f64::EPSILON {
        return vec![1.0; values.len()];
    }
    values.iter().map(|v| (v - min) / (max - min)).collect()
}
