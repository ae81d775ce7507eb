//! Embedding and cross-encoder contracts
//!
//! Both models sit behind narrow traits so a model-backed implementation can
//! be substituted without touching the resolver or retriever. The in-tree
//! implementations are deterministic and self-contained:
//!
//! - `HashingEmbedder`: feature-hashing bag of tokens into a fixed dimension,
//!   L2-normalised. Equal inputs produce equal vectors.
//! - `TokenOverlapCrossEncoder`: query/document token overlap in [0, 1].
//!
//! `EMBEDDINGS_DISABLED` swaps the embedder for a no-op returning empty
//! vectors; the resolver then falls back to lexical-only search.
//! `CROSS_ENCODER_ENABLED` (or an explicit model id) requests the
//! cross-encoder; a load failure logs a warning and disables it rather than
//! propagating.

pub mod cache;

use std::sync::Arc;

use tracing::{debug, warn};

use crate::bm25::tokenize;
use crate::graph::fnv1a_hash;

/// Fixed dimension of the in-tree hashing embedder
pub const EMBEDDING_DIM: usize = 256;

/// Narrow embedding contract
///
/// `initialize` may be called multiple times idempotently. `embed` is
/// deterministic for equal inputs within a process and produces
/// fixed-dimension, L2-normalised vectors (or empty vectors when disabled).
pub trait Embedder: Send + Sync {
    fn initialize(&self) -> crate::error::Result<()> {
        Ok(())
    }

    fn embed(&self, text: &str) -> Vec<f32>;

    /// 0 when embeddings are disabled
    fn dimension(&self) -> usize;

    fn is_enabled(&self) -> bool {
        self.dimension() > 0
    }
}

/// Pairwise relevance scorer reading query and document jointly.
/// Best-effort: failures yield 0 and never propagate.
pub trait CrossEncoder: Send + Sync {
    fn score(&self, query: &str, text: &str) -> f32;
}

// ============================================================================
// Implementations
// ============================================================================

/// Disabled-mode embedder: returns empty vectors
#[derive(Debug, Default)]
pub struct NoopEmbedder;

impl Embedder for NoopEmbedder {
    fn embed(&self, _text: &str) -> Vec<f32> {
        Vec::new()
    }

    fn dimension(&self) -> usize {
        0
    }
}

/// Feature-hashing embedder
///
/// Tokens are hashed into `EMBEDDING_DIM` buckets with a signed contribution
/// derived from a second hash bit, which keeps unrelated token collisions
/// from accumulating systematically. The result is L2-normalised.
#[derive(Debug)]
pub struct HashingEmbedder {
    dimension: usize,
}

impl Default for HashingEmbedder {
    fn default() -> Self {
        Self {
            dimension: EMBEDDING_DIM,
        }
    }
}

impl HashingEmbedder {
    pub fn new(dimension: usize) -> Self {
        Self { dimension }
    }
}

impl Embedder for HashingEmbedder {
    fn embed(&self, text: &str) -> Vec<f32> {
        let tokens = tokenize(text);
        if tokens.is_empty() {
            // No signal: an empty vector tells callers to fall back to
            // lexical search rather than ranking by a zero vector
            return Vec::new();
        }
        let mut vector = vec![0.0f32; self.dimension];
        for token in tokens {
            let hash = fnv1a_hash(&token);
            let bucket = (hash % self.dimension as u64) as usize;
            let sign = if hash & (1 << 63) == 0 { 1.0 } else { -1.0 };
            vector[bucket] += sign;
        }
        let norm: f32 = vector.iter().map(|v| v * v).sum::<f32>().sqrt();
        if norm > 0.0 {
            for v in &mut vector {
                *v /= norm;
            }
        }
        vector
    }

    fn dimension(&self) -> usize {
        self.dimension
    }
}

/// Cross-encoder scoring by query-token coverage of the document
#[derive(Debug, Default)]
pub struct TokenOverlapCrossEncoder;

impl CrossEncoder for TokenOverlapCrossEncoder {
    fn score(&self, query: &str, text: &str) -> f32 {
        let query_tokens = tokenize(query);
        if query_tokens.is_empty() {
            return 0.0;
        }
        let doc_tokens: ahash::AHashSet<String> = tokenize(text).into_iter().collect();
        let hits = query_tokens
            .iter()
            .filter(|t| doc_tokens.contains(*t))
            .count();
        (hits as f32 / query_tokens.len() as f32).clamp(0.0, 1.0)
    }
}

// ============================================================================
// Environment switches
// ============================================================================

fn env_flag(name: &str) -> bool {
    std::env::var(name)
        .map(|v| {
            let v = v.trim().to_lowercase();
            !v.is_empty() && v != "0" && v != "false"
        })
        .unwrap_or(false)
}

/// `EMBEDDINGS_DISABLED` truthy -> the no-op embedder is used
pub fn embeddings_disabled() -> bool {
    env_flag("EMBEDDINGS_DISABLED")
}

/// `CROSS_ENCODER_ENABLED` truthy -> the cross-encoder should be loaded
pub fn cross_encoder_requested() -> bool {
    env_flag("CROSS_ENCODER_ENABLED")
}

/// Build the configured embedder, honouring `EMBEDDINGS_DISABLED`
pub fn load_embedder() -> Arc<dyn Embedder> {
    if embeddings_disabled() {
        debug!("embeddings disabled by environment; using no-op embedder");
        return Arc::new(NoopEmbedder);
    }
    Arc::new(HashingEmbedder::default())
}

/// Attempt to load the cross-encoder
///
/// `model_id` selects a specific model; `None` with `enabled` uses the
/// default. Load failure logs and disables, never raises.
pub fn load_cross_encoder(enabled: bool, model_id: Option<&str>) -> Option<Arc<dyn CrossEncoder>> {
    if !enabled && model_id.is_none() && !cross_encoder_requested() {
        return None;
    }
    match model_id {
        None | Some("token-overlap") => Some(Arc::new(TokenOverlapCrossEncoder)),
        Some(other) => {
            warn!("cross-encoder model {:?} unavailable; disabling", other);
            None
        }
    }
}
