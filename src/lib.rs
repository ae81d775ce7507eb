//! repocontext: dependency-aware context retrieval for coding assistants
//!
//! Given a natural-language change request and a codebase, this engine
//! selects the minimal bundle of code units (functions, classes, files) an
//! assistant must see to make the change safely, with particular weight on
//! *dependents* of the edited code so callers are not broken.
//!
//! The engine is built from four layers:
//!
//! 1. A code graph over symbols and files, extracted with tree-sitter, with
//!    a single-writer overlay tracking uncommitted edits.
//! 2. Hybrid candidate search: HNSW approximate nearest neighbours plus BM25
//!    lexical ranking, merged with reciprocal-rank fusion and reranked by a
//!    weighted blend (optionally cross-encoder augmented).
//! 3. A dependency-aware packager that walks the graph forward and backward
//!    from the targets and packs categorised context under a token budget.
//! 4. An iterative pipeline that evaluates precision/recall against ground
//!    truth and widens the search on failure, producing a structured trace.
//!
//! # Example
//!
//! ```ignore
//! use repocontext::builder::GraphBuilder;
//! use repocontext::manager::GraphManager;
//! use repocontext::pipeline::{Pipeline, PipelineConfig, PipelineRequest};
//! use repocontext::store::InMemoryGraphStore;
//!
//! let builder = GraphBuilder::new("path/to/repo");
//! let mut manager = GraphManager::new(builder, Box::new(InMemoryGraphStore::new()));
//! let mut pipeline = Pipeline::new(&mut manager, PipelineConfig::default());
//! let result = pipeline.run(&PipelineRequest {
//!     query: "refactor authenticateUser".to_string(),
//!     ..PipelineRequest::default()
//! });
//! println!("{}", result.context.unwrap().formatted);
//! ```

pub mod benchmark;
pub mod bm25;
pub mod builder;
pub mod cli;
pub mod embedding;
pub mod error;
pub mod evaluation;
pub mod extract;
pub mod fusion;
pub mod graph;
pub mod hnsw;
pub mod lang;
pub mod manager;
pub mod overlay;
pub mod pipeline;
pub mod resolver;
pub mod retriever;
pub mod store;
pub mod tokens;
pub mod trace;

// Re-export commonly used types
pub use error::{Result, RetrievalError};
pub use lang::Lang;

pub use graph::{CodeGraph, Edge, EdgeType, Node, NodeAttributes, NodeType};
pub use overlay::{GraphOverlay, OverlayOp, OverlayOpType};

pub use builder::{FileSnapshot, GraphBuilder};
pub use manager::{GraphManager, LoggingHooks, OverlayHooks};
pub use store::{GraphStore, InMemoryGraphStore, JsonFileStore};

pub use bm25::{tokenize, Bm25Hit, Bm25Index};
pub use hnsw::{AnnHit, HnswConfig, HnswIndex, HnswStats};

pub use embedding::cache::EmbeddingCache;
pub use embedding::{
    CrossEncoder, Embedder, HashingEmbedder, NoopEmbedder, TokenOverlapCrossEncoder,
};

pub use fusion::{rrf_fuse, FusedHit, HybridReranker, RerankWeights};
pub use resolver::{Candidate, Resolution, ResolveOptions, ResolverConfig, TargetResolver};
pub use retriever::{
    ContextTelemetry, DependencyAwareRetriever, DependencyContext, RetrieverOptions,
};

pub use evaluation::{EvalAction, EvalConfig, Evaluation, EvaluationAgent};
pub use pipeline::{Pipeline, PipelineConfig, PipelineRequest, PipelineResult};
pub use trace::{TraceEntry, TraceRecorder, TraceStatus};

pub use benchmark::{BenchmarkDataset, BenchmarkReport, BenchmarkTask};
pub use tokens::{clamp_budget, estimate_tokens};
