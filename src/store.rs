//! Graph persistence back-ends
//!
//! The store contract is deliberately small: `load`, `save`, `clear`. The
//! in-memory store keeps a deep copy and hands out fresh clones, so callers
//! can never mutate the stored graph through a returned reference. The JSON
//! file store persists the canonical graph JSON between runs.

use std::path::PathBuf;

use parking_lot::Mutex;

use crate::error::{Result, RetrievalError};
use crate::graph::CodeGraph;

/// Persistence contract for a base graph
pub trait GraphStore: Send + Sync {
    /// Load the stored graph, if any
    fn load(&self) -> Result<Option<CodeGraph>>;
    /// Store a deep copy of the graph
    fn save(&self, graph: &CodeGraph) -> Result<()>;
    /// Drop stored state
    fn clear(&self) -> Result<()>;
}

/// Default store: a deep copy held in memory
#[derive(Default)]
pub struct InMemoryGraphStore {
    slot: Mutex<Option<CodeGraph>>,
}

impl InMemoryGraphStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl GraphStore for InMemoryGraphStore {
    fn load(&self) -> Result<Option<CodeGraph>> {
        Ok(self.slot.lock().clone())
    }

    fn save(&self, graph: &CodeGraph) -> Result<()> {
        *self.slot.lock() = Some(graph.clone());
        Ok(())
    }

    fn clear(&self) -> Result<()> {
        *self.slot.lock() = None;
        Ok(())
    }
}

/// File-backed store holding the canonical graph JSON
pub struct JsonFileStore {
    path: PathBuf,
}

impl JsonFileStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

impl GraphStore for JsonFileStore {
    fn load(&self) -> Result<Option<CodeGraph>> {
        if !self.path.exists() {
            return Ok(None);
        }
        let content = std::fs::read_to_string(&self.path)?;
        let value: serde_json::Value =
            serde_json::from_str(&content).map_err(|e| RetrievalError::Configuration {
                message: format!("corrupt graph store {}: {}", self.path.display(), e),
            })?;
        Ok(Some(CodeGraph::from_json(&value)?))
    }

    fn save(&self, graph: &CodeGraph) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let json = graph.to_json();
        std::fs::write(&self.path, serde_json::to_string(&json).unwrap_or_default())?;
        Ok(())
    }

    fn clear(&self) -> Result<()> {
        if self.path.exists() {
            std::fs::remove_file(&self.path)?;
        }
        Ok(())
    }
}

/// Open a store by kind: `memory` or `json`
pub fn open_store(kind: &str, path: Option<PathBuf>) -> Result<Box<dyn GraphStore>> {
    match kind {
        "memory" => Ok(Box::new(InMemoryGraphStore::new())),
        "json" => {
            let path = path.ok_or_else(|| {
                RetrievalError::config("json graph store requires a file path")
            })?;
            Ok(Box::new(JsonFileStore::new(path)))
        }
        other => Err(RetrievalError::config(format!(
            "unsupported graph-store kind: {}",
            other
        ))),
    }
}
