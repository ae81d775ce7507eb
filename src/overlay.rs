//! Overlay: an append-only operation log atop a base graph
//!
//! Uncommitted edits never mutate the base graph. Each file modification is
//! recorded as a batch of {add, remove, modify} operations; `apply` replays
//! the log over a clone of the base, producing the effective graph. This
//! keeps the base safely shareable with concurrent readers while the commit
//! path stays "full rebuild + swap".
//!
//! Operation order matters: removals for a path are appended before the adds
//! that replace them, and a re-imported path first clears its older deltas
//! via `clear_path`.

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::graph::{fnv1a_hash, CodeGraph, Edge, Node};

/// Kind of overlay operation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OverlayOpType {
    Add,
    Remove,
    /// Same replay semantics as `Add` (upsert); logged distinctly so the
    /// operation history records intent
    Modify,
}

/// One entry in the overlay operation log
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OverlayOp {
    #[serde(rename = "type")]
    pub op_type: OverlayOpType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub node_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub edge_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub node: Option<Node>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub edge: Option<Edge>,
    /// Free-form annotations; the manager records the touched path here so
    /// superseded deltas can be cleared on re-import
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<serde_json::Value>,
    /// Unix millis when the operation was appended
    pub timestamp: i64,
}

impl OverlayOp {
    fn stamped(op_type: OverlayOpType, path: Option<&str>) -> Self {
        Self {
            op_type,
            node_id: None,
            edge_id: None,
            node: None,
            edge: None,
            metadata: path.map(|p| serde_json::json!({ "path": p })),
            timestamp: chrono::Utc::now().timestamp_millis(),
        }
    }

    pub fn add_node(node: Node) -> Self {
        let mut op = Self::stamped(OverlayOpType::Add, Some(&node.path));
        op.node_id = Some(node.id.clone());
        op.node = Some(node);
        op
    }

    pub fn modify_node(node: Node) -> Self {
        let mut op = Self::stamped(OverlayOpType::Modify, Some(&node.path));
        op.node_id = Some(node.id.clone());
        op.node = Some(node);
        op
    }

    pub fn remove_node(node_id: impl Into<String>, path: &str) -> Self {
        let mut op = Self::stamped(OverlayOpType::Remove, Some(path));
        op.node_id = Some(node_id.into());
        op
    }

    pub fn add_edge(edge: Edge, path: &str) -> Self {
        let mut op = Self::stamped(OverlayOpType::Add, Some(path));
        op.edge_id = Some(edge.id.clone());
        op.edge = Some(edge);
        op
    }

    pub fn remove_edge(edge_id: impl Into<String>, path: &str) -> Self {
        let mut op = Self::stamped(OverlayOpType::Remove, Some(path));
        op.edge_id = Some(edge_id.into());
        op
    }

    /// The path this operation touches, when recorded
    pub fn path(&self) -> Option<&str> {
        self.metadata
            .as_ref()
            .and_then(|m| m.get("path"))
            .and_then(|p| p.as_str())
    }
}

/// Append-only operation log over a base-graph snapshot
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GraphOverlay {
    pub id: String,
    /// Identity of the base graph this overlay was opened against
    pub base_graph_snapshot: String,
    pub operations: Vec<OverlayOp>,
    /// Paths with pending modifications, in first-touch order
    pub modified_paths: Vec<String>,
}

impl GraphOverlay {
    /// Open a new overlay against a base snapshot id
    pub fn new(base_graph_snapshot: impl Into<String>) -> Self {
        let base_graph_snapshot = base_graph_snapshot.into();
        let id = format!(
            "overlay:{:016x}",
            fnv1a_hash(&format!(
                "{}@{}",
                base_graph_snapshot,
                chrono::Utc::now().timestamp_millis()
            ))
        );
        Self {
            id,
            base_graph_snapshot,
            operations: Vec::new(),
            modified_paths: Vec::new(),
        }
    }

    /// An overlay is empty iff its operation list is empty
    pub fn is_empty(&self) -> bool {
        self.operations.is_empty()
    }

    pub fn op_count(&self) -> usize {
        self.operations.len()
    }

    /// Append an operation, tracking its path as modified
    pub fn push(&mut self, op: OverlayOp) {
        if let Some(path) = op.path() {
            if !self.modified_paths.iter().any(|p| p == path) {
                self.modified_paths.push(path.to_string());
            }
        }
        self.operations.push(op);
    }

    /// Drop every pending operation touching `path`
    ///
    /// Used when a file is re-imported into the overlay: the fresh snapshot
    /// must replace the older deltas, not stack on top of them.
    pub fn clear_path(&mut self, path: &str) {
        self.operations.retain(|op| op.path() != Some(path));
        self.modified_paths.retain(|p| p != path);
    }

    /// Replay the log over a clone of the base graph. Pure: the base is
    /// untouched and repeated calls yield equal results.
    pub fn apply(&self, base: &CodeGraph) -> CodeGraph {
        let mut graph = base.clone();
        for op in &self.operations {
            match op.op_type {
                OverlayOpType::Add | OverlayOpType::Modify => {
                    if let Some(node) = &op.node {
                        graph.upsert_node(node.clone());
                    }
                    if let Some(edge) = &op.edge {
                        // Endpoint integrity holds for the applied graph too;
                        // an edge whose endpoints vanished is dropped.
                        if let Err(e) = graph.add_edge(edge.clone()) {
                            debug!("overlay apply dropped edge {}: {}", edge.id, e);
                        }
                    }
                }
                OverlayOpType::Remove => {
                    if let Some(node_id) = &op.node_id {
                        graph.remove_node(node_id);
                    }
                    if let Some(edge_id) = &op.edge_id {
                        graph.remove_edge(edge_id);
                    }
                }
            }
        }
        graph
    }

    pub fn to_json(&self) -> serde_json::Value {
        serde_json::to_value(self).unwrap_or(serde_json::Value::Null)
    }
}
