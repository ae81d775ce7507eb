//! Typed multi-graph over files and symbols
//!
//! Nodes are files, functions, classes, and imports; edges are the structural
//! and reference relations between them. The graph keeps two auxiliary
//! indexes in sync with every mutation:
//!
//! - `path_index`: file path -> ids of all nodes on that path
//! - `outgoing` / `incoming`: node id -> ids of edges leaving/entering it
//!
//! Node identity is content-addressed: re-parsing identical content always
//! produces identical ids, which makes builds reproducible and lets the
//! overlay log reference nodes across rebuilds.

use std::collections::{HashMap, HashSet};

use serde::{Deserialize, Serialize};

use crate::error::{Result, RetrievalError};

/// FNV-1a 64-bit hash, the id primitive for nodes and edges
pub fn fnv1a_hash(input: &str) -> u64 {
    const FNV_OFFSET: u64 = 0xcbf2_9ce4_8422_2325;
    const FNV_PRIME: u64 = 0x0000_0100_0000_01b3;

    let mut hash = FNV_OFFSET;
    for byte in input.as_bytes() {
        hash ^= u64::from(*byte);
        hash = hash.wrapping_mul(FNV_PRIME);
    }
    hash
}

// ============================================================================
// Node
// ============================================================================

/// Kind of node in the code graph
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NodeType {
    File,
    Function,
    Class,
    Import,
}

impl NodeType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::File => "file",
            Self::Function => "function",
            Self::Class => "class",
            Self::Import => "import",
        }
    }
}

impl std::fmt::Display for NodeType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Attribute bag for a node
///
/// Everything here is optional metadata; absence serialises to nothing so
/// graph JSON stays compact and round-trips exactly.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct NodeAttributes {
    /// Whether the symbol is exported from its module
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub exported: bool,
    /// Fine-grained kind (e.g. "method", "arrow_function")
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub kind: Option<String>,
    /// AST node type this symbol was extracted from
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ast_type: Option<String>,
    /// Name of the containing class/function, if nested
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent_name: Option<String>,
    /// Type of the containing symbol
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent_type: Option<String>,
    /// Declaration signature (first line up to the body)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub signature: Option<String>,
    /// Parameter names
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub parameters: Vec<String>,
    /// Return type annotation, when present
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub return_type: Option<String>,
    /// Documentation from adjacent comments
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub documentation: Option<String>,
    /// Text used for embedding acquisition
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub embedding_text: Option<String>,
    /// Content digest of the owning file snapshot
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub digest: Option<String>,
}

/// A node in the code graph
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Node {
    /// Stable content-hashed identity
    pub id: String,
    #[serde(rename = "type")]
    pub node_type: NodeType,
    pub name: String,
    /// Normalised (forward-slash, repo-relative) file path
    pub path: String,
    /// Source text of the node
    pub content: String,
    /// 1-based inclusive start line
    pub start_line: usize,
    /// 1-based inclusive end line
    pub end_line: usize,
    /// Dense embedding, absent when embeddings are disabled
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub embedding: Option<Vec<f32>>,
    #[serde(default)]
    pub attrs: NodeAttributes,
}

impl Node {
    /// Deterministic id for a file node: a function of the path alone
    pub fn file_id(path: &str) -> String {
        format!("file:{:016x}", fnv1a_hash(path))
    }

    /// Deterministic id for a symbol node
    ///
    /// Two-part hash: a short file-path hash for cross-file uniqueness, then
    /// a hash over (type, name, line range, kind). Re-parsing identical
    /// content yields identical ids.
    pub fn symbol_id(
        path: &str,
        node_type: NodeType,
        name: &str,
        start_line: usize,
        end_line: usize,
        kind: &str,
    ) -> String {
        let semantic = format!(
            "{}:{}:{}-{}:{}",
            node_type.as_str(),
            name,
            start_line,
            end_line,
            kind
        );
        format!(
            "{:08x}:{:016x}",
            fnv1a_hash(path) as u32,
            fnv1a_hash(&semantic)
        )
    }

    /// Line span of the node (at least 1)
    pub fn line_span(&self) -> usize {
        self.end_line.saturating_sub(self.start_line) + 1
    }

    /// Key into the export index: `path#name`
    pub fn export_key(&self) -> String {
        format!("{}#{}", self.path, self.name)
    }
}

// ============================================================================
// Edge
// ============================================================================

/// Kind of edge in the code graph
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EdgeType {
    Contains,
    Imports,
    Calls,
    References,
    Extends,
    Implements,
}

impl EdgeType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Contains => "contains",
            Self::Imports => "imports",
            Self::Calls => "calls",
            Self::References => "references",
            Self::Extends => "extends",
            Self::Implements => "implements",
        }
    }

    /// Edge types the dependency retriever walks. Synthesised `contains`
    /// edges are excluded here; they still count in related-set expansion.
    pub fn is_dependency(&self) -> bool {
        matches!(self, Self::Imports | Self::Calls | Self::References)
    }
}

impl std::fmt::Display for EdgeType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A typed edge between two nodes
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Edge {
    pub id: String,
    pub from: String,
    pub to: String,
    #[serde(rename = "type")]
    pub edge_type: EdgeType,
    /// Attribute bag (source range of the reference, resolution notes)
    #[serde(default, skip_serializing_if = "std::collections::BTreeMap::is_empty")]
    pub attrs: std::collections::BTreeMap<String, String>,
}

impl Edge {
    /// Create an edge with a deterministic id derived from its endpoints and type
    pub fn new(from: impl Into<String>, to: impl Into<String>, edge_type: EdgeType) -> Self {
        let from = from.into();
        let to = to.into();
        let id = format!(
            "e:{:016x}",
            fnv1a_hash(&format!("{}->{}:{}", from, to, edge_type.as_str()))
        );
        Self {
            id,
            from,
            to,
            edge_type,
            attrs: std::collections::BTreeMap::new(),
        }
    }

    pub fn with_attr(mut self, key: &str, value: impl Into<String>) -> Self {
        self.attrs.insert(key.to_string(), value.into());
        self
    }
}

// ============================================================================
// Code Graph
// ============================================================================

/// In-memory code graph with path and edge indexes
#[derive(Debug, Clone, Default)]
pub struct CodeGraph {
    nodes: HashMap<String, Node>,
    edges: HashMap<String, Edge>,
    /// path -> node ids on that path
    path_index: HashMap<String, HashSet<String>>,
    /// from_id -> edge ids
    outgoing: HashMap<String, HashSet<String>>,
    /// to_id -> edge ids; avoids the full-edge scan on node removal
    incoming: HashMap<String, HashSet<String>>,
}

impl CodeGraph {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    pub fn edge_count(&self) -> usize {
        self.edges.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Insert or replace a node by id
    ///
    /// When replacing, the old path-index entry is removed first so a node
    /// whose path changed does not leave a stale index entry behind. Edges
    /// are untouched: upsert never invalidates edges whose endpoints still
    /// exist.
    pub fn upsert_node(&mut self, node: Node) {
        if let Some(old) = self.nodes.get(&node.id) {
            if let Some(ids) = self.path_index.get_mut(&old.path) {
                ids.remove(&node.id);
                if ids.is_empty() {
                    self.path_index.remove(&old.path);
                }
            }
        }
        self.path_index
            .entry(node.path.clone())
            .or_default()
            .insert(node.id.clone());
        self.nodes.insert(node.id.clone(), node);
    }

    /// Alias for `upsert_node`; insertion and replacement share semantics
    pub fn add_node(&mut self, node: Node) {
        self.upsert_node(node);
    }

    /// Add an edge; fails when either endpoint is absent
    pub fn add_edge(&mut self, edge: Edge) -> Result<()> {
        if !self.nodes.contains_key(&edge.from) {
            return Err(RetrievalError::graph(format!(
                "edge {} references missing source node {}",
                edge.id, edge.from
            )));
        }
        if !self.nodes.contains_key(&edge.to) {
            return Err(RetrievalError::graph(format!(
                "edge {} references missing target node {}",
                edge.id, edge.to
            )));
        }
        self.outgoing
            .entry(edge.from.clone())
            .or_default()
            .insert(edge.id.clone());
        self.incoming
            .entry(edge.to.clone())
            .or_default()
            .insert(edge.id.clone());
        self.edges.insert(edge.id.clone(), edge);
        Ok(())
    }

    /// Remove a node and, atomically, every edge touching it
    pub fn remove_node(&mut self, id: &str) {
        let Some(node) = self.nodes.remove(id) else {
            return;
        };

        if let Some(ids) = self.path_index.get_mut(&node.path) {
            ids.remove(id);
            if ids.is_empty() {
                self.path_index.remove(&node.path);
            }
        }

        let mut doomed: Vec<String> = Vec::new();
        if let Some(edge_ids) = self.outgoing.remove(id) {
            doomed.extend(edge_ids);
        }
        if let Some(edge_ids) = self.incoming.remove(id) {
            doomed.extend(edge_ids);
        }
        for edge_id in doomed {
            self.remove_edge(&edge_id);
        }
    }

    /// Remove an edge by id
    pub fn remove_edge(&mut self, id: &str) {
        let Some(edge) = self.edges.remove(id) else {
            return;
        };
        if let Some(ids) = self.outgoing.get_mut(&edge.from) {
            ids.remove(id);
            if ids.is_empty() {
                self.outgoing.remove(&edge.from);
            }
        }
        if let Some(ids) = self.incoming.get_mut(&edge.to) {
            ids.remove(id);
            if ids.is_empty() {
                self.incoming.remove(&edge.to);
            }
        }
    }

    /// Batch-remove every node on a path
    pub fn remove_nodes_by_path(&mut self, path: &str) {
        let ids: Vec<String> = self
            .path_index
            .get(path)
            .map(|s| s.iter().cloned().collect())
            .unwrap_or_default();
        for id in ids {
            self.remove_node(&id);
        }
    }

    pub fn get_node(&self, id: &str) -> Option<&Node> {
        self.nodes.get(id)
    }

    pub fn contains_node(&self, id: &str) -> bool {
        self.nodes.contains_key(id)
    }

    /// All nodes on a path, unordered
    pub fn get_nodes_by_path(&self, path: &str) -> Vec<&Node> {
        self.path_index
            .get(path)
            .map(|ids| ids.iter().filter_map(|id| self.nodes.get(id)).collect())
            .unwrap_or_default()
    }

    pub fn get_outgoing_edges(&self, id: &str) -> Vec<&Edge> {
        self.outgoing
            .get(id)
            .map(|ids| ids.iter().filter_map(|e| self.edges.get(e)).collect())
            .unwrap_or_default()
    }

    pub fn get_incoming_edges(&self, id: &str) -> Vec<&Edge> {
        self.incoming
            .get(id)
            .map(|ids| ids.iter().filter_map(|e| self.edges.get(e)).collect())
            .unwrap_or_default()
    }

    /// Neighbours along outgoing edges, optionally filtered by edge type
    pub fn get_neighbors(&self, id: &str, edge_type: Option<EdgeType>) -> Vec<&Node> {
        self.get_outgoing_edges(id)
            .into_iter()
            .filter(|e| edge_type.map_or(true, |t| e.edge_type == t))
            .filter_map(|e| self.nodes.get(&e.to))
            .collect()
    }

    pub fn get_all_nodes(&self) -> impl Iterator<Item = &Node> {
        self.nodes.values()
    }

    pub fn get_all_edges(&self) -> impl Iterator<Item = &Edge> {
        self.edges.values()
    }

    /// Rebuild the export index from nodes alone: `path#name -> node id`
    /// for every exported, non-file node
    pub fn export_index(&self) -> HashMap<String, String> {
        let mut index = HashMap::new();
        for node in self.nodes.values() {
            if node.node_type != NodeType::File && node.attrs.exported {
                index.insert(node.export_key(), node.id.clone());
            }
        }
        index
    }

    /// Serialise to canonical JSON: nodes and edges sorted by id so equal
    /// graphs produce byte-identical output
    pub fn to_json(&self) -> serde_json::Value {
        let mut nodes: Vec<&Node> = self.nodes.values().collect();
        nodes.sort_by(|a, b| a.id.cmp(&b.id));
        let mut edges: Vec<&Edge> = self.edges.values().collect();
        edges.sort_by(|a, b| a.id.cmp(&b.id));
        serde_json::json!({
            "nodes": nodes,
            "edges": edges,
        })
    }

    /// Rebuild a graph (including indexes) from its JSON form
    pub fn from_json(value: &serde_json::Value) -> Result<Self> {
        #[derive(Deserialize)]
        struct GraphData {
            nodes: Vec<Node>,
            edges: Vec<Edge>,
        }

        let data: GraphData =
            serde_json::from_value(value.clone()).map_err(|e| RetrievalError::Configuration {
                message: format!("malformed graph JSON: {}", e),
            })?;

        let mut graph = Self::new();
        for node in data.nodes {
            graph.upsert_node(node);
        }
        for edge in data.edges {
            graph.add_edge(edge)?;
        }
        Ok(graph)
    }
}

// ============================================================================
// Tests
// ============================================================================
