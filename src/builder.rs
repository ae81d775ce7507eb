//! Graph builder: directory walk -> file snapshots -> assembled code graph
//!
//! Each supported file becomes a snapshot (file node, symbol nodes, pending
//! edges, content digest). Snapshots are produced in parallel, then
//! integrated sequentially: prior nodes for each path are removed, new nodes
//! upserted, and pending edges resolved against the export index. Cross-file
//! references that cannot be resolved are dropped rather than left dangling.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use rayon::prelude::*;
use tracing::{debug, warn};

use crate::embedding::cache::EmbeddingCache;
use crate::embedding::{load_embedder, Embedder};
use crate::error::Result;
use crate::extract::{parse_and_extract, FileExtraction, ReferenceKind};
use crate::graph::{fnv1a_hash, CodeGraph, Edge, EdgeType, Node, NodeAttributes, NodeType};
use crate::lang::Lang;

/// Directories skipped during the walk, beyond dot-prefixed entries
const IGNORED_DIRS: &[&str] = &[
    "node_modules",
    "vendor",
    "dist",
    "build",
    "out",
    "target",
    "coverage",
    "__pycache__",
    "docs",
];

/// Where a pending edge points before resolution
#[derive(Debug, Clone, PartialEq)]
pub enum EdgeTarget {
    /// Already-known node id (local symbol or file node)
    Node(String),
    /// Exported symbol of a resolved import target file
    Export { file: String, name: String },
    /// Bare name; resolved against any export, or dropped
    Name(String),
}

/// An edge awaiting target resolution
#[derive(Debug, Clone)]
pub struct PendingEdge {
    pub from: String,
    pub to: EdgeTarget,
    pub edge_type: EdgeType,
    pub line: Option<usize>,
}

/// Parsed form of one file, ready for graph integration
#[derive(Debug, Clone)]
pub struct FileSnapshot {
    /// Normalised repo-relative path
    pub path: String,
    pub file_node: Node,
    pub symbol_nodes: Vec<Node>,
    pub edges: Vec<PendingEdge>,
    /// FNV-1a digest of the file content
    pub digest: String,
}

impl FileSnapshot {
    /// All nodes of the snapshot, file node first
    pub fn all_nodes(&self) -> impl Iterator<Item = &Node> {
        std::iter::once(&self.file_node).chain(self.symbol_nodes.iter())
    }
}

/// Builds a code graph from a source tree
pub struct GraphBuilder {
    root: PathBuf,
    embedder: Arc<dyn Embedder>,
    cache: Arc<EmbeddingCache>,
}

impl GraphBuilder {
    /// Create a builder for `root`, loading the configured embedder
    ///
    /// When embeddings are disabled the cache is cleared: stale vectors must
    /// not resurface once embeddings are re-enabled with a different model.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        let embedder = load_embedder();
        let cache = Arc::new(EmbeddingCache::open_default());
        if !embedder.is_enabled() {
            if let Err(e) = cache.clear() {
                warn!("failed to clear embedding cache: {}", e);
            }
        }
        Self {
            root: root.into(),
            embedder,
            cache,
        }
    }

    /// Create a builder with an explicit embedder and cache (tests, callers
    /// managing their own model lifecycle)
    pub fn with_embedder(
        root: impl Into<PathBuf>,
        embedder: Arc<dyn Embedder>,
        cache: Arc<EmbeddingCache>,
    ) -> Self {
        Self {
            root: root.into(),
            embedder,
            cache,
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Build a fresh graph from the source tree
    pub fn build(&self) -> Result<CodeGraph> {
        if let Err(e) = self.embedder.initialize() {
            warn!("embedder initialisation failed, continuing without vectors: {}", e);
        }

        let files = self.collect_source_files();
        debug!("building graph from {} source files", files.len());

        let snapshots: Vec<FileSnapshot> = files
            .par_iter()
            .filter_map(|rel_path| match self.snapshot_file(rel_path) {
                Ok(snapshot) => Some(snapshot),
                Err(e) => {
                    // A file that fails to parse is skipped, never fatal
                    warn!("skipping {}: {}", rel_path, e);
                    None
                }
            })
            .collect();

        let mut graph = CodeGraph::new();
        integrate_snapshots(&mut graph, snapshots);

        if let Err(e) = self.cache.flush() {
            warn!("failed to flush embedding cache: {}", e);
        }
        Ok(graph)
    }

    /// Walk the tree and collect supported source files as normalised
    /// relative paths
    fn collect_source_files(&self) -> Vec<String> {
        let mut files = Vec::new();
        let walker = ignore::WalkBuilder::new(&self.root)
            .hidden(true)
            .filter_entry(|entry| {
                if entry.file_type().map(|t| t.is_dir()).unwrap_or(false) {
                    let name = entry.file_name().to_string_lossy();
                    return !IGNORED_DIRS.contains(&name.as_ref());
                }
                true
            })
            .build();

        for entry in walker.flatten() {
            if !entry.file_type().map(|t| t.is_file()).unwrap_or(false) {
                continue;
            }
            if Lang::from_path(entry.path()).is_none() {
                continue;
            }
            if let Ok(rel) = entry.path().strip_prefix(&self.root) {
                files.push(normalize_path(rel));
            }
        }
        files.sort();
        files
    }

    /// Snapshot a single file by its repo-relative path
    ///
    /// The walk only hands in supported files; an explicitly requested path
    /// with an unrecognized extension is a caller error.
    pub fn snapshot_file(&self, rel_path: &str) -> Result<FileSnapshot> {
        let abs = self.root.join(rel_path);
        let source = std::fs::read_to_string(&abs)?;
        let lang = Lang::from_path(&abs).ok_or_else(|| {
            crate::error::RetrievalError::config(format!(
                "unsupported source file: {}",
                rel_path
            ))
        })?;
        let extraction = parse_and_extract(&abs, &source, lang)?;
        Ok(self.snapshot_from_extraction(rel_path, &source, &extraction))
    }

    /// Turn an extraction into graph nodes and pending edges
    pub fn snapshot_from_extraction(
        &self,
        rel_path: &str,
        source: &str,
        extraction: &FileExtraction,
    ) -> FileSnapshot {
        let path = rel_path.to_string();
        let digest = format!("{:016x}", fnv1a_hash(source));
        let line_count = source.lines().count().max(1);

        let file_node = Node {
            id: Node::file_id(&path),
            node_type: NodeType::File,
            name: file_name_of(&path),
            path: path.clone(),
            content: source.to_string(),
            start_line: 1,
            end_line: line_count,
            embedding: None,
            attrs: NodeAttributes {
                digest: Some(digest.clone()),
                ..NodeAttributes::default()
            },
        };

        // Symbol nodes, indexed in step with extraction.symbols
        let mut symbol_nodes: Vec<Node> = Vec::with_capacity(extraction.symbols.len());
        for symbol in &extraction.symbols {
            let id = Node::symbol_id(
                &path,
                symbol.node_type,
                &symbol.name,
                symbol.start_line,
                symbol.end_line,
                &symbol.kind,
            );
            let embedding_text = embedding_text_of(symbol);
            let embedding = self.embed_cached(&embedding_text);
            symbol_nodes.push(Node {
                id,
                node_type: symbol.node_type,
                name: symbol.name.clone(),
                path: path.clone(),
                content: symbol.content.clone(),
                start_line: symbol.start_line,
                end_line: symbol.end_line,
                embedding,
                attrs: NodeAttributes {
                    exported: symbol.exported,
                    kind: Some(symbol.kind.clone()),
                    ast_type: Some(symbol.ast_type.clone()),
                    parent_name: symbol.parent_name.clone(),
                    parent_type: symbol.parent_type.clone(),
                    signature: symbol.signature.clone(),
                    parameters: symbol.parameters.clone(),
                    return_type: symbol.return_type.clone(),
                    documentation: symbol.documentation.clone(),
                    embedding_text: Some(embedding_text),
                    digest: Some(digest.clone()),
                },
            });
        }

        let edges = self.pending_edges(&path, extraction, &file_node, &symbol_nodes);

        FileSnapshot {
            path,
            file_node,
            symbol_nodes,
            edges,
            digest,
        }
    }

    fn pending_edges(
        &self,
        path: &str,
        extraction: &FileExtraction,
        file_node: &Node,
        symbol_nodes: &[Node],
    ) -> Vec<PendingEdge> {
        let mut edges = Vec::new();

        // File contains every symbol
        for node in symbol_nodes {
            edges.push(PendingEdge {
                from: file_node.id.clone(),
                to: EdgeTarget::Node(node.id.clone()),
                edge_type: EdgeType::Contains,
                line: Some(node.start_line),
            });
        }

        // Parent contains nested symbol (class -> method)
        for node in symbol_nodes {
            if let Some(parent_name) = &node.attrs.parent_name {
                if let Some(parent) = symbol_nodes
                    .iter()
                    .find(|n| &n.name == parent_name && n.id != node.id)
                {
                    edges.push(PendingEdge {
                        from: parent.id.clone(),
                        to: EdgeTarget::Node(node.id.clone()),
                        edge_type: EdgeType::Contains,
                        line: Some(node.start_line),
                    });
                }
            }
        }

        // Import edges: file (and the import node) -> resolved target file
        for import in &extraction.imports {
            let Some(target_path) = self.resolve_import(path, &import.source) else {
                continue;
            };
            let target_id = Node::file_id(&target_path);
            edges.push(PendingEdge {
                from: file_node.id.clone(),
                to: EdgeTarget::Node(target_id.clone()),
                edge_type: EdgeType::Imports,
                line: Some(import.line),
            });
            if let Some(import_node) = symbol_nodes
                .iter()
                .find(|n| n.node_type == NodeType::Import && n.start_line == import.line)
            {
                edges.push(PendingEdge {
                    from: import_node.id.clone(),
                    to: EdgeTarget::Node(target_id),
                    edge_type: EdgeType::Imports,
                    line: Some(import.line),
                });
            }
        }

        // References: calls / extends / implements
        for reference in &extraction.references {
            let from_id = match reference.from_symbol {
                Some(index) => symbol_nodes
                    .get(index)
                    .map(|n| n.id.clone())
                    .unwrap_or_else(|| file_node.id.clone()),
                None => file_node.id.clone(),
            };

            // (a) local symbol with the same name and a different id
            let local = symbol_nodes
                .iter()
                .find(|n| n.name == reference.target && n.id != from_id);
            let to = if let Some(local) = local {
                EdgeTarget::Node(local.id.clone())
            } else if let Some(import) = extraction
                .imports
                .iter()
                .find(|i| i.names.iter().any(|n| n == &reference.target))
            {
                // (b) imported: placeholder against the resolved target file
                match self.resolve_import(path, &import.source) {
                    Some(target_file) => EdgeTarget::Export {
                        file: target_file,
                        name: reference.target.clone(),
                    },
                    None => EdgeTarget::Name(reference.target.clone()),
                }
            } else {
                // (c) raw placeholder
                EdgeTarget::Name(reference.target.clone())
            };

            let edge_type = match reference.kind {
                ReferenceKind::Calls => EdgeType::Calls,
                ReferenceKind::Extends => EdgeType::Extends,
                ReferenceKind::Implements => EdgeType::Implements,
            };
            edges.push(PendingEdge {
                from: from_id,
                to,
                edge_type,
                line: Some(reference.line),
            });
        }

        edges
    }

    /// Resolve a relative import specifier to a repo-relative file path
    ///
    /// `./` and `../` (and Python's leading-dot) specifiers are joined
    /// relative to the importing file and probed with extension candidates
    /// and `index.<ext>`. Non-relative imports are dropped: there is no
    /// package graph.
    pub fn resolve_import(&self, from_path: &str, specifier: &str) -> Option<String> {
        let spec = if specifier.starts_with('.') && !specifier.starts_with("./") && !specifier.starts_with("..") {
            // Python relative module: ".session" -> "./session"
            format!("./{}", specifier.trim_start_matches('.').replace('.', "/"))
        } else {
            specifier.to_string()
        };
        if !spec.starts_with("./") && !spec.starts_with("../") {
            return None;
        }

        let base = Path::new(from_path).parent().unwrap_or(Path::new(""));
        let joined = normalize_join(base, &spec);

        // Exact path (specifier already carries an extension)
        if self.root.join(&joined).is_file() {
            return Some(joined);
        }
        for ext in Lang::import_extension_candidates() {
            let candidate = format!("{}.{}", joined, ext);
            if self.root.join(&candidate).is_file() {
                return Some(candidate);
            }
        }
        for ext in Lang::import_extension_candidates() {
            let candidate = format!("{}/index.{}", joined, ext);
            if self.root.join(&candidate).is_file() {
                return Some(candidate);
            }
        }
        None
    }

    /// Cached embedding lookup; `None` when embeddings are disabled
    fn embed_cached(&self, text: &str) -> Option<Vec<f32>> {
        if !self.embedder.is_enabled() {
            return None;
        }
        if let Some(cached) = self.cache.get(text) {
            return Some(cached);
        }
        let vector = self.embedder.embed(text);
        if vector.is_empty() {
            return None;
        }
        self.cache.put(text, vector.clone());
        Some(vector)
    }
}

/// Integrate snapshots into a graph: remove prior nodes for affected files,
/// upsert the new nodes, then resolve and add the surviving edges
pub fn integrate_snapshots(graph: &mut CodeGraph, snapshots: Vec<FileSnapshot>) {
    for snapshot in &snapshots {
        graph.remove_nodes_by_path(&snapshot.path);
    }
    for snapshot in &snapshots {
        graph.upsert_node(snapshot.file_node.clone());
        for node in &snapshot.symbol_nodes {
            graph.upsert_node(node.clone());
        }
    }

    let export_index = graph.export_index();
    for snapshot in &snapshots {
        for pending in &snapshot.edges {
            if let Some(edge) = resolve_pending_edge(graph, &export_index, pending) {
                if let Err(e) = graph.add_edge(edge) {
                    debug!("dropping unresolvable edge: {}", e);
                }
            }
        }
    }
}

/// Resolve one pending edge against a graph and its export index
///
/// Returns `None` when the target cannot be resolved; such edges are dropped.
pub fn resolve_pending_edge(
    graph: &CodeGraph,
    export_index: &std::collections::HashMap<String, String>,
    pending: &PendingEdge,
) -> Option<Edge> {
    let to_id = match &pending.to {
        EdgeTarget::Node(id) => {
            if graph.contains_node(id) {
                id.clone()
            } else {
                return None;
            }
        }
        EdgeTarget::Export { file, name } => export_index.get(&format!("{}#{}", file, name))?.clone(),
        EdgeTarget::Name(name) => {
            // Any export with a matching name; deterministic choice by key order
            let suffix = format!("#{}", name);
            let mut matches: Vec<&String> = export_index
                .iter()
                .filter(|(key, _)| key.ends_with(&suffix))
                .map(|(_, id)| id)
                .collect();
            matches.sort();
            matches.first()?.to_string()
        }
    };
    if !graph.contains_node(&pending.from) || !graph.contains_node(&to_id) {
        return None;
    }
    let mut edge = Edge::new(pending.from.clone(), to_id, pending.edge_type);
    if let Some(line) = pending.line {
        edge = edge.with_attr("line", line.to_string());
    }
    Some(edge)
}

fn normalize_path(path: &Path) -> String {
    path.to_string_lossy().replace('\\', "/")
}

/// Join a relative specifier onto a base directory, collapsing `.` and `..`
fn normalize_join(base: &Path, spec: &str) -> String {
    let base = base.to_string_lossy().replace('\\', "/");
    let mut parts: Vec<String> = base
        .split('/')
        .filter(|p| !p.is_empty() && *p != ".")
        .map(str::to_string)
        .collect();
    for segment in spec.split('/') {
        match segment {
            "" | "." => {}
            ".." => {
                parts.pop();
            }
            other => parts.push(other.to_string()),
        }
    }
    parts.join("/")
}

fn file_name_of(path: &str) -> String {
    Path::new(path)
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_else(|| path.to_string())
}

/// Compose the text a symbol is embedded under
fn embedding_text_of(symbol: &crate::extract::ExtractedSymbol) -> String {
    let mut parts: Vec<String> = vec![symbol.name.clone(), symbol.kind.clone()];
    if let Some(signature) = &symbol.signature {
        parts.push(signature.clone());
    }
    if let Some(documentation) = &symbol.documentation {
        parts.push(documentation.clone());
    }
    // Body text bounded so giant files do not dominate the cache
    let body: String = symbol.content.chars().take(2_000).collect();
    parts.push(body);
    parts.join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::embedding::HashingEmbedder;
    use std::fs;

    fn fixture_builder(dir: &Path) -> GraphBuilder {
        let cache = Arc::new(EmbeddingCache::open(dir.join(".cache-embeddings.json")));
        GraphBuilder::with_embedder(dir, Arc::new(HashingEmbedder::default()), cache)
    }

    fn write_auth_fixture(root: &Path) {
        fs::create_dir_all(root.join("src")).unwrap();
        fs::write(
            root.join("src/auth.ts"),
            r#"// Core credential check.
export function authenticateUser(name: string, secret: string): boolean {
    return secret.length > 0;
}
"#,
        )
        .unwrap();
        fs::write(
            root.join("src/login.ts"),
            r#"import { authenticateUser } from './auth';

export function handleLogin(name: string, secret: string) {
    return authenticateUser(name, secret);
}
"#,
        )
        .unwrap();
        fs::write(
            root.join("src/ui.ts"),
            r#"import { handleLogin } from './login';

export function renderLogin() {
    return handleLogin('guest', 'secret');
}
"#,
        )
        .unwrap();
    }

    #[test]
    fn test_build_auth_fixture() {
        let dir = tempfile::tempdir().unwrap();
        write_auth_fixture(dir.path());
        let graph = fixture_builder(dir.path()).build().unwrap();

        // 3 file nodes + 3 functions + 2 imports
        assert_eq!(
            graph
                .get_all_nodes()
                .filter(|n| n.node_type == NodeType::File)
                .count(),
            3
        );
        let auth = graph
            .get_all_nodes()
            .find(|n| n.name == "authenticateUser")
            .expect("authenticateUser node");
        assert!(auth.attrs.exported);
        assert!(auth.embedding.is_some());

        // handleLogin -> authenticateUser call edge resolved across files
        let handle = graph
            .get_all_nodes()
            .find(|n| n.name == "handleLogin")
            .unwrap();
        let callees: Vec<&str> = graph
            .get_neighbors(&handle.id, Some(EdgeType::Calls))
            .iter()
            .map(|n| n.name.as_str())
            .collect();
        assert!(callees.contains(&"authenticateUser"));

        // login.ts imports auth.ts at the file level
        let login_file = graph.get_node(&Node::file_id("src/login.ts")).unwrap();
        let imported: Vec<&str> = graph
            .get_neighbors(&login_file.id, Some(EdgeType::Imports))
            .iter()
            .map(|n| n.path.as_str())
            .collect();
        assert!(imported.contains(&"src/auth.ts"));
    }

    #[test]
    fn test_build_is_deterministic() {
        let dir = tempfile::tempdir().unwrap();
        write_auth_fixture(dir.path());
        let builder = fixture_builder(dir.path());
        let first = builder.build().unwrap().to_json();
        let second = builder.build().unwrap().to_json();
        assert_eq!(
            serde_json::to_string(&first).unwrap(),
            serde_json::to_string(&second).unwrap()
        );
    }

    #[test]
    fn test_ignored_directories_are_skipped() {
        let dir = tempfile::tempdir().unwrap();
        write_auth_fixture(dir.path());
        fs::create_dir_all(dir.path().join("node_modules/lib")).unwrap();
        fs::write(
            dir.path().join("node_modules/lib/index.ts"),
            "export function vendored() {}",
        )
        .unwrap();
        fs::create_dir_all(dir.path().join(".hidden")).unwrap();
        fs::write(dir.path().join(".hidden/x.ts"), "export function hid() {}").unwrap();

        let graph = fixture_builder(dir.path()).build().unwrap();
        assert!(graph.get_all_nodes().all(|n| n.name != "vendored"));
        assert!(graph.get_all_nodes().all(|n| n.name != "hid"));
    }

    #[test]
    fn test_unsupported_files_excluded() {
        let dir = tempfile::tempdir().unwrap();
        write_auth_fixture(dir.path());
        fs::write(dir.path().join("data.json"), "{\"a\": 1}").unwrap();
        fs::write(dir.path().join("README.md"), "# readme").unwrap();

        let graph = fixture_builder(dir.path()).build().unwrap();
        assert!(graph.get_nodes_by_path("data.json").is_empty());
        assert!(graph.get_nodes_by_path("README.md").is_empty());
    }

    #[test]
    fn test_snapshot_of_unsupported_file_is_configuration_error() {
        let dir = tempfile::tempdir().unwrap();
        write_auth_fixture(dir.path());
        fs::write(dir.path().join("data.json"), "{\"a\": 1}").unwrap();

        let err = fixture_builder(dir.path())
            .snapshot_file("data.json")
            .unwrap_err();
        assert!(matches!(
            err,
            crate::error::RetrievalError::Configuration { .. }
        ));
    }

    #[test]
    fn test_resolve_import_probing() {
        let dir = tempfile::tempdir().unwrap();
        write_auth_fixture(dir.path());
        fs::create_dir_all(dir.path().join("src/util")).unwrap();
        fs::write(dir.path().join("src/util/index.ts"), "export function u() {}").unwrap();
        let builder = fixture_builder(dir.path());

        assert_eq!(
            builder.resolve_import("src/login.ts", "./auth"),
            Some("src/auth.ts".to_string())
        );
        assert_eq!(
            builder.resolve_import("src/login.ts", "./util"),
            Some("src/util/index.ts".to_string())
        );
        // Non-relative imports have no package graph
        assert_eq!(builder.resolve_import("src/login.ts", "react"), None);
        assert_eq!(builder.resolve_import("src/login.ts", "./missing"), None);
    }

    #[test]
    fn test_noop_embedder_leaves_vectors_empty() {
        let dir = tempfile::tempdir().unwrap();
        write_auth_fixture(dir.path());
        let cache = Arc::new(EmbeddingCache::open(dir.path().join(".cache.json")));
        let builder = GraphBuilder::with_embedder(
            dir.path(),
            Arc::new(crate::embedding::NoopEmbedder),
            cache,
        );
        let graph = builder.build().unwrap();
        assert!(graph.get_all_nodes().all(|n| n.embedding.is_none()));
    }

    #[test]
    fn test_embedding_cache_reused_across_builds() {
        let dir = tempfile::tempdir().unwrap();
        write_auth_fixture(dir.path());
        let cache = Arc::new(EmbeddingCache::open(dir.path().join(".cache.json")));
        let builder = GraphBuilder::with_embedder(
            dir.path(),
            Arc::new(HashingEmbedder::default()),
            Arc::clone(&cache),
        );
        builder.build().unwrap();
        let populated = cache.len();
        assert!(populated > 0);

        builder.build().unwrap();
        assert_eq!(cache.len(), populated);
    }
}
