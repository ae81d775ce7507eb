//! Graph manager: base graph + overlay lifecycle
//!
//! The manager owns the base graph (immutable between rebuilds), at most one
//! live overlay, and the hooks observing the overlay lifecycle. Callers are
//! the single writer; the manager takes no locks of its own. Readers that
//! obtained a graph from `graph()` treat it as read-only.
//!
//! Commit is deliberately "rebuild everything and swap": a full rebuild from
//! source is the simplest convergence guarantee after an arbitrary batch of
//! file edits.

use std::collections::HashSet;

use tracing::{debug, info};

use crate::builder::{integrate_snapshots, resolve_pending_edge, GraphBuilder};
use crate::error::{Result, RetrievalError};
use crate::graph::{fnv1a_hash, CodeGraph};
use crate::overlay::{GraphOverlay, OverlayOp};
use crate::store::GraphStore;

/// Observer of overlay lifecycle events
pub trait OverlayHooks: Send + Sync {
    fn created(&self, _overlay_id: &str) {}
    fn updated(&self, _overlay_id: &str, _path: &str) {}
    fn committed(&self, _overlay_json: &serde_json::Value) {}
    fn discarded(&self, _overlay_id: &str) {}
}

/// Default hook: logs lifecycle transitions
#[derive(Debug, Default)]
pub struct LoggingHooks;

impl OverlayHooks for LoggingHooks {
    fn created(&self, overlay_id: &str) {
        debug!("overlay {} created", overlay_id);
    }

    fn updated(&self, overlay_id: &str, path: &str) {
        debug!("overlay {} updated for {}", overlay_id, path);
    }

    fn committed(&self, overlay_json: &serde_json::Value) {
        let ops = overlay_json
            .get("operations")
            .and_then(|o| o.as_array())
            .map(|a| a.len())
            .unwrap_or(0);
        info!("overlay committed ({} operations)", ops);
    }

    fn discarded(&self, overlay_id: &str) {
        debug!("overlay {} discarded", overlay_id);
    }
}

/// Base graph + overlay lifecycle + hooks
pub struct GraphManager {
    builder: GraphBuilder,
    store: Box<dyn GraphStore>,
    hooks: Vec<Box<dyn OverlayHooks>>,
    base: Option<CodeGraph>,
    base_snapshot: String,
    overlay: Option<GraphOverlay>,
    /// Memoised `overlay.apply(base)`, recomputed only on overlay mutation
    applied: Option<CodeGraph>,
    modified_paths: HashSet<String>,
}

impl GraphManager {
    pub fn new(builder: GraphBuilder, store: Box<dyn GraphStore>) -> Self {
        Self {
            builder,
            store,
            hooks: vec![Box::new(LoggingHooks)],
            base: None,
            base_snapshot: String::new(),
            overlay: None,
            applied: None,
            modified_paths: HashSet::new(),
        }
    }

    /// Register an additional lifecycle hook
    pub fn add_hooks(&mut self, hooks: Box<dyn OverlayHooks>) {
        self.hooks.push(hooks);
    }

    /// Load the base graph: store first unless forcing, else a fresh build
    /// that is saved back. Overlay state is reset either way.
    pub fn initialize(&mut self, force_rebuild: bool) -> Result<()> {
        let graph = if force_rebuild {
            None
        } else {
            self.store.load()?
        };
        let graph = match graph {
            Some(graph) => {
                debug!("loaded graph from store ({} nodes)", graph.node_count());
                graph
            }
            None => {
                let built = self.builder.build()?;
                self.store.save(&built)?;
                built
            }
        };
        self.base_snapshot = snapshot_id(&graph);
        self.base = Some(graph);
        self.reset_overlay_state();
        Ok(())
    }

    pub fn is_initialized(&self) -> bool {
        self.base.is_some()
    }

    /// The effective graph: the base when no overlay is live, otherwise the
    /// memoised overlay application
    pub fn graph(&mut self) -> Result<&CodeGraph> {
        if self.base.is_none() {
            return Err(uninitialized());
        }
        let overlay_live = self.overlay.as_ref().map(|o| !o.is_empty()).unwrap_or(false);
        if !overlay_live {
            return self.base.as_ref().ok_or_else(uninitialized);
        }
        if self.applied.is_none() {
            let base = self.base.as_ref().ok_or_else(uninitialized)?;
            let overlay = self.overlay.as_ref().ok_or_else(uninitialized)?;
            self.applied = Some(overlay.apply(base));
        }
        self.applied.as_ref().ok_or_else(uninitialized)
    }

    /// Whether an overlay with pending operations is live
    pub fn has_pending_overlay(&self) -> bool {
        self.overlay.as_ref().map(|o| !o.is_empty()).unwrap_or(false)
    }

    pub fn modified_paths(&self) -> &HashSet<String> {
        &self.modified_paths
    }

    /// Record that `path` changed on disk
    ///
    /// Opens an overlay if none exists, drops prior operations for the path,
    /// then appends: removals for every base-graph node on the path, adds for
    /// the fresh snapshot, and adds for the subset of snapshot edges that
    /// resolve against the base graph plus the snapshot. The operation batch
    /// is appended atomically; a failure before that point leaves the overlay
    /// exactly as it was.
    pub fn record_file_modification(&mut self, path: &str) -> Result<()> {
        let base = self.base.as_ref().ok_or_else(uninitialized)?;
        let snapshot = self.builder.snapshot_file(path)?;

        let mut created = false;
        if self.overlay.is_none() {
            self.overlay = Some(GraphOverlay::new(self.base_snapshot.clone()));
            created = true;
        }

        // Stage the batch before touching the overlay
        let mut ops: Vec<OverlayOp> = Vec::new();
        for node in base.get_nodes_by_path(path) {
            ops.push(OverlayOp::remove_node(node.id.clone(), path));
        }
        for node in snapshot.all_nodes() {
            ops.push(OverlayOp::add_node(node.clone()));
        }

        // Working copy: base with the path swapped for the snapshot, used to
        // resolve cross-file references from the edited file
        let mut working = base.clone();
        integrate_snapshots(&mut working, vec![snapshot.clone()]);
        let export_index = working.export_index();
        for pending in &snapshot.edges {
            if let Some(edge) = resolve_pending_edge(&working, &export_index, pending) {
                ops.push(OverlayOp::add_edge(edge, path));
            }
        }

        let overlay = self.overlay.as_mut().ok_or_else(uninitialized)?;
        overlay.clear_path(path);
        for op in ops {
            overlay.push(op);
        }
        let overlay_id = overlay.id.clone();

        self.applied = None;
        self.modified_paths.insert(path.to_string());

        if created {
            for hooks in &self.hooks {
                hooks.created(&overlay_id);
            }
        }
        for hooks in &self.hooks {
            hooks.updated(&overlay_id, path);
        }
        Ok(())
    }

    /// Commit the overlay: rebuild the whole graph from source, save it, and
    /// swap it in as the new base
    pub fn merge_overlay(&mut self) -> Result<()> {
        if self.base.is_none() {
            return Err(uninitialized());
        }
        let Some(overlay) = self.overlay.take() else {
            return Ok(());
        };
        let overlay_json = overlay.to_json();

        let rebuilt = self.builder.build()?;
        self.store.save(&rebuilt)?;
        self.base_snapshot = snapshot_id(&rebuilt);
        self.base = Some(rebuilt);
        self.reset_overlay_state();

        for hooks in &self.hooks {
            hooks.committed(&overlay_json);
        }
        Ok(())
    }

    /// Drop the overlay without committing
    pub fn discard_overlay(&mut self) {
        if let Some(overlay) = self.overlay.take() {
            for hooks in &self.hooks {
                hooks.discarded(&overlay.id);
            }
        }
        self.reset_overlay_state();
    }

    /// Clear the store and all in-memory state
    pub fn clear_store(&mut self) -> Result<()> {
        self.store.clear()?;
        self.base = None;
        self.base_snapshot.clear();
        self.reset_overlay_state();
        Ok(())
    }

    fn reset_overlay_state(&mut self) {
        self.overlay = None;
        self.applied = None;
        self.modified_paths.clear();
    }
}

fn uninitialized() -> RetrievalError {
    RetrievalError::graph("graph manager is not initialized")
}

/// Identity of a base graph, derived from its canonical JSON
fn snapshot_id(graph: &CodeGraph) -> String {
    let json = serde_json::to_string(&graph.to_json()).unwrap_or_default();
    format!("{:016x}", fnv1a_hash(&json))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::embedding::cache::EmbeddingCache;
    use crate::embedding::HashingEmbedder;
    use crate::store::InMemoryGraphStore;
    use parking_lot::Mutex;
    use std::fs;
    use std::path::Path;
    use std::sync::Arc;

    #[derive(Default)]
    struct RecordingHooks {
        events: Arc<Mutex<Vec<String>>>,
    }

    impl OverlayHooks for RecordingHooks {
        fn created(&self, _overlay_id: &str) {
            self.events.lock().push("created".to_string());
        }
        fn updated(&self, _overlay_id: &str, path: &str) {
            self.events.lock().push(format!("updated:{}", path));
        }
        fn committed(&self, _overlay_json: &serde_json::Value) {
            self.events.lock().push("committed".to_string());
        }
        fn discarded(&self, _overlay_id: &str) {
            self.events.lock().push("discarded".to_string());
        }
    }

    fn write_first_file(root: &Path) {
        fs::write(
            root.join("first.ts"),
            "export function first() { return 1; }\n",
        )
        .unwrap();
    }

    fn manager_for(root: &Path) -> (GraphManager, Arc<Mutex<Vec<String>>>) {
        let cache = Arc::new(EmbeddingCache::open(root.join(".cache.json")));
        let builder =
            GraphBuilder::with_embedder(root, Arc::new(HashingEmbedder::default()), cache);
        let mut manager = GraphManager::new(builder, Box::new(InMemoryGraphStore::new()));
        let events = Arc::new(Mutex::new(Vec::new()));
        manager.add_hooks(Box::new(RecordingHooks {
            events: Arc::clone(&events),
        }));
        (manager, events)
    }

    #[test]
    fn test_uninitialized_manager_raises() {
        let dir = tempfile::tempdir().unwrap();
        let (mut manager, _) = manager_for(dir.path());
        assert!(manager.graph().is_err());
        assert!(manager.record_file_modification("first.ts").is_err());
        assert!(manager.merge_overlay().is_err());
    }

    #[test]
    fn test_overlay_lifecycle_hooks_in_order() {
        let dir = tempfile::tempdir().unwrap();
        write_first_file(dir.path());
        let (mut manager, events) = manager_for(dir.path());
        manager.initialize(false).unwrap();
        assert!(!manager.has_pending_overlay());

        // Modify the file on disk, then record it
        fs::write(
            dir.path().join("first.ts"),
            "export function first() { return 2; }\nexport function second() { return 3; }\n",
        )
        .unwrap();
        manager.record_file_modification("first.ts").unwrap();
        assert!(manager.has_pending_overlay());

        // The applied graph sees the new symbol
        let graph = manager.graph().unwrap();
        assert!(graph.get_all_nodes().any(|n| n.name == "second"));

        manager.merge_overlay().unwrap();
        assert!(!manager.has_pending_overlay());
        // After merge, the rebuilt base graph contains the new symbol
        let graph = manager.graph().unwrap();
        assert!(graph.get_all_nodes().any(|n| n.name == "second"));

        assert_eq!(
            events.lock().as_slice(),
            &[
                "created".to_string(),
                "updated:first.ts".to_string(),
                "committed".to_string()
            ]
        );
    }

    #[test]
    fn test_discard_restores_base_view() {
        let dir = tempfile::tempdir().unwrap();
        write_first_file(dir.path());
        let (mut manager, events) = manager_for(dir.path());
        manager.initialize(false).unwrap();

        fs::write(
            dir.path().join("first.ts"),
            "export function renamed() { return 1; }\n",
        )
        .unwrap();
        manager.record_file_modification("first.ts").unwrap();
        assert!(manager.graph().unwrap().get_all_nodes().any(|n| n.name == "renamed"));

        manager.discard_overlay();
        assert!(!manager.has_pending_overlay());
        let graph = manager.graph().unwrap();
        assert!(graph.get_all_nodes().any(|n| n.name == "first"));
        assert!(graph.get_all_nodes().all(|n| n.name != "renamed"));
        assert!(events.lock().contains(&"discarded".to_string()));
    }

    #[test]
    fn test_re_recording_a_path_replaces_older_deltas() {
        let dir = tempfile::tempdir().unwrap();
        write_first_file(dir.path());
        let (mut manager, _) = manager_for(dir.path());
        manager.initialize(false).unwrap();

        fs::write(dir.path().join("first.ts"), "export function v1() {}\n").unwrap();
        manager.record_file_modification("first.ts").unwrap();
        fs::write(dir.path().join("first.ts"), "export function v2() {}\n").unwrap();
        manager.record_file_modification("first.ts").unwrap();

        let graph = manager.graph().unwrap();
        assert!(graph.get_all_nodes().any(|n| n.name == "v2"));
        assert!(graph.get_all_nodes().all(|n| n.name != "v1"));
    }

    #[test]
    fn test_initialize_prefers_store() {
        let dir = tempfile::tempdir().unwrap();
        write_first_file(dir.path());
        let (mut manager, _) = manager_for(dir.path());
        manager.initialize(false).unwrap();
        let before = manager.graph().unwrap().node_count();

        // Change the tree; a non-forced initialize still uses the stored graph
        fs::write(dir.path().join("extra.ts"), "export function extra() {}\n").unwrap();
        manager.initialize(false).unwrap();
        assert_eq!(manager.graph().unwrap().node_count(), before);

        // Forcing rebuilds from source
        manager.initialize(true).unwrap();
        assert!(manager.graph().unwrap().node_count() > before);
    }

    #[test]
    fn test_clear_store_resets_everything() {
        let dir = tempfile::tempdir().unwrap();
        write_first_file(dir.path());
        let (mut manager, _) = manager_for(dir.path());
        manager.initialize(false).unwrap();
        manager.clear_store().unwrap();
        assert!(!manager.is_initialized());
        assert!(manager.graph().is_err());
    }

    #[test]
    fn test_record_modification_resolves_cross_file_edges() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(
            dir.path().join("auth.ts"),
            "export function authenticate() { return true; }\n",
        )
        .unwrap();
        fs::write(
            dir.path().join("login.ts"),
            "import { authenticate } from './auth';\nexport function login() { return authenticate(); }\n",
        )
        .unwrap();
        let (mut manager, _) = manager_for(dir.path());
        manager.initialize(false).unwrap();

        // Edit login.ts; the overlay should carry a resolved call edge
        fs::write(
            dir.path().join("login.ts"),
            "import { authenticate } from './auth';\nexport function login(user) { return authenticate(user); }\n",
        )
        .unwrap();
        manager.record_file_modification("login.ts").unwrap();

        let graph = manager.graph().unwrap();
        let login = graph.get_all_nodes().find(|n| n.name == "login").unwrap();
        let callees: Vec<&str> = graph
            .get_neighbors(&login.id, Some(crate::graph::EdgeType::Calls))
            .iter()
            .map(|n| n.name.as_str())
            .collect();
        assert!(callees.contains(&"authenticate"));
    }
}
