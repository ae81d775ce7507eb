//! Shared fixtures for integration tests

use std::fs;
use std::path::Path;
use std::sync::Arc;

use repocontext::builder::GraphBuilder;
use repocontext::embedding::cache::EmbeddingCache;
use repocontext::embedding::HashingEmbedder;
use repocontext::manager::GraphManager;
use repocontext::store::InMemoryGraphStore;

/// The auth call chain used across scenarios:
/// ui.renderLogin -> login.handleLogin -> auth.authenticateUser,
/// plus a telemetry distractor that only audit-flavoured queries match.
pub fn write_auth_fixture(root: &Path) {
    fs::create_dir_all(root.join("src")).unwrap();
    fs::write(
        root.join("src/auth.ts"),
        r#"// Core credential check used by every login path.
export function authenticateUser(name: string, secret: string): boolean {
    return name.length > 0 && secret.length > 0;
}
"#,
    )
    .unwrap();
    fs::write(
        root.join("src/login.ts"),
        r#"import { authenticateUser } from './auth';

export function handleLogin(name: string, secret: string) {
    if (!authenticateUser(name, secret)) {
        throw new Error('bad credentials');
    }
    return { name };
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
    fs::write(
        root.join("src/telemetry.ts"),
        r#"// Audit pipeline for telemetry events.
export function auditPipeline(events: string[]) {
    return events.length;
}
"#,
    )
    .unwrap();
}

/// A manager over the fixture with a deterministic embedder and an isolated
/// embedding cache
pub fn manager_for(root: &Path) -> GraphManager {
    let cache = Arc::new(EmbeddingCache::open(root.join(".embedding-cache.json")));
    let builder = GraphBuilder::with_embedder(root, Arc::new(HashingEmbedder::default()), cache);
    GraphManager::new(builder, Box::new(InMemoryGraphStore::new()))
}
