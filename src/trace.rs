//! Structured execution trace for pipeline runs
//!
//! Observability here is data, not I/O: the pipeline returns an ordered list
//! of trace entries and callers decide how to render them. Entries appear in
//! strict dispatch order within a run.

use serde::Serialize;

/// Outcome of one traced stage
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum TraceStatus {
    Ok,
    Error,
}

/// One pipeline stage record
#[derive(Debug, Clone, Serialize)]
pub struct TraceEntry {
    /// Stage name, e.g. `graph.load` or `target.resolve`
    pub node: String,
    /// Unix millis at dispatch
    pub started_at: i64,
    pub duration_ms: u64,
    pub status: TraceStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub metadata: Option<serde_json::Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Collects trace entries in dispatch order
#[derive(Debug, Default)]
pub struct TraceRecorder {
    entries: Vec<TraceEntry>,
}

impl TraceRecorder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Run `f` as the traced stage `node`
    ///
    /// On success the closure's metadata is attached; on error the entry is
    /// marked failed with the error message and the error is re-raised.
    pub fn stage<T, E: std::fmt::Display>(
        &mut self,
        node: &str,
        f: impl FnOnce() -> Result<(T, Option<serde_json::Value>), E>,
    ) -> Result<T, E> {
        let started_at = chrono::Utc::now().timestamp_millis();
        let clock = std::time::Instant::now();
        match f() {
            Ok((value, metadata)) => {
                self.entries.push(TraceEntry {
                    node: node.to_string(),
                    started_at,
                    duration_ms: clock.elapsed().as_millis() as u64,
                    status: TraceStatus::Ok,
                    metadata,
                    error: None,
                });
                Ok(value)
            }
            Err(error) => {
                self.entries.push(TraceEntry {
                    node: node.to_string(),
                    started_at,
                    duration_ms: clock.elapsed().as_millis() as u64,
                    status: TraceStatus::Error,
                    metadata: None,
                    error: Some(error.to_string()),
                });
                Err(error)
            }
        }
    }

    pub fn entries(&self) -> &[TraceEntry] {
        &self.entries
    }

    pub fn into_entries(self) -> Vec<TraceEntry> {
        self.entries
    }

    /// Stage names in dispatch order
    pub fn node_names(&self) -> Vec<&str> {
        self.entries.iter().map(|e| e.node.as_str()).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stage_records_success_with_metadata() {
        let mut recorder = TraceRecorder::new();
        let value: Result<u32, String> = recorder.stage("graph.load", || {
            Ok((42u32, Some(serde_json::json!({ "nodes": 10 }))))
        });
        assert_eq!(value.unwrap(), 42);

        let entry = &recorder.entries()[0];
        assert_eq!(entry.node, "graph.load");
        assert_eq!(entry.status, TraceStatus::Ok);
        assert_eq!(entry.metadata.as_ref().unwrap()["nodes"], 10);
        assert!(entry.error.is_none());
    }

    #[test]
    fn test_stage_records_error_and_reraises() {
        let mut recorder = TraceRecorder::new();
        let result: Result<(), String> =
            recorder.stage("context.build", || Err("no target file".to_string()));
        assert!(result.is_err());

        let entry = &recorder.entries()[0];
        assert_eq!(entry.status, TraceStatus::Error);
        assert_eq!(entry.error.as_deref(), Some("no target file"));
    }

    #[test]
    fn test_entries_keep_dispatch_order() {
        let mut recorder = TraceRecorder::new();
        for node in ["graph.load", "components.build", "target.resolve"] {
            let _: Result<(), String> = recorder.stage(node, || Ok(((), None)));
        }
        assert_eq!(
            recorder.node_names(),
            vec!["graph.load", "components.build", "target.resolve"]
        );
    }
}
