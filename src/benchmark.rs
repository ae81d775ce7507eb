//! Benchmark runner: dataset in, markdown report out
//!
//! A dataset is a JSON file of retrieval tasks with ground-truth paths. Each
//! task runs through the full pipeline; per-task metrics and an aggregate
//! table land in a markdown report under `.benchmark-artifacts/`.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::info;

use crate::error::{Result, RetrievalError};
use crate::manager::GraphManager;
use crate::pipeline::{Pipeline, PipelineConfig, PipelineRequest};

/// Directory benchmark reports are written to
pub const ARTIFACT_DIR: &str = ".benchmark-artifacts";

/// One retrieval task
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BenchmarkTask {
    pub id: String,
    pub query: String,
    #[serde(rename = "groundTruth")]
    pub ground_truth: Vec<String>,
    #[serde(rename = "targetFilePath", default, skip_serializing_if = "Option::is_none")]
    pub target_file_path: Option<String>,
    #[serde(rename = "candidateFilePaths", default, skip_serializing_if = "Vec::is_empty")]
    pub candidate_file_paths: Vec<String>,
}

/// A named set of tasks
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BenchmarkDataset {
    pub name: String,
    pub family: String,
    pub variant: String,
    pub tasks: Vec<BenchmarkTask>,
}

impl BenchmarkDataset {
    /// Load and validate a dataset file
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let dataset: Self =
            serde_json::from_str(&content).map_err(|e| RetrievalError::Configuration {
                message: format!("malformed dataset {}: {}", path.display(), e),
            })?;
        dataset.validate()?;
        Ok(dataset)
    }

    fn validate(&self) -> Result<()> {
        if self.tasks.is_empty() {
            return Err(RetrievalError::config(format!(
                "dataset {} has no tasks",
                self.name
            )));
        }
        for task in &self.tasks {
            if task.ground_truth.is_empty() {
                return Err(RetrievalError::config(format!(
                    "task {} is missing ground truth",
                    task.id
                )));
            }
        }
        Ok(())
    }
}

/// Metrics for one completed task
#[derive(Debug, Clone, Serialize)]
pub struct TaskResult {
    pub task_id: String,
    pub query: String,
    pub passed: bool,
    pub precision: f64,
    pub recall: f64,
    pub f1: f64,
    pub iterations: usize,
    pub tokens_used: usize,
    pub tokens_saved: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Aggregated run of a whole dataset
#[derive(Debug, Clone, Serialize)]
pub struct BenchmarkReport {
    pub dataset: String,
    pub family: String,
    pub variant: String,
    pub results: Vec<TaskResult>,
    pub pass_rate: f64,
    pub mean_precision: f64,
    pub mean_recall: f64,
    pub mean_f1: f64,
    pub mean_iterations: f64,
}

/// Run every task of a dataset through the pipeline
pub fn run_benchmark(
    manager: &mut GraphManager,
    dataset: &BenchmarkDataset,
    config: &PipelineConfig,
) -> Result<BenchmarkReport> {
    let mut results = Vec::with_capacity(dataset.tasks.len());

    for task in &dataset.tasks {
        info!("benchmark task {}: {}", task.id, task.query);
        let mut pipeline = Pipeline::new(manager, config.clone());
        let outcome = pipeline.run(&PipelineRequest {
            query: task.query.clone(),
            target_file: task.target_file_path.clone(),
            candidate_paths: task.candidate_file_paths.clone(),
            ground_truth: task.ground_truth.clone(),
            token_budget: None,
        });

        let evaluation = outcome.evaluation.as_ref();
        results.push(TaskResult {
            task_id: task.id.clone(),
            query: task.query.clone(),
            passed: outcome.passed(),
            precision: evaluation.map(|e| e.precision).unwrap_or(0.0),
            recall: evaluation.map(|e| e.recall).unwrap_or(0.0),
            f1: evaluation.map(|e| e.f1).unwrap_or(0.0),
            iterations: outcome.iterations,
            tokens_used: outcome.context.as_ref().map(|c| c.tokens_used).unwrap_or(0),
            tokens_saved: outcome
                .context
                .as_ref()
                .map(|c| c.tokens_saved)
                .unwrap_or(0),
            error: outcome.error,
        });
    }

    let count = results.len() as f64;
    let mean = |f: fn(&TaskResult) -> f64| results.iter().map(f).sum::<f64>() / count;
    Ok(BenchmarkReport {
        dataset: dataset.name.clone(),
        family: dataset.family.clone(),
        variant: dataset.variant.clone(),
        pass_rate: results.iter().filter(|r| r.passed).count() as f64 / count,
        mean_precision: mean(|r| r.precision),
        mean_recall: mean(|r| r.recall),
        mean_f1: mean(|r| r.f1),
        mean_iterations: mean(|r| r.iterations as f64),
        results,
    })
}

/// Render the report as markdown
pub fn render_markdown(report: &BenchmarkReport) -> String {
    let mut out = String::with_capacity(2048);
    out.push_str(&format!(
        "# Benchmark: {} ({}/{})\n\n",
        report.dataset, report.family, report.variant
    ));

    out.push_str("| Metric | Value |\n|---|---|\n");
    out.push_str(&format!("| Tasks | {} |\n", report.results.len()));
    out.push_str(&format!("| Pass rate | {:.1}% |\n", report.pass_rate * 100.0));
    out.push_str(&format!("| Mean precision | {:.3} |\n", report.mean_precision));
    out.push_str(&format!("| Mean recall | {:.3} |\n", report.mean_recall));
    out.push_str(&format!("| Mean F1 | {:.3} |\n", report.mean_f1));
    out.push_str(&format!(
        "| Mean iterations | {:.2} |\n\n",
        report.mean_iterations
    ));

    for result in &report.results {
        out.push_str(&format!("## Task {}\n\n", result.task_id));
        out.push_str(&format!("Query: `{}`\n\n", result.query));
        out.push_str(&format!(
            "- passed: {}\n- precision: {:.3}\n- recall: {:.3}\n- f1: {:.3}\n- iterations: {}\n- tokens used: {}\n- tokens saved: {}\n",
            result.passed,
            result.precision,
            result.recall,
            result.f1,
            result.iterations,
            result.tokens_used,
            result.tokens_saved,
        ));
        if let Some(error) = &result.error {
            out.push_str(&format!("- error: {}\n", error));
        }
        out.push('\n');
    }
    out
}

/// Write the markdown report under the artifact directory
///
/// The file is named `<family>-<variant>-<ts>.md`.
pub fn write_report(report: &BenchmarkReport, base_dir: &Path) -> Result<PathBuf> {
    let dir = base_dir.join(ARTIFACT_DIR);
    std::fs::create_dir_all(&dir)?;
    let timestamp = chrono::Utc::now().format("%Y%m%d%H%M%S");
    let path = dir.join(format!(
        "{}-{}-{}.md",
        report.family, report.variant, timestamp
    ));
    std::fs::write(&path, render_markdown(report))?;
    Ok(path)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn dataset_json() -> serde_json::Value {
        serde_json::json!({
            "name": "auth-suite",
            "family": "refactor",
            "variant": "easy",
            "tasks": [{
                "id": "task-1",
                "query": "refactor authenticateUser",
                "groundTruth": ["src/auth.ts", "src/login.ts"],
                "targetFilePath": "src/auth.ts",
                "candidateFilePaths": ["src/auth.ts"]
            }]
        })
    }

    #[test]
    fn test_dataset_round_trip() {
        let dataset: BenchmarkDataset = serde_json::from_value(dataset_json()).unwrap();
        assert_eq!(dataset.name, "auth-suite");
        assert_eq!(dataset.tasks.len(), 1);
        let task = &dataset.tasks[0];
        assert_eq!(task.ground_truth.len(), 2);
        assert_eq!(task.target_file_path.as_deref(), Some("src/auth.ts"));
        assert_eq!(task.candidate_file_paths, vec!["src/auth.ts"]);
    }

    #[test]
    fn test_load_rejects_malformed_dataset() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bad.json");
        std::fs::write(&path, "{\"name\": 42}").unwrap();
        let err = BenchmarkDataset::load(&path).unwrap_err();
        assert!(matches!(err, RetrievalError::Configuration { .. }));
    }

    #[test]
    fn test_load_rejects_missing_ground_truth() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("empty-truth.json");
        let mut value = dataset_json();
        value["tasks"][0]["groundTruth"] = serde_json::json!([]);
        std::fs::write(&path, serde_json::to_string(&value).unwrap()).unwrap();
        let err = BenchmarkDataset::load(&path).unwrap_err();
        assert!(matches!(err, RetrievalError::Configuration { .. }));
    }

    #[test]
    fn test_markdown_contains_aggregate_and_task_sections() {
        let report = BenchmarkReport {
            dataset: "auth-suite".to_string(),
            family: "refactor".to_string(),
            variant: "easy".to_string(),
            results: vec![TaskResult {
                task_id: "task-1".to_string(),
                query: "refactor authenticateUser".to_string(),
                passed: true,
                precision: 1.0,
                recall: 1.0,
                f1: 1.0,
                iterations: 1,
                tokens_used: 1234,
                tokens_saved: 500,
                error: None,
            }],
            pass_rate: 1.0,
            mean_precision: 1.0,
            mean_recall: 1.0,
            mean_f1: 1.0,
            mean_iterations: 1.0,
        };
        let markdown = render_markdown(&report);
        assert!(markdown.contains("# Benchmark: auth-suite (refactor/easy)"));
        assert!(markdown.contains("| Pass rate | 100.0% |"));
        assert!(markdown.contains("## Task task-1"));
        assert!(markdown.contains("tokens used: 1234"));
    }

    #[test]
    fn test_write_report_names_file_by_family_and_variant() {
        let dir = tempfile::tempdir().unwrap();
        let report = BenchmarkReport {
            dataset: "auth-suite".to_string(),
            family: "refactor".to_string(),
            variant: "easy".to_string(),
            results: Vec::new(),
            pass_rate: 0.0,
            mean_precision: 0.0,
            mean_recall: 0.0,
            mean_f1: 0.0,
            mean_iterations: 0.0,
        };
        let path = write_report(&report, dir.path()).unwrap();
        assert!(path.exists());
        let name = path.file_name().unwrap().to_string_lossy().to_string();
        assert!(name.starts_with("refactor-easy-"));
        assert!(name.ends_with(".md"));
        assert!(path.parent().unwrap().ends_with(ARTIFACT_DIR));
    }
}
