//! CLI argument definitions using clap

use clap::{Parser, ValueEnum};
use std::path::PathBuf;

use crate::error::{Result, RetrievalError};

/// Dependency-aware context retrieval engine
#[derive(Parser, Debug)]
#[command(name = "repocontext")]
#[command(about = "Selects the minimal code context an assistant needs for a change request")]
#[command(version)]
pub struct Cli {
    /// Root directory of the repository to analyze
    #[arg(short, long, default_value = ".")]
    pub dir: PathBuf,

    /// Build the code graph and persist it to the store
    #[arg(long)]
    pub index: bool,

    /// Resolve a query to ranked candidate files
    #[arg(long, value_name = "QUERY")]
    pub resolve: Option<String>,

    /// Build a dependency-aware context for a query
    #[arg(long, value_name = "QUERY")]
    pub retrieve: Option<String>,

    /// Run a benchmark dataset and write the markdown report
    #[arg(long, value_name = "DATASET")]
    pub bench: Option<PathBuf>,

    /// Target file for retrieval (overrides resolution)
    #[arg(long, value_name = "PATH")]
    pub target: Option<String>,

    /// Token budget for the packed context
    #[arg(long, value_name = "TOKENS")]
    pub budget: Option<usize>,

    /// Maximum number of candidates to return
    #[arg(long, default_value = "8")]
    pub limit: usize,

    /// Graph store kind: memory | json
    #[arg(long, default_value = "memory", env = "GRAPH_STORE")]
    pub store: String,

    /// Backing file for the json store
    #[arg(long, value_name = "PATH")]
    pub store_path: Option<PathBuf>,

    /// Rebuild the graph even when the store already has one
    #[arg(long)]
    pub force_rebuild: bool,

    /// Output format
    #[arg(short, long, default_value = "text", value_enum)]
    pub format: OutputFormat,

    /// Show verbose output
    #[arg(short, long)]
    pub verbose: bool,
}

/// Output format options
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, ValueEnum)]
pub enum OutputFormat {
    /// Human-readable text
    #[default]
    Text,
    /// Standard JSON output
    Json,
}

/// Operation mode determined from CLI arguments
#[derive(Debug, Clone)]
pub enum OperationMode {
    /// Build and persist the graph
    Index,
    /// Rank candidate files for a query
    Resolve { query: String },
    /// Build a packed context for a query
    Retrieve { query: String },
    /// Run a dataset and emit the report
    Bench { dataset: PathBuf },
}

impl Cli {
    /// Derive the single requested operation
    pub fn operation_mode(&self) -> Result<OperationMode> {
        let mut modes: Vec<OperationMode> = Vec::new();
        if self.index {
            modes.push(OperationMode::Index);
        }
        if let Some(query) = &self.resolve {
            modes.push(OperationMode::Resolve {
                query: query.clone(),
            });
        }
        if let Some(query) = &self.retrieve {
            modes.push(OperationMode::Retrieve {
                query: query.clone(),
            });
        }
        if let Some(dataset) = &self.bench {
            modes.push(OperationMode::Bench {
                dataset: dataset.clone(),
            });
        }

        match modes.len() {
            0 => Err(RetrievalError::config(
                "no operation requested: pass --index, --resolve, --retrieve or --bench",
            )),
            1 => Ok(modes.remove(0)),
            _ => Err(RetrievalError::config(
                "conflicting operations: pass exactly one of --index, --resolve, --retrieve, --bench",
            )),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_single_mode_parses() {
        let cli = Cli::parse_from(["repocontext", "--resolve", "fix login"]);
        assert!(matches!(
            cli.operation_mode().unwrap(),
            OperationMode::Resolve { .. }
        ));
    }

    #[test]
    fn test_no_mode_is_configuration_error() {
        let cli = Cli::parse_from(["repocontext"]);
        assert!(cli.operation_mode().is_err());
    }

    #[test]
    fn test_conflicting_modes_rejected() {
        let cli = Cli::parse_from(["repocontext", "--index", "--resolve", "x"]);
        assert!(cli.operation_mode().is_err());
    }

    #[test]
    fn test_retrieve_options() {
        let cli = Cli::parse_from([
            "repocontext",
            "--retrieve",
            "refactor authenticateUser",
            "--target",
            "src/auth.ts",
            "--budget",
            "10000",
        ]);
        assert_eq!(cli.target.as_deref(), Some("src/auth.ts"));
        assert_eq!(cli.budget, Some(10_000));
    }
}
