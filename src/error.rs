//! Error types and exit codes for repocontext

use std::process::ExitCode;
use thiserror::Error;

/// Main error type for retrieval-engine operations
#[derive(Error, Debug)]
pub enum RetrievalError {
    #[error("Configuration error: {message}")]
    Configuration { message: String },

    #[error("Graph state error: {message}")]
    GraphState { message: String },

    #[error("Failed to parse file: {message}")]
    Parse { message: String },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl RetrievalError {
    /// Shorthand for a configuration error
    pub fn config(message: impl Into<String>) -> Self {
        Self::Configuration {
            message: message.into(),
        }
    }

    /// Shorthand for a graph-state error
    pub fn graph(message: impl Into<String>) -> Self {
        Self::GraphState {
            message: message.into(),
        }
    }

    /// Convert error to appropriate exit code:
    /// - 0: Success
    /// - 1: IO error
    /// - 2: Configuration error
    /// - 3: Parse failure
    /// - 4: Graph state error
    pub fn exit_code(&self) -> ExitCode {
        match self {
            Self::Io(_) => ExitCode::from(1),
            Self::Configuration { .. } => ExitCode::from(2),
            Self::Parse { .. } => ExitCode::from(3),
            Self::GraphState { .. } => ExitCode::from(4),
        }
    }
}

/// Result type alias for retrieval-engine operations
pub type Result<T> = std::result::Result<T, RetrievalError>;
