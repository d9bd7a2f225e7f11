//! Node-control error types

use thiserror::Error;

/// Errors that can occur while supervising local services
#[derive(Error, Debug)]
pub enum NodeControlError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Unknown service: {0}")]
    UnknownService(String),

    #[error("Process error: {0}")]
    Process(String),

    #[error("Failed to execute `{command}`: {source}")]
    Exec {
        command: String,
        #[source]
        source: std::io::Error,
    },

    #[error("DBRM error: {0}")]
    Dbrm(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl NodeControlError {
    /// Get the error type as a string for metrics labeling
    pub fn error_type(&self) -> &'static str {
        match self {
            NodeControlError::Config(_) => "config",
            NodeControlError::UnknownService(_) => "unknown_service",
            NodeControlError::Process(_) => "process",
            NodeControlError::Exec { .. } => "exec",
            NodeControlError::Dbrm(_) => "dbrm",
            NodeControlError::Io(_) => "io",
        }
    }
}

pub type Result<T> = std::result::Result<T, NodeControlError>;
