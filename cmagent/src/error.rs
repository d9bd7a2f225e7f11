//! Failover-layer error types

use cmagent_node_control::NodeControlError;
use thiserror::Error;

/// Errors that can occur in the failover control plane
#[derive(Error, Debug)]
pub enum AgentError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Cluster view error: {0}")]
    Cluster(String),

    #[error("Transaction error: {0}")]
    Transaction(String),

    #[error("RPC error: {0}")]
    Rpc(String),

    #[error("Node manipulation error: {0}")]
    NodeManipulation(String),

    #[error("Heartbeat error: {0}")]
    Heartbeat(String),

    #[error("Node control error: {0}")]
    NodeControl(#[from] NodeControlError),

    #[error("Settings parse error: {0}")]
    Settings(#[from] toml::de::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl AgentError {
    /// Get the error type as a string for metrics labeling
    pub fn error_type(&self) -> &'static str {
        match self {
            AgentError::Config(_) => "config",
            AgentError::Cluster(_) => "cluster",
            AgentError::Transaction(_) => "transaction",
            AgentError::Rpc(_) => "rpc",
            AgentError::NodeManipulation(_) => "node_manipulation",
            AgentError::Heartbeat(_) => "heartbeat",
            AgentError::NodeControl(_) => "node_control",
            AgentError::Settings(_) => "settings",
            AgentError::Io(_) => "io",
        }
    }
}

pub type Result<T> = std::result::Result<T, AgentError>;
