//! External cluster RPC interfaces
//!
//! The transaction endpoints and the node-manipulation helpers live
//! outside this crate; their transports are opaque here. Implementations
//! are injected at construction, which also keeps every piece of the
//! failover path mockable.

use crate::error::Result;
use crate::events::TransactionId;
use async_trait::async_trait;

/// Cluster-wide two-phase-commit envelope for configuration changes.
///
/// `start_transaction` decides the participant set from the active list;
/// `extra_nodes` covers nodes being added that are not active yet, and
/// `remove_nodes` excludes nodes being removed that are presumably
/// unreachable.
#[async_trait]
pub trait TransactionRpc: Send + Sync {
    /// Open a transaction; `(ok, txn_id, participating_nodes)`
    async fn start_transaction(
        &self,
        extra_nodes: &[String],
        remove_nodes: &[String],
    ) -> Result<(bool, TransactionId, Vec<String>)>;

    /// Bump the configuration revision and reassign the config manager
    async fn update_revision_and_manager(&self) -> Result<()>;

    /// Push the new configuration to every participant
    async fn broadcast_new_config(&self, nodes: &[String]) -> Result<()>;

    /// Commit an open transaction on every participant
    async fn commit_transaction(&self, txn_id: TransactionId, nodes: &[String]) -> Result<()>;

    /// Roll back an open transaction on every participant
    async fn rollback_transaction(&self, txn_id: TransactionId, nodes: &[String]) -> Result<()>;
}

/// Cluster membership manipulation helpers
#[async_trait]
pub trait NodeManipulation: Send + Sync {
    /// Add (or re-add) a node to the active membership
    async fn add_node(&self, node: &str) -> Result<()>;

    /// Remove a node; `deactivate_only` keeps it in the desired set
    async fn remove_node(&self, node: &str, deactivate_only: bool) -> Result<()>;

    /// Move the primary role to a surviving node
    async fn move_primary_node(&self) -> Result<()>;
}
