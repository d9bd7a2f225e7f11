//! Failover agent
//!
//! The cluster-side contract invoked by the communicator. The concrete
//! [`ClusterAgent`] forwards membership changes to the node-manipulation
//! RPCs, wraps them in the cluster transaction envelope, and carries out
//! the local standby shutdown through the orchestrator.

use crate::cluster::ClusterConfigSource;
use crate::error::Result;
use crate::events::TransactionId;
use crate::metrics;
use crate::rpc::{NodeManipulation, TransactionRpc};
use async_trait::async_trait;
use cmagent_node_control::OsOperations;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info};

/// How long the local DMLProc may take to drain when entering standby
const STANDBY_SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(10);

/// Retry attempts logged at info before escalating to error
const TXN_RETRY_LOG_THRESHOLD: u32 = 5;

/// Cluster actions issued by the communicator.
///
/// `commit_transaction` and `rollback_transaction` terminate an envelope
/// and must not fail; they log and return. Everything else may fail, and
/// the communicator routes failures to rollback-and-requeue.
#[async_trait]
pub trait FailoverAgent: Send + Sync {
    /// Re-add nodes to the active membership; returns the count added
    async fn activate_nodes(&self, nodes: &[String]) -> Result<usize>;

    /// Remove nodes from the active membership; returns the count removed
    async fn deactivate_nodes(&self, nodes: &[String]) -> Result<usize>;

    /// Move the primary role to a surviving node
    async fn move_primary_node(&self) -> Result<()>;

    /// Stop this node's local services to protect the cluster
    async fn enter_standby_mode(&self) -> Result<()>;

    /// Emit an operator-visible alarm
    fn raise_alarm(&self, msg: &str);

    /// Open a transaction, retrying until one is granted
    async fn start_transaction(
        &self,
        extra_nodes: &[String],
        remove_nodes: &[String],
    ) -> (TransactionId, Vec<String>);

    /// Finish a transaction: revision bump, config broadcast, commit
    async fn commit_transaction(&self, txn_id: TransactionId, nodes: &[String]);

    /// Abandon a transaction, best effort
    async fn rollback_transaction(&self, txn_id: TransactionId, nodes: &[String]);
}

pub struct ClusterAgent {
    transactions: Arc<dyn TransactionRpc>,
    nodes: Arc<dyn NodeManipulation>,
    cluster: Arc<dyn ClusterConfigSource>,
    os: Arc<OsOperations>,
    retry_delay: Duration,
}

impl ClusterAgent {
    pub fn new(
        transactions: Arc<dyn TransactionRpc>,
        nodes: Arc<dyn NodeManipulation>,
        cluster: Arc<dyn ClusterConfigSource>,
        os: Arc<OsOperations>,
    ) -> Self {
        Self {
            transactions,
            nodes,
            cluster,
            os,
            retry_delay: Duration::from_secs(1),
        }
    }

    /// Compressed retry pacing for tests
    pub fn with_retry_delay(mut self, retry_delay: Duration) -> Self {
        self.retry_delay = retry_delay;
        self
    }
}

#[async_trait]
impl FailoverAgent for ClusterAgent {
    async fn activate_nodes(&self, nodes: &[String]) -> Result<usize> {
        info!("activating nodes: {:?}", nodes);
        let mut added = 0;
        for node in nodes {
            info!("adding node {}", node);
            if let Err(e) = self.nodes.add_node(node).await {
                error!("failed to add node {}: {}", node, e);
                return Err(e);
            }
            added += 1;
        }
        Ok(added)
    }

    async fn deactivate_nodes(&self, nodes: &[String]) -> Result<usize> {
        info!("deactivating nodes: {:?}", nodes);
        let mut removed = 0;
        for node in nodes {
            info!("deactivating node {}", node);
            if let Err(e) = self.nodes.remove_node(node, true).await {
                error!("failed to deactivate node {}: {}", node, e);
                return Err(e);
            }
            removed += 1;
        }
        Ok(removed)
    }

    async fn move_primary_node(&self) -> Result<()> {
        info!("moving the primary role");
        if let Err(e) = self.nodes.move_primary_node().await {
            error!("failed to move the primary role: {}", e);
            return Err(e);
        }
        Ok(())
    }

    async fn enter_standby_mode(&self) -> Result<()> {
        let me = self.cluster.who_am_i()?;
        let is_primary = self.cluster.get_primary_node()? == me;
        info!("shutting down this node ({})", me);

        let errors = self
            .os
            .shutdown_node(is_primary, STANDBY_SHUTDOWN_TIMEOUT, false)
            .await;
        if errors.is_empty() {
            info!("standby shutdown finished");
        } else {
            // the monitor keeps observing; a failed stop is not fatal here
            error!("standby shutdown reported errors: {:?}", errors);
        }
        metrics::update_standby(true);
        Ok(())
    }

    fn raise_alarm(&self, msg: &str) {
        metrics::record_alarm();
        error!(alarm = true, "{}", msg);
    }

    async fn start_transaction(
        &self,
        extra_nodes: &[String],
        remove_nodes: &[String],
    ) -> (TransactionId, Vec<String>) {
        let mut attempt: u32 = 0;
        loop {
            attempt += 1;
            metrics::record_transaction_attempt();
            let failure = match self
                .transactions
                .start_transaction(extra_nodes, remove_nodes)
                .await
            {
                Ok((true, txn_id, nodes)) => {
                    info!("started transaction {}", txn_id);
                    metrics::record_transaction("started");
                    return (txn_id, nodes);
                }
                Ok((false, _, _)) => {
                    format!("attempt #{attempt}, failed to get a transaction")
                }
                Err(e) => {
                    format!("attempt #{attempt}, failed to get a transaction, got {e}")
                }
            };
            if attempt <= TXN_RETRY_LOG_THRESHOLD {
                info!("{}", failure);
            } else {
                error!("{}", failure);
            }
            tokio::time::sleep(self.retry_delay).await;
        }
    }

    async fn commit_transaction(&self, txn_id: TransactionId, nodes: &[String]) {
        let result = async {
            self.transactions.update_revision_and_manager().await?;
            self.transactions.broadcast_new_config(nodes).await?;
            self.transactions.commit_transaction(txn_id, nodes).await
        }
        .await;

        match result {
            Ok(()) => {
                info!("committed transaction {}", txn_id);
                metrics::record_transaction("committed");
            }
            Err(e) => error!("failed to commit transaction {}: {}", txn_id, e),
        }
    }

    async fn rollback_transaction(&self, txn_id: TransactionId, nodes: &[String]) {
        match self.transactions.rollback_transaction(txn_id, nodes).await {
            Ok(()) => {
                info!("rolled back transaction {}", txn_id);
                metrics::record_transaction("rolled_back");
            }
            Err(e) => error!("failed to roll back transaction {}: {}", txn_id, e),
        }
    }
}
