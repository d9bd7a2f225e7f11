//! Explicit wiring of the control plane
//!
//! All collaborators are constructed once at startup and threaded through
//! here; nothing in the crate reads ambient process-wide state. The
//! context owns the trait objects for the external RPCs and builds the
//! monitor stack on top of them.

use crate::agent::ClusterAgent;
use crate::cluster::ClusterConfigSource;
use crate::comm::AgentComm;
use crate::error::Result;
use crate::heartbeat::{HeartbeatHistory, Heartbeater, TcpProbe, DEFAULT_AGENT_PORT};
use crate::monitor::NodeMonitor;
use crate::rpc::{NodeManipulation, TransactionRpc};
use crate::settings::AgentSettings;
use cmagent_node_control::{
    build_dispatcher, ClusterEndpoints, DbrmControl, OsOperations, ProcessDispatcher,
};
use std::sync::Arc;

pub struct CoreContext {
    pub settings: AgentSettings,
    cluster: Arc<dyn ClusterConfigSource>,
    endpoints: Arc<dyn ClusterEndpoints>,
    transactions: Arc<dyn TransactionRpc>,
    node_rpc: Arc<dyn NodeManipulation>,
    dbrm: Arc<dyn DbrmControl>,
    dispatcher: Arc<dyn ProcessDispatcher>,
}

impl std::fmt::Debug for CoreContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CoreContext")
            .field("settings", &self.settings)
            .finish_non_exhaustive()
    }
}

impl CoreContext {
    /// Build the context; fails fast on a bad dispatcher selection
    pub fn new<C>(
        settings: AgentSettings,
        cluster: Arc<C>,
        transactions: Arc<dyn TransactionRpc>,
        node_rpc: Arc<dyn NodeManipulation>,
        dbrm: Arc<dyn DbrmControl>,
    ) -> Result<Self>
    where
        C: ClusterConfigSource + 'static,
    {
        let dispatcher = build_dispatcher(&settings.dispatcher)?;
        Ok(Self {
            settings,
            endpoints: Arc::clone(&cluster) as Arc<dyn ClusterEndpoints>,
            cluster,
            transactions,
            node_rpc,
            dbrm,
            dispatcher,
        })
    }

    pub fn cluster(&self) -> Arc<dyn ClusterConfigSource> {
        Arc::clone(&self.cluster)
    }

    pub fn dispatcher(&self) -> Arc<dyn ProcessDispatcher> {
        Arc::clone(&self.dispatcher)
    }

    /// The local supervision orchestrator
    pub fn os_operations(&self) -> Arc<OsOperations> {
        Arc::new(OsOperations::new(
            Arc::clone(&self.dispatcher),
            Arc::clone(&self.endpoints),
            Arc::clone(&self.dbrm),
        ))
    }

    /// The concrete failover agent over the injected RPCs
    pub fn build_agent(&self) -> Arc<ClusterAgent> {
        Arc::new(ClusterAgent::new(
            Arc::clone(&self.transactions),
            Arc::clone(&self.node_rpc),
            Arc::clone(&self.cluster),
            self.os_operations(),
        ))
    }

    /// The full monitor stack: history, heartbeater, communicator, monitor
    pub fn build_monitor(&self) -> Arc<NodeMonitor> {
        let history = Arc::new(HeartbeatHistory::new(self.settings.sampling_interval));
        let transport = Arc::new(TcpProbe::new(DEFAULT_AGENT_PORT));
        let heartbeater = Heartbeater::new(
            Arc::clone(&self.cluster),
            Arc::clone(&history),
            transport,
        );
        let comm = Arc::new(AgentComm::new(self.build_agent()));
        Arc::new(NodeMonitor::new(
            Arc::clone(&self.cluster),
            history,
            heartbeater,
            comm,
            &self.settings,
        ))
    }
}
