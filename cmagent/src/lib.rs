//! cmagent - cluster management and failover control plane
//!
//! One agent runs per node of a distributed columnar analytics cluster.
//! Together the agents observe peer liveness, elect which surviving node
//! acts on behalf of the cohort, and reconfigure the cluster under a
//! two-phase commit that broadcasts configuration.
//!
//! # Architecture
//!
//! - **Heartbeat**: per-tick TCP probes of every declared peer, recorded
//!   in a bounded per-peer history window
//! - **Monitor**: the control loop that samples the history, classifies
//!   peers as dead or recovered over a sampling window, elects the cohort
//!   actor, and enforces the quorum safety rule
//! - **Communicator**: the event queue, deduper and worker that batches
//!   cluster actions and wraps reconfigurations in a transaction
//! - **Agent**: the cluster-side contract carrying out those actions
//!   through the node-manipulation and transaction RPCs, plus the local
//!   standby shutdown via `cmagent-node-control`
//! - **Context**: explicit construction-time wiring of every collaborator
//!
//! Data flow: heartbeater → history → monitor → communicator → agent →
//! cluster RPCs + local orchestrator.

pub mod agent;
pub mod cluster;
pub mod comm;
pub mod context;
pub mod error;
pub mod events;
pub mod heartbeat;
pub mod metrics;
pub mod monitor;
pub mod rpc;
pub mod settings;

pub use agent::{ClusterAgent, FailoverAgent};
pub use cluster::{ClusterConfigSource, ClusterView, StaticClusterSource, StaticClusterTopology};
pub use comm::AgentComm;
pub use context::CoreContext;
pub use error::AgentError;
pub use events::{Event, TransactionId};
pub use heartbeat::{
    HeartbeatHistory, HeartbeatResponder, HeartbeatTransport, Heartbeater, ProbeResult, TcpProbe,
    DEFAULT_AGENT_PORT,
};
pub use monitor::NodeMonitor;
pub use rpc::{NodeManipulation, TransactionRpc};
pub use settings::AgentSettings;
