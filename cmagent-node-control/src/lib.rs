//! cmagent node control - per-node process supervision
//!
//! This crate manages the engine services running on a single node of the
//! cluster. It knows nothing about membership or failover; it receives
//! ordered plans and carries them out:
//!
//! - **Dispatchers**: interchangeable back-ends that start and stop
//!   services, either through the host service manager or by spawning the
//!   engine binaries directly inside a container
//! - **Orchestrator**: applies ordered start/stop plans with readiness
//!   gates (TCP probes of peer services) and graceful-then-forceful
//!   shutdown semantics
//! - **DBRM**: the control-connection interface used to flag system state
//!   ahead of a graceful primary shutdown
//! - **Services**: the static descriptor table for every supervised binary
//! - **Node**: module-identity file helpers

pub mod constants;
pub mod dbrm;
pub mod dispatcher;
pub mod error;
pub mod node;
pub mod os_operations;
pub mod services;

pub use dbrm::{DbrmControl, SystemState};
pub use dispatcher::{
    build_dispatcher, ContainerDispatcher, DispatcherConfig, DispatcherKind, ProcessDispatcher,
    SystemdDispatcher,
};
pub use error::NodeControlError;
pub use os_operations::{
    shutdown_plan, start_plan, ClusterEndpoints, Endpoint, OpError, OpKind, Operation,
    OsOperations,
};
pub use services::{descriptor, ServiceDescriptor};
