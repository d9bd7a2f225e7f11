//! Cluster membership view
//!
//! The monitor never parses the engine configuration itself; it reads a
//! consistent snapshot through [`ClusterConfigSource`] on every tick. The
//! production reader sits outside this crate; [`StaticClusterSource`] is
//! the TOML-backed implementation used for tests and fixed deployments.

use crate::error::{AgentError, Result};
use cmagent_node_control::{ClusterEndpoints, Endpoint};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::path::Path;

/// One consistent snapshot of the declared membership
#[derive(Debug, Clone)]
pub struct ClusterView {
    /// Membership declared by configuration, in configuration order
    pub desired: Vec<String>,
    /// Currently active members
    pub active: Vec<String>,
    /// Declared members that are not active
    pub inactive: Vec<String>,
    /// The node carrying the primary role
    pub primary: String,
    /// This node's own name
    pub me: String,
}

impl ClusterView {
    /// Check the partition invariant: active and inactive are disjoint and
    /// together cover the desired set
    pub fn is_consistent(&self) -> bool {
        let disjoint = !self.active.iter().any(|n| self.inactive.contains(n));
        let covered = self
            .desired
            .iter()
            .all(|n| self.active.contains(n) || self.inactive.contains(n));
        let bounded = self.active.len() + self.inactive.len() == self.desired.len();
        disjoint && covered && bounded
    }
}

/// Pure reads of the current configuration snapshot
pub trait ClusterConfigSource: ClusterEndpoints {
    /// `(desired, active, inactive)` node lists, consistent per call
    fn get_all_nodes(&self) -> Result<(Vec<String>, Vec<String>, Vec<String>)>;

    /// This node's own name
    fn who_am_i(&self) -> Result<String>;

    /// The node currently carrying the primary role
    fn get_primary_node(&self) -> Result<String>;

    /// Assemble a full view in one call
    fn view(&self) -> Result<ClusterView> {
        let (desired, active, inactive) = self.get_all_nodes()?;
        Ok(ClusterView {
            desired,
            active,
            inactive,
            primary: self.get_primary_node()?,
            me: self.who_am_i()?,
        })
    }
}

/// Serializable cluster topology for the static source
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct StaticClusterTopology {
    #[serde(default)]
    pub desired: Vec<String>,

    #[serde(default)]
    pub active: Vec<String>,

    #[serde(default)]
    pub primary: String,

    /// This node's own name
    #[serde(default, rename = "self")]
    pub me: String,

    /// DBRM workernode addresses, for the orchestrator's readiness gates
    #[serde(default)]
    pub workernodes: Vec<Endpoint>,

    /// DBRM controller address
    #[serde(default)]
    pub controller: Option<Endpoint>,
}

/// Fixed cluster membership held in memory.
///
/// Interior-mutable so membership changes can be injected while the
/// monitor is running, the way a re-read configuration file would change
/// between ticks.
pub struct StaticClusterSource {
    inner: RwLock<StaticClusterTopology>,
}

impl StaticClusterSource {
    pub fn new(topology: StaticClusterTopology) -> Self {
        Self {
            inner: RwLock::new(topology),
        }
    }

    /// Load a topology from a TOML file
    pub fn load(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)?;
        let topology: StaticClusterTopology = toml::from_str(&text)?;
        Ok(Self::new(topology))
    }

    /// Replace the active list
    pub fn set_active(&self, active: Vec<String>) {
        self.inner.write().active = active;
    }

    /// Replace the primary node
    pub fn set_primary(&self, primary: impl Into<String>) {
        self.inner.write().primary = primary.into();
    }

    /// Replace the desired list
    pub fn set_desired(&self, desired: Vec<String>) {
        self.inner.write().desired = desired;
    }
}

impl ClusterEndpoints for StaticClusterSource {
    fn workernode_endpoints(&self) -> Vec<Endpoint> {
        self.inner.read().workernodes.clone()
    }

    fn controller_endpoint(&self) -> Option<Endpoint> {
        self.inner.read().controller.clone()
    }
}

impl ClusterConfigSource for StaticClusterSource {
    fn get_all_nodes(&self) -> Result<(Vec<String>, Vec<String>, Vec<String>)> {
        let topology = self.inner.read();
        let desired = topology.desired.clone();
        let active: Vec<String> = topology
            .active
            .iter()
            .filter(|n| desired.contains(n))
            .cloned()
            .collect();
        let inactive: Vec<String> = desired
            .iter()
            .filter(|n| !active.contains(n))
            .cloned()
            .collect();
        Ok((desired, active, inactive))
    }

    fn who_am_i(&self) -> Result<String> {
        let me = self.inner.read().me.clone();
        if me.is_empty() {
            return Err(AgentError::Config(
                "cluster topology does not name this node".to_string(),
            ));
        }
        Ok(me)
    }

    fn get_primary_node(&self) -> Result<String> {
        let primary = self.inner.read().primary.clone();
        if primary.is_empty() {
            return Err(AgentError::Config(
                "cluster topology does not name a primary node".to_string(),
            ));
        }
        Ok(primary)
    }
}
