//! Node monitor control loop
//!
//! Works like the main loop of a game: snapshot the current membership,
//! identify the differences reality shows (peers that stopped or resumed
//! answering heartbeats), and queue the cluster actions that close the
//! gap. Only one node per cohort acts on a given tick: the first node of
//! the effective active set under the canonical ordering.

use crate::cluster::ClusterConfigSource;
use crate::comm::AgentComm;
use crate::error::Result;
use crate::heartbeat::{HeartbeatHistory, Heartbeater, ProbeResult};
use crate::metrics;
use crate::settings::AgentSettings;
use parking_lot::RwLock;
use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info};

const TICK_INTERVAL: Duration = Duration::from_secs(1);

/// Pause before re-entering the loop after a failed tick
const ERROR_BACKOFF: Duration = Duration::from_secs(1);

pub struct NodeMonitor {
    cluster: Arc<dyn ClusterConfigSource>,
    history: Arc<HeartbeatHistory>,
    heartbeater: Heartbeater,
    comm: Arc<AgentComm>,
    sampling_interval: usize,
    tick_interval: Duration,
    error_backoff: Duration,
    running: Arc<RwLock<bool>>,
    in_standby: RwLock<bool>,
}

/// Loop state carried between ticks; rebuilt when the loop restarts
pub(crate) struct TickState {
    /// Active list observed on the previous tick
    active: Vec<String>,
    is_actor: bool,
    logged_idle: bool,
    logged_active: bool,
    in_standby_mode: bool,
}

impl NodeMonitor {
    pub fn new(
        cluster: Arc<dyn ClusterConfigSource>,
        history: Arc<HeartbeatHistory>,
        heartbeater: Heartbeater,
        comm: Arc<AgentComm>,
        settings: &AgentSettings,
    ) -> Self {
        Self {
            cluster,
            history,
            heartbeater,
            comm,
            sampling_interval: settings.sampling_interval,
            tick_interval: TICK_INTERVAL,
            error_backoff: ERROR_BACKOFF,
            running: Arc::new(RwLock::new(false)),
            in_standby: RwLock::new(false),
        }
    }

    /// Compressed pacing for tests
    pub fn with_timing(mut self, tick_interval: Duration, error_backoff: Duration) -> Self {
        self.tick_interval = tick_interval;
        self.error_backoff = error_backoff;
        self
    }

    /// Whether this node is currently outside the active membership
    pub fn in_standby(&self) -> bool {
        *self.in_standby.read()
    }

    /// Start the monitor background task, and the communicator worker
    /// if it is not running yet
    pub fn start(self: &Arc<Self>) -> tokio::task::JoinHandle<()> {
        *self.running.write() = true;
        if !self.comm.is_running() {
            let _ = self.comm.start();
        }
        let monitor = Arc::clone(self);
        tokio::spawn(async move {
            monitor.run().await;
        })
    }

    /// Stop the monitor and its communicator
    pub fn stop(&self) {
        *self.running.write() = false;
        self.comm.stop();
    }

    pub fn is_running(&self) -> bool {
        *self.running.read()
    }

    async fn run(&self) {
        while *self.running.read() {
            info!("starting the monitor logic");
            if let Err(e) = self.monitor_session().await {
                error!("monitor loop caught an error: {}", e);
            }
            if *self.running.read() {
                tokio::time::sleep(self.error_backoff).await;
            }
        }
        info!("node monitor exiting normally");
    }

    /// One full pass of the loop; returns on stop or on the first error
    async fn monitor_session(&self) -> Result<()> {
        let mut state = self.initial_state()?;
        while *self.running.read() {
            tokio::time::sleep(self.tick_interval).await;
            if !*self.running.read() {
                break;
            }
            self.tick(&mut state).await?;
        }
        Ok(())
    }

    fn initial_state(&self) -> Result<TickState> {
        let (_, active, _) = self.cluster.get_all_nodes()?;
        let me = self.cluster.who_am_i()?;
        let is_actor = Self::elect(&active, &me).unwrap_or(false);
        Ok(TickState {
            active,
            is_actor,
            logged_idle: false,
            logged_active: false,
            in_standby_mode: false,
        })
    }

    /// The actor is the first node of the list under canonical ordering;
    /// an empty list leaves the previous election standing
    fn elect(nodes: &[String], me: &str) -> Option<bool> {
        nodes.first().map(|first| first == me)
    }

    /// One monitor tick
    pub(crate) async fn tick(&self, state: &mut TickState) -> Result<()> {
        let old_active = std::mem::take(&mut state.active);
        let was_actor = state.is_actor;

        let (desired, active, inactive) = self.cluster.get_all_nodes()?;
        let me = self.cluster.who_am_i()?;
        let primary = self.cluster.get_primary_node()?;
        state.active = active.clone();

        // forget peers that have been removed from the cluster
        self.history.keep_only(&desired);

        if desired.len() < 3 {
            if !state.logged_idle {
                info!(
                    "failover support is inactive; \
                     requires at least 3 nodes and a shared storage system"
                );
                state.logged_idle = true;
                state.logged_active = false;
            }
        } else if !state.logged_active {
            info!("failover support is active, monitoring nodes {:?}", desired);
            state.logged_active = true;
            state.logged_idle = false;
        }

        // nothing to do in this case
        if desired.len() == 1 {
            return Ok(());
        }

        // has this node been reactivated, or deactivated?
        if active.contains(&me) {
            *self.in_standby.write() = false;
        } else {
            *self.in_standby.write() = true;
            metrics::update_standby(true);
            return Ok(()); // wait to be activated
        }
        metrics::update_standby(false);

        self.heartbeater.send_heartbeats().await?;

        // peers that answered nothing for the whole sampling window
        let mut deactivate_set: BTreeSet<String> = BTreeSet::new();
        for node in &active {
            if node == &me {
                continue;
            }
            let window = self.history.get_node_history(
                node,
                self.sampling_interval,
                ProbeResult::GoodResponse,
            );
            if window.iter().all(|r| *r == ProbeResult::NoResponse) {
                deactivate_set.insert(node.clone());
            }
        }

        // inactive peers that answered everything for the whole window
        let mut activate_set: BTreeSet<String> = BTreeSet::new();
        for node in &inactive {
            let window = self.history.get_node_history(
                node,
                self.sampling_interval,
                ProbeResult::NoResponse,
            );
            if window.iter().all(|r| *r == ProbeResult::GoodResponse) {
                activate_set.insert(node.clone());
            }
        }

        // the active list after pending changes are applied: the config
        // file reflects a fixed point in the recent past, this reflects
        // current reality
        let effective_active: Vec<String> = active
            .iter()
            .filter(|n| !deactivate_set.contains(*n))
            .cloned()
            .chain(activate_set.iter().cloned())
            .collect::<BTreeSet<String>>()
            .into_iter()
            .collect();

        metrics::update_cluster_counts(desired.len(), active.len(), effective_active.len());

        if effective_active != active {
            if let Some(actor) = Self::elect(&effective_active, &me) {
                state.is_actor = actor;
            }
        } else if old_active != active {
            if let Some(actor) = Self::elect(&active, &me) {
                state.is_actor = actor;
            }
        }

        // a cohort holding half the cluster or less must not act on it
        let share = |count: usize| count as f64 / desired.len() as f64;
        if share(active.len()) <= 0.5 && share(effective_active.len()) <= 0.5 {
            if !state.in_standby_mode {
                let msg = format!(
                    "Only {} out of {} nodes are active.  At least {} are required.  \
                     Entering standby mode to protect the system.",
                    active.len(),
                    desired.len(),
                    desired.len() / 2 + 1
                );
                self.comm.raise_alarm(&msg);
                error!("{}", msg);
                self.comm.enter_standby_mode();
                state.in_standby_mode = true;
            }
            return Ok(());
        } else if state.in_standby_mode && share(effective_active.len()) > 0.5 {
            info!("exiting standby mode, waiting for config update");
            state.in_standby_mode = false;
        }

        // was-actor-but-no-longer means a preferred node has come online:
        // perform one last activation round so it receives the updated
        // config, then stand down
        if !state.is_actor && !was_actor {
            return Ok(());
        }

        // as of here, this node is the actor of its cohort

        if !deactivate_set.is_empty() {
            self.comm.deactivate_nodes(deactivate_set.clone());
        }
        if !activate_set.is_empty() {
            self.comm.activate_nodes(activate_set.clone());
        }

        // the inactive list is included as a sanity check for clusters
        // that start with the primary already inactive
        if deactivate_set.contains(&primary) || inactive.contains(&primary) {
            self.comm.move_primary_node();
        }

        Ok(())
    }
}
