//! Peer liveness probing
//!
//! The heartbeater runs one probe round per monitor tick against every
//! declared peer and appends the outcome to the shared history. The
//! transport is a trait; the default implementation is a plain TCP
//! connect against the peer agent's port, answered by the
//! [`HeartbeatResponder`] accept loop on the other side.

mod history;

pub use history::HeartbeatHistory;

use crate::cluster::ClusterConfigSource;
use crate::error::Result;
use crate::metrics;
use async_trait::async_trait;
use parking_lot::{Mutex, RwLock};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::{TcpListener, TcpStream};
use tracing::{debug, info, warn};

/// Default port the per-node agent answers liveness probes on
pub const DEFAULT_AGENT_PORT: u16 = 8640;

/// Timeout separating a good response from no response
const PROBE_TIMEOUT: Duration = Duration::from_secs(1);

/// How often the responder loop re-checks its running flag
const ACCEPT_POLL_INTERVAL: Duration = Duration::from_millis(500);

/// Outcome of one liveness probe
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProbeResult {
    GoodResponse,
    NoResponse,
    Unknown,
}

impl ProbeResult {
    /// Get the result as a string for metrics
    pub fn as_str(&self) -> &'static str {
        match self {
            ProbeResult::GoodResponse => "good",
            ProbeResult::NoResponse => "no_response",
            ProbeResult::Unknown => "unknown",
        }
    }
}

/// Abstract probe transport; only the per-peer outcome is observable
#[async_trait]
pub trait HeartbeatTransport: Send + Sync {
    async fn probe(&self, node: &str) -> ProbeResult;
}

/// TCP connect probe against a fixed agent port
pub struct TcpProbe {
    port: u16,
    timeout: Duration,
}

impl TcpProbe {
    pub fn new(port: u16) -> Self {
        Self {
            port,
            timeout: PROBE_TIMEOUT,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}

#[async_trait]
impl HeartbeatTransport for TcpProbe {
    async fn probe(&self, node: &str) -> ProbeResult {
        match tokio::time::timeout(self.timeout, TcpStream::connect((node, self.port))).await {
            Ok(Ok(_)) => ProbeResult::GoodResponse,
            _ => ProbeResult::NoResponse,
        }
    }
}

/// Issues one probe round per tick and records the outcomes
pub struct Heartbeater {
    cluster: Arc<dyn ClusterConfigSource>,
    history: Arc<HeartbeatHistory>,
    transport: Arc<dyn HeartbeatTransport>,
}

impl Heartbeater {
    pub fn new(
        cluster: Arc<dyn ClusterConfigSource>,
        history: Arc<HeartbeatHistory>,
        transport: Arc<dyn HeartbeatTransport>,
    ) -> Self {
        Self {
            cluster,
            history,
            transport,
        }
    }

    /// Probe every declared peer except this node, concurrently
    pub async fn send_heartbeats(&self) -> Result<()> {
        let (_, active, inactive) = self.cluster.get_all_nodes()?;
        let me = self.cluster.who_am_i()?;

        let peers: Vec<String> = active
            .iter()
            .chain(inactive.iter())
            .filter(|n| **n != me)
            .cloned()
            .collect();

        let probes = peers.iter().map(|peer| self.transport.probe(peer));
        let results = futures::future::join_all(probes).await;

        for (peer, result) in peers.iter().zip(results) {
            debug!("heartbeat {} -> {}", peer, result.as_str());
            metrics::record_probe(peer, result);
            self.history.record(peer, result);
        }
        Ok(())
    }
}

/// Accept-and-close listener that answers peer connect probes
pub struct HeartbeatResponder {
    local_addr: SocketAddr,
    listener: Mutex<Option<TcpListener>>,
    running: Arc<RwLock<bool>>,
}

impl HeartbeatResponder {
    /// Bind the responder socket
    pub async fn bind(addr: &str) -> Result<Self> {
        let listener = TcpListener::bind(addr).await?;
        let local_addr = listener.local_addr()?;
        Ok(Self {
            local_addr,
            listener: Mutex::new(Some(listener)),
            running: Arc::new(RwLock::new(false)),
        })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Start the responder background task
    pub fn start(self: &Arc<Self>) -> tokio::task::JoinHandle<()> {
        *self.running.write() = true;
        let responder = Arc::clone(self);
        tokio::spawn(async move {
            responder.run_loop().await;
        })
    }

    /// Stop the responder
    pub fn stop(&self) {
        *self.running.write() = false;
    }

    async fn run_loop(&self) {
        let Some(listener) = self.listener.lock().take() else {
            warn!("heartbeat responder started twice");
            return;
        };
        info!("heartbeat responder listening on {}", self.local_addr);

        while *self.running.read() {
            match tokio::time::timeout(ACCEPT_POLL_INTERVAL, listener.accept()).await {
                Ok(Ok((_stream, peer))) => {
                    // connecting is the whole protocol
                    debug!("answered probe from {}", peer);
                }
                Ok(Err(e)) => warn!("heartbeat accept failed: {}", e),
                Err(_) => {}
            }
        }
        info!("heartbeat responder stopped");
    }
}
