//! Process dispatchers
//!
//! A dispatcher is the back-end that actually starts and stops services on
//! this node. Two back-ends exist: one delegating to the host service
//! manager, one spawning the engine binaries directly inside a container.
//! Both speak the same small contract so the orchestrator above never cares
//! which environment it runs in.

mod container;
mod systemd;

pub use container::ContainerDispatcher;
pub use systemd::SystemdDispatcher;

use crate::error::{NodeControlError, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::sync::Arc;

/// Which back-end a dispatcher is
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DispatcherKind {
    Systemd,
    Container,
}

impl DispatcherKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            DispatcherKind::Systemd => "systemd",
            DispatcherKind::Container => "container",
        }
    }
}

/// Dispatcher selection, read from the agent settings file
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct DispatcherConfig {
    /// Back-end name, `systemd` or `container`
    #[serde(default = "default_dispatcher_name")]
    pub name: String,

    /// Optional shell helper the container back-end delegates to
    #[serde(default)]
    pub path: Option<PathBuf>,
}

fn default_dispatcher_name() -> String {
    "systemd".to_string()
}

impl Default for DispatcherConfig {
    fn default() -> Self {
        Self {
            name: default_dispatcher_name(),
            path: None,
        }
    }
}

/// Uniform start/stop contract over the concrete back-ends.
///
/// Every method reports plain success; failures are logged at the back-end
/// and folded into `false` so callers decide how much they care.
#[async_trait]
pub trait ProcessDispatcher: Send + Sync {
    /// Which back-end this is
    fn kind(&self) -> DispatcherKind;

    /// Check whether the service is currently running
    async fn is_running(&self, service: &str, is_primary: bool, use_privileged: bool) -> bool;

    /// Start the service
    async fn start(&self, service: &str, is_primary: bool, use_privileged: bool) -> bool;

    /// Stop the service
    async fn stop(&self, service: &str, is_primary: bool, use_privileged: bool) -> bool;

    /// Restart the service
    async fn restart(&self, service: &str, is_primary: bool, use_privileged: bool) -> bool;
}

impl std::fmt::Debug for dyn ProcessDispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProcessDispatcher")
            .field("kind", &self.kind())
            .finish()
    }
}

/// Build the dispatcher selected by configuration.
///
/// An unrecognized name is a startup-fatal configuration error.
pub fn build_dispatcher(config: &DispatcherConfig) -> Result<Arc<dyn ProcessDispatcher>> {
    match config.name.as_str() {
        "systemd" => Ok(Arc::new(SystemdDispatcher::new())),
        "container" => Ok(Arc::new(ContainerDispatcher::new(config.path.clone()))),
        other => Err(NodeControlError::Config(format!(
            "unknown dispatcher backend '{other}', expected 'systemd' or 'container'"
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_selects_systemd() {
        let config = DispatcherConfig::default();
        let dispatcher = build_dispatcher(&config).unwrap();
        assert_eq!(dispatcher.kind(), DispatcherKind::Systemd);
    }

    #[test]
    fn test_container_selection() {
        let config = DispatcherConfig {
            name: "container".into(),
            path: None,
        };
        let dispatcher = build_dispatcher(&config).unwrap();
        assert_eq!(dispatcher.kind(), DispatcherKind::Container);
    }

    #[test]
    fn test_unknown_backend_is_fatal() {
        let config = DispatcherConfig {
            name: "launchd".into(),
            path: None,
        };
        let err = build_dispatcher(&config).unwrap_err();
        assert!(matches!(err, NodeControlError::Config(_)));
    }
}
