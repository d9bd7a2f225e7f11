//! DBRM control-connection interface
//!
//! The orchestrator only ever asks the DBRM master to change the system
//! state ahead of a graceful primary shutdown. The wire client itself is an
//! external collaborator; it must match the running controllernode
//! bit-exactly, so this module exposes the call and the exact state names
//! and nothing more.

use crate::error::Result;
use async_trait::async_trait;
use std::fmt;

/// System states accepted by the DBRM master
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SystemState {
    Rollback,
    ShutdownPending,
}

impl SystemState {
    /// Wire name of the state
    pub fn as_str(&self) -> &'static str {
        match self {
            SystemState::Rollback => "SS_ROLLBACK",
            SystemState::ShutdownPending => "SS_SHUTDOWN_PENDING",
        }
    }
}

impl fmt::Display for SystemState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Control connection to the DBRM master
#[async_trait]
pub trait DbrmControl: Send + Sync {
    /// Set the cluster system state flags
    async fn set_system_state(&self, states: &[SystemState]) -> Result<()>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_wire_names() {
        assert_eq!(SystemState::Rollback.as_str(), "SS_ROLLBACK");
        assert_eq!(SystemState::ShutdownPending.as_str(), "SS_SHUTDOWN_PENDING");
        assert_eq!(SystemState::Rollback.to_string(), "SS_ROLLBACK");
    }
}
