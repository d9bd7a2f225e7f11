//! Cluster action events
//!
//! Every decision the monitor makes becomes one of these events. Identity
//! is structural: the variant plus its canonically-ordered node arguments,
//! so the communicator can deduplicate repeats while an earlier copy is
//! still queued or in flight.

use std::collections::BTreeSet;
use std::fmt;

/// Identifier of an open cluster transaction
pub type TransactionId = u32;

/// One cluster action awaiting dispatch
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Event {
    /// Re-add recovered nodes to the active membership
    Activate(BTreeSet<String>),
    /// Remove dead nodes from the active membership
    Deactivate(BTreeSet<String>),
    /// Move the primary role off a dead node
    MovePrimary,
    /// Stop participating as an active cluster member
    EnterStandby,
}

impl Event {
    pub fn activate<I, S>(nodes: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Event::Activate(nodes.into_iter().map(Into::into).collect())
    }

    pub fn deactivate<I, S>(nodes: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Event::Deactivate(nodes.into_iter().map(Into::into).collect())
    }

    /// Whether this event reconfigures the cluster and therefore must run
    /// inside a transaction
    pub fn needs_transaction(&self) -> bool {
        matches!(
            self,
            Event::Activate(_) | Event::Deactivate(_) | Event::MovePrimary
        )
    }

    /// Short tag for logs and metrics
    pub fn kind(&self) -> &'static str {
        match self {
            Event::Activate(_) => "activate",
            Event::Deactivate(_) => "deactivate",
            Event::MovePrimary => "move_primary",
            Event::EnterStandby => "enter_standby",
        }
    }
}

impl fmt::Display for Event {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Event::Activate(nodes) => {
                write!(f, "activate({})", join(nodes))
            }
            Event::Deactivate(nodes) => {
                write!(f, "deactivate({})", join(nodes))
            }
            Event::MovePrimary => f.write_str("move_primary"),
            Event::EnterStandby => f.write_str("enter_standby"),
        }
    }
}

fn join(nodes: &BTreeSet<String>) -> String {
    nodes.iter().cloned().collect::<Vec<_>>().join(", ")
}
