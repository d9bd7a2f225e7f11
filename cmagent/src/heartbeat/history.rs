//! Per-peer probe result history
//!
//! A bounded window of the most recent probe outcomes per peer, written by
//! the heartbeater and read by the monitor. Reads of short histories are
//! left-padded with a caller-chosen fill value so a never-seen peer is
//! judged pessimistically or optimistically depending on the question
//! being asked.

use super::ProbeResult;
use parking_lot::RwLock;
use std::collections::{HashMap, VecDeque};

pub struct HeartbeatHistory {
    window: usize,
    inner: RwLock<HashMap<String, VecDeque<ProbeResult>>>,
}

impl HeartbeatHistory {
    /// Create a history keeping `window` results per peer
    pub fn new(window: usize) -> Self {
        Self {
            window: window.max(1),
            inner: RwLock::new(HashMap::new()),
        }
    }

    /// Append one probe result for a peer, evicting beyond the window
    pub fn record(&self, node: &str, result: ProbeResult) {
        let mut inner = self.inner.write();
        let history = inner.entry(node.to_string()).or_default();
        history.push_back(result);
        while history.len() > self.window {
            history.pop_front();
        }
    }

    /// The most recent `count` results for a peer, oldest first,
    /// left-padded with `fill` when fewer are known
    pub fn get_node_history(&self, node: &str, count: usize, fill: ProbeResult) -> Vec<ProbeResult> {
        let inner = self.inner.read();
        let known = inner.get(node);
        let mut out = Vec::with_capacity(count);

        let tail: Vec<ProbeResult> = match known {
            Some(history) => {
                let skip = history.len().saturating_sub(count);
                history.iter().skip(skip).copied().collect()
            }
            None => Vec::new(),
        };
        out.resize(count - tail.len().min(count), fill);
        out.extend(tail.iter().copied().take(count));
        out
    }

    /// Drop histories for peers no longer part of the cluster
    pub fn keep_only(&self, nodes: &[String]) {
        self.inner.write().retain(|node, _| nodes.contains(node));
    }

    /// Peers currently tracked
    pub fn nodes(&self) -> Vec<String> {
        self.inner.read().keys().cloned().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ProbeResult::{GoodResponse, NoResponse};

    #[test]
    fn test_left_padding_for_unknown_peer() {
        let history = HeartbeatHistory::new(10);
        let padded = history.get_node_history("ghost", 3, NoResponse);
        assert_eq!(padded, vec![NoResponse; 3]);

        let padded = history.get_node_history("ghost", 3, GoodResponse);
        assert_eq!(padded, vec![GoodResponse; 3]);
    }

    #[test]
    fn test_partial_history_is_padded_on_the_left() {
        let history = HeartbeatHistory::new(10);
        history.record("n1", NoResponse);

        let padded = history.get_node_history("n1", 3, GoodResponse);
        assert_eq!(padded, vec![GoodResponse, GoodResponse, NoResponse]);
    }

    #[test]
    fn test_window_eviction_keeps_most_recent() {
        let history = HeartbeatHistory::new(3);
        history.record("n1", NoResponse);
        history.record("n1", GoodResponse);
        history.record("n1", GoodResponse);
        history.record("n1", NoResponse);

        let recent = history.get_node_history("n1", 3, GoodResponse);
        assert_eq!(recent, vec![GoodResponse, GoodResponse, NoResponse]);
    }

    #[test]
    fn test_count_shorter_than_history() {
        let history = HeartbeatHistory::new(10);
        for _ in 0..5 {
            history.record("n1", GoodResponse);
        }
        history.record("n1", NoResponse);

        let recent = history.get_node_history("n1", 2, GoodResponse);
        assert_eq!(recent, vec![GoodResponse, NoResponse]);
    }

    #[test]
    fn test_keep_only_prunes_departed_peers() {
        let history = HeartbeatHistory::new(5);
        history.record("n1", GoodResponse);
        history.record("n2", GoodResponse);

        history.keep_only(&["n1".to_string()]);

        let mut tracked = history.nodes();
        tracked.sort();
        assert_eq!(tracked, vec!["n1".to_string()]);
        // the pruned peer reads as all-fill again
        assert_eq!(
            history.get_node_history("n2", 2, NoResponse),
            vec![NoResponse; 2]
        );
    }
}
