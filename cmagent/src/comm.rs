//! Agent communicator
//!
//! Serializes cluster actions: public methods enqueue events, a single
//! background worker drains them in batches, wraps reconfiguration batches
//! in a cluster transaction, and either commits or rolls back and requeues.
//!
//! One mutex guards the queue and the deduper together. The deduper keeps
//! every queued or in-flight event (no completion timestamp yet) plus
//! finished events for a retention window, so the monitor re-deciding the
//! same action every tick collapses into a single queued event.

use crate::agent::FailoverAgent;
use crate::error::Result;
use crate::events::Event;
use crate::metrics;
use parking_lot::{Mutex, RwLock};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

/// Pause between worker cycles, and the idle sleep
const EVENT_POLL_INTERVAL: Duration = Duration::from_secs(5);

/// How long finished events stay in the deduper
const DEDUP_RETENTION: Duration = Duration::from_secs(10);

struct CommState {
    queue: Vec<Event>,
    /// `None` = queued or in flight; `Some(t)` = finished at `t`
    deduper: HashMap<Event, Option<Instant>>,
}

pub struct AgentComm {
    agent: Arc<dyn FailoverAgent>,
    state: Mutex<CommState>,
    running: Arc<RwLock<bool>>,
    poll_interval: Duration,
    dedup_retention: Duration,
}

impl AgentComm {
    pub fn new(agent: Arc<dyn FailoverAgent>) -> Self {
        Self {
            agent,
            state: Mutex::new(CommState {
                queue: Vec::new(),
                deduper: HashMap::new(),
            }),
            running: Arc::new(RwLock::new(false)),
            poll_interval: EVENT_POLL_INTERVAL,
            dedup_retention: DEDUP_RETENTION,
        }
    }

    /// Compressed pacing for tests
    pub fn with_timing(mut self, poll_interval: Duration, dedup_retention: Duration) -> Self {
        self.poll_interval = poll_interval;
        self.dedup_retention = dedup_retention;
        self
    }

    /// Queue reactivation of recovered nodes
    pub fn activate_nodes<I, S>(&self, nodes: I)
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.add_event(Event::activate(nodes));
    }

    /// Queue deactivation of dead nodes
    pub fn deactivate_nodes<I, S>(&self, nodes: I)
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.add_event(Event::deactivate(nodes));
    }

    /// Queue a move of the primary role
    pub fn move_primary_node(&self) {
        self.add_event(Event::MovePrimary);
    }

    /// Cancel all pending work and queue the standby transition alone
    pub fn enter_standby_mode(&self) {
        let mut state = self.state.lock();
        state.queue = vec![Event::EnterStandby];
        state.deduper = HashMap::from([(Event::EnterStandby, Some(Instant::now()))]);
        metrics::update_queue_depth(state.queue.len(), state.deduper.len());
        info!("pending cluster work cancelled, standby queued");
    }

    /// Forward an alarm to the agent immediately, bypassing the queue
    pub fn raise_alarm(&self, msg: &str) {
        self.agent.raise_alarm(msg);
    }

    /// `(queue length, deduper length)`
    pub fn queue_sizes(&self) -> (usize, usize) {
        let state = self.state.lock();
        (state.queue.len(), state.deduper.len())
    }

    /// Snapshot of the queued events, in order
    pub fn queued_events(&self) -> Vec<Event> {
        self.state.lock().queue.clone()
    }

    fn add_event(&self, event: Event) {
        let mut state = self.state.lock();
        if state.deduper.contains_key(&event) {
            debug!("dropping duplicate event {}", event);
            metrics::record_event_deduplicated(&event);
            return;
        }
        metrics::record_event_enqueued(&event);
        state.deduper.insert(event.clone(), None);
        state.queue.push(event);
        metrics::update_queue_depth(state.queue.len(), state.deduper.len());
    }

    /// Take every queued event and prune aged-out deduper entries
    fn take_events(&self) -> Vec<Event> {
        let mut state = self.state.lock();
        let events = std::mem::take(&mut state.queue);

        let cutoff = Instant::now().checked_sub(self.dedup_retention);
        if let Some(cutoff) = cutoff {
            state
                .deduper
                .retain(|_, finished| !matches!(finished, Some(t) if *t < cutoff));
        }

        metrics::update_queue_depth(state.queue.len(), state.deduper.len());
        events
    }

    /// Put a failed batch back at the head, ahead of newer arrivals
    fn requeue_events(&self, mut events: Vec<Event>) {
        let mut state = self.state.lock();
        events.append(&mut state.queue);
        state.queue = events;
        metrics::update_queue_depth(state.queue.len(), state.deduper.len());
    }

    fn mark_events_finished(&self, events: &[Event]) {
        let mut state = self.state.lock();
        let now = Instant::now();
        for event in events {
            state.deduper.insert(event.clone(), Some(now));
        }
        metrics::update_queue_depth(state.queue.len(), state.deduper.len());
    }

    /// Start the worker background task
    pub fn start(self: &Arc<Self>) -> tokio::task::JoinHandle<()> {
        *self.running.write() = true;
        let comm = Arc::clone(self);
        tokio::spawn(async move {
            comm.run_loop().await;
        })
    }

    /// Stop the worker
    pub fn stop(&self) {
        *self.running.write() = false;
    }

    pub fn is_running(&self) -> bool {
        *self.running.read()
    }

    async fn run_loop(&self) {
        info!("agent communicator worker started");
        while *self.running.read() {
            self.run_cycle().await;
        }
        info!("agent communicator worker exiting");
    }

    /// One worker cycle: drain, transact, run, commit or requeue
    pub(crate) async fn run_cycle(&self) {
        let events = self.take_events();
        if events.is_empty() {
            tokio::time::sleep(self.poll_interval).await;
            return;
        }
        let next_poll = Instant::now() + self.poll_interval;

        let mut nodes_added: Vec<String> = Vec::new();
        let mut nodes_removed: Vec<String> = Vec::new();
        let mut needs_transaction = false;
        for event in &events {
            if event.needs_transaction() {
                needs_transaction = true;
            }
            match event {
                Event::Activate(nodes) => {
                    nodes_added.extend(nodes.iter().cloned());
                }
                Event::Deactivate(nodes) => {
                    nodes_removed.extend(nodes.iter().cloned());
                }
                _ => {}
            }
        }

        let transaction = if needs_transaction {
            Some(
                self.agent
                    .start_transaction(&nodes_added, &nodes_removed)
                    .await,
            )
        } else {
            None
        };

        let mut failure = None;
        for event in &events {
            debug!("running {}", event);
            if let Err(e) = self.dispatch(event).await {
                failure = Some((event.clone(), e));
                break;
            }
        }

        match failure {
            Some((event, e)) => {
                if let Some((txn_id, nodes)) = &transaction {
                    warn!(
                        "event {} failed ({}), aborting transaction {}",
                        event, e, txn_id
                    );
                    self.agent.rollback_transaction(*txn_id, nodes).await;
                } else {
                    warn!("event {} failed ({})", event, e);
                }
                metrics::record_batch(events.len(), false);
                self.requeue_events(events);
            }
            None => {
                if let Some((txn_id, nodes)) = &transaction {
                    self.agent.commit_transaction(*txn_id, nodes).await;
                }
                metrics::record_batch(events.len(), true);
                self.mark_events_finished(&events);
            }
        }

        let now = Instant::now();
        if now < next_poll {
            tokio::time::sleep(next_poll - now).await;
        }
    }

    async fn dispatch(&self, event: &Event) -> Result<()> {
        match event {
            Event::Activate(nodes) => {
                let nodes: Vec<String> = nodes.iter().cloned().collect();
                self.agent.activate_nodes(&nodes).await.map(|_| ())
            }
            Event::Deactivate(nodes) => {
                let nodes: Vec<String> = nodes.iter().cloned().collect();
                self.agent.deactivate_nodes(&nodes).await.map(|_| ())
            }
            Event::MovePrimary => self.agent.move_primary_node().await,
            Event::EnterStandby => self.agent.enter_standby_mode().await,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::AgentError;
    use crate::events::TransactionId;
    use async_trait::async_trait;

    #[derive(Default)]
    struct MockAgent {
        calls: Mutex<Vec<String>>,
        fail_deactivate: bool,
    }

    impl MockAgent {
        fn recorded(&self) -> Vec<String> {
            self.calls.lock().clone()
        }
    }

    #[async_trait]
    impl FailoverAgent for MockAgent {
        async fn activate_nodes(&self, nodes: &[String]) -> Result<usize> {
            self.calls.lock().push(format!("activate({nodes:?})"));
            Ok(nodes.len())
        }

        async fn deactivate_nodes(&self, nodes: &[String]) -> Result<usize> {
            self.calls.lock().push(format!("deactivate({nodes:?})"));
            if self.fail_deactivate {
                return Err(AgentError::NodeManipulation("deactivate refused".into()));
            }
            Ok(nodes.len())
        }

        async fn move_primary_node(&self) -> Result<()> {
            self.calls.lock().push("move_primary".into());
            Ok(())
        }

        async fn enter_standby_mode(&self) -> Result<()> {
            self.calls.lock().push("enter_standby".into());
            Ok(())
        }

        fn raise_alarm(&self, msg: &str) {
            self.calls.lock().push(format!("alarm({msg})"));
        }

        async fn start_transaction(
            &self,
            extra_nodes: &[String],
            remove_nodes: &[String],
        ) -> (TransactionId, Vec<String>) {
            self.calls
                .lock()
                .push(format!("start_txn({extra_nodes:?},{remove_nodes:?})"));
            (42, vec!["a".into(), "b".into()])
        }

        async fn commit_transaction(&self, txn_id: TransactionId, _nodes: &[String]) {
            self.calls.lock().push(format!("commit({txn_id})"));
        }

        async fn rollback_transaction(&self, txn_id: TransactionId, _nodes: &[String]) {
            self.calls.lock().push(format!("rollback({txn_id})"));
        }
    }

    fn comm_under_test(agent: Arc<MockAgent>) -> AgentComm {
        AgentComm::new(agent).with_timing(Duration::from_millis(1), Duration::from_millis(20))
    }

    #[tokio::test]
    async fn test_duplicate_enqueue_collapses() {
        let agent = Arc::new(MockAgent::default());
        let comm = comm_under_test(Arc::clone(&agent));

        comm.activate_nodes(["x"]);
        comm.activate_nodes(["x"]);
        assert_eq!(comm.queue_sizes(), (1, 1));

        comm.run_cycle().await;
        let activations = agent
            .recorded()
            .iter()
            .filter(|c| c.starts_with("activate"))
            .count();
        assert_eq!(activations, 1);
    }

    #[tokio::test]
    async fn test_finished_events_age_out_of_the_deduper() {
        let agent = Arc::new(MockAgent::default());
        let comm = comm_under_test(Arc::clone(&agent));

        comm.move_primary_node();
        comm.run_cycle().await;
        // still within retention: a repeat is deduplicated
        comm.move_primary_node();
        assert_eq!(comm.queue_sizes().0, 0);

        tokio::time::sleep(Duration::from_millis(30)).await;
        // retention elapsed; the next take prunes, then a repeat queues
        comm.run_cycle().await;
        comm.move_primary_node();
        assert_eq!(comm.queue_sizes().0, 1);
    }

    #[tokio::test]
    async fn test_standby_cancels_pending_work() {
        let agent = Arc::new(MockAgent::default());
        let comm = comm_under_test(agent);

        comm.activate_nodes(["x"]);
        comm.deactivate_nodes(["y"]);
        comm.move_primary_node();
        comm.enter_standby_mode();

        assert_eq!(comm.queue_sizes(), (1, 1));
        assert_eq!(comm.queued_events(), vec![Event::EnterStandby]);
    }

    #[tokio::test]
    async fn test_batch_runs_in_order_under_one_transaction() {
        let agent = Arc::new(MockAgent::default());
        let comm = comm_under_test(Arc::clone(&agent));

        comm.deactivate_nodes(["c"]);
        comm.move_primary_node();
        comm.run_cycle().await;

        let calls = agent.recorded();
        assert_eq!(
            calls,
            vec![
                "start_txn([],[\"c\"])".to_string(),
                "deactivate([\"c\"])".to_string(),
                "move_primary".to_string(),
                "commit(42)".to_string(),
            ]
        );
        // every event finished, nothing queued
        assert_eq!(comm.queue_sizes().0, 0);
    }

    #[tokio::test]
    async fn test_failed_batch_rolls_back_and_requeues_at_head() {
        let agent = Arc::new(MockAgent {
            fail_deactivate: true,
            ..Default::default()
        });
        let comm = comm_under_test(Arc::clone(&agent));

        comm.activate_nodes(["x"]);
        comm.deactivate_nodes(["y"]);
        comm.run_cycle().await;

        let calls = agent.recorded();
        assert_eq!(
            calls.iter().filter(|c| c.starts_with("rollback")).count(),
            1
        );
        assert!(!calls.iter().any(|c| c.starts_with("commit")));

        // both events back in original order, ready for the next cycle
        assert_eq!(
            comm.queued_events(),
            vec![Event::activate(["x"]), Event::deactivate(["y"])]
        );
        // their deduper entries still mark them pending
        let (queue, deduper) = comm.queue_sizes();
        assert_eq!((queue, deduper), (2, 2));
    }

    #[tokio::test]
    async fn test_requeued_batch_precedes_new_arrivals() {
        let agent = Arc::new(MockAgent::default());
        let comm = comm_under_test(agent);

        comm.move_primary_node();
        let batch = comm.take_events();
        comm.activate_nodes(["late"]);
        comm.requeue_events(batch);

        assert_eq!(
            comm.queued_events(),
            vec![Event::MovePrimary, Event::activate(["late"])]
        );
    }

    #[tokio::test]
    async fn test_standby_batch_needs_no_transaction() {
        let agent = Arc::new(MockAgent::default());
        let comm = comm_under_test(Arc::clone(&agent));

        comm.enter_standby_mode();
        comm.run_cycle().await;

        let calls = agent.recorded();
        assert_eq!(calls, vec!["enter_standby".to_string()]);
    }

    #[tokio::test]
    async fn test_worker_start_stop() {
        let agent = Arc::new(MockAgent::default());
        let comm = Arc::new(comm_under_test(agent));

        let handle = comm.start();
        assert!(comm.is_running());
        comm.stop();
        let _ = handle.await;
        assert!(!comm.is_running());
    }
}
