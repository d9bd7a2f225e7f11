//! Failover observability metrics
//!
//! Prometheus-compatible metrics covering peer liveness, the event
//! pipeline, transactions and the standby safety state.

use crate::events::Event;
use crate::heartbeat::ProbeResult;

/// Record one liveness probe outcome
pub fn record_probe(node: &str, result: ProbeResult) {
    metrics::counter!(
        "cmagent_heartbeat_probes_total",
        "node" => node.to_string(),
        "result" => result.as_str(),
    )
    .increment(1);

    metrics::gauge!(
        "cmagent_peer_responding",
        "node" => node.to_string(),
    )
    .set(if result == ProbeResult::GoodResponse {
        1.0
    } else {
        0.0
    });
}

/// Update the per-tick membership gauges
pub fn update_cluster_counts(desired: usize, active: usize, effective_active: usize) {
    metrics::gauge!("cmagent_cluster_nodes_desired").set(desired as f64);
    metrics::gauge!("cmagent_cluster_nodes_active").set(active as f64);
    metrics::gauge!("cmagent_cluster_nodes_effective_active").set(effective_active as f64);
}

/// Record an event accepted into the queue
pub fn record_event_enqueued(event: &Event) {
    metrics::counter!(
        "cmagent_events_enqueued_total",
        "kind" => event.kind(),
    )
    .increment(1);
}

/// Record an event dropped because an equal one is queued or in flight
pub fn record_event_deduplicated(event: &Event) {
    metrics::counter!(
        "cmagent_events_deduplicated_total",
        "kind" => event.kind(),
    )
    .increment(1);
}

/// Update queue depth gauges after a queue mutation
pub fn update_queue_depth(queue: usize, deduper: usize) {
    metrics::gauge!("cmagent_event_queue_depth").set(queue as f64);
    metrics::gauge!("cmagent_event_deduper_entries").set(deduper as f64);
}

/// Record the outcome of one worker batch
pub fn record_batch(size: usize, success: bool) {
    let status = if success { "ok" } else { "rolled_back" };
    metrics::counter!(
        "cmagent_event_batches_total",
        "status" => status,
    )
    .increment(1);
    metrics::histogram!("cmagent_event_batch_size").record(size as f64);
}

/// Record a transaction lifecycle event
pub fn record_transaction(event: &'static str) {
    metrics::counter!(
        "cmagent_transactions_total",
        "event" => event,
    )
    .increment(1);
}

/// Record one attempt to obtain a transaction
pub fn record_transaction_attempt() {
    metrics::counter!("cmagent_transaction_attempts_total").increment(1);
}

/// Record a raised alarm
pub fn record_alarm() {
    metrics::counter!("cmagent_alarms_total").increment(1);
}

/// Update the standby safety-state gauge
pub fn update_standby(in_standby: bool) {
    metrics::gauge!("cmagent_in_standby").set(if in_standby { 1.0 } else { 0.0 });
}
