use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;

#[derive(Debug, Default)]
pub struct EngineMetrics {
    samples_received: AtomicU64,
    samples_matched: AtomicU64,
    buckets_created: AtomicU64,
    buckets_pruned: AtomicU64,
    state_transitions: AtomicU64,
    actions_dispatched: AtomicU64,
    actions_failed: AtomicU64,
    store_errors: AtomicU64,
    updates_dropped: AtomicU64,
    evaluation_latency_sum_us: AtomicU64,
    evaluation_latency_count: AtomicU64,
}

impl EngineMetrics {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn inc_samples_received(&self) {
        self.samples_received.fetch_add(1, Ordering::Relaxed);
    }

    pub fn add_samples_matched(&self, count: u64) {
        self.samples_matched.fetch_add(count, Ordering::Relaxed);
    }

    pub fn inc_buckets_created(&self) {
        self.buckets_created.fetch_add(1, Ordering::Relaxed);
    }

    pub fn add_buckets_pruned(&self, count: u64) {
        self.buckets_pruned.fetch_add(count, Ordering::Relaxed);
    }

    pub fn inc_state_transitions(&self) {
        self.state_transitions.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_actions_dispatched(&self) {
        self.actions_dispatched.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_actions_failed(&self) {
        self.actions_failed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_store_errors(&self) {
        self.store_errors.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_updates_dropped(&self) {
        self.updates_dropped.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_evaluation_latency(&self, start: Instant) {
        let us = start.elapsed().as_micros() as u64;
        self.evaluation_latency_sum_us.fetch_add(us, Ordering::Relaxed);
        self.evaluation_latency_count.fetch_add(1, Ordering::Relaxed);
    }

    pub fn samples_received_val(&self) -> u64 {
        self.samples_received.load(Ordering::Relaxed)
    }

    pub fn samples_matched_val(&self) -> u64 {
        self.samples_matched.load(Ordering::Relaxed)
    }

    pub fn buckets_created_val(&self) -> u64 {
        self.buckets_created.load(Ordering::Relaxed)
    }

    pub fn buckets_pruned_val(&self) -> u64 {
        self.buckets_pruned.load(Ordering::Relaxed)
    }

    pub fn state_transitions_val(&self) -> u64 {
        self.state_transitions.load(Ordering::Relaxed)
    }

    pub fn actions_dispatched_val(&self) -> u64 {
        self.actions_dispatched.load(Ordering::Relaxed)
    }

    pub fn actions_failed_val(&self) -> u64 {
        self.actions_failed.load(Ordering::Relaxed)
    }

    pub fn store_errors_val(&self) -> u64 {
        self.store_errors.load(Ordering::Relaxed)
    }

    pub fn updates_dropped_val(&self) -> u64 {
        self.updates_dropped.load(Ordering::Relaxed)
    }

    pub fn evaluation_latency_vals(&self) -> (u64, u64) {
        (
            self.evaluation_latency_sum_us.load(Ordering::Relaxed),
            self.evaluation_latency_count.load(Ordering::Relaxed),
        )
    }
}
