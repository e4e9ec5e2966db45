use std::fmt::Write;

use super::engine_metrics::EngineMetrics;

const PREFIX: &str = "tripwire_evaluator";

pub fn render_prometheus(m: &EngineMetrics, alarms_loaded: usize) -> String {
    let mut out = String::with_capacity(1024);

    write_counter(&mut out, "samples_received_total", m.samples_received_val());
    write_counter(&mut out, "samples_matched_total", m.samples_matched_val());
    write_counter(&mut out, "buckets_created_total", m.buckets_created_val());
    write_counter(&mut out, "buckets_pruned_total", m.buckets_pruned_val());
    write_counter(&mut out, "state_transitions_total", m.state_transitions_val());
    write_counter(&mut out, "actions_dispatched_total", m.actions_dispatched_val());
    write_counter(&mut out, "actions_failed_total", m.actions_failed_val());
    write_counter(&mut out, "store_errors_total", m.store_errors_val());
    write_counter(&mut out, "updates_dropped_total", m.updates_dropped_val());
    write_gauge(&mut out, "alarms_loaded", alarms_loaded as u64);

    let (sum, count) = m.evaluation_latency_vals();
    write_summary(&mut out, "evaluation_latency_us", sum, count);

    out
}

fn write_counter(out: &mut String, name: &str, val: u64) {
    let _ = writeln!(out, "# TYPE {PREFIX}_{name} counter");
    let _ = writeln!(out, "{PREFIX}_{name} {val}");
}

fn write_gauge(out: &mut String, name: &str, val: u64) {
    let _ = writeln!(out, "# TYPE {PREFIX}_{name} gauge");
    let _ = writeln!(out, "{PREFIX}_{name} {val}");
}

fn write_summary(out: &mut String, name: &str, sum: u64, count: u64) {
    let _ = writeln!(out, "# TYPE {PREFIX}_{name} summary");
    let _ = writeln!(out, "{PREFIX}_{name}_sum {sum}");
    let _ = writeln!(out, "{PREFIX}_{name}_count {count}");
}
