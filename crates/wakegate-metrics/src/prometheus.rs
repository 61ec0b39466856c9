//! Prometheus text exposition format.

use std::fmt::Write;

use crate::collector::MetricsSnapshot;

fn metric(out: &mut String, name: &str, kind: &str, help: &str, value: impl std::fmt::Display) {
    let _ = writeln!(out, "# HELP wakegate_{name} {help}");
    let _ = writeln!(out, "# TYPE wakegate_{name} {kind}");
    let _ = writeln!(out, "wakegate_{name} {value}");
}

fn outcome(out: &mut String, name: &str, help: &str, series: &[(&str, u64)]) {
    let _ = writeln!(out, "# HELP wakegate_{name} {help}");
    let _ = writeln!(out, "# TYPE wakegate_{name} counter");
    for (label, value) in series {
        let _ = writeln!(out, "wakegate_{name}{{outcome=\"{label}\"}} {value}");
    }
}

/// Render a metrics snapshot into Prometheus text format.
pub fn render_prometheus(s: &MetricsSnapshot) -> String {
    let mut out = String::new();

    metric(
        &mut out,
        "wake_requests_total",
        "counter",
        "Calls into the wake coordinator.",
        s.wake_requests,
    );
    outcome(
        &mut out,
        "wake_callers_total",
        "Wake callers by coordination role.",
        &[
            ("already_awake", s.wake_fast_path),
            ("leader", s.wake_leaders),
            ("joined", s.wake_joiners),
        ],
    );
    outcome(
        &mut out,
        "wake_groups_resolved_total",
        "Resolved wait groups by outcome.",
        &[("became_awake", s.wakes_became_awake), ("timed_out", s.wakes_timed_out)],
    );
    metric(
        &mut out,
        "wake_groups_pending",
        "gauge",
        "Wait groups currently polling for readiness.",
        s.pending_wakes,
    );
    metric(
        &mut out,
        "wake_poll_errors_total",
        "counter",
        "Store errors observed while polling.",
        s.poll_errors,
    );
    outcome(
        &mut out,
        "wake_events_total",
        "Wake events consumed by the scaler.",
        &[
            ("handled", s.events_received.saturating_sub(s.events_duplicate)),
            ("duplicate", s.events_duplicate),
        ],
    );
    outcome(
        &mut out,
        "scale_ups_total",
        "Scale-up calls against the orchestration API.",
        &[("ok", s.scale_ups), ("failed", s.scale_failures)],
    );
    outcome(
        &mut out,
        "sleeps_total",
        "Scale-to-zero calls against the orchestration API.",
        &[("ok", s.sleeps), ("failed", s.sleep_failures)],
    );

    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn renders_help_and_type() {
        let out = render_prometheus(&MetricsSnapshot::default());
        assert!(out.contains("# HELP wakegate_wake_requests_total"));
        assert!(out.contains("# TYPE wakegate_wake_groups_pending gauge"));
        assert!(out.contains("# TYPE wakegate_scale_ups_total counter"));
    }

    #[test]
    fn renders_labelled_values() {
        let snap = MetricsSnapshot {
            wake_requests: 5,
            wake_leaders: 1,
            wake_joiners: 3,
            wake_fast_path: 1,
            events_received: 3,
            events_duplicate: 2,
            ..MetricsSnapshot::default()
        };
        let out = render_prometheus(&snap);
        assert!(out.contains("wakegate_wake_requests_total 5\n"));
        assert!(out.contains("wakegate_wake_callers_total{outcome=\"joined\"} 3\n"));
        assert!(out.contains("wakegate_wake_events_total{outcome=\"handled\"} 1\n"));
        assert!(out.contains("wakegate_wake_events_total{outcome=\"duplicate\"} 2\n"));
    }
}
