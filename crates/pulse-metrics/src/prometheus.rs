//! Prometheus text exposition format.
//!
//! Renders the published status snapshot into the Prometheus text
//! exposition format for scraping by a Prometheus server or compatible agent.

use std::fmt::Write;

use pulse_state::{ProbeOutcome, ServiceHealth, StatusSnapshot};

fn health_value(health: ServiceHealth) -> f64 {
    match health {
        ServiceHealth::Operational => 1.0,
        ServiceHealth::Degraded => 0.5,
        ServiceHealth::Down => 0.0,
        ServiceHealth::Unknown => -1.0,
    }
}

fn outcome_value(outcome: ProbeOutcome) -> f64 {
    health_value(outcome.into())
}

fn header(out: &mut String, name: &str, help: &str, kind: &str) {
    let _ = writeln!(out, "# HELP {name} {help}");
    let _ = writeln!(out, "# TYPE {name} {kind}");
}

/// Escape a label value per the exposition format.
fn label(value: &str) -> String {
    value
        .replace('\\', "\\\\")
        .replace('"', "\\\"")
        .replace('\n', "\\n")
}

/// Render a snapshot into Prometheus text format.
///
/// Per-service gauges carry `service` and `category` labels. Undefined
/// values (no results in the window) are omitted rather than reported as 0.
pub fn render_prometheus(snapshot: &StatusSnapshot) -> String {
    let mut out = String::new();

    header(
        &mut out,
        "pulse_service_status",
        "Service status (1 operational, 0.5 degraded, 0 down, -1 unknown).",
        "gauge",
    );
    for s in &snapshot.services {
        let _ = writeln!(
            out,
            "pulse_service_status{{service=\"{}\",category=\"{}\",critical=\"{}\"}} {}",
            label(&s.name),
            label(&s.category),
            s.critical,
            health_value(s.status)
        );
    }

    header(
        &mut out,
        "pulse_service_response_time_ms",
        "Average response time over 24h in milliseconds.",
        "gauge",
    );
    for s in &snapshot.services {
        if let Some(ms) = s.response_time.0 {
            let _ = writeln!(
                out,
                "pulse_service_response_time_ms{{service=\"{}\"}} {:.2}",
                label(&s.name),
                ms
            );
        }
    }

    header(
        &mut out,
        "pulse_service_uptime_ratio",
        "Share of operational probes over 24h (0.0-1.0).",
        "gauge",
    );
    for s in &snapshot.services {
        if let Some(pct) = s.uptime.0 {
            let _ = writeln!(
                out,
                "pulse_service_uptime_ratio{{service=\"{}\"}} {:.4}",
                label(&s.name),
                pct / 100.0
            );
        }
    }

    header(
        &mut out,
        "pulse_overall_status",
        "Overall fleet status (1 operational, 0.5 degraded, 0 down).",
        "gauge",
    );
    let _ = writeln!(
        out,
        "pulse_overall_status {}",
        outcome_value(snapshot.overall_status.status)
    );

    header(
        &mut out,
        "pulse_deployment_success_ratio",
        "Deployment success rate over the rate window (0.0-1.0).",
        "gauge",
    );
    if let Some(pct) = snapshot.metrics.success_rate.0 {
        let _ = writeln!(out, "pulse_deployment_success_ratio {:.4}", pct / 100.0);
    }

    header(
        &mut out,
        "pulse_deployments_total",
        "Deployments recorded.",
        "counter",
    );
    let _ = writeln!(
        out,
        "pulse_deployments_total {}",
        snapshot.metrics.total_deployments
    );

    header(&mut out, "pulse_open_incidents", "Incidents not yet resolved.", "gauge");
    let open = snapshot.incidents.iter().filter(|i| i.is_open()).count();
    let _ = writeln!(out, "pulse_open_incidents {open}");

    header(
        &mut out,
        "pulse_incidents_resolved_total",
        "Incidents resolved.",
        "counter",
    );
    let _ = writeln!(
        out,
        "pulse_incidents_resolved_total {}",
        snapshot.metrics.incidents_resolved
    );

    out
}
