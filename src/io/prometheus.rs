//! Prometheus metrics HTTP endpoint
//!
//! Exposes tracker metrics in Prometheus text format at /metrics.
//! Uses hyper for the HTTP server.

use crate::infra::metrics::{Metrics, MetricsSummary, FIX_LATENCY_BOUNDS_MS, NUM_BUCKETS};
use bytes::Bytes;
use http_body_util::Full;
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper::{Method, Request, Response, StatusCode};
use hyper_util::rt::TokioIo;
use std::convert::Infallible;
use std::fmt::Write;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::sync::watch;
use tracing::{error, info};

/// Prometheus metric type
enum MetricType {
    Counter,
    Gauge,
}

impl MetricType {
    fn as_str(&self) -> &'static str {
        match self {
            MetricType::Counter => "counter",
            MetricType::Gauge => "gauge",
        }
    }
}

/// Write a simple metric (counter or gauge) with zone label
fn write_metric(output: &mut String, name: &str, help: &str, typ: MetricType, zone: &str, val: u64) {
    let _ = writeln!(output, "# HELP {name} {help}");
    let _ = writeln!(output, "# TYPE {name} {}", typ.as_str());
    let _ = writeln!(output, "{name}{{zone=\"{zone}\"}} {val}");
}

/// Write a histogram metric with buckets, sum, and count
fn write_histogram(
    output: &mut String,
    name: &str,
    help: &str,
    zone: &str,
    buckets: &[u64; NUM_BUCKETS],
    sum: u64,
) {
    let _ = writeln!(output, "# HELP {name} {help}");
    let _ = writeln!(output, "# TYPE {name} histogram");

    let mut cumulative = 0u64;
    for (i, &bound) in FIX_LATENCY_BOUNDS_MS.iter().enumerate() {
        cumulative += buckets[i];
        let _ = writeln!(output, "{name}_bucket{{zone=\"{zone}\",le=\"{bound}\"}} {cumulative}");
    }
    cumulative += buckets[NUM_BUCKETS - 1];
    let _ = writeln!(output, "{name}_bucket{{zone=\"{zone}\",le=\"+Inf\"}} {cumulative}");

    let count: u64 = buckets.iter().sum();
    let _ = writeln!(output, "{name}_sum{{zone=\"{zone}\"}} {sum}");
    let _ = writeln!(output, "{name}_count{{zone=\"{zone}\"}} {count}");
}

/// Format metrics in Prometheus text exposition format
pub fn format_prometheus_metrics(metrics: &Metrics, zone: &str) -> String {
    let summary = metrics.report();
    let mut output = String::with_capacity(4096);

    write_transition_metrics(&mut output, zone, &summary);
    write_cycle_metrics(&mut output, zone, &summary);
    write_zone_metrics(&mut output, zone, &summary);

    output
}

fn write_transition_metrics(output: &mut String, zone: &str, summary: &MetricsSummary) {
    let counters = [
        ("geofence_exits_total", "EXIT transitions received", summary.exits_received),
        ("geofence_enters_total", "ENTER transitions received", summary.enters_received),
        (
            "geofence_transitions_discarded_total",
            "Transition payloads discarded as undecodable or errored",
            summary.transitions_discarded,
        ),
    ];
    for (name, help, val) in counters {
        write_metric(output, name, help, MetricType::Counter, zone, val);
    }
}

fn write_cycle_metrics(output: &mut String, zone: &str, summary: &MetricsSummary) {
    let counters = [
        ("geofence_cycles_started_total", "Re-centering cycles started", summary.cycles_started),
        (
            "geofence_cycles_coalesced_total",
            "Exit signals absorbed into a running cycle",
            summary.cycles_coalesced,
        ),
        (
            "geofence_cycles_superseded_total",
            "Stalled fix requests abandoned for a new cycle",
            summary.cycles_superseded,
        ),
        (
            "geofence_permission_denied_total",
            "Cycles aborted without fine location permission",
            summary.permission_denied,
        ),
        (
            "geofence_settings_failed_total",
            "Cycles aborted by the location settings check",
            summary.settings_failed,
        ),
        (
            "geofence_location_requests_failed_total",
            "Location update subscriptions refused by the platform",
            summary.location_requests_failed,
        ),
        ("geofence_fixes_total", "Location fixes delivered", summary.fixes_delivered),
    ];
    for (name, help, val) in counters {
        write_metric(output, name, help, MetricType::Counter, zone, val);
    }

    write_histogram(
        output,
        "geofence_time_to_fix_ms",
        "Time from cycle start to fix delivery in milliseconds",
        zone,
        &summary.fix_latency_buckets,
        summary.fix_latency_sum_ms,
    );
    write_metric(
        output,
        "geofence_fix_workers",
        "Fix workers currently alive",
        MetricType::Gauge,
        zone,
        summary.live_workers,
    );
}

fn write_zone_metrics(output: &mut String, zone: &str, summary: &MetricsSummary) {
    let counters = [
        ("geofence_zone_installs_total", "Successful zone installs", summary.zone_installs_ok),
        (
            "geofence_zone_install_failures_total",
            "Failed zone installs",
            summary.zone_installs_failed,
        ),
        ("geofence_zone_removes_total", "Successful zone removals", summary.zone_removes_ok),
        (
            "geofence_zone_remove_failures_total",
            "Failed zone removals",
            summary.zone_removes_failed,
        ),
    ];
    for (name, help, val) in counters {
        write_metric(output, name, help, MetricType::Counter, zone, val);
    }
}

/// Handle HTTP requests
async fn handle_request(
    req: Request<hyper::body::Incoming>,
    metrics: Arc<Metrics>,
    zone: Arc<String>,
) -> Result<Response<Full<Bytes>>, Infallible> {
    let response = match (req.method(), req.uri().path()) {
        (&Method::GET, "/metrics") => {
            let body = format_prometheus_metrics(&metrics, &zone);
            Response::builder()
                .status(StatusCode::OK)
                .header("Content-Type", "text/plain; version=0.0.4; charset=utf-8")
                .body(Full::new(Bytes::from(body)))
        }
        (&Method::GET, "/health") => {
            Response::builder().status(StatusCode::OK).body(Full::new(Bytes::from("ok")))
        }
        _ => Response::builder()
            .status(StatusCode::NOT_FOUND)
            .body(Full::new(Bytes::from("Not Found"))),
    };

    Ok(response.unwrap_or_else(|_| Response::new(Full::new(Bytes::new()))))
}

/// Start the Prometheus metrics HTTP server
pub async fn start_metrics_server(
    port: u16,
    metrics: Arc<Metrics>,
    zone: String,
    mut shutdown: watch::Receiver<bool>,
) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    let listener = TcpListener::bind(addr).await?;
    let zone = Arc::new(zone);

    info!(port = %port, "prometheus_metrics_server_started");

    loop {
        tokio::select! {
            result = listener.accept() => {
                match result {
                    Ok((stream, _addr)) => {
                        let io = TokioIo::new(stream);
                        let metrics = metrics.clone();
                        let zone = zone.clone();

                        tokio::spawn(async move {
                            let service = service_fn(move |req| {
                                let metrics = metrics.clone();
                                let zone = zone.clone();
                                async move { handle_request(req, metrics, zone).await }
                            });

                            if let Err(e) = http1::Builder::new()
                                .serve_connection(io, service)
                                .await
                            {
                                error!(error = %e, "prometheus_http_error");
                            }
                        });
                    }
                    Err(e) => {
                        error!(error = %e, "prometheus_accept_error");
                    }
                }
            }
            _ = shutdown.changed() => {
                if *shutdown.borrow() {
                    info!("prometheus_metrics_server_shutdown");
                    return Ok(());
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_prometheus_metrics() {
        let metrics = Metrics::new();
        metrics.record_exit_received();
        metrics.record_cycle_started();
        metrics.record_fix_delivered(700);
        metrics.record_zone_install(true);

        let output = format_prometheus_metrics(&metrics, "geo_id");

        assert!(output.contains("geofence_exits_total{zone=\"geo_id\"} 1"));
        assert!(output.contains("geofence_cycles_started_total{zone=\"geo_id\"} 1"));
        assert!(output.contains("geofence_time_to_fix_ms_bucket{zone=\"geo_id\",le=\"1000\"} 1"));
        assert!(output.contains("geofence_time_to_fix_ms_count{zone=\"geo_id\"} 1"));
        assert!(output.contains("geofence_zone_installs_total{zone=\"geo_id\"} 1"));
        assert!(output.contains("geofence_fix_workers{zone=\"geo_id\"} 0"));
    }

    #[test]
    fn test_histogram_sum_is_exact() {
        let metrics = Metrics::new();
        metrics.record_fix_delivered(700);
        metrics.record_fix_delivered(301);

        let output = format_prometheus_metrics(&metrics, "geo_id");

        // Average is 500 ms, but the sum must not be rebuilt from it
        assert!(output.contains("geofence_time_to_fix_ms_sum{zone=\"geo_id\"} 1001"));
        assert!(output.contains("geofence_time_to_fix_ms_count{zone=\"geo_id\"} 2"));
    }
}
