use std::net::SocketAddr;

use crate::wire::Request;

// ── RED metrics (request-driven) ────────────────────────────────

/// Counter: wire requests handled. Labels: op, status.
pub const REQUESTS_TOTAL: &str = "venuelock_requests_total";

/// Histogram: wire request latency in seconds. Labels: op.
pub const REQUEST_DURATION_SECONDS: &str = "venuelock_request_duration_seconds";

// ── Domain metrics ──────────────────────────────────────────────

/// Counter: committed status changes. Labels: from, to.
pub const TRANSITIONS_TOTAL: &str = "venuelock_transitions_total";

/// Counter: business rejections returned by the engine. Labels: kind.
pub const REJECTIONS_TOTAL: &str = "venuelock_rejections_total";

/// Counter: availability evaluations. Labels: result (free, contested, locked).
pub const AVAILABILITY_CHECKS_TOTAL: &str = "venuelock_availability_checks_total";

/// Counter: unpaid holds expired by the reaper.
pub const REAPED_TOTAL: &str = "venuelock_reaped_total";

// ── USE metrics (resource utilization) ──────────────────────────

/// Gauge: active TCP connections.
pub const CONNECTIONS_ACTIVE: &str = "venuelock_connections_active";

/// Counter: total connections accepted.
pub const CONNECTIONS_TOTAL: &str = "venuelock_connections_total";

/// Counter: connections rejected due to limit.
pub const CONNECTIONS_REJECTED_TOTAL: &str = "venuelock_connections_rejected_total";

/// Histogram: WAL group-commit flush duration in seconds.
pub const WAL_FLUSH_DURATION_SECONDS: &str = "venuelock_wal_flush_duration_seconds";

/// Histogram: WAL group-commit batch size (records per flush).
pub const WAL_FLUSH_BATCH_SIZE: &str = "venuelock_wal_flush_batch_size";

/// Install Prometheus metrics exporter on the given port. No-op if port is None.
pub fn init(port: Option<u16>) {
    let Some(port) = port else { return };
    let addr: SocketAddr = ([0, 0, 0, 0], port).into();
    match metrics_exporter_prometheus::PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()
    {
        Ok(()) => tracing::info!("metrics endpoint: http://0.0.0.0:{port}/metrics"),
        Err(e) => tracing::error!("failed to install Prometheus exporter on port {port}: {e}"),
    }
}

/// Map a request to a short label for metrics.
pub fn op_label(req: &Request) -> &'static str {
    match req {
        Request::Create { .. } => "create",
        Request::Get { .. } => "get",
        Request::List { .. } => "list",
        Request::Availability { .. } => "availability",
        Request::Transition { .. } => "transition",
        Request::Cancel { .. } => "cancel",
        Request::CheckIn { .. } => "check_in",
        Request::CheckOut { .. } => "check_out",
        Request::NoShow { .. } => "no_show",
        Request::RestartHold { .. } => "restart_hold",
        Request::RecordPayment { .. } => "record_payment",
        Request::VerifyPayment { .. } => "verify_payment",
        Request::CanRebook { .. } => "can_rebook",
        Request::RequestRebooking { .. } => "request_rebooking",
        Request::DecideRebooking { .. } => "decide_rebooking",
        Request::Note { .. } => "note",
        Request::Listen { .. } => "listen",
        Request::Unlisten => "unlisten",
    }
}
