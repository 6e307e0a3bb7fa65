use std::net::SocketAddr;

use crate::model::{Rejection, SkipReason};

// ── Decision metrics ────────────────────────────────────────────

/// Counter: conflict validations run. Labels: scope (single, series).
pub const VALIDATIONS_TOTAL: &str = "timetable_validations_total";

/// Counter: requests rejected by a conflict. Labels: stage (preflight, final, store).
pub const CONFLICTS_TOTAL: &str = "timetable_conflicts_total";

/// Counter: storage uniqueness vetoes (the race backstop firing).
pub const DUPLICATES_TOTAL: &str = "timetable_duplicates_total";

/// Counter: bookings written.
pub const BOOKINGS_COMMITTED_TOTAL: &str = "timetable_bookings_committed_total";

/// Counter: series occurrences not written. Labels: reason.
pub const SERIES_SKIPPED_TOTAL: &str = "timetable_series_skipped_total";

/// Counter: failed best-effort owner ledger updates.
pub const LEDGER_FAILURES_TOTAL: &str = "timetable_ledger_failures_total";

/// Histogram: end-to-end scheduling latency in seconds. Labels: op.
pub const SCHEDULE_DURATION_SECONDS: &str = "timetable_schedule_duration_seconds";

// ── Storage metrics ─────────────────────────────────────────────

/// Histogram: journal group-commit flush duration in seconds.
pub const JOURNAL_FLUSH_DURATION_SECONDS: &str = "timetable_journal_flush_duration_seconds";

/// Histogram: journal group-commit batch size (records per flush).
pub const JOURNAL_FLUSH_BATCH_SIZE: &str = "timetable_journal_flush_batch_size";

/// Install the Prometheus exporter on the given port. No-op if port is None.
pub fn init(port: Option<u16>) -> Result<(), metrics_exporter_prometheus::BuildError> {
    let Some(port) = port else { return Ok(()) };
    let addr: SocketAddr = ([0, 0, 0, 0], port).into();
    metrics_exporter_prometheus::PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()?;
    tracing::info!("metrics endpoint: http://0.0.0.0:{port}/metrics");
    Ok(())
}

/// Stage label for a rejection.
pub fn stage_label(rejection: &Rejection) -> &'static str {
    match rejection {
        Rejection::Conflicts(_) => "preflight",
        Rejection::LateConflicts(_) => "final",
        Rejection::Duplicate(_) => "store",
    }
}

pub fn skip_label(reason: &SkipReason) -> &'static str {
    match reason {
        SkipReason::LateConflict { .. } => "late_conflict",
        SkipReason::Duplicate { .. } => "duplicate",
        SkipReason::Failed { .. } => "failed",
        SkipReason::Cancelled => "cancelled",
    }
}

/// Count a rejection under its stage label.
pub fn record_rejection(rejection: &Rejection) {
    metrics::counter!(CONFLICTS_TOTAL, "stage" => stage_label(rejection)).increment(1);
    if matches!(rejection, Rejection::Duplicate(_)) {
        metrics::counter!(DUPLICATES_TOTAL).increment(1);
    }
}
