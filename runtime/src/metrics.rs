//! Metric names and Prometheus rendering.
//!
//! Metrics are recorded through the `metrics` facade everywhere in this
//! crate; nothing is exported until a recorder is installed. Applications
//! that want Prometheus text call [`MetricsRecorder::install`] once and
//! serve [`MetricsRecorder::render`] however they like.

use metrics::describe_counter;
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use thiserror::Error;

/// Transitions acknowledged by the backing store (label: `kind`)
pub const TRANSITIONS_APPLIED: &str = "desk.transitions.applied";
/// Transitions refused or failed (labels: `kind`, `error`)
pub const TRANSITIONS_REJECTED: &str = "desk.transitions.rejected";
/// Notification writes that failed after a committed transition
pub const NOTIFICATIONS_LOST: &str = "desk.notifications.lost";
/// Feed refresh results applied
pub const FEED_REFRESHES: &str = "desk.feed.refreshes";
/// Feed refreshes that failed
pub const FEED_REFRESH_FAILURES: &str = "desk.feed.refresh_failures";
/// Effects started by a store (label: `type`)
pub const STORE_EFFECTS: &str = "desk.store.effects";

/// Errors from metrics operations.
#[derive(Error, Debug)]
pub enum MetricsError {
    /// Failed to install metrics recorder
    #[error("Failed to install metrics recorder: {0}")]
    Install(String),
}

/// Installed Prometheus recorder.
pub struct MetricsRecorder {
    handle: PrometheusHandle,
}

impl MetricsRecorder {
    /// Install the Prometheus recorder as the global `metrics` recorder.
    ///
    /// # Errors
    ///
    /// Returns [`MetricsError::Install`] if another recorder is already
    /// installed.
    pub fn install() -> Result<Self, MetricsError> {
        let handle = PrometheusBuilder::new()
            .install_recorder()
            .map_err(|e| MetricsError::Install(e.to_string()))?;
        register_metrics();
        tracing::info!("Metrics recorder installed");
        Ok(Self { handle })
    }

    /// Render current metrics in Prometheus text format.
    #[must_use]
    pub fn render(&self) -> String {
        self.handle.render()
    }
}

/// Register all metric descriptions.
fn register_metrics() {
    describe_counter!(
        TRANSITIONS_APPLIED,
        "Reservation transitions acknowledged by the backing store"
    );
    describe_counter!(
        TRANSITIONS_REJECTED,
        "Reservation transitions refused or failed, by error kind"
    );
    describe_counter!(
        NOTIFICATIONS_LOST,
        "Notification writes that failed after the reservation update committed"
    );
    describe_counter!(FEED_REFRESHES, "Notification feed refreshes applied");
    describe_counter!(
        FEED_REFRESH_FAILURES,
        "Notification feed refreshes that failed"
    );
    describe_counter!(STORE_EFFECTS, "Effects started by a store, by type");
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counters_render_in_prometheus_format() {
        let recorder = PrometheusBuilder::new().build_recorder();
        let handle = recorder.handle();

        metrics::with_local_recorder(&recorder, || {
            register_metrics();
            metrics::counter!(NOTIFICATIONS_LOST).increment(2);
        });

        let rendered = handle.render();
        assert!(rendered.contains("desk_notifications_lost 2"), "{rendered}");
    }
}
