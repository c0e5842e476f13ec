//! Prometheus metrics for the pipeline.
//!
//! Components record through the `metrics` facade, so counters are free when
//! no recorder is installed. A service that wants a scrape endpoint starts a
//! [`MetricsServer`] once at startup.
//!
//! # Example
//!
//! ```rust,no_run
//! use eventline_runtime::metrics::MetricsServer;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let mut server = MetricsServer::new("0.0.0.0:9090".parse()?);
//! server.start()?;
//!
//! // Metrics available at http://localhost:9090/metrics
//! # Ok(())
//! # }
//! ```

use metrics::{describe_counter, describe_histogram};
use metrics_exporter_prometheus::{Matcher, PrometheusBuilder, PrometheusHandle};
use std::net::SocketAddr;
use std::time::Duration;
use thiserror::Error;

pub use metrics::{counter, histogram};

/// Errors from metrics operations.
#[derive(Error, Debug)]
pub enum MetricsError {
    /// Failed to build metrics exporter
    #[error("Failed to build metrics exporter: {0}")]
    Build(String),
    /// Failed to install metrics recorder
    #[error("Failed to install metrics recorder: {0}")]
    Install(String),
}

/// Prometheus scrape endpoint.
pub struct MetricsServer {
    addr: SocketAddr,
    handle: Option<PrometheusHandle>,
}

impl MetricsServer {
    /// Create a server for `addr` (e.g. `0.0.0.0:9090`).
    #[must_use]
    pub const fn new(addr: SocketAddr) -> Self {
        Self { addr, handle: None }
    }

    /// Install the global recorder and serve `/metrics` on a background task.
    ///
    /// Must be called from within a Tokio runtime.
    ///
    /// # Errors
    ///
    /// Returns [`MetricsError::Build`] if the exporter cannot be built, or
    /// [`MetricsError::Install`] if another recorder is already installed.
    pub fn start(&mut self) -> Result<(), MetricsError> {
        register_metrics();

        let (recorder, exporter) = PrometheusBuilder::new()
            .with_http_listener(self.addr)
            .set_buckets_for_metric(
                Matcher::Suffix("duration_seconds".to_string()),
                &[0.001, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0],
            )
            .map_err(|e| MetricsError::Build(e.to_string()))?
            .build()
            .map_err(|e| MetricsError::Build(e.to_string()))?;

        let handle = recorder.handle();
        metrics::set_global_recorder(recorder).map_err(|e| MetricsError::Install(e.to_string()))?;

        let addr = self.addr;
        tokio::spawn(async move {
            if exporter.await.is_err() {
                tracing::error!(addr = %addr, "Metrics endpoint stopped");
            }
        });

        self.handle = Some(handle);
        tracing::info!(addr = %self.addr, "Metrics available at http://{}/metrics", self.addr);
        Ok(())
    }

    /// Render current metrics in Prometheus text format.
    ///
    /// Returns `None` if the server hasn't been started.
    #[must_use]
    pub fn render(&self) -> Option<String> {
        self.handle.as_ref().map(PrometheusHandle::render)
    }
}

impl std::fmt::Debug for MetricsServer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MetricsServer")
            .field("addr", &self.addr)
            .field("started", &self.handle.is_some())
            .finish()
    }
}

/// Register all metric descriptions.
fn register_metrics() {
    describe_counter!(
        "eventline_consumer_messages_polled_total",
        "Messages pulled from the broker"
    );
    describe_counter!(
        "eventline_consumer_messages_handled_total",
        "Messages a handler processed successfully"
    );
    describe_counter!(
        "eventline_consumer_messages_skipped_total",
        "Messages skipped without a handler (unmapped topic or empty payload)"
    );
    describe_counter!(
        "eventline_consumer_messages_dead_lettered_total",
        "Messages moved to the dead-letter topic"
    );
    describe_counter!(
        "eventline_consumer_messages_withheld_total",
        "Messages whose offset was withheld after a dead-letter failure"
    );
    describe_counter!(
        "eventline_consumer_poll_errors_total",
        "Failed poll calls"
    );
    describe_counter!(
        "eventline_consumer_commit_failures_total",
        "Failed offset commits"
    );
    describe_histogram!(
        "eventline_handler_duration_seconds",
        "Time from first handler attempt to final outcome, retries included"
    );

    describe_counter!("eventline_retry_attempts_total", "Handler attempts");
    describe_counter!(
        "eventline_retry_exhausted_total",
        "Operations that failed every attempt"
    );

    describe_counter!(
        "eventline_producer_messages_published_total",
        "Messages acknowledged by the broker"
    );
    describe_counter!(
        "eventline_producer_publish_errors_total",
        "Publish attempts that failed"
    );
    describe_histogram!(
        "eventline_producer_publish_duration_seconds",
        "Time until broker acknowledgement"
    );
}

/// Consumer loop metrics recorder.
pub struct ConsumerMetrics;

impl ConsumerMetrics {
    /// Record a message pulled from the broker.
    pub fn record_polled() {
        counter!("eventline_consumer_messages_polled_total").increment(1);
    }

    /// Record a successful handler run.
    pub fn record_handled(duration: Duration) {
        counter!("eventline_consumer_messages_handled_total").increment(1);
        histogram!("eventline_handler_duration_seconds").record(duration.as_secs_f64());
    }

    /// Record a skipped message.
    pub fn record_skipped() {
        counter!("eventline_consumer_messages_skipped_total").increment(1);
    }

    /// Record a dead-lettered message.
    pub fn record_dead_lettered(duration: Duration) {
        counter!("eventline_consumer_messages_dead_lettered_total").increment(1);
        histogram!("eventline_handler_duration_seconds").record(duration.as_secs_f64());
    }

    /// Record a withheld offset.
    pub fn record_withheld() {
        counter!("eventline_consumer_messages_withheld_total").increment(1);
    }

    /// Record a failed poll.
    pub fn record_poll_error() {
        counter!("eventline_consumer_poll_errors_total").increment(1);
    }

    /// Record a failed commit.
    pub fn record_commit_failure() {
        counter!("eventline_consumer_commit_failures_total").increment(1);
    }
}

/// Retry metrics recorder.
pub struct RetryMetrics;

impl RetryMetrics {
    /// Record an attempt.
    pub fn record_attempt() {
        counter!("eventline_retry_attempts_total").increment(1);
    }

    /// Record exhausted retries.
    pub fn record_exhausted() {
        counter!("eventline_retry_exhausted_total").increment(1);
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn server_starts_unstarted() {
        let server = MetricsServer::new("127.0.0.1:0".parse().unwrap());
        assert!(server.render().is_none());
    }

    #[tokio::test]
    async fn started_server_renders_recorded_metrics() {
        let mut server = MetricsServer::new("127.0.0.1:0".parse().unwrap());
        server.start().unwrap();

        ConsumerMetrics::record_polled();
        RetryMetrics::record_exhausted();

        let rendered = server.render().unwrap();
        assert!(rendered.contains("eventline_consumer_messages_polled_total"));
        assert!(rendered.contains("eventline_retry_exhausted_total"));
        assert!(format!("{server:?}").contains("started: true"));
    }

    #[test]
    fn recording_without_a_recorder_is_a_no_op() {
        ConsumerMetrics::record_polled();
        ConsumerMetrics::record_handled(Duration::from_millis(3));
        ConsumerMetrics::record_commit_failure();
        RetryMetrics::record_attempt();
        RetryMetrics::record_exhausted();
    }
}
