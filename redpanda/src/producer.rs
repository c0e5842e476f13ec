//! Kafka-backed [`EventProducer`].

use crate::ClientError;
use eventline_core::config::ProducerSettings;
use eventline_core::producer::{Delivery, EventProducer, PublishError};
use rdkafka::config::ClientConfig;
use rdkafka::producer::{FutureProducer, FutureRecord, Producer};
use rdkafka::util::Timeout;
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

/// How long `send` may wait for room in the local queue.
const QUEUE_TIMEOUT: Duration = Duration::from_secs(1);

/// Default flush grace period on close.
pub const DEFAULT_FLUSH_TIMEOUT: Duration = Duration::from_secs(3);

/// Client settings applied to every producer.
///
/// Idempotent, all-replica acknowledgement, a short linger for batching,
/// and timeouts tight enough that a dead broker surfaces as an error in
/// about a second instead of stalling the caller.
const PRODUCER_SETTINGS: &[(&str, &str)] = &[
    ("acks", "all"),
    ("enable.idempotence", "true"),
    ("message.send.max.retries", "3"),
    ("retry.backoff.ms", "100"),
    ("retry.backoff.max.ms", "100"),
    ("linger.ms", "5"),
    ("message.timeout.ms", "1000"),
    ("request.timeout.ms", "800"),
    ("socket.timeout.ms", "800"),
];

/// Shared Kafka producer.
///
/// Build one per process and share it as `Arc<dyn EventProducer>`.
///
/// # Shutdown
///
/// [`KafkaEventProducer::close`] flushes buffered messages, waiting up to the
/// flush timeout. A producer dropped without `close` flushes the same way.
/// Messages still in flight after the grace period are dropped and logged.
///
/// # Example
///
/// ```no_run
/// use eventline_redpanda::KafkaEventProducer;
///
/// # fn example() -> Result<(), Box<dyn std::error::Error>> {
/// let producer = KafkaEventProducer::builder()
///     .brokers("localhost:9092")
///     .client_id("order-service")
///     .build()?;
/// # Ok(())
/// # }
/// ```
pub struct KafkaEventProducer {
    producer: FutureProducer,
    client_id: String,
    flush_timeout: Duration,
    closed: AtomicBool,
}

impl KafkaEventProducer {
    /// Create a builder.
    #[must_use]
    pub fn builder() -> KafkaEventProducerBuilder {
        KafkaEventProducerBuilder::default()
    }

    /// Create a producer from the `[producer]` configuration section.
    ///
    /// # Errors
    ///
    /// Returns [`ClientError`] if the client cannot be created.
    pub fn from_settings(settings: &ProducerSettings) -> Result<Self, ClientError> {
        Self::builder()
            .brokers(&settings.bootstrap_servers)
            .client_id(&settings.client_id)
            .flush_timeout(settings.flush_timeout())
            .build()
    }

    /// The client id, also used as the envelope `producer` name.
    #[must_use]
    pub fn client_id(&self) -> &str {
        &self.client_id
    }

    /// Flush and stop. Returns the number of messages that were dropped.
    ///
    /// Blocks for up to the flush timeout; call it from a blocking context
    /// (e.g. `tokio::task::spawn_blocking`). Idempotent.
    pub fn close(&self) -> usize {
        if self.closed.swap(true, Ordering::SeqCst) {
            return 0;
        }
        self.flush()
    }

    fn flush(&self) -> usize {
        if let Err(e) = self.producer.flush(Timeout::After(self.flush_timeout)) {
            tracing::warn!(
                client_id = %self.client_id,
                error = %e,
                "Producer flush did not complete"
            );
        }

        let remaining = usize::try_from(self.producer.in_flight_count()).unwrap_or(0);
        if remaining > 0 {
            tracing::warn!(
                client_id = %self.client_id,
                in_flight = remaining,
                flush_timeout_ms = self.flush_timeout.as_millis(),
                "Producer closed with undelivered messages"
            );
        } else {
            tracing::info!(client_id = %self.client_id, "Producer flushed and closed");
        }
        remaining
    }
}

impl Drop for KafkaEventProducer {
    fn drop(&mut self) {
        if !self.closed.swap(true, Ordering::SeqCst) {
            self.flush();
        }
    }
}

impl std::fmt::Debug for KafkaEventProducer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KafkaEventProducer")
            .field("client_id", &self.client_id)
            .field("flush_timeout", &self.flush_timeout)
            .field("closed", &self.closed.load(Ordering::SeqCst))
            .finish_non_exhaustive()
    }
}

impl EventProducer for KafkaEventProducer {
    fn send(
        &self,
        topic: &str,
        key: &str,
        payload: Vec<u8>,
    ) -> Pin<Box<dyn Future<Output = Result<Delivery, PublishError>> + Send + '_>> {
        let topic = topic.to_string();
        let key = key.to_string();

        Box::pin(async move {
            if self.closed.load(Ordering::SeqCst) {
                return Err(PublishError::Transport {
                    topic,
                    reason: "producer is closed".to_string(),
                });
            }

            let started = Instant::now();
            let record = FutureRecord::to(&topic).key(&key).payload(&payload);

            match self.producer.send(record, Timeout::After(QUEUE_TIMEOUT)).await {
                Ok((partition, offset)) => {
                    metrics::counter!("eventline_producer_messages_published_total").increment(1);
                    metrics::histogram!("eventline_producer_publish_duration_seconds")
                        .record(started.elapsed().as_secs_f64());
                    tracing::debug!(
                        topic = %topic,
                        key = %key,
                        partition,
                        offset,
                        "Message delivered"
                    );
                    Ok(Delivery { partition, offset })
                },
                Err((kafka_error, _)) => {
                    metrics::counter!("eventline_producer_publish_errors_total").increment(1);
                    tracing::error!(
                        topic = %topic,
                        key = %key,
                        error = %kafka_error,
                        "Failed to deliver message"
                    );
                    Err(PublishError::Transport {
                        topic,
                        reason: kafka_error.to_string(),
                    })
                },
            }
        })
    }
}

/// Builder for [`KafkaEventProducer`].
#[derive(Default)]
pub struct KafkaEventProducerBuilder {
    brokers: Option<String>,
    client_id: Option<String>,
    flush_timeout: Option<Duration>,
    overrides: Vec<(String, String)>,
}

impl KafkaEventProducerBuilder {
    /// Set the broker addresses (comma separated).
    #[must_use]
    pub fn brokers(mut self, brokers: impl Into<String>) -> Self {
        self.brokers = Some(brokers.into());
        self
    }

    /// Set the client id.
    #[must_use]
    pub fn client_id(mut self, client_id: impl Into<String>) -> Self {
        self.client_id = Some(client_id.into());
        self
    }

    /// Set the flush grace period used on close.
    ///
    /// Default: 3 seconds
    #[must_use]
    pub const fn flush_timeout(mut self, timeout: Duration) -> Self {
        self.flush_timeout = Some(timeout);
        self
    }

    /// Override a raw client setting.
    #[must_use]
    pub fn set(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.overrides.push((key.into(), value.into()));
        self
    }

    /// Build the producer.
    ///
    /// # Errors
    ///
    /// Returns [`ClientError::MissingSetting`] if brokers or client id are
    /// unset, or [`ClientError::Create`] if the client rejects the settings.
    pub fn build(self) -> Result<KafkaEventProducer, ClientError> {
        let brokers = self
            .brokers
            .filter(|b| !b.trim().is_empty())
            .ok_or(ClientError::MissingSetting("bootstrap.servers"))?;
        let client_id = self
            .client_id
            .filter(|c| !c.trim().is_empty())
            .ok_or(ClientError::MissingSetting("client.id"))?;

        let mut config = ClientConfig::new();
        config
            .set("bootstrap.servers", &brokers)
            .set("client.id", &client_id);
        for (key, value) in PRODUCER_SETTINGS {
            config.set(*key, *value);
        }
        for (key, value) in &self.overrides {
            config.set(key, value);
        }

        let producer: FutureProducer = config
            .create()
            .map_err(|e| ClientError::Create(format!("Failed to create producer: {e}")))?;

        let flush_timeout = self.flush_timeout.unwrap_or(DEFAULT_FLUSH_TIMEOUT);
        tracing::info!(
            brokers = %brokers,
            client_id = %client_id,
            acks = "all",
            idempotence = true,
            flush_timeout_ms = flush_timeout.as_millis(),
            "KafkaEventProducer created"
        );

        Ok(KafkaEventProducer {
            producer,
            client_id,
            flush_timeout,
            closed: AtomicBool::new(false),
        })
    }
}
