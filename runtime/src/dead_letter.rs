//! Dead-letter publishing for messages that exhausted their retries.
//!
//! The publisher turns a failed message into a [`DeadLetterRecord`], wraps it
//! in an envelope and publishes it to this service's fixed dead-letter topic
//! through the shared producer. The original key is reused so dead letters for
//! one entity stay co-located.
//!
//! A failed dead-letter publish is terminal for the message in this pass: the
//! consumer loop withholds its offset and rewinds, so the message is delivered
//! again rather than silently lost.

use eventline_core::dead_letter::{DEAD_LETTER_VERSION, DeadLetterRecord, UNKEYED_DEAD_LETTER_KEY};
use eventline_core::envelope::Envelope;
use eventline_core::environment::{Clock, SystemClock};
use eventline_core::handler::HandlerError;
use eventline_core::producer::{Delivery, EventProducer, EventProducerExt, PublishError};
use eventline_core::shutdown::ShutdownSignal;
use eventline_core::source::InboundMessage;
use std::sync::Arc;

/// Publishes dead-letter records to a fixed topic.
#[derive(Clone)]
pub struct DeadLetterPublisher {
    producer: Arc<dyn EventProducer>,
    topic: String,
    producer_name: String,
    clock: Arc<dyn Clock>,
}

impl DeadLetterPublisher {
    /// Create a publisher for `topic`.
    ///
    /// `producer_name` becomes the `producer` field of dead-letter envelopes.
    #[must_use]
    pub fn new(
        producer: Arc<dyn EventProducer>,
        topic: impl Into<String>,
        producer_name: impl Into<String>,
    ) -> Self {
        Self {
            producer,
            topic: topic.into(),
            producer_name: producer_name.into(),
            clock: Arc::new(SystemClock),
        }
    }

    /// Use `clock` for failure timestamps.
    #[must_use]
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// The dead-letter topic.
    #[must_use]
    pub fn topic(&self) -> &str {
        &self.topic
    }

    /// Build the record for `message` failing with `error` after `attempts`.
    #[must_use]
    pub fn record_for(
        &self,
        message: &InboundMessage,
        error: &HandlerError,
        attempts: u32,
    ) -> DeadLetterRecord {
        DeadLetterRecord {
            original_topic: message.topic.clone(),
            key: message.key_or_empty().to_string(),
            raw_payload: message.payload.clone().unwrap_or_default(),
            error_type: error.kind().to_string(),
            error_message: error.to_string(),
            failed_at_utc: self.clock.now(),
            partition: message.partition,
            offset: message.offset,
            attempts,
        }
    }

    /// Publish a dead letter for `message`.
    ///
    /// # Errors
    ///
    /// Returns the [`PublishError`] from the producer, or
    /// [`PublishError::Cancelled`] if `shutdown` fires first.
    pub async fn send_to_dlq(
        &self,
        message: &InboundMessage,
        error: &HandlerError,
        attempts: u32,
        shutdown: &ShutdownSignal,
    ) -> Result<Delivery, PublishError> {
        let record = self.record_for(message, error, attempts);
        let key = match message.key.as_deref() {
            Some(key) if !key.trim().is_empty() => key,
            _ => UNKEYED_DEAD_LETTER_KEY,
        };

        let envelope = Envelope::builder(self.topic.as_str(), key, record)
            .version(DEAD_LETTER_VERSION)
            .producer(self.producer_name.as_str())
            .occurred_at(self.clock.now())
            .build()
            .map_err(|source| PublishError::InvalidEnvelope {
                topic: self.topic.clone(),
                source,
            })?;

        let result = tokio::select! {
            biased;
            () = shutdown.cancelled() => Err(PublishError::Cancelled { topic: self.topic.clone() }),
            result = self.producer.publish(&self.topic, key, &envelope) => result,
        };

        match &result {
            Ok(delivery) => {
                tracing::warn!(
                    original_topic = %message.topic,
                    partition = message.partition,
                    offset = message.offset,
                    key = %key,
                    dlq_topic = %self.topic,
                    dlq_partition = delivery.partition,
                    dlq_offset = delivery.offset,
                    error_type = error.kind(),
                    attempts,
                    "Message moved to dead-letter topic"
                );
            },
            Err(e) => {
                tracing::error!(
                    original_topic = %message.topic,
                    partition = message.partition,
                    offset = message.offset,
                    key = %key,
                    dlq_topic = %self.topic,
                    error = %e,
                    "Failed to publish dead letter"
                );
            },
        }

        result
    }
}

impl std::fmt::Debug for DeadLetterPublisher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DeadLetterPublisher")
            .field("topic", &self.topic)
            .field("producer_name", &self.producer_name)
            .finish_non_exhaustive()
    }
}
