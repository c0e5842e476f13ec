//! Publishing from an application write path.
//!
//! A service that changes local state and then announces it calls
//! [`publish_after_write`] after its own write has succeeded. If the publish
//! fails the caller gets an [`EventNotDelivered`] that maps to a retryable
//! "service unavailable" answer for its own client.
//!
//! # Dual-Write Gap
//!
//! The local write and the publish are not atomic. When the publish fails the
//! state change is already persisted and no event describes it; there is no
//! outbox to replay from. Callers that retry the whole request must make the
//! write idempotent, because the retry repeats it.

use eventline_core::envelope::Envelope;
use eventline_core::producer::{Delivery, EventProducer, EventProducerExt, PublishError};
use serde::Serialize;
use std::time::Duration;
use thiserror::Error;
use uuid::Uuid;

/// Suggested client back-off after a failed publish.
pub const RETRY_AFTER: Duration = Duration::from_secs(5);

/// An event that was persisted locally but not published.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("Event {event_id} ({event_type}) for key '{key}' was not delivered to '{topic}': {source}")]
pub struct EventNotDelivered {
    /// Target topic
    pub topic: String,
    /// Ordering key
    pub key: String,
    /// Id of the undelivered event
    pub event_id: Uuid,
    /// Type of the undelivered event
    pub event_type: String,
    /// Why the publish failed
    pub source: PublishError,
}

impl EventNotDelivered {
    /// HTTP status a front end should answer with (503 Service Unavailable).
    #[must_use]
    pub const fn status_code(&self) -> u16 {
        503
    }

    /// Value for a `Retry-After` hint.
    #[must_use]
    pub const fn retry_after(&self) -> Duration {
        RETRY_AFTER
    }
}

/// Publish `envelope` to `topic` under the envelope's key.
///
/// # Errors
///
/// Returns [`EventNotDelivered`] wrapping the producer's [`PublishError`].
pub async fn publish_after_write<P, T>(
    producer: &P,
    topic: &str,
    envelope: &Envelope<T>,
) -> Result<Delivery, EventNotDelivered>
where
    P: EventProducer + ?Sized,
    T: Serialize,
{
    match producer.publish(topic, envelope.key(), envelope).await {
        Ok(delivery) => {
            tracing::info!(
                topic = %topic,
                key = %envelope.key(),
                event_id = %envelope.event_id(),
                event_type = %envelope.event_type(),
                partition = delivery.partition,
                offset = delivery.offset,
                "Event published"
            );
            Ok(delivery)
        },
        Err(source) => {
            tracing::error!(
                topic = %topic,
                key = %envelope.key(),
                event_id = %envelope.event_id(),
                event_type = %envelope.event_type(),
                error = %source,
                "Event not delivered after local write"
            );
            Err(EventNotDelivered {
                topic: topic.to_string(),
                key: envelope.key().to_string(),
                event_id: envelope.event_id(),
                event_type: envelope.event_type().to_string(),
                source,
            })
        },
    }
}
