//! Producer abstraction for publishing envelopes to the broker.
//!
//! The [`EventProducer`] trait is the transport seam: it moves an already
//! serialized payload to a topic under an ordering key. Implementations own
//! the broker client (idempotence, acks, timeouts, flush on shutdown) and must
//! be safe to share: one producer is built at startup and handed by
//! reference (`Arc<dyn EventProducer>`) to every write path and to the
//! dead-letter publisher.
//!
//! Application code publishes through [`EventProducerExt::publish`], which
//! validates the topic, key and envelope and serializes the envelope as JSON
//! before calling [`EventProducer::send`].
//!
//! # Delivery Semantics
//!
//! At-least-once. A publish that returns an error may still have reached the
//! broker; a publish that returns `Ok` has been acknowledged by all in-sync
//! replicas (for the Kafka implementation).
//!
//! # Example
//!
//! ```rust,ignore
//! use eventline_core::producer::EventProducerExt;
//!
//! let envelope = Envelope::builder(ORDER_CREATED_V1, &order.user_id, data)
//!     .producer("order-service")
//!     .build()?;
//! producer.publish(ORDER_CREATED_V1, envelope.key(), &envelope).await?;
//! ```

use crate::envelope::{Envelope, EnvelopeError};
use serde::Serialize;
use std::future::Future;
use std::pin::Pin;
use thiserror::Error;

/// Errors that can occur while publishing.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PublishError {
    /// Topic was empty or whitespace.
    #[error("Invalid topic: topic must not be empty")]
    InvalidTopic,

    /// Ordering key was empty or whitespace.
    #[error("Invalid key for topic '{topic}': key must not be empty")]
    InvalidKey {
        /// The target topic
        topic: String,
    },

    /// Envelope failed validation.
    #[error("Invalid envelope for topic '{topic}': {source}")]
    InvalidEnvelope {
        /// The target topic
        topic: String,
        /// The violated invariant
        source: EnvelopeError,
    },

    /// Envelope could not be serialized.
    #[error("Failed to serialize envelope for topic '{topic}': {reason}")]
    Serialization {
        /// The target topic
        topic: String,
        /// Serializer message
        reason: String,
    },

    /// Broker unreachable, timed out, or rejected the message.
    #[error("Publish failed for topic '{topic}': {reason}")]
    Transport {
        /// The target topic
        topic: String,
        /// The reason for failure
        reason: String,
    },

    /// Shutdown was requested before the broker acknowledged the message.
    #[error("Publish to topic '{topic}' cancelled by shutdown")]
    Cancelled {
        /// The target topic
        topic: String,
    },
}

/// Where the broker stored a published message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Delivery {
    /// Partition chosen by the key hash.
    pub partition: i32,
    /// Offset within the partition.
    pub offset: i64,
}

/// Transport for serialized envelopes.
///
/// # Dyn Compatibility
///
/// Returns `Pin<Box<dyn Future>>` so the producer can be shared as
/// `Arc<dyn EventProducer>`.
pub trait EventProducer: Send + Sync {
    /// Send `payload` to `topic` with ordering `key`.
    ///
    /// Callers normally go through [`EventProducerExt::publish`], which
    /// validates its inputs first.
    ///
    /// # Errors
    ///
    /// Returns [`PublishError::Transport`] if the broker does not acknowledge
    /// the message within the configured timeouts.
    fn send(
        &self,
        topic: &str,
        key: &str,
        payload: Vec<u8>,
    ) -> Pin<Box<dyn Future<Output = Result<Delivery, PublishError>> + Send + '_>>;
}

/// Typed publishing on top of any [`EventProducer`].
pub trait EventProducerExt: EventProducer {
    /// Validate and publish `envelope` to `topic` under `key`.
    ///
    /// # Errors
    ///
    /// - [`PublishError::InvalidTopic`] / [`PublishError::InvalidKey`] for blank inputs
    /// - [`PublishError::InvalidEnvelope`] if the envelope fails validation
    /// - [`PublishError::Serialization`] if the payload cannot be encoded
    /// - whatever [`EventProducer::send`] returns
    fn publish<'a, T>(
        &'a self,
        topic: &'a str,
        key: &'a str,
        envelope: &Envelope<T>,
    ) -> Pin<Box<dyn Future<Output = Result<Delivery, PublishError>> + Send + 'a>>
    where
        T: Serialize,
    {
        let prepared = encode(topic, key, envelope);
        Box::pin(async move {
            let payload = prepared?;
            self.send(topic, key, payload).await
        })
    }
}

impl<P: EventProducer + ?Sized> EventProducerExt for P {}

fn encode<T: Serialize>(
    topic: &str,
    key: &str,
    envelope: &Envelope<T>,
) -> Result<Vec<u8>, PublishError> {
    if topic.trim().is_empty() {
        return Err(PublishError::InvalidTopic);
    }
    if key.trim().is_empty() {
        return Err(PublishError::InvalidKey {
            topic: topic.to_string(),
        });
    }
    envelope
        .validate()
        .map_err(|source| PublishError::InvalidEnvelope {
            topic: topic.to_string(),
            source,
        })?;
    serde_json::to_vec(envelope).map_err(|e| PublishError::Serialization {
        topic: topic.to_string(),
        reason: e.to_string(),
    })
}
