//! Versioned envelope shared by producers and consumers.
//!
//! Every message on the broker is a JSON object with a fixed set of
//! camelCase fields wrapping a typed `data` payload:
//!
//! ```text
//! {
//!   "eventId": "6f1c...",
//!   "eventType": "order.created.v1",
//!   "version": 1,
//!   "occurredAtUtc": "2026-10-17T09:30:00Z",
//!   "producer": "order-service",
//!   "key": "user-42",
//!   "data": { ... },
//!   "traceId": "abc"            // optional
//! }
//! ```
//!
//! The `eventType` doubles as the topic name. The `key` is the ordering key:
//! every event about one logical entity carries the same key so the broker
//! places them on the same partition.
//!
//! # Example
//!
//! ```
//! use eventline_core::envelope::Envelope;
//! use serde_json::json;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let envelope = Envelope::builder("order.created.v1", "user-42", json!({ "orderId": "o1" }))
//!     .producer("order-service")
//!     .build()?;
//!
//! assert_eq!(envelope.key(), "user-42");
//! assert_eq!(envelope.version(), 1);
//! # Ok(())
//! # }
//! ```

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

/// Producer name used when the builder is not told otherwise.
pub const UNKNOWN_PRODUCER: &str = "unknown";

/// Errors raised when an envelope violates its invariants.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum EnvelopeError {
    /// `eventType` was empty or whitespace.
    #[error("envelope event type must not be empty")]
    EmptyEventType,

    /// `key` was empty or whitespace.
    #[error("envelope key must not be empty")]
    EmptyKey,

    /// `producer` was empty or whitespace.
    #[error("envelope producer must not be empty")]
    EmptyProducer,

    /// `version` was zero.
    #[error("envelope version must be a positive integer, got {0}")]
    InvalidVersion(u32),
}

/// The unit of transfer between services.
///
/// Envelopes are immutable once built. Fields are private; construct one with
/// [`Envelope::builder`] and read it through the accessors. Deserialized
/// envelopes should be checked with [`Envelope::validate`] before use since
/// the wire may carry anything.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Envelope<T> {
    event_id: Uuid,
    event_type: String,
    version: u32,
    occurred_at_utc: DateTime<Utc>,
    producer: String,
    key: String,
    data: T,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    trace_id: Option<String>,
}

impl<T> Envelope<T> {
    /// Start building an envelope for `event_type`, ordered by `key`.
    #[must_use]
    pub fn builder(
        event_type: impl Into<String>,
        key: impl Into<String>,
        data: T,
    ) -> EnvelopeBuilder<T> {
        EnvelopeBuilder {
            event_id: None,
            event_type: event_type.into(),
            version: 1,
            occurred_at: None,
            producer: UNKNOWN_PRODUCER.to_string(),
            key: key.into(),
            data,
            trace_id: None,
        }
    }

    /// Globally unique id assigned at construction.
    #[must_use]
    pub const fn event_id(&self) -> Uuid {
        self.event_id
    }

    /// Logical event kind, also used as the topic name.
    #[must_use]
    pub fn event_type(&self) -> &str {
        &self.event_type
    }

    /// Schema version of `data`.
    #[must_use]
    pub const fn version(&self) -> u32 {
        self.version
    }

    /// When the originating domain event happened.
    #[must_use]
    pub const fn occurred_at_utc(&self) -> DateTime<Utc> {
        self.occurred_at_utc
    }

    /// Name of the emitting service.
    #[must_use]
    pub fn producer(&self) -> &str {
        &self.producer
    }

    /// Ordering key.
    #[must_use]
    pub fn key(&self) -> &str {
        &self.key
    }

    /// Typed payload.
    #[must_use]
    pub const fn data(&self) -> &T {
        &self.data
    }

    /// Optional correlation id.
    #[must_use]
    pub fn trace_id(&self) -> Option<&str> {
        self.trace_id.as_deref()
    }

    /// Consume the envelope and return its payload.
    #[must_use]
    pub fn into_data(self) -> T {
        self.data
    }

    /// Check the envelope invariants.
    ///
    /// # Errors
    ///
    /// Returns the first violated invariant: empty event type, empty key,
    /// empty producer or a zero version.
    pub fn validate(&self) -> Result<(), EnvelopeError> {
        if self.event_type.trim().is_empty() {
            return Err(EnvelopeError::EmptyEventType);
        }
        if self.key.trim().is_empty() {
            return Err(EnvelopeError::EmptyKey);
        }
        if self.producer.trim().is_empty() {
            return Err(EnvelopeError::EmptyProducer);
        }
        if self.version == 0 {
            return Err(EnvelopeError::InvalidVersion(self.version));
        }
        Ok(())
    }
}

/// Builder for [`Envelope`].
///
/// Unset fields default to: a fresh v4 event id, version `1`, `occurredAtUtc`
/// of now, producer [`UNKNOWN_PRODUCER`] and no trace id.
#[derive(Debug, Clone)]
pub struct EnvelopeBuilder<T> {
    event_id: Option<Uuid>,
    event_type: String,
    version: u32,
    occurred_at: Option<DateTime<Utc>>,
    producer: String,
    key: String,
    data: T,
    trace_id: Option<String>,
}

impl<T> EnvelopeBuilder<T> {
    /// Use an explicit event id instead of a generated one.
    #[must_use]
    pub const fn event_id(mut self, event_id: Uuid) -> Self {
        self.event_id = Some(event_id);
        self
    }

    /// Set the schema version (must be at least 1).
    #[must_use]
    pub const fn version(mut self, version: u32) -> Self {
        self.version = version;
        self
    }

    /// Set the time the domain event happened.
    ///
    /// This is the time of the write, not of the publish attempt.
    #[must_use]
    pub const fn occurred_at(mut self, occurred_at: DateTime<Utc>) -> Self {
        self.occurred_at = Some(occurred_at);
        self
    }

    /// Set the emitting service name.
    #[must_use]
    pub fn producer(mut self, producer: impl Into<String>) -> Self {
        self.producer = producer.into();
        self
    }

    /// Attach a correlation id.
    #[must_use]
    pub fn trace_id(mut self, trace_id: impl Into<String>) -> Self {
        self.trace_id = Some(trace_id.into());
        self
    }

    /// Build and validate the envelope.
    ///
    /// # Errors
    ///
    /// Returns [`EnvelopeError`] if any invariant is violated.
    pub fn build(self) -> Result<Envelope<T>, EnvelopeError> {
        let envelope = Envelope {
            event_id: self.event_id.unwrap_or_else(Uuid::new_v4),
            event_type: self.event_type,
            version: self.version,
            occurred_at_utc: self.occurred_at.unwrap_or_else(Utc::now),
            producer: self.producer,
            key: self.key,
            data: self.data,
            trace_id: self.trace_id,
        };
        envelope.validate()?;
        Ok(envelope)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use serde_json::{Value, json};

    #[test]
    fn serializes_camel_case_fields() {
        let envelope = Envelope::builder("order.created.v1", "user-42", json!({ "orderId": "o1" }))
            .producer("order-service")
            .trace_id("trace-1")
            .build()
            .unwrap();

        let value = serde_json::to_value(&envelope).unwrap();
        let object = value.as_object().unwrap();

        for field in [
            "eventId",
            "eventType",
            "version",
            "occurredAtUtc",
            "producer",
            "key",
            "data",
            "traceId",
        ] {
            assert!(object.contains_key(field), "missing {field}");
        }
        assert_eq!(object.len(), 8);
        assert_eq!(value["eventType"], "order.created.v1");
        assert_eq!(value["data"]["orderId"], "o1");
    }

    #[test]
    fn trace_id_is_optional_on_the_wire() {
        let raw = r#"{
            "eventId": "4f1b1c5e-8a3b-4a7e-9d8e-2b0f6f1b2c3d",
            "eventType": "user.created.v1",
            "version": 1,
            "occurredAtUtc": "2026-01-02T03:04:05Z",
            "producer": "user-service",
            "key": "user-7",
            "data": {}
        }"#;

        let envelope: Envelope<Value> = serde_json::from_str(raw).unwrap();
        assert_eq!(envelope.trace_id(), None);
        assert!(envelope.validate().is_ok());

        let reserialized = serde_json::to_value(&envelope).unwrap();
        assert!(reserialized.get("traceId").is_none());
    }

    #[test]
    fn build_rejects_empty_key() {
        let result = Envelope::builder("order.created.v1", "  ", ()).build();
        assert_eq!(result.unwrap_err(), EnvelopeError::EmptyKey);
    }

    #[test]
    fn build_rejects_zero_version() {
        let result = Envelope::builder("order.created.v1", "k", ()).version(0).build();
        assert_eq!(result.unwrap_err(), EnvelopeError::InvalidVersion(0));
    }

    #[test]
    fn build_rejects_empty_event_type_and_producer() {
        assert_eq!(
            Envelope::builder("", "k", ()).build().unwrap_err(),
            EnvelopeError::EmptyEventType
        );
        assert_eq!(
            Envelope::builder("t", "k", ()).producer("").build().unwrap_err(),
            EnvelopeError::EmptyProducer
        );
    }

    #[test]
    fn validate_catches_invalid_wire_envelopes() {
        let raw = r#"{
            "eventId": "4f1b1c5e-8a3b-4a7e-9d8e-2b0f6f1b2c3d",
            "eventType": "user.created.v1",
            "version": 0,
            "occurredAtUtc": "2026-01-02T03:04:05Z",
            "producer": "user-service",
            "key": "user-7",
            "data": null
        }"#;
        let envelope: Envelope<Value> = serde_json::from_str(raw).unwrap();
        assert_eq!(envelope.validate(), Err(EnvelopeError::InvalidVersion(0)));
    }

    proptest! {
        #[test]
        fn json_round_trip_preserves_envelope(
            key in "[a-zA-Z0-9-]{1,32}",
            event_type in "[a-z.]{1,24}[a-z0-9]",
            version in 1u32..100,
            product in ".*",
            trace in proptest::option::of("[a-f0-9]{8}"),
        ) {
            let mut builder = Envelope::builder(event_type, key.clone(), json!({ "product": product }))
                .version(version)
                .producer("prop");
            if let Some(trace) = trace {
                builder = builder.trace_id(trace);
            }
            let envelope = builder.build().unwrap();

            let wire = serde_json::to_string(&envelope).unwrap();
            let decoded: Envelope<Value> = serde_json::from_str(&wire).unwrap();

            prop_assert_eq!(&decoded, &envelope);
            prop_assert_eq!(decoded.key(), key.as_str());
        }
    }
}
