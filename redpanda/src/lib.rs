//! Kafka/Redpanda transport for Eventline.
//!
//! This crate provides the broker-facing halves of the pipeline, built on
//! rdkafka:
//!
//! - [`KafkaEventProducer`]: the shared, idempotent producer behind
//!   `EventProducer`
//! - [`KafkaMessageSource`]: a consumer-group subscription behind
//!   `MessageSource`, polled by the consumer loop
//!
//! Any Kafka-compatible broker works (Redpanda, Apache Kafka, MSK, ...).
//!
//! # Delivery Semantics
//!
//! **At-least-once** end to end:
//! - the producer waits for all in-sync replicas and retries idempotently
//! - the consumer commits an offset only after the message was handled,
//!   skipped, or dead-lettered
//! - a crash before commit redelivers the message, so handlers must be
//!   idempotent
//! - ordering holds within a partition, i.e. per key
//!
//! # Example
//!
//! ```no_run
//! use eventline_core::config::PipelineConfig;
//! use eventline_redpanda::{KafkaEventProducer, KafkaMessageSource};
//!
//! # fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let config = PipelineConfig::load()?;
//! let producer = KafkaEventProducer::from_settings(&config.producer)?;
//! let source = KafkaMessageSource::from_settings(&config.consumer)?;
//! # Ok(())
//! # }
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]

use thiserror::Error;

/// Kafka consumer subscription
pub mod consumer;

/// Kafka producer
pub mod producer;

pub use consumer::KafkaMessageSource;
pub use producer::{KafkaEventProducer, KafkaEventProducerBuilder};

/// Errors creating a Kafka client.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ClientError {
    /// A required setting was not provided.
    #[error("Missing required setting: {0}")]
    MissingSetting(&'static str),

    /// The client rejected its configuration.
    #[error("{0}")]
    Create(String),
}
