//! # Eventline Core
//!
//! Shared types and traits for the Eventline event pipeline.
//!
//! Services publish versioned [`Envelope`](envelope::Envelope)s to a
//! partitioned log broker and consume them through a long-running consumer
//! loop that dispatches each message to the handler registered for its topic,
//! retries failures, and dead-letters what cannot be processed.
//!
//! ## Architecture
//!
//! ```text
//!   write path                                 consumer process
//! ┌────────────┐   publish    ┌────────┐   poll   ┌──────────────┐
//! │ app write  │─────────────►│ broker │─────────►│ ConsumerLoop │
//! └────────────┘ EventProducer└────────┘  Message └──────┬───────┘
//!                                  ▲      Source         │ resolve(topic)
//!                                  │                     ▼
//!                                  │              ┌──────────────┐
//!                                  │              │HandlerRegistry│
//!                                  │              └──────┬───────┘
//!                                  │                     │ retry ×3
//!                                  │  DLQ topic          ▼
//!                                  └──────────────── EventHandler
//! ```
//!
//! This crate holds the vocabulary only. The consumer loop, retry executor and
//! dead-letter publisher live in `eventline-runtime`; the Kafka-backed
//! producer and source in `eventline-redpanda`.
//!
//! ## Modules
//!
//! - [`envelope`]: the versioned wire envelope
//! - [`contracts`]: event payloads exchanged between services
//! - [`producer`]: the publish seam
//! - [`handler`]: handler traits and the typed JSON adapter
//! - [`registry`]: topic → handler lookup
//! - [`source`]: the subscription handle polled by the consumer loop
//! - [`dead_letter`]: the dead-letter record
//! - [`shutdown`]: cooperative cancellation
//! - [`config`]: configuration loading and validation

pub mod config;
pub mod contracts;
pub mod dead_letter;
pub mod envelope;
pub mod handler;
pub mod producer;
pub mod registry;
pub mod shutdown;
pub mod source;

// Re-export commonly used types
pub use chrono::{DateTime, Utc};

/// Environment module - injected dependencies
///
/// All external dependencies that tests need to control are abstracted behind
/// traits here.
pub mod environment {
    use chrono::{DateTime, Utc};

    /// Clock trait - abstracts time operations for testability
    ///
    /// # Examples
    ///
    /// ```
    /// use eventline_core::environment::{Clock, SystemClock};
    ///
    /// let clock = SystemClock;
    /// let before = clock.now();
    /// assert!(clock.now() >= before);
    /// ```
    pub trait Clock: Send + Sync {
        /// Get the current time
        fn now(&self) -> DateTime<Utc>;
    }

    /// Wall clock.
    #[derive(Debug, Clone, Copy, Default)]
    pub struct SystemClock;

    impl Clock for SystemClock {
        fn now(&self) -> DateTime<Utc> {
            Utc::now()
        }
    }
}
