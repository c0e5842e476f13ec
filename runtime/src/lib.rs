//! # Eventline Runtime
//!
//! The moving parts of the pipeline: the consumer loop, bounded retry,
//! dead-letter publishing and the write-path publish helper.
//!
//! ## Core Components
//!
//! - **`ConsumerLoop`**: polls a `MessageSource`, dispatches each message to
//!   the handler registered for its topic, and commits offsets
//! - **`RetryExecutor`**: 3 attempts, 100ms apart, cancellable
//! - **`DeadLetterPublisher`**: moves exhausted messages to the service's
//!   dead-letter topic
//! - **`publish_after_write`**: publishes after a local write and reports a
//!   retryable failure
//!
//! ## Example
//!
//! ```ignore
//! use eventline_runtime::consumer::{ConsumerLoop, ConsumerOptions};
//! use eventline_runtime::dead_letter::DeadLetterPublisher;
//!
//! let consumer = ConsumerLoop::new(
//!     source,
//!     Arc::new(registry),
//!     DeadLetterPublisher::new(producer, "user-service.dlq", "user-service"),
//!     ConsumerOptions::new(vec!["order.created.v1".to_string()]),
//! );
//!
//! let handle = consumer.spawn();
//! // ...
//! let stats = handle.stop().await?;
//! ```

/// Consumer loop state machine
pub mod consumer;

/// Dead-letter publishing
pub mod dead_letter;

/// Prometheus metrics for observability
pub mod metrics;

/// Fixed-delay retry
pub mod retry;

/// Publish helper for application write paths
pub mod write_path;

pub use consumer::{ConsumerError, ConsumerHandle, ConsumerLoop, ConsumerOptions, ConsumerStats};
pub use dead_letter::DeadLetterPublisher;
pub use retry::{RetryExecutor, RetryOutcome, RetryPolicy};
pub use write_path::{EventNotDelivered, publish_after_write};
