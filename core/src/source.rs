//! Subscription handle consumed by the consumer loop.
//!
//! A [`MessageSource`] wraps one broker consumer connection. Exactly one task
//! owns it; nothing else may poll, commit or close it concurrently, which is
//! why every method takes `&mut self`.

use std::future::Future;
use std::time::Duration;
use thiserror::Error;

/// Errors raised by a [`MessageSource`].
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SourceError {
    /// Consumer could not be created.
    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    /// Subscription call failed.
    #[error("Subscription failed for topics {topics:?}: {reason}")]
    SubscriptionFailed {
        /// The topics that failed to subscribe
        topics: Vec<String>,
        /// The reason for failure
        reason: String,
    },

    /// The poll call itself failed (not a handler error).
    #[error("Poll failed: {0}")]
    PollFailed(String),

    /// Offset commit failed.
    #[error("Commit failed for {topic}[{partition}]@{offset}: {reason}")]
    CommitFailed {
        /// Topic of the message
        topic: String,
        /// Partition of the message
        partition: i32,
        /// Offset of the message
        offset: i64,
        /// The reason for failure
        reason: String,
    },

    /// Rewinding to a withheld offset failed.
    #[error("Seek failed for {topic}[{partition}]@{offset}: {reason}")]
    SeekFailed {
        /// Topic of the message
        topic: String,
        /// Partition of the message
        partition: i32,
        /// Offset of the message
        offset: i64,
        /// The reason for failure
        reason: String,
    },
}

/// One message pulled from the broker, detached from the client's buffers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InboundMessage {
    /// Topic the message arrived on.
    pub topic: String,
    /// Partition within the topic.
    pub partition: i32,
    /// Offset within the partition.
    pub offset: i64,
    /// Ordering key, if the producer set one.
    pub key: Option<String>,
    /// UTF-8 payload; `None` for tombstones.
    pub payload: Option<String>,
}

impl InboundMessage {
    /// Build a keyed message with a payload.
    #[must_use]
    pub fn new(
        topic: impl Into<String>,
        partition: i32,
        offset: i64,
        key: impl Into<String>,
        payload: impl Into<String>,
    ) -> Self {
        Self {
            topic: topic.into(),
            partition,
            offset,
            key: Some(key.into()),
            payload: Some(payload.into()),
        }
    }

    /// Key, or the empty string if the message is unkeyed.
    #[must_use]
    pub fn key_or_empty(&self) -> &str {
        self.key.as_deref().unwrap_or_default()
    }
}

/// A subscription handle that can be polled and committed.
///
/// Implementations: `KafkaMessageSource` (eventline-redpanda) for
/// production, `ScriptedSource` (eventline-testing) for tests.
pub trait MessageSource: Send {
    /// Subscribe to `topics`. Called once per process lifetime.
    ///
    /// # Errors
    ///
    /// Returns [`SourceError::SubscriptionFailed`] if the broker rejects it.
    fn subscribe(&mut self, topics: &[String]) -> Result<(), SourceError>;

    /// Wait up to `timeout` for the next message.
    ///
    /// `Ok(None)` is an empty poll.
    ///
    /// # Errors
    ///
    /// Returns [`SourceError::PollFailed`] on broker/client errors.
    fn poll(
        &mut self,
        timeout: Duration,
    ) -> impl Future<Output = Result<Option<InboundMessage>, SourceError>> + Send;

    /// Commit `message` so the group resumes after it.
    ///
    /// # Errors
    ///
    /// Returns [`SourceError::CommitFailed`] if the commit is rejected.
    fn commit(&mut self, message: &InboundMessage) -> Result<(), SourceError>;

    /// Mark `message` as processed for the client's background auto-commit.
    ///
    /// Used instead of [`MessageSource::commit`] when auto-commit is enabled;
    /// an offset that is never stored is never auto-committed.
    ///
    /// # Errors
    ///
    /// Returns [`SourceError::CommitFailed`] if the offset cannot be stored.
    fn store(&mut self, message: &InboundMessage) -> Result<(), SourceError>;

    /// Rewind so the next poll on `message`'s partition returns it again.
    ///
    /// # Errors
    ///
    /// Returns [`SourceError::SeekFailed`] if the position cannot be moved.
    fn rewind(&mut self, message: &InboundMessage) -> Result<(), SourceError>;

    /// Leave the group and release the connection. Must be idempotent.
    fn close(&mut self);
}
