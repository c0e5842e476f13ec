//! Diagnostic record published for messages that exhausted their retries.
//!
//! The record keeps the original payload unparsed so the message can be
//! replayed by hand once the cause is fixed.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Key used for dead letters of unkeyed messages.
pub const UNKEYED_DEAD_LETTER_KEY: &str = "dlq";

/// Envelope version of [`DeadLetterRecord`].
pub const DEAD_LETTER_VERSION: u32 = 1;

/// Payload of a dead-letter envelope.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeadLetterRecord {
    /// Topic the message was consumed from.
    pub original_topic: String,
    /// Original ordering key.
    pub key: String,
    /// Original payload, verbatim.
    pub raw_payload: String,
    /// Classification of the last handler error.
    pub error_type: String,
    /// Message of the last handler error.
    pub error_message: String,
    /// When the message was given up on.
    pub failed_at_utc: DateTime<Utc>,
    /// Partition of the original message.
    pub partition: i32,
    /// Offset of the original message.
    pub offset: i64,
    /// Handler attempts made.
    pub attempts: u32,
}
