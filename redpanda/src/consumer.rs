//! Kafka-backed [`MessageSource`].

use crate::ClientError;
use eventline_core::config::ConsumerSettings;
use eventline_core::source::{InboundMessage, MessageSource, SourceError};
use rdkafka::Offset;
use rdkafka::TopicPartitionList;
use rdkafka::config::ClientConfig;
use rdkafka::consumer::{CommitMode, Consumer, StreamConsumer};
use rdkafka::message::{BorrowedMessage, Message};
use std::future::Future;
use std::time::Duration;

/// Upper bound on a seek call.
const SEEK_TIMEOUT: Duration = Duration::from_secs(1);

/// Fixed consumer settings applied on top of the `[consumer]` section.
///
/// Offsets are stored only after processing, so auto-commit never advances
/// past a message whose dead letter failed.
pub const CONSUMER_SETTINGS: &[(&str, &str)] = &[
    ("enable.partition.eof", "false"),
    ("enable.auto.offset.store", "false"),
];

/// A consumer-group subscription.
///
/// Offsets are committed explicitly (one message at a time, asynchronously)
/// unless `enable_auto_commit` is set. In that case the consumer loop calls
/// [`MessageSource::store`] once a message is done and the client commits the
/// stored offsets in the background.
///
/// # Example
///
/// ```no_run
/// use eventline_core::config::PipelineConfig;
/// use eventline_redpanda::KafkaMessageSource;
///
/// # fn example() -> Result<(), Box<dyn std::error::Error>> {
/// let config = PipelineConfig::load()?;
/// let source = KafkaMessageSource::from_settings(&config.consumer)?;
/// # Ok(())
/// # }
/// ```
pub struct KafkaMessageSource {
    consumer: Option<StreamConsumer>,
    group_id: String,
}

impl KafkaMessageSource {
    /// Create a consumer from the `[consumer]` configuration section.
    ///
    /// # Errors
    ///
    /// Returns [`ClientError::Create`] if the client rejects the settings.
    pub fn from_settings(settings: &ConsumerSettings) -> Result<Self, ClientError> {
        let mut config = ClientConfig::new();
        config
            .set("bootstrap.servers", &settings.bootstrap_servers)
            .set("group.id", &settings.group_id)
            .set("enable.auto.commit", settings.enable_auto_commit.to_string())
            .set("auto.offset.reset", settings.auto_offset_reset.as_str())
            .set("session.timeout.ms", settings.session_timeout_ms.to_string())
            .set("max.poll.interval.ms", settings.max_poll_interval_ms.to_string());
        for (key, value) in CONSUMER_SETTINGS {
            config.set(*key, *value);
        }

        let consumer: StreamConsumer = config
            .create()
            .map_err(|e| ClientError::Create(format!("Failed to create consumer: {e}")))?;

        tracing::info!(
            brokers = %settings.bootstrap_servers,
            group_id = %settings.group_id,
            auto_offset_reset = %settings.auto_offset_reset,
            enable_auto_commit = settings.enable_auto_commit,
            "KafkaMessageSource created"
        );

        Ok(Self {
            consumer: Some(consumer),
            group_id: settings.group_id.clone(),
        })
    }

    /// The consumer group id.
    #[must_use]
    pub fn group_id(&self) -> &str {
        &self.group_id
    }

    fn consumer(&self) -> Result<&StreamConsumer, SourceError> {
        self.consumer
            .as_ref()
            .ok_or_else(|| SourceError::PollFailed("consumer is closed".to_string()))
    }
}

/// Copy a broker message out of the client's buffers.
fn detach(message: &BorrowedMessage<'_>) -> InboundMessage {
    let topic = message.topic();
    let partition = message.partition();
    let offset = message.offset();
    let text = |field: &'static str, bytes: &[u8]| {
        let (text, lossy) = utf8_text(bytes);
        if lossy {
            tracing::warn!(
                topic = %topic,
                partition,
                offset,
                field,
                "Message is not valid UTF-8, invalid bytes replaced"
            );
        }
        text
    };

    InboundMessage {
        topic: topic.to_string(),
        partition,
        offset,
        key: message.key().map(|k| text("key", k)),
        payload: message.payload().map(|p| text("payload", p)),
    }
}

/// Decode `bytes`, replacing invalid sequences. The flag is set when
/// anything was replaced.
fn utf8_text(bytes: &[u8]) -> (String, bool) {
    match std::str::from_utf8(bytes) {
        Ok(text) => (text.to_string(), false),
        Err(_) => (String::from_utf8_lossy(bytes).into_owned(), true),
    }
}

impl MessageSource for KafkaMessageSource {
    fn subscribe(&mut self, topics: &[String]) -> Result<(), SourceError> {
        let consumer = self
            .consumer()
            .map_err(|e| SourceError::SubscriptionFailed {
                topics: topics.to_vec(),
                reason: e.to_string(),
            })?;

        let topic_refs: Vec<&str> = topics.iter().map(String::as_str).collect();
        consumer
            .subscribe(&topic_refs)
            .map_err(|e| SourceError::SubscriptionFailed {
                topics: topics.to_vec(),
                reason: format!("Failed to subscribe to topics: {e}"),
            })?;

        tracing::info!(
            topics = ?topics,
            group_id = %self.group_id,
            "Subscribed to topics"
        );
        Ok(())
    }

    fn poll(
        &mut self,
        timeout: Duration,
    ) -> impl Future<Output = Result<Option<InboundMessage>, SourceError>> + Send {
        let consumer = self.consumer();
        async move {
            let consumer = consumer?;
            match tokio::time::timeout(timeout, consumer.recv()).await {
                Err(_) => Ok(None),
                Ok(Ok(message)) => {
                    let message = detach(&message);
                    tracing::trace!(
                        topic = %message.topic,
                        partition = message.partition,
                        offset = message.offset,
                        "Received message"
                    );
                    Ok(Some(message))
                },
                Ok(Err(e)) => Err(SourceError::PollFailed(format!(
                    "Failed to receive message: {e}"
                ))),
            }
        }
    }

    fn commit(&mut self, message: &InboundMessage) -> Result<(), SourceError> {
        let commit_failed = |reason: String| SourceError::CommitFailed {
            topic: message.topic.clone(),
            partition: message.partition,
            offset: message.offset,
            reason,
        };

        let consumer = self.consumer().map_err(|e| commit_failed(e.to_string()))?;

        // the committed offset is the next one to read
        let mut positions = TopicPartitionList::new();
        positions
            .add_partition_offset(
                &message.topic,
                message.partition,
                Offset::Offset(message.offset + 1),
            )
            .map_err(|e| commit_failed(e.to_string()))?;

        consumer
            .commit(&positions, CommitMode::Async)
            .map_err(|e| commit_failed(e.to_string()))?;

        tracing::trace!(
            topic = %message.topic,
            partition = message.partition,
            offset = message.offset,
            "Offset committed"
        );
        Ok(())
    }

    fn store(&mut self, message: &InboundMessage) -> Result<(), SourceError> {
        let store_failed = |reason: String| SourceError::CommitFailed {
            topic: message.topic.clone(),
            partition: message.partition,
            offset: message.offset,
            reason,
        };

        let consumer = self.consumer().map_err(|e| store_failed(e.to_string()))?;

        let mut positions = TopicPartitionList::new();
        positions
            .add_partition_offset(
                &message.topic,
                message.partition,
                Offset::Offset(message.offset + 1),
            )
            .map_err(|e| store_failed(e.to_string()))?;

        consumer
            .store_offsets(&positions)
            .map_err(|e| store_failed(format!("Failed to store offset: {e}")))?;

        tracing::trace!(
            topic = %message.topic,
            partition = message.partition,
            offset = message.offset,
            "Offset stored for auto-commit"
        );
        Ok(())
    }

    fn rewind(&mut self, message: &InboundMessage) -> Result<(), SourceError> {
        let seek_failed = |reason: String| SourceError::SeekFailed {
            topic: message.topic.clone(),
            partition: message.partition,
            offset: message.offset,
            reason,
        };

        let consumer = self.consumer().map_err(|e| seek_failed(e.to_string()))?;
        consumer
            .seek(
                &message.topic,
                message.partition,
                Offset::Offset(message.offset),
                SEEK_TIMEOUT,
            )
            .map_err(|e| seek_failed(e.to_string()))?;

        tracing::debug!(
            topic = %message.topic,
            partition = message.partition,
            offset = message.offset,
            "Rewound to withheld offset"
        );
        Ok(())
    }

    fn close(&mut self) {
        if let Some(consumer) = self.consumer.take() {
            consumer.unsubscribe();
            drop(consumer);
            tracing::info!(group_id = %self.group_id, "Consumer closed");
        }
    }
}

impl Drop for KafkaMessageSource {
    fn drop(&mut self) {
        self.close();
    }
}

impl std::fmt::Debug for KafkaMessageSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KafkaMessageSource")
            .field("group_id", &self.group_id)
            .field("closed", &self.consumer.is_none())
            .finish()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use eventline_core::config::AutoOffsetReset;

    fn settings() -> ConsumerSettings {
        ConsumerSettings {
            bootstrap_servers: "127.0.0.1:1".to_string(),
            group_id: "user-service".to_string(),
            topics: vec!["order.created.v1".to_string()],
            auto_offset_reset: AutoOffsetReset::Earliest,
            enable_auto_commit: false,
            poll_timeout_ms: 50,
            session_timeout_ms: 6000,
            max_poll_interval_ms: 300_000,
        }
    }

    #[test]
    fn offsets_are_stored_only_after_processing() {
        assert!(CONSUMER_SETTINGS.contains(&("enable.auto.offset.store", "false")));
    }

    #[test]
    fn non_utf8_bytes_are_replaced_and_flagged() {
        assert_eq!(utf8_text(br#"{"k":1}"#), (r#"{"k":1}"#.to_string(), false));

        let (text, lossy) = utf8_text(&[b'o', 0xff, b'k']);
        assert!(lossy);
        assert_eq!(text, "o\u{fffd}k");
    }

    #[test]
    fn source_is_send() {
        fn assert_send<T: Send>() {}
        assert_send::<KafkaMessageSource>();
    }

    #[tokio::test]
    async fn closed_source_rejects_every_operation() {
        let mut source = KafkaMessageSource::from_settings(&settings()).unwrap();
        assert_eq!(source.group_id(), "user-service");

        source.close();
        source.close();

        let message = InboundMessage::new("order.created.v1", 0, 1, "user-42", "{}");
        assert!(source.subscribe(&settings().topics).is_err());
        assert!(matches!(
            source.poll(Duration::from_millis(10)).await,
            Err(SourceError::PollFailed(_))
        ));
        assert!(matches!(
            source.commit(&message),
            Err(SourceError::CommitFailed { .. })
        ));
        assert!(matches!(
            source.store(&message),
            Err(SourceError::CommitFailed { .. })
        ));
        assert!(matches!(
            source.rewind(&message),
            Err(SourceError::SeekFailed { .. })
        ));
    }
}
