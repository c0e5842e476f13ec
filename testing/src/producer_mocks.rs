//! Recording producer for asserting on published messages.

#![allow(clippy::unwrap_used)] // Test infrastructure uses unwrap for simplicity
#![allow(clippy::missing_panics_doc)]

use eventline_core::producer::{Delivery, EventProducer, PublishError};
use serde_json::Value;
use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Mutex};

/// One message handed to [`RecordingProducer::send`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SentMessage {
    /// Target topic
    pub topic: String,
    /// Ordering key
    pub key: String,
    /// Serialized payload
    pub payload: Vec<u8>,
}

impl SentMessage {
    /// Payload parsed as JSON.
    #[must_use]
    pub fn json(&self) -> Value {
        serde_json::from_slice(&self.payload).unwrap()
    }
}

#[derive(Default)]
struct ProducerState {
    sent: Vec<SentMessage>,
    attempts: usize,
    failures_remaining: usize,
    always_fail: bool,
}

/// In-memory [`EventProducer`] that records successful sends.
///
/// Failed sends are counted in [`RecordingProducer::attempts`] but not
/// recorded as sent.
///
/// # Example
///
/// ```
/// use eventline_core::producer::EventProducer;
/// use eventline_testing::RecordingProducer;
///
/// # async fn example() {
/// let producer = RecordingProducer::new();
/// producer.send("orders", "user-42", b"{}".to_vec()).await.ok();
/// assert_eq!(producer.sent_to("orders").len(), 1);
/// # }
/// ```
#[derive(Clone, Default)]
pub struct RecordingProducer {
    state: Arc<Mutex<ProducerState>>,
}

impl RecordingProducer {
    /// Create a producer that accepts every message.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a producer whose broker is unreachable.
    #[must_use]
    pub fn unavailable() -> Self {
        let producer = Self::new();
        producer.state.lock().unwrap().always_fail = true;
        producer
    }

    /// Fail the next `n` sends, then recover.
    #[must_use]
    pub fn failing_first(self, n: usize) -> Self {
        self.state.lock().unwrap().failures_remaining = n;
        self
    }

    /// Messages sent successfully, in order.
    #[must_use]
    pub fn sent(&self) -> Vec<SentMessage> {
        self.state.lock().unwrap().sent.clone()
    }

    /// Messages sent successfully to `topic`.
    #[must_use]
    pub fn sent_to(&self, topic: &str) -> Vec<SentMessage> {
        self.sent().into_iter().filter(|m| m.topic == topic).collect()
    }

    /// Sends attempted, failed ones included.
    #[must_use]
    pub fn attempts(&self) -> usize {
        self.state.lock().unwrap().attempts
    }
}

impl EventProducer for RecordingProducer {
    fn send(
        &self,
        topic: &str,
        key: &str,
        payload: Vec<u8>,
    ) -> Pin<Box<dyn Future<Output = Result<Delivery, PublishError>> + Send + '_>> {
        let result = {
            let mut state = self.state.lock().unwrap();
            state.attempts += 1;

            if state.always_fail || state.failures_remaining > 0 {
                state.failures_remaining = state.failures_remaining.saturating_sub(1);
                Err(PublishError::Transport {
                    topic: topic.to_string(),
                    reason: "Message timed out".to_string(),
                })
            } else {
                let offset = i64::try_from(state.sent.len()).unwrap();
                state.sent.push(SentMessage {
                    topic: topic.to_string(),
                    key: key.to_string(),
                    payload,
                });
                Ok(Delivery {
                    partition: 0,
                    offset,
                })
            }
        };

        Box::pin(async move { result })
    }
}
