//! Scripted message source for driving the consumer loop without a broker.

#![allow(clippy::unwrap_used)] // Test infrastructure uses unwrap for simplicity
#![allow(clippy::missing_panics_doc)]

use eventline_core::shutdown::ShutdownTrigger;
use eventline_core::source::{InboundMessage, MessageSource, SourceError};
use std::collections::VecDeque;
use std::future::Future;
use std::sync::{Arc, Mutex};
use std::time::Duration;

enum Scripted {
    Message(InboundMessage),
    PollError(String),
}

#[derive(Default)]
struct SourceState {
    queue: VecDeque<Scripted>,
    subscribed: Vec<String>,
    delivered: Vec<InboundMessage>,
    commits: Vec<InboundMessage>,
    stores: Vec<InboundMessage>,
    rewinds: Vec<InboundMessage>,
    close_calls: usize,
    fail_subscribe: bool,
    fail_commits: bool,
    stop_when_drained: Option<ShutdownTrigger>,
}

/// In-memory [`MessageSource`] that replays a fixed script.
///
/// Messages are returned in the order they were pushed. A rewound message is
/// put back at the front of the queue, so the next poll returns it again,
/// matching a broker seek.
///
/// # Example
///
/// ```
/// use eventline_core::source::InboundMessage;
/// use eventline_testing::ScriptedSource;
///
/// let source = ScriptedSource::new()
///     .with_message(InboundMessage::new("order.created.v1", 0, 0, "user-42", "{}"));
/// let probe = source.probe();
///
/// // hand `source` to a ConsumerLoop, then inspect `probe`
/// assert!(probe.commits().is_empty());
/// ```
pub struct ScriptedSource {
    state: Arc<Mutex<SourceState>>,
}

impl ScriptedSource {
    /// Create an empty source.
    #[must_use]
    pub fn new() -> Self {
        Self {
            state: Arc::new(Mutex::new(SourceState::default())),
        }
    }

    /// Queue a message.
    #[must_use]
    pub fn with_message(self, message: InboundMessage) -> Self {
        self.state
            .lock()
            .unwrap()
            .queue
            .push_back(Scripted::Message(message));
        self
    }

    /// Queue a failing poll.
    #[must_use]
    pub fn with_poll_error(self, reason: impl Into<String>) -> Self {
        self.state
            .lock()
            .unwrap()
            .queue
            .push_back(Scripted::PollError(reason.into()));
        self
    }

    /// Fire `trigger` once the script has been fully consumed.
    #[must_use]
    pub fn stop_when_drained(self, trigger: ShutdownTrigger) -> Self {
        self.state.lock().unwrap().stop_when_drained = Some(trigger);
        self
    }

    /// Make `subscribe` fail.
    #[must_use]
    pub fn failing_subscribe(self) -> Self {
        self.state.lock().unwrap().fail_subscribe = true;
        self
    }

    /// Make every `commit` and `store` fail.
    #[must_use]
    pub fn failing_commits(self) -> Self {
        self.state.lock().unwrap().fail_commits = true;
        self
    }

    /// A handle for inspecting the source after it has been moved.
    #[must_use]
    pub fn probe(&self) -> SourceProbe {
        SourceProbe {
            state: Arc::clone(&self.state),
        }
    }
}

impl Default for ScriptedSource {
    fn default() -> Self {
        Self::new()
    }
}

impl MessageSource for ScriptedSource {
    fn subscribe(&mut self, topics: &[String]) -> Result<(), SourceError> {
        let mut state = self.state.lock().unwrap();
        if state.fail_subscribe {
            return Err(SourceError::SubscriptionFailed {
                topics: topics.to_vec(),
                reason: "scripted subscription failure".to_string(),
            });
        }
        state.subscribed = topics.to_vec();
        Ok(())
    }

    fn poll(
        &mut self,
        timeout: Duration,
    ) -> impl Future<Output = Result<Option<InboundMessage>, SourceError>> + Send {
        let state = Arc::clone(&self.state);
        async move {
            let next = {
                let mut state = state.lock().unwrap();
                let next = state.queue.pop_front();
                match next {
                    Some(Scripted::Message(message)) => {
                        state.delivered.push(message.clone());
                        Some(Ok(Some(message)))
                    },
                    Some(Scripted::PollError(reason)) => Some(Err(SourceError::PollFailed(reason))),
                    None => {
                        if let Some(trigger) = state.stop_when_drained.take() {
                            trigger.trigger();
                        }
                        None
                    },
                }
            };

            match next {
                Some(result) => result,
                None => {
                    tokio::time::sleep(timeout.min(Duration::from_millis(5))).await;
                    Ok(None)
                },
            }
        }
    }

    fn commit(&mut self, message: &InboundMessage) -> Result<(), SourceError> {
        let mut state = self.state.lock().unwrap();
        if state.fail_commits {
            return Err(SourceError::CommitFailed {
                topic: message.topic.clone(),
                partition: message.partition,
                offset: message.offset,
                reason: "scripted commit failure".to_string(),
            });
        }
        state.commits.push(message.clone());
        Ok(())
    }

    fn store(&mut self, message: &InboundMessage) -> Result<(), SourceError> {
        let mut state = self.state.lock().unwrap();
        if state.fail_commits {
            return Err(SourceError::CommitFailed {
                topic: message.topic.clone(),
                partition: message.partition,
                offset: message.offset,
                reason: "scripted store failure".to_string(),
            });
        }
        state.stores.push(message.clone());
        Ok(())
    }

    fn rewind(&mut self, message: &InboundMessage) -> Result<(), SourceError> {
        let mut state = self.state.lock().unwrap();
        state.rewinds.push(message.clone());
        state.queue.push_front(Scripted::Message(message.clone()));
        Ok(())
    }

    fn close(&mut self) {
        self.state.lock().unwrap().close_calls += 1;
    }
}

/// Read-only view of a [`ScriptedSource`].
#[derive(Clone)]
pub struct SourceProbe {
    state: Arc<Mutex<SourceState>>,
}

impl SourceProbe {
    /// Topics passed to `subscribe`.
    #[must_use]
    pub fn subscribed(&self) -> Vec<String> {
        self.state.lock().unwrap().subscribed.clone()
    }

    /// Every message returned by `poll`, redeliveries included.
    #[must_use]
    pub fn delivered(&self) -> Vec<InboundMessage> {
        self.state.lock().unwrap().delivered.clone()
    }

    /// Messages committed, in order.
    #[must_use]
    pub fn commits(&self) -> Vec<InboundMessage> {
        self.state.lock().unwrap().commits.clone()
    }

    /// Offsets committed, in order.
    #[must_use]
    pub fn committed_offsets(&self) -> Vec<i64> {
        self.commits().iter().map(|m| m.offset).collect()
    }

    /// Offsets stored for auto-commit, in order.
    #[must_use]
    pub fn stored_offsets(&self) -> Vec<i64> {
        self.state
            .lock()
            .unwrap()
            .stores
            .iter()
            .map(|m| m.offset)
            .collect()
    }

    /// Messages rewound, in order.
    #[must_use]
    pub fn rewinds(&self) -> Vec<InboundMessage> {
        self.state.lock().unwrap().rewinds.clone()
    }

    /// Whether `close` has been called.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.close_calls() > 0
    }

    /// How many times `close` has been called.
    #[must_use]
    pub fn close_calls(&self) -> usize {
        self.state.lock().unwrap().close_calls
    }

    /// Scripted entries not yet polled.
    #[must_use]
    pub fn remaining(&self) -> usize {
        self.state.lock().unwrap().queue.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn rewound_message_is_polled_again() {
        let mut source = ScriptedSource::new()
            .with_message(InboundMessage::new("t", 0, 7, "k", "a"))
            .with_message(InboundMessage::new("t", 0, 8, "k", "b"));
        let probe = source.probe();

        let first = source.poll(Duration::ZERO).await.unwrap().unwrap();
        source.rewind(&first).unwrap();
        let again = source.poll(Duration::ZERO).await.unwrap().unwrap();

        assert_eq!(again.offset, 7);
        assert_eq!(probe.rewinds().len(), 1);
        assert_eq!(probe.remaining(), 1);
    }

    #[tokio::test]
    async fn drained_script_fires_trigger() {
        let (trigger, signal) = eventline_core::shutdown::shutdown_channel();
        let mut source = ScriptedSource::new().stop_when_drained(trigger);

        assert!(source.poll(Duration::ZERO).await.unwrap().is_none());
        assert!(signal.is_triggered());
    }
}
