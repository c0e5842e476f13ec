//! The consumer loop: poll, dispatch, retry, dead-letter, commit.
//!
//! # State Machine
//!
//! ```text
//! Idle ──subscribe──► Subscribed ──► Polling ◄──────────────────────────┐
//!                                      │ message                        │
//!                                      ▼                                │
//!                                  Processing ──success──► Committing ──┤
//!                                      │ exhausted             ▲        │
//!                                      ▼                       │        │
//!                                DeadLettering ──published─────┘        │
//!                                      │ publish failed (rewind)        │
//!                                      └────────────────────────────────┘
//!
//! shutdown at any suspension point ──► Draining ──close──► Stopped
//! ```
//!
//! # Delivery Semantics
//!
//! - One message in flight per process; no partition fan-out.
//! - Offsets are committed after the handler succeeds, after a message is
//!   skipped (unmapped topic, empty payload) and after a dead letter is
//!   published. With auto-commit enabled the commit step stores the offset
//!   instead, and the client's background commit picks it up.
//! - If the dead-letter publish fails the offset is withheld and the source
//!   is rewound, so the next poll redelivers the message. A dead-letter topic
//!   that stays unreachable therefore blocks the partition; that is preferred
//!   to losing the message.
//! - Errors from the poll call itself are logged and polling continues.
//! - The current [`ConsumerState`] is published on a watch channel; see
//!   [`ConsumerLoop::state`] and [`ConsumerHandle::state`].
//!
//! The subscription handle is closed on every exit path: explicitly when the
//! loop drains, and by a drop guard if the loop is dropped or unwinds.

use crate::dead_letter::DeadLetterPublisher;
use crate::metrics::ConsumerMetrics;
use crate::retry::{RetryExecutor, RetryOutcome, RetryPolicy};
use eventline_core::config::ConsumerSettings;
use eventline_core::handler::HandlerError;
use eventline_core::producer::PublishError;
use eventline_core::registry::HandlerRegistry;
use eventline_core::shutdown::{ShutdownSignal, ShutdownTrigger, shutdown_channel};
use eventline_core::source::{InboundMessage, MessageSource, SourceError};
use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};
use thiserror::Error;
use tokio::sync::watch;
use tokio::task::JoinHandle;

/// Errors that stop the consumer loop.
#[derive(Error, Debug)]
pub enum ConsumerError {
    /// The initial subscription failed.
    #[error("Failed to subscribe: {0}")]
    Subscribe(#[from] SourceError),

    /// The background task panicked or was aborted.
    #[error("Consumer task failed: {0}")]
    Task(String),
}

/// Lifecycle states of the loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConsumerState {
    /// Constructed, not yet subscribed
    Idle,
    /// Subscription established
    Subscribed,
    /// Waiting on the broker
    Polling,
    /// Running the handler under retry
    Processing,
    /// Advancing the offset
    Committing,
    /// Publishing a dead letter
    DeadLettering,
    /// Shutdown observed, releasing the subscription
    Draining,
    /// Subscription closed
    Stopped,
}

impl fmt::Display for ConsumerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// What happened to one message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Disposition {
    Handled,
    Skipped,
    DeadLettered,
    /// The dead letter could not be published; the offset was withheld.
    Withheld,
    /// Shutdown interrupted processing; the offset was not committed.
    Cancelled,
}

/// Counters reported when the loop stops.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ConsumerStats {
    /// Messages pulled from the broker
    pub polled: u64,
    /// Messages a handler processed successfully
    pub handled: u64,
    /// Messages skipped without a handler
    pub skipped: u64,
    /// Messages moved to the dead-letter topic
    pub dead_lettered: u64,
    /// Messages whose offset was withheld after a dead-letter failure
    pub withheld: u64,
    /// Failed poll calls
    pub poll_errors: u64,
    /// Failed commits
    pub commit_failures: u64,
}

/// Loop settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConsumerOptions {
    /// Topics to subscribe to
    pub topics: Vec<String>,
    /// Upper bound on one poll call
    pub poll_timeout: Duration,
    /// Whether the client commits stored offsets by itself
    pub auto_commit: bool,
}

impl ConsumerOptions {
    /// Options for `topics` with a one-second poll and manual commits.
    #[must_use]
    pub fn new(topics: Vec<String>) -> Self {
        Self {
            topics,
            poll_timeout: Duration::from_secs(1),
            auto_commit: false,
        }
    }

    /// Derive options from the `[consumer]` configuration section.
    #[must_use]
    pub fn from_settings(settings: &ConsumerSettings) -> Self {
        Self {
            topics: settings.topics.clone(),
            poll_timeout: settings.poll_timeout(),
            auto_commit: settings.enable_auto_commit,
        }
    }
}

/// Owns the source and closes it exactly once, however the loop exits.
struct SourceGuard<S: MessageSource> {
    source: S,
    closed: bool,
}

impl<S: MessageSource> SourceGuard<S> {
    const fn new(source: S) -> Self {
        Self {
            source,
            closed: false,
        }
    }

    fn close(&mut self) {
        if !self.closed {
            self.closed = true;
            self.source.close();
        }
    }
}

impl<S: MessageSource> Drop for SourceGuard<S> {
    fn drop(&mut self) {
        self.close();
    }
}

/// Long-running consumer for one subscription.
///
/// # Example
///
/// ```rust,ignore
/// let consumer = ConsumerLoop::new(
///     KafkaMessageSource::new(&config.consumer)?,
///     Arc::new(registry),
///     DeadLetterPublisher::new(producer, &config.dead_letter.topic, &config.producer.client_id),
///     ConsumerOptions::from_settings(&config.consumer),
/// );
///
/// let handle = consumer.spawn();
/// tokio::signal::ctrl_c().await?;
/// let stats = handle.stop().await?;
/// ```
pub struct ConsumerLoop<S: MessageSource> {
    source: SourceGuard<S>,
    registry: Arc<HandlerRegistry>,
    retry: RetryExecutor,
    dead_letters: DeadLetterPublisher,
    options: ConsumerOptions,
    shutdown: ShutdownSignal,
    state: watch::Sender<ConsumerState>,
    stats: ConsumerStats,
}

impl<S: MessageSource> ConsumerLoop<S> {
    /// Create a loop with the default retry policy (3 attempts, 100ms apart).
    #[must_use]
    pub fn new(
        source: S,
        registry: Arc<HandlerRegistry>,
        dead_letters: DeadLetterPublisher,
        options: ConsumerOptions,
    ) -> Self {
        Self {
            source: SourceGuard::new(source),
            registry,
            retry: RetryExecutor::default(),
            dead_letters,
            options,
            shutdown: ShutdownSignal::never(),
            state: watch::Sender::new(ConsumerState::Idle),
            stats: ConsumerStats::default(),
        }
    }

    /// Replace the retry policy.
    #[must_use]
    pub const fn with_retry_policy(mut self, policy: RetryPolicy) -> Self {
        self.retry = RetryExecutor::new(policy);
        self
    }

    /// Watch the lifecycle state; the receiver stays valid after the loop
    /// has been moved into [`ConsumerLoop::run`].
    #[must_use]
    pub fn state(&self) -> watch::Receiver<ConsumerState> {
        self.state.subscribe()
    }

    /// Subscribe and process messages until `shutdown` fires.
    ///
    /// # Errors
    ///
    /// Returns [`ConsumerError::Subscribe`] if the subscription fails. Nothing
    /// after that stops the loop except `shutdown`.
    pub async fn run(mut self, shutdown: ShutdownSignal) -> Result<ConsumerStats, ConsumerError> {
        self.shutdown = shutdown;

        self.source.source.subscribe(&self.options.topics)?;
        self.transition(ConsumerState::Subscribed);

        tracing::info!(
            topics = ?self.options.topics,
            auto_commit = self.options.auto_commit,
            poll_timeout_ms = self.options.poll_timeout.as_millis(),
            dlq_topic = %self.dead_letters.topic(),
            "Consumer subscribed"
        );

        for topic in self.registry.unmapped(&self.options.topics) {
            tracing::warn!(topic = %topic, "Subscribed topic has no registered handler");
        }

        while !self.shutdown.is_triggered() {
            self.transition(ConsumerState::Polling);

            let polled = tokio::select! {
                biased;
                () = self.shutdown.cancelled() => break,
                polled = self.source.source.poll(self.options.poll_timeout) => polled,
            };

            let message = match polled {
                Ok(Some(message)) => message,
                Ok(None) => continue,
                Err(e) => {
                    self.stats.poll_errors += 1;
                    ConsumerMetrics::record_poll_error();
                    tracing::error!(error = %e, "Kafka poll failed, continuing");
                    continue;
                },
            };

            self.stats.polled += 1;
            ConsumerMetrics::record_polled();

            if self.process(&message).await == Disposition::Cancelled {
                break;
            }
        }

        self.transition(ConsumerState::Draining);
        self.source.close();
        self.transition(ConsumerState::Stopped);

        tracing::info!(stats = ?self.stats, "Consumer stopped");
        Ok(self.stats.clone())
    }

    /// Run on a background task with its own shutdown trigger.
    #[must_use]
    pub fn spawn(self) -> ConsumerHandle
    where
        S: 'static,
    {
        let (trigger, signal) = shutdown_channel();
        let state = self.state();
        let task = tokio::spawn(self.run(signal));
        ConsumerHandle {
            trigger,
            state,
            task,
        }
    }

    async fn process(&mut self, message: &InboundMessage) -> Disposition {
        self.transition(ConsumerState::Processing);

        let Some(payload) = message.payload.as_deref() else {
            tracing::debug!(
                topic = %message.topic,
                partition = message.partition,
                offset = message.offset,
                "Message has no payload, skipping"
            );
            return self.skip(message);
        };

        let Some(handler) = self.registry.resolve(&message.topic).cloned() else {
            tracing::warn!(
                topic = %message.topic,
                partition = message.partition,
                offset = message.offset,
                "No handler registered for topic, skipping"
            );
            return self.skip(message);
        };

        let key = message.key_or_empty();
        let started = Instant::now();
        let shutdown = &self.shutdown;
        let outcome = self
            .retry
            .execute(shutdown, |attempt| {
                tracing::trace!(
                    topic = %message.topic,
                    offset = message.offset,
                    attempt,
                    "Invoking handler"
                );
                handler.handle(key, payload, shutdown.clone())
            })
            .await;

        match outcome {
            RetryOutcome::Succeeded { attempts } => {
                tracing::debug!(
                    topic = %message.topic,
                    partition = message.partition,
                    offset = message.offset,
                    attempts,
                    "Message handled"
                );
                self.stats.handled += 1;
                ConsumerMetrics::record_handled(started.elapsed());
                self.commit(message);
                Disposition::Handled
            },
            RetryOutcome::Cancelled { .. } => {
                tracing::info!(
                    topic = %message.topic,
                    partition = message.partition,
                    offset = message.offset,
                    "Shutdown during processing, offset not committed"
                );
                Disposition::Cancelled
            },
            RetryOutcome::Exhausted {
                attempts,
                last_error,
            } => self.dead_letter(message, &last_error, attempts, started).await,
        }
    }

    async fn dead_letter(
        &mut self,
        message: &InboundMessage,
        error: &HandlerError,
        attempts: u32,
        started: Instant,
    ) -> Disposition {
        self.transition(ConsumerState::DeadLettering);

        tracing::error!(
            topic = %message.topic,
            partition = message.partition,
            offset = message.offset,
            key = %message.key_or_empty(),
            attempts,
            error_type = error.kind(),
            error = %error,
            "Handler failed after max attempts, dead-lettering"
        );

        match self
            .dead_letters
            .send_to_dlq(message, error, attempts, &self.shutdown)
            .await
        {
            Ok(_) => {
                self.stats.dead_lettered += 1;
                ConsumerMetrics::record_dead_lettered(started.elapsed());
                self.commit(message);
                Disposition::DeadLettered
            },
            Err(PublishError::Cancelled { .. }) => Disposition::Cancelled,
            Err(_) => {
                self.stats.withheld += 1;
                ConsumerMetrics::record_withheld();
                tracing::error!(
                    topic = %message.topic,
                    partition = message.partition,
                    offset = message.offset,
                    "Failed to publish DLQ, offset NOT committed"
                );
                if let Err(e) = self.source.source.rewind(message) {
                    tracing::warn!(
                        error = %e,
                        "Failed to rewind withheld message (redelivered after restart)"
                    );
                }
                Disposition::Withheld
            },
        }
    }

    fn skip(&mut self, message: &InboundMessage) -> Disposition {
        self.stats.skipped += 1;
        ConsumerMetrics::record_skipped();
        self.commit(message);
        Disposition::Skipped
    }

    fn commit(&mut self, message: &InboundMessage) {
        self.transition(ConsumerState::Committing);

        let committed = if self.options.auto_commit {
            self.source.source.store(message)
        } else {
            self.source.source.commit(message)
        };

        if let Err(e) = committed {
            self.stats.commit_failures += 1;
            ConsumerMetrics::record_commit_failure();
            tracing::warn!(
                topic = %message.topic,
                partition = message.partition,
                offset = message.offset,
                error = %e,
                "Failed to commit offset (message may be redelivered)"
            );
        }
    }

    fn transition(&self, next: ConsumerState) {
        let previous = self.state.send_replace(next);
        tracing::trace!(from = %previous, to = %next, "Consumer state transition");
    }
}

impl<S: MessageSource> fmt::Debug for ConsumerLoop<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConsumerLoop")
            .field("state", &*self.state.borrow())
            .field("options", &self.options)
            .field("registry", &self.registry)
            .field("stats", &self.stats)
            .finish_non_exhaustive()
    }
}

/// Start/stop handle for a spawned [`ConsumerLoop`].
#[derive(Debug)]
pub struct ConsumerHandle {
    trigger: ShutdownTrigger,
    state: watch::Receiver<ConsumerState>,
    task: JoinHandle<Result<ConsumerStats, ConsumerError>>,
}

impl ConsumerHandle {
    /// The loop's current lifecycle state.
    #[must_use]
    pub fn state(&self) -> ConsumerState {
        *self.state.borrow()
    }

    /// Wait until the loop reaches a state matching `predicate`.
    ///
    /// Returns the matching state, or `None` if the loop exited without
    /// reaching one.
    pub async fn wait_for_state(
        &mut self,
        mut predicate: impl FnMut(ConsumerState) -> bool,
    ) -> Option<ConsumerState> {
        self.state
            .wait_for(|state| predicate(*state))
            .await
            .ok()
            .map(|state| *state)
    }

    /// Request shutdown and wait for the loop to drain.
    ///
    /// # Errors
    ///
    /// Returns the loop's own error, or [`ConsumerError::Task`] if it panicked.
    pub async fn stop(self) -> Result<ConsumerStats, ConsumerError> {
        self.trigger.trigger();
        self.task
            .await
            .map_err(|e| ConsumerError::Task(e.to_string()))?
    }
}
