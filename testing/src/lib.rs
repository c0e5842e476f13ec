//! # Eventline Testing
//!
//! Test doubles for the Eventline pipeline.
//!
//! This crate provides:
//! - [`ScriptedSource`]: an in-memory `MessageSource` replaying a fixed script
//! - [`RecordingProducer`]: an `EventProducer` that records or fails sends
//! - [`ScriptedHandler`]: an `EventHandler` with scripted outcomes
//! - [`FixedClock`]: deterministic time
//!
//! ## Example
//!
//! ```ignore
//! use eventline_testing::{RecordingProducer, ScriptedHandler, ScriptedSource};
//!
//! #[tokio::test]
//! async fn dead_letters_after_three_failures() {
//!     let (trigger, signal) = shutdown_channel();
//!     let source = ScriptedSource::new()
//!         .with_message(InboundMessage::new("orders", 0, 0, "user-42", "{}"))
//!         .stop_when_drained(trigger);
//!     let producer = Arc::new(RecordingProducer::new());
//!     let handler = ScriptedHandler::always_failing();
//!
//!     // build a ConsumerLoop over `source` and run it with `signal`
//!
//!     assert_eq!(handler.call_count(), 3);
//!     assert_eq!(producer.sent_to("service.dlq").len(), 1);
//! }
//! ```

use chrono::{DateTime, Utc};
use eventline_core::environment::Clock;

/// Scripted handlers
pub mod handler_mocks;

/// Recording producer
pub mod producer_mocks;

/// Scripted message source
pub mod source_mocks;

/// Mock implementations of Environment traits
pub mod mocks {
    use super::{Clock, DateTime, Utc};

    /// Fixed clock for deterministic tests
    ///
    /// Always returns the same time, making tests reproducible.
    ///
    /// # Example
    ///
    /// ```
    /// use eventline_testing::mocks::FixedClock;
    /// use eventline_core::environment::Clock;
    /// use chrono::Utc;
    ///
    /// let clock = FixedClock::new(Utc::now());
    /// assert_eq!(clock.now(), clock.now());
    /// ```
    #[derive(Debug, Clone)]
    pub struct FixedClock {
        time: DateTime<Utc>,
    }

    impl FixedClock {
        /// Create a new fixed clock with the given time
        #[must_use]
        pub const fn new(time: DateTime<Utc>) -> Self {
            Self { time }
        }
    }

    impl Clock for FixedClock {
        fn now(&self) -> DateTime<Utc> {
            self.time
        }
    }

    /// Create a default fixed clock for tests (2025-01-01 00:00:00 UTC)
    #[must_use]
    pub fn test_clock() -> FixedClock {
        FixedClock::new(DateTime::<Utc>::UNIX_EPOCH + chrono::TimeDelta::days(20_089))
    }
}

pub use handler_mocks::{HandlerCall, ScriptedHandler};
pub use mocks::{FixedClock, test_clock};
pub use producer_mocks::{RecordingProducer, SentMessage};
pub use source_mocks::{ScriptedSource, SourceProbe};

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_clock_is_new_year_2025() {
        let clock = test_clock();
        assert_eq!(clock.now(), clock.now());
        assert_eq!(clock.now().to_rfc3339(), "2025-01-01T00:00:00+00:00");
    }
}
