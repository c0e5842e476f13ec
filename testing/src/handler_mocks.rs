//! Scripted handler that records its invocations.

#![allow(clippy::unwrap_used)] // Test infrastructure uses unwrap for simplicity
#![allow(clippy::missing_panics_doc)]

use eventline_core::handler::{EventHandler, HandlerError};
use eventline_core::shutdown::ShutdownSignal;
use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Mutex};

/// One invocation of a [`ScriptedHandler`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HandlerCall {
    /// Message key
    pub key: String,
    /// Raw payload
    pub payload: String,
}

#[derive(Debug, Clone, Copy)]
enum Behaviour {
    Succeed,
    FailFirst(usize),
    AlwaysFail,
    AwaitShutdown,
}

/// [`EventHandler`] with scripted outcomes.
///
/// Every call is recorded before the outcome is decided.
///
/// # Example
///
/// ```
/// use eventline_testing::ScriptedHandler;
///
/// let flaky = ScriptedHandler::failing_first(2);
/// let probe = flaky.clone();
/// // register `flaky`, run the loop, then:
/// assert_eq!(probe.call_count(), 0);
/// ```
#[derive(Clone)]
pub struct ScriptedHandler {
    behaviour: Behaviour,
    error: HandlerError,
    calls: Arc<Mutex<Vec<HandlerCall>>>,
}

impl ScriptedHandler {
    fn with_behaviour(behaviour: Behaviour) -> Self {
        Self {
            behaviour,
            error: HandlerError::new("InvalidOperation", "Simulated processing failure"),
            calls: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// Always succeed.
    #[must_use]
    pub fn succeeding() -> Self {
        Self::with_behaviour(Behaviour::Succeed)
    }

    /// Fail the first `n` calls, then succeed.
    #[must_use]
    pub fn failing_first(n: usize) -> Self {
        Self::with_behaviour(Behaviour::FailFirst(n))
    }

    /// Fail every call.
    #[must_use]
    pub fn always_failing() -> Self {
        Self::with_behaviour(Behaviour::AlwaysFail)
    }

    /// Block until shutdown, then fail.
    #[must_use]
    pub fn awaiting_shutdown() -> Self {
        Self::with_behaviour(Behaviour::AwaitShutdown)
    }

    /// Use `error` for failing calls.
    #[must_use]
    pub fn with_error(mut self, error: HandlerError) -> Self {
        self.error = error;
        self
    }

    /// Recorded calls, in order.
    #[must_use]
    pub fn calls(&self) -> Vec<HandlerCall> {
        self.calls.lock().unwrap().clone()
    }

    /// Number of recorded calls.
    #[must_use]
    pub fn call_count(&self) -> usize {
        self.calls.lock().unwrap().len()
    }
}

impl EventHandler for ScriptedHandler {
    fn handle<'a>(
        &'a self,
        key: &'a str,
        raw_payload: &'a str,
        shutdown: ShutdownSignal,
    ) -> Pin<Box<dyn Future<Output = Result<(), HandlerError>> + Send + 'a>> {
        let call_number = {
            let mut calls = self.calls.lock().unwrap();
            calls.push(HandlerCall {
                key: key.to_string(),
                payload: raw_payload.to_string(),
            });
            calls.len()
        };

        Box::pin(async move {
            match self.behaviour {
                Behaviour::Succeed => Ok(()),
                Behaviour::FailFirst(n) if call_number <= n => Err(self.error.clone()),
                Behaviour::FailFirst(_) => Ok(()),
                Behaviour::AlwaysFail => Err(self.error.clone()),
                Behaviour::AwaitShutdown => {
                    shutdown.cancelled().await;
                    Err(HandlerError::new("Cancelled", "shutdown requested"))
                },
            }
        })
    }
}
