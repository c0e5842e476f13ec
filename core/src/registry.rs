//! Topic → handler lookup.
//!
//! The registry is an immutable map built once at startup. Each topic has at
//! most one handler; a second registration for the same topic is a startup
//! error rather than a silent override.

use crate::handler::EventHandler;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use thiserror::Error;

/// Errors raised while building a [`HandlerRegistry`].
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RegistryError {
    /// Topic name was empty or whitespace.
    #[error("Cannot register a handler for an empty topic")]
    EmptyTopic,

    /// A handler is already registered for this topic.
    #[error("A handler is already registered for topic '{0}'")]
    DuplicateTopic(String),
}

/// Immutable mapping from topic name to its handler.
#[derive(Clone, Default)]
pub struct HandlerRegistry {
    handlers: HashMap<String, Arc<dyn EventHandler>>,
}

impl HandlerRegistry {
    /// Start building a registry.
    #[must_use]
    pub fn builder() -> HandlerRegistryBuilder {
        HandlerRegistryBuilder::default()
    }

    /// Handler registered for `topic`, if any.
    #[must_use]
    pub fn resolve(&self, topic: &str) -> Option<&Arc<dyn EventHandler>> {
        self.handlers.get(topic)
    }

    /// Whether `topic` has a handler.
    #[must_use]
    pub fn contains(&self, topic: &str) -> bool {
        self.handlers.contains_key(topic)
    }

    /// Registered topics, sorted.
    #[must_use]
    pub fn topics(&self) -> Vec<&str> {
        let mut topics: Vec<&str> = self.handlers.keys().map(String::as_str).collect();
        topics.sort_unstable();
        topics
    }

    /// Topics from `subscribed` that have no handler.
    ///
    /// Messages on these topics will be skipped; call this at startup to
    /// surface the configuration gap early.
    #[must_use]
    pub fn unmapped<'a>(&self, subscribed: &'a [String]) -> Vec<&'a str> {
        subscribed
            .iter()
            .map(String::as_str)
            .filter(|topic| !self.contains(topic))
            .collect()
    }

    /// Number of registered handlers.
    #[must_use]
    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    /// Whether no handler is registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }
}

impl fmt::Debug for HandlerRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HandlerRegistry")
            .field("topics", &self.topics())
            .finish()
    }
}

/// Builder for [`HandlerRegistry`].
///
/// ```
/// use eventline_core::registry::HandlerRegistry;
/// # use eventline_core::handler::{EventHandler, HandlerError};
/// # use eventline_core::shutdown::ShutdownSignal;
/// # use std::{future::Future, pin::Pin, sync::Arc};
/// # struct Noop;
/// # impl EventHandler for Noop {
/// #     fn handle<'a>(&'a self, _: &'a str, _: &'a str, _: ShutdownSignal)
/// #         -> Pin<Box<dyn Future<Output = Result<(), HandlerError>> + Send + 'a>> {
/// #         Box::pin(async { Ok(()) })
/// #     }
/// # }
///
/// # fn main() -> Result<(), Box<dyn std::error::Error>> {
/// let registry = HandlerRegistry::builder()
///     .register("order.created.v1", Arc::new(Noop))?
///     .build();
///
/// assert!(registry.resolve("order.created.v1").is_some());
/// assert!(registry.resolve("user.created.v1").is_none());
/// # Ok(())
/// # }
/// ```
#[derive(Default)]
pub struct HandlerRegistryBuilder {
    handlers: HashMap<String, Arc<dyn EventHandler>>,
}

impl HandlerRegistryBuilder {
    /// Register `handler` for `topic`.
    ///
    /// # Errors
    ///
    /// - [`RegistryError::EmptyTopic`] for a blank topic
    /// - [`RegistryError::DuplicateTopic`] if the topic already has a handler
    pub fn register(
        mut self,
        topic: impl Into<String>,
        handler: Arc<dyn EventHandler>,
    ) -> Result<Self, RegistryError> {
        let topic = topic.into();
        if topic.trim().is_empty() {
            return Err(RegistryError::EmptyTopic);
        }
        if self.handlers.contains_key(&topic) {
            return Err(RegistryError::DuplicateTopic(topic));
        }
        self.handlers.insert(topic, handler);
        Ok(self)
    }

    /// Freeze the registry.
    #[must_use]
    pub fn build(self) -> HandlerRegistry {
        tracing::debug!(handlers = self.handlers.len(), "Handler registry built");
        HandlerRegistry {
            handlers: self.handlers,
        }
    }
}
