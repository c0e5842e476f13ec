//! Message handlers and the typed JSON adapter.
//!
//! An [`EventHandler`] receives the raw key and payload of one broker message.
//! Any error it returns is treated as retryable by the consumer loop; after
//! the retry budget is spent the message is dead-lettered.
//!
//! Most handlers want a typed [`Envelope`] rather than a raw string. They
//! implement [`EnvelopeHandler`] and are wrapped in a [`JsonHandler`], which
//! enforces the parse-layer policy:
//!
//! - malformed JSON (or a missing/mistyped `data`) is logged and reported as
//!   success, so a payload that can never parse does not loop through retries
//! - an envelope from a newer schema version than the handler understands
//!   fails closed with [`HandlerError::UnsupportedVersion`]
//!
//! # Example
//!
//! ```rust,ignore
//! struct OrderCreatedHandler;
//!
//! impl EnvelopeHandler for OrderCreatedHandler {
//!     type Data = OrderCreatedV1;
//!     const SUPPORTED_VERSION: u32 = 1;
//!
//!     fn handle_envelope(&self, envelope: Envelope<OrderCreatedV1>, _shutdown: ShutdownSignal)
//!         -> impl Future<Output = Result<(), HandlerError>> + Send
//!     {
//!         async move {
//!             tracing::info!(order_id = %envelope.data().order_id, "Received OrderCreated");
//!             Ok(())
//!         }
//!     }
//! }
//!
//! let handler: Arc<dyn EventHandler> = Arc::new(JsonHandler::new(OrderCreatedHandler));
//! ```

use crate::envelope::Envelope;
use crate::shutdown::ShutdownSignal;
use serde::de::DeserializeOwned;
use std::future::Future;
use std::pin::Pin;
use thiserror::Error;

/// Error returned by a handler.
///
/// The consumer loop does not distinguish transient from permanent failures;
/// every variant is retried up to the cap. [`HandlerError::kind`] becomes the
/// `errorType` of the dead-letter record.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum HandlerError {
    /// Envelope declares a schema version newer than the handler supports.
    #[error("unsupported {event_type} version {found} (supported up to {supported})")]
    UnsupportedVersion {
        /// Event type of the rejected envelope
        event_type: String,
        /// Version found on the wire
        found: u32,
        /// Highest version the handler understands
        supported: u32,
    },

    /// Any other processing failure.
    #[error("{message}")]
    Failed {
        /// Short type name of the originating error
        kind: String,
        /// Human-readable message
        message: String,
    },
}

impl HandlerError {
    /// Build a failure with an explicit kind.
    #[must_use]
    pub fn new(kind: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Failed {
            kind: kind.into(),
            message: message.into(),
        }
    }

    /// Capture an arbitrary error, recording its type name as the kind.
    #[must_use]
    pub fn from_error<E: std::error::Error>(error: &E) -> Self {
        Self::Failed {
            kind: short_type_name::<E>().to_string(),
            message: error.to_string(),
        }
    }

    /// Classification used as the dead-letter `errorType`.
    #[must_use]
    pub fn kind(&self) -> &str {
        match self {
            Self::UnsupportedVersion { .. } => "UnsupportedVersion",
            Self::Failed { kind, .. } => kind,
        }
    }
}

/// Last path segment of a type name, without generic arguments.
fn short_type_name<T: ?Sized>() -> &'static str {
    let full = std::any::type_name::<T>();
    let base = full.split('<').next().unwrap_or(full);
    base.rsplit("::").next().unwrap_or(base)
}

/// Processes raw messages for one topic.
///
/// Handlers may be invoked more than once for the same message (retries,
/// redelivery), so they must be idempotent.
///
/// # Dyn Compatibility
///
/// Returns `Pin<Box<dyn Future>>` so handlers can be stored as
/// `Arc<dyn EventHandler>` in the [`HandlerRegistry`](crate::registry::HandlerRegistry).
pub trait EventHandler: Send + Sync {
    /// Handle one message.
    ///
    /// `shutdown` fires when the process is stopping; long-running handlers
    /// should observe it.
    ///
    /// # Errors
    ///
    /// Any error is retried, then dead-lettered.
    fn handle<'a>(
        &'a self,
        key: &'a str,
        raw_payload: &'a str,
        shutdown: ShutdownSignal,
    ) -> Pin<Box<dyn Future<Output = Result<(), HandlerError>> + Send + 'a>>;
}

/// Handler for a typed envelope payload.
///
/// Wrap implementations in [`JsonHandler`] to register them.
pub trait EnvelopeHandler: Send + Sync {
    /// Shape of the envelope `data`.
    type Data: DeserializeOwned + Send;

    /// Highest envelope version this handler understands.
    const SUPPORTED_VERSION: u32;

    /// Handle a parsed, validated envelope.
    ///
    /// # Errors
    ///
    /// Any error is retried, then dead-lettered.
    fn handle_envelope(
        &self,
        envelope: Envelope<Self::Data>,
        shutdown: ShutdownSignal,
    ) -> impl Future<Output = Result<(), HandlerError>> + Send;
}

/// Adapts an [`EnvelopeHandler`] to the raw [`EventHandler`] interface.
#[derive(Debug, Clone)]
pub struct JsonHandler<H> {
    inner: H,
}

impl<H> JsonHandler<H> {
    /// Wrap `inner`.
    #[must_use]
    pub const fn new(inner: H) -> Self {
        Self { inner }
    }

    /// Access the wrapped handler.
    #[must_use]
    pub const fn inner(&self) -> &H {
        &self.inner
    }
}

impl<H: EnvelopeHandler> EventHandler for JsonHandler<H> {
    fn handle<'a>(
        &'a self,
        key: &'a str,
        raw_payload: &'a str,
        shutdown: ShutdownSignal,
    ) -> Pin<Box<dyn Future<Output = Result<(), HandlerError>> + Send + 'a>> {
        Box::pin(async move {
            let envelope = match serde_json::from_str::<Envelope<H::Data>>(raw_payload) {
                Ok(envelope) => envelope,
                Err(e) => {
                    tracing::warn!(
                        key = %key,
                        error = %e,
                        "Invalid event payload, treating as consumed"
                    );
                    return Ok(());
                },
            };

            if let Err(e) = envelope.validate() {
                tracing::warn!(
                    key = %key,
                    event_id = %envelope.event_id(),
                    error = %e,
                    "Invalid event envelope, treating as consumed"
                );
                return Ok(());
            }

            if envelope.version() > H::SUPPORTED_VERSION {
                return Err(HandlerError::UnsupportedVersion {
                    event_type: envelope.event_type().to_string(),
                    found: envelope.version(),
                    supported: H::SUPPORTED_VERSION,
                });
            }

            self.inner.handle_envelope(envelope, shutdown).await
        })
    }
}
