//! Handlers for the event contracts this service consumes.

use eventline_core::contracts::{ORDER_CREATED_V1, OrderCreatedV1, USER_CREATED_V1, UserCreatedV1};
use eventline_core::envelope::Envelope;
use eventline_core::handler::{EnvelopeHandler, HandlerError, JsonHandler};
use eventline_core::registry::{HandlerRegistry, RegistryError};
use eventline_core::shutdown::ShutdownSignal;
use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

/// Logs every order placed by a user.
#[derive(Debug, Default)]
pub struct OrderCreatedHandler {
    received: AtomicU64,
}

impl OrderCreatedHandler {
    /// Orders seen so far.
    #[must_use]
    pub fn received(&self) -> u64 {
        self.received.load(Ordering::Relaxed)
    }
}

impl EnvelopeHandler for OrderCreatedHandler {
    type Data = OrderCreatedV1;
    const SUPPORTED_VERSION: u32 = 1;

    fn handle_envelope(
        &self,
        envelope: Envelope<OrderCreatedV1>,
        _shutdown: ShutdownSignal,
    ) -> impl Future<Output = Result<(), HandlerError>> + Send {
        let order = envelope.data();
        tracing::info!(
            event_id = %envelope.event_id(),
            order_id = %order.order_id,
            user_id = %order.user_id,
            product = %order.product,
            quantity = order.quantity,
            price = order.price,
            "Received OrderCreated"
        );
        self.received.fetch_add(1, Ordering::Relaxed);
        async { Ok(()) }
    }
}

/// Logs every newly registered user.
#[derive(Debug, Default)]
pub struct UserCreatedHandler {
    received: AtomicU64,
}

impl UserCreatedHandler {
    /// Users seen so far.
    #[must_use]
    pub fn received(&self) -> u64 {
        self.received.load(Ordering::Relaxed)
    }
}

impl EnvelopeHandler for UserCreatedHandler {
    type Data = UserCreatedV1;
    const SUPPORTED_VERSION: u32 = 1;

    fn handle_envelope(
        &self,
        envelope: Envelope<UserCreatedV1>,
        _shutdown: ShutdownSignal,
    ) -> impl Future<Output = Result<(), HandlerError>> + Send {
        let user = envelope.data();
        tracing::info!(
            event_id = %envelope.event_id(),
            user_id = %user.user_id,
            name = %user.name,
            email = %user.email,
            "Received UserCreated"
        );
        self.received.fetch_add(1, Ordering::Relaxed);
        async { Ok(()) }
    }
}

/// Registry with a handler for every known contract.
///
/// # Errors
///
/// Returns [`RegistryError`] if two handlers claim the same topic.
pub fn registry() -> Result<HandlerRegistry, RegistryError> {
    Ok(HandlerRegistry::builder()
        .register(
            ORDER_CREATED_V1,
            Arc::new(JsonHandler::new(OrderCreatedHandler::default())),
        )?
        .register(
            USER_CREATED_V1,
            Arc::new(JsonHandler::new(UserCreatedHandler::default())),
        )?
        .build())
}
