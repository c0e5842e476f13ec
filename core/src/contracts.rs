//! Event contracts exchanged between the order and user services.
//!
//! Each contract is the `data` of an [`Envelope`](crate::envelope::Envelope)
//! published on the topic of the same name. The `V1` suffix and topic suffix
//! track the schema version; a breaking change gets a new struct and topic.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Topic carrying [`OrderCreatedV1`].
pub const ORDER_CREATED_V1: &str = "order.created.v1";

/// Topic carrying [`UserCreatedV1`].
pub const USER_CREATED_V1: &str = "user.created.v1";

/// A user placed an order.
///
/// Keyed by `user_id` so all orders of one user stay in order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OrderCreatedV1 {
    /// Order identifier.
    pub order_id: String,
    /// Owning user; also the ordering key.
    pub user_id: String,
    /// Product name.
    pub product: String,
    /// Number of units.
    pub quantity: u32,
    /// Unit price.
    pub price: f64,
    /// When the order was stored.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_at_utc: Option<DateTime<Utc>>,
}

/// A user account was created.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserCreatedV1 {
    /// User identifier; also the ordering key.
    pub user_id: String,
    /// Display name.
    pub name: String,
    /// Contact email.
    pub email: String,
    /// When the user was stored.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_at_utc: Option<DateTime<Utc>>,
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::envelope::Envelope;

    #[test]
    fn order_created_reads_wire_shape() {
        let raw = r#"{
            "eventId": "0b6a2c4e-1111-4c4c-9999-aaaaaaaaaaaa",
            "eventType": "order.created.v1",
            "version": 1,
            "occurredAtUtc": "2026-10-17T09:30:00Z",
            "producer": "order-service",
            "key": "user-42",
            "data": {"orderId":"o1","userId":"user-42","product":"Widget","quantity":2,"price":9.99}
        }"#;

        let envelope: Envelope<OrderCreatedV1> = serde_json::from_str(raw).unwrap();
        assert_eq!(envelope.key(), "user-42");
        assert_eq!(envelope.data().product, "Widget");
        assert_eq!(envelope.data().quantity, 2);
        assert!((envelope.data().price - 9.99).abs() < f64::EPSILON);
        assert_eq!(envelope.data().created_at_utc, None);
    }
}
