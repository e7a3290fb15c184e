//! Order, agent, and account models shared with the backend.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use std::{fmt, str::FromStr};

/// Opaque backend identifier. The API sends either numbers or strings.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize)]
#[serde(transparent)]
pub struct RecordId(String);

/// Identity of an order, stable for its lifetime.
pub type OrderId = RecordId;

impl RecordId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Id as sent in URLs.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for RecordId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for RecordId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl From<u64> for RecordId {
    fn from(n: u64) -> Self {
        Self(n.to_string())
    }
}

impl<'de> Deserialize<'de> for RecordId {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum RawId {
            Text(String),
            Number(i64),
        }
        Ok(match RawId::deserialize(deserializer)? {
            RawId::Text(s) => Self(s),
            RawId::Number(n) => Self(n.to_string()),
        })
    }
}

/// Delivery status of an order, in lifecycle order.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OrderStatus {
    Pending,
    Accepted,
    HeadingToGasStation,
    AtGasStation,
    PickedUp,
    HeadingToCustomer,
    Delivered,
    #[serde(alias = "cancelled")]
    Canceled,
}

impl OrderStatus {
    /// The forward path an order walks. `Canceled` sits outside it.
    pub const LIFECYCLE: [OrderStatus; 7] = [
        OrderStatus::Pending,
        OrderStatus::Accepted,
        OrderStatus::HeadingToGasStation,
        OrderStatus::AtGasStation,
        OrderStatus::PickedUp,
        OrderStatus::HeadingToCustomer,
        OrderStatus::Delivered,
    ];

    /// Every status, including the alternate terminal one.
    pub const ALL: [OrderStatus; 8] = [
        OrderStatus::Pending,
        OrderStatus::Accepted,
        OrderStatus::HeadingToGasStation,
        OrderStatus::AtGasStation,
        OrderStatus::PickedUp,
        OrderStatus::HeadingToCustomer,
        OrderStatus::Delivered,
        OrderStatus::Canceled,
    ];

    /// The single status an agent may advance to, if any.
    pub fn successor(self) -> Option<OrderStatus> {
        let idx = Self::LIFECYCLE.iter().position(|s| *s == self)?;
        Self::LIFECYCLE.get(idx + 1).copied()
    }

    /// Delivered and canceled orders never move again.
    pub fn is_terminal(self) -> bool {
        matches!(self, OrderStatus::Delivered | OrderStatus::Canceled)
    }

    /// Wire name used by the API.
    pub fn as_str(self) -> &'static str {
        match self {
            OrderStatus::Pending => "pending",
            OrderStatus::Accepted => "accepted",
            OrderStatus::HeadingToGasStation => "heading_to_gas_station",
            OrderStatus::AtGasStation => "at_gas_station",
            OrderStatus::PickedUp => "picked_up",
            OrderStatus::HeadingToCustomer => "heading_to_customer",
            OrderStatus::Delivered => "delivered",
            OrderStatus::Canceled => "canceled",
        }
    }

    /// Label shown next to the advance button.
    pub fn label(self) -> &'static str {
        match self {
            OrderStatus::Pending => "Pending",
            OrderStatus::Accepted => "Accepted",
            OrderStatus::HeadingToGasStation => "Heading to gas station",
            OrderStatus::AtGasStation => "At gas station",
            OrderStatus::PickedUp => "Picked up",
            OrderStatus::HeadingToCustomer => "Heading to customer",
            OrderStatus::Delivered => "Delivered",
            OrderStatus::Canceled => "Canceled",
        }
    }
}

impl fmt::Display for OrderStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for OrderStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        if s == "cancelled" {
            return Ok(OrderStatus::Canceled);
        }
        Self::ALL
            .into_iter()
            .find(|st| st.as_str() == s)
            .ok_or_else(|| format!("unknown order status: {s}"))
    }
}

/// Latitude/longitude pair.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct GeoPoint {
    pub latitude: f64,
    pub longitude: f64,
}

/// Pickup or drop-off party on an order.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Party {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub address: String,
    #[serde(default)]
    pub location: Option<GeoPoint>,
    #[serde(default)]
    pub phone: Option<String>,
}

/// One delivery job as returned by the API.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Order {
    #[serde(alias = "_id")]
    pub id: OrderId,
    #[serde(default)]
    pub order_number: Option<String>,
    pub status: OrderStatus,
    #[serde(default)]
    pub gas_station: Option<Party>,
    #[serde(default)]
    pub customer: Option<Party>,
    #[serde(default)]
    pub gas_type: Option<String>,
    #[serde(default)]
    pub quantity: Option<u32>,
    #[serde(default)]
    pub accessories: Vec<String>,
    #[serde(default)]
    pub total_amount: Option<f64>,
    #[serde(default)]
    pub delivery_fee: Option<f64>,
    #[serde(default)]
    pub estimated_time: Option<String>,
    #[serde(default)]
    pub agent_notes: Option<String>,
    #[serde(default)]
    pub created_at: Option<DateTime<Utc>>,
}

impl Order {
    /// Minimal order with only identity and status set.
    pub fn new(id: impl Into<OrderId>, status: OrderStatus) -> Self {
        Self {
            id: id.into(),
            order_number: None,
            status,
            gas_station: None,
            customer: None,
            gas_type: None,
            quantity: None,
            accessories: vec![],
            total_amount: None,
            delivery_fee: None,
            estimated_time: None,
            agent_notes: None,
            created_at: None,
        }
    }
}

/// Paging info attached to order lists.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Pagination {
    #[serde(default)]
    pub page: u32,
    #[serde(default)]
    pub limit: u32,
    #[serde(default)]
    pub total: u64,
    #[serde(default)]
    pub pages: u32,
}

/// `GET /api/orders` body.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct OrderList {
    #[serde(default)]
    pub orders: Vec<Order>,
    #[serde(default)]
    pub pagination: Option<Pagination>,
}

/// Aggregated counts for history views.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderStats {
    #[serde(default)]
    pub pending: u64,
    #[serde(default)]
    pub active: u64,
    #[serde(default)]
    pub delivered: u64,
    #[serde(default, alias = "canceled")]
    pub cancelled: u64,
}

/// Availability value the backend stores for an agent.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AgentStatus {
    Online,
    Offline,
    Busy,
}

impl AgentStatus {
    /// Wire value for the status PATCH.
    pub fn as_str(self) -> &'static str {
        match self {
            AgentStatus::Online => "online",
            AgentStatus::Offline => "offline",
            AgentStatus::Busy => "busy",
        }
    }
}

/// Signed-in user account.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct User {
    #[serde(alias = "_id")]
    pub id: RecordId,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub phone: String,
    #[serde(default)]
    pub role: Option<String>,
}

/// Delivery-agent record linked to the user.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeliveryAgent {
    #[serde(alias = "_id")]
    pub id: RecordId,
    #[serde(default)]
    pub status: Option<AgentStatus>,
    #[serde(default)]
    pub account_status: Option<String>,
    #[serde(default)]
    pub is_active: Option<bool>,
}

/// Cached profile persisted under `userData`.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Profile {
    pub user: User,
    #[serde(default)]
    pub delivery_agent: Option<DeliveryAgent>,
}

/// `POST /api/auth/verify-otp` body.
#[derive(Clone, Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LoginResponse {
    pub token: String,
    pub user: User,
    #[serde(default)]
    pub delivery_agent: Option<DeliveryAgent>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn successor_walks_the_lifecycle_once() {
        assert_eq!(
            OrderStatus::Pending.successor(),
            Some(OrderStatus::Accepted)
        );
        assert_eq!(
            OrderStatus::HeadingToCustomer.successor(),
            Some(OrderStatus::Delivered)
        );
        assert_eq!(OrderStatus::Delivered.successor(), None);
        assert_eq!(OrderStatus::Canceled.successor(), None);
    }

    #[test]
    fn status_parses_wire_names_and_cancelled_alias() {
        for st in OrderStatus::ALL {
            assert_eq!(st.as_str().parse::<OrderStatus>(), Ok(st));
        }
        assert_eq!("cancelled".parse::<OrderStatus>(), Ok(OrderStatus::Canceled));
        assert!("shipped".parse::<OrderStatus>().is_err());

        let st: OrderStatus = serde_json::from_str("\"cancelled\"").unwrap();
        assert_eq!(st, OrderStatus::Canceled);
    }

    #[test]
    fn order_accepts_numeric_ids_and_sparse_payloads() {
        let order: Order = serde_json::from_value(serde_json::json!({
            "id": 1001,
            "status": "heading_to_gas_station",
            "gasType": "LPG 12kg",
            "customer": { "name": "Amina", "address": "12 Main St" }
        }))
        .unwrap();
        assert_eq!(order.id, OrderId::new("1001"));
        assert_eq!(order.status, OrderStatus::HeadingToGasStation);
        assert_eq!(order.gas_type.as_deref(), Some("LPG 12kg"));
        assert!(order.accessories.is_empty());
        assert!(order.gas_station.is_none());
    }

    #[test]
    fn order_accepts_mongo_style_ids() {
        let order: Order = serde_json::from_value(serde_json::json!({
            "_id": "65f0c2",
            "status": "pending"
        }))
        .unwrap();
        assert_eq!(order.id.as_str(), "65f0c2");
    }
}
