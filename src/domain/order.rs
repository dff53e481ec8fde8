use super::account::AccountId;
use super::geo::Location;
use crate::error::{LogisticsError, Result};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

pub type OrderId = u64;

#[derive(Debug, Serialize, Deserialize, PartialEq, Eq, Clone, Copy, Hash)]
#[serde(rename_all = "snake_case")]
pub enum OrderStatus {
    Pending,
    Accepted,
    InTransit,
    Delivered,
    Cancelled,
}

impl OrderStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Accepted => "accepted",
            Self::InTransit => "in_transit",
            Self::Delivered => "delivered",
            Self::Cancelled => "cancelled",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Delivered | Self::Cancelled)
    }

    /// Only orders that have not left the vendor can be cancelled.
    pub fn can_cancel(&self) -> bool {
        matches!(self, Self::Pending | Self::Accepted)
    }

    /// States in which the delivery tracker accepts live updates.
    pub fn in_delivery_phase(&self) -> bool {
        matches!(self, Self::Accepted | Self::InTransit)
    }
}

impl fmt::Display for OrderStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for OrderStatus {
    type Err = LogisticsError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "pending" => Ok(Self::Pending),
            "accepted" => Ok(Self::Accepted),
            "in_transit" => Ok(Self::InTransit),
            "delivered" => Ok(Self::Delivered),
            "cancelled" => Ok(Self::Cancelled),
            other => Err(LogisticsError::ValidationError(format!(
                "unknown order status '{other}'"
            ))),
        }
    }
}

#[derive(Debug, Serialize, Deserialize, PartialEq, Eq, Clone, Copy, Hash)]
#[serde(rename_all = "lowercase")]
pub enum Urgency {
    Low,
    Medium,
    High,
    Critical,
}

impl FromStr for Urgency {
    type Err = LogisticsError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "low" => Ok(Self::Low),
            "medium" => Ok(Self::Medium),
            "high" => Ok(Self::High),
            "critical" => Ok(Self::Critical),
            other => Err(LogisticsError::ValidationError(format!(
                "unknown urgency '{other}'"
            ))),
        }
    }
}

/// Payment state as last reported by the payment collaborator.
#[derive(Debug, Serialize, Deserialize, PartialEq, Eq, Clone, Copy, Default)]
#[serde(rename_all = "lowercase")]
pub enum PaymentStatus {
    #[default]
    Pending,
    Paid,
    Failed,
    Refunded,
}

/// Quoted price of an order. Always positive, also when decoded.
#[derive(Debug, Clone, Copy, PartialEq, PartialOrd, Serialize, Deserialize)]
#[serde(try_from = "Decimal", into = "Decimal")]
pub struct Amount(Decimal);

impl Amount {
    pub fn new(value: Decimal) -> Result<Self> {
        if value > Decimal::ZERO {
            Ok(Self(value))
        } else {
            Err(LogisticsError::ValidationError(
                "Amount must be positive".to_string(),
            ))
        }
    }

    pub fn value(&self) -> Decimal {
        self.0
    }
}

impl TryFrom<Decimal> for Amount {
    type Error = LogisticsError;

    fn try_from(value: Decimal) -> Result<Self> {
        Self::new(value)
    }
}

impl From<Amount> for Decimal {
    fn from(amount: Amount) -> Self {
        amount.0
    }
}

impl FromStr for Amount {
    type Err = LogisticsError;

    fn from_str(s: &str) -> Result<Self> {
        let value = Decimal::from_str(s.trim())
            .map_err(|_| LogisticsError::ValidationError(format!("invalid amount '{s}'")))?;
        Self::new(value)
    }
}

impl fmt::Display for Amount {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// A hospital's request for filled cylinders.
///
/// The vendor side is only populated once a vendor accepts the order.
#[derive(Debug, Serialize, Deserialize, PartialEq, Clone)]
pub struct Order {
    pub id: OrderId,
    pub hospital_id: AccountId,
    pub vendor_id: Option<AccountId>,
    pub status: OrderStatus,
    pub payment_status: PaymentStatus,
    pub urgency: Urgency,
    pub quantity: u32,
    pub delivery_location: Location,
    pub special_instructions: Option<String>,
    pub total_amount: Option<Amount>,
    /// Running count of filled cylinders handed over.
    pub cylinders_sent: u32,
    /// Running count of empties collected from the hospital.
    pub empty_cylinders_returned: u32,
    pub created_at: DateTime<Utc>,
    pub updated_at: Option<DateTime<Utc>>,
    pub expected_delivery: Option<DateTime<Utc>>,
    pub delivered_at: Option<DateTime<Utc>>,
}

/// Input for placing an order.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct OrderDraft {
    pub quantity: u32,
    pub urgency: Urgency,
    pub delivery_location: Location,
    #[serde(default)]
    pub special_instructions: Option<String>,
    #[serde(default)]
    pub total_amount: Option<Amount>,
}

impl OrderDraft {
    pub fn new(quantity: u32, urgency: Urgency, delivery_location: Location) -> Self {
        Self {
            quantity,
            urgency,
            delivery_location,
            special_instructions: None,
            total_amount: None,
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.quantity == 0 {
            return Err(LogisticsError::ValidationError(
                "Quantity must be greater than 0".to_string(),
            ));
        }
        Ok(())
    }
}

/// Vendor-side delivery progress reported against an order.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct DeliveryProgress {
    pub status: OrderStatus,
    pub cylinders_sent: u32,
    pub empty_cylinders_returned: u32,
    #[serde(default)]
    pub delivered_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub notes: Option<String>,
}

#[derive(Debug, Serialize, Deserialize, PartialEq, Eq, Clone, Copy)]
#[serde(rename_all = "snake_case")]
pub enum OrderEventType {
    Created,
    StatusChanged,
    VendorAssigned,
    CylindersAssigned,
    CylindersUpdated,
    Cancelled,
    Completed,
}

impl OrderEventType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Created => "created",
            Self::StatusChanged => "status_changed",
            Self::VendorAssigned => "vendor_assigned",
            Self::CylindersAssigned => "cylinders_assigned",
            Self::CylindersUpdated => "cylinders_updated",
            Self::Cancelled => "cancelled",
            Self::Completed => "completed",
        }
    }
}

/// Immutable audit entry for an order; also the event stream behind delivery tracking.
#[derive(Debug, Serialize, Deserialize, PartialEq, Clone)]
pub struct OrderLog {
    pub id: u64,
    pub order_id: OrderId,
    pub event_type: OrderEventType,
    pub old_status: Option<OrderStatus>,
    pub new_status: Option<OrderStatus>,
    pub details: Option<serde_json::Value>,
    pub notes: Option<String>,
    pub created_by: AccountId,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct NewOrderLog {
    pub order_id: OrderId,
    pub event_type: OrderEventType,
    pub old_status: Option<OrderStatus>,
    pub new_status: Option<OrderStatus>,
    pub details: Option<serde_json::Value>,
    pub notes: Option<String>,
    pub created_by: AccountId,
}

impl NewOrderLog {
    pub fn new(order_id: OrderId, event_type: OrderEventType, created_by: AccountId) -> Self {
        Self {
            order_id,
            event_type,
            old_status: None,
            new_status: None,
            details: None,
            notes: None,
            created_by,
        }
    }

    pub fn transition(mut self, old: Option<OrderStatus>, new: OrderStatus) -> Self {
        self.old_status = old;
        self.new_status = Some(new);
        self
    }

    pub fn details(mut self, details: serde_json::Value) -> Self {
        self.details = Some(details);
        self
    }

    pub fn notes(mut self, notes: impl Into<Option<String>>) -> Self {
        self.notes = notes.into();
        self
    }

    pub fn into_log(self, id: u64, created_at: DateTime<Utc>) -> OrderLog {
        OrderLog {
            id,
            order_id: self.order_id,
            event_type: self.event_type,
            old_status: self.old_status,
            new_status: self.new_status,
            details: self.details,
            notes: self.notes,
            created_by: self.created_by,
            created_at,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct OrderFilter {
    pub hospital_id: Option<AccountId>,
    pub vendor_id: Option<AccountId>,
    pub status: Option<OrderStatus>,
}

impl OrderFilter {
    pub fn matches(&self, order: &Order) -> bool {
        self.hospital_id.is_none_or(|h| order.hospital_id == h)
            && self.vendor_id.is_none_or(|v| order.vendor_id == Some(v))
            && self.status.is_none_or(|s| order.status == s)
    }
}
