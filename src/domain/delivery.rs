//! Delivery projections folded from an order's log stream.
//!
//! Nothing here is stored. Both the status snapshot and the timeline are
//! recomputed from `OrderLog` entries, which are expected in commit order
//! (ascending sequence id). The reducers are plain functions so they can be
//! exercised without a store.

use super::order::{Order, OrderEventType, OrderId, OrderLog, OrderStatus};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Keys recognised inside an `OrderLog::details` payload.
pub const DETAILS_LOCATION: &str = "location";
pub const DETAILS_DRIVER: &str = "driver";
pub const DETAILS_CYLINDERS: &str = "cylinders";
pub const DETAILS_STATUS_UPDATE: &str = "status_update";

/// Driver attached to a delivery. Unknown fields are kept as-is.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct DriverInfo {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub phone: Option<String>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl DriverInfo {
    pub fn new(name: impl Into<String>, phone: impl Into<String>) -> Self {
        Self {
            name: Some(name.into()),
            phone: Some(phone.into()),
            extra: Map::new(),
        }
    }

    fn from_value(value: &Value) -> Option<Self> {
        serde_json::from_value(value.clone()).ok()
    }
}

/// A live tracking update pushed while the order is out with the vendor.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeliveryUpdate {
    pub status: OrderStatus,
    #[serde(default)]
    pub eta: Option<DateTime<Utc>>,
    #[serde(default)]
    pub current_location: Option<String>,
    #[serde(default)]
    pub notes: Option<String>,
}

impl DeliveryUpdate {
    pub fn new(status: OrderStatus) -> Self {
        Self {
            status,
            eta: None,
            current_location: None,
            notes: None,
        }
    }

    /// The `details` payload written to the order log for this update.
    pub fn to_details(&self, driver: Option<&DriverInfo>) -> Value {
        let mut details = Map::new();
        details.insert(
            DETAILS_LOCATION.to_string(),
            self.current_location
                .clone()
                .map(Value::String)
                .unwrap_or(Value::Null),
        );
        details.insert(
            DETAILS_STATUS_UPDATE.to_string(),
            serde_json::to_value(self).unwrap_or(Value::Null),
        );
        if let Some(driver) = driver {
            details.insert(
                DETAILS_DRIVER.to_string(),
                serde_json::to_value(driver).unwrap_or(Value::Null),
            );
        }
        Value::Object(details)
    }
}

/// Point-in-time view of a delivery.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeliveryStatus {
    pub order_id: OrderId,
    pub status: OrderStatus,
    pub eta: Option<DateTime<Utc>>,
    pub current_location: Option<String>,
    pub last_updated: DateTime<Utc>,
    pub driver_name: Option<String>,
    pub driver_phone: Option<String>,
    pub cylinders_loaded: usize,
    pub notes: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TimelineEvent {
    pub timestamp: DateTime<Utc>,
    pub event_type: OrderEventType,
    pub status: Option<OrderStatus>,
    pub description: String,
    pub location: Option<String>,
    pub driver_info: Option<Value>,
    pub cylinders_info: Option<Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeliveryTimeline {
    pub order_id: OrderId,
    pub current_status: OrderStatus,
    pub events: Vec<TimelineEvent>,
    pub eta: Option<DateTime<Utc>>,
    pub driver_name: Option<String>,
    pub driver_phone: Option<String>,
    pub cylinders_loaded: usize,
    pub cylinders_delivered: u32,
}

fn detail<'a>(log: &'a OrderLog, key: &str) -> Option<&'a Value> {
    log.details
        .as_ref()
        .and_then(|d| d.get(key))
        .filter(|v| !v.is_null())
}

fn location_of(log: &OrderLog) -> Option<String> {
    detail(log, DETAILS_LOCATION).map(|v| match v {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    })
}

/// Most recent entry by timestamp, ties broken by sequence id.
pub fn latest_entry(logs: &[OrderLog]) -> Option<&OrderLog> {
    logs.iter().max_by_key(|log| (log.created_at, log.id))
}

/// The last driver ever recorded, which need not be on the latest entry.
pub fn latest_driver(logs: &[OrderLog]) -> Option<DriverInfo> {
    logs.iter()
        .rev()
        .find_map(|log| detail(log, DETAILS_DRIVER).and_then(DriverInfo::from_value))
}

pub fn timeline_event(log: &OrderLog) -> TimelineEvent {
    TimelineEvent {
        timestamp: log.created_at,
        event_type: log.event_type,
        status: log.new_status,
        description: log.notes.clone().unwrap_or_default(),
        location: location_of(log),
        driver_info: detail(log, DETAILS_DRIVER).cloned(),
        cylinders_info: detail(log, DETAILS_CYLINDERS).cloned(),
    }
}

/// Folds the log into the current delivery snapshot.
pub fn snapshot(order: &Order, logs: &[OrderLog], cylinders_loaded: usize) -> DeliveryStatus {
    let latest = latest_entry(logs);
    let driver = latest
        .and_then(|log| detail(log, DETAILS_DRIVER))
        .and_then(DriverInfo::from_value)
        .unwrap_or_default();

    DeliveryStatus {
        order_id: order.id,
        status: order.status,
        eta: order.expected_delivery,
        current_location: latest.and_then(location_of),
        last_updated: latest
            .map(|log| log.created_at)
            .or(order.updated_at)
            .unwrap_or(order.created_at),
        driver_name: driver.name,
        driver_phone: driver.phone,
        cylinders_loaded,
        notes: latest.and_then(|log| log.notes.clone()),
    }
}

/// Builds the full timeline. `logs` must be in commit order.
pub fn timeline(order: &Order, logs: &[OrderLog], cylinders_loaded: usize) -> DeliveryTimeline {
    let driver = latest_driver(logs).unwrap_or_default();
    DeliveryTimeline {
        order_id: order.id,
        current_status: order.status,
        events: logs.iter().map(timeline_event).collect(),
        eta: order.expected_delivery,
        driver_name: driver.name,
        driver_phone: driver.phone,
        cylinders_loaded,
        cylinders_delivered: order.cylinders_sent,
    }
}
