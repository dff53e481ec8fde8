use super::account::{Account, AccountId, Role};
use super::cylinder::{Cylinder, CylinderFilter, CylinderId, CylinderLog, NewCylinderLog};
use super::order::{NewOrderLog, Order, OrderFilter, OrderId, OrderLog};
use crate::error::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;

/// Monotonic id generators kept by the store.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Sequence {
    Account,
    Cylinder,
    Order,
    /// Shared by cylinder and order logs; gives every log entry a total order.
    Log,
}

/// Typed reads over committed (or, inside a unit of work, staged) state.
#[async_trait]
pub trait StoreRead: Send + Sync {
    async fn account(&self, id: AccountId) -> Result<Option<Account>>;
    async fn accounts(&self, role: Option<Role>) -> Result<Vec<Account>>;

    async fn cylinder(&self, id: CylinderId) -> Result<Option<Cylinder>>;
    async fn cylinder_by_serial(&self, serial_number: &str) -> Result<Option<Cylinder>>;
    /// Matching cylinders in insertion order.
    async fn cylinders(&self, filter: &CylinderFilter) -> Result<Vec<Cylinder>>;
    /// Log entries for one cylinder in commit order.
    async fn cylinder_logs(&self, id: CylinderId) -> Result<Vec<CylinderLog>>;

    async fn order(&self, id: OrderId) -> Result<Option<Order>>;
    /// Matching orders in insertion order.
    async fn orders(&self, filter: &OrderFilter) -> Result<Vec<Order>>;
    /// Log entries for one order in commit order.
    async fn order_logs(&self, id: OrderId) -> Result<Vec<OrderLog>>;
}

/// A transactional scope. Writes are staged and become visible to other
/// readers only on [`UnitOfWork::commit`]; dropping the value rolls back.
#[async_trait]
pub trait UnitOfWork: StoreRead {
    async fn next_id(&mut self, sequence: Sequence) -> Result<u64>;
    /// Commit timestamp for entries written in this scope. Never earlier than
    /// any timestamp handed out by a previously committed scope.
    async fn now(&mut self) -> Result<DateTime<Utc>>;

    async fn put_account(&mut self, account: &Account) -> Result<()>;
    async fn put_cylinder(&mut self, cylinder: &Cylinder) -> Result<()>;
    async fn remove_cylinder(&mut self, cylinder: &Cylinder) -> Result<()>;
    async fn append_cylinder_log(&mut self, entry: NewCylinderLog) -> Result<CylinderLog>;
    async fn put_order(&mut self, order: &Order) -> Result<()>;
    async fn append_order_log(&mut self, entry: NewOrderLog) -> Result<OrderLog>;

    async fn commit(self: Box<Self>) -> Result<()>;
}

/// The authoritative store.
///
/// Units of work are serialized: `begin` waits until no other scope is open,
/// so a scope that reads, checks and writes observes no concurrent writer.
#[async_trait]
pub trait Store: StoreRead {
    async fn begin(&self) -> Result<Box<dyn UnitOfWork>>;
}

/// Side-car key/value cache. Never the system of record.
#[async_trait]
pub trait Cache: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<String>>;
    async fn set(&self, key: &str, value: String, ttl: Duration) -> Result<()>;
    async fn delete(&self, key: &str) -> Result<()>;
    async fn delete_prefix(&self, prefix: &str) -> Result<()>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Topic {
    Hospital,
    Vendor,
}

/// Outbound events pushed to connected clients.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", content = "data", rename_all = "snake_case")]
pub enum Notification {
    NewOrder {
        order_id: OrderId,
        hospital_id: AccountId,
        quantity: u32,
        urgency: super::order::Urgency,
        total_amount: Option<super::order::Amount>,
        distance_km: f64,
        timestamp: DateTime<Utc>,
    },
    OrderAccepted {
        order_id: OrderId,
        vendor_id: AccountId,
        expected_delivery: DateTime<Utc>,
        timestamp: DateTime<Utc>,
    },
    DeliveryUpdate {
        order_id: OrderId,
        status: super::order::OrderStatus,
        eta: Option<DateTime<Utc>>,
        current_location: Option<String>,
        driver: Option<super::delivery::DriverInfo>,
        timestamp: DateTime<Utc>,
    },
    OrderCancelled {
        order_id: OrderId,
        reason: String,
        timestamp: DateTime<Utc>,
    },
}

/// Fire-and-forget delivery of notifications. Callers log failures and move on.
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn notify(&self, topic: Topic, id: AccountId, message: Notification) -> Result<()>;
}

pub type StoreHandle = Arc<dyn Store>;
pub type CacheHandle = Arc<dyn Cache>;
pub type NotifierHandle = Arc<dyn Notifier>;
