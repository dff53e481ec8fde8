use super::cache::{EntityCache, keys};
use super::cylinders::{CylinderRegistry, release_in, reserve_in};
use super::dispatch;
use crate::domain::Page;
use crate::domain::account::{AccountId, Actor, Role};
use crate::domain::cylinder::{Cylinder, CylinderFilter, CylinderId, CylinderStatus};
use crate::domain::delivery::DETAILS_CYLINDERS;
use crate::domain::geo::{self, Location};
use crate::domain::order::{
    DeliveryProgress, NewOrderLog, Order, OrderDraft, OrderEventType, OrderFilter, OrderId,
    OrderLog, OrderStatus, PaymentStatus,
};
use crate::domain::ports::{Notification, NotifierHandle, Sequence, StoreHandle, Topic};
use crate::error::{LogisticsError, Result};
use chrono::{DateTime, Utc};
use serde_json::json;
use std::collections::HashMap;
use tracing::{info, instrument, warn};

/// Owns the order state machine.
///
/// `pending -> accepted -> in_transit -> delivered`, with `cancelled` reachable
/// from `pending` and `accepted`. Cylinder reservation and release happen in
/// the same unit of work as the order transition that triggers them.
#[derive(Clone)]
pub struct OrderEngine {
    store: StoreHandle,
    cache: EntityCache,
    cylinders: CylinderRegistry,
    notifier: NotifierHandle,
    max_distance_km: f64,
}

impl OrderEngine {
    /// Creates a new `OrderEngine`.
    ///
    /// # Arguments
    ///
    /// * `cylinders` - Registry whose cache entries are refreshed when an order
    ///   reserves or releases cylinders.
    /// * `max_distance_km` - Radius used to announce new orders to vendors.
    pub fn new(
        store: StoreHandle,
        cache: EntityCache,
        cylinders: CylinderRegistry,
        notifier: NotifierHandle,
        max_distance_km: f64,
    ) -> Self {
        Self {
            store,
            cache,
            cylinders,
            notifier,
            max_distance_km,
        }
    }

    /// Places a new order for `hospital_id` and announces it to nearby vendors.
    #[instrument(skip(self, draft), fields(quantity = draft.quantity))]
    pub async fn create(&self, draft: OrderDraft, hospital_id: AccountId) -> Result<Order> {
        draft.validate()?;

        let mut uow = self.store.begin().await?;
        let order = Order {
            id: uow.next_id(Sequence::Order).await?,
            hospital_id,
            vendor_id: None,
            status: OrderStatus::Pending,
            payment_status: PaymentStatus::default(),
            urgency: draft.urgency,
            quantity: draft.quantity,
            delivery_location: draft.delivery_location,
            special_instructions: draft.special_instructions,
            total_amount: draft.total_amount,
            cylinders_sent: 0,
            empty_cylinders_returned: 0,
            created_at: uow.now().await?,
            updated_at: None,
            expected_delivery: None,
            delivered_at: None,
        };
        uow.put_order(&order).await?;
        uow.append_order_log(
            NewOrderLog::new(order.id, OrderEventType::Created, hospital_id)
                .transition(None, OrderStatus::Pending)
                .notes("Order created".to_string()),
        )
        .await?;
        let key = keys::order(order.id);
        let seen = self.cache.generation(&key);
        uow.commit().await?;

        info!(order_id = order.id, hospital_id, "order created");
        self.cache.populate(&key, seen, &order).await;
        self.announce(&order).await;
        Ok(order)
    }

    pub async fn get(&self, id: OrderId) -> Result<Option<Order>> {
        self.cache.get_or_load(&keys::order(id), self.store.order(id)).await
    }

    pub async fn require(&self, id: OrderId) -> Result<Order> {
        self.get(id)
            .await?
            .ok_or_else(|| LogisticsError::not_found("Order", id))
    }

    /// Orders matching `filter`, newest first.
    pub async fn list(&self, filter: OrderFilter, page: Page) -> Result<Vec<Order>> {
        let orders = self.store.orders(&filter).await?;
        Ok(page.apply(orders.into_iter().rev()))
    }

    /// Order history, newest first.
    pub async fn logs(&self, id: OrderId, page: Page) -> Result<Vec<OrderLog>> {
        let logs = self.store.order_logs(id).await?;
        Ok(page.apply(logs.into_iter().rev()))
    }

    pub async fn assigned_cylinders(&self, id: OrderId) -> Result<Vec<Cylinder>> {
        let filter = CylinderFilter {
            order_id: Some(id),
            ..Default::default()
        };
        self.store.cylinders(&filter).await
    }

    /// Accepts a pending order on behalf of `vendor_id` and reserves the given
    /// cylinders for it.
    ///
    /// Fails with `Conflict` if the order is no longer pending and with
    /// `Unavailable` if any cylinder cannot be reserved. Either way nothing is
    /// written.
    #[instrument(skip(self, cylinder_ids), fields(count = cylinder_ids.len()))]
    pub async fn accept_order(
        &self,
        order_id: OrderId,
        vendor_id: AccountId,
        expected_delivery: DateTime<Utc>,
        cylinder_ids: &[CylinderId],
    ) -> Result<Order> {
        let mut uow = self.store.begin().await?;
        let mut order = uow
            .order(order_id)
            .await?
            .ok_or_else(|| LogisticsError::not_found("Order", order_id))?;
        if order.status != OrderStatus::Pending {
            return Err(LogisticsError::Conflict(format!(
                "Order {order_id} cannot be accepted while {}",
                order.status
            )));
        }

        let reserved = reserve_in(uow.as_mut(), cylinder_ids, vendor_id, order_id).await?;

        order.vendor_id = Some(vendor_id);
        order.status = OrderStatus::Accepted;
        order.expected_delivery = Some(expected_delivery);
        order.updated_at = Some(uow.now().await?);
        uow.put_order(&order).await?;

        let assigned: Vec<CylinderId> = reserved.iter().map(|c| c.id).collect();
        uow.append_order_log(
            NewOrderLog::new(order_id, OrderEventType::VendorAssigned, vendor_id)
                .transition(Some(OrderStatus::Pending), OrderStatus::Accepted)
                .details(json!({
                    DETAILS_CYLINDERS: { "assigned": assigned },
                    "expected_delivery": expected_delivery,
                })),
        )
        .await?;
        uow.commit().await?;

        info!(order_id, vendor_id, "order accepted");
        self.refresh(&order).await;
        self.cylinders.refresh(&reserved, None).await;
        dispatch(
            &self.notifier,
            Topic::Hospital,
            order.hospital_id,
            Notification::OrderAccepted {
                order_id,
                vendor_id,
                expected_delivery,
                timestamp: Utc::now(),
            },
        )
        .await;
        Ok(order)
    }

    /// Records vendor-reported delivery progress.
    ///
    /// Any target status is accepted here, including from a terminal state;
    /// guarded tracking updates go through the delivery tracker instead.
    #[instrument(skip(self, progress), fields(status = %progress.status))]
    pub async fn update_delivery_status(
        &self,
        order_id: OrderId,
        progress: DeliveryProgress,
        actor: Actor,
    ) -> Result<Order> {
        let mut uow = self.store.begin().await?;
        let mut order = uow
            .order(order_id)
            .await?
            .ok_or_else(|| LogisticsError::not_found("Order", order_id))?;

        let old_status = order.status;
        order.status = progress.status;
        order.cylinders_sent = progress.cylinders_sent;
        order.empty_cylinders_returned = progress.empty_cylinders_returned;
        if progress.delivered_at.is_some() {
            order.delivered_at = progress.delivered_at;
        }
        order.updated_at = Some(uow.now().await?);
        uow.put_order(&order).await?;
        uow.append_order_log(
            NewOrderLog::new(order_id, OrderEventType::StatusChanged, actor.id)
                .transition(Some(old_status), progress.status)
                .details(json!({
                    DETAILS_CYLINDERS: {
                        "sent": progress.cylinders_sent,
                        "empty_returned": progress.empty_cylinders_returned,
                    },
                    "notes": progress.notes,
                }))
                .notes(progress.notes.clone()),
        )
        .await?;
        uow.commit().await?;

        info!(order_id, from = %old_status, to = %order.status, "delivery progress recorded");
        self.refresh(&order).await;
        dispatch(
            &self.notifier,
            Topic::Hospital,
            order.hospital_id,
            Notification::DeliveryUpdate {
                order_id,
                status: order.status,
                eta: order.expected_delivery,
                current_location: None,
                driver: None,
                timestamp: Utc::now(),
            },
        )
        .await;
        Ok(order)
    }

    /// Cancels an order that has not left the vendor yet and frees its cylinders.
    #[instrument(skip(self))]
    pub async fn cancel_order(
        &self,
        order_id: OrderId,
        actor: Actor,
        reason: &str,
    ) -> Result<Order> {
        let mut uow = self.store.begin().await?;
        let mut order = uow
            .order(order_id)
            .await?
            .ok_or_else(|| LogisticsError::not_found("Order", order_id))?;
        if !order.status.can_cancel() {
            return Err(LogisticsError::InvalidTransition(format!(
                "Order {order_id} cannot be cancelled while {}",
                order.status
            )));
        }

        let released = release_in(uow.as_mut(), order_id, actor.id).await?;

        let old_status = order.status;
        order.status = OrderStatus::Cancelled;
        order.updated_at = Some(uow.now().await?);
        uow.put_order(&order).await?;
        uow.append_order_log(
            NewOrderLog::new(order_id, OrderEventType::Cancelled, actor.id)
                .transition(Some(old_status), OrderStatus::Cancelled)
                .notes(reason.to_string()),
        )
        .await?;
        uow.commit().await?;

        info!(order_id, released = released.len(), "order cancelled");
        self.refresh(&order).await;
        self.cylinders.refresh(&released, None).await;

        let message = Notification::OrderCancelled {
            order_id,
            reason: reason.to_string(),
            timestamp: Utc::now(),
        };
        if let Some(vendor_id) = order.vendor_id {
            dispatch(&self.notifier, Topic::Vendor, vendor_id, message.clone()).await;
        }
        dispatch(&self.notifier, Topic::Hospital, order.hospital_id, message).await;
        Ok(order)
    }

    /// Stores the outcome reported by the payment collaborator.
    #[instrument(skip(self))]
    pub async fn set_payment_status(
        &self,
        order_id: OrderId,
        status: PaymentStatus,
    ) -> Result<Order> {
        let mut uow = self.store.begin().await?;
        let mut order = uow
            .order(order_id)
            .await?
            .ok_or_else(|| LogisticsError::not_found("Order", order_id))?;
        order.payment_status = status;
        order.updated_at = Some(uow.now().await?);
        uow.put_order(&order).await?;
        uow.commit().await?;

        self.refresh(&order).await;
        Ok(order)
    }

    /// Vendors within `max_distance_km` of `location` holding at least
    /// `quantity` reservable cylinders, nearest first.
    pub async fn find_nearby_vendors(
        &self,
        location: &Location,
        quantity: u32,
        max_distance_km: f64,
    ) -> Result<Vec<(AccountId, f64)>> {
        let reservable = CylinderFilter {
            status: Some(CylinderStatus::Filled),
            is_assigned: Some(false),
            ..Default::default()
        };
        let mut stock: HashMap<AccountId, u32> = HashMap::new();
        for cylinder in self.store.cylinders(&reservable).await? {
            *stock.entry(cylinder.vendor_id).or_default() += 1;
        }

        let vendors = self.store.accounts(Some(Role::Vendor)).await?;
        let candidates = vendors.iter().filter_map(|vendor| {
            let in_stock = stock.get(&vendor.id).copied().unwrap_or(0);
            match &vendor.location {
                Some(at) if in_stock >= quantity => Some((vendor.id, at)),
                _ => None,
            }
        });
        Ok(geo::rank_within_radius(location, candidates, max_distance_km))
    }

    /// Drops the cached order and the delivery snapshot derived from it.
    async fn refresh(&self, order: &Order) {
        self.cache.invalidate(&keys::order(order.id)).await;
        self.cache.invalidate(&keys::delivery(order.id)).await;
    }

    async fn announce(&self, order: &Order) {
        let vendors = match self
            .find_nearby_vendors(&order.delivery_location, order.quantity, self.max_distance_km)
            .await
        {
            Ok(vendors) => vendors,
            Err(err) => {
                warn!(order_id = order.id, error = %err, "vendor discovery failed");
                return;
            }
        };
        for (vendor_id, distance_km) in vendors {
            dispatch(
                &self.notifier,
                Topic::Vendor,
                vendor_id,
                Notification::NewOrder {
                    order_id: order.id,
                    hospital_id: order.hospital_id,
                    quantity: order.quantity,
                    urgency: order.urgency,
                    total_amount: order.total_amount,
                    distance_km,
                    timestamp: order.created_at,
                },
            )
            .await;
        }
    }
}
