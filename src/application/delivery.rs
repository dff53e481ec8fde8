use super::cache::{EntityCache, keys};
use super::dispatch;
use crate::domain::account::Actor;
use crate::domain::cylinder::CylinderFilter;
use crate::domain::delivery::{
    self, DeliveryStatus, DeliveryTimeline, DeliveryUpdate, DriverInfo,
};
use crate::domain::order::{NewOrderLog, OrderEventType, OrderId};
use crate::domain::ports::{Notification, NotifierHandle, StoreHandle, StoreRead, Topic};
use crate::error::{LogisticsError, Result};
use chrono::Utc;
use tracing::{info, instrument};

/// Read side of a delivery, plus the guarded live-tracking update.
#[derive(Clone)]
pub struct DeliveryTracker {
    store: StoreHandle,
    cache: EntityCache,
    notifier: NotifierHandle,
}

async fn cylinders_loaded<R: StoreRead + ?Sized>(reader: &R, order_id: OrderId) -> Result<usize> {
    let filter = CylinderFilter {
        order_id: Some(order_id),
        ..Default::default()
    };
    Ok(reader.cylinders(&filter).await?.len())
}

impl DeliveryTracker {
    pub fn new(store: StoreHandle, cache: EntityCache, notifier: NotifierHandle) -> Self {
        Self {
            store,
            cache,
            notifier,
        }
    }

    pub async fn get_delivery_status(&self, order_id: OrderId) -> Result<DeliveryStatus> {
        let load = async {
            let Some(order) = self.store.order(order_id).await? else {
                return Ok(None);
            };
            let logs = self.store.order_logs(order_id).await?;
            let loaded = cylinders_loaded(&*self.store, order_id).await?;
            Ok::<_, LogisticsError>(Some(delivery::snapshot(&order, &logs, loaded)))
        };
        self.cache
            .get_or_load(&keys::delivery(order_id), load)
            .await?
            .ok_or_else(|| LogisticsError::not_found("Order", order_id))
    }

    pub async fn get_delivery_timeline(&self, order_id: OrderId) -> Result<DeliveryTimeline> {
        let order = self
            .store
            .order(order_id)
            .await?
            .ok_or_else(|| LogisticsError::not_found("Order", order_id))?;
        let logs = self.store.order_logs(order_id).await?;
        let loaded = cylinders_loaded(&*self.store, order_id).await?;
        Ok(delivery::timeline(&order, &logs, loaded))
    }

    /// Pushes a live tracking update for an order that is out with its vendor.
    ///
    /// Only `accepted` and `in_transit` orders take updates; anything else is an
    /// `InvalidTransition`.
    #[instrument(skip(self, update, driver), fields(status = %update.status))]
    pub async fn update_delivery_status(
        &self,
        order_id: OrderId,
        update: DeliveryUpdate,
        actor: Actor,
        driver: Option<DriverInfo>,
    ) -> Result<DeliveryStatus> {
        let mut uow = self.store.begin().await?;
        let mut order = uow
            .order(order_id)
            .await?
            .ok_or_else(|| LogisticsError::not_found("Order", order_id))?;
        if !order.status.in_delivery_phase() {
            return Err(LogisticsError::InvalidTransition(format!(
                "Order {order_id} is not in delivery phase ({})",
                order.status
            )));
        }

        let old_status = order.status;
        order.status = update.status;
        if update.eta.is_some() {
            order.expected_delivery = update.eta;
        }
        order.updated_at = Some(uow.now().await?);
        uow.put_order(&order).await?;
        uow.append_order_log(
            NewOrderLog::new(order_id, OrderEventType::StatusChanged, actor.id)
                .transition(Some(old_status), update.status)
                .details(update.to_details(driver.as_ref()))
                .notes(update.notes.clone()),
        )
        .await?;

        let logs = uow.order_logs(order_id).await?;
        let loaded = cylinders_loaded(&*uow, order_id).await?;
        let status = delivery::snapshot(&order, &logs, loaded);
        uow.commit().await?;

        info!(order_id, from = %old_status, to = %order.status, "delivery updated");
        self.cache.invalidate(&keys::order(order_id)).await;
        self.cache.invalidate(&keys::delivery(order_id)).await;

        let message = Notification::DeliveryUpdate {
            order_id,
            status: update.status,
            eta: order.expected_delivery,
            current_location: update.current_location,
            driver,
            timestamp: Utc::now(),
        };
        if let Some(vendor_id) = order.vendor_id {
            dispatch(&self.notifier, Topic::Vendor, vendor_id, message.clone()).await;
        }
        dispatch(&self.notifier, Topic::Hospital, order.hospital_id, message).await;
        Ok(status)
    }
}
