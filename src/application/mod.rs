//! Application services orchestrating the domain over the store, cache and
//! notifier ports.
//!
//! Each service holds injected handles only; [`Platform`] wires one instance of
//! each around a shared store and cache.

pub mod accounts;
pub mod cache;
pub mod cylinders;
pub mod delivery;
pub mod orders;

use crate::config::Settings;
use crate::domain::account::AccountId;
use crate::domain::ports::{CacheHandle, Notification, NotifierHandle, StoreHandle, Topic};
use accounts::AccountRegistry;
use cache::EntityCache;
use cylinders::CylinderRegistry;
use delivery::DeliveryTracker;
use orders::OrderEngine;
use tracing::warn;

/// Sends a notification without letting a failure reach the caller.
pub(crate) async fn dispatch(
    notifier: &NotifierHandle,
    topic: Topic,
    recipient: AccountId,
    message: Notification,
) {
    if let Err(err) = notifier.notify(topic, recipient, message).await {
        warn!(?topic, recipient, error = %err, "notification dropped");
    }
}

/// All services of the marketplace core, sharing one store and cache.
#[derive(Clone)]
pub struct Platform {
    pub accounts: AccountRegistry,
    pub cylinders: CylinderRegistry,
    pub orders: OrderEngine,
    pub delivery: DeliveryTracker,
}

impl Platform {
    pub fn new(
        store: StoreHandle,
        cache: CacheHandle,
        notifier: NotifierHandle,
        settings: &Settings,
    ) -> Self {
        let cache = EntityCache::new(cache, settings.cache_ttl());
        let cylinders = CylinderRegistry::new(store.clone(), cache.clone());
        let orders = OrderEngine::new(
            store.clone(),
            cache.clone(),
            cylinders.clone(),
            notifier.clone(),
            settings.max_distance_km,
        );
        Self {
            accounts: AccountRegistry::new(store.clone()),
            delivery: DeliveryTracker::new(store, cache, notifier),
            cylinders,
            orders,
        }
    }
}
