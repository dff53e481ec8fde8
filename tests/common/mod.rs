#![allow(dead_code)]

use async_trait::async_trait;
use gasflow::application::Platform;
use gasflow::config::Settings;
use gasflow::domain::account::{Account, Actor, Role};
use gasflow::domain::cylinder::{CylinderDraft, CylinderId};
use gasflow::domain::geo::{EARTH_RADIUS_KM, Location};
use gasflow::domain::ports::{Cache, CacheHandle, NotifierHandle, StoreHandle};
use gasflow::error::{LogisticsError, Result};
use gasflow::infrastructure::in_memory::InMemoryCache;
use gasflow::infrastructure::kv::KvStore;
use gasflow::infrastructure::notifier::LogNotifier;
use std::sync::Arc;
use std::time::Duration;

/// Lagos, used as the hospital's delivery point.
pub fn hospital_site() -> Location {
    Location::at(6.5244, 3.3792)
}

/// A point `km` due north of `origin`.
pub fn north_of(origin: &Location, km: f64) -> Location {
    let (lat, lon) = origin.coordinates().unwrap();
    Location::at(lat + (km / EARTH_RADIUS_KM).to_degrees(), lon)
}

pub struct Harness {
    pub platform: Platform,
    pub store: StoreHandle,
}

pub fn harness() -> Harness {
    harness_with(Arc::new(InMemoryCache::new()), Arc::new(LogNotifier))
}

pub fn harness_with(cache: CacheHandle, notifier: NotifierHandle) -> Harness {
    let store: StoreHandle = Arc::new(KvStore::in_memory());
    let platform = Platform::new(store.clone(), cache, notifier, &Settings::default());
    Harness { platform, store }
}

pub async fn hospital(platform: &Platform) -> Account {
    platform
        .accounts
        .register("St. Nicholas Hospital", Role::Hospital, Some(hospital_site()))
        .await
        .unwrap()
}

/// Registers a vendor at `location` holding `count` filled cylinders.
pub async fn vendor_with_stock(
    platform: &Platform,
    name: &str,
    location: Location,
    count: usize,
) -> (Account, Vec<CylinderId>) {
    let vendor = platform
        .accounts
        .register(name, Role::Vendor, Some(location))
        .await
        .unwrap();
    let mut ids = Vec::with_capacity(count);
    for n in 0..count {
        let cylinder = platform
            .cylinders
            .create(
                CylinderDraft::new(format!("{name}-{n}")),
                vendor.id,
                Actor::vendor(vendor.id),
            )
            .await
            .unwrap();
        ids.push(cylinder.id);
    }
    (vendor, ids)
}

/// A cache whose every call fails, like an unreachable side-car.
pub struct UnreachableCache;

#[async_trait]
impl Cache for UnreachableCache {
    async fn get(&self, _key: &str) -> Result<Option<String>> {
        Err(LogisticsError::internal("cache unreachable"))
    }

    async fn set(&self, _key: &str, _value: String, _ttl: Duration) -> Result<()> {
        Err(LogisticsError::internal("cache unreachable"))
    }

    async fn delete(&self, _key: &str) -> Result<()> {
        Err(LogisticsError::internal("cache unreachable"))
    }

    async fn delete_prefix(&self, _prefix: &str) -> Result<()> {
        Err(LogisticsError::internal("cache unreachable"))
    }
}
