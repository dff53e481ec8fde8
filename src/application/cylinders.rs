use super::cache::{EntityCache, keys};
use crate::domain::Page;
use crate::domain::account::{AccountId, Actor};
use crate::domain::cylinder::{
    Cylinder, CylinderDraft, CylinderEventType, CylinderFilter, CylinderId, CylinderLog,
    CylinderStatus, NewCylinderLog,
};
use crate::domain::geo::Location;
use crate::domain::order::OrderId;
use crate::domain::ports::{Sequence, StoreHandle, UnitOfWork};
use crate::error::{LogisticsError, Result};
use std::collections::HashSet;
use tracing::{info, instrument};

/// Owns the cylinder state machine and its audit log.
///
/// Every mutation runs in a single unit of work; cached copies are dropped only
/// after the commit succeeds.
#[derive(Clone)]
pub struct CylinderRegistry {
    store: StoreHandle,
    cache: EntityCache,
}

impl CylinderRegistry {
    pub fn new(store: StoreHandle, cache: EntityCache) -> Self {
        Self { store, cache }
    }

    /// Registers a new cylinder for `vendor_id`.
    ///
    /// Fails with `Conflict` when the serial number is already taken.
    #[instrument(skip(self, draft), fields(serial = %draft.serial_number))]
    pub async fn create(
        &self,
        draft: CylinderDraft,
        vendor_id: AccountId,
        actor: Actor,
    ) -> Result<Cylinder> {
        let serial = draft.serial_number.trim();
        if serial.is_empty() {
            return Err(LogisticsError::ValidationError(
                "Serial number must not be blank".to_string(),
            ));
        }

        let mut uow = self.store.begin().await?;
        if uow.cylinder_by_serial(serial).await?.is_some() {
            return Err(LogisticsError::Conflict(format!(
                "Cylinder with serial number {serial} already exists"
            )));
        }

        let cylinder = Cylinder {
            id: uow.next_id(Sequence::Cylinder).await?,
            serial_number: serial.to_string(),
            status: draft.status,
            vendor_id,
            location: draft.location,
            current_order_id: None,
            created_at: uow.now().await?,
            updated_at: None,
        };
        uow.put_cylinder(&cylinder).await?;
        uow.append_cylinder_log(
            NewCylinderLog::new(cylinder.id, CylinderEventType::Created, actor.id)
                .transition(None, Some(cylinder.status))
                .location(cylinder.location.clone())
                .notes("Cylinder created".to_string()),
        )
        .await?;
        // Taken before the commit so a write right after it still wins.
        let key = keys::cylinder(cylinder.id);
        let seen = self.cache.generation(&key);
        uow.commit().await?;

        info!(cylinder_id = cylinder.id, vendor_id, "cylinder registered");
        self.cache.populate(&key, seen, &cylinder).await;
        self.cache.invalidate_prefix(keys::CYLINDER_LIST).await;
        Ok(cylinder)
    }

    pub async fn get(&self, id: CylinderId) -> Result<Option<Cylinder>> {
        self.cache
            .get_or_load(&keys::cylinder(id), self.store.cylinder(id))
            .await
    }

    pub async fn require(&self, id: CylinderId) -> Result<Cylinder> {
        self.get(id)
            .await?
            .ok_or_else(|| LogisticsError::not_found("Cylinder", id))
    }

    /// Cylinders matching `filter`, in registration order.
    pub async fn list(&self, filter: CylinderFilter, page: Page) -> Result<Vec<Cylinder>> {
        let key = keys::cylinder_list(&filter, page);
        let load = async {
            let cylinders = self.store.cylinders(&filter).await?;
            Ok::<_, LogisticsError>(Some(page.apply(cylinders)))
        };
        let cylinders = self.cache.get_or_load(&key, load).await?;
        Ok(cylinders.unwrap_or_default())
    }

    #[instrument(skip(self, location, notes))]
    pub async fn update_status(
        &self,
        id: CylinderId,
        new_status: CylinderStatus,
        actor: Actor,
        location: Option<Location>,
        notes: Option<String>,
    ) -> Result<Cylinder> {
        let mut uow = self.store.begin().await?;
        let cylinder = apply_status(
            uow.as_mut(),
            id,
            new_status,
            actor.id,
            location.as_ref(),
            notes.as_deref(),
        )
        .await?
        .ok_or_else(|| LogisticsError::not_found("Cylinder", id))?;
        uow.commit().await?;

        self.refresh(std::slice::from_ref(&cylinder), None).await;
        Ok(cylinder)
    }

    /// Applies the same status change to many cylinders at once.
    ///
    /// Ids that do not resolve are skipped; the returned list holds only the
    /// cylinders that exist.
    #[instrument(skip(self, ids, location, notes), fields(count = ids.len()))]
    pub async fn update_status_bulk(
        &self,
        ids: &[CylinderId],
        new_status: CylinderStatus,
        actor: Actor,
        location: Option<Location>,
        notes: Option<String>,
    ) -> Result<Vec<Cylinder>> {
        let mut uow = self.store.begin().await?;
        let mut updated = Vec::with_capacity(ids.len());
        for &id in ids {
            if let Some(cylinder) = apply_status(
                uow.as_mut(),
                id,
                new_status,
                actor.id,
                location.as_ref(),
                notes.as_deref(),
            )
            .await?
            {
                updated.push(cylinder);
            }
        }
        uow.commit().await?;

        info!(requested = ids.len(), updated = updated.len(), "bulk status update");
        self.refresh(&updated, None).await;
        Ok(updated)
    }

    /// Links every cylinder in `ids` to `order_id`, or none of them.
    #[instrument(skip(self, ids), fields(count = ids.len()))]
    pub async fn reserve(
        &self,
        ids: &[CylinderId],
        vendor_id: AccountId,
        order_id: OrderId,
    ) -> Result<Vec<Cylinder>> {
        let mut uow = self.store.begin().await?;
        let reserved = reserve_in(uow.as_mut(), ids, vendor_id, order_id).await?;
        uow.commit().await?;

        self.refresh(&reserved, Some(order_id)).await;
        Ok(reserved)
    }

    /// Unlinks every cylinder currently assigned to `order_id`. Releasing an
    /// order with nothing assigned is a no-op.
    #[instrument(skip(self))]
    pub async fn release(&self, order_id: OrderId, actor: Actor) -> Result<Vec<Cylinder>> {
        let mut uow = self.store.begin().await?;
        let released = release_in(uow.as_mut(), order_id, actor.id).await?;
        if released.is_empty() {
            return Ok(released);
        }
        uow.commit().await?;

        self.refresh(&released, Some(order_id)).await;
        Ok(released)
    }

    /// Removes a cylinder. Its log entries stay readable through [`Self::logs`].
    #[instrument(skip(self))]
    pub async fn delete(&self, id: CylinderId, actor: Actor) -> Result<bool> {
        let mut uow = self.store.begin().await?;
        let Some(cylinder) = uow.cylinder(id).await? else {
            return Ok(false);
        };
        uow.append_cylinder_log(
            NewCylinderLog::new(id, CylinderEventType::Deleted, actor.id)
                .transition(Some(cylinder.status), None)
                .order(cylinder.current_order_id)
                .notes("Cylinder deleted".to_string()),
        )
        .await?;
        uow.remove_cylinder(&cylinder).await?;
        uow.commit().await?;

        info!(cylinder_id = id, "cylinder deleted");
        self.refresh(std::slice::from_ref(&cylinder), cylinder.current_order_id)
            .await;
        Ok(true)
    }

    /// Audit trail for one cylinder, newest first.
    pub async fn logs(&self, id: CylinderId, page: Page) -> Result<Vec<CylinderLog>> {
        let logs = self.store.cylinder_logs(id).await?;
        Ok(page.apply(logs.into_iter().rev()))
    }

    /// Drops every cached view a committed cylinder write may have changed.
    ///
    /// `order_id` names an order whose set of linked cylinders changed; its
    /// delivery snapshot counts them.
    pub(crate) async fn refresh(&self, cylinders: &[Cylinder], order_id: Option<OrderId>) {
        for cylinder in cylinders {
            self.cache.invalidate(&keys::cylinder(cylinder.id)).await;
        }
        self.cache.invalidate_prefix(keys::CYLINDER_LIST).await;
        if let Some(order_id) = order_id {
            self.cache.invalidate(&keys::delivery(order_id)).await;
        }
    }
}

/// Writes a status and/or location change for one cylinder into `uow`.
///
/// Returns `None` when the id does not resolve. Nothing is written when
/// neither the status nor the location changes.
async fn apply_status(
    uow: &mut dyn UnitOfWork,
    id: CylinderId,
    new_status: CylinderStatus,
    created_by: AccountId,
    location: Option<&Location>,
    notes: Option<&str>,
) -> Result<Option<Cylinder>> {
    let Some(mut cylinder) = uow.cylinder(id).await? else {
        return Ok(None);
    };

    let old_status = cylinder.status;
    let status_changed = old_status != new_status;
    let location_changed = location.is_some_and(|l| cylinder.location.as_ref() != Some(l));
    if !status_changed && !location_changed {
        return Ok(Some(cylinder));
    }

    cylinder.status = new_status;
    if let Some(location) = location {
        cylinder.location = Some(location.clone());
    }
    cylinder.updated_at = Some(uow.now().await?);
    uow.put_cylinder(&cylinder).await?;

    let entry = if status_changed {
        NewCylinderLog::new(id, CylinderEventType::StatusChanged, created_by)
            .transition(Some(old_status), Some(new_status))
    } else {
        NewCylinderLog::new(id, CylinderEventType::LocationUpdated, created_by)
    };
    uow.append_cylinder_log(
        entry
            .order(cylinder.current_order_id)
            .location(location.cloned())
            .notes(notes.map(str::to_string)),
    )
    .await?;

    Ok(Some(cylinder))
}

/// Reservation step shared with order acceptance. Runs inside the caller's
/// unit of work so a failure leaves nothing behind once it is dropped.
pub(crate) async fn reserve_in(
    uow: &mut dyn UnitOfWork,
    ids: &[CylinderId],
    vendor_id: AccountId,
    order_id: OrderId,
) -> Result<Vec<Cylinder>> {
    let mut seen = HashSet::with_capacity(ids.len());
    if let Some(duplicate) = ids.iter().find(|id| !seen.insert(**id)) {
        return Err(LogisticsError::ValidationError(format!(
            "Cylinder {duplicate} listed more than once"
        )));
    }

    let mut available = Vec::with_capacity(ids.len());
    let mut unavailable = Vec::new();
    for &id in ids {
        match uow.cylinder(id).await? {
            Some(cylinder) if cylinder.is_available_to(vendor_id) => available.push(cylinder),
            _ => unavailable.push(id),
        }
    }
    if !unavailable.is_empty() {
        return Err(LogisticsError::Unavailable(format!(
            "{unavailable:?} cannot be reserved by vendor {vendor_id}"
        )));
    }

    let now = uow.now().await?;
    for cylinder in &mut available {
        cylinder.current_order_id = Some(order_id);
        cylinder.updated_at = Some(now);
        uow.put_cylinder(cylinder).await?;
        uow.append_cylinder_log(
            NewCylinderLog::new(cylinder.id, CylinderEventType::Assigned, vendor_id)
                .order(Some(order_id))
                .notes(format!("Assigned to order {order_id}")),
        )
        .await?;
    }

    info!(order_id, count = available.len(), "cylinders reserved");
    Ok(available)
}

pub(crate) async fn release_in(
    uow: &mut dyn UnitOfWork,
    order_id: OrderId,
    created_by: AccountId,
) -> Result<Vec<Cylinder>> {
    let filter = CylinderFilter {
        order_id: Some(order_id),
        ..Default::default()
    };
    let mut linked = uow.cylinders(&filter).await?;
    if linked.is_empty() {
        return Ok(linked);
    }

    let now = uow.now().await?;
    for cylinder in &mut linked {
        cylinder.current_order_id = None;
        cylinder.updated_at = Some(now);
        uow.put_cylinder(cylinder).await?;
        uow.append_cylinder_log(
            NewCylinderLog::new(cylinder.id, CylinderEventType::Unassigned, created_by)
                .order(Some(order_id))
                .notes(format!("Released from order {order_id}")),
        )
        .await?;
    }

    info!(order_id, count = linked.len(), "cylinders released");
    Ok(linked)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::ports::Cache;
    use crate::infrastructure::in_memory::InMemoryCache;
    use crate::infrastructure::kv::KvStore;
    use async_trait::async_trait;
    use std::sync::{Arc, Mutex};
    use std::time::Duration;
    use tokio::sync::Notify;

    const VENDOR: AccountId = 7;

    /// Cache whose next `set` of an armed key blocks until released.
    #[derive(Default)]
    struct GatedCache {
        inner: InMemoryCache,
        armed: Mutex<Option<String>>,
        reached: Notify,
        release: Notify,
    }

    impl GatedCache {
        fn arm(&self, key: &str) {
            *self.armed.lock().unwrap() = Some(key.to_string());
        }
    }

    #[async_trait]
    impl Cache for GatedCache {
        async fn get(&self, key: &str) -> Result<Option<String>> {
            self.inner.get(key).await
        }
        async fn set(&self, key: &str, value: String, ttl: Duration) -> Result<()> {
            let hold = {
                let mut armed = self.armed.lock().unwrap();
                if armed.as_deref() == Some(key) {
                    *armed = None;
                    true
                } else {
                    false
                }
            };
            if hold {
                self.reached.notify_one();
                self.release.notified().await;
            }
            self.inner.set(key, value, ttl).await
        }
        async fn delete(&self, key: &str) -> Result<()> {
            self.inner.delete(key).await
        }
        async fn delete_prefix(&self, prefix: &str) -> Result<()> {
            self.inner.delete_prefix(prefix).await
        }
    }

    fn registry() -> CylinderRegistry {
        let cache = EntityCache::new(Arc::new(InMemoryCache::new()), Duration::from_secs(60));
        CylinderRegistry::new(Arc::new(KvStore::in_memory()), cache)
    }

    async fn seed(registry: &CylinderRegistry, serials: &[&str]) -> Vec<CylinderId> {
        let mut ids = Vec::new();
        for serial in serials {
            let cylinder = registry
                .create(CylinderDraft::new(*serial), VENDOR, Actor::vendor(VENDOR))
                .await
                .unwrap();
            ids.push(cylinder.id);
        }
        ids
    }

    #[tokio::test]
    async fn test_create_defaults_to_filled_and_logs() {
        let registry = registry();
        let ids = seed(&registry, &["OX-1"]).await;

        let cylinder = registry.require(ids[0]).await.unwrap();
        assert_eq!(cylinder.status, CylinderStatus::Filled);
        assert!(!cylinder.is_assigned());

        let logs = registry.logs(ids[0], Page::default()).await.unwrap();
        assert_eq!(logs.len(), 1);
        assert_eq!(logs[0].event_type, CylinderEventType::Created);
        assert_eq!(logs[0].new_status, Some(CylinderStatus::Filled));
    }

    #[tokio::test]
    async fn test_duplicate_and_blank_serials() {
        let registry = registry();
        seed(&registry, &["OX-1"]).await;

        let duplicate = registry
            .create(CylinderDraft::new(" OX-1 "), VENDOR, Actor::vendor(VENDOR))
            .await;
        assert!(matches!(duplicate, Err(LogisticsError::Conflict(_))));

        let blank = registry
            .create(CylinderDraft::new(""), VENDOR, Actor::vendor(VENDOR))
            .await;
        assert!(matches!(blank, Err(LogisticsError::ValidationError(_))));
    }

    #[tokio::test]
    async fn test_update_status_logs_only_real_changes() {
        let registry = registry();
        let ids = seed(&registry, &["OX-1"]).await;
        let actor = Actor::vendor(VENDOR);

        registry
            .update_status(ids[0], CylinderStatus::Filled, actor, None, None)
            .await
            .unwrap();
        assert_eq!(registry.logs(ids[0], Page::default()).await.unwrap().len(), 1);

        let updated = registry
            .update_status(ids[0], CylinderStatus::Empty, actor, None, Some("drained".into()))
            .await
            .unwrap();
        assert_eq!(updated.status, CylinderStatus::Empty);

        let logs = registry.logs(ids[0], Page::default()).await.unwrap();
        assert_eq!(logs[0].event_type, CylinderEventType::StatusChanged);
        assert_eq!(logs[0].old_status, Some(CylinderStatus::Filled));
        assert_eq!(logs[0].notes.as_deref(), Some("drained"));

        let moved = registry
            .update_status(ids[0], CylinderStatus::Empty, actor, Some(Location::at(1.0, 2.0)), None)
            .await
            .unwrap();
        assert_eq!(moved.location, Some(Location::at(1.0, 2.0)));
        let logs = registry.logs(ids[0], Page::default()).await.unwrap();
        assert_eq!(logs[0].event_type, CylinderEventType::LocationUpdated);
    }

    #[tokio::test]
    async fn test_update_status_missing_cylinder() {
        let result = registry()
            .update_status(99, CylinderStatus::Empty, Actor::vendor(VENDOR), None, None)
            .await;
        assert!(matches!(result, Err(LogisticsError::NotFound { id: 99, .. })));
    }

    #[tokio::test]
    async fn test_get_sees_committed_update_through_cache() {
        let registry = registry();
        let ids = seed(&registry, &["OX-1"]).await;

        // Warm the cache, then mutate.
        registry.get(ids[0]).await.unwrap();
        registry
            .update_status(ids[0], CylinderStatus::Returned, Actor::vendor(VENDOR), None, None)
            .await
            .unwrap();

        let cylinder = registry.get(ids[0]).await.unwrap().unwrap();
        assert_eq!(cylinder.status, CylinderStatus::Returned);
    }

    #[tokio::test]
    async fn test_created_cylinder_is_cached_until_written() {
        let backing = Arc::new(InMemoryCache::new());
        let cache = EntityCache::new(backing.clone(), Duration::from_secs(60));
        let registry = CylinderRegistry::new(Arc::new(KvStore::in_memory()), cache);
        let id = seed(&registry, &["OX-1"]).await[0];
        let key = keys::cylinder(id);
        assert!(backing.get(&key).await.unwrap().is_some());

        registry
            .update_status(id, CylinderStatus::Empty, Actor::vendor(VENDOR), None, None)
            .await
            .unwrap();
        assert_eq!(backing.get(&key).await.unwrap(), None);
        assert_eq!(registry.require(id).await.unwrap().status, CylinderStatus::Empty);
        assert!(backing.get(&key).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_read_racing_a_write_does_not_leave_stale_entry() {
        let gate = Arc::new(GatedCache::default());
        let cache = EntityCache::new(gate.clone(), Duration::from_secs(60));
        let registry = CylinderRegistry::new(Arc::new(KvStore::in_memory()), cache);
        let id = seed(&registry, &["OX-1"]).await[0];

        // The reader misses, loads the filled row, then stalls while caching it.
        gate.delete(&keys::cylinder(id)).await.unwrap();
        gate.arm(&keys::cylinder(id));
        let reader = {
            let registry = registry.clone();
            tokio::spawn(async move { registry.get(id).await })
        };
        gate.reached.notified().await;

        registry
            .update_status(id, CylinderStatus::Empty, Actor::vendor(VENDOR), None, None)
            .await
            .unwrap();
        gate.release.notify_one();

        let seen_by_reader = reader.await.unwrap().unwrap().unwrap();
        assert_eq!(seen_by_reader.status, CylinderStatus::Filled);
        assert_eq!(registry.require(id).await.unwrap().status, CylinderStatus::Empty);
        assert_eq!(registry.require(id).await.unwrap().status, CylinderStatus::Empty);
    }

    #[tokio::test]
    async fn test_list_pages_are_invalidated_on_write() {
        let registry = registry();
        seed(&registry, &["OX-1", "OX-2"]).await;
        let filled = CylinderFilter {
            status: Some(CylinderStatus::Filled),
            ..Default::default()
        };

        assert_eq!(registry.list(filled, Page::default()).await.unwrap().len(), 2);
        seed(&registry, &["OX-3"]).await;
        assert_eq!(registry.list(filled, Page::default()).await.unwrap().len(), 3);

        let second = registry.list(filled, Page::new(1, 1)).await.unwrap();
        assert_eq!(second.len(), 1);
        assert_eq!(second[0].serial_number, "OX-2");
    }

    #[tokio::test]
    async fn test_reserve_is_all_or_nothing() {
        let registry = registry();
        let ids = seed(&registry, &["OX-1", "OX-2", "OX-3"]).await;
        registry
            .update_status(ids[2], CylinderStatus::Empty, Actor::vendor(VENDOR), None, None)
            .await
            .unwrap();

        let result = registry.reserve(&ids, VENDOR, 1).await;
        assert!(matches!(result, Err(LogisticsError::Unavailable(_))));
        for id in &ids {
            assert!(!registry.require(*id).await.unwrap().is_assigned());
        }

        let reserved = registry.reserve(&ids[..2], VENDOR, 1).await.unwrap();
        assert_eq!(reserved.len(), 2);
        assert!(reserved.iter().all(|c| c.current_order_id == Some(1)));
    }

    #[tokio::test]
    async fn test_reserve_rejects_foreign_and_duplicate_ids() {
        let registry = registry();
        let ids = seed(&registry, &["OX-1"]).await;

        assert!(matches!(
            registry.reserve(&ids, VENDOR + 1, 1).await,
            Err(LogisticsError::Unavailable(_))
        ));
        assert!(matches!(
            registry.reserve(&[ids[0], ids[0]], VENDOR, 1).await,
            Err(LogisticsError::ValidationError(_))
        ));
        assert!(registry.reserve(&[], VENDOR, 1).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_release_is_idempotent() {
        let registry = registry();
        let ids = seed(&registry, &["OX-1", "OX-2"]).await;
        registry.reserve(&ids, VENDOR, 5).await.unwrap();

        let released = registry.release(5, Actor::vendor(VENDOR)).await.unwrap();
        assert_eq!(released.len(), 2);
        assert!(registry.release(5, Actor::vendor(VENDOR)).await.unwrap().is_empty());

        let logs = registry.logs(ids[0], Page::default()).await.unwrap();
        let events: Vec<_> = logs.iter().map(|l| l.event_type).collect();
        assert_eq!(
            events,
            vec![
                CylinderEventType::Unassigned,
                CylinderEventType::Assigned,
                CylinderEventType::Created
            ]
        );
    }

    #[tokio::test]
    async fn test_bulk_update_skips_missing_ids() {
        let registry = registry();
        let ids = seed(&registry, &["OX-1", "OX-2"]).await;

        let updated = registry
            .update_status_bulk(
                &[ids[0], 999, ids[1]],
                CylinderStatus::InTransit,
                Actor::vendor(VENDOR),
                None,
                None,
            )
            .await
            .unwrap();
        assert_eq!(updated.len(), 2);
        assert!(updated.iter().all(|c| c.status == CylinderStatus::InTransit));
    }

    #[tokio::test]
    async fn test_delete_keeps_tombstone_logs() {
        let registry = registry();
        let ids = seed(&registry, &["OX-1"]).await;

        assert!(registry.delete(ids[0], Actor::vendor(VENDOR)).await.unwrap());
        assert!(!registry.delete(ids[0], Actor::vendor(VENDOR)).await.unwrap());
        assert!(registry.get(ids[0]).await.unwrap().is_none());

        let logs = registry.logs(ids[0], Page::default()).await.unwrap();
        assert_eq!(logs[0].event_type, CylinderEventType::Deleted);
        assert_eq!(logs[0].old_status, Some(CylinderStatus::Filled));

        // The serial is free again.
        seed(&registry, &["OX-1"]).await;
    }
}
