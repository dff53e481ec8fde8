mod common;

use chrono::Utc;
use common::{Harness, UnreachableCache, harness, harness_with, hospital, hospital_site, vendor_with_stock};
use gasflow::domain::Page;
use gasflow::domain::account::Actor;
use gasflow::domain::cylinder::{CylinderFilter, CylinderStatus};
use gasflow::domain::delivery::DeliveryUpdate;
use gasflow::domain::order::{OrderDraft, OrderId, OrderStatus, PaymentStatus, Urgency};
use gasflow::infrastructure::notifier::LogNotifier;
use std::sync::Arc;

#[tokio::test]
async fn test_unreachable_cache_falls_back_to_store() {
    let h = harness_with(Arc::new(UnreachableCache), Arc::new(LogNotifier));
    let hospital = hospital(&h.platform).await;
    let (vendor, stock) = vendor_with_stock(&h.platform, "Oxy", hospital_site(), 2).await;

    let cylinder = h.platform.cylinders.require(stock[0]).await.unwrap();
    assert_eq!(cylinder.vendor_id, vendor.id);
    let listed = h
        .platform
        .cylinders
        .list(CylinderFilter::default(), Page::default())
        .await
        .unwrap();
    assert_eq!(listed.len(), 2);

    let order = h
        .platform
        .orders
        .create(OrderDraft::new(2, Urgency::High, hospital_site()), hospital.id)
        .await
        .unwrap();
    h.platform
        .orders
        .accept_order(order.id, vendor.id, Utc::now(), &stock)
        .await
        .unwrap();

    let status = h.platform.delivery.get_delivery_status(order.id).await.unwrap();
    assert_eq!(status.status, OrderStatus::Accepted);
    assert_eq!(status.cylinders_loaded, 2);
}

#[tokio::test]
async fn test_reads_after_writes_are_fresh() {
    let h = harness();
    let hospital = hospital(&h.platform).await;
    let (vendor, stock) = vendor_with_stock(&h.platform, "Oxy", hospital_site(), 1).await;
    let available = CylinderFilter {
        is_assigned: Some(false),
        ..Default::default()
    };

    // Populate every cached view first.
    assert_eq!(h.platform.cylinders.list(available, Page::default()).await.unwrap().len(), 1);
    let order = h
        .platform
        .orders
        .create(OrderDraft::new(1, Urgency::High, hospital_site()), hospital.id)
        .await
        .unwrap();
    h.platform.orders.get(order.id).await.unwrap();
    h.platform.delivery.get_delivery_status(order.id).await.unwrap();

    h.platform
        .orders
        .accept_order(order.id, vendor.id, Utc::now(), &stock)
        .await
        .unwrap();

    assert!(h.platform.cylinders.list(available, Page::default()).await.unwrap().is_empty());
    assert_eq!(
        h.platform.orders.require(order.id).await.unwrap().status,
        OrderStatus::Accepted
    );
    let status = h.platform.delivery.get_delivery_status(order.id).await.unwrap();
    assert_eq!(status.status, OrderStatus::Accepted);
    assert_eq!(status.cylinders_loaded, 1);

    h.platform
        .delivery
        .update_delivery_status(
            order.id,
            DeliveryUpdate::new(OrderStatus::InTransit),
            Actor::vendor(vendor.id),
            None,
        )
        .await
        .unwrap();
    assert_eq!(
        h.platform.orders.require(order.id).await.unwrap().status,
        OrderStatus::InTransit
    );

    let paid = h
        .platform
        .orders
        .set_payment_status(order.id, PaymentStatus::Paid)
        .await
        .unwrap();
    assert_eq!(h.platform.orders.require(order.id).await.unwrap(), paid);

    h.platform
        .cylinders
        .update_status(stock[0], CylinderStatus::InTransit, Actor::vendor(vendor.id), None, None)
        .await
        .unwrap();
    assert_eq!(
        h.platform.cylinders.require(stock[0]).await.unwrap().status,
        CylinderStatus::InTransit
    );
}

async fn loaded(h: &Harness, order_id: OrderId) -> usize {
    h.platform
        .delivery
        .get_delivery_status(order_id)
        .await
        .unwrap()
        .cylinders_loaded
}

#[tokio::test]
async fn test_cylinder_links_refresh_delivery_snapshot() {
    let h = harness();
    let hospital = hospital(&h.platform).await;
    let (vendor, stock) = vendor_with_stock(&h.platform, "Oxy", hospital_site(), 3).await;
    let order = h
        .platform
        .orders
        .create(OrderDraft::new(2, Urgency::High, hospital_site()), hospital.id)
        .await
        .unwrap();
    h.platform
        .orders
        .accept_order(order.id, vendor.id, Utc::now(), &stock[..2])
        .await
        .unwrap();
    assert_eq!(loaded(&h, order.id).await, 2);

    h.platform
        .cylinders
        .release(order.id, Actor::vendor(vendor.id))
        .await
        .unwrap();
    assert_eq!(loaded(&h, order.id).await, 0);

    h.platform
        .cylinders
        .reserve(&stock[2..], vendor.id, order.id)
        .await
        .unwrap();
    assert_eq!(loaded(&h, order.id).await, 1);

    h.platform
        .cylinders
        .delete(stock[2], Actor::vendor(vendor.id))
        .await
        .unwrap();
    assert_eq!(loaded(&h, order.id).await, 0);
}
