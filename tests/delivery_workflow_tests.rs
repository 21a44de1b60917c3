//! Delivery workflow: creation guards, the five-stage forward chain,
//! cancellation and the collaborator hand-off on completion.

use anyhow::Result;
use linentrack::ErrorKind;
use linentrack::events::EventName;
use linentrack::models::{DeliveryStatus, ItemStatus};
use linentrack::repositories::audit::DELIVERY_ENTITY;
use linentrack::workflow::{CreateDeliveryRequest, DeliveryEvent, DeliveryLocation};
use std::sync::Arc;
use uuid::Uuid;

#[path = "test_utils/mod.rs"]
mod test_utils;
use test_utils::{
    RecordingAccounting, RecordingSink, create_delivery, create_pickup, create_tenant, ids,
    make_ready, register_item, register_items, register_typed_item, reload_items, setup_engine,
    setup_engine_with,
};

async fn statuses(engine: &linentrack::Engine, item_ids: &[Uuid]) -> Result<Vec<ItemStatus>> {
    Ok(reload_items(engine, item_ids)
        .await?
        .into_iter()
        .map(|item| item.status)
        .collect())
}

#[tokio::test]
async fn full_forward_chain_returns_items_to_hotel() -> Result<()> {
    let engine = setup_engine().await?;
    let tenant = create_tenant(&engine, "Hotel One").await?;
    let item = register_item(&engine, tenant.id, "RFID-001").await?;
    make_ready(&engine, tenant.id, &[item.id]).await?;

    let delivery = create_delivery(&engine, tenant.id, vec![item.id]).await?;
    assert_eq!(delivery.status, DeliveryStatus::Created);
    assert_eq!(delivery.package_count, 1);
    assert!(delivery.barcode.starts_with("DLV-"));

    let steps = [
        (DeliveryEvent::PrintLabel, DeliveryStatus::LabelPrinted, ItemStatus::LabelPrinted),
        (DeliveryEvent::Package, DeliveryStatus::Packaged, ItemStatus::Packaged),
        (DeliveryEvent::Pickup, DeliveryStatus::PickedUp, ItemStatus::InTransit),
        (DeliveryEvent::Deliver, DeliveryStatus::Delivered, ItemStatus::AtHotel),
    ];
    for (event, batch_status, item_status) in steps {
        let updated = engine.deliveries.apply(delivery.id, event, None).await?;
        assert_eq!(updated.status, batch_status, "after {event}");
        assert_eq!(statuses(&engine, &[item.id]).await?, vec![item_status]);
    }

    let done = engine.deliveries.get(delivery.id).await?;
    assert!(done.label_printed_at.is_some());
    assert!(done.packaged_at.is_some());
    assert!(done.picked_up_at.is_some());
    assert!(done.delivered_at.is_some());
    assert_eq!(done.delivery_latitude, None);
    assert_eq!(engine.items.get(item.id).await?.wash_count, 1);

    let err = engine.deliveries.package(delivery.id).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::InvalidState);
    Ok(())
}

#[tokio::test]
async fn skipping_a_stage_is_refused_and_changes_nothing() -> Result<()> {
    let engine = setup_engine().await?;
    let tenant = create_tenant(&engine, "Hotel One").await?;
    let items = register_items(&engine, tenant.id, "SKP", 2).await?;
    make_ready(&engine, tenant.id, &ids(&items)).await?;
    let delivery = create_delivery(&engine, tenant.id, ids(&items)).await?;

    for event in [DeliveryEvent::Package, DeliveryEvent::Pickup, DeliveryEvent::Deliver] {
        let err = engine
            .deliveries
            .apply(delivery.id, event, None)
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidState, "{event} from created");
    }

    let unchanged = engine.deliveries.get(delivery.id).await?;
    assert_eq!(unchanged.status, DeliveryStatus::Created);
    assert_eq!(unchanged.packaged_at, None);
    assert_eq!(
        statuses(&engine, &ids(&items)).await?,
        vec![ItemStatus::ReadyForDelivery; 2]
    );
    Ok(())
}

#[tokio::test]
async fn create_is_all_or_nothing() -> Result<()> {
    let engine = setup_engine().await?;
    let tenant = create_tenant(&engine, "Hotel One").await?;
    let ready = register_item(&engine, tenant.id, "READY-1").await?;
    let dirty = register_item(&engine, tenant.id, "DIRTY-1").await?;
    make_ready(&engine, tenant.id, &[ready.id]).await?;

    let err = create_delivery(&engine, tenant.id, vec![ready.id, dirty.id])
        .await
        .unwrap_err()
        .downcast::<linentrack::WorkflowError>()?;

    assert_eq!(err.kind(), ErrorKind::InvalidState);
    assert_eq!(err.ids(), &[dirty.id]);
    assert!(engine.deliveries.list(tenant.id, None).await?.is_empty());
    assert_eq!(
        engine.items.get(ready.id).await?.status,
        ItemStatus::ReadyForDelivery
    );
    Ok(())
}

#[tokio::test]
async fn create_validates_its_input() -> Result<()> {
    let engine = setup_engine().await?;
    let tenant = create_tenant(&engine, "Hotel One").await?;
    let item = register_item(&engine, tenant.id, "RFID-001").await?;
    make_ready(&engine, tenant.id, &[item.id]).await?;

    let empty = engine
        .deliveries
        .create(CreateDeliveryRequest::new(tenant.id, Vec::new()))
        .await
        .unwrap_err();
    assert_eq!(empty.kind(), ErrorKind::ValidationError);

    let no_packages = engine
        .deliveries
        .create(CreateDeliveryRequest {
            package_count: 0,
            ..CreateDeliveryRequest::new(tenant.id, vec![item.id])
        })
        .await
        .unwrap_err();
    assert_eq!(no_packages.kind(), ErrorKind::ValidationError);

    let missing_tenant = engine
        .deliveries
        .create(CreateDeliveryRequest::new(Uuid::new_v4(), vec![item.id]))
        .await
        .unwrap_err();
    assert_eq!(missing_tenant.kind(), ErrorKind::NotFound);
    Ok(())
}

#[tokio::test]
async fn items_of_another_tenant_are_ineligible() -> Result<()> {
    let engine = setup_engine().await?;
    let home = create_tenant(&engine, "Hotel One").await?;
    let away = create_tenant(&engine, "Hotel Two").await?;
    let stray = register_item(&engine, away.id, "AWAY-1").await?;
    make_ready(&engine, away.id, &[stray.id]).await?;

    let err = create_delivery(&engine, home.id, vec![stray.id])
        .await
        .unwrap_err()
        .downcast::<linentrack::WorkflowError>()?;

    assert_eq!(err.kind(), ErrorKind::InvalidState);
    Ok(())
}

#[tokio::test]
async fn item_can_only_ride_one_open_delivery() -> Result<()> {
    let engine = setup_engine().await?;
    let tenant = create_tenant(&engine, "Hotel One").await?;
    let item = register_item(&engine, tenant.id, "RFID-001").await?;
    make_ready(&engine, tenant.id, &[item.id]).await?;
    create_delivery(&engine, tenant.id, vec![item.id]).await?;

    let err = create_delivery(&engine, tenant.id, vec![item.id])
        .await
        .unwrap_err()
        .downcast::<linentrack::WorkflowError>()?;

    assert_eq!(err.kind(), ErrorKind::InvalidState);
    assert_eq!(engine.deliveries.list(tenant.id, None).await?.len(), 1);
    Ok(())
}

#[tokio::test]
async fn cancel_returns_items_to_the_pool() -> Result<()> {
    let engine = setup_engine().await?;
    let tenant = create_tenant(&engine, "Hotel One").await?;
    let items = register_items(&engine, tenant.id, "CNL", 2).await?;
    make_ready(&engine, tenant.id, &ids(&items)).await?;
    let delivery = create_delivery(&engine, tenant.id, ids(&items)).await?;
    engine.deliveries.print_label(delivery.id).await?;
    engine.deliveries.package(delivery.id).await?;

    let cancelled = engine.deliveries.cancel(delivery.id).await?;

    assert_eq!(cancelled.status, DeliveryStatus::Cancelled);
    assert!(cancelled.cancelled_at.is_some());
    assert_eq!(
        statuses(&engine, &ids(&items)).await?,
        vec![ItemStatus::ReadyForDelivery; 2]
    );
    // The record stays for audit and the items can ship again.
    assert_eq!(engine.deliveries.members(delivery.id).await?.len(), 2);
    create_delivery(&engine, tenant.id, ids(&items)).await?;

    let err = engine.deliveries.cancel(delivery.id).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::InvalidState);
    Ok(())
}

#[tokio::test]
async fn cancel_is_available_from_every_open_stage() -> Result<()> {
    let engine = setup_engine().await?;
    let tenant = create_tenant(&engine, "Hotel One").await?;
    let item = register_item(&engine, tenant.id, "RFID-001").await?;
    make_ready(&engine, tenant.id, &[item.id]).await?;

    let forward = [
        DeliveryEvent::PrintLabel,
        DeliveryEvent::Package,
        DeliveryEvent::Pickup,
    ];
    for reached in 0..=forward.len() {
        let delivery = create_delivery(&engine, tenant.id, vec![item.id]).await?;
        for event in &forward[..reached] {
            engine.deliveries.apply(delivery.id, *event, None).await?;
        }

        engine.deliveries.cancel(delivery.id).await?;
        assert_eq!(
            engine.items.get(item.id).await?.status,
            ItemStatus::ReadyForDelivery,
            "cancel after {reached} steps"
        );
    }
    Ok(())
}

#[tokio::test]
async fn cancel_after_delivery_is_refused() -> Result<()> {
    let engine = setup_engine().await?;
    let tenant = create_tenant(&engine, "Hotel One").await?;
    let item = register_item(&engine, tenant.id, "RFID-001").await?;
    make_ready(&engine, tenant.id, &[item.id]).await?;
    let delivery = create_delivery(&engine, tenant.id, vec![item.id]).await?;
    engine.deliveries.print_label(delivery.id).await?;
    engine.deliveries.package(delivery.id).await?;
    engine.deliveries.pickup(delivery.id).await?;
    engine.deliveries.deliver(delivery.id, None).await?;

    let err = engine.deliveries.cancel(delivery.id).await.unwrap_err();

    assert_eq!(err.kind(), ErrorKind::InvalidState);
    assert_eq!(engine.items.get(item.id).await?.status, ItemStatus::AtHotel);
    Ok(())
}

#[tokio::test]
async fn deliver_stores_location_when_given() -> Result<()> {
    let engine = setup_engine().await?;
    let tenant = create_tenant(&engine, "Hotel One").await?;
    let item = register_item(&engine, tenant.id, "RFID-001").await?;
    make_ready(&engine, tenant.id, &[item.id]).await?;
    let delivery = create_delivery(&engine, tenant.id, vec![item.id]).await?;
    engine.deliveries.print_label(delivery.id).await?;
    engine.deliveries.package(delivery.id).await?;
    engine.deliveries.pickup(delivery.id).await?;

    let bad = engine
        .deliveries
        .deliver(
            delivery.id,
            Some(DeliveryLocation {
                latitude: 123.0,
                longitude: 0.0,
            }),
        )
        .await
        .unwrap_err();
    assert_eq!(bad.kind(), ErrorKind::ValidationError);
    assert_eq!(
        engine.deliveries.get(delivery.id).await?.status,
        DeliveryStatus::PickedUp
    );

    let delivered = engine
        .deliveries
        .deliver(
            delivery.id,
            Some(DeliveryLocation {
                latitude: 48.8566,
                longitude: 2.3522,
            }),
        )
        .await?;
    assert_eq!(delivered.delivery_latitude, Some(48.8566));
    assert_eq!(delivered.delivery_longitude, Some(2.3522));
    Ok(())
}

#[tokio::test]
async fn out_of_step_member_blocks_the_whole_transition() -> Result<()> {
    let engine = setup_engine().await?;
    let tenant = create_tenant(&engine, "Hotel One").await?;
    let items = register_items(&engine, tenant.id, "OOS", 2).await?;
    make_ready(&engine, tenant.id, &ids(&items)).await?;
    let delivery = create_delivery(&engine, tenant.id, ids(&items)).await?;
    engine
        .items
        .set_status(items[1].id, ItemStatus::AtLaundry)
        .await?;

    let err = engine.deliveries.print_label(delivery.id).await.unwrap_err();

    assert_eq!(err.kind(), ErrorKind::InvalidState);
    assert_eq!(err.ids(), &[items[1].id]);
    assert_eq!(
        engine.deliveries.get(delivery.id).await?.status,
        DeliveryStatus::Created
    );
    assert_eq!(
        statuses(&engine, &ids(&items)).await?,
        vec![ItemStatus::ReadyForDelivery, ItemStatus::AtLaundry]
    );
    Ok(())
}

#[tokio::test]
async fn cancel_frees_a_delivery_with_a_drifted_member() -> Result<()> {
    let engine = setup_engine().await?;
    let tenant = create_tenant(&engine, "Hotel One").await?;
    let items = register_items(&engine, tenant.id, "DRF", 2).await?;
    make_ready(&engine, tenant.id, &ids(&items)).await?;
    let delivery = create_delivery(&engine, tenant.id, ids(&items)).await?;
    engine
        .items
        .set_status(items[1].id, ItemStatus::AtLaundry)
        .await?;

    let cancelled = engine.deliveries.cancel(delivery.id).await?;

    assert_eq!(cancelled.status, DeliveryStatus::Cancelled);
    assert_eq!(
        statuses(&engine, &ids(&items)).await?,
        vec![ItemStatus::ReadyForDelivery; 2]
    );
    // Nothing open remains, so the item and then the tenant can go.
    engine.items.delete(items[0].id).await?;
    let report = engine.cascade.hard_delete(tenant.id).await?;
    assert_eq!(report.deliveries, 1);
    Ok(())
}

#[tokio::test]
async fn barcode_lookup_matches_id_lookup() -> Result<()> {
    let engine = setup_engine().await?;
    let tenant = create_tenant(&engine, "Hotel One").await?;
    let item = register_item(&engine, tenant.id, "RFID-001").await?;
    make_ready(&engine, tenant.id, &[item.id]).await?;
    let delivery = create_delivery(&engine, tenant.id, vec![item.id]).await?;

    let parts: Vec<&str> = delivery.barcode.split('-').collect();
    assert_eq!(parts.len(), 3);
    assert_eq!(parts[0], "DLV");
    assert_eq!(parts[2].len(), 8);

    let by_barcode = engine.deliveries.get_by_barcode(&delivery.barcode).await?;
    assert_eq!(by_barcode, engine.deliveries.get(delivery.id).await?);

    let missing = engine
        .deliveries
        .get_by_barcode("DLV-00000000-NOPE")
        .await
        .unwrap_err();
    assert_eq!(missing.kind(), ErrorKind::NotFound);
    Ok(())
}

#[tokio::test]
async fn deliver_settles_item_type_counts_with_accounting() -> Result<()> {
    let engine = setup_engine().await?;
    let tenant = create_tenant(&engine, "Hotel One").await?;
    let (towel, sheet) = (Uuid::new_v4(), Uuid::new_v4());
    let mut members = Vec::new();
    for (n, kind) in [towel, towel, sheet].into_iter().enumerate() {
        members.push(register_typed_item(&engine, tenant.id, kind, &format!("TYP-{n}")).await?);
    }
    make_ready(&engine, tenant.id, &ids(&members)).await?;
    let delivery = create_delivery(&engine, tenant.id, ids(&members)).await?;

    let breakdown = engine.deliveries.type_breakdown(delivery.id).await?;
    assert_eq!(breakdown.get(&towel), Some(&2));
    assert_eq!(breakdown.get(&sheet), Some(&1));

    engine.deliveries.print_label(delivery.id).await?;
    engine.deliveries.package(delivery.id).await?;
    engine.deliveries.pickup(delivery.id).await?;
    assert!(engine.accounting.settlements().is_empty());
    engine.deliveries.deliver(delivery.id, None).await?;

    let settlements = engine.accounting.wait_for(1).await;
    assert_eq!(settlements.len(), 1);
    assert_eq!(settlements[0].delivery_id, delivery.id);
    assert_eq!(settlements[0].tenant_id, tenant.id);
    assert_eq!(settlements[0].item_type_counts, breakdown);
    Ok(())
}

#[tokio::test]
async fn every_transition_is_announced_and_audited() -> Result<()> {
    let engine = setup_engine().await?;
    let tenant = create_tenant(&engine, "Hotel One").await?;
    let item = register_item(&engine, tenant.id, "RFID-001").await?;
    make_ready(&engine, tenant.id, &[item.id]).await?;
    let delivery = create_delivery(&engine, tenant.id, vec![item.id]).await?;
    engine.deliveries.print_label(delivery.id).await?;
    engine.deliveries.cancel(delivery.id).await?;

    // pickup.created and pickup.received come from make_ready.
    let events = engine.notifications.wait_for(5).await;
    let delivery_events: Vec<EventName> = events
        .iter()
        .filter(|event| event.batch_id == delivery.id)
        .map(|event| event.name)
        .collect();
    assert_eq!(delivery_events.len(), 3);
    for name in [
        EventName::DeliveryCreated,
        EventName::DeliveryLabelPrinted,
        EventName::DeliveryCancelled,
    ] {
        assert!(delivery_events.contains(&name), "missing {name}");
    }

    let actions: Vec<String> = engine
        .audit
        .history(DELIVERY_ENTITY, delivery.id)
        .await?
        .into_iter()
        .map(|entry| entry.action)
        .collect();
    assert_eq!(actions, vec!["created", "label_printed", "cancelled"]);
    Ok(())
}

#[tokio::test]
async fn failing_collaborators_do_not_block_completion() -> Result<()> {
    let engine = setup_engine_with(
        Arc::new(RecordingSink::failing()),
        Arc::new(RecordingAccounting::failing()),
    )
    .await?;
    let tenant = create_tenant(&engine, "Hotel One").await?;
    let item = register_item(&engine, tenant.id, "RFID-001").await?;
    make_ready(&engine, tenant.id, &[item.id]).await?;
    let delivery = create_delivery(&engine, tenant.id, vec![item.id]).await?;
    engine.deliveries.print_label(delivery.id).await?;
    engine.deliveries.package(delivery.id).await?;
    engine.deliveries.pickup(delivery.id).await?;

    let delivered = engine.deliveries.deliver(delivery.id, None).await?;
    engine.accounting.wait_for(1).await;

    assert_eq!(delivered.status, DeliveryStatus::Delivered);
    assert_eq!(
        engine.deliveries.get(delivery.id).await?.status,
        DeliveryStatus::Delivered
    );
    Ok(())
}

#[tokio::test]
async fn concurrent_deliver_calls_complete_exactly_once() -> Result<()> {
    let engine = setup_engine().await?;
    let tenant = create_tenant(&engine, "Hotel One").await?;
    let item = register_item(&engine, tenant.id, "RFID-001").await?;
    make_ready(&engine, tenant.id, &[item.id]).await?;
    let delivery = create_delivery(&engine, tenant.id, vec![item.id]).await?;
    engine.deliveries.print_label(delivery.id).await?;
    engine.deliveries.package(delivery.id).await?;
    engine.deliveries.pickup(delivery.id).await?;

    let first = engine.deliveries.clone();
    let second = engine.deliveries.clone();
    let (a, b) = tokio::join!(
        tokio::spawn(async move { first.deliver(delivery.id, None).await }),
        tokio::spawn(async move { second.deliver(delivery.id, None).await }),
    );
    let outcomes = [a?, b?];

    assert_eq!(outcomes.iter().filter(|r| r.is_ok()).count(), 1);
    let loser = outcomes
        .iter()
        .find_map(|r| r.as_ref().err())
        .expect("one call must lose");
    assert_eq!(loser.kind(), ErrorKind::InvalidState);

    assert_eq!(engine.items.get(item.id).await?.status, ItemStatus::AtHotel);
    assert_eq!(engine.accounting.wait_for(1).await.len(), 1);
    Ok(())
}

#[tokio::test]
async fn delivery_cannot_take_items_still_in_a_pickup() -> Result<()> {
    let engine = setup_engine().await?;
    let tenant = create_tenant(&engine, "Hotel One").await?;
    let item = register_item(&engine, tenant.id, "RFID-001").await?;
    make_ready(&engine, tenant.id, &[item.id]).await?;
    // Pickup creation ignores item status, so a ready item can be bagged again.
    create_pickup(&engine, tenant.id, vec![item.id]).await?;

    let err = create_delivery(&engine, tenant.id, vec![item.id])
        .await
        .unwrap_err()
        .downcast::<linentrack::WorkflowError>()?;

    assert_eq!(err.kind(), ErrorKind::InvalidState);
    Ok(())
}
