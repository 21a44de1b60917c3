//! Item ledger: registration, bulk laundry-floor transitions, condition
//! flags and deletion guards.

use anyhow::Result;
use linentrack::ErrorKind;
use linentrack::models::ItemStatus;
use linentrack::repositories::{ConditionUpdate, RegisterItemRequest};
use uuid::Uuid;

#[path = "test_utils/mod.rs"]
mod test_utils;
use test_utils::{
    create_pickup, create_tenant, ids, register_item, register_items, reload_items, setup_engine,
};

#[tokio::test]
async fn register_starts_item_at_hotel() -> Result<()> {
    let engine = setup_engine().await?;
    let tenant = create_tenant(&engine, "Hotel One").await?;

    let item = register_item(&engine, tenant.id, "  RFID-001 ").await?;

    assert_eq!(item.rfid_tag, "RFID-001");
    assert_eq!(item.status, ItemStatus::AtHotel);
    assert_eq!(item.wash_count, 0);
    assert!(!item.is_damaged && !item.is_stained);
    assert_eq!(engine.items.get_by_tag("RFID-001").await?.id, item.id);
    Ok(())
}

#[tokio::test]
async fn duplicate_tag_is_a_conflict_across_tenants() -> Result<()> {
    let engine = setup_engine().await?;
    let first = create_tenant(&engine, "Hotel One").await?;
    let second = create_tenant(&engine, "Hotel Two").await?;
    register_item(&engine, first.id, "RFID-001").await?;

    let err = engine
        .items
        .register(RegisterItemRequest {
            tenant_id: second.id,
            item_type_id: Uuid::nil(),
            rfid_tag: "RFID-001".to_string(),
        })
        .await
        .unwrap_err();

    assert_eq!(err.kind(), ErrorKind::Conflict);
    Ok(())
}

#[tokio::test]
async fn malformed_tags_are_rejected_before_lookup() -> Result<()> {
    let engine = setup_engine().await?;
    let tenant = create_tenant(&engine, "Hotel One").await?;

    let too_long = "A".repeat(129);
    for tag in ["", "   ", "RFID 001", "-leading-dash", too_long.as_str()] {
        let err = engine
            .items
            .register(RegisterItemRequest {
                tenant_id: tenant.id,
                item_type_id: Uuid::nil(),
                rfid_tag: tag.to_string(),
            })
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::ValidationError, "tag {tag:?}");
    }
    Ok(())
}

#[tokio::test]
async fn register_for_unknown_tenant_is_not_found() -> Result<()> {
    let engine = setup_engine().await?;

    let err = engine
        .items
        .register(RegisterItemRequest {
            tenant_id: Uuid::new_v4(),
            item_type_id: Uuid::nil(),
            rfid_tag: "RFID-404".to_string(),
        })
        .await
        .unwrap_err();

    assert_eq!(err.kind(), ErrorKind::NotFound);
    Ok(())
}

#[tokio::test]
async fn mark_clean_moves_laundry_items_to_ready() -> Result<()> {
    let engine = setup_engine().await?;
    let tenant = create_tenant(&engine, "Hotel One").await?;
    let item = register_item(&engine, tenant.id, "RFID-001").await?;
    let pickup = create_pickup(&engine, tenant.id, vec![item.id]).await?;
    engine.pickups.receive(pickup.id).await?;

    let report = engine.items.mark_clean(&[item.id]).await?;

    assert_eq!(report.count, 1);
    assert!(report.skipped.is_empty());
    assert_eq!(
        engine.items.get(item.id).await?.status,
        ItemStatus::ReadyForDelivery
    );
    Ok(())
}

#[tokio::test]
async fn mark_clean_skips_ineligible_items_without_failing() -> Result<()> {
    let engine = setup_engine().await?;
    let tenant = create_tenant(&engine, "Hotel One").await?;
    let items = register_items(&engine, tenant.id, "MIX", 3).await?;
    let pickup = create_pickup(&engine, tenant.id, vec![items[0].id, items[1].id]).await?;
    engine.pickups.receive(pickup.id).await?;
    engine.items.start_processing(&[items[1].id]).await?;

    let unknown = Uuid::new_v4();
    let report = engine
        .items
        .mark_clean(&[items[0].id, items[1].id, items[2].id, unknown, items[0].id])
        .await?;

    assert_eq!(report.count, 2);
    assert_eq!(report.skipped, vec![items[2].id, unknown]);

    let reloaded = reload_items(&engine, &ids(&items)).await?;
    assert_eq!(reloaded[0].status, ItemStatus::ReadyForDelivery);
    assert_eq!(reloaded[1].status, ItemStatus::ReadyForDelivery);
    assert_eq!(reloaded[2].status, ItemStatus::AtHotel);
    Ok(())
}

#[tokio::test]
async fn start_processing_only_accepts_laundry_items() -> Result<()> {
    let engine = setup_engine().await?;
    let tenant = create_tenant(&engine, "Hotel One").await?;
    let items = register_items(&engine, tenant.id, "PRC", 2).await?;
    let pickup = create_pickup(&engine, tenant.id, vec![items[0].id]).await?;
    engine.pickups.receive(pickup.id).await?;

    let report = engine.items.start_processing(&ids(&items)).await?;

    assert_eq!(report.count, 1);
    assert_eq!(report.skipped, vec![items[1].id]);
    assert_eq!(
        engine.items.get(items[0].id).await?.status,
        ItemStatus::Processing
    );
    Ok(())
}

#[tokio::test]
async fn damaged_items_still_move_through_the_cycle() -> Result<()> {
    let engine = setup_engine().await?;
    let tenant = create_tenant(&engine, "Hotel One").await?;
    let item = register_item(&engine, tenant.id, "RFID-DMG").await?;

    let flagged = engine
        .items
        .set_condition(
            item.id,
            ConditionUpdate {
                is_damaged: Some(true),
                is_stained: None,
                notes: Some(" torn hem ".to_string()),
            },
        )
        .await?;
    assert!(flagged.is_damaged);
    assert!(!flagged.is_stained);
    assert_eq!(flagged.condition_notes.as_deref(), Some("torn hem"));

    let pickup = create_pickup(&engine, tenant.id, vec![item.id]).await?;
    engine.pickups.receive(pickup.id).await?;
    assert_eq!(engine.items.mark_clean(&[item.id]).await?.count, 1);

    let cleared = engine
        .items
        .set_condition(
            item.id,
            ConditionUpdate {
                notes: Some(String::new()),
                ..ConditionUpdate::default()
            },
        )
        .await?;
    assert!(cleared.is_damaged);
    assert_eq!(cleared.condition_notes, None);
    Ok(())
}

#[tokio::test]
async fn status_override_leaves_wash_count_alone() -> Result<()> {
    let engine = setup_engine().await?;
    let tenant = create_tenant(&engine, "Hotel One").await?;
    let item = register_item(&engine, tenant.id, "RFID-ADM").await?;

    let updated = engine
        .items
        .set_status(item.id, ItemStatus::AtLaundry)
        .await?;

    assert_eq!(updated.status, ItemStatus::AtLaundry);
    assert_eq!(updated.wash_count, 0);
    Ok(())
}

#[tokio::test]
async fn delete_is_blocked_while_an_open_pickup_claims_the_item() -> Result<()> {
    let engine = setup_engine().await?;
    let tenant = create_tenant(&engine, "Hotel One").await?;
    let item = register_item(&engine, tenant.id, "RFID-DEL").await?;
    let pickup = create_pickup(&engine, tenant.id, vec![item.id]).await?;

    let err = engine.items.delete(item.id).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Conflict);
    assert_eq!(err.ids(), &[pickup.id]);
    assert!(engine.items.get(item.id).await.is_ok());

    engine.pickups.receive(pickup.id).await?;
    engine.items.delete(item.id).await?;

    let gone = engine.items.get(item.id).await.unwrap_err();
    assert_eq!(gone.kind(), ErrorKind::NotFound);
    assert!(engine.pickups.members(pickup.id).await?.is_empty());
    Ok(())
}

#[tokio::test]
async fn status_counts_group_by_status() -> Result<()> {
    let engine = setup_engine().await?;
    let tenant = create_tenant(&engine, "Hotel One").await?;
    let other = create_tenant(&engine, "Hotel Two").await?;
    let items = register_items(&engine, tenant.id, "CNT", 3).await?;
    register_items(&engine, other.id, "OTH", 2).await?;
    let pickup = create_pickup(&engine, tenant.id, vec![items[0].id]).await?;
    engine.pickups.receive(pickup.id).await?;

    let counts = engine.items.status_counts(tenant.id).await?;

    assert_eq!(counts.get(&ItemStatus::AtHotel), Some(&2));
    assert_eq!(counts.get(&ItemStatus::AtLaundry), Some(&1));
    assert_eq!(counts.values().sum::<u64>(), 3);

    let listed = engine
        .items
        .list(tenant.id, Some(ItemStatus::AtHotel))
        .await?;
    assert_eq!(listed.len(), 2);
    Ok(())
}
