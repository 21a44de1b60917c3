//! Reconciliation of scanned tag lists against the item ledger.

use anyhow::Result;
use linentrack::ErrorKind;
use linentrack::config::WorkflowConfig;
use linentrack::rfid::RfidReconciler;
use std::sync::Arc;

#[path = "test_utils/mod.rs"]
mod test_utils;
use test_utils::{create_tenant, register_item, register_items, setup_engine};

fn tags(raw: &[&str]) -> Vec<String> {
    raw.iter().map(|t| t.to_string()).collect()
}

#[tokio::test]
async fn scan_partitions_found_and_unknown_tags() -> Result<()> {
    let engine = setup_engine().await?;
    let tenant = create_tenant(&engine, "Hotel One").await?;
    let item = register_item(&engine, tenant.id, "RFID-001").await?;

    let report = engine
        .rfid
        .scan(&tags(&["RFID-001", "RFID-999"]), None)
        .await?;

    assert_eq!(report.found, 1);
    assert_eq!(report.not_found, 1);
    assert_eq!(report.not_found_tags, tags(&["RFID-999"]));
    assert_eq!(report.items[0].id, item.id);
    Ok(())
}

#[tokio::test]
async fn duplicate_tags_collapse() -> Result<()> {
    let engine = setup_engine().await?;
    let tenant = create_tenant(&engine, "Hotel One").await?;
    register_items(&engine, tenant.id, "DUP", 2).await?;

    let with_repeats = engine
        .rfid
        .scan(&tags(&["DUP-000", "DUP-000", " DUP-001", "GHOST", "GHOST"]), None)
        .await?;
    let distinct = engine
        .rfid
        .scan(&tags(&["DUP-000", "DUP-001", "GHOST"]), None)
        .await?;

    assert_eq!(with_repeats.found, 2);
    assert_eq!(with_repeats.not_found, 1);
    assert_eq!(with_repeats, distinct);
    Ok(())
}

#[tokio::test]
async fn malformed_tags_count_as_not_found() -> Result<()> {
    let engine = setup_engine().await?;
    let tenant = create_tenant(&engine, "Hotel One").await?;
    register_item(&engine, tenant.id, "RFID-001").await?;

    let report = engine
        .rfid
        .scan(&tags(&["RFID-001", "", "bad tag", "RFID-002"]), None)
        .await?;

    assert_eq!(report.found, 1);
    assert_eq!(report.not_found, 3);
    assert_eq!(report.not_found_tags, tags(&["", "bad tag", "RFID-002"]));
    assert_eq!(report.rejected_tags, tags(&["", "bad tag"]));
    Ok(())
}

#[tokio::test]
async fn tenant_filter_separates_foreign_items() -> Result<()> {
    let engine = setup_engine().await?;
    let home = create_tenant(&engine, "Hotel One").await?;
    let away = create_tenant(&engine, "Hotel Two").await?;
    register_item(&engine, home.id, "HOME-1").await?;
    let stray = register_item(&engine, away.id, "AWAY-1").await?;

    let report = engine
        .rfid
        .scan(&tags(&["HOME-1", "AWAY-1", "NONE-1"]), Some(home.id))
        .await?;

    assert_eq!(report.found, 1);
    assert_eq!(report.foreign_items.len(), 1);
    assert_eq!(report.foreign_items[0].id, stray.id);
    assert_eq!(report.not_found_tags, tags(&["NONE-1"]));
    Ok(())
}

#[tokio::test]
async fn scan_never_mutates_items() -> Result<()> {
    let engine = setup_engine().await?;
    let tenant = create_tenant(&engine, "Hotel One").await?;
    let before = register_item(&engine, tenant.id, "RFID-001").await?;

    engine.rfid.scan(&tags(&["RFID-001"]), None).await?;

    let after = engine.items.get(before.id).await?;
    assert_eq!(after.status, before.status);
    assert_eq!(after.updated_at, before.updated_at);
    assert_eq!(after.wash_count, before.wash_count);
    Ok(())
}

#[tokio::test]
async fn oversized_scan_is_a_validation_error() -> Result<()> {
    let engine = setup_engine().await?;
    let reconciler = RfidReconciler::new(
        Arc::clone(&engine.db),
        &WorkflowConfig {
            max_scan_tags: 2,
            ..WorkflowConfig::default()
        },
    );

    let err = reconciler
        .scan(&tags(&["A-1", "A-2", "A-3", "A-1"]), None)
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::ValidationError);

    // Repeats do not count toward the limit.
    let report = reconciler.scan(&tags(&["A-1", "A-2", "A-1"]), None).await?;
    assert_eq!(report.not_found, 2);
    Ok(())
}
