//! Test utilities for database-backed engine tests.
//!
//! Sets up an in-memory SQLite database with migrations applied and foreign
//! keys enforced, builds an [`Engine`] whose collaborators record every call,
//! and provides fixtures that walk items through the laundry cycle.

#![allow(dead_code)]

use anyhow::Result;
use async_trait::async_trait;
use linentrack::Engine;
use linentrack::config::AppConfig;
use linentrack::events::{
    AccountingSync, CollaboratorError, DeliverySettlement, EventDispatcher, NotificationSink,
    WorkflowEvent,
};
use linentrack::models::{delivery, item, pickup, tenant};
use linentrack::repositories::{CreateTenantRequest, RegisterItemRequest};
use linentrack::workflow::{CreateDeliveryRequest, CreatePickupRequest};
use migration::{Migrator, MigratorTrait};
use sea_orm::{ConnectionTrait, Database, DatabaseConnection, Statement};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use uuid::Uuid;

/// Sets up an in-memory SQLite database with all migrations applied.
pub async fn setup_test_db() -> Result<Arc<DatabaseConnection>> {
    let db = Database::connect("sqlite::memory:").await?;
    db.execute(Statement::from_string(
        db.get_database_backend(),
        "PRAGMA foreign_keys = ON".to_string(),
    ))
    .await?;
    Migrator::up(&db, None).await?;
    Ok(Arc::new(db))
}

#[derive(Default)]
pub struct RecordingSink {
    events: Mutex<Vec<WorkflowEvent>>,
    fail: bool,
}

impl RecordingSink {
    /// Sink that records the event and then reports a delivery failure.
    pub fn failing() -> Self {
        Self {
            events: Mutex::new(Vec::new()),
            fail: true,
        }
    }

    pub fn events(&self) -> Vec<WorkflowEvent> {
        self.events.lock().unwrap().clone()
    }

    /// Waits until at least `count` events arrived; dispatch is spawned.
    pub async fn wait_for(&self, count: usize) -> Vec<WorkflowEvent> {
        wait_until(|| self.events.lock().unwrap().len() >= count).await;
        self.events()
    }
}

#[async_trait]
impl NotificationSink for RecordingSink {
    async fn notify(&self, event: &WorkflowEvent) -> Result<(), CollaboratorError> {
        self.events.lock().unwrap().push(event.clone());
        if self.fail {
            return Err("notification channel offline".into());
        }
        Ok(())
    }
}

#[derive(Default)]
pub struct RecordingAccounting {
    settlements: Mutex<Vec<DeliverySettlement>>,
    fail: bool,
}

impl RecordingAccounting {
    pub fn failing() -> Self {
        Self {
            settlements: Mutex::new(Vec::new()),
            fail: true,
        }
    }

    pub fn settlements(&self) -> Vec<DeliverySettlement> {
        self.settlements.lock().unwrap().clone()
    }

    pub async fn wait_for(&self, count: usize) -> Vec<DeliverySettlement> {
        wait_until(|| self.settlements.lock().unwrap().len() >= count).await;
        self.settlements()
    }
}

#[async_trait]
impl AccountingSync for RecordingAccounting {
    async fn delivery_completed(
        &self,
        settlement: &DeliverySettlement,
    ) -> Result<(), CollaboratorError> {
        self.settlements.lock().unwrap().push(settlement.clone());
        if self.fail {
            return Err("accounting endpoint unavailable".into());
        }
        Ok(())
    }
}

async fn wait_until(mut done: impl FnMut() -> bool) {
    let result = tokio::time::timeout(Duration::from_secs(2), async {
        while !done() {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await;
    assert!(result.is_ok(), "timed out waiting for collaborator calls");
}

/// Engine over a fresh database plus handles to its recording collaborators.
pub struct TestEngine {
    pub engine: Engine,
    pub notifications: Arc<RecordingSink>,
    pub accounting: Arc<RecordingAccounting>,
}

impl std::ops::Deref for TestEngine {
    type Target = Engine;

    fn deref(&self) -> &Engine {
        &self.engine
    }
}

pub async fn setup_engine() -> Result<TestEngine> {
    setup_engine_with(
        Arc::new(RecordingSink::default()),
        Arc::new(RecordingAccounting::default()),
    )
    .await
}

pub async fn setup_engine_with(
    notifications: Arc<RecordingSink>,
    accounting: Arc<RecordingAccounting>,
) -> Result<TestEngine> {
    let db = setup_test_db().await?;
    let events = EventDispatcher::new(notifications.clone(), accounting.clone());
    let engine = Engine::from_shared(db, &AppConfig::default(), events);

    Ok(TestEngine {
        engine,
        notifications,
        accounting,
    })
}

pub async fn create_tenant(engine: &Engine, name: &str) -> Result<tenant::Model> {
    let slug = name.to_ascii_lowercase().replace(' ', "-");
    Ok(engine
        .tenants
        .create(CreateTenantRequest {
            name: name.to_string(),
            contact_email: Some(format!("ops@{slug}.example")),
            ..CreateTenantRequest::default()
        })
        .await?)
}

pub async fn register_item(engine: &Engine, tenant_id: Uuid, tag: &str) -> Result<item::Model> {
    register_typed_item(engine, tenant_id, Uuid::nil(), tag).await
}

pub async fn register_typed_item(
    engine: &Engine,
    tenant_id: Uuid,
    item_type_id: Uuid,
    tag: &str,
) -> Result<item::Model> {
    Ok(engine
        .items
        .register(RegisterItemRequest {
            tenant_id,
            item_type_id,
            rfid_tag: tag.to_string(),
        })
        .await?)
}

/// Registers `count` items tagged `<prefix>-000`, `<prefix>-001`, ...
pub async fn register_items(
    engine: &Engine,
    tenant_id: Uuid,
    prefix: &str,
    count: usize,
) -> Result<Vec<item::Model>> {
    let mut items = Vec::with_capacity(count);
    for n in 0..count {
        items.push(register_item(engine, tenant_id, &format!("{prefix}-{n:03}")).await?);
    }
    Ok(items)
}

pub fn ids(items: &[item::Model]) -> Vec<Uuid> {
    items.iter().map(|item| item.id).collect()
}

pub async fn create_pickup(
    engine: &Engine,
    tenant_id: Uuid,
    item_ids: Vec<Uuid>,
) -> Result<pickup::Model> {
    Ok(engine
        .pickups
        .create(CreatePickupRequest {
            tenant_id,
            bag_code: None,
            item_ids,
            seal_number: None,
        })
        .await?)
}

/// Runs items through pickup, reception and cleaning so they are
/// `ready_for_delivery`.
pub async fn make_ready(engine: &Engine, tenant_id: Uuid, item_ids: &[Uuid]) -> Result<()> {
    let pickup = create_pickup(engine, tenant_id, item_ids.to_vec()).await?;
    engine.pickups.receive(pickup.id).await?;
    let report = engine.items.mark_clean(item_ids).await?;
    assert_eq!(report.count, item_ids.len() as u64);
    Ok(())
}

pub async fn create_delivery(
    engine: &Engine,
    tenant_id: Uuid,
    item_ids: Vec<Uuid>,
) -> Result<delivery::Model> {
    Ok(engine
        .deliveries
        .create(CreateDeliveryRequest::new(tenant_id, item_ids))
        .await?)
}

pub async fn reload_items(engine: &Engine, item_ids: &[Uuid]) -> Result<Vec<item::Model>> {
    let mut items = Vec::with_capacity(item_ids.len());
    for id in item_ids {
        items.push(engine.items.get(*id).await?);
    }
    Ok(items)
}
