//! Shared handles to every engine component over one connection pool.

use sea_orm::DatabaseConnection;
use std::sync::Arc;

use crate::config::AppConfig;
use crate::events::EventDispatcher;
use crate::repositories::{AuditRepository, ItemRepository, TenantRepository};
use crate::rfid::RfidReconciler;
use crate::workflow::{DeliveryWorkflow, PickupWorkflow, TenantCascade};

/// Cheap to clone; all components share the pool and the event dispatcher.
#[derive(Debug, Clone)]
pub struct Engine {
    pub db: Arc<DatabaseConnection>,
    pub tenants: TenantRepository,
    pub items: ItemRepository,
    pub audit: AuditRepository,
    pub rfid: RfidReconciler,
    pub pickups: PickupWorkflow,
    pub deliveries: DeliveryWorkflow,
    pub cascade: TenantCascade,
}

impl Engine {
    pub fn new(db: DatabaseConnection, config: &AppConfig, events: EventDispatcher) -> Self {
        Self::from_shared(Arc::new(db), config, events)
    }

    pub fn from_shared(
        db: Arc<DatabaseConnection>,
        config: &AppConfig,
        events: EventDispatcher,
    ) -> Self {
        let workflow = &config.workflow;
        Self {
            tenants: TenantRepository::new(Arc::clone(&db)),
            items: ItemRepository::new(Arc::clone(&db), workflow.max_tag_length),
            audit: AuditRepository::new(Arc::clone(&db)),
            rfid: RfidReconciler::new(Arc::clone(&db), workflow),
            pickups: PickupWorkflow::new(Arc::clone(&db), events.clone()),
            deliveries: DeliveryWorkflow::new(Arc::clone(&db), events, workflow),
            cascade: TenantCascade::new(Arc::clone(&db)),
            db,
        }
    }
}
