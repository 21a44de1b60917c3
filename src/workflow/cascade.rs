//! # Tenant Lifecycle Cascade
//!
//! `deactivate` flips the tenant flag. `hard_delete` removes every record the
//! tenant owns, children before parents, in one transaction so a failure at
//! any step leaves the tenant fully intact.

use async_trait::async_trait;
use sea_orm::{
    ColumnTrait, DatabaseConnection, DatabaseTransaction, DbErr, EntityTrait, QueryFilter,
    QuerySelect, QueryTrait, TransactionTrait,
};
use serde::Serialize;
use std::fmt;
use std::sync::Arc;
use tracing::{info, instrument, warn};
use uuid::Uuid;

use super::finish;
use crate::error::{ErrorKind, WorkflowError, WorkflowResult};
use crate::models::audit_entry::{self, Entity as AuditEntry};
use crate::models::delivery::{self, DeliveryStatus, Entity as Delivery};
use crate::models::delivery_item::{self, Entity as DeliveryItem};
use crate::models::item::{self, Entity as Item};
use crate::models::pickup::{self, Entity as Pickup, PickupStatus};
use crate::models::pickup_item::{self, Entity as PickupItem};
use crate::models::tenant::{self, Entity as Tenant};
use crate::repositories::tenant::TenantRepository;
use crate::telemetry;

/// Removes tenant-scoped records owned by modules outside this crate
/// (sessions, alerts). Runs inside the cascade transaction, after the core
/// records and before the tenant row.
#[async_trait]
pub trait DependentPurge: Send + Sync {
    fn name(&self) -> &'static str;

    async fn purge(&self, txn: &DatabaseTransaction, tenant_id: Uuid) -> Result<u64, DbErr>;
}

/// Rows removed by one hard delete
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct CascadeReport {
    pub tenant_id: Uuid,
    pub delivery_items: u64,
    pub deliveries: u64,
    pub pickup_items: u64,
    pub pickups: u64,
    pub items: u64,
    pub audit_entries: u64,
    /// Rows removed per registered purge hook, in registration order
    pub dependents: Vec<(String, u64)>,
}

#[derive(Clone)]
pub struct TenantCascade {
    pub db: Arc<DatabaseConnection>,
    purges: Vec<Arc<dyn DependentPurge>>,
}

impl TenantCascade {
    pub fn new(db: Arc<DatabaseConnection>) -> Self {
        Self {
            db,
            purges: Vec::new(),
        }
    }

    pub fn with_purge(mut self, purge: Arc<dyn DependentPurge>) -> Self {
        self.purges.push(purge);
        self
    }

    /// Soft removal; always available.
    pub async fn deactivate(&self, tenant_id: Uuid) -> WorkflowResult<tenant::Model> {
        TenantRepository::new(Arc::clone(&self.db))
            .deactivate(tenant_id)
            .await
    }

    /// Deletes the tenant and everything it owns. Refused with `Conflict`
    /// while any pickup or delivery of the tenant is still open.
    #[instrument(skip(self))]
    pub async fn hard_delete(&self, tenant_id: Uuid) -> WorkflowResult<CascadeReport> {
        let txn = self.db.begin().await?;
        let result = self.hard_delete_in(&txn, tenant_id).await;
        let outcome = finish(txn, result).await;

        match &outcome {
            Ok(report) => {
                telemetry::record_tenant_cascade("deleted");
                info!(
                    tenant_id = %tenant_id,
                    items = report.items,
                    pickups = report.pickups,
                    deliveries = report.deliveries,
                    "Tenant hard-deleted"
                );
            }
            Err(err) => {
                telemetry::record_tenant_cascade(match err.kind() {
                    ErrorKind::Conflict => "refused",
                    ErrorKind::NotFound => "not_found",
                    _ => "rolled_back",
                });
                warn!(tenant_id = %tenant_id, error = %err, "Tenant hard delete rolled back");
            }
        }

        outcome
    }

    async fn hard_delete_in(
        &self,
        txn: &DatabaseTransaction,
        tenant_id: Uuid,
    ) -> WorkflowResult<CascadeReport> {
        Tenant::find_by_id(tenant_id)
            .lock_exclusive()
            .one(txn)
            .await?
            .ok_or_else(|| WorkflowError::not_found("tenant", tenant_id))?;

        let open_pickups: Vec<Uuid> = Pickup::find()
            .select_only()
            .column(pickup::Column::Id)
            .filter(pickup::Column::TenantId.eq(tenant_id))
            .filter(pickup::Column::Status.eq(PickupStatus::Created))
            .into_tuple()
            .all(txn)
            .await?;
        let open_deliveries: Vec<Uuid> = Delivery::find()
            .select_only()
            .column(delivery::Column::Id)
            .filter(delivery::Column::TenantId.eq(tenant_id))
            .filter(
                delivery::Column::Status
                    .is_not_in([DeliveryStatus::Delivered, DeliveryStatus::Cancelled]),
            )
            .into_tuple()
            .all(txn)
            .await?;
        if !open_pickups.is_empty() || !open_deliveries.is_empty() {
            let mut blocking = open_pickups;
            blocking.extend(open_deliveries);
            return Err(WorkflowError::conflict_with(
                format!("tenant {tenant_id} still has open pickups or deliveries"),
                blocking,
            ));
        }

        let mut report = CascadeReport {
            tenant_id,
            ..CascadeReport::default()
        };

        let delivery_ids = Delivery::find()
            .select_only()
            .column(delivery::Column::Id)
            .filter(delivery::Column::TenantId.eq(tenant_id))
            .into_query();
        report.delivery_items = DeliveryItem::delete_many()
            .filter(delivery_item::Column::DeliveryId.in_subquery(delivery_ids))
            .exec(txn)
            .await?
            .rows_affected;
        report.deliveries = Delivery::delete_many()
            .filter(delivery::Column::TenantId.eq(tenant_id))
            .exec(txn)
            .await?
            .rows_affected;

        let pickup_ids = Pickup::find()
            .select_only()
            .column(pickup::Column::Id)
            .filter(pickup::Column::TenantId.eq(tenant_id))
            .into_query();
        report.pickup_items = PickupItem::delete_many()
            .filter(pickup_item::Column::PickupId.in_subquery(pickup_ids))
            .exec(txn)
            .await?
            .rows_affected;
        report.pickups = Pickup::delete_many()
            .filter(pickup::Column::TenantId.eq(tenant_id))
            .exec(txn)
            .await?
            .rows_affected;

        report.items = Item::delete_many()
            .filter(item::Column::TenantId.eq(tenant_id))
            .exec(txn)
            .await?
            .rows_affected;
        report.audit_entries = AuditEntry::delete_many()
            .filter(audit_entry::Column::TenantId.eq(tenant_id))
            .exec(txn)
            .await?
            .rows_affected;

        for purge in &self.purges {
            let removed = purge.purge(txn, tenant_id).await?;
            report.dependents.push((purge.name().to_string(), removed));
        }

        Tenant::delete_by_id(tenant_id).exec(txn).await?;
        Ok(report)
    }
}

impl fmt::Debug for TenantCascade {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TenantCascade")
            .field("purges", &self.purges.iter().map(|p| p.name()).collect::<Vec<_>>())
            .finish()
    }
}
