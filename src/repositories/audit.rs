//! Audit trail persistence for batch transitions.

use chrono::Utc;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, ConnectionTrait, DatabaseConnection, DbErr, EntityTrait,
    QueryFilter, QueryOrder, Set,
};
use serde_json::Value;
use std::sync::Arc;
use uuid::Uuid;

use crate::error::WorkflowResult;
use crate::models::audit_entry::{self, ActiveModel as AuditEntryActiveModel, Entity as AuditEntry};

pub const PICKUP_ENTITY: &str = "pickup";
pub const DELIVERY_ENTITY: &str = "delivery";

/// Appends one entry using the caller's transaction.
pub(crate) async fn record<C: ConnectionTrait>(
    conn: &C,
    tenant_id: Uuid,
    entity_kind: &str,
    entity_id: Uuid,
    action: &str,
    payload: Value,
) -> Result<(), DbErr> {
    AuditEntryActiveModel {
        id: Set(Uuid::new_v4()),
        tenant_id: Set(tenant_id),
        entity_kind: Set(entity_kind.to_string()),
        entity_id: Set(entity_id),
        action: Set(action.to_string()),
        payload: Set(Some(payload)),
        created_at: Set(Utc::now().into()),
    }
    .insert(conn)
    .await?;

    Ok(())
}

/// Read access to the audit trail
#[derive(Debug, Clone)]
pub struct AuditRepository {
    pub db: Arc<DatabaseConnection>,
}

impl AuditRepository {
    pub fn new(db: Arc<DatabaseConnection>) -> Self {
        Self { db }
    }

    /// Entries for one pickup or delivery, oldest first.
    pub async fn history(
        &self,
        entity_kind: &str,
        entity_id: Uuid,
    ) -> WorkflowResult<Vec<audit_entry::Model>> {
        Ok(AuditEntry::find()
            .filter(audit_entry::Column::EntityKind.eq(entity_kind))
            .filter(audit_entry::Column::EntityId.eq(entity_id))
            .order_by_asc(audit_entry::Column::CreatedAt)
            .all(self.db.as_ref())
            .await?)
    }
}
