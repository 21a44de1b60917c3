//! # Tenant Repository
//!
//! Hotel identity and activity flag. Every other entity is scoped by a tenant,
//! and the workflows use [`require_active_tenant`] as their existence check.

use crate::error::{WorkflowError, WorkflowResult, is_unique_violation};
use crate::models::tenant::{self, ActiveModel as TenantActiveModel, Entity as Tenant};
use chrono::Utc;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, ConnectionTrait, DatabaseConnection, EntityTrait,
    IntoActiveModel, QueryFilter, QueryOrder, Set,
};
use std::sync::Arc;
use tracing::info;
use uuid::Uuid;

/// Request data for creating a new tenant
#[derive(Debug, Clone, Default)]
pub struct CreateTenantRequest {
    /// Display name for the hotel
    pub name: String,
    pub contact_name: Option<String>,
    /// Unique across tenants, compared case-insensitively
    pub contact_email: Option<String>,
    pub contact_phone: Option<String>,
    pub address: Option<String>,
}

/// Partial update; `None` leaves a field untouched, a blank string clears an
/// optional contact field.
#[derive(Debug, Clone, Default)]
pub struct UpdateTenantRequest {
    pub name: Option<String>,
    pub contact_name: Option<String>,
    pub contact_email: Option<String>,
    pub contact_phone: Option<String>,
    pub address: Option<String>,
}

/// Repository for tenant database operations
#[derive(Debug, Clone)]
pub struct TenantRepository {
    pub db: Arc<DatabaseConnection>,
}

impl TenantRepository {
    pub fn new(db: Arc<DatabaseConnection>) -> Self {
        Self { db }
    }

    pub async fn create(&self, request: CreateTenantRequest) -> WorkflowResult<tenant::Model> {
        let name = validate_tenant_name(&request.name)?;
        let contact_email = normalize_email(request.contact_email)?;

        if let Some(email) = &contact_email {
            self.ensure_email_free(email, None).await?;
        }

        let now = Utc::now();
        let model = TenantActiveModel {
            id: Set(Uuid::new_v4()),
            name: Set(name),
            contact_name: Set(non_blank(request.contact_name)),
            contact_email: Set(contact_email),
            contact_phone: Set(non_blank(request.contact_phone)),
            address: Set(non_blank(request.address)),
            is_active: Set(true),
            created_at: Set(now.into()),
            updated_at: Set(now.into()),
        };

        let created = model.insert(self.db.as_ref()).await.map_err(map_email_conflict)?;
        info!(tenant_id = %created.id, name = %created.name, "Registered tenant");
        Ok(created)
    }

    pub async fn find(&self, tenant_id: Uuid) -> WorkflowResult<Option<tenant::Model>> {
        Ok(Tenant::find_by_id(tenant_id).one(self.db.as_ref()).await?)
    }

    pub async fn get(&self, tenant_id: Uuid) -> WorkflowResult<tenant::Model> {
        self.find(tenant_id)
            .await?
            .ok_or_else(|| WorkflowError::not_found("tenant", tenant_id))
    }

    pub async fn list(&self, active_only: bool) -> WorkflowResult<Vec<tenant::Model>> {
        let mut query = Tenant::find();
        if active_only {
            query = query.filter(tenant::Column::IsActive.eq(true));
        }

        Ok(query
            .order_by_asc(tenant::Column::Name)
            .order_by_asc(tenant::Column::Id)
            .all(self.db.as_ref())
            .await?)
    }

    pub async fn update(
        &self,
        tenant_id: Uuid,
        request: UpdateTenantRequest,
    ) -> WorkflowResult<tenant::Model> {
        let existing = self.get(tenant_id).await?;
        let mut active = existing.into_active_model();

        if let Some(name) = request.name {
            active.name = Set(validate_tenant_name(&name)?);
        }
        if let Some(email) = request.contact_email {
            let email = normalize_email(Some(email))?;
            if let Some(email) = &email {
                self.ensure_email_free(email, Some(tenant_id)).await?;
            }
            active.contact_email = Set(email);
        }
        if let Some(contact_name) = request.contact_name {
            active.contact_name = Set(non_blank(Some(contact_name)));
        }
        if let Some(phone) = request.contact_phone {
            active.contact_phone = Set(non_blank(Some(phone)));
        }
        if let Some(address) = request.address {
            active.address = Set(non_blank(Some(address)));
        }
        active.updated_at = Set(Utc::now().into());

        Ok(active
            .update(self.db.as_ref())
            .await
            .map_err(map_email_conflict)?)
    }

    /// Soft deactivation. Always allowed; repeated calls are no-ops.
    pub async fn deactivate(&self, tenant_id: Uuid) -> WorkflowResult<tenant::Model> {
        self.set_active(tenant_id, false).await
    }

    pub async fn reactivate(&self, tenant_id: Uuid) -> WorkflowResult<tenant::Model> {
        self.set_active(tenant_id, true).await
    }

    /// True only for an existing tenant with `is_active` set.
    pub async fn exists_active(&self, tenant_id: Uuid) -> WorkflowResult<bool> {
        Ok(self
            .find(tenant_id)
            .await?
            .is_some_and(|tenant| tenant.is_active))
    }

    async fn set_active(&self, tenant_id: Uuid, is_active: bool) -> WorkflowResult<tenant::Model> {
        let existing = self.get(tenant_id).await?;
        if existing.is_active == is_active {
            return Ok(existing);
        }

        let mut active = existing.into_active_model();
        active.is_active = Set(is_active);
        active.updated_at = Set(Utc::now().into());
        let updated = active.update(self.db.as_ref()).await?;

        info!(tenant_id = %tenant_id, is_active, "Tenant activity changed");
        Ok(updated)
    }

    async fn ensure_email_free(&self, email: &str, except: Option<Uuid>) -> WorkflowResult<()> {
        let mut query = Tenant::find().filter(tenant::Column::ContactEmail.eq(email));
        if let Some(id) = except {
            query = query.filter(tenant::Column::Id.ne(id));
        }

        match query.one(self.db.as_ref()).await? {
            Some(other) => Err(WorkflowError::conflict_with(
                format!("contact email {email} is already used by another tenant"),
                vec![other.id],
            )),
            None => Ok(()),
        }
    }
}

/// Loads the tenant and checks it may take part in new work. Missing tenants
/// are `NotFound`, deactivated ones `InvalidState`.
pub(crate) async fn require_active_tenant<C: ConnectionTrait>(
    conn: &C,
    tenant_id: Uuid,
) -> WorkflowResult<tenant::Model> {
    let tenant = Tenant::find_by_id(tenant_id)
        .one(conn)
        .await?
        .ok_or_else(|| WorkflowError::not_found("tenant", tenant_id))?;

    if !tenant.is_active {
        return Err(WorkflowError::invalid_state(
            format!("tenant {tenant_id} is deactivated"),
            vec![tenant_id],
        ));
    }

    Ok(tenant)
}

fn validate_tenant_name(name: &str) -> WorkflowResult<String> {
    let trimmed = name.trim();
    if trimmed.is_empty() {
        return Err(WorkflowError::validation("Tenant name cannot be empty"));
    }
    if trimmed.chars().count() > 255 {
        return Err(WorkflowError::validation(
            "Tenant name cannot exceed 255 characters",
        ));
    }
    Ok(trimmed.to_string())
}

fn normalize_email(email: Option<String>) -> WorkflowResult<Option<String>> {
    let Some(email) = non_blank(email) else {
        return Ok(None);
    };

    let email = email.to_lowercase();
    match email.split_once('@') {
        Some((local, domain)) if !local.is_empty() && domain.contains('.') => Ok(Some(email)),
        _ => Err(WorkflowError::validation(format!(
            "contact email '{email}' is not a valid address"
        ))),
    }
}

fn non_blank(value: Option<String>) -> Option<String> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

fn map_email_conflict(err: sea_orm::DbErr) -> WorkflowError {
    if is_unique_violation(&err) {
        WorkflowError::conflict("contact email is already used by another tenant")
    } else {
        err.into()
    }
}
