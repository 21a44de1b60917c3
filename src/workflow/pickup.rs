//! # Pickup Workflow
//!
//! Hotel to laundry handoff of dirty items. A pickup is created with an
//! immutable member list and received exactly once:
//!
//! | From    | Event     | To       |
//! |---------|-----------|----------|
//! | -       | `create`  | created  |
//! | created | `receive` | received |
//!
//! Receiving moves every member to `at_laundry`, bumps its wash counter and
//! releases its claim, all in one transaction.

use chrono::Utc;
use sea_orm::sea_query::Expr;
use sea_orm::{
    ActiveEnum, ActiveModelTrait, ColumnTrait, ConnectionTrait, DatabaseConnection,
    DatabaseTransaction, EntityTrait, QueryFilter, QueryOrder, QuerySelect, Set,
    TransactionTrait,
};
use serde_json::json;
use std::collections::HashSet;
use std::sync::Arc;
use tracing::{info, instrument};
use uuid::Uuid;

use super::{claim_violation, dedupe_ids, finish, generate_code, unused_code};
use crate::error::{WorkflowError, WorkflowResult, is_unique_violation};
use crate::events::{EventDispatcher, EventName, WorkflowEvent};
use crate::models::item::{self, ItemStatus};
use crate::models::pickup::{self, ActiveModel as PickupActiveModel, Entity as Pickup, PickupStatus};
use crate::models::pickup_item::{self, ActiveModel as PickupItemActiveModel, Entity as PickupItem};
use crate::repositories::audit::{self, PICKUP_ENTITY};
use crate::repositories::item::{
    advance_items, claimed_by_open_deliveries, claimed_by_open_pickups, load_items,
};
use crate::repositories::tenant::require_active_tenant;
use crate::telemetry;

const BAG_CODE_PREFIX: &str = "BAG";
const BAG_CODE_RANDOM_LEN: usize = 6;

#[derive(Debug, Clone, Default)]
pub struct CreatePickupRequest {
    pub tenant_id: Uuid,
    /// Label of the physical bag; generated when blank
    pub bag_code: Option<String>,
    /// May be empty for a quick pickup
    pub item_ids: Vec<Uuid>,
    pub seal_number: Option<String>,
}

#[derive(Debug, Clone)]
pub struct PickupWorkflow {
    pub db: Arc<DatabaseConnection>,
    events: EventDispatcher,
}

impl PickupWorkflow {
    pub fn new(db: Arc<DatabaseConnection>, events: EventDispatcher) -> Self {
        Self { db, events }
    }

    /// Creates a pickup and claims its items. The claim check and the inserts
    /// share one transaction.
    #[instrument(skip(self, request), fields(tenant_id = %request.tenant_id))]
    pub async fn create(&self, request: CreatePickupRequest) -> WorkflowResult<pickup::Model> {
        let item_ids = dedupe_ids(&request.item_ids);
        let txn = self.db.begin().await?;
        let result = self.create_in(&txn, request, &item_ids).await;
        let created = finish(txn, result).await?;

        telemetry::record_pickup_transition("created");
        info!(
            pickup_id = %created.id,
            tenant_id = %created.tenant_id,
            bag_code = %created.bag_code,
            item_count = item_ids.len(),
            "Pickup created"
        );
        self.events.emit(WorkflowEvent {
            name: EventName::PickupCreated,
            tenant_id: created.tenant_id,
            batch_id: created.id,
            reference: created.bag_code.clone(),
            item_count: item_ids.len(),
            occurred_at: Utc::now(),
        });

        Ok(created)
    }

    async fn create_in(
        &self,
        txn: &DatabaseTransaction,
        request: CreatePickupRequest,
        item_ids: &[Uuid],
    ) -> WorkflowResult<pickup::Model> {
        require_active_tenant(txn, request.tenant_id).await?;

        let bag_code = match request.bag_code.as_deref().map(str::trim) {
            Some(code) if !code.is_empty() => {
                if bag_code_taken(txn, code).await? {
                    return Err(WorkflowError::conflict(format!(
                        "bag code {code} is already in use"
                    )));
                }
                code.to_string()
            }
            _ => {
                unused_code(
                    || generate_code(BAG_CODE_PREFIX, BAG_CODE_RANDOM_LEN),
                    |code| async move { bag_code_taken(txn, &code).await },
                )
                .await?
            }
        };

        check_members(txn, request.tenant_id, item_ids).await?;

        let now = Utc::now();
        let created = PickupActiveModel {
            id: Set(Uuid::new_v4()),
            tenant_id: Set(request.tenant_id),
            bag_code: Set(bag_code.clone()),
            seal_number: Set(request
                .seal_number
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty())),
            status: Set(PickupStatus::Created),
            created_at: Set(now.into()),
            received_at: Set(None),
            updated_at: Set(now.into()),
        }
        .insert(txn)
        .await
        .map_err(|err| {
            if is_unique_violation(&err) {
                WorkflowError::conflict(format!("bag code {bag_code} is already in use"))
            } else {
                err.into()
            }
        })?;

        if !item_ids.is_empty() {
            let members = item_ids.iter().enumerate().map(|(position, item_id)| {
                PickupItemActiveModel {
                    pickup_id: Set(created.id),
                    item_id: Set(*item_id),
                    position: Set(position as i32),
                    released_at: Set(None),
                }
            });
            PickupItem::insert_many(members)
                .exec_without_returning(txn)
                .await
                .map_err(|err| claim_violation(err, item_ids))?;
        }

        audit::record(
            txn,
            created.tenant_id,
            PICKUP_ENTITY,
            created.id,
            "created",
            json!({ "bag_code": created.bag_code, "item_count": item_ids.len() }),
        )
        .await?;

        Ok(created)
    }

    /// `created -> received`. All members move to `at_laundry` with their wash
    /// counter incremented, or nothing changes.
    #[instrument(skip(self))]
    pub async fn receive(&self, pickup_id: Uuid) -> WorkflowResult<pickup::Model> {
        let txn = self.db.begin().await?;
        let result = receive_in(&txn, pickup_id).await;
        let (received, member_count) = finish(txn, result).await?;

        telemetry::record_pickup_transition("received");
        telemetry::record_item_transitions("any", ItemStatus::AtLaundry, member_count as u64);
        info!(
            pickup_id = %received.id,
            tenant_id = %received.tenant_id,
            bag_code = %received.bag_code,
            item_count = member_count,
            "Pickup received"
        );
        self.events.emit(WorkflowEvent {
            name: EventName::PickupReceived,
            tenant_id: received.tenant_id,
            batch_id: received.id,
            reference: received.bag_code.clone(),
            item_count: member_count,
            occurred_at: Utc::now(),
        });

        Ok(received)
    }

    pub async fn get(&self, pickup_id: Uuid) -> WorkflowResult<pickup::Model> {
        Pickup::find_by_id(pickup_id)
            .one(self.db.as_ref())
            .await?
            .ok_or_else(|| WorkflowError::not_found("pickup", pickup_id))
    }

    pub async fn get_by_bag_code(&self, bag_code: &str) -> WorkflowResult<pickup::Model> {
        let bag_code = bag_code.trim();
        Pickup::find()
            .filter(pickup::Column::BagCode.eq(bag_code))
            .one(self.db.as_ref())
            .await?
            .ok_or_else(|| WorkflowError::not_found("pickup", bag_code))
    }

    pub async fn list(
        &self,
        tenant_id: Uuid,
        status: Option<PickupStatus>,
    ) -> WorkflowResult<Vec<pickup::Model>> {
        let mut query = Pickup::find().filter(pickup::Column::TenantId.eq(tenant_id));
        if let Some(status) = status {
            query = query.filter(pickup::Column::Status.eq(status));
        }

        Ok(query
            .order_by_desc(pickup::Column::CreatedAt)
            .all(self.db.as_ref())
            .await?)
    }

    /// Member items in bag order.
    pub async fn members(&self, pickup_id: Uuid) -> WorkflowResult<Vec<item::Model>> {
        self.get(pickup_id).await?;

        let rows = PickupItem::find()
            .filter(pickup_item::Column::PickupId.eq(pickup_id))
            .order_by_asc(pickup_item::Column::Position)
            .find_also_related(item::Entity)
            .all(self.db.as_ref())
            .await?;

        Ok(rows.into_iter().filter_map(|(_, item)| item).collect())
    }
}

async fn receive_in(
    txn: &DatabaseTransaction,
    pickup_id: Uuid,
) -> WorkflowResult<(pickup::Model, usize)> {
    let existing = Pickup::find_by_id(pickup_id)
        .lock_exclusive()
        .one(txn)
        .await?
        .ok_or_else(|| WorkflowError::not_found("pickup", pickup_id))?;

    if existing.status != PickupStatus::Created {
        return Err(WorkflowError::invalid_state(
            format!("pickup {pickup_id} is already {}", existing.status),
            vec![pickup_id],
        ));
    }

    let now = Utc::now();
    let claimed = Pickup::update_many()
        .col_expr(
            pickup::Column::Status,
            Expr::value(PickupStatus::Received.to_value()),
        )
        .col_expr(pickup::Column::ReceivedAt, Expr::value(now))
        .col_expr(pickup::Column::UpdatedAt, Expr::value(now))
        .filter(pickup::Column::Id.eq(pickup_id))
        .filter(pickup::Column::Status.eq(PickupStatus::Created))
        .exec(txn)
        .await?;
    if claimed.rows_affected != 1 {
        return Err(WorkflowError::invalid_state(
            format!("pickup {pickup_id} was received concurrently"),
            vec![pickup_id],
        ));
    }

    let member_ids = member_ids(txn, pickup_id).await?;
    let advanced = advance_items(txn, &member_ids, None, ItemStatus::AtLaundry, true, now).await?;
    if advanced != member_ids.len() as u64 {
        return Err(WorkflowError::invalid_state(
            format!("pickup {pickup_id} references items that no longer exist"),
            vec![pickup_id],
        ));
    }

    PickupItem::update_many()
        .col_expr(pickup_item::Column::ReleasedAt, Expr::value(now))
        .filter(pickup_item::Column::PickupId.eq(pickup_id))
        .filter(pickup_item::Column::ReleasedAt.is_null())
        .exec(txn)
        .await?;

    audit::record(
        txn,
        existing.tenant_id,
        PICKUP_ENTITY,
        pickup_id,
        "received",
        json!({ "item_count": member_ids.len() }),
    )
    .await?;

    let received = Pickup::find_by_id(pickup_id)
        .one(txn)
        .await?
        .ok_or_else(|| WorkflowError::not_found("pickup", pickup_id))?;
    Ok((received, member_ids.len()))
}

async fn member_ids<C: ConnectionTrait>(conn: &C, pickup_id: Uuid) -> WorkflowResult<Vec<Uuid>> {
    Ok(PickupItem::find()
        .select_only()
        .column(pickup_item::Column::ItemId)
        .filter(pickup_item::Column::PickupId.eq(pickup_id))
        .order_by_asc(pickup_item::Column::Position)
        .into_tuple()
        .all(conn)
        .await?)
}

async fn bag_code_taken<C: ConnectionTrait>(conn: &C, bag_code: &str) -> Result<bool, sea_orm::DbErr> {
    Ok(Pickup::find()
        .filter(pickup::Column::BagCode.eq(bag_code))
        .one(conn)
        .await?
        .is_some())
}

/// Every member must exist, belong to the pickup's tenant and be free of any
/// other open pickup.
async fn check_members(
    txn: &DatabaseTransaction,
    tenant_id: Uuid,
    item_ids: &[Uuid],
) -> WorkflowResult<()> {
    if item_ids.is_empty() {
        return Ok(());
    }

    let items = load_items(txn, item_ids).await?;
    if items.len() != item_ids.len() {
        let known: HashSet<Uuid> = items.iter().map(|item| item.id).collect();
        let missing = item_ids
            .iter()
            .find(|id| !known.contains(id))
            .copied()
            .unwrap_or_default();
        return Err(WorkflowError::not_found("item", missing));
    }

    let foreign: Vec<Uuid> = items
        .iter()
        .filter(|item| item.tenant_id != tenant_id)
        .map(|item| item.id)
        .collect();
    if !foreign.is_empty() {
        return Err(WorkflowError::invalid_state(
            format!("items do not belong to tenant {tenant_id}"),
            foreign,
        ));
    }

    let claimed = claimed_by_open_pickups(txn, item_ids).await?;
    if !claimed.is_empty() {
        return Err(WorkflowError::invalid_state(
            "items are already claimed by an open pickup",
            claimed,
        ));
    }

    // An item still travelling with an open delivery cannot be bagged either.
    let in_delivery = claimed_by_open_deliveries(txn, item_ids).await?;
    if !in_delivery.is_empty() {
        return Err(WorkflowError::invalid_state(
            "items are still part of an open delivery",
            in_delivery,
        ));
    }

    Ok(())
}
