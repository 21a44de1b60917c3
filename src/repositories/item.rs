//! # Item Ledger
//!
//! Owns each physical item's current status and its wash/condition counters.
//! Pickup and delivery workflows drive status changes through
//! [`advance_items`] inside their own transactions; this repository exposes
//! the registration, bulk laundry-floor transitions and administrative
//! primitives.

use chrono::{DateTime, Utc};
use regex::Regex;
use sea_orm::sea_query::Expr;
use sea_orm::{
    ActiveEnum, ActiveModelTrait, ColumnTrait, ConnectionTrait, DatabaseConnection, DbErr,
    EntityTrait, IntoActiveModel, QueryFilter, QueryOrder, QuerySelect, Set, TransactionTrait,
};
use serde::Serialize;
use std::collections::{BTreeMap, HashSet};
use std::sync::{Arc, OnceLock};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::error::{WorkflowError, WorkflowResult, is_unique_violation};
use crate::models::delivery_item::{self, Entity as DeliveryItem};
use crate::models::item::{self, ActiveModel as ItemActiveModel, Entity as Item, ItemStatus};
use crate::models::pickup_item::{self, Entity as PickupItem};
use crate::repositories::tenant::require_active_tenant;
use crate::telemetry;

/// Largest id list sent in one `IN (...)` clause.
pub(crate) const ID_CHUNK_SIZE: usize = 500;

static TAG_PATTERN: OnceLock<Regex> = OnceLock::new();

fn tag_pattern() -> &'static Regex {
    TAG_PATTERN.get_or_init(|| {
        Regex::new(r"^[A-Za-z0-9][A-Za-z0-9._:\-]*$").expect("tag pattern compiles")
    })
}

/// Trims a raw tag and checks it against the accepted tag alphabet and length.
pub fn normalize_tag(raw: &str, max_len: usize) -> WorkflowResult<String> {
    let tag = raw.trim();
    if tag.is_empty() {
        return Err(WorkflowError::validation("RFID tag cannot be empty"));
    }
    if tag.len() > max_len {
        return Err(WorkflowError::validation(format!(
            "RFID tag exceeds {max_len} characters"
        )));
    }
    if !tag_pattern().is_match(tag) {
        return Err(WorkflowError::validation(format!(
            "RFID tag '{tag}' contains unsupported characters"
        )));
    }
    Ok(tag.to_string())
}

#[derive(Debug, Clone)]
pub struct RegisterItemRequest {
    pub tenant_id: Uuid,
    pub item_type_id: Uuid,
    pub rfid_tag: String,
}

/// Condition flags; `None` keeps the stored value.
#[derive(Debug, Clone, Default)]
pub struct ConditionUpdate {
    pub is_damaged: Option<bool>,
    pub is_stained: Option<bool>,
    pub notes: Option<String>,
}

/// Outcome of a bulk skip-don't-fail transition
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct BulkTransitionReport {
    /// Number of items actually transitioned
    pub count: u64,
    /// Ids that were unknown or not in an eligible source state
    pub skipped: Vec<Uuid>,
}

#[derive(Debug, Clone)]
pub struct ItemRepository {
    pub db: Arc<DatabaseConnection>,
    max_tag_length: usize,
}

impl ItemRepository {
    pub fn new(db: Arc<DatabaseConnection>, max_tag_length: usize) -> Self {
        Self { db, max_tag_length }
    }

    /// Registers a new item at the hotel. Tags are unique system-wide.
    pub async fn register(&self, request: RegisterItemRequest) -> WorkflowResult<item::Model> {
        let tag = normalize_tag(&request.rfid_tag, self.max_tag_length)?;
        require_active_tenant(self.db.as_ref(), request.tenant_id).await?;

        if let Some(existing) = self.find_by_tag(&tag).await? {
            return Err(WorkflowError::conflict_with(
                format!("RFID tag {tag} is already registered"),
                vec![existing.id],
            ));
        }

        let now = Utc::now();
        let model = ItemActiveModel {
            id: Set(Uuid::new_v4()),
            tenant_id: Set(request.tenant_id),
            item_type_id: Set(request.item_type_id),
            rfid_tag: Set(tag.clone()),
            status: Set(ItemStatus::AtHotel),
            wash_count: Set(0),
            is_damaged: Set(false),
            is_stained: Set(false),
            condition_notes: Set(None),
            last_washed_at: Set(None),
            created_at: Set(now.into()),
            updated_at: Set(now.into()),
        };

        let created = model.insert(self.db.as_ref()).await.map_err(|err| {
            if is_unique_violation(&err) {
                WorkflowError::conflict(format!("RFID tag {tag} is already registered"))
            } else {
                err.into()
            }
        })?;

        info!(
            item_id = %created.id,
            tenant_id = %created.tenant_id,
            rfid_tag = %created.rfid_tag,
            "Registered item"
        );
        Ok(created)
    }

    pub async fn get(&self, item_id: Uuid) -> WorkflowResult<item::Model> {
        Item::find_by_id(item_id)
            .one(self.db.as_ref())
            .await?
            .ok_or_else(|| WorkflowError::not_found("item", item_id))
    }

    pub async fn get_by_tag(&self, rfid_tag: &str) -> WorkflowResult<item::Model> {
        self.find_by_tag(rfid_tag.trim())
            .await?
            .ok_or_else(|| WorkflowError::not_found("item", rfid_tag.trim()))
    }

    async fn find_by_tag(&self, rfid_tag: &str) -> WorkflowResult<Option<item::Model>> {
        Ok(Item::find()
            .filter(item::Column::RfidTag.eq(rfid_tag))
            .one(self.db.as_ref())
            .await?)
    }

    pub async fn list(
        &self,
        tenant_id: Uuid,
        status: Option<ItemStatus>,
    ) -> WorkflowResult<Vec<item::Model>> {
        let mut query = Item::find().filter(item::Column::TenantId.eq(tenant_id));
        if let Some(status) = status {
            query = query.filter(item::Column::Status.eq(status));
        }

        Ok(query
            .order_by_asc(item::Column::RfidTag)
            .all(self.db.as_ref())
            .await?)
    }

    /// Administrative override of an item's status. Does not touch the wash
    /// counter; that only moves when a pickup is received.
    pub async fn set_status(
        &self,
        item_id: Uuid,
        status: ItemStatus,
    ) -> WorkflowResult<item::Model> {
        let txn = self.db.begin().await?;

        let existing = Item::find_by_id(item_id)
            .lock_exclusive()
            .one(&txn)
            .await?
            .ok_or_else(|| WorkflowError::not_found("item", item_id))?;

        if existing.status == status {
            txn.commit().await?;
            return Ok(existing);
        }

        let previous = existing.status;
        let mut active = existing.into_active_model();
        active.status = Set(status);
        active.updated_at = Set(Utc::now().into());
        let updated = active.update(&txn).await?;
        txn.commit().await?;

        warn!(
            item_id = %item_id,
            from = %previous,
            to = %status,
            "Item status overridden"
        );
        telemetry::record_item_transitions(previous.as_str(), status, 1);
        Ok(updated)
    }

    /// Bulk `{at_laundry, processing} -> ready_for_delivery`. Ineligible or
    /// unknown items are reported in `skipped` instead of failing the call.
    pub async fn mark_clean(&self, item_ids: &[Uuid]) -> WorkflowResult<BulkTransitionReport> {
        self.bulk_transition(item_ids, ItemStatus::cleanable(), ItemStatus::ReadyForDelivery)
            .await
    }

    /// Bulk `at_laundry -> processing` with the same report semantics as
    /// [`ItemRepository::mark_clean`].
    pub async fn start_processing(
        &self,
        item_ids: &[Uuid],
    ) -> WorkflowResult<BulkTransitionReport> {
        self.bulk_transition(item_ids, &[ItemStatus::AtLaundry], ItemStatus::Processing)
            .await
    }

    async fn bulk_transition(
        &self,
        item_ids: &[Uuid],
        from: &[ItemStatus],
        to: ItemStatus,
    ) -> WorkflowResult<BulkTransitionReport> {
        let mut report = BulkTransitionReport::default();
        let mut seen = HashSet::new();
        let now = Utc::now();

        for &item_id in item_ids {
            if !seen.insert(item_id) {
                continue;
            }

            // Single conditional UPDATE per item: the status check and the write
            // cannot interleave with another writer of the same row.
            let result = Item::update_many()
                .col_expr(item::Column::Status, Expr::value(to.to_value()))
                .col_expr(item::Column::UpdatedAt, Expr::value(now))
                .filter(item::Column::Id.eq(item_id))
                .filter(item::Column::Status.is_in(from.iter().map(|s| s.to_value())))
                .exec(self.db.as_ref())
                .await?;

            if result.rows_affected == 1 {
                report.count += 1;
            } else {
                debug!(item_id = %item_id, to = %to, "Skipped ineligible item");
                report.skipped.push(item_id);
            }
        }

        let from_label = from
            .iter()
            .map(ItemStatus::as_str)
            .collect::<Vec<_>>()
            .join("|");
        telemetry::record_item_transitions(&from_label, to, report.count);
        info!(
            to = %to,
            transitioned = report.count,
            skipped = report.skipped.len(),
            "Bulk item transition applied"
        );
        Ok(report)
    }

    /// Updates damage/stain flags and notes; independent of status.
    pub async fn set_condition(
        &self,
        item_id: Uuid,
        update: ConditionUpdate,
    ) -> WorkflowResult<item::Model> {
        let existing = self.get(item_id).await?;
        let mut active = existing.into_active_model();

        if let Some(is_damaged) = update.is_damaged {
            active.is_damaged = Set(is_damaged);
        }
        if let Some(is_stained) = update.is_stained {
            active.is_stained = Set(is_stained);
        }
        if let Some(notes) = update.notes {
            let notes = notes.trim().to_string();
            active.condition_notes = Set((!notes.is_empty()).then_some(notes));
        }
        active.updated_at = Set(Utc::now().into());

        Ok(active.update(self.db.as_ref()).await?)
    }

    /// Deletes an item and its closed membership history. Refused with
    /// `Conflict` while an open pickup or delivery still claims the item.
    pub async fn delete(&self, item_id: Uuid) -> WorkflowResult<()> {
        let txn = self.db.begin().await?;

        Item::find_by_id(item_id)
            .lock_exclusive()
            .one(&txn)
            .await?
            .ok_or_else(|| WorkflowError::not_found("item", item_id))?;

        let open_pickups: Vec<Uuid> = PickupItem::find()
            .select_only()
            .column(pickup_item::Column::PickupId)
            .filter(pickup_item::Column::ItemId.eq(item_id))
            .filter(pickup_item::Column::ReleasedAt.is_null())
            .into_tuple()
            .all(&txn)
            .await?;
        let open_deliveries: Vec<Uuid> = DeliveryItem::find()
            .select_only()
            .column(delivery_item::Column::DeliveryId)
            .filter(delivery_item::Column::ItemId.eq(item_id))
            .filter(delivery_item::Column::ReleasedAt.is_null())
            .into_tuple()
            .all(&txn)
            .await?;

        if !open_pickups.is_empty() || !open_deliveries.is_empty() {
            txn.rollback().await?;
            let batches = open_pickups.into_iter().chain(open_deliveries).collect();
            return Err(WorkflowError::conflict_with(
                format!("item {item_id} is still part of an open pickup or delivery"),
                batches,
            ));
        }

        PickupItem::delete_many()
            .filter(pickup_item::Column::ItemId.eq(item_id))
            .exec(&txn)
            .await?;
        DeliveryItem::delete_many()
            .filter(delivery_item::Column::ItemId.eq(item_id))
            .exec(&txn)
            .await?;
        Item::delete_by_id(item_id).exec(&txn).await?;
        txn.commit().await?;

        info!(item_id = %item_id, "Deleted item");
        Ok(())
    }

    /// Item count per status for one tenant; statuses without items are absent.
    pub async fn status_counts(&self, tenant_id: Uuid) -> WorkflowResult<BTreeMap<ItemStatus, u64>> {
        let rows: Vec<(ItemStatus, i64)> = Item::find()
            .select_only()
            .column(item::Column::Status)
            .column_as(Expr::col(item::Column::Id).count(), "count")
            .filter(item::Column::TenantId.eq(tenant_id))
            .group_by(item::Column::Status)
            .into_tuple()
            .all(self.db.as_ref())
            .await?;

        Ok(rows
            .into_iter()
            .map(|(status, count)| (status, count.max(0) as u64))
            .collect())
    }
}

/// Moves member items to `to` inside the caller's transaction. When `from` is
/// set only items currently in that status are touched; the returned count
/// lets the caller detect members that were not in the expected state.
pub(crate) async fn advance_items<C: ConnectionTrait>(
    conn: &C,
    item_ids: &[Uuid],
    from: Option<ItemStatus>,
    to: ItemStatus,
    count_wash: bool,
    now: DateTime<Utc>,
) -> Result<u64, DbErr> {
    let mut affected = 0;

    for chunk in item_ids.chunks(ID_CHUNK_SIZE) {
        let mut update = Item::update_many()
            .col_expr(item::Column::Status, Expr::value(to.to_value()))
            .col_expr(item::Column::UpdatedAt, Expr::value(now))
            .filter(item::Column::Id.is_in(chunk.iter().copied()));

        if count_wash {
            update = update
                .col_expr(
                    item::Column::WashCount,
                    Expr::col(item::Column::WashCount).add(1),
                )
                .col_expr(item::Column::LastWashedAt, Expr::value(now));
        }
        if let Some(from) = from {
            update = update.filter(item::Column::Status.eq(from));
        }

        affected += update.exec(conn).await?.rows_affected;
    }

    Ok(affected)
}

/// Loads and locks items by id inside the caller's transaction, in no
/// particular order.
pub(crate) async fn load_items<C: ConnectionTrait>(
    conn: &C,
    item_ids: &[Uuid],
) -> Result<Vec<item::Model>, DbErr> {
    let mut items = Vec::with_capacity(item_ids.len());
    for chunk in item_ids.chunks(ID_CHUNK_SIZE) {
        items.extend(
            Item::find()
                .filter(item::Column::Id.is_in(chunk.iter().copied()))
                .lock_exclusive()
                .all(conn)
                .await?,
        );
    }
    Ok(items)
}

/// Member item ids that an open pickup still claims.
pub(crate) async fn claimed_by_open_pickups<C: ConnectionTrait>(
    conn: &C,
    item_ids: &[Uuid],
) -> Result<Vec<Uuid>, DbErr> {
    let mut claimed = Vec::new();
    for chunk in item_ids.chunks(ID_CHUNK_SIZE) {
        let rows: Vec<Uuid> = PickupItem::find()
            .select_only()
            .column(pickup_item::Column::ItemId)
            .filter(pickup_item::Column::ItemId.is_in(chunk.iter().copied()))
            .filter(pickup_item::Column::ReleasedAt.is_null())
            .into_tuple()
            .all(conn)
            .await?;
        claimed.extend(rows);
    }
    Ok(claimed)
}

/// Member item ids that an open delivery still claims.
pub(crate) async fn claimed_by_open_deliveries<C: ConnectionTrait>(
    conn: &C,
    item_ids: &[Uuid],
) -> Result<Vec<Uuid>, DbErr> {
    let mut claimed = Vec::new();
    for chunk in item_ids.chunks(ID_CHUNK_SIZE) {
        let rows: Vec<Uuid> = DeliveryItem::find()
            .select_only()
            .column(delivery_item::Column::ItemId)
            .filter(delivery_item::Column::ItemId.is_in(chunk.iter().copied()))
            .filter(delivery_item::Column::ReleasedAt.is_null())
            .into_tuple()
            .all(conn)
            .await?;
        claimed.extend(rows);
    }
    Ok(claimed)
}
