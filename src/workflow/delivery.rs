//! # Delivery Workflow
//!
//! Laundry to hotel shipment of clean items. The only legal forward edges are
//!
//! `created -> label_printed -> packaged -> picked_up -> delivered`
//!
//! and `cancel` leaves any non-terminal state for `cancelled`. Each edge moves
//! the batch row and every member item together; member items are expected to
//! sit in the status that mirrors the batch's current state, otherwise the
//! whole transition is refused.

use chrono::Utc;
use sea_orm::sea_query::Expr;
use sea_orm::{
    ActiveEnum, ActiveModelTrait, ColumnTrait, ConnectionTrait, DatabaseConnection,
    DatabaseTransaction, EntityTrait, QueryFilter, QueryOrder, QuerySelect, Set,
    TransactionTrait,
};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::collections::{BTreeMap, HashSet};
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use tracing::{info, instrument};
use uuid::Uuid;

use super::{claim_violation, dedupe_ids, finish, generate_code, unused_code};
use crate::config::WorkflowConfig;
use crate::error::{WorkflowError, WorkflowResult, is_unique_violation};
use crate::events::{DeliverySettlement, EventDispatcher, EventName, WorkflowEvent};
use crate::models::delivery::{
    self, ActiveModel as DeliveryActiveModel, DeliveryStatus, Entity as Delivery,
};
use crate::models::delivery_item::{
    self, ActiveModel as DeliveryItemActiveModel, Entity as DeliveryItem,
};
use crate::models::item::{self, Entity as Item, ItemStatus};
use crate::repositories::audit::{self, DELIVERY_ENTITY};
use crate::repositories::item::{
    ID_CHUNK_SIZE, advance_items, claimed_by_open_deliveries, claimed_by_open_pickups, load_items,
};
use crate::repositories::tenant::require_active_tenant;
use crate::telemetry;

const BARCODE_RANDOM_LEN: usize = 8;

/// Transitions a delivery can be asked to perform
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeliveryEvent {
    PrintLabel,
    Package,
    Pickup,
    Deliver,
    Cancel,
}

impl DeliveryEvent {
    pub fn as_str(&self) -> &'static str {
        match self {
            DeliveryEvent::PrintLabel => "print_label",
            DeliveryEvent::Package => "package",
            DeliveryEvent::Pickup => "pickup",
            DeliveryEvent::Deliver => "deliver",
            DeliveryEvent::Cancel => "cancel",
        }
    }

    pub fn target(&self) -> DeliveryStatus {
        match self {
            DeliveryEvent::PrintLabel => DeliveryStatus::LabelPrinted,
            DeliveryEvent::Package => DeliveryStatus::Packaged,
            DeliveryEvent::Pickup => DeliveryStatus::PickedUp,
            DeliveryEvent::Deliver => DeliveryStatus::Delivered,
            DeliveryEvent::Cancel => DeliveryStatus::Cancelled,
        }
    }

    /// Whether the event is legal from `from`. Forward edges accept exactly one
    /// source state; `cancel` accepts every open one.
    pub fn accepts(&self, from: DeliveryStatus) -> bool {
        match self {
            DeliveryEvent::PrintLabel => from == DeliveryStatus::Created,
            DeliveryEvent::Package => from == DeliveryStatus::LabelPrinted,
            DeliveryEvent::Pickup => from == DeliveryStatus::Packaged,
            DeliveryEvent::Deliver => from == DeliveryStatus::PickedUp,
            DeliveryEvent::Cancel => from.is_open(),
        }
    }

    fn event_name(&self) -> EventName {
        match self {
            DeliveryEvent::PrintLabel => EventName::DeliveryLabelPrinted,
            DeliveryEvent::Package => EventName::DeliveryPackaged,
            DeliveryEvent::Pickup => EventName::DeliveryPickedUp,
            DeliveryEvent::Deliver => EventName::DeliveryDelivered,
            DeliveryEvent::Cancel => EventName::DeliveryCancelled,
        }
    }

    fn timestamp_column(&self) -> delivery::Column {
        match self {
            DeliveryEvent::PrintLabel => delivery::Column::LabelPrintedAt,
            DeliveryEvent::Package => delivery::Column::PackagedAt,
            DeliveryEvent::Pickup => delivery::Column::PickedUpAt,
            DeliveryEvent::Deliver => delivery::Column::DeliveredAt,
            DeliveryEvent::Cancel => delivery::Column::CancelledAt,
        }
    }
}

impl fmt::Display for DeliveryEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for DeliveryEvent {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().replace('-', "_").as_str() {
            "print_label" => Ok(DeliveryEvent::PrintLabel),
            "package" => Ok(DeliveryEvent::Package),
            "pickup" => Ok(DeliveryEvent::Pickup),
            "deliver" => Ok(DeliveryEvent::Deliver),
            "cancel" => Ok(DeliveryEvent::Cancel),
            other => Err(format!("unknown delivery event '{other}'")),
        }
    }
}

/// Drop-off coordinates captured by the driver
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct DeliveryLocation {
    pub latitude: f64,
    pub longitude: f64,
}

impl DeliveryLocation {
    pub fn validate(&self) -> WorkflowResult<()> {
        if !self.latitude.is_finite() || !(-90.0..=90.0).contains(&self.latitude) {
            return Err(WorkflowError::validation(format!(
                "latitude {} is outside [-90, 90]",
                self.latitude
            )));
        }
        if !self.longitude.is_finite() || !(-180.0..=180.0).contains(&self.longitude) {
            return Err(WorkflowError::validation(format!(
                "longitude {} is outside [-180, 180]",
                self.longitude
            )));
        }
        Ok(())
    }
}

#[derive(Debug, Clone)]
pub struct CreateDeliveryRequest {
    pub tenant_id: Uuid,
    pub item_ids: Vec<Uuid>,
    pub package_count: i32,
    pub notes: Option<String>,
}

impl CreateDeliveryRequest {
    /// Single-parcel delivery without notes.
    pub fn new(tenant_id: Uuid, item_ids: Vec<Uuid>) -> Self {
        Self {
            tenant_id,
            item_ids,
            package_count: 1,
            notes: None,
        }
    }
}

struct Transitioned {
    delivery: delivery::Model,
    from: DeliveryStatus,
    member_count: usize,
    settlement: Option<DeliverySettlement>,
}

#[derive(Debug, Clone)]
pub struct DeliveryWorkflow {
    pub db: Arc<DatabaseConnection>,
    events: EventDispatcher,
    barcode_prefix: String,
}

impl DeliveryWorkflow {
    pub fn new(db: Arc<DatabaseConnection>, events: EventDispatcher, config: &WorkflowConfig) -> Self {
        Self {
            db,
            events,
            barcode_prefix: config.barcode_prefix.clone(),
        }
    }

    /// All-or-nothing creation: every item must be `ready_for_delivery`, owned
    /// by the tenant and free of open batches.
    #[instrument(skip(self, request), fields(tenant_id = %request.tenant_id))]
    pub async fn create(&self, request: CreateDeliveryRequest) -> WorkflowResult<delivery::Model> {
        let item_ids = dedupe_ids(&request.item_ids);
        if item_ids.is_empty() {
            return Err(WorkflowError::validation(
                "a delivery needs at least one item",
            ));
        }
        if request.package_count < 1 {
            return Err(WorkflowError::validation(format!(
                "package count must be positive, got {}",
                request.package_count
            )));
        }

        let txn = self.db.begin().await?;
        let result = self.create_in(&txn, &request, &item_ids).await;
        let created = finish(txn, result).await?;

        telemetry::record_delivery_transition("created");
        info!(
            delivery_id = %created.id,
            tenant_id = %created.tenant_id,
            barcode = %created.barcode,
            item_count = item_ids.len(),
            "Delivery created"
        );
        self.events.emit(WorkflowEvent {
            name: EventName::DeliveryCreated,
            tenant_id: created.tenant_id,
            batch_id: created.id,
            reference: created.barcode.clone(),
            item_count: item_ids.len(),
            occurred_at: Utc::now(),
        });

        Ok(created)
    }

    async fn create_in(
        &self,
        txn: &DatabaseTransaction,
        request: &CreateDeliveryRequest,
        item_ids: &[Uuid],
    ) -> WorkflowResult<delivery::Model> {
        require_active_tenant(txn, request.tenant_id).await?;
        check_members(txn, request.tenant_id, item_ids).await?;

        let barcode = unused_code(
            || generate_code(&self.barcode_prefix, BARCODE_RANDOM_LEN),
            |code| async move { barcode_taken(txn, &code).await },
        )
        .await?;

        let now = Utc::now();
        let created = DeliveryActiveModel {
            id: Set(Uuid::new_v4()),
            tenant_id: Set(request.tenant_id),
            barcode: Set(barcode),
            status: Set(DeliveryStatus::Created),
            package_count: Set(request.package_count),
            notes: Set(request
                .notes
                .as_deref()
                .map(str::trim)
                .filter(|n| !n.is_empty())
                .map(str::to_string)),
            delivery_latitude: Set(None),
            delivery_longitude: Set(None),
            created_at: Set(now.into()),
            label_printed_at: Set(None),
            packaged_at: Set(None),
            picked_up_at: Set(None),
            delivered_at: Set(None),
            cancelled_at: Set(None),
            updated_at: Set(now.into()),
        }
        .insert(txn)
        .await
        .map_err(|err| {
            if is_unique_violation(&err) {
                WorkflowError::conflict("generated barcode collided; retry the request")
            } else {
                err.into()
            }
        })?;

        let members = item_ids
            .iter()
            .enumerate()
            .map(|(position, item_id)| DeliveryItemActiveModel {
                delivery_id: Set(created.id),
                item_id: Set(*item_id),
                position: Set(position as i32),
                released_at: Set(None),
            });
        DeliveryItem::insert_many(members)
            .exec_without_returning(txn)
            .await
            .map_err(|err| claim_violation(err, item_ids))?;

        audit::record(
            txn,
            created.tenant_id,
            DELIVERY_ENTITY,
            created.id,
            "created",
            json!({
                "barcode": created.barcode,
                "item_count": item_ids.len(),
                "package_count": created.package_count,
            }),
        )
        .await?;

        Ok(created)
    }

    pub async fn print_label(&self, delivery_id: Uuid) -> WorkflowResult<delivery::Model> {
        self.apply(delivery_id, DeliveryEvent::PrintLabel, None).await
    }

    pub async fn package(&self, delivery_id: Uuid) -> WorkflowResult<delivery::Model> {
        self.apply(delivery_id, DeliveryEvent::Package, None).await
    }

    /// Handoff from the laundry floor to the driver.
    pub async fn pickup(&self, delivery_id: Uuid) -> WorkflowResult<delivery::Model> {
        self.apply(delivery_id, DeliveryEvent::Pickup, None).await
    }

    /// Completes the delivery. Without a location the coordinates stay empty.
    pub async fn deliver(
        &self,
        delivery_id: Uuid,
        location: Option<DeliveryLocation>,
    ) -> WorkflowResult<delivery::Model> {
        self.apply(delivery_id, DeliveryEvent::Deliver, location).await
    }

    /// Returns the members to `ready_for_delivery` and marks the record cancelled.
    pub async fn cancel(&self, delivery_id: Uuid) -> WorkflowResult<delivery::Model> {
        self.apply(delivery_id, DeliveryEvent::Cancel, None).await
    }

    /// Runs one transition. `location` is only read by `deliver`.
    #[instrument(skip(self, location), fields(event = %event))]
    pub async fn apply(
        &self,
        delivery_id: Uuid,
        event: DeliveryEvent,
        location: Option<DeliveryLocation>,
    ) -> WorkflowResult<delivery::Model> {
        let location = match event {
            DeliveryEvent::Deliver => location,
            _ => None,
        };
        if let Some(location) = &location {
            location.validate()?;
        }

        let txn = self.db.begin().await?;
        let result = transition_in(&txn, delivery_id, event, location).await;
        let done = finish(txn, result).await?;

        let delivery = done.delivery;
        telemetry::record_delivery_transition(delivery.status.as_str());
        telemetry::record_item_transitions(
            done.from.member_item_status().as_str(),
            delivery.status.member_item_status(),
            done.member_count as u64,
        );
        info!(
            delivery_id = %delivery.id,
            tenant_id = %delivery.tenant_id,
            barcode = %delivery.barcode,
            from = %done.from,
            to = %delivery.status,
            item_count = done.member_count,
            "Delivery transitioned"
        );

        self.events.emit(WorkflowEvent {
            name: event.event_name(),
            tenant_id: delivery.tenant_id,
            batch_id: delivery.id,
            reference: delivery.barcode.clone(),
            item_count: done.member_count,
            occurred_at: Utc::now(),
        });
        if let Some(settlement) = done.settlement {
            self.events.settle(settlement);
        }

        Ok(delivery)
    }

    pub async fn get(&self, delivery_id: Uuid) -> WorkflowResult<delivery::Model> {
        Delivery::find_by_id(delivery_id)
            .one(self.db.as_ref())
            .await?
            .ok_or_else(|| WorkflowError::not_found("delivery", delivery_id))
    }

    /// Same record as [`DeliveryWorkflow::get`], looked up by the package barcode.
    pub async fn get_by_barcode(&self, barcode: &str) -> WorkflowResult<delivery::Model> {
        let barcode = barcode.trim();
        Delivery::find()
            .filter(delivery::Column::Barcode.eq(barcode))
            .one(self.db.as_ref())
            .await?
            .ok_or_else(|| WorkflowError::not_found("delivery", barcode))
    }

    pub async fn list(
        &self,
        tenant_id: Uuid,
        status: Option<DeliveryStatus>,
    ) -> WorkflowResult<Vec<delivery::Model>> {
        let mut query = Delivery::find().filter(delivery::Column::TenantId.eq(tenant_id));
        if let Some(status) = status {
            query = query.filter(delivery::Column::Status.eq(status));
        }

        Ok(query
            .order_by_desc(delivery::Column::CreatedAt)
            .all(self.db.as_ref())
            .await?)
    }

    /// Member items in shipment order.
    pub async fn members(&self, delivery_id: Uuid) -> WorkflowResult<Vec<item::Model>> {
        self.get(delivery_id).await?;

        let rows = DeliveryItem::find()
            .filter(delivery_item::Column::DeliveryId.eq(delivery_id))
            .order_by_asc(delivery_item::Column::Position)
            .find_also_related(Item)
            .all(self.db.as_ref())
            .await?;

        Ok(rows.into_iter().filter_map(|(_, item)| item).collect())
    }

    /// Member count per item type, as printed on labels and sent to accounting.
    pub async fn type_breakdown(&self, delivery_id: Uuid) -> WorkflowResult<BTreeMap<Uuid, u64>> {
        self.get(delivery_id).await?;
        let member_ids = member_ids(self.db.as_ref(), delivery_id).await?;
        Ok(type_counts(self.db.as_ref(), &member_ids).await?)
    }
}

async fn transition_in(
    txn: &DatabaseTransaction,
    delivery_id: Uuid,
    event: DeliveryEvent,
    location: Option<DeliveryLocation>,
) -> WorkflowResult<Transitioned> {
    let existing = Delivery::find_by_id(delivery_id)
        .lock_exclusive()
        .one(txn)
        .await?
        .ok_or_else(|| WorkflowError::not_found("delivery", delivery_id))?;

    let from = existing.status;
    if !event.accepts(from) {
        return Err(WorkflowError::invalid_state(
            format!("delivery {delivery_id} is {from}; cannot {event}"),
            vec![delivery_id],
        ));
    }

    let target = event.target();
    let now = Utc::now();
    let mut update = Delivery::update_many()
        .col_expr(delivery::Column::Status, Expr::value(target.to_value()))
        .col_expr(event.timestamp_column(), Expr::value(now))
        .col_expr(delivery::Column::UpdatedAt, Expr::value(now))
        .filter(delivery::Column::Id.eq(delivery_id))
        .filter(delivery::Column::Status.eq(from));
    if let Some(location) = location {
        update = update
            .col_expr(
                delivery::Column::DeliveryLatitude,
                Expr::value(location.latitude),
            )
            .col_expr(
                delivery::Column::DeliveryLongitude,
                Expr::value(location.longitude),
            );
    }
    if update.exec(txn).await?.rows_affected != 1 {
        return Err(WorkflowError::invalid_state(
            format!("delivery {delivery_id} changed concurrently"),
            vec![delivery_id],
        ));
    }

    let member_ids = member_ids(txn, delivery_id).await?;
    // Cancel returns every member to the pool, wherever it drifted to.
    let expected = match event {
        DeliveryEvent::Cancel => None,
        _ => Some(from.member_item_status()),
    };
    if let Some(expected) = expected {
        let out_of_step = items_not_in(txn, &member_ids, expected).await?;
        if !out_of_step.is_empty() {
            return Err(WorkflowError::invalid_state(
                format!("delivery {delivery_id} has items that are no longer {expected}"),
                out_of_step,
            ));
        }
    }
    let advanced = advance_items(
        txn,
        &member_ids,
        expected,
        target.member_item_status(),
        false,
        now,
    )
    .await?;
    if advanced != member_ids.len() as u64 {
        return Err(WorkflowError::invalid_state(
            format!("delivery {delivery_id} items changed concurrently"),
            vec![delivery_id],
        ));
    }

    if !target.is_open() {
        DeliveryItem::update_many()
            .col_expr(delivery_item::Column::ReleasedAt, Expr::value(now))
            .filter(delivery_item::Column::DeliveryId.eq(delivery_id))
            .filter(delivery_item::Column::ReleasedAt.is_null())
            .exec(txn)
            .await?;
    }

    audit::record(
        txn,
        existing.tenant_id,
        DELIVERY_ENTITY,
        delivery_id,
        target.as_str(),
        json!({
            "from": from.as_str(),
            "item_count": member_ids.len(),
            "location": location,
        }),
    )
    .await?;

    let settlement = if event == DeliveryEvent::Deliver {
        Some(DeliverySettlement {
            tenant_id: existing.tenant_id,
            delivery_id,
            barcode: existing.barcode.clone(),
            item_type_counts: type_counts(txn, &member_ids).await?,
        })
    } else {
        None
    };

    let delivery = Delivery::find_by_id(delivery_id)
        .one(txn)
        .await?
        .ok_or_else(|| WorkflowError::not_found("delivery", delivery_id))?;

    Ok(Transitioned {
        delivery,
        from,
        member_count: member_ids.len(),
        settlement,
    })
}

async fn member_ids<C: ConnectionTrait>(conn: &C, delivery_id: Uuid) -> WorkflowResult<Vec<Uuid>> {
    Ok(DeliveryItem::find()
        .select_only()
        .column(delivery_item::Column::ItemId)
        .filter(delivery_item::Column::DeliveryId.eq(delivery_id))
        .order_by_asc(delivery_item::Column::Position)
        .into_tuple()
        .all(conn)
        .await?)
}

async fn items_not_in<C: ConnectionTrait>(
    conn: &C,
    item_ids: &[Uuid],
    status: ItemStatus,
) -> WorkflowResult<Vec<Uuid>> {
    let mut ids = Vec::new();
    for chunk in item_ids.chunks(ID_CHUNK_SIZE) {
        let rows: Vec<Uuid> = Item::find()
            .select_only()
            .column(item::Column::Id)
            .filter(item::Column::Id.is_in(chunk.iter().copied()))
            .filter(item::Column::Status.ne(status))
            .into_tuple()
            .all(conn)
            .await?;
        ids.extend(rows);
    }
    Ok(ids)
}

async fn type_counts<C: ConnectionTrait>(
    conn: &C,
    item_ids: &[Uuid],
) -> Result<BTreeMap<Uuid, u64>, sea_orm::DbErr> {
    let mut counts = BTreeMap::new();
    for chunk in item_ids.chunks(ID_CHUNK_SIZE) {
        let types: Vec<Uuid> = Item::find()
            .select_only()
            .column(item::Column::ItemTypeId)
            .filter(item::Column::Id.is_in(chunk.iter().copied()))
            .into_tuple()
            .all(conn)
            .await?;
        for item_type_id in types {
            *counts.entry(item_type_id).or_insert(0) += 1;
        }
    }
    Ok(counts)
}

async fn barcode_taken<C: ConnectionTrait>(conn: &C, barcode: &str) -> Result<bool, sea_orm::DbErr> {
    Ok(Delivery::find()
        .filter(delivery::Column::Barcode.eq(barcode))
        .one(conn)
        .await?
        .is_some())
}

/// Every member must exist, belong to the tenant, be `ready_for_delivery` and
/// be free of open batches. Reports all offending ids at once.
async fn check_members(
    txn: &DatabaseTransaction,
    tenant_id: Uuid,
    item_ids: &[Uuid],
) -> WorkflowResult<()> {
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

    let mut ineligible: Vec<Uuid> = items
        .iter()
        .filter(|item| item.tenant_id != tenant_id || item.status != ItemStatus::ReadyForDelivery)
        .map(|item| item.id)
        .collect();
    if !ineligible.is_empty() {
        ineligible.sort();
        return Err(WorkflowError::invalid_state(
            format!("items must be ready_for_delivery and belong to tenant {tenant_id}"),
            ineligible,
        ));
    }

    let mut claimed = claimed_by_open_deliveries(txn, item_ids).await?;
    claimed.extend(claimed_by_open_pickups(txn, item_ids).await?);
    if !claimed.is_empty() {
        return Err(WorkflowError::invalid_state(
            "items are already claimed by an open batch",
            claimed,
        ));
    }

    Ok(())
}
