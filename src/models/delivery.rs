//! Delivery entity model
//!
//! One outgoing clean-laundry shipment to a tenant, driven through a five-stage
//! handling workflow.

use sea_orm::ActiveModelBehavior;
use sea_orm::entity::prelude::*;
use sea_orm::prelude::DateTimeWithTimeZone;
use serde::{Deserialize, Serialize};
use std::fmt;

use super::item::ItemStatus;

#[derive(Clone, Debug, PartialEq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "deliveries")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,

    pub tenant_id: Uuid,

    /// Physical identity of the outgoing package, generated at creation
    #[sea_orm(unique)]
    pub barcode: String,

    pub status: DeliveryStatus,

    /// Number of parcels the batch was split into
    pub package_count: i32,

    pub notes: Option<String>,

    pub delivery_latitude: Option<f64>,

    pub delivery_longitude: Option<f64>,

    pub created_at: DateTimeWithTimeZone,

    pub label_printed_at: Option<DateTimeWithTimeZone>,

    pub packaged_at: Option<DateTimeWithTimeZone>,

    pub picked_up_at: Option<DateTimeWithTimeZone>,

    pub delivered_at: Option<DateTimeWithTimeZone>,

    pub cancelled_at: Option<DateTimeWithTimeZone>,

    pub updated_at: DateTimeWithTimeZone,
}

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, EnumIter, DeriveActiveEnum, Serialize, Deserialize,
)]
#[sea_orm(rs_type = "String", db_type = "Text")]
#[serde(rename_all = "snake_case")]
pub enum DeliveryStatus {
    #[sea_orm(string_value = "created")]
    Created,
    #[sea_orm(string_value = "label_printed")]
    LabelPrinted,
    #[sea_orm(string_value = "packaged")]
    Packaged,
    #[sea_orm(string_value = "picked_up")]
    PickedUp,
    #[sea_orm(string_value = "delivered")]
    Delivered,
    #[sea_orm(string_value = "cancelled")]
    Cancelled,
}

impl DeliveryStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            DeliveryStatus::Created => "created",
            DeliveryStatus::LabelPrinted => "label_printed",
            DeliveryStatus::Packaged => "packaged",
            DeliveryStatus::PickedUp => "picked_up",
            DeliveryStatus::Delivered => "delivered",
            DeliveryStatus::Cancelled => "cancelled",
        }
    }

    /// `delivered` and `cancelled` end the workflow; every other state still
    /// claims its member items.
    pub fn is_open(&self) -> bool {
        !matches!(self, DeliveryStatus::Delivered | DeliveryStatus::Cancelled)
    }

    /// Status every member item holds while the delivery sits in this state.
    pub fn member_item_status(&self) -> ItemStatus {
        match self {
            DeliveryStatus::Created | DeliveryStatus::Cancelled => ItemStatus::ReadyForDelivery,
            DeliveryStatus::LabelPrinted => ItemStatus::LabelPrinted,
            DeliveryStatus::Packaged => ItemStatus::Packaged,
            DeliveryStatus::PickedUp => ItemStatus::InTransit,
            DeliveryStatus::Delivered => ItemStatus::AtHotel,
        }
    }
}

impl fmt::Display for DeliveryStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(
        belongs_to = "super::tenant::Entity",
        from = "Column::TenantId",
        to = "super::tenant::Column::Id"
    )]
    Tenant,
    #[sea_orm(has_many = "super::delivery_item::Entity")]
    DeliveryItems,
}

impl Related<super::tenant::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Tenant.def()
    }
}

impl Related<super::delivery_item::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::DeliveryItems.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}
