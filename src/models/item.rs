//! Item entity model
//!
//! One row per physical RFID-tagged textile. The `status` column is the single
//! source of truth for where the item currently is.

use sea_orm::ActiveModelBehavior;
use sea_orm::entity::prelude::*;
use sea_orm::prelude::DateTimeWithTimeZone;
use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "items")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,

    /// Owning tenant
    pub tenant_id: Uuid,

    /// Externally managed item category (towel, sheet, ...)
    pub item_type_id: Uuid,

    /// Physical identity of the item, unique system-wide and immutable
    #[sea_orm(unique)]
    pub rfid_tag: String,

    pub status: ItemStatus,

    /// Number of completed receptions at the laundry; only ever increases
    pub wash_count: i32,

    pub is_damaged: bool,

    pub is_stained: bool,

    pub condition_notes: Option<String>,

    pub last_washed_at: Option<DateTimeWithTimeZone>,

    pub created_at: DateTimeWithTimeZone,

    pub updated_at: DateTimeWithTimeZone,
}

/// Lifecycle position of a physical item.
///
/// Items cycle `at_hotel → at_laundry → processing → ready_for_delivery →
/// label_printed → packaged → in_transit → delivered`, and a completed delivery
/// lands the item back at `at_hotel`.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    PartialOrd,
    Ord,
    EnumIter,
    DeriveActiveEnum,
    Serialize,
    Deserialize,
    Default,
)]
#[sea_orm(rs_type = "String", db_type = "Text")]
#[serde(rename_all = "snake_case")]
pub enum ItemStatus {
    #[sea_orm(string_value = "at_hotel")]
    #[default]
    AtHotel,
    #[sea_orm(string_value = "at_laundry")]
    AtLaundry,
    #[sea_orm(string_value = "processing")]
    Processing,
    #[sea_orm(string_value = "ready_for_delivery")]
    ReadyForDelivery,
    #[sea_orm(string_value = "label_printed")]
    LabelPrinted,
    #[sea_orm(string_value = "packaged")]
    Packaged,
    #[sea_orm(string_value = "in_transit")]
    InTransit,
    #[sea_orm(string_value = "delivered")]
    Delivered,
}

impl ItemStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ItemStatus::AtHotel => "at_hotel",
            ItemStatus::AtLaundry => "at_laundry",
            ItemStatus::Processing => "processing",
            ItemStatus::ReadyForDelivery => "ready_for_delivery",
            ItemStatus::LabelPrinted => "label_printed",
            ItemStatus::Packaged => "packaged",
            ItemStatus::InTransit => "in_transit",
            ItemStatus::Delivered => "delivered",
        }
    }

    /// Whether the item is physically with the hotel. `delivered` counts as a
    /// fresh `at_hotel`.
    pub fn is_at_hotel(&self) -> bool {
        matches!(self, ItemStatus::AtHotel | ItemStatus::Delivered)
    }

    /// Source states accepted by the bulk clean transition.
    pub fn cleanable() -> &'static [ItemStatus] {
        &[ItemStatus::AtLaundry, ItemStatus::Processing]
    }
}

impl fmt::Display for ItemStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for ItemStatus {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "at_hotel" => Ok(ItemStatus::AtHotel),
            "at_laundry" => Ok(ItemStatus::AtLaundry),
            "processing" => Ok(ItemStatus::Processing),
            "ready_for_delivery" => Ok(ItemStatus::ReadyForDelivery),
            "label_printed" => Ok(ItemStatus::LabelPrinted),
            "packaged" => Ok(ItemStatus::Packaged),
            "in_transit" => Ok(ItemStatus::InTransit),
            "delivered" => Ok(ItemStatus::Delivered),
            other => Err(format!("unknown item status '{other}'")),
        }
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
}

impl Related<super::tenant::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Tenant.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}
