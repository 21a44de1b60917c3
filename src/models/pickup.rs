//! Pickup entity model
//!
//! One physical bag of dirty items collected from a tenant.

use sea_orm::ActiveModelBehavior;
use sea_orm::entity::prelude::*;
use sea_orm::prelude::DateTimeWithTimeZone;
use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "pickups")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,

    pub tenant_id: Uuid,

    /// Human-readable label printed on the physical bag
    #[sea_orm(unique)]
    pub bag_code: String,

    pub seal_number: Option<String>,

    pub status: PickupStatus,

    pub created_at: DateTimeWithTimeZone,

    pub received_at: Option<DateTimeWithTimeZone>,

    pub updated_at: DateTimeWithTimeZone,
}

/// Two-state pickup lifecycle; `received` is terminal.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, EnumIter, DeriveActiveEnum, Serialize, Deserialize,
)]
#[sea_orm(rs_type = "String", db_type = "Text")]
#[serde(rename_all = "snake_case")]
pub enum PickupStatus {
    #[sea_orm(string_value = "created")]
    Created,
    #[sea_orm(string_value = "received")]
    Received,
}

impl PickupStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            PickupStatus::Created => "created",
            PickupStatus::Received => "received",
        }
    }

    /// An open pickup still claims its member items.
    pub fn is_open(&self) -> bool {
        matches!(self, PickupStatus::Created)
    }
}

impl fmt::Display for PickupStatus {
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
    #[sea_orm(has_many = "super::pickup_item::Entity")]
    PickupItems,
}

impl Related<super::tenant::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Tenant.def()
    }
}

impl Related<super::pickup_item::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::PickupItems.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}
