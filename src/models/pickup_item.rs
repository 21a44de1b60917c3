//! Pickup membership rows
//!
//! Records which items were placed in which bag. A row with `released_at`
//! unset is a live claim and is covered by the open-claim unique index.

use sea_orm::ActiveModelBehavior;
use sea_orm::entity::prelude::*;
use sea_orm::prelude::DateTimeWithTimeZone;
use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "pickup_items")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub pickup_id: Uuid,

    #[sea_orm(primary_key, auto_increment = false)]
    pub item_id: Uuid,

    /// Order in which the item was added to the bag
    pub position: i32,

    pub released_at: Option<DateTimeWithTimeZone>,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(
        belongs_to = "super::pickup::Entity",
        from = "Column::PickupId",
        to = "super::pickup::Column::Id"
    )]
    Pickup,
    #[sea_orm(
        belongs_to = "super::item::Entity",
        from = "Column::ItemId",
        to = "super::item::Column::Id"
    )]
    Item,
}

impl Related<super::pickup::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Pickup.def()
    }
}

impl Related<super::item::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Item.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}
