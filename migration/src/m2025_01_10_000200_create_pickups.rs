//! Migration to create the pickups and pickup_items tables.
//!
//! A pickup is one bag of dirty items collected from a tenant. Membership rows
//! keep their scan order in `position`; `released_at` is set once the pickup
//! is received and the item is no longer claimed by it.

use sea_orm_migration::prelude::*;

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .create_table(
                Table::create()
                    .table(Pickups::Table)
                    .if_not_exists()
                    .col(ColumnDef::new(Pickups::Id).uuid().not_null().primary_key())
                    .col(ColumnDef::new(Pickups::TenantId).uuid().not_null())
                    .col(ColumnDef::new(Pickups::BagCode).text().not_null())
                    .col(ColumnDef::new(Pickups::SealNumber).text().null())
                    .col(
                        ColumnDef::new(Pickups::Status)
                            .text()
                            .not_null()
                            .default("created"),
                    )
                    .col(
                        ColumnDef::new(Pickups::CreatedAt)
                            .timestamp_with_time_zone()
                            .not_null()
                            .default(Expr::current_timestamp()),
                    )
                    .col(
                        ColumnDef::new(Pickups::ReceivedAt)
                            .timestamp_with_time_zone()
                            .null(),
                    )
                    .col(
                        ColumnDef::new(Pickups::UpdatedAt)
                            .timestamp_with_time_zone()
                            .not_null()
                            .default(Expr::current_timestamp()),
                    )
                    .foreign_key(
                        ForeignKey::create()
                            .name("fk_pickups_tenant_id")
                            .from(Pickups::Table, Pickups::TenantId)
                            .to(Tenants::Table, Tenants::Id)
                            .on_delete(ForeignKeyAction::Restrict),
                    )
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .name("idx_pickups_bag_code")
                    .table(Pickups::Table)
                    .col(Pickups::BagCode)
                    .unique()
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .name("idx_pickups_tenant_status")
                    .table(Pickups::Table)
                    .col(Pickups::TenantId)
                    .col(Pickups::Status)
                    .to_owned(),
            )
            .await?;

        manager
            .create_table(
                Table::create()
                    .table(PickupItems::Table)
                    .if_not_exists()
                    .col(ColumnDef::new(PickupItems::PickupId).uuid().not_null())
                    .col(ColumnDef::new(PickupItems::ItemId).uuid().not_null())
                    .col(ColumnDef::new(PickupItems::Position).integer().not_null())
                    .col(
                        ColumnDef::new(PickupItems::ReleasedAt)
                            .timestamp_with_time_zone()
                            .null(),
                    )
                    .primary_key(
                        Index::create()
                            .col(PickupItems::PickupId)
                            .col(PickupItems::ItemId),
                    )
                    .foreign_key(
                        ForeignKey::create()
                            .name("fk_pickup_items_pickup_id")
                            .from(PickupItems::Table, PickupItems::PickupId)
                            .to(Pickups::Table, Pickups::Id)
                            .on_delete(ForeignKeyAction::Restrict),
                    )
                    .foreign_key(
                        ForeignKey::create()
                            .name("fk_pickup_items_item_id")
                            .from(PickupItems::Table, PickupItems::ItemId)
                            .to(Items::Table, Items::Id)
                            .on_delete(ForeignKeyAction::Restrict),
                    )
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .name("idx_pickup_items_item_id")
                    .table(PickupItems::Table)
                    .col(PickupItems::ItemId)
                    .to_owned(),
            )
            .await?;

        Ok(())
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_index(Index::drop().name("idx_pickup_items_item_id").to_owned())
            .await?;

        manager
            .drop_table(Table::drop().table(PickupItems::Table).to_owned())
            .await?;

        manager
            .drop_index(Index::drop().name("idx_pickups_tenant_status").to_owned())
            .await?;

        manager
            .drop_index(Index::drop().name("idx_pickups_bag_code").to_owned())
            .await?;

        manager
            .drop_table(Table::drop().table(Pickups::Table).to_owned())
            .await
    }
}

#[derive(DeriveIden)]
enum Pickups {
    Table,
    Id,
    TenantId,
    BagCode,
    SealNumber,
    Status,
    CreatedAt,
    ReceivedAt,
    UpdatedAt,
}

#[derive(DeriveIden)]
enum PickupItems {
    Table,
    PickupId,
    ItemId,
    Position,
    ReleasedAt,
}

#[derive(DeriveIden)]
enum Tenants {
    Table,
    Id,
}

#[derive(DeriveIden)]
enum Items {
    Table,
    Id,
}
