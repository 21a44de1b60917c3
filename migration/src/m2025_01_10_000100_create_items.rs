//! Migration to create the items table.
//!
//! One row per physical RFID-tagged textile. `rfid_tag` is unique across all
//! tenants because a physical tag cannot belong to two items.

use sea_orm_migration::prelude::*;

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .create_table(
                Table::create()
                    .table(Items::Table)
                    .if_not_exists()
                    .col(ColumnDef::new(Items::Id).uuid().not_null().primary_key())
                    .col(ColumnDef::new(Items::TenantId).uuid().not_null())
                    .col(ColumnDef::new(Items::ItemTypeId).uuid().not_null())
                    .col(ColumnDef::new(Items::RfidTag).text().not_null())
                    .col(
                        ColumnDef::new(Items::Status)
                            .text()
                            .not_null()
                            .default("at_hotel"),
                    )
                    .col(
                        ColumnDef::new(Items::WashCount)
                            .integer()
                            .not_null()
                            .default(0),
                    )
                    .col(
                        ColumnDef::new(Items::IsDamaged)
                            .boolean()
                            .not_null()
                            .default(false),
                    )
                    .col(
                        ColumnDef::new(Items::IsStained)
                            .boolean()
                            .not_null()
                            .default(false),
                    )
                    .col(ColumnDef::new(Items::ConditionNotes).text().null())
                    .col(
                        ColumnDef::new(Items::LastWashedAt)
                            .timestamp_with_time_zone()
                            .null(),
                    )
                    .col(
                        ColumnDef::new(Items::CreatedAt)
                            .timestamp_with_time_zone()
                            .not_null()
                            .default(Expr::current_timestamp()),
                    )
                    .col(
                        ColumnDef::new(Items::UpdatedAt)
                            .timestamp_with_time_zone()
                            .not_null()
                            .default(Expr::current_timestamp()),
                    )
                    .foreign_key(
                        ForeignKey::create()
                            .name("fk_items_tenant_id")
                            .from(Items::Table, Items::TenantId)
                            .to(Tenants::Table, Tenants::Id)
                            .on_delete(ForeignKeyAction::Restrict),
                    )
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .name("idx_items_rfid_tag")
                    .table(Items::Table)
                    .col(Items::RfidTag)
                    .unique()
                    .to_owned(),
            )
            .await?;

        // Tenant dashboards and bulk transitions filter by status
        manager
            .create_index(
                Index::create()
                    .name("idx_items_tenant_status")
                    .table(Items::Table)
                    .col(Items::TenantId)
                    .col(Items::Status)
                    .to_owned(),
            )
            .await?;

        Ok(())
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_index(Index::drop().name("idx_items_tenant_status").to_owned())
            .await?;

        manager
            .drop_index(Index::drop().name("idx_items_rfid_tag").to_owned())
            .await?;

        manager
            .drop_table(Table::drop().table(Items::Table).to_owned())
            .await
    }
}

#[derive(DeriveIden)]
enum Items {
    Table,
    Id,
    TenantId,
    ItemTypeId,
    RfidTag,
    Status,
    WashCount,
    IsDamaged,
    IsStained,
    ConditionNotes,
    LastWashedAt,
    CreatedAt,
    UpdatedAt,
}

#[derive(DeriveIden)]
enum Tenants {
    Table,
    Id,
}
