//! Migration to create the deliveries and delivery_items tables.
//!
//! A delivery is one outgoing clean-laundry shipment. Each reached workflow
//! stage records its own timestamp; coordinates are only written on delivery.

use sea_orm_migration::prelude::*;

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .create_table(
                Table::create()
                    .table(Deliveries::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(Deliveries::Id)
                            .uuid()
                            .not_null()
                            .primary_key(),
                    )
                    .col(ColumnDef::new(Deliveries::TenantId).uuid().not_null())
                    .col(ColumnDef::new(Deliveries::Barcode).text().not_null())
                    .col(
                        ColumnDef::new(Deliveries::Status)
                            .text()
                            .not_null()
                            .default("created"),
                    )
                    .col(
                        ColumnDef::new(Deliveries::PackageCount)
                            .integer()
                            .not_null()
                            .default(1),
                    )
                    .col(ColumnDef::new(Deliveries::Notes).text().null())
                    .col(ColumnDef::new(Deliveries::DeliveryLatitude).double().null())
                    .col(ColumnDef::new(Deliveries::DeliveryLongitude).double().null())
                    .col(
                        ColumnDef::new(Deliveries::CreatedAt)
                            .timestamp_with_time_zone()
                            .not_null()
                            .default(Expr::current_timestamp()),
                    )
                    .col(
                        ColumnDef::new(Deliveries::LabelPrintedAt)
                            .timestamp_with_time_zone()
                            .null(),
                    )
                    .col(
                        ColumnDef::new(Deliveries::PackagedAt)
                            .timestamp_with_time_zone()
                            .null(),
                    )
                    .col(
                        ColumnDef::new(Deliveries::PickedUpAt)
                            .timestamp_with_time_zone()
                            .null(),
                    )
                    .col(
                        ColumnDef::new(Deliveries::DeliveredAt)
                            .timestamp_with_time_zone()
                            .null(),
                    )
                    .col(
                        ColumnDef::new(Deliveries::CancelledAt)
                            .timestamp_with_time_zone()
                            .null(),
                    )
                    .col(
                        ColumnDef::new(Deliveries::UpdatedAt)
                            .timestamp_with_time_zone()
                            .not_null()
                            .default(Expr::current_timestamp()),
                    )
                    .foreign_key(
                        ForeignKey::create()
                            .name("fk_deliveries_tenant_id")
                            .from(Deliveries::Table, Deliveries::TenantId)
                            .to(Tenants::Table, Tenants::Id)
                            .on_delete(ForeignKeyAction::Restrict),
                    )
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .name("idx_deliveries_barcode")
                    .table(Deliveries::Table)
                    .col(Deliveries::Barcode)
                    .unique()
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .name("idx_deliveries_tenant_status")
                    .table(Deliveries::Table)
                    .col(Deliveries::TenantId)
                    .col(Deliveries::Status)
                    .to_owned(),
            )
            .await?;

        manager
            .create_table(
                Table::create()
                    .table(DeliveryItems::Table)
                    .if_not_exists()
                    .col(ColumnDef::new(DeliveryItems::DeliveryId).uuid().not_null())
                    .col(ColumnDef::new(DeliveryItems::ItemId).uuid().not_null())
                    .col(ColumnDef::new(DeliveryItems::Position).integer().not_null())
                    .col(
                        ColumnDef::new(DeliveryItems::ReleasedAt)
                            .timestamp_with_time_zone()
                            .null(),
                    )
                    .primary_key(
                        Index::create()
                            .col(DeliveryItems::DeliveryId)
                            .col(DeliveryItems::ItemId),
                    )
                    .foreign_key(
                        ForeignKey::create()
                            .name("fk_delivery_items_delivery_id")
                            .from(DeliveryItems::Table, DeliveryItems::DeliveryId)
                            .to(Deliveries::Table, Deliveries::Id)
                            .on_delete(ForeignKeyAction::Restrict),
                    )
                    .foreign_key(
                        ForeignKey::create()
                            .name("fk_delivery_items_item_id")
                            .from(DeliveryItems::Table, DeliveryItems::ItemId)
                            .to(Items::Table, Items::Id)
                            .on_delete(ForeignKeyAction::Restrict),
                    )
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .name("idx_delivery_items_item_id")
                    .table(DeliveryItems::Table)
                    .col(DeliveryItems::ItemId)
                    .to_owned(),
            )
            .await?;

        Ok(())
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_index(Index::drop().name("idx_delivery_items_item_id").to_owned())
            .await?;

        manager
            .drop_table(Table::drop().table(DeliveryItems::Table).to_owned())
            .await?;

        manager
            .drop_index(Index::drop().name("idx_deliveries_tenant_status").to_owned())
            .await?;

        manager
            .drop_index(Index::drop().name("idx_deliveries_barcode").to_owned())
            .await?;

        manager
            .drop_table(Table::drop().table(Deliveries::Table).to_owned())
            .await
    }
}

#[derive(DeriveIden)]
enum Deliveries {
    Table,
    Id,
    TenantId,
    Barcode,
    Status,
    PackageCount,
    Notes,
    DeliveryLatitude,
    DeliveryLongitude,
    CreatedAt,
    LabelPrintedAt,
    PackagedAt,
    PickedUpAt,
    DeliveredAt,
    CancelledAt,
    UpdatedAt,
}

#[derive(DeriveIden)]
enum DeliveryItems {
    Table,
    DeliveryId,
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
