//! Migration to create the audit_entries table.

use sea_orm_migration::prelude::*;

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .create_table(
                Table::create()
                    .table(AuditEntries::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(AuditEntries::Id)
                            .uuid()
                            .not_null()
                            .primary_key(),
                    )
                    .col(ColumnDef::new(AuditEntries::TenantId).uuid().not_null())
                    .col(ColumnDef::new(AuditEntries::EntityKind).text().not_null())
                    .col(ColumnDef::new(AuditEntries::EntityId).uuid().not_null())
                    .col(ColumnDef::new(AuditEntries::Action).text().not_null())
                    .col(ColumnDef::new(AuditEntries::Payload).json_binary().null())
                    .col(
                        ColumnDef::new(AuditEntries::CreatedAt)
                            .timestamp_with_time_zone()
                            .not_null()
                            .default(Expr::current_timestamp()),
                    )
                    .foreign_key(
                        ForeignKey::create()
                            .name("fk_audit_entries_tenant_id")
                            .from(AuditEntries::Table, AuditEntries::TenantId)
                            .to(Tenants::Table, Tenants::Id)
                            .on_delete(ForeignKeyAction::Restrict),
                    )
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .name("idx_audit_entries_entity")
                    .table(AuditEntries::Table)
                    .col(AuditEntries::EntityKind)
                    .col(AuditEntries::EntityId)
                    .to_owned(),
            )
            .await?;

        Ok(())
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_index(Index::drop().name("idx_audit_entries_entity").to_owned())
            .await?;

        manager
            .drop_table(Table::drop().table(AuditEntries::Table).to_owned())
            .await
    }
}

#[derive(DeriveIden)]
enum AuditEntries {
    Table,
    Id,
    TenantId,
    EntityKind,
    EntityId,
    Action,
    Payload,
    CreatedAt,
}

#[derive(DeriveIden)]
enum Tenants {
    Table,
    Id,
}
