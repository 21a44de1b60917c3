//! Adds partial unique indexes so an item can be claimed by at most one open
//! pickup and at most one open delivery at a time.

use sea_orm_migration::prelude::*;
use sea_orm_migration::sea_orm::Statement;

#[derive(DeriveMigrationName)]
pub struct Migration;

const PICKUP_GUARD: &str = "idx_pickup_items_open_claim";
const DELIVERY_GUARD: &str = "idx_delivery_items_open_claim";

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        let backend = manager.get_database_backend();
        let connection = manager.get_connection();

        connection
            .execute(Statement::from_string(
                backend,
                format!(
                    "CREATE UNIQUE INDEX IF NOT EXISTS {PICKUP_GUARD} \
                     ON pickup_items (item_id) WHERE released_at IS NULL"
                ),
            ))
            .await?;

        connection
            .execute(Statement::from_string(
                backend,
                format!(
                    "CREATE UNIQUE INDEX IF NOT EXISTS {DELIVERY_GUARD} \
                     ON delivery_items (item_id) WHERE released_at IS NULL"
                ),
            ))
            .await?;

        Ok(())
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        let backend = manager.get_database_backend();
        let connection = manager.get_connection();

        for index in [DELIVERY_GUARD, PICKUP_GUARD] {
            connection
                .execute(Statement::from_string(
                    backend,
                    format!("DROP INDEX IF EXISTS {index}"),
                ))
                .await?;
        }

        Ok(())
    }
}
