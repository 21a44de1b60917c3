//! Database migrations for the linen tracking engine.
//!
//! This module contains all database migrations using SeaORM Migration.

pub use sea_orm_migration::prelude::*;

mod m2024_01_01_000001_create_tenants;
mod m2025_01_10_000100_create_items;
mod m2025_01_10_000200_create_pickups;
mod m2025_01_10_000300_create_deliveries;
mod m2025_01_10_000400_create_audit_entries;
mod m2025_01_10_000500_add_open_claim_guards;

pub struct Migrator;

#[async_trait::async_trait]
impl MigratorTrait for Migrator {
    fn migrations() -> Vec<Box<dyn MigrationTrait>> {
        vec![
            Box::new(m2024_01_01_000001_create_tenants::Migration),
            Box::new(m2025_01_10_000100_create_items::Migration),
            Box::new(m2025_01_10_000200_create_pickups::Migration),
            Box::new(m2025_01_10_000300_create_deliveries::Migration),
            Box::new(m2025_01_10_000400_create_audit_entries::Migration),
            Box::new(m2025_01_10_000500_add_open_claim_guards::Migration),
        ]
    }
}
