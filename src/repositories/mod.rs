//! # Repository Layer
//!
//! SeaORM-backed registries for tenants, items and the audit trail. Workflow
//! modules reuse the crate-level helpers here inside their own transactions.

pub mod audit;
pub mod item;
pub mod tenant;

pub use audit::AuditRepository;
pub use item::{BulkTransitionReport, ConditionUpdate, ItemRepository, RegisterItemRequest};
pub use tenant::{CreateTenantRequest, TenantRepository, UpdateTenantRequest};
