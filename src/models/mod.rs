//! # Data Models
//!
//! SeaORM entities for tenants, items and the pickup/delivery batches that
//! move items between a hotel and the laundry.

use serde::{Deserialize, Serialize};

pub mod audit_entry;
pub mod delivery;
pub mod delivery_item;
pub mod item;
pub mod pickup;
pub mod pickup_item;
pub mod tenant;

pub use audit_entry::Entity as AuditEntry;
pub use delivery::{DeliveryStatus, Entity as Delivery};
pub use delivery_item::Entity as DeliveryItem;
pub use item::{Entity as Item, ItemStatus};
pub use pickup::{Entity as Pickup, PickupStatus};
pub use pickup_item::Entity as PickupItem;
pub use tenant::Entity as Tenant;

/// Basic service information, printed by the CLI `info` output
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServiceInfo {
    /// The name of the service
    pub service: String,
    /// The version of the service
    pub version: String,
}

impl Default for ServiceInfo {
    fn default() -> Self {
        Self {
            service: "linentrack".to_string(),
            version: env!("CARGO_PKG_VERSION").to_string(),
        }
    }
}
