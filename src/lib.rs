//! # Linentrack
//!
//! Workflow engine for RFID-tagged hotel linen: the item ledger, scan
//! reconciliation, pickup and delivery batches, and the tenant cascade.

pub mod config;
pub mod db;
pub mod engine;
pub mod error;
pub mod events;
pub mod models;
pub mod repositories;
pub mod rfid;
pub mod telemetry;
pub mod workflow;
pub use migration;

pub use engine::Engine;
pub use error::{ErrorKind, WorkflowError, WorkflowResult};
