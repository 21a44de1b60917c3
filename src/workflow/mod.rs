//! # Batch Workflows
//!
//! Pickup and delivery state machines plus the tenant cascade. Every
//! multi-record transition runs inside one database transaction that is
//! committed only when all member writes succeeded.

pub mod cascade;
pub mod delivery;
pub mod pickup;

pub use cascade::{CascadeReport, DependentPurge, TenantCascade};
pub use delivery::{CreateDeliveryRequest, DeliveryEvent, DeliveryLocation, DeliveryWorkflow};
pub use pickup::{CreatePickupRequest, PickupWorkflow};

use rand::Rng;
use rand::distributions::Alphanumeric;
use sea_orm::{DatabaseTransaction, DbErr};
use std::collections::HashSet;
use tracing::warn;
use uuid::Uuid;

use crate::error::{WorkflowError, WorkflowResult, is_unique_violation};

/// Attempts made to find an unused generated bag code or barcode.
const CODE_GENERATION_ATTEMPTS: usize = 5;

/// Commits on success, rolls back on error. A failed rollback is logged and
/// the original error returned.
pub(crate) async fn finish<T>(
    txn: DatabaseTransaction,
    result: WorkflowResult<T>,
) -> WorkflowResult<T> {
    match result {
        Ok(value) => {
            txn.commit().await?;
            Ok(value)
        }
        Err(err) => {
            if let Err(rollback_err) = txn.rollback().await {
                warn!(error = %rollback_err, "Failed to roll back workflow transaction");
            }
            Err(err)
        }
    }
}

/// Drops repeated ids, keeping first occurrences in order.
pub(crate) fn dedupe_ids(ids: &[Uuid]) -> Vec<Uuid> {
    let mut seen = HashSet::with_capacity(ids.len());
    ids.iter().copied().filter(|id| seen.insert(*id)).collect()
}

/// `<PREFIX>-<yyyymmdd>-<random uppercase alphanumerics>`
pub(crate) fn generate_code(prefix: &str, random_len: usize) -> String {
    let suffix: String = rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(random_len)
        .map(|c| char::from(c).to_ascii_uppercase())
        .collect();
    format!("{prefix}-{}-{suffix}", chrono::Utc::now().format("%Y%m%d"))
}

/// Maps a unique violation raised while writing membership rows to the
/// single-custody error; anything else stays a database error.
pub(crate) fn claim_violation(err: DbErr, item_ids: &[Uuid]) -> WorkflowError {
    if is_unique_violation(&err) {
        WorkflowError::invalid_state(
            "one or more items are already claimed by another open batch",
            item_ids.to_vec(),
        )
    } else {
        err.into()
    }
}

/// Runs `generate` until `is_taken` reports a free code.
pub(crate) async fn unused_code<G, F, Fut>(mut generate: G, is_taken: F) -> WorkflowResult<String>
where
    G: FnMut() -> String,
    F: Fn(String) -> Fut,
    Fut: std::future::Future<Output = Result<bool, DbErr>>,
{
    for _ in 0..CODE_GENERATION_ATTEMPTS {
        let code = generate();
        if !is_taken(code.clone()).await? {
            return Ok(code);
        }
    }
    Err(WorkflowError::conflict(
        "could not generate an unused code; retry the request",
    ))
}
