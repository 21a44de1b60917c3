//! # RFID Reconciliation
//!
//! Matches a batch of scanned tag strings against the item ledger. The input
//! is untrusted and origin-agnostic: tags are trimmed, deduplicated and format
//! checked here, and malformed ones are reported as not found instead of
//! failing the scan. Reconciliation never writes.

use sea_orm::{ColumnTrait, DatabaseConnection, EntityTrait, QueryFilter};
use serde::Serialize;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tracing::{debug, instrument};
use uuid::Uuid;

use crate::config::WorkflowConfig;
use crate::error::{WorkflowError, WorkflowResult};
use crate::models::item::{self, Entity as Item};
use crate::repositories::item::{ID_CHUNK_SIZE, normalize_tag};
use crate::telemetry;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ScanReport {
    /// Matched items, in first-scan order
    pub items: Vec<item::Model>,
    /// Matched items owned by a tenant other than the requested one
    pub foreign_items: Vec<item::Model>,
    pub found: usize,
    pub not_found: usize,
    /// Unknown and malformed tags, in first-scan order
    pub not_found_tags: Vec<String>,
    /// Subset of `not_found_tags` that failed the tag format check
    pub rejected_tags: Vec<String>,
}

#[derive(Debug, Clone)]
pub struct RfidReconciler {
    pub db: Arc<DatabaseConnection>,
    max_tag_length: usize,
    max_scan_tags: usize,
}

impl RfidReconciler {
    pub fn new(db: Arc<DatabaseConnection>, config: &WorkflowConfig) -> Self {
        Self {
            db,
            max_tag_length: config.max_tag_length,
            max_scan_tags: config.max_scan_tags,
        }
    }

    /// Classifies `tags` as found or not found. With `tenant_id` set, items of
    /// other tenants land in `foreign_items` and count toward neither total.
    #[instrument(skip(self, tags), fields(tag_count = tags.len()))]
    pub async fn scan(&self, tags: &[String], tenant_id: Option<Uuid>) -> WorkflowResult<ScanReport> {
        let unique = dedupe_tags(tags);
        if unique.len() > self.max_scan_tags {
            return Err(WorkflowError::validation(format!(
                "scan contains {} distinct tags; at most {} are accepted",
                unique.len(),
                self.max_scan_tags
            )));
        }

        let mut valid = Vec::with_capacity(unique.len());
        let mut rejected = Vec::new();
        for tag in &unique {
            match normalize_tag(tag, self.max_tag_length) {
                Ok(tag) => valid.push(tag),
                Err(_) => rejected.push(tag.clone()),
            }
        }

        let mut by_tag: HashMap<String, item::Model> = HashMap::with_capacity(valid.len());
        for chunk in valid.chunks(ID_CHUNK_SIZE) {
            let rows = Item::find()
                .filter(item::Column::RfidTag.is_in(chunk.iter().cloned()))
                .all(self.db.as_ref())
                .await?;
            by_tag.extend(rows.into_iter().map(|item| (item.rfid_tag.clone(), item)));
        }

        let rejected_set: HashSet<&str> = rejected.iter().map(String::as_str).collect();
        let mut report = ScanReport::default();
        for tag in unique {
            if rejected_set.contains(tag.as_str()) {
                report.not_found_tags.push(tag);
                continue;
            }
            match by_tag.remove(&tag) {
                Some(item) if tenant_id.is_some_and(|tenant| tenant != item.tenant_id) => {
                    report.foreign_items.push(item)
                }
                Some(item) => report.items.push(item),
                None => report.not_found_tags.push(tag),
            }
        }
        report.found = report.items.len();
        report.not_found = report.not_found_tags.len();
        report.rejected_tags = rejected;

        telemetry::record_scan_tags("found", report.found as u64);
        telemetry::record_scan_tags("foreign", report.foreign_items.len() as u64);
        telemetry::record_scan_tags("not_found", report.not_found as u64);
        telemetry::record_scan_tags("rejected", report.rejected_tags.len() as u64);
        debug!(
            found = report.found,
            foreign = report.foreign_items.len(),
            not_found = report.not_found,
            "Scan reconciled"
        );

        Ok(report)
    }
}

/// Trims every tag and drops repeats, keeping first occurrences in order.
fn dedupe_tags(tags: &[String]) -> Vec<String> {
    let mut seen = HashSet::with_capacity(tags.len());
    tags.iter()
        .map(|tag| tag.trim())
        .filter(|tag| seen.insert(*tag))
        .map(str::to_string)
        .collect()
}
