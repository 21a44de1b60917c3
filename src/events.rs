//! # Workflow Events
//!
//! Fire-and-forget hand-off to the notification and accounting collaborators.
//! Workflows build an event after their transaction commits and pass it to the
//! [`EventDispatcher`], which runs the collaborator calls on a spawned task so
//! a transition never waits on them and never observes their failures.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;
use tracing::{Instrument, info, warn};
use uuid::Uuid;

/// Error type returned by external collaborators
pub type CollaboratorError = Box<dyn std::error::Error + Send + Sync>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum EventName {
    #[serde(rename = "pickup.created")]
    PickupCreated,
    #[serde(rename = "pickup.received")]
    PickupReceived,
    #[serde(rename = "delivery.created")]
    DeliveryCreated,
    #[serde(rename = "delivery.label_printed")]
    DeliveryLabelPrinted,
    #[serde(rename = "delivery.packaged")]
    DeliveryPackaged,
    #[serde(rename = "delivery.picked_up")]
    DeliveryPickedUp,
    #[serde(rename = "delivery.delivered")]
    DeliveryDelivered,
    #[serde(rename = "delivery.cancelled")]
    DeliveryCancelled,
}

impl EventName {
    pub fn as_str(&self) -> &'static str {
        match self {
            EventName::PickupCreated => "pickup.created",
            EventName::PickupReceived => "pickup.received",
            EventName::DeliveryCreated => "delivery.created",
            EventName::DeliveryLabelPrinted => "delivery.label_printed",
            EventName::DeliveryPackaged => "delivery.packaged",
            EventName::DeliveryPickedUp => "delivery.picked_up",
            EventName::DeliveryDelivered => "delivery.delivered",
            EventName::DeliveryCancelled => "delivery.cancelled",
        }
    }
}

impl fmt::Display for EventName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Minimal payload describing one committed transition
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct WorkflowEvent {
    pub name: EventName,
    pub tenant_id: Uuid,
    /// Pickup or delivery id
    pub batch_id: Uuid,
    /// Bag code or barcode
    pub reference: String,
    pub item_count: usize,
    pub occurred_at: DateTime<Utc>,
}

/// Accounting payload for a completed delivery
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DeliverySettlement {
    pub tenant_id: Uuid,
    pub delivery_id: Uuid,
    pub barcode: String,
    /// Delivered item count per item type
    pub item_type_counts: BTreeMap<Uuid, u64>,
}

#[async_trait]
pub trait NotificationSink: Send + Sync {
    async fn notify(&self, event: &WorkflowEvent) -> Result<(), CollaboratorError>;
}

#[async_trait]
pub trait AccountingSync: Send + Sync {
    async fn delivery_completed(
        &self,
        settlement: &DeliverySettlement,
    ) -> Result<(), CollaboratorError>;
}

/// Writes each event to the log; the default sink.
#[derive(Debug, Default, Clone)]
pub struct TracingNotificationSink;

#[async_trait]
impl NotificationSink for TracingNotificationSink {
    async fn notify(&self, event: &WorkflowEvent) -> Result<(), CollaboratorError> {
        info!(
            event = %event.name,
            tenant_id = %event.tenant_id,
            batch_id = %event.batch_id,
            reference = %event.reference,
            item_count = event.item_count,
            "Workflow event"
        );
        Ok(())
    }
}

/// Accounting collaborator used when no external system is configured.
#[derive(Debug, Default, Clone)]
pub struct NoopAccountingSync;

#[async_trait]
impl AccountingSync for NoopAccountingSync {
    async fn delivery_completed(
        &self,
        settlement: &DeliverySettlement,
    ) -> Result<(), CollaboratorError> {
        tracing::debug!(
            delivery_id = %settlement.delivery_id,
            item_types = settlement.item_type_counts.len(),
            "Accounting sync disabled; settlement dropped"
        );
        Ok(())
    }
}

#[derive(Clone)]
pub struct EventDispatcher {
    notifier: Arc<dyn NotificationSink>,
    accounting: Arc<dyn AccountingSync>,
}

impl EventDispatcher {
    pub fn new(notifier: Arc<dyn NotificationSink>, accounting: Arc<dyn AccountingSync>) -> Self {
        Self {
            notifier,
            accounting,
        }
    }

    /// Dispatcher with the logging-only collaborators.
    pub fn logging_only() -> Self {
        Self::new(Arc::new(TracingNotificationSink), Arc::new(NoopAccountingSync))
    }

    /// Queues a notification. Returns immediately.
    pub fn emit(&self, event: WorkflowEvent) {
        let notifier = Arc::clone(&self.notifier);
        let span = tracing::info_span!("notify", event = %event.name, batch_id = %event.batch_id);
        spawn_detached(
            async move {
                if let Err(err) = notifier.notify(&event).await {
                    warn!(
                        event = %event.name,
                        batch_id = %event.batch_id,
                        error = %err,
                        "Notification dispatch failed"
                    );
                }
            }
            .instrument(span),
        );
    }

    /// Queues the accounting call for a completed delivery. Returns immediately.
    pub fn settle(&self, settlement: DeliverySettlement) {
        let accounting = Arc::clone(&self.accounting);
        let span = tracing::info_span!("settle", delivery_id = %settlement.delivery_id);
        spawn_detached(
            async move {
                if let Err(err) = accounting.delivery_completed(&settlement).await {
                    warn!(
                        delivery_id = %settlement.delivery_id,
                        tenant_id = %settlement.tenant_id,
                        error = %err,
                        "Accounting sync failed"
                    );
                }
            }
            .instrument(span),
        );
    }
}

impl Default for EventDispatcher {
    fn default() -> Self {
        Self::logging_only()
    }
}

impl fmt::Debug for EventDispatcher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventDispatcher").finish_non_exhaustive()
    }
}

fn spawn_detached<F>(future: F)
where
    F: std::future::Future<Output = ()> + Send + 'static,
{
    match tokio::runtime::Handle::try_current() {
        Ok(handle) => {
            handle.spawn(future);
        }
        Err(_) => warn!("No async runtime available; collaborator call dropped"),
    }
}
