//! Inbound gateway webhooks and outbound merchant notifications.

pub mod delivery;
pub mod ingestion;
pub mod url_guard;

pub use delivery::{
    event_for_status, DispatchSummary, RetrySummary, WebhookDispatcher, PURCHASE_APPROVED,
    PURCHASE_CHARGEBACK, PURCHASE_REFUNDED,
};
pub use ingestion::{IngestOutcome, WebhookIngestor};
