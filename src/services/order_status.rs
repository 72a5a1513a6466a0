use std::sync::Arc;

use tracing::{debug, error, info, instrument};

use crate::{
    entities::{order::Model as OrderModel, OrderStatus},
    errors::ServiceError,
    repositories::DynStore,
    webhooks::{event_for_status, WebhookDispatcher},
};

/// Result of applying a provider-reported status to an order
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StatusChange {
    /// The order moved to the new status
    Applied(OrderModel),
    /// Illegal transition, already in that status, or another writer won
    Unchanged(OrderModel),
}

impl StatusChange {
    pub fn order(&self) -> &OrderModel {
        match self {
            StatusChange::Applied(order) | StatusChange::Unchanged(order) => order,
        }
    }

    pub fn applied(&self) -> bool {
        matches!(self, StatusChange::Applied(_))
    }
}

/// Single entry point for order status changes.
///
/// Webhooks, reconciliation and synchronous gateway responses all go
/// through `apply_status`.
#[derive(Clone)]
pub struct OrderStatusService {
    store: DynStore,
    dispatcher: Arc<WebhookDispatcher>,
}

impl OrderStatusService {
    pub fn new(store: DynStore, dispatcher: Arc<WebhookDispatcher>) -> Self {
        Self { store, dispatcher }
    }

    /// Moves `order` to `next` if the transition is legal from the status
    /// currently stored.
    ///
    /// The write is conditional on the expected predecessor, so two callers
    /// racing on the same order see exactly one `Applied`. Only that caller
    /// dispatches the merchant event for the new status (`purchase_approved`,
    /// `purchase_refunded` or `purchase_chargeback`).
    #[instrument(skip(self, order), fields(order_id = %order.id, from = %order.status, to = %next))]
    pub async fn apply_status(
        &self,
        order: &OrderModel,
        next: OrderStatus,
        source: &str,
    ) -> Result<StatusChange, ServiceError> {
        if order.status == next {
            debug!("order already in target status");
            return Ok(StatusChange::Unchanged(order.clone()));
        }
        let Some(expected) = OrderStatus::required_predecessor(next) else {
            return Ok(StatusChange::Unchanged(order.clone()));
        };
        if order.status != expected {
            debug!("transition not allowed, ignoring");
            return Ok(StatusChange::Unchanged(order.clone()));
        }

        let Some(updated) = self
            .store
            .transition_order_status(order.id, expected, next)
            .await?
        else {
            debug!("order changed concurrently, ignoring");
            return Ok(StatusChange::Unchanged(order.clone()));
        };

        info!("order status updated");
        metrics::counter!(
            "checkout_order_transitions_total",
            1,
            "to" => next.to_string(),
            "source" => source.to_string()
        );

        if let Some(event) = event_for_status(next) {
            if let Err(err) = self.dispatcher.dispatch_order_event(&updated, event).await {
                error!(error = %err, event, "merchant event dispatch failed");
            }
        }

        Ok(StatusChange::Applied(updated))
    }
}
