use std::collections::HashSet;
use tracing::{debug, instrument, warn};
use uuid::Uuid;

use crate::{entities::product, errors::ServiceError, repositories::DynStore};

/// Catalog data an order is priced from
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidatedOrder {
    pub product: product::Model,
    pub final_price_cents: i64,
    pub offer_name: Option<String>,
    pub offer_id: Option<Uuid>,
    pub checkout_id: Option<Uuid>,
}

/// An accepted order bump and what it adds to the order
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BumpLine {
    pub bump_id: Uuid,
    pub product_id: Uuid,
    pub name: String,
    pub price_cents: i64,
}

#[derive(Clone)]
pub struct OrderValidator {
    store: DynStore,
}

impl OrderValidator {
    pub fn new(store: DynStore) -> Self {
        Self { store }
    }

    /// Resolves product, offer and checkout references.
    ///
    /// A missing product and a bad offer are fatal. A checkout that does not
    /// belong to the product is dropped and the order proceeds without it.
    #[instrument(skip(self))]
    pub async fn validate(
        &self,
        product_id: Uuid,
        offer_id: Option<Uuid>,
        checkout_id: Option<Uuid>,
    ) -> Result<ValidatedOrder, ServiceError> {
        let product = self
            .store
            .find_product(product_id)
            .await?
            .filter(|p| p.active)
            .ok_or(ServiceError::ProductNotFound(product_id))?;

        let checkout_id = match checkout_id {
            Some(id) => match self.store.find_checkout(id).await? {
                Some(checkout) if checkout.product_id == product.id => Some(id),
                _ => {
                    warn!(checkout_id = %id, "checkout does not belong to product, dropping");
                    None
                }
            },
            None => None,
        };

        let (final_price_cents, offer_name, offer_id) = match offer_id {
            Some(id) => {
                let offer = self
                    .store
                    .find_offer(id)
                    .await?
                    .ok_or_else(|| ServiceError::InvalidOffer(format!("offer {} not found", id)))?;
                if offer.product_id != product.id {
                    return Err(ServiceError::InvalidOffer(format!(
                        "offer {} does not belong to product {}",
                        id, product.id
                    )));
                }
                if !offer.active {
                    return Err(ServiceError::InvalidOffer(format!("offer {} is inactive", id)));
                }
                (offer.price_cents, Some(offer.name), Some(offer.id))
            }
            None => (product.price_cents, None, None),
        };

        Ok(ValidatedOrder {
            product,
            final_price_cents,
            offer_name,
            offer_id,
            checkout_id,
        })
    }

    /// Resolves requested order bumps. Unknown, inactive and foreign bumps are
    /// skipped rather than failing the order.
    #[instrument(skip(self, bump_ids), fields(requested = bump_ids.len()))]
    pub async fn resolve_order_bumps(
        &self,
        product_id: Uuid,
        bump_ids: &[Uuid],
    ) -> Result<Vec<BumpLine>, ServiceError> {
        let mut seen = HashSet::new();
        let mut lines = Vec::new();

        for &bump_id in bump_ids {
            if !seen.insert(bump_id) {
                continue;
            }
            let bump = match self.store.find_order_bump(bump_id).await? {
                Some(bump) if bump.active && bump.product_id == product_id => bump,
                _ => {
                    debug!(%bump_id, "skipping unusable order bump");
                    continue;
                }
            };
            let bump_product = match self.store.find_product(bump.bump_product_id).await? {
                Some(p) if p.active => p,
                _ => {
                    debug!(%bump_id, "bump product unavailable, skipping");
                    continue;
                }
            };

            let mut price_cents = bump_product.price_cents;
            if let Some(offer_id) = bump.offer_id {
                match self.store.find_offer(offer_id).await? {
                    Some(offer) if offer.active && offer.product_id == bump_product.id => {
                        price_cents = offer.price_cents;
                    }
                    _ => debug!(%bump_id, %offer_id, "bump offer unusable, using product price"),
                }
            }

            lines.push(BumpLine {
                bump_id,
                product_id: bump_product.id,
                name: bump_product.name,
                price_cents,
            });
        }
        Ok(lines)
    }
}
