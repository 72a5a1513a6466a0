use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, instrument};
use utoipa::ToSchema;
use uuid::Uuid;
use validator::Validate;

use crate::{
    entities::{coupon::Model as CouponModel, DiscountType},
    errors::ServiceError,
    repositories::DynStore,
};

/// A coupon that was successfully redeemed on an order
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CouponRedemption {
    pub coupon_id: Uuid,
    pub code: String,
    pub discount_cents: i64,
}

/// Inputs for redeeming a coupon on one order
#[derive(Debug, Clone)]
pub struct RedeemCoupon<'a> {
    pub coupon_id: Uuid,
    pub product_id: Uuid,
    pub customer_email: &'a str,
    /// Total of the order including bumps
    pub gross_cents: i64,
    /// Price of the primary item alone (offer or product)
    pub primary_price_cents: i64,
}

#[derive(Debug, Clone, Deserialize, Validate, ToSchema)]
pub struct CouponPreviewRequest {
    #[validate(length(min = 1, max = 64))]
    pub code: String,
    pub product_id: Uuid,
    #[validate(range(min = 0))]
    pub amount_cents: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, ToSchema)]
pub struct CouponPreview {
    pub valid: bool,
    pub code: String,
    pub discount_cents: i64,
    pub final_amount_cents: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

/// Uppercases and strips everything but letters and digits.
pub fn normalize_coupon_code(raw: &str) -> String {
    raw.chars()
        .filter(|c| c.is_alphanumeric())
        .flat_map(char::to_uppercase)
        .collect()
}

/// Amount the coupon's discount is computed on.
pub fn discount_base(coupon: &CouponModel, gross_cents: i64, primary_price_cents: i64) -> i64 {
    if coupon.apply_to_order_bumps {
        gross_cents
    } else {
        primary_price_cents.min(gross_cents)
    }
}

/// Discount in minor units, clamped to `[0, gross_cents]`.
pub fn compute_discount(
    discount_type: DiscountType,
    value: i64,
    base_cents: i64,
    gross_cents: i64,
) -> i64 {
    let raw = match discount_type {
        DiscountType::Percentage => {
            (i128::from(base_cents.max(0)) * i128::from(value) / 100).clamp(0, i128::from(i64::MAX))
                as i64
        }
        DiscountType::Fixed => value,
    };
    raw.clamp(0, gross_cents.max(0))
}

#[derive(Clone)]
pub struct CouponService {
    store: DynStore,
}

impl CouponService {
    pub fn new(store: DynStore) -> Self {
        Self { store }
    }

    /// Redeems a coupon for an order.
    ///
    /// Returns `Ok(None)` whenever the coupon cannot be applied; a bad coupon
    /// never blocks checkout. Usage is consumed by a single conditional
    /// increment, so concurrent checkouts cannot exceed `max_uses`.
    #[instrument(skip(self, input), fields(coupon_id = %input.coupon_id, product_id = %input.product_id))]
    pub async fn redeem(
        &self,
        input: RedeemCoupon<'_>,
        now: DateTime<Utc>,
    ) -> Result<Option<CouponRedemption>, ServiceError> {
        let Some(coupon) = self.store.find_coupon(input.coupon_id).await? else {
            debug!("coupon not found, ignoring");
            return Ok(None);
        };
        if let Some(reason) = self.rejection(&coupon, input.product_id, now).await? {
            debug!(reason, "coupon not applicable, ignoring");
            return Ok(None);
        }

        if let Some(cap) = coupon.max_uses_per_customer {
            let used = self
                .store
                .count_customer_coupon_uses(coupon.id, input.customer_email)
                .await?;
            if used >= u64::try_from(cap.max(0)).unwrap_or(0) {
                debug!(used, cap, "per-customer coupon cap reached, ignoring");
                return Ok(None);
            }
        }

        let Some(updated) = self.store.try_increment_coupon_usage(coupon.id).await? else {
            info!(code = %coupon.code, "coupon exhausted");
            return Ok(None);
        };

        let base = discount_base(&updated, input.gross_cents, input.primary_price_cents);
        let discount_cents = compute_discount(
            updated.discount_type,
            updated.discount_value,
            base,
            input.gross_cents,
        );
        info!(
            code = %updated.code,
            uses = updated.uses_count,
            discount_cents,
            "coupon redeemed"
        );
        Ok(Some(CouponRedemption {
            coupon_id: updated.id,
            code: updated.code,
            discount_cents,
        }))
    }

    /// Computes what a code would discount without consuming it.
    #[instrument(skip(self, request), fields(product_id = %request.product_id))]
    pub async fn preview(
        &self,
        request: &CouponPreviewRequest,
        now: DateTime<Utc>,
    ) -> Result<CouponPreview, ServiceError> {
        request.validate()?;
        let product = self
            .store
            .find_product(request.product_id)
            .await?
            .ok_or(ServiceError::ProductNotFound(request.product_id))?;

        let code = normalize_coupon_code(&request.code);
        let rejected = |reason: &str| CouponPreview {
            valid: false,
            code: code.clone(),
            discount_cents: 0,
            final_amount_cents: request.amount_cents,
            reason: Some(reason.to_string()),
        };

        let Some(coupon) = self
            .store
            .find_coupon_by_code(product.vendor_id, &code)
            .await?
        else {
            return Ok(rejected("coupon not found"));
        };
        if let Some(reason) = self.rejection(&coupon, product.id, now).await? {
            return Ok(rejected(reason));
        }
        if !coupon.has_capacity() {
            return Ok(rejected("coupon usage limit reached"));
        }

        let discount_cents = compute_discount(
            coupon.discount_type,
            coupon.discount_value,
            request.amount_cents,
            request.amount_cents,
        );
        Ok(CouponPreview {
            valid: true,
            code,
            discount_cents,
            final_amount_cents: request.amount_cents - discount_cents,
            reason: None,
        })
    }

    async fn rejection(
        &self,
        coupon: &CouponModel,
        product_id: Uuid,
        now: DateTime<Utc>,
    ) -> Result<Option<&'static str>, ServiceError> {
        if !coupon.active {
            return Ok(Some("coupon is inactive"));
        }
        if !coupon.is_within_window(now) {
            return Ok(Some("coupon is outside its validity window"));
        }
        if !self
            .store
            .coupon_linked_to_product(coupon.id, product_id)
            .await?
        {
            return Ok(Some("coupon does not apply to this product"));
        }
        Ok(None)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::repositories::{CheckoutStore, InMemoryStore};
    use chrono::Duration;
    use proptest::prelude::*;
    use std::sync::Arc;

    fn coupon(product_ids: &[Uuid], store: &InMemoryStore) -> CouponModel {
        let model = CouponModel {
            id: Uuid::new_v4(),
            vendor_id: Uuid::new_v4(),
            code: "PROMO10".into(),
            discount_type: DiscountType::Percentage,
            discount_value: 10,
            active: true,
            starts_at: None,
            expires_at: None,
            max_uses: Some(1),
            max_uses_per_customer: None,
            uses_count: 0,
            apply_to_order_bumps: false,
            created_at: Utc::now(),
        };
        store.insert_coupon(model.clone(), product_ids);
        model
    }

    fn input(coupon_id: Uuid, product_id: Uuid) -> RedeemCoupon<'static> {
        RedeemCoupon {
            coupon_id,
            product_id,
            customer_email: "buyer@example.com",
            gross_cents: 9900,
            primary_price_cents: 9900,
        }
    }

    #[test]
    fn normalizes_codes() {
        assert_eq!(normalize_coupon_code(" promo-10! "), "PROMO10");
        assert_eq!(normalize_coupon_code("Black_Friday"), "BLACKFRIDAY");
    }

    #[test]
    fn percentage_over_100_is_clamped_to_gross() {
        assert_eq!(
            compute_discount(DiscountType::Percentage, 150, 10_000, 10_000),
            10_000
        );
    }

    #[test]
    fn fixed_discount_never_exceeds_gross() {
        assert_eq!(compute_discount(DiscountType::Fixed, 5_000, 3_000, 3_000), 3_000);
        assert_eq!(compute_discount(DiscountType::Fixed, -10, 3_000, 3_000), 0);
    }

    proptest! {
        #[test]
        fn discount_stays_within_bounds(
            value in 0i64..1_000,
            base in 0i64..10_000_000,
            extra in 0i64..1_000_000,
            percentage in any::<bool>(),
        ) {
            let gross = base + extra;
            let kind = if percentage { DiscountType::Percentage } else { DiscountType::Fixed };
            let discount = compute_discount(kind, value, base, gross);
            prop_assert!(discount >= 0);
            prop_assert!(discount <= gross);
        }
    }

    #[tokio::test]
    async fn redeems_linked_coupon_once() {
        let store = Arc::new(InMemoryStore::new());
        let product_id = Uuid::new_v4();
        let coupon = coupon(&[product_id], &store);
        let service = CouponService::new(store.clone());

        let first = service
            .redeem(input(coupon.id, product_id), Utc::now())
            .await
            .unwrap();
        assert_eq!(first.map(|r| r.discount_cents), Some(990));

        let second = service
            .redeem(input(coupon.id, product_id), Utc::now())
            .await
            .unwrap();
        assert!(second.is_none());
    }

    #[tokio::test]
    async fn unlinked_or_expired_coupon_is_a_no_op() {
        let store = Arc::new(InMemoryStore::new());
        let product_id = Uuid::new_v4();
        let service = CouponService::new(store.clone());

        let unlinked = coupon(&[], &store);
        assert!(service
            .redeem(input(unlinked.id, product_id), Utc::now())
            .await
            .unwrap()
            .is_none());

        let mut expired = coupon(&[product_id], &store);
        expired.expires_at = Some(Utc::now() - Duration::days(1));
        store.insert_coupon(expired.clone(), &[product_id]);
        assert!(service
            .redeem(input(expired.id, product_id), Utc::now())
            .await
            .unwrap()
            .is_none());

        let untouched = store.find_coupon(expired.id).await.unwrap().unwrap();
        assert_eq!(untouched.uses_count, 0);
    }

    #[tokio::test]
    async fn missing_coupon_is_a_no_op() {
        let service = CouponService::new(Arc::new(InMemoryStore::new()));
        let result = service
            .redeem(input(Uuid::new_v4(), Uuid::new_v4()), Utc::now())
            .await
            .unwrap();
        assert!(result.is_none());
    }

    #[tokio::test]
    async fn discount_base_excludes_bumps_unless_flagged() {
        let store = Arc::new(InMemoryStore::new());
        let product_id = Uuid::new_v4();
        let mut with_bumps = coupon(&[product_id], &store);
        with_bumps.apply_to_order_bumps = true;
        with_bumps.max_uses = None;
        store.insert_coupon(with_bumps.clone(), &[product_id]);
        let service = CouponService::new(store.clone());

        let mut order = input(with_bumps.id, product_id);
        order.gross_cents = 12_900;
        order.primary_price_cents = 9_900;
        let redeemed = service.redeem(order, Utc::now()).await.unwrap().unwrap();
        assert_eq!(redeemed.discount_cents, 1_290);

        let primary_only = coupon(&[product_id], &store);
        let mut order = input(primary_only.id, product_id);
        order.gross_cents = 12_900;
        order.primary_price_cents = 9_900;
        let redeemed = service.redeem(order, Utc::now()).await.unwrap().unwrap();
        assert_eq!(redeemed.discount_cents, 990);
    }

    #[tokio::test]
    async fn preview_does_not_consume_usage() {
        let store = Arc::new(InMemoryStore::new());
        let product = crate::entities::product::Model {
            id: Uuid::new_v4(),
            vendor_id: Uuid::new_v4(),
            name: "Course".into(),
            price_cents: 9900,
            active: true,
            created_at: Utc::now(),
        };
        store.insert_product(product.clone());
        let mut model = coupon(&[product.id], &store);
        model.vendor_id = product.vendor_id;
        store.insert_coupon(model.clone(), &[product.id]);

        let service = CouponService::new(store.clone());
        let preview = service
            .preview(
                &CouponPreviewRequest {
                    code: "promo-10".into(),
                    product_id: product.id,
                    amount_cents: 9900,
                },
                Utc::now(),
            )
            .await
            .unwrap();
        assert!(preview.valid);
        assert_eq!(preview.discount_cents, 990);
        assert_eq!(preview.final_amount_cents, 8910);

        let stored = store.find_coupon(model.id).await.unwrap().unwrap();
        assert_eq!(stored.uses_count, 0);
    }
}
