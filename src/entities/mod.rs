//! sea-orm entities for the checkout and payment tables.

pub mod affiliate;
pub mod checkout;
pub mod coupon;
pub mod coupon_product;
pub mod offer;
pub mod order;
pub mod order_bump;
pub mod outbound_webhook;
pub mod product;
pub mod webhook_delivery;

pub use coupon::DiscountType;
pub use order::OrderStatus;
