// Checkout pipeline
pub mod coupons;
pub mod order_validator;
pub mod orders;

// Status convergence shared by webhooks and the sweeper
pub mod order_status;
pub mod reconciliation;

pub use coupons::CouponService;
pub use order_status::{OrderStatusService, StatusChange};
pub use orders::OrderService;
pub use reconciliation::ReconciliationService;
