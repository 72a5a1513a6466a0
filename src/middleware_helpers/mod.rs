pub mod internal_auth;
pub mod request_id;

pub use internal_auth::{require_internal_secret, INTERNAL_SECRET_HEADER};
pub use request_id::{request_id_middleware, REQUEST_ID_HEADER};
