//! Request authentication and anti-abuse limits for gateway-facing routes.

pub mod rate_limit;
pub mod signature;

pub use rate_limit::{FixedWindowLimiter, RateLimiter, WindowLimit};
pub use rate_limit::{INVITE_LIST_LIMIT, REGISTER_LIMIT};
pub use signature::{sign, verify_signed_request};
pub use signature::{MAX_SKEW_SECONDS, SIGNATURE_HEADER, TIMESTAMP_HEADER};
