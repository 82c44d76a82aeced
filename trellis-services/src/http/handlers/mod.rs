//! Policy middlewares installed from configuration.

mod body_limit;
mod csrf;
mod etag;
mod ip_filter;

pub use body_limit::BodyLimit;
pub use csrf::{CsrfGuard, CSRF_HEADER};
pub use etag::EtagHandler;
pub use ip_filter::IpFilter;
