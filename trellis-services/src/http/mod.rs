//! HTTP services: the engine, the per-request context and the HTTP/1
//! connection service feeding it.

use http::HeaderValue;

pub mod core;
mod ctx;
pub mod engine;
pub mod handlers;

pub use self::core::{HttpConnService, HttpConnServiceFactory};
pub use ctx::{AppServices, Ctx};
pub use engine::{Engine, EngineBuilder, EngineOptions};

pub(crate) const CLOSE: &str = "close";
pub(crate) const KEEPALIVE: &str = "Keep-Alive";
#[allow(clippy::declare_interior_mutable_const)]
pub(crate) const CLOSE_VALUE: HeaderValue = HeaderValue::from_static(CLOSE);
#[allow(clippy::declare_interior_mutable_const)]
pub(crate) const KEEPALIVE_VALUE: HeaderValue = HeaderValue::from_static(KEEPALIVE);
