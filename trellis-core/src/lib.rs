#[macro_use]
mod error;
pub use error::{AnyError, AnyResult};

pub mod cache;
pub mod config;
pub mod context;
pub mod event;
pub mod http;
pub mod listener;
pub mod signal;
pub mod util;
