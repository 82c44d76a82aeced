//! Route registration, compilation and matching.

mod matcher;
mod pattern;
mod route;

pub use matcher::{normalize_path, MatchOutcome, RouteTable};
pub use pattern::{compile, CompiledPattern, ParamSpec, PatternError};
pub use route::{Route, RouteDef, RouteScope, Router};

use http::Method;

/// Errors raised while building the frozen route table. All of them are
/// fatal at boot.
#[derive(thiserror::Error, Debug)]
pub enum RouterBuildError {
    #[error(transparent)]
    Pattern(#[from] PatternError),
    #[error("duplicate route {method} {pattern}")]
    DuplicateRoute { method: Method, pattern: String },
    #[error("duplicate route name {0:?}")]
    DuplicateName(String),
    #[error("unknown middleware {0:?}")]
    UnknownMiddleware(String),
    #[error("middleware registry is frozen")]
    RegistryFrozen,
    #[error("configuration: {0}")]
    Config(String),
}
