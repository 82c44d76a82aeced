//! Request/response model and the error kinds the engine converts to
//! responses.

use std::time::Duration;

use http::{Method, StatusCode};

pub mod body;
pub mod client_ip;
pub mod params;
pub mod range;
mod request;
mod response;

pub use body::{Body, BodyError};
pub use params::{ParamInfo, ParamKind, ParamValue, PathParams};
pub use request::{Request, RequestBuilder};
pub use response::{generate_response, BodyFilter, Response};

use crate::AnyError;

/// Everything that can terminate a request's handler chain. The engine's
/// terminal handler converts these to HTTP responses; only `Internal` (and
/// timeouts surfaced as 5xx) also produce a routing-error event.
#[derive(thiserror::Error, Debug)]
pub enum HttpError {
    #[error("no route matched")]
    NotFound,
    #[error("method not allowed")]
    MethodNotAllowed { allow: Vec<Method> },
    #[error("{message}")]
    Validation { status: StatusCode, message: String },
    #[error("rate limited")]
    RateLimited { retry_after: Duration },
    #[error("request body exceeds the configured limit")]
    BodyTooLarge,
    #[error("forbidden: {0}")]
    Forbidden(String),
    #[error("request timed out")]
    Timeout,
    #[error("internal error: {0}")]
    Internal(#[source] AnyError),
}

impl HttpError {
    pub fn status(&self) -> StatusCode {
        match self {
            HttpError::NotFound => StatusCode::NOT_FOUND,
            HttpError::MethodNotAllowed { .. } => StatusCode::METHOD_NOT_ALLOWED,
            HttpError::Validation { status, .. } => *status,
            HttpError::RateLimited { .. } => StatusCode::TOO_MANY_REQUESTS,
            HttpError::BodyTooLarge => StatusCode::PAYLOAD_TOO_LARGE,
            HttpError::Forbidden(_) => StatusCode::FORBIDDEN,
            HttpError::Timeout => StatusCode::GATEWAY_TIMEOUT,
            HttpError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Uncaught failures that surface as a routing-error event.
    pub fn is_internal(&self) -> bool {
        matches!(self, HttpError::Internal(_))
    }

    pub fn to_response(&self) -> Response {
        let status = self.status();
        let mut resp = Response::text(
            status
                .canonical_reason()
                .unwrap_or_else(|| status.as_str()),
        )
        .with_status(status);
        match self {
            HttpError::MethodNotAllowed { allow } => {
                resp.set_header("allow", allow_header(allow));
            }
            HttpError::RateLimited { retry_after } => {
                let secs = (retry_after.as_secs_f64().ceil() as u64).max(1);
                resp.set_header("retry-after", secs.to_string());
            }
            HttpError::Validation { message, .. } => {
                resp = Response::text(message).with_status(status);
            }
            _ => {}
        }
        resp
    }
}

impl From<AnyError> for HttpError {
    fn from(error: AnyError) -> Self {
        HttpError::Internal(error)
    }
}

impl From<BodyError> for HttpError {
    fn from(error: BodyError) -> Self {
        match error {
            BodyError::TooLarge => HttpError::BodyTooLarge,
            BodyError::Io(e) => HttpError::Internal(e.into()),
        }
    }
}

/// Sorted, comma-separated method list for `Allow`.
pub fn allow_header(methods: &[Method]) -> String {
    let mut names: Vec<&str> = methods.iter().map(Method::as_str).collect();
    names.sort_unstable();
    names.dedup();
    names.join(", ")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_allow_header_sorted() {
        assert_eq!(
            allow_header(&[Method::POST, Method::GET, Method::POST]),
            "GET, POST"
        );
    }

    #[test]
    fn test_error_statuses() {
        assert_eq!(HttpError::NotFound.status(), StatusCode::NOT_FOUND);
        assert_eq!(
            HttpError::RateLimited {
                retry_after: Duration::from_secs(3)
            }
            .status(),
            StatusCode::TOO_MANY_REQUESTS
        );
        assert_eq!(HttpError::Timeout.status(), StatusCode::GATEWAY_TIMEOUT);
        let resp = HttpError::MethodNotAllowed {
            allow: vec![Method::PUT, Method::GET],
        }
        .to_response();
        assert_eq!(
            resp.headers().get("allow").unwrap().to_str().unwrap(),
            "GET, PUT"
        );
    }
}
