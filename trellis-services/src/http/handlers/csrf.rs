//! CSRF token cookie.
//!
//! Safe methods pass through and receive the token cookie when missing.
//! Unsafe methods must echo the cookie's value in `X-CSRF-Token` (or a form
//! of it via the same header) or are rejected with 403.

use cookie::Cookie;
use rand::Rng;
use trellis_core::{config::CsrfOptions, http::HttpError};

use crate::{
    http::Ctx,
    middleware::{Middleware, MwFuture, Next},
};

pub const CSRF_HEADER: &str = "x-csrf-token";

pub struct CsrfGuard {
    options: CsrfOptions,
}

impl CsrfGuard {
    pub fn new(options: CsrfOptions) -> Self {
        CsrfGuard { options }
    }
}

fn is_safe(method: &http::Method) -> bool {
    matches!(
        *method,
        http::Method::GET | http::Method::HEAD | http::Method::OPTIONS | http::Method::TRACE
    )
}

fn fresh_token() -> String {
    let token: u128 = rand::thread_rng().gen();
    format!("{token:032x}")
}

impl Middleware for CsrfGuard {
    fn handle(&self, ctx: Ctx, next: Next) -> MwFuture {
        let cookie_name = self.options.cookie_name.clone();
        Box::pin(async move {
            let existing = ctx
                .request()
                .cookie(&cookie_name)
                .map(|c| c.value().to_string());

            if !is_safe(ctx.request().method()) {
                let presented = ctx.request().header(CSRF_HEADER);
                match (&existing, presented) {
                    (Some(expected), Some(presented)) if expected == presented => {}
                    _ => return Err(HttpError::Forbidden("csrf token mismatch".into())),
                }
            }

            let mut response = next.run(ctx).await?;
            if existing.is_none() {
                let mut cookie = Cookie::new(cookie_name, fresh_token());
                cookie.set_path("/");
                response.set_cookie(cookie);
            }
            Ok(response)
        })
    }
}

#[cfg(test)]
mod tests {
    use std::rc::Rc;

    use futures::executor::block_on;
    use trellis_core::http::{Request, Response};

    use super::*;
    use crate::{
        common::cancel::Canceller,
        http::AppServices,
        middleware::{handler_fn, Chain},
    };

    fn run(request: Request) -> Result<Response, HttpError> {
        let services = AppServices::new(
            Rc::new(trellis_core::signal::SignalHub::new()),
            Rc::new(trellis_core::cache::MemoryRepository::new()),
        );
        let ctx = Ctx::new(request, services, 1, Canceller::new());
        let chain = Chain::new(
            vec![Rc::new(CsrfGuard::new(CsrfOptions::default()))],
            handler_fn(|_| async { Ok(Response::text("ok")) }),
        );
        block_on(chain.run(ctx))
    }

    #[test]
    fn test_get_receives_token_cookie() {
        let response = run(Request::builder().uri("/form").build().unwrap()).unwrap();
        let cookies: Vec<_> = futures::executor::block_on(response.into_transport())
            .headers()
            .get_all(http::header::SET_COOKIE)
            .iter()
            .cloned()
            .collect();
        assert_eq!(cookies.len(), 1);
        assert!(cookies[0].to_str().unwrap().starts_with("xsrf-token="));
    }

    #[test]
    fn test_unsafe_method_without_token_is_forbidden() {
        let result = run(Request::builder()
            .method(http::Method::POST)
            .uri("/form")
            .build()
            .unwrap());
        assert!(matches!(result, Err(HttpError::Forbidden(_))));
    }

    #[test]
    fn test_unsafe_method_with_matching_token_passes() {
        let result = run(Request::builder()
            .method(http::Method::POST)
            .uri("/form")
            .header("cookie", "xsrf-token=sesame")
            .header(CSRF_HEADER, "sesame")
            .build()
            .unwrap());
        assert!(result.is_ok());
    }

    #[test]
    fn test_mismatched_token_is_forbidden() {
        let result = run(Request::builder()
            .method(http::Method::POST)
            .uri("/form")
            .header("cookie", "xsrf-token=sesame")
            .header(CSRF_HEADER, "open-barley")
            .build()
            .unwrap());
        assert!(matches!(result, Err(HttpError::Forbidden(_))));
    }
}
