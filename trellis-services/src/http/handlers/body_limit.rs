//! Request body size cap.
//!
//! A declared `Content-Length` over the limit is rejected up front with 413;
//! otherwise the limit is armed on the body so a chunked transfer fails as
//! soon as the accumulated bytes pass it.

use trellis_core::http::HttpError;

use crate::{
    http::Ctx,
    middleware::{Middleware, MwFuture, Next},
};

pub struct BodyLimit {
    max_bytes: u64,
}

impl BodyLimit {
    pub fn new(max_bytes: u64) -> Self {
        BodyLimit { max_bytes }
    }
}

impl Middleware for BodyLimit {
    fn handle(&self, ctx: Ctx, next: Next) -> MwFuture {
        let max_bytes = self.max_bytes;
        Box::pin(async move {
            if let Some(declared) = ctx.request().content_length() {
                if declared > max_bytes {
                    return Err(HttpError::BodyTooLarge);
                }
            }
            ctx.request().body().set_limit(max_bytes as usize);
            next.run(ctx).await
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

    fn ctx_for(request: Request) -> Ctx {
        let services = AppServices::new(
            Rc::new(trellis_core::signal::SignalHub::new()),
            Rc::new(trellis_core::cache::MemoryRepository::new()),
        );
        Ctx::new(request, services, 1, Canceller::new())
    }

    fn chain_with_limit(max: u64) -> Chain {
        Chain::new(
            vec![Rc::new(BodyLimit::new(max))],
            handler_fn(|ctx: Ctx| async move {
                ctx.request().bytes().await?;
                Ok(Response::text("read"))
            }),
        )
    }

    #[test]
    fn test_declared_length_over_limit_is_rejected() {
        block_on(async {
            let request = Request::builder()
                .method(http::Method::POST)
                .uri("/limited")
                .header("content-length", "10")
                .body_bytes(&b"0123456789"[..])
                .build()
                .unwrap();
            let result = chain_with_limit(5).run(ctx_for(request)).await;
            assert!(matches!(result, Err(HttpError::BodyTooLarge)));
        });
    }

    #[test]
    fn test_undeclared_body_fails_on_read() {
        block_on(async {
            // no content-length header: the armed limit trips during the read
            let request = Request::builder()
                .method(http::Method::POST)
                .uri("/limited")
                .body_bytes(&b"0123456789"[..])
                .build()
                .unwrap();
            let result = chain_with_limit(5).run(ctx_for(request)).await;
            assert!(matches!(result, Err(HttpError::BodyTooLarge)));
        });
    }

    #[test]
    fn test_small_body_passes() {
        block_on(async {
            let request = Request::builder()
                .method(http::Method::POST)
                .uri("/limited")
                .header("content-length", "3")
                .body_bytes(&b"abc"[..])
                .build()
                .unwrap();
            let result = chain_with_limit(5).run(ctx_for(request)).await;
            assert!(result.is_ok());
        });
    }
}
