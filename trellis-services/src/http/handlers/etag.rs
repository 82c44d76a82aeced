//! ETag emission and `If-None-Match` revalidation for buffered responses.

use trellis_core::{config::EtagStrategy, http::Response, util::sha256_hex};

use crate::{
    http::Ctx,
    middleware::{Middleware, MwFuture, Next},
};

pub struct EtagHandler {
    strategy: EtagStrategy,
}

impl EtagHandler {
    pub fn new(strategy: EtagStrategy) -> Self {
        EtagHandler { strategy }
    }
}

impl Middleware for EtagHandler {
    fn handle(&self, ctx: Ctx, next: Next) -> MwFuture {
        let strategy = self.strategy;
        Box::pin(async move {
            let revalidate = matches!(
                *ctx.request().method(),
                http::Method::GET | http::Method::HEAD
            );
            let if_none_match = ctx
                .request()
                .header("if-none-match")
                .map(str::to_string);

            let mut response = next.run(ctx).await?;
            if strategy == EtagStrategy::Disabled
                || !revalidate
                || response.status() != http::StatusCode::OK
                || !response.is_buffered()
            {
                return Ok(response);
            }

            let digest = sha256_hex(response.body_bytes());
            let tag = match strategy {
                EtagStrategy::Strong => format!("\"{digest}\""),
                EtagStrategy::Weak => format!("W/\"{digest}\""),
                EtagStrategy::Disabled => unreachable!(),
            };

            if if_none_match.as_deref() == Some(tag.as_str()) {
                return Ok(Response::new(http::StatusCode::NOT_MODIFIED).header("etag", tag));
            }
            response.set_header("etag", tag);
            Ok(response)
        })
    }
}

#[cfg(test)]
mod tests {
    use std::rc::Rc;

    use futures::executor::block_on;
    use trellis_core::http::{HttpError, Request};

    use super::*;
    use crate::{
        common::cancel::Canceller,
        http::AppServices,
        middleware::{handler_fn, Chain},
    };

    fn run(strategy: EtagStrategy, request: Request) -> Result<Response, HttpError> {
        let services = AppServices::new(
            Rc::new(trellis_core::signal::SignalHub::new()),
            Rc::new(trellis_core::cache::MemoryRepository::new()),
        );
        let ctx = Ctx::new(request, services, 1, Canceller::new());
        let chain = Chain::new(
            vec![Rc::new(EtagHandler::new(strategy))],
            handler_fn(|_| async { Ok(Response::text("stable body")) }),
        );
        block_on(chain.run(ctx))
    }

    fn get() -> Request {
        Request::builder().uri("/doc").build().unwrap()
    }

    #[test]
    fn test_strong_etag_is_stamped() {
        let response = run(EtagStrategy::Strong, get()).unwrap();
        let tag = response.headers().get("etag").unwrap().to_str().unwrap();
        assert!(tag.starts_with('"') && tag.ends_with('"'));
    }

    #[test]
    fn test_weak_etag_prefix() {
        let response = run(EtagStrategy::Weak, get()).unwrap();
        let tag = response.headers().get("etag").unwrap().to_str().unwrap();
        assert!(tag.starts_with("W/\""));
    }

    #[test]
    fn test_if_none_match_revalidates() {
        let first = run(EtagStrategy::Strong, get()).unwrap();
        let tag = first
            .headers()
            .get("etag")
            .unwrap()
            .to_str()
            .unwrap()
            .to_string();

        let revalidation = run(
            EtagStrategy::Strong,
            Request::builder()
                .uri("/doc")
                .header("if-none-match", tag)
                .build()
                .unwrap(),
        )
        .unwrap();
        assert_eq!(revalidation.status(), http::StatusCode::NOT_MODIFIED);
    }

    #[test]
    fn test_disabled_stamps_nothing() {
        let response = run(EtagStrategy::Disabled, get()).unwrap();
        assert!(response.headers().get("etag").is_none());
    }
}
