//! Request-scoped timeout middleware.
//!
//! On expiry the rest of the chain is cancelled and 504 surfaces unless a
//! handler upstream catches the error.

use std::time::Duration;

use trellis_core::http::HttpError;

use crate::{
    http::Ctx,
    middleware::{Middleware, MwFuture, Next},
};

pub struct TimeoutMiddleware {
    timeout: Duration,
}

impl TimeoutMiddleware {
    pub fn new(timeout: Duration) -> Self {
        TimeoutMiddleware { timeout }
    }
}

impl Middleware for TimeoutMiddleware {
    fn handle(&self, ctx: Ctx, next: Next) -> MwFuture {
        let timeout = self.timeout;
        Box::pin(async move {
            let canceller = ctx.canceller().clone();
            match monoio::time::timeout(timeout, next.run(ctx)).await {
                Ok(result) => result,
                Err(_) => {
                    canceller.cancel();
                    Err(HttpError::Timeout)
                }
            }
        })
    }
}
