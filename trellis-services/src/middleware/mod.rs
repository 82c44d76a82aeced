//! The `(ctx, next)` middleware chain.
//!
//! Middlewares and handlers are object-safe and return boxed local futures,
//! so chains can be assembled dynamically at engine build time from named
//! registry entries and inline instances. A middleware short-circuits by
//! returning without calling [`Next::run`]; errors propagate to the engine's
//! terminal handler.

use std::{future::Future, rc::Rc};

use futures::future::LocalBoxFuture;
use trellis_core::http::{HttpError, Response};

use crate::{http::Ctx, router::RouterBuildError};

mod registry;
pub use registry::MiddlewareRegistry;

pub type MwFuture = LocalBoxFuture<'static, Result<Response, HttpError>>;

pub trait Middleware {
    fn handle(&self, ctx: Ctx, next: Next) -> MwFuture;
}

pub trait Handler {
    fn call(&self, ctx: Ctx) -> MwFuture;
}

struct FnHandler<F>(F);

impl<F, Fut> Handler for FnHandler<F>
where
    F: Fn(Ctx) -> Fut,
    Fut: Future<Output = Result<Response, HttpError>> + 'static,
{
    fn call(&self, ctx: Ctx) -> MwFuture {
        Box::pin((self.0)(ctx))
    }
}

/// Wrap an async closure as a route handler.
pub fn handler_fn<F, Fut>(f: F) -> Rc<dyn Handler>
where
    F: Fn(Ctx) -> Fut + 'static,
    Fut: Future<Output = Result<Response, HttpError>> + 'static,
{
    Rc::new(FnHandler(f))
}

struct FnMiddleware<F>(F);

impl<F, Fut> Middleware for FnMiddleware<F>
where
    F: Fn(Ctx, Next) -> Fut,
    Fut: Future<Output = Result<Response, HttpError>> + 'static,
{
    fn handle(&self, ctx: Ctx, next: Next) -> MwFuture {
        Box::pin((self.0)(ctx, next))
    }
}

/// Wrap an async closure as a middleware.
pub fn middleware_fn<F, Fut>(f: F) -> Rc<dyn Middleware>
where
    F: Fn(Ctx, Next) -> Fut + 'static,
    Fut: Future<Output = Result<Response, HttpError>> + 'static,
{
    Rc::new(FnMiddleware(f))
}

/// An ordered chain entry: either resolved late by name at engine build, or
/// an instance supplied inline.
#[derive(Clone)]
pub enum MiddlewareEntry {
    Named(String),
    Instance(Rc<dyn Middleware>),
}

impl From<&str> for MiddlewareEntry {
    fn from(name: &str) -> Self {
        MiddlewareEntry::Named(name.to_string())
    }
}

impl From<String> for MiddlewareEntry {
    fn from(name: String) -> Self {
        MiddlewareEntry::Named(name)
    }
}

impl From<Rc<dyn Middleware>> for MiddlewareEntry {
    fn from(mw: Rc<dyn Middleware>) -> Self {
        MiddlewareEntry::Instance(mw)
    }
}

/// A `without_middleware` target. Name exclusions match named entries only;
/// instance exclusions match instance entries only.
#[derive(Clone)]
pub enum Exclusion {
    Name(String),
    Instance(Rc<dyn Middleware>),
}

impl From<&str> for Exclusion {
    fn from(name: &str) -> Self {
        Exclusion::Name(name.to_string())
    }
}

impl From<String> for Exclusion {
    fn from(name: String) -> Self {
        Exclusion::Name(name)
    }
}

impl From<Rc<dyn Middleware>> for Exclusion {
    fn from(mw: Rc<dyn Middleware>) -> Self {
        Exclusion::Instance(mw)
    }
}

struct ResolvedEntry {
    /// `Some` when this entry was referenced by name.
    name: Option<String>,
    mw: Rc<dyn Middleware>,
}

/// Resolve and flatten the stage lists (engine, router, groups, route) into
/// one chain: order-preserving concat, named entries resolved through the
/// registry, exclusions removed in a single top-down pass (first match only),
/// then reference-identity dedup keeping the first occurrence.
pub fn compose(
    stages: &[&[MiddlewareEntry]],
    exclusions: &[Exclusion],
    registry: &MiddlewareRegistry,
) -> Result<Vec<Rc<dyn Middleware>>, RouterBuildError> {
    let mut resolved = Vec::new();
    for stage in stages {
        for entry in *stage {
            resolved.push(match entry {
                MiddlewareEntry::Named(name) => ResolvedEntry {
                    mw: registry
                        .resolve(name)
                        .ok_or_else(|| RouterBuildError::UnknownMiddleware(name.clone()))?,
                    name: Some(name.clone()),
                },
                MiddlewareEntry::Instance(mw) => ResolvedEntry {
                    name: None,
                    mw: mw.clone(),
                },
            });
        }
    }

    for exclusion in exclusions {
        let position = resolved.iter().position(|entry| match exclusion {
            Exclusion::Name(name) => entry.name.as_deref() == Some(name.as_str()),
            Exclusion::Instance(mw) => {
                entry.name.is_none() && Rc::ptr_eq(&entry.mw, mw)
            }
        });
        if let Some(position) = position {
            resolved.remove(position);
        }
    }

    let mut seen: Vec<*const ()> = Vec::with_capacity(resolved.len());
    let mut chain = Vec::with_capacity(resolved.len());
    for entry in resolved {
        let ptr = Rc::as_ptr(&entry.mw) as *const ();
        if seen.contains(&ptr) {
            continue;
        }
        seen.push(ptr);
        chain.push(entry.mw);
    }
    Ok(chain)
}

/// A composed, frozen chain ending in the route handler.
#[derive(Clone)]
pub struct Chain {
    steps: Rc<[Rc<dyn Middleware>]>,
    endpoint: Rc<dyn Handler>,
}

impl Chain {
    pub fn new(steps: Vec<Rc<dyn Middleware>>, endpoint: Rc<dyn Handler>) -> Self {
        Chain {
            steps: steps.into(),
            endpoint,
        }
    }

    pub fn len(&self) -> usize {
        self.steps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    pub async fn run(&self, ctx: Ctx) -> Result<Response, HttpError> {
        Next {
            steps: self.steps.clone(),
            index: 0,
            endpoint: self.endpoint.clone(),
        }
        .run(ctx)
        .await
    }
}

/// Continuation into the rest of the chain; consuming it invokes the next
/// middleware or, at the end, the handler.
pub struct Next {
    steps: Rc<[Rc<dyn Middleware>]>,
    index: usize,
    endpoint: Rc<dyn Handler>,
}

impl Next {
    pub fn run(mut self, ctx: Ctx) -> MwFuture {
        match self.steps.get(self.index) {
            Some(mw) => {
                let mw = mw.clone();
                self.index += 1;
                mw.handle(ctx, self)
            }
            None => self.endpoint.call(ctx),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::cell::RefCell;

    use super::*;
    use crate::http::Ctx;

    fn recorder(tag: &'static str, log: Rc<RefCell<Vec<&'static str>>>) -> Rc<dyn Middleware> {
        middleware_fn(move |ctx, next| {
            let log = log.clone();
            async move {
                log.borrow_mut().push(tag);
                next.run(ctx).await
            }
        })
    }

    fn test_ctx() -> Ctx {
        Ctx::for_testing()
    }

    fn run_chain(chain: &Chain) -> Result<Response, HttpError> {
        futures::executor::block_on(chain.run(test_ctx()))
    }

    #[test]
    fn test_order_and_endpoint() {
        let log = Rc::new(RefCell::new(Vec::new()));
        let chain = Chain::new(
            vec![recorder("outer", log.clone()), recorder("inner", log.clone())],
            handler_fn(|_| async { Ok(Response::text("done")) }),
        );
        let resp = run_chain(&chain).unwrap();
        assert_eq!(resp.body_bytes(), b"done");
        assert_eq!(*log.borrow(), vec!["outer", "inner"]);
    }

    #[test]
    fn test_short_circuit_skips_downstream() {
        let log = Rc::new(RefCell::new(Vec::new()));
        let gate = middleware_fn(|_ctx, _next| async {
            Ok(Response::text("blocked").with_status(http::StatusCode::FORBIDDEN))
        });
        let chain = Chain::new(
            vec![gate, recorder("downstream", log.clone())],
            handler_fn(|_| async { Ok(Response::text("handler")) }),
        );
        let resp = run_chain(&chain).unwrap();
        assert_eq!(resp.status(), http::StatusCode::FORBIDDEN);
        assert!(log.borrow().is_empty());
    }

    #[test]
    fn test_compose_resolves_excludes_and_dedups() {
        let registry = MiddlewareRegistry::new();
        let log: Rc<RefCell<Vec<&'static str>>> = Rc::new(RefCell::new(Vec::new()));
        registry
            .register("auth", recorder("auth", log.clone()))
            .unwrap();
        registry
            .register("throttle", recorder("throttle", log.clone()))
            .unwrap();

        let shared = recorder("shared", log.clone());
        let engine_stage = vec![
            MiddlewareEntry::from("auth"),
            MiddlewareEntry::from(shared.clone()),
        ];
        let route_stage = vec![
            MiddlewareEntry::from("throttle"),
            // duplicate instance is dropped by reference identity
            MiddlewareEntry::from(shared.clone()),
        ];

        let chain = compose(
            &[&engine_stage, &route_stage],
            &[Exclusion::from("throttle")],
            &registry,
        )
        .unwrap();
        assert_eq!(chain.len(), 2);

        let chain = Chain::new(chain, handler_fn(|_| async { Ok(Response::ok()) }));
        run_chain(&chain).unwrap();
        assert_eq!(*log.borrow(), vec!["auth", "shared"]);
    }

    #[test]
    fn test_exclusion_removes_first_match_only() {
        let registry = MiddlewareRegistry::new();
        let log: Rc<RefCell<Vec<&'static str>>> = Rc::new(RefCell::new(Vec::new()));
        registry
            .register("trace", recorder("trace", log.clone()))
            .unwrap();

        let stage_a = vec![MiddlewareEntry::from("trace")];
        let stage_b = vec![MiddlewareEntry::from("trace")];
        let chain = compose(
            &[&stage_a, &stage_b],
            &[Exclusion::from("trace")],
            &registry,
        )
        .unwrap();
        // first occurrence removed; the survivor would be deduped anyway when
        // both resolve to the same instance, so one entry remains
        assert_eq!(chain.len(), 1);
    }

    #[test]
    fn test_unknown_name_is_a_build_error() {
        let registry = MiddlewareRegistry::new();
        let stage = vec![MiddlewareEntry::from("ghost")];
        assert!(matches!(
            compose(&[&stage], &[], &registry),
            Err(RouterBuildError::UnknownMiddleware(name)) if name == "ghost"
        ));
    }

    #[test]
    fn test_instance_exclusion_ignores_named_entries() {
        let registry = MiddlewareRegistry::new();
        let log: Rc<RefCell<Vec<&'static str>>> = Rc::new(RefCell::new(Vec::new()));
        let mw = recorder("only", log.clone());
        registry.register("only", mw.clone()).unwrap();

        let stage = vec![MiddlewareEntry::from("only")];
        let chain = compose(&[&stage], &[Exclusion::from(mw)], &registry).unwrap();
        // excluded by instance, but the entry was named: it stays
        assert_eq!(chain.len(), 1);
    }
}
