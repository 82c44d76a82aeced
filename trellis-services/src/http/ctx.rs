//! Per-request context.
//!
//! One `Ctx` exists per request and is owned by the handler chain for the
//! request's lifetime; clones are cheap handles to the same state. It
//! bundles the request, the staged response, resolved params, the attribute
//! bag, a per-request view of the engine's singletons and the cancellation
//! token.

use std::{
    any::Any,
    cell::{Ref, RefCell, RefMut},
    collections::HashMap,
    rc::Rc,
};

use trellis_core::{
    cache::Repository,
    http::{ParamValue, PathParams, Request, Response},
    signal::SignalHub,
};

use crate::{common::cancel::{Canceller, Waiter}, rate_limit::RateLimitService, router::Route};

/// The engine singletons a request may reach: the signal hub, the cache
/// repository and the rate-limit service.
#[derive(Clone)]
pub struct AppServices {
    pub hub: Rc<SignalHub>,
    pub cache: Rc<dyn Repository>,
    pub rate_limiter: Option<Rc<RateLimitService>>,
}

impl AppServices {
    pub fn new(hub: Rc<SignalHub>, cache: Rc<dyn Repository>) -> Self {
        AppServices {
            hub,
            cache,
            rate_limiter: None,
        }
    }
}

struct CtxInner {
    request: Request,
    response: RefCell<Response>,
    params: RefCell<PathParams>,
    attributes: RefCell<HashMap<String, Rc<dyn Any>>>,
    route: RefCell<Option<Rc<Route>>>,
    services: AppServices,
    canceller: Canceller,
    request_id: u64,
}

#[derive(Clone)]
pub struct Ctx {
    inner: Rc<CtxInner>,
}

impl Ctx {
    pub(crate) fn new(
        request: Request,
        services: AppServices,
        request_id: u64,
        canceller: Canceller,
    ) -> Self {
        Ctx {
            inner: Rc::new(CtxInner {
                request,
                response: RefCell::new(Response::ok()),
                params: RefCell::new(PathParams::new()),
                attributes: RefCell::new(HashMap::new()),
                route: RefCell::new(None),
                services,
                canceller,
                request_id,
            }),
        }
    }

    pub fn request(&self) -> &Request {
        &self.inner.request
    }

    pub fn request_id(&self) -> u64 {
        self.inner.request_id
    }

    pub fn params(&self) -> Ref<'_, PathParams> {
        self.inner.params.borrow()
    }

    pub fn param(&self, name: &str) -> Option<ParamValue> {
        self.inner.params.borrow().get(name).cloned()
    }

    pub(crate) fn set_params(&self, params: PathParams) {
        *self.inner.params.borrow_mut() = params;
    }

    pub fn route(&self) -> Option<Rc<Route>> {
        self.inner.route.borrow().clone()
    }

    pub(crate) fn set_route(&self, route: Rc<Route>) {
        *self.inner.route.borrow_mut() = Some(route);
    }

    /// The response under construction. Handlers normally build and return
    /// their own [`Response`]; this slot exists so middleware can decorate
    /// engine-produced responses (the not-found path runs the global chain
    /// against it).
    pub fn staged_response(&self) -> RefMut<'_, Response> {
        self.inner.response.borrow_mut()
    }

    pub(crate) fn take_staged(&self) -> Response {
        std::mem::take(&mut *self.inner.response.borrow_mut())
    }

    pub fn set_attribute<T: Any>(&self, key: impl Into<String>, value: T) {
        self.inner
            .attributes
            .borrow_mut()
            .insert(key.into(), Rc::new(value));
    }

    pub fn attribute<T: Any>(&self, key: &str) -> Option<Rc<T>> {
        self.inner
            .attributes
            .borrow()
            .get(key)
            .cloned()
            .and_then(|any| any.downcast::<T>().ok())
    }

    pub fn services(&self) -> &AppServices {
        &self.inner.services
    }

    pub fn hub(&self) -> &Rc<SignalHub> {
        &self.inner.services.hub
    }

    pub fn cache(&self) -> Rc<dyn Repository> {
        self.inner.services.cache.clone()
    }

    pub fn is_cancelled(&self) -> bool {
        self.inner.canceller.is_cancelled()
    }

    /// Future resolving when the request is cancelled (shutdown past the
    /// drain deadline, or a timeout middleware).
    pub fn cancelled(&self) -> Waiter {
        self.inner.canceller.waiter()
    }

    pub(crate) fn canceller(&self) -> &Canceller {
        &self.inner.canceller
    }

    #[cfg(test)]
    pub(crate) fn for_testing() -> Ctx {
        use trellis_core::cache::MemoryRepository;

        let request = Request::builder().uri("/").build().unwrap();
        let services = AppServices::new(
            Rc::new(SignalHub::new()),
            Rc::new(MemoryRepository::new()),
        );
        Ctx::new(request, services, 0, Canceller::new())
    }
}
