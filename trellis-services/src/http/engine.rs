//! The request-processing engine.
//!
//! `Engine::handle` drives one request through the lifecycle: resolve the
//! client IP, emit before-routing, mark the request active, match a route,
//! run the composed chain, finalize, and emit after-routing and finished.
//! The finished event fires exactly once for every request that reaches the
//! engine, including ones that never match or that fail inside the chain.

use std::{
    cell::{Cell, RefCell},
    collections::{HashMap, HashSet},
    rc::Rc,
    time::{Duration, Instant, SystemTime},
};

use http::{Method, StatusCode};
use trellis_core::{
    cache::{MemoryRepository, ObservedRepository, Repository},
    config::{EngineConfig, RoutingOptions, TrustedProxyOptions},
    event::{
        AfterRoutingEvent, BeforeRoutingEvent, Event, RequestFinishedEvent, RequestStartedEvent,
        RouteMatchedEvent, RouteNotFoundEvent, RoutingErrorEvent, SenderId,
    },
    http::{allow_header, client_ip::resolve_client_ip, HttpError, Request, Response},
    signal::SignalHub,
};

use super::{
    ctx::{AppServices, Ctx},
    handlers::{BodyLimit, CsrfGuard, EtagHandler, IpFilter},
};
use crate::{
    common::cancel::Canceller,
    middleware::{
        compose, handler_fn, Chain, Handler, Middleware, MiddlewareEntry, MiddlewareRegistry,
    },
    rate_limit::{RateLimitMiddleware, RateLimitService},
    router::{
        compile, normalize_path, MatchOutcome, Route, RouteDef, RouteScope, RouteTable, Router,
        RouterBuildError,
    },
};

#[derive(Clone, Default)]
struct ActiveRequests(Rc<RefCell<HashSet<u64>>>);

impl ActiveRequests {
    fn insert(&self, id: u64) {
        self.0.borrow_mut().insert(id);
    }

    fn remove(&self, id: u64) {
        self.0.borrow_mut().remove(&id);
    }

    fn len(&self) -> usize {
        self.0.borrow().len()
    }
}

pub struct EngineOptions {
    pub routing: RoutingOptions,
    pub trusted_proxies: TrustedProxyOptions,
    pub drain_deadline: Duration,
}

pub struct Engine {
    table: RouteTable,
    /// Engine-level middleware ending in the not-found terminal; the 404
    /// path runs through it so global middleware can decorate the response.
    global_chain: Chain,
    services: AppServices,
    options: EngineOptions,
    active: ActiveRequests,
    cancellers: RefCell<HashMap<u64, Canceller>>,
    next_id: Cell<u64>,
    accepting: Cell<bool>,
}

impl Engine {
    pub fn builder() -> EngineBuilder {
        EngineBuilder::with_config(EngineConfig::default())
    }

    pub fn hub(&self) -> &Rc<SignalHub> {
        &self.services.hub
    }

    pub fn services(&self) -> &AppServices {
        &self.services
    }

    pub fn routes(&self) -> &[Rc<Route>] {
        self.table.routes()
    }

    pub fn active_requests(&self) -> usize {
        self.active.len()
    }

    pub fn is_accepting(&self) -> bool {
        self.accepting.get()
    }

    pub fn stop_accepting(&self) {
        self.accepting.set(false);
    }

    /// Drive one request through the full lifecycle.
    pub async fn handle(&self, request: Request) -> Response {
        let request_id = self.next_id.get();
        self.next_id.set(request_id + 1);
        let sender: Option<SenderId> = Some(request_id);
        let started_at = Instant::now();
        let hub = self.services.hub.clone();

        if let Some(ip) = resolve_client_ip(
            request.peer_ip(),
            request.headers(),
            &self.options.trusted_proxies,
        ) {
            request.set_client_ip(ip);
        }
        let method = request.method().clone();
        let raw_path = request.path().to_string();

        hub.emit(
            sender,
            Event::BeforeRouting(BeforeRoutingEvent {
                at: SystemTime::now(),
                request_id,
                method: method.clone(),
                path: raw_path.clone(),
            }),
        );

        self.active.insert(request_id);
        let canceller = Canceller::new();
        self.cancellers
            .borrow_mut()
            .insert(request_id, canceller.clone());
        hub.emit(
            sender,
            Event::RequestStarted(RequestStartedEvent {
                at: SystemTime::now(),
                request_id,
            }),
        );

        let ctx = Ctx::new(request, self.services.clone(), request_id, canceller);
        let (response, route) = self.dispatch(&method, &raw_path, ctx).await;

        hub.emit(
            sender,
            Event::AfterRouting(AfterRoutingEvent {
                at: SystemTime::now(),
                request_id,
                status: response.status(),
                route,
            }),
        );

        self.active.remove(request_id);
        self.cancellers.borrow_mut().remove(&request_id);
        hub.emit(
            sender,
            Event::RequestFinished(RequestFinishedEvent {
                at: SystemTime::now(),
                request_id,
                status: response.status(),
                elapsed: started_at.elapsed(),
            }),
        );

        response
    }

    async fn dispatch(
        &self,
        method: &Method,
        raw_path: &str,
        ctx: Ctx,
    ) -> (Response, Option<String>) {
        let Some(path) = normalize_path(raw_path) else {
            self.emit_not_found(&ctx, method, raw_path);
            return (self.run_not_found(ctx).await, None);
        };

        match self.table.lookup(method, &path, &self.options.routing) {
            MatchOutcome::Matched {
                route,
                params,
                head_fallback,
            } => {
                self.services.hub.emit(
                    Some(ctx.request_id()),
                    Event::RouteMatched(RouteMatchedEvent {
                        at: SystemTime::now(),
                        request_id: ctx.request_id(),
                        pattern: route.pattern.clone(),
                        route_name: route.name.clone(),
                        params: params.clone(),
                    }),
                );
                ctx.set_params(params);
                ctx.set_route(route.clone());

                let result = route.chain.run(ctx.clone()).await;
                let mut response = self.finish_result(&ctx, result);
                if head_fallback {
                    response.strip_body();
                }
                (response, Some(route.pattern.clone()))
            }
            MatchOutcome::MethodNotAllowed { allow } => {
                (HttpError::MethodNotAllowed { allow }.to_response(), None)
            }
            MatchOutcome::AutoOptions { allow } => (
                Response::new(StatusCode::NO_CONTENT).header("allow", allow_header(&allow)),
                None,
            ),
            MatchOutcome::RedirectSlash { location, status } => {
                let location = match ctx.request().query() {
                    Some(query) => format!("{location}?{query}"),
                    None => location,
                };
                (Response::redirect(&location, Some(status)), None)
            }
            MatchOutcome::NotFound => {
                self.emit_not_found(&ctx, method, &path);
                (self.run_not_found(ctx).await, None)
            }
        }
    }

    fn emit_not_found(&self, ctx: &Ctx, method: &Method, path: &str) {
        self.services.hub.emit(
            Some(ctx.request_id()),
            Event::RouteNotFound(RouteNotFoundEvent {
                at: SystemTime::now(),
                request_id: ctx.request_id(),
                method: method.clone(),
                path: path.to_string(),
            }),
        );
    }

    /// 404 still runs the engine-level chain so global middleware can
    /// decorate the staged response.
    async fn run_not_found(&self, ctx: Ctx) -> Response {
        *ctx.staged_response() =
            Response::text("Not Found").with_status(StatusCode::NOT_FOUND);
        let result = self.global_chain.run(ctx.clone()).await;
        self.finish_result(&ctx, result)
    }

    fn finish_result(&self, ctx: &Ctx, result: Result<Response, HttpError>) -> Response {
        match result {
            Ok(response) => response,
            Err(error) => {
                if error.is_internal() {
                    tracing::error!(request_id = ctx.request_id(), "handler chain failed: {error:?}");
                    self.services.hub.emit(
                        Some(ctx.request_id()),
                        Event::RoutingError(RoutingErrorEvent {
                            at: SystemTime::now(),
                            request_id: ctx.request_id(),
                            error: error.to_string(),
                        }),
                    );
                }
                error.to_response()
            }
        }
    }

    /// Graceful shutdown: stop taking new requests, wait for the active set
    /// to drain within the deadline, then cancel whatever is left.
    pub async fn shutdown(&self) {
        self.stop_accepting();
        let deadline = self.options.drain_deadline;
        let start = Instant::now();
        while self.active.len() > 0 && start.elapsed() < deadline {
            monoio::time::sleep(Duration::from_millis(10)).await;
        }
        let stragglers: Vec<Canceller> =
            self.cancellers.borrow_mut().drain().map(|(_, c)| c).collect();
        if !stragglers.is_empty() {
            tracing::warn!(
                "drain deadline reached with {} requests outstanding",
                stragglers.len()
            );
        }
        for canceller in stragglers {
            canceller.cancel();
        }
    }
}

/// Builds the frozen engine: resolves named middleware, compiles patterns,
/// detects conflicts and precomposes every route's chain.
pub struct EngineBuilder {
    registry: MiddlewareRegistry,
    engine_mw: Vec<MiddlewareEntry>,
    root: Router,
    config: EngineConfig,
    hub: Rc<SignalHub>,
    store: Option<Rc<dyn Repository>>,
    drain_deadline: Duration,
}

impl Default for EngineBuilder {
    fn default() -> Self {
        Engine::builder()
    }
}

impl EngineBuilder {
    pub fn with_config(config: EngineConfig) -> Self {
        EngineBuilder {
            registry: MiddlewareRegistry::new(),
            engine_mw: Vec::new(),
            root: Router::new(),
            config,
            hub: Rc::new(SignalHub::new()),
            store: None,
            drain_deadline: Duration::from_secs(30),
        }
    }

    /// The hub is live before the engine is built; observers may subscribe
    /// during boot.
    pub fn hub(&self) -> &Rc<SignalHub> {
        &self.hub
    }

    /// Install a cache backend; defaults to the in-memory repository.
    pub fn store(&mut self, store: Rc<dyn Repository>) -> &mut Self {
        self.store = Some(store);
        self
    }

    pub fn drain_deadline(&mut self, deadline: Duration) -> &mut Self {
        self.drain_deadline = deadline;
        self
    }

    pub fn register_middleware(
        &self,
        name: impl Into<String>,
        mw: Rc<dyn Middleware>,
    ) -> Result<(), RouterBuildError> {
        self.registry.register(name, mw)
    }

    /// Engine-level middleware; runs for every request, including 404s.
    pub fn middleware(&mut self, entry: impl Into<MiddlewareEntry>) -> &mut Self {
        self.engine_mw.push(entry.into());
        self
    }

    pub fn router(&mut self) -> &mut Router {
        &mut self.root
    }

    pub fn get(&mut self, path: &str, handler: Rc<dyn Handler>) -> &mut RouteDef {
        self.root.get(path, handler)
    }

    pub fn post(&mut self, path: &str, handler: Rc<dyn Handler>) -> &mut RouteDef {
        self.root.post(path, handler)
    }

    pub fn put(&mut self, path: &str, handler: Rc<dyn Handler>) -> &mut RouteDef {
        self.root.put(path, handler)
    }

    pub fn delete(&mut self, path: &str, handler: Rc<dyn Handler>) -> &mut RouteDef {
        self.root.delete(path, handler)
    }

    pub fn route(&mut self, method: Method, path: &str, handler: Rc<dyn Handler>) -> &mut RouteDef {
        self.root.route(method, path, handler)
    }

    pub fn group<F>(&mut self, prefix: &str, middlewares: Vec<MiddlewareEntry>, build: F)
    where
        F: FnOnce(&mut RouteScope),
    {
        self.root.group(prefix, middlewares, build)
    }

    pub fn mount(&mut self, prefix: &str, router: Router, middlewares: Vec<MiddlewareEntry>) {
        self.root.mount(prefix, router, middlewares)
    }

    pub fn build(self) -> Result<Engine, RouterBuildError> {
        let hub = self.hub;
        let raw_store: Rc<dyn Repository> = match self.store {
            Some(store) => store,
            None if self.config.rate_limit.backend == "memory" => {
                Rc::new(MemoryRepository::new())
            }
            None => {
                return Err(RouterBuildError::Config(format!(
                    "unknown cache backend {:?}",
                    self.config.rate_limit.backend
                )))
            }
        };
        let cache: Rc<dyn Repository> = Rc::new(ObservedRepository::new(raw_store, hub.clone()));
        let mut services = AppServices::new(hub.clone(), cache.clone());

        // policy middleware, installed ahead of user engine middleware
        let mut entries: Vec<MiddlewareEntry> = Vec::new();
        let security = &self.config.security;
        if security.ip_filter.enabled {
            self.registry
                .register("ip_filter", Rc::new(IpFilter::new(security.ip_filter.clone())))?;
            entries.push(MiddlewareEntry::from("ip_filter"));
        }
        if self.config.rate_limit.enabled {
            let service = Rc::new(
                RateLimitService::new(&self.config.rate_limit, cache.clone(), hub.clone())
                    .map_err(|e| RouterBuildError::Config(e.to_string()))?,
            );
            services.rate_limiter = Some(service.clone());
            self.registry
                .register("throttle", Rc::new(RateLimitMiddleware::new(service)))?;
            entries.push(MiddlewareEntry::from("throttle"));
        }
        if let Some(max_bytes) = security.max_request_size {
            self.registry
                .register("body_limit", Rc::new(BodyLimit::new(max_bytes)))?;
            entries.push(MiddlewareEntry::from("body_limit"));
        }
        if security.csrf.enabled {
            self.registry
                .register("csrf", Rc::new(CsrfGuard::new(security.csrf.clone())))?;
            entries.push(MiddlewareEntry::from("csrf"));
        }
        if self.config.routing.etag != trellis_core::config::EtagStrategy::Disabled {
            self.registry
                .register("etag", Rc::new(EtagHandler::new(self.config.routing.etag)))?;
            entries.push(MiddlewareEntry::from("etag"));
        }
        entries.extend(self.engine_mw);
        self.registry.freeze();

        let mut seen_pairs: HashSet<(Method, String)> = HashSet::new();
        let mut seen_names: HashSet<String> = HashSet::new();
        let mut routes = Vec::with_capacity(self.root.routes.len());
        for def in self.root.routes {
            if !seen_pairs.insert((def.method.clone(), def.pattern.clone())) {
                return Err(RouterBuildError::DuplicateRoute {
                    method: def.method,
                    pattern: def.pattern,
                });
            }
            let compiled = compile(&def.pattern, &def.constraints)?;
            let full_name = def.name.map(|name| {
                if def.group_chain.is_empty() {
                    name
                } else {
                    format!("{}.{}", def.group_chain.join("."), name)
                }
            });
            if let Some(name) = &full_name {
                if !seen_names.insert(name.clone()) {
                    return Err(RouterBuildError::DuplicateName(name.clone()));
                }
            }
            let steps = compose(
                &[&entries, &def.router_mw, &def.group_mw, &def.route_mw],
                &def.exclusions,
                &self.registry,
            )?;
            routes.push(Rc::new(Route::new(
                def.method,
                def.pattern,
                full_name,
                def.group_chain,
                compiled,
                Chain::new(steps, def.handler),
            )));
        }

        let global_steps = compose(&[&entries], &[], &self.registry)?;
        let global_chain = Chain::new(
            global_steps,
            handler_fn(|ctx: Ctx| async move { Ok(ctx.take_staged()) }),
        );

        tracing::info!(routes = routes.len(), "engine built");
        Ok(Engine {
            table: RouteTable::new(routes),
            global_chain,
            services,
            options: EngineOptions {
                routing: self.config.routing,
                trusted_proxies: self.config.security.trusted_proxies,
                drain_deadline: self.drain_deadline,
            },
            active: ActiveRequests::default(),
            cancellers: RefCell::new(HashMap::new()),
            next_id: Cell::new(1),
            accepting: Cell::new(true),
        })
    }
}
