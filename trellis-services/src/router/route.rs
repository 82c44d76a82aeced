//! Builder-time route records and the registration DSL.
//!
//! `Router` collects `RouteDef`s; groups collapse into flat definitions at
//! registration time (prefix, group middleware and name chain are copied
//! onto each route). The engine compiles definitions into frozen [`Route`]s.

use std::{collections::HashMap, rc::Rc};

use http::Method;

use super::pattern::CompiledPattern;
use crate::middleware::{Chain, Exclusion, Handler, MiddlewareEntry};

/// A compiled, frozen route.
pub struct Route {
    pub method: Method,
    pub pattern: String,
    pub name: Option<String>,
    pub group_chain: Vec<String>,
    pub(crate) compiled: CompiledPattern,
    pub(crate) chain: Chain,
}

impl Route {
    pub(crate) fn new(
        method: Method,
        pattern: String,
        name: Option<String>,
        group_chain: Vec<String>,
        compiled: CompiledPattern,
        chain: Chain,
    ) -> Self {
        Route {
            method,
            pattern,
            name,
            group_chain,
            compiled,
            chain,
        }
    }

    pub(crate) fn compiled(&self) -> &CompiledPattern {
        &self.compiled
    }
}

/// A route under construction. Mutated through the DSL, consumed by the
/// engine build.
pub struct RouteDef {
    pub(crate) method: Method,
    pub(crate) pattern: String,
    pub(crate) handler: Rc<dyn Handler>,
    pub(crate) name: Option<String>,
    pub(crate) router_mw: Vec<MiddlewareEntry>,
    pub(crate) group_mw: Vec<MiddlewareEntry>,
    pub(crate) route_mw: Vec<MiddlewareEntry>,
    pub(crate) exclusions: Vec<Exclusion>,
    pub(crate) constraints: HashMap<String, String>,
    pub(crate) group_chain: Vec<String>,
}

impl RouteDef {
    fn new(method: Method, pattern: String, handler: Rc<dyn Handler>) -> Self {
        RouteDef {
            method,
            pattern,
            handler,
            name: None,
            router_mw: Vec::new(),
            group_mw: Vec::new(),
            route_mw: Vec::new(),
            exclusions: Vec::new(),
            constraints: HashMap::new(),
            group_chain: Vec::new(),
        }
    }

    pub fn name(&mut self, name: impl Into<String>) -> &mut Self {
        self.name = Some(name.into());
        self
    }

    pub fn middleware(&mut self, entry: impl Into<MiddlewareEntry>) -> &mut Self {
        self.route_mw.push(entry.into());
        self
    }

    pub fn without_middleware<I, E>(&mut self, entries: I) -> &mut Self
    where
        I: IntoIterator<Item = E>,
        E: Into<Exclusion>,
    {
        self.exclusions.extend(entries.into_iter().map(Into::into));
        self
    }

    /// Narrow an otherwise-permissive capture with a custom regex.
    pub fn constraint(&mut self, param: impl Into<String>, regex: impl Into<String>) -> &mut Self {
        self.constraints.insert(param.into(), regex.into());
        self
    }
}

/// A mountable collection of routes with router-level middleware.
#[derive(Default)]
pub struct Router {
    pub(crate) middleware: Vec<MiddlewareEntry>,
    pub(crate) routes: Vec<RouteDef>,
}

impl Router {
    pub fn new() -> Self {
        Self::default()
    }

    /// Router-level middleware; runs for every route of this router after
    /// the engine-level chain.
    pub fn middleware(&mut self, entry: impl Into<MiddlewareEntry>) -> &mut Self {
        self.middleware.push(entry.into());
        self
    }

    pub fn route(&mut self, method: Method, path: &str, handler: Rc<dyn Handler>) -> &mut RouteDef {
        self.routes
            .push(RouteDef::new(method, lead_slash(path), handler));
        let index = self.routes.len() - 1;
        &mut self.routes[index]
    }

    pub fn get(&mut self, path: &str, handler: Rc<dyn Handler>) -> &mut RouteDef {
        self.route(Method::GET, path, handler)
    }

    pub fn post(&mut self, path: &str, handler: Rc<dyn Handler>) -> &mut RouteDef {
        self.route(Method::POST, path, handler)
    }

    pub fn put(&mut self, path: &str, handler: Rc<dyn Handler>) -> &mut RouteDef {
        self.route(Method::PUT, path, handler)
    }

    pub fn delete(&mut self, path: &str, handler: Rc<dyn Handler>) -> &mut RouteDef {
        self.route(Method::DELETE, path, handler)
    }

    pub fn patch(&mut self, path: &str, handler: Rc<dyn Handler>) -> &mut RouteDef {
        self.route(Method::PATCH, path, handler)
    }

    pub fn head(&mut self, path: &str, handler: Rc<dyn Handler>) -> &mut RouteDef {
        self.route(Method::HEAD, path, handler)
    }

    pub fn options(&mut self, path: &str, handler: Rc<dyn Handler>) -> &mut RouteDef {
        self.route(Method::OPTIONS, path, handler)
    }

    /// Open a route group: a shared path prefix plus group-level middleware.
    pub fn group<F>(&mut self, prefix: &str, middlewares: Vec<MiddlewareEntry>, build: F)
    where
        F: FnOnce(&mut RouteScope),
    {
        let mut scope = RouteScope {
            router: self,
            prefix: lead_slash(prefix),
            middleware: middlewares,
            parent_chain: Vec::new(),
            own_name: None,
        };
        build(&mut scope);
    }

    /// Merge another router under a prefix. `middlewares` and the mounted
    /// router's own middleware become the router-level stage of every
    /// merged route.
    pub fn mount(&mut self, prefix: &str, router: Router, middlewares: Vec<MiddlewareEntry>) {
        let prefix = lead_slash(prefix);
        let mut router_mw = middlewares;
        router_mw.extend(router.middleware);
        for mut def in router.routes {
            def.pattern = join_paths(&prefix, &def.pattern);
            let mut merged = router_mw.clone();
            merged.extend(def.router_mw);
            def.router_mw = merged;
            self.routes.push(def);
        }
    }
}

/// Builder view inside a group closure.
pub struct RouteScope<'a> {
    router: &'a mut Router,
    prefix: String,
    /// Accumulated group middleware, outermost first.
    middleware: Vec<MiddlewareEntry>,
    parent_chain: Vec<String>,
    own_name: Option<String>,
}

impl RouteScope<'_> {
    /// Name segment for this group; applies to routes registered afterwards.
    pub fn name(&mut self, segment: impl Into<String>) -> &mut Self {
        self.own_name = Some(segment.into());
        self
    }

    fn chain(&self) -> Vec<String> {
        let mut chain = self.parent_chain.clone();
        if let Some(own) = &self.own_name {
            chain.push(own.clone());
        }
        chain
    }

    pub fn route(&mut self, method: Method, path: &str, handler: Rc<dyn Handler>) -> &mut RouteDef {
        let pattern = join_paths(&self.prefix, &lead_slash(path));
        let group_mw = self.middleware.clone();
        let group_chain = self.chain();
        let def = self.router.route(method, &pattern, handler);
        def.group_mw = group_mw;
        def.group_chain = group_chain;
        def
    }

    pub fn get(&mut self, path: &str, handler: Rc<dyn Handler>) -> &mut RouteDef {
        self.route(Method::GET, path, handler)
    }

    pub fn post(&mut self, path: &str, handler: Rc<dyn Handler>) -> &mut RouteDef {
        self.route(Method::POST, path, handler)
    }

    pub fn put(&mut self, path: &str, handler: Rc<dyn Handler>) -> &mut RouteDef {
        self.route(Method::PUT, path, handler)
    }

    pub fn delete(&mut self, path: &str, handler: Rc<dyn Handler>) -> &mut RouteDef {
        self.route(Method::DELETE, path, handler)
    }

    /// Nested group; prefix, middleware and name chain compose outer→inner.
    pub fn group<F>(&mut self, prefix: &str, middlewares: Vec<MiddlewareEntry>, build: F)
    where
        F: FnOnce(&mut RouteScope),
    {
        let mut combined = self.middleware.clone();
        combined.extend(middlewares);
        let mut scope = RouteScope {
            prefix: join_paths(&self.prefix, &lead_slash(prefix)),
            middleware: combined,
            parent_chain: self.chain(),
            own_name: None,
            router: &mut *self.router,
        };
        build(&mut scope);
    }
}

fn lead_slash(path: &str) -> String {
    if path.starts_with('/') {
        path.to_string()
    } else {
        format!("/{path}")
    }
}

pub(crate) fn join_paths(prefix: &str, path: &str) -> String {
    let prefix = prefix.trim_end_matches('/');
    let path = path.trim_start_matches('/');
    match (prefix.is_empty(), path.is_empty()) {
        (true, true) => "/".to_string(),
        (true, false) => format!("/{path}"),
        (false, true) => prefix.to_string(),
        (false, false) => format!("{prefix}/{path}"),
    }
}
