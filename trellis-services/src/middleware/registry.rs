//! Process-scoped named middleware registry.
//!
//! Routes and groups may reference middleware by name; names resolve at
//! engine build time. The registry freezes when the engine is built, after
//! which registration fails.

use std::{
    cell::{Cell, RefCell},
    collections::HashMap,
    rc::Rc,
};

use super::Middleware;
use crate::router::RouterBuildError;

#[derive(Default)]
pub struct MiddlewareRegistry {
    entries: RefCell<HashMap<String, Rc<dyn Middleware>>>,
    frozen: Cell<bool>,
}

impl MiddlewareRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register or replace a named middleware. Replacement is allowed until
    /// the registry freezes.
    pub fn register(
        &self,
        name: impl Into<String>,
        mw: Rc<dyn Middleware>,
    ) -> Result<(), RouterBuildError> {
        if self.frozen.get() {
            return Err(RouterBuildError::RegistryFrozen);
        }
        self.entries.borrow_mut().insert(name.into(), mw);
        Ok(())
    }

    pub fn contains(&self, name: &str) -> bool {
        self.entries.borrow().contains_key(name)
    }

    pub fn resolve(&self, name: &str) -> Option<Rc<dyn Middleware>> {
        self.entries.borrow().get(name).cloned()
    }

    pub fn freeze(&self) {
        self.frozen.set(true);
    }

    pub fn is_frozen(&self) -> bool {
        self.frozen.get()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::middleware::middleware_fn;

    fn noop() -> Rc<dyn Middleware> {
        middleware_fn(|ctx, next| next.run(ctx))
    }

    #[test]
    fn test_register_resolve_replace() {
        let registry = MiddlewareRegistry::new();
        let first = noop();
        let second = noop();
        registry.register("auth", first.clone()).unwrap();
        assert!(Rc::ptr_eq(&registry.resolve("auth").unwrap(), &first));

        registry.register("auth", second.clone()).unwrap();
        assert!(Rc::ptr_eq(&registry.resolve("auth").unwrap(), &second));
        assert!(registry.resolve("missing").is_none());
    }

    #[test]
    fn test_frozen_registry_rejects_registration() {
        let registry = MiddlewareRegistry::new();
        registry.freeze();
        assert!(matches!(
            registry.register("late", noop()),
            Err(RouterBuildError::RegistryFrozen)
        ));
    }
}
