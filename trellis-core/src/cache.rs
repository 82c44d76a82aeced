//! Cache repository contract and the in-memory implementation.
//!
//! The engine only ever talks to [`Repository`]; concrete backends live
//! behind it. Calls may suspend, so every method returns a boxed local
//! future to stay object-safe.

use std::{
    collections::HashMap,
    rc::Rc,
    sync::{Arc, Mutex},
    time::{Duration, Instant, SystemTime},
};

use bytes::Bytes;
use futures::future::LocalBoxFuture;

use crate::{
    event::{CacheEvent, CacheEventKind, Event},
    signal::SignalHub,
};

#[derive(thiserror::Error, Debug)]
pub enum CacheError {
    #[error("cache backend unavailable: {0}")]
    Backend(String),
    #[error("value for {0} is not a counter")]
    NotACounter(String),
}

/// Minimal key-value contract the engine consumes: at-least-once durability,
/// atomic increment, errors surfaced (rate-limit failover catches them).
pub trait Repository {
    fn get<'a>(&'a self, key: &'a str) -> LocalBoxFuture<'a, Result<Option<Bytes>, CacheError>>;
    fn put<'a>(
        &'a self,
        key: &'a str,
        value: Bytes,
        ttl: Option<Duration>,
    ) -> LocalBoxFuture<'a, Result<(), CacheError>>;
    fn increment<'a>(&'a self, key: &'a str, by: i64)
        -> LocalBoxFuture<'a, Result<i64, CacheError>>;
    fn forget<'a>(&'a self, key: &'a str) -> LocalBoxFuture<'a, Result<bool, CacheError>>;
}

struct Entry {
    value: Bytes,
    expires_at: Option<Instant>,
}

impl Entry {
    fn expired(&self, now: Instant) -> bool {
        matches!(self.expires_at, Some(deadline) if deadline <= now)
    }
}

/// Process-wide in-memory store. Clones share the map, so every worker on a
/// node observes the same entries; the mutex makes increments atomic.
#[derive(Clone, Default)]
pub struct MemoryRepository {
    entries: Arc<Mutex<HashMap<String, Entry>>>,
}

impl MemoryRepository {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<String, Entry>> {
        // a poisoned map only means another worker panicked mid-insert;
        // the data itself is still a valid map
        self.entries.lock().unwrap_or_else(|e| e.into_inner())
    }
}

impl Repository for MemoryRepository {
    fn get<'a>(&'a self, key: &'a str) -> LocalBoxFuture<'a, Result<Option<Bytes>, CacheError>> {
        Box::pin(async move {
            let mut entries = self.lock();
            let now = Instant::now();
            if let Some(entry) = entries.get(key) {
                if entry.expired(now) {
                    entries.remove(key);
                    return Ok(None);
                }
                return Ok(Some(entry.value.clone()));
            }
            Ok(None)
        })
    }

    fn put<'a>(
        &'a self,
        key: &'a str,
        value: Bytes,
        ttl: Option<Duration>,
    ) -> LocalBoxFuture<'a, Result<(), CacheError>> {
        Box::pin(async move {
            let expires_at = ttl.map(|ttl| Instant::now() + ttl);
            self.lock()
                .insert(key.to_string(), Entry { value, expires_at });
            Ok(())
        })
    }

    fn increment<'a>(
        &'a self,
        key: &'a str,
        by: i64,
    ) -> LocalBoxFuture<'a, Result<i64, CacheError>> {
        Box::pin(async move {
            let mut entries = self.lock();
            let now = Instant::now();
            let current = match entries.get(key) {
                Some(entry) if !entry.expired(now) => {
                    std::str::from_utf8(&entry.value)
                        .ok()
                        .and_then(|s| s.parse::<i64>().ok())
                        .ok_or_else(|| CacheError::NotACounter(key.to_string()))?
                }
                _ => 0,
            };
            let next = current + by;
            let expires_at = entries.get(key).and_then(|e| e.expires_at);
            entries.insert(
                key.to_string(),
                Entry {
                    value: Bytes::from(next.to_string()),
                    expires_at,
                },
            );
            Ok(next)
        })
    }

    fn forget<'a>(&'a self, key: &'a str) -> LocalBoxFuture<'a, Result<bool, CacheError>> {
        Box::pin(async move { Ok(self.lock().remove(key).is_some()) })
    }
}

/// Decorator emitting cache events on the hub for every operation.
pub struct ObservedRepository {
    inner: Rc<dyn Repository>,
    hub: Rc<SignalHub>,
}

impl ObservedRepository {
    pub fn new(inner: Rc<dyn Repository>, hub: Rc<SignalHub>) -> Self {
        Self { inner, hub }
    }

    fn emit(&self, kind: CacheEventKind, key: &str) {
        self.hub.emit(
            None,
            Event::Cache(CacheEvent {
                at: SystemTime::now(),
                kind,
                key: key.to_string(),
            }),
        );
    }
}

impl Repository for ObservedRepository {
    fn get<'a>(&'a self, key: &'a str) -> LocalBoxFuture<'a, Result<Option<Bytes>, CacheError>> {
        Box::pin(async move {
            let result = self.inner.get(key).await;
            if let Ok(found) = &result {
                let kind = if found.is_some() {
                    CacheEventKind::Hit
                } else {
                    CacheEventKind::Miss
                };
                self.emit(kind, key);
            }
            result
        })
    }

    fn put<'a>(
        &'a self,
        key: &'a str,
        value: Bytes,
        ttl: Option<Duration>,
    ) -> LocalBoxFuture<'a, Result<(), CacheError>> {
        Box::pin(async move {
            let result = self.inner.put(key, value, ttl).await;
            if result.is_ok() {
                self.emit(CacheEventKind::Write, key);
            }
            result
        })
    }

    fn increment<'a>(
        &'a self,
        key: &'a str,
        by: i64,
    ) -> LocalBoxFuture<'a, Result<i64, CacheError>> {
        Box::pin(async move {
            let result = self.inner.increment(key, by).await;
            if result.is_ok() {
                self.emit(CacheEventKind::Write, key);
            }
            result
        })
    }

    fn forget<'a>(&'a self, key: &'a str) -> LocalBoxFuture<'a, Result<bool, CacheError>> {
        Box::pin(async move {
            let result = self.inner.forget(key).await;
            if result.is_ok() {
                self.emit(CacheEventKind::Forget, key);
            }
            result
        })
    }
}

#[cfg(test)]
mod tests {
    use std::{cell::RefCell, rc::Rc};

    use futures::executor::block_on;

    use super::*;

    #[test]
    fn test_put_get_forget() {
        block_on(async {
            let repo = MemoryRepository::new();
            assert_eq!(repo.get("k").await.unwrap(), None);
            repo.put("k", Bytes::from_static(b"v"), None).await.unwrap();
            assert_eq!(repo.get("k").await.unwrap(), Some(Bytes::from_static(b"v")));
            assert!(repo.forget("k").await.unwrap());
            assert!(!repo.forget("k").await.unwrap());
        });
    }

    #[test]
    fn test_increment() {
        block_on(async {
            let repo = MemoryRepository::new();
            assert_eq!(repo.increment("hits", 1).await.unwrap(), 1);
            assert_eq!(repo.increment("hits", 2).await.unwrap(), 3);
            repo.put("text", Bytes::from_static(b"not a number"), None)
                .await
                .unwrap();
            assert!(matches!(
                repo.increment("text", 1).await,
                Err(CacheError::NotACounter(_))
            ));
        });
    }

    #[test]
    fn test_ttl_expiry() {
        block_on(async {
            let repo = MemoryRepository::new();
            repo.put("k", Bytes::from_static(b"v"), Some(Duration::ZERO))
                .await
                .unwrap();
            assert_eq!(repo.get("k").await.unwrap(), None);
        });
    }

    #[test]
    fn test_observed_events() {
        block_on(async {
            let hub = Rc::new(SignalHub::new());
            let seen = Rc::new(RefCell::new(Vec::new()));
            let sink = seen.clone();
            hub.cache.connect(move |e| {
                sink.borrow_mut().push(e.kind);
                Ok(())
            });

            let repo = ObservedRepository::new(Rc::new(MemoryRepository::new()), hub);
            let _ = repo.get("k").await;
            let _ = repo.put("k", Bytes::from_static(b"v"), None).await;
            let _ = repo.get("k").await;
            let _ = repo.forget("k").await;

            use CacheEventKind::*;
            assert_eq!(*seen.borrow(), vec![Miss, Write, Hit, Forget]);
        });
    }
}
