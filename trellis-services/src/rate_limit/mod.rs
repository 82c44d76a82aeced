//! Multi-policy rate limiting over a cache-backed store.
//!
//! Policies are evaluated in declaration order; the first blocked outcome
//! short-circuits. Every evaluation emits exactly one allowed/blocked event.
//! Consumes are serialized per bucket key, and backend failures degrade per
//! the policy's failover mode.

use std::{
    cell::RefCell,
    collections::HashMap,
    net::IpAddr,
    rc::Rc,
    time::{Duration, SystemTime, UNIX_EPOCH},
};

use bytes::Bytes;
use futures::lock::Mutex;
use http::{HeaderMap, Method};
use tracing::warn;
use trellis_core::{
    cache::{CacheError, Repository},
    config::{FailoverMode, RateLimitOptions, StrategyConfig},
    event::{Event, RateLimitAllowedEvent, RateLimitBlockedEvent, SenderId},
    http::HttpError,
    signal::SignalHub,
    AnyResult,
};

pub mod algorithm;
mod policy;

pub use algorithm::{ConsumeResult, LimiterState};
pub use policy::{CompiledPolicy, PathGlob};

use crate::middleware::{Middleware, MwFuture, Next};

/// Aggregate verdict for one request across all applicable policies.
#[derive(Debug, Default)]
pub struct Decision {
    pub blocked: Option<Blocked>,
    /// Smallest remaining budget among the allowing policies.
    pub remaining: Option<u64>,
}

#[derive(Debug, Clone)]
pub struct Blocked {
    pub policy: String,
    pub retry_after: Duration,
}

struct EvalOutcome {
    allowed: bool,
    remaining: u64,
    retry_after: Option<Duration>,
    failover: Option<FailoverMode>,
}

pub struct RateLimitService {
    policies: Vec<CompiledPolicy>,
    store: Rc<dyn Repository>,
    hub: Rc<SignalHub>,
    locks: RefCell<HashMap<String, Rc<Mutex<()>>>>,
    /// `failover: local` state, deliberately per worker.
    local_buckets: RefCell<HashMap<String, LimiterState>>,
}

impl RateLimitService {
    pub fn new(
        options: &RateLimitOptions,
        store: Rc<dyn Repository>,
        hub: Rc<SignalHub>,
    ) -> AnyResult<Self> {
        let mut policies = Vec::with_capacity(options.policies.len());
        for config in &options.policies {
            policies.push(CompiledPolicy::compile(config, options.failover)?);
        }
        Ok(RateLimitService {
            policies,
            store,
            hub,
            locks: RefCell::new(HashMap::new()),
            local_buckets: RefCell::new(HashMap::new()),
        })
    }

    pub fn policy_count(&self) -> usize {
        self.policies.len()
    }

    /// Wall-clock `now` for production callers; tests pass their own.
    pub fn now() -> Duration {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
    }

    /// Evaluate every applicable policy in declaration order. Policies whose
    /// identity cannot be resolved are skipped without error; the first
    /// blocked outcome terminates iteration.
    pub async fn check(
        &self,
        method: &Method,
        path: &str,
        headers: &HeaderMap,
        client_ip: Option<IpAddr>,
        sender: Option<SenderId>,
        now: Duration,
    ) -> Decision {
        let mut decision = Decision::default();
        for policy in &self.policies {
            if !policy.applies(method, path) {
                continue;
            }
            let Some(identity) = policy.identity(headers, client_ip) else {
                continue;
            };

            let outcome = self.consume_policy(policy, &identity, now).await;
            self.emit(policy, &identity, &outcome, sender);

            if outcome.allowed {
                decision.remaining = Some(match decision.remaining {
                    Some(current) => current.min(outcome.remaining),
                    None => outcome.remaining,
                });
            } else {
                decision.blocked = Some(Blocked {
                    policy: policy.name.clone(),
                    retry_after: outcome.retry_after.unwrap_or(Duration::from_secs(1)),
                });
                return decision;
            }
        }
        decision
    }

    async fn consume_policy(
        &self,
        policy: &CompiledPolicy,
        identity: &str,
        now: Duration,
    ) -> EvalOutcome {
        let key = policy.bucket_key(identity);
        let mutex = {
            let mut locks = self.locks.borrow_mut();
            locks
                .entry(key.clone())
                .or_insert_with(|| Rc::new(Mutex::new(())))
                .clone()
        };
        let _guard = mutex.lock().await;

        match self.store_consume(policy, &key, now).await {
            Ok(result) => EvalOutcome {
                allowed: result.allowed,
                remaining: result.remaining,
                retry_after: result.retry_after,
                failover: None,
            },
            Err(error) => {
                warn!(policy = %policy.name, "rate-limit backend failed: {error}");
                self.failover_consume(policy, &key, now)
            }
        }
    }

    /// One logical read-modify-write against the store, under the bucket's
    /// lock.
    async fn store_consume(
        &self,
        policy: &CompiledPolicy,
        key: &str,
        now: Duration,
    ) -> Result<ConsumeResult, CacheError> {
        let state = self
            .store
            .get(key)
            .await?
            .and_then(|raw| serde_json::from_slice::<LimiterState>(&raw).ok());
        let (next_state, result) = algorithm::consume(&policy.strategy, state, now);
        let encoded = serde_json::to_vec(&next_state)
            .map_err(|e| CacheError::Backend(e.to_string()))?;
        self.store
            .put(
                key,
                Bytes::from(encoded),
                Some(algorithm::idle_ttl(&policy.strategy)),
            )
            .await?;
        Ok(result)
    }

    fn failover_consume(&self, policy: &CompiledPolicy, key: &str, now: Duration) -> EvalOutcome {
        match policy.failover {
            FailoverMode::Allow => EvalOutcome {
                allowed: true,
                remaining: 0,
                retry_after: None,
                failover: Some(FailoverMode::Allow),
            },
            FailoverMode::Block => EvalOutcome {
                allowed: false,
                remaining: 0,
                retry_after: Some(Duration::from_secs(1)),
                failover: Some(FailoverMode::Block),
            },
            FailoverMode::Local => {
                // independent in-process token bucket on the same key
                let strategy = local_strategy(&policy.strategy);
                let mut buckets = self.local_buckets.borrow_mut();
                let state = buckets.remove(key);
                let (next_state, result) = algorithm::consume(&strategy, state, now);
                buckets.insert(key.to_string(), next_state);
                EvalOutcome {
                    allowed: result.allowed,
                    remaining: result.remaining,
                    retry_after: result.retry_after,
                    failover: Some(FailoverMode::Local),
                }
            }
        }
    }

    fn emit(
        &self,
        policy: &CompiledPolicy,
        identity: &str,
        outcome: &EvalOutcome,
        sender: Option<SenderId>,
    ) {
        let at = SystemTime::now();
        let event = if outcome.allowed {
            Event::RateLimitAllowed(RateLimitAllowedEvent {
                at,
                policy: policy.name.clone(),
                strategy: policy.strategy.name(),
                identity: identity.to_string(),
                remaining: outcome.remaining,
                failover: outcome.failover,
            })
        } else {
            Event::RateLimitBlocked(RateLimitBlockedEvent {
                at,
                policy: policy.name.clone(),
                strategy: policy.strategy.name(),
                identity: identity.to_string(),
                remaining: outcome.remaining,
                retry_after: outcome.retry_after.unwrap_or(Duration::from_secs(1)),
                failover: outcome.failover,
            })
        };
        self.hub.emit(sender, event);
    }
}

/// Local-failover buckets always run token-bucket semantics; non-bucket
/// strategies borrow their limit and window as capacity and refill interval.
fn local_strategy(strategy: &StrategyConfig) -> StrategyConfig {
    match strategy {
        tb @ StrategyConfig::TokenBucket { .. } => tb.clone(),
        StrategyConfig::SlidingWindow { limit, window } => StrategyConfig::TokenBucket {
            capacity: *limit,
            refill_interval: *window,
            burst: 1.0,
        },
        StrategyConfig::Quota { limit, period } => StrategyConfig::TokenBucket {
            capacity: *limit,
            refill_interval: *period,
            burst: 1.0,
        },
    }
}

/// Middleware adapter: blocked requests become 429 with `Retry-After`;
/// allowed requests get `X-RateLimit-Remaining` stamped.
pub struct RateLimitMiddleware {
    service: Rc<RateLimitService>,
}

impl RateLimitMiddleware {
    pub fn new(service: Rc<RateLimitService>) -> Self {
        RateLimitMiddleware { service }
    }
}

impl Middleware for RateLimitMiddleware {
    fn handle(&self, ctx: crate::http::Ctx, next: Next) -> MwFuture {
        let service = self.service.clone();
        Box::pin(async move {
            let decision = {
                let request = ctx.request();
                service
                    .check(
                        request.method(),
                        request.path(),
                        request.headers(),
                        request.client_ip(),
                        Some(ctx.request_id()),
                        RateLimitService::now(),
                    )
                    .await
            };
            if let Some(blocked) = decision.blocked {
                return Err(HttpError::RateLimited {
                    retry_after: blocked.retry_after,
                });
            }
            let mut response = next.run(ctx).await?;
            if let Some(remaining) = decision.remaining {
                response.set_header("x-ratelimit-remaining", remaining.to_string());
            }
            Ok(response)
        })
    }
}
