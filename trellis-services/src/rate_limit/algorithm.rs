//! The three limiter algorithms.
//!
//! Every consume takes exactly one unit and receives the caller's `now`
//! (duration since the unix epoch), which keeps the math deterministic under
//! test. State is persisted in the cache as JSON.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use trellis_core::config::StrategyConfig;

/// Per-bucket logical state, serialized into the cache.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum LimiterState {
    TokenBucket { tokens: f64, last_refill: f64 },
    SlidingWindow { hits: Vec<f64> },
    Quota { count: u32, period_start: f64 },
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ConsumeResult {
    pub allowed: bool,
    pub remaining: u64,
    pub retry_after: Option<Duration>,
}

/// Run one consume against `state` (fresh bucket when `None`), returning the
/// updated state and the verdict.
pub fn consume(
    strategy: &StrategyConfig,
    state: Option<LimiterState>,
    now: Duration,
) -> (LimiterState, ConsumeResult) {
    let now_secs = now.as_secs_f64();
    match strategy {
        StrategyConfig::TokenBucket {
            capacity,
            refill_interval,
            burst,
        } => {
            let capacity_f = f64::from(*capacity);
            let interval = refill_interval.as_secs_f64();
            let (mut tokens, last_refill) = match state {
                Some(LimiterState::TokenBucket {
                    tokens,
                    last_refill,
                }) => (tokens, last_refill),
                _ => (capacity_f, now_secs),
            };

            let elapsed = (now_secs - last_refill).max(0.0);
            tokens += elapsed / interval * capacity_f;
            tokens = tokens.min(capacity_f * burst);

            let result = if tokens >= 1.0 {
                tokens -= 1.0;
                ConsumeResult {
                    allowed: true,
                    remaining: tokens.floor() as u64,
                    retry_after: None,
                }
            } else {
                let wait = (1.0 - tokens) * interval / capacity_f;
                ConsumeResult {
                    allowed: false,
                    remaining: 0,
                    retry_after: Some(Duration::from_secs_f64(wait)),
                }
            };
            (
                LimiterState::TokenBucket {
                    tokens,
                    last_refill: now_secs,
                },
                result,
            )
        }

        StrategyConfig::SlidingWindow { limit, window } => {
            let window_secs = window.as_secs_f64();
            let mut hits = match state {
                Some(LimiterState::SlidingWindow { hits }) => hits,
                _ => Vec::new(),
            };
            hits.retain(|&hit| hit > now_secs - window_secs);

            let result = if hits.len() >= *limit as usize {
                // the oldest hit ages out first
                let wait = (hits[0] + window_secs - now_secs).max(0.0);
                ConsumeResult {
                    allowed: false,
                    remaining: 0,
                    retry_after: Some(Duration::from_secs_f64(wait)),
                }
            } else {
                hits.push(now_secs);
                ConsumeResult {
                    allowed: true,
                    remaining: u64::from(*limit) - hits.len() as u64,
                    retry_after: None,
                }
            };
            (LimiterState::SlidingWindow { hits }, result)
        }

        StrategyConfig::Quota { limit, period } => {
            let period_secs = period.as_secs_f64();
            let (mut count, mut period_start) = match state {
                Some(LimiterState::Quota {
                    count,
                    period_start,
                }) => (count, period_start),
                _ => (0, now_secs),
            };

            if now_secs >= period_start + period_secs {
                // advance to the current period, keeping the alignment
                let periods = ((now_secs - period_start) / period_secs).floor();
                period_start += periods * period_secs;
                count = 0;
            }

            let result = if count >= *limit {
                let wait = (period_start + period_secs - now_secs).max(0.0);
                ConsumeResult {
                    allowed: false,
                    remaining: 0,
                    retry_after: Some(Duration::from_secs_f64(wait)),
                }
            } else {
                count += 1;
                ConsumeResult {
                    allowed: true,
                    remaining: u64::from(*limit - count),
                    retry_after: None,
                }
            };
            (
                LimiterState::Quota {
                    count,
                    period_start,
                },
                result,
            )
        }
    }
}

/// TTL for idle buckets: long enough to outlive any window the algorithm
/// still cares about.
pub fn idle_ttl(strategy: &StrategyConfig) -> Duration {
    match strategy {
        StrategyConfig::TokenBucket {
            capacity,
            refill_interval,
            burst,
        } => refill_interval.mul_f64(f64::from(*capacity) * burst.max(1.0) + 1.0),
        StrategyConfig::SlidingWindow { window, .. } => *window * 2,
        StrategyConfig::Quota { period, .. } => *period * 2,
    }
}
