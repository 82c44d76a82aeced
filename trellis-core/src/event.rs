//! Lifecycle, rate-limit and cache events.
//!
//! Events are plain data: each variant carries its creation timestamp and
//! the fields observers need. Dispatch lives in [`signal`](crate::signal);
//! the sealed families here translate to exhaustive matches there.

use std::time::{Duration, SystemTime};

use http::{Method, StatusCode};

use crate::{config::FailoverMode, http::PathParams};

/// Identifies the emitter of a dispatch for scoped subscriptions. The engine
/// uses the request id.
pub type SenderId = u64;

#[derive(Debug, Clone)]
pub struct BeforeRoutingEvent {
    pub at: SystemTime,
    pub request_id: u64,
    pub method: Method,
    pub path: String,
}

#[derive(Debug, Clone)]
pub struct RequestStartedEvent {
    pub at: SystemTime,
    pub request_id: u64,
}

#[derive(Debug, Clone)]
pub struct RouteMatchedEvent {
    pub at: SystemTime,
    pub request_id: u64,
    pub pattern: String,
    pub route_name: Option<String>,
    pub params: PathParams,
}

#[derive(Debug, Clone)]
pub struct AfterRoutingEvent {
    pub at: SystemTime,
    pub request_id: u64,
    pub status: StatusCode,
    /// Pattern of the matched route; `None` on the not-found path.
    pub route: Option<String>,
}

#[derive(Debug, Clone)]
pub struct RequestFinishedEvent {
    pub at: SystemTime,
    pub request_id: u64,
    pub status: StatusCode,
    pub elapsed: Duration,
}

#[derive(Debug, Clone)]
pub struct RouteNotFoundEvent {
    pub at: SystemTime,
    pub request_id: u64,
    pub method: Method,
    pub path: String,
}

#[derive(Debug, Clone)]
pub struct RoutingErrorEvent {
    pub at: SystemTime,
    pub request_id: u64,
    pub error: String,
}

#[derive(Debug, Clone)]
pub struct RateLimitAllowedEvent {
    pub at: SystemTime,
    pub policy: String,
    pub strategy: &'static str,
    pub identity: String,
    pub remaining: u64,
    pub failover: Option<FailoverMode>,
}

#[derive(Debug, Clone)]
pub struct RateLimitBlockedEvent {
    pub at: SystemTime,
    pub policy: String,
    pub strategy: &'static str,
    pub identity: String,
    pub remaining: u64,
    pub retry_after: Duration,
    pub failover: Option<FailoverMode>,
}

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum CacheEventKind {
    Hit,
    Miss,
    Write,
    Forget,
}

#[derive(Debug, Clone)]
pub struct CacheEvent {
    pub at: SystemTime,
    pub kind: CacheEventKind,
    pub key: String,
}

/// A signal handler failed; re-published on the hub instead of propagating
/// into the emitter.
#[derive(Debug, Clone)]
pub struct UnhandledSignalError {
    pub at: SystemTime,
    pub signal: &'static str,
    pub error: String,
    pub sender: Option<SenderId>,
    pub key: Option<String>,
}

/// Every event the hub can carry.
#[derive(Debug, Clone)]
pub enum Event {
    BeforeRouting(BeforeRoutingEvent),
    RequestStarted(RequestStartedEvent),
    RouteMatched(RouteMatchedEvent),
    AfterRouting(AfterRoutingEvent),
    RequestFinished(RequestFinishedEvent),
    RouteNotFound(RouteNotFoundEvent),
    RoutingError(RoutingErrorEvent),
    RateLimitAllowed(RateLimitAllowedEvent),
    RateLimitBlocked(RateLimitBlockedEvent),
    Cache(CacheEvent),
}

impl Event {
    pub fn signal_name(&self) -> &'static str {
        match self {
            Event::BeforeRouting(_) => "before_routing",
            Event::RequestStarted(_) => "request_started",
            Event::RouteMatched(_) => "route_matched",
            Event::AfterRouting(_) => "after_routing",
            Event::RequestFinished(_) => "request_finished",
            Event::RouteNotFound(_) => "route_not_found",
            Event::RoutingError(_) => "routing_error",
            Event::RateLimitAllowed(_) => "rate_limit_allowed",
            Event::RateLimitBlocked(_) => "rate_limit_blocked",
            Event::Cache(_) => "cache",
        }
    }
}
