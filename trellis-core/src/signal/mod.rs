//! Typed pub/sub for lifecycle events.
//!
//! One [`Signal`] per event variant; handlers run sequentially in
//! registration order on the worker that emitted. A failing handler never
//! aborts delivery to its siblings and never propagates into the emitter:
//! failures are re-published as [`UnhandledSignalError`] events.

use std::{
    cell::{Cell, RefCell},
    rc::{Rc, Weak},
    time::SystemTime,
};

use crate::{
    event::{Event, SenderId, UnhandledSignalError},
    AnyError,
};

type SignalHandler<E> = Rc<dyn Fn(&E) -> Result<(), AnyError>>;

struct Slot<E> {
    id: u64,
    sender: Option<SenderId>,
    key: Option<String>,
    handler: SignalHandler<E>,
}

struct SignalInner<E> {
    name: &'static str,
    next_id: Cell<u64>,
    slots: RefCell<Vec<Slot<E>>>,
}

trait Detach {
    fn detach(&self, id: u64);
}

impl<E> Detach for SignalInner<E> {
    fn detach(&self, id: u64) {
        self.slots.borrow_mut().retain(|slot| slot.id != id);
    }
}

/// Scoping for one subscription.
#[derive(Debug, Clone, Default)]
pub struct SubscribeOptions {
    /// Only receive dispatches from this sender.
    pub sender: Option<SenderId>,
    /// Occupy a named slot; reconnecting the same key replaces the previous
    /// handler.
    pub key: Option<String>,
}

/// Handle for one registered handler. Dropping the handle does NOT detach;
/// call [`cancel`](Subscription::cancel).
pub struct Subscription {
    inner: Weak<dyn Detach>,
    id: u64,
}

impl Subscription {
    pub fn cancel(&self) {
        if let Some(inner) = self.inner.upgrade() {
            inner.detach(self.id);
        }
    }
}

/// A handler that failed during dispatch.
pub struct SignalFault {
    pub signal: &'static str,
    pub error: AnyError,
    pub sender: Option<SenderId>,
    pub key: Option<String>,
}

/// Typed publisher for one event variant.
pub struct Signal<E> {
    inner: Rc<SignalInner<E>>,
}

impl<E> Clone for Signal<E> {
    fn clone(&self) -> Self {
        Signal {
            inner: self.inner.clone(),
        }
    }
}

impl<E: 'static> Signal<E> {
    pub fn new(name: &'static str) -> Self {
        Signal {
            inner: Rc::new(SignalInner {
                name,
                next_id: Cell::new(0),
                slots: RefCell::new(Vec::new()),
            }),
        }
    }

    pub fn name(&self) -> &'static str {
        self.inner.name
    }

    pub fn connect<F>(&self, handler: F) -> Subscription
    where
        F: Fn(&E) -> Result<(), AnyError> + 'static,
    {
        self.connect_with(SubscribeOptions::default(), handler)
    }

    pub fn connect_with<F>(&self, opts: SubscribeOptions, handler: F) -> Subscription
    where
        F: Fn(&E) -> Result<(), AnyError> + 'static,
    {
        let id = self.inner.next_id.get();
        self.inner.next_id.set(id + 1);
        let mut slots = self.inner.slots.borrow_mut();
        if let Some(key) = &opts.key {
            // a key is a per-signal slot: the newcomer replaces the holder
            slots.retain(|slot| slot.key.as_ref() != Some(key));
        }
        slots.push(Slot {
            id,
            sender: opts.sender,
            key: opts.key,
            handler: Rc::new(handler),
        });
        let inner_dyn: Rc<dyn Detach> = self.inner.clone();
        let inner: Weak<dyn Detach> = Rc::downgrade(&inner_dyn);
        Subscription { inner, id }
    }

    pub fn subscriber_count(&self) -> usize {
        self.inner.slots.borrow().len()
    }

    /// Deliver `event` to every matching slot in registration order. Returns
    /// the failures; the caller decides how to surface them.
    pub fn dispatch(&self, sender: Option<SenderId>, event: &E) -> Vec<SignalFault> {
        // Snapshot the slots so handlers may connect/cancel re-entrantly.
        let snapshot: Vec<(Option<SenderId>, Option<String>, SignalHandler<E>)> = self
            .inner
            .slots
            .borrow()
            .iter()
            .map(|slot| (slot.sender, slot.key.clone(), slot.handler.clone()))
            .collect();

        let mut faults = Vec::new();
        for (slot_sender, key, handler) in snapshot {
            if let Some(wanted) = slot_sender {
                if sender != Some(wanted) {
                    continue;
                }
            }
            if let Err(error) = handler(event) {
                faults.push(SignalFault {
                    signal: self.inner.name,
                    error,
                    sender,
                    key,
                });
            }
        }
        faults
    }
}

/// All signals of the engine, one per event variant plus the firehose.
pub struct SignalHub {
    pub before_routing: Signal<crate::event::BeforeRoutingEvent>,
    pub request_started: Signal<crate::event::RequestStartedEvent>,
    pub route_matched: Signal<crate::event::RouteMatchedEvent>,
    pub after_routing: Signal<crate::event::AfterRoutingEvent>,
    pub request_finished: Signal<crate::event::RequestFinishedEvent>,
    pub route_not_found: Signal<crate::event::RouteNotFoundEvent>,
    pub routing_error: Signal<crate::event::RoutingErrorEvent>,
    pub rate_limit_allowed: Signal<crate::event::RateLimitAllowedEvent>,
    pub rate_limit_blocked: Signal<crate::event::RateLimitBlockedEvent>,
    pub cache: Signal<crate::event::CacheEvent>,
    pub unhandled: Signal<UnhandledSignalError>,
    /// Receives every event after its typed signal ran.
    pub any: Signal<Event>,
}

impl Default for SignalHub {
    fn default() -> Self {
        Self::new()
    }
}

impl SignalHub {
    pub fn new() -> Self {
        SignalHub {
            before_routing: Signal::new("before_routing"),
            request_started: Signal::new("request_started"),
            route_matched: Signal::new("route_matched"),
            after_routing: Signal::new("after_routing"),
            request_finished: Signal::new("request_finished"),
            route_not_found: Signal::new("route_not_found"),
            routing_error: Signal::new("routing_error"),
            rate_limit_allowed: Signal::new("rate_limit_allowed"),
            rate_limit_blocked: Signal::new("rate_limit_blocked"),
            cache: Signal::new("cache"),
            unhandled: Signal::new("unhandled_signal_error"),
            any: Signal::new("any"),
        }
    }

    /// Route an event to its typed signal, then the firehose. Handler
    /// failures become [`UnhandledSignalError`] dispatches; failures of the
    /// error handlers themselves are only logged.
    pub fn emit(&self, sender: Option<SenderId>, event: Event) {
        let mut faults = match &event {
            Event::BeforeRouting(e) => self.before_routing.dispatch(sender, e),
            Event::RequestStarted(e) => self.request_started.dispatch(sender, e),
            Event::RouteMatched(e) => self.route_matched.dispatch(sender, e),
            Event::AfterRouting(e) => self.after_routing.dispatch(sender, e),
            Event::RequestFinished(e) => self.request_finished.dispatch(sender, e),
            Event::RouteNotFound(e) => self.route_not_found.dispatch(sender, e),
            Event::RoutingError(e) => self.routing_error.dispatch(sender, e),
            Event::RateLimitAllowed(e) => self.rate_limit_allowed.dispatch(sender, e),
            Event::RateLimitBlocked(e) => self.rate_limit_blocked.dispatch(sender, e),
            Event::Cache(e) => self.cache.dispatch(sender, e),
        };
        faults.extend(self.any.dispatch(sender, &event));

        for fault in faults {
            let error_event = UnhandledSignalError {
                at: SystemTime::now(),
                signal: fault.signal,
                error: fault.error.to_string(),
                sender: fault.sender,
                key: fault.key,
            };
            for nested in self.unhandled.dispatch(fault.sender, &error_event) {
                tracing::error!(
                    signal = nested.signal,
                    "error handler failed: {}",
                    nested.error
                );
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::{cell::RefCell, rc::Rc, time::SystemTime};

    use super::*;
    use crate::event::RequestStartedEvent;

    fn started(request_id: u64) -> RequestStartedEvent {
        RequestStartedEvent {
            at: SystemTime::now(),
            request_id,
        }
    }

    #[test]
    fn test_dispatch_order() {
        let signal: Signal<RequestStartedEvent> = Signal::new("request_started");
        let seen = Rc::new(RefCell::new(Vec::new()));
        for tag in ["a", "b", "c"] {
            let seen = seen.clone();
            signal.connect(move |_| {
                seen.borrow_mut().push(tag);
                Ok(())
            });
        }
        let faults = signal.dispatch(None, &started(1));
        assert!(faults.is_empty());
        assert_eq!(*seen.borrow(), vec!["a", "b", "c"]);
    }

    #[test]
    fn test_sender_scoping() {
        let signal: Signal<RequestStartedEvent> = Signal::new("request_started");
        let seen = Rc::new(RefCell::new(Vec::new()));

        let scoped = seen.clone();
        signal.connect_with(
            SubscribeOptions {
                sender: Some(7),
                ..Default::default()
            },
            move |e| {
                scoped.borrow_mut().push(("scoped", e.request_id));
                Ok(())
            },
        );
        let open = seen.clone();
        signal.connect(move |e| {
            open.borrow_mut().push(("open", e.request_id));
            Ok(())
        });

        signal.dispatch(Some(7), &started(7));
        signal.dispatch(Some(8), &started(8));
        assert_eq!(
            *seen.borrow(),
            vec![("scoped", 7), ("open", 7), ("open", 8)]
        );
    }

    #[test]
    fn test_keyed_slot_replaces() {
        let signal: Signal<RequestStartedEvent> = Signal::new("request_started");
        let seen = Rc::new(RefCell::new(Vec::new()));

        let first = seen.clone();
        signal.connect_with(
            SubscribeOptions {
                key: Some("metrics".into()),
                ..Default::default()
            },
            move |_| {
                first.borrow_mut().push("first");
                Ok(())
            },
        );
        let second = seen.clone();
        signal.connect_with(
            SubscribeOptions {
                key: Some("metrics".into()),
                ..Default::default()
            },
            move |_| {
                second.borrow_mut().push("second");
                Ok(())
            },
        );

        assert_eq!(signal.subscriber_count(), 1);
        signal.dispatch(None, &started(1));
        assert_eq!(*seen.borrow(), vec!["second"]);
    }

    #[test]
    fn test_cancel_detaches() {
        let signal: Signal<RequestStartedEvent> = Signal::new("request_started");
        let hits = Rc::new(RefCell::new(0));
        let counter = hits.clone();
        let sub = signal.connect(move |_| {
            *counter.borrow_mut() += 1;
            Ok(())
        });
        signal.dispatch(None, &started(1));
        sub.cancel();
        signal.dispatch(None, &started(2));
        assert_eq!(*hits.borrow(), 1);
    }

    #[test]
    fn test_failure_does_not_abort_siblings() {
        let hub = SignalHub::new();
        let seen = Rc::new(RefCell::new(Vec::new()));

        hub.request_started
            .connect(|_| Err(anyhow::anyhow!("observer broke")));
        let sibling = seen.clone();
        hub.request_started.connect(move |_| {
            sibling.borrow_mut().push("sibling");
            Ok(())
        });
        let errors = seen.clone();
        hub.unhandled.connect(move |e| {
            errors.borrow_mut().push("unhandled");
            assert_eq!(e.signal, "request_started");
            assert!(e.error.contains("observer broke"));
            Ok(())
        });

        hub.emit(Some(3), Event::RequestStarted(started(3)));
        assert_eq!(*seen.borrow(), vec!["sibling", "unhandled"]);
    }

    #[test]
    fn test_firehose_sees_every_variant() {
        let hub = SignalHub::new();
        let names = Rc::new(RefCell::new(Vec::new()));
        let sink = names.clone();
        hub.any.connect(move |event| {
            sink.borrow_mut().push(event.signal_name());
            Ok(())
        });
        hub.emit(None, Event::RequestStarted(started(1)));
        hub.emit(
            None,
            Event::Cache(crate::event::CacheEvent {
                at: SystemTime::now(),
                kind: crate::event::CacheEventKind::Hit,
                key: "k".into(),
            }),
        );
        assert_eq!(*names.borrow(), vec!["request_started", "cache"]);
    }
}
