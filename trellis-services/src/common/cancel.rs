//! Per-request cancellation.
//!
//! Every request carries a [`Canceller`]; the engine cancels outstanding
//! tokens when the shutdown drain deadline expires, and timeout middleware
//! may cancel early. [`Waiter`] is a future that resolves once cancelled.

use std::{
    cell::RefCell,
    future::Future,
    pin::Pin,
    rc::Rc,
    task::{Context, Poll, Waker},
};

#[derive(Default)]
struct CancelState {
    cancelled: bool,
    wakers: Vec<Waker>,
}

#[derive(Clone, Default)]
pub struct Canceller {
    state: Rc<RefCell<CancelState>>,
}

impl Canceller {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        let wakers = {
            let mut state = self.state.borrow_mut();
            if state.cancelled {
                return;
            }
            state.cancelled = true;
            std::mem::take(&mut state.wakers)
        };
        for waker in wakers {
            waker.wake();
        }
    }

    pub fn is_cancelled(&self) -> bool {
        self.state.borrow().cancelled
    }

    pub fn waiter(&self) -> Waiter {
        Waiter {
            state: self.state.clone(),
        }
    }
}

pub struct Waiter {
    state: Rc<RefCell<CancelState>>,
}

impl Future for Waiter {
    type Output = ();

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<()> {
        let mut state = self.state.borrow_mut();
        if state.cancelled {
            return Poll::Ready(());
        }
        if !state.wakers.iter().any(|w| w.will_wake(cx.waker())) {
            state.wakers.push(cx.waker().clone());
        }
        Poll::Pending
    }
}
