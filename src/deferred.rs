use crate::event_loop::Handle;
use crate::registry::Callbacks;
use log::trace;
use std::{
    fmt,
    future::Future,
    pin::Pin,
    sync::{Arc, Mutex, MutexGuard, PoisonError},
    task::{Context, Poll, Waker},
};

/// Where a deferred value is in its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum State {
    Pending,
    Fulfilled,
    Rejected,
}

#[derive(Debug)]
enum Settlement<T, E> {
    Pending,
    Fulfilled(T),
    Rejected(E),
}

/// Anything a deferred value can adopt the outcome of.
///
/// `subscribe` must eventually call at most one of the two callbacks, once.
/// Fulfilling with another [`Resolution::Thenable`] is allowed; the adopting
/// value keeps unwrapping until it reaches a plain value.
pub trait Thenable<T, E>: Send {
    fn subscribe(
        self: Box<Self>,
        on_fulfilled: Box<dyn FnOnce(Resolution<T, E>) + Send + 'static>,
        on_rejected: Box<dyn FnOnce(E) + Send + 'static>,
    );
}

/// What a deferred value is resolved with.
pub enum Resolution<T, E> {
    Value(T),
    Thenable(Box<dyn Thenable<T, E>>),
}

impl<T, E> Resolution<T, E> {
    pub fn thenable(thenable: impl Thenable<T, E> + 'static) -> Self {
        Resolution::Thenable(Box::new(thenable))
    }
}

impl<T, E> fmt::Debug for Resolution<T, E>
where
    T: fmt::Debug,
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Resolution::Value(value) => f.debug_tuple("Value").field(value).finish(),
            Resolution::Thenable(_) => f.write_str("Thenable(..)"),
        }
    }
}

impl<T, E> From<Deferred<T, E>> for Resolution<T, E>
where
    T: Clone + Send + 'static,
    E: Clone + Send + 'static,
{
    fn from(deferred: Deferred<T, E>) -> Self {
        Resolution::thenable(deferred)
    }
}

struct Inner<T, E> {
    settlement: Settlement<T, E>,
    callbacks: Callbacks<T, E>,
    wakers: Vec<Waker>,
}

/// The eventual result of an asynchronous operation.
///
/// Clones share one instance. Settlement happens once; continuations
/// registered before it are buffered and run in insertion order, those
/// registered after it are queued on the event loop.
pub struct Deferred<T, E> {
    inner: Arc<Mutex<Inner<T, E>>>,
    pub(crate) handle: Handle,
}

impl<T, E> Clone for Deferred<T, E> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
            handle: self.handle.clone(),
        }
    }
}

impl<T, E> fmt::Debug for Deferred<T, E>
where
    T: fmt::Debug,
    E: fmt::Debug,
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let inner = self.lock();
        f.debug_struct("Deferred")
            .field("settlement", &inner.settlement)
            .finish()
    }
}

impl<T, E> Deferred<T, E> {
    fn lock(&self) -> MutexGuard<'_, Inner<T, E>> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub(crate) fn pending(handle: &Handle) -> Self {
        Self {
            inner: Arc::new(Mutex::new(Inner {
                settlement: Settlement::Pending,
                callbacks: Callbacks::default(),
                wakers: vec![],
            })),
            handle: handle.clone(),
        }
    }

    pub fn state(&self) -> State {
        match self.lock().settlement {
            Settlement::Pending => State::Pending,
            Settlement::Fulfilled(_) => State::Fulfilled,
            Settlement::Rejected(_) => State::Rejected,
        }
    }

    pub fn is_pending(&self) -> bool {
        self.state() == State::Pending
    }

    pub fn is_settled(&self) -> bool {
        !self.is_pending()
    }

    /// Whether `self` and `other` are the same instance.
    pub fn ptr_eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }
}

impl<T, E> Deferred<T, E>
where
    T: Clone + Send + 'static,
    E: Clone + Send + 'static,
{
    /// The settled outcome, or `None` while pending.
    pub fn outcome(&self) -> Option<Result<T, E>> {
        match &self.lock().settlement {
            Settlement::Pending => None,
            Settlement::Fulfilled(value) => Some(Ok(value.clone())),
            Settlement::Rejected(reason) => Some(Err(reason.clone())),
        }
    }

    /// Settles as fulfilled, first adopting the outcome of any thenable.
    pub(crate) fn settle_fulfilled(&self, resolution: Resolution<T, E>) {
        match resolution {
            Resolution::Value(value) => self.fulfill(value),
            Resolution::Thenable(thenable) => {
                if self.is_settled() {
                    trace!("ignoring thenable resolution of a settled deferred");
                    return;
                }
                trace!("deferred adopting a thenable");
                let (adopter, rejecter) = (self.clone(), self.clone());
                thenable.subscribe(
                    Box::new(move |inner| adopter.settle_fulfilled(inner)),
                    Box::new(move |reason| rejecter.settle_rejected(reason)),
                );
            }
        }
    }

    pub(crate) fn settle_rejected(&self, reason: E) {
        let (callbacks, wakers) = {
            let mut inner = self.lock();
            if !matches!(inner.settlement, Settlement::Pending) {
                trace!("ignoring rejection of a settled deferred");
                return;
            }
            inner.settlement = Settlement::Rejected(reason.clone());
            (
                std::mem::take(&mut inner.callbacks),
                std::mem::take(&mut inner.wakers),
            )
        };
        trace!("deferred rejected, draining {} callbacks", callbacks.len());
        callbacks.reject(&reason);
        for waker in wakers {
            waker.wake()
        }
    }

    fn fulfill(&self, value: T) {
        let (callbacks, wakers) = {
            let mut inner = self.lock();
            if !matches!(inner.settlement, Settlement::Pending) {
                trace!("ignoring fulfillment of a settled deferred");
                return;
            }
            inner.settlement = Settlement::Fulfilled(value.clone());
            (
                std::mem::take(&mut inner.callbacks),
                std::mem::take(&mut inner.wakers),
            )
        };
        trace!("deferred fulfilled, draining {} callbacks", callbacks.len());
        callbacks.fulfill(&value);
        for waker in wakers {
            waker.wake()
        }
    }

    /// Runs `callback` with the value once this instance fulfills. Never runs
    /// if it rejects.
    pub fn on_fulfilled(&self, callback: impl FnOnce(T) + Send + 'static) {
        let mut inner = self.lock();
        match &inner.settlement {
            Settlement::Pending => inner.callbacks.on_fulfilled.push(Box::new(callback)),
            Settlement::Fulfilled(value) => {
                let value = value.clone();
                drop(inner);
                self.handle.defer(move || callback(value));
            }
            Settlement::Rejected(_) => {}
        }
    }

    /// Runs `callback` with the reason once this instance rejects. Never runs
    /// if it fulfills.
    pub fn on_rejected(&self, callback: impl FnOnce(E) + Send + 'static) {
        let mut inner = self.lock();
        match &inner.settlement {
            Settlement::Pending => inner.callbacks.on_rejected.push(Box::new(callback)),
            Settlement::Rejected(reason) => {
                let reason = reason.clone();
                drop(inner);
                self.handle.defer(move || callback(reason));
            }
            Settlement::Fulfilled(_) => {}
        }
    }

    /// Runs `callback` once this instance settles either way.
    pub fn on_settled(&self, callback: impl FnOnce() + Send + 'static) {
        let mut inner = self.lock();
        match inner.settlement {
            Settlement::Pending => inner.callbacks.on_settled.push(Box::new(callback)),
            _ => {
                drop(inner);
                self.handle.defer(callback);
            }
        }
    }
}

impl<T, E> Thenable<T, E> for Deferred<T, E>
where
    T: Clone + Send + 'static,
    E: Clone + Send + 'static,
{
    fn subscribe(
        self: Box<Self>,
        on_fulfilled: Box<dyn FnOnce(Resolution<T, E>) + Send + 'static>,
        on_rejected: Box<dyn FnOnce(E) + Send + 'static>,
    ) {
        self.on_fulfilled(move |value| on_fulfilled(Resolution::Value(value)));
        self.on_rejected(on_rejected);
    }
}

impl<T, E> Future for Deferred<T, E>
where
    T: Clone + Send + 'static,
    E: Clone + Send + 'static,
{
    type Output = Result<T, E>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let mut inner = self.lock();
        match &inner.settlement {
            Settlement::Fulfilled(value) => Poll::Ready(Ok(value.clone())),
            Settlement::Rejected(reason) => Poll::Ready(Err(reason.clone())),
            Settlement::Pending => {
                if !inner.wakers.iter().any(|waker| waker.will_wake(cx.waker())) {
                    inner.wakers.push(cx.waker().clone());
                }
                Poll::Pending
            }
        }
    }
}
