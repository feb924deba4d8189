//! The resolve/reject capabilities handed to an initializer, and the
//! constructors that run it.
//!
use crate::deferred::{Deferred, Resolution};
use crate::event_loop::Handle;
use log::trace;
use std::{
    fmt,
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
};

struct Capability<T, E> {
    target: Deferred<T, E>,
    resolved: Arc<AtomicBool>,
}

impl<T, E> Clone for Capability<T, E> {
    fn clone(&self) -> Self {
        Self {
            target: self.target.clone(),
            resolved: self.resolved.clone(),
        }
    }
}

impl<T, E> Capability<T, E> {
    /// True for the first call across both capabilities of one instance.
    fn claim(&self) -> bool {
        let first = !self.resolved.swap(true, Ordering::AcqRel);
        if !first {
            trace!("deferred already resolved, ignoring");
        }
        first
    }
}

/// Fulfills its deferred value. Only the first call to this or the paired
/// [`Rejecter`] has any effect.
pub struct Resolver<T, E> {
    cap: Capability<T, E>,
}

/// Rejects its deferred value. Only the first call to this or the paired
/// [`Resolver`] has any effect.
pub struct Rejecter<T, E> {
    cap: Capability<T, E>,
}

impl<T, E> Clone for Resolver<T, E> {
    fn clone(&self) -> Self {
        Self {
            cap: self.cap.clone(),
        }
    }
}

impl<T, E> Clone for Rejecter<T, E> {
    fn clone(&self) -> Self {
        Self {
            cap: self.cap.clone(),
        }
    }
}

impl<T, E> fmt::Debug for Resolver<T, E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Resolver")
            .field("resolved", &self.cap.resolved.load(Ordering::Acquire))
            .finish()
    }
}

impl<T, E> fmt::Debug for Rejecter<T, E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Rejecter")
            .field("resolved", &self.cap.resolved.load(Ordering::Acquire))
            .finish()
    }
}

impl<T, E> Resolver<T, E>
where
    T: Clone + Send + 'static,
    E: Clone + Send + 'static,
{
    pub fn resolve(&self, value: T) {
        self.resolve_with(Resolution::Value(value))
    }

    /// Resolves with a value or a thenable to adopt.
    pub fn resolve_with(&self, resolution: Resolution<T, E>) {
        if self.cap.claim() {
            let target = self.cap.target.clone();
            target
                .handle
                .clone()
                .defer(move || target.settle_fulfilled(resolution));
        }
    }
}

impl<T, E> Rejecter<T, E>
where
    T: Clone + Send + 'static,
    E: Clone + Send + 'static,
{
    pub fn reject(&self, reason: E) {
        if self.cap.claim() {
            let target = self.cap.target.clone();
            target
                .handle
                .clone()
                .defer(move || target.settle_rejected(reason));
        }
    }
}

impl<T, E> Deferred<T, E>
where
    T: Clone + Send + 'static,
    E: Clone + Send + 'static,
{
    /// A pending instance on `handle`'s loop together with its capabilities.
    ///
    /// # Examples
    ///
    /// ```
    /// use deferred_value::{Deferred, EventLoop};
    ///
    /// let event_loop = EventLoop::new();
    /// let (deferred, resolve, _reject) = Deferred::<&str, ()>::with_resolvers_in(&event_loop.handle());
    /// resolve.resolve("🍓");
    /// assert_eq!(event_loop.block_on(&deferred), Ok(Ok("🍓")));
    /// ```
    pub fn with_resolvers_in(handle: &Handle) -> (Self, Resolver<T, E>, Rejecter<T, E>) {
        let deferred = Deferred::pending(handle);
        let cap = Capability {
            target: deferred.clone(),
            resolved: Arc::new(AtomicBool::new(false)),
        };
        let resolver = Resolver { cap: cap.clone() };
        let rejecter = Rejecter { cap };
        (deferred, resolver, rejecter)
    }

    /// Runs `initializer` right away with this instance's capabilities. An
    /// `Err` from it rejects the instance unless a capability already fired.
    /// Settlement itself is always queued on the loop, so the returned value
    /// is still pending.
    ///
    /// # Examples
    ///
    /// ```
    /// use deferred_value::{Deferred, EventLoop};
    /// use std::time::Duration;
    ///
    /// let event_loop = EventLoop::new();
    /// let handle = event_loop.handle();
    /// let timer = handle.clone();
    /// let answer = Deferred::<i32, String>::new_in(&handle, move |resolve, _reject| {
    ///     timer.set_timeout(Duration::from_millis(20), move || resolve.resolve(42));
    ///     Ok(())
    /// })
    /// .then(|v| Ok(v * 2));
    /// assert!(answer.is_pending());
    /// assert_eq!(event_loop.block_on(&answer), Ok(Ok(84)));
    /// ```
    pub fn new_in<F>(handle: &Handle, initializer: F) -> Self
    where
        F: FnOnce(Resolver<T, E>, Rejecter<T, E>) -> Result<(), E>,
    {
        let (deferred, resolver, rejecter) = Deferred::with_resolvers_in(handle);
        let fallback = rejecter.clone();
        if let Err(reason) = initializer(resolver, rejecter) {
            trace!("initializer failed");
            fallback.reject(reason);
        }
        deferred
    }

    /// [`Deferred::new_in`] on the current thread's event loop.
    ///
    /// # Panics
    ///
    /// Panics outside an entered or running [`EventLoop`](crate::EventLoop).
    pub fn new<F>(initializer: F) -> Self
    where
        F: FnOnce(Resolver<T, E>, Rejecter<T, E>) -> Result<(), E>,
    {
        Deferred::new_in(&Handle::current(), initializer)
    }

    pub fn resolve_in(handle: &Handle, value: T) -> Self {
        Deferred::resolve_with_in(handle, Resolution::Value(value))
    }

    pub fn resolve_with_in(handle: &Handle, resolution: Resolution<T, E>) -> Self {
        let (deferred, resolver, _) = Deferred::with_resolvers_in(handle);
        resolver.resolve_with(resolution);
        deferred
    }

    pub fn reject_in(handle: &Handle, reason: E) -> Self {
        let (deferred, _, rejecter) = Deferred::with_resolvers_in(handle);
        rejecter.reject(reason);
        deferred
    }

    /// An instance that fulfills with `value` on the current thread's loop.
    pub fn resolve(value: T) -> Self {
        Deferred::resolve_in(&Handle::current(), value)
    }

    /// Like [`Deferred::resolve`], adopting `resolution` if it is a thenable.
    pub fn resolve_with(resolution: Resolution<T, E>) -> Self {
        Deferred::resolve_with_in(&Handle::current(), resolution)
    }

    /// An instance that rejects with `reason` on the current thread's loop.
    pub fn reject(reason: E) -> Self {
        Deferred::reject_in(&Handle::current(), reason)
    }
}
