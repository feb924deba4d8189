//! `then`, `catch` and `finally`: each returns a new deferred value driven by
//! continuations installed on its parent.
//!
use crate::deferred::{Deferred, Resolution};
use std::sync::{Arc, Mutex, PoisonError};

/// Holds a one-shot handler shared by two exclusive branches.
struct Slot<F>(Arc<Mutex<Option<F>>>);

impl<F> Slot<F> {
    fn new(f: F) -> Self {
        Slot(Arc::new(Mutex::new(Some(f))))
    }

    fn take(&self) -> Option<F> {
        self.0.lock().unwrap_or_else(PoisonError::into_inner).take()
    }
}

impl<F> Clone for Slot<F> {
    fn clone(&self) -> Self {
        Slot(self.0.clone())
    }
}

impl<T, E> Deferred<T, E>
where
    T: Clone + Send + 'static,
    E: Clone + Send + 'static,
{
    /// Maps the fulfillment value. An `Err` from `on_fulfilled` rejects the
    /// derived value; a rejection of `self` passes through without calling it.
    pub fn then<U, F>(&self, on_fulfilled: F) -> Deferred<U, E>
    where
        U: Clone + Send + 'static,
        F: FnOnce(T) -> Result<U, E> + Send + 'static,
    {
        self.then_resolve(move |value| on_fulfilled(value).map(Resolution::Value))
    }

    /// Like [`Deferred::then`], but `on_fulfilled` may hand back a thenable
    /// for the derived value to adopt.
    pub fn then_resolve<U, F>(&self, on_fulfilled: F) -> Deferred<U, E>
    where
        U: Clone + Send + 'static,
        F: FnOnce(T) -> Result<Resolution<U, E>, E> + Send + 'static,
    {
        let (derived, resolver, rejecter) = Deferred::with_resolvers_in(&self.handle);
        let passthrough = rejecter.clone();
        self.on_fulfilled(move |value| match on_fulfilled(value) {
            Ok(resolution) => resolver.resolve_with(resolution),
            Err(reason) => rejecter.reject(reason),
        });
        self.on_rejected(move |reason| passthrough.reject(reason));
        derived
    }

    /// Recovers from a rejection. The fulfillment value of `self` passes
    /// through; the handler may change the reason type.
    ///
    /// # Examples
    ///
    /// ```
    /// use deferred_value::{Deferred, EventLoop};
    ///
    /// let event_loop = EventLoop::new();
    /// let recovered = Deferred::<i32, &str>::reject_in(&event_loop.handle(), "boom")
    ///     .catch(|reason| Err::<i32, String>(format!("rewrapped:{reason}")));
    /// assert_eq!(event_loop.block_on(&recovered), Ok(Err("rewrapped:boom".to_owned())));
    /// ```
    pub fn catch<E2, F>(&self, on_rejected: F) -> Deferred<T, E2>
    where
        E2: Clone + Send + 'static,
        F: FnOnce(E) -> Result<T, E2> + Send + 'static,
    {
        self.catch_resolve(move |reason| on_rejected(reason).map(Resolution::Value))
    }

    pub fn catch_resolve<E2, F>(&self, on_rejected: F) -> Deferred<T, E2>
    where
        E2: Clone + Send + 'static,
        F: FnOnce(E) -> Result<Resolution<T, E2>, E2> + Send + 'static,
    {
        let (derived, resolver, rejecter) = Deferred::with_resolvers_in(&self.handle);
        let passthrough = resolver.clone();
        self.on_fulfilled(move |value| passthrough.resolve(value));
        self.on_rejected(move |reason| match on_rejected(reason) {
            Ok(resolution) => resolver.resolve_with(resolution),
            Err(reason) => rejecter.reject(reason),
        });
        derived
    }

    /// Runs `on_settled` whichever way `self` settles and passes the outcome
    /// on untouched, unless `on_settled` fails, in which case its error
    /// rejects the derived value.
    pub fn finally<F>(&self, on_settled: F) -> Deferred<T, E>
    where
        F: FnOnce() -> Result<(), E> + Send + 'static,
    {
        let (derived, resolver, rejecter) = Deferred::with_resolvers_in(&self.handle);
        let slot = Slot::new(on_settled);
        let (on_value, on_reason) = (slot.clone(), slot);
        let failed = rejecter.clone();
        self.on_fulfilled(move |value| {
            match on_value.take().map_or(Ok(()), |f| f()) {
                Ok(()) => resolver.resolve(value),
                Err(reason) => failed.reject(reason),
            }
        });
        self.on_rejected(move |original| {
            match on_reason.take().map_or(Ok(()), |f| f()) {
                Ok(()) => rejecter.reject(original),
                Err(reason) => rejecter.reject(reason),
            }
        });
        derived
    }
}

#[cfg(test)]
mod tests {
    use crate::{Deferred, EventLoop, Resolution};
    use std::sync::{Arc, Mutex};

    #[test]
    fn test_then_maps_value() {
        let event_loop = EventLoop::new();
        let chained = Deferred::<i32, String>::resolve_in(&event_loop.handle(), 2)
            .then(|v| Ok(v + 1))
            .then(|v| Ok(format!("n={v}")));
        assert_eq!(event_loop.block_on(&chained), Ok(Ok("n=3".to_owned())));
    }

    #[test]
    fn test_then_error_rejects_derived() {
        let event_loop = EventLoop::new();
        let chained = Deferred::<i32, String>::resolve_in(&event_loop.handle(), 2)
            .then(|_| Err::<i32, _>("bad".to_owned()));
        assert_eq!(event_loop.block_on(&chained), Ok(Err("bad".to_owned())));
    }

    #[test]
    fn test_then_skips_handler_on_rejection() {
        let event_loop = EventLoop::new();
        let called = Arc::new(Mutex::new(false));
        let flag = called.clone();
        let chained = Deferred::<i32, &str>::reject_in(&event_loop.handle(), "e").then(move |v| {
            *flag.lock().unwrap() = true;
            Ok(v)
        });
        assert_eq!(event_loop.block_on(&chained), Ok(Err("e")));
        assert!(!*called.lock().unwrap());
    }

    #[test]
    fn test_then_resolve_adopts_returned_deferred() {
        let event_loop = EventLoop::new();
        let handle = event_loop.handle();
        let inner_handle = handle.clone();
        let chained = Deferred::<i32, ()>::resolve_in(&handle, 5).then_resolve::<String, _>(move |v| {
            Ok(Deferred::<String, ()>::resolve_in(&inner_handle, v.to_string()).into())
        });
        assert_eq!(event_loop.block_on(&chained), Ok(Ok("5".to_owned())));
    }

    #[test]
    fn test_catch_recovers_and_passes_values_through() {
        let event_loop = EventLoop::new();
        let handle = event_loop.handle();
        let recovered =
            Deferred::<i32, &str>::reject_in(&handle, "e").catch(|_| Ok::<_, ()>(0));
        let untouched = Deferred::<i32, &str>::resolve_in(&handle, 8).catch(|_| Ok::<_, ()>(0));
        assert_eq!(event_loop.block_on(&recovered), Ok(Ok(0)));
        assert_eq!(event_loop.block_on(&untouched), Ok(Ok(8)));
    }

    #[test]
    fn test_catch_resolve_adopts_rejection() {
        let event_loop = EventLoop::new();
        let handle = event_loop.handle();
        let inner_handle = handle.clone();
        let chained = Deferred::<i32, &str>::reject_in(&handle, "first").catch_resolve::<&str, _>(move |_| {
            Ok(Resolution::from(Deferred::<i32, &str>::reject_in(&inner_handle, "second")))
        });
        assert_eq!(event_loop.block_on(&chained), Ok(Err("second")));
    }

    #[test]
    fn test_finally_keeps_outcome() {
        let event_loop = EventLoop::new();
        let handle = event_loop.handle();
        let runs = Arc::new(Mutex::new(0));
        let (a, b) = (runs.clone(), runs.clone());
        let ok = Deferred::<i32, &str>::resolve_in(&handle, 1).finally(move || {
            *a.lock().unwrap() += 1;
            Ok(())
        });
        let err = Deferred::<i32, &str>::reject_in(&handle, "e").finally(move || {
            *b.lock().unwrap() += 1;
            Ok(())
        });
        assert_eq!(event_loop.block_on(&ok), Ok(Ok(1)));
        assert_eq!(event_loop.block_on(&err), Ok(Err("e")));
        assert_eq!(*runs.lock().unwrap(), 2);
    }

    #[test]
    fn test_finally_error_supersedes() {
        let event_loop = EventLoop::new();
        let handle = event_loop.handle();
        let ok = Deferred::<i32, &str>::resolve_in(&handle, 1).finally(|| Err("cleanup"));
        let err = Deferred::<i32, &str>::reject_in(&handle, "e").finally(|| Err("cleanup"));
        assert_eq!(event_loop.block_on(&ok), Ok(Err("cleanup")));
        assert_eq!(event_loop.block_on(&err), Ok(Err("cleanup")));
    }

    #[test]
    fn test_derived_waits_for_parent() {
        let event_loop = EventLoop::new();
        let (parent, resolve, _) = Deferred::<i32, ()>::with_resolvers_in(&event_loop.handle());
        let child = parent.then(|v| Ok(v * 10));
        event_loop.run().unwrap();
        assert!(parent.is_pending());
        assert!(child.is_pending());
        resolve.resolve(4);
        assert_eq!(event_loop.block_on(&child), Ok(Ok(40)));
    }
}
