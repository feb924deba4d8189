//! Ordered buffers of continuations waiting on a pending deferred value.

pub(crate) type OnFulfilled<T> = Box<dyn FnOnce(T) + Send + 'static>;
pub(crate) type OnRejected<E> = Box<dyn FnOnce(E) + Send + 'static>;
pub(crate) type OnSettled = Box<dyn FnOnce() + Send + 'static>;

pub(crate) struct Callbacks<T, E> {
    pub(crate) on_fulfilled: Vec<OnFulfilled<T>>,
    pub(crate) on_rejected: Vec<OnRejected<E>>,
    pub(crate) on_settled: Vec<OnSettled>,
}

impl<T, E> Default for Callbacks<T, E> {
    fn default() -> Self {
        Self {
            on_fulfilled: vec![],
            on_rejected: vec![],
            on_settled: vec![],
        }
    }
}

impl<T: Clone, E: Clone> Callbacks<T, E> {
    /// Runs the fulfillment entries, then the settle entries, each in
    /// insertion order. Consumes the buffers so nothing runs twice.
    pub(crate) fn fulfill(self, value: &T) {
        for callback in self.on_fulfilled {
            callback(value.clone());
        }
        for callback in self.on_settled {
            callback();
        }
    }

    pub(crate) fn reject(self, reason: &E) {
        for callback in self.on_rejected {
            callback(reason.clone());
        }
        for callback in self.on_settled {
            callback();
        }
    }

    pub(crate) fn len(&self) -> usize {
        self.on_fulfilled.len() + self.on_rejected.len() + self.on_settled.len()
    }
}
