//! Deferred values: the eventual result of an asynchronous operation, with
//! `then`/`catch`/`finally` chaining.
//!
//! A [`Deferred`] settles exactly once, as fulfilled or rejected. Settlement
//! and late continuations are queued on an [`EventLoop`], so code following a
//! construction or a chaining call always observes a pending value first.
//!
//! ```
//! use deferred_value::{Deferred, EventLoop};
//!
//! let event_loop = EventLoop::new();
//! let _guard = event_loop.enter();
//!
//! let nested = Deferred::<i32, String>::resolve_with(Deferred::<i32, String>::resolve(7).into());
//! let logged = nested.finally(|| Ok(())).then(|v| Ok(v + 1));
//!
//! assert!(logged.is_pending());
//! assert_eq!(event_loop.block_on(&logged), Ok(Ok(8)));
//! ```
mod chain;
mod deferred;
mod event_loop;
mod registry;
mod resolver;

pub use deferred::{Deferred, Resolution, State, Thenable};
pub use event_loop::{EnterGuard, EventLoop, Handle, Options};
pub use resolver::{Rejecter, Resolver};

/// Errors raised by the event loop driving deferred values. Rejection reasons
/// never take this form; they keep the caller's own type.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum Error {
    #[error("no event loop is running on this thread")]
    NoEventLoop,
    #[error("event loop went idle before the deferred value settled")]
    Stalled,
    #[error("event loop ran {0} tasks without finishing")]
    TickLimit(usize),
}
