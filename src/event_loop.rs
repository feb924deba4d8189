//! A single-threaded event loop that every deferred value schedules its
//! settlement on. Work can be queued from any thread through a [`Handle`], but
//! tasks only ever run on the thread driving the loop.
//!
use crate::{Deferred, Error};
use log::{debug, trace};
use std::{
    cell::RefCell,
    cmp::Ordering,
    collections::{BinaryHeap, VecDeque},
    fmt,
    sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError},
    time::{Duration, Instant},
};

pub(crate) type Task = Box<dyn FnOnce() + Send + 'static>;

thread_local! {
    static CURRENT: RefCell<Option<Handle>> = const { RefCell::new(None) };
}

/// Event loop configuration.
#[derive(Debug, Clone, Default)]
pub struct Options {
    name: Option<String>,
    tick_limit: Option<usize>,
}

impl Options {
    pub fn new() -> Options {
        Options::default()
    }

    /// Name used to tag this loop's log lines.
    pub fn name(&mut self, name: String) -> &mut Options {
        self.name = Some(name);
        self
    }

    /// Upper bound on tasks run by a single `run` or `block_on` call.
    pub fn tick_limit(&mut self, limit: usize) -> &mut Options {
        self.tick_limit = Some(limit);
        self
    }
}

struct Timer {
    deadline: Instant,
    seq: u64,
    task: Task,
}

impl PartialEq for Timer {
    fn eq(&self, other: &Self) -> bool {
        self.deadline == other.deadline && self.seq == other.seq
    }
}

impl Eq for Timer {}

impl PartialOrd for Timer {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Timer {
    // Reversed so the `BinaryHeap` pops the earliest deadline first.
    fn cmp(&self, other: &Self) -> Ordering {
        other
            .deadline
            .cmp(&self.deadline)
            .then_with(|| other.seq.cmp(&self.seq))
    }
}

#[derive(Default)]
struct Queue {
    ready: VecDeque<Task>,
    timers: BinaryHeap<Timer>,
    next_seq: u64,
}

enum Next {
    Run(Task),
    Sleep(Instant),
    Idle,
}

impl Queue {
    fn next(&mut self, now: Instant) -> Next {
        while self
            .timers
            .peek()
            .map_or(false, |timer| timer.deadline <= now)
        {
            if let Some(timer) = self.timers.pop() {
                self.ready.push_back(timer.task);
            }
        }
        if let Some(task) = self.ready.pop_front() {
            return Next::Run(task);
        }
        match self.timers.peek() {
            Some(timer) => Next::Sleep(timer.deadline),
            None => Next::Idle,
        }
    }
}

struct Shared {
    name: String,
    queue: Mutex<Queue>,
    wakeup: Condvar,
}

impl Shared {
    fn lock(&self) -> MutexGuard<'_, Queue> {
        self.queue.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// A cloneable reference to an [`EventLoop`], used to schedule work on it.
#[derive(Clone)]
pub struct Handle {
    shared: Arc<Shared>,
}

impl fmt::Debug for Handle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Handle").field("name", &self.shared.name).finish()
    }
}

impl Handle {
    /// Returns the handle of the loop entered on this thread.
    ///
    /// # Panics
    ///
    /// Panics when called outside [`EventLoop::enter`], `run` or `block_on`.
    pub fn current() -> Handle {
        match Handle::try_current() {
            Ok(handle) => handle,
            Err(err) => panic!("{}", err),
        }
    }

    pub fn try_current() -> Result<Handle, Error> {
        CURRENT.with(|current| current.borrow().clone().ok_or(Error::NoEventLoop))
    }

    /// Queues `task` to run after everything already queued.
    pub fn defer(&self, task: impl FnOnce() + Send + 'static) {
        self.shared.lock().ready.push_back(Box::new(task));
        self.shared.wakeup.notify_one();
    }

    /// Queues `task` to run once `delay` has elapsed. Timers sharing a
    /// deadline fire in the order they were set.
    pub fn set_timeout(&self, delay: Duration, task: impl FnOnce() + Send + 'static) {
        let mut queue = self.shared.lock();
        let seq = queue.next_seq;
        queue.next_seq += 1;
        queue.timers.push(Timer {
            deadline: Instant::now() + delay,
            seq,
            task: Box::new(task),
        });
        drop(queue);
        trace!("{}: timer #{} set for {:?}", self.shared.name, seq, delay);
        self.shared.wakeup.notify_one();
    }
}

/// Restores the previously entered loop when dropped.
pub struct EnterGuard {
    previous: Option<Handle>,
}

impl Drop for EnterGuard {
    fn drop(&mut self) {
        let previous = self.previous.take();
        CURRENT.with(|current| *current.borrow_mut() = previous);
    }
}

/// Runs deferred tasks and timers in FIFO order.
///
/// # Examples
///
/// ```
/// use deferred_value::{Deferred, EventLoop};
///
/// let event_loop = EventLoop::new();
/// let _guard = event_loop.enter();
/// let doubled = Deferred::<i32, String>::resolve(21).then(|v| Ok(v * 2));
/// assert!(doubled.is_pending());
/// assert_eq!(event_loop.block_on(&doubled), Ok(Ok(42)));
/// ```
pub struct EventLoop {
    shared: Arc<Shared>,
    tick_limit: Option<usize>,
}

impl fmt::Debug for EventLoop {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventLoop")
            .field("name", &self.shared.name)
            .field("tick_limit", &self.tick_limit)
            .finish()
    }
}

impl Default for EventLoop {
    fn default() -> Self {
        EventLoop::new()
    }
}

impl EventLoop {
    pub fn new() -> EventLoop {
        EventLoop::with_options(&Options::new())
    }

    pub fn with_options(opts: &Options) -> EventLoop {
        EventLoop {
            shared: Arc::new(Shared {
                name: opts.name.clone().unwrap_or_else(|| "event-loop".to_owned()),
                queue: Mutex::new(Queue::default()),
                wakeup: Condvar::new(),
            }),
            tick_limit: opts.tick_limit,
        }
    }

    pub fn handle(&self) -> Handle {
        Handle {
            shared: self.shared.clone(),
        }
    }

    /// Makes this loop the thread's current one until the guard is dropped.
    pub fn enter(&self) -> EnterGuard {
        let handle = self.handle();
        let previous = CURRENT.with(|current| current.borrow_mut().replace(handle));
        EnterGuard { previous }
    }

    /// Runs until no task is queued and no timer is pending. Returns the
    /// number of tasks run.
    pub fn run(&self) -> Result<usize, Error> {
        self.turn(|| false)
    }

    /// Runs until `deferred` settles and returns its outcome.
    pub fn block_on<T, E>(&self, deferred: &Deferred<T, E>) -> Result<Result<T, E>, Error>
    where
        T: Clone + Send + 'static,
        E: Clone + Send + 'static,
    {
        self.turn(|| deferred.is_settled())?;
        deferred.outcome().ok_or(Error::Stalled)
    }

    fn turn(&self, done: impl Fn() -> bool) -> Result<usize, Error> {
        let _guard = self.enter();
        let name = &self.shared.name;
        debug!("{}: running", name);
        let mut ticks = 0;
        loop {
            if done() {
                debug!("{}: target settled after {} ticks", name, ticks);
                return Ok(ticks);
            }
            let mut queue = self.shared.lock();
            let task = match queue.next(Instant::now()) {
                Next::Run(task) => task,
                Next::Sleep(deadline) => {
                    let timeout = deadline.saturating_duration_since(Instant::now());
                    let _ = self
                        .shared
                        .wakeup
                        .wait_timeout(queue, timeout)
                        .unwrap_or_else(PoisonError::into_inner);
                    continue;
                }
                Next::Idle => {
                    debug!("{}: idle after {} ticks", name, ticks);
                    return Ok(ticks);
                }
            };
            drop(queue);
            if let Some(limit) = self.tick_limit {
                if ticks >= limit {
                    debug!("{}: tick limit {} reached", name, limit);
                    // The task goes back to the front so a later call resumes in order.
                    self.shared.lock().ready.push_front(task);
                    return Err(Error::TickLimit(limit));
                }
            }
            ticks += 1;
            task();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::{EventLoop, Handle, Options};
    use crate::Error;
    use std::{
        sync::{Arc, Mutex},
        time::Duration,
    };

    fn recorder() -> (Arc<Mutex<Vec<&'static str>>>, impl Fn(&'static str) -> Box<dyn FnOnce() + Send>) {
        let log = Arc::new(Mutex::new(vec![]));
        let sink = log.clone();
        let record = move |tag: &'static str| -> Box<dyn FnOnce() + Send> {
            let sink = sink.clone();
            Box::new(move || sink.lock().unwrap().push(tag))
        };
        (log, record)
    }

    #[test]
    fn test_deferred_tasks_run_in_fifo_order() {
        let event_loop = EventLoop::new();
        let handle = event_loop.handle();
        let (log, record) = recorder();
        handle.defer(record("a"));
        handle.defer(record("b"));
        handle.defer(record("c"));
        assert_eq!(event_loop.run(), Ok(3));
        assert_eq!(*log.lock().unwrap(), vec!["a", "b", "c"]);
    }

    #[test]
    fn test_tasks_queued_by_tasks_run_after_current_queue() {
        let event_loop = EventLoop::new();
        let handle = event_loop.handle();
        let (log, record) = recorder();
        let inner = handle.clone();
        let late = record("late");
        let first = record("first");
        handle.defer(move || {
            first();
            inner.defer(late);
        });
        handle.defer(record("second"));
        event_loop.run().unwrap();
        assert_eq!(*log.lock().unwrap(), vec!["first", "second", "late"]);
    }

    #[test]
    fn test_timers_fire_by_deadline_then_insertion() {
        let event_loop = EventLoop::new();
        let handle = event_loop.handle();
        let (log, record) = recorder();
        handle.set_timeout(Duration::from_millis(30), record("slow"));
        handle.set_timeout(Duration::from_millis(5), record("fast"));
        handle.set_timeout(Duration::ZERO, record("zero-1"));
        handle.set_timeout(Duration::ZERO, record("zero-2"));
        handle.defer(record("ready"));
        assert_eq!(event_loop.run(), Ok(5));
        assert_eq!(
            *log.lock().unwrap(),
            vec!["ready", "zero-1", "zero-2", "fast", "slow"]
        );
    }

    #[test]
    fn test_tick_limit_stops_and_resumes() {
        let mut opts = Options::new();
        opts.name("limited".into()).tick_limit(2);
        let event_loop = EventLoop::with_options(&opts);
        let handle = event_loop.handle();
        let (log, record) = recorder();
        handle.defer(record("a"));
        handle.defer(record("b"));
        handle.defer(record("c"));
        assert_eq!(event_loop.run(), Err(Error::TickLimit(2)));
        assert_eq!(*log.lock().unwrap(), vec!["a", "b"]);
        assert_eq!(event_loop.run(), Ok(1));
        assert_eq!(*log.lock().unwrap(), vec!["a", "b", "c"]);
    }

    #[test]
    fn test_current_handle_is_scoped_to_enter() {
        assert_eq!(Handle::try_current().unwrap_err(), Error::NoEventLoop);
        let event_loop = EventLoop::new();
        {
            let _guard = event_loop.enter();
            assert!(Handle::try_current().is_ok());
        }
        assert!(Handle::try_current().is_err());
    }

    #[test]
    fn test_current_handle_inside_tasks() {
        let event_loop = EventLoop::new();
        let seen = Arc::new(Mutex::new(false));
        let flag = seen.clone();
        event_loop
            .handle()
            .defer(move || *flag.lock().unwrap() = Handle::try_current().is_ok());
        event_loop.run().unwrap();
        assert!(*seen.lock().unwrap());
    }

    #[test]
    #[should_panic(expected = "no event loop")]
    fn test_current_panics_outside_loop() {
        Handle::current();
    }
}
