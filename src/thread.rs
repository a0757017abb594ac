//! Owned worker threads with a fixed teardown policy.
//!
//! A [`HighIntegrityThread`] owns at most one OS thread and guarantees it is resolved
//! (joined or detached) exactly once. The policy is a type parameter, so it cannot
//! drift at runtime:
//!
//! - [`Join`]: teardown blocks until the task returns. A panicking task is logged.
//! - [`Detach`]: teardown releases the handle and returns immediately.
//!
//! Teardown happens on `Drop`, on an explicit [`finish`](HighIntegrityThread::finish)
//! (idempotent), and when a live instance is overwritten by assignment, since
//! assignment drops the previous value.
//!
//! ```text
//!  Unstarted --spawn--> Running --task returns--> Joinable --finish/drop--> Terminated
//! ```
//!
//! The module also provides [`StopSignal`], the cooperative stop flag worker loops
//! poll between blocking calls.

use parking_lot::{Condvar, Mutex};
use std::any::Any;
use std::fmt;
use std::marker::PhantomData;
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};
use tracing::{debug, error};

use crate::error::{GatewayError, GatewayResult};

mod sealed {
    pub trait Sealed {}
}

/// Teardown policy of a [`HighIntegrityThread`].
pub trait ExecutionPolicy: sealed::Sealed + Send + 'static {
    /// Policy name used in logs.
    const NAME: &'static str;

    /// Resolve a live handle. Called exactly once per spawned thread.
    fn resolve<R>(thread_name: &str, handle: JoinHandle<R>);
}

/// Block on teardown until the task returns.
#[derive(Debug, Clone, Copy)]
pub struct Join;

/// Release the handle on teardown and let the task finish on its own.
#[derive(Debug, Clone, Copy)]
pub struct Detach;

impl sealed::Sealed for Join {}
impl sealed::Sealed for Detach {}

impl ExecutionPolicy for Join {
    const NAME: &'static str = "join";

    fn resolve<R>(thread_name: &str, handle: JoinHandle<R>) {
        if let Err(payload) = handle.join() {
            error!(
                thread = thread_name,
                panic = %panic_message(payload.as_ref()),
                "Worker thread panicked"
            );
        } else {
            debug!(thread = thread_name, "Worker thread joined");
        }
    }
}

impl ExecutionPolicy for Detach {
    const NAME: &'static str = "detach";

    fn resolve<R>(thread_name: &str, handle: JoinHandle<R>) {
        drop(handle);
        debug!(thread = thread_name, "Worker thread detached");
    }
}

/// Lifecycle state of a [`HighIntegrityThread`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ThreadState {
    /// No task was ever started.
    Unstarted,
    /// The task is executing.
    Running,
    /// The task returned but the thread has not been resolved yet.
    Joinable,
    /// The thread has been joined or detached.
    Terminated,
}

/// Owner of exactly one worker thread, resolved once according to `P`.
pub struct HighIntegrityThread<P: ExecutionPolicy, R: Send + 'static = ()> {
    name: String,
    handle: Option<JoinHandle<R>>,
    started: bool,
    _policy: PhantomData<P>,
}

impl<P: ExecutionPolicy, R: Send + 'static> HighIntegrityThread<P, R> {
    /// Start `task` on a new named OS thread.
    ///
    /// # Errors
    /// [`GatewayError::ThreadSpawn`] if the OS refuses to create the thread.
    pub fn spawn<F>(name: impl Into<String>, task: F) -> GatewayResult<Self>
    where
        F: FnOnce() -> R + Send + 'static,
    {
        let name = name.into();
        let handle = thread::Builder::new()
            .name(name.clone())
            .spawn(task)
            .map_err(GatewayError::ThreadSpawn)?;
        debug!(thread = %name, policy = P::NAME, "Worker thread started");

        Ok(Self {
            name,
            handle: Some(handle),
            started: true,
            _policy: PhantomData,
        })
    }

    /// A wrapper that owns no thread yet.
    pub fn unstarted(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            handle: None,
            started: false,
            _policy: PhantomData,
        }
    }

    /// Thread name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Current lifecycle state.
    pub fn state(&self) -> ThreadState {
        match &self.handle {
            None if self.started => ThreadState::Terminated,
            None => ThreadState::Unstarted,
            Some(handle) if handle.is_finished() => ThreadState::Joinable,
            Some(_) => ThreadState::Running,
        }
    }

    /// True while the task is executing.
    pub fn is_running(&self) -> bool {
        self.state() == ThreadState::Running
    }

    /// Resolve the thread according to the policy. Later calls do nothing.
    pub fn finish(&mut self) {
        if let Some(handle) = self.handle.take() {
            P::resolve(&self.name, handle);
        }
    }
}

impl<R: Send + 'static> HighIntegrityThread<Join, R> {
    /// Wait for the task and hand back its result.
    ///
    /// # Errors
    /// - [`GatewayError::WorkerPanicked`] if the task panicked.
    /// - [`GatewayError::ThreadTerminated`] if the thread was already resolved or
    ///   never started.
    pub fn join(mut self) -> GatewayResult<R> {
        let handle = self
            .handle
            .take()
            .ok_or_else(|| GatewayError::ThreadTerminated(self.name.clone()))?;
        handle.join().map_err(|payload| GatewayError::WorkerPanicked {
            thread: self.name.clone(),
            message: panic_message(payload.as_ref()),
        })
    }
}

impl<P: ExecutionPolicy, R: Send + 'static> Drop for HighIntegrityThread<P, R> {
    fn drop(&mut self) {
        self.finish();
    }
}

impl<P: ExecutionPolicy, R: Send + 'static> fmt::Debug for HighIntegrityThread<P, R> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HighIntegrityThread")
            .field("name", &self.name)
            .field("policy", &P::NAME)
            .field("state", &self.state())
            .finish()
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "non-string panic payload".to_string()
    }
}

// =============================================================================
// StopSignal
// =============================================================================

/// Cloneable, one-way stop flag with interruptible waits.
#[derive(Clone, Default)]
pub struct StopSignal {
    inner: Arc<StopInner>,
}

#[derive(Default)]
struct StopInner {
    stopped: Mutex<bool>,
    condvar: Condvar,
}

impl StopSignal {
    /// A signal that has not been triggered.
    pub fn new() -> Self {
        Self::default()
    }

    /// Request stop and wake every waiter.
    pub fn trigger(&self) {
        let mut stopped = self.inner.stopped.lock();
        *stopped = true;
        self.inner.condvar.notify_all();
    }

    /// Whether stop has been requested.
    pub fn is_triggered(&self) -> bool {
        *self.inner.stopped.lock()
    }

    /// Sleep for up to `timeout`, waking early on stop.
    ///
    /// Returns `true` if stop was requested. A timeout too large to express as an
    /// [`Instant`] waits for the stop request alone.
    pub fn wait_timeout(&self, timeout: Duration) -> bool {
        let deadline = Instant::now().checked_add(timeout);
        let mut stopped = self.inner.stopped.lock();
        while !*stopped {
            match deadline {
                Some(deadline) => {
                    if self
                        .inner
                        .condvar
                        .wait_until(&mut stopped, deadline)
                        .timed_out()
                    {
                        break;
                    }
                }
                None => self.inner.condvar.wait(&mut stopped),
            }
        }
        *stopped
    }
}

impl fmt::Debug for StopSignal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StopSignal")
            .field("triggered", &self.is_triggered())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, Ordering};
    use tracing_test::traced_test;

    #[test]
    fn join_policy_blocks_until_task_returns() {
        let done = Arc::new(AtomicBool::new(false));
        let thread = {
            let done = Arc::clone(&done);
            HighIntegrityThread::<Join>::spawn("join-test", move || {
                thread::sleep(Duration::from_millis(100));
                done.store(true, Ordering::SeqCst);
            })
            .unwrap()
        };

        drop(thread);
        assert!(done.load(Ordering::SeqCst));
    }

    #[test]
    fn detach_policy_returns_immediately() {
        let release = StopSignal::new();
        let thread = {
            let release = release.clone();
            HighIntegrityThread::<Detach>::spawn("detach-test", move || {
                release.wait_timeout(Duration::from_secs(10));
            })
            .unwrap()
        };

        let start = Instant::now();
        drop(thread);
        assert!(start.elapsed() < Duration::from_secs(1));
        release.trigger();
    }

    #[test]
    fn finish_is_idempotent() {
        let mut thread = HighIntegrityThread::<Join>::spawn("idempotent", || {}).unwrap();
        thread.finish();
        assert_eq!(thread.state(), ThreadState::Terminated);
        thread.finish();
        assert_eq!(thread.state(), ThreadState::Terminated);
    }

    #[test]
    fn state_machine_transitions() {
        let unstarted = HighIntegrityThread::<Join>::unstarted("idle");
        assert_eq!(unstarted.state(), ThreadState::Unstarted);

        let gate = StopSignal::new();
        let mut thread = {
            let gate = gate.clone();
            HighIntegrityThread::<Join>::spawn("states", move || {
                gate.wait_timeout(Duration::from_secs(10));
            })
            .unwrap()
        };
        assert_eq!(thread.state(), ThreadState::Running);

        gate.trigger();
        let deadline = Instant::now() + Duration::from_secs(5);
        while thread.state() == ThreadState::Running && Instant::now() < deadline {
            thread::sleep(Duration::from_millis(5));
        }
        assert_eq!(thread.state(), ThreadState::Joinable);

        thread.finish();
        assert_eq!(thread.state(), ThreadState::Terminated);
    }

    #[test]
    fn assignment_resolves_the_replaced_thread() {
        let first_done = Arc::new(AtomicBool::new(false));
        let mut slot = {
            let first_done = Arc::clone(&first_done);
            HighIntegrityThread::<Join>::spawn("first", move || {
                thread::sleep(Duration::from_millis(50));
                first_done.store(true, Ordering::SeqCst);
            })
            .unwrap()
        };

        slot = HighIntegrityThread::<Join>::spawn("second", || {}).unwrap();
        assert!(first_done.load(Ordering::SeqCst));
        assert_eq!(slot.name(), "second");
    }

    #[test]
    fn join_returns_task_result() {
        let thread = HighIntegrityThread::<Join, u32>::spawn("answer", || 42).unwrap();
        assert_eq!(thread.join().unwrap(), 42);
    }

    #[test]
    fn join_reports_panics() {
        let thread =
            HighIntegrityThread::<Join, ()>::spawn("panicker", || panic!("sensor exploded"))
                .unwrap();
        match thread.join() {
            Err(GatewayError::WorkerPanicked { thread, message }) => {
                assert_eq!(thread, "panicker");
                assert!(message.contains("sensor exploded"));
            }
            other => panic!("unexpected result: {:?}", other),
        }
    }

    #[traced_test]
    #[test]
    fn dropping_a_panicked_thread_logs_instead_of_propagating() {
        let thread =
            HighIntegrityThread::<Join>::spawn("silent-panic", || panic!("bad frame")).unwrap();
        drop(thread);
        assert!(logs_contain("Worker thread panicked"));
    }

    #[test]
    fn join_on_unstarted_thread_is_an_error() {
        let thread = HighIntegrityThread::<Join>::unstarted("never");
        assert!(matches!(
            thread.join(),
            Err(GatewayError::ThreadTerminated(name)) if name == "never"
        ));
    }

    #[test]
    fn stop_signal_wakes_waiters_early() {
        let signal = StopSignal::new();
        assert!(!signal.wait_timeout(Duration::from_millis(10)));

        let waiter = {
            let signal = signal.clone();
            thread::spawn(move || {
                let start = Instant::now();
                let stopped = signal.wait_timeout(Duration::from_secs(10));
                (stopped, start.elapsed())
            })
        };
        thread::sleep(Duration::from_millis(20));
        signal.trigger();

        let (stopped, elapsed) = waiter.join().unwrap();
        assert!(stopped);
        assert!(elapsed < Duration::from_secs(5));
        assert!(signal.is_triggered());
    }

    #[test]
    fn unbounded_wait_returns_on_stop() {
        let signal = StopSignal::new();
        let waiter = {
            let signal = signal.clone();
            thread::spawn(move || signal.wait_timeout(Duration::MAX))
        };
        thread::sleep(Duration::from_millis(20));
        signal.trigger();

        assert!(waiter.join().unwrap());
        assert!(signal.wait_timeout(Duration::MAX));
    }
}
