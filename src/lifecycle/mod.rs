//! Thread lifecycle for long-running workers.
//!
//! Every long-lived thread in this crate is driven by the same state
//! machine: `Created -> Running -> Stopping -> Stopped`, no re-entry after
//! `Stopped`. A [`Worker`] supplies hooks around the transitions plus the
//! per-iteration [`Worker::execute`]; [`SingleWorker`] and [`MultiWorker`]
//! own the thread(s), the shutdown flag, and the interruptible sleep
//! between iterations.
//!
//! Failure policy: [`Worker::before_start`] is fallible and aborts startup
//! before any thread is spawned. Every other hook, and each `execute`
//! iteration, is logged on panic and the lifecycle carries on.

use std::any::Any;
use std::fmt;
use std::io;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use crossbeam_utils::sync::{Parker, Unparker};
use serde::Deserialize;
use tracing::{debug, error, warn};

// ============================================================================
// State machine
// ============================================================================

/// Lifecycle states, in order. Transitions are linear; a `Stopped` worker
/// is never restarted.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum State {
    Created,
    Running,
    Stopping,
    Stopped,
}

impl fmt::Display for State {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            State::Created => "created",
            State::Running => "running",
            State::Stopping => "stopping",
            State::Stopped => "stopped",
        };
        f.write_str(s)
    }
}

// ============================================================================
// Errors
// ============================================================================

/// Startup-time failures. Once a worker is running, nothing here applies:
/// iteration failures are logged and the loop continues.
#[derive(Debug)]
#[non_exhaustive]
pub enum WorkerError {
    /// Configuration rejected before any thread was spawned.
    Config(String),
    /// I/O failure while preparing or spawning a worker thread.
    Io(io::Error),
    /// `before_start` refused the startup.
    Startup(String),
}

impl fmt::Display for WorkerError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            WorkerError::Config(msg) => write!(f, "invalid configuration: {msg}"),
            WorkerError::Io(err) => write!(f, "worker i/o error: {err}"),
            WorkerError::Startup(msg) => write!(f, "worker startup failed: {msg}"),
        }
    }
}

impl std::error::Error for WorkerError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            WorkerError::Io(err) => Some(err),
            _ => None,
        }
    }
}

impl From<io::Error> for WorkerError {
    fn from(err: io::Error) -> Self {
        WorkerError::Io(err)
    }
}

// ============================================================================
// Worker trait
// ============================================================================

/// A unit of long-running work driven by [`SingleWorker`] or [`MultiWorker`].
///
/// `execute` is called repeatedly from the worker thread until shutdown.
/// One iteration should do a bounded amount of work and return; blocking is
/// fine as long as the implementation also honors its component's own stop
/// mechanism (see the reactor's waker or the pipe channel's handle close).
pub trait Worker: Send + 'static {
    /// Runs on the caller thread before the worker thread is spawned.
    /// An error aborts startup; the lifecycle stays `Created`.
    fn before_start(&mut self) -> Result<(), WorkerError> {
        Ok(())
    }

    /// Runs on the worker thread before the first `execute`.
    fn after_start(&mut self) {}

    /// One loop iteration. Panics are caught and logged per iteration.
    fn execute(&mut self);

    /// Runs on the worker thread once the loop has observed the stop flag.
    fn before_stop(&mut self) {}

    /// Runs on the worker thread last, after `before_stop`.
    fn after_stop(&mut self) {}
}

// ============================================================================
// Configuration
// ============================================================================

/// Configuration for a [`SingleWorker`]. Durations are milliseconds;
/// zero means "none" (no sleep, unbounded join).
#[derive(Clone, Debug, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct LifecycleConfig {
    /// Thread name, also used in log events.
    pub name: String,
    /// Sleep between iterations. Zero loops without sleeping.
    pub sleep_ms: u64,
    /// Subtract the iteration's execute time from the sleep, clamped at
    /// zero, so slow iterations do not stretch the effective period.
    pub deduct_execute_time: bool,
    /// Whether `shutdown` waits for the thread to finish.
    pub join_on_stop: bool,
    /// Upper bound on the join wait. Zero waits indefinitely.
    pub join_timeout_ms: u64,
}

impl Default for LifecycleConfig {
    fn default() -> Self {
        Self {
            name: "worker".to_string(),
            sleep_ms: 0,
            deduct_execute_time: false,
            join_on_stop: true,
            join_timeout_ms: 5_000,
        }
    }
}

impl LifecycleConfig {
    pub fn validate(&self) -> Result<(), WorkerError> {
        if self.name.is_empty() {
            return Err(WorkerError::Config("worker name must be non-empty".into()));
        }
        Ok(())
    }

    #[inline]
    fn sleep(&self) -> Duration {
        Duration::from_millis(self.sleep_ms)
    }
}

/// Configuration for a [`MultiWorker`] pool of identical threads.
#[derive(Clone, Debug, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct MultiWorkerConfig {
    /// Base thread name; threads are named `{name}-{index}`.
    pub name: String,
    /// Number of threads. Must be at least 1.
    pub threads: usize,
    /// Sleep between iterations, per thread. Zero loops without sleeping.
    pub sleep_ms: u64,
    /// Whether `shutdown` waits for the threads to finish.
    pub join_on_stop: bool,
    /// Upper bound on each join wait. Zero waits indefinitely.
    pub join_timeout_ms: u64,
    /// Niceness applied to each thread (Linux only). Failure to apply is
    /// logged and ignored.
    pub nice: Option<i32>,
}

impl Default for MultiWorkerConfig {
    fn default() -> Self {
        Self {
            name: "worker".to_string(),
            threads: 1,
            sleep_ms: 0,
            join_on_stop: true,
            join_timeout_ms: 5_000,
            nice: None,
        }
    }
}

impl MultiWorkerConfig {
    pub fn validate(&self) -> Result<(), WorkerError> {
        if self.name.is_empty() {
            return Err(WorkerError::Config("worker name must be non-empty".into()));
        }
        if self.threads == 0 {
            return Err(WorkerError::Config("threads must be >= 1".into()));
        }
        Ok(())
    }
}

// ============================================================================
// Shared lifecycle state
// ============================================================================

struct Shared {
    running: AtomicBool,
    state: Mutex<State>,
}

impl Shared {
    fn new() -> Arc<Self> {
        Arc::new(Self {
            running: AtomicBool::new(false),
            state: Mutex::new(State::Created),
        })
    }

    #[inline]
    fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }
}

/// Cheap clonable view of a lifecycle's stop flag. Workers that block
/// inside one `execute` call (the reactor's drain loop, pipe transfers)
/// poll this to bail out mid-iteration.
#[derive(Clone)]
pub struct StopHandle {
    shared: Arc<Shared>,
}

impl StopHandle {
    #[inline]
    pub fn is_running(&self) -> bool {
        self.shared.is_running()
    }

    pub fn state(&self) -> State {
        *self.shared.state.lock().unwrap_or_else(|e| e.into_inner())
    }
}

// ============================================================================
// Single-thread driver
// ============================================================================

/// Drives one [`Worker`] on one named thread.
///
/// `startup` consumes the worker: `before_start` runs on the caller (an
/// error leaves the lifecycle in `Created`), then the worker moves into
/// its thread where `after_start`, the iteration loop, `before_stop`, and
/// `after_stop` run in order. `shutdown` flips the stop flag, interrupts
/// the inter-iteration sleep, and joins per configuration. Both calls are
/// idempotent.
pub struct SingleWorker {
    cfg: LifecycleConfig,
    shared: Arc<Shared>,
    unparker: Mutex<Option<Unparker>>,
    handle: Mutex<Option<JoinHandle<()>>>,
}

impl SingleWorker {
    pub fn new(cfg: LifecycleConfig) -> Result<Self, WorkerError> {
        cfg.validate()?;
        Ok(Self {
            cfg,
            shared: Shared::new(),
            unparker: Mutex::new(None),
            handle: Mutex::new(None),
        })
    }

    pub fn name(&self) -> &str {
        &self.cfg.name
    }

    #[inline]
    pub fn is_running(&self) -> bool {
        self.shared.is_running()
    }

    pub fn state(&self) -> State {
        *self.shared.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn stop_handle(&self) -> StopHandle {
        StopHandle {
            shared: Arc::clone(&self.shared),
        }
    }

    pub fn startup<W: Worker>(&self, mut worker: W) -> Result<(), WorkerError> {
        let mut state = self.shared.state.lock().unwrap_or_else(|e| e.into_inner());
        match *state {
            State::Created => {}
            State::Running => {
                debug!(worker = %self.cfg.name, "startup on a running worker; ignoring");
                return Ok(());
            }
            State::Stopping | State::Stopped => {
                warn!(worker = %self.cfg.name, state = %*state, "startup after stop; ignoring");
                return Ok(());
            }
        }

        worker.before_start()?;

        let parker = Parker::new();
        *self.unparker.lock().unwrap_or_else(|e| e.into_inner()) =
            Some(parker.unparker().clone());
        self.shared.running.store(true, Ordering::Release);

        let shared = Arc::clone(&self.shared);
        let name = self.cfg.name.clone();
        let sleep = self.cfg.sleep();
        let deduct = self.cfg.deduct_execute_time;
        let spawn = thread::Builder::new()
            .name(name.clone())
            .spawn(move || worker_main(worker, &shared, parker, &name, sleep, deduct));
        let handle = match spawn {
            Ok(handle) => handle,
            Err(err) => {
                self.shared.running.store(false, Ordering::Release);
                return Err(WorkerError::Io(err));
            }
        };
        *self.handle.lock().unwrap_or_else(|e| e.into_inner()) = Some(handle);
        *state = State::Running;
        debug!(worker = %self.cfg.name, "worker started");
        Ok(())
    }

    /// Flips the stop flag and interrupts the sleep without joining.
    /// Components whose `execute` blocks on something other than the sleep
    /// call this first, unblock their thread, then call [`shutdown`].
    ///
    /// [`shutdown`]: SingleWorker::shutdown
    pub fn request_stop(&self) {
        let mut state = self.shared.state.lock().unwrap_or_else(|e| e.into_inner());
        if *state != State::Running {
            return;
        }
        *state = State::Stopping;
        drop(state);
        self.shared.running.store(false, Ordering::Release);
        if let Some(unparker) = self
            .unparker
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .take()
        {
            unparker.unpark();
        }
    }

    pub fn shutdown(&self) {
        self.request_stop();
        {
            let state = self.shared.state.lock().unwrap_or_else(|e| e.into_inner());
            if *state != State::Stopping {
                return;
            }
        }
        let handle = self
            .handle
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .take();
        if let Some(handle) = handle {
            if self.cfg.join_on_stop {
                join_worker(
                    handle,
                    Duration::from_millis(self.cfg.join_timeout_ms),
                    &self.cfg.name,
                );
            }
            // Without join_on_stop the thread is detached; the flipped flag
            // and unpark are its signal to wind down on its own.
        }
        *self.shared.state.lock().unwrap_or_else(|e| e.into_inner()) = State::Stopped;
        debug!(worker = %self.cfg.name, "worker stopped");
    }
}

// ============================================================================
// Multi-thread driver
// ============================================================================

/// Drives N workers, one per named thread, through the same lifecycle.
/// Each thread gets its own [`Worker`] instance from the factory passed to
/// [`startup`], so `Worker` implementations never need internal
/// synchronization for the multi case.
///
/// [`startup`]: MultiWorker::startup
pub struct MultiWorker {
    cfg: MultiWorkerConfig,
    shared: Arc<Shared>,
    unparkers: Mutex<Vec<Unparker>>,
    handles: Mutex<Vec<JoinHandle<()>>>,
}

impl MultiWorker {
    pub fn new(cfg: MultiWorkerConfig) -> Result<Self, WorkerError> {
        cfg.validate()?;
        Ok(Self {
            cfg,
            shared: Shared::new(),
            unparkers: Mutex::new(Vec::new()),
            handles: Mutex::new(Vec::new()),
        })
    }

    #[inline]
    pub fn is_running(&self) -> bool {
        self.shared.is_running()
    }

    pub fn state(&self) -> State {
        *self.shared.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn stop_handle(&self) -> StopHandle {
        StopHandle {
            shared: Arc::clone(&self.shared),
        }
    }

    /// Spawns `cfg.threads` threads, each running its own worker built by
    /// `make_worker(index)`. Every worker's `before_start` runs on the
    /// caller first; any failure aborts startup with no threads spawned.
    pub fn startup<W, F>(&self, mut make_worker: F) -> Result<(), WorkerError>
    where
        W: Worker,
        F: FnMut(usize) -> W,
    {
        let mut state = self.shared.state.lock().unwrap_or_else(|e| e.into_inner());
        match *state {
            State::Created => {}
            State::Running => {
                debug!(worker = %self.cfg.name, "startup on a running worker; ignoring");
                return Ok(());
            }
            State::Stopping | State::Stopped => {
                warn!(worker = %self.cfg.name, state = %*state, "startup after stop; ignoring");
                return Ok(());
            }
        }

        let mut workers = Vec::with_capacity(self.cfg.threads);
        for index in 0..self.cfg.threads {
            let mut worker = make_worker(index);
            worker.before_start()?;
            workers.push(worker);
        }

        self.shared.running.store(true, Ordering::Release);
        let sleep = Duration::from_millis(self.cfg.sleep_ms);
        let nice = self.cfg.nice;
        let mut unparkers = self.unparkers.lock().unwrap_or_else(|e| e.into_inner());
        let mut handles = self.handles.lock().unwrap_or_else(|e| e.into_inner());
        for (index, worker) in workers.into_iter().enumerate() {
            let parker = Parker::new();
            unparkers.push(parker.unparker().clone());
            let shared = Arc::clone(&self.shared);
            let name = format!("{}-{}", self.cfg.name, index);
            let spawn = thread::Builder::new().name(name.clone()).spawn(move || {
                if let Some(nice) = nice {
                    apply_niceness(nice, &name);
                }
                worker_main(worker, &shared, parker, &name, sleep, false);
            });
            match spawn {
                Ok(handle) => handles.push(handle),
                Err(err) => {
                    // Roll back: stop the threads already spawned.
                    self.shared.running.store(false, Ordering::Release);
                    for unparker in unparkers.drain(..) {
                        unparker.unpark();
                    }
                    for handle in handles.drain(..) {
                        join_worker(handle, Duration::from_millis(5_000), &self.cfg.name);
                    }
                    *state = State::Stopped;
                    return Err(WorkerError::Io(err));
                }
            }
        }
        *state = State::Running;
        debug!(worker = %self.cfg.name, threads = self.cfg.threads, "workers started");
        Ok(())
    }

    pub fn shutdown(&self) {
        {
            let mut state = self.shared.state.lock().unwrap_or_else(|e| e.into_inner());
            if *state != State::Running {
                return;
            }
            *state = State::Stopping;
        }
        self.shared.running.store(false, Ordering::Release);
        for unparker in self
            .unparkers
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .drain(..)
        {
            unparker.unpark();
        }
        let handles: Vec<_> = self
            .handles
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .drain(..)
            .collect();
        if self.cfg.join_on_stop {
            let timeout = Duration::from_millis(self.cfg.join_timeout_ms);
            for handle in handles {
                join_worker(handle, timeout, &self.cfg.name);
            }
        }
        *self.shared.state.lock().unwrap_or_else(|e| e.into_inner()) = State::Stopped;
        debug!(worker = %self.cfg.name, "workers stopped");
    }
}

// ============================================================================
// Worker thread body
// ============================================================================

fn worker_main<W: Worker>(
    mut worker: W,
    shared: &Shared,
    parker: Parker,
    name: &str,
    sleep: Duration,
    deduct: bool,
) {
    run_hook(name, "after_start", || worker.after_start());

    while shared.is_running() {
        let started = Instant::now();
        if let Err(panic) = catch_unwind(AssertUnwindSafe(|| worker.execute())) {
            error!(
                worker = name,
                panic = panic_message(&panic),
                "worker iteration panicked"
            );
        }
        if !sleep.is_zero() && shared.is_running() {
            let wait = if deduct {
                // A slow iteration eats into its own sleep, never below zero.
                sleep.saturating_sub(started.elapsed())
            } else {
                sleep
            };
            if !wait.is_zero() {
                // An unpark here is the stop signal; the loop condition
                // re-checks the flag. Spurious wakeups just loop early.
                parker.park_timeout(wait);
            }
        }
    }

    run_hook(name, "before_stop", || worker.before_stop());
    run_hook(name, "after_stop", || worker.after_stop());
}

fn run_hook(worker: &str, hook: &str, f: impl FnOnce()) {
    if let Err(panic) = catch_unwind(AssertUnwindSafe(f)) {
        error!(worker, hook, panic = panic_message(&panic), "lifecycle hook panicked");
    }
}

fn join_worker(handle: JoinHandle<()>, timeout: Duration, name: &str) {
    if timeout.is_zero() {
        if handle.join().is_err() {
            error!(worker = name, "worker thread panicked outside an iteration");
        }
        return;
    }
    let deadline = Instant::now() + timeout;
    while !handle.is_finished() {
        if Instant::now() >= deadline {
            warn!(
                worker = name,
                timeout_ms = timeout.as_millis() as u64,
                "join timed out; detaching worker thread"
            );
            return;
        }
        thread::sleep(Duration::from_millis(5));
    }
    if handle.join().is_err() {
        error!(worker = name, "worker thread panicked outside an iteration");
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> &str {
    if let Some(s) = panic.downcast_ref::<&'static str>() {
        s
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s
    } else {
        "non-string panic payload"
    }
}

#[cfg(target_os = "linux")]
fn apply_niceness(nice: i32, name: &str) {
    // who = 0 targets the calling thread.
    let rc = unsafe { libc::setpriority(libc::PRIO_PROCESS, 0, nice) };
    if rc != 0 {
        warn!(worker = name, nice, "failed to set thread niceness");
    }
}

#[cfg(not(target_os = "linux"))]
fn apply_niceness(_nice: i32, _name: &str) {}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    struct Recorder {
        iterations: Arc<AtomicUsize>,
        hooks: Arc<Mutex<Vec<&'static str>>>,
        fail_before_start: bool,
        panic_every_iteration: bool,
    }

    impl Recorder {
        fn new() -> (Self, Arc<AtomicUsize>, Arc<Mutex<Vec<&'static str>>>) {
            let iterations = Arc::new(AtomicUsize::new(0));
            let hooks = Arc::new(Mutex::new(Vec::new()));
            (
                Self {
                    iterations: Arc::clone(&iterations),
                    hooks: Arc::clone(&hooks),
                    fail_before_start: false,
                    panic_every_iteration: false,
                },
                iterations,
                hooks,
            )
        }
    }

    impl Worker for Recorder {
        fn before_start(&mut self) -> Result<(), WorkerError> {
            if self.fail_before_start {
                return Err(WorkerError::Startup("refused".into()));
            }
            self.hooks.lock().unwrap().push("before_start");
            Ok(())
        }
        fn after_start(&mut self) {
            self.hooks.lock().unwrap().push("after_start");
        }
        fn execute(&mut self) {
            self.iterations.fetch_add(1, Ordering::SeqCst);
            if self.panic_every_iteration {
                panic!("iteration boom");
            }
        }
        fn before_stop(&mut self) {
            self.hooks.lock().unwrap().push("before_stop");
        }
        fn after_stop(&mut self) {
            self.hooks.lock().unwrap().push("after_stop");
        }
    }

    fn cfg(name: &str, sleep_ms: u64) -> LifecycleConfig {
        LifecycleConfig {
            name: name.to_string(),
            sleep_ms,
            ..LifecycleConfig::default()
        }
    }

    #[test]
    fn runs_iterations_and_hooks_in_order() {
        let driver = SingleWorker::new(cfg("order", 1)).unwrap();
        let (worker, iterations, hooks) = Recorder::new();
        driver.startup(worker).unwrap();
        assert_eq!(driver.state(), State::Running);

        let deadline = Instant::now() + Duration::from_secs(2);
        while iterations.load(Ordering::SeqCst) < 3 && Instant::now() < deadline {
            thread::sleep(Duration::from_millis(5));
        }
        assert!(iterations.load(Ordering::SeqCst) >= 3);

        driver.shutdown();
        assert_eq!(driver.state(), State::Stopped);
        assert_eq!(
            *hooks.lock().unwrap(),
            vec!["before_start", "after_start", "before_stop", "after_stop"]
        );
    }

    #[test]
    fn before_start_failure_leaves_lifecycle_created() {
        let driver = SingleWorker::new(cfg("refuse", 1)).unwrap();
        let (mut worker, _, hooks) = Recorder::new();
        worker.fail_before_start = true;
        let err = driver.startup(worker).unwrap_err();
        assert!(matches!(err, WorkerError::Startup(_)));
        assert_eq!(driver.state(), State::Created);
        assert!(hooks.lock().unwrap().is_empty());
    }

    #[test]
    fn panicking_iterations_do_not_kill_the_loop() {
        let driver = SingleWorker::new(cfg("panicky", 1)).unwrap();
        let (mut worker, iterations, _) = Recorder::new();
        worker.panic_every_iteration = true;
        driver.startup(worker).unwrap();

        let deadline = Instant::now() + Duration::from_secs(2);
        while iterations.load(Ordering::SeqCst) < 3 && Instant::now() < deadline {
            thread::sleep(Duration::from_millis(5));
        }
        assert!(iterations.load(Ordering::SeqCst) >= 3);
        driver.shutdown();
    }

    #[test]
    fn shutdown_is_idempotent_and_startup_after_stop_is_ignored() {
        let driver = SingleWorker::new(cfg("idem", 1)).unwrap();
        let (worker, _, _) = Recorder::new();
        driver.startup(worker).unwrap();
        driver.shutdown();
        driver.shutdown();
        assert_eq!(driver.state(), State::Stopped);

        let (worker, iterations, _) = Recorder::new();
        driver.startup(worker).unwrap();
        assert_eq!(driver.state(), State::Stopped);
        thread::sleep(Duration::from_millis(20));
        assert_eq!(iterations.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn shutdown_interrupts_a_long_sleep() {
        let driver = SingleWorker::new(cfg("sleeper", 60_000)).unwrap();
        let (worker, iterations, _) = Recorder::new();
        driver.startup(worker).unwrap();
        let deadline = Instant::now() + Duration::from_secs(2);
        while iterations.load(Ordering::SeqCst) == 0 && Instant::now() < deadline {
            thread::sleep(Duration::from_millis(5));
        }

        let started = Instant::now();
        driver.shutdown();
        assert!(started.elapsed() < Duration::from_secs(5));
        assert_eq!(driver.state(), State::Stopped);
    }

    struct SlowTicker {
        busy: Duration,
        iterations: Arc<AtomicUsize>,
    }

    impl Worker for SlowTicker {
        fn execute(&mut self) {
            self.iterations.fetch_add(1, Ordering::SeqCst);
            thread::sleep(self.busy);
        }
    }

    #[test]
    fn deducted_sleep_keeps_the_period_from_stretching() {
        let driver = SingleWorker::new(LifecycleConfig {
            name: "deduct".to_string(),
            sleep_ms: 300,
            deduct_execute_time: true,
            ..LifecycleConfig::default()
        })
        .unwrap();
        let iterations = Arc::new(AtomicUsize::new(0));
        let worker = SlowTicker {
            busy: Duration::from_millis(250),
            iterations: Arc::clone(&iterations),
        };

        let started = Instant::now();
        driver.startup(worker).unwrap();
        let deadline = Instant::now() + Duration::from_secs(5);
        while iterations.load(Ordering::SeqCst) < 4 && Instant::now() < deadline {
            thread::sleep(Duration::from_millis(5));
        }
        let elapsed = started.elapsed();
        driver.shutdown();

        assert!(iterations.load(Ordering::SeqCst) >= 4);
        // Three full 300ms periods with the 250ms of work deducted from
        // each sleep. A fixed sleep would make the periods 550ms.
        assert!(
            elapsed < Duration::from_millis(1_400),
            "4 iterations took {elapsed:?}"
        );
    }

    #[test]
    fn over_budget_iterations_loop_again_immediately() {
        // 250ms of work against a 200ms sleep: the deducted wait clamps
        // at zero, so the period is just the execute time.
        let driver = SingleWorker::new(LifecycleConfig {
            name: "over-budget".to_string(),
            sleep_ms: 200,
            deduct_execute_time: true,
            ..LifecycleConfig::default()
        })
        .unwrap();
        let iterations = Arc::new(AtomicUsize::new(0));
        let worker = SlowTicker {
            busy: Duration::from_millis(250),
            iterations: Arc::clone(&iterations),
        };

        let started = Instant::now();
        driver.startup(worker).unwrap();
        let deadline = Instant::now() + Duration::from_secs(5);
        while iterations.load(Ordering::SeqCst) < 4 && Instant::now() < deadline {
            thread::sleep(Duration::from_millis(5));
        }
        let elapsed = started.elapsed();
        driver.shutdown();

        assert!(iterations.load(Ordering::SeqCst) >= 4);
        assert!(
            elapsed < Duration::from_millis(1_150),
            "4 iterations took {elapsed:?}"
        );
    }

    #[test]
    fn multi_worker_runs_one_worker_per_thread() {
        let driver = MultiWorker::new(MultiWorkerConfig {
            name: "multi".to_string(),
            threads: 3,
            sleep_ms: 1,
            ..MultiWorkerConfig::default()
        })
        .unwrap();

        let counts: Vec<Arc<AtomicUsize>> =
            (0..3).map(|_| Arc::new(AtomicUsize::new(0))).collect();
        let per_thread = counts.clone();

        struct Counting(Arc<AtomicUsize>);
        impl Worker for Counting {
            fn execute(&mut self) {
                self.0.fetch_add(1, Ordering::SeqCst);
            }
        }

        driver
            .startup(|index| Counting(Arc::clone(&per_thread[index])))
            .unwrap();

        let deadline = Instant::now() + Duration::from_secs(2);
        while counts
            .iter()
            .any(|c| c.load(Ordering::SeqCst) == 0)
            && Instant::now() < deadline
        {
            thread::sleep(Duration::from_millis(5));
        }
        driver.shutdown();
        for count in &counts {
            assert!(count.load(Ordering::SeqCst) > 0);
        }
        assert_eq!(driver.state(), State::Stopped);
    }

    #[test]
    fn config_validation_rejects_bad_values() {
        let bad = LifecycleConfig {
            name: String::new(),
            ..LifecycleConfig::default()
        };
        assert!(bad.validate().is_err());

        let bad = MultiWorkerConfig {
            threads: 0,
            ..MultiWorkerConfig::default()
        };
        assert!(bad.validate().is_err());
    }
}
