//! Bounded, factory-driven object pool with blocking borrow.
//!
//! The pool caps live objects at `max_active`, keeps at most `max_idle`
//! of them parked for reuse, and makes callers of [`ObjectPool::borrow`]
//! wait up to `max_wait` when everything is checked out. Borrowed objects
//! come back automatically: [`Pooled`] is an RAII guard that passivates
//! and returns (or destroys, past the idle cap) its object on drop, so a
//! panic on the borrowing thread cannot leak pool capacity.
//!
//! [`BufferFactory`] is the stock factory for the reusable byte buffers
//! the pipe drivers move around.

use std::collections::VecDeque;
use std::fmt;
use std::ops::{Deref, DerefMut};
use std::sync::{Arc, Condvar, Mutex, MutexGuard};
use std::time::{Duration, Instant};

use serde::Deserialize;
use tracing::{debug, warn};

// ============================================================================
// Errors
// ============================================================================

#[derive(Debug)]
#[non_exhaustive]
pub enum PoolError {
    /// Invalid pool configuration.
    Config(String),
    /// All `max_active` objects stayed checked out for the full wait.
    Exhausted { max_active: usize, waited: Duration },
    /// The factory failed to create a new object.
    Create(String),
}

impl fmt::Display for PoolError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PoolError::Config(msg) => write!(f, "invalid pool configuration: {msg}"),
            PoolError::Exhausted { max_active, waited } => write!(
                f,
                "pool exhausted: {max_active} objects active after waiting {}ms",
                waited.as_millis()
            ),
            PoolError::Create(msg) => write!(f, "object creation failed: {msg}"),
        }
    }
}

impl std::error::Error for PoolError {}

// ============================================================================
// Factory contract
// ============================================================================

/// Supplies and maintains the pool's objects.
///
/// `create` runs lazily, only when a borrow finds no idle object and the
/// active count is below the cap. `validate` runs on idle objects at
/// borrow time; an object that fails is destroyed and another is tried.
/// `activate` runs just before an object is handed out, `passivate` just
/// after it comes back, `destroy` when an object leaves the pool for good.
pub trait PoolableFactory: Send + Sync + 'static {
    type Object: Send + 'static;

    fn create(&self) -> Result<Self::Object, PoolError>;

    fn activate(&self, _obj: &mut Self::Object) {}

    fn validate(&self, _obj: &Self::Object) -> bool {
        true
    }

    fn passivate(&self, _obj: &mut Self::Object) {}

    fn destroy(&self, _obj: Self::Object) {}
}

// ============================================================================
// Configuration
// ============================================================================

/// Pool sizing. `max_idle` above `max_active` is rejected; equal values
/// mean nothing returned is ever destroyed for being surplus.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct PoolConfig {
    /// Hard cap on objects alive at once (idle + borrowed).
    pub max_active: usize,
    /// Objects kept around for reuse; returns beyond this are destroyed.
    pub max_idle: usize,
    /// How long `borrow` blocks when the pool is exhausted. Zero fails
    /// immediately.
    pub max_wait_ms: u64,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            max_active: 8,
            max_idle: 8,
            max_wait_ms: 5_000,
        }
    }
}

impl PoolConfig {
    pub fn validate(&self) -> Result<(), PoolError> {
        if self.max_active == 0 {
            return Err(PoolError::Config("max_active must be >= 1".into()));
        }
        if self.max_idle > self.max_active {
            return Err(PoolError::Config(format!(
                "max_idle ({}) exceeds max_active ({})",
                self.max_idle, self.max_active
            )));
        }
        Ok(())
    }

    #[inline]
    fn max_wait(&self) -> Duration {
        Duration::from_millis(self.max_wait_ms)
    }
}

// ============================================================================
// Pool
// ============================================================================

struct PoolState<T> {
    idle: VecDeque<T>,
    active: usize,
}

/// Bounded pool of reusable objects. Construct with [`ObjectPool::new`]
/// and share the returned `Arc`; borrows hold a clone of it so guards can
/// cross threads.
pub struct ObjectPool<F: PoolableFactory> {
    name: String,
    factory: F,
    cfg: PoolConfig,
    state: Mutex<PoolState<F::Object>>,
    available: Condvar,
}

impl<F: PoolableFactory> ObjectPool<F> {
    pub fn new(name: impl Into<String>, factory: F, cfg: PoolConfig) -> Result<Arc<Self>, PoolError> {
        cfg.validate()?;
        Ok(Arc::new(Self {
            name: name.into(),
            factory,
            cfg,
            state: Mutex::new(PoolState {
                idle: VecDeque::with_capacity(cfg.max_idle),
                active: 0,
            }),
            available: Condvar::new(),
        }))
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Objects currently checked out.
    pub fn active(&self) -> usize {
        self.lock_state().active
    }

    /// Objects parked for reuse.
    pub fn idle(&self) -> usize {
        self.lock_state().idle.len()
    }

    /// Takes an object from the pool, creating one if under the cap,
    /// blocking up to the configured wait otherwise. The returned guard
    /// gives the object back on drop.
    pub fn borrow(self: &Arc<Self>) -> Result<Pooled<F>, PoolError> {
        let max_wait = self.cfg.max_wait();
        let deadline = Instant::now() + max_wait;
        let mut state = self.lock_state();
        loop {
            while let Some(mut obj) = state.idle.pop_front() {
                if self.factory.validate(&obj) {
                    self.factory.activate(&mut obj);
                    state.active += 1;
                    return Ok(Pooled {
                        pool: Arc::clone(self),
                        obj: Some(obj),
                    });
                }
                debug!(pool = %self.name, "idle object failed validation; destroying");
                drop(state);
                self.factory.destroy(obj);
                state = self.lock_state();
            }

            if state.active < self.cfg.max_active {
                // Reserve the slot, then create outside the lock.
                state.active += 1;
                drop(state);
                match self.factory.create() {
                    Ok(mut obj) => {
                        self.factory.activate(&mut obj);
                        return Ok(Pooled {
                            pool: Arc::clone(self),
                            obj: Some(obj),
                        });
                    }
                    Err(err) => {
                        self.lock_state().active -= 1;
                        self.available.notify_one();
                        return Err(err);
                    }
                }
            }

            let now = Instant::now();
            if now >= deadline {
                return Err(PoolError::Exhausted {
                    max_active: self.cfg.max_active,
                    waited: max_wait,
                });
            }
            let (guard, _timed_out) = self
                .available
                .wait_timeout(state, deadline - now)
                .unwrap_or_else(|e| e.into_inner());
            state = guard;
        }
    }

    fn give_back(&self, mut obj: F::Object) {
        self.factory.passivate(&mut obj);
        let mut state = self.lock_state();
        state.active = state.active.saturating_sub(1);
        if state.idle.len() < self.cfg.max_idle {
            state.idle.push_back(obj);
            drop(state);
        } else {
            drop(state);
            debug!(pool = %self.name, "idle cap reached; destroying returned object");
            self.factory.destroy(obj);
        }
        self.available.notify_one();
    }

    fn lock_state(&self) -> MutexGuard<'_, PoolState<F::Object>> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }
}

impl<F: PoolableFactory> Drop for ObjectPool<F> {
    fn drop(&mut self) {
        let mut state = self.lock_state();
        if state.active > 0 {
            warn!(pool = %self.name, active = state.active, "pool dropped with objects still borrowed");
        }
        for obj in state.idle.drain(..) {
            self.factory.destroy(obj);
        }
    }
}

// ============================================================================
// Borrow guard
// ============================================================================

/// RAII handle for a borrowed object. Dereferences to the object; drop
/// passivates it and returns it to the pool.
pub struct Pooled<F: PoolableFactory> {
    pool: Arc<ObjectPool<F>>,
    obj: Option<F::Object>,
}

impl<F: PoolableFactory> Pooled<F> {
    /// The pool this object belongs to.
    pub fn pool(&self) -> &Arc<ObjectPool<F>> {
        &self.pool
    }
}

impl<F: PoolableFactory> Deref for Pooled<F> {
    type Target = F::Object;

    #[inline]
    fn deref(&self) -> &F::Object {
        self.obj.as_ref().expect("pooled object taken before drop")
    }
}

impl<F: PoolableFactory> DerefMut for Pooled<F> {
    #[inline]
    fn deref_mut(&mut self) -> &mut F::Object {
        self.obj.as_mut().expect("pooled object taken before drop")
    }
}

impl<F: PoolableFactory> Drop for Pooled<F> {
    fn drop(&mut self) {
        if let Some(obj) = self.obj.take() {
            self.pool.give_back(obj);
        }
    }
}

impl<F: PoolableFactory> fmt::Debug for Pooled<F> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Pooled").field("pool", &self.pool.name).finish()
    }
}

// ============================================================================
// Byte-buffer factory
// ============================================================================

/// Factory for fixed-size `Vec<u8>` buffers. Every handout is exactly
/// `buffer_size` bytes and zeroed, whether fresh or recycled.
#[derive(Clone, Copy, Debug)]
pub struct BufferFactory {
    buffer_size: usize,
}

impl BufferFactory {
    pub fn new(buffer_size: usize) -> Self {
        Self { buffer_size }
    }

    #[inline]
    pub fn buffer_size(&self) -> usize {
        self.buffer_size
    }
}

impl PoolableFactory for BufferFactory {
    type Object = Vec<u8>;

    fn create(&self) -> Result<Vec<u8>, PoolError> {
        Ok(vec![0u8; self.buffer_size])
    }

    fn activate(&self, buf: &mut Vec<u8>) {
        buf.fill(0);
    }

    fn validate(&self, buf: &Vec<u8>) -> bool {
        buf.len() == self.buffer_size
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::thread;

    /// Factory that counts lifecycle calls and can be told to fail or
    /// produce invalid objects.
    struct CountingFactory {
        created: AtomicUsize,
        destroyed: AtomicUsize,
        fail_create: bool,
        invalidate_all: AtomicUsize,
        live_now: AtomicUsize,
        live_peak: AtomicUsize,
    }

    impl CountingFactory {
        fn new() -> Self {
            Self {
                created: AtomicUsize::new(0),
                destroyed: AtomicUsize::new(0),
                fail_create: false,
                invalidate_all: AtomicUsize::new(0),
                live_now: AtomicUsize::new(0),
                live_peak: AtomicUsize::new(0),
            }
        }
    }

    impl PoolableFactory for CountingFactory {
        type Object = u64;

        fn create(&self) -> Result<u64, PoolError> {
            if self.fail_create {
                return Err(PoolError::Create("factory offline".into()));
            }
            Ok(self.created.fetch_add(1, Ordering::SeqCst) as u64)
        }

        fn activate(&self, _obj: &mut u64) {
            let now = self.live_now.fetch_add(1, Ordering::SeqCst) + 1;
            self.live_peak.fetch_max(now, Ordering::SeqCst);
        }

        fn validate(&self, _obj: &u64) -> bool {
            self.invalidate_all.load(Ordering::SeqCst) == 0
        }

        fn passivate(&self, _obj: &mut u64) {
            self.live_now.fetch_sub(1, Ordering::SeqCst);
        }

        fn destroy(&self, _obj: u64) {
            self.destroyed.fetch_add(1, Ordering::SeqCst);
        }
    }

    fn cfg(max_active: usize, max_idle: usize, max_wait_ms: u64) -> PoolConfig {
        PoolConfig {
            max_active,
            max_idle,
            max_wait_ms,
        }
    }

    #[test]
    fn borrow_reuses_returned_objects() {
        let pool = ObjectPool::new("t", CountingFactory::new(), cfg(2, 2, 100)).unwrap();
        let first = pool.borrow().unwrap();
        let first_id = *first;
        drop(first);
        let second = pool.borrow().unwrap();
        assert_eq!(*second, first_id);
        assert_eq!(pool.active(), 1);
        assert_eq!(pool.idle(), 0);
    }

    #[test]
    fn exhausted_pool_times_out() {
        let pool = ObjectPool::new("t", CountingFactory::new(), cfg(1, 1, 50)).unwrap();
        let _held = pool.borrow().unwrap();
        let err = pool.borrow().unwrap_err();
        assert!(matches!(err, PoolError::Exhausted { max_active: 1, .. }));
    }

    #[test]
    fn waiting_borrow_wakes_when_an_object_returns() {
        let pool = ObjectPool::new("t", CountingFactory::new(), cfg(1, 1, 2_000)).unwrap();
        let held = pool.borrow().unwrap();
        let pool2 = Arc::clone(&pool);
        let waiter = thread::spawn(move || pool2.borrow().map(|b| *b));
        thread::sleep(Duration::from_millis(50));
        drop(held);
        let got = waiter.join().unwrap();
        assert!(got.is_ok());
    }

    #[test]
    fn active_never_exceeds_cap_under_contention() {
        let pool = ObjectPool::new("t", CountingFactory::new(), cfg(3, 3, 2_000)).unwrap();
        let mut handles = Vec::new();
        for _ in 0..8 {
            let pool = Arc::clone(&pool);
            handles.push(thread::spawn(move || {
                for _ in 0..20 {
                    let obj = pool.borrow().unwrap();
                    thread::sleep(Duration::from_millis(1));
                    drop(obj);
                }
            }));
        }
        for handle in handles {
            handle.join().unwrap();
        }
        assert!(pool.factory.live_peak.load(Ordering::SeqCst) <= 3);
        assert_eq!(pool.active(), 0);
    }

    #[test]
    fn returns_beyond_max_idle_are_destroyed() {
        let pool = ObjectPool::new("t", CountingFactory::new(), cfg(3, 1, 100)).unwrap();
        let a = pool.borrow().unwrap();
        let b = pool.borrow().unwrap();
        let c = pool.borrow().unwrap();
        drop(a);
        drop(b);
        drop(c);
        assert_eq!(pool.idle(), 1);
        assert_eq!(pool.factory.destroyed.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn invalid_idle_objects_are_replaced() {
        let pool = ObjectPool::new("t", CountingFactory::new(), cfg(2, 2, 100)).unwrap();
        drop(pool.borrow().unwrap());
        pool.factory.invalidate_all.store(1, Ordering::SeqCst);
        // Idle object fails validation; a fresh one is created instead.
        let obj = pool.borrow().unwrap();
        assert_eq!(*obj, 1);
        assert_eq!(pool.factory.destroyed.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn create_failure_releases_the_reserved_slot() {
        let mut factory = CountingFactory::new();
        factory.fail_create = true;
        let pool = ObjectPool::new("t", factory, cfg(1, 1, 50)).unwrap();
        assert!(matches!(pool.borrow(), Err(PoolError::Create(_))));
        // The failed reservation must not count as active forever.
        assert_eq!(pool.active(), 0);
    }

    #[test]
    fn config_validation() {
        assert!(cfg(0, 0, 0).validate().is_err());
        assert!(cfg(2, 3, 0).validate().is_err());
        assert!(cfg(4, 2, 100).validate().is_ok());
    }

    #[test]
    fn buffer_factory_hands_out_zeroed_fixed_size_buffers() {
        let pool = ObjectPool::new("buf", BufferFactory::new(16), cfg(2, 2, 100)).unwrap();
        let mut buf = pool.borrow().unwrap();
        assert_eq!(buf.len(), 16);
        buf[0] = 0xAB;
        drop(buf);
        let buf = pool.borrow().unwrap();
        assert_eq!(buf.len(), 16);
        assert!(buf.iter().all(|&b| b == 0));
    }
}
