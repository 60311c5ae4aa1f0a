//! Runtime toolkit for long-lived network daemons.
//!
//! ## Scope
//! This crate packages the recurring plumbing of a small always-on service:
//! a UDP request reactor with message-ID dispatch, watchdog-supervised
//! named-pipe IPC, pooled reusable buffers, a bounded LRU cache with
//! eviction callbacks, and a cooperative background-job scheduler. All
//! long-running pieces run on the same thread-lifecycle abstraction.
//!
//! ## Key invariants
//! - Every long-running thread follows one lifecycle:
//!   `Created -> Running -> Stopping -> Stopped`, with hooks around the
//!   transitions and an interruptible sleep between iterations.
//! - Failures inside a worker iteration are logged and the loop continues;
//!   only `before_start` aborts a component.
//! - Resources that outlive a single request (buffers, pipe handles) are
//!   pooled or generation-counted rather than reallocated per operation.
//! - Shutdown is cooperative: a reserved datagram flips a [`net::ShutdownSignal`]
//!   the bootstrapper waits on, then tears components down in order.
//!
//! ## Notable entry points
//! - [`lifecycle::SingleWorker`] / [`lifecycle::MultiWorker`]: thread drivers
//!   for anything implementing [`lifecycle::Worker`].
//! - [`net::DatagramReactor`] + [`net::MessageDispatcher`]: the UDP front door.
//! - [`pipe::PipeChannel`] + [`pipe::PipeDriver`]: FIFO transport with a
//!   stall watchdog.
//! - [`pool::ObjectPool`] / [`pool::BufferFactory`]: bounded reusable objects.
//! - [`cache::LruCache`]: access-ordered bounded map.
//! - [`jobs::JobScheduler`]: shared low-priority periodic jobs.

pub mod cache;
pub mod config;
pub mod jobs;
pub mod lifecycle;
pub mod logging;
pub mod net;
#[cfg(unix)]
pub mod pipe;
pub mod pool;

pub use cache::{CacheConfig, LruCache};
pub use config::RuntimeConfig;
pub use jobs::{Job, JobError, JobScheduler, SchedulerConfig};
pub use lifecycle::{
    LifecycleConfig, MultiWorker, MultiWorkerConfig, SingleWorker, State, StopHandle, Worker,
    WorkerError,
};
pub use net::{
    send_control, send_shutdown, DatagramMessage, DatagramReactor, MessageDispatcher,
    MessageFilter, MessageHandler, ReactorConfig, ShutdownMessageHandler, ShutdownSignal,
    SHUTDOWN_MESSAGE_ID,
};
#[cfg(unix)]
pub use pipe::{Direction, PipeChannel, PipeConfig, PipeDriver, PipeError, PooledBuffer};
pub use pool::{BufferFactory, ObjectPool, PoolConfig, PoolError, PoolableFactory, Pooled};
