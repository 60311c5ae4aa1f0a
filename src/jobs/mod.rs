//! Shared scheduler for low-priority periodic jobs.
//!
//! One thread sweeps the registered jobs in registration order every
//! `poll_interval`, running each job whose frequency has elapsed since
//! its last completion. Jobs never overlap, with themselves or with each
//! other. A job that has never run is due immediately, so every job runs
//! once on the first sweep. Errors and panics are logged per job and the
//! sweep continues; a job that outruns `max_time_before_error` earns an
//! error log but is not killed.
//!
//! Frequencies are minimum intervals, not deadlines. A slow job delays
//! everything scheduled behind it.

use std::fmt;
use std::io;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Mutex;
use std::time::{Duration, Instant};

use serde::Deserialize;
use tracing::{debug, error, warn};

use crate::lifecycle::{LifecycleConfig, SingleWorker, State, Worker, WorkerError};

// ============================================================================
// Job contract
// ============================================================================

#[derive(Debug)]
#[non_exhaustive]
pub enum JobError {
    Io(io::Error),
    Failed(String),
}

impl fmt::Display for JobError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            JobError::Io(err) => write!(f, "job i/o error: {err}"),
            JobError::Failed(msg) => write!(f, "job failed: {msg}"),
        }
    }
}

impl std::error::Error for JobError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            JobError::Io(err) => Some(err),
            _ => None,
        }
    }
}

impl From<io::Error> for JobError {
    fn from(err: io::Error) -> Self {
        JobError::Io(err)
    }
}

/// A unit of periodic background work.
pub trait Job: Send + 'static {
    /// Stable name used in log events.
    fn name(&self) -> &str;

    /// Minimum interval between the end of one run and the start of the
    /// next.
    fn frequency(&self) -> Duration;

    fn run(&mut self) -> Result<(), JobError>;
}

// ============================================================================
// Configuration
// ============================================================================

#[derive(Clone, Copy, Debug, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct SchedulerConfig {
    /// Sleep between sweeps.
    pub poll_interval_ms: u64,
    /// A run longer than this is logged as an error. Zero disables the
    /// check.
    pub max_time_before_error_ms: u64,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            poll_interval_ms: 1_000,
            max_time_before_error_ms: 0,
        }
    }
}

impl SchedulerConfig {
    pub fn validate(&self) -> Result<(), WorkerError> {
        if self.poll_interval_ms == 0 {
            return Err(WorkerError::Config("poll_interval_ms must be >= 1".into()));
        }
        Ok(())
    }
}

// ============================================================================
// Scheduler
// ============================================================================

struct ScheduledJob {
    job: Box<dyn Job>,
    /// Completion time of the last run; `None` until the first run.
    last_run: Option<Instant>,
}

/// Owns the scheduler thread. Register jobs before `startup`; the set is
/// fixed once running.
pub struct JobScheduler {
    cfg: SchedulerConfig,
    lifecycle: SingleWorker,
    /// Taken by `startup`; `None` afterwards.
    pending: Mutex<Option<Vec<ScheduledJob>>>,
}

impl JobScheduler {
    pub fn new(cfg: SchedulerConfig) -> Result<Self, WorkerError> {
        cfg.validate()?;
        let lifecycle = SingleWorker::new(LifecycleConfig {
            name: "job-scheduler".to_string(),
            sleep_ms: cfg.poll_interval_ms,
            ..LifecycleConfig::default()
        })?;
        Ok(Self {
            cfg,
            lifecycle,
            pending: Mutex::new(Some(Vec::new())),
        })
    }

    /// Adds a job. Jobs run in registration order. Registration after
    /// `startup` is logged and ignored.
    pub fn register(&self, job: Box<dyn Job>) {
        match self
            .pending
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .as_mut()
        {
            Some(jobs) => jobs.push(ScheduledJob {
                job,
                last_run: None,
            }),
            None => warn!("job registered after scheduler startup; ignoring"),
        }
    }

    pub fn startup(&self) -> Result<(), WorkerError> {
        let jobs = self
            .pending
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .take();
        match jobs {
            Some(jobs) => {
                debug!(jobs = jobs.len(), "job scheduler starting");
                self.lifecycle.startup(SchedulerWorker {
                    jobs,
                    max_run: Duration::from_millis(self.cfg.max_time_before_error_ms),
                })
            }
            None => Ok(()),
        }
    }

    pub fn shutdown(&self) {
        self.lifecycle.shutdown();
    }

    #[inline]
    pub fn is_running(&self) -> bool {
        self.lifecycle.is_running()
    }

    pub fn state(&self) -> State {
        self.lifecycle.state()
    }
}

struct SchedulerWorker {
    jobs: Vec<ScheduledJob>,
    max_run: Duration,
}

impl Worker for SchedulerWorker {
    fn execute(&mut self) {
        for entry in &mut self.jobs {
            let due = entry
                .last_run
                .map_or(true, |at| at.elapsed() >= entry.job.frequency());
            if !due {
                continue;
            }
            let name = entry.job.name().to_string();
            debug!(job = %name, "job starting");
            let started = Instant::now();
            let outcome = catch_unwind(AssertUnwindSafe(|| entry.job.run()));
            let elapsed = started.elapsed();
            entry.last_run = Some(Instant::now());
            match outcome {
                Ok(Ok(())) => debug!(job = %name, elapsed_ms = elapsed.as_millis() as u64, "job finished"),
                Ok(Err(err)) => error!(job = %name, error = %err, "job failed"),
                Err(_) => error!(job = %name, "job panicked"),
            }
            if !self.max_run.is_zero() && elapsed > self.max_run {
                error!(
                    job = %name,
                    elapsed_ms = elapsed.as_millis() as u64,
                    max_ms = self.max_run.as_millis() as u64,
                    "job exceeded its maximum run time"
                );
            }
        }
    }
}

// ============================================================================
// Tests
// ============================================================================
