//! Daemon-level configuration.
//!
//! Each component takes its own config struct by value; nothing reads a
//! global property store. [`RuntimeConfig`] is the optional aggregate a
//! daemon binary can deserialize from its config file and hand out piece
//! by piece. All durations are milliseconds; zero consistently means
//! "disabled" or "unbounded" per the field's docs.

use serde::Deserialize;

use crate::cache::CacheConfig;
use crate::jobs::SchedulerConfig;
use crate::lifecycle::WorkerError;
use crate::net::ReactorConfig;
#[cfg(unix)]
use crate::pipe::PipeConfig;
use crate::pool::PoolConfig;

/// Everything a typical daemon built on this crate configures, in one
/// deserializable struct. Components a deployment does not use stay at
/// their defaults (or `None`/empty) and are simply never started.
#[derive(Clone, Debug, Default, Deserialize)]
#[serde(default)]
pub struct RuntimeConfig {
    /// UDP front door. `None` runs without a reactor.
    pub reactor: Option<ReactorConfig>,
    /// FIFO transports, one entry per channel.
    #[cfg(unix)]
    pub pipes: Vec<PipeConfig>,
    /// Sizing for the shared transfer-buffer pool.
    pub buffer_pool: PoolConfig,
    pub cache: CacheConfig,
    pub scheduler: SchedulerConfig,
}

impl RuntimeConfig {
    /// Fail-fast validation of every section, reported with the section
    /// name.
    pub fn validate(&self) -> Result<(), WorkerError> {
        if let Some(reactor) = &self.reactor {
            reactor.validate()?;
        }
        self.buffer_pool
            .validate()
            .map_err(|err| WorkerError::Config(format!("buffer_pool: {err}")))?;
        if self.cache.capacity == 0 {
            return Err(WorkerError::Config("cache: capacity must be >= 1".into()));
        }
        self.scheduler.validate()?;
        Ok(())
    }
}
