//! Blocking FIFO channel with restartable handle.

use std::fmt;
use std::fs::{self, File, OpenOptions};
use std::io::{self, Read, Write};
use std::os::unix::fs::FileTypeExt;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use serde::Deserialize;
use tracing::{debug, info};

use crate::lifecycle::{LifecycleConfig, SingleWorker};

use super::watchdog::{WatchdogWorker, WATCHDOG_INTERVAL_MS};

// ============================================================================
// Types
// ============================================================================

/// Which transfers the channel's API permits. The underlying FIFO is
/// always opened read+write so `open` never blocks waiting for a peer;
/// the restriction is enforced here, not by the OS.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    Read,
    Write,
    Bidirectional,
}

impl Direction {
    #[inline]
    pub fn can_read(self) -> bool {
        matches!(self, Direction::Read | Direction::Bidirectional)
    }

    #[inline]
    pub fn can_write(self) -> bool {
        matches!(self, Direction::Write | Direction::Bidirectional)
    }
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Direction::Read => "read",
            Direction::Write => "write",
            Direction::Bidirectional => "bidirectional",
        };
        f.write_str(s)
    }
}

#[derive(Debug)]
#[non_exhaustive]
pub enum PipeError {
    /// The path does not exist. The channel never creates the FIFO.
    NotFound(PathBuf),
    /// The path exists but is not a FIFO.
    NotAPipe(PathBuf),
    /// The requested transfer is not permitted by the channel direction.
    DirectionViolation {
        path: PathBuf,
        direction: Direction,
        op: &'static str,
    },
    /// Transfer or open failure on a live handle.
    Io { path: PathBuf, source: io::Error },
}

impl fmt::Display for PipeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PipeError::NotFound(path) => write!(f, "named pipe not found: {}", path.display()),
            PipeError::NotAPipe(path) => {
                write!(f, "path is not a named pipe: {}", path.display())
            }
            PipeError::DirectionViolation { path, direction, op } => write!(
                f,
                "{op} not permitted on {direction} pipe {}",
                path.display()
            ),
            PipeError::Io { path, source } => {
                write!(f, "pipe i/o error on {}: {source}", path.display())
            }
        }
    }
}

impl std::error::Error for PipeError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            PipeError::Io { source, .. } => Some(source),
            _ => None,
        }
    }
}

/// Channel configuration.
#[derive(Clone, Debug, Deserialize)]
pub struct PipeConfig {
    /// Path to an existing FIFO.
    pub path: PathBuf,
    pub direction: Direction,
    /// Maximum wall-clock time one transfer may stay blocked before the
    /// watchdog restarts the handle. Zero disables the watchdog.
    #[serde(default)]
    pub max_op_time_ms: u64,
}

impl PipeConfig {
    #[inline]
    pub fn max_op_time(&self) -> Duration {
        Duration::from_millis(self.max_op_time_ms)
    }
}

// ============================================================================
// Shared channel state
// ============================================================================

pub(super) struct PipeShared {
    pub(super) path: PathBuf,
    pub(super) direction: Direction,
    pub(super) max_op_time_ms: u64,
    pub(super) running: AtomicBool,
    /// Epoch millis when the in-flight operation started; 0 when idle.
    pub(super) op_started_ms: AtomicU64,
    /// Bumped by every restart. A transfer that observes a different
    /// generation after its syscall reports `Ok(0)`.
    generation: AtomicU64,
    handle: Mutex<Option<Arc<File>>>,
}

impl PipeShared {
    fn open_file(path: &Path) -> Result<File, PipeError> {
        let meta = fs::metadata(path).map_err(|_| PipeError::NotFound(path.to_path_buf()))?;
        if !meta.file_type().is_fifo() {
            return Err(PipeError::NotAPipe(path.to_path_buf()));
        }
        // Read+write regardless of direction: a FIFO opened one-sided
        // blocks until a peer appears, and this open must not.
        OpenOptions::new()
            .read(true)
            .write(true)
            .open(path)
            .map_err(|source| PipeError::Io {
                path: path.to_path_buf(),
                source,
            })
    }

    fn open(&self) -> Result<(), PipeError> {
        let file = Self::open_file(&self.path)?;
        self.op_started_ms.store(0, Ordering::Release);
        *self.handle.lock().unwrap_or_else(|e| e.into_inner()) = Some(Arc::new(file));
        Ok(())
    }

    fn close(&self) {
        *self.handle.lock().unwrap_or_else(|e| e.into_inner()) = None;
    }

    /// Compare-and-restart: bump the generation, drop the stuck handle,
    /// and reopen, all under the handle lock so concurrent restarts
    /// serialize.
    pub(super) fn restart(&self) -> Result<(), PipeError> {
        let mut guard = self.handle.lock().unwrap_or_else(|e| e.into_inner());
        self.generation.fetch_add(1, Ordering::AcqRel);
        self.op_started_ms.store(0, Ordering::Release);
        *guard = None;
        let file = Self::open_file(&self.path)?;
        *guard = Some(Arc::new(file));
        Ok(())
    }

    /// Snapshot of the current handle and its generation, or `None` when
    /// the channel is closed.
    fn current(&self) -> Option<(Arc<File>, u64)> {
        let guard = self.handle.lock().unwrap_or_else(|e| e.into_inner());
        guard
            .as_ref()
            .map(|file| (Arc::clone(file), self.generation.load(Ordering::Acquire)))
    }

    #[inline]
    pub(super) fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }
}

pub(super) fn epoch_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}

/// Clears the operation timestamp when the transfer ends, panic or not.
struct OpStamp<'a> {
    shared: &'a PipeShared,
}

impl<'a> OpStamp<'a> {
    fn begin(shared: &'a PipeShared) -> Self {
        shared.op_started_ms.store(epoch_millis(), Ordering::Release);
        Self { shared }
    }
}

impl Drop for OpStamp<'_> {
    fn drop(&mut self) {
        self.shared.op_started_ms.store(0, Ordering::Release);
    }
}

// ============================================================================
// Channel
// ============================================================================

/// A named-pipe endpoint safe to share across threads (reads and writes
/// may be driven independently; clone the channel per thread).
///
/// `startup` opens the pre-existing FIFO and, when a maximum operation
/// time is configured, spawns the watchdog that restarts the handle on a
/// stall. Transfers on a stopped channel, and transfers overtaken by a
/// restart, return `Ok(0)` rather than an error.
#[derive(Clone)]
pub struct PipeChannel {
    shared: Arc<PipeShared>,
    watchdog: Arc<SingleWorker>,
}

impl PipeChannel {
    pub fn new(cfg: PipeConfig) -> Result<Self, PipeError> {
        let watchdog = SingleWorker::new(LifecycleConfig {
            name: "pipe-watchdog".to_string(),
            sleep_ms: WATCHDOG_INTERVAL_MS,
            ..LifecycleConfig::default()
        })
        .map_err(|err| PipeError::Io {
            path: cfg.path.clone(),
            source: io::Error::other(err.to_string()),
        })?;
        Ok(Self {
            shared: Arc::new(PipeShared {
                path: cfg.path,
                direction: cfg.direction,
                max_op_time_ms: cfg.max_op_time_ms,
                running: AtomicBool::new(false),
                op_started_ms: AtomicU64::new(0),
                generation: AtomicU64::new(0),
                handle: Mutex::new(None),
            }),
            watchdog: Arc::new(watchdog),
        })
    }

    pub fn path(&self) -> &Path {
        &self.shared.path
    }

    #[inline]
    pub fn direction(&self) -> Direction {
        self.shared.direction
    }

    #[inline]
    pub fn is_running(&self) -> bool {
        self.shared.is_running()
    }

    /// Opens the FIFO and starts the watchdog. Fails fast when the path
    /// is missing or not a FIFO; idempotent once running.
    pub fn startup(&self) -> Result<(), PipeError> {
        if self.shared.is_running() {
            return Ok(());
        }
        self.shared.open()?;
        self.shared.running.store(true, Ordering::Release);
        info!(path = %self.shared.path.display(), direction = %self.shared.direction, "pipe channel open");
        if self.shared.max_op_time_ms > 0 {
            self.watchdog
                .startup(WatchdogWorker::new(Arc::clone(&self.shared)))
                .map_err(|err| PipeError::Io {
                    path: self.shared.path.clone(),
                    source: io::Error::other(err.to_string()),
                })?;
        }
        Ok(())
    }

    /// Stops the channel and the watchdog, closing the handle. A transfer
    /// blocked in a syscall stays blocked until the FIFO sees traffic;
    /// when it returns it observes the stopped channel and reports
    /// `Ok(0)`.
    pub fn shutdown(&self) {
        if !self.shared.running.swap(false, Ordering::AcqRel) {
            return;
        }
        self.shared.close();
        self.watchdog.shutdown();
        info!(path = %self.shared.path.display(), "pipe channel closed");
    }

    /// Drops the current handle and reopens the FIFO, invalidating any
    /// in-flight transfer.
    pub fn restart(&self) -> Result<(), PipeError> {
        debug!(path = %self.shared.path.display(), "pipe channel restarting");
        self.shared.restart()
    }

    /// One blocking read. Returns the bytes read, or `Ok(0)` when the
    /// channel is stopped or was restarted mid-transfer.
    pub fn read(&self, buf: &mut [u8]) -> Result<usize, PipeError> {
        self.check_direction("read", Direction::can_read)?;
        self.transfer(|file| (&*file).read(buf))
    }

    /// One blocking write. Same `Ok(0)` conventions as [`read`].
    ///
    /// [`read`]: PipeChannel::read
    pub fn write(&self, buf: &[u8]) -> Result<usize, PipeError> {
        self.check_direction("write", Direction::can_write)?;
        self.transfer(|file| (&*file).write(buf))
    }

    /// Reads until `buf` is full, the channel stops, or a restart cuts
    /// the transfer short. Returns the bytes actually read.
    pub fn read_all(&self, buf: &mut [u8]) -> Result<usize, PipeError> {
        self.check_direction("read", Direction::can_read)?;
        let mut count = 0;
        while count < buf.len() {
            let n = self.transfer(|file| (&*file).read(&mut buf[count..]))?;
            if n == 0 {
                break;
            }
            count += n;
        }
        Ok(count)
    }

    /// Writes all of `buf` unless the channel stops or restarts first.
    /// Returns the bytes actually written.
    pub fn write_all(&self, buf: &[u8]) -> Result<usize, PipeError> {
        self.check_direction("write", Direction::can_write)?;
        let mut count = 0;
        while count < buf.len() {
            let n = self.transfer(|file| (&*file).write(&buf[count..]))?;
            if n == 0 {
                break;
            }
            count += n;
        }
        Ok(count)
    }

    fn check_direction(
        &self,
        op: &'static str,
        permitted: impl Fn(Direction) -> bool,
    ) -> Result<(), PipeError> {
        if permitted(self.shared.direction) {
            Ok(())
        } else {
            Err(PipeError::DirectionViolation {
                path: self.shared.path.clone(),
                direction: self.shared.direction,
                op,
            })
        }
    }

    /// Runs one blocking syscall against the current handle with the
    /// operation timestamp held. A stop or restart observed afterwards
    /// turns the outcome into `Ok(0)`.
    fn transfer(&self, op: impl FnOnce(&File) -> io::Result<usize>) -> Result<usize, PipeError> {
        if !self.shared.is_running() {
            return Ok(0);
        }
        let Some((file, generation)) = self.shared.current() else {
            return Ok(0);
        };
        let result = {
            let _stamp = OpStamp::begin(&self.shared);
            op(file.as_ref())
        };
        let invalidated = !self.shared.is_running()
            || self.shared.generation.load(Ordering::Acquire) != generation;
        match result {
            Ok(_) if invalidated => Ok(0),
            Ok(n) => Ok(n),
            Err(_) if invalidated => Ok(0),
            Err(source) => Err(PipeError::Io {
                path: self.shared.path.clone(),
                source,
            }),
        }
    }
}

// ============================================================================
// Tests
// ============================================================================
