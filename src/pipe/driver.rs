//! Workers that move pooled buffers between a pipe channel and a queue.
//!
//! A read driver borrows a buffer from the pool, fills it from the pipe,
//! and pushes the guard onto a bounded queue; a full queue discards the
//! buffer with an error log rather than blocking the pipe. A write driver
//! pops buffers off its queue with a short timeout (so shutdown is
//! noticed) and writes them whole. Dropping the guard, on any path,
//! returns the buffer to the pool.

use std::time::Duration;

use crossbeam_channel::{Receiver, RecvTimeoutError, Sender, TrySendError};
use std::sync::Arc;
use tracing::{debug, error};

use crate::lifecycle::{Worker, WorkerError};
use crate::pool::{BufferFactory, ObjectPool, Pooled};

use super::channel::PipeChannel;

/// A pool-owned byte buffer in flight between pipe and queue.
pub type PooledBuffer = Pooled<BufferFactory>;

/// How long the write side waits for a buffer before re-checking its
/// lifecycle.
const POP_TIMEOUT: Duration = Duration::from_millis(250);

enum Mode {
    Read { queue: Sender<PooledBuffer> },
    Write { queue: Receiver<PooledBuffer> },
}

/// One direction of pipe traffic, expressed as a [`Worker`]. Drive it
/// with a [`SingleWorker`](crate::lifecycle::SingleWorker) with no loop
/// sleep; each iteration moves at most one buffer.
pub struct PipeDriver {
    channel: PipeChannel,
    pool: Arc<ObjectPool<BufferFactory>>,
    mode: Mode,
}

impl PipeDriver {
    /// Builds the read side: pipe -> queue. The channel must permit
    /// reads.
    pub fn reader(
        channel: PipeChannel,
        pool: Arc<ObjectPool<BufferFactory>>,
        queue: Sender<PooledBuffer>,
    ) -> Result<Self, WorkerError> {
        if !channel.direction().can_read() {
            return Err(WorkerError::Config(format!(
                "read driver requires a readable pipe; {} is {}",
                channel.path().display(),
                channel.direction()
            )));
        }
        Ok(Self {
            channel,
            pool,
            mode: Mode::Read { queue },
        })
    }

    /// Builds the write side: queue -> pipe. The channel must permit
    /// writes.
    pub fn writer(
        channel: PipeChannel,
        pool: Arc<ObjectPool<BufferFactory>>,
        queue: Receiver<PooledBuffer>,
    ) -> Result<Self, WorkerError> {
        if !channel.direction().can_write() {
            return Err(WorkerError::Config(format!(
                "write driver requires a writable pipe; {} is {}",
                channel.path().display(),
                channel.direction()
            )));
        }
        Ok(Self {
            channel,
            pool,
            mode: Mode::Write { queue },
        })
    }

    fn read_pass(&mut self) {
        let Mode::Read { queue } = &self.mode else {
            return;
        };
        let mut buf = match self.pool.borrow() {
            Ok(buf) => buf,
            Err(err) => {
                error!(
                    pipe = %self.channel.path().display(),
                    error = %err,
                    "no buffer available; skipping read pass"
                );
                return;
            }
        };
        let expected = buf.len();
        let n = match self.channel.read_all(&mut buf) {
            Ok(n) => n,
            Err(err) => {
                error!(pipe = %self.channel.path().display(), error = %err, "pipe read failed");
                return;
            }
        };
        if n == 0 {
            // Stopped or restarted; nothing to forward.
            return;
        }
        if n != expected {
            error!(
                pipe = %self.channel.path().display(),
                expected,
                got = n,
                "short read from pipe; discarding buffer"
            );
            return;
        }
        match queue.try_send(buf) {
            Ok(()) => {}
            Err(TrySendError::Full(buf)) => {
                error!(
                    pipe = %self.channel.path().display(),
                    "transfer queue full; message discarded"
                );
                drop(buf);
            }
            Err(TrySendError::Disconnected(buf)) => {
                debug!(pipe = %self.channel.path().display(), "transfer queue disconnected");
                drop(buf);
            }
        }
    }

    fn write_pass(&mut self) {
        let Mode::Write { queue } = &self.mode else {
            return;
        };
        let buf = match queue.recv_timeout(POP_TIMEOUT) {
            Ok(buf) => buf,
            Err(RecvTimeoutError::Timeout) => return,
            Err(RecvTimeoutError::Disconnected) => {
                // Producer gone; idle until the lifecycle stops us.
                std::thread::sleep(POP_TIMEOUT);
                return;
            }
        };
        match self.channel.write_all(&buf) {
            Ok(n) if n != buf.len() => {
                error!(
                    pipe = %self.channel.path().display(),
                    expected = buf.len(),
                    wrote = n,
                    "short write to pipe; message truncated"
                );
            }
            Ok(_) => {}
            Err(err) => {
                error!(pipe = %self.channel.path().display(), error = %err, "pipe write failed");
            }
        }
    }
}

impl Worker for PipeDriver {
    fn execute(&mut self) {
        match self.mode {
            Mode::Read { .. } => self.read_pass(),
            Mode::Write { .. } => self.write_pass(),
        }
    }
}
