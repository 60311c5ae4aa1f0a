//! Named-pipe (FIFO) transport with a stall watchdog.
//!
//! [`PipeChannel`] wraps a FIFO with blocking single-shot and
//! whole-buffer transfers, direction enforcement, and a per-operation
//! start timestamp. The watchdog thread restarts the channel's file
//! handle when an operation has been stuck past the configured maximum;
//! in-flight transfers on the old handle report a benign `Ok(0)` instead
//! of an error. [`PipeDriver`] is the stock worker that moves pooled
//! buffers between a channel and a bounded queue.

mod channel;
mod driver;
mod watchdog;

pub use channel::{Direction, PipeChannel, PipeConfig, PipeError};
pub use driver::{PipeDriver, PooledBuffer};
