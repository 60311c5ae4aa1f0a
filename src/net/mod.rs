//! UDP front door: reusable datagram messages, message-ID dispatch, the
//! single-thread reactor, and the cooperative shutdown pieces.
//!
//! Wire format: every datagram starts its payload with a big-endian u16
//! message ID. The [`MessageDispatcher`] routes on that ID; datagrams with
//! no registered handler (or shorter than two bytes) are dropped silently
//! apart from a debug log line. ID [`SHUTDOWN_MESSAGE_ID`] is reserved for
//! the built-in [`ShutdownMessageHandler`].

mod dispatch;
mod message;
mod reactor;
mod shutdown;

pub use dispatch::{MessageDispatcher, MessageFilter, MessageHandler};
pub use message::DatagramMessage;
pub use reactor::{DatagramReactor, ReactorConfig};
pub use shutdown::{
    send_control, send_shutdown, ShutdownMessageHandler, ShutdownSignal, SHUTDOWN_MESSAGE_ID,
};
