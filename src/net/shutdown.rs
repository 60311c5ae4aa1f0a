//! Cooperative shutdown: the reserved datagram, the signal the
//! bootstrapper waits on, and the client helper that sends the datagram.

use std::io;
use std::net::{SocketAddr, UdpSocket};
use std::sync::{Arc, Condvar, Mutex};
use std::time::Duration;

use tracing::info;

use super::dispatch::MessageHandler;
use super::message::DatagramMessage;

/// Message ID reserved for the shutdown request.
pub const SHUTDOWN_MESSAGE_ID: u16 = 0;

struct SignalInner {
    requested: Mutex<bool>,
    condvar: Condvar,
}

/// One-way latch a daemon's main thread blocks on. Any thread (typically
/// the reactor running a [`ShutdownMessageHandler`]) can fire it; firing
/// is idempotent and wakes every waiter.
#[derive(Clone)]
pub struct ShutdownSignal {
    inner: Arc<SignalInner>,
}

impl Default for ShutdownSignal {
    fn default() -> Self {
        Self::new()
    }
}

impl ShutdownSignal {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(SignalInner {
                requested: Mutex::new(false),
                condvar: Condvar::new(),
            }),
        }
    }

    pub fn request(&self) {
        let mut requested = self
            .inner
            .requested
            .lock()
            .unwrap_or_else(|e| e.into_inner());
        *requested = true;
        self.inner.condvar.notify_all();
    }

    pub fn is_requested(&self) -> bool {
        *self
            .inner
            .requested
            .lock()
            .unwrap_or_else(|e| e.into_inner())
    }

    /// Blocks until the signal fires.
    pub fn wait(&self) {
        let mut requested = self
            .inner
            .requested
            .lock()
            .unwrap_or_else(|e| e.into_inner());
        while !*requested {
            requested = self
                .inner
                .condvar
                .wait(requested)
                .unwrap_or_else(|e| e.into_inner());
        }
    }

    /// Blocks up to `timeout`; returns whether the signal fired.
    pub fn wait_timeout(&self, timeout: Duration) -> bool {
        let deadline = std::time::Instant::now() + timeout;
        let mut requested = self
            .inner
            .requested
            .lock()
            .unwrap_or_else(|e| e.into_inner());
        while !*requested {
            let now = std::time::Instant::now();
            if now >= deadline {
                return false;
            }
            let (guard, _timed_out) = self
                .inner
                .condvar
                .wait_timeout(requested, deadline - now)
                .unwrap_or_else(|e| e.into_inner());
            requested = guard;
        }
        true
    }
}

/// Built-in handler for [`SHUTDOWN_MESSAGE_ID`]: fires the signal and
/// asks the reactor to echo an acknowledgement.
pub struct ShutdownMessageHandler {
    signal: ShutdownSignal,
}

impl ShutdownMessageHandler {
    pub fn new(signal: ShutdownSignal) -> Self {
        Self { signal }
    }
}

impl MessageHandler for ShutdownMessageHandler {
    fn execute(&mut self, message: &mut DatagramMessage) -> bool {
        info!(peer = ?message.peer(), "shutdown datagram received; requesting service stop");
        self.signal.request();
        true
    }
}

/// Sends a bare 2-byte control datagram carrying `id` to `addr`.
pub fn send_control(addr: SocketAddr, id: u16) -> io::Result<()> {
    let bind: SocketAddr = if addr.is_ipv4() {
        "0.0.0.0:0".parse().expect("literal addr")
    } else {
        "[::]:0".parse().expect("literal addr")
    };
    let socket = UdpSocket::bind(bind)?;
    socket.set_write_timeout(Some(Duration::from_secs(1)))?;
    socket.send_to(&id.to_be_bytes(), addr)?;
    Ok(())
}

/// Sends the reserved shutdown datagram to `addr`.
pub fn send_shutdown(addr: SocketAddr) -> io::Result<()> {
    send_control(addr, SHUTDOWN_MESSAGE_ID)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    #[test]
    fn signal_is_idempotent_and_visible_across_clones() {
        let signal = ShutdownSignal::new();
        let clone = signal.clone();
        assert!(!clone.is_requested());
        signal.request();
        signal.request();
        assert!(clone.is_requested());
        assert!(clone.wait_timeout(Duration::from_millis(1)));
    }

    #[test]
    fn wait_unblocks_when_another_thread_requests() {
        let signal = ShutdownSignal::new();
        let firing = signal.clone();
        let waiter = thread::spawn(move || signal.wait());
        thread::sleep(Duration::from_millis(20));
        firing.request();
        waiter.join().unwrap();
    }

    #[test]
    fn wait_timeout_expires_when_never_fired() {
        let signal = ShutdownSignal::new();
        assert!(!signal.wait_timeout(Duration::from_millis(10)));
    }

    #[test]
    fn handler_fires_the_signal_and_acks() {
        let signal = ShutdownSignal::new();
        let mut handler = ShutdownMessageHandler::new(signal.clone());
        let mut msg = DatagramMessage::new(8, 0);
        msg.put_message_id(SHUTDOWN_MESSAGE_ID);
        assert!(handler.execute(&mut msg));
        assert!(signal.is_requested());
    }
}
