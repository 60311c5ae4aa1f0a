//! Single-thread UDP reactor.
//!
//! One worker thread owns the socket, a `Poll`, and one reusable
//! [`DatagramMessage`]. Each iteration blocks in `poll` until the socket
//! is readable or the shutdown waker fires, then drains every pending
//! datagram: reset the message, receive, filter, dispatch, and echo the
//! payload back when the handler asks for it and the reactor is still
//! running. Write interest is raised for the duration of a drain batch
//! and dropped afterwards.
//!
//! Any error on a single datagram (receive, dispatch, echo) is logged and
//! the loop moves on; only a failed bind aborts startup.

use std::io;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

use mio::net::UdpSocket;
use mio::{Events, Interest, Poll, Registry, Token, Waker};
use serde::Deserialize;
use tracing::{error, info, trace, warn};

use crate::lifecycle::{LifecycleConfig, SingleWorker, State, StopHandle, Worker, WorkerError};

use super::dispatch::{MessageFilter, MessageHandler};
use super::message::DatagramMessage;

const UDP: Token = Token(0);
const WAKE: Token = Token(1);

// ============================================================================
// Configuration
// ============================================================================

/// Reactor socket and buffer sizing.
#[derive(Clone, Debug, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct ReactorConfig {
    /// Address to bind. `None` binds the IPv4 wildcard.
    pub bind_addr: Option<IpAddr>,
    /// Port to bind. Zero picks an ephemeral port (see
    /// [`DatagramReactor::local_addr`]).
    pub port: u16,
    /// Total receive buffer size, prefix included.
    pub buffer_size: usize,
    /// Reserved prefix before the received payload.
    pub buffer_offset: usize,
}

impl Default for ReactorConfig {
    fn default() -> Self {
        Self {
            bind_addr: None,
            port: 0,
            buffer_size: 4_096,
            buffer_offset: 0,
        }
    }
}

impl ReactorConfig {
    pub fn validate(&self) -> Result<(), WorkerError> {
        if self.buffer_size < self.buffer_offset + 2 {
            return Err(WorkerError::Config(format!(
                "buffer_size ({}) must leave room for a message id past buffer_offset ({})",
                self.buffer_size, self.buffer_offset
            )));
        }
        Ok(())
    }
}

// ============================================================================
// Reactor
// ============================================================================

struct ReactorShared {
    local_addr: Mutex<Option<SocketAddr>>,
    waker: Mutex<Option<Waker>>,
}

/// The UDP front door: owns the reactor thread and its lifecycle.
///
/// Construct with a handler (usually a
/// [`MessageDispatcher`](super::MessageDispatcher)), optionally add a
/// filter, then `startup`. A failed `startup` (bad bind address, port in
/// use) leaves nothing running. `shutdown` wakes the poll, stops the
/// loop, and joins the thread; both calls are idempotent.
pub struct DatagramReactor {
    lifecycle: SingleWorker,
    shared: Arc<ReactorShared>,
    worker: Mutex<Option<ReactorWorker>>,
}

impl DatagramReactor {
    pub fn new(
        cfg: ReactorConfig,
        handler: impl MessageHandler + 'static,
    ) -> Result<Self, WorkerError> {
        cfg.validate()?;
        let lifecycle = SingleWorker::new(LifecycleConfig {
            name: "datagram-reactor".to_string(),
            sleep_ms: 0,
            ..LifecycleConfig::default()
        })?;
        let shared = Arc::new(ReactorShared {
            local_addr: Mutex::new(None),
            waker: Mutex::new(None),
        });
        let message = DatagramMessage::new(cfg.buffer_size, cfg.buffer_offset);
        let worker = ReactorWorker {
            cfg,
            handler: Box::new(handler),
            filter: None,
            message,
            poll: None,
            socket: None,
            events: Events::with_capacity(8),
            shared: Arc::clone(&shared),
            stop: lifecycle.stop_handle(),
        };
        Ok(Self {
            lifecycle,
            shared,
            worker: Mutex::new(Some(worker)),
        })
    }

    /// Installs a pre-dispatch filter. Must be called before `startup`;
    /// afterwards the call is logged and ignored.
    pub fn set_filter(&self, filter: impl MessageFilter + 'static) {
        match self
            .worker
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .as_mut()
        {
            Some(worker) => worker.filter = Some(Box::new(filter)),
            None => warn!("set_filter after startup; ignoring"),
        }
    }

    /// Binds the socket and starts the reactor thread. Bind errors are
    /// returned; nothing is left running on failure.
    pub fn startup(&self) -> Result<(), WorkerError> {
        let worker = self
            .worker
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .take();
        match worker {
            Some(worker) => self.lifecycle.startup(worker),
            // Already started (or stopped); the lifecycle ignores re-entry.
            None => Ok(()),
        }
    }

    /// Stops the loop, wakes the blocked poll, and joins the thread.
    pub fn shutdown(&self) {
        self.lifecycle.request_stop();
        if let Some(waker) = self
            .shared
            .waker
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .take()
        {
            if let Err(err) = waker.wake() {
                warn!(error = %err, "failed to wake reactor for shutdown");
            }
        }
        self.lifecycle.shutdown();
    }

    /// The bound address, once running. Useful with port 0.
    pub fn local_addr(&self) -> Option<SocketAddr> {
        *self
            .shared
            .local_addr
            .lock()
            .unwrap_or_else(|e| e.into_inner())
    }

    #[inline]
    pub fn is_running(&self) -> bool {
        self.lifecycle.is_running()
    }

    pub fn state(&self) -> State {
        self.lifecycle.state()
    }
}

// ============================================================================
// Worker
// ============================================================================

struct ReactorWorker {
    cfg: ReactorConfig,
    handler: Box<dyn MessageHandler>,
    filter: Option<Box<dyn MessageFilter>>,
    message: DatagramMessage,
    poll: Option<Poll>,
    socket: Option<UdpSocket>,
    events: Events,
    shared: Arc<ReactorShared>,
    stop: StopHandle,
}

impl Worker for ReactorWorker {
    fn before_start(&mut self) -> Result<(), WorkerError> {
        let ip = self
            .cfg
            .bind_addr
            .unwrap_or(IpAddr::V4(Ipv4Addr::UNSPECIFIED));
        let addr = SocketAddr::new(ip, self.cfg.port);
        let mut socket = UdpSocket::bind(addr)
            .map_err(|err| WorkerError::Startup(format!("bind {addr}: {err}")))?;
        let poll = Poll::new()?;
        poll.registry()
            .register(&mut socket, UDP, Interest::READABLE)?;
        let waker = Waker::new(poll.registry(), WAKE)?;
        let local = socket.local_addr()?;
        info!(%local, "datagram reactor listening");
        *self
            .shared
            .local_addr
            .lock()
            .unwrap_or_else(|e| e.into_inner()) = Some(local);
        *self.shared.waker.lock().unwrap_or_else(|e| e.into_inner()) = Some(waker);
        self.socket = Some(socket);
        self.poll = Some(poll);
        Ok(())
    }

    fn execute(&mut self) {
        let Self {
            poll,
            socket,
            events,
            message,
            handler,
            filter,
            stop,
            ..
        } = self;
        let (Some(poll), Some(socket)) = (poll.as_mut(), socket.as_mut()) else {
            return;
        };

        if let Err(err) = poll.poll(events, None) {
            if err.kind() == io::ErrorKind::Interrupted {
                return;
            }
            error!(error = %err, "reactor poll failed");
            thread::sleep(Duration::from_millis(50));
            return;
        }

        let readable = events
            .iter()
            .any(|event| event.token() == UDP && event.is_readable());
        if readable {
            drain(poll.registry(), socket, message, handler.as_mut(), filter, stop);
        }
    }

    fn after_stop(&mut self) {
        self.poll = None;
        self.socket = None;
        info!("datagram reactor closed");
    }
}

/// Receives until the socket would block, dispatching each datagram
/// through the filter and handler and echoing when asked.
fn drain(
    registry: &Registry,
    socket: &mut UdpSocket,
    message: &mut DatagramMessage,
    handler: &mut dyn MessageHandler,
    filter: &mut Option<Box<dyn MessageFilter>>,
    stop: &StopHandle,
) {
    // Raise write interest for the batch so echoes go straight out.
    if let Err(err) = registry.reregister(socket, UDP, Interest::READABLE | Interest::WRITABLE) {
        warn!(error = %err, "reregister for write failed");
    }

    loop {
        message.reset();
        let (n, peer) = match socket.recv_from(message.recv_slice()) {
            Ok(pair) => pair,
            Err(err) if err.kind() == io::ErrorKind::WouldBlock => break,
            Err(err) => {
                error!(error = %err, "datagram receive failed");
                break;
            }
        };
        message.fill(n, peer);
        trace!(%peer, len = n, "datagram received");

        if let Some(filter) = filter {
            if !filter.execute(message) {
                trace!(%peer, "datagram rejected by filter");
                continue;
            }
        }

        let respond = handler.execute(message);
        if respond && stop.is_running() {
            match socket.send_to(message.payload(), peer) {
                Ok(sent) => trace!(%peer, sent, "echoed response"),
                Err(err) => error!(%peer, error = %err, "echo send failed"),
            }
        }
        if !stop.is_running() {
            break;
        }
    }

    if let Err(err) = registry.reregister(socket, UDP, Interest::READABLE) {
        warn!(error = %err, "reregister for read failed");
    }
}
