//! Reusable datagram buffer with a configurable header prefix.

use std::net::SocketAddr;

/// One datagram's worth of bytes, reused across receives.
///
/// The backing buffer is allocated once. Bytes `0..offset` are a caller
/// reserved prefix (for transports that prepend their own header before
/// forwarding); the received payload lives at `offset..len`. The payload's
/// first two bytes are the big-endian message ID.
///
/// The reactor passes the message to handlers as `&mut`, so a handler may
/// rewrite the payload in place before an echo, but can never retain the
/// buffer past the call.
#[derive(Debug)]
pub struct DatagramMessage {
    data: Box<[u8]>,
    offset: usize,
    /// End of valid bytes; `offset <= len <= data.len()`.
    len: usize,
    peer: Option<SocketAddr>,
}

impl DatagramMessage {
    /// Allocates a message with `buffer_size` total bytes, of which the
    /// first `offset` are the reserved prefix.
    ///
    /// # Panics
    /// If the payload region cannot hold a message ID
    /// (`buffer_size < offset + 2`).
    pub fn new(buffer_size: usize, offset: usize) -> Self {
        assert!(
            buffer_size >= offset + 2,
            "buffer_size ({buffer_size}) must leave room for a message id past offset ({offset})"
        );
        Self {
            data: vec![0u8; buffer_size].into_boxed_slice(),
            offset,
            len: offset,
            peer: None,
        }
    }

    /// Clears the payload and peer. The prefix bytes are left alone.
    pub fn reset(&mut self) {
        self.len = self.offset;
        self.peer = None;
    }

    #[inline]
    pub fn capacity(&self) -> usize {
        self.data.len()
    }

    #[inline]
    pub fn offset(&self) -> usize {
        self.offset
    }

    /// Received bytes, prefix excluded.
    #[inline]
    pub fn payload(&self) -> &[u8] {
        &self.data[self.offset..self.len]
    }

    #[inline]
    pub fn payload_mut(&mut self) -> &mut [u8] {
        &mut self.data[self.offset..self.len]
    }

    /// Prefix and payload together, up to the valid length.
    #[inline]
    pub fn frame(&self) -> &[u8] {
        &self.data[..self.len]
    }

    #[inline]
    pub fn frame_mut(&mut self) -> &mut [u8] {
        &mut self.data[..self.len]
    }

    /// Sets the payload length (for handlers composing a response in
    /// place).
    ///
    /// # Panics
    /// If `offset + n` exceeds the buffer capacity.
    pub fn set_payload_len(&mut self, n: usize) {
        assert!(
            self.offset + n <= self.data.len(),
            "payload length {n} exceeds capacity"
        );
        self.len = self.offset + n;
    }

    /// The big-endian u16 at the start of the payload, or `None` when the
    /// payload is shorter than two bytes.
    pub fn message_id(&self) -> Option<u16> {
        let payload = self.payload();
        if payload.len() < 2 {
            return None;
        }
        Some(u16::from_be_bytes([payload[0], payload[1]]))
    }

    /// Writes `id` big-endian at the start of the payload, growing the
    /// valid length to cover it if needed.
    pub fn put_message_id(&mut self, id: u16) {
        if self.len < self.offset + 2 {
            self.len = self.offset + 2;
        }
        let bytes = id.to_be_bytes();
        self.data[self.offset] = bytes[0];
        self.data[self.offset + 1] = bytes[1];
    }

    /// Sender of the last received datagram.
    #[inline]
    pub fn peer(&self) -> Option<SocketAddr> {
        self.peer
    }

    /// Writable payload region for a receive, spanning the full capacity
    /// past the prefix.
    pub(crate) fn recv_slice(&mut self) -> &mut [u8] {
        &mut self.data[self.offset..]
    }

    /// Records the result of a receive: `n` payload bytes from `peer`.
    pub(crate) fn fill(&mut self, n: usize, peer: SocketAddr) {
        self.len = self.offset + n;
        self.peer = Some(peer);
    }
}
