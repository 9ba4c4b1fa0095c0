//! Incremental frame decoding.
//!
//! [`FrameDecoder`] turns the fragmented byte stream of one connection into
//! a sequence of complete request frames. It owns the receive buffer, the
//! progress state of the frame currently being assembled, and the adaptive
//! receive-size hint. It performs no I/O: the connection handler feeds it
//! bytes and interprets [`Decoded::NeedData`] as "read again".

use bytes::{Buf, Bytes, BytesMut};
use tracing::{trace, warn};

use crate::frame::{Header, Opcode, HEADER_SIZE};

/// Starting value of the adaptive receive hint, in bytes.
pub const INITIAL_RECV_HINT: usize = 4;

/// Progress of the frame currently being assembled.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Pending {
    /// No header parsed yet.
    Header,
    /// Valid header parsed; waiting for `length` payload bytes.
    Payload { opcode: Opcode, length: usize },
    /// Header carried an unknown opcode; its payload still has to be
    /// drained to keep the stream aligned.
    Discard { length: usize },
}

/// Outcome of a decode attempt.
#[derive(Debug, PartialEq, Eq)]
pub enum Decoded {
    /// A complete request frame, removed from the buffer.
    Frame { opcode: Opcode, payload: Bytes },
    /// A header with an unknown opcode was parsed. Reported exactly once
    /// per bad frame, as soon as the header is available; the payload is
    /// discarded internally as it arrives.
    Rejected,
    /// Not enough buffered bytes; read again with [`FrameDecoder::recv_hint`]
    /// capacity.
    NeedData,
}

/// Per-connection decoding state. Created on accept, dropped on
/// disconnect, never shared between connections.
#[derive(Debug)]
pub struct FrameDecoder {
    buffer: BytesMut,
    pending: Pending,
    recv_hint: usize,
}

impl FrameDecoder {
    pub fn new() -> FrameDecoder {
        FrameDecoder {
            buffer: BytesMut::new(),
            pending: Pending::Header,
            recv_hint: INITIAL_RECV_HINT,
        }
    }

    /// Suggested size for the next socket read.
    pub fn recv_hint(&self) -> usize {
        self.recv_hint
    }

    /// Append bytes received from the socket.
    pub fn extend(&mut self, bytes: &[u8]) {
        self.buffer.extend_from_slice(bytes);
    }

    /// Try to extract the next frame from the buffered bytes.
    ///
    /// Call repeatedly until [`Decoded::NeedData`]: a single read may carry
    /// several complete frames, and they are emitted in order without
    /// losing or duplicating bytes across calls.
    pub fn next_frame(&mut self) -> Decoded {
        loop {
            match self.pending {
                Pending::Header => {
                    if self.buffer.len() < HEADER_SIZE {
                        trace!(buffered = self.buffer.len(), "need more bytes for header");
                        return Decoded::NeedData;
                    }

                    let header = Header::parse(&self.buffer[..HEADER_SIZE]);
                    match header.opcode() {
                        Some(opcode) => {
                            trace!(?opcode, length = header.length, "header parsed");
                            self.pending = Pending::Payload {
                                opcode,
                                length: header.length,
                            };
                        }
                        None => {
                            warn!(
                                bits = header.opcode_bits,
                                length = header.length,
                                "unknown opcode, skipping request"
                            );
                            self.pending = Pending::Discard {
                                length: header.length,
                            };
                            return Decoded::Rejected;
                        }
                    }
                }

                Pending::Payload { opcode, length } => {
                    if self.buffer.len() - HEADER_SIZE < length {
                        // Payload still in flight: grow the next read.
                        self.recv_hint *= 2;
                        trace!(hint = self.recv_hint, "payload incomplete, doubling receive hint");
                        return Decoded::NeedData;
                    }

                    self.buffer.advance(HEADER_SIZE);
                    let payload = self.buffer.split_to(length).freeze();
                    self.pending = Pending::Header;
                    return Decoded::Frame { opcode, payload };
                }

                Pending::Discard { length } => {
                    if self.buffer.len() < HEADER_SIZE + length {
                        return Decoded::NeedData;
                    }

                    self.buffer.advance(HEADER_SIZE + length);
                    self.pending = Pending::Header;
                }
            }
        }
    }
}
