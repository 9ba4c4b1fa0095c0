//! Wire format for the text transformation protocol.
//!
//! A request is a 32-bit big-endian header word followed by the payload:
//! the top 5 bits of the word select the transformation, the bottom 27 bits
//! carry the payload byte length. A reply is a 32-bit big-endian byte
//! length followed by the transformed UTF-8 text.

use bytes::{BufMut, Bytes, BytesMut};

/// Size of the request and response header in bytes.
pub const HEADER_SIZE: usize = 4;

/// Width of the opcode field in the header word.
const OPCODE_BITS: u32 = 5;

/// Mask for the 27-bit payload length field.
const LENGTH_MASK: u32 = (1 << (32 - OPCODE_BITS)) - 1;

/// Reply sent when a request carries an unknown opcode.
pub const BAD_ACTION_MESSAGE: &str = "Bad action detected! Request skipped!";

/// Transformation selected by the 5-bit opcode field.
///
/// Discriminants are the on-wire values; every other 5-bit value is
/// invalid and answered with [`BAD_ACTION_MESSAGE`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Opcode {
    Uppercase = 1,
    Lowercase = 2,
    Reverse = 4,
    Shuffle = 8,
    RandomMutate = 16,
}

impl Opcode {
    /// Map the raw opcode field to a transformation.
    pub fn from_bits(bits: u8) -> Option<Opcode> {
        match bits {
            1 => Some(Opcode::Uppercase),
            2 => Some(Opcode::Lowercase),
            4 => Some(Opcode::Reverse),
            8 => Some(Opcode::Shuffle),
            16 => Some(Opcode::RandomMutate),
            _ => None,
        }
    }
}

/// Parsed request header: raw opcode field plus payload byte length.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Header {
    pub opcode_bits: u8,
    pub length: usize,
}

impl Header {
    /// Split a header word into opcode bits and payload length.
    ///
    /// `bytes` must hold at least [`HEADER_SIZE`] bytes.
    pub fn parse(bytes: &[u8]) -> Header {
        let word = u32::from_be_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]);
        Header {
            opcode_bits: (word >> (32 - OPCODE_BITS)) as u8,
            length: (word & LENGTH_MASK) as usize,
        }
    }

    /// The transformation named by the header, if the opcode is assigned.
    pub fn opcode(&self) -> Option<Opcode> {
        Opcode::from_bits(self.opcode_bits)
    }
}

/// Frame a reply: big-endian byte length, then the UTF-8 text.
pub fn encode_response(text: &str) -> Bytes {
    let mut frame = BytesMut::with_capacity(HEADER_SIZE + text.len());
    frame.put_u32(text.len() as u32);
    frame.put_slice(text.as_bytes());
    frame.freeze()
}

/// Build a request header word, for driving the server from tests.
#[cfg(test)]
pub fn encode_header(opcode_bits: u8, length: usize) -> [u8; 4] {
    let word = ((opcode_bits as u32) << (32 - OPCODE_BITS)) | (length as u32 & LENGTH_MASK);
    word.to_be_bytes()
}
