//! Packet format and structural classification.

use crate::error::DissectError;
use crate::record::RECORD_LEN;

/// Header size in bytes.
pub const HEADER_LEN: usize = 8;
/// Authentication tag size in bytes.
pub const TAG_LEN: usize = 16;
/// Smallest buffer that can hold a header, a minimum record, and a tag.
pub const MIN_PACKET_LEN: usize = HEADER_LEN + RECORD_LEN + TAG_LEN;

/// Sanity ceiling on the sequence counter.
///
/// The wire format carries no magic number, so the ceiling stands in as a
/// heuristic: real captures never approach it, and random traffic almost
/// always exceeds it. Biased toward false negatives, never false positives.
/// Revisitable constant, not a protocol invariant.
pub const SEQ_CEILING: u64 = 1 << 35;

/// Direction of a packet within its flow, taken from the header bit.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Direction {
    /// Client to server (header bit clear)
    ToServer = 0,
    /// Server to client (header bit set)
    ToClient = 1,
}

impl Direction {
    /// Decode the header direction bit.
    pub fn from_bit(bit: bool) -> Self {
        if bit {
            Self::ToClient
        } else {
            Self::ToServer
        }
    }

    /// Index into per-direction state arrays.
    pub fn index(self) -> usize {
        self as usize
    }

    /// The other direction of the same flow.
    pub fn opposite(self) -> Self {
        match self {
            Self::ToServer => Self::ToClient,
            Self::ToClient => Self::ToServer,
        }
    }
}

impl std::fmt::Display for Direction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::ToServer => write!(f, "client to server"),
            Self::ToClient => write!(f, "server to client"),
        }
    }
}

/// Fixed 8-byte packet header.
///
/// Big-endian layout: direction in the top bit, the 63-bit sequence
/// counter in the rest.
#[derive(Debug, Clone, Copy)]
pub struct WireHeader {
    /// Packet direction from the top bit
    pub direction: Direction,
    /// 63-bit sequence counter
    pub sequence: u64,
}

impl WireHeader {
    /// Decode a header from the first 8 bytes of a buffer.
    pub fn decode(buf: &[u8]) -> Result<Self, DissectError> {
        if buf.len() < HEADER_LEN {
            return Err(DissectError::StructuralMismatch);
        }

        let raw = u64::from_be_bytes(buf[0..HEADER_LEN].try_into().unwrap());

        Ok(Self {
            direction: Direction::from_bit(raw >> 63 != 0),
            sequence: raw & (u64::MAX >> 1),
        })
    }

    /// Encode the header into an 8-byte buffer.
    pub fn encode(&self, buf: &mut [u8]) -> Result<(), DissectError> {
        if buf.len() < HEADER_LEN || self.sequence > u64::MAX >> 1 {
            return Err(DissectError::StructuralMismatch);
        }

        let raw = ((self.direction as u64) << 63) | self.sequence;
        buf[0..HEADER_LEN].copy_from_slice(&raw.to_be_bytes());
        Ok(())
    }
}

/// Classifier output: the decoded header and the opaque authenticated
/// ciphertext (payload and trailing tag).
#[derive(Debug, Clone, Copy)]
pub struct Classified<'a> {
    /// Decoded fixed header
    pub header: WireHeader,
    /// Everything after the header, tag included
    pub ciphertext: &'a [u8],
}

/// Decide whether a buffer is a session-transport packet and split it.
///
/// No side effects. The sequence ceiling is checked before the payload
/// length so an implausible counter always declines the packet, however
/// long the buffer is.
pub fn classify(buf: &[u8]) -> Result<Classified<'_>, DissectError> {
    let header = WireHeader::decode(buf)?;

    if header.sequence > SEQ_CEILING {
        return Err(DissectError::StructuralMismatch);
    }

    if buf.len() < MIN_PACKET_LEN {
        return Err(DissectError::StructuralMismatch);
    }

    Ok(Classified {
        header,
        ciphertext: &buf[HEADER_LEN..],
    })
}
