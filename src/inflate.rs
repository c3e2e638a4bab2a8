//! Raw-deflate decompression of the authenticated payload.

use std::io::Read;

use flate2::read::DeflateDecoder;

use crate::error::DissectError;

/// Upper bound on a single inflated message.
///
/// Interactive-session updates are small; a stream inflating past this is
/// treated as malformed rather than allowed to exhaust memory.
pub const MAX_INFLATED_LEN: usize = 1 << 20;

/// Inflate a raw-deflate stream.
///
/// Malformed input, trailing garbage, and oversized output all map to
/// [`DissectError::MalformedCompressedPayload`]; nothing here can abort
/// analysis of other packets.
pub fn inflate(compressed: &[u8]) -> Result<Vec<u8>, DissectError> {
    let mut decoder = DeflateDecoder::new(compressed).take(MAX_INFLATED_LEN as u64 + 1);
    let mut inflated = Vec::new();

    decoder
        .read_to_end(&mut inflated)
        .map_err(|_| DissectError::MalformedCompressedPayload)?;

    if inflated.len() > MAX_INFLATED_LEN {
        return Err(DissectError::MalformedCompressedPayload);
    }

    Ok(inflated)
}
