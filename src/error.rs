//! Error types for capture analysis.

use thiserror::Error;

/// Failure kinds produced while dissecting one captured packet.
///
/// Every variant except `ConfigurationError` is local to a single packet
/// and never aborts analysis of the rest of the capture.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum DissectError {
    /// Buffer does not look like a session-transport packet; declined
    /// silently, the packet is not claimed
    #[error("not a session-transport packet")]
    StructuralMismatch,
    /// Key is present but the authentication tag does not verify
    #[error("authentication tag mismatch")]
    AuthenticationFailure,
    /// Message spans multiple packets; reassembly is not performed
    #[error("message fragmented across packets")]
    UnsupportedFragmentation,
    /// Decompression of an authenticated payload failed
    #[error("malformed compressed payload")]
    MalformedCompressedPayload,
    /// Session key string is not a valid unpadded base64 encoding of
    /// sixteen bytes; decryption stays disabled until corrected
    #[error("invalid session key encoding")]
    ConfigurationError,
    /// Cipher engine refused to initialize or operate; fails only the
    /// packet it occurred on
    #[error("cipher engine failure")]
    CipherFailure,
}
