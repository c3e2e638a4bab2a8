//! Pre-shared key handling and authenticated decryption.

use aes_gcm::{aead::Aead, Aes128Gcm, KeyInit};
use base64::engine::general_purpose::STANDARD_NO_PAD;
use base64::Engine as _;
use sha2::{Digest, Sha256};

use crate::error::DissectError;

/// Key size in bytes.
pub const KEY_LEN: usize = 16;
/// Length of the unpadded base64 key encoding.
pub const KEY_BASE64_LEN: usize = 22;
/// Nonce size in bytes.
pub const NONCE_LEN: usize = 12;

/// The session's pre-shared 128-bit key.
#[derive(Clone)]
pub struct SessionKey([u8; KEY_LEN]);

impl SessionKey {
    /// Wrap raw key bytes.
    pub fn new(bytes: [u8; KEY_LEN]) -> Self {
        Self(bytes)
    }

    /// Parse the configured key string: exactly 22 characters of standard
    /// base64, no padding, decoding to 16 bytes.
    pub fn from_base64(encoded: &str) -> Result<Self, DissectError> {
        if encoded.len() != KEY_BASE64_LEN {
            return Err(DissectError::ConfigurationError);
        }

        let decoded = STANDARD_NO_PAD
            .decode(encoded)
            .map_err(|_| DissectError::ConfigurationError)?;

        let bytes: [u8; KEY_LEN] = decoded
            .try_into()
            .map_err(|_| DissectError::ConfigurationError)?;

        Ok(Self(bytes))
    }

    /// Short digest-derived identifier for logs. Never reveals key bytes.
    pub fn fingerprint(&self) -> String {
        let digest = Sha256::digest(self.0);
        digest[..4].iter().map(|b| format!("{b:02x}")).collect()
    }

    fn bytes(&self) -> &[u8; KEY_LEN] {
        &self.0
    }
}

/// One decryption (or, for traffic generation, encryption) attempt.
///
/// Built fresh for every packet and never persisted: nonce uniqueness
/// rests on sequence-number uniqueness per direction, so a context must
/// never outlive the packet whose counter it was derived from.
pub struct CipherContext {
    cipher: Aes128Gcm,
    nonce: [u8; NONCE_LEN],
}

impl CipherContext {
    /// Build a context for one sequence counter.
    pub fn new(key: &SessionKey, sequence: u64) -> Result<Self, DissectError> {
        let cipher = Aes128Gcm::new_from_slice(key.bytes())
            .map_err(|_| DissectError::CipherFailure)?;

        Ok(Self {
            cipher,
            nonce: Self::make_nonce(sequence),
        })
    }

    // Nonce = 4 zero bytes || 8-byte big-endian sequence counter.
    // The direction bit is already stripped from the counter; the protocol
    // never reuses a counter within a direction, so nonces never repeat
    // under one key.
    fn make_nonce(sequence: u64) -> [u8; NONCE_LEN] {
        let mut nonce = [0u8; NONCE_LEN];
        nonce[4..12].copy_from_slice(&sequence.to_be_bytes());
        nonce
    }

    /// Authenticate and decrypt `payload || tag`, with no associated data.
    ///
    /// A tag mismatch discards the candidate plaintext; unauthenticated
    /// bytes are never exposed.
    pub fn open(&self, ciphertext: &[u8]) -> Result<Vec<u8>, DissectError> {
        self.cipher
            .decrypt(&self.nonce.into(), ciphertext)
            .map_err(|_| DissectError::AuthenticationFailure)
    }

    /// Encrypt a plaintext, producing `payload || tag`.
    ///
    /// The analyzer itself never encrypts capture data; this exists for
    /// tests and synthetic-traffic demos.
    pub fn seal(&self, plaintext: &[u8]) -> Result<Vec<u8>, DissectError> {
        self.cipher
            .encrypt(&self.nonce.into(), plaintext)
            .map_err(|_| DissectError::CipherFailure)
    }
}
