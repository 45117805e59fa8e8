//! HMAC challenge/response
//!
//! The server issues a random nonce in reply to `HMAC`. The publisher answers
//! with `HMAC-SHA512(stream key, nonce)` hex-encoded in its CONNECT line.

use hmac::{Hmac, Mac};
use rand::RngCore;
use sha2::Sha512;

use crate::error::AuthError;
use crate::registry::StreamKey;

type HmacSha512 = Hmac<Sha512>;

/// Size of the nonce in bytes
pub const CHALLENGE_SIZE: usize = 128;

/// A nonce issued to one connection
#[derive(Clone)]
pub struct Challenge {
    nonce: [u8; CHALLENGE_SIZE],
}

impl Challenge {
    pub fn generate() -> Self {
        let mut nonce = [0u8; CHALLENGE_SIZE];
        rand::thread_rng().fill_bytes(&mut nonce);
        Self { nonce }
    }

    #[cfg(test)]
    pub(crate) fn from_bytes(nonce: [u8; CHALLENGE_SIZE]) -> Self {
        Self { nonce }
    }

    /// Nonce as sent on the wire
    pub fn hex(&self) -> String {
        hex::encode(self.nonce)
    }

    /// Expected digest for `key`
    pub fn sign(&self, key: &StreamKey) -> Result<Vec<u8>, AuthError> {
        let mut mac = Self::mac(key)?;
        mac.update(&self.nonce);
        Ok(mac.finalize().into_bytes().to_vec())
    }

    /// Check a hex digest presented by the publisher in constant time
    pub fn verify(&self, key: &StreamKey, digest_hex: &str) -> Result<(), AuthError> {
        let digest = hex::decode(digest_hex).map_err(|_| AuthError::InvalidHex)?;

        let mut mac = Self::mac(key)?;
        mac.update(&self.nonce);
        mac.verify_slice(&digest).map_err(|_| AuthError::DigestMismatch)
    }

    fn mac(key: &StreamKey) -> Result<HmacSha512, AuthError> {
        HmacSha512::new_from_slice(key.as_bytes()).map_err(|_| AuthError::DigestMismatch)
    }
}

impl std::fmt::Debug for Challenge {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Challenge").finish_non_exhaustive()
    }
}
