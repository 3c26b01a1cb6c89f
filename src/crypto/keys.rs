//! Key share generation for the ClientHello

use super::{CryptoError, KEY_SHARE_LEN};
use ring::agreement::{EphemeralPrivateKey, X25519};
use ring::rand::SystemRandom;

/// Generate a fresh X25519 public key for the key_share extension
///
/// The private half is discarded: the peer never completes a real key
/// exchange, but the share must be a valid curve point to pass inspection.
pub fn generate_key_share() -> Result<[u8; KEY_SHARE_LEN], CryptoError> {
    let rng = SystemRandom::new();
    let private = EphemeralPrivateKey::generate(&X25519, &rng)
        .map_err(|_| CryptoError::KeyGeneration("X25519 private key".to_string()))?;
    let public = private
        .compute_public_key()
        .map_err(|_| CryptoError::KeyGeneration("X25519 public key".to_string()))?;

    public
        .as_ref()
        .try_into()
        .map_err(|_| CryptoError::KeyGeneration("Unexpected key length".to_string()))
}
