//! Ed25519 verification of release archives.
//!
//! Release assets ship with a detached base64 signature; the verifying key
//! is compiled in. An archive that fails verification is discarded.

use crate::error::Error;
use base64::Engine;
use ed25519_dalek::{Signature, VerifyingKey};
use sha2::{Digest, Sha256};

/// Hex-encoded Ed25519 public key the release pipeline signs with.
pub const RELEASE_PUBKEY_HEX: &str =
    "302a300506032b6570032100d75a980182b10ab7d54bfed3c964073a0ee172f3daa62325";

/// Verify `asset` against a detached base64 `signature`.
///
/// # Errors
///
/// Returns `Error::Update` when the key, signature, or verification is
/// invalid.
pub fn verify_detached(asset: &[u8], signature_b64: &str, pubkey_hex: &str) -> Result<(), Error> {
    let key_bytes = hex::decode(pubkey_hex.trim())
        .map_err(|e| Error::update(format!("invalid release public key: {e}")))?;
    // Accept both raw 32-byte keys and SPKI-wrapped ones (key is the tail)
    let raw: [u8; 32] = key_bytes
        .get(key_bytes.len().saturating_sub(32)..)
        .and_then(|tail| tail.try_into().ok())
        .ok_or_else(|| Error::update("release public key is too short"))?;
    let key = VerifyingKey::from_bytes(&raw)
        .map_err(|e| Error::update(format!("invalid release public key: {e}")))?;

    let sig_bytes = base64::engine::general_purpose::STANDARD
        .decode(signature_b64.trim())
        .map_err(|e| Error::update(format!("invalid signature encoding: {e}")))?;
    let signature = Signature::from_slice(&sig_bytes)
        .map_err(|e| Error::update(format!("invalid signature: {e}")))?;

    key.verify_strict(asset, &signature)
        .map_err(|_| Error::update("release signature verification failed"))?;
    tracing::debug!("release signature verified (key {})", key_fingerprint(&key));
    Ok(())
}

/// SHA-256 fingerprint of a verifying key, hex-encoded.
#[must_use]
pub fn key_fingerprint(key: &VerifyingKey) -> String {
    let mut hasher = Sha256::new();
    hasher.update(key.to_bytes());
    hex::encode(hasher.finalize())
}

#[cfg(test)]
mod tests {
    use super::*;
    use ed25519_dalek::{Signer, SigningKey};

    #[test]
    fn test_valid_signature_verifies() {
        let signing = SigningKey::from_bytes(&[7u8; 32]);
        let asset = b"archive bytes";
        let signature = signing.sign(asset);
        let sig_b64 = base64::engine::general_purpose::STANDARD.encode(signature.to_bytes());
        let pubkey_hex = hex::encode(signing.verifying_key().to_bytes());

        assert!(verify_detached(asset, &sig_b64, &pubkey_hex).is_ok());
    }

    #[test]
    fn test_tampered_asset_rejected() {
        let signing = SigningKey::from_bytes(&[7u8; 32]);
        let signature = signing.sign(b"archive bytes");
        let sig_b64 = base64::engine::general_purpose::STANDARD.encode(signature.to_bytes());
        let pubkey_hex = hex::encode(signing.verifying_key().to_bytes());

        assert!(verify_detached(b"tampered", &sig_b64, &pubkey_hex).is_err());
    }

    #[test]
    fn test_garbage_signature_rejected() {
        let signing = SigningKey::from_bytes(&[7u8; 32]);
        let pubkey_hex = hex::encode(signing.verifying_key().to_bytes());
        assert!(verify_detached(b"asset", "!!!", &pubkey_hex).is_err());
    }
}
