//! Ed25519 key management and signing
//!
//! Public keys, private keys and signatures cross this module's boundary as
//! hex strings. Malformed input to [`verify`] is reported as an invalid
//! signature rather than an error, so callers can gate untrusted frames with
//! a plain boolean check.

use ed25519_dalek::{Signature as Ed25519Signature, Signer, SigningKey, Verifier, VerifyingKey};
use rand::{rngs::OsRng, RngCore};
use thiserror::Error;

/// Errors raised by signing operations
#[derive(Debug, Error)]
pub enum CryptoError {
    #[error("invalid private key: {0}")]
    InvalidPrivateKey(String),
    #[error("signing failed: {0}")]
    SigningFailed(String),
}

/// Generate an Ed25519 keypair as `(public_key, private_key)` hex strings
pub fn generate_keypair() -> (String, String) {
    let mut rng = OsRng;
    let mut seed = [0u8; 32];
    rng.fill_bytes(&mut seed);
    keypair_from_seed(&seed)
}

/// Derive an Ed25519 keypair from a fixed seed (deterministic, for tests)
pub fn keypair_from_seed(seed: &[u8; 32]) -> (String, String) {
    let signing_key = SigningKey::from_bytes(seed);
    let verifying_key = signing_key.verifying_key();

    (
        hex::encode(verifying_key.as_bytes()),
        hex::encode(signing_key.as_bytes()),
    )
}

/// Sign a message with a hex-encoded private key
pub fn sign(private_key: &str, message: &[u8]) -> Result<String, CryptoError> {
    let sk_bytes = hex::decode(private_key)
        .map_err(|e| CryptoError::InvalidPrivateKey(e.to_string()))?;
    if sk_bytes.len() != 32 {
        return Err(CryptoError::InvalidPrivateKey(format!(
            "expected 32 bytes, got {}",
            sk_bytes.len()
        )));
    }

    let mut seed = [0u8; 32];
    seed.copy_from_slice(&sk_bytes);
    let signing_key = SigningKey::from_bytes(&seed);

    let signature = signing_key.sign(message);
    Ok(hex::encode(signature.to_bytes()))
}

/// Verify a hex-encoded signature against a hex-encoded public key
pub fn verify(public_key: &str, message: &[u8], signature: &str) -> bool {
    let pk_bytes = match hex::decode(public_key) {
        Ok(bytes) if bytes.len() == 32 => bytes,
        _ => return false,
    };
    let sig_bytes = match hex::decode(signature) {
        Ok(bytes) if bytes.len() == 64 => bytes,
        _ => return false,
    };

    let mut pk = [0u8; 32];
    pk.copy_from_slice(&pk_bytes);
    let verifying_key = match VerifyingKey::from_bytes(&pk) {
        Ok(key) => key,
        Err(_) => return false,
    };

    let mut sig = [0u8; 64];
    sig.copy_from_slice(&sig_bytes);
    let signature = Ed25519Signature::from_bytes(&sig);

    verifying_key.verify(message, &signature).is_ok()
}
