//! Ed25519 keypair generation, key-id derivation, and hash signing.
//!
//! `keyId` is always the lowercase hex SHA-256 of the DER-encoded
//! SubjectPublicKeyInfo of the Ed25519 public key — never a fingerprint of
//! the PEM text itself. Signatures are computed over the 32 raw bytes of a
//! hex-encoded hash, never over the hex text.

use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
use ed25519_dalek::pkcs8::{DecodePrivateKey, DecodePublicKey, EncodePrivateKey, EncodePublicKey};
use ed25519_dalek::{Signature, Signer, SigningKey, VerifyingKey};
use pkcs8::LineEnding;
use thiserror::Error;

use crate::canonical::sha256_hex;

#[derive(Debug, Error)]
pub enum CryptoError {
    #[error("CRYPTO_KEY_INVALID: {0}")]
    KeyInvalid(String),
    #[error("CRYPTO_VERIFY_ERROR: {0}")]
    VerifyError(String),
}

impl CryptoError {
    pub fn code(&self) -> &'static str {
        match self {
            CryptoError::KeyInvalid(_) => "CRYPTO_KEY_INVALID",
            CryptoError::VerifyError(_) => "CRYPTO_VERIFY_ERROR",
        }
    }
}

/// A generated or loaded Ed25519 keypair, held as PEM text.
#[derive(Debug, Clone)]
pub struct Ed25519Keypair {
    pub public_key_pem: String,
    pub private_key_pem: String,
}

/// Generate a fresh Ed25519 keypair using the OS CSPRNG.
pub fn generate_ed25519() -> Ed25519Keypair {
    let mut csprng = rand::rngs::OsRng;
    let signing_key = SigningKey::generate(&mut csprng);
    let verifying_key = signing_key.verifying_key();

    let private_key_pem = signing_key
        .to_pkcs8_pem(LineEnding::LF)
        .expect("ed25519 private key always encodes to pkcs8")
        .to_string();
    let public_key_pem = verifying_key
        .to_public_key_pem(LineEnding::LF)
        .expect("ed25519 public key always encodes to spki");

    Ed25519Keypair {
        public_key_pem,
        private_key_pem,
    }
}

/// `keyId = lowercase hex SHA-256 of the DER SubjectPublicKeyInfo`.
pub fn key_id_from_public_key_pem(pem: &str) -> Result<String, CryptoError> {
    let verifying_key = parse_public_key(pem)?;
    let der = verifying_key
        .to_public_key_der()
        .map_err(|e| CryptoError::KeyInvalid(e.to_string()))?;
    Ok(sha256_hex(der.as_bytes()))
}

/// Sign the 32 raw bytes behind `hash_hex` with the Ed25519 private key in
/// `private_key_pem`. Returns plain (non-URL-safe) base64.
pub fn sign_hash_hex(hash_hex: &str, private_key_pem: &str) -> Result<String, CryptoError> {
    let signing_key = parse_private_key(private_key_pem)?;
    let bytes = decode_hash_hex(hash_hex)?;
    let signature = signing_key.sign(&bytes);
    Ok(BASE64.encode(signature.to_bytes()))
}

pub struct VerifyHashHexInput<'a> {
    pub hash_hex: &'a str,
    pub signature_base64: &'a str,
    pub public_key_pem: &'a str,
}

/// Verify a base64 Ed25519 signature over the 32 raw bytes behind
/// `hash_hex`. Returns `Ok(false)` for a well-formed but non-matching
/// signature; malformed inputs surface as `CryptoError`.
pub fn verify_hash_hex(input: VerifyHashHexInput<'_>) -> Result<bool, CryptoError> {
    let verifying_key = parse_public_key(input.public_key_pem)?;
    let bytes = decode_hash_hex(input.hash_hex)?;
    let sig_bytes = BASE64
        .decode(input.signature_base64)
        .map_err(|e| CryptoError::VerifyError(format!("invalid base64 signature: {e}")))?;
    let sig_array: [u8; 64] = sig_bytes
        .try_into()
        .map_err(|_| CryptoError::VerifyError("signature must be 64 bytes".into()))?;
    let signature = Signature::from_bytes(&sig_array);
    Ok(verifying_key.verify_strict(&bytes, &signature).is_ok())
}

fn decode_hash_hex(hash_hex: &str) -> Result<[u8; 32], CryptoError> {
    if hash_hex.len() != 64 || !hash_hex.bytes().all(|b| b.is_ascii_hexdigit()) {
        return Err(CryptoError::VerifyError(
            "hash must be 64 lowercase hex characters".into(),
        ));
    }
    let mut out = [0u8; 32];
    hex_decode_into(hash_hex, &mut out)
        .map_err(|e| CryptoError::VerifyError(format!("invalid hash hex: {e}")))?;
    Ok(out)
}

fn hex_decode_into(s: &str, out: &mut [u8; 32]) -> Result<(), String> {
    for (i, chunk) in s.as_bytes().chunks(2).enumerate() {
        let byte = u8::from_str_radix(std::str::from_utf8(chunk).unwrap(), 16)
            .map_err(|e| e.to_string())?;
        out[i] = byte;
    }
    Ok(())
}

fn parse_public_key(pem: &str) -> Result<VerifyingKey, CryptoError> {
    VerifyingKey::from_public_key_pem(pem.trim())
        .map_err(|e| CryptoError::KeyInvalid(format!("malformed Ed25519 public key PEM: {e}")))
}

fn parse_private_key(pem: &str) -> Result<SigningKey, CryptoError> {
    SigningKey::from_pkcs8_pem(pem.trim())
        .map_err(|e| CryptoError::KeyInvalid(format!("malformed Ed25519 private key PEM: {e}")))
}
