//! Response Attestation: the provider's signed receipt for a response body,
//! carried back to the caller as `x-nooterra-provider-*` headers.

use chrono::{DateTime, Utc};
use rand::RngCore;
use serde::{Deserialize, Serialize};

use crate::canonical::{hex_lower, sha256_hex};
use crate::crypto::{key_id_from_public_key_pem, sign_hash_hex, verify_hash_hex, CryptoError, VerifyHashHexInput};

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ResponseAttestation {
    pub algorithm: String,
    pub key_id: String,
    pub public_key_pem: String,
    pub signed_at: String,
    /// 16-byte nonce, lowercase hex.
    pub nonce: String,
    pub response_hash: String,
    pub signature_base64: String,
}

/// Sign `sha256Hex(body)` with a fresh nonce: `{algorithm:"ed25519", keyId,
/// publicKeyPem, signedAt, nonce, responseHash, signatureBase64}`.
pub fn sign_response(
    body: &[u8],
    now: DateTime<Utc>,
    private_key_pem: &str,
    public_key_pem: &str,
) -> Result<ResponseAttestation, CryptoError> {
    let response_hash = sha256_hex(body);
    let signature_base64 = sign_hash_hex(&response_hash, private_key_pem)?;
    let key_id = key_id_from_public_key_pem(public_key_pem)?;

    let mut nonce_bytes = [0u8; 16];
    rand::rngs::OsRng.fill_bytes(&mut nonce_bytes);

    Ok(ResponseAttestation {
        algorithm: "ed25519".to_string(),
        key_id,
        public_key_pem: public_key_pem.to_string(),
        signed_at: now.to_rfc3339(),
        nonce: hex_lower(&nonce_bytes),
        response_hash,
        signature_base64,
    })
}

/// Verify that `attestation.responseHash` matches `body` and that the
/// signature is valid over that hash.
pub fn verify_response_attestation(
    body: &[u8],
    attestation: &ResponseAttestation,
) -> Result<bool, CryptoError> {
    if sha256_hex(body) != attestation.response_hash {
        return Ok(false);
    }
    verify_hash_hex(VerifyHashHexInput {
        hash_hex: &attestation.response_hash,
        signature_base64: &attestation.signature_base64,
        public_key_pem: &attestation.public_key_pem,
    })
}
