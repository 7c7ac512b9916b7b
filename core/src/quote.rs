//! Provider Quote Attestation v1: the signed copy of an offer returned on
//! 402, binding a subsequent payment token to pre-agreed terms.

use chrono::{DateTime, Utc};
use rand::RngCore;
use serde::{Deserialize, Serialize};

use crate::canonical::{canonical_json_of, hex_lower, sha256_hex};
use crate::crypto::{key_id_from_public_key_pem, sign_hash_hex, verify_hash_hex, CryptoError, VerifyHashHexInput};
use crate::offer::{Offer, RequestBindingMode, SpendAuthorizationMode};

const SCHEMA_VERSION: &str = "ToolProviderQuote.v1";

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct QuotePayload {
    pub schema_version: String,
    pub provider_id: String,
    pub tool_id: String,
    pub amount_cents: i64,
    pub currency: String,
    pub address: String,
    pub network: String,
    pub request_binding_mode: RequestBindingMode,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub request_binding_sha256: Option<String>,
    pub quote_required: bool,
    pub quote_id: String,
    pub spend_authorization_mode: SpendAuthorizationMode,
    pub quoted_at: String,
    pub expires_at: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct QuoteSignature {
    pub algorithm: String,
    pub key_id: String,
    pub public_key_pem: String,
    pub signed_at: String,
    pub nonce: String,
    pub quote_hash: String,
    pub signature_base64: String,
}

#[derive(Debug, Clone)]
pub struct BuiltQuote {
    pub payload: QuotePayload,
    pub signature: QuoteSignature,
}

pub struct BuildQuoteInput<'a> {
    pub offer: &'a Offer,
    pub method: &'a str,
    pub path_with_query: &'a str,
    pub request_binding_sha256: Option<&'a str>,
    pub now: DateTime<Utc>,
    pub ttl_seconds: i64,
    pub private_key_pem: &'a str,
    pub public_key_pem: &'a str,
}

/// `providerId, toolId, amountCents, currency, requestBindingMode,
/// requestBindingSha256||"", method, pathWithQuery`, first 32 hex chars,
/// prefixed `pquote_`.
fn derive_quote_id(offer: &Offer, method: &str, path_with_query: &str, binding: Option<&str>) -> Result<String, String> {
    let material = serde_json::json!({
        "providerId": offer.provider_id,
        "toolId": offer.tool_id,
        "amountCents": offer.amount_cents,
        "currency": offer.currency,
        "requestBindingMode": offer.request_binding_mode,
        "requestBindingSha256": binding.unwrap_or(""),
        "method": method,
        "pathWithQuery": path_with_query,
    });
    let hash = sha256_hex(&canonical_json_of(&material).map_err(|e| e.to_string())?);
    Ok(format!("pquote_{}", &hash[..32]))
}

/// Build a normalized quote payload and its Ed25519 signature envelope.
pub fn build_quote(input: BuildQuoteInput<'_>) -> Result<BuiltQuote, String> {
    let quote_id = match &input.offer.quote_id {
        Some(id) => id.clone(),
        None => derive_quote_id(
            input.offer,
            input.method,
            input.path_with_query,
            input.request_binding_sha256,
        )?,
    };

    let expires_at = input.now + chrono::Duration::seconds(input.ttl_seconds);

    let payload = QuotePayload {
        schema_version: SCHEMA_VERSION.to_string(),
        provider_id: input.offer.provider_id.clone(),
        tool_id: input.offer.tool_id.clone(),
        amount_cents: input.offer.amount_cents,
        currency: input.offer.currency.clone(),
        address: input.offer.address.clone(),
        network: input.offer.network.clone(),
        request_binding_mode: input.offer.request_binding_mode,
        request_binding_sha256: input.request_binding_sha256.map(str::to_string),
        quote_required: input.offer.quote_required,
        quote_id,
        spend_authorization_mode: input.offer.spend_authorization_mode,
        quoted_at: input.now.to_rfc3339(),
        expires_at: expires_at.to_rfc3339(),
    };

    let quote_hash = sha256_hex(&canonical_json_of(&payload).map_err(|e| e.to_string())?);
    let signature_base64 =
        sign_hash_hex(&quote_hash, input.private_key_pem).map_err(|e| e.to_string())?;
    let key_id =
        key_id_from_public_key_pem(input.public_key_pem).map_err(|e| e.to_string())?;

    let mut nonce_bytes = [0u8; 16];
    rand::rngs::OsRng.fill_bytes(&mut nonce_bytes);

    let signature = QuoteSignature {
        algorithm: "ed25519".to_string(),
        key_id,
        public_key_pem: input.public_key_pem.to_string(),
        signed_at: input.now.to_rfc3339(),
        nonce: hex_lower(&nonce_bytes),
        quote_hash,
        signature_base64,
    };

    Ok(BuiltQuote { payload, signature })
}

/// Recompute `quoteHash` over `payload` and check it matches `signature`'s
/// claimed hash, then verify the Ed25519 signature over that hash.
pub fn verify_quote_signature(
    payload: &QuotePayload,
    signature: &QuoteSignature,
) -> Result<bool, CryptoError> {
    let expected_hash =
        sha256_hex(&canonical_json_of(payload).map_err(|e| CryptoError::VerifyError(e.to_string()))?);
    if expected_hash != signature.quote_hash {
        return Ok(false);
    }
    verify_hash_hex(VerifyHashHexInput {
        hash_hex: &signature.quote_hash,
        signature_base64: &signature.signature_base64,
        public_key_pem: &signature.public_key_pem,
    })
}
