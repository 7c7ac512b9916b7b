//! Payment Token v1: mint, parse, verify.
//!
//! A token is `base64url(canonicalJson({v:1, kid, payload, sig}))`. `sig`
//! is itself `base64url(base64(Ed25519(sha256Hex(canonicalJson(payload)))))`
//! — the envelope is base64url-encoded as a whole, and `sig` carries an
//! extra base64url layer around the raw base64 signature (spec.md §3).

use base64::{engine::general_purpose::URL_SAFE_NO_PAD as BASE64URL, Engine as _};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::canonical::{canonical_json, canonical_json_of, sha256_hex, CanonicalJsonError};
use crate::crypto::{sign_hash_hex, verify_hash_hex, VerifyHashHexInput};
use crate::error::PayError;
use crate::keyset::Keyset;
use crate::offer::{is_valid_id, RequestBindingMode};

const MAX_FREEFORM_LEN: usize = 256;
const SPEND_AUTH_VERSION_DEFAULT: &str = "SpendAuthorization.v1";

/// The payment token payload (§3). Field order is irrelevant — signatures
/// are computed over canonical-JSON bytes, not struct declaration order.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct PaymentTokenPayload {
    pub iss: String,
    pub aud: String,
    pub gate_id: String,
    pub authorization_ref: String,
    pub amount_cents: i64,
    pub currency: String,
    pub payee_provider_id: String,
    pub iat: i64,
    pub exp: i64,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub request_binding_mode: Option<RequestBindingMode>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub request_binding_sha256: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub quote_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub quote_sha256: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub idempotency_key: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub nonce: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sponsor_ref: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sponsor_wallet_ref: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub agent_key_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub delegation_ref: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub policy_version: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub policy_fingerprint: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub spend_authorization_version: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct TokenEnvelope {
    v: u8,
    kid: String,
    payload: Value,
    sig: String,
}

pub struct MintParams<'a> {
    pub payload: PaymentTokenPayload,
    pub private_key_pem: &'a str,
    /// The signer's public key PEM, used to derive `kid`. Pass the PEM
    /// whenever it's available; a bare pre-derived `kid` is only for
    /// callers that already hold it from a keyset lookup.
    pub public_key_pem: Option<&'a str>,
    pub kid: Option<String>,
}

#[derive(Debug, Clone)]
pub struct MintResult {
    pub token: String,
    pub token_sha256: String,
    pub kid: String,
    pub payload_hash_hex: String,
}

/// Normalize a payload: apply the `spendAuthorizationVersion` default and
/// lower-case `policyFingerprint` (design note: `quoteId` stays
/// case-sensitive, `policyFingerprint` is normalized — preserve both).
pub fn normalize_payload(mut payload: PaymentTokenPayload) -> PaymentTokenPayload {
    if has_any_spend_auth_claim(&payload) && payload.spend_authorization_version.is_none() {
        payload.spend_authorization_version = Some(SPEND_AUTH_VERSION_DEFAULT.to_string());
    }
    if let Some(fp) = &payload.policy_fingerprint {
        payload.policy_fingerprint = Some(fp.to_lowercase());
    }
    payload
}

fn has_any_spend_auth_claim(payload: &PaymentTokenPayload) -> bool {
    payload.sponsor_ref.is_some()
        || payload.sponsor_wallet_ref.is_some()
        || payload.agent_key_id.is_some()
        || payload.delegation_ref.is_some()
        || payload.policy_version.is_some()
        || payload.policy_fingerprint.is_some()
}

/// Validate the §3 shape/range rules against an already-normalized
/// payload. Returns a human-readable reason on failure (wrapped by the
/// caller into `PayError::PayloadInvalid`).
pub fn validate_payload_shape(payload: &PaymentTokenPayload) -> Result<(), String> {
    if payload.exp <= payload.iat {
        return Err("exp must be greater than iat".into());
    }
    if payload.amount_cents < 1 {
        return Err("amountCents must be greater than zero".into());
    }

    for (name, value) in [
        ("iss", &payload.iss),
        ("aud", &payload.aud),
        ("gateId", &payload.gate_id),
        ("authorizationRef", &payload.authorization_ref),
        ("payeeProviderId", &payload.payee_provider_id),
    ] {
        if !is_valid_id(value) {
            return Err(format!("{name} must match ^[A-Za-z0-9:_-]+$ and be <=200 chars"));
        }
    }

    for (name, value) in [
        ("quoteId", &payload.quote_id),
        ("idempotencyKey", &payload.idempotency_key),
        ("sponsorRef", &payload.sponsor_ref),
        ("sponsorWalletRef", &payload.sponsor_wallet_ref),
        ("agentKeyId", &payload.agent_key_id),
        ("delegationRef", &payload.delegation_ref),
    ] {
        if let Some(v) = value {
            if !is_valid_id(v) {
                return Err(format!("{name} must match ^[A-Za-z0-9:_-]+$ and be <=200 chars"));
            }
        }
    }

    for (name, value) in [
        ("policyVersion", &payload.policy_version),
        ("spendAuthorizationVersion", &payload.spend_authorization_version),
        ("nonce", &payload.nonce),
    ] {
        if let Some(v) = value {
            if v.is_empty() || v.len() > MAX_FREEFORM_LEN {
                return Err(format!("{name} must be 1..={MAX_FREEFORM_LEN} characters"));
            }
        }
    }

    for (name, value) in [
        ("requestBindingSha256", &payload.request_binding_sha256),
        ("quoteSha256", &payload.quote_sha256),
        ("policyFingerprint", &payload.policy_fingerprint),
    ] {
        if let Some(v) = value {
            if !is_lowercase_hex64(v) {
                return Err(format!("{name} must be 64 lowercase hex characters"));
            }
        }
    }

    if payload.request_binding_mode == Some(RequestBindingMode::Strict)
        && payload.request_binding_sha256.is_none()
    {
        return Err("requestBindingMode=strict requires requestBindingSha256".into());
    }

    Ok(())
}

fn is_lowercase_hex64(s: &str) -> bool {
    s.len() == 64 && s.bytes().all(|b| b.is_ascii_digit() || (b'a'..=b'f').contains(&b))
}

/// Build the binding hash:
/// `sha256Hex(upper(method) + "\n" + lower(host) + "\n" + pathWithQuery + "\n" + lower(bodySha256))`.
/// `pathWithQuery` MUST start with `/`.
pub fn request_binding_sha256(
    method: &str,
    host: &str,
    path_with_query: &str,
    body: &[u8],
) -> String {
    let body_sha = sha256_hex(body).to_lowercase();
    let material = format!(
        "{}\n{}\n{}\n{}",
        method.to_uppercase(),
        host.to_lowercase(),
        path_with_query,
        body_sha
    );
    sha256_hex(material.as_bytes())
}

/// `mint`: normalize, derive `kid`, sign, and base64url-encode the
/// envelope.
pub fn mint(params: MintParams<'_>) -> Result<MintResult, String> {
    let payload = normalize_payload(params.payload);
    validate_payload_shape(&payload)?;

    let kid = match (params.kid, params.public_key_pem) {
        (Some(kid), _) => kid,
        (None, Some(pem)) => crate::crypto::key_id_from_public_key_pem(pem)
            .map_err(|e| format!("invalid signing key: {e}"))?,
        (None, None) => return Err("mint requires either kid or publicKeyPem".into()),
    };

    let payload_bytes =
        canonical_json_of(&payload).map_err(|e: CanonicalJsonError| e.to_string())?;
    let payload_hash_hex = sha256_hex(&payload_bytes);
    let raw_sig_base64 =
        sign_hash_hex(&payload_hash_hex, params.private_key_pem).map_err(|e| e.to_string())?;
    let sig = BASE64URL.encode(raw_sig_base64.as_bytes());

    let envelope = TokenEnvelope {
        v: 1,
        kid: kid.clone(),
        payload: serde_json::to_value(&payload).map_err(|e| e.to_string())?,
        sig,
    };
    let envelope_bytes =
        canonical_json_of(&envelope).map_err(|e: CanonicalJsonError| e.to_string())?;
    let token = BASE64URL.encode(&envelope_bytes);
    let token_sha256 = sha256_hex(token.as_bytes());

    Ok(MintResult {
        token,
        token_sha256,
        kid,
        payload_hash_hex,
    })
}

pub struct VerifyParams<'a> {
    pub token: &'a str,
    pub keyset: &'a Keyset,
    pub now_unix_seconds: i64,
    pub expected_audience: Option<&'a str>,
    pub expected_payee_provider_id: Option<&'a str>,
    pub expected_request_binding_sha256: Option<&'a str>,
}

#[derive(Debug, Clone)]
pub struct VerifiedToken {
    pub payload: PaymentTokenPayload,
    pub kid: String,
    pub token_sha256: String,
    pub payload_hash_hex: String,
}

/// `verify`: decode, check signature against the keyset, then apply the
/// claim checks in the order spec.md §4.3 lists the error codes.
pub fn verify(params: VerifyParams<'_>) -> Result<VerifiedToken, PayError> {
    let token_sha256 = sha256_hex(params.token.as_bytes());

    let envelope_bytes = BASE64URL
        .decode(params.token)
        .map_err(|e| PayError::PayloadInvalid(format!("invalid base64url token: {e}")))?;
    let envelope: TokenEnvelope = serde_json::from_slice(&envelope_bytes)
        .map_err(|e| PayError::PayloadInvalid(format!("invalid envelope JSON: {e}")))?;
    if envelope.v != 1 {
        return Err(PayError::PayloadInvalid(format!(
            "unknown envelope version {}",
            envelope.v
        )));
    }

    let entry = params
        .keyset
        .find(&envelope.kid)
        .ok_or(PayError::UnknownKid)?;

    let payload_bytes = canonical_json(&envelope.payload)
        .map_err(|e| PayError::PayloadInvalid(e.to_string()))?;
    let payload_hash_hex = sha256_hex(&payload_bytes);

    let raw_sig_base64 = String::from_utf8(
        BASE64URL
            .decode(&envelope.sig)
            .map_err(|e| PayError::PayloadInvalid(format!("invalid base64url sig: {e}")))?,
    )
    .map_err(|e| PayError::PayloadInvalid(format!("sig is not valid utf8 base64: {e}")))?;

    let sig_ok = verify_hash_hex(VerifyHashHexInput {
        hash_hex: &payload_hash_hex,
        signature_base64: &raw_sig_base64,
        public_key_pem: &entry.public_key_pem,
    })
    .map_err(|_| PayError::SignatureInvalid)?;
    if !sig_ok {
        return Err(PayError::SignatureInvalid);
    }

    let payload: PaymentTokenPayload = serde_json::from_value(envelope.payload)
        .map_err(|e| PayError::PayloadInvalid(format!("payload does not match schema: {e}")))?;
    validate_payload_shape(&payload).map_err(PayError::PayloadInvalid)?;

    if params.now_unix_seconds > payload.exp {
        return Err(PayError::Expired);
    }

    if let Some(expected_aud) = params.expected_audience {
        if payload.aud != expected_aud {
            return Err(PayError::AudienceMismatch);
        }
    }

    if let Some(expected_payee) = params.expected_payee_provider_id {
        if payload.payee_provider_id != expected_payee {
            return Err(PayError::PayeeMismatch);
        }
    }

    if payload.request_binding_mode == Some(RequestBindingMode::Strict) {
        let actual = payload
            .request_binding_sha256
            .as_deref()
            .ok_or(PayError::RequestBindingMissing)?;
        let expected = params
            .expected_request_binding_sha256
            .ok_or(PayError::RequestBindingRequired)?;
        if actual != expected {
            return Err(PayError::RequestBindingMismatch);
        }
    }

    Ok(VerifiedToken {
        payload,
        kid: envelope.kid,
        token_sha256,
        payload_hash_hex,
    })
}


#[cfg(test)]
mod proptests {
    use super::*;
    use crate::crypto::generate_ed25519;
    use crate::keyset::Keyset;
    use proptest::prelude::*;

    fn keyset_and_key() -> (Keyset, crate::crypto::Ed25519Keypair) {
        let kp = generate_ed25519();
        let kid = crate::crypto::key_id_from_public_key_pem(&kp.public_key_pem).unwrap();
        let keyset = Keyset::single_active(kid, kp.public_key_pem.clone(), "2026-01-01T00:00:00Z".into());
        (keyset, kp)
    }

    fn payload_with(amount_cents: i64, iat: i64, ttl: i64) -> PaymentTokenPayload {
        PaymentTokenPayload {
            iss: "nooterra-pay".into(),
            aud: "prov_publish_demo".into(),
            gate_id: "gate_1".into(),
            authorization_ref: "authz_1".into(),
            amount_cents,
            currency: "USD".into(),
            payee_provider_id: "prov_publish_demo".into(),
            iat,
            exp: iat + ttl,
            request_binding_mode: None,
            request_binding_sha256: None,
            quote_id: None,
            quote_sha256: None,
            idempotency_key: None,
            nonce: None,
            sponsor_ref: None,
            sponsor_wallet_ref: None,
            agent_key_id: None,
            delegation_ref: None,
            policy_version: None,
            policy_fingerprint: None,
            spend_authorization_version: None,
        }
    }

    proptest! {
        #[test]
        fn mint_then_verify_round_trips_for_arbitrary_amounts(
            amount_cents in 1_i64..crate::canonical::MAX_SAFE_INT,
            iat in 0_i64..2_000_000_000,
            ttl in 1_i64..1_000_000,
        ) {
            let (keyset, kp) = keyset_and_key();
            let payload = payload_with(amount_cents, iat, ttl);
            let minted = mint(MintParams {
                payload: payload.clone(),
                private_key_pem: &kp.private_key_pem,
                public_key_pem: Some(&kp.public_key_pem),
                kid: None,
            }).unwrap();

            let verified = verify(VerifyParams {
                token: &minted.token,
                keyset: &keyset,
                now_unix_seconds: iat,
                expected_audience: None,
                expected_payee_provider_id: None,
                expected_request_binding_sha256: None,
            }).unwrap();

            prop_assert_eq!(verified.payload, normalize_payload(payload));
        }

        #[test]
        fn any_single_byte_flip_in_the_token_is_rejected(
            amount_cents in 1_i64..1_000_000,
            flip_index in 0_usize..500,
        ) {
            let (keyset, kp) = keyset_and_key();
            let payload = payload_with(amount_cents, 1_700_000_000, 300);
            let minted = mint(MintParams {
                payload,
                private_key_pem: &kp.private_key_pem,
                public_key_pem: Some(&kp.public_key_pem),
                kid: None,
            }).unwrap();

            let mut bytes = minted.token.clone().into_bytes();
            let idx = flip_index % bytes.len();
            bytes[idx] ^= 0x01;
            let tampered = match String::from_utf8(bytes) {
                Ok(s) => s,
                Err(_) => return Ok(()), // non-UTF8 mutation: not a meaningful token at all
            };
            if tampered == minted.token {
                return Ok(()); // bit flip landed on a byte whose low bit was already 0 vs 1 in a way that round-trips identically (shouldn't happen, guard anyway)
            }

            let result = verify(VerifyParams {
                token: &tampered,
                keyset: &keyset,
                now_unix_seconds: 1_700_000_100,
                expected_audience: None,
                expected_payee_provider_id: None,
                expected_request_binding_sha256: None,
            });
            prop_assert!(result.is_err());
        }

        #[test]
        fn request_binding_sha256_changes_with_any_body_byte(
            prefix in "[a-z]{1,16}",
            suffix in "[a-z]{1,16}",
        ) {
            prop_assume!(prefix != suffix);
            let a = request_binding_sha256("POST", "api.example.com", "/actions/send", prefix.as_bytes());
            let b = request_binding_sha256("POST", "api.example.com", "/actions/send", suffix.as_bytes());
            prop_assert_ne!(a, b);
        }

        #[test]
        fn strict_binding_rejects_any_mutated_dimension(
            path in "/[a-z]{1,8}",
            body in "[a-z]{1,16}",
            mutate_path in "/[a-z]{1,8}",
            mutate_body in "[a-z]{1,16}",
        ) {
            prop_assume!(path != mutate_path || body != mutate_body);
            let (keyset, kp) = keyset_and_key();
            let binding = request_binding_sha256("POST", "api.example.com", &path, body.as_bytes());
            let mut payload = payload_with(500, 1_700_000_000, 300);
            payload.request_binding_mode = Some(RequestBindingMode::Strict);
            payload.request_binding_sha256 = Some(binding);

            let minted = mint(MintParams {
                payload,
                private_key_pem: &kp.private_key_pem,
                public_key_pem: Some(&kp.public_key_pem),
                kid: None,
            }).unwrap();

            let mutated = request_binding_sha256("POST", "api.example.com", &mutate_path, mutate_body.as_bytes());
            let result = verify(VerifyParams {
                token: &minted.token,
                keyset: &keyset,
                now_unix_seconds: 1_700_000_100,
                expected_audience: None,
                expected_payee_provider_id: None,
                expected_request_binding_sha256: Some(&mutated),
            });
            prop_assert_eq!(result.unwrap_err(), PayError::RequestBindingMismatch);
        }
    }
}
