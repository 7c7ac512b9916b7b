//! Paid Tool Manifest: the provider-authored description of a paid tool,
//! normalized and content-hashed at publish time so a gate can detect when a
//! manifest changes underneath a live `toolId`.
//!
//! v2 adds `requestBindingMode`/`spendAuthorizationMode` hints so a caller
//! can pre-flight without waiting for a 402; v1 manifests are accepted and
//! upgraded in place (missing fields take the same defaults as `Offer`).

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::canonical::{canonical_json_of, sha256_hex, CanonicalJsonError};
use crate::offer::{is_valid_id, Idempotency, RequestBindingMode, SpendAuthorizationMode};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RawToolManifest {
    pub schema_version: String,
    pub provider_id: String,
    pub tool_id: String,
    pub description: String,
    #[serde(default)]
    pub idempotency: Option<Idempotency>,
    #[serde(default)]
    pub request_binding_mode: Option<RequestBindingMode>,
    #[serde(default)]
    pub spend_authorization_mode: Option<SpendAuthorizationMode>,
}

/// The normalized manifest, always expressed in the `v2` shape.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ToolManifest {
    pub schema_version: String,
    pub provider_id: String,
    pub tool_id: String,
    pub description: String,
    pub request_binding_mode: RequestBindingMode,
    pub spend_authorization_mode: SpendAuthorizationMode,
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ManifestError {
    #[error("schemaVersion must be \"PaidToolManifest.v1\" or \"PaidToolManifest.v2\"")]
    UnknownSchemaVersion,
    #[error("{0} must match ^[A-Za-z0-9:_-]+$ and be at most 200 characters")]
    InvalidId(&'static str),
    #[error("description must be 1..=2000 characters")]
    InvalidDescription,
}

const MAX_DESCRIPTION_LEN: usize = 2000;

/// Normalize a v1 or v2 manifest into the canonical v2 shape, applying the
/// same `requestBindingMode`/`spendAuthorizationMode` defaults as `Offer`.
pub fn normalize_manifest(raw: RawToolManifest) -> Result<ToolManifest, ManifestError> {
    if raw.schema_version != "PaidToolManifest.v1" && raw.schema_version != "PaidToolManifest.v2" {
        return Err(ManifestError::UnknownSchemaVersion);
    }
    for (name, value) in [("providerId", &raw.provider_id), ("toolId", &raw.tool_id)] {
        if !is_valid_id(value) {
            return Err(ManifestError::InvalidId(name));
        }
    }
    if raw.description.is_empty() || raw.description.len() > MAX_DESCRIPTION_LEN {
        return Err(ManifestError::InvalidDescription);
    }

    let request_binding_mode = raw.request_binding_mode.unwrap_or(match raw.idempotency {
        Some(Idempotency::NonIdempotent) | Some(Idempotency::SideEffecting) => {
            RequestBindingMode::Strict
        }
        _ => RequestBindingMode::None,
    });
    let spend_authorization_mode = raw
        .spend_authorization_mode
        .unwrap_or(SpendAuthorizationMode::Optional);

    Ok(ToolManifest {
        schema_version: "PaidToolManifest.v2".to_string(),
        provider_id: raw.provider_id,
        tool_id: raw.tool_id,
        description: raw.description,
        request_binding_mode,
        spend_authorization_mode,
    })
}

/// `sha256Hex(canonicalJson(manifest))` — changes whenever any normalized
/// field changes, including a v1→v2 defaulting flip.
pub fn manifest_content_hash(manifest: &ToolManifest) -> Result<String, CanonicalJsonError> {
    Ok(sha256_hex(&canonical_json_of(manifest)?))
}
