//! Keyset model — `NooterraPayKeyset.v1`: the signed envelope enumerating
//! the keys a verifier currently trusts for payment tokens.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::crypto::key_id_from_public_key_pem;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum KeyStatus {
    Active,
    Rotated,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KeysetEntry {
    pub key_id: String,
    pub public_key_pem: String,
    pub status: KeyStatus,
}

/// `NooterraPayKeyset.v1`. Exactly one entry may be `Active`; verification
/// accepts any listed `keyId` whose public key validates the signature
/// regardless of status. An empty `keys[]` is invalid.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Keyset {
    pub keys: Vec<KeysetEntry>,
    pub refreshed_at: String,
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum KeysetError {
    #[error("keyset has no keys")]
    Empty,
    #[error("keyset has more than one active key")]
    MultipleActive,
    #[error("keyset entry keyId does not match its publicKeyPem derivation: {0}")]
    KeyIdMismatch(String),
}

impl Keyset {
    /// Validate the §3 invariants: non-empty, at most one `active` entry,
    /// and every `keyId` matches the SHA-256(DER SPKI) of its public key.
    pub fn validate(&self) -> Result<(), KeysetError> {
        if self.keys.is_empty() {
            return Err(KeysetError::Empty);
        }
        let active_count = self
            .keys
            .iter()
            .filter(|k| k.status == KeyStatus::Active)
            .count();
        if active_count > 1 {
            return Err(KeysetError::MultipleActive);
        }
        for entry in &self.keys {
            let derived = key_id_from_public_key_pem(&entry.public_key_pem)
                .map_err(|_| KeysetError::KeyIdMismatch(entry.key_id.clone()))?;
            if derived != entry.key_id {
                return Err(KeysetError::KeyIdMismatch(entry.key_id.clone()));
            }
        }
        Ok(())
    }

    /// Find the entry for a given `kid`, if the keyset lists it.
    pub fn find(&self, kid: &str) -> Option<&KeysetEntry> {
        self.keys.iter().find(|k| k.key_id == kid)
    }

    /// Build a single-key keyset for a provider's own signing key (the
    /// shape a provider publishes at its well-known endpoint).
    pub fn single_active(key_id: String, public_key_pem: String, refreshed_at: String) -> Self {
        Keyset {
            keys: vec![KeysetEntry {
                key_id,
                public_key_pem,
                status: KeyStatus::Active,
            }],
            refreshed_at,
        }
    }
}
