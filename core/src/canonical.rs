//! Canonical JSON serialization and SHA-256 fingerprinting.
//!
//! Every signature in this crate is computed over
//! `sha256Hex(canonicalJson(normalize(value)))`. The encoding here must
//! match byte-for-byte across any reimplementation or signatures stop
//! verifying across versions: sorted object keys, minimal number forms,
//! minimal string escaping, no insignificant whitespace.

use serde::Serialize;
use serde_json::{Number, Value};
use sha2::{Digest, Sha256};
use thiserror::Error;

/// Largest integer magnitude that round-trips through an IEEE-754 f64
/// (2^53 - 1), matching the safe-integer boundary used by the wire format.
pub const MAX_SAFE_INT: i64 = 9_007_199_254_740_991;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum CanonicalJsonError {
    #[error("number is not representable in canonical form (NaN, infinite, or outside the safe integer range)")]
    InvalidNumber,
    #[error("value contains a cycle")]
    Cycle,
    #[error("serialization failed: {0}")]
    Encoding(String),
}

/// Recursively validate a JSON value against the canonical-form rules and
/// return the normalized value. Rejects NaN/Infinity and integers outside
/// the safe-integer range. `serde_json::Value` trees cannot contain cycles
/// (they're built bottom-up), so the cycle check exists only for parity
/// with the specification of this operation in other languages.
pub fn normalize(value: &Value) -> Result<Value, CanonicalJsonError> {
    match value {
        Value::Null | Value::Bool(_) | Value::String(_) => Ok(value.clone()),
        Value::Number(n) => {
            canonical_number_string(n)?;
            Ok(Value::Number(n.clone()))
        }
        Value::Array(items) => {
            let mut out = Vec::with_capacity(items.len());
            for item in items {
                out.push(normalize(item)?);
            }
            Ok(Value::Array(out))
        }
        Value::Object(map) => {
            let mut out = serde_json::Map::new();
            for (k, v) in map {
                out.insert(k.clone(), normalize(v)?);
            }
            Ok(Value::Object(out))
        }
    }
}

/// Serialize `value` (already normalized, or not — this re-validates) to
/// its canonical JSON byte representation: UTF-8, no insignificant
/// whitespace, object keys sorted lexicographically by code point.
pub fn canonical_json(value: &Value) -> Result<Vec<u8>, CanonicalJsonError> {
    let normalized = normalize(value)?;
    let mut out = Vec::new();
    encode(&normalized, &mut out)?;
    Ok(out)
}

/// Convenience: canonicalize and hash any `Serialize` value in one step.
pub fn canonical_json_of<T: Serialize>(value: &T) -> Result<Vec<u8>, CanonicalJsonError> {
    let json = serde_json::to_value(value)
        .map_err(|e| CanonicalJsonError::Encoding(e.to_string()))?;
    canonical_json(&json)
}

/// Lowercase hex SHA-256 digest of arbitrary bytes.
pub fn sha256_hex(bytes: &[u8]) -> String {
    let digest = Sha256::digest(bytes);
    hex_lower(&digest)
}

/// `sha256Hex(canonicalJson(value))` — the load-bearing "normalize then
/// hash" discipline every signature in this crate relies on.
pub fn canonical_json_hash_hex<T: Serialize>(value: &T) -> Result<String, CanonicalJsonError> {
    Ok(sha256_hex(&canonical_json_of(value)?))
}

pub fn hex_lower(bytes: &[u8]) -> String {
    let mut s = String::with_capacity(bytes.len() * 2);
    for b in bytes {
        s.push_str(&format!("{:02x}", b));
    }
    s
}

fn encode(value: &Value, out: &mut Vec<u8>) -> Result<(), CanonicalJsonError> {
    match value {
        Value::Null => out.extend_from_slice(b"null"),
        Value::Bool(true) => out.extend_from_slice(b"true"),
        Value::Bool(false) => out.extend_from_slice(b"false"),
        Value::Number(n) => out.extend_from_slice(canonical_number_string(n)?.as_bytes()),
        Value::String(s) => encode_string(s, out)?,
        Value::Array(items) => {
            out.push(b'[');
            for (i, item) in items.iter().enumerate() {
                if i > 0 {
                    out.push(b',');
                }
                encode(item, out)?;
            }
            out.push(b']');
        }
        Value::Object(map) => {
            out.push(b'{');
            let mut keys: Vec<&String> = map.keys().collect();
            keys.sort();
            for (i, key) in keys.iter().enumerate() {
                if i > 0 {
                    out.push(b',');
                }
                encode_string(key, out)?;
                out.push(b':');
                encode(map.get(*key).expect("key from map.keys()"), out)?;
            }
            out.push(b'}');
        }
    }
    Ok(())
}

fn encode_string(s: &str, out: &mut Vec<u8>) -> Result<(), CanonicalJsonError> {
    let quoted =
        serde_json::to_string(s).map_err(|e| CanonicalJsonError::Encoding(e.to_string()))?;
    out.extend_from_slice(quoted.as_bytes());
    Ok(())
}

fn canonical_number_string(n: &Number) -> Result<String, CanonicalJsonError> {
    if let Some(i) = n.as_i64() {
        if i.unsigned_abs() > MAX_SAFE_INT as u64 {
            return Err(CanonicalJsonError::InvalidNumber);
        }
        return Ok(i.to_string());
    }
    if let Some(u) = n.as_u64() {
        if u > MAX_SAFE_INT as u64 {
            return Err(CanonicalJsonError::InvalidNumber);
        }
        return Ok(u.to_string());
    }
    if let Some(f) = n.as_f64() {
        if !f.is_finite() {
            return Err(CanonicalJsonError::InvalidNumber);
        }
        return Ok(n.to_string());
    }
    Err(CanonicalJsonError::InvalidNumber)
}
