//! nooterra-pay-core: canonical JSON, Ed25519 keysets, and the payment
//! token / quote-attestation / response-attestation codecs that back the
//! paid tool gate.
//!
//! This crate performs no networking and holds no mutable shared state —
//! it is pure data modelling and cryptography. The HTTP-facing
//! orchestration (keyset resolver, replay store, request handler) lives in
//! `nooterra-pay-gate`.

pub mod attestation;
pub mod canonical;
pub mod crypto;
pub mod error;
pub mod keyset;
pub mod manifest;
pub mod offer;
pub mod quote;
pub mod token;

pub use canonical::{
    canonical_json, canonical_json_hash_hex, canonical_json_of, normalize, sha256_hex,
    CanonicalJsonError,
};
pub use crypto::{
    generate_ed25519, key_id_from_public_key_pem, sign_hash_hex, verify_hash_hex, CryptoError,
    Ed25519Keypair, VerifyHashHexInput,
};
pub use attestation::{sign_response, verify_response_attestation, ResponseAttestation};
pub use error::PayError;
pub use manifest::{manifest_content_hash, normalize_manifest, ManifestError, RawToolManifest, ToolManifest};
pub use quote::{build_quote, verify_quote_signature, BuildQuoteInput, BuiltQuote, QuotePayload, QuoteSignature};
pub use keyset::{KeyStatus, Keyset, KeysetEntry, KeysetError};
pub use offer::{
    is_valid_id, normalize_offer, Idempotency, Offer, OfferError, RawOffer, RequestBindingMode,
    SpendAuthorizationMode,
};
pub use token::{
    mint, normalize_payload, request_binding_sha256, validate_payload_shape, verify, MintParams,
    MintResult, PaymentTokenPayload, VerifiedToken, VerifyParams,
};
