//! The bit-exact `NOOTERRA_PAY_*` error code taxonomy shared by token
//! verification (`token::verify`) and the paid request handler's claim
//! checks (`gate::handler`).

use serde::Serialize;
use thiserror::Error;

/// A payment-gating failure. Every variant maps to exactly one HTTP 402
/// `code` string from spec.md §4.3/§7 — these are never retried by the
/// gate, only surfaced to the caller.
#[derive(Debug, Clone, Error, Serialize, PartialEq, Eq)]
#[serde(tag = "code", content = "details")]
pub enum PayError {
    #[error("no Authorization header, or scheme is not NooterraPay")]
    PaymentRequired,

    #[error("kid absent from keyset")]
    UnknownKid,

    #[error("signature does not verify")]
    SignatureInvalid,

    #[error("payload fails shape/range rules: {0}")]
    PayloadInvalid(String),

    #[error("nowUnixSeconds > exp")]
    Expired,

    #[error("aud != expectedAudience")]
    AudienceMismatch,

    #[error("payeeProviderId != expectedPayeeProviderId")]
    PayeeMismatch,

    #[error("requestBindingMode is strict but payload has no binding field")]
    RequestBindingMissing,

    #[error("requestBindingMode is strict but caller supplied no expected binding")]
    RequestBindingRequired,

    #[error("request binding hashes differ")]
    RequestBindingMismatch,

    #[error("keyset unavailable: well-known fetch failed and no pinned key configured")]
    KeysetUnavailable,

    #[error("aud/payeeProviderId does not match this provider")]
    ProviderMismatch,

    #[error("amountCents does not match the offer")]
    AmountMismatch,

    #[error("currency does not match the offer")]
    CurrencyMismatch,

    #[error("offer requires a quote but payload.quoteId is empty")]
    QuoteRequired,

    #[error("payload.quoteId does not equal the offer's pinned quoteId")]
    QuoteMismatch,

    #[error("spend authorization claims missing: {missing_claims:?}")]
    SpendAuthRequired { missing_claims: Vec<String> },

    #[error("request body exceeds maxRequestBodyBytes")]
    RequestBodyTooLarge,
}

impl PayError {
    /// The stable `NOOTERRA_PAY_*` (or legacy `PAYMENT_REQUIRED`) code
    /// string, bit-exact with spec.md.
    pub fn code(&self) -> &'static str {
        match self {
            PayError::PaymentRequired => "PAYMENT_REQUIRED",
            PayError::UnknownKid => "NOOTERRA_PAY_UNKNOWN_KID",
            PayError::SignatureInvalid => "NOOTERRA_PAY_SIGNATURE_INVALID",
            PayError::PayloadInvalid(_) => "NOOTERRA_PAY_PAYLOAD_INVALID",
            PayError::Expired => "NOOTERRA_PAY_EXPIRED",
            PayError::AudienceMismatch => "NOOTERRA_PAY_AUDIENCE_MISMATCH",
            PayError::PayeeMismatch => "NOOTERRA_PAY_PAYEE_MISMATCH",
            PayError::RequestBindingMissing => "NOOTERRA_PAY_REQUEST_BINDING_MISSING",
            PayError::RequestBindingRequired => "NOOTERRA_PAY_REQUEST_BINDING_REQUIRED",
            PayError::RequestBindingMismatch => "NOOTERRA_PAY_REQUEST_BINDING_MISMATCH",
            PayError::KeysetUnavailable => "NOOTERRA_PAY_KEYSET_UNAVAILABLE",
            PayError::ProviderMismatch => "NOOTERRA_PAY_PROVIDER_MISMATCH",
            PayError::AmountMismatch => "NOOTERRA_PAY_AMOUNT_MISMATCH",
            PayError::CurrencyMismatch => "NOOTERRA_PAY_CURRENCY_MISMATCH",
            PayError::QuoteRequired => "NOOTERRA_PAY_QUOTE_REQUIRED",
            PayError::QuoteMismatch => "NOOTERRA_PAY_QUOTE_MISMATCH",
            PayError::SpendAuthRequired { .. } => "NOOTERRA_PAY_SPEND_AUTH_REQUIRED",
            PayError::RequestBodyTooLarge => "NOOTERRA_PAY_REQUEST_BODY_TOO_LARGE",
        }
    }
}
