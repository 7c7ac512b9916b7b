//! The normalized `Offer`: the price quote for a specific tool invocation,
//! derived from whatever a provider's `priceFor` callback returns.

use serde::{Deserialize, Serialize};
use thiserror::Error;

const MAX_ID_LEN: usize = 200;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Idempotency {
    Idempotent,
    NonIdempotent,
    SideEffecting,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RequestBindingMode {
    None,
    Strict,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SpendAuthorizationMode {
    Optional,
    Required,
}

/// What a provider's `priceFor(req, url)` callback returns, before §3's
/// defaulting rules are applied.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RawOffer {
    pub amount_cents: i64,
    pub currency: String,
    pub provider_id: String,
    pub tool_id: String,
    pub address: String,
    pub network: String,
    #[serde(default)]
    pub idempotency: Option<Idempotency>,
    #[serde(default)]
    pub request_binding_mode: Option<RequestBindingMode>,
    #[serde(default)]
    pub quote_required: bool,
    #[serde(default)]
    pub quote_id: Option<String>,
    #[serde(default)]
    pub spend_authorization_mode: Option<SpendAuthorizationMode>,
}

/// The normalized offer, with every default from §3 applied.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Offer {
    pub amount_cents: i64,
    pub currency: String,
    pub provider_id: String,
    pub tool_id: String,
    pub address: String,
    pub network: String,
    pub request_binding_mode: RequestBindingMode,
    pub quote_required: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub quote_id: Option<String>,
    pub spend_authorization_mode: SpendAuthorizationMode,
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum OfferError {
    #[error("amountCents must be a positive safe integer")]
    InvalidAmount,
    #[error("currency must match ^[A-Z][A-Z0-9_]{{2,11}}$")]
    InvalidCurrency,
    #[error("{0} must match ^[A-Za-z0-9:_-]+$ and be at most 200 characters")]
    InvalidId(&'static str),
}

/// Apply §3's defaulting rules to a raw offer.
pub fn normalize_offer(raw: RawOffer) -> Result<Offer, OfferError> {
    if raw.amount_cents < 1 || raw.amount_cents > crate::canonical::MAX_SAFE_INT {
        return Err(OfferError::InvalidAmount);
    }
    let currency = raw.currency.to_uppercase();
    if !is_valid_currency(&currency) {
        return Err(OfferError::InvalidCurrency);
    }
    for (name, value) in [
        ("providerId", &raw.provider_id),
        ("toolId", &raw.tool_id),
    ] {
        if !is_valid_id(value) {
            return Err(OfferError::InvalidId(name));
        }
    }
    if let Some(quote_id) = &raw.quote_id {
        if !is_valid_id(quote_id) {
            return Err(OfferError::InvalidId("quoteId"));
        }
    }

    let request_binding_mode = raw.request_binding_mode.unwrap_or(match raw.idempotency {
        Some(Idempotency::NonIdempotent) | Some(Idempotency::SideEffecting) => {
            RequestBindingMode::Strict
        }
        _ => RequestBindingMode::None,
    });

    let spend_authorization_mode = raw.spend_authorization_mode.unwrap_or(if raw.quote_required {
        SpendAuthorizationMode::Required
    } else {
        SpendAuthorizationMode::Optional
    });

    Ok(Offer {
        amount_cents: raw.amount_cents,
        currency,
        provider_id: raw.provider_id,
        tool_id: raw.tool_id,
        address: raw.address,
        network: raw.network,
        request_binding_mode,
        quote_required: raw.quote_required,
        quote_id: raw.quote_id,
        spend_authorization_mode,
    })
}

fn is_valid_currency(s: &str) -> bool {
    let bytes = s.as_bytes();
    if bytes.len() < 3 || bytes.len() > 12 {
        return false;
    }
    if !bytes[0].is_ascii_uppercase() {
        return false;
    }
    bytes[1..]
        .iter()
        .all(|b| b.is_ascii_uppercase() || b.is_ascii_digit() || *b == b'_')
}

pub fn is_valid_id(s: &str) -> bool {
    !s.is_empty()
        && s.len() <= MAX_ID_LEN
        && s.bytes()
            .all(|b| b.is_ascii_alphanumeric() || b == b':' || b == b'_' || b == b'-')
}
