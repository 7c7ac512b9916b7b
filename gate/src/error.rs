//! Gate-level error handling: configuration/programmer errors (fatal at
//! construction) and the HTTP mapping for payment-gating and
//! provider-internal failures (spec §7's three error classes).

use nooterra_pay_core::PayError;
use serde_json::{json, Value};
use thiserror::Error;

/// Class 1 errors: fatal at construction, never reachable at request time.
#[derive(Debug, Error)]
pub enum GateConfigError {
    #[error("TYPE_INVALID: {field} is invalid: {reason}")]
    TypeInvalid { field: &'static str, reason: String },
}

impl GateConfigError {
    pub fn type_invalid(field: &'static str, reason: impl Into<String>) -> Self {
        GateConfigError::TypeInvalid {
            field,
            reason: reason.into(),
        }
    }
}

/// Class 3 errors: provider-internal failures, surfaced as HTTP 500 and
/// never written to the replay store.
#[derive(Debug, Error)]
pub enum HandlerError {
    #[error("pricing_error: {0}")]
    Pricing(String),
    #[error("provider_execution_error: {0}")]
    Execution(String),
}

impl HandlerError {
    pub fn error_tag(&self) -> &'static str {
        match self {
            HandlerError::Pricing(_) => "pricing_error",
            HandlerError::Execution(_) => "provider_execution_error",
        }
    }

    pub fn body(&self) -> Value {
        json!({
            "ok": false,
            "error": self.error_tag(),
            "message": self.to_string(),
        })
    }
}

/// Build the class-2 (payment-gating) 402 JSON body: `{ok:false,
/// error:"payment_required", code, message, offer, quote?, details?}`.
pub fn pay_error_body(error: &PayError, offer: &Value, quote: Option<&Value>) -> Value {
    let mut body = json!({
        "ok": false,
        "error": "payment_required",
        "code": error.code(),
        "message": error.to_string(),
        "offer": offer,
    });
    if let Some(quote) = quote {
        body["quote"] = quote.clone();
    }
    if let Some(details) = pay_error_details(error) {
        body["details"] = details;
    }
    body
}

fn pay_error_details(error: &PayError) -> Option<Value> {
    match error {
        PayError::PayloadInvalid(reason) => Some(json!({ "reason": reason })),
        PayError::SpendAuthRequired { missing_claims } => {
            Some(json!({ "missingClaims": missing_claims }))
        }
        _ => None,
    }
}
