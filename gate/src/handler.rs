//! The paid request handler: orchestrates price → challenge → verify →
//! replay-check → execute → sign-response → cache (spec §4.7, states
//! S0–S12). Framework-agnostic — operates on plain `http` types so any
//! `tower` host can wrap it; `axum_adapter` mounts it as an `axum` handler.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use bytes::Bytes;
use chrono::Utc;
use http::{HeaderMap, Method, Uri};
use nooterra_pay_core::{
    build_quote, normalize_offer, request_binding_sha256 as compute_binding_sha256, sign_response,
    token, BuildQuoteInput, Offer, PayError, RawOffer, RequestBindingMode, ResponseAttestation,
    SpendAuthorizationMode,
};
use serde_json::Value;
use tracing::{info, warn};

use crate::error::{pay_error_body, HandlerError};
use crate::replay::{ReplayRow, ReplayStore};
use crate::resolver::KeysetResolver;

pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// Everything about the inbound request the handler needs that isn't the
/// body (already read by the caller — see `HandlerConfig::max_request_body_bytes`).
#[derive(Debug, Clone)]
pub struct RequestMeta {
    pub method: Method,
    pub uri: Uri,
    pub headers: HeaderMap,
}

impl RequestMeta {
    fn host(&self) -> String {
        self.headers
            .get(http::header::HOST)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string)
            .or_else(|| self.uri.authority().map(|a| a.as_str().to_string()))
            .unwrap_or_default()
    }

    fn path_with_query(&self) -> String {
        self.uri
            .path_and_query()
            .map(|pq| pq.as_str().to_string())
            .unwrap_or_else(|| "/".to_string())
    }

    fn allows_body(&self) -> bool {
        matches!(
            self.method,
            Method::POST | Method::PUT | Method::PATCH | Method::DELETE
        )
    }
}

pub struct ExecuteInput {
    pub meta: RequestMeta,
    pub body: Bytes,
    pub offer: Offer,
    pub verification: token::VerifiedToken,
    pub request_binding_sha256: Option<String>,
}

pub struct ExecuteResult {
    pub status: u16,
    pub headers: Vec<(String, String)>,
    pub content_type: Option<String>,
    pub body: Bytes,
}

pub type PriceForFn =
    Box<dyn Fn(&RequestMeta) -> BoxFuture<'static, Result<RawOffer, String>> + Send + Sync>;
pub type ExecuteFn =
    Box<dyn Fn(ExecuteInput) -> BoxFuture<'static, Result<ExecuteResult, String>> + Send + Sync>;

#[derive(Debug, Clone)]
pub struct HandlerConfig {
    pub provider_id: String,
    pub provider_public_key_pem: String,
    pub provider_private_key_pem: String,
    pub replay_ttl_buffer_ms: i64,
    pub quote_ttl_seconds: i64,
    pub max_request_body_bytes: usize,
}

pub struct PaidRequestHandler {
    config: HandlerConfig,
    resolver: Arc<KeysetResolver>,
    replay_store: Arc<dyn ReplayStore>,
    price_for: PriceForFn,
    execute: ExecuteFn,
}

impl PaidRequestHandler {
    pub fn new(
        config: HandlerConfig,
        resolver: Arc<KeysetResolver>,
        replay_store: Arc<dyn ReplayStore>,
        price_for: PriceForFn,
        execute: ExecuteFn,
    ) -> Self {
        PaidRequestHandler {
            config,
            resolver,
            replay_store,
            price_for,
            execute,
        }
    }

    pub async fn handle(&self, meta: RequestMeta, body: Bytes) -> http::Response<Bytes> {
        // S1 PRICE
        let raw_offer = match (self.price_for)(&meta).await {
            Ok(o) => o,
            Err(e) => return self.error_500(HandlerError::Pricing(e)),
        };
        let offer = match normalize_offer(raw_offer) {
            Ok(o) => o,
            Err(e) => return self.error_500(HandlerError::Pricing(e.to_string())),
        };

        // S2 MAYBE_READ_BODY
        let binding_body: &[u8] = if meta.allows_body() { &body } else { &[] };
        let strict = offer.request_binding_mode == RequestBindingMode::Strict;
        if strict
            && meta.allows_body()
            && binding_body.len() > self.config.max_request_body_bytes
        {
            return self.error_402(
                PayError::RequestBodyTooLarge,
                &offer,
                None,
                meta.host().as_str(),
            );
        }

        // S3 BUILD_QUOTE
        let path_with_query = meta.path_with_query();
        let request_binding_sha256 = if strict {
            Some(compute_binding_sha256(
                meta.method.as_str(),
                &meta.host(),
                &path_with_query,
                binding_body,
            ))
        } else {
            None
        };

        let now = Utc::now();
        let built_quote = match build_quote(BuildQuoteInput {
            offer: &offer,
            method: meta.method.as_str(),
            path_with_query: &path_with_query,
            request_binding_sha256: request_binding_sha256.as_deref(),
            now,
            ttl_seconds: self.config.quote_ttl_seconds,
            private_key_pem: &self.config.provider_private_key_pem,
            public_key_pem: &self.config.provider_public_key_pem,
        }) {
            Ok(q) => q,
            Err(e) => return self.error_500(HandlerError::Pricing(e)),
        };
        // S4 PARSE_AUTH
        let token_str = match extract_bearer_token(&meta.headers) {
            Some(t) => t,
            None => {
                return self.error_402(
                    PayError::PaymentRequired,
                    &offer,
                    Some(&built_quote),
                    meta.host().as_str(),
                )
            }
        };

        // S5 VERIFY_TOKEN
        let now_unix = now.timestamp();
        let (keyset, keyset_source) = match self.resolver.get_keyset(now.timestamp_millis()).await
        {
            Ok(k) => k,
            Err(e) => {
                warn!(error = %e, "keyset unavailable");
                return self.error_402(
                    PayError::KeysetUnavailable,
                    &offer,
                    Some(&built_quote),
                    meta.host().as_str(),
                );
            }
        };

        let verified = match token::verify(token::VerifyParams {
            token: &token_str,
            keyset: &keyset,
            now_unix_seconds: now_unix,
            expected_audience: None,
            expected_payee_provider_id: None,
            expected_request_binding_sha256: request_binding_sha256.as_deref(),
        }) {
            Ok(v) => v,
            Err(e) => {
                return self.error_402(e, &offer, Some(&built_quote), meta.host().as_str())
            }
        };

        // S6 CHECK_CLAIMS
        if let Err(e) = check_claims(&verified.payload, &offer, &self.config.provider_id) {
            return self.error_402(e, &offer, Some(&built_quote), meta.host().as_str());
        }

        // S7 REPLAY_CHECK
        let replay_key = replay_key_for(&verified.payload, &verified.token_sha256);
        if let Some(row) = self.replay_store.get(&replay_key, now.timestamp_millis()) {
            info!(replay_key = %replay_key, "serving cached replay response");
            return replay_response(row);
        }

        // S8 EXECUTE
        let exec_input = ExecuteInput {
            meta: meta.clone(),
            body: body.clone(),
            offer: offer.clone(),
            verification: verified.clone(),
            request_binding_sha256: request_binding_sha256.clone(),
        };
        let result = match (self.execute)(exec_input).await {
            Ok(r) => r,
            Err(e) => return self.error_500(HandlerError::Execution(e)),
        };

        // S9/S10 SIGN_RESPONSE
        let attestation = match sign_response(
            &result.body,
            now,
            &self.config.provider_private_key_pem,
            &self.config.provider_public_key_pem,
        ) {
            Ok(a) => a,
            Err(e) => return self.error_500(HandlerError::Execution(e.to_string())),
        };

        // S11 WRITE RESPONSE
        let response = build_response(
            &result,
            &attestation,
            &verified,
            &keyset_source,
            &offer,
            request_binding_sha256.as_deref(),
            false,
        );

        // S12 INSERT REPLAY ROW
        let expires_at_ms = if verified.payload.exp > 0 {
            verified.payload.exp * 1000 + self.config.replay_ttl_buffer_ms
        } else {
            now.timestamp_millis() + 5 * 60 * 1000
        };
        self.replay_store.set(
            &replay_key,
            ReplayRow {
                expires_at_ms,
                status_code: result.status,
                headers: result.headers.clone(),
                content_type: result.content_type.clone(),
                body_bytes: result.body.to_vec(),
                signature: attestation,
                request_binding_mode: offer.request_binding_mode,
                request_binding_sha256,
            },
            now.timestamp_millis(),
        );

        response
    }

    fn error_402(
        &self,
        error: PayError,
        offer: &Offer,
        quote: Option<&nooterra_pay_core::BuiltQuote>,
        _host: &str,
    ) -> http::Response<Bytes> {
        let offer_value = serde_json::to_value(offer).unwrap_or(Value::Null);
        let quote_payload_value =
            quote.map(|q| serde_json::to_value(&q.payload).unwrap_or(Value::Null));
        let body = pay_error_body(&error, &offer_value, quote_payload_value.as_ref());
        let body_bytes = Bytes::from(serde_json::to_vec(&body).unwrap_or_default());

        let mut builder = http::Response::builder().status(402);
        let headers = builder.headers_mut().unwrap();
        let payment_required_value = payment_required_header_value(offer);
        insert_header(headers, "x-payment-required", &payment_required_value);
        insert_header(headers, "PAYMENT-REQUIRED", &payment_required_value);
        insert_header(headers, "x-nooterra-payment-error", error.code());
        if let Some(quote) = quote {
            if let Ok(quote_b64) = base64url_canonical_json(&quote.payload) {
                insert_header(headers, "x-nooterra-provider-quote", &quote_b64);
            }
            if let Ok(sig_b64) = base64url_canonical_json(&quote.signature) {
                insert_header(headers, "x-nooterra-provider-quote-signature", &sig_b64);
            }
        }
        insert_header(headers, "content-type", "application/json");

        builder.body(body_bytes).expect("building 402 response")
    }

    fn error_500(&self, error: HandlerError) -> http::Response<Bytes> {
        warn!(error = %error, "handler error");
        let body_bytes = Bytes::from(serde_json::to_vec(&error.body()).unwrap_or_default());
        http::Response::builder()
            .status(500)
            .header("content-type", "application/json")
            .body(body_bytes)
            .expect("building 500 response")
    }
}

fn insert_header(headers: &mut http::HeaderMap, name: &str, value: &str) {
    if let (Ok(name), Ok(v)) = (
        http::HeaderName::from_bytes(name.as_bytes()),
        http::HeaderValue::from_str(value),
    ) {
        headers.insert(name, v);
    }
}

fn base64url_canonical_json<T: serde::Serialize>(value: &T) -> Result<String, String> {
    use base64::{engine::general_purpose::URL_SAFE_NO_PAD as BASE64URL, Engine as _};
    let bytes = nooterra_pay_core::canonical_json_of(value).map_err(|e| e.to_string())?;
    Ok(BASE64URL.encode(bytes))
}

fn extract_bearer_token(headers: &HeaderMap) -> Option<String> {
    let raw = headers.get(http::header::AUTHORIZATION)?.to_str().ok()?;
    let mut parts = raw.splitn(2, ' ');
    let scheme = parts.next()?;
    let token = parts.next()?.trim();
    if scheme.eq_ignore_ascii_case("NooterraPay") && !token.is_empty() {
        Some(token.to_string())
    } else {
        None
    }
}

fn payment_required_header_value(offer: &Offer) -> String {
    let mut parts = vec![
        format!("amountCents={}", offer.amount_cents),
        format!("currency={}", offer.currency),
        format!("providerId={}", offer.provider_id),
        format!("toolId={}", offer.tool_id),
        format!("address={}", offer.address),
        format!("network={}", offer.network),
        format!(
            "requestBindingMode={}",
            match offer.request_binding_mode {
                RequestBindingMode::None => "none",
                RequestBindingMode::Strict => "strict",
            }
        ),
    ];
    if offer.quote_required {
        parts.push("quoteRequired=1".to_string());
    }
    if let Some(quote_id) = &offer.quote_id {
        parts.push(format!("quoteId={quote_id}"));
    }
    if offer.spend_authorization_mode == SpendAuthorizationMode::Required {
        parts.push("spendAuthorizationMode=required".to_string());
    }
    parts.join("; ")
}

/// §4.7 S6: identity and price claim checks the handler itself enforces
/// (distinct from the token-codec-level audience/payee checks `token::verify`
/// performs when callers pass `expectedAudience`/`expectedPayeeProviderId`
/// directly).
fn check_claims(
    payload: &token::PaymentTokenPayload,
    offer: &Offer,
    provider_id: &str,
) -> Result<(), PayError> {
    if payload.aud != provider_id || payload.payee_provider_id != provider_id {
        return Err(PayError::ProviderMismatch);
    }
    if payload.amount_cents != offer.amount_cents {
        return Err(PayError::AmountMismatch);
    }
    if payload.currency != offer.currency {
        return Err(PayError::CurrencyMismatch);
    }
    if offer.quote_required && payload.quote_id.as_deref().unwrap_or("").is_empty() {
        return Err(PayError::QuoteRequired);
    }
    if let Some(offer_quote_id) = &offer.quote_id {
        if payload.quote_id.as_deref() != Some(offer_quote_id.as_str()) {
            return Err(PayError::QuoteMismatch);
        }
    }
    if offer.spend_authorization_mode == SpendAuthorizationMode::Required {
        let mut missing = Vec::new();
        if payload.quote_id.is_none() {
            missing.push("quoteId".to_string());
        }
        if payload.idempotency_key.is_none() {
            missing.push("idempotencyKey".to_string());
        }
        if payload.nonce.is_none() {
            missing.push("nonce".to_string());
        }
        if payload.sponsor_ref.is_none() {
            missing.push("sponsorRef".to_string());
        }
        if payload.agent_key_id.is_none() {
            missing.push("agentKeyId".to_string());
        }
        if payload.policy_fingerprint.is_none() {
            missing.push("policyFingerprint".to_string());
        }
        if !missing.is_empty() {
            return Err(PayError::SpendAuthRequired {
                missing_claims: missing,
            });
        }
    }
    Ok(())
}

fn replay_key_for(payload: &token::PaymentTokenPayload, token_sha256: &str) -> String {
    if !payload.authorization_ref.is_empty() {
        payload.authorization_ref.clone()
    } else if !payload.gate_id.is_empty() {
        payload.gate_id.clone()
    } else {
        token_sha256.to_string()
    }
}

fn build_response(
    result: &ExecuteResult,
    attestation: &ResponseAttestation,
    verified: &token::VerifiedToken,
    keyset_source: &crate::resolver::KeysetSource,
    offer: &Offer,
    request_binding_sha256: Option<&str>,
    replay: bool,
) -> http::Response<Bytes> {
    let mut builder = http::Response::builder().status(result.status);
    {
        let headers = builder.headers_mut().unwrap();
        for (k, v) in &result.headers {
            insert_header(headers, k, v);
        }
        if let Some(ct) = &result.content_type {
            insert_header(headers, "content-type", ct);
        }
        insert_header(headers, "x-nooterra-provider-key-id", &attestation.key_id);
        insert_header(
            headers,
            "x-nooterra-provider-signed-at",
            &attestation.signed_at,
        );
        insert_header(headers, "x-nooterra-provider-nonce", &attestation.nonce);
        insert_header(
            headers,
            "x-nooterra-provider-response-sha256",
            &attestation.response_hash,
        );
        insert_header(
            headers,
            "x-nooterra-provider-signature",
            &attestation.signature_base64,
        );
        insert_header(
            headers,
            "x-nooterra-provider-authorization-ref",
            &verified.payload.authorization_ref,
        );
        insert_header(
            headers,
            "x-nooterra-provider-gate-id",
            &verified.payload.gate_id,
        );
        if let Some(quote_id) = &verified.payload.quote_id {
            insert_header(headers, "x-nooterra-provider-quote-id", quote_id);
        }
        insert_header(
            headers,
            "x-nooterra-provider-token-sha256",
            &verified.token_sha256,
        );
        insert_header(
            headers,
            "x-nooterra-keyset-source",
            keyset_source_str(keyset_source),
        );
        insert_header(
            headers,
            "x-nooterra-request-binding-mode",
            match offer.request_binding_mode {
                RequestBindingMode::None => "none",
                RequestBindingMode::Strict => "strict",
            },
        );
        if let Some(hash) = request_binding_sha256 {
            insert_header(headers, "x-nooterra-request-binding-sha256", hash);
        }
        if replay {
            insert_header(headers, "x-nooterra-provider-replay", "duplicate");
        }
    }
    builder
        .body(Bytes::copy_from_slice(&result.body))
        .expect("building 200 response")
}

fn replay_response(row: ReplayRow) -> http::Response<Bytes> {
    let mut builder = http::Response::builder().status(row.status_code);
    {
        let headers = builder.headers_mut().unwrap();
        for (k, v) in &row.headers {
            insert_header(headers, k, v);
        }
        if let Some(ct) = &row.content_type {
            insert_header(headers, "content-type", ct);
        }
        insert_header(headers, "x-nooterra-provider-key-id", &row.signature.key_id);
        insert_header(
            headers,
            "x-nooterra-provider-signed-at",
            &row.signature.signed_at,
        );
        insert_header(headers, "x-nooterra-provider-nonce", &row.signature.nonce);
        insert_header(
            headers,
            "x-nooterra-provider-response-sha256",
            &row.signature.response_hash,
        );
        insert_header(
            headers,
            "x-nooterra-provider-signature",
            &row.signature.signature_base64,
        );
        insert_header(
            headers,
            "x-nooterra-request-binding-mode",
            match row.request_binding_mode {
                RequestBindingMode::None => "none",
                RequestBindingMode::Strict => "strict",
            },
        );
        if let Some(hash) = &row.request_binding_sha256 {
            insert_header(headers, "x-nooterra-request-binding-sha256", hash);
        }
        insert_header(headers, "x-nooterra-provider-replay", "duplicate");
    }
    builder
        .body(Bytes::from(row.body_bytes))
        .expect("building replay response")
}

fn keyset_source_str(source: &crate::resolver::KeysetSource) -> &'static str {
    match source {
        crate::resolver::KeysetSource::None => "none",
        crate::resolver::KeysetSource::WellKnown => "well-known",
        crate::resolver::KeysetSource::PinnedOnly => "pinned-only",
        crate::resolver::KeysetSource::PinnedFallback => "pinned-fallback",
    }
}
