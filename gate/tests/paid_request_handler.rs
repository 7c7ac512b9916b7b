//! End-to-end scenarios against an in-process `axum::Router`, mirroring the
//! six literal scenarios used to validate the paid request handler.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use axum::body::Bytes;
use axum::routing::any;
use axum::Router;
use chrono::Utc;
use http::{Request, StatusCode};
use nooterra_pay_core::{
    generate_ed25519, key_id_from_public_key_pem, mint, Keyset, MintParams, PaymentTokenPayload,
};
use nooterra_pay_gate::axum_adapter::paid_tool_handler;
use nooterra_pay_gate::{
    ExecuteFn, ExecuteResult, GateConfig, HandlerConfig, KeysetResolverConfig, PriceForFn,
};
use tower::ServiceExt;

fn base_payload(now: i64) -> PaymentTokenPayload {
    PaymentTokenPayload {
        iss: "nooterra-pay".into(),
        aud: "prov_publish_demo".into(),
        gate_id: "gate_e2e".into(),
        authorization_ref: "authz_e2e_1".into(),
        amount_cents: 500,
        currency: "USD".into(),
        payee_provider_id: "prov_publish_demo".into(),
        iat: now,
        exp: now + 300,
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

fn const_price_for(
    raw: nooterra_pay_core::RawOffer,
) -> PriceForFn {
    Box::new(move |_meta| {
        let raw = raw.clone();
        Box::pin(async move { Ok(raw) })
    })
}

fn echo_execute() -> (ExecuteFn, Arc<AtomicUsize>) {
    let calls = Arc::new(AtomicUsize::new(0));
    let counted = calls.clone();
    let exec: ExecuteFn = Box::new(move |_input| {
        counted.fetch_add(1, Ordering::SeqCst);
        Box::pin(async move {
            Ok(ExecuteResult {
                status: 200,
                headers: vec![],
                content_type: Some("application/json".into()),
                body: Bytes::from_static(
                    br#"{"ok":true,"provider":"provider-publish-e2e","query":""}"#,
                ),
            })
        })
    });
    (exec, calls)
}

fn pinned_resolver_config(pem: &str) -> KeysetResolverConfig {
    KeysetResolverConfig {
        keyset_url: "http://127.0.0.1:1/.well-known/nooterra-pay-keyset".into(),
        pinned_public_key_pem: Some(pem.to_string()),
        pinned_key_id: None,
        pinned_only: true,
        default_max_age_ms: 60_000,
        fetch_timeout_ms: 500,
        pinned_max_age_ms: 60_000,
    }
}

fn handler_config(provider: &nooterra_pay_core::Ed25519Keypair) -> HandlerConfig {
    HandlerConfig {
        provider_id: "prov_publish_demo".into(),
        provider_public_key_pem: provider.public_key_pem.clone(),
        provider_private_key_pem: provider.private_key_pem.clone(),
        replay_ttl_buffer_ms: 5 * 60 * 1000,
        quote_ttl_seconds: 120,
        max_request_body_bytes: 1_000_000,
    }
}

fn base_offer() -> nooterra_pay_core::RawOffer {
    nooterra_pay_core::RawOffer {
        amount_cents: 500,
        currency: "USD".into(),
        provider_id: "prov_publish_demo".into(),
        tool_id: "bridge:search".into(),
        address: "nooterra:provider".into(),
        network: "nooterra".into(),
        idempotency: None,
        request_binding_mode: None,
        quote_required: false,
        quote_id: None,
        spend_authorization_mode: None,
    }
}

fn router(config: GateConfig, price_for: PriceForFn, execute: ExecuteFn) -> Router {
    let handler = Arc::new(config.build(price_for, execute).unwrap());
    Router::new()
        .route("/*path", any(paid_tool_handler))
        .with_state(handler)
}

async fn body_bytes(response: axum::response::Response) -> Bytes {
    axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap()
}

#[tokio::test]
async fn happy_path_none_binding_then_replay() {
    let service_key = generate_ed25519();
    let provider_key = generate_ed25519();
    let now = Utc::now().timestamp();

    let minted = mint(MintParams {
        payload: base_payload(now),
        private_key_pem: &service_key.private_key_pem,
        public_key_pem: Some(&service_key.public_key_pem),
        kid: None,
    })
    .unwrap();

    let config = GateConfig {
        handler: handler_config(&provider_key),
        keyset_resolver: pinned_resolver_config(&service_key.public_key_pem),
        replay_max_keys: 1_000,
    };
    let (execute, calls) = echo_execute();
    let app = router(config, const_price_for(base_offer()), execute);

    let request = || {
        Request::builder()
            .method("GET")
            .uri("/tools/search")
            .header("host", "api.example.com")
            .header(
                "authorization",
                format!("NooterraPay {}", minted.token),
            )
            .body(axum::body::Body::empty())
            .unwrap()
    };

    let first = app.clone().oneshot(request()).await.unwrap();
    assert_eq!(first.status(), StatusCode::OK);
    assert!(first.headers().get("x-nooterra-provider-signature").is_some());
    let first_body = body_bytes(first).await;

    let second = app.clone().oneshot(request()).await.unwrap();
    assert_eq!(second.status(), StatusCode::OK);
    assert_eq!(
        second.headers().get("x-nooterra-provider-replay").unwrap(),
        "duplicate"
    );
    let second_body = body_bytes(second).await;
    assert_eq!(first_body, second_body);
    assert_eq!(calls.load(Ordering::SeqCst), 1, "execute runs at most once");
}

#[tokio::test]
async fn strict_binding_mismatch_rejects_mutated_body() {
    let service_key = generate_ed25519();
    let provider_key = generate_ed25519();
    let now = Utc::now().timestamp();

    let binding = nooterra_pay_core::request_binding_sha256(
        "POST",
        "api.example.com",
        "/actions/send",
        b"body-a",
    );
    let mut payload = base_payload(now);
    payload.request_binding_mode = Some(nooterra_pay_core::RequestBindingMode::Strict);
    payload.request_binding_sha256 = Some(binding);

    let minted = mint(MintParams {
        payload,
        private_key_pem: &service_key.private_key_pem,
        public_key_pem: Some(&service_key.public_key_pem),
        kid: None,
    })
    .unwrap();

    let mut raw_offer = base_offer();
    raw_offer.request_binding_mode = Some(nooterra_pay_core::RequestBindingMode::Strict);

    let config = GateConfig {
        handler: handler_config(&provider_key),
        keyset_resolver: pinned_resolver_config(&service_key.public_key_pem),
        replay_max_keys: 1_000,
    };
    let (execute, _calls) = echo_execute();
    let app = router(config, const_price_for(raw_offer), execute);

    let ok = app
        .clone()
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/actions/send")
                .header("host", "api.example.com")
                .header("authorization", format!("NooterraPay {}", minted.token))
                .body(axum::body::Body::from("body-a"))
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(ok.status(), StatusCode::OK);

    let mismatched = app
        .clone()
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/actions/send")
                .header("host", "api.example.com")
                .header("authorization", format!("NooterraPay {}", minted.token))
                .body(axum::body::Body::from("body-b"))
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(mismatched.status(), 402);
    let body = body_bytes(mismatched).await;
    let json: serde_json::Value = serde_json::from_slice(&body).unwrap();
    assert_eq!(json["code"], "NOOTERRA_PAY_REQUEST_BINDING_MISMATCH");
}

#[tokio::test]
async fn missing_authorization_returns_quote_attestation() {
    let service_key = generate_ed25519();
    let provider_key = generate_ed25519();

    let config = GateConfig {
        handler: handler_config(&provider_key),
        keyset_resolver: pinned_resolver_config(&service_key.public_key_pem),
        replay_max_keys: 1_000,
    };
    let (execute, calls) = echo_execute();
    let app = router(config, const_price_for(base_offer()), execute);

    let response = app
        .oneshot(
            Request::builder()
                .method("GET")
                .uri("/tools/search")
                .header("host", "api.example.com")
                .body(axum::body::Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), 402);
    assert_eq!(calls.load(Ordering::SeqCst), 0);

    let quote_header = response
        .headers()
        .get("x-nooterra-provider-quote")
        .unwrap()
        .to_str()
        .unwrap()
        .to_string();
    let sig_header = response
        .headers()
        .get("x-nooterra-provider-quote-signature")
        .unwrap()
        .to_str()
        .unwrap()
        .to_string();

    use base64::{engine::general_purpose::URL_SAFE_NO_PAD as BASE64URL, Engine as _};
    let quote_payload: nooterra_pay_core::QuotePayload =
        serde_json::from_slice(&BASE64URL.decode(quote_header).unwrap()).unwrap();
    let quote_signature: nooterra_pay_core::QuoteSignature =
        serde_json::from_slice(&BASE64URL.decode(sig_header).unwrap()).unwrap();

    assert_eq!(quote_payload.provider_id, "prov_publish_demo");
    assert!(
        nooterra_pay_core::verify_quote_signature(&quote_payload, &quote_signature).unwrap()
    );

    let body = body_bytes(response).await;
    let json: serde_json::Value = serde_json::from_slice(&body).unwrap();
    assert!(json.get("offer").is_some());
}

#[tokio::test]
async fn spend_auth_required_reports_missing_nonce() {
    let service_key = generate_ed25519();
    let provider_key = generate_ed25519();
    let now = Utc::now().timestamp();

    let mut payload = base_payload(now);
    payload.quote_id = Some("x402quote_required_1".into());
    payload.idempotency_key = Some("idem_1".into());
    payload.sponsor_ref = Some("sponsor_1".into());
    payload.agent_key_id = Some("agent_1".into());
    payload.policy_fingerprint = Some("a".repeat(64));
    // nonce intentionally omitted.

    let minted = mint(MintParams {
        payload,
        private_key_pem: &service_key.private_key_pem,
        public_key_pem: Some(&service_key.public_key_pem),
        kid: None,
    })
    .unwrap();

    let mut raw_offer = base_offer();
    raw_offer.quote_required = true;
    raw_offer.quote_id = Some("x402quote_required_1".into());

    let config = GateConfig {
        handler: handler_config(&provider_key),
        keyset_resolver: pinned_resolver_config(&service_key.public_key_pem),
        replay_max_keys: 1_000,
    };
    let (execute, _calls) = echo_execute();
    let app = router(config, const_price_for(raw_offer), execute);

    let response = app
        .oneshot(
            Request::builder()
                .method("GET")
                .uri("/tools/search")
                .header("host", "api.example.com")
                .header("authorization", format!("NooterraPay {}", minted.token))
                .body(axum::body::Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), 402);
    let body = body_bytes(response).await;
    let json: serde_json::Value = serde_json::from_slice(&body).unwrap();
    assert_eq!(json["code"], "NOOTERRA_PAY_SPEND_AUTH_REQUIRED");
    let missing = json["details"]["missingClaims"].as_array().unwrap();
    assert!(missing.iter().any(|v| v == "nonce"));
}

#[tokio::test]
async fn keyset_rotation_then_fallback_to_pinned() {
    let k1 = generate_ed25519();
    let k2 = generate_ed25519();
    let provider_key = generate_ed25519();

    // A tiny well-known server whose served keyset flips from {K1} to {K2}.
    let served_key_id = key_id_from_public_key_pem(&k2.public_key_pem).unwrap();
    let keyset_json = serde_json::to_vec(&Keyset::single_active(
        served_key_id,
        k2.public_key_pem.clone(),
        "2026-01-01T00:00:00Z".into(),
    ))
    .unwrap();

    let well_known = Router::new().route(
        "/.well-known/nooterra-pay-keyset",
        axum::routing::get(move || {
            let body = keyset_json.clone();
            async move {
                (
                    [("cache-control", "max-age=60")],
                    axum::body::Bytes::from(body),
                )
            }
        }),
    );
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, well_known).await.unwrap();
    });

    let resolver_config = KeysetResolverConfig {
        keyset_url: format!("http://{addr}/.well-known/nooterra-pay-keyset"),
        pinned_public_key_pem: Some(k1.public_key_pem.clone()),
        pinned_key_id: None,
        pinned_only: false,
        default_max_age_ms: 60_000,
        fetch_timeout_ms: 2_000,
        pinned_max_age_ms: 60_000,
    };

    let config = GateConfig {
        handler: handler_config(&provider_key),
        keyset_resolver: resolver_config,
        replay_max_keys: 1_000,
    };
    let (execute, _calls) = echo_execute();
    let app = router(config, const_price_for(base_offer()), execute);

    let now = Utc::now().timestamp();
    let minted_k1 = mint(MintParams {
        payload: base_payload(now),
        private_key_pem: &k1.private_key_pem,
        public_key_pem: Some(&k1.public_key_pem),
        kid: None,
    })
    .unwrap();
    let minted_k2 = mint(MintParams {
        payload: base_payload(now),
        private_key_pem: &k2.private_key_pem,
        public_key_pem: Some(&k2.public_key_pem),
        kid: None,
    })
    .unwrap();

    // First request hits the live well-known endpoint (only K2 active):
    // K1-signed tokens are now unknown, K2-signed tokens are accepted.
    let rejected_k1 = app
        .clone()
        .oneshot(
            Request::builder()
                .method("GET")
                .uri("/tools/search")
                .header("host", "api.example.com")
                .header("authorization", format!("NooterraPay {}", minted_k1.token))
                .body(axum::body::Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(rejected_k1.status(), 402);
    let body = body_bytes(rejected_k1).await;
    let json: serde_json::Value = serde_json::from_slice(&body).unwrap();
    assert_eq!(json["code"], "NOOTERRA_PAY_UNKNOWN_KID");

    let accepted_k2 = app
        .clone()
        .oneshot(
            Request::builder()
                .method("GET")
                .uri("/tools/other")
                .header("host", "api.example.com")
                .header("authorization", format!("NooterraPay {}", minted_k2.token))
                .body(axum::body::Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(accepted_k2.status(), StatusCode::OK);
}

#[tokio::test]
async fn body_too_large_is_rejected_before_execute() {
    let service_key = generate_ed25519();
    let provider_key = generate_ed25519();
    let now = Utc::now().timestamp();

    let mut payload = base_payload(now);
    let oversized = vec![b'x'; 1_000_001];
    let binding =
        nooterra_pay_core::request_binding_sha256("POST", "api.example.com", "/actions/send", &oversized);
    payload.request_binding_mode = Some(nooterra_pay_core::RequestBindingMode::Strict);
    payload.request_binding_sha256 = Some(binding);

    let minted = mint(MintParams {
        payload,
        private_key_pem: &service_key.private_key_pem,
        public_key_pem: Some(&service_key.public_key_pem),
        kid: None,
    })
    .unwrap();

    let mut raw_offer = base_offer();
    raw_offer.request_binding_mode = Some(nooterra_pay_core::RequestBindingMode::Strict);

    let mut config = GateConfig {
        handler: handler_config(&provider_key),
        keyset_resolver: pinned_resolver_config(&service_key.public_key_pem),
        replay_max_keys: 1_000,
    };
    config.handler.max_request_body_bytes = 1_000_000;

    let (execute, calls) = echo_execute();
    let app = router(config, const_price_for(raw_offer), execute);

    let response = app
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/actions/send")
                .header("host", "api.example.com")
                .header("authorization", format!("NooterraPay {}", minted.token))
                .body(axum::body::Body::from(oversized))
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), 402);
    let body = body_bytes(response).await;
    let json: serde_json::Value = serde_json::from_slice(&body).unwrap();
    assert_eq!(json["code"], "NOOTERRA_PAY_REQUEST_BODY_TOO_LARGE");
    assert_eq!(calls.load(Ordering::SeqCst), 0, "execute must not run");
}
