//! A toy paid tool mounted behind the gate: `GET /tools/echo?text=...`
//! charges 5 cents per call and echoes the query text back. Run with:
//!
//!   NOOTERRA_PROVIDER_ID=prov_demo \
//!   NOOTERRA_PROVIDER_PRIVATE_KEY_PEM="$(cat provider.key.pem)" \
//!   NOOTERRA_PROVIDER_PUBLIC_KEY_PEM="$(cat provider.pub.pem)" \
//!   NOOTERRA_KEYSET_URL=https://issuer.example.com/.well-known/nooterra-pay-keyset \
//!   cargo run -p nooterra-pay-gate --example echo_tool
//!
//! Environment variables are read only here, at the process boundary —
//! the library crates never touch `std::env`.

use std::env;
use std::net::SocketAddr;
use std::sync::Arc;

use axum::routing::any;
use axum::Router;
use bytes::Bytes;
use nooterra_pay_core::{generate_ed25519, RawOffer};
use nooterra_pay_gate::{
    ExecuteFn, ExecuteResult, GateConfig, HandlerConfig, KeysetResolverConfig, PriceForFn,
};
use tracing::info;
use tracing_subscriber::EnvFilter;

fn env_or(key: &str, default: &str) -> String {
    env::var(key).unwrap_or_else(|_| default.to_string())
}

fn env_i64(key: &str, default: i64) -> i64 {
    env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

fn price_for_echo() -> PriceForFn {
    Box::new(|_meta| {
        Box::pin(async move {
            Ok(RawOffer {
                amount_cents: 5,
                currency: "USD".into(),
                provider_id: env_or("NOOTERRA_PROVIDER_ID", "prov_demo"),
                tool_id: "demo:echo".into(),
                address: "nooterra:demo-provider".into(),
                network: "nooterra".into(),
                idempotency: None,
                request_binding_mode: None,
                quote_required: false,
                quote_id: None,
                spend_authorization_mode: None,
            })
        })
    })
}

fn execute_echo() -> ExecuteFn {
    Box::new(|input| {
        Box::pin(async move {
            let text = input
                .meta
                .uri
                .query()
                .and_then(|q| {
                    q.split('&')
                        .find_map(|pair| pair.strip_prefix("text="))
                })
                .unwrap_or("");
            let body = serde_json::json!({ "echo": text });
            Ok(ExecuteResult {
                status: 200,
                headers: vec![],
                content_type: Some("application/json".into()),
                body: Bytes::from(serde_json::to_vec(&body).unwrap()),
            })
        })
    })
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive("info".parse().unwrap()))
        .init();

    let provider_private_key_pem = match env::var("NOOTERRA_PROVIDER_PRIVATE_KEY_PEM") {
        Ok(pem) => pem,
        Err(_) => {
            info!("NOOTERRA_PROVIDER_PRIVATE_KEY_PEM unset; generating an ephemeral demo keypair");
            let kp = generate_ed25519();
            info!(public_key_pem = %kp.public_key_pem, "ephemeral provider public key (not persisted)");
            kp.private_key_pem
        }
    };
    let provider_public_key_pem = env::var("NOOTERRA_PROVIDER_PUBLIC_KEY_PEM").expect(
        "NOOTERRA_PROVIDER_PUBLIC_KEY_PEM must be set alongside NOOTERRA_PROVIDER_PRIVATE_KEY_PEM",
    );

    let config = GateConfig {
        handler: HandlerConfig {
            provider_id: env_or("NOOTERRA_PROVIDER_ID", "prov_demo"),
            provider_public_key_pem,
            provider_private_key_pem,
            replay_ttl_buffer_ms: env_i64("NOOTERRA_REPLAY_TTL_BUFFER_MS", 5 * 60 * 1000),
            quote_ttl_seconds: env_i64("NOOTERRA_QUOTE_TTL_SECONDS", 120),
            max_request_body_bytes: env_i64("NOOTERRA_MAX_REQUEST_BODY_BYTES", 1_000_000) as usize,
        },
        keyset_resolver: KeysetResolverConfig {
            keyset_url: env_or(
                "NOOTERRA_KEYSET_URL",
                "https://issuer.invalid/.well-known/nooterra-pay-keyset",
            ),
            pinned_public_key_pem: env::var("NOOTERRA_PINNED_PUBLIC_KEY_PEM").ok(),
            pinned_key_id: env::var("NOOTERRA_PINNED_KEY_ID").ok(),
            pinned_only: env::var("NOOTERRA_PINNED_ONLY").is_ok(),
            default_max_age_ms: env_i64("NOOTERRA_DEFAULT_MAX_AGE_MS", 5 * 60 * 1000),
            fetch_timeout_ms: env_i64("NOOTERRA_FETCH_TIMEOUT_MS", 2_000) as u64,
            pinned_max_age_ms: env_i64("NOOTERRA_PINNED_MAX_AGE_MS", 60 * 60 * 1000),
        },
        replay_max_keys: env_i64("NOOTERRA_REPLAY_MAX_KEYS", 100_000) as usize,
    };

    let handler = Arc::new(
        config
            .build(price_for_echo(), execute_echo())
            .expect("invalid gate configuration"),
    );

    let app = Router::new()
        .route("/tools/echo", any(nooterra_pay_gate::axum_adapter::paid_tool_handler))
        .with_state(handler);

    let addr: SocketAddr = format!("{}:{}", env_or("HOST", "0.0.0.0"), env_or("PORT", "8080"))
        .parse()
        .expect("invalid HOST/PORT");
    info!("nooterra pay echo demo listening on http://{addr}");

    let listener = tokio::net::TcpListener::bind(addr).await.unwrap();
    axum::serve(listener, app).await.unwrap();
}
