//! nooterra-pay-gate: the HTTP-facing paid tool gate — keyset resolver,
//! replay store, and the paid request handler state machine that sits in
//! front of a provider's paid endpoints.
//!
//! This crate is the orchestrator; the pure data modelling and cryptography
//! (canonical JSON, Ed25519, token/quote/attestation codecs) live in
//! `nooterra-pay-core`.

pub mod axum_adapter;
pub mod config;
pub mod error;
pub mod handler;
pub mod replay;
pub mod resolver;

pub use config::GateConfig;
pub use error::{GateConfigError, HandlerError};
pub use handler::{
    BoxFuture, ExecuteFn, ExecuteInput, ExecuteResult, HandlerConfig, PaidRequestHandler,
    PriceForFn, RequestMeta,
};
pub use replay::{InMemoryReplayStore, ReplayRow, ReplayStore};
pub use resolver::{KeysetResolver, KeysetResolverConfig, KeysetSource, ResolverError};
