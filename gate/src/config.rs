//! Gate-level configuration: explicit struct construction only — no env
//! coupling here (spec §6). The example binary under `gate/examples/` is
//! the one place environment variables get read.

use std::sync::Arc;

use crate::error::GateConfigError;
use crate::handler::{ExecuteFn, HandlerConfig, PaidRequestHandler, PriceForFn};
use crate::replay::{InMemoryReplayStore, ReplayStore};
use crate::resolver::{KeysetResolver, KeysetResolverConfig};

/// Everything needed to construct a `PaidRequestHandler`, mirroring the
/// option table in spec §6.
pub struct GateConfig {
    pub handler: HandlerConfig,
    pub keyset_resolver: KeysetResolverConfig,
    pub replay_max_keys: usize,
}

impl GateConfig {
    /// Validate the construction-time invariants (class-1 errors, spec §7):
    /// the provider key PEMs must be well-formed and `providerId` must be
    /// id-shaped.
    pub fn validate(&self) -> Result<(), GateConfigError> {
        if !nooterra_pay_core::is_valid_id(&self.handler.provider_id) {
            return Err(GateConfigError::type_invalid(
                "providerId",
                "must match ^[A-Za-z0-9:_-]+$ and be at most 200 characters",
            ));
        }
        nooterra_pay_core::key_id_from_public_key_pem(&self.handler.provider_public_key_pem)
            .map_err(|e| GateConfigError::type_invalid("providerPublicKeyPem", e.to_string()))?;
        if self.keyset_resolver.pinned_only && self.keyset_resolver.pinned_public_key_pem.is_none()
        {
            return Err(GateConfigError::type_invalid(
                "keysetResolver.pinnedPublicKeyPem",
                "required when pinnedOnly is set",
            ));
        }
        Ok(())
    }

    /// Build the handler with its own freshly constructed resolver and
    /// in-memory replay store.
    pub fn build(self, price_for: PriceForFn, execute: ExecuteFn) -> Result<PaidRequestHandler, GateConfigError> {
        self.validate()?;
        let resolver = Arc::new(KeysetResolver::new(self.keyset_resolver));
        let replay_store: Arc<dyn ReplayStore> =
            Arc::new(InMemoryReplayStore::new(self.replay_max_keys));
        Ok(PaidRequestHandler::new(
            self.handler,
            resolver,
            replay_store,
            price_for,
            execute,
        ))
    }
}
