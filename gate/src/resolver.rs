//! Keyset resolver: well-known fetch with Cache-Control, pinned-key
//! override/fallback, and a single-flight TTL cache (spec §4.5).

use std::time::Duration;

use nooterra_pay_core::Keyset;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum KeysetSource {
    None,
    WellKnown,
    PinnedOnly,
    PinnedFallback,
}

#[derive(Debug, Clone)]
pub struct KeysetResolverConfig {
    pub keyset_url: String,
    pub pinned_public_key_pem: Option<String>,
    pub pinned_key_id: Option<String>,
    pub pinned_only: bool,
    pub default_max_age_ms: i64,
    pub fetch_timeout_ms: u64,
    pub pinned_max_age_ms: i64,
}

#[derive(Debug, Error)]
pub enum ResolverError {
    #[error("keyset fetch failed: {0}")]
    FetchFailed(String),
    #[error("keyset response is not a valid NooterraPayKeyset.v1: {0}")]
    InvalidKeyset(String),
    #[error("pinnedOnly requires pinnedPublicKeyPem")]
    NoPinnedKey,
}

struct CacheEntry {
    keyset: Keyset,
    expires_at_ms: i64,
    source: KeysetSource,
}

/// TTL-cached, single-flight-coalesced keyset source. One resolver instance
/// is shared across all requests to a given handler.
pub struct KeysetResolver {
    client: reqwest::Client,
    config: KeysetResolverConfig,
    cache: RwLock<Option<CacheEntry>>,
    /// Serializes cache-miss fetches into one in-flight request at a time —
    /// the one-slot "leader" pattern spec §9 recommends.
    fetch_lock: Mutex<()>,
}

impl KeysetResolver {
    pub fn new(config: KeysetResolverConfig) -> Self {
        KeysetResolver {
            client: reqwest::Client::new(),
            config,
            cache: RwLock::new(None),
            fetch_lock: Mutex::new(()),
        }
    }

    pub async fn get_keyset(&self, now_ms: i64) -> Result<(Keyset, KeysetSource), ResolverError> {
        if let Some(entry) = self.cache.read().await.as_ref() {
            if entry.expires_at_ms > now_ms {
                return Ok((entry.keyset.clone(), entry.source));
            }
        }

        if self.config.pinned_only {
            return self.use_pinned_only(now_ms).await;
        }

        let _leader = self.fetch_lock.lock().await;

        // Re-check: another task may have refreshed the cache while we
        // waited for the fetch lock.
        if let Some(entry) = self.cache.read().await.as_ref() {
            if entry.expires_at_ms > now_ms {
                return Ok((entry.keyset.clone(), entry.source));
            }
        }

        match self.fetch_remote().await {
            Ok((keyset, max_age_ms)) => {
                let entry = CacheEntry {
                    keyset: keyset.clone(),
                    expires_at_ms: now_ms + max_age_ms,
                    source: KeysetSource::WellKnown,
                };
                *self.cache.write().await = Some(entry);
                Ok((keyset, KeysetSource::WellKnown))
            }
            Err(e) => {
                warn!(error = %e, "keyset fetch failed, checking pinned fallback");
                if let Some(pem) = &self.config.pinned_public_key_pem {
                    let keyset = pinned_keyset(pem, self.config.pinned_key_id.clone())?;
                    let entry = CacheEntry {
                        keyset: keyset.clone(),
                        expires_at_ms: now_ms + self.config.pinned_max_age_ms,
                        source: KeysetSource::PinnedFallback,
                    };
                    *self.cache.write().await = Some(entry);
                    Ok((keyset, KeysetSource::PinnedFallback))
                } else {
                    Err(e)
                }
            }
        }
    }

    async fn use_pinned_only(&self, now_ms: i64) -> Result<(Keyset, KeysetSource), ResolverError> {
        let pem = self
            .config
            .pinned_public_key_pem
            .as_ref()
            .ok_or(ResolverError::NoPinnedKey)?;
        let keyset = pinned_keyset(pem, self.config.pinned_key_id.clone())?;
        let entry = CacheEntry {
            keyset: keyset.clone(),
            expires_at_ms: now_ms + self.config.pinned_max_age_ms,
            source: KeysetSource::PinnedOnly,
        };
        *self.cache.write().await = Some(entry);
        Ok((keyset, KeysetSource::PinnedOnly))
    }

    async fn fetch_remote(&self) -> Result<(Keyset, i64), ResolverError> {
        let response = self
            .client
            .get(&self.config.keyset_url)
            .timeout(Duration::from_millis(self.config.fetch_timeout_ms))
            .send()
            .await
            .map_err(|e| ResolverError::FetchFailed(e.to_string()))?;

        if !response.status().is_success() {
            return Err(ResolverError::FetchFailed(format!(
                "unexpected status {}",
                response.status()
            )));
        }

        let max_age_ms = response
            .headers()
            .get(reqwest::header::CACHE_CONTROL)
            .and_then(|v| v.to_str().ok())
            .and_then(parse_max_age_ms)
            .unwrap_or(self.config.default_max_age_ms);

        let keyset: Keyset = response
            .json()
            .await
            .map_err(|e| ResolverError::InvalidKeyset(e.to_string()))?;
        keyset
            .validate()
            .map_err(|e| ResolverError::InvalidKeyset(e.to_string()))?;

        debug!(max_age_ms, "refreshed keyset from well-known endpoint");
        Ok((keyset, max_age_ms))
    }

    /// Zero the cache so the next `get_keyset` call re-fetches.
    pub async fn clear_cache(&self) {
        *self.cache.write().await = None;
    }
}

fn pinned_keyset(pem: &str, key_id: Option<String>) -> Result<Keyset, ResolverError> {
    let key_id = match key_id {
        Some(id) => id,
        None => nooterra_pay_core::key_id_from_public_key_pem(pem)
            .map_err(|e| ResolverError::InvalidKeyset(e.to_string()))?,
    };
    Ok(Keyset::single_active(
        key_id,
        pem.to_string(),
        "pinned".to_string(),
    ))
}

fn parse_max_age_ms(cache_control: &str) -> Option<i64> {
    cache_control.split(',').find_map(|directive| {
        let directive = directive.trim();
        let rest = directive.strip_prefix("max-age=")?;
        rest.parse::<i64>().ok().map(|secs| secs * 1000)
    })
}
