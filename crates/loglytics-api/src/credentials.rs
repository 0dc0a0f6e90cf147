//! Credential store (C1): tenant API key issuance, verification, revocation.
//!
//! Keys are opaque, high-entropy tokens. Only a bcrypt digest of each key is
//! ever persisted; the plaintext is returned once, at creation time, and
//! never again. Verification is cached in-process so that steady-state
//! ingest traffic does not pay a bcrypt hash on every request.

use std::sync::Arc;
use std::time::{Duration, Instant};

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use dashmap::DashMap;
use lru::LruCache;
use parking_lot::Mutex;
use rand::rngs::OsRng;
use rand::RngCore;
use std::num::NonZeroUsize;
use tracing::{info, warn};

use loglytics_core::{CoreError, Tenant, TenantStatus};
use loglytics_storage::IngestBackend;

use crate::config::CredentialConfig;
use crate::error::{ApiError, ApiResult};

/// Prefix every issued key carries, so callers and logs can recognize a
/// loglytics key without decoding it.
pub const KEY_PREFIX: &str = "lgai_lk_";

/// Bytes of entropy packed into each key before base64 encoding.
const KEY_ENTROPY_BYTES: usize = 32;

/// Generate a new opaque API key: `lgai_lk_` followed by a URL-safe base64
/// encoding of 256 bits of OS randomness.
fn generate_api_key() -> String {
    let mut bytes = [0u8; KEY_ENTROPY_BYTES];
    OsRng.fill_bytes(&mut bytes);
    format!("{KEY_PREFIX}{}", URL_SAFE_NO_PAD.encode(bytes))
}

/// The first few characters of a key, stored alongside its hash so the store
/// can show tenants "which key" without ever retaining the plaintext.
fn key_prefix_for_display(key: &str) -> String {
    key.chars().take(KEY_PREFIX.len() + 8).collect()
}

#[derive(Clone)]
struct CachedCredential {
    key_hash: String,
    status: TenantStatus,
}

/// Result of successfully issuing a tenant and its first API key.
pub struct IssuedCredential {
    pub tenant: Tenant,
    pub plaintext_key: String,
}

/// Owns the verify cache and failure-rate tracking for tenant credentials.
///
/// Hashing and persistence are delegated to the `IngestBackend`; this type
/// adds the in-process caching and abuse controls layered on top.
pub struct CredentialStore {
    config: CredentialConfig,
    verify_cache: Mutex<LruCache<String, CachedCredential>>,
    verify_failures: DashMap<String, FailureWindow>,
}

struct FailureWindow {
    count: u32,
    window_start: Instant,
}

impl CredentialStore {
    pub fn new(config: CredentialConfig) -> Self {
        let capacity = NonZeroUsize::new(config.verify_cache_capacity.max(1)).unwrap();
        Self {
            config,
            verify_cache: Mutex::new(LruCache::new(capacity)),
            verify_failures: DashMap::new(),
        }
    }

    /// Issue a new tenant and its first (and only) API key.
    ///
    /// `owner_user_id` + `name` must be unique; the backend enforces this at
    /// the storage layer and surfaces it as [`CoreError::Conflict`].
    pub async fn issue(
        &self,
        backend: &dyn IngestBackend,
        owner_user_id: &str,
        name: &str,
        platform_tag: &str,
    ) -> ApiResult<IssuedCredential> {
        let plaintext_key = generate_api_key();
        let key_hash = hash_key(&plaintext_key, self.config.kdf_cost)?;
        let prefix = key_prefix_for_display(&plaintext_key);
        let now = chrono::Utc::now();

        let tenant = Tenant {
            tenant_id: uuid::Uuid::new_v4().to_string(),
            owner_user_id: owner_user_id.to_string(),
            name: name.to_string(),
            platform_tag: platform_tag.to_string(),
            api_key_hash: key_hash,
            api_key_prefix: prefix,
            created_at: now,
            last_seen_at: now,
            total_received: 0,
            status: TenantStatus::Active,
        };

        backend.create_tenant(&tenant).await.map_err(ApiError::from)?;

        info!(tenant_id = %tenant.tenant_id, "issued new tenant credential");
        Ok(IssuedCredential {
            tenant,
            plaintext_key,
        })
    }

    /// Verify a presented API key against a claimed tenant id.
    ///
    /// On success, returns the tenant. On failure, counts towards the
    /// per-tenant verify-failure rate limit (spec: reuses C4's admission
    /// limiter, keyed `credverify:{tenant_id}`).
    pub async fn verify(
        &self,
        backend: &dyn IngestBackend,
        tenant_id: &str,
        presented_key: &str,
    ) -> ApiResult<Tenant> {
        if self.is_rate_limited(tenant_id) {
            return Err(ApiError::RateLimited {
                retry_after_secs: self.config.verify_failure_window.as_secs(),
            });
        }

        let cached = self.verify_cache.lock().get(tenant_id).cloned();
        if let Some(cached) = cached {
            if cached.status != TenantStatus::Active {
                self.record_failure(tenant_id);
                return Err(ApiError::Forbidden("tenant is not active".into()));
            }
            if bcrypt::verify(presented_key, &cached.key_hash).unwrap_or(false) {
                return self.load_tenant(backend, tenant_id).await;
            }
            self.record_failure(tenant_id);
            return Err(ApiError::Unauthorized);
        }

        let tenant = match backend.find_tenant(tenant_id).await {
            Ok(Some(tenant)) => tenant,
            Ok(None) => return Err(ApiError::Unauthorized),
            Err(err) => return Err(ApiError::from(err)),
        };

        if tenant.status != TenantStatus::Active {
            self.record_failure(tenant_id);
            return Err(ApiError::Forbidden("tenant is not active".into()));
        }

        let matches = bcrypt::verify(presented_key, &tenant.api_key_hash).unwrap_or(false);
        self.verify_cache.lock().put(
            tenant_id.to_string(),
            CachedCredential {
                key_hash: tenant.api_key_hash.clone(),
                status: tenant.status,
            },
        );

        if !matches {
            self.record_failure(tenant_id);
            return Err(ApiError::Unauthorized);
        }

        Ok(tenant)
    }

    /// Revoke a tenant's credential, invalidating the verify cache entry so
    /// the next request is forced to re-check storage.
    pub async fn revoke(&self, backend: &dyn IngestBackend, tenant_id: &str) -> ApiResult<()> {
        backend.revoke_tenant(tenant_id).await.map_err(|err| {
            if matches!(err, CoreError::TenantNotFound(_)) {
                ApiError::NotFound(format!("tenant '{tenant_id}' not found"))
            } else {
                ApiError::from(err)
            }
        })?;
        self.verify_cache.lock().pop(tenant_id);
        warn!(tenant_id = %tenant_id, "revoked tenant credential");
        Ok(())
    }

    async fn load_tenant(&self, backend: &dyn IngestBackend, tenant_id: &str) -> ApiResult<Tenant> {
        backend
            .find_tenant(tenant_id)
            .await
            .map_err(ApiError::from)?
            .ok_or(ApiError::Unauthorized)
    }

    fn is_rate_limited(&self, tenant_id: &str) -> bool {
        if let Some(window) = self.verify_failures.get(tenant_id) {
            window.count >= self.config.max_verify_failures
                && window.window_start.elapsed() < self.config.verify_failure_window
        } else {
            false
        }
    }

    fn record_failure(&self, tenant_id: &str) {
        let mut entry = self
            .verify_failures
            .entry(tenant_id.to_string())
            .or_insert_with(|| FailureWindow {
                count: 0,
                window_start: Instant::now(),
            });
        if entry.window_start.elapsed() >= self.config.verify_failure_window {
            entry.count = 0;
            entry.window_start = Instant::now();
        }
        entry.count += 1;
    }
}

fn hash_key(plaintext: &str, cost: u32) -> ApiResult<String> {
    bcrypt::hash(plaintext, cost)
        .map_err(|e| ApiError::Internal(format!("failed to hash credential: {e}")))
}

pub type SharedCredentialStore = Arc<CredentialStore>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn generated_keys_carry_prefix_and_entropy() {
        let key = generate_api_key();
        assert!(key.starts_with(KEY_PREFIX));
        assert!(key.len() > KEY_PREFIX.len() + 30);
    }

    #[test]
    fn hash_and_verify_roundtrip() {
        let hash = hash_key("lgai_lk_abc123", 4).unwrap();
        assert!(bcrypt::verify("lgai_lk_abc123", &hash).unwrap());
        assert!(!bcrypt::verify("lgai_lk_wrong", &hash).unwrap());
    }

    #[test]
    fn display_prefix_never_exposes_full_key() {
        let key = generate_api_key();
        let prefix = key_prefix_for_display(&key);
        assert!(prefix.len() < key.len());
        assert_ne!(prefix, key);
    }

    #[tokio::test]
    async fn rate_limiting_trips_after_repeated_failures() {
        let store = CredentialStore::new(CredentialConfig {
            max_verify_failures: 2,
            verify_failure_window: Duration::from_secs(60),
            ..CredentialConfig::default()
        });
        store.record_failure("tenant-a");
        assert!(!store.is_rate_limited("tenant-a"));
        store.record_failure("tenant-a");
        assert!(store.is_rate_limited("tenant-a"));
    }
}
