//! Auth preload cache (§4.D): LRU+TTL cache of resolved credentials with
//! background refresh-ahead and cooldown-aware profile failover.

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Arc;

use chrono::Utc;
use tokio::sync::Mutex;

use crate::domain::error::AuthCacheError;
use crate::domain::models::{normalize, AuthCacheEntry, AuthCacheKey, Credential};
use crate::domain::ports::{AuthResolver, ProfileStore};

/// Arguments to [`AuthCache::preload`].
pub struct PreloadRequest<'a> {
    pub provider: &'a str,
    pub profile_id: Option<&'a str>,
    pub force: bool,
}

#[derive(Debug, Clone, Default)]
pub struct AuthCacheStats {
    pub size: usize,
    pub max_size: usize,
    pub in_flight_refreshes: usize,
}

/// The auth preload cache. Constructed behind an `Arc` so background
/// refresh tasks spawned by `preload` can hold a reference past the call
/// that triggered them.
pub struct AuthCache<R, P> {
    resolver: R,
    profiles: P,
    ttl_ms: u64,
    refresh_ahead_ms: u64,
    max_size: usize,
    entries: Mutex<HashMap<AuthCacheKey, AuthCacheEntry>>,
    lru: Mutex<VecDeque<AuthCacheKey>>,
    in_flight_refresh: Mutex<HashSet<AuthCacheKey>>,
}

impl<R, P> AuthCache<R, P>
where
    R: AuthResolver + 'static,
    P: ProfileStore + 'static,
{
    #[must_use]
    pub fn new(resolver: R, profiles: P, ttl_ms: u64, refresh_ahead_ms: u64, max_size: usize) -> Arc<Self> {
        Arc::new(Self {
            resolver,
            profiles,
            ttl_ms,
            refresh_ahead_ms,
            max_size: max_size.max(1),
            entries: Mutex::new(HashMap::new()),
            lru: Mutex::new(VecDeque::new()),
            in_flight_refresh: Mutex::new(HashSet::new()),
        })
    }

    /// Resolve a credential for `(provider, profileId?)`, serving a fresh
    /// cached entry when possible (§4.D).
    #[tracing::instrument(skip(self), fields(provider = %normalize(req.provider)))]
    pub async fn preload(self: &Arc<Self>, req: PreloadRequest<'_>) -> Result<Credential, AuthCacheError> {
        let key = AuthCacheKey::new(req.provider, req.profile_id.map(str::to_string));
        let now = Utc::now();

        if !req.force {
            let hit = {
                let entries = self.entries.lock().await;
                entries.get(&key).filter(|entry| entry.is_fresh(now)).cloned()
            };
            if let Some(entry) = hit {
                self.touch(&key).await;
                if entry.in_refresh_window(now, self.refresh_ahead_ms) {
                    self.clone().maybe_spawn_refresh(key);
                }
                return Ok(entry.credential);
            }
        }

        self.resolve_and_store(key, now).await
    }

    /// Resolve many `(provider, profileId?)` pairs concurrently.
    pub async fn preload_batch(
        self: &Arc<Self>,
        requests: Vec<(String, Option<String>)>,
    ) -> HashMap<AuthCacheKey, Result<Credential, AuthCacheError>> {
        let futures = requests.into_iter().map(|(provider, profile_id)| {
            let this = self.clone();
            async move {
                let key = AuthCacheKey::new(&provider, profile_id.clone());
                let req = PreloadRequest {
                    provider: &provider,
                    profile_id: profile_id.as_deref(),
                    force: false,
                };
                (key, this.preload(req).await)
            }
        });
        futures::future::join_all(futures).await.into_iter().collect()
    }

    /// Batch-preload every `(provider, profileId?)` pair; per-provider
    /// failures are swallowed (§4.D "Cache warming").
    pub async fn warm_cache(self: &Arc<Self>, keys: Vec<AuthCacheKey>) {
        let futures = keys.into_iter().map(|key| {
            let this = self.clone();
            async move {
                let req = PreloadRequest {
                    provider: &key.provider,
                    profile_id: key.profile_id.as_deref(),
                    force: false,
                };
                if let Err(err) = this.preload(req).await {
                    tracing::warn!(%key, error = %err, "cache warm preload failed");
                }
            }
        });
        futures::future::join_all(futures).await;
    }

    /// Try profiles in preferred-then-configured order, skipping cooldowns,
    /// falling back to the default (no-profile) credential (§4.D).
    #[tracing::instrument(skip(self))]
    pub async fn find_available(
        self: &Arc<Self>,
        provider: &str,
        preferred_profile: Option<&str>,
    ) -> Result<Credential, AuthCacheError> {
        let now = Utc::now();
        let mut profiles = self.profiles.profiles_for(provider).await;
        if let Some(pref) = preferred_profile {
            if let Some(pos) = profiles.iter().position(|p| p.profile_id.as_deref() == Some(pref)) {
                let chosen = profiles.remove(pos);
                profiles.insert(0, chosen);
            }
        }

        let mut last_error = "no profiles configured".to_string();
        for profile in &profiles {
            if profile.in_cooldown(now) {
                continue;
            }
            let req = PreloadRequest {
                provider,
                profile_id: profile.profile_id.as_deref(),
                force: false,
            };
            match self.preload(req).await {
                Ok(credential) => return Ok(credential),
                Err(err) => last_error = err.to_string(),
            }
        }

        let req = PreloadRequest { provider, profile_id: None, force: false };
        self.preload(req).await.map_err(|err| {
            last_error = err.to_string();
            AuthCacheError::ProfilesExhausted {
                provider: provider.to_string(),
                last_error,
            }
        })
    }

    /// Force the next call for this key to re-resolve (§4.D, on 401).
    pub async fn invalidate(&self, provider: &str, profile_id: Option<&str>) {
        let key = AuthCacheKey::new(provider, profile_id.map(str::to_string));
        self.entries.lock().await.remove(&key);
        self.lru.lock().await.retain(|k| k != &key);
    }

    pub async fn clear(&self) {
        self.entries.lock().await.clear();
        self.lru.lock().await.clear();
    }

    pub async fn stats(&self) -> AuthCacheStats {
        AuthCacheStats {
            size: self.entries.lock().await.len(),
            max_size: self.max_size,
            in_flight_refreshes: self.in_flight_refresh.lock().await.len(),
        }
    }

    async fn resolve_and_store(
        &self,
        key: AuthCacheKey,
        now: chrono::DateTime<Utc>,
    ) -> Result<Credential, AuthCacheError> {
        let credential = self.resolver.resolve(&key.provider, key.profile_id.as_deref()).await?;
        let entry = AuthCacheEntry::new(credential.clone(), now, self.ttl_ms);
        self.insert(key, entry).await;
        Ok(credential)
    }

    async fn insert(&self, key: AuthCacheKey, entry: AuthCacheEntry) {
        let mut entries = self.entries.lock().await;
        let mut lru = self.lru.lock().await;

        if entries.contains_key(&key) {
            lru.retain(|k| k != &key);
        } else {
            while entries.len() >= self.max_size {
                let Some(oldest) = lru.pop_front() else { break };
                entries.remove(&oldest);
            }
        }

        lru.push_back(key.clone());
        entries.insert(key, entry);
    }

    async fn touch(&self, key: &AuthCacheKey) {
        let mut lru = self.lru.lock().await;
        lru.retain(|k| k != key);
        lru.push_back(key.clone());
    }

    /// Spawn at most one background refresh per key, guarded by
    /// `in_flight_refresh`. A failed refresh is logged and leaves the
    /// still-valid current entry untouched (§4.D "Concurrency").
    fn maybe_spawn_refresh(self: Arc<Self>, key: AuthCacheKey) {
        tokio::spawn(async move {
            {
                let mut in_flight = self.in_flight_refresh.lock().await;
                if !in_flight.insert(key.clone()) {
                    return;
                }
            }

            let now = Utc::now();
            if let Err(err) = self.resolve_and_store(key.clone(), now).await {
                tracing::warn!(%key, error = %err, "background auth refresh failed");
            }

            self.in_flight_refresh.lock().await.remove(&key);
        });
    }
}
