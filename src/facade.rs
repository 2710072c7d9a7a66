//! Cache Facade (spec.md §4.5): the public cache operations, composing the
//! key computer, variation classifier, and file store into the two-level
//! lookup/publish protocol.

use std::sync::Arc;

use time::OffsetDateTime;

use crate::{
    clock::Clock,
    config::CacheConfig,
    error::{CacheError, Result},
    key,
    model::{CacheRequest, CachedResponse, OriginResponse, ResponseEntry},
    store::{FileStore, LookupHit},
    variation::Variation,
};

/// Composes the key computer, variation classifier, and [`FileStore`] into
/// the public get/set/refresh operations a [`crate::middleware::CacheMiddleware`]
/// drives.
#[derive(Debug, Clone)]
pub struct Cache {
    store: FileStore,
    clock: Arc<dyn Clock>,
    config: CacheConfig,
}

impl Cache {
    /// Opens (creating if needed) the cache rooted at `config.root`, and
    /// spawns a background task that calls [`Cache::purge`] every
    /// `config.purge_interval` (spec.md §5 "a periodic timer schedules
    /// `purge()` every 5 minutes").
    pub async fn open(config: CacheConfig, clock: Arc<dyn Clock>) -> Result<Self> {
        let store = FileStore::open(config.root.clone()).await?;
        let cache = Self { store, clock, config };
        cache.spawn_purge_task();
        Ok(cache)
    }

    fn spawn_purge_task(&self) {
        let store = self.store.clone();
        let max_entries = self.config.max_entries;
        let purge_interval = self.config.purge_interval;
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(purge_interval);
            ticker.tick().await; // first tick fires immediately; skip it, entries were just opened
            loop {
                ticker.tick().await;
                if let Err(err) = store.purge(max_entries).await {
                    log::warn!("file-http-cache: scheduled purge failed: {err}");
                }
            }
        });
    }

    fn now(&self) -> OffsetDateTime {
        to_offset_date_time(self.clock.now())
    }

    /// `getResponseWithVariation` (spec.md §4.5): resolves the two-level
    /// lookup, returning the hit response together with the variation it was
    /// stored under.
    pub async fn get_with_variation(&self, request: &CacheRequest) -> Result<Option<(CachedResponse, Variation)>> {
        let neutral = Variation::neutral();
        let Some(k1) = key::compute_key(request, &neutral, self.config.require_jwt_token) else {
            return Ok(None);
        };

        let now = self.now();
        match self.store.lookup(&k1, now).await? {
            Some(LookupHit::Response(cached)) => Ok(Some((cached, neutral))),
            Some(LookupHit::Variation(variation)) => {
                self.store.touch_access(&k1).await?;
                let Some(k2) = key::compute_key(request, &variation, self.config.require_jwt_token) else {
                    return Ok(None);
                };
                match self.store.lookup(&k2, now).await? {
                    Some(LookupHit::Response(cached)) => Ok(Some((cached, variation))),
                    _ => Ok(None),
                }
            }
            None => Ok(None),
        }
    }

    /// `setResponse` (spec.md §4.5): stores `origin` if it is cacheable,
    /// returning the stored response, or `None` if it isn't.
    pub async fn set_response(&self, request: &CacheRequest, origin: &OriginResponse) -> Result<Option<CachedResponse>> {
        let variation = Variation::classify(request, origin);
        if variation.cache_type == crate::variation::CacheType::None {
            return Ok(None);
        }

        let neutral = Variation::neutral();
        let Some(k1) = key::compute_key(request, &neutral, self.config.require_jwt_token) else {
            return Ok(None);
        };

        let expiration = self.initial_expiration(origin);
        let entry = ResponseEntry::from_origin(request.url.clone(), origin);
        let modified_utc = entry.last_modified().and_then(crate::model::parse_http_date).unwrap_or_else(|| self.now());

        if variation.cache_type == crate::variation::CacheType::Shared && variation.normalized_vary_headers.is_empty() {
            self.store.publish_response(&k1, &entry, &origin.body, modified_utc, expiration).await?;
            return Ok(Some(CachedResponse { entry, body: origin.body.clone() }));
        }

        let Some(k2) = key::compute_key(request, &variation, self.config.require_jwt_token) else {
            return Ok(None);
        };
        self.store.publish_response(&k2, &entry, &origin.body, modified_utc, expiration).await?;
        self.store.publish_variation(&k1, &variation, modified_utc, expiration).await?;
        Ok(Some(CachedResponse { entry, body: origin.body.clone() }))
    }

    /// `refreshResponse(cached)`: refreshes the entry-key file and, if
    /// `variation` is non-neutral, the underlying response file it points at.
    pub async fn refresh_response(&self, request: &CacheRequest, variation: &Variation) -> Result<()> {
        let expiration = self.now() + self.config.default_refresh_expiration;
        self.refresh_by_variation(request, variation, expiration).await
    }

    /// `refreshResponse(cached, notModified304)`: same as
    /// [`Cache::refresh_response`], but the new expiration is derived from
    /// `not_modified`'s `max-age`. Fails with [`CacheError::InvalidArgument`]
    /// if `not_modified.status` isn't 304.
    pub async fn refresh_response_not_modified(
        &self,
        request: &CacheRequest,
        variation: &Variation,
        not_modified: &OriginResponse,
    ) -> Result<()> {
        if not_modified.status != 304 {
            return Err(CacheError::InvalidArgument);
        }
        let expiration = match parse_max_age(not_modified) {
            Some(secs) => self.now() + std::time::Duration::from_secs(secs),
            None => self.now() + self.config.default_refresh_expiration,
        };
        self.refresh_by_variation(request, variation, expiration).await
    }

    async fn refresh_by_variation(&self, request: &CacheRequest, variation: &Variation, expiration: OffsetDateTime) -> Result<()> {
        let neutral = Variation::neutral();
        let Some(k1) = key::compute_key(request, &neutral, self.config.require_jwt_token) else {
            return Ok(());
        };
        self.store.refresh(&k1, expiration).await?;

        if variation.cache_type != neutral.cache_type || !variation.normalized_vary_headers.is_empty() {
            if let Some(k2) = key::compute_key(request, variation, self.config.require_jwt_token) {
                self.store.refresh(&k2, expiration).await?;
            }
        }
        Ok(())
    }

    fn initial_expiration(&self, origin: &OriginResponse) -> OffsetDateTime {
        let now = self.now();
        match parse_max_age(origin) {
            Some(secs) => now + std::time::Duration::from_secs(secs),
            None => now + self.config.default_initial_expiration,
        }
    }

    /// Runs capacity eviction, temp cleanup, and orphan sweep immediately.
    pub async fn purge(&self) -> Result<()> {
        self.store.purge(self.config.max_entries).await
    }

    /// Deletes every cache entry.
    pub async fn clear(&self) -> Result<()> {
        self.store.clear().await
    }
}

fn parse_max_age(origin: &OriginResponse) -> Option<u64> {
    let cc = origin.headers.get("cache-control")?.to_str().ok()?;
    cc.split(',').find_map(|part| {
        let mut kv = part.trim().splitn(2, '=');
        let key = kv.next()?.trim();
        if !key.eq_ignore_ascii_case("max-age") {
            return None;
        }
        kv.next()?.trim().parse::<u64>().ok()
    })
}

fn to_offset_date_time(t: std::time::SystemTime) -> OffsetDateTime {
    let secs = crate::clock::to_unix_secs(t);
    OffsetDateTime::from_unix_timestamp(secs as i64).unwrap_or(OffsetDateTime::UNIX_EPOCH)
}
