//! Cache Middleware (spec.md §4.6): the request pipeline that decides
//! serve-from-cache vs. forward, sets conditional headers, handles 304, and
//! stores fresh responses.

use std::sync::Arc;

use async_trait::async_trait;
use http::{header, HeaderValue, Method};
use log::{debug, trace};

use crate::{
    error::Result,
    facade::Cache,
    model::{CacheRequest, OriginResponse},
    variation::{CacheType, Variation},
};

/// The key under which [`CacheMiddleware::send`] annotates its decision on
/// the forwarded request, mirroring spec.md §6's `"HttpClient.Cache.CacheType"`
/// request option.
pub const CACHE_TYPE_OPTION_KEY: &str = "HttpClient.Cache.CacheType";

/// The outer collaborator a [`CacheMiddleware`] forwards requests to — the
/// transport and downstream handler chain this layer sits in front of.
///
/// Deliberately minimal: only `send` is specified (spec.md §1 "out of
/// scope"); concrete adapters (a `reqwest`/`hyper` client, a test double)
/// live outside this crate.
#[async_trait]
pub trait HttpClient: Send + Sync + std::fmt::Debug {
    /// Forwards `request` to the origin and returns its response.
    async fn send(&self, request: &CacheRequest) -> Result<OriginResponse>;
}

/// The response a [`CacheMiddleware::send`] hands back to its caller, along
/// with the cache decision that produced it.
#[derive(Debug, Clone)]
pub struct MiddlewareResponse {
    /// The response body and headers to return to the original caller.
    pub response: OriginResponse,
    /// The cacheability classification recorded under [`CACHE_TYPE_OPTION_KEY`].
    pub cache_type: CacheType,
}

/// Sits between a caller and an [`HttpClient`], deciding whether to serve a
/// request from the [`Cache`], revalidate, or forward it untouched.
#[derive(Debug, Clone)]
pub struct CacheMiddleware {
    cache: Arc<Cache>,
    inner: Arc<dyn HttpClient>,
}

impl CacheMiddleware {
    /// Wraps `inner`, routing cacheable requests through `cache` first.
    #[must_use]
    pub fn new(cache: Arc<Cache>, inner: Arc<dyn HttpClient>) -> Self {
        Self { cache, inner }
    }

    /// Runs the request pipeline described in spec.md §4.6.
    pub async fn send(&self, mut request: CacheRequest) -> Result<MiddlewareResponse> {
        let bypass = !is_cacheable_method(&request.method) || request.cache_control_has("no-cache");

        let mut hit = None;
        if !bypass {
            hit = self.cache.get_with_variation(&request).await?;
            if let Some((cached, variation)) = &hit {
                if cached.entry.must_revalidate() {
                    set_conditional_headers(&mut request, cached.entry.etag(), cached.entry.last_modified())?;
                } else if !cached.entry.cache_control_has("no-cache") {
                    self.cache.refresh_response(&request, variation).await?;
                    debug!("file-http-cache: serving warm hit, cache_type={:?}", variation.cache_type);
                    return Ok(MiddlewareResponse { response: cached.to_origin_response()?, cache_type: variation.cache_type });
                }
            }
        }

        let origin = self.inner.send(&request).await?;

        if let Some((cached, variation)) = &hit {
            if origin.status == 304 {
                self.cache.refresh_response_not_modified(&request, variation, &origin).await?;
                debug!("file-http-cache: 304 revalidated, cache_type={:?}", variation.cache_type);
                return Ok(MiddlewareResponse { response: cached.to_origin_response()?, cache_type: variation.cache_type });
            }
            trace!("file-http-cache: origin returned a fresh body, discarding stale cache hit");
        }

        match self.cache.set_response(&request, &origin).await? {
            Some(cached) => {
                let variation = Variation::classify(&request, &origin);
                Ok(MiddlewareResponse { response: cached.to_origin_response()?, cache_type: variation.cache_type })
            }
            None => Ok(MiddlewareResponse { response: origin, cache_type: CacheType::None }),
        }
    }
}

fn is_cacheable_method(method: &Method) -> bool {
    *method == Method::GET || *method == Method::HEAD
}

fn set_conditional_headers(request: &mut CacheRequest, etag: Option<&str>, last_modified: Option<&str>) -> Result<()> {
    if let Some(etag) = etag {
        request.headers.insert(header::IF_NONE_MATCH, HeaderValue::from_str(etag)?);
    } else if let Some(last_modified) = last_modified {
        request.headers.insert(header::IF_MODIFIED_SINCE, HeaderValue::from_str(last_modified)?);
    }
    Ok(())
}
