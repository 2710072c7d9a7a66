#![warn(missing_docs, rust_2018_idioms)]
#![cfg_attr(docsrs, feature(doc_cfg))]

//! An RFC 7234-oriented HTTP response cache backed by a two-level on-disk
//! store: a key and variation algebra over `(method, scheme, host, port,
//! path, query, principal, Vary)`, atomic metadata/body publication with
//! expiration encoded in file times, and a middleware pipeline that decides
//! serve-from-cache, conditional revalidation, and write-back.
//!
//! # Example
//!
//! ```rust
//! use file_http_cache::{Cache, CacheConfig, SystemClock};
//! use std::sync::Arc;
//!
//! # async fn run() -> file_http_cache::Result<()> {
//! let dir = tempfile::tempdir().unwrap();
//! let config = CacheConfig::default().with_root(dir.path());
//! let cache = Cache::open(config, Arc::new(SystemClock)).await?;
//! cache.purge().await?;
//! # Ok(())
//! # }
//! ```

mod clock;
mod config;
mod error;
mod facade;
mod filename;
mod key;
mod middleware;
mod model;
mod store;
#[cfg(test)]
mod test;
mod variation;

pub use clock::{Clock, SystemClock, TestClock};
pub use config::{CacheConfig, DEFAULT_INITIAL_EXPIRATION, DEFAULT_MAX_ENTRIES, DEFAULT_REFRESH_EXPIRATION};
pub use error::{CacheError, Result};
pub use facade::Cache;
pub use key::compute_key;
pub use middleware::{CacheMiddleware, HttpClient, MiddlewareResponse, CACHE_TYPE_OPTION_KEY};
pub use model::{CacheRequest, CachedResponse, HeaderEntry, HeaderList, HttpVersion, OriginResponse, ResponseEntry};
pub use store::{FileStore, LookupHit};
pub use variation::{CacheType, Variation};
