//! Variation classification (spec.md §4.2).

use serde::{Deserialize, Serialize};

use crate::model::{CacheRequest, OriginResponse};

/// Classifies a response into one of three cacheability regimes.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CacheType {
    /// Not cacheable at all.
    None,
    /// Cacheable across all callers.
    Shared,
    /// Cacheable, but scoped to a single principal.
    Private,
}

/// A response's cacheability classification plus the normalized `Vary`
/// header names that must additionally be folded into its cache key.
///
/// Equality is structural, matching spec.md §3's requirement that
/// `Variation::from(response)` round-trips through equal values.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Variation {
    /// The cacheability classification.
    pub cache_type: CacheType,
    /// Lowercased `Vary` header names, byte-wise sorted.
    pub normalized_vary_headers: Vec<String>,
}

impl Variation {
    /// The neutral variation used to compute the entry key (K1): `Shared`
    /// with no vary headers.
    #[must_use]
    pub fn neutral() -> Self {
        Self { cache_type: CacheType::Shared, normalized_vary_headers: Vec::new() }
    }

    /// Classifies `response` (with its originating `request`) per spec.md
    /// §4.2's decision table.
    #[must_use]
    pub fn classify(request: &CacheRequest, response: &OriginResponse) -> Self {
        let is_get_head = request.method == http::Method::GET || request.method == http::Method::HEAD;
        if !is_get_head || !response.is_success() {
            return Self { cache_type: CacheType::None, normalized_vary_headers: Vec::new() };
        }
        if request.cache_control_has("no-store") || response.cache_control_has("no-store") {
            return Self { cache_type: CacheType::None, normalized_vary_headers: Vec::new() };
        }

        let cache_type = if response.cache_control_has("private") {
            CacheType::Private
        } else if request.header("authorization").is_some() && !response.cache_control_has("public") {
            CacheType::Private
        } else {
            CacheType::Shared
        };

        let mut vary = response.vary_header_names();
        vary.sort();

        Self { cache_type, normalized_vary_headers: vary }
    }
}
