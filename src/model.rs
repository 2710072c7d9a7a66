//! Request/response representations shared by the key computer, variation
//! classifier, and on-disk store (spec.md §3).

use std::convert::TryFrom;

use http::{HeaderMap, HeaderValue, Method};
use serde::{Deserialize, Serialize};
use time::{format_description::FormatItem, macros::format_description, OffsetDateTime};
use url::Url;

use crate::error::{CacheError, Result};

/// `Sun, 06 Nov 1994 08:49:37 GMT` — the `Last-Modified`/`Date` wire format
/// (RFC 7231 `IMF-fixdate`).
const HTTP_DATE_FORMAT: &[FormatItem<'static>] =
    format_description!("[weekday repr:short], [day] [month repr:short] [year] [hour]:[minute]:[second] GMT");

/// Parses a `Last-Modified`-style header value into a UTC instant.
#[must_use]
pub fn parse_http_date(value: &str) -> Option<OffsetDateTime> {
    time::PrimitiveDateTime::parse(value, HTTP_DATE_FORMAT).ok().map(time::PrimitiveDateTime::assume_utc)
}

/// Represents an HTTP version, stable across serialization formats.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[non_exhaustive]
pub enum HttpVersion {
    /// HTTP/0.9
    #[serde(rename = "HTTP/0.9")]
    Http09,
    /// HTTP/1.0
    #[serde(rename = "HTTP/1.0")]
    Http10,
    /// HTTP/1.1
    #[serde(rename = "HTTP/1.1")]
    Http11,
    /// HTTP/2.0
    #[serde(rename = "HTTP/2.0")]
    H2,
    /// HTTP/3.0
    #[serde(rename = "HTTP/3.0")]
    H3,
}

impl TryFrom<http::Version> for HttpVersion {
    type Error = CacheError;

    fn try_from(value: http::Version) -> Result<Self> {
        Ok(match value {
            http::Version::HTTP_09 => Self::Http09,
            http::Version::HTTP_10 => Self::Http10,
            http::Version::HTTP_11 => Self::Http11,
            http::Version::HTTP_2 => Self::H2,
            http::Version::HTTP_3 => Self::H3,
            _ => Self::Http11,
        })
    }
}

impl From<HttpVersion> for http::Version {
    fn from(value: HttpVersion) -> Self {
        match value {
            HttpVersion::Http09 => Self::HTTP_09,
            HttpVersion::Http10 => Self::HTTP_10,
            HttpVersion::Http11 => Self::HTTP_11,
            HttpVersion::H2 => Self::HTTP_2,
            HttpVersion::H3 => Self::HTTP_3,
        }
    }
}

/// An ordered, multi-valued header list that preserves insertion order.
///
/// Serializes as a list of `{key, value}` objects (`value` itself a list),
/// matching spec.md §6's on-disk field description rather than a `HashMap`,
/// since ordering of duplicate header names is part of the persisted record.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct HeaderList(pub Vec<HeaderEntry>);

/// One `(name, values)` entry in a [`HeaderList`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HeaderEntry {
    /// Lowercased header name.
    pub key: String,
    /// All values observed for this header name, in order.
    pub value: Vec<String>,
}

impl HeaderList {
    /// An empty header list.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a value for `name`, creating the entry if absent.
    pub fn append(&mut self, name: &str, value: String) {
        let key = name.to_ascii_lowercase();
        if let Some(entry) = self.0.iter_mut().find(|e| e.key == key) {
            entry.value.push(value);
        } else {
            self.0.push(HeaderEntry { key, value: vec![value] });
        }
    }

    /// Returns the first value stored for `name`, if any.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<&str> {
        let key = name.to_ascii_lowercase();
        self.0.iter().find(|e| e.key == key).and_then(|e| e.value.first()).map(String::as_str)
    }

    /// Returns all values stored for `name`.
    #[must_use]
    pub fn get_all(&self, name: &str) -> Vec<&str> {
        let key = name.to_ascii_lowercase();
        self.0
            .iter()
            .find(|e| e.key == key)
            .map(|e| e.value.iter().map(String::as_str).collect())
            .unwrap_or_default()
    }

    /// True if a value is stored for `name`.
    #[must_use]
    pub fn contains(&self, name: &str) -> bool {
        self.get(name).is_some()
    }

    /// Builds a [`HeaderList`] from an [`http::HeaderMap`], preserving the
    /// order each value appears in, keyed by lowercase name.
    #[must_use]
    pub fn from_header_map(headers: &HeaderMap) -> Self {
        let mut list = Self::new();
        for (name, value) in headers.iter() {
            if let Ok(v) = value.to_str() {
                list.append(name.as_str(), v.to_string());
            }
        }
        list
    }

    /// Converts back into an [`http::HeaderMap`].
    pub fn to_header_map(&self) -> Result<HeaderMap> {
        let mut map = HeaderMap::new();
        for entry in &self.0 {
            let name = http::header::HeaderName::from_bytes(entry.key.as_bytes())?;
            for v in &entry.value {
                map.append(name.clone(), HeaderValue::from_str(v)?);
            }
        }
        Ok(map)
    }
}

/// An outbound request as seen by the key computer and variation classifier.
#[derive(Debug, Clone)]
pub struct CacheRequest {
    /// Request method; only GET/HEAD ever become cacheable.
    pub method: Method,
    /// Fully resolved request URL (scheme, host, port, path, query).
    pub url: Url,
    /// Request headers.
    pub headers: HeaderMap,
}

impl CacheRequest {
    /// Returns the first value of `name`, if present.
    #[must_use]
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).and_then(|v| v.to_str().ok())
    }

    /// Returns every value of `name`, in order.
    #[must_use]
    pub fn header_values(&self, name: &str) -> Vec<&str> {
        self.headers.get_all(name).iter().filter_map(|v| v.to_str().ok()).collect()
    }

    /// True if `Cache-Control` on the request contains `directive`.
    #[must_use]
    pub fn cache_control_has(&self, directive: &str) -> bool {
        cache_control_contains(self.header("cache-control"), directive)
    }
}

/// A fresh response from the origin, as seen by the variation classifier and
/// facade before it is persisted.
#[derive(Debug, Clone)]
pub struct OriginResponse {
    /// Status code.
    pub status: u16,
    /// Reason phrase, if the transport supplied one.
    pub reason_phrase: Option<String>,
    /// HTTP version.
    pub version: HttpVersion,
    /// Response headers (as distinct from "content" headers — see
    /// [`ResponseEntry`] for the split used in the persisted record).
    pub headers: HeaderMap,
    /// Response body.
    pub body: Vec<u8>,
}

impl OriginResponse {
    /// True if `status` is a 2xx success code.
    #[must_use]
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    /// True if `Cache-Control` on the response contains `directive`.
    #[must_use]
    pub fn cache_control_has(&self, directive: &str) -> bool {
        cache_control_contains(self.headers.get("cache-control").and_then(|v| v.to_str().ok()), directive)
    }

    /// Returns every `Vary` header value, split on commas, trimmed.
    #[must_use]
    pub fn vary_header_names(&self) -> Vec<String> {
        self.headers
            .get_all("vary")
            .iter()
            .filter_map(|v| v.to_str().ok())
            .flat_map(|v| v.split(','))
            .map(|s| s.trim().to_ascii_lowercase())
            .filter(|s| !s.is_empty())
            .collect()
    }
}

/// `true` if `header_value`'s comma-separated directives contain `directive`
/// (case-insensitively, ignoring any `=value` suffix on each directive).
pub(crate) fn cache_control_contains(header_value: Option<&str>, directive: &str) -> bool {
    let Some(value) = header_value else { return false };
    value.split(',').any(|part| {
        part.trim().split('=').next().unwrap_or("").eq_ignore_ascii_case(directive)
    })
}

/// A persisted response, minus its body (stored separately as a sibling
/// `.response.bin` file — spec.md §3 `ResponseEntry`).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResponseEntry {
    /// The request URL this response was stored for.
    pub url: Url,
    /// HTTP version.
    #[serde(rename = "version")]
    pub http_version: HttpVersion,
    /// Status code.
    pub status_code: u16,
    /// Reason phrase.
    pub reason_phrase: String,
    /// Response headers (general headers, e.g. `Cache-Control`, `Vary`, `Date`).
    pub response_headers: HeaderList,
    /// Content headers (e.g. `Content-Type`, `Content-Length`, `ETag`, `Last-Modified`).
    pub content_headers: HeaderList,
    /// Trailing headers.
    #[serde(default)]
    pub trailing_headers: HeaderList,
}

/// Headers that classify as "content headers" under spec.md §6's metadata
/// split, rather than general response headers.
const CONTENT_HEADER_NAMES: &[&str] = &[
    "content-type",
    "content-length",
    "content-encoding",
    "content-language",
    "content-location",
    "content-range",
    "etag",
    "last-modified",
    "expires",
];

impl ResponseEntry {
    /// Splits an [`OriginResponse`]'s headers into response/content headers
    /// and builds the persisted record (body handled separately by the
    /// caller — see [`crate::store::FileStore::publish_response`]).
    #[must_use]
    pub fn from_origin(url: Url, origin: &OriginResponse) -> Self {
        let mut response_headers = HeaderList::new();
        let mut content_headers = HeaderList::new();
        for (name, value) in origin.headers.iter() {
            if let Ok(v) = value.to_str() {
                if CONTENT_HEADER_NAMES.contains(&name.as_str()) {
                    content_headers.append(name.as_str(), v.to_string());
                } else {
                    response_headers.append(name.as_str(), v.to_string());
                }
            }
        }
        Self {
            url,
            http_version: origin.version,
            status_code: origin.status,
            reason_phrase: origin.reason_phrase.clone().unwrap_or_default(),
            response_headers,
            content_headers,
            trailing_headers: HeaderList::new(),
        }
    }

    /// Returns the first value among response or content headers for `name`.
    #[must_use]
    pub fn header(&self, name: &str) -> Option<&str> {
        self.response_headers.get(name).or_else(|| self.content_headers.get(name))
    }

    /// True if `Cache-Control` contains `directive`.
    #[must_use]
    pub fn cache_control_has(&self, directive: &str) -> bool {
        cache_control_contains(self.header("cache-control"), directive)
    }

    /// True if `Cache-Control: must-revalidate` is present.
    #[must_use]
    pub fn must_revalidate(&self) -> bool {
        self.cache_control_has("must-revalidate")
    }

    /// `max-age` seconds, parsed from `Cache-Control`, if present and valid.
    #[must_use]
    pub fn max_age(&self) -> Option<u64> {
        let cc = self.header("cache-control")?;
        cc.split(',').find_map(|part| {
            let mut kv = part.trim().splitn(2, '=');
            let key = kv.next()?.trim();
            if !key.eq_ignore_ascii_case("max-age") {
                return None;
            }
            kv.next()?.trim().parse::<u64>().ok()
        })
    }

    /// The `ETag` header value, if present.
    #[must_use]
    pub fn etag(&self) -> Option<&str> {
        self.content_headers.get("etag")
    }

    /// The `Last-Modified` header value, if present.
    #[must_use]
    pub fn last_modified(&self) -> Option<&str> {
        self.content_headers.get("last-modified")
    }
}

/// A persisted response together with its body, as handed back by the
/// [`crate::store::FileStore`] and [`crate::facade::Cache`].
#[derive(Debug, Clone)]
pub struct CachedResponse {
    /// The persisted metadata record.
    pub entry: ResponseEntry,
    /// The response body.
    pub body: Vec<u8>,
}

impl CachedResponse {
    /// Reassembles the three header lists into an [`OriginResponse`] the
    /// caller can hand back as if it had just arrived from the origin.
    pub fn to_origin_response(&self) -> Result<OriginResponse> {
        let mut headers = HeaderMap::new();
        for list in [&self.entry.response_headers, &self.entry.content_headers, &self.entry.trailing_headers] {
            for entry in &list.0 {
                let name = http::header::HeaderName::from_bytes(entry.key.as_bytes())?;
                for v in &entry.value {
                    headers.append(name.clone(), HeaderValue::from_str(v)?);
                }
            }
        }
        Ok(OriginResponse {
            status: self.entry.status_code,
            reason_phrase: Some(self.entry.reason_phrase.clone()),
            version: self.entry.http_version,
            headers,
            body: self.body.clone(),
        })
    }
}
