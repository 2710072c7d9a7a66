//! Key Computer (spec.md §4.1): maps `(request, variation)` to a stable key
//! string, or `None` when a required principal cannot be derived.

use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine as _};
use serde::Deserialize;

use crate::{
    model::CacheRequest,
    variation::{CacheType, Variation},
};

const RECORD_SEPARATOR: u8 = 0x1E;
const NUL: u8 = 0x00;

#[derive(Deserialize)]
struct JwtClaims {
    sub: Option<String>,
    client_id: Option<String>,
}

/// Attempts to decode `token`'s claims (no signature verification — the
/// principal is only used to partition the cache, never for authorization
/// decisions) and extract a stable principal string.
fn decode_jwt_claims(token: &str) -> Option<JwtClaims> {
    let mut parts = token.split('.');
    let _header = parts.next()?;
    let payload = parts.next()?;
    let _signature = parts.next()?;
    if parts.next().is_some() {
        return None; // not exactly 3 segments
    }
    let decoded = URL_SAFE_NO_PAD.decode(payload).ok()?;
    serde_json::from_slice(&decoded).ok()
}

/// Derives the principal token used in a `Private` cache key: the JWT `sub`
/// claim (prefixed `sub:`), the JWT `client_id` claim (prefixed `client_id:`)
/// as a fallback, or the raw `Authorization` header value if the bearer
/// token doesn't parse as a JWT and `require_jwt_token` is false.
///
/// Returns `None` if the header is absent, or if it fails to parse and
/// `require_jwt_token` is set.
fn derive_principal(request: &CacheRequest, require_jwt_token: bool) -> Option<String> {
    let auth = request.header("authorization")?;

    if let Some(token) = strip_bearer_prefix(auth) {
        if let Some(claims) = decode_jwt_claims(token) {
            if let Some(sub) = claims.sub {
                return Some(format!("sub:{sub}"));
            }
            if let Some(client_id) = claims.client_id {
                return Some(format!("client_id:{client_id}"));
            }
        }
        if require_jwt_token {
            return None;
        }
    } else if require_jwt_token {
        return None;
    }

    Some(auth.to_string())
}

fn strip_bearer_prefix(auth: &str) -> Option<&str> {
    const PREFIX: &str = "bearer ";
    if auth.len() < PREFIX.len() {
        return None;
    }
    let (head, tail) = auth.split_at(PREFIX.len());
    head.eq_ignore_ascii_case(PREFIX).then_some(tail)
}

/// Computes the cache key for `(request, variation)`, or `None` if
/// `variation.cache_type` is `Private` and no principal can be derived.
#[must_use]
pub fn compute_key(request: &CacheRequest, variation: &Variation, require_jwt_token: bool) -> Option<String> {
    let mut buf: Vec<u8> = Vec::new();

    buf.extend_from_slice(request.method.as_str().to_ascii_lowercase().as_bytes());
    push_rs(&mut buf);
    buf.extend_from_slice(request.url.scheme().to_ascii_lowercase().as_bytes());
    push_rs(&mut buf);
    buf.extend_from_slice(request.url.host_str().unwrap_or("").to_ascii_lowercase().as_bytes());
    push_rs(&mut buf);
    let port = request.url.port_or_known_default().unwrap_or(0);
    buf.extend_from_slice(port.to_string().as_bytes());
    push_rs(&mut buf);
    buf.extend_from_slice(path_and_query(request).as_bytes());
    push_rs(&mut buf);

    match variation.cache_type {
        CacheType::Private => {
            let principal = derive_principal(request, require_jwt_token)?;
            buf.extend_from_slice(principal.as_bytes());
        }
        CacheType::Shared | CacheType::None => buf.push(NUL),
    }

    for name in &variation.normalized_vary_headers {
        push_rs(&mut buf);
        buf.extend_from_slice(name.as_bytes());
        buf.push(b'=');
        let mut values = request.header_values(name).iter().map(|v| v.to_string()).collect::<Vec<_>>();
        if values.is_empty() {
            buf.push(NUL);
        } else {
            values.sort();
            buf.extend_from_slice(values.join(",").as_bytes());
        }
    }

    Some(String::from_utf8_lossy(&buf).into_owned())
}

fn push_rs(buf: &mut Vec<u8>) {
    buf.push(RECORD_SEPARATOR);
}

fn path_and_query(request: &CacheRequest) -> String {
    match request.url.query() {
        Some(q) => format!("{}?{}", request.url.path(), q),
        None => request.url.path().to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use http::{HeaderMap, HeaderValue, Method};
    use url::Url;

    fn req(url: &str, headers: &[(&str, &str)]) -> CacheRequest {
        let mut map = HeaderMap::new();
        for (k, v) in headers {
            map.append(http::header::HeaderName::from_bytes(k.as_bytes()).unwrap(), HeaderValue::from_str(v).unwrap());
        }
        CacheRequest { method: Method::GET, url: Url::parse(url).unwrap(), headers: map }
    }

    #[test]
    fn deterministic_for_same_inputs() {
        let r = req("https://example.com/x?y=1", &[]);
        let v = Variation::neutral();
        let k1 = compute_key(&r, &v, false);
        let k2 = compute_key(&r, &v, false);
        assert_eq!(k1, k2);
    }

    #[test]
    fn private_without_authorization_is_none() {
        let r = req("https://example.com/", &[]);
        let v = Variation { cache_type: CacheType::Private, normalized_vary_headers: vec![] };
        assert_eq!(compute_key(&r, &v, false), None);
    }

    #[test]
    fn private_same_sub_shares_partition() {
        // header.{"alg":"none"}.payload.{"sub":"u1"}.signature - base64url, unpadded
        let payload = URL_SAFE_NO_PAD.encode(br#"{"sub":"u1"}"#);
        let token1 = format!("Bearer eyJhbGciOiJub25lIn0.{payload}.sig1");
        let token2 = format!("Bearer eyJhbGciOiJub25lIn0.{payload}.sig2");
        let r1 = req("https://example.com/y", &[("authorization", &token1)]);
        let r2 = req("https://example.com/y", &[("authorization", &token2)]);
        let v = Variation { cache_type: CacheType::Private, normalized_vary_headers: vec![] };
        let k1 = compute_key(&r1, &v, false).unwrap();
        let k2 = compute_key(&r2, &v, false).unwrap();
        assert_eq!(k1, k2, "renewed tokens with the same sub share a partition");
    }

    #[test]
    fn private_different_sub_differs() {
        let payload_a = URL_SAFE_NO_PAD.encode(br#"{"sub":"u1"}"#);
        let payload_b = URL_SAFE_NO_PAD.encode(br#"{"sub":"u2"}"#);
        let token_a = format!("Bearer eyJhbGciOiJub25lIn0.{payload_a}.sig");
        let token_b = format!("Bearer eyJhbGciOiJub25lIn0.{payload_b}.sig");
        let ra = req("https://example.com/y", &[("authorization", &token_a)]);
        let rb = req("https://example.com/y", &[("authorization", &token_b)]);
        let v = Variation { cache_type: CacheType::Private, normalized_vary_headers: vec![] };
        assert_ne!(compute_key(&ra, &v, false), compute_key(&rb, &v, false));
    }

    #[test]
    fn require_jwt_token_rejects_unparseable_bearer() {
        let r = req("https://example.com/y", &[("authorization", "Bearer not-a-jwt")]);
        let v = Variation { cache_type: CacheType::Private, normalized_vary_headers: vec![] };
        assert_eq!(compute_key(&r, &v, true), None);
        assert!(compute_key(&r, &v, false).is_some());
    }

    #[test]
    fn vary_headers_fold_sorted_values_into_key() {
        let r1 = req("https://example.com/x", &[("accept-language", "en"), ("accept-language", "da")]);
        let r2 = req("https://example.com/x", &[("accept-language", "da"), ("accept-language", "en")]);
        let v = Variation { cache_type: CacheType::Shared, normalized_vary_headers: vec!["accept-language".into()] };
        assert_eq!(compute_key(&r1, &v, false), compute_key(&r2, &v, false));
    }
}
