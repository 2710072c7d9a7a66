//! End-to-end pipeline scenarios driven through [`CacheMiddleware`] against a
//! scripted origin.

use std::{collections::VecDeque, sync::Arc, time::Duration};

use async_trait::async_trait;
use http::{HeaderMap, HeaderValue, Method};
use tokio::sync::Mutex;
use url::Url;

use crate::{
    Cache, CacheConfig, CacheMiddleware, CacheRequest, CacheType, HttpClient, HttpVersion, OriginResponse, Result, TestClock,
};

#[derive(Debug, Default)]
struct ScriptedOrigin {
    responses: Mutex<VecDeque<OriginResponse>>,
    requests: Mutex<Vec<CacheRequest>>,
}

impl ScriptedOrigin {
    fn new(responses: Vec<OriginResponse>) -> Self {
        Self { responses: Mutex::new(responses.into()), requests: Mutex::new(Vec::new()) }
    }

    async fn call_count(&self) -> usize {
        self.requests.lock().await.len()
    }

    async fn last_request(&self) -> CacheRequest {
        self.requests.lock().await.last().cloned().expect("origin was called")
    }
}

#[async_trait]
impl HttpClient for ScriptedOrigin {
    async fn send(&self, request: &CacheRequest) -> Result<OriginResponse> {
        self.requests.lock().await.push(request.clone());
        Ok(self.responses.lock().await.pop_front().expect("no scripted response left"))
    }
}

fn req(url: &str, headers: &[(&str, &str)]) -> CacheRequest {
    let mut map = HeaderMap::new();
    for (k, v) in headers {
        map.append(http::header::HeaderName::from_bytes(k.as_bytes()).unwrap(), HeaderValue::from_str(v).unwrap());
    }
    CacheRequest { method: Method::GET, url: Url::parse(url).unwrap(), headers: map }
}

fn resp(status: u16, headers: &[(&str, &str)], body: &[u8]) -> OriginResponse {
    let mut map = HeaderMap::new();
    for (k, v) in headers {
        map.append(http::header::HeaderName::from_bytes(k.as_bytes()).unwrap(), HeaderValue::from_str(v).unwrap());
    }
    OriginResponse { status, reason_phrase: None, version: HttpVersion::Http11, headers: map, body: body.to_vec() }
}

async fn harness(responses: Vec<OriginResponse>) -> (CacheMiddleware, Arc<ScriptedOrigin>, tempfile::TempDir) {
    let dir = tempfile::tempdir().unwrap();
    let config = CacheConfig::default().with_root(dir.path());
    let cache = Arc::new(Cache::open(config, Arc::new(TestClock::new())).await.unwrap());
    let origin = Arc::new(ScriptedOrigin::new(responses));
    let middleware = CacheMiddleware::new(cache, origin.clone());
    (middleware, origin, dir)
}

#[tokio::test]
async fn shared_warm_hit() {
    let (mw, origin, _dir) = harness(vec![resp(200, &[("cache-control", "max-age=60")], b"hello")]).await;

    let first = mw.send(req("https://example.com/", &[])).await.unwrap();
    assert_eq!(first.response.body, b"hello");

    let second = mw.send(req("https://example.com/", &[])).await.unwrap();
    assert_eq!(second.response.body, b"hello");
    assert_eq!(second.cache_type, CacheType::Shared);
    assert_eq!(origin.call_count().await, 1, "second request must be served from cache");
}

#[tokio::test]
async fn vary_split() {
    let responses = vec![
        resp(200, &[("cache-control", "max-age=60"), ("vary", "Accept-Language")], b"Hej"),
        resp(200, &[("cache-control", "max-age=60"), ("vary", "Accept-Language")], b"Hello"),
    ];
    let (mw, origin, _dir) = harness(responses).await;

    let da = mw.send(req("https://example.com/x", &[("accept-language", "da")])).await.unwrap();
    assert_eq!(da.response.body, b"Hej");
    let en = mw.send(req("https://example.com/x", &[("accept-language", "en")])).await.unwrap();
    assert_eq!(en.response.body, b"Hello");
    assert_eq!(origin.call_count().await, 2);

    let da_again = mw.send(req("https://example.com/x", &[("accept-language", "da")])).await.unwrap();
    assert_eq!(da_again.response.body, b"Hej");
    assert_eq!(da_again.cache_type, CacheType::Shared);
    let en_again = mw.send(req("https://example.com/x", &[("accept-language", "en")])).await.unwrap();
    assert_eq!(en_again.response.body, b"Hello");
    assert_eq!(origin.call_count().await, 2, "both variants must now be served from cache");
}

#[tokio::test]
async fn private_scoping() {
    // header `{"alg":"none"}`, payloads `{"sub":"u1"}` / `{"sub":"u2"}`, base64url-unpadded.
    let header = "eyJhbGciOiJub25lIn0";
    let sub_u1 = "eyJzdWIiOiJ1MSJ9";
    let sub_u2 = "eyJzdWIiOiJ1MiJ9";
    let token_u1_a = format!("Bearer {header}.{sub_u1}.sig1");
    let token_u1_b = format!("Bearer {header}.{sub_u1}.sig2");
    let token_u2 = format!("Bearer {header}.{sub_u2}.sig1");

    let responses = vec![resp(200, &[("cache-control", "max-age=60")], b"secret"), resp(200, &[("cache-control", "max-age=60")], b"other-secret")];
    let (mw, origin, _dir) = harness(responses).await;

    let first = mw.send(req("https://example.com/y", &[("authorization", &token_u1_a)])).await.unwrap();
    assert_eq!(first.cache_type, CacheType::Private);

    let renewed = mw.send(req("https://example.com/y", &[("authorization", &token_u1_b)])).await.unwrap();
    assert_eq!(renewed.response.body, b"secret", "renewed token with the same sub shares the cache entry");
    assert_eq!(origin.call_count().await, 1);

    let other_user = mw.send(req("https://example.com/y", &[("authorization", &token_u2)])).await.unwrap();
    assert_eq!(other_user.response.body, b"other-secret");
    assert_eq!(origin.call_count().await, 2, "a different sub must not share the partition");
}

#[tokio::test]
async fn must_revalidate_304() {
    let responses = vec![resp(200, &[("cache-control", "must-revalidate"), ("etag", "\"v1\"")], b"body-v1"), resp(304, &[], b"")];
    let (mw, origin, _dir) = harness(responses).await;

    let first = mw.send(req("https://example.com/z", &[])).await.unwrap();
    assert_eq!(first.response.body, b"body-v1");

    let second = mw.send(req("https://example.com/z", &[])).await.unwrap();
    assert_eq!(second.response.body, b"body-v1");
    assert_eq!(second.cache_type, CacheType::Shared);
    assert_eq!(origin.call_count().await, 2, "must-revalidate always forwards");

    let sent = origin.last_request().await;
    assert_eq!(sent.header("if-none-match"), Some("\"v1\""));
}

#[tokio::test]
async fn expiration() {
    let dir = tempfile::tempdir().unwrap();
    let config = CacheConfig::default().with_root(dir.path());
    let clock = TestClock::new();
    let cache = Arc::new(Cache::open(config, Arc::new(clock.clone())).await.unwrap());
    let origin = Arc::new(ScriptedOrigin::new(vec![
        resp(200, &[("cache-control", "max-age=10")], b"fresh"),
        resp(200, &[("cache-control", "max-age=10")], b"fresh-again"),
    ]));
    let mw = CacheMiddleware::new(cache, origin.clone());

    let first = mw.send(req("https://example.com/w", &[])).await.unwrap();
    assert_eq!(first.response.body, b"fresh");

    clock.advance(Duration::from_secs(8));
    let still_hit = mw.send(req("https://example.com/w", &[])).await.unwrap();
    assert_eq!(still_hit.response.body, b"fresh");
    assert_eq!(origin.call_count().await, 1);

    clock.advance(Duration::from_secs(10));
    let miss = mw.send(req("https://example.com/w", &[])).await.unwrap();
    assert_eq!(miss.response.body, b"fresh-again");
    assert_eq!(origin.call_count().await, 2, "expired entry must be re-fetched");
}

#[tokio::test]
async fn no_cache_request_bypass() {
    let responses = vec![resp(200, &[("cache-control", "max-age=60")], b"one"), resp(200, &[("cache-control", "max-age=60")], b"two")];
    let (mw, origin, _dir) = harness(responses).await;

    let bypassed = mw.send(req("https://example.com/q", &[("cache-control", "no-cache")])).await.unwrap();
    assert_eq!(bypassed.response.body, b"one");
    assert_eq!(origin.call_count().await, 1);

    let plain = mw.send(req("https://example.com/q", &[])).await.unwrap();
    assert_eq!(plain.response.body, b"two", "no-cache bypass must not read the store, but it may still write it");
    assert_eq!(origin.call_count().await, 2);

    let cached = mw.send(req("https://example.com/q", &[])).await.unwrap();
    assert_eq!(cached.response.body, b"two");
    assert_eq!(origin.call_count().await, 2, "the freshly stored response now serves unqualified requests");
}
