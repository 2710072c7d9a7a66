use miette::Diagnostic;
use thiserror::Error;

/// A `Result` typedef to use with the [`CacheError`] type.
pub type Result<T> = std::result::Result<T, CacheError>;

/// Errors that can surface from the cache engine.
///
/// Most of the failure modes spec.md §7 describes are *not* represented
/// here: `KeyUnavailable`, `Expired`, `PublishRace`, `OrphanDetected` and
/// `CorruptFilename` are policy decisions (miss, skip, swallow, log-and-skip)
/// rather than raised errors, and are handled inline where they occur.
#[derive(Error, Diagnostic, Debug)]
pub enum CacheError {
    /// `refresh_response(cached, not_modified)` was called with a response
    /// whose status code was not 304.
    #[error("refreshResponse with a 304 requires a response whose status code is 304")]
    #[diagnostic(code(file_http_cache::invalid_argument))]
    InvalidArgument,
    /// Error from the filesystem.
    #[error(transparent)]
    #[diagnostic(code(file_http_cache::io))]
    Io(#[from] std::io::Error),
    /// Error (de)serializing metadata or variation JSON.
    #[error(transparent)]
    #[diagnostic(code(file_http_cache::json))]
    Json(#[from] serde_json::Error),
    /// Error parsing the request/response URL.
    #[error(transparent)]
    #[diagnostic(code(file_http_cache::invalid_url))]
    InvalidUrl(#[from] url::ParseError),
    /// Error parsing an HTTP header value.
    #[error(transparent)]
    #[diagnostic(code(file_http_cache::invalid_header_value))]
    InvalidHeaderValue(#[from] http::header::InvalidHeaderValue),
    /// Error parsing an HTTP header name.
    #[error(transparent)]
    #[diagnostic(code(file_http_cache::invalid_header_name))]
    InvalidHeaderName(#[from] http::header::InvalidHeaderName),
    /// Error converting a header value to a string.
    #[error(transparent)]
    #[diagnostic(code(file_http_cache::header_to_str))]
    HeaderToStr(#[from] http::header::ToStrError),
    /// Error building an `http::Response`/`http::Request`.
    #[error(transparent)]
    #[diagnostic(code(file_http_cache::http))]
    Http(#[from] http::Error),
    /// Error reading or setting a file's access/modified time.
    #[error(transparent)]
    #[diagnostic(code(file_http_cache::system_time))]
    SystemTime(#[from] std::time::SystemTimeError),
}
