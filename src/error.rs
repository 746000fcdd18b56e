use bytes::Bytes;
use http::{header, HeaderValue, StatusCode};
use http_body_util::Full;

use crate::store::StoreError;
use crate::Response;

pub type BoxError = Box<dyn core::error::Error + Send + Sync>;

/// Request-level failures, one variant per user-visible rejection.
///
/// Everything here renders as the JSON error envelope; [`Error::NotFound`] is
/// the single case where browser clients get an HTML page instead (handled at
/// the retrieval layer).
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("invalid slug")]
    InvalidSlug,

    #[error("slug already taken")]
    SlugTaken,

    #[error("X-TTL must be between 1h and 7d")]
    TtlOutOfRange,

    #[error("empty content")]
    EmptyContent,

    #[error("invalid base64 payload")]
    BadBase64,

    #[error("invalid multipart payload: {0}")]
    BadMultipart(String),

    #[error("failed to read request body")]
    BodyRead,

    #[error("request body exceeds the configured limit")]
    PayloadTooLarge,

    #[error("missing or invalid API key")]
    Unauthorized,

    #[error("not found")]
    NotFound,

    #[error("size_mismatch: stored content length disagrees with metadata")]
    SizeMismatch,

    #[error("could not allocate a free slug")]
    SlugSpaceExhausted,

    #[error("storage error: {0}")]
    Store(#[from] StoreError),
}

impl Error {
    pub fn status(&self) -> StatusCode {
        match self {
            Error::InvalidSlug
            | Error::SlugTaken
            | Error::TtlOutOfRange
            | Error::EmptyContent
            | Error::BadBase64
            | Error::BadMultipart(_)
            | Error::BodyRead => StatusCode::BAD_REQUEST,
            Error::PayloadTooLarge => StatusCode::PAYLOAD_TOO_LARGE,
            Error::Unauthorized => StatusCode::UNAUTHORIZED,
            Error::NotFound => StatusCode::NOT_FOUND,
            Error::SizeMismatch | Error::SlugSpaceExhausted | Error::Store(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }

    /// Render as the uniform JSON envelope: `{"error": "<message>"}`.
    pub fn into_response(self) -> Response {
        envelope(self.status(), &self.to_string())
    }
}

pub(crate) fn envelope(status: StatusCode, message: &str) -> Response {
    let body = match serde_json::to_vec(&serde_json::json!({ "error": message })) {
        Ok(v) => v,
        // serializing a string map cannot fail; keep the envelope shape anyway
        Err(_) => format!("{{\"error\":{message:?}}}").into_bytes(),
    };

    let mut resp = http::Response::new(Full::new(Bytes::from(body)));
    *resp.status_mut() = status;
    resp.headers_mut().insert(
        header::CONTENT_TYPE,
        HeaderValue::from_static("application/json; charset=utf-8"),
    );
    resp
}
