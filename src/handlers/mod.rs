use std::sync::Arc;

use bytes::Bytes;
use http::{header, HeaderMap, HeaderValue, StatusCode};
use http_body_util::Full;
use serde::Serialize;

use crate::config::Config;
use crate::service::PasteService;
use crate::Response;

pub mod retrieve;
pub mod ui;
pub mod upload;

#[derive(Clone)]
pub struct AppState {
    pub service: Arc<PasteService>,
    pub config: Arc<Config>,
}

/// Proxy headers whose value `https` marks the original wire scheme.
const PROTO_HEADERS: &[&str] = &[
    "x-forwarded-proto",
    "x-forwarded-protocol",
    "x-forwarded-scheme",
    "x-scheme",
    "cloudfront-forwarded-proto",
];

/// Proxy headers whose value `on` marks a TLS frontend.
const SSL_HEADERS: &[&str] = &["x-forwarded-ssl", "x-forwarded-https"];

/// Scheme of the original request as seen by the client, reconstructed from
/// edge-proxy headers. The returned URL must paste back, so direct-TLS
/// detection alone would not be enough.
pub fn request_scheme(headers: &HeaderMap) -> &'static str {
    for name in PROTO_HEADERS {
        if let Some(value) = headers.get(*name).and_then(|v| v.to_str().ok()) {
            if first_token(value).eq_ignore_ascii_case("https") {
                return "https";
            }
        }
    }

    for name in SSL_HEADERS {
        if let Some(value) = headers.get(*name).and_then(|v| v.to_str().ok()) {
            if first_token(value).eq_ignore_ascii_case("on") {
                return "https";
            }
        }
    }

    "http"
}

fn first_token(value: &str) -> &str {
    value.split(',').next().unwrap_or("").trim()
}

/// Authority for URL composition: the `Host` header is what the client
/// addressed, so it wins over the request target.
pub fn request_host(parts: &http::request::Parts) -> Option<String> {
    if let Some(host) = parts.headers.get(header::HOST).and_then(|v| v.to_str().ok()) {
        if !host.is_empty() {
            return Some(host.to_owned());
        }
    }

    parts.uri.authority().map(|authority| authority.to_string())
}

pub fn base_url(parts: &http::request::Parts) -> String {
    let host = request_host(parts).unwrap_or_else(|| "localhost".to_owned());
    format!("{}://{host}", request_scheme(&parts.headers))
}

/// `curl`, `wget` and `powershell` get plain text instead of HTML/JSON.
pub fn is_cli_client(headers: &HeaderMap) -> bool {
    headers
        .get(header::USER_AGENT)
        .and_then(|v| v.to_str().ok())
        .is_some_and(|ua| {
            let ua = ua.to_ascii_lowercase();
            ["curl", "wget", "powershell"].iter().any(|name| ua.contains(name))
        })
}

pub fn wants_plain(headers: &HeaderMap) -> bool {
    if is_cli_client(headers) {
        return true;
    }

    headers
        .get(header::ACCEPT)
        .and_then(|v| v.to_str().ok())
        .is_some_and(|accept| accept.trim_start().starts_with("text/plain"))
}

pub(crate) fn text_response(status: StatusCode, body: impl Into<Bytes>) -> Response {
    let mut resp = http::Response::new(Full::new(body.into()));
    *resp.status_mut() = status;
    resp.headers_mut().insert(
        header::CONTENT_TYPE,
        HeaderValue::from_static("text/plain; charset=utf-8"),
    );
    resp
}

pub(crate) fn html_response(status: StatusCode, body: String) -> Response {
    let mut resp = http::Response::new(Full::new(Bytes::from(body)));
    *resp.status_mut() = status;
    resp.headers_mut().insert(
        header::CONTENT_TYPE,
        HeaderValue::from_static("text/html; charset=utf-8"),
    );
    resp
}

pub(crate) fn json_response<T: Serialize>(status: StatusCode, value: &T) -> Response {
    match serde_json::to_vec(value) {
        Ok(body) => {
            let mut resp = http::Response::new(Full::new(Bytes::from(body)));
            *resp.status_mut() = status;
            resp.headers_mut().insert(
                header::CONTENT_TYPE,
                HeaderValue::from_static("application/json; charset=utf-8"),
            );
            resp
        }
        Err(e) => {
            log::error!("JSON response encoding failed: {e}");
            crate::error::envelope(
                StatusCode::INTERNAL_SERVER_ERROR,
                "response encoding failed",
            )
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn headers(pairs: &[(&str, &str)]) -> HeaderMap {
        let mut map = HeaderMap::new();
        for (name, value) in pairs {
            map.insert(
                http::header::HeaderName::from_bytes(name.as_bytes()).unwrap(),
                HeaderValue::from_str(value).unwrap(),
            );
        }
        map
    }

    #[test]
    fn scheme_defaults_to_http() {
        assert_eq!(request_scheme(&HeaderMap::new()), "http");
        assert_eq!(request_scheme(&headers(&[("x-forwarded-proto", "http")])), "http");
    }

    #[test]
    fn scheme_honors_every_proxy_header() {
        for name in PROTO_HEADERS {
            assert_eq!(request_scheme(&headers(&[(name, "https")])), "https");
            assert_eq!(request_scheme(&headers(&[(name, "HTTPS")])), "https");
        }
        for name in SSL_HEADERS {
            assert_eq!(request_scheme(&headers(&[(name, "on")])), "https");
            assert_eq!(request_scheme(&headers(&[(name, "off")])), "http");
        }
        // first hop wins in a comma list
        assert_eq!(request_scheme(&headers(&[("x-forwarded-proto", "https, http")])), "https");
    }

    #[test]
    fn cli_detection_is_substring_and_case_insensitive() {
        assert!(is_cli_client(&headers(&[("user-agent", "curl/8.4.0")])));
        assert!(is_cli_client(&headers(&[("user-agent", "Wget/1.21")])));
        assert!(is_cli_client(&headers(&[("user-agent", "Windows PowerShell/5.1")])));
        assert!(!is_cli_client(&headers(&[("user-agent", "Mozilla/5.0 Firefox/126.0")])));
        assert!(!is_cli_client(&HeaderMap::new()));
    }

    #[test]
    fn plain_accept_counts_as_cli() {
        assert!(wants_plain(&headers(&[("accept", "text/plain")])));
        assert!(!wants_plain(&headers(&[("accept", "text/html")])));
    }
}
