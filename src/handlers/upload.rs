use std::time::Duration;

use base64::engine::general_purpose::{STANDARD, STANDARD_NO_PAD, URL_SAFE, URL_SAFE_NO_PAD};
use base64::Engine as _;
use bytes::{Bytes, BytesMut};
use http::{header, HeaderMap, StatusCode};
use http_body_util::BodyExt;

use crate::config::Config;
use crate::error::Error;
use crate::service::CreatePaste;
use crate::{BoxError, Response};

use super::{base_url, json_response, text_response, wants_plain, AppState};

/// Handle a POST upload. `force_burn` is set on the dedicated burn route;
/// the `X-Burn` header has the same effect.
pub async fn upload<B>(
    state: &AppState,
    req: http::Request<B>,
    force_burn: bool,
) -> Result<Response, Error>
where
    B: http_body::Body<Data = Bytes> + Send + Unpin,
    B::Error: Into<BoxError>,
{
    let (parts, body) = req.into_parts();

    authorize(&state.config, &parts.headers)?;

    let burn = force_burn || flag_enabled(&parts.headers, "x-burn");
    let base64_encoded = flag_enabled(&parts.headers, "x-base64");

    let cap = state.config.max_body_bytes;
    let effective_cap = if base64_encoded { inflate_cap(cap) } else { cap };

    let raw = read_capped(body, effective_cap).await?;

    let (mut content, filename, mut declared_type) = match multipart_boundary(&parts.headers) {
        Some(boundary) => read_file_part(raw, boundary).await?,
        None => (raw, None, content_type_header(&parts.headers)),
    };

    if base64_encoded {
        content = decode_base64(&content)?;
        // the encoded read got slack for the transfer overhead; the payload
        // itself still has to fit
        if content.len() > cap {
            return Err(Error::PayloadTooLarge);
        }
        declared_type = None;
    }

    if content.is_empty() {
        return Err(Error::EmptyContent);
    }

    let ttl = parse_ttl(&parts.headers)?;
    let custom_slug = requested_slug(&parts.headers)?;

    let paste = state
        .service
        .create(CreatePaste {
            content,
            filename,
            declared_type,
            custom_slug,
            burn_after_read: burn,
            ttl,
        })
        .await?;

    let url = format!("{}/{}", base_url(&parts), paste.id);
    log::info!(slug = %paste.id, size = paste.size, burn = paste.burn_after_read, "paste created");

    Ok(if wants_plain(&parts.headers) {
        text_response(StatusCode::OK, format!("{url}\n"))
    } else {
        json_response(
            StatusCode::OK,
            &serde_json::json!({
                "url": url,
                "slug": paste.id,
                "burn_after_read": paste.burn_after_read,
            }),
        )
    })
}

fn authorize(config: &Config, headers: &HeaderMap) -> Result<(), Error> {
    if !config.auth_enabled() {
        return Ok(());
    }

    let presented = headers
        .get("x-api-key")
        .and_then(|v| v.to_str().ok())
        .or_else(|| {
            headers
                .get(header::AUTHORIZATION)
                .and_then(|v| v.to_str().ok())
                .and_then(|v| v.strip_prefix("Bearer "))
        });

    match presented {
        Some(key) if config.api_keys.iter().any(|known| known == key.trim()) => Ok(()),
        _ => Err(Error::Unauthorized),
    }
}

/// Presence enables the option; only an explicit disabling token turns it off.
fn flag_enabled(headers: &HeaderMap, name: &str) -> bool {
    match headers.get(name) {
        None => false,
        Some(value) => {
            let value = value.to_str().unwrap_or("").trim();
            !value.eq_ignore_ascii_case("0")
                && !value.eq_ignore_ascii_case("false")
                && !value.eq_ignore_ascii_case("no")
        }
    }
}

/// Base64 transfer overhead: allow 1.34x the cap on the wire.
fn inflate_cap(cap: usize) -> usize {
    cap.saturating_mul(134) / 100
}

/// Collect the body, failing as soon as it runs past `cap`.
async fn read_capped<B>(mut body: B, cap: usize) -> Result<Bytes, Error>
where
    B: http_body::Body<Data = Bytes> + Send + Unpin,
    B::Error: Into<BoxError>,
{
    let mut buf = BytesMut::new();

    while let Some(frame) = body.frame().await {
        let frame = frame.map_err(|e| {
            log::debug!("request body read failed: {}", e.into());
            Error::BodyRead
        })?;

        if let Ok(data) = frame.into_data() {
            if buf.len() + data.len() > cap {
                return Err(Error::PayloadTooLarge);
            }
            buf.extend_from_slice(&data);
        }
    }

    Ok(buf.freeze())
}

fn content_type_header(headers: &HeaderMap) -> Option<String> {
    headers
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .map(str::to_owned)
}

fn multipart_boundary(headers: &HeaderMap) -> Option<String> {
    let content_type = headers.get(header::CONTENT_TYPE)?.to_str().ok()?;
    multer::parse_boundary(content_type).ok()
}

/// Pull the single `file` part out of a multipart body.
async fn read_file_part(
    raw: Bytes,
    boundary: String,
) -> Result<(Bytes, Option<String>, Option<String>), Error> {
    let stream =
        futures::stream::once(async move { Ok::<Bytes, std::convert::Infallible>(raw) });
    let mut multipart = multer::Multipart::new(stream, boundary);

    while let Some(field) =
        multipart.next_field().await.map_err(|e| Error::BadMultipart(e.to_string()))?
    {
        if field.name() != Some("file") {
            continue;
        }

        let filename = field.file_name().map(str::to_owned);
        let declared = field.content_type().map(|mime| mime.to_string());
        let bytes = field.bytes().await.map_err(|e| Error::BadMultipart(e.to_string()))?;
        return Ok((bytes, filename, declared));
    }

    Err(Error::BadMultipart("missing file part".to_owned()))
}

/// Standard, URL-safe, then the unpadded variants of each.
fn decode_base64(raw: &[u8]) -> Result<Bytes, Error> {
    let raw = raw.trim_ascii();

    for engine in [STANDARD, URL_SAFE, STANDARD_NO_PAD, URL_SAFE_NO_PAD] {
        if let Ok(decoded) = engine.decode(raw) {
            return Ok(Bytes::from(decoded));
        }
    }

    Err(Error::BadBase64)
}

fn parse_ttl(headers: &HeaderMap) -> Result<Option<Duration>, Error> {
    let Some(value) = headers.get("x-ttl") else {
        return Ok(None);
    };

    let value = value.to_str().map_err(|_| Error::TtlOutOfRange)?;
    humantime::parse_duration(value.trim()).map(Some).map_err(|_| Error::TtlOutOfRange)
}

fn requested_slug(headers: &HeaderMap) -> Result<Option<String>, Error> {
    match headers.get("x-slug") {
        None => Ok(None),
        Some(value) => {
            let value = value.to_str().map_err(|_| Error::InvalidSlug)?.trim();
            if value.is_empty() {
                Ok(None)
            } else {
                Ok(Some(value.to_owned()))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use http::HeaderValue;

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
    fn flags_are_presence_enabled() {
        assert!(!flag_enabled(&HeaderMap::new(), "x-burn"));
        assert!(flag_enabled(&headers(&[("x-burn", "")]), "x-burn"));
        assert!(flag_enabled(&headers(&[("x-burn", "1")]), "x-burn"));
        assert!(flag_enabled(&headers(&[("x-burn", "yes")]), "x-burn"));
        assert!(!flag_enabled(&headers(&[("x-burn", "0")]), "x-burn"));
        assert!(!flag_enabled(&headers(&[("x-burn", "false")]), "x-burn"));
        assert!(!flag_enabled(&headers(&[("x-burn", "FALSE")]), "x-burn"));
        assert!(!flag_enabled(&headers(&[("x-burn", "No")]), "x-burn"));
    }

    #[test]
    fn base64_decoder_cascade() {
        // standard with padding
        assert_eq!(decode_base64(b"aGVsbG8=").unwrap(), &b"hello"[..]);
        // standard without padding
        assert_eq!(decode_base64(b"aGVsbG8").unwrap(), &b"hello"[..]);
        // url-safe alphabet (0xfb 0xef 0xff needs -_ in url-safe form)
        assert_eq!(decode_base64(b"--__").unwrap(), &[0xfb, 0xef, 0xff][..]);
        // surrounding whitespace is tolerated
        assert_eq!(decode_base64(b"aGVsbG8=\n").unwrap(), &b"hello"[..]);
        assert!(decode_base64(b"not base64!!").is_err());
    }

    #[test]
    fn cap_inflation_allows_transfer_overhead() {
        assert_eq!(inflate_cap(100), 134);
        assert_eq!(inflate_cap(5 * 1024 * 1024), 5 * 1024 * 1024 * 134 / 100);
        // saturates instead of overflowing
        assert!(inflate_cap(usize::MAX) >= usize::MAX / 100);
    }

    #[test]
    fn ttl_header_parses_durations() {
        assert_eq!(parse_ttl(&HeaderMap::new()).unwrap(), None);
        assert_eq!(
            parse_ttl(&headers(&[("x-ttl", "2h")])).unwrap(),
            Some(Duration::from_secs(7200))
        );
        assert_eq!(
            parse_ttl(&headers(&[("x-ttl", "30m")])).unwrap(),
            Some(Duration::from_secs(1800))
        );
        assert!(parse_ttl(&headers(&[("x-ttl", "soon")])).is_err());
    }

    #[test]
    fn auth_is_a_presence_check_against_the_key_list() {
        let open = Config::default();
        assert!(authorize(&open, &HeaderMap::new()).is_ok());

        let mut locked = Config::default();
        locked.api_keys = vec!["sesame".to_owned()];
        assert!(authorize(&locked, &HeaderMap::new()).is_err());
        assert!(authorize(&locked, &headers(&[("x-api-key", "wrong")])).is_err());
        assert!(authorize(&locked, &headers(&[("x-api-key", "sesame")])).is_ok());
        assert!(authorize(&locked, &headers(&[("authorization", "Bearer sesame")])).is_ok());
    }
}
