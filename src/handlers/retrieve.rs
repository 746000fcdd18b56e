use bytes::Bytes;
use headers::HeaderMapExt;
use http::{header, HeaderMap, HeaderValue, StatusCode};
use http_body_util::Full;
use mime::Mime;

use crate::error::Error;
use crate::media;
use crate::paste::Paste;
use crate::slug;
use crate::Response;

use super::{html_response, is_cli_client, json_response, ui, AppState};

/// Default HTML page (or raw bytes for CLI clients).
pub async fn view(state: &AppState, parts: &http::request::Parts, id: &str) -> Response {
    match view_inner(state, parts, id).await {
        Ok(resp) => resp,
        Err(err) => error_response(err, &parts.headers),
    }
}

/// Download endpoint: bytes with a content disposition.
pub async fn raw(state: &AppState, parts: &http::request::Parts, id: &str) -> Response {
    match raw_inner(state, id).await {
        Ok(resp) => resp,
        Err(err) => error_response(err, &parts.headers),
    }
}

/// Metadata record as JSON. Does not count as a read and never burns.
pub async fn meta(state: &AppState, parts: &http::request::Parts, id: &str) -> Response {
    match meta_inner(state, id).await {
        Ok(resp) => resp,
        Err(err) => error_response(err, &parts.headers),
    }
}

/// NotFound is the one outcome browsers see as a page; everything else (and
/// every outcome for CLI/API clients) is the JSON envelope.
pub(crate) fn error_response(err: Error, headers: &HeaderMap) -> Response {
    if matches!(err, Error::NotFound) && prefers_html(headers) {
        html_response(StatusCode::NOT_FOUND, ui::not_found_page())
    } else {
        err.into_response()
    }
}

fn prefers_html(headers: &HeaderMap) -> bool {
    !is_cli_client(headers)
        && headers
            .get(header::ACCEPT)
            .and_then(|v| v.to_str().ok())
            .is_some_and(|accept| accept.contains("text/html"))
}

async fn view_inner(
    state: &AppState,
    parts: &http::request::Parts,
    id: &str,
) -> Result<Response, Error> {
    let paste = lookup(state, id).await?;
    state.service.increment_read_count(&paste.id).await;
    verify_size(state, &paste).await?;

    if paste.burn_after_read {
        let bytes = burn_deliver(state, &paste).await?;
        return Ok(render_view(state, &parts.headers, &paste, bytes));
    }

    if is_cli_client(&parts.headers) {
        return Ok(bytes_response(&paste, full_content(state, &paste).await?));
    }

    let max_render = state.config.max_render_bytes;
    if paste.size <= max_render as u64 {
        let bytes = full_content(state, &paste).await?;
        let text = String::from_utf8_lossy(&bytes).into_owned();
        return Ok(html_response(StatusCode::OK, ui::view_page(&paste, &text, false)));
    }

    // oversized: text gets a prefix preview, anything else an empty one
    let preview = if media::is_text(&paste.content_type) {
        state.service.get_content_prefix(&paste.id, max_render).await?.unwrap_or_default()
    } else {
        Bytes::new()
    };
    let text = String::from_utf8_lossy(&preview).into_owned();
    Ok(html_response(StatusCode::OK, ui::view_page(&paste, &text, true)))
}

async fn raw_inner(state: &AppState, id: &str) -> Result<Response, Error> {
    let paste = lookup(state, id).await?;
    state.service.increment_read_count(&paste.id).await;
    verify_size(state, &paste).await?;

    let bytes = if paste.burn_after_read {
        burn_deliver(state, &paste).await?
    } else {
        full_content(state, &paste).await?
    };

    let filename = format!("{}{}", paste.id, media::extension_for(&paste.content_type));
    let inline = media::is_text(&paste.content_type);

    let mut resp = bytes_response(&paste, bytes);
    resp.headers_mut()
        .insert(header::CONTENT_DISPOSITION, content_disposition(inline, &filename));
    Ok(resp)
}

async fn meta_inner(state: &AppState, id: &str) -> Result<Response, Error> {
    let paste = lookup(state, id).await?;
    Ok(json_response(StatusCode::OK, &paste))
}

async fn lookup(state: &AppState, id: &str) -> Result<Paste, Error> {
    if !slug::is_valid(id) {
        return Err(Error::InvalidSlug);
    }

    state.service.get(id).await
}

/// The metadata size is authoritative; disagreement with the stored blob is
/// fatal for the request and deliberately not repaired.
async fn verify_size(state: &AppState, paste: &Paste) -> Result<(), Error> {
    match state.service.stat_content(&paste.id).await? {
        None => {
            // content half is gone; reap the metadata orphan
            if let Err(e) = state.service.delete(&paste.id).await {
                log::warn!("orphan metadata cleanup for {} failed: {e}", paste.id);
            }
            Err(Error::NotFound)
        }
        Some(actual) if actual != paste.size => {
            log::error!(
                "size mismatch for {}: metadata says {}, stored {actual}",
                paste.id,
                paste.size
            );
            Err(Error::SizeMismatch)
        }
        Some(_) => Ok(()),
    }
}

/// Burn-after-read delivery. The claim linearizes concurrent readers: the
/// one whose claim succeeds streams the bytes, everyone else sees NotFound.
/// The temporaries are removed on every exit path before the response goes
/// out, so a dropped client cannot leak them.
async fn burn_deliver(state: &AppState, paste: &Paste) -> Result<Bytes, Error> {
    let Some(claim) = state.service.claim(&paste.id).await? else {
        return Err(Error::NotFound);
    };

    if let Err(e) = state.service.delete(&paste.id).await {
        log::warn!("clearing public keys of burned {} failed: {e}", paste.id);
    }

    let bytes = state.service.read_claimed(&claim).await;
    state.service.discard_claim(&claim).await;

    bytes
}

fn render_view(
    state: &AppState,
    headers: &HeaderMap,
    paste: &Paste,
    bytes: Bytes,
) -> Response {
    if is_cli_client(headers) {
        return bytes_response(paste, bytes);
    }

    let max_render = state.config.max_render_bytes;
    if bytes.len() <= max_render {
        let text = String::from_utf8_lossy(&bytes).into_owned();
        return html_response(StatusCode::OK, ui::view_page(paste, &text, false));
    }

    let preview = if media::is_text(&paste.content_type) {
        String::from_utf8_lossy(&bytes[..max_render]).into_owned()
    } else {
        String::new()
    };
    html_response(StatusCode::OK, ui::view_page(paste, &preview, true))
}

fn bytes_response(paste: &Paste, bytes: Bytes) -> Response {
    let mut resp = http::Response::new(Full::new(bytes));

    match paste.content_type.parse::<Mime>() {
        Ok(mime) => resp.headers_mut().typed_insert(headers::ContentType::from(mime)),
        // a record written by an older build could hold junk; serve it opaquely
        Err(_) => {
            resp.headers_mut().insert(
                header::CONTENT_TYPE,
                HeaderValue::from_static(media::OCTET_STREAM),
            );
        }
    }

    resp
}

async fn full_content(state: &AppState, paste: &Paste) -> Result<Bytes, Error> {
    // the half can vanish between the stat and this read
    state.service.get_content(&paste.id).await?.ok_or(Error::NotFound)
}

fn content_disposition(inline: bool, filename: &str) -> HeaderValue {
    let kind = if inline { "inline" } else { "attachment" };
    let encoded = urlencoding::encode(filename);

    HeaderValue::from_str(&format!(
        "{kind}; filename=\"{filename}\"; filename*=UTF-8''{encoded}"
    ))
    .unwrap_or_else(|_| HeaderValue::from_static("attachment"))
}
