use std::path::Path;
use std::str::FromStr;
use std::sync::LazyLock;

use mime::Mime;
use rustc_hash::FxHashMap;

pub const OCTET_STREAM: &str = "application/octet-stream";
pub const TEXT_PLAIN_UTF8: &str = "text/plain; charset=utf-8";

/// Media type → canonical download extension. Unknown types map to `""`.
static EXTENSIONS: LazyLock<FxHashMap<&'static str, &'static str>> = LazyLock::new(|| {
    FxHashMap::from_iter([
        ("application/zip", ".zip"),
        ("application/json", ".json"),
        ("application/xml", ".xml"),
        ("application/javascript", ".js"),
        ("application/x-sh", ".sh"),
        ("application/x-yaml", ".yaml"),
        ("application/pdf", ".pdf"),
        ("application/gzip", ".gz"),
        ("application/x-tar", ".tar"),
        ("text/plain", ".txt"),
        ("text/html", ".html"),
        ("text/css", ".css"),
        ("text/csv", ".csv"),
        ("text/markdown", ".md"),
        ("text/xml", ".xml"),
        ("image/png", ".png"),
        ("image/jpeg", ".jpg"),
        ("image/gif", ".gif"),
        ("image/svg+xml", ".svg"),
        ("image/webp", ".webp"),
    ])
});

/// Application subtypes that render fine as text despite the `application/` base.
const TEXTISH_APPLICATION: &[&str] = &[
    "application/json",
    "application/xml",
    "application/javascript",
    "application/x-sh",
    "application/x-yaml",
];

/// Classify content as a media type string.
///
/// Resolution order: filename extension, magic signature, byte sniffing,
/// `application/octet-stream`. Total over all inputs.
pub fn detect(filename: &str, bytes: &[u8]) -> String {
    if let Some(ext) = Path::new(filename).extension().and_then(|e| e.to_str()) {
        if let Some(mime) = mime_guess::from_ext(ext).first() {
            return mime.essence_str().to_owned();
        }
    }

    if let Some(mime) = magic_signature(bytes) {
        return mime.to_owned();
    }

    sniff(bytes).to_owned()
}

fn magic_signature(bytes: &[u8]) -> Option<&'static str> {
    if bytes.starts_with(b"PK\x03\x04") {
        return Some("application/zip");
    }
    if bytes.starts_with(b"\x89PNG") {
        return Some("image/png");
    }
    if bytes.starts_with(b"\xFF\xD8\xFF") {
        return Some("image/jpeg");
    }
    if bytes.starts_with(b"GIF87a") || bytes.starts_with(b"GIF89a") {
        return Some("image/gif");
    }
    None
}

fn sniff(bytes: &[u8]) -> &'static str {
    if !bytes.is_empty() && content_inspector::inspect(bytes).is_text() {
        TEXT_PLAIN_UTF8
    } else {
        OCTET_STREAM
    }
}

/// Canonical extension (with leading dot) for a media type, or `""`.
pub fn extension_for(media_type: &str) -> &'static str {
    EXTENSIONS.get(essence(media_type).as_str()).copied().unwrap_or("")
}

/// Whether a media type renders as text: `text/*` plus a short list of
/// application subtypes. Case-insensitive, parameters ignored.
pub fn is_text(media_type: &str) -> bool {
    let essence = essence(media_type);

    essence.starts_with("text/") || TEXTISH_APPLICATION.contains(&essence.as_str())
}

/// Lowercased `type/subtype`, with parameters stripped.
fn essence(media_type: &str) -> String {
    match Mime::from_str(media_type) {
        Ok(mime) => mime.essence_str().to_ascii_lowercase(),
        // not parseable as a mime; strip parameters by hand
        Err(_) => media_type
            .split(';')
            .next()
            .unwrap_or("")
            .trim()
            .to_ascii_lowercase(),
    }
}
