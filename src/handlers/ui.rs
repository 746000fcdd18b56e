//! Minimal inline HTML for browser clients. No templating engine; the pages
//! are assembled with `format!` and kept deliberately plain.

use crate::paste::Paste;

pub fn escape_html(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    for ch in raw.chars() {
        match ch {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            _ => out.push(ch),
        }
    }
    out
}

pub fn index_page() -> String {
    concat!(
        "<!DOCTYPE html>\n<html>\n<head><meta charset=\"utf-8\"><title>clipd</title></head>\n",
        "<body>\n<h1>clipd</h1>\n",
        "<p>Paste something and get a short URL back.</p>\n",
        "<form method=\"post\" action=\"/\" enctype=\"multipart/form-data\">\n",
        "<input type=\"file\" name=\"file\">\n",
        "<button type=\"submit\">Upload</button>\n",
        "</form>\n",
        "<p>From a terminal: <code>curl --data-binary @file http://this.host/</code></p>\n",
        "</body>\n</html>\n",
    )
    .to_owned()
}

pub fn view_page(paste: &Paste, text: &str, preview: bool) -> String {
    let note = if preview {
        "<p><em>Content truncated; fetch the raw URL for the full paste.</em></p>\n"
    } else {
        ""
    };

    format!(
        "<!DOCTYPE html>\n<html>\n<head><meta charset=\"utf-8\"><title>{id}</title></head>\n\
         <body>\n<h1>{id}</h1>\n\
         <p>{content_type} &middot; {size} bytes &middot; <a href=\"/raw/{id}\">raw</a></p>\n\
         {note}<pre>{body}</pre>\n</body>\n</html>\n",
        id = escape_html(&paste.id),
        content_type = escape_html(&paste.content_type),
        size = paste.size,
        body = escape_html(text),
    )
}

pub fn not_found_page() -> String {
    concat!(
        "<!DOCTYPE html>\n<html>\n<head><meta charset=\"utf-8\"><title>not found</title></head>\n",
        "<body>\n<h1>404</h1>\n",
        "<p>This paste does not exist. It may have expired or already been read.</p>\n",
        "</body>\n</html>\n",
    )
    .to_owned()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn escaping_neutralizes_markup() {
        assert_eq!(escape_html("<script>&\"'"), "&lt;script&gt;&amp;&quot;&#39;");
        assert_eq!(escape_html("plain"), "plain");
    }

    #[test]
    fn view_page_escapes_content() {
        let paste = Paste {
            id: "ABCDE".to_owned(),
            created_at: chrono::Utc::now(),
            expires_at: None,
            size: 12,
            content_type: "text/html".to_owned(),
            burn_after_read: false,
            read_count: 0,
        };
        let page = view_page(&paste, "<b>bold</b>", false);
        assert!(page.contains("&lt;b&gt;bold&lt;/b&gt;"));
        assert!(!page.contains("<b>bold"));
    }
}
