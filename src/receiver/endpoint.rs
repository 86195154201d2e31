//! URL decomposition for beacon resources.

use crate::core::types::{MAX_AUTHORITY_LEN, MAX_ENDPOINT_LEN};
use crate::core::Malformed;
use url::Url;

/// Pieces of a beacon resource URL used as dimensions
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UrlParts {
    pub scheme: String,
    pub authority: String,
    pub path: String,
}

/// Keep the first `depth` segments of `path`.
///
/// Repeated slashes collapse first, the result always starts with `/` and is
/// capped at 250 characters. Truncating an already truncated endpoint at the
/// same depth returns it unchanged.
pub fn truncate_endpoint(path: &str, depth: usize) -> String {
    let mut endpoint = String::with_capacity(path.len().min(MAX_ENDPOINT_LEN) + 1);
    for segment in path.split('/').filter(|s| !s.is_empty()).take(depth) {
        endpoint.push('/');
        endpoint.push_str(segment);
    }
    if endpoint.is_empty() {
        endpoint.push('/');
    }
    cap_chars(endpoint, MAX_ENDPOINT_LEN)
}

/// Split an absolute resource URL into scheme, authority and path
pub fn split_url(raw: &str) -> Result<UrlParts, Malformed> {
    let url = Url::parse(raw).map_err(|e| Malformed::InvalidUrl(format!("{}: {}", raw, e)))?;
    let host = url
        .host_str()
        .ok_or_else(|| Malformed::InvalidUrl(format!("{}: no host", raw)))?;

    let mut authority = String::new();
    if !url.username().is_empty() {
        authority.push_str(url.username());
        authority.push('@');
    }
    authority.push_str(host);
    if let Some(port) = url.port() {
        authority.push(':');
        authority.push_str(&port.to_string());
    }

    Ok(UrlParts {
        scheme: url.scheme().to_string(),
        authority: cap_chars(authority, MAX_AUTHORITY_LEN),
        path: url.path().to_string(),
    })
}

/// Guess a MIME type from the last path segment's extension
pub fn mime_from_path(path: &str) -> &'static str {
    let file = path.rsplit('/').next().unwrap_or_default();
    let ext = match file.rsplit_once('.') {
        Some((_, ext)) => ext.to_ascii_lowercase(),
        None => return "text/html",
    };
    match ext.as_str() {
        "html" | "htm" | "php" => "text/html",
        "js" | "mjs" => "text/javascript",
        "css" => "text/css",
        "png" => "image/png",
        "jpg" | "jpeg" => "image/jpeg",
        "gif" => "image/gif",
        "webp" => "image/webp",
        "avif" => "image/avif",
        "svg" => "image/svg+xml",
        "ico" => "image/x-icon",
        "woff" => "font/woff",
        "woff2" => "font/woff2",
        "ttf" => "font/ttf",
        "otf" => "font/otf",
        "mp4" => "video/mp4",
        "webm" => "video/webm",
        "mp3" => "audio/mpeg",
        "json" => "application/json",
        "xml" => "application/xml",
        "txt" => "text/plain",
        _ => "application/octet-stream",
    }
}

fn cap_chars(mut value: String, max: usize) -> String {
    if let Some((idx, _)) = value.char_indices().nth(max) {
        value.truncate(idx);
    }
    value
}
