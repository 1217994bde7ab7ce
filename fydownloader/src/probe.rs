//! Resource probing.
//!
//! A probe issues a single `HEAD` request and extracts what the planner needs:
//! the resource size, whether the server accepts byte ranges, and a file name
//! for the output.
//!
//! # File name resolution
//!
//! 1. The `filename` parameter of a well-formed `Content-Disposition` header
//!    (`filename*` takes precedence when both are present).
//! 2. Otherwise the last path segment of the URL, with query and fragment
//!    removed and percent-escapes decoded.
//! 3. Otherwise the probe fails with [`DownloadError::NameUnresolved`].
//!
//! A malformed `Content-Disposition` is ignored, never an error.

use std::collections::HashMap;
use std::path::Path;

use percent_encoding::percent_decode_str;
use reqwest::header::{HeaderMap, ACCEPT_RANGES, CONTENT_DISPOSITION, CONTENT_LENGTH};
use reqwest::{Client, StatusCode, Url};

use crate::error::{DownloadError, DownloadResult};

/// What the probe learned about a remote resource.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResourceMetadata {
    /// Name the finished file is saved under.
    pub file_name: String,
    /// Total size in bytes.
    pub size: u64,
    /// Whether the server advertised `Accept-Ranges: bytes`.
    pub range_supported: bool,
}

/// Issues metadata-only requests.
#[derive(Debug, Clone)]
pub struct ResourceProbe {
    client: Client,
}

impl ResourceProbe {
    /// Create a probe that sends requests through `client`.
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    /// Probe `url` with a `HEAD` request.
    ///
    /// # Errors
    ///
    /// * [`DownloadError::Transport`] if the request cannot be sent
    /// * [`DownloadError::UnexpectedStatus`] for anything but 200 or 206
    /// * [`DownloadError::SizeUnknown`] if `Content-Length` is missing or not a number
    /// * [`DownloadError::NameUnresolved`] if no file name can be derived
    pub async fn probe(&self, url: &str) -> DownloadResult<ResourceMetadata> {
        let response = self
            .client
            .head(url)
            .send()
            .await
            .map_err(|e| DownloadError::transport(url, e))?;

        let status = response.status();
        if status != StatusCode::OK && status != StatusCode::PARTIAL_CONTENT {
            return Err(DownloadError::UnexpectedStatus {
                url: url.to_string(),
                status: status.as_u16(),
            });
        }

        metadata_from_headers(url, response.headers())
    }
}

/// Build [`ResourceMetadata`] from the headers of a successful probe response.
pub fn metadata_from_headers(url: &str, headers: &HeaderMap) -> DownloadResult<ResourceMetadata> {
    let size = content_length(headers).map_err(|reason| DownloadError::SizeUnknown {
        url: url.to_string(),
        reason,
    })?;

    let range_supported = headers
        .get(ACCEPT_RANGES)
        .and_then(|v| v.to_str().ok())
        .map(|v| v.trim().eq_ignore_ascii_case("bytes"))
        .unwrap_or(false);

    let file_name = headers
        .get(CONTENT_DISPOSITION)
        .and_then(|v| v.to_str().ok())
        .and_then(filename_from_disposition)
        .or_else(|| filename_from_url(url))
        .ok_or_else(|| DownloadError::NameUnresolved {
            url: url.to_string(),
        })?;

    Ok(ResourceMetadata {
        file_name,
        size,
        range_supported,
    })
}

fn content_length(headers: &HeaderMap) -> Result<u64, String> {
    let value = headers
        .get(CONTENT_LENGTH)
        .ok_or_else(|| "no Content-Length header".to_string())?;
    let text = value
        .to_str()
        .map_err(|_| "Content-Length is not valid text".to_string())?;
    text.trim()
        .parse::<u64>()
        .map_err(|e| format!("invalid Content-Length '{}': {}", text, e))
}

// =============================================================================
// Content-Disposition
// =============================================================================

/// Extract the `filename` parameter from a `Content-Disposition` value.
///
/// Returns `None` when the header is malformed or carries no usable name.
pub fn filename_from_disposition(value: &str) -> Option<String> {
    let (_disposition, params) = parse_media_params(value)?;
    params
        .get("filename*")
        .and_then(|v| decode_extended_value(v))
        .or_else(|| params.get("filename").cloned())
        .and_then(|name| sanitize_file_name(&name))
}

/// Parse `type; key=value; key="quoted value"` syntax.
///
/// Keys are lowercased. Duplicate keys, missing values, unterminated quotes
/// and stray characters make the whole header invalid.
fn parse_media_params(value: &str) -> Option<(String, HashMap<String, String>)> {
    let (disposition, mut rest) = consume_token(value.trim_start());
    if disposition.is_empty() {
        return None;
    }

    let mut params = HashMap::new();
    loop {
        rest = rest.trim_start();
        if rest.is_empty() {
            break;
        }
        rest = rest.strip_prefix(';')?.trim_start();
        if rest.is_empty() {
            // Trailing semicolon.
            break;
        }

        let (key, after_key) = consume_token(rest);
        if key.is_empty() {
            return None;
        }
        let after_eq = after_key.trim_start().strip_prefix('=')?.trim_start();
        let (param_value, after_value) = consume_value(after_eq)?;

        if params
            .insert(key.to_ascii_lowercase(), param_value)
            .is_some()
        {
            return None;
        }
        rest = after_value;
    }

    Some((disposition.to_ascii_lowercase(), params))
}

fn is_token_char(c: char) -> bool {
    c.is_ascii_graphic() && !"()<>@,;:\\\"/[]?=".contains(c)
}

fn consume_token(s: &str) -> (&str, &str) {
    let end = s.find(|c: char| !is_token_char(c)).unwrap_or(s.len());
    s.split_at(end)
}

/// Consume a token or a quoted string. Quoted strings honour backslash escapes.
fn consume_value(s: &str) -> Option<(String, &str)> {
    let Some(quoted) = s.strip_prefix('"') else {
        let (token, rest) = consume_token(s);
        return (!token.is_empty()).then(|| (token.to_string(), rest));
    };

    let mut out = String::new();
    let mut chars = quoted.char_indices();
    while let Some((i, c)) = chars.next() {
        match c {
            '"' => return Some((out, &quoted[i + 1..])),
            '\\' => out.push(chars.next()?.1),
            '\r' | '\n' => return None,
            c => out.push(c),
        }
    }
    None
}

/// Decode an RFC 2231 extended value: `charset'language'percent-encoded`.
fn decode_extended_value(value: &str) -> Option<String> {
    let mut parts = value.splitn(3, '\'');
    let charset = parts.next()?;
    let _language = parts.next()?;
    let encoded = parts.next()?;

    if !charset.eq_ignore_ascii_case("utf-8") && !charset.eq_ignore_ascii_case("us-ascii") {
        return None;
    }
    percent_decode_str(encoded)
        .decode_utf8()
        .ok()
        .map(|s| s.into_owned())
}

// =============================================================================
// URL fallback
// =============================================================================

/// Derive a file name from the last path segment of `url`.
///
/// The query string and fragment never contribute to the name.
pub fn filename_from_url(url: &str) -> Option<String> {
    let mut parsed = Url::parse(url).ok()?;
    parsed.set_query(None);
    parsed.set_fragment(None);

    let segment = parsed.path_segments()?.next_back()?.to_string();
    let decoded = percent_decode_str(&segment).decode_utf8_lossy().into_owned();
    sanitize_file_name(&decoded)
}

/// Reduce a server-supplied name to a bare file name.
///
/// Directory components are dropped so a name can never escape the
/// destination directory.
fn sanitize_file_name(name: &str) -> Option<String> {
    let normalized = name.replace('\\', "/");
    let base = Path::new(normalized.trim())
        .file_name()?
        .to_string_lossy()
        .trim()
        .to_string();
    (!base.is_empty() && base != "." && base != "..").then_some(base)
}
