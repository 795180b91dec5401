//! The document reference decoded from a viewer frame.
//!
//! The viewer frame encodes the real document location in its query string:
//! `file` holds the percent-encoded document address and the optional
//! `headers` holds a percent-encoded JSON object of request headers.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use url::Url;

use crate::error::{Error, NotFoundReason, Result};

/// Query parameter holding the document address
pub const FILE_PARAM: &str = "file";
/// Query parameter holding the JSON-encoded request headers
pub const HEADERS_PARAM: &str = "headers";
/// Marker that a path segment names a PDF document
pub const DOCUMENT_EXTENSION: &str = ".pdf";
/// Prefix of generated file names ("smart education textbook")
pub const FALLBACK_NAME_PREFIX: &str = "智慧教育教材_";

/// Where to fetch a document from, and with which headers.
///
/// Only built through [`DocumentReference::new`], which refuses a source
/// address that does not parse as a URL.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DocumentReference {
    pub source_url: String,
    pub headers: HashMap<String, String>,
    pub suggested_name: String,
    pub originating_frame_url: String,
    pub page_url: String,
}

impl DocumentReference {
    pub fn new(
        source_url: impl Into<String>,
        headers: HashMap<String, String>,
        originating_frame_url: impl Into<String>,
        page_url: impl Into<String>,
    ) -> Result<Self> {
        let source_url = source_url.into();
        if source_url.is_empty() || Url::parse(&source_url).is_err() {
            return Err(Error::ReferenceNotFound(NotFoundReason::InvalidSourceUrl));
        }
        let suggested_name = suggested_name(&source_url);

        Ok(Self {
            source_url,
            headers,
            suggested_name,
            originating_frame_url: originating_frame_url.into(),
            page_url: page_url.into(),
        })
    }
}

/// Decode a percent-encoded component the way `decodeURIComponent` does.
///
/// A `%` not followed by two hex digits, or a byte sequence that is not
/// UTF-8, is an error.
pub fn decode_component(input: &str) -> Option<String> {
    let bytes = input.as_bytes();
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'%' {
            let well_formed = bytes
                .get(i + 1..i + 3)
                .is_some_and(|pair| pair.iter().all(u8::is_ascii_hexdigit));
            if !well_formed {
                return None;
            }
            i += 3;
        } else {
            i += 1;
        }
    }

    urlencoding::decode(input).ok().map(|s| s.into_owned())
}

/// Decode the `headers` parameter into a header map.
///
/// Any failure degrades to an empty map; the caller never sees the error.
pub fn decode_headers(raw: &str) -> HashMap<String, String> {
    let Some(decoded) = decode_component(raw) else {
        tracing::warn!(len = raw.len(), "Failed to percent-decode headers parameter");
        return HashMap::new();
    };

    let value: serde_json::Value = match serde_json::from_str(&decoded) {
        Ok(value) => value,
        Err(e) => {
            tracing::warn!(error = %e, "Failed to parse headers parameter as JSON");
            return HashMap::new();
        }
    };

    let serde_json::Value::Object(map) = value else {
        tracing::warn!("Headers parameter is not a JSON object");
        return HashMap::new();
    };

    map.into_iter()
        .map(|(name, value)| {
            let value = match value {
                serde_json::Value::String(s) => s,
                other => other.to_string(),
            };
            (name, value)
        })
        .collect()
}

/// File name for the save dialog.
///
/// Uses the last path segment of `source_url` when it names a PDF, otherwise
/// a timestamped fallback.
pub fn suggested_name(source_url: &str) -> String {
    Url::parse(source_url)
        .ok()
        .and_then(|url| {
            url.path_segments()
                .and_then(|mut segments| segments.next_back().map(str::to_string))
        })
        .filter(|segment| segment.contains(DOCUMENT_EXTENSION))
        .and_then(|segment| decode_component(&segment))
        .unwrap_or_else(fallback_name)
}

pub fn fallback_name() -> String {
    format!(
        "{FALLBACK_NAME_PREFIX}{}{DOCUMENT_EXTENSION}",
        chrono::Utc::now().timestamp_millis()
    )
}
