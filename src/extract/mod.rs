//! Reference extraction.
//!
//! Finds the viewer frame in a page snapshot and decodes the document
//! address and request headers from the frame's query string. Extraction is
//! pure: it reads the snapshot and nothing else, so it can be repeated freely.

mod locator;

use scraper::Html;
use tracing::{debug, trace};
use url::Url;

pub use locator::{
    DEFAULT_FRAME_PATH, DEFAULT_VIEWER_MARKER, FrameLocator, InvalidPath, MarkerSelector,
    PositionalPath,
};

use crate::error::{Error, NotFoundReason, Result};
use crate::page::Page;
use crate::reference::{
    DocumentReference, FILE_PARAM, HEADERS_PARAM, decode_component, decode_headers,
};

#[derive(Debug)]
pub struct Extractor {
    locator: Box<dyn FrameLocator>,
    marker: String,
}

impl Default for Extractor {
    fn default() -> Self {
        Self::new(Box::new(PositionalPath::default()), DEFAULT_VIEWER_MARKER)
    }
}

impl Extractor {
    pub fn new(locator: Box<dyn FrameLocator>, marker: impl Into<String>) -> Self {
        Self {
            locator,
            marker: marker.into(),
        }
    }

    pub fn locator_name(&self) -> &'static str {
        self.locator.name()
    }

    /// Extract the document reference from a page snapshot.
    pub fn extract(&self, page: &Page) -> Result<DocumentReference> {
        let frame_url = {
            let document = Html::parse_document(&page.html);
            let frame = self
                .locator
                .locate(&document)
                .ok_or(Error::ReferenceNotFound(NotFoundReason::NoFrame))?;

            let src = frame
                .value()
                .attr("src")
                .filter(|src| !src.is_empty())
                .ok_or(Error::ReferenceNotFound(NotFoundReason::NotViewer))?;

            page.url
                .join(src)
                .map_err(|_| Error::ReferenceNotFound(NotFoundReason::InvalidFrameUrl))?
        };

        if !frame_url.as_str().contains(&self.marker) {
            debug!(src = %frame_url, marker = %self.marker, "Frame is not the document viewer");
            return Err(Error::ReferenceNotFound(NotFoundReason::NotViewer));
        }

        debug!(src = %frame_url, locator = self.locator.name(), "Found viewer frame");
        decode_viewer_url(&frame_url, page.url.as_str())
    }

    /// Decode a viewer address handed over directly, without a page.
    ///
    /// Relative addresses are resolved against `page_url` when given.
    pub fn from_viewer_url(&self, viewer_url: &str, page_url: Option<&Url>) -> Result<DocumentReference> {
        let frame_url = match page_url {
            Some(base) => base.join(viewer_url),
            None => Url::parse(viewer_url),
        }
        .map_err(|_| Error::ReferenceNotFound(NotFoundReason::InvalidFrameUrl))?;

        let page = page_url.map(Url::as_str).unwrap_or_default();
        decode_viewer_url(&frame_url, page)
    }
}

fn first_param(url: &Url, name: &str) -> Option<String> {
    url.query_pairs()
        .find(|(key, _)| key == name)
        .map(|(_, value)| value.into_owned())
}

fn decode_viewer_url(frame_url: &Url, page_url: &str) -> Result<DocumentReference> {
    let file = first_param(frame_url, FILE_PARAM)
        .filter(|file| !file.is_empty())
        .ok_or(Error::ReferenceNotFound(NotFoundReason::MissingFileParameter))?;

    let source_url = decode_component(&file)
        .ok_or(Error::ReferenceNotFound(NotFoundReason::InvalidSourceUrl))?;

    let headers = first_param(frame_url, HEADERS_PARAM)
        .filter(|raw| !raw.is_empty())
        .map(|raw| decode_headers(&raw))
        .unwrap_or_default();
    trace!(count = headers.len(), "Decoded request headers");

    let reference =
        DocumentReference::new(source_url, headers, frame_url.as_str(), page_url)?;
    debug!(
        source = %reference.source_url,
        name = %reference.suggested_name,
        "Extracted document reference"
    );
    Ok(reference)
}
