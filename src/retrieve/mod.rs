//! Document retrieval.
//!
//! Fetches the document a [`DocumentReference`] points at, with the captured
//! headers replayed verbatim, and hands the body to a [`FileSaver`].
//! A retrieval is one request: no retries, no resumption.

mod blob;
mod save;

use std::sync::Arc;

use reqwest::{
    Client,
    header::{self, HeaderMap, HeaderName, HeaderValue},
};
use tracing::{debug, info, instrument, trace, warn};

pub use blob::{Blob, BlobRegistry, ObjectUrl, PDF_MEDIA_TYPE};
pub use save::{
    AnchorSaver, ConfiguredSaver, DownloadManagerSaver, ExactPathSaver, FileSaver, SaveTicket,
    TerminalPrompt,
};

use crate::error::{Error, Result};
use crate::reference::DocumentReference;

pub const DEFAULT_USER_AGENT: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36";

/// HTTP client shared by page loading and retrieval.
pub fn build_client(user_agent: &str) -> Result<Client> {
    let mut headers = HeaderMap::new();
    headers.insert(
        header::ACCEPT,
        HeaderValue::from_static("application/pdf,application/octet-stream,*/*"),
    );

    Client::builder()
        .user_agent(user_agent)
        .default_headers(headers)
        .build()
        .map_err(Error::from)
}

/// Convert decoded headers into a request header map without touching
/// names or values beyond what HTTP requires.
fn request_headers(headers: &std::collections::HashMap<String, String>) -> Result<HeaderMap> {
    let mut map = HeaderMap::with_capacity(headers.len());
    for (name, value) in headers {
        let header_name = HeaderName::from_bytes(name.as_bytes())
            .map_err(|_| Error::Network(format!("invalid request header name `{name}`")))?;
        let header_value = HeaderValue::from_str(value)
            .map_err(|_| Error::Network(format!("invalid value for request header `{name}`")))?;
        map.insert(header_name, header_value);
    }
    Ok(map)
}

/// Whether a response's media type can carry the document.
fn is_document_media_type(content_type: &str) -> bool {
    let content_type = content_type.to_ascii_lowercase();
    content_type.contains("pdf") || content_type.contains("octet-stream")
}

/// A save that has been started.
#[derive(Debug, Clone)]
pub struct Retrieval {
    pub file_name: String,
    pub bytes: u64,
    /// `Content-Type` the host answered with, if any
    pub content_type: Option<String>,
    pub object_url: ObjectUrl,
    pub ticket: SaveTicket,
}

pub struct Retriever<S> {
    client: Client,
    saver: S,
    blobs: Arc<BlobRegistry>,
}

impl<S: FileSaver> Retriever<S> {
    pub fn new(client: Client, saver: S) -> Self {
        Self {
            client,
            saver,
            blobs: Arc::new(BlobRegistry::new()),
        }
    }

    pub fn client(&self) -> &Client {
        &self.client
    }

    #[cfg(test)]
    pub fn blobs(&self) -> &Arc<BlobRegistry> {
        &self.blobs
    }

    /// Fetch the referenced document and start saving it.
    #[instrument(name = "retrieve", level = "debug", skip_all, fields(url = %reference.source_url))]
    pub async fn retrieve(&self, reference: &DocumentReference) -> Result<Retrieval> {
        if reference.source_url.is_empty() {
            return Err(Error::IncompleteReference);
        }

        let headers = request_headers(&reference.headers)?;
        debug!(headers = headers.len(), "Requesting document");

        let response = self
            .client
            .get(reference.source_url.as_str())
            .headers(headers)
            .send()
            .await?;

        let status = response.status();
        trace!(status = %status, "Got response");
        if !status.is_success() {
            return Err(Error::HttpStatus {
                status: status.as_u16(),
                reason: status.canonical_reason().unwrap_or_default().to_string(),
            });
        }

        let content_type = response
            .headers()
            .get(header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);
        match content_type.as_deref() {
            Some(received) if !is_document_media_type(received) => {
                warn!(content_type = %received, "Response does not look like a PDF, saving anyway");
            }
            _ => {}
        }

        let data = response.bytes().await?;
        let bytes = data.len() as u64;
        let object_url = self.blobs.create_object_url(Blob::new(data, PDF_MEDIA_TYPE));

        let saved = self
            .saver
            .save(&self.blobs, &object_url, &reference.suggested_name)
            .await;
        self.blobs.revoke(&object_url);
        let ticket = saved?;

        // Release again once the save reaches a terminal state
        let blobs = Arc::clone(&self.blobs);
        let mut watcher = ticket.clone();
        tokio::spawn(async move {
            let result = watcher.wait_until_done().await;
            blobs.revoke(&object_url);
            trace!(
                url = %object_url,
                ok = result.is_ok(),
                staged = blobs.live(),
                "Save reached terminal state"
            );
        });

        info!(
            bytes,
            name = %reference.suggested_name,
            path = ?ticket.destination,
            "Download started"
        );
        Ok(Retrieval {
            file_name: reference.suggested_name.clone(),
            bytes,
            content_type,
            object_url,
            ticket,
        })
    }
}
