//! The boundary between the page context and everything that talks to it.
//!
//! The page context is a task owning a [`PageSession`]. Callers hold a
//! [`ContextClient`] and exchange request/response pairs over channels; when
//! the task is gone they get a `context_unreachable` response, never a hang.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, warn};
use url::Url;

use crate::error::{Error, ErrorKind};
use crate::reference::DocumentReference;
use crate::retrieve::FileSaver;
use crate::session::{PageEvent, PageSession};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ContextRequest {
    /// Extract from the current page and return the reference
    GetReference,
    /// Download the held reference
    Download,
    /// The host moved to a new address
    Navigate(Url),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContextResponse {
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<DocumentReference>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_kind: Option<ErrorKind>,
}

impl ContextResponse {
    pub fn reference(reference: DocumentReference) -> Self {
        Self {
            success: true,
            data: Some(reference),
            message: None,
            error: None,
            error_kind: None,
        }
    }

    pub fn message(message: impl Into<String>) -> Self {
        Self {
            success: true,
            data: None,
            message: Some(message.into()),
            error: None,
            error_kind: None,
        }
    }

    pub fn failure(error: &Error) -> Self {
        Self {
            success: false,
            data: None,
            message: None,
            error: Some(error.to_string()),
            error_kind: Some(error.kind()),
        }
    }

    pub fn unreachable() -> Self {
        Self::failure(&Error::ContextUnreachable)
    }
}

type Envelope = (ContextRequest, oneshot::Sender<ContextResponse>);

/// Handle for sending requests to a page context.
#[derive(Debug, Clone)]
pub struct ContextClient {
    tx: mpsc::Sender<Envelope>,
}

impl ContextClient {
    /// A client and the receiving end it talks to
    pub(crate) fn channel() -> (Self, mpsc::Receiver<Envelope>) {
        let (tx, rx) = mpsc::channel(16);
        (Self { tx }, rx)
    }

    pub async fn request(&self, request: ContextRequest) -> ContextResponse {
        let (reply_tx, reply_rx) = oneshot::channel();
        if self.tx.send((request, reply_tx)).await.is_err() {
            warn!("Page context is gone");
            return ContextResponse::unreachable();
        }
        reply_rx.await.unwrap_or_else(|_| {
            warn!("Page context dropped the request");
            ContextResponse::unreachable()
        })
    }
}

async fn handle_request<S: FileSaver>(
    session: &PageSession<S>,
    request: ContextRequest,
) -> ContextResponse {
    match request {
        ContextRequest::GetReference => match session.current_reference().await {
            Ok(reference) => ContextResponse::reference(reference),
            Err(e) => ContextResponse::failure(&e),
        },
        ContextRequest::Download => match session.download().await {
            Ok(retrieval) => ContextResponse::message(format!(
                "Download started: {}",
                retrieval.ticket.destination.display()
            )),
            Err(e) => ContextResponse::failure(&e),
        },
        // Handled by the caller, detection outlives the request
        ContextRequest::Navigate(_) => ContextResponse::message("Navigation accepted"),
    }
}

/// Run a page context for `session` until every client is dropped.
pub fn spawn_page_context<S>(session: Arc<PageSession<S>>) -> (ContextClient, JoinHandle<()>)
where
    S: FileSaver + 'static,
{
    let (client, mut rx) = ContextClient::channel();

    let handle = tokio::spawn(async move {
        while let Some((request, reply)) = rx.recv().await {
            debug!(?request, "Page context request");

            if let ContextRequest::Navigate(url) = &request {
                let session = Arc::clone(&session);
                let url = url.clone();
                tokio::spawn(async move {
                    if let Err(e) = session.handle_event(PageEvent::Navigated(url)).await {
                        debug!(error = %e, "Detection ended without a reference");
                    }
                });
            }

            let session = Arc::clone(&session);
            tokio::spawn(async move {
                let response = handle_request(&session, request).await;
                // The requester may have given up
                let _ = reply.send(response);
            });
        }
        debug!("Page context stopped");
    });

    (client, handle)
}
