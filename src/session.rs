//! Per-page session state.
//!
//! A [`PageSession`] owns everything that lives as long as one visit to a
//! material-detail page: the last extracted reference, whether detection has
//! succeeded, and the cancellation token of the running poll. Navigation
//! resets all of it.

use std::sync::{Mutex, PoisonError};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::sync::{RwLock, broadcast};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use url::Url;

use crate::error::{Error, NotFoundReason, Result};
use crate::extract::Extractor;
use crate::page::{PageSource, ensure_supported};
use crate::poll::{PollOutcome, PollPolicy, poll_until};
use crate::reference::DocumentReference;
use crate::retrieve::{FileSaver, Retrieval, Retriever};

/// Signals from the host environment
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PageEvent {
    /// The current page finished loading
    Ready,
    /// The host moved to another address
    Navigated(Url),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StatusLevel {
    Info,
    Success,
    Error,
}

/// A status line for the UI layer
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusEvent {
    pub level: StatusLevel,
    pub message: String,
}

#[derive(Debug, Clone, Copy)]
pub struct SessionSettings {
    pub poll: PollPolicy,
    /// Pause before the first extraction so the page's scripts can settle
    pub settle: Duration,
}

impl Default for SessionSettings {
    fn default() -> Self {
        Self {
            poll: PollPolicy::default(),
            settle: Duration::from_millis(1000),
        }
    }
}

#[derive(Debug)]
struct SessionState {
    page_url: Url,
    last_reference: Option<DocumentReference>,
    initialized: bool,
    generation: u64,
    cancel: CancellationToken,
}

pub struct PageSession<S> {
    source: PageSource,
    extractor: Extractor,
    retriever: Retriever<S>,
    settings: SessionSettings,
    state: RwLock<SessionState>,
    status_tx: broadcast::Sender<StatusEvent>,
}

impl<S: FileSaver> PageSession<S> {
    pub fn new(
        source: PageSource,
        page_url: Url,
        extractor: Extractor,
        retriever: Retriever<S>,
        settings: SessionSettings,
    ) -> Self {
        let (status_tx, _) = broadcast::channel(32);
        Self {
            source,
            extractor,
            retriever,
            settings,
            state: RwLock::new(SessionState {
                page_url,
                last_reference: None,
                initialized: false,
                generation: 0,
                cancel: CancellationToken::new(),
            }),
            status_tx,
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<StatusEvent> {
        self.status_tx.subscribe()
    }

    fn notify(&self, level: StatusLevel, message: impl Into<String>) {
        let message = message.into();
        debug!(?level, message = %message, "Status");
        // No subscribers is fine
        let _ = self.status_tx.send(StatusEvent { level, message });
    }

    pub async fn page_url(&self) -> Url {
        self.state.read().await.page_url.clone()
    }

    pub async fn last_reference(&self) -> Option<DocumentReference> {
        self.state.read().await.last_reference.clone()
    }

    pub async fn is_initialized(&self) -> bool {
        self.state.read().await.initialized
    }

    /// Forget everything about the previous page and stop its poll.
    async fn reset(&self, page_url: Option<Url>) -> (u64, CancellationToken, Url) {
        let mut state = self.state.write().await;
        state.cancel.cancel();
        state.cancel = CancellationToken::new();
        state.last_reference = None;
        state.initialized = false;
        state.generation += 1;
        if let Some(url) = page_url {
            state.page_url = url;
        }
        debug!(generation = state.generation, page = %state.page_url, "Session reset");
        (state.generation, state.cancel.clone(), state.page_url.clone())
    }

    /// Store a reference unless a newer page has taken over meanwhile.
    async fn store(&self, generation: u64, reference: &DocumentReference) -> bool {
        let mut state = self.state.write().await;
        if state.generation != generation {
            return false;
        }
        state.last_reference = Some(reference.clone());
        state.initialized = true;
        true
    }

    async fn load_and_extract(&self, page_url: &Url) -> Result<DocumentReference> {
        let page = self.source.load(self.retriever.client(), page_url).await?;
        self.extractor.extract(&page)
    }

    /// React to a host event: reset, let the page settle, then poll for the
    /// viewer frame.
    ///
    /// Returns `Ok(None)` when a later event cancelled this one.
    pub async fn handle_event(&self, event: PageEvent) -> Result<Option<DocumentReference>> {
        let navigated_to = match event {
            PageEvent::Ready => None,
            PageEvent::Navigated(url) => Some(url),
        };
        let (generation, cancel, page_url) = self.reset(navigated_to).await;

        if let Err(e) = ensure_supported(&page_url) {
            self.notify(StatusLevel::Error, e.to_string());
            return Err(e);
        }

        if !self.settings.settle.is_zero() {
            tokio::select! {
                _ = cancel.cancelled() => return Ok(None),
                _ = tokio::time::sleep(self.settings.settle) => {}
            }
        }

        let last_error = Mutex::new(None);
        let outcome = poll_until(self.settings.poll, &cancel, |_| {
            let page_url = &page_url;
            let last_error = &last_error;
            async move {
                match self.load_and_extract(page_url).await {
                    Ok(reference) => Some(reference),
                    Err(e) => {
                        *last_error.lock().unwrap_or_else(PoisonError::into_inner) = Some(e);
                        None
                    }
                }
            }
        })
        .await;
        debug!(attempts = outcome.attempts(), "Detection finished");

        match outcome {
            PollOutcome::Found { value, attempts } => {
                if !self.store(generation, &value).await {
                    return Ok(None);
                }
                info!(attempts, source = %value.source_url, "PDF reference detected");
                self.notify(
                    StatusLevel::Success,
                    "PDF detected, ready to download",
                );
                Ok(Some(value))
            }
            PollOutcome::Exhausted { attempts } => {
                let error = last_error
                    .into_inner()
                    .unwrap_or_else(PoisonError::into_inner)
                    .unwrap_or(Error::ReferenceNotFound(NotFoundReason::NoFrame));
                warn!(attempts, error = %error, "Gave up waiting for the PDF viewer");
                self.notify(
                    StatusLevel::Error,
                    "No PDF detected on this page, reload it and try again",
                );
                Err(error)
            }
            PollOutcome::Cancelled { attempts } => {
                debug!(attempts, "Detection cancelled by navigation");
                Ok(None)
            }
        }
    }

    /// Extract from the page as it is right now and remember the result.
    pub async fn current_reference(&self) -> Result<DocumentReference> {
        let (generation, page_url) = {
            let state = self.state.read().await;
            (state.generation, state.page_url.clone())
        };
        ensure_supported(&page_url)?;

        let reference = self.load_and_extract(&page_url).await?;
        self.store(generation, &reference).await;
        Ok(reference)
    }

    /// Download the document behind the held reference.
    ///
    /// The reference is read once, when the user acts; a detection finishing
    /// mid-download does not affect it.
    pub async fn download(&self) -> Result<Retrieval> {
        let held = self.last_reference().await;
        let initialized = self.is_initialized().await;
        debug!(held = held.is_some(), initialized, "Download requested");
        let reference = match held {
            Some(reference) => reference,
            None => match self.current_reference().await {
                Ok(reference) => reference,
                Err(e) => {
                    self.notify(StatusLevel::Error, "PDF information not found");
                    return Err(e);
                }
            },
        };

        self.notify(StatusLevel::Info, "Starting PDF download...");
        match self.retriever.retrieve(&reference).await {
            Ok(retrieval) => {
                debug!(
                    name = %retrieval.file_name,
                    bytes = retrieval.bytes,
                    object_url = %retrieval.object_url,
                    "Retrieval handed to saver"
                );
                self.notify(
                    StatusLevel::Success,
                    format!("Download started: {}", retrieval.ticket.destination.display()),
                );
                Ok(retrieval)
            }
            Err(e) => {
                self.notify(StatusLevel::Error, format!("Download failed: {e}"));
                Err(e)
            }
        }
    }
}
