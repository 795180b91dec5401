//! Error types shared by the extractor, retriever and page context.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Why an extraction attempt produced no reference.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NotFoundReason {
    /// The frame locator matched nothing
    NoFrame,
    /// The located frame has no address, or the address lacks the viewer marker
    NotViewer,
    /// The viewer address could not be parsed
    InvalidFrameUrl,
    /// The viewer address carries no document parameter
    MissingFileParameter,
    /// The document parameter did not decode to an absolute URL
    InvalidSourceUrl,
}

impl std::fmt::Display for NotFoundReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let reason = match self {
            Self::NoFrame => "viewer frame not found",
            Self::NotViewer => "frame is not the document viewer",
            Self::InvalidFrameUrl => "viewer address is not a valid URL",
            Self::MissingFileParameter => "viewer address has no file parameter",
            Self::InvalidSourceUrl => "document address is not a valid URL",
        };
        f.write_str(reason)
    }
}

#[derive(Error, Debug)]
pub enum Error {
    #[error("PDF reference not found: {0}")]
    ReferenceNotFound(NotFoundReason),

    #[error("Unsupported page: {0}")]
    UnsupportedPage(String),

    #[error("PDF reference is incomplete")]
    IncompleteReference,

    #[error("HTTP error: {status} {reason}")]
    HttpStatus { status: u16, reason: String },

    #[error("Network error: {0}")]
    Network(String),

    #[error("Request error: {0}")]
    Request(#[from] reqwest::Error),

    #[error("Save failed: {0}")]
    Save(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Page context is unreachable")]
    ContextUnreachable,
}

/// Coarse classification reported to the UI layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    ReferenceNotFound,
    UnsupportedPage,
    IncompleteReference,
    Network,
    Save,
    ContextUnreachable,
}

impl Error {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::ReferenceNotFound(_) => ErrorKind::ReferenceNotFound,
            Error::UnsupportedPage(_) => ErrorKind::UnsupportedPage,
            Error::IncompleteReference => ErrorKind::IncompleteReference,
            Error::HttpStatus { .. } | Error::Network(_) | Error::Request(_) => ErrorKind::Network,
            Error::Save(_) | Error::Io(_) => ErrorKind::Save,
            Error::ContextUnreachable => ErrorKind::ContextUnreachable,
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;
