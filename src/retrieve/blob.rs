//! Staged response bodies.
//!
//! A fetched document is parked in the [`BlobRegistry`] under an
//! [`ObjectUrl`] while a saver writes it out. Every object URL must be
//! revoked once the save has been handed off; revoking twice is harmless.

use std::collections::HashMap;
use std::fmt;
use std::sync::{Mutex, PoisonError};

use bytes::Bytes;
use tracing::trace;
use ulid::Ulid;

pub const PDF_MEDIA_TYPE: &str = "application/pdf";

#[derive(Debug, Clone)]
pub struct Blob {
    pub data: Bytes,
    pub media_type: &'static str,
}

impl Blob {
    pub fn new(data: impl Into<Bytes>, media_type: &'static str) -> Self {
        Self {
            data: data.into(),
            media_type,
        }
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ObjectUrl(Ulid);

impl fmt::Display for ObjectUrl {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "blob:smartedu-dl/{}", self.0)
    }
}

#[derive(Debug, Default)]
pub struct BlobRegistry {
    entries: Mutex<HashMap<Ulid, Blob>>,
}

impl BlobRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn create_object_url(&self, blob: Blob) -> ObjectUrl {
        let id = Ulid::new();
        trace!(id = %id, bytes = blob.len(), media_type = blob.media_type, "Staged blob");
        self.entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(id, blob);
        ObjectUrl(id)
    }

    /// The staged blob, if the URL has not been revoked yet
    pub fn resolve(&self, url: &ObjectUrl) -> Option<Blob> {
        self.entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&url.0)
            .cloned()
    }

    /// Release a staged blob. Returns whether anything was released.
    pub fn revoke(&self, url: &ObjectUrl) -> bool {
        let removed = self
            .entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&url.0)
            .is_some();
        if removed {
            trace!(url = %url, "Revoked object URL");
        }
        removed
    }

    /// Number of blobs still staged
    pub fn live(&self) -> usize {
        self.entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }
}
