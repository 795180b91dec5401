//! Save primitives.
//!
//! Two ways of writing a staged blob to disk, mirroring the two ways a
//! browser saves a generated file: the download manager (optionally asking
//! for a location first, completing in the background) and the implicit
//! anchor-style save straight into the download folder.

use std::fmt;
use std::future::Future;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio::sync::watch;
use tracing::{debug, error, info, warn};
use ulid::Ulid;

use super::blob::{BlobRegistry, ObjectUrl};
use crate::error::{Error, Result};
use crate::reference::fallback_name;

/// State of a save operation
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub enum SaveState {
    /// The file is being written
    InProgress,
    /// The file has been written
    Complete(PathBuf),
    /// Writing stopped before completion
    Interrupted(String),
}

impl fmt::Display for SaveState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InProgress => write!(f, "In progress"),
            Self::Complete(path) => write!(f, "Complete: {}", path.display()),
            Self::Interrupted(reason) => write!(f, "Interrupted: {}", reason),
        }
    }
}

/// Handle for observing a save that has been started.
#[derive(Debug, Clone)]
pub struct SaveTicket {
    pub id: Ulid,
    pub destination: PathBuf,
    state_rx: watch::Receiver<SaveState>,
}

impl SaveTicket {
    pub(crate) fn new(destination: PathBuf, state_rx: watch::Receiver<SaveState>) -> Self {
        Self {
            id: Ulid::new(),
            destination,
            state_rx,
        }
    }

    /// A ticket for a save that finished synchronously
    pub(crate) fn completed(destination: PathBuf) -> Self {
        let (_, state_rx) = watch::channel(SaveState::Complete(destination.clone()));
        Self::new(destination, state_rx)
    }

    pub fn state(&self) -> SaveState {
        self.state_rx.borrow().clone()
    }

    /// Wait for a terminal state and return the written path.
    pub async fn wait_until_done(&mut self) -> Result<PathBuf> {
        loop {
            match self.state() {
                SaveState::Complete(path) => return Ok(path),
                SaveState::Interrupted(reason) => return Err(Error::Save(reason)),
                SaveState::InProgress => {}
            }

            if self.state_rx.changed().await.is_err() {
                // Sender gone; the last published value is final
                return match self.state() {
                    SaveState::Complete(path) => Ok(path),
                    SaveState::Interrupted(reason) => Err(Error::Save(reason)),
                    SaveState::InProgress => Err(Error::Save(
                        "save task ended without reporting a result".to_string(),
                    )),
                };
            }
        }
    }
}

pub trait FileSaver: Send + Sync {
    /// Start writing the blob behind `url` under `file_name`.
    ///
    /// Returns once the save has been initiated, not necessarily finished.
    fn save(
        &self,
        blobs: &BlobRegistry,
        url: &ObjectUrl,
        file_name: &str,
    ) -> impl Future<Output = Result<SaveTicket>> + Send;
}

/// Asks the user where to save a file.
pub trait SavePrompt: Send + Sync {
    /// `None` means the user declined to save.
    fn choose(&self, suggested: &Path) -> Option<PathBuf>;
}

/// Prompts on the terminal, accepting the suggestion on an empty answer.
#[derive(Debug, Default, Clone, Copy)]
pub struct TerminalPrompt;

impl SavePrompt for TerminalPrompt {
    fn choose(&self, suggested: &Path) -> Option<PathBuf> {
        use std::io::Write;

        eprint!("Save as [{}] (\"-\" to cancel): ", suggested.display());
        let _ = std::io::stderr().flush();

        let mut answer = String::new();
        if std::io::stdin().read_line(&mut answer).is_err() {
            return None;
        }
        match answer.trim() {
            "" => Some(suggested.to_path_buf()),
            "-" => None,
            path => Some(PathBuf::from(path)),
        }
    }
}

/// Replace characters that cannot appear in a single file name.
pub fn sanitize_file_name(name: &str) -> String {
    let cleaned: String = name
        .chars()
        .map(|c| match c {
            '/' | '\\' | ':' | '*' | '?' | '"' | '<' | '>' | '|' => '_',
            c if c.is_control() => '_',
            c => c,
        })
        .collect();
    let cleaned = cleaned.trim().trim_matches('.').to_string();
    if cleaned.is_empty() {
        fallback_name()
    } else {
        cleaned
    }
}

/// First free path in `dir` for `file_name`, adding ` (n)` before the
/// extension when the name is taken.
pub fn unique_destination(dir: &Path, file_name: &str) -> PathBuf {
    let candidate = dir.join(file_name);
    if !candidate.exists() {
        return candidate;
    }

    let path = Path::new(file_name);
    let stem = path
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| file_name.to_string());
    let extension = path
        .extension()
        .map(|e| format!(".{}", e.to_string_lossy()))
        .unwrap_or_default();

    (1..)
        .map(|n| dir.join(format!("{stem} ({n}){extension}")))
        .find(|p| !p.exists())
        .unwrap_or(candidate)
}

/// Anchor-style save: writes into the output directory without asking.
#[derive(Debug, Clone)]
pub struct AnchorSaver {
    dir: PathBuf,
}

impl AnchorSaver {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }
}

impl FileSaver for AnchorSaver {
    async fn save(&self, blobs: &BlobRegistry, url: &ObjectUrl, file_name: &str) -> Result<SaveTicket> {
        let blob = blobs
            .resolve(url)
            .ok_or_else(|| Error::Save(format!("{url} has been revoked")))?;

        tokio::fs::create_dir_all(&self.dir).await?;
        let destination = unique_destination(&self.dir, &sanitize_file_name(file_name));
        tokio::fs::write(&destination, &blob.data).await?;

        info!(path = ?destination, bytes = blob.len(), "Saved file");
        Ok(SaveTicket::completed(destination))
    }
}

/// Download-manager save: optionally asks for a location, then writes in
/// the background and reports progress through the ticket.
#[derive(Clone)]
pub struct DownloadManagerSaver {
    dir: PathBuf,
    prompt: Option<Arc<dyn SavePrompt>>,
}

impl fmt::Debug for DownloadManagerSaver {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DownloadManagerSaver")
            .field("dir", &self.dir)
            .field("save_as", &self.prompt.is_some())
            .finish()
    }
}

impl DownloadManagerSaver {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            prompt: None,
        }
    }

    /// Ask for a save location before every save
    pub fn with_prompt(mut self, prompt: Arc<dyn SavePrompt>) -> Self {
        self.prompt = Some(prompt);
        self
    }
}

impl FileSaver for DownloadManagerSaver {
    async fn save(&self, blobs: &BlobRegistry, url: &ObjectUrl, file_name: &str) -> Result<SaveTicket> {
        let blob = blobs
            .resolve(url)
            .ok_or_else(|| Error::Save(format!("{url} has been revoked")))?;

        let suggested = unique_destination(&self.dir, &sanitize_file_name(file_name));
        let destination = match &self.prompt {
            Some(prompt) => {
                let prompt = Arc::clone(prompt);
                let suggested = suggested.clone();
                tokio::task::spawn_blocking(move || prompt.choose(&suggested))
                    .await
                    .map_err(|e| Error::Save(e.to_string()))?
                    .ok_or_else(|| Error::Save("save cancelled by user".to_string()))?
            }
            None => suggested,
        };

        let (state_tx, state_rx) = watch::channel(SaveState::InProgress);
        let ticket = SaveTicket::new(destination.clone(), state_rx);
        debug!(id = %ticket.id, path = ?destination, "Save started");

        tokio::spawn(async move {
            if let Some(parent) = destination.parent().filter(|p| !p.as_os_str().is_empty()) {
                if let Err(e) = tokio::fs::create_dir_all(parent).await {
                    warn!(error = %e, path = ?parent, "Failed to create save directory");
                }
            }

            let state = match tokio::fs::write(&destination, &blob.data).await {
                Ok(()) => {
                    info!(path = ?destination, bytes = blob.len(), "Saved file");
                    SaveState::Complete(destination)
                }
                Err(e) => {
                    error!(error = %e, path = ?destination, "Save interrupted");
                    let _ = tokio::fs::remove_file(&destination).await;
                    SaveState::Interrupted(e.to_string())
                }
            };
            let _ = state_tx.send(state);
        });

        Ok(ticket)
    }
}

/// Writes to one fixed path, replacing whatever is there. The suggested
/// name is ignored.
#[derive(Debug, Clone)]
pub struct ExactPathSaver {
    path: PathBuf,
}

impl ExactPathSaver {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

impl FileSaver for ExactPathSaver {
    async fn save(&self, blobs: &BlobRegistry, url: &ObjectUrl, _file_name: &str) -> Result<SaveTicket> {
        let blob = blobs
            .resolve(url)
            .ok_or_else(|| Error::Save(format!("{url} has been revoked")))?;

        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::write(&self.path, &blob.data).await?;

        info!(path = ?self.path, bytes = blob.len(), "Saved file");
        Ok(SaveTicket::completed(self.path.clone()))
    }
}

/// The saver chosen at runtime from the configured save mode.
#[derive(Debug, Clone)]
pub enum ConfiguredSaver {
    Anchor(AnchorSaver),
    DownloadManager(DownloadManagerSaver),
    /// An explicit output file
    ExactPath(ExactPathSaver),
}

impl FileSaver for ConfiguredSaver {
    async fn save(&self, blobs: &BlobRegistry, url: &ObjectUrl, file_name: &str) -> Result<SaveTicket> {
        match self {
            Self::Anchor(saver) => saver.save(blobs, url, file_name).await,
            Self::DownloadManager(saver) => saver.save(blobs, url, file_name).await,
            Self::ExactPath(saver) => saver.save(blobs, url, file_name).await,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::retrieve::blob::{Blob, PDF_MEDIA_TYPE};

    struct FixedPrompt(Option<PathBuf>);

    impl SavePrompt for FixedPrompt {
        fn choose(&self, _suggested: &Path) -> Option<PathBuf> {
            self.0.clone()
        }
    }

    fn staged(data: &'static [u8]) -> (BlobRegistry, ObjectUrl) {
        let blobs = BlobRegistry::new();
        let url = blobs.create_object_url(Blob::new(bytes::Bytes::from_static(data), PDF_MEDIA_TYPE));
        (blobs, url)
    }

    #[test]
    fn sanitizes_separators() {
        assert_eq!(sanitize_file_name("a/b\\c.pdf"), "a_b_c.pdf");
        assert_eq!(sanitize_file_name("数学 必修.pdf"), "数学 必修.pdf");
        assert!(sanitize_file_name("  ").starts_with(crate::reference::FALLBACK_NAME_PREFIX));
    }

    #[test]
    fn unique_destination_appends_counter() {
        let dir = tempfile::tempdir().unwrap();
        assert_eq!(unique_destination(dir.path(), "a.pdf"), dir.path().join("a.pdf"));

        std::fs::write(dir.path().join("a.pdf"), b"x").unwrap();
        assert_eq!(unique_destination(dir.path(), "a.pdf"), dir.path().join("a (1).pdf"));

        std::fs::write(dir.path().join("a (1).pdf"), b"x").unwrap();
        assert_eq!(unique_destination(dir.path(), "a.pdf"), dir.path().join("a (2).pdf"));
    }

    #[tokio::test]
    async fn anchor_saver_writes_into_dir() {
        let dir = tempfile::tempdir().unwrap();
        let (blobs, url) = staged(b"%PDF-anchor");

        let mut ticket = AnchorSaver::new(dir.path())
            .save(&blobs, &url, "math.pdf")
            .await
            .unwrap();
        let path = ticket.wait_until_done().await.unwrap();
        assert_eq!(path, dir.path().join("math.pdf"));
        assert_eq!(std::fs::read(&path).unwrap(), b"%PDF-anchor");
    }

    #[tokio::test]
    async fn exact_path_saver_replaces_existing_file() {
        let dir = tempfile::tempdir().unwrap();
        let target = dir.path().join("nested").join("my book.pdf");
        std::fs::create_dir_all(target.parent().unwrap()).unwrap();
        std::fs::write(&target, b"old").unwrap();
        let (blobs, url) = staged(b"%PDF-exact");

        let mut ticket = ExactPathSaver::new(&target)
            .save(&blobs, &url, "ignored.pdf")
            .await
            .unwrap();
        assert_eq!(ticket.wait_until_done().await.unwrap(), target);
        assert_eq!(std::fs::read(&target).unwrap(), b"%PDF-exact");
        assert!(!target.with_file_name("my book (1).pdf").exists());
    }

    #[tokio::test]
    async fn revoked_url_fails_to_save() {
        let dir = tempfile::tempdir().unwrap();
        let (blobs, url) = staged(b"gone");
        blobs.revoke(&url);

        let err = AnchorSaver::new(dir.path())
            .save(&blobs, &url, "gone.pdf")
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Save(_)));
    }

    #[tokio::test]
    async fn download_manager_completes_in_background() {
        let dir = tempfile::tempdir().unwrap();
        let (blobs, url) = staged(b"%PDF-manager");

        let mut ticket = DownloadManagerSaver::new(dir.path())
            .save(&blobs, &url, "book.pdf")
            .await
            .unwrap();
        // The blob can go away once the save has started
        blobs.revoke(&url);

        let path = ticket.wait_until_done().await.unwrap();
        assert_eq!(std::fs::read(&path).unwrap(), b"%PDF-manager");
        assert_eq!(ticket.state(), SaveState::Complete(path));
    }

    #[tokio::test]
    async fn prompt_chooses_destination() {
        let dir = tempfile::tempdir().unwrap();
        let chosen = dir.path().join("elsewhere").join("picked.pdf");
        let (blobs, url) = staged(b"%PDF-picked");

        let saver = DownloadManagerSaver::new(dir.path())
            .with_prompt(Arc::new(FixedPrompt(Some(chosen.clone()))));
        let mut ticket = saver.save(&blobs, &url, "book.pdf").await.unwrap();
        assert_eq!(ticket.destination, chosen);
        assert_eq!(ticket.wait_until_done().await.unwrap(), chosen);
    }

    #[tokio::test]
    async fn declined_prompt_is_a_save_failure() {
        let dir = tempfile::tempdir().unwrap();
        let (blobs, url) = staged(b"%PDF");

        let saver = DownloadManagerSaver::new(dir.path()).with_prompt(Arc::new(FixedPrompt(None)));
        let err = saver.save(&blobs, &url, "book.pdf").await.unwrap_err();
        assert!(err.to_string().contains("cancelled"));
        assert!(!dir.path().join("book.pdf").exists());
    }
}
