//! Config module for smartedu-dl

use std::path::PathBuf;
use std::time::Duration;

use clap::{Parser, Subcommand, ValueEnum};
use url::Url;

use crate::extract::{
    DEFAULT_FRAME_PATH, DEFAULT_VIEWER_MARKER, Extractor, FrameLocator, InvalidPath,
    MarkerSelector, PositionalPath,
};
use crate::poll::PollPolicy;
use crate::retrieve::{
    AnchorSaver, ConfiguredSaver, DEFAULT_USER_AGENT, DownloadManagerSaver, TerminalPrompt,
};
use crate::session::SessionSettings;

pub const DEFAULT_PAGE_URL: &str = "https://basic.smartedu.cn/tchMaterial/detail";

#[derive(ValueEnum, Debug, Clone, Copy, Default, PartialEq, Eq)]
#[clap(rename_all = "lowercase")]
pub enum LocatorKind {
    /// Fixed positional path from the document root
    #[default]
    Path,
    /// First frame whose address contains the viewer marker
    Marker,
}

#[derive(ValueEnum, Debug, Clone, Copy, Default, PartialEq, Eq)]
#[clap(rename_all = "lowercase")]
pub enum SaveMode {
    /// Ask where to save each file
    Prompt,
    /// Save straight into the output directory
    #[default]
    Implicit,
}

#[derive(Parser, Debug, Clone)]
pub struct ExtractConfig {
    /// How the viewer frame is found
    #[clap(long, global = true, env = "SEDL_LOCATOR", value_enum, default_value = "path")]
    pub locator: LocatorKind,

    /// Positional path used by the `path` locator
    #[clap(long, global = true, env = "SEDL_FRAME_PATH", default_value = DEFAULT_FRAME_PATH)]
    pub frame_path: String,

    /// Substring identifying the viewer's address
    #[clap(long, global = true, env = "SEDL_VIEWER_MARKER", default_value = DEFAULT_VIEWER_MARKER)]
    pub viewer_marker: String,

    /// Address snapshots are attributed to
    #[clap(long, global = true, env = "SEDL_PAGE_URL", default_value = DEFAULT_PAGE_URL)]
    pub page_url: Url,
}

impl ExtractConfig {
    pub fn extractor(&self) -> Result<Extractor, InvalidPath> {
        let locator: Box<dyn FrameLocator> = match self.locator {
            LocatorKind::Path => Box::new(PositionalPath::parse(&self.frame_path)?),
            LocatorKind::Marker => Box::new(MarkerSelector::new(self.viewer_marker.clone())),
        };
        Ok(Extractor::new(locator, self.viewer_marker.clone()))
    }
}

#[derive(Parser, Debug, Clone)]
pub struct SessionConfig {
    /// Delay between detection attempts
    #[clap(long, global = true, env = "SEDL_POLL_INTERVAL_MS", default_value = "2000")]
    pub poll_interval_ms: u64,

    /// Detection attempts before giving up
    #[clap(long, global = true, env = "SEDL_POLL_MAX_ATTEMPTS", default_value = "10")]
    pub poll_max_attempts: u32,

    /// Pause after a page loads before the first attempt
    #[clap(long, global = true, env = "SEDL_SETTLE_MS", default_value = "1000")]
    pub settle_ms: u64,
}

impl SessionConfig {
    pub fn settings(&self) -> SessionSettings {
        SessionSettings {
            poll: PollPolicy {
                interval: Duration::from_millis(self.poll_interval_ms),
                max_attempts: self.poll_max_attempts.max(1),
            },
            settle: Duration::from_millis(self.settle_ms),
        }
    }
}

#[derive(Parser, Debug, Clone)]
pub struct RetrieveConfig {
    /// Directory downloads are saved to
    #[clap(long, global = true, env = "SEDL_OUTPUT_DIR")]
    pub output_dir: Option<PathBuf>,

    #[clap(long, global = true, env = "SEDL_SAVE_MODE", value_enum, default_value = "implicit")]
    pub save_mode: SaveMode,

    #[clap(long, global = true, env = "SEDL_USER_AGENT", default_value = DEFAULT_USER_AGENT)]
    pub user_agent: String,
}

/// The user's download directory, falling back to the working directory
fn default_output_dir() -> PathBuf {
    dirs::download_dir().unwrap_or_else(|| PathBuf::from("."))
}

impl RetrieveConfig {
    pub fn output_dir(&self) -> PathBuf {
        self.output_dir.clone().unwrap_or_else(default_output_dir)
    }

    /// Saver for the configured mode. Long-running commands read commands
    /// from the terminal themselves and pass `interactive = false`.
    pub fn saver(&self, interactive: bool) -> ConfiguredSaver {
        let dir = self.output_dir();
        match self.save_mode {
            SaveMode::Implicit => ConfiguredSaver::Anchor(AnchorSaver::new(dir)),
            SaveMode::Prompt if interactive => ConfiguredSaver::DownloadManager(
                DownloadManagerSaver::new(dir).with_prompt(std::sync::Arc::new(TerminalPrompt)),
            ),
            SaveMode::Prompt => {
                tracing::warn!("Save prompts are unavailable in this mode, saving without asking");
                ConfiguredSaver::DownloadManager(DownloadManagerSaver::new(dir))
            }
        }
    }
}

#[derive(Subcommand, Debug, Clone)]
pub enum Command {
    /// Print the PDF reference found in a page
    Extract {
        /// Snapshot path or page URL
        page: String,
    },
    /// Find the PDF in a page and download it
    Download {
        /// Snapshot path or page URL
        page: String,
    },
    /// Download straight from a viewer address
    Viewer {
        viewer_url: String,
        /// File to write instead of the suggested name
        #[clap(short, long)]
        output: Option<PathBuf>,
    },
    /// Follow a snapshot and download on request from the terminal
    Watch { snapshot: PathBuf },
    /// Serve the page-context API over HTTP
    Serve {
        snapshot: PathBuf,
        #[clap(long, env = "SEDL_HOST", default_value = "127.0.0.1:3939")]
        host: String,
    },
}

#[derive(Parser, Debug, Clone)]
#[command(name = "smartedu-dl", version, about = "Download textbook PDFs from smartedu material pages")]
pub struct Config {
    #[command(subcommand)]
    pub command: Command,

    #[clap(flatten)]
    pub extract: ExtractConfig,

    #[clap(flatten)]
    pub session: SessionConfig,

    #[clap(flatten)]
    pub retrieve: RetrieveConfig,
}

pub fn config() -> Config {
    Config::parse()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_apply() {
        let config = Config::try_parse_from(["smartedu-dl", "extract", "page.html"]).unwrap();
        assert_eq!(config.extract.locator, LocatorKind::Path);
        assert_eq!(config.extract.frame_path, DEFAULT_FRAME_PATH);
        assert_eq!(config.extract.page_url.as_str(), DEFAULT_PAGE_URL);
        assert_eq!(config.retrieve.save_mode, SaveMode::Implicit);

        let settings = config.session.settings();
        assert_eq!(settings.poll.interval, Duration::from_millis(2000));
        assert_eq!(settings.poll.max_attempts, 10);
        assert_eq!(settings.settle, Duration::from_millis(1000));
    }

    #[test]
    fn flags_after_subcommand() {
        let config = Config::try_parse_from([
            "smartedu-dl",
            "download",
            "page.html",
            "--locator",
            "marker",
            "--poll-max-attempts",
            "3",
            "--output-dir",
            "/tmp/books",
        ])
        .unwrap();
        assert_eq!(config.extract.locator, LocatorKind::Marker);
        assert_eq!(config.session.poll_max_attempts, 3);
        assert_eq!(config.retrieve.output_dir(), PathBuf::from("/tmp/books"));
        assert!(matches!(config.command, Command::Download { ref page } if page == "page.html"));
    }

    #[test]
    fn viewer_command_takes_output() {
        let config = Config::try_parse_from([
            "smartedu-dl",
            "viewer",
            "https://basic.smartedu.cn/pdfjs/web/viewer.html?file=x",
            "-o",
            "book.pdf",
        ])
        .unwrap();
        match config.command {
            Command::Viewer { output, .. } => assert_eq!(output, Some(PathBuf::from("book.pdf"))),
            other => panic!("unexpected command {other:?}"),
        }
    }

    #[test]
    fn bad_frame_path_is_rejected() {
        let config = Config::try_parse_from([
            "smartedu-dl",
            "extract",
            "page.html",
            "--frame-path",
            "body/div",
        ])
        .unwrap();
        assert!(config.extract.extractor().is_err());
    }

    #[test]
    fn locator_kinds_build_extractors() {
        let config = Config::try_parse_from(["smartedu-dl", "extract", "p", "--locator", "marker"]).unwrap();
        let extractor = config.extract.extractor().unwrap();
        assert_eq!(extractor.locator_name(), MarkerSelector::new("x").name());
    }

    #[test]
    fn invalid_page_url_is_rejected() {
        assert!(Config::try_parse_from(["smartedu-dl", "extract", "p", "--page-url", "nope"]).is_err());
    }
}
