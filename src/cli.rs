//! Command drivers.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use color_eyre::eyre::{Result, WrapErr, bail};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::info;
use url::Url;

use crate::config::{Command, Config};
use crate::messaging::{ContextClient, ContextRequest, ContextResponse, spawn_page_context};
use crate::page::PageSource;
use crate::reference::DocumentReference;
use crate::retrieve::{ConfiguredSaver, ExactPathSaver, Retriever, build_client};
use crate::router::create_router;
use crate::session::{PageEvent, PageSession, SessionSettings, StatusEvent, StatusLevel};
use crate::watch::{DEBOUNCE, SnapshotWatcher, spawn_navigation_task};

const WATCH_HELP: &str = "commands: [d]ownload, [i]nfo, [r]eload, [q]uit";

pub async fn run(config: Config) -> Result<()> {
    match &config.command {
        Command::Extract { page } => {
            let reference = detect_once(&config, page).await?;
            println!("{}", serde_json::to_string_pretty(&reference)?);
        }
        Command::Download { page } => {
            let session = one_shot_session(&config, page)?;
            detect(&session).await?;
            let mut retrieval = session.download().await?;
            let path = retrieval.ticket.wait_until_done().await?;
            println!("{}", path.display());
        }
        Command::Viewer { viewer_url, output } => {
            let path = download_viewer(&config, viewer_url, output.as_deref()).await?;
            println!("{}", path.display());
        }
        Command::Watch { snapshot } => watch(&config, snapshot).await?,
        Command::Serve { snapshot, host } => serve(&config, snapshot, host).await?,
    }
    Ok(())
}

fn page_session(
    config: &Config,
    source: PageSource,
    settings: SessionSettings,
    interactive: bool,
) -> Result<PageSession<ConfiguredSaver>> {
    let extractor = config.extract.extractor().wrap_err("invalid --frame-path")?;
    let client = build_client(&config.retrieve.user_agent)?;
    let page_url = match &source {
        PageSource::Remote(url) => url.clone(),
        PageSource::Snapshot(_) => config.extract.page_url.clone(),
    };
    info!(locator = extractor.locator_name(), page = %page_url, "Starting page session");

    Ok(PageSession::new(
        source,
        page_url,
        extractor,
        Retriever::new(client, config.retrieve.saver(interactive)),
        settings,
    ))
}

/// A session for a command that looks at one page and exits.
fn one_shot_session(config: &Config, page: &str) -> Result<PageSession<ConfiguredSaver>> {
    let settings = SessionSettings {
        settle: Duration::ZERO,
        ..config.session.settings()
    };
    page_session(config, PageSource::from_arg(page), settings, true)
}

async fn detect(session: &PageSession<ConfiguredSaver>) -> Result<DocumentReference> {
    match session.handle_event(PageEvent::Ready).await? {
        Some(reference) => Ok(reference),
        None => bail!("detection was cancelled"),
    }
}

async fn detect_once(config: &Config, page: &str) -> Result<DocumentReference> {
    let session = one_shot_session(config, page)?;
    detect(&session).await
}

async fn download_viewer(config: &Config, viewer_url: &str, output: Option<&Path>) -> Result<PathBuf> {
    let extractor = config.extract.extractor().wrap_err("invalid --frame-path")?;
    let reference = extractor.from_viewer_url(viewer_url, None)?;

    let saver = match output {
        Some(path) => ConfiguredSaver::ExactPath(ExactPathSaver::new(path)),
        None => config.retrieve.saver(true),
    };

    let client = build_client(&config.retrieve.user_agent)?;
    let retriever = Retriever::new(client, saver);
    let mut retrieval = retriever.retrieve(&reference).await?;
    Ok(retrieval.ticket.wait_until_done().await?)
}

fn print_status(event: &StatusEvent) {
    let tag = match event.level {
        StatusLevel::Info => "..",
        StatusLevel::Success => "ok",
        StatusLevel::Error => "!!",
    };
    eprintln!("[{tag}] {}", event.message);
}

fn spawn_status_printer(mut rx: broadcast::Receiver<StatusEvent>) -> JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            match rx.recv().await {
                Ok(event) => print_status(&event),
                Err(broadcast::error::RecvError::Lagged(_)) => continue,
                Err(broadcast::error::RecvError::Closed) => break,
            }
        }
    })
}

fn report(response: &ContextResponse) -> Result<()> {
    if response.success {
        if let Some(reference) = &response.data {
            println!("{}", serde_json::to_string_pretty(reference)?);
        }
        if let Some(message) = &response.message {
            println!("{message}");
        }
    } else {
        eprintln!(
            "error: {}",
            response.error.as_deref().unwrap_or("request failed")
        );
    }
    Ok(())
}

/// Everything a long-running command needs: the page context, its client,
/// and the watcher feeding it navigations.
struct LiveContext {
    client: ContextClient,
    page_url: Url,
    watcher: SnapshotWatcher,
    tasks: Vec<JoinHandle<()>>,
}

impl LiveContext {
    async fn start(config: &Config, snapshot: &Path) -> Result<Self> {
        let session = Arc::new(page_session(
            config,
            PageSource::Snapshot(snapshot.to_path_buf()),
            config.session.settings(),
            false,
        )?);
        let page_url = session.page_url().await;

        let printer = spawn_status_printer(session.subscribe());
        let (client, context) = spawn_page_context(session);

        let mut watcher = SnapshotWatcher::new();
        watcher
            .watch(snapshot)
            .wrap_err_with(|| format!("failed to watch {}", snapshot.display()))?;
        let navigation =
            spawn_navigation_task(watcher.subscribe(), client.clone(), page_url.clone(), DEBOUNCE);

        // The page is already loaded
        client
            .request(ContextRequest::Navigate(page_url.clone()))
            .await;

        Ok(Self {
            client,
            page_url,
            watcher,
            tasks: vec![printer, context, navigation],
        })
    }

    fn stop(self) {
        for task in self.tasks {
            task.abort();
        }
    }
}

async fn watch(config: &Config, snapshot: &Path) -> Result<()> {
    let live = LiveContext::start(config, snapshot).await?;
    eprintln!("Watching {} as {}", snapshot.display(), live.page_url);
    eprintln!("{WATCH_HELP}");

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    while let Some(line) = lines.next_line().await? {
        match line.trim() {
            "" => {}
            "d" | "download" => report(&live.client.request(ContextRequest::Download).await)?,
            "i" | "info" => report(&live.client.request(ContextRequest::GetReference).await)?,
            "r" | "reload" => live.watcher.trigger(snapshot.to_path_buf()),
            "q" | "quit" => break,
            _ => eprintln!("{WATCH_HELP}"),
        }
    }

    live.stop();
    Ok(())
}

async fn serve(config: &Config, snapshot: &Path, host: &str) -> Result<()> {
    let live = LiveContext::start(config, snapshot).await?;
    let app = create_router(live.client.clone());

    let listener = tokio::net::TcpListener::bind(host)
        .await
        .wrap_err_with(|| format!("failed to bind {host}"))?;
    info!("Listening on: {}", listener.local_addr()?);
    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
        })
        .await?;

    live.stop();
    Ok(())
}
