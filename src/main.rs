mod cli;
mod config;
mod error;
mod extract;
mod messaging;
mod page;
mod poll;
mod reference;
mod retrieve;
mod router;
mod session;
mod watch;

#[cfg(test)]
mod test_support;

use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> color_eyre::Result<()> {
    dotenvy::dotenv().ok();
    color_eyre::install()?;
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("smartedu_dl=info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let config = config::config();
    tracing::debug!(command = ?config.command, "Parsed configuration");
    cli::run(config).await
}
