use anyhow::Result;
use clap::Parser;
use std::path::PathBuf;
use tokio_util::sync::CancellationToken;

use poke::config::{self, Config};

#[derive(Parser)]
#[command(name = "poke-server", version)]
#[command(about = "Run configured commands on authenticated request", long_about = None)]
struct Cli {
    /// Config file path (default: first existing of /etc/poke/poke.yml, $XDG_CONFIG_HOME/poke/poke.yml, ~/config/poke/poke.yml, ~/.poke/poke.yml)
    #[arg(long, short, value_name = "PATH")]
    config: Option<PathBuf>,
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let (config, path) = match load(cli.config) {
        Ok(loaded) => loaded,
        Err(e) => {
            eprintln!("poke-server: config load: {:#}", e);
            std::process::exit(1);
        }
    };

    if let Err(e) = poke::logging::init(&config.logging) {
        eprintln!("poke-server: logging: {}", e);
        std::process::exit(1);
    }

    if let Err(e) = run(config, path).await {
        log::error!("server failed: {:#}", e);
        std::process::exit(1);
    }
}

fn load(explicit: Option<PathBuf>) -> Result<(Config, PathBuf)> {
    let path = config::find_config_path(explicit)?;
    let config = config::load_config(&path)?;
    Ok((config, path))
}

async fn run(config: Config, path: PathBuf) -> Result<()> {
    let cancel = CancellationToken::new();
    let runtime = poke::server::start(config, cancel.clone()).await?;
    log::info!("server started with config {}", path.display());

    if let Err(e) = shutdown_signal().await {
        log::error!("failed to wait for shutdown signal: {}", e);
    }
    log::info!("shutdown signal received, stopping listeners and dispatcher");
    cancel.cancel();
    runtime.shutdown().await;
    Ok(())
}

/// Completes when the process should shut down (SIGINT or SIGTERM).
async fn shutdown_signal() -> std::io::Result<()> {
    #[cfg(unix)]
    {
        let mut terminate =
            tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())?;
        tokio::select! {
            res = tokio::signal::ctrl_c() => res,
            _ = terminate.recv() => Ok(()),
        }
    }

    #[cfg(not(unix))]
    {
        tokio::signal::ctrl_c().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn cli_definition_is_valid() {
        Cli::command().debug_assert();
    }

    #[test]
    fn short_and_long_config_flags() {
        let cli = Cli::try_parse_from(["poke-server", "-c", "/tmp/a.yml"]).unwrap();
        assert_eq!(cli.config, Some(PathBuf::from("/tmp/a.yml")));
        let cli = Cli::try_parse_from(["poke-server", "--config", "/tmp/b.yml"]).unwrap();
        assert_eq!(cli.config, Some(PathBuf::from("/tmp/b.yml")));
        let cli = Cli::try_parse_from(["poke-server"]).unwrap();
        assert_eq!(cli.config, None);
    }
}
