//! Entry point (C10/bootstrap): CLI, config, tracing, and the graceful
//! shutdown handshake around the listener (SPEC_FULL.md §10).

use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use telemt::config::{ProxyConfig, spawn_config_watcher};
use telemt::proxy::ClientHandler;
use telemt::stats::{StatsRegistry, run_stats_reporter};
use telemt::{bootstrap, listener};
use tracing_subscriber::EnvFilter;

fn config_path_from_args() -> PathBuf {
    let mut args = std::env::args().skip(1);
    while let Some(arg) = args.next() {
        if arg == "--config" {
            if let Some(path) = args.next() {
                return PathBuf::from(path);
            }
        } else if let Some(path) = arg.strip_prefix("--config=") {
            return PathBuf::from(path);
        }
    }
    std::env::var("TELEMT_CONFIG")
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from("config.toml"))
}

#[tokio::main]
async fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let config_path = config_path_from_args();
    let config = match ProxyConfig::load(&config_path) {
        Ok(c) => Arc::new(c),
        Err(e) => {
            tracing::error!("failed to load config from {:?}: {e}", config_path);
            return ExitCode::FAILURE;
        }
    };

    let my_ip = bootstrap::resolve_my_ip(&config).await;
    bootstrap::print_invitations(&config, my_ip);

    let stats = StatsRegistry::new();
    stats.register_users(config.users.keys().map(String::as_str));
    tokio::spawn(run_stats_reporter(
        stats.clone(),
        Duration::from_secs(config.general.stats_print_period_secs),
    ));

    let config_rx = spawn_config_watcher(config_path, config.clone(), Duration::from_secs(60));
    let handler = ClientHandler::new(config_rx, stats, my_ip);

    let port = config.server.port;
    if let Err(e) = listener::serve(port, handler, shutdown_signal()).await {
        tracing::error!("listener exited with error: {e}");
        return ExitCode::FAILURE;
    }

    ExitCode::SUCCESS
}

/// Resolves once SIGINT or (on Unix) SIGTERM arrives. In-flight sessions are
/// not cancelled — only `listener::serve`'s accept loop stops.
async fn shutdown_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{SignalKind, signal};
        let mut sigterm = match signal(SignalKind::terminate()) {
            Ok(s) => s,
            Err(e) => {
                tracing::warn!("failed to register SIGTERM handler: {e}");
                let _ = tokio::signal::ctrl_c().await;
                return;
            }
        };
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {}
            _ = sigterm.recv() => {}
        }
    }
    #[cfg(not(unix))]
    {
        let _ = tokio::signal::ctrl_c().await;
    }
    tracing::info!("shutdown signal received, draining connections");
}
