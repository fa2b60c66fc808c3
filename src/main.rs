use std::net::SocketAddr;
use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;
use log::{LevelFilter, debug, info, warn};
use tokio::net::TcpListener;

use playbox::api::{self, AppState};
use playbox::config::ServerConfig;
use playbox::reclaim::IdleReclaimer;

#[derive(Debug, Parser)]
#[command(
    author,
    version,
    about = "Playbox - per-user sandboxed terminal and run sessions."
)]
struct Cli {
    /// Override the config file path
    #[arg(long, value_name = "PATH")]
    config: Option<PathBuf>,

    /// Override the listen address from the config
    #[arg(long, value_name = "ADDR")]
    listen: Option<String>,

    /// Increase logging verbosity (stackable)
    #[arg(short = 'v', long = "verbose", action = clap::ArgAction::Count)]
    verbose: u8,
}

fn init_logging(verbose: u8) {
    let level = match verbose {
        0 => LevelFilter::Info,
        1 => LevelFilter::Debug,
        _ => LevelFilter::Trace,
    };
    let mut builder =
        env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"));
    builder.filter_level(level);
    builder.try_init().ok();
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    let mut config = ServerConfig::load(cli.config.as_deref())?;
    if let Some(listen) = cli.listen {
        config.listen = listen;
    }
    debug!("effective configuration: {config:#?}");

    let state = AppState::from_config(&config);

    let reclaimer = IdleReclaimer::new(
        state.manager.clone(),
        state.tracker.clone(),
        config.sandbox.idle_limit(),
        config.sandbox.gc_interval(),
    );
    let sweep_task = reclaimer.spawn();

    let app = api::create_router(state.clone());

    let addr: SocketAddr = config.listen.parse().context("invalid listen address")?;
    info!("Listening on http://{addr}");
    let listener = TcpListener::bind(addr)
        .await
        .context("binding to address")?;

    let shutdown_state = state.clone();
    let shutdown_signal = async move {
        let ctrl_c = async {
            tokio::signal::ctrl_c()
                .await
                .expect("failed to install Ctrl+C handler");
        };

        #[cfg(unix)]
        let terminate = async {
            tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
                .expect("failed to install signal handler")
                .recv()
                .await;
        };

        #[cfg(not(unix))]
        let terminate = std::future::pending::<()>();

        tokio::select! {
            _ = ctrl_c => {},
            _ = terminate => {},
        }

        info!("Shutdown signal received, stopping sandboxes...");
        shutdown_sandboxes(&shutdown_state).await;
        info!("Shutdown complete");
    };

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal)
        .await
        .context("running server")?;

    sweep_task.abort();
    Ok(())
}

/// Stop every sandbox with recorded activity. Best effort; a sandbox that
/// fails to stop is left for the engine's own cleanup.
async fn shutdown_sandboxes(state: &AppState) {
    for (identity, _) in state.tracker.snapshot() {
        if let Err(err) = state.manager.stop(&identity).await {
            warn!("failed to stop sandbox for {identity} during shutdown: {err}");
        }
    }
}
