//! relay - multi-role task orchestration engine.
//!
//! `relay serve` で HTTP API を立ち上げ、それ以外のサブコマンドは
//! データディレクトリ上のストアに対して 1 回だけ操作して JSON を出す。

mod cli;
mod commands;
mod server;

use std::process::ExitCode;
use std::sync::Arc;

use clap::Parser;
use relay_core::{Orchestrator, RelayConfig};
use tokio::signal;
use tokio::sync::broadcast::error::RecvError;
use tracing::{debug, error, info, warn};
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

use crate::cli::{Cli, Command};

fn setup_logging(level: &str, json: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    let subscriber = tracing_subscriber::registry().with(filter);

    // stdout はコマンド出力（JSON）専用
    if json {
        subscriber
            .with(tracing_subscriber::fmt::layer().json().with_writer(std::io::stderr))
            .init();
    } else {
        subscriber
            .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
            .init();
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    setup_logging(&cli.global.log_level, cli.global.json_logs);

    let config = match cli.global.load_config() {
        Ok(config) => config,
        Err(e) => {
            error!("failed to load configuration: {e}");
            return ExitCode::FAILURE;
        }
    };

    let outcome = match cli.command {
        Command::Serve { listen } => serve(config, listen).await,
        command => match commands::build_engine(&config).await {
            Ok(engine) => commands::run(&engine, command).await,
            Err(e) => Err(e),
        },
    };

    match outcome {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("{e:#}");
            ExitCode::FAILURE
        }
    }
}

async fn serve(config: RelayConfig, listen: Option<String>) -> anyhow::Result<()> {
    let listen_addr = listen.unwrap_or_else(|| config.server.listen_addr.clone());
    let engine = Arc::new(commands::build_engine(&config).await?);

    info!(
        data_dir = %config.storage.data_dir.display(),
        execution = config.execution.base_url.as_deref().unwrap_or("<local only>"),
        cascade = %config.resolution.cascade,
        "starting relay"
    );

    // 実行サービスが設定されていなければプローブは不要
    let probe = config
        .execution
        .base_url
        .is_some()
        .then(|| engine.spawn_health_probe());
    let event_log = tokio::spawn(log_events(engine.clone()));

    let served = server::serve(engine, &listen_addr, shutdown_signal()).await;

    if let Some(probe) = probe {
        probe.shutdown_and_join().await;
    }
    event_log.abort();
    info!("relay stopped");
    served
}

/// Mirror domain events into the log.
async fn log_events(engine: Arc<Orchestrator>) {
    let mut events = engine.subscribe();
    drop(engine);
    loop {
        match events.recv().await {
            Ok(event) => debug!(?event, "domain event"),
            Err(RecvError::Lagged(skipped)) => warn!(skipped, "event log fell behind"),
            Err(RecvError::Closed) => break,
        }
    }
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!("failed to install Ctrl+C handler: {e}");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => {
                error!("failed to install SIGTERM handler: {e}");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("received Ctrl+C, shutting down"),
        _ = terminate => info!("received SIGTERM, shutting down"),
    }
}
