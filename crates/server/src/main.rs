//! The `junction-server` binary.
//!
//! Exit codes: `0` clean shutdown, `1` config-load failure, `2` bind
//! failure, `3` fatal runtime error.

use junction_core::{
    config::{AppConfig, ConfigError},
    runtime::ProxyRuntime,
};
use std::{process::ExitCode, sync::Arc};
use tokio::{net::TcpListener, signal, sync::broadcast};
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

const DEFAULT_CONFIG_PATH: &str = "config/junction.toml";

#[derive(Debug)]
enum RunError {
    Config(ConfigError),
    Bind(std::io::Error),
    Fatal(String),
}

impl RunError {
    fn exit_code(&self) -> ExitCode {
        match self {
            Self::Config(_) => ExitCode::from(1),
            Self::Bind(_) => ExitCode::from(2),
            Self::Fatal(_) => ExitCode::from(3),
        }
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    match run().await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            match &e {
                RunError::Config(source) => error!(error = %source, "config load failed"),
                RunError::Bind(source) => error!(error = %source, "bind failed"),
                RunError::Fatal(message) => error!(error = %message, "fatal runtime error"),
            }
            e.exit_code()
        }
    }
}

async fn run() -> Result<(), RunError> {
    let config_path = std::env::var("JUNCTION_CONFIG")
        .ok()
        .or_else(|| std::env::args().nth(1))
        .unwrap_or_else(|| DEFAULT_CONFIG_PATH.to_string());

    let config = AppConfig::from_file(&config_path).map_err(RunError::Config)?;
    init_logging(&config);
    info!(path = %config_path, "configuration loaded");

    let addr = config.socket_addr().map_err(RunError::Config)?;
    let runtime = Arc::new(
        ProxyRuntime::from_config(config).map_err(|e| RunError::Fatal(e.to_string()))?,
    );

    let (shutdown_tx, _) = broadcast::channel(1);
    let background_tasks = runtime.start_background_tasks(&shutdown_tx);

    let app = server::build_app(Arc::clone(&runtime));
    let listener = TcpListener::bind(addr).await.map_err(RunError::Bind)?;
    info!(%addr, "listening");

    let serve_result = axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await;

    // Stop probe tasks before reporting the outcome.
    let _ = shutdown_tx.send(());
    for task in background_tasks {
        let _ = task.await;
    }

    serve_result.map_err(|e| RunError::Fatal(e.to_string()))?;
    info!("shutdown complete");
    Ok(())
}

/// Initializes tracing from config, with `RUST_LOG` taking precedence over
/// the configured default level.
fn init_logging(config: &AppConfig) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&config.logging.level));
    let registry = tracing_subscriber::registry().with(filter);

    if config.logging.format == "json" {
        registry.with(tracing_subscriber::fmt::layer().json()).init();
    } else {
        registry.with(tracing_subscriber::fmt::layer().with_target(false)).init();
    }
}

/// Resolves when SIGINT or SIGTERM arrives.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!(error = %e, "failed to install SIGINT handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                error!(error = %e, "failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => info!("received SIGINT"),
        () = terminate => info!("received SIGTERM"),
    }
}
