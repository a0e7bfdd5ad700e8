use std::process::ExitCode;
use std::sync::Arc;

use clap::Parser;
use rack_sync::file_io::open_file_for_append;
use rack_sync::Cli;
use rack_sync::Error;
use rack_sync::LoggingConfig;
use rack_sync::RackSync;
use rack_sync::Result;
use rack_sync::SystemResolver;
use rack_sync::ZookeeperConnector;
use tokio::signal::unix::signal;
use tokio::signal::unix::SignalKind;
use tokio::sync::watch;
use tracing::error;
use tracing::info;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::Layer;

#[tokio::main(flavor = "multi_thread", worker_threads = 2)]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    let settings = match cli.load_config() {
        Ok(settings) => settings,
        Err(e) => {
            eprintln!("invalid configuration: {e}");
            return ExitCode::FAILURE;
        }
    };

    // Initializing Logs
    let _guard = match init_observability(&settings.logging) {
        Ok(guard) => guard,
        Err(e) => {
            eprintln!("failed to initialise logging: {e}");
            return ExitCode::FAILURE;
        }
    };

    // Initializing Shutdown Signal
    let (graceful_tx, graceful_rx) = watch::channel(());
    tokio::spawn(async move {
        if let Err(e) = graceful_shutdown(graceful_tx).await {
            error!("Failed to shutdown: {:?}", e);
        }
    });

    let app = RackSync::new(settings, Arc::new(ZookeeperConnector), Arc::new(SystemResolver));
    match app.run(graceful_rx).await {
        Ok(()) => {
            info!("Exiting program.");
            ExitCode::SUCCESS
        }
        Err(e) => {
            error!(kind = e.kind(), "exiting on fatal error: {}", e);
            ExitCode::FAILURE
        }
    }
}

async fn graceful_shutdown(graceful_tx: watch::Sender<()>) -> Result<()> {
    let mut sigint = signal(SignalKind::interrupt()).map_err(|e| Error::Fatal(e.to_string()))?;
    let mut sigterm = signal(SignalKind::terminate()).map_err(|e| Error::Fatal(e.to_string()))?;
    tokio::select! {
        _ = sigint.recv() => {
            info!("SIGINT detected.");
        },
        _ = sigterm.recv() => {
            info!("SIGTERM detected.");
        },
    }

    graceful_tx.send(()).map_err(|e| {
        error!("Failed to send shutdown signal: {}", e);
        Error::Fatal(format!("Failed to send shutdown signal: {e}"))
    })?;
    Ok(())
}

/// Stdout logging always; a log file in `log_dir` when enabled.
fn init_observability(logging: &LoggingConfig) -> Result<Option<WorkerGuard>> {
    let filter = || EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&logging.level));
    let stdout_layer = tracing_subscriber::fmt::layer().with_filter(filter());

    if !logging.file_enabled {
        tracing_subscriber::registry().with(stdout_layer).init();
        return Ok(None);
    }

    let log_file = open_file_for_append(&logging.log_dir.join("rack-sync.log"))?;
    let (non_blocking, guard) = tracing_appender::non_blocking(log_file);
    let file_layer = tracing_subscriber::fmt::layer()
        .with_writer(non_blocking)
        .with_ansi(false)
        .with_filter(filter());
    tracing_subscriber::registry().with(stdout_layer).with(file_layer).init();

    Ok(Some(guard))
}
