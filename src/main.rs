use anyhow::{Context, Result};
use clap::{Parser, ValueEnum};
use describer::config::Config;
use describer::context::TriggerType;
use describer::gcp::http::GcpHttpClient;
use describer::gcp::{catalog, Endpoints, GcpProvider};
use describer::orchestrator::Orchestrator;
use describer::worker::{JetStreamQueue, NatsResultPublisher, Worker};
use std::path::PathBuf;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

/// Headless describe-job worker
#[derive(Parser, Debug)]
#[command(name = "describer-worker", version, about, long_about = None)]
struct Args {
    /// Config file (default: <config dir>/describer/worker.yaml)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// NATS server URL
    #[arg(long)]
    nats_url: Option<String>,

    /// Job topic to consume
    #[arg(short, long)]
    trigger: Option<TriggerType>,

    /// Log level (RUST_LOG takes precedence)
    #[arg(long, value_enum, default_value = "info")]
    log_level: LogLevel,

    /// Write logs to this file instead of stderr
    #[arg(long)]
    log_file: Option<PathBuf>,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum LogLevel {
    Error,
    Warn,
    Info,
    Debug,
    Trace,
}

impl LogLevel {
    fn as_directive(self) -> &'static str {
        match self {
            LogLevel::Error => "error",
            LogLevel::Warn => "warn",
            LogLevel::Info => "info",
            LogLevel::Debug => "debug",
            LogLevel::Trace => "trace",
        }
    }
}

fn setup_logging(
    level: LogLevel,
    log_file: Option<&PathBuf>,
) -> Result<tracing_appender::non_blocking::WorkerGuard> {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(level.as_directive()));

    let (non_blocking, guard) = match log_file {
        Some(path) => {
            if let Some(parent) = path.parent() {
                std::fs::create_dir_all(parent).ok();
            }
            let file = std::fs::OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)
                .with_context(|| format!("Failed to open log file {:?}", path))?;
            tracing_appender::non_blocking(file)
        }
        None => tracing_appender::non_blocking(std::io::stderr()),
    };

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(non_blocking)
        .with_ansi(log_file.is_none())
        .with_target(true)
        .with_thread_ids(false)
        .with_file(true)
        .with_line_number(true)
        .init();

    tracing::info!("describer-worker {} started with log level: {:?}", describer::VERSION, level);
    if let Some(path) = log_file {
        tracing::info!("Log file: {:?}", path);
    }

    Ok(guard)
}

/// Cancel `token` on SIGINT or SIGTERM
fn spawn_signal_handler(token: CancellationToken) {
    tokio::spawn(async move {
        #[cfg(unix)]
        {
            use tokio::signal::unix::{signal, SignalKind};
            match signal(SignalKind::terminate()) {
                Ok(mut term) => {
                    tokio::select! {
                        _ = tokio::signal::ctrl_c() => tracing::info!("SIGINT received"),
                        _ = term.recv() => tracing::info!("SIGTERM received"),
                    }
                }
                Err(e) => {
                    tracing::warn!("Failed to install SIGTERM handler: {}", e);
                    let _ = tokio::signal::ctrl_c().await;
                    tracing::info!("SIGINT received");
                }
            }
        }
        #[cfg(not(unix))]
        {
            let _ = tokio::signal::ctrl_c().await;
            tracing::info!("Interrupt received");
        }
        token.cancel();
    });
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let _log_guard = setup_logging(args.log_level, args.log_file.as_ref())?;

    // File < environment < command line
    let mut config = Config::load(args.config.as_deref());
    config.apply_env();
    if let Some(url) = args.nats_url {
        config.nats.url = url;
    }
    if let Some(trigger) = args.trigger {
        config.worker.trigger = trigger;
    }

    let registry = catalog::registry().context("Failed to load resource catalog")?;
    tracing::info!("Loaded {} resource types", registry.len());

    let endpoints = Endpoints::new(&config.gcp.compute_endpoint, &config.gcp.storage_endpoint)?;
    let provider = GcpProvider::new(
        GcpHttpClient::new(&config.gcp.user_agent)?,
        endpoints,
        config.gcp.default_region.clone(),
    );
    let orchestrator = Arc::new(Orchestrator::new(provider, Arc::new(registry)));

    let client = async_nats::connect(config.nats.url.as_str())
        .await
        .with_context(|| format!("Failed to connect to NATS at {}", config.nats.url))?;
    tracing::info!("Connected to NATS at {}", config.nats.url);

    let mut queue = JetStreamQueue::connect(client.clone(), &config, config.worker.trigger).await?;
    let publisher = Arc::new(NatsResultPublisher::new(client.clone()));

    let shutdown = CancellationToken::new();
    spawn_signal_handler(shutdown.clone());

    let mut worker = Worker::new(orchestrator, publisher, config.worker.clone());
    let stats = worker.run(&mut queue, shutdown).await;

    // Push out buffered result messages before exiting
    if let Err(e) = client.flush().await {
        tracing::warn!("Failed to flush NATS connection: {}", e);
    }

    tracing::info!(
        completed = stats.completed,
        failed = stats.failed,
        "describer-worker exited cleanly"
    );
    Ok(())
}
