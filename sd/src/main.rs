//! SyncDeck - client-side data orchestration
//!
//! CLI entry point for watching push updates, fetching through the
//! coordinator and pushing messages upstream.

use std::fs;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clap::{CommandFactory, FromArgMatches};
use colored::*;
use eyre::{Context, Result};
use serde_json::Value;
use tokio::sync::broadcast::error::RecvError;
use tracing::{debug, info, warn};

use syncdeck::cli::{Cli, Command, OutputFormat, generate_after_help};
use syncdeck::config::Config;
use syncdeck::coordinator::Coordinator;
use syncdeck::events::{CONNECTED, DISCONNECTED, Event, RECONNECT_FAILED};
use syncdeck::{DataClass, HttpService, RemoteService, TcpConnector};

/// Time allowed for queued outbound lines to reach the socket before exit
const SEND_FLUSH_GRACE: Duration = Duration::from_millis(200);

fn setup_logging(cli_log_level: Option<&str>, config_log_level: Option<&str>) -> Result<()> {
    // Note: Can't log params here since logging isn't initialized yet
    let log_dir = dirs::data_local_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("syncdeck")
        .join("logs");

    fs::create_dir_all(&log_dir).context("Failed to create log directory")?;

    // Determine log level with priority: CLI --log-level > config file > default (INFO)
    let level = match cli_log_level.or(config_log_level) {
        Some(s) => match s.to_uppercase().as_str() {
            "TRACE" => tracing::Level::TRACE,
            "DEBUG" => tracing::Level::DEBUG,
            "INFO" => tracing::Level::INFO,
            "WARN" | "WARNING" => tracing::Level::WARN,
            "ERROR" => tracing::Level::ERROR,
            _ => {
                eprintln!("Warning: Unknown log-level '{}', defaulting to INFO", s);
                tracing::Level::INFO
            }
        },
        None => tracing::Level::INFO,
    };

    let log_file = fs::File::create(log_dir.join("syncdeck.log")).context("Failed to create log file")?;

    tracing_subscriber::fmt()
        .with_writer(log_file)
        .with_ansi(false)
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env().add_directive(level.into()))
        .init();

    info!("Logging initialized (level: {:?})", level);
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let cmd = Cli::command().after_help(generate_after_help());
    let cli = Cli::from_arg_matches(&cmd.get_matches())?;

    // Load log level from config file early (before full config load)
    let config_log_level = Config::load_log_level(cli.config.as_ref());

    setup_logging(cli.log_level.as_deref(), config_log_level.as_deref()).context("Failed to setup logging")?;

    let config = Config::load(cli.config.as_ref()).context("Failed to load configuration")?;
    info!(endpoint = %config.channel.endpoint, services = %config.services.base_url, "SyncDeck loaded config");

    debug!(command = ?cli.command, "main: dispatching command");
    match cli.command {
        Command::Watch { endpoint, format } => {
            debug!(?endpoint, %format, "main: matched Watch command");
            cmd_watch(config, endpoint, format).await
        }
        Command::Fetch {
            path,
            class,
            concurrency,
        } => {
            debug!(%path, %class, concurrency, "main: matched Fetch command");
            cmd_fetch(config, &path, class, concurrency).await
        }
        Command::Send {
            kind,
            payload,
            endpoint,
        } => {
            debug!(%kind, ?endpoint, "main: matched Send command");
            cmd_send(config, &kind, &payload, endpoint).await
        }
        Command::Config => {
            debug!("main: matched Config command");
            cmd_config(&config)
        }
    }
}

fn start_coordinator(config: &Config) -> Result<Coordinator> {
    config.validate().context("Invalid configuration")?;
    let connector = Arc::new(TcpConnector::new(&config.channel));
    Ok(Coordinator::initialize(config, connector))
}

/// Print coordinator events until Ctrl-C
async fn cmd_watch(mut config: Config, endpoint: Option<String>, format: OutputFormat) -> Result<()> {
    if let Some(endpoint) = endpoint {
        config.channel.endpoint = endpoint;
    }
    config.coordinator.auto_connect = false;

    let coordinator = start_coordinator(&config)?;
    let mut events = coordinator.events()?;
    coordinator.connect()?;

    if format == OutputFormat::Text {
        println!("Watching {} (Ctrl-C to stop)", config.channel.endpoint.cyan());
    }

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                info!("cmd_watch: interrupted");
                break;
            }
            received = events.recv() => match received {
                Ok(event) => print_event(&event, format)?,
                Err(RecvError::Lagged(skipped)) => {
                    warn!(skipped, "cmd_watch: event stream lagged");
                    if format == OutputFormat::Text {
                        println!("{} {} events skipped", "!".yellow(), skipped);
                    }
                }
                Err(RecvError::Closed) => break,
            },
        }
    }

    coordinator.destroy().await;
    Ok(())
}

fn print_event(event: &Event, format: OutputFormat) -> Result<()> {
    match format {
        OutputFormat::Json => {
            println!("{}", event.to_line().context("Failed to serialize event")?);
        }
        OutputFormat::Text => {
            let kind = match event.kind.as_str() {
                CONNECTED => event.kind.green(),
                DISCONNECTED => event.kind.yellow(),
                RECONNECT_FAILED => event.kind.red(),
                _ => event.kind.cyan(),
            };
            let timestamp = chrono::DateTime::from_timestamp_millis(event.timestamp)
                .map(|t| t.format("%H:%M:%S%.3f").to_string())
                .unwrap_or_default();
            println!("{} {} {}", timestamp.dimmed(), kind, event.data);
        }
    }
    Ok(())
}

/// Read one resource with `concurrency` simultaneous callers
async fn cmd_fetch(mut config: Config, path: &str, class: DataClass, concurrency: usize) -> Result<()> {
    config.coordinator.auto_connect = false;
    let service: Arc<dyn RemoteService> =
        Arc::new(HttpService::from_config(&config.services).context("Failed to build HTTP client")?);
    let coordinator = start_coordinator(&config)?;
    let key = format!("{}:{}", class, path);

    let reads = (0..concurrency.max(1)).map(|_| {
        let service = Arc::clone(&service);
        let path = path.to_string();
        let coordinator = coordinator.clone();
        let key = key.clone();
        async move {
            coordinator
                .read_class(class, &key, move || async move { service.fetch(&path, &[]).await })
                .await
        }
    });
    let results = futures::future::join_all(reads).await;

    let metrics = coordinator.metrics();
    coordinator.destroy().await;

    let mut first = None;
    for result in results {
        match result {
            Ok(value) => {
                first.get_or_insert(value);
            }
            Err(e) => {
                println!("{} {}", "✗".red(), e);
            }
        }
    }

    if let Some(value) = first {
        println!("{}", serde_json::to_string_pretty(&value)?);
    }
    println!(
        "{} callers: {}, fetches: {}, joined: {}, failed: {}",
        "✓".green(),
        concurrency.max(1),
        metrics.fetches_started.to_string().cyan(),
        metrics.fetches_joined,
        metrics.fetches_failed
    );

    if metrics.fetches_failed > 0 {
        return Err(eyre::eyre!("Fetch of {} failed", path));
    }
    Ok(())
}

/// Connect, push one message, disconnect
async fn cmd_send(mut config: Config, kind: &str, payload: &str, endpoint: Option<String>) -> Result<()> {
    if let Some(endpoint) = endpoint {
        config.channel.endpoint = endpoint;
    }
    config.coordinator.auto_connect = false;
    let payload: Value = serde_json::from_str(payload).context("PAYLOAD_JSON is not valid JSON")?;

    let coordinator = start_coordinator(&config)?;
    let mut events = coordinator.events()?;
    coordinator.connect()?;

    let wait = config.channel.connect_timeout() + Duration::from_millis(config.channel.base_delay_ms);
    let connected = tokio::time::timeout(wait, async {
        loop {
            match events.recv().await {
                Ok(event) if event.kind == CONNECTED => return true,
                Ok(event) if event.kind == RECONNECT_FAILED => return false,
                Ok(_) | Err(RecvError::Lagged(_)) => continue,
                Err(RecvError::Closed) => return false,
            }
        }
    })
    .await
    .unwrap_or(false);

    let sent = connected && coordinator.send(kind, payload);
    if sent {
        tokio::time::sleep(SEND_FLUSH_GRACE).await;
    }
    coordinator.destroy().await;

    if !sent {
        return Err(eyre::eyre!("Could not send '{}' to {}", kind, config.channel.endpoint));
    }
    println!("{} Sent {} to {}", "✓".green(), kind.cyan(), config.channel.endpoint);
    Ok(())
}

fn cmd_config(config: &Config) -> Result<()> {
    let yaml = serde_yaml::to_string(config).context("Failed to serialize config")?;
    print!("{}", yaml);
    Ok(())
}
