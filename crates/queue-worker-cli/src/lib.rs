//! # Queue Worker CLI
//!
//! Command-line entry point for the queue worker.
//!
//! This module provides:
//! - Argument parsing
//! - Layered configuration loading (files, environment, flags)
//! - Logging initialisation
//! - Signal handling wired to the consumer loop's cancellation token
//! - Mapping of failures to process exit codes

use clap::Parser;
use queue_worker_core::{
    ConfigurationError, ConsumerError, ConsumerLoop, ConsumerStats, LoggingHandler, WorkerConfig,
};
use queue_worker_transport::{SqsConfig, SqsTransport};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[cfg(test)]
#[path = "lib_tests.rs"]
mod tests;

/// Filter used when `RUST_LOG` and `logging.level` are both unset
pub const DEFAULT_LOG_FILTER: &str =
    "queue_worker=info,queue_worker_cli=info,queue_worker_core=info,queue_worker_transport=info";

/// Prefix for environment overrides, e.g. `QW__WORKER__MAX_MESSAGES=5`
pub const ENV_PREFIX: &str = "QW";

// ============================================================================
// CLI Structure
// ============================================================================

/// Queue worker - long-polls a queue and acknowledges handled messages
#[derive(Debug, Parser)]
#[command(name = "queue-worker")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Long-polling queue consumer with at-least-once delivery")]
pub struct Cli {
    /// Configuration file path
    #[arg(short, long, env = "QUEUE_WORKER_CONFIG")]
    pub config: Option<PathBuf>,

    /// URL of the queue to consume
    #[arg(long)]
    pub queue_url: Option<String>,

    /// Messages requested per receive (1-10)
    #[arg(long)]
    pub max_messages: Option<u32>,

    /// Long-poll wait per receive in seconds (0-20)
    #[arg(long)]
    pub wait_seconds: Option<u32>,

    /// Stop after this many consecutive empty polls
    #[arg(long)]
    pub max_empty_polls: Option<u32>,

    /// Enable JSON logging
    #[arg(long)]
    pub json_logs: bool,
}

// ============================================================================
// Error Types
// ============================================================================

/// CLI-specific errors
#[derive(Debug, thiserror::Error)]
pub enum CliError {
    #[error("Configuration error: {0}")]
    Configuration(#[from] ConfigurationError),

    #[error("Failed to load configuration: {0}")]
    ConfigSource(#[from] config::ConfigError),

    #[error("Failed to initialise logging: {message}")]
    Logging { message: String },

    #[error("{0}")]
    Consumer(#[from] ConsumerError),
}

impl CliError {
    /// Process exit code for this error
    pub fn exit_code(&self) -> i32 {
        match self {
            Self::Configuration(_) | Self::ConfigSource(_) | Self::Logging { .. } => 1,
            Self::Consumer(ConsumerError::Receive { .. }) => 2,
            Self::Consumer(ConsumerError::Handler { .. }) => 3,
        }
    }
}

// ============================================================================
// Configuration Types
// ============================================================================

/// Complete worker configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub worker: WorkerConfig,
    pub aws: SqsConfig,
    pub logging: LoggingConfig,
}

impl AppConfig {
    /// Check the worker and transport sections
    pub fn validate(&self) -> Result<(), ConfigurationError> {
        self.worker.validate()?;
        self.aws.validate()
    }
}

/// Logging configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// `EnvFilter` directives; `RUST_LOG` takes precedence
    pub level: String,
    pub json_format: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: DEFAULT_LOG_FILTER.to_string(),
            json_format: false,
        }
    }
}

// ============================================================================
// Configuration Loading
// ============================================================================

/// Build the layered configuration
///
/// Sources, later overriding earlier:
/// 1. built-in defaults
/// 2. `config/worker.yaml` if present
/// 3. `explicit_path` if given (must exist)
/// 4. environment variables prefixed `QW__`
pub fn build_configuration(explicit_path: Option<&Path>) -> Result<AppConfig, CliError> {
    let mut builder = config::Config::builder().add_source(
        config::File::with_name("config/worker")
            .required(false)
            .format(config::FileFormat::Yaml),
    );

    if let Some(path) = explicit_path {
        builder = builder.add_source(config::File::from(path.to_path_buf()).required(true));
    }

    let config = builder
        .add_source(
            config::Environment::with_prefix(ENV_PREFIX)
                .prefix_separator("__")
                .separator("__")
                .try_parsing(true),
        )
        .build()?;

    Ok(config.try_deserialize()?)
}

/// Apply the unprefixed variables used by existing deployments
///
/// `lookup` returns the value of a variable, or `None` when unset or empty.
pub fn apply_conventional_env<F>(config: &mut AppConfig, lookup: F)
where
    F: Fn(&str) -> Option<String>,
{
    if let Some(queue_url) = lookup("QueueUrl").or_else(|| lookup("QUEUE_URL")) {
        config.worker.queue_url = queue_url;
    }
    if let Some(region) = lookup("AWS_REGION") {
        config.aws.region = region;
    }
    if let Some(key_id) = lookup("AWS_ACCESS_KEY_ID") {
        config.aws.access_key_id = Some(key_id);
    }
    if let Some(secret) = lookup("AWS_SECRET_ACCESS_KEY") {
        config.aws.secret_access_key = Some(secret);
    }
    if let Some(token) = lookup("AWS_SESSION_TOKEN") {
        config.aws.session_token = Some(token);
    }
}

/// Apply command-line flags, the highest-priority source
pub fn apply_cli_overrides(config: &mut AppConfig, cli: &Cli) {
    if let Some(queue_url) = &cli.queue_url {
        config.worker.queue_url = queue_url.clone();
    }
    if let Some(max_messages) = cli.max_messages {
        config.worker.max_messages = max_messages;
    }
    if let Some(wait_seconds) = cli.wait_seconds {
        config.worker.wait_time_seconds = wait_seconds;
    }
    if let Some(max_empty_polls) = cli.max_empty_polls {
        config.worker.max_empty_polls = Some(max_empty_polls);
    }
    if cli.json_logs {
        config.logging.json_format = true;
    }
}

/// Load and validate the full configuration
pub fn load_configuration(cli: &Cli) -> Result<AppConfig, CliError> {
    let mut config = build_configuration(cli.config.as_deref())?;
    apply_conventional_env(&mut config, |key| {
        std::env::var(key).ok().filter(|value| !value.is_empty())
    });
    apply_cli_overrides(&mut config, cli);

    config.validate()?;
    Ok(config)
}

// ============================================================================
// Logging
// ============================================================================

/// Install the global tracing subscriber
pub fn initialize_logging(logging: &LoggingConfig) -> Result<(), CliError> {
    let default_filter = if logging.level.trim().is_empty() {
        DEFAULT_LOG_FILTER.to_string()
    } else {
        logging.level.clone()
    };
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| default_filter.into());

    let json_layer = logging
        .json_format
        .then(|| tracing_subscriber::fmt::layer().json());
    let text_layer = (!logging.json_format).then(tracing_subscriber::fmt::layer);

    tracing_subscriber::registry()
        .with(filter)
        .with(json_layer)
        .with(text_layer)
        .try_init()
        .map_err(|e| CliError::Logging {
            message: e.to_string(),
        })
}

// ============================================================================
// Worker Execution
// ============================================================================

/// Resolve when the process receives SIGINT or SIGTERM
pub async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!(error = %e, "Failed to install Ctrl+C signal handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                error!(error = %e, "Failed to install SIGTERM signal handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received SIGINT (Ctrl+C), finishing the current batch");
        },
        _ = terminate => {
            info!("Received SIGTERM, finishing the current batch");
        },
    }
}

/// Build the SQS transport and run the loop until it stops
pub async fn run_worker(
    config: AppConfig,
    shutdown: CancellationToken,
) -> Result<ConsumerStats, CliError> {
    let transport = SqsTransport::new(config.aws)?;
    let consumer = ConsumerLoop::new(Arc::new(transport), Arc::new(LoggingHandler), config.worker)?;

    let stats = consumer.run(shutdown).await?;

    info!(
        polls = stats.polls,
        received = stats.received,
        deleted = stats.deleted,
        handler_failures = stats.handler_failures,
        delete_failures = stats.delete_failures,
        "Worker stopped"
    );
    Ok(stats)
}

/// Main CLI entry point
pub async fn run_cli() -> Result<ConsumerStats, CliError> {
    // A missing .env file is the normal case
    dotenvy::dotenv().ok();

    let cli = Cli::parse();

    let config = match load_configuration(&cli) {
        Ok(config) => config,
        Err(e) => {
            // Still report the failure through the usual log output
            let fallback = LoggingConfig {
                json_format: cli.json_logs,
                ..LoggingConfig::default()
            };
            initialize_logging(&fallback)?;
            return Err(e);
        }
    };

    initialize_logging(&config.logging)?;
    if let Some(path) = &cli.config {
        info!(path = %path.display(), "Loaded configuration from explicit path");
    }
    info!(queue_url = %config.worker.queue_url, region = %config.aws.region, "Starting queue worker");

    let shutdown = CancellationToken::new();
    let signal_token = shutdown.clone();
    tokio::spawn(async move {
        shutdown_signal().await;
        signal_token.cancel();
    });

    run_worker(config, shutdown).await
}
