//! # SQS Runtime CLI
//!
//! Command-line front end for the `sqs-runtime` library.
//!
//! - `publish` sends one or more messages, singly or packed into batches
//! - `consume` runs a logging consumer until SIGINT/SIGTERM
//! - `config` validates and prints the resolved configuration
//!
//! Configuration is read from an optional file (`--config` or
//! `SQS_RUNTIME_CONFIG`, format by extension) and then from environment
//! variables such as `SQS_RUNTIME__QUEUE__REGION=eu-west-1`.

use async_trait::async_trait;
use bytes::Bytes;
use clap::{Parser, Subcommand, ValueEnum};
use serde::{Deserialize, Serialize};
use sqs_runtime::lifecycle::wait_for_signal;
use sqs_runtime::{
    CompressionCode, ConfigurationError, Consumer, ConsumerOptions, HttpSqsBackend, Message,
    MessageHandler, ProcessingContext, Publisher, Queue, QueueConfig, QueueError,
    ShutdownRegistry, SqsBackend,
};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[cfg(test)]
#[path = "lib_tests.rs"]
mod tests;

/// Prefix of configuration environment variables
pub const ENV_PREFIX: &str = "SQS_RUNTIME";

// ============================================================================
// CLI Structure
// ============================================================================

/// SQS runtime CLI - publish to and consume from SQS queues
#[derive(Parser)]
#[command(name = "sqs-runtime")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Reliable SQS consumption and batched publishing")]
pub struct Cli {
    /// Configuration file path
    #[arg(short, long, env = "SQS_RUNTIME_CONFIG")]
    pub config: Option<PathBuf>,

    /// Logging level, used when RUST_LOG is not set
    #[arg(short, long, default_value = "info")]
    pub log_level: String,

    /// Enable JSON logging
    #[arg(long)]
    pub json_logs: bool,

    /// Subcommand to execute
    #[command(subcommand)]
    pub command: Commands,
}

/// Available CLI commands
#[derive(Subcommand)]
pub enum Commands {
    /// Publish messages to a queue
    Publish {
        /// Queue name, without the configured prefix
        queue: String,

        /// Open the queue as a FIFO queue
        #[arg(long)]
        fifo: bool,

        /// Message group id, required for FIFO queues
        #[arg(short, long)]
        group_id: Option<String>,

        /// Codec for the message bodies (none, gzip, snappy)
        #[arg(long)]
        compression: Option<CompressionCode>,

        /// Message body
        #[arg(short, long, conflicts_with = "file", required_unless_present = "file")]
        body: Option<String>,

        /// Read the message body from a file
        #[arg(short, long)]
        file: Option<PathBuf>,

        /// Number of copies to publish
        #[arg(short = 'n', long, default_value = "1")]
        count: usize,

        /// Publish through size-bounded batches
        #[arg(long)]
        batch: bool,
    },

    /// Consume a queue, logging every message, until interrupted
    Consume {
        /// Queue name, without the configured prefix
        queue: String,

        /// Open the queue as a FIFO queue
        #[arg(long)]
        fifo: bool,

        /// Polling loops (at most two)
        #[arg(short, long)]
        workers: Option<usize>,

        /// Handler workers per polling loop
        #[arg(long)]
        concurrency: Option<usize>,

        /// Hand each poll to the handler as a single batch
        #[arg(long)]
        batch: bool,
    },

    /// Validate and show the resolved configuration
    Config {
        /// Print the configuration after validating it
        #[arg(short, long)]
        show: bool,

        /// Output format for the configuration
        #[arg(short = 'f', long, default_value = "toml")]
        format: ConfigFormat,
    },
}

/// Configuration output formats
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum ConfigFormat {
    Toml,
    Json,
}

// ============================================================================
// CLI Error Types
// ============================================================================

/// CLI-specific errors
#[derive(Debug, thiserror::Error)]
pub enum CliError {
    #[error("Configuration error: {0}")]
    Configuration(#[from] ConfigError),

    #[error("Queue error: {0}")]
    Queue(#[from] QueueError),

    #[error("Command failed: {message}")]
    CommandFailed { message: String },

    #[error("Invalid argument: {arg} - {message}")]
    InvalidArgument { arg: String, message: String },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl CliError {
    /// Process exit code for this error
    pub fn exit_code(&self) -> i32 {
        match self {
            Self::Configuration(_) => 1,
            Self::Queue(_) => 2,
            Self::CommandFailed { .. } => 3,
            Self::InvalidArgument { .. } => 4,
            Self::Io(_) => 5,
        }
    }
}

/// Configuration-related errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Configuration file not found: {path}")]
    FileNotFound { path: PathBuf },

    #[error("Failed to load configuration: {0}")]
    Load(#[from] config::ConfigError),

    #[error("Validation error: {0}")]
    Validation(#[from] ConfigurationError),

    #[error("Failed to render configuration: {message}")]
    Render { message: String },
}

// ============================================================================
// Configuration Types
// ============================================================================

/// CLI configuration structure
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CliConfig {
    /// Connection settings
    pub queue: QueueConfig,

    /// Consumer defaults, overridden by `consume` flags
    pub consumer: ConsumerOptions,
}

impl CliConfig {
    /// Copy with credentials masked, for display
    pub fn redacted(&self) -> Self {
        let mut config = self.clone();
        if config.queue.secret_access_key.is_some() {
            config.queue.secret_access_key = Some("********".to_string());
        }
        config
    }
}

/// Load configuration from `path` (if any) and the process environment
pub fn load_config(path: Option<&Path>) -> Result<CliConfig, ConfigError> {
    load_config_with(
        path,
        config::Environment::with_prefix(ENV_PREFIX).separator("__"),
    )
}

fn load_config_with(
    path: Option<&Path>,
    environment: config::Environment,
) -> Result<CliConfig, ConfigError> {
    let mut builder = config::Config::builder();

    if let Some(path) = path {
        if !path.exists() {
            return Err(ConfigError::FileNotFound {
                path: path.to_path_buf(),
            });
        }
        builder = builder.add_source(config::File::from(path).required(true));
    }

    let config: CliConfig = builder
        .add_source(environment)
        .build()?
        .try_deserialize()?;

    config.queue.validate()?;
    Ok(config)
}

/// Render configuration in the requested format
pub fn render_config(config: &CliConfig, format: ConfigFormat) -> Result<String, ConfigError> {
    match format {
        ConfigFormat::Toml => toml::to_string_pretty(config).map_err(|e| ConfigError::Render {
            message: e.to_string(),
        }),
        ConfigFormat::Json => {
            serde_json::to_string_pretty(config).map_err(|e| ConfigError::Render {
                message: e.to_string(),
            })
        }
    }
}

// ============================================================================
// Main Entry Point
// ============================================================================

/// Main CLI entry point
pub async fn run_cli() -> Result<(), CliError> {
    let cli = Cli::parse();

    initialize_logging(&cli)?;

    let config = load_config(cli.config.as_deref())?;

    match cli.command {
        Commands::Publish {
            queue,
            fifo,
            group_id,
            compression,
            body,
            file,
            count,
            batch,
        } => {
            let body = match (body, file) {
                (Some(body), _) => Bytes::from(body),
                (None, Some(file)) => Bytes::from(tokio::fs::read(&file).await?),
                (None, None) => {
                    return Err(CliError::InvalidArgument {
                        arg: "body".to_string(),
                        message: "either --body or --file is required".to_string(),
                    })
                }
            };

            let mut message = Message::new(body);
            if let Some(group_id) = group_id {
                message = message.with_group_id(group_id);
            }
            if let Some(compression) = compression {
                message = message.with_compression(compression);
            }

            execute_publish_command(&config, &queue, fifo, message, count, batch).await
        }
        Commands::Consume {
            queue,
            fifo,
            workers,
            concurrency,
            batch,
        } => {
            let options = consumer_options(&config.consumer, workers, concurrency, batch);
            execute_consume_command(&config, &queue, fifo, options).await
        }
        Commands::Config { show, format } => execute_config_command(&config, show, format),
    }
}

// ============================================================================
// Command Implementations
// ============================================================================

/// Install the tracing subscriber.
///
/// `RUST_LOG` wins over `--log-level`.
fn initialize_logging(cli: &Cli) -> Result<(), CliError> {
    let filter = match EnvFilter::try_from_default_env() {
        Ok(filter) => filter,
        Err(_) => EnvFilter::try_new(default_filter(&cli.log_level)).map_err(|e| {
            CliError::InvalidArgument {
                arg: "log-level".to_string(),
                message: e.to_string(),
            }
        })?,
    };

    let (plain, json) = if cli.json_logs {
        (None, Some(tracing_subscriber::fmt::layer().json()))
    } else {
        (Some(tracing_subscriber::fmt::layer()), None)
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(plain)
        .with(json)
        .try_init()
        .map_err(|e| CliError::CommandFailed {
            message: format!("failed to initialise logging: {}", e),
        })
}

fn default_filter(level: &str) -> String {
    format!("sqs_runtime={0},sqs_runtime_cli={0}", level)
}

/// Apply `consume` flags on top of the configured consumer options
fn consumer_options(
    base: &ConsumerOptions,
    workers: Option<usize>,
    concurrency: Option<usize>,
    batch: bool,
) -> ConsumerOptions {
    let mut options = base.clone();
    if let Some(workers) = workers {
        options.number_of_workers = workers;
    }
    if let Some(concurrency) = concurrency {
        options.concurrency_per_worker = concurrency;
    }
    if batch {
        options.send_batch_message = true;
    }
    options
}

async fn open_queue(config: &CliConfig, name: &str, fifo: bool) -> Result<Arc<Queue>, CliError> {
    let backend: Arc<dyn SqsBackend> = Arc::new(HttpSqsBackend::new(&config.queue)?);

    let queue = if fifo {
        Queue::new_fifo(name, &config.queue, backend).await?
    } else {
        Queue::new_standard(name, &config.queue, backend).await?
    };

    Ok(Arc::new(queue))
}

async fn execute_publish_command(
    config: &CliConfig,
    queue: &str,
    fifo: bool,
    message: Message,
    count: usize,
    batch: bool,
) -> Result<(), CliError> {
    if count == 0 {
        return Err(CliError::InvalidArgument {
            arg: "count".to_string(),
            message: "must be at least 1".to_string(),
        });
    }

    let publisher = Publisher::new(open_queue(config, queue, fifo).await?);

    let ids = if batch {
        let messages = vec![message; count];
        publisher.batch_publish(&messages).await?
    } else {
        let mut ids = Vec::with_capacity(count);
        for _ in 0..count {
            ids.push(publisher.publish(&message).await?);
        }
        ids
    };

    info!(queue = %publisher.queue().name(), published = ids.len(), "Published messages");
    for id in ids {
        println!("{}", id);
    }

    Ok(())
}

async fn execute_consume_command(
    config: &CliConfig,
    queue: &str,
    fifo: bool,
    options: ConsumerOptions,
) -> Result<(), CliError> {
    let queue = open_queue(config, queue, fifo).await?;
    let registry = Arc::new(ShutdownRegistry::new());
    let handler = Arc::new(LoggingHandler::default());

    let consumer = Arc::new(Consumer::new(
        queue,
        Arc::clone(&handler) as Arc<dyn MessageHandler>,
        options,
        Arc::clone(&registry) as Arc<dyn sqs_runtime::Lifecycle>,
    )?);

    let root = CancellationToken::new();
    consumer.start(&root)?;

    wait_for_signal().await?;
    root.cancel();

    let timed_out = registry.shutdown().await;
    if !timed_out.is_empty() {
        warn!(components = ?timed_out, "Some components did not shut down in time");
    }

    info!(processed = handler.processed(), "Consumer stopped");
    Ok(())
}

fn execute_config_command(
    config: &CliConfig,
    show: bool,
    format: ConfigFormat,
) -> Result<(), CliError> {
    info!("Configuration is valid");
    if show {
        println!("{}", render_config(&config.redacted(), format)?);
    }
    Ok(())
}

// ============================================================================
// Message Handler
// ============================================================================

/// Handler that logs every message it receives
#[derive(Debug, Default)]
pub struct LoggingHandler {
    processed: AtomicUsize,
}

impl LoggingHandler {
    /// Messages handled so far
    pub fn processed(&self) -> usize {
        self.processed.load(Ordering::Relaxed)
    }
}

#[async_trait]
impl MessageHandler for LoggingHandler {
    async fn process(
        &self,
        ctx: &ProcessingContext,
        messages: &mut [Message],
    ) -> anyhow::Result<()> {
        for message in messages.iter() {
            info!(
                request_id = %ctx.request_id(),
                worker_id = %ctx.worker_id(),
                message_id = ?message.message_id,
                group_id = ?message.group_id,
                receive_count = ?message.receive_count(),
                body = %String::from_utf8_lossy(&message.value),
                "Received message"
            );
        }

        self.processed.fetch_add(messages.len(), Ordering::Relaxed);
        Ok(())
    }
}
