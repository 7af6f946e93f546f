// Command-line entry point for the observation harness

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use futures::StreamExt;
use observer::{Harness, ObserverConfig, SourceType, SqsQueue};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser)]
#[command(name = "observe", about = "Watch the side-effect queue for observed messages")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Print every observed message as one JSON line until Ctrl-C
    Tail {
        /// Exit after this many messages
        #[arg(long)]
        limit: Option<usize>,
    },
    /// Wait for one exact message; exits non-zero on timeout
    Wait {
        /// broadcast | routed_event
        #[arg(long)]
        source_type: SourceType,
        /// Topic identifier or event bus name
        #[arg(long)]
        source_id: String,
        /// Exact payload string
        #[arg(long)]
        payload: String,
        #[arg(long, default_value_t = 10_000)]
        timeout_ms: u64,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,observer=debug,aws_config=warn".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let cli = Cli::parse();

    // Load configuration
    let config = ObserverConfig::from_env().context("Failed to load configuration")?;
    tracing::info!(queue_url = %config.queue_url, "Configuration loaded");

    let queue = SqsQueue::from_default_config(&config.queue_url).await;
    let harness =
        Harness::from_config(Arc::new(queue), &config).context("Failed to build harness")?;
    harness.start().context("Failed to start poller")?;

    let result = match cli.command {
        Command::Tail { limit } => tail(&harness, limit).await,
        Command::Wait {
            source_type,
            source_id,
            payload,
            timeout_ms,
        } => {
            harness
                .wait_for_message(
                    source_type,
                    source_id,
                    payload,
                    Duration::from_millis(timeout_ms),
                )
                .await
                .map_err(anyhow::Error::from)
                .and_then(|message| print_message(&message))
        }
    };

    harness.stop().await;
    result
}

async fn tail(harness: &Harness, limit: Option<usize>) -> Result<()> {
    let stream = harness.subscribe().into_stream();
    let mut stream = match limit {
        Some(limit) => stream.take(limit).boxed_local(),
        None => stream.boxed_local(),
    };

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                tracing::info!("Interrupted");
                return Ok(());
            }
            next = stream.next() => match next {
                Some(message) => print_message(&message)?,
                None => return Ok(()),
            },
        }
    }
}

fn print_message(message: &observer::ObservedMessage) -> Result<()> {
    let line = serde_json::to_string(message).context("Failed to serialize message")?;
    println!("{}", line);
    Ok(())
}
