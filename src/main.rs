use std::path::PathBuf;
use std::time::Duration;

use clap::{Parser, Subcommand};
use tokio::signal;
use tracing::info;
use tracing_subscriber::EnvFilter;

use limitkit::config::{LimitkitConfig, LoggingConfig};
use limitkit::limit::LimiterRegistry;

/// Drive configured limiters from the command line.
#[derive(Debug, Parser)]
#[command(name = "limitkit", version, about)]
struct Cli {
    /// Path to a YAML configuration file
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Feed evenly spaced samples into a frequency aggregator
    Frequency {
        #[arg(long, default_value = "default")]
        name: String,
        #[arg(long, default_value_t = 10)]
        events: u32,
        #[arg(long, default_value_t = 100)]
        interval_ms: u64,
        #[arg(long, default_value_t = 1.0)]
        value: f64,
    },
    /// Draw tokens from a token bucket
    Bucket {
        #[arg(long, default_value = "default")]
        name: String,
        #[arg(long, default_value_t = 5)]
        requests: u32,
        #[arg(long, default_value_t = 1.0)]
        amount: f64,
        /// Wait for tokens instead of declining
        #[arg(long)]
        wait: bool,
    },
    /// Print the effective configuration as JSON
    ShowConfig,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let config = match &cli.config {
        Some(path) => LimitkitConfig::from_file(path)?,
        None => LimitkitConfig::default(),
    };

    init_tracing(&config.logging);
    info!("Version: {}", env!("CARGO_PKG_VERSION"));
    if let Some(path) = &cli.config {
        info!(path = %path.display(), "Configuration loaded");
    }

    tokio::select! {
        result = run(cli.command, config) => result?,
        _ = shutdown_signal() => {}
    }

    Ok(())
}

fn init_tracing(logging: &LoggingConfig) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&logging.level));

    if logging.json {
        tracing_subscriber::fmt()
            .json()
            .with_env_filter(filter)
            .with_writer(std::io::stderr)
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_target(false)
            .with_thread_ids(true)
            .with_writer(std::io::stderr)
            .init();
    }
}

async fn run(command: Command, config: LimitkitConfig) -> anyhow::Result<()> {
    match command {
        Command::ShowConfig => {
            println!("{}", serde_json::to_string_pretty(&config)?);
        }
        Command::Frequency {
            name,
            events,
            interval_ms,
            value,
        } => {
            let registry = LimiterRegistry::with_config(config);
            let aggregator = registry.frequency(&name);
            info!(name = %name, retention = %aggregator.retention(), "Feeding samples");

            for i in 1..=events {
                aggregator.put(value);
                println!(
                    "put {:>4}: frequency={:.3}/s total={} retained={}",
                    i,
                    aggregator.get_frequency(),
                    aggregator.total(),
                    aggregator.len()
                );
                if i < events {
                    tokio::time::sleep(Duration::from_millis(interval_ms)).await;
                }
            }
        }
        Command::Bucket {
            name,
            requests,
            amount,
            wait,
        } => {
            let registry = LimiterRegistry::with_config(config);
            let bucket = registry.bucket(&name);
            info!(
                name = %name,
                capacity = bucket.capacity(),
                fill_rate = bucket.fill_rate(),
                "Drawing tokens"
            );

            for i in 1..=requests {
                let drawn = if wait {
                    bucket.consume_with_wait_async(|_| amount).await
                } else {
                    bucket.consume(|available| if available >= amount { amount } else { 0.0 })
                };
                let outcome = if drawn == 0.0 { "declined" } else { "granted" };
                println!(
                    "request {:>4}: {} tokens={:.3}",
                    i,
                    outcome,
                    bucket.get_current_tokens()
                );
            }
        }
    }

    Ok(())
}

/// Wait for a shutdown signal (Ctrl+C or SIGTERM).
async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("Failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C, stopping");
        }
        _ = terminate => {
            info!("Received SIGTERM, stopping");
        }
    }
}
