//! NGINX Plus Agent - status collector for statsd
//!
//! Polls the NGINX Plus `/status` JSON endpoint on a fixed interval and
//! forwards its counters and gauges to a statsd daemon:
//! - connection and request totals
//! - per-peer traffic, response classes and health checks of the
//!   `cache_servers` upstream
//! - counters sent as increments, point-in-time values as gauges

mod config;
mod emitter;
mod error;
mod fetch;
mod poller;
mod sink;
mod status;

use anyhow::{Context, Result};
use clap::Parser;
use config::{Args, Config};
use fetch::HttpStatusSource;
use poller::Poller;
use sink::StatsdSink;
use tracing::{error, info, warn};

/// Exit code for missing or invalid startup configuration
const EXIT_CONFIG: i32 = 127;
/// Exit code when the poll loop stops on a fetch or decode failure
const EXIT_FATAL: i32 = 1;

#[tokio::main]
async fn main() {
    // .env is optional
    dotenvy::dotenv().ok();

    let args = match Args::try_parse() {
        Ok(args) => args,
        // --help and --version land here too
        Err(e) if !e.use_stderr() => e.exit(),
        Err(e) => {
            let _ = e.print();
            std::process::exit(EXIT_CONFIG);
        }
    };

    let config = match Config::load(args) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("nginxplus-agent: {e}");
            std::process::exit(EXIT_CONFIG);
        }
    };

    config.logging.init();
    info!("NGINX Plus agent v{} starting", env!("CARGO_PKG_VERSION"));

    if let Err(e) = run(config).await {
        error!("{e:#}");
        std::process::exit(EXIT_FATAL);
    }

    info!("NGINX Plus agent stopped");
}

async fn run(config: Config) -> Result<()> {
    let source = HttpStatusSource::new(&config.status.url, config.status.timeout)
        .context("Failed to build HTTP client")?;

    let sink = StatsdSink::bind(
        &config.statsd.host,
        config.statsd.port,
        &config.statsd.prefix,
        config.statsd.counter_type,
    )
    .context("Failed to bind statsd socket")?;

    info!(
        url = %config.status.url,
        statsd = %format!("{}:{}", config.statsd.host, config.statsd.port),
        prefix = %config.statsd.prefix,
        counter_type = %config.statsd.counter_type,
        "Agent configured"
    );

    let poller = Poller::new(source, sink, config.status.schema_version, config.poll.clone());
    poller
        .run(shutdown_signal())
        .await
        .context("Poll loop stopped")?;

    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!("Failed to listen for Ctrl-C: {}", e);
        std::future::pending::<()>().await;
    }
}
