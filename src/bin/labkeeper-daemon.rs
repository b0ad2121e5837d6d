// labkeeper service - REST control plane for a local notebook server

use anyhow::Result;
use clap::{Parser, ValueEnum};
use labkeeper::http::{DEFAULT_HOST, DEFAULT_PORT};
use labkeeper::service::{self, ServiceOptions};
use std::path::PathBuf;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum LogFormat {
    Pretty,
    Json,
}

/// labkeeper daemon - supervises a Jupyter notebook server
#[derive(Parser, Debug)]
#[command(name = "labkeeper-daemon")]
#[command(version, about, long_about = None)]
struct Args {
    /// Address to bind the REST API to
    #[arg(long, default_value = DEFAULT_HOST)]
    host: String,

    /// Port for the REST API
    #[arg(short, long, default_value_t = DEFAULT_PORT)]
    port: u16,

    /// Configuration file (.json or .toml)
    #[arg(short, long, default_value = "labkeeper.json")]
    config: PathBuf,

    /// Log output format
    #[arg(long, value_enum, default_value_t = LogFormat::Pretty)]
    log_format: LogFormat,

    /// Log level filter, overridden by RUST_LOG
    #[arg(long, default_value = "info")]
    log_level: String,
}

fn init_logging(args: &Args) {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&args.log_level))
        .unwrap_or_else(|_| EnvFilter::new("info"));

    let registry = tracing_subscriber::registry().with(filter);
    match args.log_format {
        LogFormat::Pretty => registry.with(tracing_subscriber::fmt::layer()).init(),
        LogFormat::Json => registry
            .with(tracing_subscriber::fmt::layer().json())
            .init(),
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    init_logging(&args);

    service::run(ServiceOptions {
        host: args.host,
        port: args.port,
        config_path: args.config,
    })
    .await
}
