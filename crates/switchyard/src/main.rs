use clap::{Parser, ValueEnum};
use switchyard::config::Config;
use switchyard::proxy::SwitchyardServer;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Debug, Clone, Copy, ValueEnum)]
enum LogFormat {
    Text,
    Json,
}

#[derive(Parser, Debug)]
#[command(name = "switchyard", version, about = "Predicate-driven HTTP router and rewriting proxy")]
struct Args {
    /// Path to the YAML configuration file
    #[arg(short, long, env = "SWITCHYARD_CONFIG")]
    config: String,

    /// Override the listener port from the configuration
    #[arg(short, long)]
    port: Option<u16>,

    #[arg(long, value_enum, default_value = "text")]
    log_format: LogFormat,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    match args.log_format {
        LogFormat::Text => tracing_subscriber::fmt().with_env_filter(filter).init(),
        LogFormat::Json => tracing_subscriber::fmt()
            .json()
            .with_env_filter(filter)
            .init(),
    }

    let mut config = Config::from_file(&args.config)?;
    if let Some(port) = args.port {
        config.listen.port = port;
    }

    info!(
        "Starting switchyard {} with config {}",
        env!("CARGO_PKG_VERSION"),
        args.config
    );

    SwitchyardServer::new(config)?.run().await
}
