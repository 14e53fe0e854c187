//! OpenPad service daemon (`openpadd`).

use clap::Parser;
use openpad_service::{Daemon, ServiceConfig};
use tracing::{info, warn};

#[derive(Parser, Debug)]
#[command(name = "openpadd", about = "Sixaxis controller host service")]
struct Args {
    /// Path to a JSON service configuration file.
    #[arg(long)]
    config: Option<std::path::PathBuf>,

    /// Control-plane bind address (overrides the config file).
    #[arg(long)]
    bind: Option<std::net::SocketAddr>,

    /// Report feed address (overrides the config file).
    #[arg(long)]
    feed: Option<std::net::SocketAddr>,

    /// Settings store path (overrides the config file).
    #[arg(long)]
    settings: Option<std::path::PathBuf>,
}

fn load_config(args: &Args) -> ServiceConfig {
    let mut config = match &args.config {
        Some(path) => match std::fs::read_to_string(path) {
            Ok(text) => match serde_json::from_str(&text) {
                Ok(config) => config,
                Err(e) => {
                    warn!(path = %path.display(), "config file malformed, using defaults: {e}");
                    ServiceConfig::default()
                }
            },
            Err(e) => {
                warn!(path = %path.display(), "config file unreadable, using defaults: {e}");
                ServiceConfig::default()
            }
        },
        None => ServiceConfig::default(),
    };
    if let Some(bind) = args.bind {
        config.bind = bind;
    }
    if let Some(feed) = args.feed {
        config.feed = feed;
    }
    if let Some(settings) = &args.settings {
        config.settings_path = settings.clone();
    }
    config
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "openpad=debug,info".into()),
        )
        .init();

    info!("starting openpadd v{}", env!("CARGO_PKG_VERSION"));

    let args = Args::parse();
    let config = load_config(&args);
    Daemon::new(config).run().await
}
