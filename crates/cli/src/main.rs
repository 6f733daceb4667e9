use std::sync::Arc;

use {
    clap::Parser,
    tracing::{error, info},
    tracing_subscriber::EnvFilter,
};

use wagate_config::Config;

#[derive(Parser)]
#[command(name = "wagate", about = "wagate — multi-tenant messaging gateway")]
struct Cli {
    /// Log level (trace, debug, info, warn, error).
    #[arg(long, default_value = "info")]
    log_level: String,
}

fn init_tracing(cli: &Cli, production: bool) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(cli.log_level.clone()));

    if production {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .json()
            .init();
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).init();
    }
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    // Peek at APP_ENV before full config load so startup errors are already
    // formatted correctly.
    let production = std::env::var("APP_ENV").map(|v| v == "production").unwrap_or(true);
    init_tracing(&cli, production);

    let config = match Config::from_env() {
        Ok(config) => config,
        Err(err) => {
            error!(error = %err, "failed to load configuration");
            std::process::exit(1);
        },
    };

    info!(
        port = config.port,
        env = config.env,
        max_sessions = config.max_concurrent_sessions,
        send_rate_per_minute = config.send_rate_per_minute,
        "starting wagate"
    );

    // The protocol backend is linked in here; builds without one get the
    // placeholder that refuses to connect.
    let factory = Arc::new(wagate_client::noop::NoopFactory);

    if let Err(err) = wagate_gateway::server::run(config, factory).await {
        error!(error = %err, "gateway failed");
        std::process::exit(1);
    }
}
