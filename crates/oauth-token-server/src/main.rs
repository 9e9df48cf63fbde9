//! OAuth2 Token Server - Entry Point

use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use clap::Parser;
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

use oauth_token_server::{
    config::{Config, defaults},
    server::{self, AppContext, Listener, Server},
};

#[derive(Parser, Debug)]
#[command(name = "oauth-token-server")]
#[command(about = "OAuth2 token endpoint backed by an embedded database")]
#[command(version)]
struct Cli {
    /// Address to listen on (host:port)
    #[arg(long, default_value = defaults::ADDRESS, env = "OAUTH_ADDRESS")]
    address: String,

    /// Database file holding clients, users and tokens
    #[arg(long, default_value = defaults::DATABASE, env = "OAUTH_DATABASE")]
    database: PathBuf,

    /// Serve over TLS (requires --tls-cert and --tls-key)
    #[arg(long, env = "OAUTH_TLS")]
    tls: bool,

    /// PEM certificate chain
    #[arg(long, env = "OAUTH_TLS_CERT")]
    tls_cert: Option<PathBuf>,

    /// PEM private key
    #[arg(long, env = "OAUTH_TLS_KEY")]
    tls_key: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info", env = "RUST_LOG")]
    log_level: String,

    /// Output logs as JSON
    #[arg(long)]
    json_logs: bool,
}

impl Cli {
    fn config(&self) -> Config {
        let config = Config::new(self.address.clone(), self.database.clone());
        if self.tls { config.with_tls(self.tls_cert.clone(), self.tls_key.clone()) } else { config }
    }
}

fn init_tracing(log_level: &str, json: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(log_level));

    let subscriber = tracing_subscriber::registry().with(filter);

    if json {
        subscriber.with(tracing_subscriber::fmt::layer().json()).init();
    } else {
        subscriber.with(tracing_subscriber::fmt::layer().compact()).init();
    }
}

async fn start(config: &Config) -> anyhow::Result<Server> {
    let ctx = Arc::new(AppContext::from_config(config)?);
    let listener = Listener::bind(&config.server).await?;
    tracing::info!(
        address = %listener.local_addr()?,
        tls = listener.is_tls(),
        "Listening"
    );
    Ok(Server::new(listener, server::create_router(ctx)))
}

#[tokio::main]
async fn main() -> ExitCode {
    dotenv::dotenv().ok();
    let cli = Cli::parse();

    init_tracing(&cli.log_level, cli.json_logs);

    tracing::info!(version = env!("CARGO_PKG_VERSION"), "Starting OAuth2 token server");

    let config = cli.config();
    let server = match start(&config).await {
        Ok(server) => server,
        Err(e) => {
            tracing::error!(error = %e, "Startup failed");
            return ExitCode::FAILURE;
        }
    };

    server.run(server::shutdown_signal()).await.into()
}
