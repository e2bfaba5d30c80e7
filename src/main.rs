use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use clap::{Parser, Subcommand};
use jsonwebtoken::jwk::JwkSet;
use tokio::sync::mpsc;
use tracing::info;
use tracing_subscriber::EnvFilter;

use bulwark::auth::{JwtValidator, SigningKeys};
use bulwark::config::{AuthConfig, ServerConfig};
use bulwark::events::{ChannelPublisher, Message};
use bulwark::rpc::Pipeline;
use bulwark::server::{AppState, create_router};
use bulwark::service::Services;
use bulwark::store::{SqliteStore, Store};

#[derive(Parser)]
#[command(name = "bulwark")]
#[command(about = "A supply-chain policy control plane", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the server
    Serve {
        /// Configuration file
        #[arg(long, short, default_value = "bulwark.toml")]
        config: PathBuf,

        /// Host to bind to, overriding the configuration file
        #[arg(long)]
        host: Option<String>,

        /// Port to bind to, overriding the configuration file
        #[arg(long, short)]
        port: Option<u16>,
    },

    /// Create or upgrade the database schema
    Migrate {
        /// SQLite database file
        #[arg(long, default_value = "./data/bulwark.db")]
        database: PathBuf,
    },
}

fn open_store(database: &Path) -> anyhow::Result<SqliteStore> {
    if let Some(parent) = database.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent)?;
    }
    let store = SqliteStore::new(database)
        .with_context(|| format!("failed to open {}", database.display()))?;
    store.initialize()?;
    Ok(store)
}

async fn fetch_jwks(client: &reqwest::Client, url: &str) -> anyhow::Result<JwkSet> {
    let set = client
        .get(url)
        .send()
        .await?
        .error_for_status()?
        .json::<JwkSet>()
        .await?;
    Ok(set)
}

async fn build_validator(auth: &AuthConfig) -> anyhow::Result<Arc<JwtValidator>> {
    let keys = match (&auth.hmac_secret, &auth.jwks_url) {
        (Some(secret), _) => SigningKeys::Shared(secret.clone().into_bytes()),
        (None, Some(url)) => SigningKeys::Jwks(
            fetch_jwks(&reqwest::Client::new(), url)
                .await
                .with_context(|| format!("failed to fetch JWKS from {url}"))?,
        ),
        (None, None) => anyhow::bail!("no token signing keys configured"),
    };
    Ok(Arc::new(
        JwtValidator::new(auth.issuer.clone(), auth.audience.clone(), keys)
            .with_leeway(auth.leeway_secs),
    ))
}

/// Keeps the validator's key set in step with the identity provider.
fn spawn_jwks_refresh(validator: Arc<JwtValidator>, url: String, every: Duration) {
    tokio::spawn(async move {
        let client = reqwest::Client::new();
        let mut interval = tokio::time::interval(every);
        interval.tick().await;
        loop {
            interval.tick().await;
            match fetch_jwks(&client, &url).await {
                Ok(set) => validator.rotate(SigningKeys::Jwks(set)),
                Err(e) => tracing::warn!("Failed to refresh JWKS from {}: {}", url, e),
            }
        }
    });
}

/// Drains published events. Delivery to the reconcilers' bus happens
/// outside this process; here they are only logged.
fn spawn_event_drain(mut rx: mpsc::Receiver<Message>) {
    tokio::spawn(async move {
        while let Some(message) = rx.recv().await {
            tracing::debug!(
                "Event {} ({} bytes)",
                message.topic,
                message.payload.len()
            );
        }
    });
}

async fn run_server(config: ServerConfig) -> anyhow::Result<()> {
    let store: Arc<dyn Store> = Arc::new(open_store(&config.database)?);

    let validator = build_validator(&config.auth).await?;
    if let Some(url) = &config.auth.jwks_url {
        spawn_jwks_refresh(
            validator.clone(),
            url.clone(),
            Duration::from_secs(config.auth.jwks_refresh_secs),
        );
    }

    let (publisher, rx) = ChannelPublisher::new(config.events.channel_capacity);
    spawn_event_drain(rx);

    let services = Services::new(store.clone(), Arc::new(publisher))
        .with_invitation_ttl(chrono::Duration::hours(config.invitations.ttl_hours));
    let state = Arc::new(AppState::new(Pipeline::new(validator, store), services));
    let app = create_router(state);

    let addr = config.socket_addr()?;
    info!("Starting server on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("bulwark=info")),
        )
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Serve { config, host, port } => {
            let mut config = ServerConfig::load(&config)
                .with_context(|| format!("failed to load {}", config.display()))?;
            if let Some(host) = host {
                config.host = host;
            }
            if let Some(port) = port {
                config.port = port;
            }
            run_server(config).await
        }
        Commands::Migrate { database } => {
            open_store(&database)?;
            info!("Database ready at {}", database.display());
            Ok(())
        }
    }
}
