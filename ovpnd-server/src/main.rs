//! ovpnd - OpenVPN client identity and profile service
//!
//! This binary runs the management API over an Easy-RSA PKI.
//! It handles:
//! - Client certificate issuance and revocation via the easyrsa CLI
//! - Inline .ovpn profile export with per-request remote overrides
//! - Optional static bearer token auth for revocation

use clap::Parser;
use ovpnd_lib::{ClientManager, Config, EasyRsa, NameLocks, PkiStore, ProfileAssembler};
use ovpnd_server::api::{self, ApiState};
use std::sync::Arc;

#[derive(Parser)]
#[command(name = "ovpnd")]
#[command(author, version, about = "OpenVPN client identity and profile service", long_about = None)]
struct Args {
    /// Bind address
    #[arg(long, default_value = "0.0.0.0")]
    bind: String,

    /// API port
    #[arg(long, default_value = "8000")]
    port: u16,

    /// Log level
    #[arg(long, default_value = "info")]
    log_level: String,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    // Initialize tracing with configured log level (must be early for logging to work)
    tracing_subscriber::fmt()
        .with_env_filter(args.log_level.clone())
        .init();

    let config = Arc::new(Config::load()?);

    tracing::info!("Starting ovpnd");
    tracing::info!("OpenVPN dir: {}", config.ovpn_dir.display());
    tracing::info!("Easy-RSA binary: {}", config.easyrsa_bin.display());
    tracing::info!(
        "Profile remote: {} {} {}",
        config.remote_host,
        config.remote_port,
        config.remote_proto
    );
    if config.api_token.is_none() {
        tracing::warn!("API_TOKEN not set; revocation is unauthenticated");
    }

    let store = PkiStore::new(&config);
    if let Err(e) = store.ensure_ready().await {
        // The PKI may be initialized after startup; requests fail until it is
        tracing::warn!("PKI not ready: {}", e);
    }

    let ca = Arc::new(EasyRsa::from_config(&config));
    let locks = Arc::new(NameLocks::new());
    let manager = Arc::new(ClientManager::new(store.clone(), ca, locks.clone()));
    let profiles = Arc::new(ProfileAssembler::new(Arc::clone(&config), store, locks));

    let state = ApiState {
        config,
        manager,
        profiles,
    };
    let app = api::create_router(state);

    let addr = format!("{}:{}", args.bind, args.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    tracing::info!("API listening on http://{}", addr);

    axum::serve(listener, app).await?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_args_defaults() {
        let args = Args::parse_from(["ovpnd"]);
        assert_eq!(args.bind, "0.0.0.0");
        assert_eq!(args.port, 8000);
        assert_eq!(args.log_level, "info");
    }

    #[test]
    fn test_args_custom_bind() {
        let args = Args::parse_from(["ovpnd", "--bind", "127.0.0.1", "--port", "9000"]);
        assert_eq!(args.bind, "127.0.0.1");
        assert_eq!(args.port, 9000);
    }

    #[test]
    fn test_args_log_level() {
        let args = Args::parse_from(["ovpnd", "--log-level", "debug"]);
        assert_eq!(args.log_level, "debug");
    }
}
