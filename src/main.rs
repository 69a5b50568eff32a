//! Peertrade Server
//!
//! Authoritative trading server. Configuration comes from the
//! environment; see `ServerConfig` and `AuthConfig` for the knobs.

use anyhow::Context;
use tracing::info;
use tracing_subscriber::{EnvFilter, FmtSubscriber};

use peertrade::network::{AuthConfig, ServerConfig, TradeServer};
use peertrade::{DEFAULT_MAX_STACK, DEFAULT_SLOTS_PER_SIDE, VERSION};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let subscriber = FmtSubscriber::builder()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .finish();
    tracing::subscriber::set_global_default(subscriber)
        .context("failed to set tracing subscriber")?;

    let config = config_from_env()?;

    info!("Peertrade Server v{}", VERSION);
    info!("Listening on {}", config.bind_addr);
    info!(
        "Tables: {} slots per side, max stack {}",
        config.slots_per_side, config.max_stack
    );
    if !config.auth.is_configured() {
        info!("No auth key material configured; running with development identities");
    }

    let server = TradeServer::new(config);
    server.run().await.context("server terminated")?;
    Ok(())
}

fn config_from_env() -> anyhow::Result<ServerConfig> {
    let defaults = ServerConfig::default();

    let bind_addr = match std::env::var("PEERTRADE_BIND_ADDR") {
        Ok(raw) => raw
            .parse()
            .with_context(|| format!("invalid PEERTRADE_BIND_ADDR: {raw}"))?,
        Err(_) => defaults.bind_addr,
    };

    Ok(ServerConfig {
        bind_addr,
        max_connections: env_parse("PEERTRADE_MAX_CONNECTIONS", defaults.max_connections)?,
        idle_timeout: defaults.idle_timeout,
        slots_per_side: env_parse("PEERTRADE_SLOTS_PER_SIDE", DEFAULT_SLOTS_PER_SIDE)?,
        max_stack: env_parse("PEERTRADE_MAX_STACK", DEFAULT_MAX_STACK)?,
        starting_cash: env_parse("PEERTRADE_STARTING_CASH", defaults.starting_cash)?,
        auth: AuthConfig::from_env(),
        version: VERSION.to_string(),
    })
}

fn env_parse<T: std::str::FromStr>(name: &str, default: T) -> anyhow::Result<T>
where
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match std::env::var(name) {
        Ok(raw) => raw
            .parse()
            .with_context(|| format!("invalid {name}: {raw}")),
        Err(_) => Ok(default),
    }
}
