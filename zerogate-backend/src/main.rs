//! zerogate-backend
//!
//! HTTP service that trades a zero-knowledge proof for a session token.

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use zerogate_backend::{config::ServerConfig, serve};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    let config = ServerConfig::from_env()?;

    let json_logs = config.environment.is_production();
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        format!("zerogate_backend={0},tower_http={0}", config.log_level).into()
    });
    tracing_subscriber::registry()
        .with(filter)
        .with(json_logs.then(|| tracing_subscriber::fmt::layer().json()))
        .with((!json_logs).then(tracing_subscriber::fmt::layer))
        .init();

    serve(config).await
}
