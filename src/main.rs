//! Server entrypoint — the composition root's caller. All infrastructure
//! wiring lives in `voiceslot_http::bootstrap`; this binary only owns
//! process-level concerns: env loading, logging, and exit codes.

use tracing_subscriber::EnvFilter;
use voiceslot_http::bootstrap::{ServerConfig, start_server};

fn init_tracing() {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(env_filter).init();
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let _ = dotenvy::dotenv();
    init_tracing();

    let config = ServerConfig::from_env()?;
    start_server(config).await
}
