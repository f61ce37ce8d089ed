mod approval;
mod bot;
mod config;
mod dedup;
mod error;
mod filter;
mod modes;
mod pipeline;
mod schedule;
mod store;
mod telegram;
mod transport;

use anyhow::Result;
use dotenvy::dotenv;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<()> {
    dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    modes::run_from_env().await
}
