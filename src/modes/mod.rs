mod live;
mod replay;
mod shared;

use anyhow::Result;
use tracing::info;

use crate::config::Settings;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum RunMode {
    Live,
    Replay,
}

impl RunMode {
    fn from_env() -> Self {
        let raw = std::env::var("RUN_MODE").unwrap_or_else(|_| "live".into());
        match raw.trim().to_lowercase().as_str() {
            "replay" => Self::Replay,
            _ => Self::Live,
        }
    }
}

pub async fn run_from_env() -> Result<()> {
    let settings = Settings::from_env()?;
    info!("Config: {settings}");

    match RunMode::from_env() {
        RunMode::Live => live::run(settings).await,
        RunMode::Replay => replay::run(settings).await,
    }
}
