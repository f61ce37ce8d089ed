use crate::bot::{self, BotTransport};
use crate::config::Settings;
use crate::telegram;
use crate::transport::{Message, Transport};
use anyhow::Result;
use chrono::{TimeDelta, Utc};
use grammers_client::Update;
use reqwest::Client as HttpClient;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

use super::shared::{build_pipeline, load_bot_cfg};

/// How often overdue requests and stale fingerprints are swept.
const HOUSEKEEPING_EVERY: Duration = Duration::from_secs(60);
/// How long resolved requests stay answerable with a "late" reply.
const RESOLVED_RETENTION_HOURS: i64 = 24;

pub(super) async fn run(settings: Settings) -> Result<()> {
    let tg = telegram::load_tg_cfg()?;
    let bot_cfg = load_bot_cfg()?;

    let http = HttpClient::new();
    let transport: Arc<dyn Transport> =
        Arc::new(BotTransport::new(http.clone(), bot_cfg.token.clone()));
    let (pipeline, resolved) = build_pipeline(&settings, transport, true)?;
    info!("Pipeline: {pipeline}");
    if settings.target_channel.is_none() {
        warn!("TARGET_CHANNEL not set – approved news will only be logged");
    }

    tokio::spawn(Arc::clone(&pipeline).run_resolutions(resolved));
    {
        let http = http.clone();
        let token = bot_cfg.token.clone();
        let pipeline = Arc::clone(&pipeline);
        tokio::spawn(async move {
            bot::run_bot_polling(http, token, pipeline).await;
        });
    }
    {
        let pipeline = Arc::clone(&pipeline);
        tokio::spawn(async move {
            let mut tick = tokio::time::interval(HOUSEKEEPING_EVERY);
            loop {
                tick.tick().await;
                pipeline.housekeeping(Utc::now(), TimeDelta::hours(RESOLVED_RETENTION_HOURS));
            }
        });
    }

    let (client, pool) = telegram::connect(&tg)?;

    let runner = pool.runner;
    tokio::spawn(async move {
        runner.run().await;
    });

    let updates_rx = pool.updates;

    telegram::ensure_user_login(&client, &tg).await?;
    let watched = telegram::resolve_channels(&client, &tg).await?;

    let mut stream = client.stream_updates(
        updates_rx,
        grammers_client::UpdatesConfiguration {
            catch_up: true,
            update_queue_limit: Some(2048),
        },
    );

    info!("Running in live mode. Waiting for new messages...");
    loop {
        let Ok(update) = stream.next().await else {
            warn!("Update stream ended.");
            break;
        };

        if let Update::NewMessage(msg) = update {
            let Ok(peer) = msg.peer() else {
                continue;
            };
            let channel_id = peer.id().bare_id();
            let Some(username) = watched.get(&channel_id) else {
                continue;
            };
            let text = msg.text().trim();
            if text.is_empty() {
                continue;
            }

            let message = Message {
                id: i64::from(msg.id()),
                channel_id,
                channel_title: peer.name().unwrap_or(username.as_str()).to_string(),
                text: text.to_string(),
                received_at: Utc::now(),
                raw_metadata: serde_json::json!({ "username": username }),
            };
            debug!("New post {} from @{username}", message.key());

            let pipeline = Arc::clone(&pipeline);
            tokio::spawn(async move {
                pipeline.handle(&message).await;
            });
        }
    }

    Ok(())
}
