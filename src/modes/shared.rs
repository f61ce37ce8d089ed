use anyhow::{Context, Result, anyhow};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::sync::Arc;
use tokio::sync::mpsc::UnboundedReceiver;
use tracing::info;

use crate::approval::{ApprovalRequest, ApprovalWorkflow};
use crate::config::Settings;
use crate::pipeline::Pipeline;
use crate::store::{MemoryStore, SharedStore, SqliteStore};
use crate::transport::{Message, Transport};

#[derive(Clone)]
pub(super) struct BotCfg {
    pub token: String,
}

#[derive(Clone)]
pub(super) struct ReplayCfg {
    pub input_path: String,
    pub step_ms: u64,
}

/// One line of a replay file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub(super) struct ReplayEvent {
    /// Message id; the 1-based line number when absent.
    #[serde(default)]
    pub id: Option<i64>,
    pub timestamp: i64,
    pub channel_id: i64,
    #[serde(default)]
    pub channel_title: String,
    pub text: String,
}

impl ReplayEvent {
    pub fn into_message(self, line: usize) -> Result<Message> {
        let received_at = DateTime::<Utc>::from_timestamp(self.timestamp, 0)
            .ok_or_else(|| anyhow!("timestamp {} out of range", self.timestamp))?;
        Ok(Message {
            id: self.id.unwrap_or(line as i64),
            channel_id: self.channel_id,
            channel_title: self.channel_title,
            text: self.text,
            received_at,
            raw_metadata: serde_json::json!({ "replay_line": line }),
        })
    }
}

pub(super) fn must_env(key: &str) -> Result<String> {
    std::env::var(key).map_err(|_| anyhow!("Missing env var {key}"))
}

pub(super) fn load_bot_cfg() -> Result<BotCfg> {
    Ok(BotCfg {
        token: must_env("BOT_TOKEN")?,
    })
}

pub(super) fn load_replay_cfg() -> Result<ReplayCfg> {
    let input_path = must_env("REPLAY_INPUT_PATH")?;
    let step_ms = std::env::var("REPLAY_STEP_MS")
        .ok()
        .and_then(|v| v.parse::<u64>().ok())
        .unwrap_or(0);

    Ok(ReplayCfg {
        input_path,
        step_ms,
    })
}

/// Wire the pipeline from settings.  With `durable`, state is kept in the
/// SQLite file named by `STATE_DB_PATH` and restored from it, or in memory
/// when no file is configured.
pub(super) fn build_pipeline(
    settings: &Settings,
    transport: Arc<dyn Transport>,
    durable: bool,
) -> Result<(Arc<Pipeline>, UnboundedReceiver<ApprovalRequest>)> {
    let store: Option<SharedStore> = match (&settings.state_db_path, durable) {
        (Some(path), true) => Some(Arc::new(
            SqliteStore::open(path).with_context(|| format!("failed to open state DB {path}"))?,
        )),
        (None, true) => Some(Arc::new(MemoryStore::new())),
        (_, false) => None,
    };

    let mut dedup = settings.deduplicator();
    if let Some(store) = &store {
        dedup = dedup.with_store(Arc::clone(store));
    }
    let (workflow, resolved) = ApprovalWorkflow::new(settings.workflow_settings(), store);

    let now = Utc::now();
    let fingerprints = dedup.restore(now);
    let requests = workflow.restore(now);
    if fingerprints + requests > 0 {
        info!("Restored {fingerprints} fingerprint(s) and {requests} approval request(s)");
    }

    let pipeline = Pipeline::new(
        settings.gate(),
        dedup,
        settings.classifier(),
        workflow,
        transport,
        settings.pipeline_settings(),
    );
    Ok((Arc::new(pipeline), resolved))
}

pub(super) fn load_replay_events(path: &str) -> Result<Vec<Message>> {
    let file = File::open(path).with_context(|| format!("failed to open replay file {path}"))?;
    let reader = BufReader::new(file);

    let mut messages = Vec::new();
    for (idx, line) in reader.lines().enumerate() {
        let line = line.with_context(|| format!("failed to read line {}", idx + 1))?;
        if line.trim().is_empty() {
            continue;
        }
        let event: ReplayEvent = serde_json::from_str(&line)
            .with_context(|| format!("invalid JSON at line {}", idx + 1))?;
        messages.push(event.into_message(idx + 1)?);
    }

    messages.sort_by_key(|m| (m.received_at, m.channel_id));
    Ok(messages)
}
