use crate::approval::deadline_after;
use crate::config::Settings;
use crate::pipeline::Outcome;
use crate::transport::{StdoutTransport, Transport};
use anyhow::{Result, anyhow};
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

use super::shared::{build_pipeline, load_replay_cfg, load_replay_events};

/// Feed a recorded JSONL file through the pipeline.  Each message is handled
/// at its own timestamp; prompts and publications go to stdout.
pub(super) async fn run(settings: Settings) -> Result<()> {
    let replay = load_replay_cfg()?;
    let messages = load_replay_events(&replay.input_path)?;
    let Some(last) = messages.last().map(|m| m.received_at) else {
        return Err(anyhow!("Replay input is empty: {}", replay.input_path));
    };

    let transport: Arc<dyn Transport> = Arc::new(StdoutTransport);
    let (pipeline, mut resolved) = build_pipeline(&settings, transport, false)?;
    info!(
        "Replay started: {} messages from {}",
        messages.len(),
        replay.input_path
    );
    info!("Pipeline: {pipeline}");

    let (mut pending, mut inactive, mut duplicate, mut irrelevant) = (0usize, 0, 0, 0);
    for (idx, message) in messages.iter().enumerate() {
        if idx > 0 && replay.step_ms > 0 {
            tokio::time::sleep(Duration::from_millis(replay.step_ms)).await;
        }
        match pipeline.handle_at(message, message.received_at).await {
            Outcome::PendingApproval(_) => pending += 1,
            Outcome::SuppressedInactive => inactive += 1,
            Outcome::SuppressedDuplicate => duplicate += 1,
            Outcome::SuppressedIrrelevant => irrelevant += 1,
        }
    }

    // Nobody answers during a replay: close out whatever is still open.
    let horizon = deadline_after(last, settings.approval_timeout);
    let expired = pipeline.workflow().sweep_expired(horizon).len();
    while let Ok(request) = resolved.try_recv() {
        pipeline.on_resolved(&request).await;
    }

    info!(
        "Replay complete: total={}, pending={}, inactive={}, duplicate={}, irrelevant={}, \
         expired_at_end={}",
        messages.len(),
        pending,
        inactive,
        duplicate,
        irrelevant,
        expired
    );

    Ok(())
}
