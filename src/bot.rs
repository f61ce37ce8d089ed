//! Bot API side: outbound [`Transport`] plus the admin command long-poll loop.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use reqwest::Client as HttpClient;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::approval::{Decision, DecisionEvent};
use crate::error::DeliveryError;
use crate::pipeline::{Pipeline, render};
use crate::transport::{Recipient, Transport};

// ---------------------------------------------------------------------------
// Bot API types (getUpdates)
// ---------------------------------------------------------------------------

#[derive(Deserialize)]
struct GetUpdatesResponse {
    ok: bool,
    result: Vec<TgUpdate>,
}

#[derive(Deserialize)]
struct TgUpdate {
    update_id: i64,
    message: Option<TgMessage>,
}

#[derive(Deserialize)]
struct TgMessage {
    chat: TgChat,
    from: Option<TgUser>,
    text: Option<String>,
}

#[derive(Deserialize)]
struct TgChat {
    id: i64,
}

#[derive(Deserialize)]
struct TgUser {
    id: i64,
}

// ---------------------------------------------------------------------------
// Sending
// ---------------------------------------------------------------------------

#[derive(Serialize)]
#[serde(untagged)]
enum ChatId<'a> {
    Id(i64),
    Username(&'a str),
}

impl<'a> From<&'a Recipient> for ChatId<'a> {
    fn from(recipient: &'a Recipient) -> Self {
        match recipient {
            Recipient::Admin(id) => Self::Id(*id),
            Recipient::Channel(chat) => match chat.parse::<i64>() {
                Ok(id) => Self::Id(id),
                Err(_) => Self::Username(chat),
            },
        }
    }
}

#[derive(Serialize)]
struct SendMessagePayload<'a> {
    chat_id: ChatId<'a>,
    text: &'a str,
    disable_web_page_preview: bool,
}

/// Delivers text through the Bot API `sendMessage` method.
pub struct BotTransport {
    http: HttpClient,
    token: String,
}

impl BotTransport {
    pub fn new(http: HttpClient, token: String) -> Self {
        Self { http, token }
    }
}

#[async_trait]
impl Transport for BotTransport {
    async fn send(&self, recipient: &Recipient, content: &str) -> Result<(), DeliveryError> {
        let url = format!("https://api.telegram.org/bot{}/sendMessage", self.token);
        let body = SendMessagePayload {
            chat_id: recipient.into(),
            text: content,
            disable_web_page_preview: true,
        };
        let resp = self.http.post(&url).json(&body).send().await?;
        if !resp.status().is_success() {
            let status = resp.status().as_u16();
            let body = resp.text().await.unwrap_or_default();
            return Err(DeliveryError::Rejected { status, body });
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Admin commands
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AdminCommand {
    Decide {
        request_id: String,
        decision: Decision,
        reason: Option<String>,
    },
    Pending,
    Stats,
    Help,
}

/// Parse `/approve_<id> [reason]`, `/submit_<id>`, `/reject_<id> [reason]`,
/// `/pending`, `/stats`, `/start`, `/help`.  The `_` after the verb may be
/// omitted or replaced by a space; an `@BotName` suffix is ignored.
pub fn parse_command(text: &str) -> Option<AdminCommand> {
    let text = text.trim();
    if !text.starts_with('/') {
        return None;
    }
    let (head, rest) = match text.split_once(char::is_whitespace) {
        Some((head, rest)) => (head, rest.trim()),
        None => (text, ""),
    };
    // Strip optional @BotName suffix (e.g. /approve_ab12@MyBot)
    let head = head.split('@').next().unwrap_or("").to_lowercase();

    match head.as_str() {
        "/pending" => return Some(AdminCommand::Pending),
        "/stats" => return Some(AdminCommand::Stats),
        "/start" | "/help" => return Some(AdminCommand::Help),
        _ => {}
    }

    let (decision, id) = [
        ("/approve", Decision::Approve),
        ("/submit", Decision::Approve),
        ("/reject", Decision::Reject),
    ]
    .into_iter()
    .find_map(|(verb, decision)| head.strip_prefix(verb).map(|id| (decision, id)))?;

    let id = id.trim_start_matches('_');
    let (request_id, reason) = if id.is_empty() {
        // `/approve <id> [reason]`
        let (id, reason) = rest.split_once(char::is_whitespace).unwrap_or((rest, ""));
        (id.to_string(), reason.trim())
    } else {
        (id.to_string(), rest)
    };

    if request_id.is_empty() || !request_id.chars().all(|c| c.is_ascii_alphanumeric()) {
        return None;
    }

    Some(AdminCommand::Decide {
        request_id,
        decision,
        reason: (!reason.is_empty()).then(|| reason.to_string()),
    })
}

const HELP: &str = "👋 News approval bot\n\
                    /pending – news awaiting approval\n\
                    /stats   – approval statistics\n\
                    /approve_<id> [reason] – publish\n\
                    /reject_<id> [reason]  – discard";

// ---------------------------------------------------------------------------
// Long-poll loop
// ---------------------------------------------------------------------------

/// Runs forever: polls `getUpdates` and dispatches admin commands.
pub async fn run_bot_polling(http: HttpClient, bot_token: String, pipeline: Arc<Pipeline>) {
    let mut offset: i64 = 0;
    info!("Bot long-poll loop started.");

    loop {
        let url = format!(
            "https://api.telegram.org/bot{bot_token}/getUpdates\
             ?timeout=30&offset={offset}&allowed_updates=[\"message\"]"
        );

        let resp = match tokio::time::timeout(Duration::from_secs(40), http.get(&url).send()).await
        {
            Ok(Ok(r)) => r,
            Ok(Err(e)) => {
                warn!("getUpdates HTTP error: {e}");
                tokio::time::sleep(Duration::from_secs(5)).await;
                continue;
            }
            Err(_elapsed) => {
                warn!("getUpdates request timed out locally – retrying");
                continue;
            }
        };

        let updates: GetUpdatesResponse = match resp.json().await {
            Ok(u) => u,
            Err(e) => {
                warn!("Failed to deserialize getUpdates response: {e}");
                tokio::time::sleep(Duration::from_secs(5)).await;
                continue;
            }
        };

        if !updates.ok {
            warn!("getUpdates returned ok=false");
            tokio::time::sleep(Duration::from_secs(5)).await;
            continue;
        }

        for update in updates.result {
            offset = update.update_id + 1;

            let Some(msg) = update.message else {
                continue;
            };
            let Some(from) = msg.from else {
                continue;
            };
            let Some(command) = msg.text.as_deref().and_then(parse_command) else {
                continue;
            };

            let pipeline = Arc::clone(&pipeline);
            tokio::spawn(async move {
                dispatch(&pipeline, msg.chat.id, from.id, command).await;
            });
        }
    }
}

async fn dispatch(pipeline: &Pipeline, chat_id: i64, user_id: i64, command: AdminCommand) {
    debug!("chat_id={chat_id} user_id={user_id} → {command:?}");
    let workflow = pipeline.workflow();

    let reply = match command {
        AdminCommand::Decide {
            request_id,
            decision,
            reason,
        } => {
            let event = DecisionEvent {
                request_id,
                admin_id: user_id,
                decision,
                reason,
            };
            // Acknowledged by the pipeline itself.
            let _ = pipeline.apply_decision(event, Utc::now()).await;
            return;
        }
        _ if !workflow.is_authorized(user_id) => {
            info!(target: "audit", admin_id = user_id, "Command from unauthorized user ignored");
            return;
        }
        AdminCommand::Pending => {
            render::pending_list(&workflow.pending(), pipeline.gate().timezone())
        }
        AdminCommand::Stats => render::stats_report(&workflow.stats()),
        AdminCommand::Help => HELP.to_string(),
    };

    if let Err(e) = pipeline.deliver(Recipient::Admin(chat_id), &reply).await {
        warn!("Failed to answer chat_id={chat_id}: {e}");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn decide(id: &str, decision: Decision, reason: Option<&str>) -> Option<AdminCommand> {
        Some(AdminCommand::Decide {
            request_id: id.into(),
            decision,
            reason: reason.map(str::to_string),
        })
    }

    #[test]
    fn parses_decision_commands() {
        assert_eq!(parse_command("/approve_ab12cd"), decide("ab12cd", Decision::Approve, None));
        assert_eq!(parse_command("/submit_ab12cd"), decide("ab12cd", Decision::Approve, None));
        assert_eq!(parse_command("/submitab12cd"), decide("ab12cd", Decision::Approve, None));
        assert_eq!(
            parse_command("/reject_ab12cd  duplicate of earlier post "),
            decide("ab12cd", Decision::Reject, Some("duplicate of earlier post"))
        );
        assert_eq!(
            parse_command("/reject ab12cd fake"),
            decide("ab12cd", Decision::Reject, Some("fake"))
        );
        assert_eq!(parse_command("/approve_AB12@NewsBot"), decide("ab12", Decision::Approve, None));
    }

    #[test]
    fn parses_info_commands() {
        assert_eq!(parse_command("/pending"), Some(AdminCommand::Pending));
        assert_eq!(parse_command("/stats@NewsBot"), Some(AdminCommand::Stats));
        assert_eq!(parse_command("/start"), Some(AdminCommand::Help));
    }

    #[test]
    fn ignores_noise() {
        assert_eq!(parse_command("hello"), None);
        assert_eq!(parse_command("/approve"), None);
        assert_eq!(parse_command("/approve_"), None);
        assert_eq!(parse_command("/approve_ab-12"), None);
        assert_eq!(parse_command("/unknown"), None);
    }

    #[test]
    fn channel_recipient_maps_to_chat_id() {
        let json = |r: &Recipient| serde_json::to_string(&ChatId::from(r)).unwrap();
        assert_eq!(json(&Recipient::Admin(5)), "5");
        assert_eq!(json(&Recipient::Channel("-100123".into())), "-100123");
        assert_eq!(json(&Recipient::Channel("@news".into())), "\"@news\"");
    }
}
