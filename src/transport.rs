//! Collaborator seam for message delivery.
//!
//! Ingestion (grammers, replay files) produces [`Message`] values; every
//! outbound text goes through a [`Transport`].  The pipeline never talks to
//! Telegram directly.

use std::fmt;
use std::io::Write;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::DeliveryError;

/// A post received from a monitored channel.  Immutable once received.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    /// Source-provided id, unique per channel.
    pub id: i64,
    pub channel_id: i64,
    #[serde(default)]
    pub channel_title: String,
    pub text: String,
    pub received_at: DateTime<Utc>,
    #[serde(default)]
    pub raw_metadata: serde_json::Value,
}

impl Message {
    /// Stable `channel:id` key.  At most one approval request exists per key.
    pub fn key(&self) -> String {
        format!("{}:{}", self.channel_id, self.id)
    }
}

/// Where a piece of outbound text goes.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Recipient {
    /// Private chat with an admin (Telegram user id).
    Admin(i64),
    /// Publication target: `@username` or a numeric chat id.
    Channel(String),
}

impl fmt::Display for Recipient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Admin(id) => write!(f, "admin:{id}"),
            Self::Channel(chat) => write!(f, "channel:{chat}"),
        }
    }
}

#[async_trait]
pub trait Transport: Send + Sync {
    async fn send(&self, recipient: &Recipient, content: &str) -> Result<(), DeliveryError>;
}

/// Prints every outbound text to stdout.  Used by replay mode.
pub struct StdoutTransport;

#[async_trait]
impl Transport for StdoutTransport {
    async fn send(&self, recipient: &Recipient, content: &str) -> Result<(), DeliveryError> {
        let mut out = std::io::stdout().lock();
        writeln!(out, "\n[→ {recipient}]\n{content}\n")
            .and_then(|()| out.flush())
            .map_err(|e| DeliveryError::Unavailable(format!("stdout: {e}")))
    }
}
