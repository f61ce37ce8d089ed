//! Per-message orchestration: gate → dedup → classify → approval.
//!
//! One [`Pipeline`] is shared (behind an `Arc`) by every message task.  All
//! mutable state lives in the injected [`Deduplicator`] and
//! [`ApprovalWorkflow`]; the pipeline itself only sequences calls and talks
//! to the [`Transport`].
pub mod pipeline_tests;
pub mod render;

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use futures_util::future::join_all;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::approval::{
    ApprovalRequest, ApprovalState, ApprovalWorkflow, DecisionEvent, RequestId,
};
use crate::dedup::{Deduplicator, Fingerprint};
use crate::error::{DecisionError, DeliveryError, WorkflowError};
use crate::filter::Classifier;
use crate::schedule::ScheduleGate;
use crate::transport::{Message, Recipient, Transport};

/// What happened to one incoming message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    SuppressedInactive,
    SuppressedDuplicate,
    SuppressedIrrelevant,
    PendingApproval(RequestId),
}

impl fmt::Display for Outcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::SuppressedInactive => f.write_str("suppressed_inactive"),
            Self::SuppressedDuplicate => f.write_str("suppressed_duplicate"),
            Self::SuppressedIrrelevant => f.write_str("suppressed_irrelevant"),
            Self::PendingApproval(id) => write!(f, "pending_approval({id})"),
        }
    }
}

/// Bounded retry with exponential backoff for outbound delivery.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub attempts: u32,
    pub initial_backoff: Duration,
}

impl RetryPolicy {
    fn backoff(&self, attempt: u32) -> Duration {
        self.initial_backoff
            .saturating_mul(2u32.saturating_pow(attempt.saturating_sub(1)))
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            attempts: 3,
            initial_backoff: Duration::from_millis(500),
        }
    }
}

pub struct PipelineSettings {
    /// Publish destination for approved news.  `None` = log only.
    pub target_channel: Option<String>,
    pub attribution: String,
    pub retry: RetryPolicy,
}

pub struct Pipeline {
    gate: ScheduleGate,
    dedup: Deduplicator,
    classifier: Classifier,
    workflow: Arc<ApprovalWorkflow>,
    transport: Arc<dyn Transport>,
    settings: PipelineSettings,
}

impl Pipeline {
    pub fn new(
        gate: ScheduleGate,
        dedup: Deduplicator,
        classifier: Classifier,
        workflow: Arc<ApprovalWorkflow>,
        transport: Arc<dyn Transport>,
        settings: PipelineSettings,
    ) -> Self {
        Self {
            gate,
            dedup,
            classifier,
            workflow,
            transport,
            settings,
        }
    }

    pub fn workflow(&self) -> &Arc<ApprovalWorkflow> {
        &self.workflow
    }

    #[cfg(test)]
    pub fn dedup(&self) -> &Deduplicator {
        &self.dedup
    }

    pub fn gate(&self) -> &ScheduleGate {
        &self.gate
    }

    pub async fn handle(&self, message: &Message) -> Outcome {
        self.handle_at(message, Utc::now()).await
    }

    /// Run one message through the pipeline as if it arrived at `now`.
    pub async fn handle_at(&self, message: &Message, now: DateTime<Utc>) -> Outcome {
        let outcome = self.decide_outcome(message, now).await;
        info!(
            target: "audit",
            message_key = %message.key(),
            channel = %message.channel_title,
            outcome = %outcome,
            "Message handled"
        );
        outcome
    }

    async fn decide_outcome(&self, message: &Message, now: DateTime<Utc>) -> Outcome {
        // ── Schedule ──
        if !self.gate.is_active(now) {
            if let Some(next) = self.gate.next_opening(now) {
                debug!("Outside operating hours; next opening at {next}");
            }
            return Outcome::SuppressedInactive;
        }

        // ── Dedup ──
        let fp = Fingerprint::of(&message.text);
        if self.dedup.check_and_remember(fp, now) {
            return Outcome::SuppressedDuplicate;
        }

        // ── Classify ──
        let classification = self.classifier.classify(message);
        if !classification.is_relevant() {
            return Outcome::SuppressedIrrelevant;
        }

        // ── Approval ──
        let request = match self.workflow.open(message, classification, now) {
            Ok(request) => request,
            Err(WorkflowError::AlreadyRequested { request_id, .. }) => {
                debug!("Message {} already has request {request_id}", message.key());
                return Outcome::SuppressedDuplicate;
            }
        };

        self.notify_admins(&request).await;
        Outcome::PendingApproval(request.id)
    }

    /// Send the approval prompt to every authorized admin, concurrently.
    /// Failures are logged; the request's timer is already running.
    async fn notify_admins(&self, request: &ApprovalRequest) {
        let prompt = render::approval_prompt(request, self.gate.timezone());
        let admins: Vec<i64> = self.workflow.admins().collect();

        let results = join_all(
            admins
                .iter()
                .map(|&id| self.deliver(Recipient::Admin(id), &prompt)),
        )
        .await;

        let delivered = results.iter().filter(|r| r.is_ok()).count();
        if delivered == 0 && !admins.is_empty() {
            warn!(
                target: "audit",
                request_id = %request.id,
                "Approval prompt reached no admin; request will expire"
            );
        } else {
            debug!(
                "Approval prompt {} delivered to {delivered}/{} admin(s)",
                request.id,
                admins.len()
            );
        }
    }

    /// `Transport::send` with bounded exponential backoff.
    pub async fn deliver(&self, recipient: Recipient, content: &str) -> Result<(), DeliveryError> {
        let policy = self.settings.retry;
        let attempts = policy.attempts.max(1);
        let mut attempt = 1;
        loop {
            match self.transport.send(&recipient, content).await {
                Ok(()) => return Ok(()),
                Err(e) if attempt >= attempts => {
                    warn!("Delivery to {recipient} failed after {attempt} attempt(s): {e}");
                    return Err(e);
                }
                Err(e) => {
                    let wait = policy.backoff(attempt);
                    debug!(
                        "Delivery to {recipient} failed (attempt {attempt}): {e}; \
                         retrying in {wait:?}"
                    );
                    tokio::time::sleep(wait).await;
                    attempt += 1;
                }
            }
        }
    }

    /// Apply an admin decision and acknowledge it to the sender.
    pub async fn apply_decision(
        &self,
        event: DecisionEvent,
        now: DateTime<Utc>,
    ) -> Result<ApprovalRequest, DecisionError> {
        let admin_id = event.admin_id;
        let result = self.workflow.decide(event, now);
        let ack = render::decision_ack(&result);
        if let Err(e) = self.deliver(Recipient::Admin(admin_id), &ack).await {
            debug!("Decision ack to {admin_id} not delivered: {e}");
        }
        result
    }

    /// Downstream action for one terminal request.
    pub async fn on_resolved(&self, request: &ApprovalRequest) {
        match request.state {
            ApprovalState::Approved => self.publish(request).await,
            ApprovalState::Expired => {
                let notice = render::expiry_notice(request);
                let admins: Vec<i64> = self.workflow.admins().collect();
                join_all(
                    admins
                        .iter()
                        .map(|&id| self.deliver(Recipient::Admin(id), &notice)),
                )
                .await;
            }
            ApprovalState::Rejected => {
                debug!("Request {} rejected; nothing to publish", request.id);
            }
            ApprovalState::Pending => {}
        }
    }

    async fn publish(&self, request: &ApprovalRequest) {
        let Some(target) = &self.settings.target_channel else {
            info!("Approved request {} (no target channel configured)", request.id);
            return;
        };
        let text =
            render::publication_text(request, &self.settings.attribution, self.gate.timezone());
        match self.deliver(Recipient::Channel(target.clone()), &text).await {
            Ok(()) => info!(
                target: "audit",
                request_id = %request.id,
                message_key = %request.message_key,
                "Published to {target}"
            ),
            Err(e) => warn!(
                target: "audit",
                request_id = %request.id,
                "Publication to {target} failed: {e}"
            ),
        }
    }

    /// Consume terminal resolutions until the workflow is dropped.
    pub async fn run_resolutions(
        self: Arc<Self>,
        mut resolved: mpsc::UnboundedReceiver<ApprovalRequest>,
    ) {
        while let Some(request) = resolved.recv().await {
            let pipeline = Arc::clone(&self);
            tokio::spawn(async move {
                pipeline.on_resolved(&request).await;
            });
        }
        debug!("Resolution stream closed");
    }

    /// Periodic safety net: purge stale fingerprints, expire overdue
    /// requests, forget requests resolved more than `retention` ago.
    pub fn housekeeping(&self, now: DateTime<Utc>, retention: chrono::TimeDelta) {
        let swept = self.dedup.sweep(now);
        let expired = self.workflow.sweep_expired(now).len();
        let pruned = self.workflow.prune_resolved(now - retention);
        if swept + expired + pruned > 0 {
            debug!(
                "Housekeeping: {swept} fingerprint(s) swept, {expired} request(s) expired, \
                 {pruned} pruned"
            );
        }
    }
}

impl fmt::Display for Pipeline {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} | {} | {} | {} | target={}, retry={}x{}ms",
            self.gate,
            self.dedup,
            self.classifier,
            self.workflow,
            self.settings.target_channel.as_deref().unwrap_or("<none>"),
            self.settings.retry.attempts,
            self.settings.retry.initial_backoff.as_millis(),
        )
    }
}
