//! Admin-approval state machine.
//!
//! ```text
//! pending ──approve──▶ approved
//!    │ ───reject───▶ rejected
//!    └───timeout───▶ expired
//! ```
//!
//! Terminal states never change again.  Each request sits behind its own
//! mutex, so the first valid decision (or the expiry timer) wins and every
//! later event is reported as late.

use std::collections::HashSet;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use std::time::Duration;

use chrono::{DateTime, TimeDelta, Utc};
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::error::{DecisionError, StorageError, WorkflowError};
use crate::filter::ClassificationResult;
use crate::store::SharedStore;
use crate::transport::Message;

const STORE_PREFIX: &str = "approval:";

/// Short lowercase hex id, safe to embed in a Telegram command.
pub type RequestId = String;

fn new_request_id() -> RequestId {
    uuid::Uuid::new_v4().simple().to_string()[..10].to_string()
}

/// `now + timeout`, saturating at the latest representable instant.
pub fn deadline_after(now: DateTime<Utc>, timeout: Duration) -> DateTime<Utc> {
    TimeDelta::from_std(timeout)
        .ok()
        .and_then(|d| now.checked_add_signed(d))
        .unwrap_or(DateTime::<Utc>::MAX_UTC)
}

// ───────────────────────────── Types ─────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ApprovalState {
    Pending,
    Approved,
    Rejected,
    Expired,
}

impl ApprovalState {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, Self::Pending)
    }

    pub fn emoji(&self) -> &'static str {
        match self {
            Self::Pending => "⏳",
            Self::Approved => "✅",
            Self::Rejected => "🚫",
            Self::Expired => "⌛",
        }
    }
}

impl fmt::Display for ApprovalState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Pending => "pending",
            Self::Approved => "approved",
            Self::Rejected => "rejected",
            Self::Expired => "expired",
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    Approve,
    Reject,
}

/// An admin's answer to an approval prompt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DecisionEvent {
    pub request_id: RequestId,
    pub admin_id: i64,
    pub decision: Decision,
    pub reason: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ApprovalRequest {
    pub id: RequestId,
    pub message_key: String,
    pub channel_title: String,
    pub message_text: String,
    pub classification: ClassificationResult,
    pub state: ApprovalState,
    pub created_at: DateTime<Utc>,
    pub deadline: DateTime<Utc>,
    pub decided_at: Option<DateTime<Utc>>,
    pub decided_by: Option<i64>,
    pub decision_reason: Option<String>,
}

impl ApprovalRequest {
    fn resolve(
        &mut self,
        state: ApprovalState,
        at: DateTime<Utc>,
        by: Option<i64>,
        reason: Option<String>,
    ) {
        debug_assert!(!self.state.is_terminal() && state.is_terminal());
        self.state = state;
        self.decided_at = Some(at);
        self.decided_by = by;
        self.decision_reason = reason;
    }
}

pub struct WorkflowSettings {
    pub timeout: Duration,
    pub authorized_admins: HashSet<i64>,
}

/// Counter snapshot for the `/stats` command.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct WorkflowStats {
    pub pending: usize,
    pub created: u64,
    pub approved: u64,
    pub rejected: u64,
    pub expired: u64,
    pub late: u64,
    pub unauthorized: u64,
}

impl fmt::Display for WorkflowStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "⏳ Pending: {}\n📤 Sent for approval: {}\n✅ Approved: {}\n🚫 Rejected: {}\n\
             ⌛ Expired: {}\n🕓 Late decisions: {}\n⛔ Unauthorized: {}",
            self.pending,
            self.created,
            self.approved,
            self.rejected,
            self.expired,
            self.late,
            self.unauthorized,
        )
    }
}

#[derive(Default)]
struct Counters {
    created: AtomicU64,
    approved: AtomicU64,
    rejected: AtomicU64,
    expired: AtomicU64,
    late: AtomicU64,
    unauthorized: AtomicU64,
}

struct Slot {
    request: ApprovalRequest,
    timer: CancellationToken,
}

fn lock(slot: &Mutex<Slot>) -> MutexGuard<'_, Slot> {
    slot.lock().unwrap_or_else(PoisonError::into_inner)
}

// ───────────────────────────── Workflow ──────────────────────────────────

pub struct ApprovalWorkflow {
    requests: DashMap<RequestId, Arc<Mutex<Slot>>>,
    by_message: DashMap<String, RequestId>,
    timeout: Duration,
    admins: HashSet<i64>,
    store: Option<SharedStore>,
    resolved_tx: mpsc::UnboundedSender<ApprovalRequest>,
    counters: Counters,
}

impl ApprovalWorkflow {
    /// Returns the workflow plus the stream of terminal resolutions (one item
    /// per request, emitted exactly once).
    pub fn new(
        settings: WorkflowSettings,
        store: Option<SharedStore>,
    ) -> (Arc<Self>, mpsc::UnboundedReceiver<ApprovalRequest>) {
        let (resolved_tx, resolved_rx) = mpsc::unbounded_channel();
        let workflow = Arc::new(Self {
            requests: DashMap::new(),
            by_message: DashMap::new(),
            timeout: settings.timeout,
            admins: settings.authorized_admins,
            store,
            resolved_tx,
            counters: Counters::default(),
        });
        (workflow, resolved_rx)
    }

    pub fn is_authorized(&self, admin_id: i64) -> bool {
        self.admins.contains(&admin_id)
    }

    pub fn admins(&self) -> impl Iterator<Item = i64> + '_ {
        self.admins.iter().copied()
    }

    fn slot(&self, id: &str) -> Option<Arc<Mutex<Slot>>> {
        self.requests.get(id).map(|s| Arc::clone(s.value()))
    }

    /// Create a pending request for `message` and start its expiry timer.
    pub fn open(
        self: &Arc<Self>,
        message: &Message,
        classification: ClassificationResult,
        now: DateTime<Utc>,
    ) -> Result<ApprovalRequest, WorkflowError> {
        let message_key = message.key();

        let mut id = new_request_id();
        while self.requests.contains_key(&id) {
            id = new_request_id();
        }

        match self.by_message.entry(message_key.clone()) {
            Entry::Occupied(e) => {
                return Err(WorkflowError::AlreadyRequested {
                    message_key,
                    request_id: e.get().clone(),
                });
            }
            Entry::Vacant(v) => {
                v.insert(id.clone());
            }
        }

        let request = ApprovalRequest {
            id: id.clone(),
            message_key,
            channel_title: message.channel_title.clone(),
            message_text: message.text.clone(),
            classification,
            state: ApprovalState::Pending,
            created_at: now,
            deadline: deadline_after(now, self.timeout),
            decided_at: None,
            decided_by: None,
            decision_reason: None,
        };

        let timer = CancellationToken::new();
        self.requests.insert(
            id.clone(),
            Arc::new(Mutex::new(Slot {
                request: request.clone(),
                timer: timer.clone(),
            })),
        );
        self.persist(&request);
        self.counters.created.fetch_add(1, Ordering::Relaxed);

        info!(
            target: "audit",
            request_id = %request.id,
            message_key = %request.message_key,
            score = request.classification.score,
            deadline = %request.deadline,
            "Approval request opened"
        );

        self.arm_timer(id, self.timeout, timer);
        Ok(request)
    }

    fn arm_timer(self: &Arc<Self>, id: RequestId, after: Duration, timer: CancellationToken) {
        let workflow: Weak<Self> = Arc::downgrade(self);
        tokio::spawn(async move {
            tokio::select! {
                _ = timer.cancelled() => {
                    debug!("Expiry timer for {id} cancelled");
                }
                _ = tokio::time::sleep(after) => {
                    if let Some(workflow) = workflow.upgrade() {
                        workflow.expire(&id);
                    }
                }
            }
        });
    }

    /// Timer path: expire `id` if it is still pending.  The deadline itself
    /// is recorded as the decision time.
    fn expire(&self, id: &str) -> Option<ApprovalRequest> {
        let slot = self.slot(id)?;
        let resolved = {
            let mut slot = lock(&slot);
            if slot.request.state.is_terminal() {
                return None;
            }
            let at = slot.request.deadline;
            slot.request.resolve(ApprovalState::Expired, at, None, None);
            slot.request.clone()
        };
        self.on_resolved(&resolved);
        Some(resolved)
    }

    /// Apply an admin decision received at `now`.
    ///
    /// Exactly one transition ever commits per request; anything after that
    /// (or after the deadline) is [`DecisionError::Late`].
    pub fn decide(
        &self,
        event: DecisionEvent,
        now: DateTime<Utc>,
    ) -> Result<ApprovalRequest, DecisionError> {
        let DecisionEvent {
            request_id,
            admin_id,
            decision,
            reason,
        } = event;

        if !self.is_authorized(admin_id) {
            self.counters.unauthorized.fetch_add(1, Ordering::Relaxed);
            warn!(
                target: "audit",
                request_id = %request_id,
                admin_id,
                "Unauthorized decision attempt ignored"
            );
            return Err(DecisionError::Unauthorized {
                request_id,
                admin_id,
            });
        }

        let Some(slot) = self.slot(&request_id) else {
            warn!(
                target: "audit",
                request_id = %request_id,
                admin_id,
                "Decision for unknown request"
            );
            return Err(DecisionError::UnknownRequest(request_id));
        };

        let (result, expired_now) = {
            let mut slot = lock(&slot);
            match slot.request.state {
                ApprovalState::Pending if now >= slot.request.deadline => {
                    // Deadline passed but the timer has not run yet.
                    let at = slot.request.deadline;
                    slot.request.resolve(ApprovalState::Expired, at, None, None);
                    slot.timer.cancel();
                    (
                        Err(ApprovalState::Expired),
                        Some(slot.request.clone()),
                    )
                }
                ApprovalState::Pending => {
                    let state = match decision {
                        Decision::Approve => ApprovalState::Approved,
                        Decision::Reject => ApprovalState::Rejected,
                    };
                    slot.request.resolve(state, now, Some(admin_id), reason);
                    slot.timer.cancel();
                    (Ok(slot.request.clone()), None)
                }
                state => (Err(state), None),
            }
        };

        if let Some(expired) = &expired_now {
            self.on_resolved(expired);
        }

        match result {
            Ok(resolved) => {
                self.on_resolved(&resolved);
                Ok(resolved)
            }
            Err(state) => {
                self.counters.late.fetch_add(1, Ordering::Relaxed);
                info!(
                    target: "audit",
                    request_id = %request_id,
                    admin_id,
                    state = %state,
                    "Late decision ignored"
                );
                Err(DecisionError::Late { request_id, state })
            }
        }
    }

    fn terminal_counter(&self, state: ApprovalState) -> Option<&AtomicU64> {
        match state {
            ApprovalState::Approved => Some(&self.counters.approved),
            ApprovalState::Rejected => Some(&self.counters.rejected),
            ApprovalState::Expired => Some(&self.counters.expired),
            ApprovalState::Pending => None,
        }
    }

    fn on_resolved(&self, request: &ApprovalRequest) {
        let Some(counter) = self.terminal_counter(request.state) else {
            return;
        };
        counter.fetch_add(1, Ordering::Relaxed);
        self.persist(request);

        info!(
            target: "audit",
            request_id = %request.id,
            message_key = %request.message_key,
            state = %request.state,
            decided_by = ?request.decided_by,
            reason = ?request.decision_reason,
            "Approval request resolved"
        );

        if self.resolved_tx.send(request.clone()).is_err() {
            debug!("Resolution receiver dropped; {} not forwarded", request.id);
        }
    }

    fn persist(&self, request: &ApprovalRequest) {
        let Some(store) = &self.store else {
            return;
        };
        let result = serde_json::to_string(request)
            .map_err(StorageError::from)
            .and_then(|json| store.put(&format!("{STORE_PREFIX}{}", request.id), &json));
        if let Err(e) = result {
            warn!("Failed to persist approval request {}: {e}", request.id);
        }
    }

    /// Expire every overdue pending request.  Safety net next to the
    /// per-request timers (e.g. after a clock jump).
    pub fn sweep_expired(&self, now: DateTime<Utc>) -> Vec<ApprovalRequest> {
        let slots: Vec<Arc<Mutex<Slot>>> =
            self.requests.iter().map(|e| Arc::clone(e.value())).collect();

        let mut expired = Vec::new();
        for slot in slots {
            let resolved = {
                let mut slot = lock(&slot);
                if slot.request.state.is_terminal() || now < slot.request.deadline {
                    continue;
                }
                let at = slot.request.deadline;
                slot.request.resolve(ApprovalState::Expired, at, None, None);
                slot.timer.cancel();
                slot.request.clone()
            };
            self.on_resolved(&resolved);
            expired.push(resolved);
        }
        expired
    }

    /// Forget terminal requests decided before `cutoff`.
    pub fn prune_resolved(&self, cutoff: DateTime<Utc>) -> usize {
        let stale: Vec<(RequestId, String)> = self
            .requests
            .iter()
            .filter_map(|e| {
                let slot = lock(e.value());
                let r = &slot.request;
                match r.decided_at {
                    Some(at) if r.state.is_terminal() && at < cutoff => {
                        Some((r.id.clone(), r.message_key.clone()))
                    }
                    _ => None,
                }
            })
            .collect();

        for (id, message_key) in &stale {
            self.requests.remove(id);
            self.by_message.remove(message_key);
            if let Some(store) = &self.store {
                let _ = store.remove(&format!("{STORE_PREFIX}{id}"));
            }
        }
        stale.len()
    }

    #[cfg(test)]
    pub fn get(&self, id: &str) -> Option<ApprovalRequest> {
        self.slot(id).map(|s| lock(&s).request.clone())
    }

    #[cfg(test)]
    pub fn request_for_message(&self, message_key: &str) -> Option<RequestId> {
        self.by_message.get(message_key).map(|id| id.value().clone())
    }

    /// Pending requests, oldest first.
    pub fn pending(&self) -> Vec<ApprovalRequest> {
        let slots: Vec<Arc<Mutex<Slot>>> =
            self.requests.iter().map(|e| Arc::clone(e.value())).collect();
        let mut pending: Vec<ApprovalRequest> = slots
            .iter()
            .map(|s| lock(s).request.clone())
            .filter(|r| r.state == ApprovalState::Pending)
            .collect();
        pending.sort_by_key(|r| r.created_at);
        pending
    }

    pub fn stats(&self) -> WorkflowStats {
        WorkflowStats {
            pending: self.pending().len(),
            created: self.counters.created.load(Ordering::Relaxed),
            approved: self.counters.approved.load(Ordering::Relaxed),
            rejected: self.counters.rejected.load(Ordering::Relaxed),
            expired: self.counters.expired.load(Ordering::Relaxed),
            late: self.counters.late.load(Ordering::Relaxed),
            unauthorized: self.counters.unauthorized.load(Ordering::Relaxed),
        }
    }

    /// Reload requests from the store.  Pending ones get their timers
    /// re-armed for the remaining time; overdue ones expire immediately.
    pub fn restore(self: &Arc<Self>, now: DateTime<Utc>) -> usize {
        let Some(store) = &self.store else {
            return 0;
        };
        let rows = match store.scan_prefix(STORE_PREFIX) {
            Ok(rows) => rows,
            Err(e) => {
                warn!("Failed to load persisted approval requests: {e}");
                return 0;
            }
        };

        let mut restored = 0;
        for (key, json) in rows {
            let request: ApprovalRequest = match serde_json::from_str(&json) {
                Ok(r) => r,
                Err(e) => {
                    warn!("Skipping corrupt approval record {key}: {e}");
                    continue;
                }
            };
            let id = request.id.clone();
            let pending = request.state == ApprovalState::Pending;
            self.counters.created.fetch_add(1, Ordering::Relaxed);
            // Overdue pending ones are counted by `expire` below.
            if let Some(counter) = self.terminal_counter(request.state) {
                counter.fetch_add(1, Ordering::Relaxed);
            }
            let remaining = (request.deadline - now).to_std().unwrap_or(Duration::ZERO);
            let timer = CancellationToken::new();

            self.by_message
                .insert(request.message_key.clone(), id.clone());
            self.requests.insert(
                id.clone(),
                Arc::new(Mutex::new(Slot {
                    request,
                    timer: timer.clone(),
                })),
            );
            restored += 1;

            if pending {
                if remaining.is_zero() {
                    self.expire(&id);
                } else {
                    self.arm_timer(id, remaining, timer);
                }
            }
        }
        info!("Restored {restored} approval request(s) from store");
        restored
    }
}

impl fmt::Display for ApprovalWorkflow {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "ApprovalWorkflow(timeout={}s, admins={}, durable={})",
            self.timeout.as_secs(),
            self.admins.len(),
            self.store.is_some(),
        )
    }
}
