// ─────────────────────────────── Tests ───────────────────────────────────

#[cfg(test)]
mod tests {
    use std::collections::HashSet;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::{Arc, Mutex};
    use std::time::Duration;

    use async_trait::async_trait;
    use chrono::{DateTime, NaiveTime, TimeZone, Utc};
    use chrono_tz::Asia::Tehran;
    use tokio::sync::mpsc::UnboundedReceiver;

    use crate::approval::{
        ApprovalRequest, ApprovalState, ApprovalWorkflow, Decision, DecisionEvent, WorkflowSettings,
    };
    use crate::dedup::Deduplicator;
    use crate::error::{DecisionError, DeliveryError};
    use crate::filter::{Classifier, TopicCategory, TopicModel, TopicTerm};
    use crate::pipeline::*;
    use crate::schedule::{ScheduleGate, ScheduleWindow};
    use crate::transport::{Message, Recipient, Transport};

    const ADMIN: i64 = 42;
    const TARGET: &str = "@news_out";

    // ── Fakes ──

    /// Records every send; the first `failures` sends fail.
    #[derive(Default)]
    struct FakeTransport {
        sent: Mutex<Vec<(Recipient, String)>>,
        failures: AtomicU32,
        always_fail: bool,
    }

    impl FakeTransport {
        fn flaky(failures: u32) -> Self {
            Self {
                failures: AtomicU32::new(failures),
                ..Self::default()
            }
        }

        fn broken() -> Self {
            Self {
                always_fail: true,
                ..Self::default()
            }
        }

        fn sent(&self) -> Vec<(Recipient, String)> {
            self.sent.lock().unwrap().clone()
        }

        fn sent_to(&self, recipient: &Recipient) -> Vec<String> {
            self.sent()
                .into_iter()
                .filter(|(r, _)| r == recipient)
                .map(|(_, text)| text)
                .collect()
        }
    }

    #[async_trait]
    impl Transport for FakeTransport {
        async fn send(&self, recipient: &Recipient, content: &str) -> Result<(), DeliveryError> {
            if self.always_fail {
                return Err(DeliveryError::Unavailable("down".into()));
            }
            let remaining = self.failures.load(Ordering::SeqCst);
            if remaining > 0 {
                self.failures.store(remaining - 1, Ordering::SeqCst);
                return Err(DeliveryError::Unavailable("flaky".into()));
            }
            self.sent
                .lock()
                .unwrap()
                .push((recipient.clone(), content.to_string()));
            Ok(())
        }
    }

    // ── Fixtures ──

    /// Tehran wall clock on Monday 2025-06-16.
    fn tehran(h: u32, m: u32) -> DateTime<Utc> {
        Tehran
            .with_ymd_and_hms(2025, 6, 16, h, m, 0)
            .unwrap()
            .with_timezone(&Utc)
    }

    fn msg(channel_id: i64, id: i64, text: &str) -> Message {
        Message {
            id,
            channel_id,
            channel_title: "Frontline".into(),
            text: text.into(),
            received_at: tehran(12, 0),
            raw_metadata: serde_json::Value::Null,
        }
    }

    fn build(
        transport: Arc<FakeTransport>,
    ) -> (Arc<Pipeline>, UnboundedReceiver<ApprovalRequest>) {
        let gate = ScheduleGate::new(
            Tehran,
            vec![ScheduleWindow::new(
                NaiveTime::from_hms_opt(8, 30, 0).unwrap(),
                NaiveTime::from_hms_opt(22, 0, 0).unwrap(),
            )],
        );
        let model =
            TopicModel::new(vec![TopicTerm::new("airstrike", 6.0, TopicCategory::War)]).unwrap();
        let (workflow, resolved) = ApprovalWorkflow::new(
            WorkflowSettings {
                timeout: Duration::from_secs(3600),
                authorized_admins: HashSet::from([ADMIN]),
            },
            None,
        );
        let pipeline = Pipeline::new(
            gate,
            Deduplicator::new(Duration::from_secs(86_400), 1000),
            Classifier::new(model, 5.0),
            workflow,
            transport,
            PipelineSettings {
                target_channel: Some(TARGET.into()),
                attribution: "📡 @news_out".into(),
                retry: RetryPolicy {
                    attempts: 3,
                    initial_backoff: Duration::from_millis(100),
                },
            },
        );
        (Arc::new(pipeline), resolved)
    }

    fn approve(id: &str, admin_id: i64) -> DecisionEvent {
        DecisionEvent {
            request_id: id.into(),
            admin_id,
            decision: Decision::Approve,
            reason: None,
        }
    }

    fn pending_id(outcome: &Outcome) -> String {
        match outcome {
            Outcome::PendingApproval(id) => id.clone(),
            other => panic!("expected pending_approval, got {other}"),
        }
    }

    /// Handle `text` from channel -100 at Tehran noon; it must go to approval.
    async fn open_at_noon(pipeline: &Pipeline, id: i64, text: &str) -> String {
        pending_id(&pipeline.handle_at(&msg(-100, id, text), tehran(12, 0)).await)
    }

    // ── End-to-end ──

    #[tokio::test]
    async fn relevant_message_goes_to_approval_and_gets_published() {
        let transport = Arc::new(FakeTransport::default());
        let (pipeline, mut resolved) = build(Arc::clone(&transport));

        let m = msg(-100, 1, "Airstrike hits capital");
        let outcome = pipeline.handle_at(&m, tehran(12, 0)).await;
        let id = pending_id(&outcome);

        let request = pipeline.workflow().get(&id).unwrap();
        assert_eq!(request.classification.score, 6.0);
        assert_eq!(request.classification.category, Some(TopicCategory::War));

        let prompts = transport.sent_to(&Recipient::Admin(ADMIN));
        assert_eq!(prompts.len(), 1);
        assert!(prompts[0].contains(&format!("/approve_{id}")));
        assert!(prompts[0].contains("Airstrike hits capital"));

        let decided = pipeline
            .apply_decision(approve(&id, ADMIN), tehran(12, 10))
            .await
            .unwrap();
        assert_eq!(decided.state, ApprovalState::Approved);
        assert_eq!(decided.decided_by, Some(ADMIN));

        let resolution = resolved.recv().await.unwrap();
        pipeline.on_resolved(&resolution).await;

        let posts = transport.sent_to(&Recipient::Channel(TARGET.into()));
        assert_eq!(posts.len(), 1);
        assert!(posts[0].contains("Airstrike hits capital"));
        assert!(posts[0].contains("@news_out"));
    }

    #[tokio::test]
    async fn outside_window_is_dropped_before_dedup() {
        let transport = Arc::new(FakeTransport::default());
        let (pipeline, _resolved) = build(Arc::clone(&transport));

        let m = msg(-100, 1, "Airstrike hits capital");
        assert_eq!(
            pipeline.handle_at(&m, tehran(23, 0)).await,
            Outcome::SuppressedInactive
        );
        assert_eq!(pipeline.dedup().len(), 0);
        assert!(pipeline.workflow().pending().is_empty());
        assert!(transport.sent().is_empty());

        // Same message later in the day is processed normally.
        pending_id(&pipeline.handle_at(&m, tehran(12, 0)).await);
    }

    #[tokio::test]
    async fn irrelevant_message_is_still_remembered() {
        let transport = Arc::new(FakeTransport::default());
        let (pipeline, _resolved) = build(Arc::clone(&transport));

        let m = msg(-100, 1, "Weather will be sunny tomorrow");
        assert_eq!(
            pipeline.handle_at(&m, tehran(12, 0)).await,
            Outcome::SuppressedIrrelevant
        );
        assert_eq!(pipeline.dedup().len(), 1);

        let again = msg(-200, 9, "weather will be SUNNY tomorrow!");
        assert_eq!(
            pipeline.handle_at(&again, tehran(12, 5)).await,
            Outcome::SuppressedDuplicate
        );
    }

    #[tokio::test]
    async fn reposted_text_yields_a_single_request() {
        let transport = Arc::new(FakeTransport::default());
        let (pipeline, _resolved) = build(Arc::clone(&transport));

        open_at_noon(&pipeline, 1, "Airstrike hits capital").await;
        assert_eq!(
            pipeline
                .handle_at(&msg(-300, 77, "AIRSTRIKE hits capital."), tehran(12, 1))
                .await,
            Outcome::SuppressedDuplicate
        );
        assert_eq!(pipeline.workflow().pending().len(), 1);
        assert_eq!(transport.sent_to(&Recipient::Admin(ADMIN)).len(), 1);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_copies_open_one_request() {
        let transport = Arc::new(FakeTransport::default());
        let (pipeline, _resolved) = build(Arc::clone(&transport));

        let handles: Vec<_> = (0..8)
            .map(|i| {
                let pipeline = Arc::clone(&pipeline);
                tokio::spawn(async move {
                    pipeline
                        .handle_at(&msg(-100 - i, i, "Airstrike hits capital"), tehran(12, 0))
                        .await
                })
            })
            .collect();

        let mut pending = 0;
        for h in handles {
            match h.await.unwrap() {
                Outcome::PendingApproval(_) => pending += 1,
                Outcome::SuppressedDuplicate => {}
                other => panic!("unexpected outcome {other}"),
            }
        }
        assert_eq!(pending, 1);
        assert_eq!(pipeline.workflow().pending().len(), 1);
    }

    // ── Delivery ──

    #[tokio::test(start_paused = true)]
    async fn flaky_transport_delivers_prompt_exactly_once() {
        let transport = Arc::new(FakeTransport::flaky(2));
        let (pipeline, _resolved) = build(Arc::clone(&transport));

        open_at_noon(&pipeline, 1, "Airstrike hits capital").await;
        assert_eq!(transport.sent_to(&Recipient::Admin(ADMIN)).len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn undeliverable_prompt_still_expires() {
        let transport = Arc::new(FakeTransport::broken());
        let (pipeline, mut resolved) = build(Arc::clone(&transport));

        let id = open_at_noon(&pipeline, 1, "Airstrike hits capital").await;
        assert_eq!(
            pipeline.workflow().get(&id).unwrap().state,
            ApprovalState::Pending
        );

        let expired = resolved.recv().await.unwrap();
        assert_eq!(expired.id, id);
        assert_eq!(expired.state, ApprovalState::Expired);
    }

    #[test]
    fn backoff_doubles() {
        let policy = RetryPolicy {
            attempts: 4,
            initial_backoff: Duration::from_millis(500),
        };
        assert_eq!(policy.backoff(1), Duration::from_millis(500));
        assert_eq!(policy.backoff(2), Duration::from_millis(1000));
        assert_eq!(policy.backoff(3), Duration::from_millis(2000));
    }

    // ── Decisions & resolutions ──

    #[tokio::test]
    async fn unauthorized_decision_is_acknowledged_and_ignored() {
        let transport = Arc::new(FakeTransport::default());
        let (pipeline, _resolved) = build(Arc::clone(&transport));

        let id = open_at_noon(&pipeline, 1, "Airstrike hits capital").await;
        let err = pipeline
            .apply_decision(approve(&id, 7), tehran(12, 5))
            .await
            .unwrap_err();
        assert!(matches!(err, DecisionError::Unauthorized { admin_id: 7, .. }));
        assert_eq!(transport.sent_to(&Recipient::Admin(7)).len(), 1);
        assert_eq!(
            pipeline.workflow().get(&id).unwrap().state,
            ApprovalState::Pending
        );
    }

    #[tokio::test(start_paused = true)]
    async fn resolution_loop_publishes_approved_and_reports_expired() {
        let transport = Arc::new(FakeTransport::default());
        let (pipeline, resolved) = build(Arc::clone(&transport));
        tokio::spawn(Arc::clone(&pipeline).run_resolutions(resolved));

        let approved = open_at_noon(&pipeline, 1, "Airstrike near port").await;
        open_at_noon(&pipeline, 2, "Second airstrike reported").await;
        pipeline
            .apply_decision(approve(&approved, ADMIN), tehran(12, 1))
            .await
            .unwrap();

        // Let the second request time out on the paused clock.
        tokio::time::sleep(Duration::from_secs(3601)).await;
        for _ in 0..10 {
            tokio::task::yield_now().await;
        }

        let posts = transport.sent_to(&Recipient::Channel(TARGET.into()));
        assert_eq!(posts.len(), 1);
        assert!(posts[0].contains("Airstrike near port"));

        let admin_msgs = transport.sent_to(&Recipient::Admin(ADMIN));
        assert!(admin_msgs.iter().any(|t| t.contains("expired")));
    }

    #[tokio::test]
    async fn housekeeping_expires_overdue_requests() {
        let transport = Arc::new(FakeTransport::default());
        let (pipeline, _resolved) = build(Arc::clone(&transport));

        let id = open_at_noon(&pipeline, 1, "Airstrike hits capital").await;
        pipeline.housekeeping(tehran(13, 1), chrono::TimeDelta::hours(24));
        assert_eq!(
            pipeline.workflow().get(&id).unwrap().state,
            ApprovalState::Expired
        );
    }
}
