//! Seed scenario: outbound call answered, prompts for a 6-digit code,
//! caller enters it correctly, call closes and completes.

mod support;

use call_orchestrator::digit_capture::plan::PlanStep;
use call_orchestrator::digit_capture::{CollectionPlan, Profile};
use call_orchestrator::types::NotificationKind;

use support::{carrier_event, registry_of, settle, test_orchestrator, FakeProviderAdapter};

#[tokio::test]
async fn otp_entered_correctly_closes_and_completes_the_call() {
    let adapter = FakeProviderAdapter::always_succeeds("twilio");
    let registry = registry_of(vec![adapter], call_orchestrator::config::Config::default().provider);
    let (orchestrator, persistence, _bus) = test_orchestrator(registry).await;

    let call_id = orchestrator
        .originate("+15551234567".into(), "+15550001111".into(), Some("verify the caller".into()), None, None, "example.test".into(), None)
        .await
        .unwrap();

    orchestrator.handle_carrier_event(carrier_event("twilio", "ringing", &call_id, serde_json::json!({}))).await.unwrap();
    settle().await;
    orchestrator
        .handle_carrier_event(carrier_event("twilio", "answered", &call_id, serde_json::json!({"answered_by": "human"})))
        .await
        .unwrap();
    settle().await;
    orchestrator.handle_carrier_event(carrier_event("twilio", "stream.frame", &call_id, serde_json::json!({}))).await.unwrap();
    settle().await;

    let mut plan = CollectionPlan::new(
        "otp_capture",
        vec![PlanStep { profile: Profile::Verification, min_len: 6, max_len: 6, step_prompt: "enter the code".into() }],
        "Thanks, you're verified.",
    );
    plan.end_call_on_success = true;
    orchestrator.install_digit_plan(&call_id, plan).await.unwrap();
    settle().await;

    let call = persistence.get_call(&call_id).await.unwrap().unwrap();
    assert_eq!(call.status, "digit_capturing");

    orchestrator.feed_digits(&call_id, "dtmf", "412356".into(), true).await.unwrap();
    settle().await;

    let call = persistence.get_call(&call_id).await.unwrap().unwrap();
    assert_eq!(call.status, "closing");
    assert_eq!(call.last_otp_masked.as_deref(), Some("4****6"));
    assert_eq!(call.digit_count, 1);

    orchestrator.handle_carrier_event(carrier_event("twilio", "ended", &call_id, serde_json::json!({}))).await.unwrap();
    settle().await;

    let call = persistence.get_call(&call_id).await.unwrap().unwrap();
    assert_eq!(call.status, "ended");
    assert!(call.ended_at.is_some());

    let notifications = persistence.select_pending_notifications(50).await.unwrap();
    let ours: Vec<_> = notifications.into_iter().filter(|n| n.call_id == call_id).collect();
    assert!(ours.iter().any(|n| n.kind == NotificationKind::CallCompleted));

    let transitions = persistence.list_transitions(&call_id).await.unwrap();
    for pair in transitions.windows(2) {
        assert_eq!(pair[1].seq, pair[0].seq + 1);
    }
}

#[tokio::test]
async fn wrong_length_otp_is_rejected_and_call_stays_in_digit_capturing() {
    let adapter = FakeProviderAdapter::always_succeeds("twilio");
    let registry = registry_of(vec![adapter], call_orchestrator::config::Config::default().provider);
    let (orchestrator, persistence, _bus) = test_orchestrator(registry).await;

    let call_id = orchestrator
        .originate("+15551234567".into(), "+15550001111".into(), None, None, None, "example.test".into(), None)
        .await
        .unwrap();
    orchestrator.handle_carrier_event(carrier_event("twilio", "answered", &call_id, serde_json::json!({"answered_by": "human"}))).await.unwrap();
    settle().await;
    orchestrator.handle_carrier_event(carrier_event("twilio", "stream.frame", &call_id, serde_json::json!({}))).await.unwrap();
    settle().await;

    let plan = CollectionPlan::new(
        "otp_capture",
        vec![PlanStep { profile: Profile::Verification, min_len: 6, max_len: 6, step_prompt: "enter the code".into() }],
        "done",
    );
    orchestrator.install_digit_plan(&call_id, plan).await.unwrap();
    settle().await;

    orchestrator.feed_digits(&call_id, "dtmf", "412".into(), true).await.unwrap();
    settle().await;

    let call = persistence.get_call(&call_id).await.unwrap().unwrap();
    assert_eq!(call.status, "digit_capturing");
    assert!(call.last_otp_masked.is_none());

    let events = persistence.list_digit_events(&call_id).await.unwrap();
    assert_eq!(events.len(), 1);
    assert!(!events[0].accepted);
    assert_eq!(events[0].reason.as_deref(), Some("wrong_length"));
}
