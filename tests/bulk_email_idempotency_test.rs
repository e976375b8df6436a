//! Seed scenario: a bulk send is idempotent at the job level, and
//! template variable validation rejects a request missing a placeholder.

mod support;

use call_orchestrator::delivery::SendRequest;
use call_orchestrator::persistence::Persistence;
use call_orchestrator::types::Channel;

use support::test_delivery_engine;

fn request(recipient: &str) -> SendRequest {
    SendRequest {
        channel: Channel::Email,
        recipient: recipient.to_string(),
        sender: "noreply@example.test".to_string(),
        subject: Some("hi {{name}}".to_string()),
        html_body: Some("<p>hi {{name}}</p>".to_string()),
        text_body: Some("hi {{name}}".to_string()),
        template_id: Some("welcome".to_string()),
        variables: Some(serde_json::json!({"name": "Ada"})),
        tenant_id: Some("tenant-a".to_string()),
        scheduled_at: None,
    }
}

#[tokio::test]
async fn repeating_a_bulk_job_with_the_same_key_is_a_no_op() {
    let persistence = Persistence::connect("sqlite::memory:").await.unwrap();
    persistence.run_migrations().await.unwrap();
    let engine = test_delivery_engine(persistence.clone(), vec![]);

    let requests = vec![request("a@example.test"), request("b@example.test"), request("c@example.test")];
    let (job1, deduped1) = engine
        .enqueue_bulk(Channel::Email, Some("welcome".into()), Some("tenant-a".into()), requests.clone(), Some("job-key-1".into()))
        .await
        .unwrap();
    assert!(!deduped1);
    assert_eq!(job1.total, 3);

    let (job2, deduped2) = engine
        .enqueue_bulk(Channel::Email, Some("welcome".into()), Some("tenant-a".into()), requests, Some("job-key-1".into()))
        .await
        .unwrap();
    assert!(deduped2);
    assert_eq!(job2.job_id, job1.job_id);

    let due = persistence.select_due_messages(50).await.unwrap();
    let for_job: Vec<_> = due.iter().filter(|m| m.bulk_job_id.as_ref().map(|b| b.as_str()) == Some(job1.job_id.as_str())).collect();
    assert_eq!(for_job.len(), 3, "repeating the job must not create duplicate messages");
}

#[tokio::test]
async fn a_request_missing_a_template_variable_is_rejected() {
    let persistence = Persistence::connect("sqlite::memory:").await.unwrap();
    persistence.run_migrations().await.unwrap();
    let engine = test_delivery_engine(persistence, vec![]);

    let mut req = request("missing@example.test");
    req.variables = Some(serde_json::json!({}));

    let err = engine.enqueue(req, None).await.unwrap_err();
    assert_eq!(err.code(), "validation");
}

#[tokio::test]
async fn single_enqueue_dedupes_on_idempotency_key() {
    let persistence = Persistence::connect("sqlite::memory:").await.unwrap();
    persistence.run_migrations().await.unwrap();
    let engine = test_delivery_engine(persistence, vec![]);

    let (first, deduped1) = engine.enqueue(request("solo@example.test"), Some("solo-key".into())).await.unwrap();
    assert!(!deduped1);
    let (second, deduped2) = engine.enqueue(request("solo@example.test"), Some("solo-key".into())).await.unwrap();
    assert!(deduped2);
    assert_eq!(first.message_id, second.message_id);
}

#[tokio::test]
async fn reusing_a_key_with_a_different_body_is_a_conflict() {
    let persistence = Persistence::connect("sqlite::memory:").await.unwrap();
    persistence.run_migrations().await.unwrap();
    let engine = test_delivery_engine(persistence, vec![]);

    engine.enqueue(request("solo@example.test"), Some("reused-key".into())).await.unwrap();
    let mut different = request("solo@example.test");
    different.subject = Some("a different subject {{name}}".to_string());
    let err = engine.enqueue(different, Some("reused-key".into())).await.unwrap_err();
    assert_eq!(err.code(), "idempotency_conflict");
}
