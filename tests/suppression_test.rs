//! Seed scenario: a recipient on the suppression list never reaches a
//! channel adapter, whether suppressed before enqueue or after.

mod support;

use std::time::Duration;

use call_orchestrator::delivery::SendRequest;
use call_orchestrator::persistence::Persistence;
use call_orchestrator::types::{Channel, MessageStatus};

use support::{test_delivery_engine, FakeDeliveryAdapter};

fn request(recipient: &str) -> SendRequest {
    SendRequest {
        channel: Channel::Email,
        recipient: recipient.to_string(),
        sender: "noreply@example.test".to_string(),
        subject: Some("hello".to_string()),
        html_body: Some("<p>hello</p>".to_string()),
        text_body: Some("hello".to_string()),
        template_id: None,
        variables: None,
        tenant_id: None,
        scheduled_at: None,
    }
}

#[tokio::test]
async fn enqueueing_for_an_already_suppressed_address_is_suppressed_immediately() {
    let persistence = Persistence::connect("sqlite::memory:").await.unwrap();
    persistence.run_migrations().await.unwrap();
    persistence.set_suppression("blocked@example.test", "bounce", "webhook").await.unwrap();

    let engine = test_delivery_engine(persistence, vec![]);
    let (message, _) = engine.enqueue(request("blocked@example.test"), None).await.unwrap();
    assert_eq!(message.status, MessageStatus::Suppressed);
}

#[tokio::test]
async fn clearing_a_suppression_lets_future_enqueues_through() {
    let persistence = Persistence::connect("sqlite::memory:").await.unwrap();
    persistence.run_migrations().await.unwrap();
    persistence.set_suppression("reinstated@example.test", "complaint", "webhook").await.unwrap();
    persistence.clear_suppression("reinstated@example.test").await.unwrap();

    let engine = test_delivery_engine(persistence, vec![]);
    let (message, _) = engine.enqueue(request("reinstated@example.test"), None).await.unwrap();
    assert_eq!(message.status, MessageStatus::Queued);
}

#[tokio::test]
async fn the_delivery_worker_tick_suppresses_a_previously_queued_message() {
    let persistence = Persistence::connect("sqlite::memory:").await.unwrap();
    persistence.run_migrations().await.unwrap();

    let adapter = FakeDeliveryAdapter::new(Channel::Email);
    let engine = test_delivery_engine(persistence.clone(), vec![adapter.clone()]);

    let (message, _) = engine.enqueue(request("tick-blocked@example.test"), None).await.unwrap();
    persistence.set_suppression("tick-blocked@example.test", "bounce", "webhook").await.unwrap();

    let worker = tokio::spawn(async move { engine.run().await });
    tokio::time::sleep(Duration::from_millis(250)).await;
    worker.abort();

    let stored = persistence.get_message(&message.message_id).await.unwrap().unwrap();
    assert_eq!(stored.status, MessageStatus::Suppressed);
    assert!(adapter.sent_recipients().is_empty());
}
