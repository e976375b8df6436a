//! Seed scenario: sustained loud inbound audio while TTS is playing
//! cuts the outbound utterance and fires a barge-in event.

mod support;

use std::time::Duration;

use call_orchestrator::stream_pump::AudioChunk;

use support::{carrier_event, settle, test_orchestrator, FakeProviderAdapter};

fn loud_frame() -> Vec<u8> {
    (0..160u16).map(|i| if i % 2 == 0 { 0x00 } else { 0x80 }).collect()
}

fn quiet_frame() -> Vec<u8> {
    vec![0xFFu8; 160]
}

#[tokio::test]
async fn sustained_loud_audio_interrupts_a_playing_utterance() {
    let adapter = FakeProviderAdapter::always_succeeds("twilio");
    let registry = support::registry_of(vec![adapter], call_orchestrator::config::Config::default().provider);
    let (orchestrator, _persistence, event_bus) = test_orchestrator(registry).await;

    let call_id = orchestrator
        .originate("+15551234567".into(), "+15550001111".into(), None, None, None, "example.test".into(), None)
        .await
        .unwrap();

    orchestrator
        .handle_carrier_event(carrier_event("twilio", "answered", &call_id, serde_json::json!({"answered_by": "human"})))
        .await
        .unwrap();
    settle().await;
    orchestrator.handle_carrier_event(carrier_event("twilio", "stream.frame", &call_id, serde_json::json!({}))).await.unwrap();
    settle().await;

    let mut rx = event_bus.subscribe(&format!("call.{call_id}"));

    let chunks: Vec<AudioChunk> = (0..10).map(|_| AudioChunk { payload: vec![0u8; 160], mark: None }).collect();
    orchestrator.enqueue_utterance(&call_id, chunks).await.unwrap();

    orchestrator.feed_media_frame(&call_id, 0, loud_frame()).await.unwrap();
    tokio::time::sleep(Duration::from_millis(250)).await;
    orchestrator.feed_media_frame(&call_id, 1, loud_frame()).await.unwrap();

    let deadline = tokio::time::Instant::now() + Duration::from_millis(500);
    let mut saw_barge_in = false;
    while tokio::time::Instant::now() < deadline {
        match tokio::time::timeout(Duration::from_millis(50), rx.recv()).await {
            Ok(Ok(event)) if event.r#type == "call.barge_in" => {
                saw_barge_in = true;
                break;
            }
            Ok(Ok(_)) => continue,
            _ => continue,
        }
    }
    assert!(saw_barge_in, "loud sustained inbound audio must fire call.barge_in");
}

#[tokio::test]
async fn quiet_inbound_audio_never_interrupts_playback() {
    let adapter = FakeProviderAdapter::always_succeeds("twilio");
    let registry = support::registry_of(vec![adapter], call_orchestrator::config::Config::default().provider);
    let (orchestrator, _persistence, event_bus) = test_orchestrator(registry).await;

    let call_id = orchestrator
        .originate("+15551234567".into(), "+15550001111".into(), None, None, None, "example.test".into(), None)
        .await
        .unwrap();
    orchestrator
        .handle_carrier_event(carrier_event("twilio", "answered", &call_id, serde_json::json!({"answered_by": "human"})))
        .await
        .unwrap();
    settle().await;
    orchestrator.handle_carrier_event(carrier_event("twilio", "stream.frame", &call_id, serde_json::json!({}))).await.unwrap();
    settle().await;

    let mut rx = event_bus.subscribe(&format!("call.{call_id}"));
    let chunks: Vec<AudioChunk> = (0..10).map(|_| AudioChunk { payload: vec![0u8; 160], mark: None }).collect();
    orchestrator.enqueue_utterance(&call_id, chunks).await.unwrap();

    for seq in 0..4u64 {
        orchestrator.feed_media_frame(&call_id, seq, quiet_frame()).await.unwrap();
        tokio::time::sleep(Duration::from_millis(80)).await;
    }

    let deadline = tokio::time::Instant::now() + Duration::from_millis(200);
    let mut saw_barge_in = false;
    while tokio::time::Instant::now() < deadline {
        match tokio::time::timeout(Duration::from_millis(50), rx.recv()).await {
            Ok(Ok(event)) if event.r#type == "call.barge_in" => {
                saw_barge_in = true;
                break;
            }
            Ok(Ok(_)) => continue,
            _ => continue,
        }
    }
    assert!(!saw_barge_in, "quiet inbound audio must never cut off playback");
}
