use std::time::{Duration, Instant};

use floor_manager::{FloorManagerConfig, ProcessingError};

use crate::common::{
    private_utterance_envelope, private_invite_envelope, request_floor_envelope, yield_floor_envelope, Fixture,
};

#[tokio::test]
async fn s1_immediate_grant() {
    let fixture = Fixture::with_agents(FloorManagerConfig::default(), &["urn:a:1"]);

    let result = fixture.hub.process_envelope(&request_floor_envelope("c1", "urn:a:1", 0)).await.unwrap();

    assert_eq!(result.outbound.len(), 1);
    assert_eq!(result.outbound[0].sender.speaker_uri, fixture.hub_speaker_uri());
    assert_eq!(result.outbound[0].events[0].to.as_ref().unwrap().speaker_uri.as_deref(), Some("urn:a:1"));
    assert_eq!(fixture.hub.holder("c1"), Some("urn:a:1".to_string()));
    assert_eq!(fixture.hub.conversation("c1").floor_granted, vec!["urn:a:1".to_string()]);
}

#[tokio::test]
async fn s2_priority_queueing() {
    let fixture = Fixture::with_agents(FloorManagerConfig::default(), &["urn:a:1", "urn:a:2", "urn:a:3", "urn:a:4"]);

    fixture.hub.process_envelope(&request_floor_envelope("c1", "urn:a:1", 0)).await.unwrap();
    fixture.hub.process_envelope(&request_floor_envelope("c1", "urn:a:2", 3)).await.unwrap();
    fixture.hub.process_envelope(&request_floor_envelope("c1", "urn:a:3", 7)).await.unwrap();
    fixture.hub.process_envelope(&request_floor_envelope("c1", "urn:a:4", 7)).await.unwrap();

    let mut holders = Vec::new();
    let mut current = "urn:a:1".to_string();
    for _ in 0..3 {
        let result = fixture.hub.process_envelope(&yield_floor_envelope("c1", &current)).await.unwrap();
        let grant = result.outbound.first().expect("a grant follows each yield while the queue is non-empty");
        let next = grant.events[0].to.as_ref().unwrap().speaker_uri.clone().unwrap();
        holders.push(next.clone());
        current = next;
    }

    assert_eq!(holders, vec!["urn:a:3", "urn:a:4", "urn:a:2"]);
}

#[tokio::test]
async fn s3_privacy_of_utterance() {
    let fixture = Fixture::with_agents(FloorManagerConfig::default(), &["urn:a:1", "urn:a:2", "urn:a:3"]);

    let result = fixture
        .hub
        .process_envelope(&private_utterance_envelope("c1", "urn:a:1", "urn:a:2", "hi"))
        .await
        .unwrap();

    assert_eq!(result.deliveries.len(), 1);
    assert_eq!(fixture.recorder("urn:a:2").texts(), vec!["hi".to_string()]);
    assert_eq!(fixture.recorder("urn:a:3").received.lock().unwrap().len(), 0);
}

#[tokio::test]
async fn s4_privacy_flag_ignored_on_non_utterance() {
    let fixture = Fixture::with_agents(FloorManagerConfig::default(), &["urn:a:1", "urn:a:2", "urn:a:3"]);

    fixture.hub.process_envelope(&private_invite_envelope("c1", "urn:a:1", "urn:a:2")).await.unwrap();

    assert_eq!(fixture.recorder("urn:a:2").received.lock().unwrap().len(), 1);
    assert_eq!(fixture.recorder("urn:a:3").received.lock().unwrap().len(), 1);
}

#[tokio::test]
async fn s5_timeout_revocation() {
    let mut config = FloorManagerConfig::default();
    config.default_grant_timeout = Some(Duration::from_secs(5));
    let fixture = Fixture::with_agents(config, &["urn:a:1"]);

    let t0 = Instant::now();
    fixture.hub.process_envelope(&request_floor_envelope("c1", "urn:a:1", 0)).await.unwrap();

    let result = fixture.hub.tick(t0 + Duration::from_millis(5001)).await;

    assert_eq!(result.outbound.len(), 1);
    let revoke = &result.outbound[0];
    assert_eq!(revoke.events[0].to.as_ref().unwrap().speaker_uri.as_deref(), Some("urn:a:1"));
    assert_eq!(revoke.events[0].reason.as_deref(), Some("@timeout"));
    assert_eq!(fixture.hub.holder("c1"), None);
}

#[tokio::test]
async fn s6_malformed_rejection_is_total() {
    let fixture = Fixture::with_agents(FloorManagerConfig::default(), &["urn:a:1"]);
    fixture.hub.process_envelope(&request_floor_envelope("c1", "urn:a:1", 0)).await.unwrap();
    assert_eq!(fixture.hub.holder("c1"), Some("urn:a:1".to_string()));

    let malformed = serde_json::json!({
        "schema": {"version": "1.1.0"},
        "conversation": {"id": "c1"},
        "sender": {"speakerUri": "urn:a:1"},
        "events": [
            {"eventType": "yieldFloor"},
            {"eventType": "not-a-real-event-type"}
        ]
    })
    .to_string()
    .into_bytes();

    let err = fixture.hub.process_envelope(&malformed).await.unwrap_err();
    assert!(matches!(err, ProcessingError::Decode(_)));
    assert_eq!(fixture.hub.holder("c1"), Some("urn:a:1".to_string()));
}
