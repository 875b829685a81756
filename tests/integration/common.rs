use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use floor_manager::{DeliveryHandler, Envelope, FloorManager, FloorManagerConfig, HandlerError};

/// A [`DeliveryHandler`] that records every sub-envelope it receives, for
/// assertions on exactly what each registered agent was delivered.
pub struct Recorder {
    pub received: Mutex<Vec<Envelope>>,
}

impl Recorder {
    pub fn new() -> Arc<Self> {
        Arc::new(Self { received: Mutex::new(Vec::new()) })
    }

    pub fn texts(&self) -> Vec<String> {
        self.received
            .lock()
            .unwrap()
            .iter()
            .flat_map(|env| env.events.iter())
            .filter_map(|ev| ev.parameters.as_ref()?.get("text")?.as_str().map(str::to_string))
            .collect()
    }
}

#[async_trait]
impl DeliveryHandler for Recorder {
    async fn deliver(&self, envelope: Envelope) -> Result<(), HandlerError> {
        self.received.lock().unwrap().push(envelope);
        Ok(())
    }
}

/// A hub under test plus its registered recorders, keyed by Speaker URI.
pub struct Fixture {
    pub hub: FloorManager,
    pub recorders: std::collections::HashMap<String, Arc<Recorder>>,
    hub_speaker_uri: String,
}

impl Fixture {
    pub fn new(config: FloorManagerConfig) -> Self {
        let hub_speaker_uri = config.hub_speaker_uri.clone();
        Self { hub: FloorManager::new(config), recorders: std::collections::HashMap::new(), hub_speaker_uri }
    }

    pub fn with_agents(config: FloorManagerConfig, speaker_uris: &[&str]) -> Self {
        let mut fixture = Self::new(config);
        for uri in speaker_uris {
            fixture.register(uri);
        }
        fixture
    }

    pub fn hub_speaker_uri(&self) -> &str {
        &self.hub_speaker_uri
    }

    pub fn register(&mut self, speaker_uri: &str) -> Arc<Recorder> {
        let recorder = Recorder::new();
        self.hub.register_route(speaker_uri, recorder.clone());
        self.recorders.insert(speaker_uri.to_string(), recorder.clone());
        recorder
    }

    pub fn recorder(&self, speaker_uri: &str) -> &Arc<Recorder> {
        self.recorders.get(speaker_uri).expect("recorder registered")
    }
}

pub fn request_floor_envelope(conversation_id: &str, speaker_uri: &str, priority: i64) -> Vec<u8> {
    serde_json::json!({
        "schema": {"version": "1.1.0"},
        "conversation": {"id": conversation_id},
        "sender": {"speakerUri": speaker_uri},
        "events": [{"eventType": "requestFloor", "parameters": {"priority": priority}}]
    })
    .to_string()
    .into_bytes()
}

pub fn yield_floor_envelope(conversation_id: &str, speaker_uri: &str) -> Vec<u8> {
    serde_json::json!({
        "schema": {"version": "1.1.0"},
        "conversation": {"id": conversation_id},
        "sender": {"speakerUri": speaker_uri},
        "events": [{"eventType": "yieldFloor"}]
    })
    .to_string()
    .into_bytes()
}

pub fn private_utterance_envelope(conversation_id: &str, sender: &str, to: &str, text: &str) -> Vec<u8> {
    serde_json::json!({
        "schema": {"version": "1.1.0"},
        "conversation": {"id": conversation_id},
        "sender": {"speakerUri": sender},
        "events": [{"eventType": "utterance", "to": {"speakerUri": to, "private": true}, "parameters": {"text": text}}]
    })
    .to_string()
    .into_bytes()
}

pub fn private_invite_envelope(conversation_id: &str, sender: &str, to: &str) -> Vec<u8> {
    serde_json::json!({
        "schema": {"version": "1.1.0"},
        "conversation": {"id": conversation_id},
        "sender": {"speakerUri": sender},
        "events": [{"eventType": "invite", "to": {"speakerUri": to, "private": true}}]
    })
    .to_string()
    .into_bytes()
}
