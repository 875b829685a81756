//! The Hub (Floor Manager): the single entry point for envelopes. Owns
//! per-conversation metadata, coordinates the Floor Controller and Router,
//! and synthesizes outbound grant/revoke envelopes.

use std::sync::{Arc, Mutex};
use std::time::Instant;

use serde_json::json;

use crate::config::FloorManagerConfig;
use crate::conversation::{ConversationRecord, ConversationStore};
use crate::envelope::{self, ConversationInfo, Envelope, Event, EventType, Schema, Sender, To, PROTOCOL_VERSION};
use crate::error::ProcessingError;
use crate::floor::{Controller, Outcome};
use crate::router::{DeliveryHandler, DeliveryOutcome, Router};

/// Aggregate result of one [`FloorManager::process_envelope`] /
/// [`FloorManager::process_decoded`] call.
#[derive(Debug, Clone)]
pub struct ProcessingResult {
    /// Envelopes the Hub synthesized in response to controller decisions
    /// (grants only — revokes never originate from `processEnvelope`).
    pub outbound: Vec<Envelope>,
    /// Every delivery attempt for the original envelope and for each
    /// outbound envelope, in the order they were dispatched.
    pub deliveries: Vec<DeliveryOutcome>,
    /// One entry per floor event processed: the sender and the Controller's
    /// [`Outcome`] for that event.
    pub controller_outcomes: Vec<(String, Outcome)>,
}

/// Result of one [`FloorManager::tick`] call: every timeout-triggered
/// `revokeFloor` (and any promotion `grantFloor` that followed it) plus
/// their deliveries.
#[derive(Debug, Clone, Default)]
pub struct TickResult {
    pub outbound: Vec<Envelope>,
    pub deliveries: Vec<DeliveryOutcome>,
}

pub struct FloorManager {
    config: FloorManagerConfig,
    controller: Controller,
    conversations: ConversationStore,
    router: Router,
    last_tick: Mutex<Option<Instant>>,
}

impl FloorManager {
    pub fn new(config: FloorManagerConfig) -> Self {
        let controller = Controller::new(config.max_queue_depth, config.default_grant_timeout);
        Self {
            config,
            controller,
            conversations: ConversationStore::new(),
            router: Router::new(),
            last_tick: Mutex::new(None),
        }
    }

    pub fn register_route(&self, speaker_uri: impl Into<String>, handler: Arc<dyn DeliveryHandler>) {
        self.router.register_route(speaker_uri, handler);
    }

    pub fn unregister_route(&self, speaker_uri: &str) {
        self.router.unregister_route(speaker_uri);
    }

    /// Decodes `bytes` against the configured schema-version set, then runs
    /// [`FloorManager::process_decoded`]. A [`ProcessingError`] halts
    /// processing before any event is applied.
    pub async fn process_envelope(&self, bytes: &[u8]) -> Result<ProcessingResult, ProcessingError> {
        let env = match envelope::decode(bytes, &self.config.supported_schema_versions) {
            Ok(env) => env,
            Err(e) => {
                eprintln!("⚠️ rejected malformed envelope: {e}");
                return Err(e.into());
            }
        };
        Ok(self.process_decoded(env).await)
    }

    /// Runs the full ingress pipeline on an already-decoded [`Envelope`]:
    /// reconcile conversation metadata, apply each event (consulting the
    /// Floor Controller for floor events), then hand the original envelope
    /// and any synthesized outbound envelopes to the Router. The
    /// per-conversation locks are released before any handler is invoked.
    pub async fn process_decoded(&self, env: Envelope) -> ProcessingResult {
        let conv_id = env.conversation.id.clone();
        let sender = env.sender.speaker_uri.clone();

        self.conversations.reconcile(&conv_id, &env.conversation.conversants, &env.conversation.assigned_floor_roles);

        let mut outbound = Vec::new();
        let mut controller_outcomes = Vec::new();

        for event in &env.events {
            match event.event_type {
                EventType::RequestFloor => {
                    let decision = self.controller.request_floor(
                        &conv_id,
                        &sender,
                        event.priority(),
                        event.reason.clone(),
                        Instant::now(),
                    );
                    controller_outcomes.push((sender.clone(), decision.outcome.clone()));
                    if let Some(holder) = decision.new_holder {
                        self.conversations.set_floor_granted(&conv_id, Some(&holder));
                        outbound.push(self.synthesize_grant(&conv_id, &holder));
                    }
                }
                EventType::YieldFloor => {
                    let decision = self.controller.yield_floor(&conv_id, &sender, Instant::now());
                    controller_outcomes.push((sender.clone(), decision.outcome.clone()));
                    match decision.new_holder {
                        Some(holder) => {
                            self.conversations.set_floor_granted(&conv_id, Some(&holder));
                            outbound.push(self.synthesize_grant(&conv_id, &holder));
                        }
                        None if decision.outcome == Outcome::Idle => {
                            self.conversations.set_floor_granted(&conv_id, None);
                        }
                        None => {}
                    }
                }
                // Agents are not expected to emit these, but the Hub
                // tolerates and forwards them unchanged for interop.
                EventType::GrantFloor | EventType::RevokeFloor => {}
                EventType::Invite => {
                    if let Some(uri) = event.to.as_ref().and_then(|to| to.speaker_uri.as_deref()) {
                        self.conversations.add_conversant(&conv_id, json!({ "speakerUri": uri }));
                    }
                }
                EventType::Uninvite => {
                    if let Some(uri) = event.to.as_ref().and_then(|to| to.speaker_uri.as_deref()) {
                        self.conversations.remove_conversant_by_uri(&conv_id, uri);
                        self.controller.cancel_request(&conv_id, uri, Instant::now());
                    }
                }
                EventType::Utterance
                | EventType::Context
                | EventType::AcceptInvite
                | EventType::DeclineInvite
                | EventType::Bye
                | EventType::GetManifests
                | EventType::PublishManifests => {}
            }
        }

        let mut deliveries = self.router.route(&env).await;
        for outbound_env in &outbound {
            deliveries.extend(self.router.route(outbound_env).await);
        }

        ProcessingResult { outbound, deliveries, controller_outcomes }
    }

    /// Invokes `Controller::checkTimeouts(now)` and synthesizes the
    /// `revokeFloor` (and any promotion `grantFloor`) envelopes it reports,
    /// delivering each through the Router. Called by an external scheduler
    /// at the embedding's chosen cadence.
    pub async fn tick(&self, now: Instant) -> TickResult {
        self.warn_if_tick_lagging(now);
        let revocations = self.controller.check_timeouts(now);
        let mut result = TickResult::default();

        for revocation in revocations {
            let new_holder = revocation.decision.new_holder.clone();
            self.conversations.set_floor_granted(&revocation.conversation_id, new_holder.as_deref());

            let revoke_env = self.synthesize_revoke(&revocation.conversation_id, &revocation.revoked_uri, "@timeout");
            result.deliveries.extend(self.router.route(&revoke_env).await);
            result.outbound.push(revoke_env);

            if let Some(holder) = new_holder {
                let grant_env = self.synthesize_grant(&revocation.conversation_id, &holder);
                result.deliveries.extend(self.router.route(&grant_env).await);
                result.outbound.push(grant_env);
            }
        }

        result
    }

    /// Warns to stderr when `tick` is called much later than the configured
    /// `tickInterval` would suggest — a sign the embedding's scheduler is
    /// falling behind and grants are outliving their timeout unnoticed.
    fn warn_if_tick_lagging(&self, now: Instant) {
        let Some(interval) = self.config.tick_interval else { return };
        let mut last_tick = self.last_tick.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(previous) = *last_tick {
            let elapsed = now.saturating_duration_since(previous);
            if elapsed > interval * 2 {
                eprintln!("⚠️ tick sweep lagged: {elapsed:?} since last tick (expected ~{interval:?})");
            }
        }
        *last_tick = Some(now);
    }

    pub fn holder(&self, conversation_id: &str) -> Option<String> {
        self.controller.peek_holder(conversation_id)
    }

    pub fn queue(&self, conversation_id: &str) -> Vec<crate::floor::FloorRequest> {
        self.controller.peek_queue(conversation_id)
    }

    pub fn conversation(&self, conversation_id: &str) -> ConversationRecord {
        self.conversations.get(conversation_id).unwrap_or_default()
    }

    /// Whether `conversation_id` currently holds nothing worth keeping: no
    /// floor holder, no queued requests, no conversants. The Hub never
    /// disposes of conversations itself — this is a read-only signal for an
    /// embedding that wants to garbage-collect its own side tables.
    pub fn is_disposable(&self, conversation_id: &str) -> bool {
        self.controller.is_idle(conversation_id) && self.conversations.is_empty(conversation_id)
    }

    /// Builds the `grantFloor` envelope shape: sender is the Hub's own URI,
    /// `floorGranted` mirrors the grantee, and `assignedFloorRoles` mirrors
    /// the local record.
    fn synthesize_grant(&self, conversation_id: &str, grantee: &str) -> Envelope {
        let record = self.conversations.get(conversation_id).unwrap_or_default();
        let mut event = Event::new(EventType::GrantFloor);
        event.to = Some(To::speaker(grantee));
        event.parameters = Some(json!({ "grantedAt": chrono::Utc::now().to_rfc3339() }));

        Envelope {
            schema: Schema::new(PROTOCOL_VERSION),
            conversation: ConversationInfo {
                id: conversation_id.to_string(),
                conversants: record.conversants,
                assigned_floor_roles: record.assigned_floor_roles,
                floor_granted: vec![grantee.to_string()],
            },
            sender: Sender::new(self.config.hub_speaker_uri.clone()),
            events: vec![event],
        }
    }

    /// Builds the `revokeFloor` envelope shape: always carries a `reason`
    /// so recipients can distinguish a timeout revoke from any other.
    fn synthesize_revoke(&self, conversation_id: &str, target: &str, reason: &str) -> Envelope {
        let record = self.conversations.get(conversation_id).unwrap_or_default();
        let mut event = Event::new(EventType::RevokeFloor);
        event.to = Some(To::speaker(target));
        event.reason = Some(reason.to_string());

        Envelope {
            schema: Schema::new(PROTOCOL_VERSION),
            conversation: ConversationInfo {
                id: conversation_id.to_string(),
                conversants: record.conversants,
                assigned_floor_roles: record.assigned_floor_roles,
                floor_granted: Vec::new(),
            },
            sender: Sender::new(self.config.hub_speaker_uri.clone()),
            events: vec![event],
        }
    }
}
