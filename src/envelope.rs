//! The Envelope Model: immutable OFP 1.1.0 value objects plus the
//! decode/encode boundary between wire JSON and the in-memory types every
//! other module operates on.

use std::collections::{BTreeMap, HashSet};

use serde::{Deserialize, Serialize};

use crate::error::DecodeError;

/// `schema.version` this build was compiled against. Used as the sole entry
/// of [`crate::config::FloorManagerConfig::supported_schema_versions`]'s
/// default set.
pub const PROTOCOL_VERSION: &str = "1.1.0";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Schema {
    pub version: String,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub url: Option<String>,
}

impl Schema {
    pub fn new(version: impl Into<String>) -> Self {
        Self { version: version.into(), url: None }
    }
}

/// A participant identity record. Only `identification` survives into the
/// in-memory model — `persistentState`, if present on the wire, is read and
/// discarded during decode: this crate holds no per-agent state across turns.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Conversant {
    #[serde(default)]
    pub identification: serde_json::Value,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ConversantWire {
    #[serde(default)]
    identification: serde_json::Value,
    #[serde(default)]
    #[allow(dead_code)]
    persistent_state: Option<serde_json::Value>,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConversationInfo {
    pub id: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub conversants: Vec<Conversant>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub assigned_floor_roles: BTreeMap<String, Vec<String>>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub floor_granted: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Sender {
    pub speaker_uri: String,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub service_url: Option<String>,
}

impl Sender {
    pub fn new(speaker_uri: impl Into<String>) -> Self {
        Self { speaker_uri: speaker_uri.into(), service_url: None }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum EventType {
    RequestFloor,
    GrantFloor,
    RevokeFloor,
    YieldFloor,
    Utterance,
    Context,
    Invite,
    Uninvite,
    AcceptInvite,
    DeclineInvite,
    Bye,
    GetManifests,
    PublishManifests,
}

impl EventType {
    /// The four primitive floor-control operations — the only event types
    /// the Floor Controller is ever consulted about.
    pub fn is_floor_event(self) -> bool {
        matches!(
            self,
            EventType::RequestFloor
                | EventType::GrantFloor
                | EventType::RevokeFloor
                | EventType::YieldFloor
        )
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct To {
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub speaker_uri: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub service_url: Option<String>,
    #[serde(default)]
    pub private: bool,
}

impl To {
    pub fn speaker(speaker_uri: impl Into<String>) -> Self {
        Self { speaker_uri: Some(speaker_uri.into()), service_url: None, private: false }
    }

    pub fn private_to(speaker_uri: impl Into<String>) -> Self {
        Self { speaker_uri: Some(speaker_uri.into()), service_url: None, private: true }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Event {
    pub event_type: EventType,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub to: Option<To>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub parameters: Option<serde_json::Value>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub reason: Option<String>,
}

impl Event {
    pub fn new(event_type: EventType) -> Self {
        Self { event_type, to: None, parameters: None, reason: None }
    }

    /// Reads an integer `priority` out of `parameters`, defaulting to 0 when
    /// absent or non-numeric — used by `requestFloor` handling.
    pub fn priority(&self) -> i64 {
        self.parameters
            .as_ref()
            .and_then(|p| p.get("priority"))
            .and_then(|v| v.as_i64())
            .unwrap_or(0)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    pub schema: Schema,
    pub conversation: ConversationInfo,
    pub sender: Sender,
    pub events: Vec<Event>,
}

#[derive(Debug, Deserialize)]
struct EnvelopeWire {
    schema: SchemaWire,
    conversation: ConversationWire,
    sender: Sender,
    events: Vec<EventWire>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SchemaWire {
    version: String,
    #[serde(default)]
    url: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ConversationWire {
    id: String,
    #[serde(default)]
    conversants: Vec<ConversantWire>,
    #[serde(default)]
    assigned_floor_roles: BTreeMap<String, Vec<String>>,
    #[serde(default)]
    floor_granted: Vec<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct EventWire {
    event_type: serde_json::Value,
    #[serde(default)]
    to: Option<To>,
    #[serde(default)]
    parameters: Option<serde_json::Value>,
    #[serde(default)]
    reason: Option<String>,
}

/// Wraps the outer `{"openFloor": {...}}` envelope form that some historical
/// OFP sources use, so callers never have to care which form an inbound
/// message used.
#[derive(Debug, Deserialize)]
struct Wrapped {
    #[serde(rename = "openFloor")]
    open_floor: serde_json::Value,
}

/// Parses a wire-format JSON envelope into a validated [`Envelope`].
///
/// Accepts both the bare object form and the `{"openFloor": {...}}` wrapper.
/// Fails whole with [`DecodeError::Malformed`] on any structural problem
/// (missing required field, wrong type, unknown `eventType`) and with
/// [`DecodeError::UnsupportedSchema`] when `schema.version` is not a member of
/// `supported_versions`. No event is ever partially applied: the caller only
/// ever sees a fully valid `Envelope` or an error, never a half-built one.
pub fn decode(bytes: &[u8], supported_versions: &HashSet<String>) -> Result<Envelope, DecodeError> {
    let raw: serde_json::Value =
        serde_json::from_slice(bytes).map_err(|e| DecodeError::Malformed(e.to_string()))?;

    let body = match raw {
        serde_json::Value::Object(ref map) if map.contains_key("openFloor") => {
            let Wrapped { open_floor } =
                serde_json::from_value(raw.clone()).map_err(|e| DecodeError::Malformed(e.to_string()))?;
            open_floor
        }
        other => other,
    };

    let wire: EnvelopeWire =
        serde_json::from_value(body).map_err(|e| DecodeError::Malformed(e.to_string()))?;

    if !supported_versions.contains(&wire.schema.version) {
        return Err(DecodeError::UnsupportedSchema(wire.schema.version));
    }

    if wire.sender.speaker_uri.trim().is_empty() {
        return Err(DecodeError::Malformed("sender.speakerUri must not be empty".into()));
    }

    if wire.events.is_empty() {
        return Err(DecodeError::Malformed("events must not be empty".into()));
    }

    let mut events = Vec::with_capacity(wire.events.len());
    for ev in wire.events {
        let event_type: EventType = serde_json::from_value(ev.event_type.clone())
            .map_err(|_| DecodeError::Malformed(format!("unknown eventType: {}", ev.event_type)))?;
        events.push(Event { event_type, to: ev.to, parameters: ev.parameters, reason: ev.reason });
    }

    let conversants = wire
        .conversation
        .conversants
        .into_iter()
        .map(|c| Conversant { identification: c.identification })
        .collect();

    Ok(Envelope {
        schema: Schema { version: wire.schema.version, url: wire.schema.url },
        conversation: ConversationInfo {
            id: wire.conversation.id,
            conversants,
            assigned_floor_roles: wire.conversation.assigned_floor_roles,
            floor_granted: wire.conversation.floor_granted,
        },
        sender: wire.sender,
        events,
    })
}

/// Serializes an [`Envelope`] to canonical (bare, no `openFloor` wrapper)
/// JSON bytes. Optional fields that are unset are omitted entirely rather
/// than emitted as `null`.
pub fn encode(envelope: &Envelope) -> Vec<u8> {
    serde_json::to_vec(envelope).expect("Envelope serialization is infallible for valid values")
}
