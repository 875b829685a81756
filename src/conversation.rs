//! Per-conversation metadata: conversants, assigned floor roles, and the
//! authoritative `floorGranted` mirror. Held behind a single `RwLock`-guarded
//! map, the same reader-friendly concurrent-map shape used elsewhere in this
//! crate for small, short-held critical sections.

use std::collections::BTreeMap;
use std::sync::RwLock;

use crate::envelope::Conversant;

/// The metadata record for one conversation. `floorGranted` here mirrors
/// the Floor Controller's authoritative holder — the `ConversationStore`
/// never decides who holds the floor, only records it.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ConversationRecord {
    pub id: String,
    pub conversants: Vec<Conversant>,
    pub assigned_floor_roles: BTreeMap<String, Vec<String>>,
    pub floor_granted: Vec<String>,
}

impl ConversationRecord {
    fn new(id: impl Into<String>) -> Self {
        Self { id: id.into(), ..Default::default() }
    }

    /// Merge conversants and assigned floor roles carried by an inbound
    /// envelope into this record, appending previously unseen conversants
    /// and previously unseen role entries. `floorGranted` is never updated
    /// from inbound data — the Hub sets it from the Controller's state.
    fn reconcile(&mut self, conversants: &[Conversant], assigned_floor_roles: &BTreeMap<String, Vec<String>>) {
        for conversant in conversants {
            if !self.conversants.contains(conversant) {
                self.conversants.push(conversant.clone());
            }
        }
        for (role, uris) in assigned_floor_roles {
            let entry = self.assigned_floor_roles.entry(role.clone()).or_default();
            for uri in uris {
                if !entry.contains(uri) {
                    entry.push(uri.clone());
                }
            }
        }
    }
}

/// The conversation metadata table. Conversations are created lazily on
/// first reference; disposal is left to the embedding.
pub struct ConversationStore {
    records: RwLock<std::collections::HashMap<String, ConversationRecord>>,
}

impl Default for ConversationStore {
    fn default() -> Self {
        Self::new()
    }
}

impl ConversationStore {
    pub fn new() -> Self {
        Self { records: RwLock::new(std::collections::HashMap::new()) }
    }

    /// Look up or lazily create the record for `conversation_id`, then
    /// reconcile it with `conversants`/`assigned_floor_roles` carried by an
    /// inbound envelope (local is authoritative for `floorGranted`).
    pub fn reconcile(
        &self,
        conversation_id: &str,
        conversants: &[Conversant],
        assigned_floor_roles: &BTreeMap<String, Vec<String>>,
    ) {
        let mut records = self.records.write().unwrap_or_else(|e| e.into_inner());
        let record =
            records.entry(conversation_id.to_string()).or_insert_with(|| ConversationRecord::new(conversation_id));
        record.reconcile(conversants, assigned_floor_roles);
    }

    /// Overwrite `floorGranted` for `conversation_id` to reflect the Floor
    /// Controller's current holder.
    pub fn set_floor_granted(&self, conversation_id: &str, holder: Option<&str>) {
        let mut records = self.records.write().unwrap_or_else(|e| e.into_inner());
        let record =
            records.entry(conversation_id.to_string()).or_insert_with(|| ConversationRecord::new(conversation_id));
        record.floor_granted = holder.map(|uri| vec![uri.to_string()]).unwrap_or_default();
    }

    /// Add `speaker_uri` to the conversants list if not already present,
    /// used by `invite` handling.
    pub fn add_conversant(&self, conversation_id: &str, identification: serde_json::Value) {
        let mut records = self.records.write().unwrap_or_else(|e| e.into_inner());
        let record =
            records.entry(conversation_id.to_string()).or_insert_with(|| ConversationRecord::new(conversation_id));
        let conversant = Conversant { identification };
        if !record.conversants.contains(&conversant) {
            record.conversants.push(conversant);
        }
    }

    /// Remove conversants whose `identification` matches `speaker_uri`,
    /// used by `uninvite` handling. Identification is an opaque bag to the
    /// Hub, so removal is keyed on the literal `speakerUri` string value
    /// embedded at `identification.speakerUri` when present.
    pub fn remove_conversant_by_uri(&self, conversation_id: &str, speaker_uri: &str) {
        let mut records = self.records.write().unwrap_or_else(|e| e.into_inner());
        if let Some(record) = records.get_mut(conversation_id) {
            record.conversants.retain(|c| {
                c.identification.get("speakerUri").and_then(|v| v.as_str()) != Some(speaker_uri)
            });
        }
    }

    pub fn get(&self, conversation_id: &str) -> Option<ConversationRecord> {
        let records = self.records.read().unwrap_or_else(|e| e.into_inner());
        records.get(conversation_id).cloned()
    }

    /// Whether this conversation has no associated metadata at all — used
    /// alongside `Controller::is_idle` to decide eligibility for disposal.
    pub fn is_empty(&self, conversation_id: &str) -> bool {
        let records = self.records.read().unwrap_or_else(|e| e.into_inner());
        records.get(conversation_id).map(|r| r.conversants.is_empty()).unwrap_or(true)
    }
}
