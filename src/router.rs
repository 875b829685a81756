//! The Router: resolves each event's destination set and invokes the
//! registered delivery handler for each one. Route table lives behind the
//! same reader-friendly concurrent map used by the Floor Controller and, in
//! the crate this one grew out of, its presence tracker.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use async_trait::async_trait;

use crate::envelope::{Envelope, Event, EventType};
use crate::error::HandlerError;

/// An effectful, embedding-provided sink for one Speaker URI. The Router
/// treats it as write-only: it never inspects what the handler does with a
/// delivered envelope, only whether delivery succeeded.
#[async_trait]
pub trait DeliveryHandler: Send + Sync {
    async fn deliver(&self, envelope: Envelope) -> Result<(), HandlerError>;
}

/// The outcome of attempting to deliver one event's destination. Produced
/// once per `(event, destination)` pair, not once per envelope.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeliveryOutcome {
    Delivered { speaker_uri: String },
    UnknownRecipient { speaker_uri: String },
    HandlerFailure { speaker_uri: String, cause: HandlerError },
}

/// The Speaker-URI-to-handler table plus destination resolution and
/// dispatch.
pub struct Router {
    routes: RwLock<HashMap<String, Arc<dyn DeliveryHandler>>>,
}

impl Default for Router {
    fn default() -> Self {
        Self::new()
    }
}

impl Router {
    pub fn new() -> Self {
        Self { routes: RwLock::new(HashMap::new()) }
    }

    pub fn register_route(&self, speaker_uri: impl Into<String>, handler: Arc<dyn DeliveryHandler>) {
        let mut routes = self.routes.write().unwrap_or_else(|e| e.into_inner());
        routes.insert(speaker_uri.into(), handler);
    }

    pub fn unregister_route(&self, speaker_uri: &str) {
        let mut routes = self.routes.write().unwrap_or_else(|e| e.into_inner());
        routes.remove(speaker_uri);
    }

    /// Snapshot of currently registered Speaker URIs, for broadcast
    /// resolution and read-only introspection.
    fn snapshot(&self) -> HashMap<String, Arc<dyn DeliveryHandler>> {
        let routes = self.routes.read().unwrap_or_else(|e| e.into_inner());
        routes.clone()
    }

    /// Computes every destination for `event`, given `sender` (excluded from
    /// broadcasts) and a `snapshot` of the route table taken before this
    /// event was considered.
    ///
    /// Only `utterance` honors `to.speakerUri` as an actual delivery
    /// restriction: when set, deliver to that one destination (reporting
    /// `UnknownRecipient` if unregistered); when unset, broadcast. Every
    /// other event type broadcasts to all registered handlers except the
    /// sender regardless of `to` — a `private`-flagged, explicitly-addressed
    /// `invite` still reaches every registered agent, not just the named
    /// one, so an explicit `to` on a non-utterance event is documentation
    /// for the recipients, not a routing restriction (see `DESIGN.md`).
    fn resolve(event: &Event, sender: &str, snapshot: &HashMap<String, Arc<dyn DeliveryHandler>>) -> Destinations {
        let explicit_uri = event.to.as_ref().and_then(|to| to.speaker_uri.as_deref());
        match (event.event_type, explicit_uri) {
            (EventType::Utterance, Some(uri)) => {
                if snapshot.contains_key(uri) {
                    Destinations::Unicast(uri.to_string())
                } else {
                    Destinations::Unknown(uri.to_string())
                }
            }
            _ => Destinations::Broadcast(
                snapshot.keys().filter(|uri| uri.as_str() != sender).cloned().collect(),
            ),
        }
    }

    /// Routes `envelope`: resolves every event's destination set, partitions
    /// events into one sub-envelope per destination (preserving each
    /// destination's view of declaration order), and invokes each
    /// destination's handler exactly once. No lock is held across the
    /// handler `.await`: the route table is snapshotted up front and
    /// released before any delivery begins.
    pub async fn route(&self, envelope: &Envelope) -> Vec<DeliveryOutcome> {
        let snapshot = self.snapshot();
        let sender = envelope.sender.speaker_uri.as_str();

        let mut outcomes = Vec::new();
        let mut per_destination: Vec<(String, Vec<Event>)> = Vec::new();

        for event in &envelope.events {
            match Self::resolve(event, sender, &snapshot) {
                Destinations::Unicast(uri) => push_event(&mut per_destination, uri, event.clone()),
                Destinations::Unknown(uri) => outcomes.push(DeliveryOutcome::UnknownRecipient { speaker_uri: uri }),
                Destinations::Broadcast(uris) => {
                    for uri in uris {
                        push_event(&mut per_destination, uri, event.clone());
                    }
                }
            }
        }

        for (speaker_uri, events) in per_destination {
            let Some(handler) = snapshot.get(&speaker_uri) else { continue };
            let sub_envelope = Envelope { events, ..envelope.clone() };
            match handler.deliver(sub_envelope).await {
                Ok(()) => outcomes.push(DeliveryOutcome::Delivered { speaker_uri }),
                Err(cause) => {
                    eprintln!("⚠️ delivery to {speaker_uri} failed: {cause}");
                    outcomes.push(DeliveryOutcome::HandlerFailure { speaker_uri, cause });
                }
            }
        }

        outcomes
    }

    pub fn is_registered(&self, speaker_uri: &str) -> bool {
        let routes = self.routes.read().unwrap_or_else(|e| e.into_inner());
        routes.contains_key(speaker_uri)
    }
}

enum Destinations {
    Unicast(String),
    Unknown(String),
    Broadcast(Vec<String>),
}

fn push_event(per_destination: &mut Vec<(String, Vec<Event>)>, speaker_uri: String, event: Event) {
    if let Some((_, events)) = per_destination.iter_mut().find(|(uri, _)| *uri == speaker_uri) {
        events.push(event);
    } else {
        per_destination.push((speaker_uri, vec![event]));
    }
}

/// Whether `event_type` is ever legitimately a broadcast utterance's kind —
/// kept only to document that no event type is special-cased in
/// [`Router::resolve`]: `utterance` and every other type share one rule set.
#[allow(dead_code)]
fn _all_event_types_share_resolution(_: EventType) {}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::envelope::{ConversationInfo, Schema, Sender, To, PROTOCOL_VERSION};
    use std::sync::Mutex;

    struct Recorder {
        received: Mutex<Vec<Envelope>>,
    }

    impl Recorder {
        fn new() -> Arc<Self> {
            Arc::new(Self { received: Mutex::new(Vec::new()) })
        }
    }

    #[async_trait]
    impl DeliveryHandler for Recorder {
        async fn deliver(&self, envelope: Envelope) -> Result<(), HandlerError> {
            self.received.lock().unwrap().push(envelope);
            Ok(())
        }
    }

    struct Failing;

    #[async_trait]
    impl DeliveryHandler for Failing {
        async fn deliver(&self, _envelope: Envelope) -> Result<(), HandlerError> {
            Err(HandlerError::new("boom"))
        }
    }

    fn envelope(sender: &str, events: Vec<Event>) -> Envelope {
        Envelope {
            schema: Schema::new(PROTOCOL_VERSION),
            conversation: ConversationInfo { id: "c1".into(), ..Default::default() },
            sender: Sender::new(sender),
            events,
        }
    }

    #[tokio::test]
    async fn unicast_to_registered_recipient() {
        let router = Router::new();
        let r2 = Recorder::new();
        router.register_route("urn:a:2", r2.clone());

        let mut event = Event::new(EventType::Utterance);
        event.to = Some(To::speaker("urn:a:2"));
        let outcomes = router.route(&envelope("urn:a:1", vec![event])).await;

        assert_eq!(outcomes, vec![DeliveryOutcome::Delivered { speaker_uri: "urn:a:2".into() }]);
        assert_eq!(r2.received.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn unicast_to_unregistered_recipient_is_unknown() {
        let router = Router::new();
        let mut event = Event::new(EventType::Utterance);
        event.to = Some(To::speaker("urn:a:9"));
        let outcomes = router.route(&envelope("urn:a:1", vec![event])).await;
        assert_eq!(outcomes, vec![DeliveryOutcome::UnknownRecipient { speaker_uri: "urn:a:9".into() }]);
    }

    #[tokio::test]
    async fn broadcast_excludes_sender() {
        let router = Router::new();
        let r1 = Recorder::new();
        let r2 = Recorder::new();
        router.register_route("urn:a:1", r1.clone());
        router.register_route("urn:a:2", r2.clone());

        let event = Event::new(EventType::Invite);
        let outcomes = router.route(&envelope("urn:a:1", vec![event])).await;

        assert_eq!(outcomes, vec![DeliveryOutcome::Delivered { speaker_uri: "urn:a:2".into() }]);
        assert_eq!(r1.received.lock().unwrap().len(), 0);
        assert_eq!(r2.received.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn private_flag_ignored_on_non_utterance_still_broadcasts() {
        // An explicit `to.speakerUri` with `private: true` on a
        // non-utterance event does not narrow delivery — it still
        // broadcasts to every registered agent except the sender.
        let router = Router::new();
        let r2 = Recorder::new();
        let r3 = Recorder::new();
        router.register_route("urn:a:2", r2.clone());
        router.register_route("urn:a:3", r3.clone());

        let mut event = Event::new(EventType::Invite);
        event.to = Some(To::private_to("urn:a:2"));
        let mut outcomes = router.route(&envelope("urn:a:1", vec![event])).await;
        outcomes.sort_by(|a, b| format!("{a:?}").cmp(&format!("{b:?}")));

        assert_eq!(
            outcomes,
            vec![
                DeliveryOutcome::Delivered { speaker_uri: "urn:a:2".into() },
                DeliveryOutcome::Delivered { speaker_uri: "urn:a:3".into() },
            ]
        );
        assert_eq!(r2.received.lock().unwrap().len(), 1);
        assert_eq!(r3.received.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn handler_failure_is_isolated() {
        let router = Router::new();
        router.register_route("urn:a:1", Arc::new(Failing));
        router.register_route("urn:a:2", Recorder::new());

        let event = Event::new(EventType::Context);
        let outcomes = router.route(&envelope("urn:a:0", vec![event])).await;

        assert_eq!(outcomes.len(), 2);
        assert!(outcomes.iter().any(|o| matches!(o, DeliveryOutcome::HandlerFailure { speaker_uri, .. } if speaker_uri == "urn:a:1")));
        assert!(outcomes.iter().any(|o| matches!(o, DeliveryOutcome::Delivered { speaker_uri } if speaker_uri == "urn:a:2")));
    }

    #[tokio::test]
    async fn declaration_order_preserved_per_destination() {
        let router = Router::new();
        let r2 = Recorder::new();
        router.register_route("urn:a:2", r2.clone());

        let mut first = Event::new(EventType::Utterance);
        first.to = Some(To::speaker("urn:a:2"));
        first.parameters = Some(serde_json::json!({"text": "first"}));
        let mut second = Event::new(EventType::Utterance);
        second.to = Some(To::speaker("urn:a:2"));
        second.parameters = Some(serde_json::json!({"text": "second"}));

        router.route(&envelope("urn:a:1", vec![first, second])).await;

        let received = r2.received.lock().unwrap();
        assert_eq!(received.len(), 1);
        assert_eq!(received[0].events.len(), 2);
        assert_eq!(received[0].events[0].parameters.as_ref().unwrap()["text"], "first");
        assert_eq!(received[0].events[1].parameters.as_ref().unwrap()["text"], "second");
    }
}
