//! The Floor Controller: per-conversation floor state machine and priority
//! queue. Entirely in-memory and synchronous — every operation here is a
//! pure function of the controller's own state plus its arguments, never
//! performing I/O or awaiting anything.

use std::collections::HashMap;
use std::sync::RwLock;
use std::time::{Duration, Instant};

/// Outcome vocabulary shared by every Controller operation. The Controller never panics or returns an `Err` for ordinary
/// sequencing problems — these are the total set of results a caller can
/// observe.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    Granted,
    Queued(usize),
    Overflow,
    NotHolder,
    NoSuchConversation,
    /// The holder yielded/was revoked and no queued request existed to
    /// replace them — the conversation returned to IDLE.
    Idle,
}

/// The result of a Controller operation: the [`Outcome`] plus, when a fresh
/// or promoted grant accompanies it, the Speaker URI that now holds the
/// floor. The Hub uses `new_holder` to address the synthesized `grantFloor`
/// envelope.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Decision {
    pub outcome: Outcome,
    pub new_holder: Option<String>,
}

impl Decision {
    fn granted(holder: impl Into<String>) -> Self {
        Self { outcome: Outcome::Granted, new_holder: Some(holder.into()) }
    }

    fn queued(position: usize) -> Self {
        Self { outcome: Outcome::Queued(position), new_holder: None }
    }

    fn plain(outcome: Outcome) -> Self {
        Self { outcome, new_holder: None }
    }
}

/// An outstanding request for the floor. At most one per `(conversation,
/// speakerUri)` — a second request from the same sender updates this entry's
/// priority in place rather than creating a second one.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FloorRequest {
    pub speaker_uri: String,
    pub priority: i64,
    pub reason: Option<String>,
    /// Monotonic admission order, used to break priority ties (FIFO) and as
    /// the stable enqueue-order timestamp — a logical clock is used instead
    /// of a wall-clock timestamp so re-requests never reset it purely due to
    /// timer resolution.
    seq: u64,
}

/// A revocation produced by [`Controller::check_timeouts`]: the conversation
/// whose grant expired, the holder that was revoked, and the promotion (if
/// any) that followed it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TimeoutRevocation {
    pub conversation_id: String,
    pub revoked_uri: String,
    pub decision: Decision,
}

struct ConversationState {
    holder: Option<String>,
    queue: Vec<FloorRequest>,
    granted_at: Option<Instant>,
    timeout: Option<Duration>,
    next_seq: u64,
}

impl ConversationState {
    fn new(timeout: Option<Duration>) -> Self {
        Self { holder: None, queue: Vec::new(), granted_at: None, timeout, next_seq: 0 }
    }

    /// Requests sort best-first: higher priority first, then earlier
    /// admission order.
    fn resort(&mut self) {
        self.queue.sort_by(|a, b| b.priority.cmp(&a.priority).then(a.seq.cmp(&b.seq)));
    }

    fn position_of(&self, speaker_uri: &str) -> Option<usize> {
        self.queue.iter().position(|r| r.speaker_uri == speaker_uri)
    }

    fn promote_next(&mut self, now: Instant) -> Option<String> {
        if self.queue.is_empty() {
            self.holder = None;
            self.granted_at = None;
            return None;
        }
        let next = self.queue.remove(0);
        self.holder = Some(next.speaker_uri.clone());
        self.granted_at = Some(now);
        Some(next.speaker_uri)
    }
}

/// The Floor Controller. Holds one [`ConversationState`] per conversation
/// behind a single `RwLock`, matching the reader-friendly concurrent map
/// pattern used for presence tracking in the crate this one grew out of —
/// appropriate here too, since every operation is a short, synchronous
/// critical section.
pub struct Controller {
    max_queue_depth: usize,
    default_timeout: Option<Duration>,
    states: RwLock<HashMap<String, ConversationState>>,
}

impl Controller {
    pub fn new(max_queue_depth: usize, default_timeout: Option<Duration>) -> Self {
        Self { max_queue_depth, default_timeout, states: RwLock::new(HashMap::new()) }
    }

    fn with_state<R>(&self, conversation_id: &str, f: impl FnOnce(&mut ConversationState) -> R) -> R {
        let mut states = self.states.write().unwrap_or_else(|e| e.into_inner());
        let default_timeout = self.default_timeout;
        let state = states
            .entry(conversation_id.to_string())
            .or_insert_with(|| ConversationState::new(default_timeout));
        f(state)
    }

    /// `requestFloor`. Conversations are created lazily on first reference,
    /// so this never returns [`Outcome::NoSuchConversation`].
    pub fn request_floor(
        &self,
        conversation_id: &str,
        speaker_uri: &str,
        priority: i64,
        reason: Option<String>,
        now: Instant,
    ) -> Decision {
        self.with_state(conversation_id, |state| {
            if state.holder.is_none() {
                state.holder = Some(speaker_uri.to_string());
                state.granted_at = Some(now);
                return Decision::granted(speaker_uri);
            }

            if state.holder.as_deref() == Some(speaker_uri) {
                // Idempotent self-request: no state change, no outbound event.
                return Decision::plain(Outcome::Granted);
            }

            if let Some(idx) = state.position_of(speaker_uri) {
                state.queue[idx].priority = state.queue[idx].priority.max(priority);
                state.resort();
                let position = state.position_of(speaker_uri).unwrap();
                return Decision::queued(position);
            }

            let seq = state.next_seq;
            state.next_seq += 1;
            let candidate = FloorRequest { speaker_uri: speaker_uri.to_string(), priority, reason, seq };

            if state.queue.len() >= self.max_queue_depth {
                state.queue.push(candidate);
                state.resort();
                // The worst entry is now last; if that's the one we just
                // inserted, the new request itself overflowed.
                let worst_is_new = state.queue.last().map(|r| r.seq) == Some(seq);
                if worst_is_new {
                    state.queue.pop();
                    return Decision::plain(Outcome::Overflow);
                }
                state.queue.pop();
                let position = state.position_of(speaker_uri).unwrap();
                return Decision::queued(position);
            }

            state.queue.push(candidate);
            state.resort();
            let position = state.position_of(speaker_uri).unwrap();
            Decision::queued(position)
        })
    }

    /// `yieldFloor`. No-op with [`Outcome::NotHolder`] when the caller does
    /// not currently hold the floor.
    pub fn yield_floor(&self, conversation_id: &str, speaker_uri: &str, now: Instant) -> Decision {
        self.with_state(conversation_id, |state| {
            if state.holder.as_deref() != Some(speaker_uri) {
                return Decision::plain(Outcome::NotHolder);
            }
            match state.promote_next(now) {
                Some(new_holder) => Decision::granted(new_holder),
                None => Decision::plain(Outcome::Idle),
            }
        })
    }

    /// `revokeFloor`. Issued by the Hub, never by agents directly. A no-op
    /// (reported as [`Outcome::NotHolder`]) if `target_uri` does not
    /// currently hold the floor.
    pub fn revoke_floor(&self, conversation_id: &str, target_uri: &str, now: Instant) -> Decision {
        self.with_state(conversation_id, |state| {
            if state.holder.as_deref() != Some(target_uri) {
                return Decision::plain(Outcome::NotHolder);
            }
            match state.promote_next(now) {
                Some(new_holder) => Decision::granted(new_holder),
                None => Decision::plain(Outcome::Idle),
            }
        })
    }

    /// Drops a pending request without granting anyone, e.g. when an
    /// `uninvite` removes a conversant who had an outstanding request.
    pub fn cancel_request(&self, conversation_id: &str, speaker_uri: &str, now: Instant) -> bool {
        self.with_state(conversation_id, |state| {
            if let Some(idx) = state.position_of(speaker_uri) {
                state.queue.remove(idx);
                true
            } else {
                false
            }
        })
    }

    /// `checkTimeouts(now)`. Revokes every grant whose `grantedAt + timeout
    /// <= now`, promoting the next queued request (if any) exactly as
    /// `yieldFloor` would.
    pub fn check_timeouts(&self, now: Instant) -> Vec<TimeoutRevocation> {
        let mut states = self.states.write().unwrap_or_else(|e| e.into_inner());
        let mut revocations = Vec::new();
        for (conversation_id, state) in states.iter_mut() {
            let expired = match (state.holder.as_ref(), state.granted_at, state.timeout) {
                (Some(_), Some(granted_at), Some(timeout)) => granted_at + timeout <= now,
                _ => false,
            };
            if !expired {
                continue;
            }
            let revoked_uri = state.holder.clone().expect("checked Some above");
            let decision = match state.promote_next(now) {
                Some(new_holder) => Decision::granted(new_holder),
                None => Decision::plain(Outcome::Idle),
            };
            revocations.push(TimeoutRevocation {
                conversation_id: conversation_id.clone(),
                revoked_uri,
                decision,
            });
        }
        revocations
    }

    /// Read-only: the current floor holder, if any.
    pub fn peek_holder(&self, conversation_id: &str) -> Option<String> {
        let states = self.states.read().unwrap_or_else(|e| e.into_inner());
        states.get(conversation_id).and_then(|s| s.holder.clone())
    }

    /// Read-only: the pending request queue, best-first.
    pub fn peek_queue(&self, conversation_id: &str) -> Vec<FloorRequest> {
        let states = self.states.read().unwrap_or_else(|e| e.into_inner());
        states.get(conversation_id).map(|s| s.queue.clone()).unwrap_or_default()
    }

    /// Whether this conversation is eligible for disposal: no holder, no
    /// queued requests. Disposal itself is left to the embedding.
    pub fn is_idle(&self, conversation_id: &str) -> bool {
        let states = self.states.read().unwrap_or_else(|e| e.into_inner());
        states.get(conversation_id).map(|s| s.holder.is_none() && s.queue.is_empty()).unwrap_or(true)
    }
}
