//! In-memory Open Floor Protocol 1.1.0 hub: envelope validation, a
//! per-conversation floor-control state machine, and privacy-aware routing
//! between agents identified only by a persistent Speaker URI.
//!
//! The crate ships no transport, no persistence and no agent logic — an
//! embedding application decodes bytes off whatever wire it speaks, calls
//! [`hub::FloorManager::process_envelope`], and registers a
//! [`router::DeliveryHandler`] per agent to receive routed envelopes.

pub mod config;
pub mod conversation;
pub mod envelope;
pub mod error;
pub mod floor;
pub mod hub;
pub mod router;

pub use config::FloorManagerConfig;
pub use envelope::{Envelope, PROTOCOL_VERSION};
pub use error::{DecodeError, HandlerError, ProcessingError};
pub use floor::Outcome;
pub use hub::{FloorManager, ProcessingResult, TickResult};
pub use router::{DeliveryHandler, DeliveryOutcome, Router};
