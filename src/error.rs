//! Error kinds shared across the envelope model, controller, hub and router.
//!
//! Only the two "fatal for this envelope" kinds (`DecodeError`'s variants) are
//! ever returned as an `Err`. Every other processing outcome is a value
//! living inside `ProcessingResult`, never an `Err`.

use thiserror::Error;

/// Errors from [`crate::envelope::decode`]. Both variants reject the whole
/// envelope; no event within it is ever partially applied.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum DecodeError {
    #[error("malformed envelope: {0}")]
    Malformed(String),

    #[error("unsupported schema version: {0}")]
    UnsupportedSchema(String),
}

/// Top-level error from [`crate::hub::FloorManager::process_envelope`] and
/// [`crate::hub::FloorManager::process_decoded`]. Wraps [`DecodeError`] since
/// those are the only two kinds that halt processing for the whole envelope.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ProcessingError {
    #[error(transparent)]
    Decode(#[from] DecodeError),
}

/// A delivery handler's report that it failed to deliver an envelope.
/// Isolated per destination; never rolls back floor state.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[error("{0}")]
pub struct HandlerError(pub String);

impl HandlerError {
    pub fn new(message: impl Into<String>) -> Self {
        Self(message.into())
    }
}
