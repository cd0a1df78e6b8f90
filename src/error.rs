//! Error types for the sanctuary client.
//!
//! A write failure raised by an intent is a persistence failure: it is logged
//! and reported on the intent's result channel, never retried, and never rolls
//! back local state. Blank note text is not an error at all; `send_note`
//! simply returns `None`.

/// Failure talking to a document store.
///
/// `Clone` so failures can ride the controller's broadcast event channel.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum StoreError {
    #[error("document not found: {0}")]
    NotFound(String),
    #[error("store rejected request ({code}): {message}")]
    Rejected { code: String, message: String },
    #[error("transport error: {0}")]
    Transport(String),
    #[error("store connection closed")]
    Closed,
    #[error("timed out waiting for store response")]
    Timeout,
    #[error("frame decode failed: {0}")]
    Decode(String),
    #[error("invalid document payload: {0}")]
    InvalidDocument(String),
}

impl From<frames::CodecError> for StoreError {
    fn from(err: frames::CodecError) -> Self {
        Self::Decode(err.to_string())
    }
}

impl From<tokio_tungstenite::tungstenite::Error> for StoreError {
    fn from(err: tokio_tungstenite::tungstenite::Error) -> Self {
        Self::Transport(err.to_string())
    }
}

/// Invalid sanctuary configuration.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ConfigError {
    #[error("invalid value for {key}: {value:?}")]
    InvalidValue { key: &'static str, value: String },
    #[error("sip increment must be within (0, 100], got {0}")]
    SipIncrement(f64),
    #[error("unlock tap threshold must be at least 1")]
    UnlockTaps,
    #[error("room id must not be empty")]
    EmptyRoomId,
}
