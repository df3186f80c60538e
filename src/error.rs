//! Application-visible error tags.
//!
//! Every variant's `Display` impl starts with a stable tag, followed by
//! `": "` and a message. Feed-handle emission logic (see `feed.rs`)
//! compares these tag prefixes, so renaming a variant's wire text is a
//! breaking change.

use serde_json::Value;

/// A single application-visible error, carrying the stable tag plus any
/// server-supplied diagnostic payload.
#[derive(Debug, Clone, thiserror::Error)]
pub enum FeedmeError {
    /// Argument shape/type is wrong for the method called.
    #[error("INVALID_ARGUMENT: {0}")]
    InvalidArgument(String),

    /// Operation is not valid for the current session/client state.
    #[error("INVALID_STATE: {0}")]
    InvalidState(String),

    /// Operation is not valid for the current feed-handle state.
    #[error("INVALID_FEED_STATE: {0}")]
    InvalidFeedState(String),

    /// Delivered to an action/feedOpen continuation on disconnect, or when
    /// the operation was attempted while disconnected.
    #[error("NOT_CONNECTED")]
    NotConnected,

    /// A local watchdog timer fired before the server responded.
    #[error("TIMEOUT")]
    Timeout,

    /// The server answered `Success: false`.
    #[error("REJECTED: {message}")]
    Rejected {
        message: String,
        server_error_code: String,
        server_error_data: Value,
    },

    /// The server sent `FeedTermination` for this feed.
    #[error("TERMINATED: {message}")]
    Terminated {
        message: String,
        server_error_code: String,
        server_error_data: Value,
    },

    /// A `FeedAction`/`ActionRevelation` carried an invalid delta.
    #[error("BAD_FEED_ACTION: {0}")]
    BadFeedAction(String),

    /// Same as `BadFeedAction`, reserved for the revelation-specific wording
    /// used by some call sites.
    #[error("BAD_ACTION_REVELATION: {0}")]
    BadActionRevelation(String),

    /// The server rejected the handshake (`Success: false`).
    #[error("HANDSHAKE_REJECTED: {0}")]
    HandshakeRejected(String),

    /// The transport reported it lost the connection.
    #[error("TRANSPORT_FAILURE: {0}")]
    TransportFailure(String),

    /// The transport violated its own contract (see `transport.rs`).
    #[error("TRANSPORT_ERROR: {0}")]
    TransportError(String),

    /// The instance/handle has been destroyed and can no longer be used.
    #[error("DESTROYED")]
    Destroyed,

    /// A server message failed to parse as JSON or failed schema validation.
    #[error("INVALID_MESSAGE: {0}")]
    InvalidMessage(String),

    /// A server message arrived that is not valid in the session's current
    /// state (e.g. a non-Handshake message before the handshake completes).
    #[error("UNEXPECTED_MESSAGE: {0}")]
    UnexpectedMessage(String),

    /// A delta in a `FeedAction`/`ActionRevelation` could not be applied.
    #[error("INVALID_DELTA: {0}")]
    InvalidDelta(String),

    /// The post-delta data's MD5 did not match the server-declared `FeedMd5`.
    #[error("INVALID_HASH: {0}")]
    InvalidHash(String),
}

impl FeedmeError {
    /// Returns the stable tag prefix used for feed-handle close-error
    /// comparisons: a close event is only re-emitted with a new error if
    /// its tag differs from the prior close error's tag.
    pub fn tag(&self) -> &'static str {
        match self {
            FeedmeError::InvalidArgument(_) => "INVALID_ARGUMENT",
            FeedmeError::InvalidState(_) => "INVALID_STATE",
            FeedmeError::InvalidFeedState(_) => "INVALID_FEED_STATE",
            FeedmeError::NotConnected => "NOT_CONNECTED",
            FeedmeError::Timeout => "TIMEOUT",
            FeedmeError::Rejected { .. } => "REJECTED",
            FeedmeError::Terminated { .. } => "TERMINATED",
            FeedmeError::BadFeedAction(_) => "BAD_FEED_ACTION",
            FeedmeError::BadActionRevelation(_) => "BAD_ACTION_REVELATION",
            FeedmeError::HandshakeRejected(_) => "HANDSHAKE_REJECTED",
            FeedmeError::TransportFailure(_) => "TRANSPORT_FAILURE",
            FeedmeError::TransportError(_) => "TRANSPORT_ERROR",
            FeedmeError::Destroyed => "DESTROYED",
            FeedmeError::InvalidMessage(_) => "INVALID_MESSAGE",
            FeedmeError::UnexpectedMessage(_) => "UNEXPECTED_MESSAGE",
            FeedmeError::InvalidDelta(_) => "INVALID_DELTA",
            FeedmeError::InvalidHash(_) => "INVALID_HASH",
        }
    }

    pub fn not_connected() -> Self {
        FeedmeError::NotConnected
    }

    pub fn timeout() -> Self {
        FeedmeError::Timeout
    }

    pub fn invalid_argument(msg: impl Into<String>) -> Self {
        FeedmeError::InvalidArgument(msg.into())
    }

    pub fn invalid_state(msg: impl Into<String>) -> Self {
        FeedmeError::InvalidState(msg.into())
    }

    pub fn invalid_feed_state(msg: impl Into<String>) -> Self {
        FeedmeError::InvalidFeedState(msg.into())
    }
}

pub type Result<T> = std::result::Result<T, FeedmeError>;
