//! Feedme real-time messaging protocol client.
//!
//! A connection-oriented client for the Feedme wire protocol: a handshake,
//! request/response actions, and named+parameterized feeds that stream
//! incremental deltas over a single persistent transport. The transport
//! itself (WebSocket, long-poll, or anything else satisfying
//! `transport::Transport`) is supplied by the caller; this crate owns
//! everything above it — session bookkeeping, reconnect/backoff policy,
//! feed-handle bookkeeping, and the public `Client`/`Feed` API.

pub mod actor;
pub mod client;
pub mod delta;
pub mod error;
pub mod feed;
pub mod hash;
pub mod session;
pub mod transport;
pub mod wire;

pub use client::{Client, ClientEvent, ClientOptions, ClientState};
pub use error::FeedmeError;
pub use feed::{DesiredState, Feed, FeedEvent, FeedState};
pub use transport::{Transport, TransportEvent, TransportState, TransportWrapper};
pub use wire::{FeedArgs, FeedIdentity};
