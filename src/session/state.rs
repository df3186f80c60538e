//! Session and per-feed state enums.

/// Session connection phase. `Client` layers a third, purely local phase
/// ("preemptively connecting") on top of this.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionPhase {
    Disconnected,
    /// Transport is connecting, or connected but the handshake has not
    /// completed yet: covers both transport-connecting and
    /// post-transport-connected/pre-handshake.
    Connecting,
    Connected,
}

/// The server-observed state of one feed serial, as seen from outside
/// `Session`. `Session::feed_server_state` projects its internal
/// `FeedEntry` down to this.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FeedServerStateKind {
    Closed,
    Opening,
    Open,
    Closing,
    Terminated,
}
