//! `Session` — the protocol state machine.
//!
//! `Session` owns the wire-level tables (action callbacks, feed-open/close
//! callbacks, feed data snapshots) and turns incoming server messages into
//! either a direct resolution of a pending continuation
//! (`tokio::sync::oneshot::Sender`, fired synchronously and in-order as
//! each message is handled) or a `SessionEvent` that the owning actor
//! (`client.rs`/`actor.rs`) dispatches onward to feed handles and outward
//! subscribers. `Session` itself never touches a transport or a timer —
//! those are the actor's job.

use std::collections::HashMap;

use serde_json::Value;
use tokio::sync::oneshot;

use crate::delta;
use crate::error::FeedmeError;
use crate::hash;
use crate::wire::{ClientMessage, Delta, FeedArgs, FeedIdentity, ServerMessage, PROTOCOL_VERSION};

pub mod state;
pub use state::{FeedServerStateKind, SessionPhase};

pub type ActionReply = oneshot::Sender<Result<Value, FeedmeError>>;
pub type FeedOpenReply = oneshot::Sender<Result<Value, FeedmeError>>;
pub type FeedCloseReply = oneshot::Sender<()>;

/// What resolves a pending `closing`/`terminated` feed entry: either the
/// application's own `feed_close()` continuation, or an internal reason
/// the session is closing the feed on the application's behalf (invalid
/// delta / bad hash). Exactly one feed-close callback ever fires per
/// entry — the forced variant just resolves into an `UnexpectedFeedClosed`
/// event instead of a user-visible reply.
enum CloseContinuation {
    Application(FeedCloseReply),
    Forced(FeedmeError),
}

enum FeedEntry {
    Opening(FeedOpenReply),
    Open(Value),
    Closing(CloseContinuation),
    Terminated(CloseContinuation),
}

/// Outward notifications produced while handling one transport event.
/// The caller dispatches these in the order they were returned; pending
/// continuations (oneshots) are resolved directly by `Session` and do not
/// appear here.
pub enum SessionEvent {
    Connect,
    Disconnect(Option<FeedmeError>),
    BadServerMessage(FeedmeError),
    BadClientMessage(Value),
    UnexpectedFeedClosing(FeedIdentity, FeedmeError),
    UnexpectedFeedClosed(FeedIdentity, FeedmeError),
    FeedAction {
        identity: FeedIdentity,
        action_name: String,
        action_data: Value,
        new_data: Value,
        old_data: Value,
    },
    /// The session needs another wire message sent (e.g. the `FeedClose`
    /// issued when a delta is rejected).
    Send(ClientMessage),
    /// The session needs the transport itself torn down (handshake
    /// rejection).
    RequestTransportDisconnect(Option<FeedmeError>),
}

/// The protocol state machine. Owned exclusively by the `Client` actor
/// task.
pub struct Session {
    phase: SessionPhase,
    next_callback_id: u64,
    action_callbacks: HashMap<String, ActionReply>,
    feeds: HashMap<String, FeedEntry>,
    feed_identities: HashMap<String, FeedIdentity>,
}

impl Default for Session {
    fn default() -> Self {
        Self::new()
    }
}

impl Session {
    pub fn new() -> Self {
        Self {
            phase: SessionPhase::Disconnected,
            next_callback_id: 0,
            action_callbacks: HashMap::new(),
            feeds: HashMap::new(),
            feed_identities: HashMap::new(),
        }
    }

    pub fn phase(&self) -> SessionPhase {
        self.phase
    }

    /// Called once the transport confirms it has started connecting (the
    /// transport's `connecting` emission, before `connect`). Per the data
    /// model (spec §3), `connecting` covers both this transport-connecting
    /// window and the later post-transport-connected/pre-handshake window,
    /// so this is the point `Session` itself first leaves `disconnected` —
    /// a connect-time failure (timeout or transport failure) that never
    /// reaches `connect` must still be seen by the caller as a disconnect
    /// out of `connecting`, not `disconnected`, or the retry policy never
    /// triggers.
    pub fn on_transport_connecting(&mut self) {
        self.phase = SessionPhase::Connecting;
    }

    /// Called once the transport confirms `connect`. Returns the
    /// `Handshake` message the caller must send.
    pub fn on_transport_connect(&mut self) -> ClientMessage {
        self.phase = SessionPhase::Connecting;
        ClientMessage::Handshake {
            versions: vec![PROTOCOL_VERSION.to_string()],
        }
    }

    /// Assigns the next monotonic callback id and records `reply`.
    /// Callback ids reset to zero on disconnect, which happens in
    /// `on_transport_disconnect`.
    pub fn action(
        &mut self,
        action_name: String,
        action_args: Value,
        reply: ActionReply,
    ) -> Result<ClientMessage, FeedmeError> {
        if self.phase != SessionPhase::Connected {
            return Err(FeedmeError::invalid_state("session is not connected"));
        }
        self.next_callback_id += 1;
        let callback_id = self.next_callback_id.to_string();
        self.action_callbacks.insert(callback_id.clone(), reply);
        Ok(ClientMessage::Action {
            action_name,
            action_args,
            callback_id,
        })
    }

    pub fn feed_open(
        &mut self,
        identity: FeedIdentity,
        reply: FeedOpenReply,
    ) -> Result<ClientMessage, FeedmeError> {
        if self.phase != SessionPhase::Connected {
            return Err(FeedmeError::invalid_state("session is not connected"));
        }
        let serial = identity.serial();
        if self.feeds.contains_key(&serial) {
            return Err(FeedmeError::invalid_state(
                "feed must be closed before it can be opened",
            ));
        }
        let message = ClientMessage::FeedOpen {
            feed_name: identity.name.clone(),
            feed_args: identity.args.clone(),
        };
        self.feeds.insert(serial.clone(), FeedEntry::Opening(reply));
        self.feed_identities.insert(serial, identity);
        Ok(message)
    }

    pub fn feed_close(
        &mut self,
        identity: &FeedIdentity,
        reply: FeedCloseReply,
    ) -> Result<ClientMessage, FeedmeError> {
        if self.phase != SessionPhase::Connected {
            return Err(FeedmeError::invalid_state("session is not connected"));
        }
        let serial = identity.serial();
        match self.feeds.get(&serial) {
            Some(FeedEntry::Open(_)) => {}
            _ => return Err(FeedmeError::invalid_state("feed is not open")),
        }
        self.feeds
            .insert(serial, FeedEntry::Closing(CloseContinuation::Application(reply)));
        Ok(ClientMessage::FeedClose {
            feed_name: identity.name.clone(),
            feed_args: identity.args.clone(),
        })
    }

    /// Returns a frozen snapshot of the feed's current data, if it is open.
    pub fn feed_data(&self, serial: &str) -> Option<Value> {
        match self.feeds.get(serial) {
            Some(FeedEntry::Open(data)) => Some(data.clone()),
            _ => None,
        }
    }

    pub fn feed_server_state(&self, serial: &str) -> FeedServerStateKind {
        match self.feeds.get(serial) {
            None => FeedServerStateKind::Closed,
            Some(FeedEntry::Opening(_)) => FeedServerStateKind::Opening,
            Some(FeedEntry::Open(_)) => FeedServerStateKind::Open,
            Some(FeedEntry::Closing(_)) => FeedServerStateKind::Closing,
            Some(FeedEntry::Terminated(_)) => FeedServerStateKind::Terminated,
        }
    }

    /// Parses and handles one raw transport message.
    pub fn handle_message(&mut self, raw: &str) -> Vec<SessionEvent> {
        let value: Value = match serde_json::from_str(raw) {
            Ok(v) => v,
            Err(e) => {
                return vec![SessionEvent::BadServerMessage(FeedmeError::InvalidMessage(
                    format!("Invalid JSON: {}", e),
                ))]
            }
        };
        match serde_json::from_value::<ServerMessage>(value) {
            Ok(msg) => self.handle_parsed(msg),
            Err(e) => vec![SessionEvent::BadServerMessage(FeedmeError::InvalidMessage(
                format!("Schema violation: {}", e),
            ))],
        }
    }

    fn handle_parsed(&mut self, msg: ServerMessage) -> Vec<SessionEvent> {
        if let ServerMessage::HandshakeResponse { success, version } = &msg {
            return self.handle_handshake_response(*success, version.clone());
        }
        if self.phase != SessionPhase::Connected {
            return vec![SessionEvent::BadServerMessage(FeedmeError::UnexpectedMessage(
                "message received before the handshake completed".into(),
            ))];
        }
        match msg {
            ServerMessage::HandshakeResponse { .. } => unreachable!("handled above"),
            ServerMessage::ViolationResponse { diagnostics } => {
                vec![SessionEvent::BadClientMessage(diagnostics)]
            }
            ServerMessage::ActionResponse {
                callback_id,
                success,
                action_data,
                error_code,
                error_data,
            } => self.handle_action_response(callback_id, success, action_data, error_code, error_data),
            ServerMessage::FeedOpenResponse {
                feed_name,
                feed_args,
                success,
                feed_data,
                error_code,
                error_data,
            } => self.handle_feed_open_response(
                FeedIdentity::new(feed_name, feed_args),
                success,
                feed_data,
                error_code,
                error_data,
            ),
            ServerMessage::FeedCloseResponse { feed_name, feed_args } => {
                self.handle_feed_close_response(FeedIdentity::new(feed_name, feed_args))
            }
            ServerMessage::FeedAction {
                feed_name,
                feed_args,
                action_name,
                action_data,
                feed_deltas,
                feed_md5,
            }
            | ServerMessage::ActionRevelation {
                feed_name,
                feed_args,
                action_name,
                action_data,
                feed_deltas,
                feed_md5,
            } => self.handle_feed_action(
                FeedIdentity::new(feed_name, feed_args),
                action_name,
                action_data,
                feed_deltas,
                feed_md5,
            ),
            ServerMessage::FeedTermination {
                feed_name,
                feed_args,
                error_code,
                error_data,
            } => self.handle_feed_termination(FeedIdentity::new(feed_name, feed_args), error_code, error_data),
        }
    }

    fn handle_handshake_response(&mut self, success: bool, version: Option<String>) -> Vec<SessionEvent> {
        if self.phase != SessionPhase::Connecting {
            return vec![SessionEvent::BadServerMessage(FeedmeError::UnexpectedMessage(
                "unexpected HandshakeResponse".into(),
            ))];
        }
        if !success {
            return vec![SessionEvent::RequestTransportDisconnect(Some(
                FeedmeError::HandshakeRejected("server rejected the handshake".into()),
            ))];
        }
        if version.as_deref() != Some(PROTOCOL_VERSION) {
            // A version the client did not offer is server misbehavior,
            // not a negotiated rejection.
            return vec![SessionEvent::BadServerMessage(FeedmeError::InvalidMessage(format!(
                "HandshakeResponse selected an unoffered version: {:?}",
                version
            )))];
        }
        self.phase = SessionPhase::Connected;
        vec![SessionEvent::Connect]
    }

    fn handle_action_response(
        &mut self,
        callback_id: String,
        success: bool,
        action_data: Option<Value>,
        error_code: Option<String>,
        error_data: Option<Value>,
    ) -> Vec<SessionEvent> {
        let Some(reply) = self.action_callbacks.remove(&callback_id) else {
            return vec![SessionEvent::BadServerMessage(FeedmeError::UnexpectedMessage(format!(
                "ActionResponse for unknown callback id {:?}",
                callback_id
            )))];
        };
        let outcome = if success {
            Ok(action_data.unwrap_or(Value::Null))
        } else {
            Err(FeedmeError::Rejected {
                message: "server rejected the action".into(),
                server_error_code: error_code.unwrap_or_default(),
                server_error_data: error_data.unwrap_or(Value::Null),
            })
        };
        let _ = reply.send(outcome);
        Vec::new()
    }

    fn handle_feed_open_response(
        &mut self,
        identity: FeedIdentity,
        success: bool,
        feed_data: Option<Value>,
        error_code: Option<String>,
        error_data: Option<Value>,
    ) -> Vec<SessionEvent> {
        let serial = identity.serial();
        match self.feeds.remove(&serial) {
            Some(FeedEntry::Opening(reply)) => {
                if success {
                    let data = feed_data.unwrap_or(Value::Null);
                    self.feeds.insert(serial, FeedEntry::Open(data.clone()));
                    let _ = reply.send(Ok(data));
                } else {
                    self.feed_identities.remove(&serial);
                    let _ = reply.send(Err(FeedmeError::Rejected {
                        message: "server rejected the feed open".into(),
                        server_error_code: error_code.unwrap_or_default(),
                        server_error_data: error_data.unwrap_or(Value::Null),
                    }));
                }
                Vec::new()
            }
            other => {
                if let Some(entry) = other {
                    self.feeds.insert(serial, entry);
                }
                vec![SessionEvent::BadServerMessage(FeedmeError::UnexpectedMessage(format!(
                    "FeedOpenResponse for feed not in the opening state: {:?}",
                    identity
                )))]
            }
        }
    }

    fn handle_feed_close_response(&mut self, identity: FeedIdentity) -> Vec<SessionEvent> {
        let serial = identity.serial();
        match self.feeds.remove(&serial) {
            Some(FeedEntry::Closing(cont)) | Some(FeedEntry::Terminated(cont)) => {
                self.feed_identities.remove(&serial);
                match cont {
                    CloseContinuation::Application(reply) => {
                        let _ = reply.send(());
                        Vec::new()
                    }
                    CloseContinuation::Forced(reason) => {
                        vec![SessionEvent::UnexpectedFeedClosed(identity, reason)]
                    }
                }
            }
            other => {
                if let Some(entry) = other {
                    self.feeds.insert(serial, entry);
                }
                vec![SessionEvent::BadServerMessage(FeedmeError::UnexpectedMessage(format!(
                    "FeedCloseResponse for feed not in the closing/terminated state: {:?}",
                    identity
                )))]
            }
        }
    }

    fn handle_feed_action(
        &mut self,
        identity: FeedIdentity,
        action_name: String,
        action_data: Value,
        deltas: Vec<Delta>,
        feed_md5: Option<String>,
    ) -> Vec<SessionEvent> {
        let serial = identity.serial();
        match self.feeds.get(&serial) {
            Some(FeedEntry::Open(old_data)) => {
                let old_data = old_data.clone();
                let mut new_data = old_data.clone();
                if let Err(delta_err) = delta::apply_deltas(&mut new_data, &deltas) {
                    return self.force_close_feed(identity, FeedmeError::InvalidDelta(delta_err));
                }
                if let Some(expected_md5) = &feed_md5 {
                    if !hash::verify(&new_data, expected_md5) {
                        return self.force_close_feed(
                            identity,
                            FeedmeError::InvalidHash("hash verification failed".into()),
                        );
                    }
                }
                self.feeds.insert(serial, FeedEntry::Open(new_data.clone()));
                vec![SessionEvent::FeedAction {
                    identity,
                    action_name,
                    action_data,
                    new_data,
                    old_data,
                }]
            }
            Some(FeedEntry::Closing(_)) | Some(FeedEntry::Terminated(_)) => {
                // Discarded silently, including the terminated case: the
                // application has already been told (or will be told) the
                // feed is gone, so a revelation for a generation it no
                // longer tracks carries no actionable information.
                Vec::new()
            }
            _ => vec![SessionEvent::BadServerMessage(FeedmeError::UnexpectedMessage(format!(
                "feed action for feed not in the open/closing state: {:?}",
                identity
            )))],
        }
    }

    fn force_close_feed(&mut self, identity: FeedIdentity, bad_server_reason: FeedmeError) -> Vec<SessionEvent> {
        let serial = identity.serial();
        let forced = FeedmeError::BadFeedAction(bad_server_reason.to_string());
        self.feeds
            .insert(serial, FeedEntry::Closing(CloseContinuation::Forced(forced.clone())));
        let close_message = ClientMessage::FeedClose {
            feed_name: identity.name.clone(),
            feed_args: identity.args.clone(),
        };
        vec![
            SessionEvent::BadServerMessage(bad_server_reason),
            SessionEvent::Send(close_message),
            SessionEvent::UnexpectedFeedClosing(identity, forced),
        ]
    }

    fn handle_feed_termination(
        &mut self,
        identity: FeedIdentity,
        error_code: String,
        error_data: Value,
    ) -> Vec<SessionEvent> {
        let serial = identity.serial();
        let terminated_err = FeedmeError::Terminated {
            message: format!("server terminated the feed ({})", error_code),
            server_error_code: error_code,
            server_error_data: error_data,
        };
        match self.feeds.remove(&serial) {
            Some(FeedEntry::Open(_)) => {
                self.feed_identities.remove(&serial);
                vec![
                    SessionEvent::UnexpectedFeedClosing(identity.clone(), terminated_err.clone()),
                    SessionEvent::UnexpectedFeedClosed(identity, terminated_err),
                ]
            }
            Some(FeedEntry::Closing(cont)) => {
                // The close response is still pending; the application
                // never learns of the termination.
                self.feeds.insert(serial, FeedEntry::Terminated(cont));
                Vec::new()
            }
            other => {
                if let Some(entry) = other {
                    self.feeds.insert(serial, entry);
                }
                vec![SessionEvent::BadServerMessage(FeedmeError::UnexpectedMessage(format!(
                    "FeedTermination for feed not in the open/closing state: {:?}",
                    identity
                )))]
            }
        }
    }

    /// Handles a transport disconnect: snapshots and clears every table,
    /// then returns a fixed fan-out order (action callbacks, opening
    /// feeds, open feeds, closing/terminated feeds, then the session's own
    /// disconnect) for the caller to dispatch.
    pub fn on_transport_disconnect(&mut self, err: Option<FeedmeError>) -> Vec<SessionEvent> {
        self.phase = SessionPhase::Disconnected;
        self.next_callback_id = 0;
        let action_callbacks = std::mem::take(&mut self.action_callbacks);
        let feeds = std::mem::take(&mut self.feeds);
        let identities = std::mem::take(&mut self.feed_identities);

        // 1. Outstanding action callbacks, in callback-id order.
        let mut action_list: Vec<(String, ActionReply)> = action_callbacks.into_iter().collect();
        action_list.sort_by_key(|(id, _)| id.parse::<u64>().unwrap_or(u64::MAX));
        for (_, reply) in action_list {
            let _ = reply.send(Err(FeedmeError::NotConnected));
        }

        let mut opening = Vec::new();
        let mut open = Vec::new();
        let mut closing = Vec::new();
        let mut feed_list: Vec<(String, FeedEntry)> = feeds.into_iter().collect();
        feed_list.sort_by(|(a, _), (b, _)| a.cmp(b));
        for (serial, entry) in feed_list {
            match entry {
                FeedEntry::Opening(reply) => opening.push(reply),
                FeedEntry::Open(_) => open.push(serial),
                FeedEntry::Closing(cont) | FeedEntry::Terminated(cont) => closing.push((serial, cont)),
            }
        }

        // 2. Opening feeds.
        for reply in opening {
            let _ = reply.send(Err(FeedmeError::NotConnected));
        }

        let mut events = Vec::new();

        // 3. Open feeds: unexpectedClosing then unexpectedClosed, per feed.
        for serial in open {
            let identity = identities
                .get(&serial)
                .cloned()
                .unwrap_or_else(|| FeedIdentity::new(String::new(), FeedArgs::new()));
            events.push(SessionEvent::UnexpectedFeedClosing(
                identity.clone(),
                FeedmeError::NotConnected,
            ));
            events.push(SessionEvent::UnexpectedFeedClosed(identity, FeedmeError::NotConnected));
        }

        // 4. Closing/terminated feeds resolve with success, except forced
        // closes which still owe the application the original reason.
        for (serial, cont) in closing {
            match cont {
                CloseContinuation::Application(reply) => {
                    let _ = reply.send(());
                }
                CloseContinuation::Forced(reason) => {
                    let identity = identities
                        .get(&serial)
                        .cloned()
                        .unwrap_or_else(|| FeedIdentity::new(String::new(), FeedArgs::new()));
                    events.push(SessionEvent::UnexpectedFeedClosed(identity, reason));
                }
            }
        }

        // 5. The session's own disconnect event.
        events.push(SessionEvent::Disconnect(err));
        events
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn feed(name: &str) -> FeedIdentity {
        FeedIdentity::new(name, FeedArgs::new())
    }

    #[test]
    fn handshake_then_action_round_trip() {
        let mut session = Session::new();
        let msg = session.on_transport_connect();
        assert!(matches!(msg, ClientMessage::Handshake { .. }));

        let events = session.handle_message(r#"{"MessageType":"HandshakeResponse","Success":true,"Version":"0.1"}"#);
        assert!(matches!(events.as_slice(), [SessionEvent::Connect]));
        assert_eq!(session.phase(), SessionPhase::Connected);

        let (tx, rx) = oneshot::channel();
        let action_msg = session.action("act".into(), json!({"k": "v"}), tx).unwrap();
        match action_msg {
            ClientMessage::Action { callback_id, .. } => assert_eq!(callback_id, "1"),
            _ => panic!("expected Action"),
        }

        let events = session.handle_message(
            r#"{"MessageType":"ActionResponse","CallbackId":"1","Success":true,"ActionData":{"r":1}}"#,
        );
        assert!(events.is_empty());
        assert_eq!(rx.try_recv().unwrap().unwrap(), json!({"r": 1}));
    }

    #[test]
    fn bad_delta_force_closes_feed() {
        let mut session = Session::new();
        session.on_transport_connect();
        session.handle_message(r#"{"MessageType":"HandshakeResponse","Success":true,"Version":"0.1"}"#);

        let (tx, _rx) = oneshot::channel();
        session.feed_open(feed("f"), tx).unwrap();
        session.handle_message(r#"{"MessageType":"FeedOpenResponse","FeedName":"f","FeedArgs":{},"Success":true,"FeedData":{"c":0}}"#);
        assert_eq!(session.feed_server_state(&feed("f").serial()), FeedServerStateKind::Open);

        let events = session.handle_message(
            r#"{"MessageType":"FeedAction","FeedName":"f","FeedArgs":{},"ActionName":"inc","ActionData":{},"FeedDeltas":[{"Operation":"Set","Path":["nonexistent","child"],"Value":1}]}"#,
        );
        assert_eq!(events.len(), 3);
        assert!(matches!(events[0], SessionEvent::BadServerMessage(FeedmeError::InvalidDelta(_))));
        assert!(matches!(events[1], SessionEvent::Send(ClientMessage::FeedClose { .. })));
        assert!(matches!(events[2], SessionEvent::UnexpectedFeedClosing(_, FeedmeError::BadFeedAction(_))));
        assert_eq!(session.feed_server_state(&feed("f").serial()), FeedServerStateKind::Closing);

        let events = session.handle_message(r#"{"MessageType":"FeedCloseResponse","FeedName":"f","FeedArgs":{}}"#);
        assert!(matches!(events.as_slice(), [SessionEvent::UnexpectedFeedClosed(_, FeedmeError::BadFeedAction(_))]));
        assert_eq!(session.feed_server_state(&feed("f").serial()), FeedServerStateKind::Closed);
    }

    #[test]
    fn disconnect_fans_out_in_order() {
        let mut session = Session::new();
        session.on_transport_connect();
        session.handle_message(r#"{"MessageType":"HandshakeResponse","Success":true,"Version":"0.1"}"#);

        let (action_tx, mut action_rx) = oneshot::channel();
        session.action("a".into(), json!({}), action_tx).unwrap();

        let (feed_tx, _feed_rx) = oneshot::channel();
        session.feed_open(feed("f"), feed_tx).unwrap();
        session.handle_message(r#"{"MessageType":"FeedOpenResponse","FeedName":"f","FeedArgs":{},"Success":true,"FeedData":{}}"#);

        let events = session.on_transport_disconnect(Some(FeedmeError::TransportFailure("closed".into())));
        assert!(matches!(
            action_rx.try_recv().unwrap().unwrap_err(),
            FeedmeError::NotConnected
        ));
        assert_eq!(events.len(), 3);
        assert!(matches!(events[0], SessionEvent::UnexpectedFeedClosing(_, FeedmeError::NotConnected)));
        assert!(matches!(events[1], SessionEvent::UnexpectedFeedClosed(_, FeedmeError::NotConnected)));
        assert!(matches!(events[2], SessionEvent::Disconnect(Some(FeedmeError::TransportFailure(_)))));
        assert_eq!(session.phase(), SessionPhase::Disconnected);
    }

    #[test]
    fn connecting_phase_begins_before_the_transport_connects() {
        let mut session = Session::new();
        assert_eq!(session.phase(), SessionPhase::Disconnected);

        // The transport-connecting window (spec §3: `connecting` covers
        // both this and the post-transport-connect/pre-handshake window)
        // must already read as `Connecting`, so a connect-time failure
        // that never reaches `on_transport_connect` still disconnects out
        // of `Connecting` rather than `Disconnected`.
        session.on_transport_connecting();
        assert_eq!(session.phase(), SessionPhase::Connecting);

        let events = session.on_transport_disconnect(Some(FeedmeError::TransportFailure("refused".into())));
        assert!(matches!(events.as_slice(), [SessionEvent::Disconnect(Some(FeedmeError::TransportFailure(_)))]));
        assert_eq!(session.phase(), SessionPhase::Disconnected);
    }
}
