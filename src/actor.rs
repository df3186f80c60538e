//! The single-owner actor task that backs `Client`/`Feed`: a single
//! logical execution context owns all state, so nothing here needs a
//! mutex.
//!
//! One task owns `Session`, the feed handle tables, and every timer;
//! `Client`/`Feed` are thin handles that send an `ActorCommand` and, where
//! a continuation is needed, await a `tokio::sync::oneshot`. Outward
//! notifications (`ClientEvent`, per-feed `FeedEvent`) are pushed through
//! channels, never invoked synchronously from inside a command handler's
//! caller — the channel hop defers delivery to the next tick by
//! construction, so no callback ever reenters the actor mid-handler.
//!
//! One subtlety needs a channel rather than a plain `.await`: when
//! `consider_feed_state` issues a `FeedOpen`/`FeedClose` and later needs to
//! react to its outcome, it cannot just `.await` the corresponding oneshot
//! inline — that oneshot is resolved by `Session::handle_message`, which
//! only runs on a *later* turn of this same actor loop, so inline-awaiting
//! it would deadlock the actor. Each such continuation is instead raced
//! (and, for feed-open, timed out) inside a small spawned task that
//! reports back over `internal_tx`, the same detached-task-reports-back
//! shape as a background keepalive loop.

use std::collections::HashMap;
use std::pin::Pin;
use std::time::Duration;

use serde_json::Value;
use tokio::sync::{broadcast, mpsc, oneshot};
use tokio::time::Sleep;

use crate::client::{ClientEvent, ClientOptions, ClientState};
use crate::error::FeedmeError;
use crate::feed::FeedEvent;
use crate::session::{FeedServerStateKind, Session, SessionEvent, SessionPhase};
use crate::transport::{Transport, TransportEvent, TransportWrapper};
use crate::wire::{ClientMessage, FeedIdentity};

pub(crate) type FeedHandleId = u64;

/// Commands the public `Client`/`Feed` handles send to the actor.
pub(crate) enum ActorCommand {
    Connect {
        reply: oneshot::Sender<Result<(), FeedmeError>>,
    },
    Disconnect,
    Action {
        name: String,
        args: Value,
        reply: oneshot::Sender<Result<Value, FeedmeError>>,
    },
    FeedRegister {
        identity: FeedIdentity,
        handle_id: FeedHandleId,
        events_tx: mpsc::UnboundedSender<FeedEvent>,
    },
    FeedDesireOpen {
        handle_id: FeedHandleId,
    },
    FeedDesireClosed {
        handle_id: FeedHandleId,
    },
    FeedState {
        handle_id: FeedHandleId,
        reply: oneshot::Sender<Result<crate::feed::FeedState, FeedmeError>>,
    },
    FeedData {
        handle_id: FeedHandleId,
        reply: oneshot::Sender<Result<Option<Value>, FeedmeError>>,
    },
    FeedDestroy {
        handle_id: FeedHandleId,
    },
    FeedHandleDropped {
        handle_id: FeedHandleId,
    },
    ClientState {
        reply: oneshot::Sender<ClientState>,
    },
}

/// Messages the actor sends to itself from spawned watcher tasks.
enum InternalEvent {
    FeedOpenSettled { serial: String, result: Result<Value, FeedmeError> },
    FeedOpenTimedOut { serial: String },
    FeedOpenLate { serial: String, result: Result<Value, FeedmeError> },
    FeedCloseSettled { serial: String },
    ReopenWindowElapsed { serial: String },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum LastEmission {
    Close,
    Opening,
    Open,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum DesiredState {
    Open,
    Closed,
}

struct FeedHandleRecord {
    identity: FeedIdentity,
    desired: DesiredState,
    last_emission: LastEmission,
    last_close_tag: Option<&'static str>,
    events_tx: mpsc::UnboundedSender<FeedEvent>,
}

fn is_retryable(err: &Option<FeedmeError>) -> bool {
    matches!(err, Some(FeedmeError::Timeout) | Some(FeedmeError::TransportFailure(_)))
}

/// Owns every piece of mutable state `Client` needs, except the transport
/// wrapper itself, which is kept as a sibling local in `run` so
/// `tokio::select!` can borrow it from a single branch without aliasing
/// `ActorState`.
struct ActorState {
    options: ClientOptions,
    session: Session,
    event_tx: broadcast::Sender<ClientEvent>,
    internal_tx: mpsc::UnboundedSender<InternalEvent>,
    feed_handles: HashMap<FeedHandleId, FeedHandleRecord>,
    handles_by_serial: HashMap<String, Vec<FeedHandleId>>,
    reopen_counts: HashMap<String, u32>,
    connect_attempt: u32,
    pending_connect_reply: Option<oneshot::Sender<Result<(), FeedmeError>>>,
    preemptive_connecting: bool,
    intentional_disconnect: bool,
}

impl ActorState {
    fn identity_for_serial(&self, serial: &str) -> Option<FeedIdentity> {
        let id = self.handles_by_serial.get(serial)?.first()?;
        self.feed_handles.get(id).map(|r| r.identity.clone())
    }

    fn desired_open_for_serial(&self, serial: &str) -> bool {
        self.handles_by_serial
            .get(serial)
            .map(|ids| {
                ids.iter()
                    .any(|id| matches!(self.feed_handles.get(id).map(|r| r.desired), Some(DesiredState::Open)))
            })
            .unwrap_or(false)
    }

    async fn send_wire<T: Transport>(&self, wrapper: &mut TransportWrapper<T>, msg: ClientMessage) {
        let json = serde_json::to_string(&msg).expect("ClientMessage serialization cannot fail");
        if let Err(e) = wrapper.send(json).await {
            tracing::warn!(target: "feedme::client", error = %e, "failed to send wire message");
        }
    }

    fn emit_client_event(&self, event: ClientEvent) {
        let _ = self.event_tx.send(event);
    }

    /// Reconciles server feed state with the union of every live handle's
    /// desire for `serial`.
    async fn consider_feed_state<T: Transport>(&mut self, serial: &str, wrapper: &mut TransportWrapper<T>) {
        if self.session.phase() != SessionPhase::Connected {
            return;
        }
        let Some(identity) = self.identity_for_serial(serial) else {
            return;
        };
        let desired_open = self.desired_open_for_serial(serial);
        let server_state = self.session.feed_server_state(serial);
        match (server_state, desired_open) {
            (FeedServerStateKind::Closed, true) => self.open_serial(identity, wrapper).await,
            (FeedServerStateKind::Open, false) => self.close_serial(identity, wrapper).await,
            _ => {}
        }
    }

    async fn open_serial<T: Transport>(&mut self, identity: FeedIdentity, wrapper: &mut TransportWrapper<T>) {
        let serial = identity.serial();
        self.notify_serial_opening(&serial);
        let (tx, rx) = oneshot::channel();
        match self.session.feed_open(identity, tx) {
            Ok(msg) => {
                self.send_wire(wrapper, msg).await;
                self.spawn_open_watcher(serial, rx);
            }
            Err(e) => tracing::warn!(target: "feedme::client", error = %e, %serial, "feed_open rejected unexpectedly"),
        }
    }

    async fn close_serial<T: Transport>(&mut self, identity: FeedIdentity, wrapper: &mut TransportWrapper<T>) {
        let serial = identity.serial();
        let (tx, rx) = oneshot::channel();
        match self.session.feed_close(&identity, tx) {
            Ok(msg) => {
                self.send_wire(wrapper, msg).await;
                let internal_tx = self.internal_tx.clone();
                let serial_owned = serial.clone();
                tokio::spawn(async move {
                    if rx.await.is_ok() {
                        let _ = internal_tx.send(InternalEvent::FeedCloseSettled { serial: serial_owned });
                    }
                });
            }
            Err(e) => tracing::warn!(target: "feedme::client", error = %e, %serial, "feed_close rejected unexpectedly"),
        }
    }

    fn spawn_open_watcher(&self, serial: String, rx: oneshot::Receiver<Result<Value, FeedmeError>>) {
        let internal_tx = self.internal_tx.clone();
        let timeout_ms = self.options.feed_timeout_ms;
        tokio::spawn(async move {
            if timeout_ms == 0 {
                if let Ok(result) = rx.await {
                    let _ = internal_tx.send(InternalEvent::FeedOpenSettled { serial, result });
                }
                return;
            }
            let sleep = tokio::time::sleep(Duration::from_millis(timeout_ms));
            tokio::pin!(sleep);
            tokio::pin!(rx);
            tokio::select! {
                res = &mut rx => {
                    if let Ok(result) = res {
                        let _ = internal_tx.send(InternalEvent::FeedOpenSettled { serial, result });
                    }
                    return;
                }
                _ = &mut sleep => {
                    let _ = internal_tx.send(InternalEvent::FeedOpenTimedOut { serial: serial.clone() });
                }
            }
            if let Ok(result) = rx.await {
                let _ = internal_tx.send(InternalEvent::FeedOpenLate { serial, result });
            }
        });
    }

    /// Emits `Opening` to every handle on `serial` that desires open and
    /// last saw a close, now that the server has moved to opening.
    fn notify_serial_opening(&mut self, serial: &str) {
        let Some(ids) = self.handles_by_serial.get(serial).cloned() else {
            return;
        };
        for id in ids {
            if let Some(rec) = self.feed_handles.get_mut(&id) {
                if rec.desired == DesiredState::Open && rec.last_emission == LastEmission::Close {
                    let _ = rec.events_tx.send(FeedEvent::Opening);
                    rec.last_emission = LastEmission::Opening;
                }
            }
        }
    }

    /// Emits the missing `Opening`/`Open` pair to every handle on `serial`
    /// that desires open, now that the server reports the feed open: a
    /// handle that last saw a close gets both events; one that already saw
    /// `Opening` only gets `Open`.
    fn notify_serial_open(&mut self, serial: &str) {
        let Some(ids) = self.handles_by_serial.get(serial).cloned() else {
            return;
        };
        for id in ids {
            if let Some(rec) = self.feed_handles.get_mut(&id) {
                if rec.desired != DesiredState::Open {
                    continue;
                }
                match rec.last_emission {
                    LastEmission::Close => {
                        let _ = rec.events_tx.send(FeedEvent::Opening);
                        let _ = rec.events_tx.send(FeedEvent::Open);
                    }
                    LastEmission::Opening => {
                        let _ = rec.events_tx.send(FeedEvent::Open);
                    }
                    LastEmission::Open => {}
                }
                rec.last_emission = LastEmission::Open;
                rec.last_close_tag = None;
            }
        }
    }

    /// Emits `Close` to every handle on `serial` that still desires open,
    /// now that the server reports the feed closed. A handle that already
    /// saw `Opening`/`Open` gets the close immediately; one that already
    /// saw a close only gets a new event if the error's tag differs from
    /// the previous close error's tag, avoiding duplicate close
    /// notifications for the same underlying failure.
    fn notify_serial_closed(&mut self, serial: &str, err: Option<FeedmeError>) {
        let Some(ids) = self.handles_by_serial.get(serial).cloned() else {
            return;
        };
        for id in ids {
            let Some(rec) = self.feed_handles.get_mut(&id) else { continue };
            if rec.desired != DesiredState::Open {
                continue;
            }
            match rec.last_emission {
                LastEmission::Opening | LastEmission::Open => {
                    if let Some(e) = &err {
                        let _ = rec.events_tx.send(FeedEvent::Close(Some(e.clone())));
                        rec.last_close_tag = Some(e.tag());
                    } else {
                        rec.last_close_tag = None;
                    }
                    rec.last_emission = LastEmission::Close;
                }
                LastEmission::Close => {
                    if let Some(e) = &err {
                        if rec.last_close_tag != Some(e.tag()) {
                            let _ = rec.events_tx.send(FeedEvent::Close(Some(e.clone())));
                            rec.last_close_tag = Some(e.tag());
                        }
                    }
                }
            }
        }
    }

    fn emit_feed_action(
        &mut self,
        serial: &str,
        action_name: String,
        action_data: Value,
        new_data: Value,
        old_data: Value,
    ) {
        let Some(ids) = self.handles_by_serial.get(serial).cloned() else {
            return;
        };
        for id in ids {
            if let Some(rec) = self.feed_handles.get(&id) {
                if rec.last_emission == LastEmission::Open {
                    let _ = rec.events_tx.send(FeedEvent::Action {
                        action_name: action_name.clone(),
                        action_data: action_data.clone(),
                        new_data: new_data.clone(),
                        old_data: old_data.clone(),
                    });
                }
            }
        }
    }

    fn compute_feed_state(&self, rec: &FeedHandleRecord) -> crate::feed::FeedState {
        use crate::feed::FeedState;
        if rec.desired == DesiredState::Closed {
            return FeedState::Closed;
        }
        if self.session.phase() != SessionPhase::Connected {
            return FeedState::Closed;
        }
        match self.session.feed_server_state(&rec.identity.serial()) {
            FeedServerStateKind::Closed => FeedState::Closed,
            FeedServerStateKind::Opening => FeedState::Opening,
            FeedServerStateKind::Open => FeedState::Open,
            // The handle still desires open, so any closing/terminated
            // transition here is the client's own reopen machinery, not an
            // application-initiated close.
            FeedServerStateKind::Closing | FeedServerStateKind::Terminated => FeedState::Opening,
        }
    }

    fn remove_handle(&mut self, handle_id: FeedHandleId) -> Option<String> {
        let rec = self.feed_handles.remove(&handle_id)?;
        let serial = rec.identity.serial();
        if let Some(list) = self.handles_by_serial.get_mut(&serial) {
            list.retain(|id| *id != handle_id);
            if list.is_empty() {
                self.handles_by_serial.remove(&serial);
            }
        }
        Some(serial)
    }

    async fn handle_reopen_throttle<T: Transport>(&mut self, serial: &str, wrapper: &mut TransportWrapper<T>) {
        let cap = self.options.reopen_max_attempts;
        if cap < 0 {
            self.consider_feed_state(serial, wrapper).await;
            return;
        }
        if cap == 0 {
            return;
        }
        let cap = cap as u32;
        let count = self.reopen_counts.entry(serial.to_string()).or_insert(0);
        if *count < cap {
            *count += 1;
            if self.options.reopen_trailing_ms > 0 {
                let internal_tx = self.internal_tx.clone();
                let serial_owned = serial.to_string();
                let window = Duration::from_millis(self.options.reopen_trailing_ms);
                tokio::spawn(async move {
                    tokio::time::sleep(window).await;
                    let _ = internal_tx.send(InternalEvent::ReopenWindowElapsed { serial: serial_owned });
                });
            }
            self.consider_feed_state(serial, wrapper).await;
        }
    }

    async fn dispatch_session_events<T: Transport>(
        &mut self,
        events: Vec<SessionEvent>,
        wrapper: &mut TransportWrapper<T>,
    ) {
        for event in events {
            match event {
                SessionEvent::Connect => {
                    self.preemptive_connecting = false;
                    if let Some(reply) = self.pending_connect_reply.take() {
                        let _ = reply.send(Ok(()));
                    }
                    self.emit_client_event(ClientEvent::Connect);
                    let serials: Vec<String> = self.handles_by_serial.keys().cloned().collect();
                    for serial in serials {
                        self.consider_feed_state(&serial, wrapper).await;
                    }
                }
                SessionEvent::Disconnect(err) => {
                    self.preemptive_connecting = false;
                    if let Some(reply) = self.pending_connect_reply.take() {
                        let _ = reply.send(Err(err.clone().unwrap_or(FeedmeError::not_connected())));
                    }
                    self.reopen_counts.clear();
                    self.emit_client_event(ClientEvent::Disconnect(err));
                }
                SessionEvent::BadServerMessage(e) => self.emit_client_event(ClientEvent::BadServerMessage(e)),
                SessionEvent::BadClientMessage(v) => self.emit_client_event(ClientEvent::BadClientMessage(v)),
                SessionEvent::UnexpectedFeedClosing(_, _) => {
                    // Internal sequencing marker only; no handle-visible
                    // transition happens until the matching
                    // UnexpectedFeedClosed below.
                }
                SessionEvent::UnexpectedFeedClosed(identity, err) => {
                    let serial = identity.serial();
                    let is_bad_feed_action = err.tag() == "BAD_FEED_ACTION";
                    self.notify_serial_closed(&serial, Some(err));
                    if is_bad_feed_action {
                        self.handle_reopen_throttle(&serial, wrapper).await;
                    } else {
                        self.consider_feed_state(&serial, wrapper).await;
                    }
                }
                SessionEvent::FeedAction {
                    identity,
                    action_name,
                    action_data,
                    new_data,
                    old_data,
                } => self.emit_feed_action(&identity.serial(), action_name, action_data, new_data, old_data),
                SessionEvent::Send(msg) => self.send_wire(wrapper, msg).await,
                SessionEvent::RequestTransportDisconnect(err) => {
                    let _ = wrapper.disconnect(err).await;
                }
            }
        }
    }

    async fn do_connect<T: Transport>(
        &mut self,
        wrapper: &mut TransportWrapper<T>,
        connect_timeout: &mut Option<Pin<Box<Sleep>>>,
    ) {
        match wrapper.connect().await {
            Ok(()) => {
                if self.options.connect_timeout_ms > 0 {
                    *connect_timeout =
                        Some(Box::pin(tokio::time::sleep(Duration::from_millis(self.options.connect_timeout_ms))));
                }
            }
            Err(e) => {
                if let Some(reply) = self.pending_connect_reply.take() {
                    let _ = reply.send(Err(e));
                }
            }
        }
    }

    /// Connect retry / reconnect policy, run after every transport
    /// disconnect.
    async fn maybe_schedule_retry_or_reconnect<T: Transport>(
        &mut self,
        prior_phase: SessionPhase,
        err: &Option<FeedmeError>,
        wrapper: &mut TransportWrapper<T>,
        connect_timeout: &mut Option<Pin<Box<Sleep>>>,
        connect_retry: &mut Option<Pin<Box<Sleep>>>,
    ) {
        if self.intentional_disconnect {
            return;
        }
        match prior_phase {
            SessionPhase::Connecting => {
                if !is_retryable(err) || self.options.connect_retry_ms < 0 {
                    return;
                }
                let cap = self.options.connect_retry_max_attempts;
                if cap != 0 && self.connect_attempt >= cap {
                    return;
                }
                let base = self.options.connect_retry_ms;
                let backoff = self.options.connect_retry_backoff_ms as i64 * self.connect_attempt as i64;
                let delay = (base + backoff).min(self.options.connect_retry_max_ms as i64).max(0) as u64;
                self.connect_attempt += 1;
                self.preemptive_connecting = true;
                *connect_retry = Some(Box::pin(tokio::time::sleep(Duration::from_millis(delay))));
            }
            SessionPhase::Connected => {
                if self.options.reconnect && matches!(err, Some(FeedmeError::TransportFailure(_))) {
                    self.connect_attempt = 0;
                    self.do_connect(wrapper, connect_timeout).await;
                }
            }
            SessionPhase::Disconnected => {}
        }
    }

    async fn handle_command<T: Transport>(
        &mut self,
        cmd: ActorCommand,
        wrapper: &mut TransportWrapper<T>,
        connect_timeout: &mut Option<Pin<Box<Sleep>>>,
    ) {
        match cmd {
            ActorCommand::Connect { reply } => {
                if self.session.phase() != SessionPhase::Disconnected {
                    let _ = reply.send(Err(FeedmeError::invalid_state("client is not disconnected")));
                    return;
                }
                self.intentional_disconnect = false;
                self.connect_attempt = 0;
                self.pending_connect_reply = Some(reply);
                self.do_connect(wrapper, connect_timeout).await;
            }
            ActorCommand::Disconnect => {
                self.intentional_disconnect = true;
                self.preemptive_connecting = false;
                *connect_timeout = None;
                if wrapper.state() != crate::transport::TransportState::Disconnected {
                    let _ = wrapper.disconnect(None).await;
                }
            }
            ActorCommand::Action { name, args, reply } => {
                if self.session.phase() != SessionPhase::Connected {
                    let _ = reply.send(Err(FeedmeError::not_connected()));
                    return;
                }
                match self.session.action(name, args, reply) {
                    Ok(msg) => self.send_wire(wrapper, msg).await,
                    Err(e) => tracing::warn!(target: "feedme::client", error = %e, "action rejected unexpectedly"),
                }
            }
            ActorCommand::FeedRegister { identity, handle_id, events_tx } => {
                let serial = identity.serial();
                self.feed_handles.insert(
                    handle_id,
                    FeedHandleRecord {
                        identity,
                        desired: DesiredState::Closed,
                        last_emission: LastEmission::Close,
                        last_close_tag: None,
                        events_tx,
                    },
                );
                self.handles_by_serial.entry(serial).or_default().push(handle_id);
            }
            ActorCommand::FeedDesireOpen { handle_id } => {
                let serial = {
                    let Some(rec) = self.feed_handles.get_mut(&handle_id) else { return };
                    rec.desired = DesiredState::Open;
                    let serial = rec.identity.serial();
                    if self.session.phase() == SessionPhase::Connected {
                        match self.session.feed_server_state(&serial) {
                            FeedServerStateKind::Open => {
                                let _ = rec.events_tx.send(FeedEvent::Opening);
                                let _ = rec.events_tx.send(FeedEvent::Open);
                                rec.last_emission = LastEmission::Open;
                            }
                            FeedServerStateKind::Opening => {
                                let _ = rec.events_tx.send(FeedEvent::Opening);
                                rec.last_emission = LastEmission::Opening;
                            }
                            _ => {}
                        }
                    }
                    serial
                };
                self.consider_feed_state(&serial, wrapper).await;
            }
            ActorCommand::FeedDesireClosed { handle_id } => {
                let serial = {
                    let Some(rec) = self.feed_handles.get_mut(&handle_id) else { return };
                    rec.desired = DesiredState::Closed;
                    let _ = rec.events_tx.send(FeedEvent::Close(None));
                    rec.last_emission = LastEmission::Close;
                    rec.last_close_tag = None;
                    rec.identity.serial()
                };
                self.consider_feed_state(&serial, wrapper).await;
            }
            ActorCommand::FeedState { handle_id, reply } => {
                let result = match self.feed_handles.get(&handle_id) {
                    None => Err(FeedmeError::Destroyed),
                    Some(rec) => Ok(self.compute_feed_state(rec)),
                };
                let _ = reply.send(result);
            }
            ActorCommand::FeedData { handle_id, reply } => {
                let result = match self.feed_handles.get(&handle_id) {
                    None => Err(FeedmeError::Destroyed),
                    Some(rec) if rec.desired == DesiredState::Closed => Ok(None),
                    Some(rec) => Ok(self.session.feed_data(&rec.identity.serial())),
                };
                let _ = reply.send(result);
            }
            ActorCommand::FeedDestroy { handle_id } => {
                self.remove_handle(handle_id);
            }
            ActorCommand::FeedHandleDropped { handle_id } => {
                if let Some(serial) = self.remove_handle(handle_id) {
                    self.consider_feed_state(&serial, wrapper).await;
                }
            }
            ActorCommand::ClientState { reply } => {
                let state = if self.preemptive_connecting {
                    ClientState::Connecting
                } else {
                    match self.session.phase() {
                        SessionPhase::Disconnected => ClientState::Disconnected,
                        SessionPhase::Connecting => ClientState::Connecting,
                        SessionPhase::Connected => ClientState::Connected,
                    }
                };
                let _ = reply.send(state);
            }
        }
    }

    async fn handle_internal<T: Transport>(&mut self, ev: InternalEvent, wrapper: &mut TransportWrapper<T>) {
        match ev {
            InternalEvent::FeedOpenSettled { serial, result } => match result {
                // Only a successful open re-reconciles: a plain rejection
                // must not auto-retry (that would busy-loop FeedOpen
                // forever), unlike the BAD_FEED_ACTION cycle below, which
                // goes through `handle_reopen_throttle` instead.
                Ok(_) => {
                    self.notify_serial_open(&serial);
                    self.consider_feed_state(&serial, wrapper).await;
                }
                Err(e) => self.notify_serial_closed(&serial, Some(e)),
            },
            InternalEvent::FeedOpenTimedOut { serial } => {
                self.notify_serial_closed(&serial, Some(FeedmeError::Timeout));
            }
            InternalEvent::FeedOpenLate { serial, result } => {
                if result.is_ok() {
                    self.notify_serial_open(&serial);
                    self.consider_feed_state(&serial, wrapper).await;
                }
            }
            InternalEvent::FeedCloseSettled { serial } => {
                self.consider_feed_state(&serial, wrapper).await;
            }
            InternalEvent::ReopenWindowElapsed { serial } => {
                let cap = self.options.reopen_max_attempts.max(0) as u32;
                let mut became_available = false;
                if let Some(count) = self.reopen_counts.get_mut(&serial) {
                    let was_at_cap = *count >= cap;
                    *count = count.saturating_sub(1);
                    if *count == 0 {
                        self.reopen_counts.remove(&serial);
                    }
                    became_available = was_at_cap;
                }
                if became_available {
                    self.consider_feed_state(&serial, wrapper).await;
                }
            }
        }
    }

    async fn handle_transport_result<T: Transport>(
        &mut self,
        result: Result<TransportEvent, FeedmeError>,
        wrapper: &mut TransportWrapper<T>,
        connect_timeout: &mut Option<Pin<Box<Sleep>>>,
        connect_retry: &mut Option<Pin<Box<Sleep>>>,
    ) {
        match result {
            Ok(TransportEvent::Connecting) => {
                self.session.on_transport_connecting();
            }
            Ok(TransportEvent::Connect) => {
                let msg = self.session.on_transport_connect();
                self.send_wire(wrapper, msg).await;
            }
            Ok(TransportEvent::Message(raw)) => {
                let events = self.session.handle_message(&raw);
                self.dispatch_session_events(events, wrapper).await;
            }
            Ok(TransportEvent::Disconnect(err)) => {
                *connect_timeout = None;
                let prior_phase = self.session.phase();
                let events = self.session.on_transport_disconnect(err.clone());
                self.dispatch_session_events(events, wrapper).await;
                self.maybe_schedule_retry_or_reconnect(prior_phase, &err, wrapper, connect_timeout, connect_retry)
                    .await;
            }
            Err(transport_err) => {
                *connect_timeout = None;
                let prior_phase = self.session.phase();
                let err = Some(FeedmeError::TransportFailure(transport_err.to_string()));
                let events = self.session.on_transport_disconnect(err.clone());
                self.dispatch_session_events(events, wrapper).await;
                self.maybe_schedule_retry_or_reconnect(prior_phase, &err, wrapper, connect_timeout, connect_retry)
                    .await;
            }
        }
    }

    async fn handle_connect_timeout<T: Transport>(
        &mut self,
        wrapper: &mut TransportWrapper<T>,
        connect_timeout: &mut Option<Pin<Box<Sleep>>>,
    ) {
        *connect_timeout = None;
        if wrapper.state() == crate::transport::TransportState::Connecting {
            let _ = wrapper.disconnect(Some(FeedmeError::Timeout)).await;
        }
    }

    async fn handle_connect_retry<T: Transport>(
        &mut self,
        wrapper: &mut TransportWrapper<T>,
        connect_timeout: &mut Option<Pin<Box<Sleep>>>,
        connect_retry: &mut Option<Pin<Box<Sleep>>>,
    ) {
        *connect_retry = None;
        if self.session.phase() == SessionPhase::Disconnected {
            self.do_connect(wrapper, connect_timeout).await;
        } else {
            self.preemptive_connecting = false;
        }
    }
}

async fn sleep_opt(slot: &mut Option<Pin<Box<Sleep>>>) {
    match slot {
        Some(s) => s.as_mut().await,
        None => std::future::pending::<()>().await,
    }
}

/// Runs the actor loop for one `Client` instance until every handle (the
/// `Client` facade and all `Feed`s derived from it) has been dropped.
pub(crate) async fn run<T: Transport + 'static>(
    transport: T,
    options: ClientOptions,
    mut cmd_rx: mpsc::UnboundedReceiver<ActorCommand>,
    event_tx: broadcast::Sender<ClientEvent>,
    events: mpsc::UnboundedReceiver<TransportEvent>,
) {
    let mut wrapper = match TransportWrapper::new(transport, events) {
        Ok(w) => w,
        Err(e) => {
            let _ = event_tx.send(ClientEvent::Disconnect(Some(e)));
            return;
        }
    };

    let (internal_tx, mut internal_rx) = mpsc::unbounded_channel();
    let mut state = ActorState {
        options,
        session: Session::new(),
        event_tx,
        internal_tx,
        feed_handles: HashMap::new(),
        handles_by_serial: HashMap::new(),
        reopen_counts: HashMap::new(),
        connect_attempt: 0,
        pending_connect_reply: None,
        preemptive_connecting: false,
        intentional_disconnect: false,
    };

    let mut connect_timeout: Option<Pin<Box<Sleep>>> = None;
    let mut connect_retry: Option<Pin<Box<Sleep>>> = None;

    enum Event {
        CommandChannelClosed,
        Command(ActorCommand),
        Internal(InternalEvent),
        Transport(Result<TransportEvent, FeedmeError>),
        ConnectTimeout,
        ConnectRetry,
    }

    loop {
        let event = tokio::select! {
            biased;
            cmd = cmd_rx.recv() => match cmd {
                Some(c) => Event::Command(c),
                None => Event::CommandChannelClosed,
            },
            ev = internal_rx.recv() => match ev {
                Some(e) => Event::Internal(e),
                None => continue,
            },
            result = wrapper.next_event() => Event::Transport(result),
            _ = sleep_opt(&mut connect_timeout) => Event::ConnectTimeout,
            _ = sleep_opt(&mut connect_retry) => Event::ConnectRetry,
        };

        match event {
            Event::CommandChannelClosed => break,
            Event::Command(cmd) => state.handle_command(cmd, &mut wrapper, &mut connect_timeout).await,
            Event::Internal(ev) => state.handle_internal(ev, &mut wrapper).await,
            Event::Transport(result) => {
                state
                    .handle_transport_result(result, &mut wrapper, &mut connect_timeout, &mut connect_retry)
                    .await
            }
            Event::ConnectTimeout => state.handle_connect_timeout(&mut wrapper, &mut connect_timeout).await,
            Event::ConnectRetry => {
                state
                    .handle_connect_retry(&mut wrapper, &mut connect_timeout, &mut connect_retry)
                    .await
            }
        }
    }
}
