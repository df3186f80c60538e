//! `Client` — the public facade applications hold.
//!
//! A `Client` is a cheap handle: the actual state machine runs in a single
//! task spawned by `Client::new` (`crate::actor::run`); every method here
//! either sends a fire-and-forget `ActorCommand` or sends one and awaits a
//! `oneshot` reply. Cloning a `Client` is cheap and safe — every clone
//! shares the same actor task and the same `ClientEvent` broadcast stream.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;
use tokio::sync::{broadcast, mpsc, oneshot};

use crate::actor::{self, ActorCommand};
use crate::error::FeedmeError;
use crate::feed::Feed;
use crate::transport::{Transport, TransportEvent};
use crate::wire::{FeedArgs, FeedIdentity};

/// Connection options. All delay/timeout fields are milliseconds; a `0`
/// timeout means "wait forever".
#[derive(Debug, Clone)]
pub struct ClientOptions {
    /// How long to wait for the handshake to complete before treating the
    /// connection attempt as timed out. `0` disables the watchdog.
    pub connect_timeout_ms: u64,
    /// Delay before the first reconnect attempt after a failed connect.
    /// Negative disables automatic connect retries entirely.
    pub connect_retry_ms: i64,
    /// Additional delay added per retry attempt (linear backoff).
    pub connect_retry_backoff_ms: u64,
    /// Upper bound the backoff delay is clamped to.
    pub connect_retry_max_ms: u64,
    /// Maximum number of connect retries. `0` means unlimited.
    pub connect_retry_max_attempts: u32,
    /// How long an `action()` call waits for a server response. `0` waits
    /// forever.
    pub action_timeout_ms: u64,
    /// How long a feed-open attempt waits for `FeedOpenResponse`. `0` waits
    /// forever.
    pub feed_timeout_ms: u64,
    /// Whether a `TRANSPORT_FAILURE` while connected triggers an immediate
    /// reconnect attempt.
    pub reconnect: bool,
    /// Maximum automatic reopen attempts per feed within the trailing
    /// window after `BAD_FEED_ACTION`. Negative means unlimited, `0` means
    /// never auto-reopen.
    pub reopen_max_attempts: i32,
    /// Width of the trailing window `reopen_max_attempts` is counted over.
    pub reopen_trailing_ms: u64,
}

impl Default for ClientOptions {
    fn default() -> Self {
        Self {
            connect_timeout_ms: 0,
            connect_retry_ms: 500,
            connect_retry_backoff_ms: 1000,
            connect_retry_max_ms: 5000,
            connect_retry_max_attempts: 0,
            action_timeout_ms: 5000,
            feed_timeout_ms: 5000,
            reconnect: true,
            reopen_max_attempts: 3,
            reopen_trailing_ms: 60_000,
        }
    }
}

impl ClientOptions {
    pub fn validate(&self) -> Result<(), FeedmeError> {
        if self.connect_retry_ms >= 0 && (self.connect_retry_max_ms as i64) < self.connect_retry_ms {
            return Err(FeedmeError::invalid_argument(
                "connect_retry_max_ms must be >= connect_retry_ms",
            ));
        }
        Ok(())
    }
}

/// The client's own connection state. `Connecting` also covers the
/// "preemptively connecting" window while a retry is scheduled but the
/// transport has not been told to connect yet.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClientState {
    Disconnected,
    Connecting,
    Connected,
}

/// Events broadcast to every `Client` clone's `events()` subscriber.
#[derive(Debug, Clone)]
pub enum ClientEvent {
    Connect,
    Disconnect(Option<FeedmeError>),
    BadServerMessage(FeedmeError),
    BadClientMessage(Value),
}

/// Application-facing handle to one Feedme connection.
#[derive(Clone)]
pub struct Client {
    cmd_tx: mpsc::UnboundedSender<ActorCommand>,
    event_tx: broadcast::Sender<ClientEvent>,
    options: ClientOptions,
    next_handle_id: Arc<AtomicU64>,
}

impl Client {
    /// Spawns the actor task and returns a handle to it. `transport` must
    /// be in `TransportState::Disconnected`; `events` is the channel it
    /// will push `TransportEvent`s into.
    pub fn new<T: Transport + 'static>(
        transport: T,
        events: mpsc::UnboundedReceiver<TransportEvent>,
        options: ClientOptions,
    ) -> Result<Self, FeedmeError> {
        options.validate()?;
        let (cmd_tx, cmd_rx) = mpsc::unbounded_channel();
        let (event_tx, _) = broadcast::channel(256);
        tokio::spawn(actor::run(transport, options.clone(), cmd_rx, event_tx.clone(), events));
        Ok(Self {
            cmd_tx,
            event_tx,
            options,
            next_handle_id: Arc::new(AtomicU64::new(1)),
        })
    }

    /// Subscribes to `ClientEvent`s. Each call returns an independent
    /// receiver; events broadcast before a subscription is created are not
    /// delivered to it.
    pub fn events(&self) -> broadcast::Receiver<ClientEvent> {
        self.event_tx.subscribe()
    }

    /// Initiates a connection attempt. Resolves once the handshake
    /// completes, or with an error if the attempt fails before retries are
    /// exhausted (or retries are disabled).
    pub async fn connect(&self) -> Result<(), FeedmeError> {
        let (reply, rx) = oneshot::channel();
        self.cmd_tx
            .send(ActorCommand::Connect { reply })
            .map_err(|_| FeedmeError::invalid_state("client actor has stopped"))?;
        rx.await.map_err(|_| FeedmeError::invalid_state("client actor has stopped"))?
    }

    /// Tears down the connection. Idempotent; does nothing if already
    /// disconnected. Suppresses any pending automatic reconnect.
    pub fn disconnect(&self) {
        let _ = self.cmd_tx.send(ActorCommand::Disconnect);
    }

    /// The client's current connection state, including the "preemptively
    /// connecting" mask while a reconnect retry is scheduled.
    pub async fn state(&self) -> ClientState {
        let (reply, rx) = oneshot::channel();
        if self.cmd_tx.send(ActorCommand::ClientState { reply }).is_err() {
            return ClientState::Disconnected;
        }
        rx.await.unwrap_or(ClientState::Disconnected)
    }

    /// Invokes a server action and awaits its result, honoring
    /// `action_timeout_ms`. A response that arrives after the local
    /// timeout is silently discarded.
    pub async fn action(&self, action_name: impl Into<String>, action_args: Value) -> Result<Value, FeedmeError> {
        let (reply, rx) = oneshot::channel();
        if self
            .cmd_tx
            .send(ActorCommand::Action {
                name: action_name.into(),
                args: action_args,
                reply,
            })
            .is_err()
        {
            return Err(FeedmeError::not_connected());
        }
        if self.options.action_timeout_ms == 0 {
            rx.await.unwrap_or(Err(FeedmeError::not_connected()))
        } else {
            match tokio::time::timeout(Duration::from_millis(self.options.action_timeout_ms), rx).await {
                Ok(Ok(result)) => result,
                Ok(Err(_)) => Err(FeedmeError::not_connected()),
                Err(_) => Err(FeedmeError::timeout()),
            }
        }
    }

    /// Callback-style adapter over `action()`: one internal continuation
    /// with two ways to consume it.
    pub fn action_with_callback<F>(&self, action_name: impl Into<String>, action_args: Value, callback: F)
    where
        F: FnOnce(Result<Value, FeedmeError>) + Send + 'static,
    {
        let client = self.clone();
        let action_name = action_name.into();
        tokio::spawn(async move {
            let result = client.action(action_name, action_args).await;
            callback(result);
        });
    }

    /// Returns a handle to the named+parameterized feed. Every call
    /// allocates a fresh handle, even for an already-requested name+args
    /// pair; several handles may end up sharing one underlying server feed.
    pub fn feed(&self, feed_name: impl Into<String>, feed_args: FeedArgs) -> Feed {
        let identity = FeedIdentity::new(feed_name, feed_args);
        let handle_id = self.next_handle_id.fetch_add(1, Ordering::Relaxed);
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let _ = self.cmd_tx.send(ActorCommand::FeedRegister {
            identity: identity.clone(),
            handle_id,
            events_tx,
        });
        Feed::new(identity, handle_id, self.cmd_tx.clone(), events_rx)
    }
}
