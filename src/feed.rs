//! `Feed` — application handle to a single named+parameterized feed.
//!
//! A handle is a thin client of the actor task owned by `Client`
//! (`crate::actor`): it mirrors its own desired state locally (so
//! `desire_open`/`desire_closed` can validate and throw synchronously),
//! and otherwise forwards commands to the actor and receives `FeedEvent`s
//! on a private channel. The actor computes the opening/open/close
//! emission rules centrally, since it alone knows the server-observed
//! feed state shared across every handle for a serial.

use serde_json::Value;
use tokio::sync::{mpsc, oneshot};

use crate::actor::{ActorCommand, FeedHandleId};
use crate::error::FeedmeError;
use crate::wire::{FeedArgs, FeedIdentity};

/// Application intent for this handle: `open` or `closed`. Starts
/// `closed`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DesiredState {
    Open,
    Closed,
}

/// What `Feed::state()` reports: this handle's view of server-observed
/// feed state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FeedState {
    Opening,
    Open,
    Closed,
}

/// Events a `Feed` handle can receive.
#[derive(Debug, Clone)]
pub enum FeedEvent {
    Opening,
    Open,
    Close(Option<FeedmeError>),
    Action {
        action_name: String,
        action_data: Value,
        new_data: Value,
        old_data: Value,
    },
}

/// Application handle to a single named+parameterized feed.
///
/// Obtained from `Client::feed`. Every call to `Client::feed` with the same
/// name+args returns a *new* handle; several handles may share the same
/// underlying server feed. Handle state is local; the server-side feed is
/// shared.
pub struct Feed {
    identity: FeedIdentity,
    handle_id: FeedHandleId,
    cmd_tx: mpsc::UnboundedSender<ActorCommand>,
    events_rx: mpsc::UnboundedReceiver<FeedEvent>,
    desired: DesiredState,
    destroyed: bool,
}

impl Feed {
    pub(crate) fn new(
        identity: FeedIdentity,
        handle_id: FeedHandleId,
        cmd_tx: mpsc::UnboundedSender<ActorCommand>,
        events_rx: mpsc::UnboundedReceiver<FeedEvent>,
    ) -> Self {
        Self {
            identity,
            handle_id,
            cmd_tx,
            events_rx,
            desired: DesiredState::Closed,
            destroyed: false,
        }
    }

    pub fn feed_name(&self) -> &str {
        &self.identity.name
    }

    pub fn feed_args(&self) -> &FeedArgs {
        &self.identity.args
    }

    /// The feed serial this handle shares with every other handle on the
    /// same name+args pair.
    pub fn serial(&self) -> String {
        self.identity.serial()
    }

    pub fn desired_state(&self) -> DesiredState {
        self.desired
    }

    /// Flips desired state to `open`. Calling this on a handle that
    /// already desires open returns `INVALID_FEED_STATE`.
    pub fn desire_open(&mut self) -> Result<(), FeedmeError> {
        if self.destroyed {
            return Err(FeedmeError::Destroyed);
        }
        if self.desired == DesiredState::Open {
            return Err(FeedmeError::invalid_feed_state(
                "feed handle already desires the open state",
            ));
        }
        self.desired = DesiredState::Open;
        let _ = self
            .cmd_tx
            .send(ActorCommand::FeedDesireOpen { handle_id: self.handle_id });
        Ok(())
    }

    /// Flips desired state to `closed`. Always permitted regardless of
    /// current desired state except when already closed, matching
    /// `desire_open`'s symmetry.
    pub fn desire_closed(&mut self) -> Result<(), FeedmeError> {
        if self.destroyed {
            return Err(FeedmeError::Destroyed);
        }
        if self.desired == DesiredState::Closed {
            return Err(FeedmeError::invalid_feed_state(
                "feed handle already desires the closed state",
            ));
        }
        self.desired = DesiredState::Closed;
        let _ = self
            .cmd_tx
            .send(ActorCommand::FeedDesireClosed { handle_id: self.handle_id });
        Ok(())
    }

    /// Server-observed state as seen through this handle.
    pub async fn state(&self) -> Result<FeedState, FeedmeError> {
        if self.destroyed {
            return Err(FeedmeError::Destroyed);
        }
        let (reply, rx) = oneshot::channel();
        self.cmd_tx
            .send(ActorCommand::FeedState { handle_id: self.handle_id, reply })
            .map_err(|_| FeedmeError::Destroyed)?;
        rx.await.map_err(|_| FeedmeError::Destroyed)
    }

    /// A frozen snapshot of the feed's current data, if open.
    pub async fn data(&self) -> Result<Option<Value>, FeedmeError> {
        if self.destroyed {
            return Err(FeedmeError::Destroyed);
        }
        let (reply, rx) = oneshot::channel();
        self.cmd_tx
            .send(ActorCommand::FeedData { handle_id: self.handle_id, reply })
            .map_err(|_| FeedmeError::Destroyed)?;
        rx.await.map_err(|_| FeedmeError::Destroyed)
    }

    /// Permanently detaches this handle. Permitted only while desired
    /// closed.
    pub fn destroy(&mut self) -> Result<(), FeedmeError> {
        if self.destroyed {
            return Err(FeedmeError::Destroyed);
        }
        if self.desired != DesiredState::Closed {
            return Err(FeedmeError::invalid_feed_state(
                "destroy() requires the handle to be desired-closed",
            ));
        }
        self.destroyed = true;
        let _ = self
            .cmd_tx
            .send(ActorCommand::FeedDestroy { handle_id: self.handle_id });
        Ok(())
    }

    /// Awaits the next `opening`/`open`/`close`/`action` emission for this
    /// handle. Returns `None` once the handle is destroyed or the owning
    /// `Client` is dropped.
    pub async fn next_event(&mut self) -> Option<FeedEvent> {
        if self.destroyed {
            return None;
        }
        self.events_rx.recv().await
    }
}

impl Drop for Feed {
    fn drop(&mut self) {
        if !self.destroyed {
            let _ = self
                .cmd_tx
                .send(ActorCommand::FeedHandleDropped { handle_id: self.handle_id });
        }
    }
}

impl std::fmt::Debug for Feed {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Feed")
            .field("identity", &self.identity)
            .field("desired", &self.desired)
            .field("destroyed", &self.destroyed)
            .finish()
    }
}
