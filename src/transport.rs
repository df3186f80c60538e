//! `TransportWrapper` — contract-enforcing adapter over an untrusted
//! transport.
//!
//! The concrete transport (WebSocket, long-poll, in-memory mock) is
//! supplied by the caller; this module only specifies and enforces its
//! contract, wrapping an arbitrary `Transport` impl with sequencing
//! validation.

use async_trait::async_trait;
use tokio::sync::mpsc;

use crate::error::FeedmeError;

/// The transport's own connection state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportState {
    Disconnected,
    Connecting,
    Connected,
}

/// Events an arbitrary transport emits asynchronously. Delivered through
/// the `mpsc::UnboundedReceiver` handed to `TransportWrapper::new`.
#[derive(Debug, Clone)]
pub enum TransportEvent {
    Connecting,
    Connect,
    Message(String),
    Disconnect(Option<FeedmeError>),
}

/// The contract a transport must honor.
///
/// Implementations own their I/O and push `TransportEvent`s into the
/// channel returned from `event_receiver`; `TransportWrapper` only calls
/// the methods below and consumes that channel, never reaching into the
/// transport's internals.
#[async_trait]
pub trait Transport: Send {
    fn state(&self) -> TransportState;
    async fn connect(&mut self) -> Result<(), FeedmeError>;
    async fn send(&mut self, message: String) -> Result<(), FeedmeError>;
    async fn disconnect(&mut self, err: Option<FeedmeError>) -> Result<(), FeedmeError>;
}

/// What the wrapper last forwarded; sequence legality is judged against
/// this single field alone.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum LastEmission {
    None,
    Connecting,
    Connect,
    Message,
    Disconnect,
}

/// Contract-enforcing adapter over an untrusted transport.
pub struct TransportWrapper<T: Transport> {
    transport: T,
    events: mpsc::UnboundedReceiver<TransportEvent>,
    last_emission: LastEmission,
}

impl<T: Transport> TransportWrapper<T> {
    /// Constructs a wrapper around `transport`, consuming the event
    /// channel it will push `TransportEvent`s into.
    ///
    /// # Errors
    /// `INVALID_ARGUMENT` if the transport is not in `Disconnected` state at
    /// construction time.
    pub fn new(
        transport: T,
        events: mpsc::UnboundedReceiver<TransportEvent>,
    ) -> Result<Self, FeedmeError> {
        if transport.state() != TransportState::Disconnected {
            return Err(FeedmeError::invalid_argument(
                "transport must be constructed in the disconnected state",
            ));
        }
        Ok(Self {
            transport,
            events,
            last_emission: LastEmission::None,
        })
    }

    /// `connect()` is allowed only after a `disconnect` emission (or at
    /// construction, before any emission has happened).
    pub async fn connect(&mut self) -> Result<(), FeedmeError> {
        if !matches!(self.last_emission, LastEmission::None | LastEmission::Disconnect) {
            return Err(FeedmeError::invalid_state(
                "connect() is only valid before the first connection attempt or after disconnect",
            ));
        }
        self.transport.connect().await
    }

    /// `send()` is allowed only after a `connect` emission.
    pub async fn send(&mut self, message: String) -> Result<(), FeedmeError> {
        if self.last_emission != LastEmission::Connect && self.last_emission != LastEmission::Message
        {
            return Err(FeedmeError::invalid_state(
                "send() is only valid once the transport has emitted connect",
            ));
        }
        self.transport.send(message).await
    }

    /// `disconnect()` is allowed only after `connecting` or `connect`.
    pub async fn disconnect(&mut self, err: Option<FeedmeError>) -> Result<(), FeedmeError> {
        if !matches!(
            self.last_emission,
            LastEmission::Connecting | LastEmission::Connect | LastEmission::Message
        ) {
            return Err(FeedmeError::invalid_state(
                "disconnect() is only valid while connecting or connected",
            ));
        }
        self.transport.disconnect(err).await
    }

    /// Waits for and validates the next transport event, advancing
    /// `last_emission` only if it passes validation.
    ///
    /// A transport violating its contract (wrong event given the sequence
    /// so far) is surfaced to the caller as `TRANSPORT_ERROR`. The caller
    /// (the `Client` actor) is expected to treat an `Err` here as fatal for
    /// the current connection attempt and to tear the session down.
    pub async fn next_event(&mut self) -> Result<TransportEvent, FeedmeError> {
        let event = self
            .events
            .recv()
            .await
            .ok_or_else(|| FeedmeError::TransportError("transport event channel closed".into()))?;

        let allowed = match (&self.last_emission, &event) {
            (LastEmission::None, TransportEvent::Connecting) => true,
            (LastEmission::Disconnect, TransportEvent::Connecting) => true,
            (LastEmission::Connecting, TransportEvent::Connect) => true,
            (LastEmission::Connecting, TransportEvent::Disconnect(_)) => true,
            (LastEmission::Connect, TransportEvent::Message(_)) => true,
            (LastEmission::Connect, TransportEvent::Disconnect(_)) => true,
            (LastEmission::Message, TransportEvent::Message(_)) => true,
            (LastEmission::Message, TransportEvent::Disconnect(_)) => true,
            _ => false,
        };

        if !allowed {
            let msg = format!(
                "unexpected transport event {:?} after {:?}",
                event, self.last_emission
            );
            tracing::error!(target: "feedme::transport", %msg, "transportError");
            return Err(FeedmeError::TransportError(msg));
        }

        self.last_emission = match event {
            TransportEvent::Connecting => LastEmission::Connecting,
            TransportEvent::Connect => LastEmission::Connect,
            TransportEvent::Message(_) => LastEmission::Message,
            TransportEvent::Disconnect(_) => LastEmission::Disconnect,
        };
        Ok(event)
    }

    pub fn state(&self) -> TransportState {
        self.transport.state()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Arc;

    struct MockTransport {
        connected: Arc<AtomicBool>,
        tx: mpsc::UnboundedSender<TransportEvent>,
    }

    #[async_trait]
    impl Transport for MockTransport {
        fn state(&self) -> TransportState {
            if self.connected.load(Ordering::SeqCst) {
                TransportState::Connected
            } else {
                TransportState::Disconnected
            }
        }

        async fn connect(&mut self) -> Result<(), FeedmeError> {
            self.tx.send(TransportEvent::Connecting).ok();
            self.connected.store(true, Ordering::SeqCst);
            self.tx.send(TransportEvent::Connect).ok();
            Ok(())
        }

        async fn send(&mut self, _message: String) -> Result<(), FeedmeError> {
            Ok(())
        }

        async fn disconnect(&mut self, err: Option<FeedmeError>) -> Result<(), FeedmeError> {
            self.connected.store(false, Ordering::SeqCst);
            self.tx.send(TransportEvent::Disconnect(err)).ok();
            Ok(())
        }
    }

    #[tokio::test]
    async fn rejects_send_before_connect_emission() {
        let (tx, rx) = mpsc::unbounded_channel();
        let transport = MockTransport {
            connected: Arc::new(AtomicBool::new(false)),
            tx,
        };
        let mut wrapper = TransportWrapper::new(transport, rx).unwrap();
        let err = wrapper.send("hi".into()).await.unwrap_err();
        assert_eq!(err.tag(), "INVALID_STATE");
    }

    #[tokio::test]
    async fn full_sequence_is_accepted() {
        let (tx, rx) = mpsc::unbounded_channel();
        let transport = MockTransport {
            connected: Arc::new(AtomicBool::new(false)),
            tx,
        };
        let mut wrapper = TransportWrapper::new(transport, rx).unwrap();
        wrapper.connect().await.unwrap();
        let ev1 = wrapper.next_event().await.unwrap();
        assert!(matches!(ev1, TransportEvent::Connecting));
        let ev2 = wrapper.next_event().await.unwrap();
        assert!(matches!(ev2, TransportEvent::Connect));
        wrapper.send("hello".into()).await.unwrap();
    }

    #[tokio::test]
    async fn out_of_sequence_event_is_transport_error() {
        let (tx, rx) = mpsc::unbounded_channel();
        tx.send(TransportEvent::Connect).unwrap();
        let transport = MockTransport {
            connected: Arc::new(AtomicBool::new(false)),
            tx,
        };
        let mut wrapper = TransportWrapper::new(transport, rx).unwrap();
        let err = wrapper.next_event().await.unwrap_err();
        assert_eq!(err.tag(), "TRANSPORT_ERROR");
    }
}
