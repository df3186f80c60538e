//! Shared harness for the integration tests: an in-memory `Transport` plus
//! helpers for driving a `Client` through a handshake without a real
//! socket, in the style of the unit-level `MockTransport` in
//! `src/transport.rs`.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use feedme_client::{Client, ClientOptions, FeedmeError, Transport, TransportEvent, TransportState};
use tokio::sync::mpsc;

pub struct MockTransport {
    connected: Arc<AtomicBool>,
    events_tx: mpsc::UnboundedSender<TransportEvent>,
    sent_tx: mpsc::UnboundedSender<String>,
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
        self.events_tx.send(TransportEvent::Connecting).ok();
        self.connected.store(true, Ordering::SeqCst);
        self.events_tx.send(TransportEvent::Connect).ok();
        Ok(())
    }

    async fn send(&mut self, message: String) -> Result<(), FeedmeError> {
        self.sent_tx.send(message).ok();
        Ok(())
    }

    async fn disconnect(&mut self, err: Option<FeedmeError>) -> Result<(), FeedmeError> {
        self.connected.store(false, Ordering::SeqCst);
        self.events_tx.send(TransportEvent::Disconnect(err)).ok();
        Ok(())
    }
}

/// Builds a fresh mock transport along with the two channels a test needs:
/// `server_tx`, to push events as if the server/transport produced them,
/// and `sent_rx`, to observe what the client sends.
pub fn mock_transport() -> (
    MockTransport,
    mpsc::UnboundedReceiver<TransportEvent>,
    mpsc::UnboundedSender<TransportEvent>,
    mpsc::UnboundedReceiver<String>,
) {
    let (events_tx, events_rx) = mpsc::unbounded_channel();
    let server_tx = events_tx.clone();
    let (sent_tx, sent_rx) = mpsc::unbounded_channel();
    let transport = MockTransport {
        connected: Arc::new(AtomicBool::new(false)),
        events_tx,
        sent_tx,
    };
    (transport, events_rx, server_tx, sent_rx)
}

/// A transport whose first `fail_first_n` connect attempts emit
/// `Connecting` followed directly by `Disconnect(TRANSPORT_FAILURE)` —
/// never reaching `Connect` — before subsequent attempts succeed normally.
/// Exercises the connect-time failure path (the transport-connecting
/// window, before the handshake is even sent) distinctly from a
/// post-handshake disconnect.
pub struct FlakyTransport {
    connected: Arc<AtomicBool>,
    events_tx: mpsc::UnboundedSender<TransportEvent>,
    sent_tx: mpsc::UnboundedSender<String>,
    remaining_failures: Arc<AtomicUsize>,
}

#[async_trait]
impl Transport for FlakyTransport {
    fn state(&self) -> TransportState {
        if self.connected.load(Ordering::SeqCst) {
            TransportState::Connected
        } else {
            TransportState::Disconnected
        }
    }

    async fn connect(&mut self) -> Result<(), FeedmeError> {
        self.events_tx.send(TransportEvent::Connecting).ok();
        if self.remaining_failures.load(Ordering::SeqCst) > 0 {
            self.remaining_failures.fetch_sub(1, Ordering::SeqCst);
            self.events_tx
                .send(TransportEvent::Disconnect(Some(FeedmeError::TransportFailure(
                    "connection refused".into(),
                ))))
                .ok();
            return Ok(());
        }
        self.connected.store(true, Ordering::SeqCst);
        self.events_tx.send(TransportEvent::Connect).ok();
        Ok(())
    }

    async fn send(&mut self, message: String) -> Result<(), FeedmeError> {
        self.sent_tx.send(message).ok();
        Ok(())
    }

    async fn disconnect(&mut self, err: Option<FeedmeError>) -> Result<(), FeedmeError> {
        self.connected.store(false, Ordering::SeqCst);
        self.events_tx.send(TransportEvent::Disconnect(err)).ok();
        Ok(())
    }
}

pub fn flaky_transport(
    fail_first_n: usize,
) -> (
    FlakyTransport,
    mpsc::UnboundedReceiver<TransportEvent>,
    mpsc::UnboundedSender<TransportEvent>,
    mpsc::UnboundedReceiver<String>,
) {
    let (events_tx, events_rx) = mpsc::unbounded_channel();
    let server_tx = events_tx.clone();
    let (sent_tx, sent_rx) = mpsc::unbounded_channel();
    let transport = FlakyTransport {
        connected: Arc::new(AtomicBool::new(false)),
        events_tx,
        sent_tx,
        remaining_failures: Arc::new(AtomicUsize::new(fail_first_n)),
    };
    (transport, events_rx, server_tx, sent_rx)
}

pub fn push_message(server_tx: &mpsc::UnboundedSender<TransportEvent>, raw: &str) {
    server_tx.send(TransportEvent::Message(raw.to_string())).unwrap();
}

/// Receives exactly one outgoing message and asserts its `MessageType`,
/// returning the parsed JSON for further inspection.
pub async fn expect_sent(sent_rx: &mut mpsc::UnboundedReceiver<String>, message_type: &str) -> serde_json::Value {
    let raw = sent_rx.recv().await.expect("expected an outgoing message");
    let value: serde_json::Value = serde_json::from_str(&raw).expect("outgoing message is valid JSON");
    assert_eq!(value["MessageType"], message_type);
    value
}

/// Spawns a client, connects it, and answers the handshake on its behalf.
/// Returns the connected client plus the channels needed to keep acting as
/// its server.
pub async fn connected_client(
    options: ClientOptions,
) -> (Client, mpsc::UnboundedSender<TransportEvent>, mpsc::UnboundedReceiver<String>) {
    let (transport, events_rx, server_tx, mut sent_rx) = mock_transport();
    let client = Client::new(transport, events_rx, options).expect("client construction should succeed");

    let server_tx_for_handshake = server_tx.clone();
    let responder = tokio::spawn(async move {
        expect_sent(&mut sent_rx, "Handshake").await;
        push_message(
            &server_tx_for_handshake,
            r#"{"MessageType":"HandshakeResponse","Success":true,"Version":"0.1"}"#,
        );
        sent_rx
    });

    client.connect().await.expect("connect should succeed");
    let sent_rx = responder.await.expect("handshake responder task should not panic");
    (client, server_tx, sent_rx)
}
