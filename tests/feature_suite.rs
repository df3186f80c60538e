//! Coverage for the less-obvious corners: shared feed handles, bad-delta
//! recovery with reopen throttling, rejected opens, and handshake
//! rejection's interaction with the retry policy.

mod common;

use std::time::Duration;

use common::{connected_client, expect_sent, push_message};
use feedme_client::{ClientEvent, ClientOptions, FeedArgs, FeedEvent, FeedState};
use serde_json::json;

#[tokio::test]
async fn multiple_handles_share_one_server_feed() {
    let (client, server_tx, mut sent_rx) = connected_client(ClientOptions::default()).await;

    let mut feed_a = client.feed("chat", FeedArgs::new());
    feed_a.desire_open().unwrap();
    expect_sent(&mut sent_rx, "FeedOpen").await;
    assert!(matches!(feed_a.next_event().await, Some(FeedEvent::Opening)));
    push_message(
        &server_tx,
        r#"{"MessageType":"FeedOpenResponse","FeedName":"chat","FeedArgs":{},"Success":true,"FeedData":{}}"#,
    );
    assert!(matches!(feed_a.next_event().await, Some(FeedEvent::Open)));

    // A second handle on the same name+args joins an already-open server
    // feed: it should see opening/open immediately, with no FeedOpen sent.
    let mut feed_b = client.feed("chat", FeedArgs::new());
    feed_b.desire_open().unwrap();
    assert!(matches!(feed_b.next_event().await, Some(FeedEvent::Opening)));
    assert!(matches!(feed_b.next_event().await, Some(FeedEvent::Open)));

    tokio::time::sleep(Duration::from_millis(20)).await;
    assert!(sent_rx.try_recv().is_err(), "no second FeedOpen should have been sent");

    // Closing one handle must not affect the other.
    feed_a.desire_closed().unwrap();
    assert!(matches!(feed_a.next_event().await, Some(FeedEvent::Close(None))));
    tokio::time::sleep(Duration::from_millis(20)).await;
    assert!(sent_rx.try_recv().is_err(), "feed_b still desires open, so FeedClose must not be sent");
    assert_eq!(feed_b.state().await.unwrap(), FeedState::Open);
}

#[tokio::test]
async fn feed_open_rejection_emits_close_and_does_not_auto_retry() {
    let (client, server_tx, mut sent_rx) = connected_client(ClientOptions::default()).await;
    let mut feed = client.feed("admin", FeedArgs::new());
    feed.desire_open().unwrap();
    expect_sent(&mut sent_rx, "FeedOpen").await;
    assert!(matches!(feed.next_event().await, Some(FeedEvent::Opening)));

    push_message(
        &server_tx,
        r#"{"MessageType":"FeedOpenResponse","FeedName":"admin","FeedArgs":{},"Success":false,"ErrorCode":"FORBIDDEN","ErrorData":{}}"#,
    );

    match feed.next_event().await {
        Some(FeedEvent::Close(Some(e))) => assert_eq!(e.tag(), "REJECTED"),
        other => panic!("expected close(REJECTED), got {other:?}"),
    }

    tokio::time::sleep(Duration::from_millis(20)).await;
    assert!(sent_rx.try_recv().is_err(), "a rejected open must not be retried automatically");
}

#[tokio::test]
async fn bad_feed_action_reopens_until_the_attempt_cap_is_reached() {
    let options = ClientOptions {
        reopen_max_attempts: 1,
        reopen_trailing_ms: 60_000,
        ..ClientOptions::default()
    };
    let (client, server_tx, mut sent_rx) = connected_client(options).await;
    let mut feed = client.feed("chat", FeedArgs::new());
    feed.desire_open().unwrap();
    expect_sent(&mut sent_rx, "FeedOpen").await;
    feed.next_event().await;
    push_message(
        &server_tx,
        r#"{"MessageType":"FeedOpenResponse","FeedName":"chat","FeedArgs":{},"Success":true,"FeedData":{"count":0}}"#,
    );
    feed.next_event().await;
    assert_eq!(feed.state().await.unwrap(), FeedState::Open);

    // First bad delta: force-closed, then reopened (1 attempt used).
    push_message(
        &server_tx,
        r#"{"MessageType":"FeedAction","FeedName":"chat","FeedArgs":{},"ActionName":"bad","ActionData":{},"FeedDeltas":[{"Operation":"Set","Path":["missing","child"],"Value":1}]}"#,
    );
    expect_sent(&mut sent_rx, "FeedClose").await;
    push_message(&server_tx, r#"{"MessageType":"FeedCloseResponse","FeedName":"chat","FeedArgs":{}}"#);
    match feed.next_event().await {
        Some(FeedEvent::Close(Some(e))) => assert_eq!(e.tag(), "BAD_FEED_ACTION"),
        other => panic!("expected close(BAD_FEED_ACTION), got {other:?}"),
    }
    expect_sent(&mut sent_rx, "FeedOpen").await;
    assert!(matches!(feed.next_event().await, Some(FeedEvent::Opening)));
    push_message(
        &server_tx,
        r#"{"MessageType":"FeedOpenResponse","FeedName":"chat","FeedArgs":{},"Success":true,"FeedData":{"count":0}}"#,
    );
    assert!(matches!(feed.next_event().await, Some(FeedEvent::Open)));

    // Second bad delta within the same trailing window: the attempt cap is
    // already spent, so no further FeedOpen is issued.
    push_message(
        &server_tx,
        r#"{"MessageType":"FeedAction","FeedName":"chat","FeedArgs":{},"ActionName":"bad","ActionData":{},"FeedDeltas":[{"Operation":"Set","Path":["missing","child"],"Value":1}]}"#,
    );
    expect_sent(&mut sent_rx, "FeedClose").await;
    push_message(&server_tx, r#"{"MessageType":"FeedCloseResponse","FeedName":"chat","FeedArgs":{}}"#);
    match feed.next_event().await {
        Some(FeedEvent::Close(Some(e))) => assert_eq!(e.tag(), "BAD_FEED_ACTION"),
        other => panic!("expected close(BAD_FEED_ACTION), got {other:?}"),
    }

    tokio::time::sleep(Duration::from_millis(20)).await;
    assert!(sent_rx.try_recv().is_err(), "the reopen attempt cap should block a third open");
    // The forced close already completed (FeedCloseResponse handled above)
    // and the cap blocked the reopen, so the server feed is plainly closed.
    assert_eq!(feed.state().await.unwrap(), FeedState::Closed);
}

#[tokio::test]
async fn connect_time_failure_still_schedules_a_retry() {
    // S3's failure mode: the transport emits `Connecting` then
    // `Disconnect(TRANSPORT_FAILURE)` without ever reaching `Connect`, so
    // the session never sends a `Handshake` on the first attempt. The
    // retry policy keys off the session having been in `connecting`
    // (spec §3: `connecting` covers the transport-connecting window, not
    // just post-connect/pre-handshake), so it must still fire here.
    let options = ClientOptions {
        connect_retry_ms: 10,
        connect_retry_backoff_ms: 0,
        connect_retry_max_ms: 100,
        connect_retry_max_attempts: 3,
        ..ClientOptions::default()
    };
    let (transport, events_rx, server_tx, mut sent_rx) = common::flaky_transport(1);
    let client = feedme_client::Client::new(transport, events_rx, options).unwrap();

    let first_attempt = client.connect().await;
    assert!(first_attempt.is_err(), "the first, connect-time-failing attempt must surface its error");
    assert!(
        sent_rx.try_recv().is_err(),
        "no Handshake should have been sent before the transport ever reached connect"
    );

    // Subscribed only now, but still strictly before the retried attempt's
    // `Connect` can possibly fire, since that requires a 10ms retry delay
    // plus a round trip through the handshake pushed below.
    let mut client_events = client.events();

    // The automatically retried attempt reaches the handshake normally.
    let sent = expect_sent(&mut sent_rx, "Handshake").await;
    assert_eq!(sent["MessageType"], "Handshake");
    push_message(&server_tx, r#"{"MessageType":"HandshakeResponse","Success":true,"Version":"0.1"}"#);

    match client_events.recv().await.unwrap() {
        ClientEvent::Connect => {}
        other => panic!("expected the retried attempt to connect, got {other:?}"),
    }
}

#[tokio::test]
async fn handshake_rejection_surfaces_error_without_scheduling_a_retry() {
    let options = ClientOptions {
        connect_retry_ms: 10,
        connect_retry_max_ms: 100,
        ..ClientOptions::default()
    };
    let (transport, events_rx, server_tx, mut sent_rx) = common::mock_transport();
    let client = feedme_client::Client::new(transport, events_rx, options).unwrap();

    let connect = tokio::spawn({
        let client = client.clone();
        async move { client.connect().await }
    });
    expect_sent(&mut sent_rx, "Handshake").await;
    push_message(&server_tx, r#"{"MessageType":"HandshakeResponse","Success":false}"#);

    let err = connect.await.unwrap().unwrap_err();
    assert_eq!(err.tag(), "HANDSHAKE_REJECTED");

    // No automatic retry: nothing else should arrive even after waiting
    // past connect_retry_ms.
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(sent_rx.try_recv().is_err(), "a rejected handshake must not be retried");
    assert_eq!(client.state().await, feedme_client::ClientState::Disconnected);
}

#[tokio::test]
async fn action_times_out_and_the_late_response_is_discarded() {
    let options = ClientOptions {
        action_timeout_ms: 20,
        ..ClientOptions::default()
    };
    let (client, server_tx, mut sent_rx) = connected_client(options).await;

    let action = tokio::spawn({
        let client = client.clone();
        async move { client.action("slow", json!({})).await }
    });
    let sent = expect_sent(&mut sent_rx, "Action").await;
    let callback_id = sent["CallbackId"].as_str().unwrap().to_string();

    let err = action.await.unwrap().unwrap_err();
    assert_eq!(err.tag(), "TIMEOUT");

    // The late response must not panic or desync the session; it is just
    // dropped (its receiver is already gone).
    push_message(
        &server_tx,
        &format!(r#"{{"MessageType":"ActionResponse","CallbackId":"{callback_id}","Success":true,"ActionData":{{}}}}"#),
    );
    tokio::time::sleep(Duration::from_millis(20)).await;
    assert_eq!(client.state().await, feedme_client::ClientState::Connected);
}
