//! Integration tests for the WebSocket transport and drain.
//!
//! These spin up a real listener and a real client so that frames cross
//! an actual socket, then verify the text round trip, close semantics,
//! and the queue→drain delivery path end to end.

use std::sync::Arc;

use futures_util::{SinkExt, StreamExt};
use wayfinder_transport::{
    ws_connect, Connection, Drain, MessageQueue, WebSocketTransport,
};

/// Binds a transport on an ephemeral port and returns it with its url.
async fn bound_transport() -> (WebSocketTransport, String) {
    let transport = WebSocketTransport::bind("127.0.0.1:0")
        .await
        .expect("should bind");
    let addr = transport.local_addr().expect("should have local addr");
    (transport, format!("ws://{addr}"))
}

#[tokio::test]
async fn test_accept_and_text_round_trip() {
    let (mut transport, url) = bound_transport().await;

    let server_handle = tokio::spawn(async move {
        transport.accept().await.expect("should accept")
    });

    let client = ws_connect(&url).await.expect("client should connect");
    let server = server_handle.await.expect("accept task should complete");

    client.send("ready,mediator,{}").await.expect("send ok");
    let got = server.recv().await.expect("recv ok");
    assert_eq!(got.as_deref(), Some("ready,mediator,{}"));

    server.send("ack,u1,{}").await.expect("send ok");
    let got = client.recv().await.expect("recv ok");
    assert_eq!(got.as_deref(), Some("ack,u1,{}"));
}

#[tokio::test]
async fn test_recv_returns_none_on_peer_close() {
    let (mut transport, url) = bound_transport().await;

    let server_handle = tokio::spawn(async move {
        transport.accept().await.expect("should accept")
    });

    let client = ws_connect(&url).await.expect("client should connect");
    let server = server_handle.await.expect("accept task should complete");

    client.close().await.expect("close ok");

    // The close surfaces exactly once as Ok(None), no matter which side
    // initiated it.
    let got = server.recv().await.expect("recv ok");
    assert!(got.is_none());
}

#[tokio::test]
async fn test_binary_frames_are_decoded_as_text() {
    let (mut transport, url) = bound_transport().await;

    let server_handle = tokio::spawn(async move {
        transport.accept().await.expect("should accept")
    });

    // Use a raw tungstenite client so we can send a Binary frame.
    let (mut raw, _) = tokio_tungstenite::connect_async(&url)
        .await
        .expect("client should connect");
    let server = server_handle.await.expect("accept task should complete");

    raw.send(tokio_tungstenite::tungstenite::Message::Binary(
        b"player,*,{}".to_vec().into(),
    ))
    .await
    .expect("send ok");

    let got = server.recv().await.expect("recv ok");
    assert_eq!(got.as_deref(), Some("player,*,{}"));
}

#[tokio::test]
async fn test_drain_delivers_queue_in_order() {
    let (mut transport, url) = bound_transport().await;

    let server_handle = tokio::spawn(async move {
        transport.accept().await.expect("should accept")
    });

    let (mut raw, _) = tokio_tungstenite::connect_async(&url)
        .await
        .expect("client should connect");
    let server =
        Arc::new(server_handle.await.expect("accept task should complete"));

    let queue = Arc::new(MessageQueue::new("test-drain", 16));
    queue.push("player,u1,{\"n\":1}".into());
    queue.push("player,u1,{\"n\":2}".into());

    let drain = Drain::start("test-drain", Arc::clone(&queue), server);

    // Messages pushed after the drain started flow through as well.
    queue.push("player,u1,{\"n\":3}".into());

    for expected in [
        "player,u1,{\"n\":1}",
        "player,u1,{\"n\":2}",
        "player,u1,{\"n\":3}",
    ] {
        let frame = raw
            .next()
            .await
            .expect("stream should yield")
            .expect("frame should be ok");
        assert_eq!(
            frame.into_text().expect("text frame").to_string(),
            expected
        );
    }

    drain.stop();
}

#[tokio::test]
async fn test_drain_stop_leaves_queue_intact() {
    let (mut transport, url) = bound_transport().await;

    let server_handle = tokio::spawn(async move {
        transport.accept().await.expect("should accept")
    });

    let _client = ws_connect(&url).await.expect("client should connect");
    let server =
        Arc::new(server_handle.await.expect("accept task should complete"));

    let queue = Arc::new(MessageQueue::new("test-drain", 16));
    let drain = Drain::start("test-drain", Arc::clone(&queue), server);
    drain.stop();

    // A stopped drain is a suspended session: output accumulates.
    queue.push("pending".into());
    queue.push("more".into());
    assert_eq!(queue.len(), 2);
}
