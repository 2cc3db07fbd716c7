//! Integration tests for the WebSocket transport adapters.
//!
//! Each test binds a real listener on an ephemeral port, connects a
//! real client, and exchanges frames over the loopback interface.

use relaymesh_transport::{
    Connection, RawFrame, ServerConnection, Transport, TransportError,
    WebSocketTransport, connect,
};

// ============================================================
// Helpers
// ============================================================

/// Binds a transport on an ephemeral port and returns it with its URL.
async fn bind_transport() -> (WebSocketTransport, String) {
    let transport = WebSocketTransport::bind("127.0.0.1:0")
        .await
        .expect("bind should succeed");
    let addr = transport.local_addr().expect("local addr");
    (transport, format!("ws://{addr}"))
}

/// Accepts one connection in a background task.
fn accept_one(
    mut transport: WebSocketTransport,
) -> tokio::task::JoinHandle<ServerConnection> {
    tokio::spawn(async move {
        transport.accept().await.expect("accept should succeed")
    })
}

// ============================================================
// Connection establishment
// ============================================================

#[tokio::test]
async fn test_connect_and_accept_produce_paired_connections() {
    let (transport, url) = bind_transport().await;
    let server = accept_one(transport);

    let client = connect(&url).await.expect("connect should succeed");
    let server = server.await.expect("accept task");

    assert!(server.remote_addr().is_some());
    assert_ne!(server.id(), client.id());
}

#[tokio::test]
async fn test_connect_to_unbound_port_returns_refused() {
    // Bind then drop the listener so the port is known-dead.
    let (transport, url) = bind_transport().await;
    drop(transport);

    let err = connect(&url).await.expect_err("connect should fail");
    assert!(matches!(err, TransportError::Refused(_)));
}

// ============================================================
// Frame exchange
// ============================================================

#[tokio::test]
async fn test_text_frame_round_trip() {
    let (transport, url) = bind_transport().await;
    let server = accept_one(transport);
    let client = connect(&url).await.expect("connect");
    let server = server.await.expect("accept task");

    client.send_text("hello").await.expect("send");
    let frame = server.recv().await.expect("recv").expect("frame");
    assert_eq!(frame, RawFrame::Text("hello".to_string()));

    server.send_text("world").await.expect("send");
    let frame = client.recv().await.expect("recv").expect("frame");
    assert_eq!(frame, RawFrame::Text("world".to_string()));
}

#[tokio::test]
async fn test_binary_frame_round_trip() {
    let (transport, url) = bind_transport().await;
    let server = accept_one(transport);
    let client = connect(&url).await.expect("connect");
    let server = server.await.expect("accept task");

    let payload = vec![0u8, 1, 2, 255, 254];
    client.send_binary(&payload).await.expect("send");
    let frame = server.recv().await.expect("recv").expect("frame");
    assert_eq!(frame, RawFrame::Binary(payload));
}

#[tokio::test]
async fn test_text_and_binary_frames_keep_their_kind() {
    let (transport, url) = bind_transport().await;
    let server = accept_one(transport);
    let client = connect(&url).await.expect("connect");
    let server = server.await.expect("accept task");

    client.send_text("a").await.expect("send text");
    client.send_binary(b"b").await.expect("send binary");

    let first = server.recv().await.expect("recv").expect("frame");
    let second = server.recv().await.expect("recv").expect("frame");
    assert_eq!(first, RawFrame::Text("a".to_string()));
    assert_eq!(second, RawFrame::Binary(b"b".to_vec()));
}

// ============================================================
// Close semantics
// ============================================================

#[tokio::test]
async fn test_close_yields_none_on_remote_recv() {
    let (transport, url) = bind_transport().await;
    let server = accept_one(transport);
    let client = connect(&url).await.expect("connect");
    let server = server.await.expect("accept task");

    client.close().await.expect("close");
    let frame = server.recv().await.expect("recv after close");
    assert!(frame.is_none());
}

#[tokio::test]
async fn test_recv_while_sending_does_not_deadlock() {
    let (transport, url) = bind_transport().await;
    let server = accept_one(transport);
    let client = connect(&url).await.expect("connect");
    let server = server.await.expect("accept task");

    // Park a reader on the client, then send to it while it waits.
    let client = std::sync::Arc::new(client);
    let reader = {
        let client = client.clone();
        tokio::spawn(async move { client.recv().await })
    };

    tokio::time::sleep(std::time::Duration::from_millis(50)).await;
    client.send_text("ping").await.expect("send while reading");
    server.send_text("pong").await.expect("reply");

    let frame = reader.await.expect("task").expect("recv").expect("frame");
    assert_eq!(frame, RawFrame::Text("pong".to_string()));
}
