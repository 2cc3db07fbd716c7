//! WebSocket adapters using `tokio-tungstenite`.
//!
//! One generic [`WebSocketConnection`] serves both runtimes:
//! [`ServerConnection`] wraps an accepted stream, [`ClientConnection`]
//! wraps an outbound one. The stream is split at construction so the
//! reader task and writer task never contend on one lock.

use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use futures_util::StreamExt;
use futures_util::stream::{SplitSink, SplitStream};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::Mutex;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};

use crate::{Connection, ConnectionId, RawFrame, Transport, TransportError};

/// Counter for generating unique connection IDs.
static NEXT_CONNECTION_ID: AtomicU64 = AtomicU64::new(1);

/// A server-side connection (accepted TCP stream).
pub type ServerConnection = WebSocketConnection<TcpStream>;

/// A client-side connection (outbound, possibly TLS-wrapped stream).
pub type ClientConnection = WebSocketConnection<MaybeTlsStream<TcpStream>>;

/// A WebSocket-based [`Transport`] that listens for incoming connections.
pub struct WebSocketTransport {
    listener: TcpListener,
}

impl WebSocketTransport {
    /// Binds a new WebSocket transport to the given address.
    pub async fn bind(addr: &str) -> Result<Self, TransportError> {
        let listener = TcpListener::bind(addr)
            .await
            .map_err(TransportError::AcceptFailed)?;
        tracing::info!(addr, "WebSocket transport listening");
        Ok(Self { listener })
    }

    /// Returns the local address the listener is bound to.
    pub fn local_addr(&self) -> std::io::Result<SocketAddr> {
        self.listener.local_addr()
    }
}

impl Transport for WebSocketTransport {
    type Connection = ServerConnection;
    type Error = TransportError;

    async fn accept(&mut self) -> Result<Self::Connection, Self::Error> {
        let (stream, addr) = self
            .listener
            .accept()
            .await
            .map_err(TransportError::AcceptFailed)?;

        let ws = tokio_tungstenite::accept_async(stream).await.map_err(|e| {
            TransportError::AcceptFailed(std::io::Error::new(
                std::io::ErrorKind::ConnectionRefused,
                e,
            ))
        })?;

        let conn = WebSocketConnection::new(ws, Some(addr));
        tracing::debug!(id = %conn.id(), %addr, "accepted WebSocket connection");
        Ok(conn)
    }

    async fn shutdown(&self) -> Result<(), Self::Error> {
        Ok(())
    }
}

/// Establishes an outbound WebSocket connection to `ws://host:port`.
///
/// # Errors
/// Returns [`TransportError::Refused`] when the remote end actively
/// refuses, [`TransportError::ConnectFailed`] for any other failure.
pub async fn connect(url: &str) -> Result<ClientConnection, TransportError> {
    let (ws, _) =
        tokio_tungstenite::connect_async(url).await.map_err(|e| match e {
            tokio_tungstenite::tungstenite::Error::Io(io)
                if io.kind() == std::io::ErrorKind::ConnectionRefused =>
            {
                TransportError::Refused(url.to_string())
            }
            other => TransportError::ConnectFailed(std::io::Error::new(
                std::io::ErrorKind::NotConnected,
                other,
            )),
        })?;

    let conn = WebSocketConnection::new(ws, None);
    tracing::debug!(id = %conn.id(), url, "connected");
    Ok(conn)
}

/// A single WebSocket connection, generic over the underlying stream.
#[derive(Debug)]
pub struct WebSocketConnection<S> {
    id: ConnectionId,
    remote: Option<SocketAddr>,
    sink: Arc<Mutex<SplitSink<WebSocketStream<S>, Message>>>,
    stream: Arc<Mutex<SplitStream<WebSocketStream<S>>>>,
}

impl<S> WebSocketConnection<S>
where
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    fn new(ws: WebSocketStream<S>, remote: Option<SocketAddr>) -> Self {
        let (sink, stream) = ws.split();
        Self {
            id: ConnectionId::new(
                NEXT_CONNECTION_ID.fetch_add(1, Ordering::Relaxed),
            ),
            remote,
            sink: Arc::new(Mutex::new(sink)),
            stream: Arc::new(Mutex::new(stream)),
        }
    }

    async fn send_frame(&self, msg: Message) -> Result<(), TransportError> {
        use futures_util::SinkExt;
        self.sink.lock().await.send(msg).await.map_err(|e| {
            TransportError::SendFailed(std::io::Error::new(
                std::io::ErrorKind::BrokenPipe,
                e,
            ))
        })
    }
}

impl<S> Connection for WebSocketConnection<S>
where
    S: AsyncRead + AsyncWrite + Unpin + Send + Sync + 'static,
{
    type Error = TransportError;

    async fn send_text(&self, text: &str) -> Result<(), Self::Error> {
        self.send_frame(Message::Text(text.into())).await
    }

    async fn send_binary(&self, data: &[u8]) -> Result<(), Self::Error> {
        self.send_frame(Message::Binary(data.to_vec().into())).await
    }

    async fn recv(&self) -> Result<Option<RawFrame>, Self::Error> {
        loop {
            let msg = self.stream.lock().await.next().await;
            match msg {
                Some(Ok(Message::Text(text))) => {
                    return Ok(Some(RawFrame::Text(text.to_string())));
                }
                Some(Ok(Message::Binary(data))) => {
                    return Ok(Some(RawFrame::Binary(data.into())));
                }
                Some(Ok(Message::Close(_))) | None => return Ok(None),
                Some(Ok(_)) => continue, // skip ping/pong/frame
                Some(Err(e)) => {
                    return Err(TransportError::ReceiveFailed(
                        std::io::Error::new(
                            std::io::ErrorKind::ConnectionReset,
                            e,
                        ),
                    ));
                }
            }
        }
    }

    async fn close(&self) -> Result<(), Self::Error> {
        use futures_util::SinkExt;
        self.sink
            .lock()
            .await
            .send(Message::Close(None))
            .await
            .map_err(|e| {
                TransportError::SendFailed(std::io::Error::new(
                    std::io::ErrorKind::BrokenPipe,
                    e,
                ))
            })
    }

    fn id(&self) -> ConnectionId {
        self.id
    }

    fn remote_addr(&self) -> Option<SocketAddr> {
        self.remote
    }
}
