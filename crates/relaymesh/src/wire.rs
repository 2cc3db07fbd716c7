//! Shared plumbing between the server's connection handler and the
//! client: frame decode and the writer task that drains an outbound
//! queue onto the socket.

use std::sync::Arc;

use tokio::sync::mpsc;

use relaymesh_protocol::{
    FRAME_TAG, Message, ProtocolError, decode_frame, decode_message,
    encode_frame, encode_message,
};
use relaymesh_router::Outbound;
use relaymesh_transport::{Connection, RawFrame};

/// Decodes a raw frame into a message, plus the binary payload when the
/// frame was an envelope.
pub(crate) fn decode(
    frame: &RawFrame,
) -> Result<(Message, Option<Vec<u8>>), ProtocolError> {
    match frame {
        RawFrame::Text(text) => Ok((decode_message(text)?, None)),
        RawFrame::Binary(bytes) => {
            let parts = decode_frame(bytes, FRAME_TAG)?;
            Ok((parts.metadata, Some(parts.payload)))
        }
    }
}

/// Drains the outbound queue onto the socket until the queue closes or
/// a send fails. Encode failures skip the item; the connection stays up.
pub(crate) async fn writer_loop<C: Connection>(
    conn: Arc<C>,
    mut rx: mpsc::UnboundedReceiver<Outbound>,
) {
    while let Some(item) = rx.recv().await {
        let sent = match &item {
            Outbound::Message(msg) => match encode_message(msg) {
                Ok(text) => conn.send_text(&text).await,
                Err(e) => {
                    tracing::warn!(kind = %msg.kind, error = %e, "outbound message failed to encode");
                    continue;
                }
            },
            Outbound::Frame { payload, metadata } => {
                match encode_frame(payload, metadata, FRAME_TAG) {
                    Ok(bytes) => conn.send_binary(&bytes).await,
                    Err(e) => {
                        tracing::warn!(kind = %metadata.kind, error = %e, "outbound frame failed to encode");
                        continue;
                    }
                }
            }
        };
        if let Err(e) = sent {
            tracing::debug!(error = %e, "writer stopping, socket gone");
            break;
        }
    }
}
