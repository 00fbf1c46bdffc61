// SPDX-License-Identifier: GPL-3.0-only

//! TCP transport
//!
//! Every frame is a little-endian `u32` payload length, one kind byte
//! (`0` binary, `1` text) and the payload. Replies use the same framing.

use std::io;

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::net::{TcpListener, TcpStream};
use tracing::{debug, info, warn};

use super::{Message, MessageHandler, ServiceContext};
use crate::errors::{AppError, AppResult};

pub const FRAME_KIND_BINARY: u8 = 0;
pub const FRAME_KIND_TEXT: u8 = 1;

/// Read one frame; `Ok(None)` on a clean end of stream
pub async fn read_frame<R: AsyncRead + Unpin>(
    reader: &mut R,
    max_bytes: usize,
) -> io::Result<Option<Message>> {
    let len = match reader.read_u32_le().await {
        Ok(len) => len as usize,
        Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => return Ok(None),
        Err(e) => return Err(e),
    };
    if len > max_bytes {
        return Err(io::Error::new(
            io::ErrorKind::InvalidData,
            format!("frame of {} bytes exceeds the {} byte limit", len, max_bytes),
        ));
    }

    let kind = reader.read_u8().await?;
    let mut payload = vec![0u8; len];
    reader.read_exact(&mut payload).await?;

    match kind {
        FRAME_KIND_BINARY => Ok(Some(Message::Binary(payload))),
        FRAME_KIND_TEXT => String::from_utf8(payload)
            .map(|text| Some(Message::Text(text)))
            .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e)),
        other => Err(io::Error::new(
            io::ErrorKind::InvalidData,
            format!("unknown frame kind {}", other),
        )),
    }
}

/// Write one frame and flush
pub async fn write_frame<W: AsyncWrite + Unpin>(writer: &mut W, message: &Message) -> io::Result<()> {
    let (kind, payload) = match message {
        Message::Binary(bytes) => (FRAME_KIND_BINARY, bytes.as_slice()),
        Message::Text(text) => (FRAME_KIND_TEXT, text.as_bytes()),
    };
    let len = u32::try_from(payload.len())
        .map_err(|_| io::Error::new(io::ErrorKind::InvalidInput, "frame too large"))?;
    writer.write_u32_le(len).await?;
    writer.write_u8(kind).await?;
    writer.write_all(payload).await?;
    writer.flush().await
}

/// Serve one connection until it closes
async fn handle_connection(stream: TcpStream, context: ServiceContext) -> AppResult<()> {
    let max_bytes = context.config.max_message_bytes;
    let (read_half, mut write_half) = stream.into_split();
    let mut reader = BufReader::new(read_half);
    let mut handler = Some(MessageHandler::new(context));

    while let Some(message) = read_frame(&mut reader, max_bytes).await? {
        let Some(mut current) = handler.take() else {
            break;
        };
        // Reconstruction is CPU/GPU bound and must not stall the runtime
        let (current, reply) = tokio::task::spawn_blocking(move || {
            let reply = current.handle(message);
            (current, reply)
        })
        .await
        .map_err(|e| AppError::Other(format!("Handler task failed: {}", e)))?;
        handler = Some(current);

        if let Some(reply) = reply {
            write_frame(&mut write_half, &Message::Binary(reply)).await?;
        }
    }
    Ok(())
}

/// Accept connections until ctrl-c
pub async fn serve(context: ServiceContext) -> AppResult<()> {
    let listener = TcpListener::bind(&context.config.bind_address).await?;
    info!(
        address = %listener.local_addr()?,
        anchors = context.network.anchor_count(),
        gpu = context.gpu.is_some(),
        "Listening for keyframes"
    );

    loop {
        tokio::select! {
            accepted = listener.accept() => {
                let (stream, peer) = accepted?;
                if let Err(e) = stream.set_nodelay(true) {
                    debug!(error = %e, "Failed to set TCP_NODELAY");
                }
                info!(%peer, "Client connected");
                let context = context.clone();
                tokio::spawn(async move {
                    match handle_connection(stream, context).await {
                        Ok(()) => info!(%peer, "Client disconnected"),
                        Err(e) => warn!(%peer, error = %e, "Connection closed with error"),
                    }
                });
            }
            _ = tokio::signal::ctrl_c() => {
                info!("Shutting down");
                return Ok(());
            }
        }
    }
}
