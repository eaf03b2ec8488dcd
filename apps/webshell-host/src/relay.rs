use axum::extract::ws::{close_code, CloseFrame, Message, WebSocket};
use chunk_transport::{ByteChunk, Frame, FrameKind};
use futures_util::{SinkExt, StreamExt};
use tracing::{debug, info, warn};

use crate::process::ProcessIo;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RelayEnd {
    /// The shell exited; the socket was closed from this side.
    ProcessExited,
    ClientClosed,
    ClientError(String),
}

fn to_message(chunk: &ByteChunk, kind: FrameKind) -> Message {
    match kind.frame(chunk) {
        Frame::Text(text) => Message::Text(text),
        Frame::Binary(data) => Message::Binary(data),
    }
}

/// Copies chunks between one WebSocket and one process until either side
/// ends. The process is terminated if it is still running afterwards.
pub async fn relay(socket: WebSocket, process: ProcessIo, frame: FrameKind) -> RelayEnd {
    let ProcessIo {
        input,
        mut output,
        mut handle,
    } = process;
    let (mut sink, mut source) = socket.split();

    let end = loop {
        tokio::select! {
            chunk = output.recv() => match chunk {
                Some(chunk) => {
                    debug!(target: "webshell_host::relay", "pty->ws: {}", chunk.describe());
                    if let Err(err) = sink.send(to_message(&chunk, frame)).await {
                        break RelayEnd::ClientError(err.to_string());
                    }
                }
                None => break RelayEnd::ProcessExited,
            },
            message = source.next() => {
                let chunk = match message {
                    Some(Ok(Message::Binary(data))) => ByteChunk::from(data),
                    Some(Ok(Message::Text(text))) => ByteChunk::from(text),
                    Some(Ok(Message::Close(_))) | None => break RelayEnd::ClientClosed,
                    Some(Ok(_)) => continue,
                    Some(Err(err)) => break RelayEnd::ClientError(err.to_string()),
                };
                debug!(target: "webshell_host::relay", "ws->pty: {}", chunk.describe());
                if input.send(chunk).is_err() {
                    break RelayEnd::ProcessExited;
                }
            }
        }
    };

    match &end {
        RelayEnd::ProcessExited => {
            info!(target: "webshell_host::relay", "process exited, closing socket");
            let close = Message::Close(Some(CloseFrame {
                code: close_code::NORMAL,
                reason: "process exited".into(),
            }));
            if let Err(err) = sink.send(close).await {
                debug!(target: "webshell_host::relay", error = %err, "close frame not delivered");
            }
        }
        RelayEnd::ClientClosed => {
            info!(target: "webshell_host::relay", "client closed the connection");
        }
        RelayEnd::ClientError(err) => {
            warn!(target: "webshell_host::relay", error = %err, "websocket failed");
        }
    }
    handle.terminate();
    end
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn text_frames_only_for_valid_utf8() {
        assert!(matches!(
            to_message(&ByteChunk::from("hi"), FrameKind::Text),
            Message::Text(text) if text == "hi"
        ));
        assert!(matches!(
            to_message(&ByteChunk::from(&[0xe4u8][..]), FrameKind::Text),
            Message::Binary(data) if data == vec![0xe4]
        ));
        assert!(matches!(
            to_message(&ByteChunk::from("hi"), FrameKind::Binary),
            Message::Binary(_)
        ));
    }
}
