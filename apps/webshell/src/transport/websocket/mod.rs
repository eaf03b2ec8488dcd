use std::sync::Arc;
use std::time::Duration;

use chunk_transport::{
    ByteChunk, Frame, FrameKind, Transport, TransportError, TransportEvent, TransportEvents,
    TransportResult,
};
use futures_util::{SinkExt, StreamExt};
use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Message;
use tracing::{debug, info, warn};
use url::Url;

pub mod config;
pub use config::{WebSocketConfig, WebSocketConfigError};

pub const DEFAULT_URL: &str = "ws://127.0.0.1:8080/";

/// How long a local close waits for the peer's close frame.
const CLOSE_HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(1);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Link {
    Connecting,
    Open,
    Closed,
}

enum Outbound {
    Chunk(ByteChunk),
    Close,
}

/// WebSocket implementation of the chunk [`Transport`].
///
/// `connect` returns immediately; dialing happens on a background task that
/// reports `Opened` (or `Error`) through the event receiver. Each chunk is
/// sent as exactly one WebSocket message.
pub struct WebSocketTransport {
    outbound: mpsc::UnboundedSender<Outbound>,
    link: Arc<Mutex<Link>>,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl WebSocketTransport {
    pub fn connect(
        config: WebSocketConfig,
    ) -> Result<(Arc<Self>, TransportEvents), WebSocketConfigError> {
        let url = config.build_url()?;
        let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let link = Arc::new(Mutex::new(Link::Connecting));

        let task = tokio::spawn(drive_connection(
            url,
            config.frame,
            outbound_rx,
            events_tx,
            Arc::clone(&link),
        ));

        let transport = Arc::new(Self {
            outbound: outbound_tx,
            link,
            task: Mutex::new(Some(task)),
        });
        Ok((transport, events_rx))
    }
}

impl Transport for WebSocketTransport {
    fn send(&self, chunk: ByteChunk) -> TransportResult<()> {
        match *self.link.lock() {
            Link::Connecting => return Err(TransportError::Unavailable),
            Link::Closed => return Err(TransportError::Closed),
            Link::Open => {}
        }
        self.outbound
            .send(Outbound::Chunk(chunk))
            .map_err(|_| TransportError::Closed)
    }

    /// Queued chunks are still flushed and the close handshake runs on the
    /// connection task; a dial still in progress is abandoned.
    fn close(&self) {
        let previous = std::mem::replace(&mut *self.link.lock(), Link::Closed);
        match previous {
            Link::Closed => {}
            Link::Connecting => {
                if let Some(task) = self.task.lock().take() {
                    task.abort();
                }
            }
            Link::Open => {
                if self.outbound.send(Outbound::Close).is_err() {
                    debug!(target: "webshell::transport::ws", "connection task already gone");
                }
            }
        }
    }

    fn is_open(&self) -> bool {
        *self.link.lock() == Link::Open
    }
}

impl Drop for WebSocketTransport {
    // An open connection winds down by itself once the outbound channel
    // closes, flushing what was queued and sending a close frame.
    fn drop(&mut self) {
        if *self.link.lock() != Link::Connecting {
            return;
        }
        if let Some(task) = self.task.lock().take() {
            task.abort();
        }
    }
}

fn to_message(chunk: &ByteChunk, kind: FrameKind) -> Message {
    match kind.frame(chunk) {
        Frame::Text(text) => Message::Text(text),
        Frame::Binary(data) => Message::Binary(data),
    }
}

async fn drive_connection(
    url: Url,
    frame: FrameKind,
    mut outbound: mpsc::UnboundedReceiver<Outbound>,
    events: mpsc::UnboundedSender<TransportEvent>,
    link: Arc<Mutex<Link>>,
) {
    debug!(target: "webshell::transport::ws", %url, "dialing");
    let stream = match connect_async(url.as_str()).await {
        Ok((stream, _response)) => stream,
        Err(err) => {
            warn!(target: "webshell::transport::ws", %url, error = %err, "connect failed");
            *link.lock() = Link::Closed;
            let _ = events.send(TransportEvent::Error(format!("connect to {url} failed: {err}")));
            return;
        }
    };

    {
        let mut state = link.lock();
        if *state == Link::Closed {
            // closed locally while dialing
            let _ = events.send(TransportEvent::Closed {
                reason: Some("closed before open".to_string()),
            });
            return;
        }
        *state = Link::Open;
    }
    info!(target: "webshell::transport::ws", %url, %frame, "connected");
    let _ = events.send(TransportEvent::Opened);

    let (mut sink, mut source) = stream.split();
    let end = loop {
        tokio::select! {
            next = outbound.recv() => match next {
                Some(Outbound::Chunk(chunk)) => {
                    if let Err(err) = sink.send(to_message(&chunk, frame)).await {
                        break TransportEvent::Error(format!("websocket write failed: {err}"));
                    }
                }
                Some(Outbound::Close) | None => {
                    if let Err(err) = sink.send(Message::Close(None)).await {
                        debug!(target: "webshell::transport::ws", error = %err, "close frame not sent");
                    }
                    let handshake = tokio::time::timeout(CLOSE_HANDSHAKE_TIMEOUT, async {
                        while let Some(Ok(message)) = source.next().await {
                            if message.is_close() {
                                break;
                            }
                        }
                    })
                    .await;
                    if handshake.is_err() {
                        debug!(target: "webshell::transport::ws", "peer did not answer the close frame");
                    }
                    break TransportEvent::Closed { reason: Some("closed locally".to_string()) };
                }
            },
            inbound = source.next() => match inbound {
                Some(Ok(Message::Binary(data))) => {
                    let _ = events.send(TransportEvent::Message(ByteChunk::from(data)));
                }
                Some(Ok(Message::Text(text))) => {
                    let _ = events.send(TransportEvent::Message(ByteChunk::from(text)));
                }
                Some(Ok(Message::Close(close))) => {
                    let reason = close
                        .map(|frame| frame.reason.into_owned())
                        .filter(|reason| !reason.is_empty());
                    break TransportEvent::Closed { reason };
                }
                Some(Ok(_)) => {}
                Some(Err(err)) => {
                    break TransportEvent::Error(format!("websocket read failed: {err}"));
                }
                None => break TransportEvent::Closed { reason: None },
            },
        }
    };

    *link.lock() = Link::Closed;
    debug!(target: "webshell::transport::ws", ?end, "connection finished");
    let _ = events.send(end);
}
