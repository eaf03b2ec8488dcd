use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::mpsc;

use crate::{ByteChunk, Transport, TransportError, TransportEvent, TransportEvents, TransportResult};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Side {
    Left,
    Right,
}

#[derive(Debug)]
struct Link {
    open: bool,
    left: Option<mpsc::UnboundedSender<TransportEvent>>,
    right: Option<mpsc::UnboundedSender<TransportEvent>>,
}

impl Link {
    fn sender(&self, side: Side) -> Option<&mpsc::UnboundedSender<TransportEvent>> {
        match side {
            Side::Left => self.left.as_ref(),
            Side::Right => self.right.as_ref(),
        }
    }

    fn shut(&mut self, local: Side, local_event: TransportEvent, peer_event: TransportEvent) {
        self.open = false;
        let peer = local.peer();
        if let Some(tx) = self.sender(local) {
            let _ = tx.send(local_event);
        }
        if let Some(tx) = self.sender(peer) {
            let _ = tx.send(peer_event);
        }
        self.left = None;
        self.right = None;
    }
}

impl Side {
    fn peer(self) -> Side {
        match self {
            Side::Left => Side::Right,
            Side::Right => Side::Left,
        }
    }
}

/// In-memory transport pair for tests and local wiring. Preserves message
/// boundaries: each `send` arrives as exactly one `Message` on the peer.
pub struct LoopbackTransport {
    side: Side,
    link: Arc<Mutex<Link>>,
}

/// One endpoint of a loopback pair with its inbound event stream.
pub struct LoopbackEnd {
    pub transport: Arc<LoopbackTransport>,
    pub events: TransportEvents,
}

impl LoopbackTransport {
    /// Creates two connected endpoints. Both start open and have already
    /// queued an `Opened` event.
    pub fn pair() -> (LoopbackEnd, LoopbackEnd) {
        let (left_tx, left_rx) = mpsc::unbounded_channel();
        let (right_tx, right_rx) = mpsc::unbounded_channel();
        let _ = left_tx.send(TransportEvent::Opened);
        let _ = right_tx.send(TransportEvent::Opened);
        let link = Arc::new(Mutex::new(Link {
            open: true,
            left: Some(left_tx),
            right: Some(right_tx),
        }));
        let left = LoopbackEnd {
            transport: Arc::new(Self {
                side: Side::Left,
                link: Arc::clone(&link),
            }),
            events: left_rx,
        };
        let right = LoopbackEnd {
            transport: Arc::new(Self {
                side: Side::Right,
                link,
            }),
            events: right_rx,
        };
        (left, right)
    }

    /// Tears the link down as a connection failure seen by both ends.
    pub fn fail(&self, cause: impl Into<String>) {
        let cause = cause.into();
        let mut link = self.link.lock();
        if !link.open {
            return;
        }
        link.shut(
            self.side,
            TransportEvent::Error(cause.clone()),
            TransportEvent::Error(cause),
        );
    }
}

impl Transport for LoopbackTransport {
    fn send(&self, chunk: ByteChunk) -> TransportResult<()> {
        let link = self.link.lock();
        if !link.open {
            return Err(TransportError::Closed);
        }
        link.sender(self.side.peer())
            .ok_or(TransportError::Closed)?
            .send(TransportEvent::Message(chunk))
            .map_err(|_| TransportError::Closed)
    }

    fn close(&self) {
        let mut link = self.link.lock();
        if !link.open {
            return;
        }
        link.shut(
            self.side,
            TransportEvent::Closed {
                reason: Some("closed locally".to_string()),
            },
            TransportEvent::Closed {
                reason: Some("closed by peer".to_string()),
            },
        );
    }

    fn is_open(&self) -> bool {
        self.link.lock().open
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn next_message(events: &mut TransportEvents) -> ByteChunk {
        loop {
            match events.recv().await.expect("event") {
                TransportEvent::Opened => continue,
                TransportEvent::Message(chunk) => return chunk,
                other => panic!("unexpected event {other:?}"),
            }
        }
    }

    #[tokio::test]
    async fn loopback_keeps_message_boundaries_and_order() {
        let (client, mut server) = LoopbackTransport::pair();
        for chunk in ["l", "s", "\r", "\x1b[A"] {
            client.transport.send(ByteChunk::from(chunk)).expect("send");
        }
        assert_eq!(next_message(&mut server.events).await, "l");
        assert_eq!(next_message(&mut server.events).await, "s");
        assert_eq!(next_message(&mut server.events).await, "\r");
        assert_eq!(next_message(&mut server.events).await, "\x1b[A");
    }

    #[tokio::test]
    async fn close_notifies_both_ends_and_rejects_sends() {
        let (client, mut server) = LoopbackTransport::pair();
        client.transport.close();

        assert!(!server.transport.is_open());
        assert_eq!(
            server.transport.send(ByteChunk::from("late")),
            Err(TransportError::Closed)
        );

        let mut saw_close = false;
        while let Some(event) = server.events.recv().await {
            if let TransportEvent::Closed { reason } = event {
                assert_eq!(reason.as_deref(), Some("closed by peer"));
                saw_close = true;
            }
        }
        assert!(saw_close);
    }

    #[tokio::test]
    async fn fail_reports_error_to_both_ends() {
        let (client, mut server) = LoopbackTransport::pair();
        server.transport.fail("connection reset");

        let mut client_events = client.events;
        assert_eq!(client_events.recv().await, Some(TransportEvent::Opened));
        assert_eq!(
            client_events.recv().await,
            Some(TransportEvent::Error("connection reset".to_string()))
        );
        assert_eq!(server.events.recv().await, Some(TransportEvent::Opened));
        assert_eq!(
            server.events.recv().await,
            Some(TransportEvent::Error("connection reset".to_string()))
        );
    }
}
