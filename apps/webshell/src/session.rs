use std::sync::Arc;
use std::time::Duration;

use chunk_transport::{ByteChunk, Transport, TransportEvent, TransportEvents};
use tokio::sync::{mpsc, watch};
use tracing::{debug, info, warn};

use crate::bridge::{ClientBridge, PendingInputPolicy, RelayStats, SessionState};
use crate::emulator::Emulator;
use crate::transport::websocket::{WebSocketConfig, WebSocketConfigError, WebSocketTransport};

/// Upper bound on waiting for the transport to finish a local close.
const CLOSE_GRACE: Duration = Duration::from_secs(3);

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionOutcome {
    pub state: SessionState,
    pub cause: Option<String>,
    pub stats: RelayStats,
}

/// One emulator paired with one transport connection.
///
/// Owns both handles; nothing is shared between sessions, so several can run
/// side by side.
pub struct Session<E> {
    bridge: ClientBridge<E>,
    events: TransportEvents,
}

impl<E: Emulator> Session<E> {
    pub fn new(
        emulator: E,
        transport: Arc<dyn Transport>,
        events: TransportEvents,
        policy: PendingInputPolicy,
    ) -> Self {
        Self {
            bridge: ClientBridge::new(emulator, transport, policy),
            events,
        }
    }

    /// Starts dialing `config` and returns a session in the `Connecting` state.
    pub fn connect(
        config: WebSocketConfig,
        emulator: E,
        policy: PendingInputPolicy,
    ) -> Result<Self, WebSocketConfigError> {
        let (transport, events) = WebSocketTransport::connect(config)?;
        Ok(Self::new(emulator, transport, events, policy))
    }

    pub fn state(&self) -> SessionState {
        self.bridge.state()
    }

    pub fn subscribe(&self) -> watch::Receiver<SessionState> {
        self.bridge.subscribe()
    }

    /// Relays until the session is closed or failed.
    ///
    /// When `input` ends (the user detached) the session closes the
    /// transport itself and waits for it to flush and finish the close
    /// handshake.
    pub async fn run(mut self, mut input: mpsc::UnboundedReceiver<ByteChunk>) -> SessionOutcome {
        if let Err(err) = self.bridge.attach_emulator() {
            self.bridge
                .on_transport_error(format!("emulator attach failed: {err}"));
        }

        let mut input_open = true;
        let mut closed_locally = false;
        while !self.bridge.state().is_terminal() {
            tokio::select! {
                event = self.events.recv() => match event {
                    Some(event) => self.bridge.on_transport_event(event),
                    None => self
                        .bridge
                        .on_transport_close(Some("transport dropped".to_string())),
                },
                chunk = input.recv(), if input_open => match chunk {
                    Some(chunk) => {
                        self.bridge.on_emulator_input(chunk);
                    }
                    None => {
                        input_open = false;
                        closed_locally = true;
                        debug!(target: "webshell::session", "emulator input ended, closing");
                        self.bridge.close();
                    }
                },
            }
        }

        if closed_locally {
            self.await_transport_shutdown().await;
        }

        self.bridge.detach_emulator();
        let outcome = SessionOutcome {
            state: self.bridge.state(),
            cause: self.bridge.failure().map(str::to_owned),
            stats: self.bridge.stats(),
        };
        info!(
            target: "webshell::session",
            state = outcome.state.as_str(),
            chunks_out = outcome.stats.chunks_out,
            chunks_in = outcome.stats.chunks_in,
            dropped = outcome.stats.dropped,
            "session ended"
        );
        outcome
    }

    async fn await_transport_shutdown(&mut self) {
        let events = &mut self.events;
        let finished = tokio::time::timeout(CLOSE_GRACE, async {
            while let Some(event) = events.recv().await {
                if matches!(event, TransportEvent::Closed { .. } | TransportEvent::Error(_)) {
                    break;
                }
            }
        })
        .await;
        if finished.is_err() {
            warn!(target: "webshell::session", "transport did not finish closing in time");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::emulator::RecordingEmulator;
    use chunk_transport::LoopbackTransport;

    async fn next_message(events: &mut TransportEvents) -> ByteChunk {
        loop {
            match events.recv().await.expect("peer event") {
                TransportEvent::Message(chunk) => return chunk,
                TransportEvent::Opened => {}
                other => panic!("unexpected {other:?}"),
            }
        }
    }

    #[test_timeout::tokio_timeout_test(10)]
    async fn relays_both_ways_over_loopback() {
        let (client, mut remote) = LoopbackTransport::pair();
        let emulator = RecordingEmulator::new();
        let session = Session::new(
            emulator.clone(),
            client.transport,
            client.events,
            PendingInputPolicy::default(),
        );
        let mut states = session.subscribe();
        let (input_tx, input_rx) = mpsc::unbounded_channel();
        let running = tokio::spawn(session.run(input_rx));

        input_tx.send(ByteChunk::from("ls\r\n")).unwrap();
        assert_eq!(next_message(&mut remote.events).await, "ls\r\n");

        remote.transport.send(ByteChunk::from("total 0\r\n")).unwrap();
        remote.transport.send(ByteChunk::from("\x1b[1;3;31mhello\x1b[0m")).unwrap();
        remote.transport.close();

        let outcome = running.await.unwrap();
        assert_eq!(outcome.state, SessionState::Closed);
        assert_eq!(
            emulator.written(),
            vec![
                ByteChunk::from("total 0\r\n"),
                ByteChunk::from("\x1b[1;3;31mhello\x1b[0m"),
            ]
        );
        assert_eq!(outcome.stats.chunks_out, 1);
        assert_eq!(outcome.stats.chunks_in, 2);
        assert!(!emulator.is_attached());
        states.changed().await.ok();
        assert_eq!(*states.borrow(), SessionState::Closed);
    }

    #[test_timeout::tokio_timeout_test(10)]
    async fn many_chunks_arrive_in_order_without_merging() {
        let (client, mut remote) = LoopbackTransport::pair();
        let session = Session::new(
            RecordingEmulator::new(),
            client.transport,
            client.events,
            PendingInputPolicy::default(),
        );
        let (input_tx, input_rx) = mpsc::unbounded_channel();
        let running = tokio::spawn(session.run(input_rx));

        let expected: Vec<ByteChunk> = (0..200)
            .map(|i| ByteChunk::from(format!("chunk-{i};")))
            .collect();
        for chunk in &expected {
            input_tx.send(chunk.clone()).unwrap();
        }
        for chunk in &expected {
            assert_eq!(&next_message(&mut remote.events).await, chunk);
        }

        drop(input_tx);
        let outcome = running.await.unwrap();
        assert_eq!(outcome.state, SessionState::Closed);
        assert_eq!(outcome.stats.chunks_out, expected.len() as u64);
    }

    #[test_timeout::tokio_timeout_test(10)]
    async fn detaching_closes_the_remote_side() {
        let (client, mut remote) = LoopbackTransport::pair();
        let session = Session::new(
            RecordingEmulator::new(),
            client.transport,
            client.events,
            PendingInputPolicy::default(),
        );
        let (input_tx, input_rx) = mpsc::unbounded_channel::<ByteChunk>();
        drop(input_tx);
        let outcome = session.run(input_rx).await;
        assert_eq!(outcome.state, SessionState::Closed);

        let mut saw_close = false;
        while let Some(event) = remote.events.recv().await {
            saw_close |= matches!(event, TransportEvent::Closed { .. });
        }
        assert!(saw_close);
    }

    #[test_timeout::tokio_timeout_test(10)]
    async fn transport_failure_fails_the_session() {
        let (client, remote) = LoopbackTransport::pair();
        let session = Session::new(
            RecordingEmulator::new(),
            client.transport,
            client.events,
            PendingInputPolicy::default(),
        );
        let (_input_tx, input_rx) = mpsc::unbounded_channel();
        remote.transport.fail("connection reset");
        let outcome = session.run(input_rx).await;
        assert_eq!(outcome.state, SessionState::Failed);
        assert_eq!(outcome.cause.as_deref(), Some("connection reset"));
    }

    #[test_timeout::tokio_timeout_test(10)]
    async fn refused_connection_fails_without_sending() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let config = WebSocketConfig::new(format!("ws://{addr}/"));
        let session =
            Session::connect(config, RecordingEmulator::new(), PendingInputPolicy::default())
                .unwrap();
        assert_eq!(session.state(), SessionState::Connecting);
        let (input_tx, input_rx) = mpsc::unbounded_channel();
        input_tx.send(ByteChunk::from("typed early")).unwrap();
        let outcome = session.run(input_rx).await;
        assert_eq!(outcome.state, SessionState::Failed);
        assert_eq!(outcome.stats.chunks_out, 0);
        assert!(outcome.cause.unwrap().contains("connect to"));
    }
}
