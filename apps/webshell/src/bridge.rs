use std::collections::VecDeque;
use std::io;
use std::sync::Arc;

use chunk_transport::{ByteChunk, Transport, TransportError, TransportEvent};
use tokio::sync::watch;
use tracing::{debug, info, trace, warn};

use crate::emulator::Emulator;
use crate::telemetry::logging;

pub const DEFAULT_PENDING_CHUNKS: usize = 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Connecting,
    Open,
    Closed,
    Failed,
}

impl SessionState {
    pub fn is_terminal(self) -> bool {
        matches!(self, SessionState::Closed | SessionState::Failed)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            SessionState::Connecting => "connecting",
            SessionState::Open => "open",
            SessionState::Closed => "closed",
            SessionState::Failed => "failed",
        }
    }
}

/// What happens to emulator input produced before the connection is open.
///
/// Only the `Connecting` state consults the policy. Once a session is
/// `Closed` or `Failed`, input is always dropped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PendingInputPolicy {
    Drop,
    /// Queue up to `max_chunks`; later chunks are dropped so the queued
    /// prefix stays in order.
    Buffer { max_chunks: usize },
}

impl Default for PendingInputPolicy {
    fn default() -> Self {
        PendingInputPolicy::Buffer {
            max_chunks: DEFAULT_PENDING_CHUNKS,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InputDisposition {
    Sent,
    Queued,
    Dropped,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RelayStats {
    pub chunks_out: u64,
    pub bytes_out: u64,
    pub chunks_in: u64,
    pub bytes_in: u64,
    pub queued: u64,
    pub dropped: u64,
}

/// Relays chunks between one emulator and one transport connection.
///
/// The bridge never looks inside a chunk. Each handler is called from the
/// session's single driving task, which keeps both directions single-writer.
pub struct ClientBridge<E> {
    emulator: E,
    transport: Arc<dyn Transport>,
    policy: PendingInputPolicy,
    pending: VecDeque<ByteChunk>,
    state: watch::Sender<SessionState>,
    cause: Option<String>,
    stats: RelayStats,
}

impl<E: Emulator> ClientBridge<E> {
    pub fn new(emulator: E, transport: Arc<dyn Transport>, policy: PendingInputPolicy) -> Self {
        let (state, _) = watch::channel(SessionState::Connecting);
        Self {
            emulator,
            transport,
            policy,
            pending: VecDeque::new(),
            state,
            cause: None,
            stats: RelayStats::default(),
        }
    }

    pub fn state(&self) -> SessionState {
        *self.state.borrow()
    }

    /// Observers see every state transition, including the terminal one.
    pub fn subscribe(&self) -> watch::Receiver<SessionState> {
        self.state.subscribe()
    }

    pub fn stats(&self) -> RelayStats {
        self.stats
    }

    /// Why the session failed, if it did.
    pub fn failure(&self) -> Option<&str> {
        self.cause.as_deref()
    }

    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }

    pub fn emulator(&self) -> &E {
        &self.emulator
    }

    pub fn attach_emulator(&mut self) -> io::Result<()> {
        self.emulator.attach()
    }

    pub fn detach_emulator(&mut self) {
        self.emulator.detach();
    }

    pub fn on_emulator_input(&mut self, chunk: ByteChunk) -> InputDisposition {
        match self.state() {
            SessionState::Open => self.forward(chunk),
            SessionState::Connecting => self.hold(chunk),
            SessionState::Closed | SessionState::Failed => {
                trace!(target: "webshell::bridge", len = chunk.len(), "input after session end dropped");
                self.stats.dropped += 1;
                InputDisposition::Dropped
            }
        }
    }

    pub fn on_transport_open(&mut self) {
        if self.state() != SessionState::Connecting {
            debug!(target: "webshell::bridge", state = self.state().as_str(), "ignoring duplicate open");
            return;
        }
        self.transition(SessionState::Open);
        let queued = self.pending.len();
        if queued > 0 {
            debug!(target: "webshell::bridge", queued, "flushing input queued while connecting");
        }
        while let Some(chunk) = self.pending.pop_front() {
            self.forward(chunk);
            if self.state() != SessionState::Open {
                break;
            }
        }
    }

    pub fn on_transport_message(&mut self, chunk: ByteChunk) {
        if self.state() != SessionState::Open {
            trace!(
                target: "webshell::bridge",
                state = self.state().as_str(),
                len = chunk.len(),
                "inbound chunk outside open session dropped"
            );
            return;
        }
        trace!(target: "webshell::bridge", "transport->emulator: {}", logging::describe(&chunk));
        match self.emulator.write(&chunk) {
            Ok(()) => {
                self.stats.chunks_in += 1;
                self.stats.bytes_in += chunk.len() as u64;
            }
            Err(err) => {
                self.fail(format!("emulator write failed: {err}"));
            }
        }
    }

    pub fn on_transport_error(&mut self, cause: impl Into<String>) {
        if self.state().is_terminal() {
            return;
        }
        self.fail(cause.into());
    }

    pub fn on_transport_close(&mut self, reason: Option<String>) {
        if self.state().is_terminal() {
            return;
        }
        info!(
            target: "webshell::bridge",
            reason = reason.as_deref().unwrap_or("none"),
            "transport closed"
        );
        self.transition(SessionState::Closed);
    }

    pub fn on_transport_event(&mut self, event: TransportEvent) {
        match event {
            TransportEvent::Opened => self.on_transport_open(),
            TransportEvent::Message(chunk) => self.on_transport_message(chunk),
            TransportEvent::Closed { reason } => self.on_transport_close(reason),
            TransportEvent::Error(cause) => self.on_transport_error(cause),
        }
    }

    /// Local graceful shutdown.
    pub fn close(&mut self) {
        if self.state().is_terminal() {
            return;
        }
        self.transport.close();
        self.transition(SessionState::Closed);
    }

    fn forward(&mut self, chunk: ByteChunk) -> InputDisposition {
        trace!(target: "webshell::bridge", "emulator->transport: {}", logging::describe(&chunk));
        let len = chunk.len() as u64;
        match self.transport.send(chunk) {
            Ok(()) => {
                self.stats.chunks_out += 1;
                self.stats.bytes_out += len;
                InputDisposition::Sent
            }
            Err(TransportError::Unavailable) => {
                // the link dropped underneath us; its close/error event is still queued
                warn!(target: "webshell::bridge", "transport unavailable, input dropped");
                self.stats.dropped += 1;
                InputDisposition::Dropped
            }
            Err(TransportError::Closed) => {
                self.stats.dropped += 1;
                self.on_transport_close(Some("send on closed transport".to_string()));
                InputDisposition::Dropped
            }
            Err(TransportError::Failed(cause)) => {
                self.stats.dropped += 1;
                self.on_transport_error(cause);
                InputDisposition::Dropped
            }
        }
    }

    fn hold(&mut self, chunk: ByteChunk) -> InputDisposition {
        match self.policy {
            PendingInputPolicy::Buffer { max_chunks } if self.pending.len() < max_chunks => {
                self.pending.push_back(chunk);
                self.stats.queued += 1;
                InputDisposition::Queued
            }
            PendingInputPolicy::Buffer { max_chunks } => {
                debug!(target: "webshell::bridge", max_chunks, "pending input full, chunk dropped");
                self.stats.dropped += 1;
                InputDisposition::Dropped
            }
            PendingInputPolicy::Drop => {
                self.stats.dropped += 1;
                InputDisposition::Dropped
            }
        }
    }

    fn fail(&mut self, cause: String) {
        warn!(target: "webshell::bridge", %cause, "session failed");
        self.cause = Some(cause);
        self.transport.close();
        self.transition(SessionState::Failed);
    }

    fn transition(&mut self, next: SessionState) {
        let previous = self.state.send_replace(next);
        if next.is_terminal() && !self.pending.is_empty() {
            self.stats.dropped += self.pending.len() as u64;
            self.pending.clear();
        }
        debug!(
            target: "webshell::bridge",
            from = previous.as_str(),
            to = next.as_str(),
            "session state changed"
        );
    }
}
