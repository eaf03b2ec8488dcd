use chunk_transport::{ByteChunk, Transport, TransportError, TransportResult};
use parking_lot::Mutex;

/// Transport double that records every send attempt.
#[derive(Default)]
pub struct MockTransport {
    inner: Mutex<MockState>,
}

#[derive(Default)]
struct MockState {
    sent: Vec<ByteChunk>,
    send_calls: usize,
    close_calls: usize,
    closed: bool,
    fail_with: Option<TransportError>,
}

impl MockTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Chunks accepted by `send`, in order.
    pub fn sent(&self) -> Vec<ByteChunk> {
        self.inner.lock().sent.clone()
    }

    /// Every `send` call, including rejected ones.
    pub fn send_calls(&self) -> usize {
        self.inner.lock().send_calls
    }

    pub fn close_calls(&self) -> usize {
        self.inner.lock().close_calls
    }

    /// Makes subsequent sends fail with `err`.
    pub fn fail_sends_with(&self, err: TransportError) {
        self.inner.lock().fail_with = Some(err);
    }
}

impl Transport for MockTransport {
    fn send(&self, chunk: ByteChunk) -> TransportResult<()> {
        let mut state = self.inner.lock();
        state.send_calls += 1;
        if let Some(err) = state.fail_with.clone() {
            return Err(err);
        }
        if state.closed {
            return Err(TransportError::Closed);
        }
        state.sent.push(chunk);
        Ok(())
    }

    fn close(&self) {
        let mut state = self.inner.lock();
        state.close_calls += 1;
        state.closed = true;
    }

    fn is_open(&self) -> bool {
        !self.inner.lock().closed
    }
}
