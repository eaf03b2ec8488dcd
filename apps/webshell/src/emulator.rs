use std::io::{self, Read, Write};
use std::sync::Arc;

use chunk_transport::ByteChunk;
use parking_lot::Mutex;
use tokio::sync::mpsc;
use tracing::{debug, warn};

/// Ctrl-] ends the local input stream instead of being forwarded.
pub const DETACH_BYTE: u8 = 0x1d;

const READ_BUFFER: usize = 1024;

/// The terminal side of a session: renders inbound bytes.
///
/// Input travels the other way through a channel of [`ByteChunk`]s, so an
/// emulator only has to render and, optionally, mount itself on a display.
pub trait Emulator: Send {
    fn write(&mut self, chunk: &ByteChunk) -> io::Result<()>;

    /// Called once before the session starts relaying.
    fn attach(&mut self) -> io::Result<()> {
        Ok(())
    }

    fn detach(&mut self) {}
}

impl<E: Emulator + ?Sized> Emulator for Box<E> {
    fn write(&mut self, chunk: &ByteChunk) -> io::Result<()> {
        (**self).write(chunk)
    }

    fn attach(&mut self) -> io::Result<()> {
        (**self).attach()
    }

    fn detach(&mut self) {
        (**self).detach();
    }
}

/// Restores cooked mode when dropped.
pub struct RawModeGuard(());

impl RawModeGuard {
    pub fn enable() -> io::Result<Self> {
        crossterm::terminal::enable_raw_mode()?;
        Ok(Self(()))
    }
}

impl Drop for RawModeGuard {
    fn drop(&mut self) {
        if let Err(err) = crossterm::terminal::disable_raw_mode() {
            warn!(target: "webshell::emulator", error = %err, "failed to restore terminal mode");
        }
    }
}

/// Uses the local terminal as the emulator: stdout renders, raw-mode stdin
/// supplies keystrokes (see [`spawn_stdin_reader`]).
pub struct TerminalEmulator<W: Write + Send> {
    out: W,
    raw_mode: bool,
    guard: Option<RawModeGuard>,
}

impl TerminalEmulator<io::Stdout> {
    pub fn stdout() -> Self {
        Self::new(io::stdout(), true)
    }
}

impl<W: Write + Send> TerminalEmulator<W> {
    pub fn new(out: W, raw_mode: bool) -> Self {
        Self {
            out,
            raw_mode,
            guard: None,
        }
    }
}

impl<W: Write + Send> Emulator for TerminalEmulator<W> {
    fn write(&mut self, chunk: &ByteChunk) -> io::Result<()> {
        self.out.write_all(chunk)?;
        self.out.flush()
    }

    fn attach(&mut self) -> io::Result<()> {
        if self.raw_mode && self.guard.is_none() {
            self.guard = Some(RawModeGuard::enable()?);
        }
        Ok(())
    }

    fn detach(&mut self) {
        self.guard = None;
        let _ = self.out.flush();
    }
}

/// Emulator double that keeps every rendered chunk. Clones share the log.
#[derive(Clone, Default)]
pub struct RecordingEmulator {
    written: Arc<Mutex<Vec<ByteChunk>>>,
    attached: Arc<Mutex<bool>>,
    fail_writes: bool,
}

impl RecordingEmulator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every write fails with `BrokenPipe`.
    pub fn failing() -> Self {
        Self {
            fail_writes: true,
            ..Self::default()
        }
    }

    pub fn written(&self) -> Vec<ByteChunk> {
        self.written.lock().clone()
    }

    pub fn is_attached(&self) -> bool {
        *self.attached.lock()
    }
}

impl Emulator for RecordingEmulator {
    fn write(&mut self, chunk: &ByteChunk) -> io::Result<()> {
        if self.fail_writes {
            return Err(io::Error::new(io::ErrorKind::BrokenPipe, "display detached"));
        }
        self.written.lock().push(chunk.clone());
        Ok(())
    }

    fn attach(&mut self) -> io::Result<()> {
        *self.attached.lock() = true;
        Ok(())
    }

    fn detach(&mut self) {
        *self.attached.lock() = false;
    }
}

/// Reads stdin on a dedicated thread and yields each read as one chunk.
/// The stream ends at EOF or when `detach` is read.
pub fn spawn_stdin_reader(detach: Option<u8>) -> mpsc::UnboundedReceiver<ByteChunk> {
    let (tx, rx) = mpsc::unbounded_channel();
    let spawned = std::thread::Builder::new()
        .name("webshell-stdin".into())
        .spawn(move || {
            if let Err(err) = read_input(io::stdin().lock(), detach, &tx) {
                warn!(target: "webshell::emulator", error = %err, "stdin read failed");
            }
        });
    if let Err(err) = spawned {
        warn!(target: "webshell::emulator", error = %err, "failed to start stdin reader");
    }
    rx
}

pub fn read_input<R: Read>(
    mut reader: R,
    detach: Option<u8>,
    tx: &mpsc::UnboundedSender<ByteChunk>,
) -> io::Result<()> {
    let mut buf = [0u8; READ_BUFFER];
    loop {
        let n = match reader.read(&mut buf) {
            Ok(0) => return Ok(()),
            Ok(n) => n,
            Err(err) if err.kind() == io::ErrorKind::Interrupted => continue,
            Err(err) => return Err(err),
        };
        let data = &buf[..n];
        let detach_at = detach.and_then(|key| data.iter().position(|byte| *byte == key));
        let forward = match detach_at {
            Some(at) => &data[..at],
            None => data,
        };
        if !forward.is_empty() && tx.send(ByteChunk::from(forward)).is_err() {
            return Ok(());
        }
        if detach_at.is_some() {
            debug!(target: "webshell::emulator", "detach key pressed");
            return Ok(());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[test]
    fn terminal_emulator_writes_bytes_verbatim() {
        let mut emulator = TerminalEmulator::new(Vec::new(), false);
        emulator.attach().unwrap();
        emulator.write(&ByteChunk::from("\x1b[1Ahi")).unwrap();
        emulator.write(&ByteChunk::from(&[0xffu8, 0x00][..])).unwrap();
        assert_eq!(emulator.out, b"\x1b[1Ahi\xff\x00".to_vec());
    }

    #[test]
    fn read_input_stops_at_detach_key() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        read_input(Cursor::new(b"ls\r\x1dignored".to_vec()), Some(DETACH_BYTE), &tx).unwrap();
        assert_eq!(rx.try_recv().unwrap(), "ls\r");
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn read_input_forwards_everything_without_detach_key() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        read_input(Cursor::new(b"\x1b[A\x03".to_vec()), None, &tx).unwrap();
        assert_eq!(rx.try_recv().unwrap(), "\x1b[A\x03");
    }
}
