//! Paced playback of a fixed string, used by the `showcase` and `keys`
//! commands to show how a terminal renders escape sequences.
//!
//! Playback writes one `char` at a time. This is a presentation trick only;
//! the relay path never splits chunks.

use std::io;
use std::time::Duration;

use async_trait::async_trait;
use chunk_transport::ByteChunk;

use crate::emulator::Emulator;

pub const SHOWCASE_DELAY: Duration = Duration::from_millis(2);
pub const KEYS_PROMPT_DELAY: Duration = Duration::from_millis(100);

/// Text interleaved with SGR, clear-screen and cursor-motion sequences.
/// The last line is printed below and to the right of the `*`.
pub const ESCAPE_SHOWCASE: &str = concat!(
    "Plain UTF-8 text (including \u{4e2d}\u{6587}) is rendered as-is.\r\n",
    "Inside a terminal a line break needs \\r (carriage return) and \\n (line feed).\r\n",
    "Escape codes decorate text: \x1B[1;3;31mbold italic red foreground\x1B[0m\r\n",
    "    \\x1B (ESC) tells the terminal that a command follows\r\n",
    "    [ makes it a control sequence (CSI) that takes parameters\r\n",
    "    1;3;31 means 1 = bold, 3 = italic, 31 = red foreground\r\n",
    "    m ends the parameters; the style applies to the text after it\r\n",
    "    \\x1B[0m is another CSI command: 0 resets every attribute\r\n",
    "    In short, \\x1B[n;n;...m sets how the next text is drawn\r\n",
    "Besides CSI there are other commands, for example:\r\n",
    "    \\x1Bc resets the screen, much like `clear`\r\n",
    "    \\x1BD (index) and \\x1BE (next line)\r\n",
    "    cursor motion:\r\n",
    "        \\x1B[1A up one row\r\n",
    "        \\x1B[1B down one row\r\n",
    "        \\x1B[1C right one column\r\n",
    "        \\x1B[1D left one column *\x1B[1B\x1B[1C",
    "this text starts below and to the right of the *\r\n",
);

pub const KEYS_PROMPT: &str =
    "Press keys to see the bytes your terminal sends (Ctrl-] to quit):\r\n";

/// Pause inserted after every character during playback.
#[async_trait]
pub trait Pacing: Send + Sync {
    async fn pause(&self);
}

/// No pause at all.
#[derive(Debug, Clone, Copy, Default)]
pub struct Immediate;

#[async_trait]
impl Pacing for Immediate {
    async fn pause(&self) {}
}

#[derive(Debug, Clone, Copy)]
pub struct FixedDelay(pub Duration);

#[async_trait]
impl Pacing for FixedDelay {
    async fn pause(&self) {
        if !self.0.is_zero() {
            tokio::time::sleep(self.0).await;
        }
    }
}

/// Writes `text` to the emulator one character at a time, in order.
/// Returns the number of writes.
pub async fn play<E>(text: &str, emulator: &mut E, pacing: &dyn Pacing) -> io::Result<usize>
where
    E: Emulator + ?Sized,
{
    let mut writes = 0;
    let mut buf = [0u8; 4];
    for ch in text.chars() {
        let encoded: &str = ch.encode_utf8(&mut buf);
        emulator.write(&ByteChunk::from(encoded))?;
        writes += 1;
        pacing.pause().await;
    }
    Ok(writes)
}

/// One line describing an input chunk: its JSON string form and raw bytes,
/// e.g. `"\u001b[A" [27, 91, 65]`.
pub fn describe_input(chunk: &ByteChunk) -> String {
    format!("{}\r\n", chunk.describe())
}
