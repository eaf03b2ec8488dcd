use std::io::{Read, Write};

use chunk_transport::ByteChunk;
use portable_pty::{native_pty_system, Child, CommandBuilder, MasterPty, PtySize};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::config::HostConfig;
use crate::HostError;

/// Bytes read from the pseudo-terminal per output chunk.
pub const READ_CHUNK: usize = 1024;

/// Channels to a running child process.
///
/// `output` yields whatever the process printed, one chunk per read, and
/// ends when the process exits. Chunks sent on `input` are written in order.
pub struct ProcessIo {
    pub input: mpsc::UnboundedSender<ByteChunk>,
    pub output: mpsc::UnboundedReceiver<ByteChunk>,
    pub handle: Box<dyn ProcessHandle>,
}

pub trait ProcessHandle: Send {
    /// Kills the process if it is still running. Idempotent.
    fn terminate(&mut self);
}

/// Starts one process per accepted connection.
pub trait ProcessSpawner: Send + Sync + 'static {
    fn spawn(&self) -> Result<ProcessIo, HostError>;
}

/// Runs the configured shell on a fresh pseudo-terminal.
#[derive(Debug, Clone)]
pub struct PtySpawner {
    shell: String,
    args: Vec<String>,
    size: PtySize,
}

impl PtySpawner {
    pub fn new(shell: impl Into<String>, args: Vec<String>) -> Self {
        Self {
            shell: shell.into(),
            args,
            size: PtySize {
                rows: 24,
                cols: 80,
                pixel_width: 0,
                pixel_height: 0,
            },
        }
    }

    pub fn from_config(config: &HostConfig) -> Self {
        Self::new(config.shell.clone(), config.shell_args.clone())
    }

    fn command_line(&self) -> String {
        std::iter::once(self.shell.as_str())
            .chain(self.args.iter().map(String::as_str))
            .collect::<Vec<_>>()
            .join(" ")
    }

    fn spawn_error(&self, err: impl std::fmt::Display) -> HostError {
        HostError::Spawn {
            command: self.command_line(),
            reason: err.to_string(),
        }
    }
}

impl ProcessSpawner for PtySpawner {
    fn spawn(&self) -> Result<ProcessIo, HostError> {
        let pair = native_pty_system()
            .openpty(self.size)
            .map_err(|err| self.spawn_error(err))?;

        let mut cmd = CommandBuilder::new(&self.shell);
        cmd.args(&self.args);
        if std::env::var_os("TERM").is_none() {
            cmd.env("TERM", "xterm-256color");
        }
        let child = pair
            .slave
            .spawn_command(cmd)
            .map_err(|err| self.spawn_error(err))?;
        // the master only sees EOF once no slave handle is left open here
        drop(pair.slave);

        let reader = pair
            .master
            .try_clone_reader()
            .map_err(|err| self.spawn_error(err))?;
        let writer = pair
            .master
            .take_writer()
            .map_err(|err| self.spawn_error(err))?;

        let (output_tx, output_rx) = mpsc::unbounded_channel();
        let (input_tx, input_rx) = mpsc::unbounded_channel();

        std::thread::Builder::new()
            .name("pty-reader".into())
            .spawn(move || pump_output(reader, output_tx))
            .map_err(|err| self.spawn_error(err))?;
        std::thread::Builder::new()
            .name("pty-writer".into())
            .spawn(move || pump_input(writer, input_rx))
            .map_err(|err| self.spawn_error(err))?;

        debug!(target: "webshell_host::process", command = %self.command_line(), "spawned");
        Ok(ProcessIo {
            input: input_tx,
            output: output_rx,
            handle: Box::new(PtyHandle {
                child: Some(child),
                _master: pair.master,
            }),
        })
    }
}

fn pump_output(mut reader: Box<dyn Read + Send>, output: mpsc::UnboundedSender<ByteChunk>) {
    let mut buf = [0u8; READ_CHUNK];
    loop {
        match reader.read(&mut buf) {
            Ok(0) => break,
            Ok(n) => {
                if output.send(ByteChunk::from(&buf[..n])).is_err() {
                    break;
                }
            }
            Err(err) if err.kind() == std::io::ErrorKind::Interrupted => continue,
            // Linux reports EIO on the master once the child side is gone
            Err(err) => {
                debug!(target: "webshell_host::process", error = %err, "pty read ended");
                break;
            }
        }
    }
}

fn pump_input(mut writer: Box<dyn Write + Send>, mut input: mpsc::UnboundedReceiver<ByteChunk>) {
    while let Some(chunk) = input.blocking_recv() {
        if let Err(err) = writer.write_all(&chunk).and_then(|_| writer.flush()) {
            warn!(target: "webshell_host::process", error = %err, "pty write failed");
            break;
        }
    }
}

struct PtyHandle {
    child: Option<Box<dyn Child + Send + Sync>>,
    _master: Box<dyn MasterPty + Send>,
}

impl ProcessHandle for PtyHandle {
    /// Kills the child and reaps it on a separate thread, so callers on the
    /// async runtime never block in `wait`.
    fn terminate(&mut self) {
        let Some(mut child) = self.child.take() else {
            return;
        };
        if let Ok(Some(_)) = child.try_wait() {
            return;
        }
        if let Err(err) = child.kill() {
            debug!(target: "webshell_host::process", error = %err, "kill failed");
        }
        let reaper = std::thread::Builder::new()
            .name("pty-reaper".into())
            .spawn(move || {
                let status = child.wait();
                debug!(target: "webshell_host::process", ?status, "child reaped");
            });
        if let Err(err) = reaper {
            warn!(target: "webshell_host::process", error = %err, "failed to start reaper thread");
        }
    }
}

impl Drop for PtyHandle {
    fn drop(&mut self) {
        self.terminate();
    }
}

/// Input that makes an [`EchoSpawner`] process exit.
pub const ECHO_EXIT: &str = "exit\r";

/// Stand-in process that prints an optional greeting and then echoes every
/// input chunk back unchanged, until it reads [`ECHO_EXIT`].
#[derive(Debug, Clone, Default)]
pub struct EchoSpawner {
    greeting: Option<ByteChunk>,
}

impl EchoSpawner {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_greeting(greeting: impl Into<ByteChunk>) -> Self {
        Self {
            greeting: Some(greeting.into()),
        }
    }
}

impl ProcessSpawner for EchoSpawner {
    fn spawn(&self) -> Result<ProcessIo, HostError> {
        let (output_tx, output_rx) = mpsc::unbounded_channel();
        let (input_tx, mut input_rx) = mpsc::unbounded_channel::<ByteChunk>();
        let greeting = self.greeting.clone();

        let task = tokio::spawn(async move {
            if let Some(greeting) = greeting {
                let _ = output_tx.send(greeting);
            }
            while let Some(chunk) = input_rx.recv().await {
                if chunk == ECHO_EXIT {
                    break;
                }
                if output_tx.send(chunk).is_err() {
                    break;
                }
            }
        });
        Ok(ProcessIo {
            input: input_tx,
            output: output_rx,
            handle: Box::new(EchoHandle(task)),
        })
    }
}

struct EchoHandle(JoinHandle<()>);

impl ProcessHandle for EchoHandle {
    fn terminate(&mut self) {
        self.0.abort();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test_timeout::tokio_timeout_test(5)]
    async fn echo_process_greets_then_echoes_until_exit() {
        let mut process = EchoSpawner::with_greeting("$ ").spawn().unwrap();
        assert_eq!(process.output.recv().await.unwrap(), "$ ");

        process.input.send(ByteChunk::from("ls\r")).unwrap();
        assert_eq!(process.output.recv().await.unwrap(), "ls\r");

        process.input.send(ByteChunk::from(ECHO_EXIT)).unwrap();
        assert!(process.output.recv().await.is_none());
    }

    #[test_timeout::tokio_timeout_test(5)]
    async fn terminating_the_echo_process_ends_its_output() {
        let mut process = EchoSpawner::new().spawn().unwrap();
        process.handle.terminate();
        assert!(process.output.recv().await.is_none());
    }

    #[test_timeout::tokio_timeout_test(10)]
    async fn terminating_a_running_shell_returns_promptly() {
        let spawner = PtySpawner::new("/bin/sh", vec!["-c".into(), "exec sleep 30".into()]);
        // hosts without a pty device cannot run this
        let Ok(mut process) = spawner.spawn() else {
            return;
        };
        let started = std::time::Instant::now();
        process.handle.terminate();
        assert!(started.elapsed() < std::time::Duration::from_secs(1));
        while process.output.recv().await.is_some() {}
        process.handle.terminate();
    }

    #[test_timeout::timeout(10)]
    fn spawn_failure_names_the_command() {
        let spawner = PtySpawner::new("/nonexistent/webshell-shell", vec!["-il".into()]);
        match spawner.spawn() {
            Err(HostError::Spawn { command, .. }) => {
                assert_eq!(command, "/nonexistent/webshell-shell -il");
            }
            Err(other) => panic!("unexpected error {other}"),
            Ok(_) => panic!("spawning a missing program should fail"),
        }
    }
}
