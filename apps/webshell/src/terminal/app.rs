use std::io;
use std::time::Duration;

use chunk_transport::ByteChunk;
use tracing::{debug, info};

use crate::bridge::{PendingInputPolicy, SessionState};
use crate::emulator::{DETACH_BYTE, Emulator, TerminalEmulator, spawn_stdin_reader};
use crate::fixture::{
    self, ESCAPE_SHOWCASE, FixedDelay, KEYS_PROMPT, KEYS_PROMPT_DELAY, SHOWCASE_DELAY,
};
use crate::session::Session;
use crate::terminal::cli::{Cli, Command, ConnectArgs, PlaybackArgs};
use crate::terminal::error::CliError;

pub async fn run(cli: Cli) -> Result<(), CliError> {
    match cli.command {
        Some(Command::Connect(args)) => connect(args).await,
        Some(Command::Showcase(args)) => showcase(args).await,
        Some(Command::Keys(args)) => keys(args).await,
        None => connect(cli.connect).await,
    }
}

async fn connect(args: ConnectArgs) -> Result<(), CliError> {
    let policy = args.policy();
    if policy == (PendingInputPolicy::Buffer { max_chunks: 0 }) {
        return Err(CliError::InvalidArgument(
            "--pending-capacity must be at least 1 (use --pending drop to disable buffering)"
                .to_string(),
        ));
    }

    let config = args.websocket_config();
    let url = config.build_url()?;
    eprintln!("webshell: connecting to {url} (Ctrl-] to detach)");
    info!(target: "webshell::app", %url, frame = %config.frame, ?policy, "starting session");

    let session = Session::connect(config, TerminalEmulator::stdout(), policy)?;
    let input = spawn_stdin_reader(Some(DETACH_BYTE));
    let outcome = session.run(input).await;
    debug!(target: "webshell::app", ?outcome, "session finished");

    match outcome.state {
        SessionState::Failed => Err(CliError::SessionFailed(
            outcome.cause.unwrap_or_else(|| "unknown cause".to_string()),
        )),
        _ => {
            eprintln!("\r\nwebshell: connection closed");
            Ok(())
        }
    }
}

fn delay(args: &PlaybackArgs, default: Duration) -> FixedDelay {
    FixedDelay(args.delay_ms.map(Duration::from_millis).unwrap_or(default))
}

async fn showcase(args: PlaybackArgs) -> Result<(), CliError> {
    let mut emulator = TerminalEmulator::new(io::stdout(), false);
    emulator.attach()?;
    let result = fixture::play(ESCAPE_SHOWCASE, &mut emulator, &delay(&args, SHOWCASE_DELAY)).await;
    emulator.detach();
    let writes = result?;
    debug!(target: "webshell::app", writes, "showcase finished");
    Ok(())
}

async fn keys(args: PlaybackArgs) -> Result<(), CliError> {
    let mut emulator = TerminalEmulator::stdout();
    emulator.attach()?;
    let result = echo_keys(&mut emulator, &delay(&args, KEYS_PROMPT_DELAY)).await;
    emulator.detach();
    result
}

async fn echo_keys<E: Emulator>(emulator: &mut E, pacing: &FixedDelay) -> Result<(), CliError> {
    fixture::play(KEYS_PROMPT, emulator, pacing).await?;
    let mut input = spawn_stdin_reader(Some(DETACH_BYTE));
    while let Some(chunk) = input.recv().await {
        let line = fixture::describe_input(&chunk);
        emulator.write(&ByteChunk::from(line))?;
    }
    Ok(())
}
