use clap::{Args, Parser, Subcommand, ValueEnum};
use std::path::PathBuf;

use chunk_transport::FrameKind;

use crate::bridge::{DEFAULT_PENDING_CHUNKS, PendingInputPolicy};
use crate::telemetry::logging::{LogConfig, LogLevel};
use crate::transport::websocket::{DEFAULT_URL, WebSocketConfig};

#[derive(Parser, Debug)]
#[command(
    name = "webshell",
    about = "Attach the local terminal to a remote shell over WebSocket",
    author,
    version,
    args_conflicts_with_subcommands = true
)]
pub struct Cli {
    #[command(flatten)]
    pub logging: LoggingArgs,

    /// Used when no subcommand is given
    #[command(flatten)]
    pub connect: ConnectArgs,

    #[command(subcommand)]
    pub command: Option<Command>,
}

#[derive(Args, Debug, Clone)]
pub struct LoggingArgs {
    #[arg(
        long = "log-level",
        value_enum,
        global = true,
        env = "WEBSHELL_LOG_LEVEL",
        default_value_t = LogLevel::Warn,
        help = "Minimum log level (error, warn, info, debug, trace)"
    )]
    pub level: LogLevel,

    #[arg(
        long = "log-file",
        value_name = "PATH",
        global = true,
        env = "WEBSHELL_LOG_FILE",
        help = "Write logs to the specified file instead of stderr"
    )]
    pub file: Option<PathBuf>,
}

impl LoggingArgs {
    pub fn to_config(&self) -> LogConfig {
        LogConfig {
            level: self.level,
            file: self.file.clone(),
        }
    }
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Relay this terminal to a remote shell (default when no subcommand given)
    Connect(ConnectArgs),
    /// Play the escape-sequence walkthrough locally
    Showcase(PlaybackArgs),
    /// Print the bytes each key press produces
    Keys(PlaybackArgs),
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, ValueEnum)]
pub enum PendingMode {
    /// Discard input typed before the connection opens
    Drop,
    /// Queue it and send it once the connection opens
    Buffer,
}

#[derive(Args, Debug, Clone)]
pub struct ConnectArgs {
    #[arg(
        long,
        env = "WEBSHELL_URL",
        default_value = DEFAULT_URL,
        help = "WebSocket URL, or a bare host:port"
    )]
    pub url: String,

    #[arg(long, value_name = "PATH", help = "Path appended to the URL")]
    pub path: Option<String>,

    #[arg(long, help = "Use wss:// for a bare host:port")]
    pub tls: bool,

    #[arg(
        long,
        default_value_t = FrameKind::Binary,
        help = "WebSocket message type for keystrokes (text or binary)"
    )]
    pub frame: FrameKind,

    #[arg(long, value_enum, default_value_t = PendingMode::Buffer)]
    pub pending: PendingMode,

    #[arg(
        long = "pending-capacity",
        value_name = "CHUNKS",
        default_value_t = DEFAULT_PENDING_CHUNKS,
        help = "Most chunks held while connecting"
    )]
    pub pending_capacity: usize,
}

impl ConnectArgs {
    pub fn policy(&self) -> PendingInputPolicy {
        match self.pending {
            PendingMode::Drop => PendingInputPolicy::Drop,
            PendingMode::Buffer => PendingInputPolicy::Buffer {
                max_chunks: self.pending_capacity,
            },
        }
    }

    pub fn websocket_config(&self) -> WebSocketConfig {
        let mut config = WebSocketConfig::new(self.url.clone()).with_frame(self.frame);
        if self.tls {
            config = config.with_tls(true);
        }
        if let Some(path) = self.path.as_deref() {
            config = config.with_path(path);
        }
        config
    }
}

#[derive(Args, Debug, Clone)]
pub struct PlaybackArgs {
    /// Pause between characters, in milliseconds (defaults per command)
    #[arg(long = "delay-ms", value_name = "MS")]
    pub delay_ms: Option<u64>,
}
