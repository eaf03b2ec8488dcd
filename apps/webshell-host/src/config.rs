use std::net::{IpAddr, Ipv4Addr, SocketAddr};

use chunk_transport::FrameKind;
use clap::Parser;

pub const DEFAULT_PORT: u16 = 8080;
pub const FALLBACK_SHELL: &str = "/bin/bash";
/// Interactive login shell.
pub const DEFAULT_SHELL_ARGS: &[&str] = &["-il"];

#[derive(Parser, Debug, Clone)]
#[command(
    name = "webshell-host",
    about = "Serve a shell on a pseudo-terminal to webshell clients over WebSocket",
    version
)]
pub struct HostArgs {
    #[arg(long, env = "WEBSHELL_HOST_BIND", default_value = "0.0.0.0")]
    pub bind: IpAddr,

    #[arg(long, env = "WEBSHELL_HOST_PORT", default_value_t = DEFAULT_PORT)]
    pub port: u16,

    #[arg(
        long,
        env = "WEBSHELL_SHELL",
        help = "Program to run for each connection (defaults to $SHELL, then /bin/bash)"
    )]
    pub shell: Option<String>,

    #[arg(
        long,
        default_value_t = FrameKind::Text,
        help = "WebSocket message type for shell output (text or binary)"
    )]
    pub frame: FrameKind,

    /// Arguments passed to the shell (default: -il)
    #[arg(trailing_var_arg = true, allow_hyphen_values = true)]
    pub shell_args: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HostConfig {
    pub addr: SocketAddr,
    pub shell: String,
    pub shell_args: Vec<String>,
    pub frame: FrameKind,
}

impl Default for HostConfig {
    fn default() -> Self {
        Self {
            addr: SocketAddr::new(IpAddr::V4(Ipv4Addr::UNSPECIFIED), DEFAULT_PORT),
            shell: resolve_shell(None, std::env::var("SHELL").ok()),
            shell_args: default_shell_args(),
            frame: FrameKind::Text,
        }
    }
}

impl HostArgs {
    pub fn into_config(self) -> HostConfig {
        let shell_args = if self.shell_args.is_empty() {
            default_shell_args()
        } else {
            self.shell_args
        };
        HostConfig {
            addr: SocketAddr::new(self.bind, self.port),
            shell: resolve_shell(self.shell, std::env::var("SHELL").ok()),
            shell_args,
            frame: self.frame,
        }
    }
}

fn default_shell_args() -> Vec<String> {
    DEFAULT_SHELL_ARGS.iter().map(|arg| arg.to_string()).collect()
}

pub fn resolve_shell(explicit: Option<String>, env_shell: Option<String>) -> String {
    explicit
        .into_iter()
        .chain(env_shell)
        .map(|shell| shell.trim().to_string())
        .find(|shell| !shell.is_empty())
        .unwrap_or_else(|| FALLBACK_SHELL.to_string())
}
