use anyhow::Context;
use clap::Parser;
use tracing::info;
use tracing_subscriber::EnvFilter;

use webshell_host::config::HostArgs;
use webshell_host::server;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // RUST_LOG wins; info by default so connections show up
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let config = HostArgs::parse().into_config();
    info!(
        addr = %config.addr,
        shell = %config.shell,
        args = ?config.shell_args,
        frame = %config.frame,
        "starting webshell host"
    );

    server::serve(config).await.context("webshell host stopped")
}
