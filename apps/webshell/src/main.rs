use clap::Parser;
use webshell_client::telemetry::logging;
use webshell_client::terminal::{app, cli::Cli, error::CliError};

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    if let Err(err) = logging::init(&cli.logging.to_config()) {
        let err = CliError::from(err);
        eprintln!("webshell: {err}");
        std::process::exit(err.exit_code());
    }

    if let Err(err) = app::run(cli).await {
        eprintln!("\r\nwebshell: {err}");
        std::process::exit(err.exit_code());
    }
    // the stdin reader thread may still be parked in read()
    std::process::exit(0);
}
