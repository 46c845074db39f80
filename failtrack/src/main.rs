use clap::Parser;
use failtrack::{codes, Cli, RunConfig};
use std::process::ExitCode;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

fn init_tracing(debug: bool) {
    let default_level = if debug { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    init_tracing(cli.debug);

    let config = match RunConfig::from_cli(&cli) {
        Ok(config) => config,
        Err(e) => {
            error!("failtrack: {}", e);
            return ExitCode::from(codes::CONFIG);
        }
    };

    match failtrack::run(&config).await {
        Ok(summary) => {
            info!(
                "No new failing tests ({} failed, {} issue(s) closed)",
                summary.failed_tests,
                summary.outcome.closed.len()
            );
            ExitCode::from(codes::SUCCESS)
        }
        Err(e) => {
            error!("failtrack: {}", e);
            ExitCode::from(e.exit_code())
        }
    }
}
