//! `imo` entry point.
//!
//! Command-line front end over the override engine, backed by a JSON file
//! store (`~/.config/imo/overrides.json` unless `--store` is given).

mod commands;

use clap::Parser;
use commands::Cli;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
        )
        .init();

    let cli = Cli::parse();
    let code = cli.run().await?;
    if code != 0 {
        std::process::exit(code);
    }
    Ok(())
}
