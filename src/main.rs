//! variant-forge CLI entry point.
//!
//! Initializes logging and delegates to the CLI module for command handling.

use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = variant_forge::cli::parse_cli();

    // Priority: RUST_LOG env var > --log-level (or --quiet) > default "info"
    let log_filter = cli.log_filter();

    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&log_filter)))
        .init();

    variant_forge::cli::run_with_cli(cli).await
}
