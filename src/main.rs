mod app;
mod config;
mod geometry;
mod loader;
mod pipeline;
mod sinks;
mod source;
mod walker;

use anyhow::{Result, bail};
use clap::Parser;

use app::Cli;

fn main() -> Result<()> {
    let cli = Cli::parse();

    let level = if cli.verbose {
        tracing::Level::INFO
    } else {
        tracing::Level::WARN
    };

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::builder()
                .with_default_directive(level.into())
                .from_env_lossy(),
        )
        .with_writer(std::io::stderr)
        .init();

    if cli.check {
        return app::check_connection(&cli);
    }

    let start = std::time::Instant::now();
    let summary = app::run(&cli)?;
    summary.log();

    let elapsed = start.elapsed();
    tracing::info!("Done in {:.2}s", elapsed.as_secs_f64());

    if cli.fail_on_error && summary.has_failures() {
        bail!(
            "Run: {} of {} files failed, {} batches rejected",
            summary.failed_files(),
            summary.files.len(),
            summary.load_totals().failed
        );
    }

    Ok(())
}
