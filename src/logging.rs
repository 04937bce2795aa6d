use std::fs::File;
use std::path::Path;
use std::sync::Mutex;
use anyhow::{Context, Result, anyhow};

/// Route `tracing` output to `path`, truncating it first.
///
/// The terminal belongs to the UI, so nothing is ever logged to stdout or
/// stderr. Filter with `RUST_LOG` (default `info`).
pub fn init(path: &Path) -> Result<()> {
    let log_file = File::create(path)
        .with_context(|| format!("failed to open log file '{}'", path.display()))?;

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()),
        )
        .with_ansi(false)
        .with_writer(Mutex::new(log_file))
        .try_init()
        .map_err(|error| anyhow!("failed to install logger: {error}"))?;

    Ok(())
}
