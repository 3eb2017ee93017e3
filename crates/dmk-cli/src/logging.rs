//! Logging configuration using tracing

use tracing_subscriber::{EnvFilter, fmt, prelude::*};

/// Initialize the logging subsystem.
///
/// Logs go to stderr so that snapshots printed on stdout stay parseable.
/// The level is controlled by the `DMK_LOG` environment variable.
///
/// # Examples
/// ```bash
/// DMK_LOG=debug dmk open-app Bitcoin
/// DMK_LOG=dmk_action=trace dmk get-status --locked
/// ```
pub fn init() -> anyhow::Result<()> {
    let env_filter = EnvFilter::try_from_env("DMK_LOG").unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::registry()
        .with(env_filter)
        .with(
            fmt::layer()
                .with_writer(std::io::stderr)
                .with_target(true)
                .with_thread_ids(false),
        )
        .try_init()?;

    Ok(())
}
