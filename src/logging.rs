//! Tracing subscriber setup
//!
//! Verbosity comes from `VIDEOKB_LOG` (standard `EnvFilter` directives, so
//! per-module levels like `videokb=info,videokb::llm=debug` work), with a
//! `--verbose` escape hatch for the CLI.

use std::io::IsTerminal;
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

/// Environment variable holding filter directives.
pub const LOG_ENV: &str = "VIDEOKB_LOG";

fn use_color() -> bool {
    std::io::stderr().is_terminal() && std::env::var_os("NO_COLOR").is_none()
}

/// Initialize the global tracing subscriber.
///
/// # Errors
///
/// Returns an error if a subscriber is already installed.
pub fn init_tracing(verbose: bool) -> Result<(), Box<dyn std::error::Error>> {
    let env_filter = EnvFilter::try_from_env(LOG_ENV)
        .or_else(|_| {
            if verbose {
                EnvFilter::try_new("videokb=debug,info")
            } else {
                EnvFilter::try_new("videokb=info,warn")
            }
        })
        .unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::registry()
        .with(env_filter)
        .with(
            fmt::layer()
                .with_writer(std::io::stderr)
                .with_target(verbose)
                .with_ansi(use_color())
                .compact(),
        )
        .try_init()?;

    Ok(())
}
