//! Tracing subscriber setup for the command line tool.
//!
//! Filtering follows `RUST_LOG` when it is set. Otherwise the level is
//! `info`, or `debug` in verbose mode.

use std::sync::Once;
use tracing::debug;
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

static INIT: Once = Once::new();

fn env_filter(verbose: bool) -> EnvFilter {
    let default_level = if verbose { "debug" } else { "info" };
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level))
}

/// Installs the global subscriber. Only the first call has an effect.
pub fn init_tracing(verbose: bool, json: bool) {
    INIT.call_once(|| {
        let registry = tracing_subscriber::registry().with(env_filter(verbose));
        let installed = if json {
            registry
                .with(
                    fmt::layer()
                        .json()
                        .with_writer(std::io::stderr)
                        .with_target(true)
                        .with_current_span(true),
                )
                .try_init()
        } else {
            registry
                .with(
                    fmt::layer()
                        .with_writer(std::io::stderr)
                        .with_target(verbose)
                        .with_file(verbose)
                        .with_line_number(verbose),
                )
                .try_init()
        };
        if installed.is_ok() {
            debug!(verbose, json, "Tracing initialized");
        }
    });
}
