//! Logging and tracing utilities for providers.
//!
//! Every session call runs inside a `provider.<call>` span and reports its
//! outcome as `tracing` events. This module installs a subscriber for them.
//! All logs are written to **stderr**, since an engine that runs providers
//! as plugins usually owns stdout.
//!
//! # Quick Start
//!
//! ```ignore
//! use hemmer_provider_protocol::{init_logging, ProviderSession};
//!
//! #[tokio::main]
//! async fn main() {
//!     // Initialize logging (reads RUST_LOG env var)
//!     init_logging();
//!
//!     let session = ProviderSession::new(MyProvider::new());
//!     tracing::info!("Session started");
//! }
//! ```
//!
//! # Environment Variables
//!
//! - `RUST_LOG`: Controls log levels (e.g., `info`, `debug`, `hemmer_provider_protocol=debug`)
//!
//! ```bash
//! # Show the entry of every protocol call
//! RUST_LOG=hemmer_provider_protocol=debug ./my-engine
//! ```

use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// Initialize the default logging subscriber.
///
/// This sets up a `tracing` subscriber that:
/// - Writes to **stderr**
/// - Respects the `RUST_LOG` environment variable for filtering
/// - Defaults to `info` level if `RUST_LOG` is not set
/// - Uses a compact, human-readable format
///
/// # Panics
///
/// Panics if a global subscriber has already been set.
pub fn init_logging() {
    init_logging_with_default("info");
}

/// Initialize logging with a custom default level.
///
/// Like [`init_logging`], but `default_level` is used when `RUST_LOG` is
/// not set.
///
/// # Panics
///
/// Panics if a global subscriber has already been set.
///
/// # Example
///
/// ```ignore
/// use hemmer_provider_protocol::init_logging_with_default;
///
/// fn main() {
///     // Default to debug level if RUST_LOG is not set
///     init_logging_with_default("debug");
/// }
/// ```
pub fn init_logging_with_default(default_level: &str) {
    tracing_subscriber::registry()
        .with(env_filter(default_level))
        .with(stderr_layer())
        .init();
}

/// Try to initialize logging, returning false if already initialized.
///
/// Unlike [`init_logging`], this function does not panic if a subscriber
/// has already been set, which makes it safe to call from every test.
pub fn try_init_logging() -> bool {
    tracing_subscriber::registry()
        .with(env_filter("info"))
        .with(stderr_layer())
        .try_init()
        .is_ok()
}

fn env_filter(default_level: &str) -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level))
}

fn stderr_layer<S>() -> impl tracing_subscriber::Layer<S>
where
    S: tracing::Subscriber + for<'a> tracing_subscriber::registry::LookupSpan<'a>,
{
    fmt::layer()
        .with_writer(std::io::stderr)
        .with_target(true)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false)
}
