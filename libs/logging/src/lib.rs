#![cfg_attr(test, allow(clippy::unwrap_used))]

mod dyn_err;
mod err_with_sources;
mod log_unwrap;

use anyhow::{Context, Result};
use tracing::{subscriber::DefaultGuard, Subscriber};
use tracing_log::LogTracer;
use tracing_subscriber::{
    filter::ParseError, fmt, layer::SubscriberExt as _, registry::LookupSpan,
    util::SubscriberInitExt, EnvFilter, Layer, Registry,
};

pub use dyn_err::{anyhow_dyn_err, std_dyn_err};
pub use err_with_sources::{err_with_src, ErrorWithSources};
pub use log_unwrap::LogUnwrap;

/// Registers a global subscriber for ambient debug/trace logs.
///
/// This is independent from the structured measurement event log (see `rbmk-observe`),
/// which has its own closed schema and is written separately.
pub fn setup_global_subscriber<L>(additional_layer: L) -> Result<()>
where
    L: Layer<Registry> + Send + Sync,
{
    let directives = std::env::var("RUST_LOG").unwrap_or_default();

    let subscriber = Registry::default()
        .with(
            additional_layer
                .with_filter(try_filter(&directives).context("Failed to parse directives")?),
        )
        .with(
            fmt::layer()
                .with_target(true)
                .with_writer(std::io::stderr)
                .with_filter(try_filter(&directives).context("Failed to parse directives")?),
        );
    tracing::subscriber::set_global_default(subscriber).context("Could not set global default")?;
    LogTracer::init().context("Failed to init LogTracer")?;

    Ok(())
}

/// Constructs an opinionated [`EnvFilter`] with some crates already silenced.
pub fn try_filter(directives: &str) -> Result<EnvFilter, ParseError> {
    /// Silences crates whose debug output is rarely what you want when chasing
    /// an `rbmk`-level bug.
    const IRRELEVANT_CRATES: &str = "rustls=warn,h2=warn,hyper_util=warn";

    if directives.is_empty() {
        return EnvFilter::try_new(IRRELEVANT_CRATES);
    }

    EnvFilter::try_new(format!("{IRRELEVANT_CRATES},{directives}"))
}

/// Initialises a logger scoped to the current test thread.
pub fn test(directives: &str) -> DefaultGuard {
    tracing_subscriber::fmt()
        .with_test_writer()
        .with_env_filter(directives)
        .set_default()
}

pub fn test_global(directives: &str) {
    tracing::subscriber::set_global_default(
        tracing_subscriber::fmt()
            .with_test_writer()
            .with_env_filter(directives)
            .finish(),
    )
    .ok();
}

/// A no-op [`Layer`] for callers that don't need an `additional_layer`.
pub fn noop_layer<S>() -> impl Layer<S>
where
    S: Subscriber + for<'a> LookupSpan<'a>,
{
    tracing_subscriber::layer::Identity::new()
}
