//! Telemetry initialization (tracing/tracing-subscriber).
//!
//! Behavior:
//! - LOG_LEVEL controls the filter (e.g. "debug" or detailed directives like
//!   "info,generation=debug,repository=debug,tower_http=info").
//! - LOG_FORMAT selects "pretty" (default) or "json" structured logs.
//!
//! Notes:
//! - Logs go to stderr so CLI output on stdout (batch specs, paths) stays pipeable.
//! - We include targets in the output to disambiguate pipeline stages.

use tracing_subscriber::EnvFilter;

const DEFAULT_FILTER: &str = "info,lesson_forge=info,generation=info,repository=info,tower_http=info,axum=info";

pub fn init_tracing(verbose: bool) {
    let filter = EnvFilter::try_from_env("LOG_LEVEL").unwrap_or_else(|_| {
        if verbose {
            EnvFilter::new("debug,hyper=info,reqwest=info")
        } else {
            EnvFilter::new(DEFAULT_FILTER)
        }
    });

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(true)
        .with_file(verbose)
        .with_line_number(verbose);

    // Choose JSON vs pretty; don't try to store different layer types.
    match std::env::var("LOG_FORMAT").as_deref() {
        Ok("json") => {
            builder.json().init();
        }
        _ => {
            builder.init();
        }
    }
}
