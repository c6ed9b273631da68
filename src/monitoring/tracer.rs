/*!
 * Structured Tracing
 * Subscriber setup for the plugin binary
 *
 * stdout carries the CNI reply, so events go to stderr or to a log file.
 */

use std::fs::OpenOptions;
use std::sync::Mutex;
use tracing::warn;
use tracing_subscriber::{
    fmt::writer::BoxMakeWriter, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter,
};

/// Filter directives, e.g. `debug` or `mycni::ipam=trace`
pub const LOG_FILTER_ENV: &str = "MYCNI_LOG";

/// `1` or `true` switches to JSON lines
pub const LOG_JSON_ENV: &str = "MYCNI_LOG_JSON";

/// Append events to this file instead of stderr
pub const LOG_FILE_ENV: &str = "MYCNI_LOG_FILE";

/// Install the global subscriber
///
/// Environment variables:
/// - MYCNI_LOG: Set log level (default: info)
/// - MYCNI_LOG_JSON: Enable JSON output (default: false)
/// - MYCNI_LOG_FILE: Log file path (default: stderr)
///
/// Calling it twice is harmless; the second call leaves the first subscriber in place.
pub fn init_tracing() {
    let env_filter =
        EnvFilter::try_from_env(LOG_FILTER_ENV).unwrap_or_else(|_| EnvFilter::new("info"));

    let use_json = std::env::var(LOG_JSON_ENV)
        .map(|v| v == "1" || v == "true")
        .unwrap_or(false);

    let mut open_error = None;
    let (writer, ansi) = match std::env::var(LOG_FILE_ENV).ok().filter(|p| !p.is_empty()) {
        Some(path) => match OpenOptions::new().create(true).append(true).open(&path) {
            Ok(file) => (BoxMakeWriter::new(Mutex::new(file)), false),
            Err(e) => {
                open_error = Some((path, e));
                (BoxMakeWriter::new(std::io::stderr), true)
            }
        },
        None => (BoxMakeWriter::new(std::io::stderr), true),
    };

    let registry = tracing_subscriber::registry().with(env_filter);

    let installed = if use_json {
        registry
            .with(
                tracing_subscriber::fmt::layer()
                    .json()
                    .with_writer(writer)
                    .with_target(true)
                    .with_current_span(true)
                    .with_span_list(true),
            )
            .try_init()
    } else {
        registry
            .with(
                tracing_subscriber::fmt::layer()
                    .with_writer(writer)
                    .with_ansi(ansi)
                    .with_target(true)
                    .compact(),
            )
            .try_init()
    };

    if installed.is_ok() {
        if let Some((path, e)) = open_error {
            warn!(path = %path, error = %e, "cannot open log file, logging to stderr");
        }
    }
}
