/*!
 * Monitoring
 * Tracing subscriber for the plugin
 */

mod tracer;

pub use tracer::{init_tracing, LOG_FILE_ENV, LOG_FILTER_ENV, LOG_JSON_ENV};
