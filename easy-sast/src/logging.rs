//! JSON line logging on stderr.
//!
//! Each record is one object with `timestamp`, `namespace`, `loglevel` and
//! `message`. The level starts at `WARNING` and is raised or lowered once the
//! effective configuration is known.

use log::{Level, LevelFilter};
use std::io::Write;

/// Level used until the configuration has been read.
pub const INITIAL_LOGLEVEL: &str = "WARNING";

/// Map a configured loglevel name to a filter. Unknown names fall back to
/// warnings.
#[must_use]
pub fn level_filter(loglevel: &str) -> LevelFilter {
    match loglevel.to_uppercase().as_str() {
        "DEBUG" => LevelFilter::Debug,
        "INFO" => LevelFilter::Info,
        "ERROR" | "CRITICAL" => LevelFilter::Error,
        _ => LevelFilter::Warn,
    }
}

fn level_name(level: Level) -> &'static str {
    match level {
        Level::Error => "ERROR",
        Level::Warn => "WARNING",
        Level::Info => "INFO",
        Level::Debug | Level::Trace => "DEBUG",
    }
}

/// Render one record as a JSON line.
#[must_use]
pub fn format_record(namespace: &str, level: Level, message: &str) -> String {
    serde_json::json!({
        "timestamp": chrono::Utc::now().format("%Y-%m-%d %H:%M:%S,%3f").to_string(),
        "namespace": namespace,
        "loglevel": level_name(level),
        "message": message,
    })
    .to_string()
}

/// Install the JSON logger at the initial level. Calling it again is a no-op.
pub fn init() {
    let result = env_logger::Builder::new()
        .filter_level(LevelFilter::Trace)
        .target(env_logger::Target::Stderr)
        .format(|buf, record| {
            writeln!(
                buf,
                "{}",
                format_record(record.target(), record.level(), &record.args().to_string())
            )
        })
        .try_init();

    if result.is_ok() {
        set_level(INITIAL_LOGLEVEL);
    }
}

/// Apply the effective loglevel.
pub fn set_level(loglevel: &str) {
    log::set_max_level(level_filter(loglevel));
}
