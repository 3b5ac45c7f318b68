use crate::config::{LogFormat, LogLevel};
use crate::error::ServerError;
use chrono::{DateTime, Utc};
use log::Record;
use serde_json::json;
use std::io::Write;

/// Initializes the global logger. `RUST_LOG` still takes precedence over `level`.
pub fn init(level: LogLevel, format: LogFormat) {
    let mut builder = env_logger::Builder::from_env(
        env_logger::Env::default().default_filter_or(level.to_string()),
    );

    if format == LogFormat::Json {
        builder.format(|buf, record| writeln!(buf, "{}", format_json(record)));
    }

    // A second init (e.g. from tests) is not an error worth surfacing.
    let _ = builder.try_init();
}

pub fn format_json(record: &Record) -> String {
    let timestamp: DateTime<Utc> = Utc::now();
    let log_entry = json!({
        "timestamp": timestamp.format("%Y-%m-%dT%H:%M:%S%.3fZ").to_string(),
        "level": record.level().to_string().to_lowercase(),
        "target": record.target(),
        "message": record.args().to_string(),
    });

    serde_json::to_string(&log_entry).unwrap_or_else(|_| {
        json!({"error": "Failed to serialize log entry", "raw_message": record.args().to_string()})
            .to_string()
    })
}

pub fn parse_log_level(s: &str) -> Result<LogLevel, ServerError> {
    match s.to_lowercase().as_str() {
        "trace" => Ok(LogLevel::Trace),
        "debug" => Ok(LogLevel::Debug),
        "info" => Ok(LogLevel::Info),
        "warn" => Ok(LogLevel::Warn),
        "error" => Ok(LogLevel::Error),
        _ => Err(ServerError::Config(format!(
            "Invalid log level: {}. Must be one of: trace, debug, info, warn, error",
            s
        ))),
    }
}

pub fn parse_log_format(s: &str) -> Result<LogFormat, ServerError> {
    match s.to_lowercase().as_str() {
        "text" => Ok(LogFormat::Text),
        "json" => Ok(LogFormat::Json),
        _ => Err(ServerError::Config(format!(
            "Invalid log format: {}. Must be one of: text, json",
            s
        ))),
    }
}
