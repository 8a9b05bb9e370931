//! Typed errors for each stage of the collector
//!
//! Only `ConfigError` and `CycleError` ever leave the agent's main loop;
//! `SinkSendError` is logged and dropped per metric.

use thiserror::Error;

/// Startup configuration problems, checked once before polling starts
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("missing required setting: {field}")]
    MissingField { field: &'static str },

    #[error("invalid value for {field}: {reason}")]
    InvalidValue { field: &'static str, reason: String },

    #[error("failed to read config file {path}: {source}")]
    ReadFile {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config file {path}: {source}")]
    Parse {
        path: String,
        #[source]
        source: toml::de::Error,
    },
}

/// Failure to retrieve the status document
#[derive(Error, Debug)]
pub enum FetchError {
    #[error("request to {url} failed: {source}")]
    Request {
        url: String,
        #[source]
        source: reqwest::Error,
    },

    #[error("status source did not answer within {timeout_ms}ms")]
    Timeout { timeout_ms: u64 },

    #[error("status source answered HTTP {status}")]
    Status { status: u16 },

    #[error("failed to read response body: {0}")]
    Body(#[source] reqwest::Error),
}

/// Payload is not JSON or does not fit the status schema
#[derive(Error, Debug)]
pub enum DecodeError {
    #[error("invalid status document: {0}")]
    Json(#[from] serde_json::Error),

    #[error("status document root must be a JSON object, got {found}")]
    NotAnObject { found: &'static str },

    #[error("upstreams.cache_servers does not match schema '{expected}': found {found}")]
    SchemaMismatch {
        expected: &'static str,
        found: &'static str,
    },
}

/// Delivery failure for a single metric
#[derive(Error, Debug)]
pub enum SinkSendError {
    #[error("failed to resolve statsd host {host}: {source}")]
    Resolve {
        host: String,
        #[source]
        source: std::io::Error,
    },

    #[error("statsd host {host} resolved to no address")]
    NoAddress { host: String },

    #[error("statsd host {host} is unresolved, next lookup pending")]
    Unresolved { host: String },

    #[error("failed to bind a local socket for statsd host {host}: {source}")]
    Bind {
        host: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to send metric {metric}: {source}")]
    Io {
        metric: String,
        #[source]
        source: std::io::Error,
    },
}

/// Outcome of a poll cycle that did not reach the emit stage
#[derive(Error, Debug)]
pub enum CycleError {
    #[error("fetch failed: {0}")]
    Fetch(#[from] FetchError),

    #[error("decode failed: {0}")]
    Decode(#[from] DecodeError),
}

/// Short JSON type name used in decode error messages
pub(crate) fn json_kind(value: &serde_json::Value) -> &'static str {
    match value {
        serde_json::Value::Null => "null",
        serde_json::Value::Bool(_) => "boolean",
        serde_json::Value::Number(_) => "number",
        serde_json::Value::String(_) => "string",
        serde_json::Value::Array(_) => "array",
        serde_json::Value::Object(_) => "object",
    }
}
