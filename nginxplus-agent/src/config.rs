//! Configuration management
//!
//! Settings are layered, lowest precedence first:
//! - built-in defaults
//! - TOML file (`--config`, `NGINXPLUS_CONFIG`, or the OS config dir)
//! - environment variables (a `.env` file is loaded by `main`)
//! - command-line flags
//!
//! The result is an immutable [`Config`] validated once before polling starts.

use crate::error::ConfigError;
use crate::sink::CounterType;
use crate::status::SchemaVersion;
use clap::Parser;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;
use tracing_subscriber::{fmt as subscriber_fmt, EnvFilter};

pub const DEFAULT_STATSD_HOST: &str = "localhost";
pub const DEFAULT_STATSD_PORT: u16 = 8125;
pub const DEFAULT_PREFIX: &str = "nginx.stats";
pub const DEFAULT_INTERVAL_SECS: u64 = 10;
pub const DEFAULT_TIMEOUT_SECS: u64 = 5;

/// Poll NGINX Plus status and forward counters and gauges to statsd
#[derive(Parser, Debug, Default)]
#[command(name = "nginxplus-agent", version)]
pub struct Args {
    /// TOML configuration file
    #[arg(short = 'c', long, env = "NGINXPLUS_CONFIG")]
    pub config: Option<PathBuf>,

    /// Hostname for statsd
    #[arg(short = 'H', long = "host", env = "NGINXPLUS_STATSD_HOST")]
    pub statsd_host: Option<String>,

    /// Port for statsd
    #[arg(short = 'p', long = "port", env = "NGINXPLUS_STATSD_PORT")]
    pub statsd_port: Option<u16>,

    /// Metric path prepended to every metric
    #[arg(short = 'm', long = "metric-path", env = "NGINXPLUS_METRIC_PATH")]
    pub prefix: Option<String>,

    /// Check stats each <i> seconds
    #[arg(short = 'i', long = "interval", env = "NGINXPLUS_INTERVAL")]
    pub interval_secs: Option<u64>,

    /// NGINX Plus status URL
    #[arg(short = 'u', long = "url", env = "NGINXPLUS_STATUS_URL")]
    pub url: Option<String>,

    /// Status document layout [auto, peers, legacy]
    #[arg(short = 's', long, env = "NGINXPLUS_SCHEMA_VERSION")]
    pub schema_version: Option<SchemaVersion>,

    /// Seconds to wait for the status document
    #[arg(short = 't', long = "timeout", env = "NGINXPLUS_FETCH_TIMEOUT")]
    pub timeout_secs: Option<u64>,

    /// What to do when a fetch or decode fails [exit, continue]
    #[arg(long, env = "NGINXPLUS_ON_ERROR")]
    pub on_error: Option<FailurePolicy>,

    /// statsd type for counters [count, total]
    #[arg(long, env = "NGINXPLUS_COUNTER_TYPE")]
    pub counter_type: Option<CounterType>,

    /// Log level or filter directive (RUST_LOG wins when set)
    #[arg(long, env = "NGINXPLUS_LOG_LEVEL")]
    pub log_level: Option<String>,

    /// Log output [pretty, json]
    #[arg(long, env = "NGINXPLUS_LOG_FORMAT")]
    pub log_format: Option<LogFormat>,
}

/// Reaction of the poller to a failed fetch or decode
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FailurePolicy {
    /// Stop the agent with a non-zero exit code
    #[default]
    Exit,
    /// Log the failure and wait for the next scheduled poll
    Continue,
}

impl fmt::Display for FailurePolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FailurePolicy::Exit => f.write_str("exit"),
            FailurePolicy::Continue => f.write_str("continue"),
        }
    }
}

impl FromStr for FailurePolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "exit" => Ok(FailurePolicy::Exit),
            "continue" => Ok(FailurePolicy::Continue),
            other => Err(format!("unknown failure policy '{other}' (expected exit or continue)")),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Pretty,
    Json,
}

impl FromStr for LogFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "pretty" => Ok(LogFormat::Pretty),
            "json" => Ok(LogFormat::Json),
            other => Err(format!("unknown log format '{other}' (expected pretty or json)")),
        }
    }
}

/// On-disk layout of `config.toml`; every key is optional
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct FileConfig {
    pub statsd: StatsdSection,
    pub status: StatusSection,
    pub poll: PollSection,
    pub logging: LoggingSection,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct StatsdSection {
    pub host: Option<String>,
    pub port: Option<u16>,
    pub prefix: Option<String>,
    pub counter_type: Option<CounterType>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct StatusSection {
    pub url: Option<String>,
    pub schema_version: Option<SchemaVersion>,
    pub timeout_secs: Option<u64>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct PollSection {
    pub interval_secs: Option<u64>,
    pub on_error: Option<FailurePolicy>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct LoggingSection {
    pub level: Option<String>,
    pub format: Option<LogFormat>,
}

/// Effective, validated agent configuration
#[derive(Debug, Clone, PartialEq)]
pub struct Config {
    pub statsd: StatsdConfig,
    pub status: StatusConfig,
    pub poll: PollConfig,
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, PartialEq)]
pub struct StatsdConfig {
    pub host: String,
    pub port: u16,
    pub prefix: String,
    pub counter_type: CounterType,
}

#[derive(Debug, Clone, PartialEq)]
pub struct StatusConfig {
    pub url: String,
    pub schema_version: SchemaVersion,
    pub timeout: Duration,
}

#[derive(Debug, Clone, PartialEq)]
pub struct PollConfig {
    pub interval: Duration,
    pub on_error: FailurePolicy,
}

#[derive(Debug, Clone, PartialEq)]
pub struct LoggingConfig {
    pub level: String,
    pub format: LogFormat,
}

impl LoggingConfig {
    /// Install the global tracing subscriber
    pub fn init(&self) {
        let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&self.level));

        match self.format {
            LogFormat::Json => subscriber_fmt().json().with_env_filter(filter).init(),
            LogFormat::Pretty => subscriber_fmt().with_env_filter(filter).init(),
        }
    }
}

impl Config {
    /// Resolve the configuration from parsed flags, reading the TOML file
    /// they point to (or the default one, when present)
    pub fn load(args: Args) -> Result<Self, ConfigError> {
        let file = match &args.config {
            Some(path) => FileConfig::read(path)?,
            None => match default_config_path().filter(|p| p.exists()) {
                Some(path) => FileConfig::read(&path)?,
                None => FileConfig::default(),
            },
        };

        Self::from_layers(args, file)
    }

    /// Merge flags over file values over defaults, then validate
    pub fn from_layers(args: Args, file: FileConfig) -> Result<Self, ConfigError> {
        let url = args
            .url
            .or(file.status.url)
            .ok_or(ConfigError::MissingField { field: "status url" })?;

        let config = Config {
            statsd: StatsdConfig {
                host: args
                    .statsd_host
                    .or(file.statsd.host)
                    .unwrap_or_else(|| DEFAULT_STATSD_HOST.to_string()),
                port: args.statsd_port.or(file.statsd.port).unwrap_or(DEFAULT_STATSD_PORT),
                prefix: args
                    .prefix
                    .or(file.statsd.prefix)
                    .unwrap_or_else(|| DEFAULT_PREFIX.to_string()),
                counter_type: args.counter_type.or(file.statsd.counter_type).unwrap_or_default(),
            },
            status: StatusConfig {
                url,
                schema_version: args.schema_version.or(file.status.schema_version).unwrap_or_default(),
                timeout: Duration::from_secs(
                    args.timeout_secs.or(file.status.timeout_secs).unwrap_or(DEFAULT_TIMEOUT_SECS),
                ),
            },
            poll: PollConfig {
                interval: Duration::from_secs(
                    args.interval_secs.or(file.poll.interval_secs).unwrap_or(DEFAULT_INTERVAL_SECS),
                ),
                on_error: args.on_error.or(file.poll.on_error).unwrap_or_default(),
            },
            logging: LoggingConfig {
                level: args.log_level.or(file.logging.level).unwrap_or_else(|| "info".to_string()),
                format: args.log_format.or(file.logging.format).unwrap_or_default(),
            },
        };

        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.statsd.host.trim().is_empty() {
            return Err(ConfigError::MissingField { field: "statsd host" });
        }
        if self.statsd.port == 0 {
            return Err(ConfigError::InvalidValue {
                field: "statsd port",
                reason: "must be between 1 and 65535".into(),
            });
        }
        if let Some(c) = self
            .statsd
            .prefix
            .chars()
            .find(|c| c.is_whitespace() || matches!(c, ':' | '|' | '@'))
        {
            return Err(ConfigError::InvalidValue {
                field: "metric path",
                reason: format!("character {c:?} is not allowed in statsd names"),
            });
        }

        let url = url::Url::parse(&self.status.url).map_err(|e| ConfigError::InvalidValue {
            field: "status url",
            reason: e.to_string(),
        })?;
        if !matches!(url.scheme(), "http" | "https") {
            return Err(ConfigError::InvalidValue {
                field: "status url",
                reason: format!("unsupported scheme '{}'", url.scheme()),
            });
        }

        if self.status.timeout.is_zero() {
            return Err(ConfigError::InvalidValue {
                field: "fetch timeout",
                reason: "must be at least 1 second".into(),
            });
        }
        if self.poll.interval.is_zero() {
            return Err(ConfigError::InvalidValue {
                field: "interval",
                reason: "must be at least 1 second".into(),
            });
        }
        if let Err(e) = EnvFilter::try_new(&self.logging.level) {
            return Err(ConfigError::InvalidValue { field: "log level", reason: e.to_string() });
        }

        Ok(())
    }
}

impl FileConfig {
    pub fn read(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::ReadFile {
            path: path.display().to_string(),
            source,
        })?;

        toml::from_str(&content).map_err(|source| ConfigError::Parse {
            path: path.display().to_string(),
            source,
        })
    }
}

/// OS-specific config file location, e.g. `~/.config/nginxplus-agent/config.toml`
pub fn default_config_path() -> Option<PathBuf> {
    let mut path = dirs::config_dir()?;
    path.push("nginxplus-agent");
    path.push("config.toml");
    Some(path)
}
