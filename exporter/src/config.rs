//! Exporter configuration
//!
//! Command line flags win, then the exporter's own environment variables, then
//! the Spring datasource variables the queue's producer is usually deployed
//! with (`SPRING_DATASOURCE_URL`, `SPRING_DATASOURCE_USERNAME`,
//! `SPRING_DATASOURCE_PASSWORD`).

use crate::reader::TableName;
use clap::{Parser, ValueEnum};
use queue_exporter_shared::utils::{parse_duration, DurationError};
use std::fmt;
use std::net::SocketAddr;
use std::time::Duration;
use thiserror::Error;

pub const DEFAULT_TABLE: &str = "queue";
pub const DEFAULT_FREQUENCY: &str = "60";
pub const DEFAULT_METRICS_ADDR: &str = "0.0.0.0:9898";

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("{0} not defined")]
    Missing(&'static str),
    #[error("invalid database port '{0}'")]
    InvalidPort(String),
    #[error("invalid poll frequency: {0}")]
    InvalidFrequency(#[from] DurationError),
    #[error("poll frequency must be greater than zero")]
    ZeroFrequency,
    #[error("invalid queue table name '{0}'")]
    InvalidTable(String),
    #[error("invalid verbosity '{0}': expected a number between 0 and 255")]
    InvalidVerbosity(String),
    #[error("invalid metrics listen address '{0}'")]
    InvalidMetricsAddr(String),
    #[error("invalid JDBC url '{0}': expected jdbc:postgresql://host:port/database")]
    InvalidJdbcUrl(String),
}

/// Log output format
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum LogFormat {
    /// One JSON object per line, for log shippers
    Json,
    /// Human readable lines
    Text,
}

#[derive(Parser, Debug, Clone, Default)]
#[command(name = "queue-exporter")]
#[command(about = "Export the state of a work-queue table as Prometheus gauges", long_about = None)]
#[command(version)]
pub struct Args {
    /// Database host [env: POSTGRES]
    #[arg(short = 'H', long)]
    pub hostname: Option<String>,

    /// Database name [env: DATABASE]
    #[arg(short = 'D', long)]
    pub database: Option<String>,

    /// Database user [env: USERNAME, SPRING_DATASOURCE_USERNAME]
    #[arg(short, long)]
    pub username: Option<String>,

    /// Database password [env: PASSWORD, SPRING_DATASOURCE_PASSWORD]
    #[arg(short, long)]
    pub password: Option<String>,

    /// Database port [env: PORT]
    #[arg(short = 'P', long)]
    pub port: Option<String>,

    /// How often the queue is read, in seconds or with a unit ("30s", "5m") [default: 60]
    #[arg(short, long)]
    pub frequency: Option<String>,

    /// Table holding the queue [env: QUEUE] [default: queue]
    #[arg(short = 'Q', long)]
    pub queue: Option<String>,

    /// Debug bitmask, 0 disables debug logging [env: DEBUG]
    #[arg(short, long)]
    pub verbose: Option<String>,

    /// Listen address of the metrics endpoint [env: METRICS_ADDR] [default: 0.0.0.0:9898]
    #[arg(long)]
    pub metrics_addr: Option<String>,

    /// Namespace prepended to the queue metric names, e.g. "hydro_api" [env: METRIC_PREFIX]
    #[arg(long)]
    pub metric_prefix: Option<String>,

    /// Log output format
    #[arg(long, value_enum)]
    pub log_format: Option<LogFormat>,
}

impl Args {
    /// Log format, defaulting to JSON.
    pub fn log_format(&self) -> LogFormat {
        self.log_format.unwrap_or(LogFormat::Json)
    }
}

/// Which debug messages to emit.
///
/// Each bit enables one family of debug logs; any non-zero value also lowers
/// the log level to `debug`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Verbosity(u8);

impl Verbosity {
    /// Each table read
    pub const TABLE_READS: u8 = 1;
    /// Updates of the oldest wait per URI
    pub const OLDEST: u8 = 2;
    /// Per-row bucket assignment
    pub const BUCKETS: u8 = 4;
    /// Per-URI histogram after each cycle
    pub const HISTOGRAM_SUMMARY: u8 = 8;
    /// Rows that are still waiting
    pub const WAITING_ROWS: u8 = 16;
    pub const FAILED_ROWS: u8 = 32;
    pub const COMPLETED_ROWS: u8 = 64;
    /// Every raw row as read
    pub const RAW_ROWS: u8 = 128;

    pub fn new(bits: u8) -> Self {
        Self(bits)
    }

    pub fn enabled(self, flag: u8) -> bool {
        self.0 & flag != 0
    }

    pub fn is_debug(self) -> bool {
        self.0 != 0
    }
}

/// Connection settings for the queue database.
#[derive(Clone, PartialEq, Eq)]
pub struct DatabaseConfig {
    pub host: String,
    pub port: u16,
    pub database: String,
    pub username: String,
    pub password: String,
}

impl DatabaseConfig {
    /// `host:port/database as user name`, for log messages.
    pub fn describe(&self) -> String {
        format!(
            "{}:{}/{} as user {}",
            self.host, self.port, self.database, self.username
        )
    }
}

impl fmt::Debug for DatabaseConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DatabaseConfig")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("database", &self.database)
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .finish()
    }
}

/// Fully resolved exporter configuration.
#[derive(Debug, Clone)]
pub struct ExporterConfig {
    pub database: DatabaseConfig,
    pub table: TableName,
    pub interval: Duration,
    pub verbosity: Verbosity,
    pub metrics_addr: SocketAddr,
    pub metric_prefix: Option<String>,
}

/// Host, port and database taken from a `jdbc:postgresql://host:port/db` url.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct JdbcUrl {
    pub host: Option<String>,
    pub port: Option<String>,
    pub database: Option<String>,
}

impl JdbcUrl {
    /// Parse a JDBC url. Empty parts (as in `jdbc:postgresql://:/`) are `None`.
    ///
    /// IPv6 hosts must be bracketed; the brackets are stripped.
    pub fn parse(url: &str) -> Result<Self, ConfigError> {
        let invalid = || ConfigError::InvalidJdbcUrl(url.to_string());
        let rest = url
            .trim()
            .strip_prefix("jdbc:postgresql://")
            .ok_or_else(invalid)?;

        let (authority, path) = rest.split_once('/').unwrap_or((rest, ""));
        let database = path.split(['?', ';']).next().unwrap_or("");
        let (host, port) = if let Some(bracketed) = authority.strip_prefix('[') {
            // IPv6 literal: [addr] or [addr]:port
            let (host, after) = bracketed.split_once(']').ok_or_else(invalid)?;
            let port = match after {
                "" => "",
                _ => after.strip_prefix(':').ok_or_else(invalid)?,
            };
            (host, port)
        } else {
            match authority.split_once(':') {
                Some((_, port)) if port.contains(':') => return Err(invalid()),
                Some((host, port)) => (host, port),
                None => (authority, ""),
            }
        };

        Ok(Self {
            host: non_empty(host),
            port: non_empty(port),
            database: non_empty(database),
        })
    }
}

fn non_empty(s: &str) -> Option<String> {
    let s = s.trim();
    (!s.is_empty()).then(|| s.to_string())
}

impl ExporterConfig {
    /// Resolve the configuration from parsed flags and an environment lookup.
    ///
    /// `env` is normally `|key| std::env::var(key).ok()`; empty values count
    /// as unset.
    pub fn resolve<F>(args: &Args, env: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let env = |key: &str| env(key).as_deref().and_then(non_empty);
        let arg = |value: &Option<String>| value.as_deref().and_then(non_empty);

        let jdbc = match env("SPRING_DATASOURCE_URL") {
            Some(url) => JdbcUrl::parse(&url)?,
            None => JdbcUrl::default(),
        };

        let host = arg(&args.hostname)
            .or_else(|| env("POSTGRES"))
            .or(jdbc.host)
            .ok_or(ConfigError::Missing("Location of database"))?;
        let database = arg(&args.database)
            .or_else(|| env("DATABASE"))
            .or(jdbc.database)
            .ok_or(ConfigError::Missing("Name of database"))?;
        let username = arg(&args.username)
            .or_else(|| env("USERNAME"))
            .or_else(|| env("SPRING_DATASOURCE_USERNAME"))
            .ok_or(ConfigError::Missing("Database username"))?;
        let password = arg(&args.password)
            .or_else(|| env("PASSWORD"))
            .or_else(|| env("SPRING_DATASOURCE_PASSWORD"))
            .ok_or(ConfigError::Missing("Database password"))?;
        let port = arg(&args.port)
            .or_else(|| env("PORT"))
            .or(jdbc.port)
            .ok_or(ConfigError::Missing("Database port"))?;
        let port = port
            .parse::<u16>()
            .map_err(|_| ConfigError::InvalidPort(port.clone()))?;

        let table = arg(&args.queue)
            .or_else(|| env("QUEUE"))
            .unwrap_or_else(|| DEFAULT_TABLE.to_string());
        let table = table
            .parse::<TableName>()
            .map_err(|_| ConfigError::InvalidTable(table.clone()))?;

        let interval = parse_duration(
            &arg(&args.frequency).unwrap_or_else(|| DEFAULT_FREQUENCY.to_string()),
        )?;
        if interval.is_zero() {
            return Err(ConfigError::ZeroFrequency);
        }

        let verbosity = match arg(&args.verbose).or_else(|| env("DEBUG")) {
            Some(raw) => raw
                .parse::<u8>()
                .map(Verbosity::new)
                .map_err(|_| ConfigError::InvalidVerbosity(raw.clone()))?,
            None => Verbosity::default(),
        };

        let metrics_addr = arg(&args.metrics_addr)
            .or_else(|| env("METRICS_ADDR"))
            .unwrap_or_else(|| DEFAULT_METRICS_ADDR.to_string());
        let metrics_addr = metrics_addr
            .parse::<SocketAddr>()
            .map_err(|_| ConfigError::InvalidMetricsAddr(metrics_addr.clone()))?;

        let metric_prefix = arg(&args.metric_prefix).or_else(|| env("METRIC_PREFIX"));

        Ok(Self {
            database: DatabaseConfig {
                host,
                port,
                database,
                username,
                password,
            },
            table,
            interval,
            verbosity,
            metrics_addr,
            metric_prefix,
        })
    }
}
