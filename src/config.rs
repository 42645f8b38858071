//! Configuration management for the template miner
//!
//! Supports configuration via command line arguments, environment variables
//! and configuration files (YAML/JSON). Values given on the command line or in
//! the environment take precedence over the file; the file takes precedence
//! over built-in defaults.

use crate::crypto::{Blake2s, StreamingHash};
use crate::persist::DEFAULT_OUTPUT_PATH;
use crate::template::{DEFAULT_MARKER, DEFAULT_MAX_TEMPLATE_SIZE};
use crate::types::NonceLayout;
use crate::worker::{partition, PoolConfig, MAX_WORKERS};
use crate::{Error, Result, Target};
use clap::parser::ValueSource;
use clap::{ArgMatches, CommandFactory, FromArgMatches, Parser, ValueEnum};
use serde::{Deserialize, Serialize};
use std::ffi::OsString;
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

/// Log levels
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Error,
    Warn,
    Info,
    Debug,
    Trace,
}

impl LogLevel {
    /// Directive understood by `EnvFilter`
    pub fn as_str(&self) -> &'static str {
        match self {
            LogLevel::Error => "error",
            LogLevel::Warn => "warn",
            LogLevel::Info => "info",
            LogLevel::Debug => "debug",
            LogLevel::Trace => "trace",
        }
    }
}

impl From<LogLevel> for tracing::Level {
    fn from(level: LogLevel) -> Self {
        match level {
            LogLevel::Error => tracing::Level::ERROR,
            LogLevel::Warn => tracing::Level::WARN,
            LogLevel::Info => tracing::Level::INFO,
            LogLevel::Debug => tracing::Level::DEBUG,
            LogLevel::Trace => tracing::Level::TRACE,
        }
    }
}

/// Log output formats
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    /// Human readable lines
    Plain,
    /// One JSON object per event
    Json,
}

impl fmt::Display for LogFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LogFormat::Plain => write!(f, "plain"),
            LogFormat::Json => write!(f, "json"),
        }
    }
}

/// Complete configuration for the miner
#[derive(Debug, Clone, Parser, Serialize, Deserialize)]
#[command(
    name = "template-miner",
    version = env!("CARGO_PKG_VERSION"),
    about = "Multi-threaded proof-of-work miner for text block templates",
    long_about = "Searches nonces for a block template by overwriting the 64 character hex field after a marker, hashing the template with Blake2s and checking the digest against a difficulty target"
)]
pub struct Config {
    /// Print the parsed configuration and exit
    #[arg(long)]
    #[serde(default)]
    pub print_config: bool,

    /// Configuration file path (YAML or JSON)
    #[arg(long, value_name = "FILE")]
    #[serde(default, skip_serializing)]
    pub config_file: Option<PathBuf>,

    /// Block template to mine
    #[arg(short = 'i', long, env = "MINER_TEMPLATE", default_value = "target.txt")]
    #[serde(default = "default_template")]
    pub template: PathBuf,

    /// Where a mined block is written
    #[arg(short = 'o', long, env = "MINER_OUTPUT", default_value = DEFAULT_OUTPUT_PATH)]
    #[serde(default = "default_output")]
    pub output: PathBuf,

    /// Literal bytes immediately preceding the nonce field
    #[arg(short = 'm', long, default_value = DEFAULT_MARKER)]
    #[serde(default = "default_marker")]
    pub marker: String,

    /// Number of worker threads (0 = all available cores)
    #[arg(short = 'c', long, env = "MINER_THREADS", default_value = "0")]
    #[serde(default)]
    pub thread_count: usize,

    /// Nonces searched by each worker
    #[arg(short = 'n', long, default_value = "1000000000")]
    #[serde(default = "default_trials")]
    pub trials: u64,

    /// First nonce of worker 0 (random if omitted)
    #[arg(short = 's', long)]
    pub start_nonce: Option<u64>,

    /// Difficulty target: bytes:<zero_bytes>:<max_next>, bits:<n> or 64 hex chars
    #[arg(short = 't', long, default_value = "bytes:4:171")]
    #[serde(default = "default_target")]
    pub target: String,

    /// Blake2s digest size in bytes
    #[arg(long, default_value = "32")]
    #[serde(default = "default_digest_size")]
    pub digest_size: usize,

    /// Maximum number of template bytes loaded
    #[arg(long, default_value = "1000000")]
    #[serde(default = "default_max_template_size")]
    pub max_template_size: usize,

    /// Stop every worker once one finds a valid digest
    #[arg(long)]
    #[serde(default)]
    pub stop_on_first: bool,

    /// Seconds between progress reports (0 disables them)
    #[arg(long, default_value = "10")]
    #[serde(default = "default_progress_interval")]
    pub progress_interval: u64,

    /// Log level
    #[arg(short = 'l', long, default_value = "info")]
    #[serde(default = "default_log_level")]
    pub log_level: LogLevel,

    /// Log output format
    #[arg(long, default_value = "plain")]
    #[serde(default = "default_log_format")]
    pub log_format: LogFormat,
}

impl Config {
    /// Load configuration from the process arguments, merging a config file if specified
    pub async fn load() -> Result<Self> {
        let matches = Self::command().get_matches();
        Self::from_matches(&matches).await
    }

    /// Load configuration from an explicit argument list
    pub async fn load_from<I, T>(args: I) -> Result<Self>
    where
        I: IntoIterator<Item = T>,
        T: Into<OsString> + Clone,
    {
        let matches = Self::command()
            .try_get_matches_from(args)
            .map_err(|e| Error::config(e.to_string()))?;
        Self::from_matches(&matches).await
    }

    async fn from_matches(matches: &ArgMatches) -> Result<Self> {
        let mut config =
            Self::from_arg_matches(matches).map_err(|e| Error::config(e.to_string()))?;

        if let Some(config_file) = &config.config_file {
            let file_config = Self::load_from_file(config_file).await?;
            config = config.merge_with_file(matches, file_config);
        }

        config.validate()?;
        Ok(config)
    }

    /// Load configuration from file
    async fn load_from_file(path: &Path) -> Result<Self> {
        let content = tokio::fs::read_to_string(path).await?;

        if path.extension().and_then(|s| s.to_str()) == Some("json") {
            serde_json::from_str(&content).map_err(Error::from)
        } else {
            // Default to YAML
            serde_yaml::from_str(&content).map_err(Error::from)
        }
    }

    /// Take file values for every option not set on the command line or in the environment
    fn merge_with_file(mut self, matches: &ArgMatches, file: Self) -> Self {
        let defaulted = |id: &str| {
            matches!(
                matches.value_source(id),
                None | Some(ValueSource::DefaultValue)
            )
        };

        if defaulted("template") {
            self.template = file.template;
        }
        if defaulted("output") {
            self.output = file.output;
        }
        if defaulted("marker") {
            self.marker = file.marker;
        }
        if defaulted("thread_count") {
            self.thread_count = file.thread_count;
        }
        if defaulted("trials") {
            self.trials = file.trials;
        }
        if self.start_nonce.is_none() {
            self.start_nonce = file.start_nonce;
        }
        if defaulted("target") {
            self.target = file.target;
        }
        if defaulted("digest_size") {
            self.digest_size = file.digest_size;
        }
        if defaulted("max_template_size") {
            self.max_template_size = file.max_template_size;
        }
        if !self.stop_on_first {
            self.stop_on_first = file.stop_on_first;
        }
        if defaulted("progress_interval") {
            self.progress_interval = file.progress_interval;
        }
        if defaulted("log_level") {
            self.log_level = file.log_level;
        }
        if defaulted("log_format") {
            self.log_format = file.log_format;
        }

        self
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<()> {
        if self.marker.is_empty() {
            return Err(Error::config("Marker must not be empty"));
        }

        if self.max_template_size == 0 {
            return Err(Error::config("Maximum template size must be greater than 0"));
        }

        if self.trials == 0 {
            return Err(Error::config("Trial count must be greater than 0"));
        }

        let hasher = self.hasher()?;
        self.target()?.validate_for(hasher.output_size())?;

        let threads = self.thread_count();
        if threads > MAX_WORKERS {
            return Err(Error::config(format!(
                "Thread count {} exceeds the maximum of {}",
                threads, MAX_WORKERS
            )));
        }
        NonceLayout::for_workers(threads)?;

        match self.start_nonce {
            Some(start) => {
                partition(start, self.trials, threads)?;
            }
            None => {
                self.trials.checked_mul(threads as u64).ok_or_else(|| {
                    Error::config(format!(
                        "{} threads x {} trials exceeds the 64-bit nonce space",
                        threads, self.trials
                    ))
                })?;
            }
        }

        Ok(())
    }

    /// Worker thread count with 0 resolved to the number of cores
    pub fn thread_count(&self) -> usize {
        if self.thread_count == 0 {
            num_cpus::get().min(MAX_WORKERS)
        } else {
            self.thread_count
        }
    }

    /// Get parsed target
    pub fn target(&self) -> Result<Target> {
        Target::from_str(&self.target)
    }

    /// Hash primitive with the configured digest size
    pub fn hasher(&self) -> Result<Blake2s> {
        Blake2s::new(self.digest_size)
    }

    /// Get progress interval duration
    pub fn progress_interval_duration(&self) -> Duration {
        Duration::from_secs(self.progress_interval)
    }

    /// Pool settings for a run starting at `start_nonce`
    pub fn pool_config(&self, start_nonce: u64) -> Result<PoolConfig> {
        Ok(PoolConfig {
            workers: self.thread_count(),
            trials_per_worker: self.trials,
            start_nonce,
            target: self.target()?,
            output: Some(self.output.clone()),
            stop_on_first: self.stop_on_first,
            progress_interval: self.progress_interval_duration(),
        })
    }
}

// Default value functions for serde
fn default_template() -> PathBuf { PathBuf::from("target.txt") }
fn default_output() -> PathBuf { PathBuf::from(DEFAULT_OUTPUT_PATH) }
fn default_marker() -> String { DEFAULT_MARKER.to_string() }
fn default_trials() -> u64 { 1_000_000_000 }
fn default_target() -> String { Target::default().to_string() }
fn default_digest_size() -> usize { Blake2s::MAX_OUTPUT_SIZE }
fn default_max_template_size() -> usize { DEFAULT_MAX_TEMPLATE_SIZE }
fn default_progress_interval() -> u64 { 10 }
fn default_log_level() -> LogLevel { LogLevel::Info }
fn default_log_format() -> LogFormat { LogFormat::Plain }
