use std::path::{Path, PathBuf};
use std::time::Duration;

use clap::Parser;
use thiserror::Error;

use crate::constants::{
    APP_DIR_NAME, DATABASE_FILE_NAME, DEFAULT_API_BASE_URL, DEFAULT_FFMPEG_PATH,
    DEFAULT_MEDIA_BASE_URL, DEFAULT_POLL_INTERVAL, DEFAULT_REQUEST_PACING, MEDIA_DIR_NAME,
};

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("missing thread number; usage: aos [OPTIONS] BOARD THREAD")]
    MissingThread,
    #[error("'{0}' is not a valid integer")]
    InvalidThread(String),
    #[error(
        "couldn't determine a data directory; set $XDG_DATA_HOME or $HOME, or use --data-dir"
    )]
    NoDataDir,
    #[error("invalid value for {name}: {message}")]
    InvalidValue { name: String, message: String },
    #[error("failed to parse {name} as integer: {source}")]
    ParseInt {
        name: String,
        #[source]
        source: std::num::ParseIntError,
    },
}

/// Command line arguments.
#[derive(Debug, Parser)]
#[command(name = "aos", about = "Archive a thread and its media until it is closed")]
pub struct Cli {
    /// Board identifier, or `board-thread` when THREAD is omitted.
    pub board: String,

    /// Thread number.
    pub thread: Option<String>,

    /// Alternate data directory.
    #[arg(long)]
    pub data_dir: Option<PathBuf>,
}

/// Application configuration, merged from the command line and the environment.
#[derive(Debug, Clone)]
pub struct Config {
    // Target
    pub board: String,
    pub thread_no: u64,

    // Storage
    pub data_dir: PathBuf,

    // Remote API
    pub api_base_url: String,
    pub media_base_url: String,

    // Pacing
    pub poll_interval: Duration,
    pub request_pacing: Duration,

    // Tooling
    pub ffmpeg_path: String,
}

impl Config {
    /// Build the configuration from parsed arguments and environment variables.
    ///
    /// # Errors
    ///
    /// Returns an error if the thread number is missing or invalid, no data
    /// directory can be determined, or an environment variable is malformed.
    pub fn from_cli(cli: Cli) -> Result<Self, ConfigError> {
        let (board, thread) = split_target(cli.board, cli.thread)?;
        let thread_no = thread
            .parse::<u64>()
            .map_err(|_| ConfigError::InvalidThread(thread.clone()))?;

        let data_dir = match cli.data_dir {
            Some(dir) => dir,
            None => default_data_dir(optional_env("XDG_DATA_HOME"), optional_env("HOME"))
                .ok_or(ConfigError::NoDataDir)?,
        };

        Ok(Self {
            board,
            thread_no,
            data_dir,
            api_base_url: env_or_default("API_BASE_URL", DEFAULT_API_BASE_URL),
            media_base_url: env_or_default("MEDIA_BASE_URL", DEFAULT_MEDIA_BASE_URL),
            poll_interval: parse_env_u64("POLL_INTERVAL_SECS")?
                .map_or(DEFAULT_POLL_INTERVAL, Duration::from_secs),
            request_pacing: parse_env_u64("REQUEST_PACING_MS")?
                .map_or(DEFAULT_REQUEST_PACING, Duration::from_millis),
            ffmpeg_path: env_or_default("FFMPEG_PATH", DEFAULT_FFMPEG_PATH),
        })
    }

    /// Configuration pointing at the public API with no pacing, for tests.
    #[must_use]
    pub fn for_testing(data_dir: &Path) -> Self {
        Self {
            board: "g".to_string(),
            thread_no: 1,
            data_dir: data_dir.to_path_buf(),
            api_base_url: DEFAULT_API_BASE_URL.to_string(),
            media_base_url: DEFAULT_MEDIA_BASE_URL.to_string(),
            poll_interval: DEFAULT_POLL_INTERVAL,
            request_pacing: Duration::ZERO,
            ffmpeg_path: DEFAULT_FFMPEG_PATH.to_string(),
        }
    }

    /// Validate that the configuration is usable.
    ///
    /// # Errors
    ///
    /// Returns an error if the configuration is invalid.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.board.is_empty() || self.board.contains('/') {
            return Err(ConfigError::InvalidValue {
                name: "BOARD".to_string(),
                message: format!("'{}' is not a board identifier", self.board),
            });
        }
        if self.api_base_url.is_empty() {
            return Err(ConfigError::InvalidValue {
                name: "API_BASE_URL".to_string(),
                message: "cannot be empty".to_string(),
            });
        }
        if self.media_base_url.is_empty() {
            return Err(ConfigError::InvalidValue {
                name: "MEDIA_BASE_URL".to_string(),
                message: "cannot be empty".to_string(),
            });
        }
        Ok(())
    }

    #[must_use]
    pub fn database_path(&self) -> PathBuf {
        self.data_dir.join(DATABASE_FILE_NAME)
    }

    #[must_use]
    pub fn media_root(&self) -> PathBuf {
        self.data_dir.join(MEDIA_DIR_NAME)
    }
}

/// Resolve `BOARD THREAD`, or a single `board-thread` argument as passed by
/// service managers that only forward one instance name.
fn split_target(board: String, thread: Option<String>) -> Result<(String, String), ConfigError> {
    match thread {
        Some(thread) => Ok((board, thread)),
        None => board
            .split_once('-')
            .map(|(b, t)| (b.to_string(), t.to_string()))
            .ok_or(ConfigError::MissingThread),
    }
}

/// `$XDG_DATA_HOME/aos`, falling back to `$HOME/.local/state/aos`.
fn default_data_dir(xdg_data_home: Option<String>, home: Option<String>) -> Option<PathBuf> {
    xdg_data_home
        .map(PathBuf::from)
        .or_else(|| home.map(|h| Path::new(&h).join(".local").join("state")))
        .map(|base| base.join(APP_DIR_NAME))
}

fn optional_env(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|s| !s.is_empty())
}

fn env_or_default(name: &str, default: &str) -> String {
    optional_env(name).unwrap_or_else(|| default.to_string())
}

fn parse_env_u64(name: &str) -> Result<Option<u64>, ConfigError> {
    optional_env(name)
        .map(|val| {
            val.parse().map_err(|e| ConfigError::ParseInt {
                name: name.to_string(),
                source: e,
            })
        })
        .transpose()
}
