//! Collector configuration: CLI flags over a JSON config file over the
//! environment over built-in defaults.

use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};

use clap::Args;
use collector_core::application::CollectorSettings;
use collector_core::domain::{Sort, TimeFilter};
use collector_core::retry::RetryPolicy;
use collector_core::utils::{normalize_channel, parse_since};
use reddit_adapter::Credentials;
use serde::Deserialize;
use thiserror::Error;

pub const DEFAULT_OUTPUT: &str = "data/raw/reddit_posts_master.jsonl";
pub const DEFAULT_CHANNELS: &[&str] = &["depression", "mentalhealth"];
pub const DEFAULT_LIMIT: usize = 1000;
pub const DEFAULT_RPM: u32 = 60;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("could not read config file {}: {source}", .path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid config file {}: {source}", .path.display())]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("missing {0}; set it in the config file or the environment")]
    Missing(&'static str),

    #[error("invalid value for {field}: {reason}")]
    Invalid { field: &'static str, reason: String },
}

/// Flags for the `collect` subcommand. Unset flags fall through to the config file.
#[derive(Args, Debug, Clone, Default)]
pub struct CollectArgs {
    /// Path to a JSON config file
    #[arg(short = 'c', long)]
    pub config: Option<PathBuf>,

    /// Comma-separated subreddit names
    #[arg(long, value_delimiter = ',')]
    pub channels: Vec<String>,

    /// Maximum items fetched per subreddit
    #[arg(short = 'l', long)]
    pub limit: Option<usize>,

    /// Raw dataset to append to
    #[arg(short = 'o', long)]
    pub output: Option<PathBuf>,

    /// Listing order: hot, new, top or rising
    #[arg(long)]
    pub sort: Option<Sort>,

    /// Window for `top`: hour, day, week, month, year or all
    #[arg(long)]
    pub time_filter: Option<TimeFilter>,

    /// Skip posts created before this date
    #[arg(long)]
    pub since: Option<String>,

    /// Retries per request on rate limits and network errors
    #[arg(long)]
    pub max_retries: Option<u32>,

    /// Client-side request budget per minute
    #[arg(long)]
    pub rpm: Option<u32>,

    /// Also write this run's new posts to a timestamped file in this directory
    #[arg(long)]
    pub snapshot_dir: Option<PathBuf>,

    /// Write the run summary as Markdown to this path
    #[arg(long)]
    pub report: Option<PathBuf>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct FileCredentials {
    pub id: Option<String>,
    pub secret: Option<String>,
    pub user_agent: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct FileConfig {
    pub channels: Option<Vec<String>>,
    pub limit_per_channel: Option<usize>,
    pub output_path: Option<PathBuf>,
    pub sort: Option<Sort>,
    pub time_filter: Option<TimeFilter>,
    pub since: Option<String>,
    pub max_retries: Option<u32>,
    pub requests_per_minute: Option<u32>,
    pub snapshot_dir: Option<PathBuf>,
    pub credentials: Option<FileCredentials>,
}

impl FileConfig {
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let text = fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        serde_json::from_str(&text).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }
}

/// Settings read from the process environment (after `.env` is loaded).
#[derive(Debug, Default)]
pub struct EnvConfig {
    pub client_id: Option<String>,
    pub client_secret: Option<String>,
    pub user_agent: Option<String>,
    pub channels: Option<String>,
    pub limit: Option<String>,
    pub output: Option<String>,
}

impl EnvConfig {
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Blank values count as unset.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let get = |key: &str| lookup(key).filter(|value| !value.trim().is_empty());
        Self {
            client_id: get("REDDIT_CLIENT_ID"),
            client_secret: get("REDDIT_CLIENT_SECRET"),
            user_agent: get("REDDIT_USER_AGENT"),
            channels: get("REDDIT_CHANNELS"),
            limit: get("REDDIT_LIMIT"),
            output: get("REDDIT_OUTPUT"),
        }
    }
}

/// Fully resolved configuration for one `collect` run.
#[derive(Debug, Clone)]
pub struct CollectConfig {
    pub settings: CollectorSettings,
    pub credentials: Credentials,
    pub output_path: PathBuf,
    pub snapshot_dir: Option<PathBuf>,
    pub report_path: Option<PathBuf>,
    pub requests_per_minute: u32,
}

pub fn load(args: &CollectArgs) -> Result<CollectConfig, ConfigError> {
    let file = match &args.config {
        Some(path) => FileConfig::load(path)?,
        None => FileConfig::default(),
    };
    resolve(args, file, EnvConfig::from_env())
}

pub fn resolve(
    args: &CollectArgs,
    file: FileConfig,
    env: EnvConfig,
) -> Result<CollectConfig, ConfigError> {
    let file_credentials = file.credentials.unwrap_or_default();
    let credentials = Credentials {
        client_id: first_set(file_credentials.id, env.client_id)
            .ok_or(ConfigError::Missing("client id (REDDIT_CLIENT_ID)"))?,
        client_secret: first_set(file_credentials.secret, env.client_secret)
            .ok_or(ConfigError::Missing("client secret (REDDIT_CLIENT_SECRET)"))?,
        user_agent: first_set(file_credentials.user_agent, env.user_agent)
            .ok_or(ConfigError::Missing("user agent (REDDIT_USER_AGENT)"))?,
    };

    let channels = if !args.channels.is_empty() {
        args.channels.clone()
    } else if let Some(channels) = file.channels {
        channels
    } else if let Some(raw) = env.channels {
        raw.split(',').map(str::to_string).collect()
    } else {
        DEFAULT_CHANNELS.iter().map(|c| c.to_string()).collect()
    };
    let channels = normalize_channels(channels)?;

    let limit_per_channel = match args.limit.or(file.limit_per_channel) {
        Some(limit) => limit,
        None => match env.limit {
            Some(raw) => raw.trim().parse().map_err(|_| ConfigError::Invalid {
                field: "REDDIT_LIMIT",
                reason: format!("`{raw}` is not a number"),
            })?,
            None => DEFAULT_LIMIT,
        },
    };
    if limit_per_channel == 0 {
        return Err(ConfigError::Invalid {
            field: "limit",
            reason: "must be at least 1".to_string(),
        });
    }

    let since = match args.since.clone().or(file.since) {
        Some(raw) => Some(parse_since(&raw).map_err(|reason| ConfigError::Invalid {
            field: "since",
            reason,
        })?),
        None => None,
    };

    let requests_per_minute = args
        .rpm
        .or(file.requests_per_minute)
        .unwrap_or(DEFAULT_RPM);
    if requests_per_minute == 0 {
        return Err(ConfigError::Invalid {
            field: "rpm",
            reason: "must be at least 1".to_string(),
        });
    }

    let mut retry = RetryPolicy::default();
    if let Some(retries) = args.max_retries.or(file.max_retries) {
        retry.max_attempts = retries.saturating_add(1);
    }

    let settings = CollectorSettings {
        channels,
        limit_per_channel,
        sort: args.sort.or(file.sort).unwrap_or_default(),
        time_filter: args.time_filter.or(file.time_filter).unwrap_or_default(),
        since,
        retry,
        ..CollectorSettings::default()
    };

    Ok(CollectConfig {
        settings,
        credentials,
        output_path: args
            .output
            .clone()
            .or(file.output_path)
            .or(env.output.map(PathBuf::from))
            .unwrap_or_else(|| PathBuf::from(DEFAULT_OUTPUT)),
        snapshot_dir: args.snapshot_dir.clone().or(file.snapshot_dir),
        report_path: args.report.clone(),
        requests_per_minute,
    })
}

fn first_set(preferred: Option<String>, fallback: Option<String>) -> Option<String> {
    preferred
        .filter(|value| !value.trim().is_empty())
        .or(fallback)
}

/// Normalizes names, drops repeats (first occurrence wins) and rejects an empty list.
fn normalize_channels(raw: Vec<String>) -> Result<Vec<String>, ConfigError> {
    let mut seen = HashSet::new();
    let channels: Vec<String> = raw
        .iter()
        .filter_map(|name| normalize_channel(name))
        .filter(|name| seen.insert(name.to_lowercase()))
        .collect();

    if channels.is_empty() {
        return Err(ConfigError::Invalid {
            field: "channels",
            reason: "no subreddit names given".to_string(),
        });
    }
    Ok(channels)
}
