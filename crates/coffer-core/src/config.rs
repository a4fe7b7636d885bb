//! Environment configuration.
//!
//! | variable | default |
//! |---|---|
//! | `DATA_DIR` | `/data` |
//! | `BACKUP_DIR` | `/backups` |
//! | `BACKUP_NAME` | `vault` |
//! | `PASSWORD` | required |
//! | `PRUNE_BACKUPS_DAYS` | `30` |
//! | `PRUNE_BACKUPS_COUNT` | `0` |
//! | `BACKUP_INTERVAL` | `6h` (minimum 1m) |
//! | `MAX_CONCURRENCY` | `4` |

use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;
use tracing::warn;

use crate::domain::Passphrase;
use crate::retention::RetentionPolicy;

pub const DEFAULT_MAX_CONCURRENCY: usize = 4;
pub const MIN_INTERVAL: Duration = Duration::from_secs(60);

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("PASSWORD is not set; export PASSWORD='your_password' to enable encrypted backups")]
    MissingPassphrase,

    #[error("invalid {key}: {value:?} is not an integer")]
    InvalidNumber { key: &'static str, value: String },

    #[error("invalid BACKUP_INTERVAL: {0:?} (expected e.g. 90s, 30m, 6h, 1h30m, 2d)")]
    InvalidInterval(String),
}

#[derive(Debug, Clone)]
pub struct Config {
    pub data_dir: PathBuf,
    pub backup_dir: PathBuf,
    pub backup_name: String,
    pub passphrase: Passphrase,
    pub prune_days: u32,
    pub prune_count: usize,
    /// Resolved from `prune_days` / `prune_count`.
    pub retention: RetentionPolicy,
    pub interval: Duration,
    pub max_concurrency: usize,
}

impl Config {
    /// Load from the process environment.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Load from an arbitrary key lookup.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str, default: &str| lookup(key).unwrap_or_else(|| default.to_string());

        let passphrase = Passphrase::new(lookup("PASSWORD").unwrap_or_default());
        if passphrase.is_blank() {
            return Err(ConfigError::MissingPassphrase);
        }

        // negative values clamp to 0 ("unset")
        let prune_days = parse_int("PRUNE_BACKUPS_DAYS", &get("PRUNE_BACKUPS_DAYS", "30"))?
            .clamp(0, i64::from(u32::MAX)) as u32;
        let prune_count =
            parse_int("PRUNE_BACKUPS_COUNT", &get("PRUNE_BACKUPS_COUNT", "0"))?.max(0) as usize;

        let mut interval = parse_interval(&get("BACKUP_INTERVAL", "6h"))?;
        if interval < MIN_INTERVAL {
            warn!(?interval, "BACKUP_INTERVAL below one minute, using 1m");
            interval = MIN_INTERVAL;
        }

        let requested = lookup("MAX_CONCURRENCY");
        let max_concurrency = match requested.map(|v| v.trim().parse::<usize>()) {
            Some(Ok(n)) if n > 0 => n,
            Some(_) => {
                warn!(
                    default = DEFAULT_MAX_CONCURRENCY,
                    "invalid MAX_CONCURRENCY, using default"
                );
                DEFAULT_MAX_CONCURRENCY
            }
            None => DEFAULT_MAX_CONCURRENCY,
        };

        Ok(Self {
            data_dir: PathBuf::from(get("DATA_DIR", "/data")),
            backup_dir: PathBuf::from(get("BACKUP_DIR", "/backups")),
            backup_name: get("BACKUP_NAME", "vault"),
            passphrase,
            prune_days,
            prune_count,
            retention: RetentionPolicy::resolve(prune_days, prune_count),
            interval,
            max_concurrency,
        })
    }
}

fn parse_int(key: &'static str, value: &str) -> Result<i64, ConfigError> {
    value.trim().parse().map_err(|_| ConfigError::InvalidNumber {
        key,
        value: value.to_string(),
    })
}

/// Parse `90s`, `30m`, `6h`, `2d`, or combinations like `1h30m`.
pub fn parse_interval(value: &str) -> Result<Duration, ConfigError> {
    let invalid = || ConfigError::InvalidInterval(value.to_string());
    let s = value.trim();
    if s.is_empty() {
        return Err(invalid());
    }

    let mut total: u64 = 0;
    let mut digits = String::new();
    for c in s.chars() {
        if c.is_ascii_digit() {
            digits.push(c);
            continue;
        }
        let unit = match c {
            's' => 1,
            'm' => 60,
            'h' => 60 * 60,
            'd' => 24 * 60 * 60,
            _ => return Err(invalid()),
        };
        let n: u64 = digits.parse().map_err(|_| invalid())?;
        total = n
            .checked_mul(unit)
            .and_then(|secs| total.checked_add(secs))
            .ok_or_else(invalid)?;
        digits.clear();
    }
    // trailing number without a unit
    if !digits.is_empty() {
        return Err(invalid());
    }
    Ok(Duration::from_secs(total))
}
