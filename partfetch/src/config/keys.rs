//! Addressable configuration keys.
//!
//! Every setting of the INI file is reachable as `section.key`. Reading the
//! file goes through [`ConfigKey::set`] too, so validation lives in one place.

use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use super::size::{format_size, parse_size};
use super::{ConfigError, ConfigFile, LOG_LEVELS};

/// A single configuration setting.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ConfigKey {
    DownloadChunkSize,
    DownloadJobs,
    DownloadRetries,
    DownloadConnectTimeout,
    DownloadReadTimeout,
    DownloadProxy,
    DownloadOutputDir,
    HooksCommand,
    HooksJobs,
    LoggingLevel,
    LoggingDirectory,
}

impl ConfigKey {
    /// Every key, grouped by section.
    pub fn all() -> &'static [ConfigKey] {
        &[
            ConfigKey::DownloadChunkSize,
            ConfigKey::DownloadJobs,
            ConfigKey::DownloadRetries,
            ConfigKey::DownloadConnectTimeout,
            ConfigKey::DownloadReadTimeout,
            ConfigKey::DownloadProxy,
            ConfigKey::DownloadOutputDir,
            ConfigKey::HooksCommand,
            ConfigKey::HooksJobs,
            ConfigKey::LoggingLevel,
            ConfigKey::LoggingDirectory,
        ]
    }

    /// INI section name.
    pub fn section(&self) -> &'static str {
        match self {
            ConfigKey::DownloadChunkSize
            | ConfigKey::DownloadJobs
            | ConfigKey::DownloadRetries
            | ConfigKey::DownloadConnectTimeout
            | ConfigKey::DownloadReadTimeout
            | ConfigKey::DownloadProxy
            | ConfigKey::DownloadOutputDir => "download",
            ConfigKey::HooksCommand | ConfigKey::HooksJobs => "hooks",
            ConfigKey::LoggingLevel | ConfigKey::LoggingDirectory => "logging",
        }
    }

    /// Key name within the section.
    pub fn key_name(&self) -> &'static str {
        match self {
            ConfigKey::DownloadChunkSize => "chunk_size",
            ConfigKey::DownloadJobs => "jobs",
            ConfigKey::DownloadRetries => "retries",
            ConfigKey::DownloadConnectTimeout => "connect_timeout",
            ConfigKey::DownloadReadTimeout => "read_timeout",
            ConfigKey::DownloadProxy => "proxy",
            ConfigKey::DownloadOutputDir => "output_dir",
            ConfigKey::HooksCommand => "command",
            ConfigKey::HooksJobs => "jobs",
            ConfigKey::LoggingLevel => "level",
            ConfigKey::LoggingDirectory => "directory",
        }
    }

    /// Fully qualified name, `section.key`.
    pub fn name(&self) -> String {
        format!("{}.{}", self.section(), self.key_name())
    }

    /// Current value rendered as it would appear in the file. Unset
    /// optional values render as an empty string.
    pub fn get(&self, config: &ConfigFile) -> String {
        match self {
            ConfigKey::DownloadChunkSize => config.download.chunk_size.to_string(),
            ConfigKey::DownloadJobs => config.download.jobs.to_string(),
            ConfigKey::DownloadRetries => config.download.retries.to_string(),
            ConfigKey::DownloadConnectTimeout => {
                config.download.connect_timeout.as_secs().to_string()
            }
            ConfigKey::DownloadReadTimeout => config.download.read_timeout.as_secs().to_string(),
            ConfigKey::DownloadProxy => config.download.proxy.clone().unwrap_or_default(),
            ConfigKey::DownloadOutputDir => config
                .download
                .output_dir
                .as_ref()
                .map(|p| p.to_string_lossy().into_owned())
                .unwrap_or_default(),
            ConfigKey::HooksCommand => config.hooks.command.clone().unwrap_or_default(),
            ConfigKey::HooksJobs => config.hooks.jobs.to_string(),
            ConfigKey::LoggingLevel => config.logging.level.clone(),
            ConfigKey::LoggingDirectory => config
                .logging
                .directory
                .as_ref()
                .map(|p| p.to_string_lossy().into_owned())
                .unwrap_or_default(),
        }
    }

    /// Human-friendly rendering for listings.
    pub fn display_value(&self, config: &ConfigFile) -> String {
        match self {
            ConfigKey::DownloadChunkSize => format_size(config.download.chunk_size),
            ConfigKey::DownloadConnectTimeout | ConfigKey::DownloadReadTimeout => {
                format!("{}s", self.get(config))
            }
            _ => self.get(config),
        }
    }

    /// Validate `value` and store it. An empty value clears optional keys.
    pub fn set(&self, config: &mut ConfigFile, value: &str) -> Result<(), ConfigError> {
        let value = value.trim();
        match self {
            ConfigKey::DownloadChunkSize => {
                let size = parse_size(value).map_err(|e| self.invalid(value, &e.to_string()))?;
                if size == 0 {
                    return Err(self.invalid(value, "must be greater than zero"));
                }
                config.download.chunk_size = size;
            }
            ConfigKey::DownloadJobs => config.download.jobs = self.positive(value)? as usize,
            ConfigKey::DownloadRetries => {
                config.download.retries = value
                    .parse()
                    .map_err(|_| self.invalid(value, "expected a whole number"))?;
            }
            ConfigKey::DownloadConnectTimeout => {
                config.download.connect_timeout = Duration::from_secs(self.positive(value)?);
            }
            ConfigKey::DownloadReadTimeout => {
                config.download.read_timeout = Duration::from_secs(self.positive(value)?);
            }
            ConfigKey::DownloadProxy => config.download.proxy = non_empty(value),
            ConfigKey::DownloadOutputDir => {
                config.download.output_dir = non_empty(value).map(PathBuf::from);
            }
            ConfigKey::HooksCommand => config.hooks.command = non_empty(value),
            ConfigKey::HooksJobs => {
                config.hooks.jobs = value
                    .parse()
                    .map_err(|_| self.invalid(value, "expected a whole number (0 = default)"))?;
            }
            ConfigKey::LoggingLevel => {
                let level = value.to_ascii_lowercase();
                if !LOG_LEVELS.contains(&level.as_str()) {
                    return Err(self.invalid(value, &format!("expected one of {}", LOG_LEVELS.join(", "))));
                }
                config.logging.level = level;
            }
            ConfigKey::LoggingDirectory => {
                config.logging.directory = non_empty(value).map(PathBuf::from);
            }
        }
        Ok(())
    }

    fn positive(&self, value: &str) -> Result<u64, ConfigError> {
        match value.parse::<u64>() {
            Ok(n) if n > 0 => Ok(n),
            _ => Err(self.invalid(value, "expected a whole number greater than zero")),
        }
    }

    fn invalid(&self, value: &str, reason: &str) -> ConfigError {
        ConfigError::InvalidValue {
            key: self.name(),
            value: value.to_string(),
            reason: reason.to_string(),
        }
    }
}

fn non_empty(value: &str) -> Option<String> {
    if value.is_empty() {
        None
    } else {
        Some(value.to_string())
    }
}

impl fmt::Display for ConfigKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.section(), self.key_name())
    }
}

impl FromStr for ConfigKey {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (section, key) = s
            .split_once('.')
            .ok_or_else(|| ConfigError::UnknownKey(s.to_string()))?;

        ConfigKey::all()
            .iter()
            .copied()
            .find(|k| k.section() == section && k.key_name() == key)
            .ok_or_else(|| ConfigError::UnknownKey(s.to_string()))
    }
}
