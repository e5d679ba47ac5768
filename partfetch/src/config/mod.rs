//! User configuration.
//!
//! Settings live in an INI file under the platform config directory
//! (`~/.config/partfetch/config.ini` on Linux). Every value is optional in
//! the file; anything missing falls back to the built-in default. Command
//! line flags override whatever is loaded here.
//!
//! ```ini
//! [download]
//! chunk_size = 100M
//! jobs = 4
//! retries = 10
//!
//! [hooks]
//! command = gzip -k {part}
//! jobs = 0
//!
//! [logging]
//! level = info
//! ```

mod keys;
mod size;

pub use keys::ConfigKey;
pub use size::{format_size, parse_size};

use std::path::{Path, PathBuf};
use std::time::Duration;

use ini::Ini;
use thiserror::Error;

use crate::download::DEFAULT_CHUNK_SIZE;
use crate::hooks::DEFAULT_HOOK_CONCURRENCY;
use crate::scheduler::{DEFAULT_CONCURRENCY, DEFAULT_MAX_RETRIES};
use crate::transport::TransportConfig;

/// Accepted values for `logging.level`.
pub const LOG_LEVELS: [&str; 5] = ["trace", "debug", "info", "warn", "error"];

/// Default log level.
pub const DEFAULT_LOG_LEVEL: &str = "info";

const CONFIG_DIR_NAME: &str = "partfetch";
const CONFIG_FILE_NAME: &str = "config.ini";

/// Errors from loading, saving or editing the configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to access config file {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse config file {}: {message}", .path.display())]
    Parse { path: PathBuf, message: String },

    #[error("Invalid value '{value}' for {key}: {reason}")]
    InvalidValue {
        key: String,
        value: String,
        reason: String,
    },

    #[error("Invalid size '{value}': {reason}")]
    InvalidSize { value: String, reason: String },

    #[error("Could not determine the user config directory")]
    NoConfigDir,

    #[error("Unknown configuration key '{0}'")]
    UnknownKey(String),
}

/// `[download]` section.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DownloadSettings {
    pub chunk_size: u64,
    pub jobs: usize,
    pub retries: u32,
    pub connect_timeout: Duration,
    pub read_timeout: Duration,
    pub proxy: Option<String>,
    pub output_dir: Option<PathBuf>,
}

impl Default for DownloadSettings {
    fn default() -> Self {
        let transport = TransportConfig::default();
        Self {
            chunk_size: DEFAULT_CHUNK_SIZE,
            jobs: DEFAULT_CONCURRENCY,
            retries: DEFAULT_MAX_RETRIES,
            connect_timeout: transport.connect_timeout,
            read_timeout: transport.read_timeout,
            proxy: None,
            output_dir: None,
        }
    }
}

impl DownloadSettings {
    /// Transport settings derived from this section.
    pub fn transport(&self) -> TransportConfig {
        TransportConfig {
            proxy: self.proxy.clone(),
            connect_timeout: self.connect_timeout,
            read_timeout: self.read_timeout,
        }
    }
}

/// `[hooks]` section.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HookSettings {
    pub command: Option<String>,
    /// Zero selects [`DEFAULT_HOOK_CONCURRENCY`].
    pub jobs: usize,
}

impl HookSettings {
    /// Effective hook worker count.
    pub fn workers(&self) -> usize {
        if self.jobs == 0 {
            DEFAULT_HOOK_CONCURRENCY
        } else {
            self.jobs
        }
    }
}

/// `[logging]` section.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoggingSettings {
    pub level: String,
    /// When set, logs are also written to a daily rolling file here.
    pub directory: Option<PathBuf>,
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            level: DEFAULT_LOG_LEVEL.to_string(),
            directory: None,
        }
    }
}

/// Parsed configuration file.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ConfigFile {
    pub download: DownloadSettings,
    pub hooks: HookSettings,
    pub logging: LoggingSettings,
}

impl ConfigFile {
    /// Load from the default location. A missing file yields defaults.
    pub fn load() -> Result<Self, ConfigError> {
        Self::load_from(&config_file_path()?)
    }

    /// Load from `path`. A missing file yields defaults.
    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            return Ok(Self::default());
        }

        let ini = Ini::load_from_file(path).map_err(|e| match e {
            ini::Error::Io(source) => ConfigError::Io {
                path: path.to_path_buf(),
                source,
            },
            ini::Error::Parse(err) => ConfigError::Parse {
                path: path.to_path_buf(),
                message: err.to_string(),
            },
        })?;

        Self::from_ini(&ini)
    }

    /// Save to the default location, creating the directory if needed.
    pub fn save(&self) -> Result<(), ConfigError> {
        self.save_to(&config_file_path()?)
    }

    /// Save to `path`, creating parent directories if needed.
    pub fn save_to(&self, path: &Path) -> Result<(), ConfigError> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).map_err(|source| ConfigError::Io {
                path: parent.to_path_buf(),
                source,
            })?;
        }

        self.to_ini()
            .write_to_file(path)
            .map_err(|source| ConfigError::Io {
                path: path.to_path_buf(),
                source,
            })
    }

    fn from_ini(ini: &Ini) -> Result<Self, ConfigError> {
        let mut config = Self::default();
        for key in ConfigKey::all() {
            let value = ini
                .section(Some(key.section()))
                .and_then(|section| section.get(key.key_name()));
            if let Some(value) = value {
                key.set(&mut config, value)?;
            }
        }
        Ok(config)
    }

    fn to_ini(&self) -> Ini {
        let mut ini = Ini::new();
        for key in ConfigKey::all() {
            let value = key.get(self);
            if !value.is_empty() {
                ini.with_section(Some(key.section()))
                    .set(key.key_name(), value);
            }
        }
        ini
    }
}

/// Location of the configuration file.
pub fn config_file_path() -> Result<PathBuf, ConfigError> {
    dirs::config_dir()
        .map(|dir| dir.join(CONFIG_DIR_NAME).join(CONFIG_FILE_NAME))
        .ok_or(ConfigError::NoConfigDir)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_defaults() {
        let config = ConfigFile::default();
        assert_eq!(config.download.chunk_size, 100_000_000);
        assert_eq!(config.download.jobs, 1);
        assert_eq!(config.download.retries, 10);
        assert_eq!(config.hooks.workers(), 10);
        assert_eq!(config.logging.level, "info");
    }

    #[test]
    fn test_missing_file_yields_defaults() {
        let dir = TempDir::new().unwrap();
        let config = ConfigFile::load_from(&dir.path().join("absent.ini")).unwrap();
        assert_eq!(config, ConfigFile::default());
    }

    #[test]
    fn test_load_partial_file() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("config.ini");
        std::fs::write(
            &path,
            "[download]\nchunk_size = 25M\njobs = 4\n\n[hooks]\ncommand = gzip -k {part}\njobs = 2\n",
        )
        .unwrap();

        let config = ConfigFile::load_from(&path).unwrap();

        assert_eq!(config.download.chunk_size, 25_000_000);
        assert_eq!(config.download.jobs, 4);
        assert_eq!(config.download.retries, 10);
        assert_eq!(config.hooks.command.as_deref(), Some("gzip -k {part}"));
        assert_eq!(config.hooks.workers(), 2);
    }

    #[test]
    fn test_load_rejects_bad_value() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("config.ini");
        std::fs::write(&path, "[download]\njobs = many\n").unwrap();

        let err = ConfigFile::load_from(&path).unwrap_err();
        assert!(matches!(err, ConfigError::InvalidValue { ref key, .. } if key == "download.jobs"));
    }

    #[test]
    fn test_save_and_reload() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("nested").join("config.ini");

        let mut config = ConfigFile::default();
        config.download.proxy = Some("http://proxy:3128".to_string());
        config.download.read_timeout = Duration::from_secs(5);
        config.logging.directory = Some(PathBuf::from("/var/log/partfetch"));
        config.save_to(&path).unwrap();

        let reloaded = ConfigFile::load_from(&path).unwrap();
        assert_eq!(reloaded, config);
    }

    #[test]
    fn test_transport_settings() {
        let mut settings = DownloadSettings::default();
        settings.proxy = Some("socks5://localhost:1080".to_string());

        let transport = settings.transport();
        assert_eq!(transport.proxy.as_deref(), Some("socks5://localhost:1080"));
        assert_eq!(transport.connect_timeout, settings.connect_timeout);
    }
}
