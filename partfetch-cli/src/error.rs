//! CLI error type.

use std::fmt;

use partfetch::config::ConfigError;
use partfetch::download::DownloadError;
use partfetch::logging::LoggingError;
use partfetch::merge::MergeError;
use partfetch::transport::TransportError;

/// Errors surfaced to the user by the CLI.
#[derive(Debug)]
pub enum CliError {
    /// Invalid arguments or settings.
    Config(String),
    /// The configuration file could not be read or written.
    ConfigFile(ConfigError),
    /// Logging could not be initialised.
    Logging(LoggingError),
    /// The HTTP client could not be built.
    Transport(TransportError),
    /// The download failed.
    Download(DownloadError),
    /// The merge failed.
    Merge(MergeError),
    /// The async runtime could not be started.
    Runtime(std::io::Error),
}

impl fmt::Display for CliError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CliError::Config(msg) => write!(f, "{}", msg),
            CliError::ConfigFile(e) => write!(f, "{}", e),
            CliError::Logging(e) => write!(f, "Failed to initialize logging: {}", e),
            CliError::Transport(e) => write!(f, "{}", e),
            CliError::Download(e) => write!(f, "Download failed: {}", e),
            CliError::Merge(e) => write!(f, "Merge failed: {}", e),
            CliError::Runtime(e) => write!(f, "Failed to start async runtime: {}", e),
        }
    }
}

impl std::error::Error for CliError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            CliError::Config(_) => None,
            CliError::ConfigFile(e) => Some(e),
            CliError::Logging(e) => Some(e),
            CliError::Transport(e) => Some(e),
            CliError::Download(e) => Some(e),
            CliError::Merge(e) => Some(e),
            CliError::Runtime(e) => Some(e),
        }
    }
}

impl From<ConfigError> for CliError {
    fn from(e: ConfigError) -> Self {
        CliError::ConfigFile(e)
    }
}

impl From<LoggingError> for CliError {
    fn from(e: LoggingError) -> Self {
        CliError::Logging(e)
    }
}

impl From<TransportError> for CliError {
    fn from(e: TransportError) -> Self {
        CliError::Transport(e)
    }
}

impl From<DownloadError> for CliError {
    fn from(e: DownloadError) -> Self {
        CliError::Download(e)
    }
}

impl From<MergeError> for CliError {
    fn from(e: MergeError) -> Self {
        CliError::Merge(e)
    }
}

impl CliError {
    /// Print the error and its causes to stderr and exit with status 1.
    pub fn exit(&self) -> ! {
        eprintln!("Error: {}", self);

        let mut source = std::error::Error::source(self);
        while let Some(cause) = source {
            let text = cause.to_string();
            if !self.to_string().contains(&text) {
                eprintln!("  Caused by: {}", text);
            }
            source = cause.source();
        }

        std::process::exit(1);
    }
}
