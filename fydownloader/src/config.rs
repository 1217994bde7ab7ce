//! Configuration for download sessions.
//!
//! [`DownloaderConfig`] is the runtime configuration handed to a
//! [`Downloader`](crate::session::Downloader). [`ConfigFile`] is the on-disk
//! INI representation a front end loads and converts into it.

use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use ini::Ini;
use thiserror::Error;

/// Default buffer size for body reads and temp-file copies (64KB).
pub const DEFAULT_BUFFER_SIZE: usize = 64 * 1024;

/// Default number of concurrent chunk fetches.
pub const DEFAULT_WORKERS: usize = 4;

/// Default user agent sent with every request.
pub const DEFAULT_USER_AGENT: &str = concat!("fydownloader/", env!("CARGO_PKG_VERSION"));

/// Where fetched bytes are written while a download is in flight.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SinkStrategy {
    /// Positioned writes straight into the final file. No assembly pass.
    #[default]
    Direct,
    /// One private temp file per chunk, spliced into the final file at the end.
    TempFiles,
}

impl fmt::Display for SinkStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SinkStrategy::Direct => f.write_str("direct"),
            SinkStrategy::TempFiles => f.write_str("temp"),
        }
    }
}

impl FromStr for SinkStrategy {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "direct" => Ok(SinkStrategy::Direct),
            "temp" | "tempfiles" | "temp_files" => Ok(SinkStrategy::TempFiles),
            other => Err(ConfigError::InvalidValue {
                key: "download.sink".to_string(),
                value: other.to_string(),
                reason: "expected 'direct' or 'temp'".to_string(),
            }),
        }
    }
}

/// Runtime configuration for a [`Downloader`](crate::session::Downloader).
#[derive(Debug, Clone)]
pub struct DownloaderConfig {
    /// Directory the finished file is written to.
    pub destination_dir: PathBuf,

    /// Directory for per-chunk temp files under [`SinkStrategy::TempFiles`].
    /// Each session works in its own subdirectory.
    pub temp_dir: PathBuf,

    /// How fetched bytes reach the final file.
    pub sink: SinkStrategy,

    /// Size of write and copy buffers, in bytes.
    pub buffer_size: usize,

    /// Overall timeout per HTTP request. `None` waits indefinitely.
    pub request_timeout: Option<Duration>,

    /// Connect timeout per HTTP request. `None` uses the client default.
    pub connect_timeout: Option<Duration>,

    /// User agent header value.
    pub user_agent: String,
}

impl Default for DownloaderConfig {
    fn default() -> Self {
        Self {
            destination_dir: PathBuf::from("."),
            temp_dir: std::env::temp_dir().join("fydownloader-parts"),
            sink: SinkStrategy::default(),
            buffer_size: DEFAULT_BUFFER_SIZE,
            request_timeout: None,
            connect_timeout: None,
            user_agent: DEFAULT_USER_AGENT.to_string(),
        }
    }
}

impl DownloaderConfig {
    /// Create a configuration writing finished files into `destination_dir`.
    pub fn new(destination_dir: impl Into<PathBuf>) -> Self {
        Self {
            destination_dir: destination_dir.into(),
            ..Default::default()
        }
    }

    /// Set the directory finished files are written to.
    pub fn with_destination_dir(mut self, path: impl Into<PathBuf>) -> Self {
        self.destination_dir = path.into();
        self
    }

    /// Set the temp-file directory.
    pub fn with_temp_dir(mut self, path: impl Into<PathBuf>) -> Self {
        self.temp_dir = path.into();
        self
    }

    /// Set the sink strategy.
    pub fn with_sink(mut self, sink: SinkStrategy) -> Self {
        self.sink = sink;
        self
    }

    /// Set the buffer size (minimum 1).
    pub fn with_buffer_size(mut self, size: usize) -> Self {
        self.buffer_size = size.max(1);
        self
    }

    /// Set the per-request timeout.
    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = Some(timeout);
        self
    }

    /// Set the connect timeout.
    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = Some(timeout);
        self
    }

    /// Build the HTTP client described by this configuration.
    pub fn build_client(&self) -> Result<reqwest::Client, reqwest::Error> {
        let mut builder = reqwest::Client::builder().user_agent(self.user_agent.clone());
        if let Some(timeout) = self.request_timeout {
            builder = builder.timeout(timeout);
        }
        if let Some(timeout) = self.connect_timeout {
            builder = builder.connect_timeout(timeout);
        }
        builder.build()
    }
}

// =============================================================================
// Config file
// =============================================================================

/// Errors raised while loading or saving the config file.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The file exists but could not be read or parsed.
    #[error("failed to load config {}: {reason}", path.display())]
    Load { path: PathBuf, reason: String },

    /// The file could not be written.
    #[error("failed to save config {}: {source}", path.display())]
    Save {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// A key holds a value of the wrong shape.
    #[error("invalid value '{value}' for {key}: {reason}")]
    InvalidValue {
        key: String,
        value: String,
        reason: String,
    },

    /// No per-user configuration directory exists on this platform.
    #[error("no configuration directory available")]
    NoConfigDir,
}

/// `[download]` section of the config file.
#[derive(Debug, Clone, PartialEq)]
pub struct DownloadSection {
    pub workers: usize,
    pub destination: PathBuf,
    pub sink: SinkStrategy,
    pub buffer_size: usize,
    /// Request timeout in seconds; 0 disables it.
    pub timeout: u64,
    /// Connect timeout in seconds; 0 keeps the client default.
    pub connect_timeout: u64,
    pub temp_dir: Option<PathBuf>,
}

impl Default for DownloadSection {
    fn default() -> Self {
        Self {
            workers: DEFAULT_WORKERS,
            destination: PathBuf::from("."),
            sink: SinkStrategy::default(),
            buffer_size: DEFAULT_BUFFER_SIZE,
            timeout: 0,
            connect_timeout: 0,
            temp_dir: None,
        }
    }
}

/// `[logging]` section of the config file.
#[derive(Debug, Clone, PartialEq)]
pub struct LoggingSection {
    /// Default filter directive, e.g. `info` or `fydownloader=debug`.
    pub level: String,
    /// Optional log file; logs go to stderr only when unset.
    pub file: Option<PathBuf>,
}

impl Default for LoggingSection {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            file: None,
        }
    }
}

/// Contents of `config.ini`.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ConfigFile {
    pub download: DownloadSection,
    pub logging: LoggingSection,
}

/// Default location of the config file: `<config dir>/fydownloader/config.ini`.
pub fn config_file_path() -> Result<PathBuf, ConfigError> {
    dirs::config_dir()
        .map(|dir| dir.join("fydownloader").join("config.ini"))
        .ok_or(ConfigError::NoConfigDir)
}

fn parse_value<T: FromStr>(key: &str, value: &str) -> Result<T, ConfigError>
where
    T::Err: fmt::Display,
{
    value
        .trim()
        .parse::<T>()
        .map_err(|e| ConfigError::InvalidValue {
            key: key.to_string(),
            value: value.to_string(),
            reason: e.to_string(),
        })
}

fn non_empty_path(value: &str) -> Option<PathBuf> {
    let value = value.trim();
    (!value.is_empty()).then(|| PathBuf::from(value))
}

impl ConfigFile {
    /// Load from `path`, falling back to defaults when the file does not exist.
    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let ini = Ini::load_from_file(path).map_err(|e| ConfigError::Load {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;
        Self::from_ini(&ini)
    }

    /// Parse from INI text.
    pub fn parse(text: &str) -> Result<Self, ConfigError> {
        let ini = Ini::load_from_str(text).map_err(|e| ConfigError::Load {
            path: PathBuf::from("<string>"),
            reason: e.to_string(),
        })?;
        Self::from_ini(&ini)
    }

    fn from_ini(ini: &Ini) -> Result<Self, ConfigError> {
        let mut config = Self::default();

        if let Some(section) = ini.section(Some("download")) {
            let download = &mut config.download;
            if let Some(v) = section.get("workers") {
                download.workers = parse_value::<usize>("download.workers", v)?;
                if download.workers == 0 {
                    return Err(ConfigError::InvalidValue {
                        key: "download.workers".to_string(),
                        value: v.to_string(),
                        reason: "must be at least 1".to_string(),
                    });
                }
            }
            if let Some(v) = section.get("destination").and_then(non_empty_path) {
                download.destination = v;
            }
            if let Some(v) = section.get("sink") {
                download.sink = v.parse()?;
            }
            if let Some(v) = section.get("buffer_size") {
                download.buffer_size = parse_value::<usize>("download.buffer_size", v)?;
                if download.buffer_size == 0 {
                    return Err(ConfigError::InvalidValue {
                        key: "download.buffer_size".to_string(),
                        value: v.to_string(),
                        reason: "must be greater than 0".to_string(),
                    });
                }
            }
            if let Some(v) = section.get("timeout") {
                download.timeout = parse_value::<u64>("download.timeout", v)?;
            }
            if let Some(v) = section.get("connect_timeout") {
                download.connect_timeout = parse_value::<u64>("download.connect_timeout", v)?;
            }
            download.temp_dir = section.get("temp_dir").and_then(non_empty_path);
        }

        if let Some(section) = ini.section(Some("logging")) {
            if let Some(v) = section.get("level") {
                let level = v.trim();
                if !level.is_empty() {
                    config.logging.level = level.to_string();
                }
            }
            config.logging.file = section.get("file").and_then(non_empty_path);
        }

        Ok(config)
    }

    /// Serialize into an INI document.
    pub fn to_ini(&self) -> Ini {
        let mut ini = Ini::new();
        let download = &self.download;
        ini.with_section(Some("download"))
            .set("workers", download.workers.to_string())
            .set("destination", download.destination.to_string_lossy())
            .set("sink", download.sink.to_string())
            .set("buffer_size", download.buffer_size.to_string())
            .set("timeout", download.timeout.to_string())
            .set("connect_timeout", download.connect_timeout.to_string())
            .set(
                "temp_dir",
                download
                    .temp_dir
                    .as_ref()
                    .map(|p| p.to_string_lossy().to_string())
                    .unwrap_or_default(),
            );
        ini.with_section(Some("logging"))
            .set("level", self.logging.level.clone())
            .set(
                "file",
                self.logging
                    .file
                    .as_ref()
                    .map(|p| p.to_string_lossy().to_string())
                    .unwrap_or_default(),
            );
        ini
    }

    /// Write to `path`, creating parent directories as needed.
    pub fn save_to(&self, path: &Path) -> Result<(), ConfigError> {
        let to_save_error = |source| ConfigError::Save {
            path: path.to_path_buf(),
            source,
        };
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(to_save_error)?;
        }
        self.to_ini().write_to_file(path).map_err(to_save_error)
    }

    /// Convert into the runtime configuration.
    pub fn to_downloader_config(&self) -> DownloaderConfig {
        let download = &self.download;
        let mut config = DownloaderConfig::new(download.destination.clone())
            .with_sink(download.sink)
            .with_buffer_size(download.buffer_size);
        if download.timeout > 0 {
            config = config.with_request_timeout(Duration::from_secs(download.timeout));
        }
        if download.connect_timeout > 0 {
            config = config.with_connect_timeout(Duration::from_secs(download.connect_timeout));
        }
        if let Some(ref temp_dir) = download.temp_dir {
            config = config.with_temp_dir(temp_dir.clone());
        }
        config
    }
}
