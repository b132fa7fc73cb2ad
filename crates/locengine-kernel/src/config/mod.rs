//! Engine configuration
//!
//! A single immutable [`EngineConfig`] snapshot is built once at start-up and
//! shared as `Arc<EngineConfig>`. Nothing mutates it afterwards.
//!
//! ## Features
//!
//! - Defaults for every field, so partial files are accepted
//! - Loading from TOML, JSON or YAML (`config` feature)
//! - Auto-detection of format from file extension

use crate::types::EventMask;
use serde::{Deserialize, Serialize};
use std::time::Duration;

#[cfg(feature = "config")]
use config::{Config as Cfg, File};
#[cfg(feature = "config")]
pub use config::FileFormat;
#[cfg(feature = "config")]
use std::path::Path;


/// Configuration loading error
#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Config parsing error: {0}")]
    Parse(String),

    #[error("Unsupported format: {0}")]
    UnsupportedFormat(String),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Invalid value for {field}: {reason}")]
    Invalid { field: &'static str, reason: String },
}

/// Result type for config operations
pub type ConfigResult<T> = Result<T, ConfigError>;

/// Top-level engine configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Registry capacity.
    pub max_adapters: usize,
    /// Capabilities the transport never supports, masked out of the aggregate.
    pub excluded_event_mask: EventMask,
    pub ni: NiConfig,
    pub agps: AgpsConfig,
    pub queue: QueueConfig,
    pub logging: LoggingConfig,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            max_adapters: 10,
            excluded_event_mask: EventMask::NONE,
            ni: NiConfig::default(),
            agps: AgpsConfig::default(),
            queue: QueueConfig::default(),
            logging: LoggingConfig::default(),
        }
    }
}

impl EngineConfig {
    pub fn with_max_adapters(mut self, max: usize) -> Self {
        self.max_adapters = max;
        self
    }

    pub fn with_excluded_event_mask(mut self, mask: EventMask) -> Self {
        self.excluded_event_mask = mask;
        self
    }

    pub fn with_ni(mut self, ni: NiConfig) -> Self {
        self.ni = ni;
        self
    }

    pub fn with_agps(mut self, agps: AgpsConfig) -> Self {
        self.agps = agps;
        self
    }

    /// Rejects values the kernel cannot run with.
    pub fn validate(&self) -> ConfigResult<()> {
        if self.max_adapters == 0 {
            return Err(ConfigError::Invalid {
                field: "max_adapters",
                reason: "must be at least 1".to_string(),
            });
        }
        if self.queue.thread_name.is_empty() {
            return Err(ConfigError::Invalid {
                field: "queue.thread_name",
                reason: "must not be empty".to_string(),
            });
        }
        Ok(())
    }
}

/// Network-initiated session timing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct NiConfig {
    /// Used when the modem's hint is shorter than this.
    pub default_no_response_timeout_ms: u64,
    /// Added on top of the response window before auto-answering.
    pub grace_period_ms: u64,
}

impl Default for NiConfig {
    fn default() -> Self {
        Self {
            default_no_response_timeout_ms: 20_000,
            grace_period_ms: 5_000,
        }
    }
}

impl NiConfig {
    pub fn default_no_response_timeout(&self) -> Duration {
        Duration::from_millis(self.default_no_response_timeout_ms)
    }

    pub fn grace_period(&self) -> Duration {
        Duration::from_millis(self.grace_period_ms)
    }
}

/// AGPS / data connection arbitration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AgpsConfig {
    /// Whether the engine services AGPS, XTRA, time and NI requests itself.
    pub supports_agps_requests: bool,
    /// Creates the dedicated emergency data call machine.
    pub use_emergency_data_call: bool,
    /// Creates the cellular SUPL machine (MS-based / MS-assisted capable).
    pub supl_capable: bool,
    pub data_call_max_retries: u32,
    pub data_call_retry_delay_ms: u64,
}

impl Default for AgpsConfig {
    fn default() -> Self {
        Self {
            supports_agps_requests: true,
            use_emergency_data_call: true,
            supl_capable: true,
            data_call_max_retries: 4,
            data_call_retry_delay_ms: 500,
        }
    }
}

impl AgpsConfig {
    pub fn data_call_retry_delay(&self) -> Duration {
        Duration::from_millis(self.data_call_retry_delay_ms)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct QueueConfig {
    pub thread_name: String,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            thread_name: "loc-engine".to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// `tracing_subscriber::EnvFilter` directive, e.g. `"locengine_kernel=debug"`.
    pub directive: String,
    pub json: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            directive: "info".to_string(),
            json: false,
        }
    }
}

/// Detect configuration format from file extension
///
/// # Supported Extensions
///
/// - YAML: `.yaml`, `.yml`
/// - TOML: `.toml`
/// - JSON: `.json`
#[cfg(feature = "config")]
pub fn detect_format(path: &Path) -> ConfigResult<FileFormat> {
    let ext = path
        .extension()
        .and_then(|e| e.to_str())
        .ok_or_else(|| ConfigError::UnsupportedFormat("No file extension found".to_string()))?;

    match ext.to_lowercase().as_str() {
        "yaml" | "yml" => Ok(FileFormat::Yaml),
        "toml" => Ok(FileFormat::Toml),
        "json" => Ok(FileFormat::Json),
        _ => Err(ConfigError::UnsupportedFormat(ext.to_string())),
    }
}

#[cfg(feature = "config")]
impl EngineConfig {
    /// Parses a configuration string in the given format and validates it.
    ///
    /// ```rust,ignore
    /// let config = EngineConfig::from_str("max_adapters = 4", FileFormat::Toml)?;
    /// ```
    pub fn from_str(content: &str, format: FileFormat) -> ConfigResult<Self> {
        let config: EngineConfig = Cfg::builder()
            .add_source(File::from_str(content, format))
            .build()
            .map_err(|e| ConfigError::Parse(e.to_string()))?
            .try_deserialize()
            .map_err(|e| ConfigError::Serialization(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Loads a configuration file, detecting the format from its extension.
    pub fn load(path: impl AsRef<Path>) -> ConfigResult<Self> {
        let path = path.as_ref();
        let format = detect_format(path)?;
        let content = std::fs::read_to_string(path)?;
        Self::from_str(&content, format)
    }
}
