//! Configuration for approvald

use approval_engine::EngineConfig;
use approval_types::Channel;
use serde::{Deserialize, Serialize};

/// Main daemon configuration
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct DaemonConfig {
    /// Engine configuration
    #[serde(default)]
    pub engine: EngineConfig,

    /// Definition and directory files
    #[serde(default)]
    pub data: DataConfig,

    /// Notification transports
    #[serde(default)]
    pub transports: TransportConfig,

    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Files loaded at startup
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct DataConfig {
    /// JSON array of workflow definitions
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub definitions: Option<String>,

    /// JSON object of tenant id → directory data
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub directory: Option<String>,
}

/// Transport configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransportConfig {
    /// Endpoint for WEBHOOK notifications
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub webhook_url: Option<String>,

    /// Webhook request timeout in seconds
    #[serde(default = "default_webhook_timeout")]
    pub webhook_timeout_secs: u64,

    /// Channels delivered to the log instead of a gateway
    #[serde(default = "default_log_channels")]
    pub log_channels: Vec<Channel>,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            webhook_url: None,
            webhook_timeout_secs: default_webhook_timeout(),
            log_channels: default_log_channels(),
        }
    }
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level
    #[serde(default = "default_log_level")]
    pub level: String,

    /// JSON format
    #[serde(default)]
    pub json: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            json: false,
        }
    }
}

// Default value helpers
fn default_webhook_timeout() -> u64 {
    10
}

fn default_log_channels() -> Vec<Channel> {
    vec![Channel::Email, Channel::Sms, Channel::Push]
}

fn default_log_level() -> String {
    "info".to_string()
}

impl DaemonConfig {
    /// Load configuration: defaults, then the optional file, then
    /// `APPROVAL_`-prefixed environment variables (`__` separates nested
    /// keys, e.g. `APPROVAL_DATA__DEFINITIONS`)
    pub fn load(path: Option<&str>) -> Result<Self, config::ConfigError> {
        let mut builder = config::Config::builder();

        // Add default configuration
        builder = builder.add_source(config::Config::try_from(&DaemonConfig::default())?);

        // Add file configuration if provided
        if let Some(path) = path {
            builder = builder.add_source(config::File::with_name(path).required(false));
        }

        // Add environment variables with APPROVAL_ prefix
        builder = builder.add_source(
            config::Environment::with_prefix("APPROVAL")
                .prefix_separator("_")
                .separator("__")
                .try_parsing(true),
        );

        builder.build()?.try_deserialize()
    }
}
