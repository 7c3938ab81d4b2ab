use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::debug;

use convctx_core::IdStrategy;

#[derive(Debug, Deserialize, Serialize, Clone, Default)]
pub struct Config {
    #[serde(default)]
    pub conversation: ConversationSettings,
    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct ConversationSettings {
    /// Request parameter carrying the conversation id.
    #[serde(default = "ConversationSettings::default_parameter_name")]
    pub parameter_name: String,
    /// Inactivity period after which a conversation can no longer be restored.
    #[serde(default = "ConversationSettings::default_timeout_ms")]
    pub default_timeout_ms: u64,
    /// Longest wait for another request to release a conversation.
    #[serde(default = "ConversationSettings::default_concurrent_access_timeout_ms")]
    pub concurrent_access_timeout_ms: u64,
    /// Prefix for the attribute names of conversation stores.
    #[serde(default = "ConversationSettings::default_store_prefix")]
    pub store_prefix: String,
    #[serde(default)]
    pub id_strategy: IdStrategy,
}

impl Default for ConversationSettings {
    fn default() -> Self {
        Self {
            parameter_name: Self::default_parameter_name(),
            default_timeout_ms: Self::default_timeout_ms(),
            concurrent_access_timeout_ms: Self::default_concurrent_access_timeout_ms(),
            store_prefix: Self::default_store_prefix(),
            id_strategy: IdStrategy::default(),
        }
    }
}

impl ConversationSettings {
    fn default_parameter_name() -> String {
        "cid".to_string()
    }

    const fn default_timeout_ms() -> u64 {
        10 * 60 * 1000
    }

    const fn default_concurrent_access_timeout_ms() -> u64 {
        1000
    }

    fn default_store_prefix() -> String {
        "convctx.conversation".to_string()
    }

    #[must_use]
    pub const fn default_timeout(&self) -> Duration {
        Duration::from_millis(self.default_timeout_ms)
    }

    #[must_use]
    pub const fn concurrent_access_timeout(&self) -> Duration {
        Duration::from_millis(self.concurrent_access_timeout_ms)
    }
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct LoggingConfig {
    #[serde(default = "LoggingConfig::default_level")]
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: Self::default_level(),
        }
    }
}

impl LoggingConfig {
    fn default_level() -> String {
        "info".to_string()
    }
}

impl Config {
    pub fn config_path() -> anyhow::Result<PathBuf> {
        Ok(dirs::home_dir()
            .ok_or_else(|| anyhow::anyhow!("Cannot find home directory"))?
            .join("convctx")
            .join("config.json"))
    }

    pub fn load() -> anyhow::Result<Self> {
        let config_path = Self::config_path()?;

        if !config_path.exists() {
            anyhow::bail!(
                "Config file not found at: {}. Please run 'convctx init' to create config.",
                config_path.display()
            );
        }

        Self::load_from(&config_path)
    }

    /// Like [`Config::load`], but falls back to defaults when no file exists.
    pub fn load_or_default() -> anyhow::Result<Self> {
        let config_path = Self::config_path()?;
        if config_path.exists() {
            Self::load_from(&config_path)
        } else {
            debug!("No config at {}, using defaults", config_path.display());
            Ok(Self::default())
        }
    }

    pub fn load_from(path: &Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Self = serde_json::from_str(&content)?;
        Ok(config)
    }

    pub fn ensure_config_dir() -> anyhow::Result<PathBuf> {
        let config_dir = dirs::home_dir()
            .ok_or_else(|| anyhow::anyhow!("Cannot find home directory"))?
            .join("convctx");

        std::fs::create_dir_all(&config_dir)?;
        Ok(config_dir)
    }

    pub fn create_config() -> anyhow::Result<PathBuf> {
        let config_dir = Self::ensure_config_dir()?;
        let config_path = config_dir.join("config.json");

        if config_path.exists() {
            anyhow::bail!(
                "Config file already exists at: {}. Please edit it directly.",
                config_path.display()
            );
        }

        let config_template = r#"{
  "conversation": {
    "parameter_name": "cid",
    "default_timeout_ms": 600000,
    "concurrent_access_timeout_ms": 1000,
    "store_prefix": "convctx.conversation",
    "id_strategy": "sequential"
  },
  "logging": {
    "level": "info"
  }
}"#;

        std::fs::write(&config_path, config_template)?;

        println!("✅ Created config file at: {}", config_path.display());
        println!();
        println!("🔧 Configuration options:");
        println!("   - default_timeout_ms: inactivity before a conversation expires");
        println!(
            "   - concurrent_access_timeout_ms: wait for a conversation held by another request"
        );
        println!("   - id_strategy: sequential or uuid");
        println!();
        Ok(config_path)
    }
}
