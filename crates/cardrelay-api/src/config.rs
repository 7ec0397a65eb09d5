use cardrelay_core::{BufferConfig, PoolConfig, RelayConfig, SessionConfig};
use cardrelay_llm::BackendConfig;
use config::{Config as ConfigLoader, ConfigError, File};
use serde::Deserialize;
use std::path::Path;

/// Environment prefixes and the config section each one overrides
const ENV_SECTIONS: &[(&str, &str)] = &[
    ("SERVER_", "server"),
    ("FEISHU_", "feishu"),
    ("DIFY_", "dify"),
    ("POOL_", "pool"),
    ("BUFFER_", "buffer"),
    ("SESSION_", "session"),
    ("LOG_", "logging"),
];

/// Variables that share a section prefix but are secrets, read separately
const SECRET_VARS: &[&str] = &[
    "FEISHU_APP_ID",
    "FEISHU_APP_SECRET",
    "FEISHU_VERIFICATION_TOKEN",
    "DIFY_API_KEY",
];

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub feishu: FeishuConfig,
    #[serde(default)]
    pub dify: DifyConfig,
    #[serde(default)]
    pub pool: PoolConfig,
    #[serde(default)]
    pub buffer: BufferConfig,
    #[serde(default)]
    pub session: SessionConfig,
    #[serde(default)]
    pub logging: LoggingConfig,

    // Secrets (from ENV only)
    #[serde(default)]
    pub feishu_app_id: String,
    #[serde(default)]
    pub feishu_app_secret: String,
    #[serde(default)]
    pub dify_api_key: String,
    #[serde(default)]
    pub feishu_verification_token: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    pub request_timeout_secs: u64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8080,
            request_timeout_secs: 30,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct FeishuConfig {
    pub api_endpoint: String,
    pub timeout_secs: u64,
    pub card_title: String,
    /// Chat-list preview shown while the answer streams
    pub card_summary: String,
}

impl Default for FeishuConfig {
    fn default() -> Self {
        Self {
            api_endpoint: "https://open.feishu.cn/open-apis".to_string(),
            timeout_secs: 10,
            card_title: "AI助手".to_string(),
            card_summary: "[生成中]".to_string(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct DifyConfig {
    pub base_url: String,
    pub timeout_secs: u64,
}

impl Default for DifyConfig {
    fn default() -> Self {
        Self {
            base_url: "https://api.dify.ai/v1".to_string(),
            timeout_secs: 30,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: String,
    pub format: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: "pretty".to_string(),
        }
    }
}

impl Config {
    /// Load configuration from TOML files and environment variables
    ///
    /// Hierarchy (weakest to strongest):
    /// 1. config/default.toml
    /// 2. config/{ENV}.toml (if ENV is set)
    /// 3. Environment variables (SERVER_PORT, POOL_TARGET_SIZE, LOG_LEVEL, ...)
    pub fn load() -> Result<Self, ConfigError> {
        let env = std::env::var("ENV").unwrap_or_else(|_| "dev".to_string());

        let mut builder = ConfigLoader::builder()
            .add_source(File::with_name("config/default").required(false))
            .add_source(File::with_name(&format!("config/{}", env)).required(false));

        for (key, value) in env_overrides(std::env::vars()) {
            builder = builder.set_override(key, value)?;
        }

        let mut cfg: Config = builder.build()?.try_deserialize()?;

        cfg.feishu_app_id = required_secret("FEISHU_APP_ID")?;
        cfg.feishu_app_secret = required_secret("FEISHU_APP_SECRET")?;
        cfg.dify_api_key = required_secret("DIFY_API_KEY")?;
        cfg.feishu_verification_token = std::env::var("FEISHU_VERIFICATION_TOKEN")
            .ok()
            .filter(|token| !token.is_empty());

        Ok(cfg)
    }

    /// Load config from a specific path (useful for testing)
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let builder = ConfigLoader::builder().add_source(File::from(path.as_ref()));

        let config = builder.build()?;
        config.try_deserialize()
    }

    pub fn relay(&self) -> RelayConfig {
        RelayConfig {
            pool: self.pool.clone(),
            buffer: self.buffer.clone(),
            session: self.session.clone(),
        }
    }

    pub fn backend(&self) -> BackendConfig {
        BackendConfig::new(self.dify_api_key.clone())
            .with_base_url(self.dify.base_url.clone())
            .with_timeout_secs(self.dify.timeout_secs)
    }
}

/// Map `POOL_TARGET_SIZE=8` style variables onto `pool.target_size` keys
pub fn env_overrides<I>(vars: I) -> Vec<(String, String)>
where
    I: IntoIterator<Item = (String, String)>,
{
    vars.into_iter()
        .filter(|(name, _)| !SECRET_VARS.contains(&name.as_str()))
        .filter_map(|(name, value)| {
            ENV_SECTIONS.iter().find_map(|(prefix, section)| {
                let field = name.strip_prefix(prefix)?;
                if field.is_empty() {
                    return None;
                }
                Some((format!("{}.{}", section, field.to_lowercase()), value.clone()))
            })
        })
        .collect()
}

fn required_secret(name: &str) -> Result<String, ConfigError> {
    std::env::var(name)
        .ok()
        .filter(|value| !value.is_empty())
        .ok_or_else(|| ConfigError::Message(format!("{} environment variable is required", name)))
}
