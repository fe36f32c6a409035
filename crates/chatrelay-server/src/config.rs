use std::env;
use std::fs;
use std::path::Path;

use serde::Deserialize;

/// Gateway runtime configuration.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    pub data_dir: String,
    pub billing_url: String,
    pub billing_api_key: String,
    /// In strict mode a failing billing call terminates the request.
    pub billing_strict: bool,
    pub upstream_url: String,
    pub upstream_api_key: String,
    pub upstream_model: String,
    pub notify_url: Option<String>,
    pub retention_days: u64,
}

#[derive(Debug, Deserialize, Default)]
struct FileConfig {
    #[serde(default)]
    server: ServerSection,
    #[serde(default)]
    storage: StorageSection,
    #[serde(default)]
    billing: BillingSection,
    #[serde(default)]
    upstream: UpstreamSection,
    #[serde(default)]
    notify: NotifySection,
}

#[derive(Debug, Deserialize)]
struct ServerSection {
    #[serde(default = "default_host")]
    host: String,
    #[serde(default = "default_port")]
    port: u16,
}

impl Default for ServerSection {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
        }
    }
}

#[derive(Debug, Deserialize)]
struct StorageSection {
    #[serde(default = "default_data_dir")]
    data_dir: String,
    #[serde(default = "default_retention_days")]
    retention_days: u64,
}

impl Default for StorageSection {
    fn default() -> Self {
        Self {
            data_dir: default_data_dir(),
            retention_days: default_retention_days(),
        }
    }
}

#[derive(Debug, Deserialize)]
struct BillingSection {
    #[serde(default)]
    url: String,
    #[serde(default)]
    api_key: String,
    #[serde(default = "default_billing_strict")]
    strict: bool,
}

impl Default for BillingSection {
    fn default() -> Self {
        Self {
            url: String::new(),
            api_key: String::new(),
            strict: default_billing_strict(),
        }
    }
}

#[derive(Debug, Deserialize)]
struct UpstreamSection {
    #[serde(default)]
    url: String,
    #[serde(default)]
    api_key: String,
    #[serde(default = "default_upstream_model")]
    model: String,
}

impl Default for UpstreamSection {
    fn default() -> Self {
        Self {
            url: String::new(),
            api_key: String::new(),
            model: default_upstream_model(),
        }
    }
}

#[derive(Debug, Deserialize, Default)]
struct NotifySection {
    #[serde(default)]
    url: Option<String>,
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    8080
}

fn default_data_dir() -> String {
    "./data/conversations".to_string()
}

fn default_retention_days() -> u64 {
    7
}

fn default_billing_strict() -> bool {
    true
}

fn default_upstream_model() -> String {
    "relay-large".to_string()
}

impl ServerConfig {
    pub fn load() -> anyhow::Result<Self> {
        if let Some(file_config) = load_from_file()? {
            return Ok(Self {
                host: file_config.server.host,
                port: file_config.server.port,
                data_dir: file_config.storage.data_dir,
                retention_days: file_config.storage.retention_days,
                billing_url: file_config.billing.url,
                billing_api_key: file_config.billing.api_key,
                billing_strict: file_config.billing.strict,
                upstream_url: file_config.upstream.url,
                upstream_api_key: file_config.upstream.api_key,
                upstream_model: file_config.upstream.model,
                notify_url: file_config.notify.url,
            });
        }

        Ok(Self::from_env())
    }

    fn from_env() -> Self {
        Self {
            host: env_or("CHATRELAY_SERVER_HOST", default_host),
            port: env::var("CHATRELAY_SERVER_PORT")
                .ok()
                .and_then(|value| value.parse().ok())
                .unwrap_or_else(default_port),
            data_dir: env_or("CHATRELAY_DATA_DIR", default_data_dir),
            retention_days: env::var("CHATRELAY_RETENTION_DAYS")
                .ok()
                .and_then(|value| value.parse().ok())
                .unwrap_or_else(default_retention_days),
            billing_url: env_or("CHATRELAY_BILLING_URL", String::new),
            billing_api_key: env_or("CHATRELAY_BILLING_API_KEY", String::new),
            billing_strict: env::var("CHATRELAY_BILLING_STRICT")
                .ok()
                .and_then(|value| value.parse().ok())
                .unwrap_or_else(default_billing_strict),
            upstream_url: env_or("CHATRELAY_UPSTREAM_URL", String::new),
            upstream_api_key: env_or("CHATRELAY_UPSTREAM_API_KEY", String::new),
            upstream_model: env_or("CHATRELAY_UPSTREAM_MODEL", default_upstream_model),
            notify_url: env::var("CHATRELAY_NOTIFY_URL").ok(),
        }
    }
}

fn env_or(key: &str, default: impl FnOnce() -> String) -> String {
    env::var(key).unwrap_or_else(|_| default())
}

fn load_from_file() -> anyhow::Result<Option<FileConfig>> {
    let path = env::var("CHATRELAY_CONFIG").unwrap_or_else(|_| "chatrelay.toml".to_string());
    if !Path::new(&path).exists() {
        return Ok(None);
    }
    let raw = fs::read_to_string(&path)?;
    let config = toml::from_str(&raw)?;
    Ok(Some(config))
}
