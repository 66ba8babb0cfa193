use std::time::Duration;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Invalid configuration: {0}")]
    ValidationError(String),
}

#[derive(Debug, Clone)]
pub struct Config {
    pub auth: AuthConfig,
    pub bus: BusConfig,
    pub node: NodeConfig,
    pub storage: StorageConfig,
    pub upload: UploadConfig,
    /// Maximum upload size in bytes
    pub max_upload_size: u64,
}

#[derive(Debug, Clone)]
pub struct NodeConfig {
    pub bind_address: String,
    /// Directory holding the metadata database
    pub data_dir: String,
    /// Directory with index.html, favicon.ico and static/
    pub asset_dir: String,
}

#[derive(Debug, Clone)]
pub struct AuthConfig {
    pub cookie_name: String,
    pub header_name: String,
    /// Lifetime of a freshly issued auth cookie (seconds)
    pub cookie_max_age: u64,
}

#[derive(Debug, Clone)]
pub struct BusConfig {
    /// Queue length of every subscriber stream. A full queue drops the newest message.
    pub subscriber_capacity: usize,
    /// Maximum number of undelivered messages kept per fire-once topic.
    pub backlog_limit: usize,
    /// Backlogs not touched for this long are discarded.
    pub backlog_ttl: Duration,
}

#[derive(Debug, Clone)]
pub struct StorageConfig {
    /// Root of the sharded blob tree
    pub blob_dir: String,
    /// How often the metadata store is compacted
    pub compact_interval: Duration,
}

#[derive(Debug, Clone)]
pub struct UploadConfig {
    /// Multipart field that carries the uploaded files
    pub field_name: String,
    /// Upper bound of concurrently running blob writes. Further uploads are rejected.
    pub max_in_flight: usize,
    /// Move records whose blob write failed to `failed` instead of leaving them `received`.
    pub persist_failures: bool,
    /// How long shutdown waits for in-flight blob writes
    pub shutdown_grace: Duration,
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            bind_address: "0.0.0.0:8080".to_string(),
            data_dir: "./var/cache".to_string(),
            asset_dir: "./html".to_string(),
        }
    }
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            cookie_name: "sfs_auth".to_string(),
            header_name: "X-SFS-Auth".to_string(),
            cookie_max_age: 36000,
        }
    }
}

impl Default for BusConfig {
    fn default() -> Self {
        Self {
            subscriber_capacity: 64,
            backlog_limit: 256,
            backlog_ttl: Duration::from_secs(300),
        }
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            blob_dir: "./var/data".to_string(),
            compact_interval: Duration::from_secs(300),
        }
    }
}

impl Default for UploadConfig {
    fn default() -> Self {
        Self {
            field_name: "files[]".to_string(),
            max_in_flight: 64,
            persist_failures: false,
            shutdown_grace: Duration::from_secs(10),
        }
    }
}

impl Config {
    /// Load configuration from environment variables.
    pub fn load() -> Result<Self, ConfigError> {
        let node = NodeConfig {
            bind_address: env_or("BIND_ADDRESS", "0.0.0.0:8080"),
            data_dir: env_or("DATA_DIR", "./var/cache"),
            asset_dir: env_or("ASSET_DIR", "./html"),
        };

        let auth = AuthConfig {
            cookie_name: env_or("AUTH_COOKIE_NAME", "sfs_auth"),
            header_name: env_or("AUTH_HEADER_NAME", "X-SFS-Auth"),
            cookie_max_age: env_parse("AUTH_COOKIE_MAX_AGE", 36000),
        };

        let bus = BusConfig {
            subscriber_capacity: env_parse("BUS_SUBSCRIBER_CAPACITY", 64),
            backlog_limit: env_parse("BUS_BACKLOG_LIMIT", 256),
            backlog_ttl: Duration::from_secs(env_parse("BUS_BACKLOG_TTL_SECS", 300)),
        };

        let storage = StorageConfig {
            blob_dir: env_or("BLOB_DIR", "./var/data"),
            compact_interval: Duration::from_secs(env_parse("COMPACT_INTERVAL_SECS", 300)),
        };

        let persist_failures = std::env::var("UPLOAD_PERSIST_FAILURES")
            .map(|v| v == "true" || v == "1")
            .unwrap_or(false);

        let upload = UploadConfig {
            field_name: env_or("UPLOAD_FIELD", "files[]"),
            max_in_flight: env_parse("UPLOAD_MAX_IN_FLIGHT", 64),
            persist_failures,
            shutdown_grace: Duration::from_secs(env_parse("SHUTDOWN_GRACE_SECS", 10)),
        };

        let max_upload_size = env_parse("MAX_UPLOAD_SIZE", 8 * 1024 * 1024); // 8MB

        let config = Config {
            auth,
            bus,
            node,
            storage,
            upload,
            max_upload_size,
        };

        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.upload.field_name.is_empty() {
            return Err(ConfigError::ValidationError(
                "UPLOAD_FIELD cannot be empty".to_string(),
            ));
        }

        if self.upload.max_in_flight == 0 {
            return Err(ConfigError::ValidationError(
                "UPLOAD_MAX_IN_FLIGHT must be greater than 0".to_string(),
            ));
        }

        if self.bus.subscriber_capacity == 0 || self.bus.backlog_limit == 0 {
            return Err(ConfigError::ValidationError(
                "BUS_SUBSCRIBER_CAPACITY and BUS_BACKLOG_LIMIT must be greater than 0".to_string(),
            ));
        }

        if self.storage.compact_interval.is_zero() {
            return Err(ConfigError::ValidationError(
                "COMPACT_INTERVAL_SECS must be greater than 0".to_string(),
            ));
        }

        if self.auth.cookie_name.is_empty() || self.auth.header_name.is_empty() {
            return Err(ConfigError::ValidationError(
                "AUTH_COOKIE_NAME and AUTH_HEADER_NAME cannot be empty".to_string(),
            ));
        }

        if self.upload.persist_failures {
            tracing::info!("Failed blob writes will be recorded as state 'failed'");
        }

        Ok(())
    }
}

fn env_or(key: &str, default: &str) -> String {
    std::env::var(key).unwrap_or_else(|_| default.to_string())
}

fn env_parse<T: std::str::FromStr>(key: &str, default: T) -> T {
    std::env::var(key)
        .ok()
        .and_then(|s| s.parse().ok())
        .unwrap_or(default)
}
