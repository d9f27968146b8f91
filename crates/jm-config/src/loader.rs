//! Configuration loader with file and environment variable support.

use crate::{AppConfig, ConfigError};
use std::env;
use std::path::PathBuf;
use tracing::info;

const CONFIG_PATHS: &[&str] = &[
    "config.toml",
    "jido-messaging.toml",
    "./config/config.toml",
    "/etc/jido-messaging/config.toml",
];

pub struct ConfigLoader {
    config_path: Option<PathBuf>,
}

impl ConfigLoader {
    pub fn new() -> Self {
        Self { config_path: None }
    }

    pub fn with_path<P: Into<PathBuf>>(path: P) -> Self {
        Self { config_path: Some(path.into()) }
    }

    pub fn load(&self) -> Result<AppConfig, ConfigError> {
        let mut config = AppConfig::default();

        if let Some(path) = self.find_config_file() {
            info!(?path, "loading configuration from file");
            config = AppConfig::from_file(&path)?;
        }

        self.apply_env_overrides(&mut config);

        Ok(config)
    }

    fn find_config_file(&self) -> Option<PathBuf> {
        if let Some(path) = &self.config_path {
            if path.exists() {
                return Some(path.clone());
            }
        }

        if let Ok(path) = env::var("JIDO_MESSAGING_CONFIG") {
            let path = PathBuf::from(path);
            if path.exists() {
                return Some(path);
            }
        }

        for path in CONFIG_PATHS {
            let path = PathBuf::from(path);
            if path.exists() {
                return Some(path);
            }
        }

        None
    }

    fn apply_env_overrides(&self, config: &mut AppConfig) {
        if let Ok(val) = env::var("JIDO_MESSAGING_HTTP_PORT") {
            if let Ok(port) = val.parse() {
                config.http.port = port;
            }
        }
        if let Ok(val) = env::var("JIDO_MESSAGING_HTTP_HOST") {
            config.http.host = val;
        }
        if let Ok(val) = env::var("JIDO_MESSAGING_CORS_ORIGINS") {
            config.http.cors_origins = val.split(',').map(|s| s.trim().to_string()).collect();
        }
        if let Ok(val) = env::var("JIDO_MESSAGING_HTTP_MAX_BODY_BYTES") {
            if let Ok(n) = val.parse() {
                config.http.max_body_bytes = n;
            }
        }
        if let Ok(val) = env::var("JIDO_MESSAGING_HTTP_REQUEST_TIMEOUT_MS") {
            if let Ok(n) = val.parse() {
                config.http.request_timeout_ms = n;
            }
        }

        if let Ok(val) = env::var("JIDO_MESSAGING_DEDUPE_TTL_MS") {
            if let Ok(n) = val.parse() {
                config.dedupe.default_ttl_ms = n;
            }
        }

        if let Ok(val) = env::var("JIDO_MESSAGING_REGISTRY_MANIFEST_PATHS") {
            config.registry.manifest_paths = val.split(',').map(|s| s.trim().to_string()).collect();
        }
        if let Ok(val) = env::var("JIDO_MESSAGING_REGISTRY_COLLISION_POLICY") {
            config.registry.collision_policy = val;
        }
        if let Ok(val) = env::var("JIDO_MESSAGING_REGISTRY_REQUIRED_BRIDGES") {
            config.registry.required_bridges = val.split(',').map(|s| s.trim().to_string()).collect();
        }

        if let Ok(val) = env::var("JIDO_MESSAGING_OUTBOUND_PARTITION_COUNT") {
            if let Ok(n) = val.parse() {
                config.outbound.partition_count = n;
            }
        }
        if let Ok(val) = env::var("JIDO_MESSAGING_OUTBOUND_QUEUE_CAPACITY") {
            if let Ok(n) = val.parse() {
                config.outbound.queue_capacity = n;
            }
        }
        if let Ok(val) = env::var("JIDO_MESSAGING_OUTBOUND_MAX_ATTEMPTS") {
            if let Ok(n) = val.parse() {
                config.outbound.max_attempts = n;
            }
        }
        if let Ok(val) = env::var("JIDO_MESSAGING_OUTBOUND_BASE_BACKOFF_MS") {
            if let Ok(n) = val.parse() {
                config.outbound.base_backoff_ms = n;
            }
        }
        if let Ok(val) = env::var("JIDO_MESSAGING_OUTBOUND_MAX_BACKOFF_MS") {
            if let Ok(n) = val.parse() {
                config.outbound.max_backoff_ms = n;
            }
        }

        if let Ok(val) = env::var("JIDO_MESSAGING_SESSION_PARTITION_COUNT") {
            if let Ok(n) = val.parse() {
                config.session.partition_count = n;
            }
        }
        if let Ok(val) = env::var("JIDO_MESSAGING_SESSION_MAX_ENTRIES_PER_PARTITION") {
            if let Ok(n) = val.parse() {
                config.session.max_entries_per_partition = n;
            }
        }
        if let Ok(val) = env::var("JIDO_MESSAGING_SESSION_DEFAULT_TTL_MS") {
            if let Ok(n) = val.parse() {
                config.session.default_ttl_ms = n;
            }
        }

        if let Ok(val) = env::var("JIDO_MESSAGING_DEADLETTER_MAX_RECORDS") {
            if let Ok(n) = val.parse() {
                config.deadletter.max_records = n;
            }
        }

        if let Ok(val) = env::var("JIDO_MESSAGING_INSTANCE_RECONNECT_BASE_BACKOFF_MS") {
            if let Ok(n) = val.parse() {
                config.instance.reconnect_base_backoff_ms = n;
            }
        }
        if let Ok(val) = env::var("JIDO_MESSAGING_INSTANCE_RECONNECT_MAX_BACKOFF_MS") {
            if let Ok(n) = val.parse() {
                config.instance.reconnect_max_backoff_ms = n;
            }
        }
        if let Ok(val) = env::var("JIDO_MESSAGING_INSTANCE_MAX_RECONNECT_ATTEMPTS") {
            if let Ok(n) = val.parse() {
                config.instance.max_reconnect_attempts = n;
            }
        }

        if let Ok(val) = env::var("JIDO_MESSAGING_POLICY_TIMEOUT_FALLBACK") {
            config.policy.policy_timeout_fallback = val;
        }
        if let Ok(val) = env::var("JIDO_MESSAGING_SANITIZE_TIMEOUT_FALLBACK") {
            config.policy.sanitize_timeout_fallback = val;
        }

        if let Ok(val) = env::var("JIDO_MESSAGING_DATA_DIR") {
            config.data_dir = val;
        }
        if let Ok(val) = env::var("JIDO_MESSAGING_DEV_MODE") {
            config.dev_mode = val.parse().unwrap_or(false);
        }
    }
}

impl Default for ConfigLoader {
    fn default() -> Self {
        Self::new()
    }
}
