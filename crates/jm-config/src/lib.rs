//! Messaging fabric configuration.
//!
//! TOML file with environment variable overrides, same precedence as the
//! reference loader: defaults, then file (if found), then env vars.

use serde::{Deserialize, Serialize};
use std::path::Path;
use thiserror::Error;

mod loader;

pub use loader::ConfigLoader;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("failed to read config file: {0}")]
    ReadError(#[from] std::io::Error),

    #[error("failed to parse TOML: {0}")]
    ParseError(#[from] toml::de::Error),

    #[error("invalid configuration: {0}")]
    ValidationError(String),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub http: HttpConfig,
    pub storage: StorageConfig,
    pub dedupe: DedupeConfig,
    pub registry: RegistryConfig,
    pub outbound: OutboundConfig,
    pub session: SessionConfig,
    pub deadletter: DeadLetterConfig,
    pub instance: InstanceConfig,
    pub onboarding: OnboardingConfig,
    pub policy: PolicyConfig,

    /// Data directory, used for manifest search paths in dev wiring.
    pub data_dir: String,
    pub dev_mode: bool,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            http: HttpConfig::default(),
            storage: StorageConfig::default(),
            dedupe: DedupeConfig::default(),
            registry: RegistryConfig::default(),
            outbound: OutboundConfig::default(),
            session: SessionConfig::default(),
            deadletter: DeadLetterConfig::default(),
            instance: InstanceConfig::default(),
            onboarding: OnboardingConfig::default(),
            policy: PolicyConfig::default(),
            data_dir: "./data".to_string(),
            dev_mode: false,
        }
    }
}

/// Webhook entry HTTP server (§4.11, §6.4).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HttpConfig {
    pub port: u16,
    pub host: String,
    pub cors_origins: Vec<String>,
    /// Max accepted request body size in bytes before `413 too_large`.
    pub max_body_bytes: usize,
    /// Per-request timeout before `408 timeout`.
    pub request_timeout_ms: u64,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            port: 8080,
            host: "0.0.0.0".to_string(),
            cors_origins: vec!["http://localhost:4200".to_string()],
            max_body_bytes: 1_048_576,
            request_timeout_ms: 10_000,
        }
    }
}

/// In-memory storage reference implementation (§4.1).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// Most-recent-first cap applied before `get_messages` reverses to
    /// chronological order.
    pub default_message_page_size: usize,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self { default_message_page_size: 50 }
    }
}

/// §4.2 dedupe set.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DedupeConfig {
    pub default_ttl_ms: u64,
    pub sweep_interval_ms: u64,
}

impl Default for DedupeConfig {
    fn default() -> Self {
        Self { default_ttl_ms: 300_000, sweep_interval_ms: 60_000 }
    }
}

/// §4.3 bridge registry & config store.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RegistryConfig {
    pub manifest_paths: Vec<String>,
    /// `prefer_first` or `prefer_last`.
    pub collision_policy: String,
    pub required_bridges: Vec<String>,
    pub clear_existing: bool,
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            manifest_paths: Vec::new(),
            collision_policy: "prefer_last".to_string(),
            required_bridges: Vec::new(),
            clear_existing: false,
        }
    }
}

/// §4.5 outbound gateway.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OutboundConfig {
    pub partition_count: usize,
    pub queue_capacity: usize,
    pub warn_ratio: f64,
    pub degraded_ratio: f64,
    pub shed_ratio: f64,
    pub degraded_throttle_ms: u64,
    /// `drop_lowest_priority` or `reject`.
    pub shed_action: String,
    /// `throttle` or `admit`.
    pub degraded_action: String,
    pub sent_cache_capacity: usize,
    pub sent_cache_ttl_ms: u64,
    pub max_attempts: u32,
    pub base_backoff_ms: u64,
    pub max_backoff_ms: u64,
    pub adapter_timeout_ms: u64,
    /// `fallback_text` or `reject`.
    pub unsupported_media_policy: String,
}

impl Default for OutboundConfig {
    fn default() -> Self {
        Self {
            partition_count: 16,
            queue_capacity: 1000,
            warn_ratio: 0.5,
            degraded_ratio: 0.75,
            shed_ratio: 0.9,
            degraded_throttle_ms: 50,
            shed_action: "reject".to_string(),
            degraded_action: "throttle".to_string(),
            sent_cache_capacity: 10_000,
            sent_cache_ttl_ms: 3_600_000,
            max_attempts: 5,
            base_backoff_ms: 100,
            max_backoff_ms: 30_000,
            adapter_timeout_ms: 10_000,
            unsupported_media_policy: "fallback_text".to_string(),
        }
    }
}

/// §4.7 session manager.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    pub partition_count: usize,
    pub max_entries_per_partition: usize,
    pub default_ttl_ms: u64,
    pub prune_interval_ms: u64,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            partition_count: 16,
            max_entries_per_partition: 10_000,
            default_ttl_ms: 86_400_000,
            prune_interval_ms: 60_000,
        }
    }
}

/// §4.8 dead-letter store + replay.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DeadLetterConfig {
    pub max_records: usize,
    pub replay_partition_count: usize,
}

impl Default for DeadLetterConfig {
    fn default() -> Self {
        Self { max_records: 10_000, replay_partition_count: 8 }
    }
}

/// §4.10 instance lifecycle / reconnect backoff.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct InstanceConfig {
    pub reconnect_base_backoff_ms: u64,
    pub reconnect_max_backoff_ms: u64,
    pub reconnect_jitter_ratio: f64,
    pub max_reconnect_attempts: u32,
    pub max_consecutive_failures: u32,
    pub default_probe_interval_ms: u64,
}

impl Default for InstanceConfig {
    fn default() -> Self {
        Self {
            reconnect_base_backoff_ms: 500,
            reconnect_max_backoff_ms: 60_000,
            reconnect_jitter_ratio: 0.2,
            max_reconnect_attempts: 20,
            max_consecutive_failures: 10,
            default_probe_interval_ms: 30_000,
        }
    }
}

/// §4.9 onboarding FSM.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OnboardingConfig {
    /// Completed/cancelled flows older than this are eligible for cleanup
    /// by the dev binary's housekeeping tick; not part of the spec's
    /// testable properties, purely operational hygiene.
    pub retain_completed_hours: i64,
}

impl Default for OnboardingConfig {
    fn default() -> Self {
        Self { retain_completed_hours: 720 }
    }
}

/// §4.12 gating/moderation, §4.13 security.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PolicyConfig {
    pub gating_timeout_ms: u64,
    pub moderation_timeout_ms: u64,
    pub security_timeout_ms: u64,
    /// `deny` or `allow_with_flag`.
    pub policy_timeout_fallback: String,
    /// `deny` or `allow_original`, governs sanitize_outbound timeouts only.
    pub sanitize_timeout_fallback: String,
}

impl Default for PolicyConfig {
    fn default() -> Self {
        Self {
            gating_timeout_ms: 2_000,
            moderation_timeout_ms: 2_000,
            security_timeout_ms: 2_000,
            policy_timeout_fallback: "deny".to_string(),
            sanitize_timeout_fallback: "allow_original".to_string(),
        }
    }
}

impl AppConfig {
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        let config: AppConfig = toml::from_str(&content)?;
        Ok(config)
    }

    pub fn load() -> Result<Self, ConfigError> {
        let loader = ConfigLoader::new();
        loader.load()
    }

    pub fn example_toml() -> String {
        r#"# jido-messaging configuration
# Environment variables override these settings (see JIDO_MESSAGING_* below)

[http]
port = 8080
host = "0.0.0.0"
cors_origins = ["http://localhost:4200"]
max_body_bytes = 1048576
request_timeout_ms = 10000

[storage]
default_message_page_size = 50

[dedupe]
default_ttl_ms = 300000
sweep_interval_ms = 60000

[registry]
manifest_paths = []
collision_policy = "prefer_last"  # prefer_first or prefer_last
required_bridges = []
clear_existing = false

[outbound]
partition_count = 16
queue_capacity = 1000
warn_ratio = 0.5
degraded_ratio = 0.75
shed_ratio = 0.9
degraded_throttle_ms = 50
shed_action = "reject"            # drop_lowest_priority or reject
degraded_action = "throttle"      # throttle or admit
sent_cache_capacity = 10000
sent_cache_ttl_ms = 3600000
max_attempts = 5
base_backoff_ms = 100
max_backoff_ms = 30000
adapter_timeout_ms = 10000
unsupported_media_policy = "fallback_text"  # fallback_text or reject

[session]
partition_count = 16
max_entries_per_partition = 10000
default_ttl_ms = 86400000
prune_interval_ms = 60000

[deadletter]
max_records = 10000
replay_partition_count = 8

[instance]
reconnect_base_backoff_ms = 500
reconnect_max_backoff_ms = 60000
reconnect_jitter_ratio = 0.2
max_reconnect_attempts = 20
max_consecutive_failures = 10
default_probe_interval_ms = 30000

[onboarding]
retain_completed_hours = 720

[policy]
gating_timeout_ms = 2000
moderation_timeout_ms = 2000
security_timeout_ms = 2000
policy_timeout_fallback = "deny"            # deny or allow_with_flag
sanitize_timeout_fallback = "allow_original" # deny or allow_original

data_dir = "./data"
dev_mode = false
"#
        .to_string()
    }
}
