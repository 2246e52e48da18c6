use crate::error::{Error, Result};
use crate::template::TemplateOverride;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;
use std::time::Duration;

/// How to reach the container engine and where server data lives on the host.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct EngineConfig {
    /// Docker socket path. `None` uses the platform default.
    pub socket: Option<String>,
    /// Bridge network game server containers attach to.
    pub network: String,
    /// Subnet for the bridge network when it has to be created.
    pub subnet: Option<String>,
    /// Host directory holding one sub-directory per server.
    pub data_root: String,
    /// Per-request timeout for engine calls, in seconds.
    pub request_timeout_secs: u64,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            socket: None,
            network: "gamehost-network".to_string(),
            subnet: Some("172.20.0.0/16".to_string()),
            data_root: "data/servers".to_string(),
            request_timeout_secs: 120,
        }
    }
}

/// Administrative ceilings applied at provision time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ResourceQuota {
    /// Largest CPU share a single server may request, in cores.
    pub max_cpu: f64,
    /// Largest memory a single server may request, in megabytes.
    pub max_memory_mb: u64,
    /// Most provisioned servers one owner may hold. `None` means unlimited.
    pub max_servers_per_owner: Option<usize>,
}

impl Default for ResourceQuota {
    fn default() -> Self {
        Self {
            max_cpu: 8.0,
            max_memory_mb: 16_384,
            max_servers_per_owner: Some(5),
        }
    }
}

/// Timing of the start/stop/restart polling loops and exec calls.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct LifecycleConfig {
    /// `inspect` attempts after issuing a start before giving up.
    pub start_poll_attempts: u32,
    /// Delay before the second attempt; doubles each attempt.
    pub initial_backoff_ms: u64,
    /// Upper bound on the delay between attempts.
    pub max_backoff_ms: u64,
    /// Time a container gets to shut down before the engine kills it.
    pub stop_grace_secs: u64,
    /// Extra time on top of the grace period before a stop counts as hung.
    pub stop_slack_ms: u64,
    /// Time budget for a console command.
    pub exec_timeout_secs: u64,
}

impl Default for LifecycleConfig {
    fn default() -> Self {
        Self {
            start_poll_attempts: 10,
            initial_backoff_ms: 250,
            max_backoff_ms: 5_000,
            stop_grace_secs: 30,
            stop_slack_ms: 10_000,
            exec_timeout_secs: 30,
        }
    }
}

impl LifecycleConfig {
    /// Delay to wait after the given zero-based attempt.
    pub fn backoff(&self, attempt: u32) -> Duration {
        let factor = 1u64.checked_shl(attempt.min(32)).unwrap_or(u64::MAX);
        let millis = self
            .initial_backoff_ms
            .saturating_mul(factor)
            .min(self.max_backoff_ms);
        Duration::from_millis(millis)
    }

    /// Grace period handed to the engine on stop.
    pub fn stop_grace(&self) -> Duration {
        Duration::from_secs(self.stop_grace_secs)
    }

    /// Total time a stop or restart call may take before it is abandoned.
    pub fn stop_budget(&self) -> Duration {
        self.stop_grace() + Duration::from_millis(self.stop_slack_ms)
    }

    /// Console command budget.
    pub fn exec_timeout(&self) -> Duration {
        Duration::from_secs(self.exec_timeout_secs)
    }
}

/// Settings of the periodic stats broadcaster.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct BroadcasterConfig {
    /// Time between sampling rounds, in milliseconds.
    pub interval_ms: u64,
    /// Most `stats` calls in flight at once during a round.
    pub max_in_flight: usize,
    /// Messages buffered per topic before slow subscribers start lagging.
    pub channel_capacity: usize,
}

impl Default for BroadcasterConfig {
    fn default() -> Self {
        Self {
            interval_ms: 5_000,
            max_in_flight: 8,
            channel_capacity: 64,
        }
    }
}

impl BroadcasterConfig {
    /// Time between sampling rounds.
    pub fn interval(&self) -> Duration {
        Duration::from_millis(self.interval_ms)
    }
}

/// Main configuration for the orchestrator.
///
/// Every section is optional; missing sections take their defaults.
///
/// # Format
///
/// ```json
/// {
///   "engine": { "network": "gamehost-network", "dataRoot": "/srv/gamehost" },
///   "limits": { "maxCpu": 4, "maxMemoryMb": 8192, "maxServersPerOwner": 5 },
///   "lifecycle": { "startPollAttempts": 12, "stopGraceSecs": 20 },
///   "broadcaster": { "intervalMs": 5000, "maxInFlight": 8 },
///   "templates": {
///     "minecraft-vanilla": { "env": ["EULA=TRUE", "TYPE=PAPER"] }
///   }
/// }
/// ```
///
/// # Examples
///
/// ```
/// use gamehost_orchestrator::config::Config;
///
/// let config = Config::parse_from_str(r#"{ "limits": { "maxCpu": 2 } }"#).unwrap();
/// assert_eq!(config.limits.max_cpu, 2.0);
/// assert_eq!(config.lifecycle.start_poll_attempts, 10);
/// ```
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Config {
    /// Engine connection
    pub engine: EngineConfig,
    /// Administrative ceilings
    pub limits: ResourceQuota,
    /// Polling and timeouts
    pub lifecycle: LifecycleConfig,
    /// Stats broadcasting
    pub broadcaster: BroadcasterConfig,
    /// Operator template overrides keyed by template id
    pub templates: HashMap<String, TemplateOverride>,
}

impl Config {
    /// Loads a configuration from a file path.
    ///
    /// Files ending in `.yaml` or `.yml` are read as YAML, anything else as JSON.
    ///
    /// # Errors
    ///
    /// Returns an error if:
    /// * The file cannot be read
    /// * The contents do not match the expected schema
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .map_err(|e| Error::ConfigParse(format!("Failed to read config file: {}", e)))?;

        match path.extension().and_then(|ext| ext.to_str()) {
            Some("yaml") | Some("yml") => Self::parse_from_yaml(&content),
            _ => Self::parse_from_str(&content),
        }
    }

    /// Parses a configuration from a JSON string.
    pub fn parse_from_str(content: &str) -> Result<Self> {
        serde_json::from_str(content)
            .map_err(|e| Error::ConfigParse(format!("Failed to parse JSON config: {}", e)))
    }

    /// Parses a configuration from a YAML string.
    pub fn parse_from_yaml(content: &str) -> Result<Self> {
        serde_yaml::from_str(content)
            .map_err(|e| Error::ConfigParse(format!("Failed to parse YAML config: {}", e)))
    }
}
