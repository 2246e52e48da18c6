//! Container engine abstraction.
//!
//! The orchestrator never talks to Docker directly: the lifecycle manager and
//! the resource sampler hold an `Arc<dyn Runtime>`, which is a [`DockerRuntime`]
//! in production and a test double in the test suite.
//!
//! Every method is a single engine round trip. Retrying, polling and state
//! bookkeeping live in the callers.

mod docker;

pub use docker::{DockerRuntime, EngineSummary};

use crate::types::{PortBinding, ResourceLimits};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::stream::BoxStream;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;
use thiserror::Error;

/// Opaque engine identifier of one provisioned container.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ContainerHandle(String);

impl ContainerHandle {
    /// Wrap an engine identifier.
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// The raw engine identifier.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ContainerHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Host directory bound into the container.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VolumeBind {
    /// Path on the host
    pub host_path: String,
    /// Mount point inside the container
    pub container_path: String,
}

/// Everything the engine needs to create one game server container.
#[derive(Debug, Clone, PartialEq)]
pub struct ContainerSpec {
    /// Container name
    pub name: String,
    /// Image reference
    pub image: String,
    /// `KEY=VALUE` pairs, in order
    pub env: Vec<String>,
    /// Published ports
    pub ports: Vec<PortBinding>,
    /// Bind mounts
    pub binds: Vec<VolumeBind>,
    /// CPU and memory limits
    pub limits: ResourceLimits,
    /// Working directory inside the container
    pub working_dir: Option<String>,
    /// Explicit command; `None` keeps the image default
    pub command: Option<Vec<String>>,
    /// Network to attach to
    pub network: Option<String>,
    /// Let the engine restart the container unless it was stopped explicitly
    pub restart_unless_stopped: bool,
}

/// Result of inspecting a container.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ContainerInspection {
    /// Main process is running
    pub running: bool,
    /// Engine is restarting the container
    pub restarting: bool,
    /// Exit code of the last run, if it exited
    pub exit_code: Option<i64>,
}

/// One point-in-time read of the engine's cumulative counters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RawCounterSnapshot {
    /// Total CPU time consumed by the container, nanoseconds
    pub cpu_total_ns: u64,
    /// Total CPU time of the host, nanoseconds
    pub system_cpu_ns: u64,
    /// CPUs visible to the container
    pub online_cpus: u32,
    /// Memory in use including page cache, bytes
    pub mem_usage_bytes: u64,
    /// Page cache portion of `mem_usage_bytes`
    pub mem_cache_bytes: u64,
    /// Memory limit, bytes
    pub mem_limit_bytes: u64,
    /// Bytes received across all interfaces
    pub rx_bytes: u64,
    /// Bytes sent across all interfaces
    pub tx_bytes: u64,
    /// When the read was taken
    pub captured_at: DateTime<Utc>,
}

/// Errors surfaced by a [`Runtime`].
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RuntimeError {
    /// The container no longer exists in the engine.
    #[error("container not found: {0}")]
    NotFound(String),
    /// The engine could not be reached.
    #[error("engine unavailable: {0}")]
    Unavailable(String),
    /// The engine did not answer in time.
    #[error("engine timed out: {0}")]
    Timeout(String),
    /// The engine answered with an error.
    #[error("engine error: {0}")]
    Engine(String),
}

/// Result type for runtime calls.
pub type RuntimeResult<T> = std::result::Result<T, RuntimeError>;

/// Lazy, read-once sequence of log lines.
pub type LogStream = BoxStream<'static, RuntimeResult<String>>;

/// Narrow async interface over a container engine.
///
/// `create` is not idempotent; callers must not call it twice for the same
/// server.
#[async_trait]
pub trait Runtime: Send + Sync {
    /// Create (but do not start) a container.
    async fn create(&self, spec: &ContainerSpec) -> RuntimeResult<ContainerHandle>;

    /// Start a created or stopped container.
    async fn start(&self, handle: &ContainerHandle) -> RuntimeResult<()>;

    /// Stop a container, giving it `timeout` to exit before it is killed.
    async fn stop(&self, handle: &ContainerHandle, timeout: Duration) -> RuntimeResult<()>;

    /// Restart a container in place.
    async fn restart(&self, handle: &ContainerHandle) -> RuntimeResult<()>;

    /// Remove a container.
    async fn remove(&self, handle: &ContainerHandle, force: bool) -> RuntimeResult<()>;

    /// Read the container's run state.
    async fn inspect(&self, handle: &ContainerHandle) -> RuntimeResult<ContainerInspection>;

    /// Read raw cumulative counters. No rates are computed here.
    async fn stats(&self, handle: &ContainerHandle) -> RuntimeResult<RawCounterSnapshot>;

    /// Tail the last `tail_lines` lines of output.
    async fn logs(&self, handle: &ContainerHandle, tail_lines: usize) -> RuntimeResult<LogStream>;

    /// Run `command` inside the running container and collect its output.
    async fn exec(&self, handle: &ContainerHandle, command: Vec<String>) -> RuntimeResult<String>;
}
