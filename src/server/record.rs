// src/server/record.rs
use crate::error::{Error, Result};
use crate::runtime::ContainerHandle;
use crate::types::{PortBinding, ResourceLimits};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

/// Unique identifier for a game server
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ServerId(Uuid);

impl ServerId {
    /// Generate a fresh id
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for ServerId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ServerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for ServerId {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Uuid::parse_str(s)
            .map(Self)
            .map_err(|e| Error::Validation(format!("Invalid server id '{}': {}", s, e)))
    }
}

/// Lifecycle state of a game server
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ServerState {
    /// No container exists yet
    Unprovisioned,
    /// Container exists and is not running
    Offline,
    /// Start issued, waiting for the container to run
    Starting,
    /// Container is running
    Online,
    /// Stop issued, waiting for the container to exit
    Stopping,
    /// Stop-then-start in progress
    Restarting,
    /// Last operation failed; see the status reason
    Error,
}

impl ServerState {
    /// Whether the lifecycle may move from `self` to `next`.
    ///
    /// Any provisioned state may fall back to `Unprovisioned` when drift
    /// reconciliation finds the container gone.
    pub fn can_transition_to(self, next: ServerState) -> bool {
        use ServerState::*;

        matches!(
            (self, next),
            (Unprovisioned, Offline)
                | (Offline, Starting)
                | (Error, Starting)
                | (Starting, Online)
                | (Starting, Error)
                | (Online, Stopping)
                | (Error, Stopping)
                | (Stopping, Offline)
                | (Stopping, Error)
                | (Online, Restarting)
                | (Restarting, Online)
                | (Restarting, Error)
        ) || (self != Unprovisioned && next == Unprovisioned)
    }

    /// States in which a lifecycle operation is still working.
    pub fn is_transitional(self) -> bool {
        matches!(
            self,
            ServerState::Starting | ServerState::Stopping | ServerState::Restarting
        )
    }
}

impl fmt::Display for ServerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ServerState::Unprovisioned => "unprovisioned",
            ServerState::Offline => "offline",
            ServerState::Starting => "starting",
            ServerState::Online => "online",
            ServerState::Stopping => "stopping",
            ServerState::Restarting => "restarting",
            ServerState::Error => "error",
        };
        write!(f, "{}", name)
    }
}

/// Fields the API layer supplies when creating a server record
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewServer {
    /// Display name
    pub name: String,
    /// Game label
    pub game: String,
    /// Template id
    pub template: String,
    /// Requested limits; `None` takes the template defaults at provision time
    #[serde(default)]
    pub limits: Option<ResourceLimits>,
    /// Published ports; empty publishes the template ports on the same numbers
    #[serde(default)]
    pub ports: Vec<PortBinding>,
    /// Owning user
    pub owner: String,
}

/// A persisted game server record
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Server {
    /// Server id
    pub id: ServerId,
    /// Display name
    pub name: String,
    /// Game label
    pub game: String,
    /// Template id
    pub template: String,
    /// Engine container, set once provisioned
    pub container: Option<ContainerHandle>,
    /// State the lifecycle manager is driving towards
    pub desired_state: ServerState,
    /// Last state confirmed by the engine
    pub observed_state: ServerState,
    /// Resource limits
    pub limits: Option<ResourceLimits>,
    /// Published ports
    pub ports: Vec<PortBinding>,
    /// Owning user
    pub owner: String,
    /// Why the server is in `Error`, or what reconciliation did
    pub status_reason: Option<String>,
    /// Creation time
    pub created_at: DateTime<Utc>,
    /// Last modification time
    pub updated_at: DateTime<Utc>,
}

impl Server {
    /// Build an unprovisioned record
    pub fn new(new: NewServer) -> Self {
        let now = Utc::now();
        Self {
            id: ServerId::new(),
            name: new.name,
            game: new.game,
            template: new.template,
            container: None,
            desired_state: ServerState::Unprovisioned,
            observed_state: ServerState::Unprovisioned,
            limits: new.limits,
            ports: new.ports,
            owner: new.owner,
            status_reason: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// Engine container name for this server
    pub fn container_name(&self) -> String {
        format!("gamehost-{}", self.id)
    }

    /// The container handle, or [`Error::NotProvisioned`]
    pub fn require_container(&self) -> Result<ContainerHandle> {
        self.container
            .clone()
            .ok_or_else(|| Error::NotProvisioned(self.id.to_string()))
    }

    /// Desired and observed state in one value
    pub fn status(&self) -> ServerStatus {
        ServerStatus {
            desired: self.desired_state,
            observed: self.observed_state,
            reason: self.status_reason.clone(),
        }
    }
}

/// Desired and observed state of a server
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServerStatus {
    /// State the lifecycle manager is driving towards
    pub desired: ServerState,
    /// Last state confirmed by the engine
    pub observed: ServerState,
    /// Failure or reconciliation detail
    pub reason: Option<String>,
}
