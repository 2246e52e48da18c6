//! Observed-state change events.
//!
//! Every time the lifecycle manager records a new observed state it emits a
//! [`StatusChange`] on a Tokio broadcast channel. The storage layer and the
//! status broadcaster subscribe to it. A bounded history of recent changes is
//! kept for inspection.

use crate::error::{Error, Result};
use crate::server::{ServerId, ServerState};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::sync::Mutex;
use tokio::sync::broadcast;

/// Number of changes kept in the history
const HISTORY_LIMIT: usize = 1000;

/// `server.status_changed(serverId, oldState, newState)`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusChange {
    /// Server whose observed state changed
    pub server_id: ServerId,
    /// Previous observed state
    pub old: ServerState,
    /// New observed state
    pub new: ServerState,
    /// Failure or reconciliation detail
    pub reason: Option<String>,
    /// When the change was recorded
    pub at: DateTime<Utc>,
}

/// Fans status changes out to subscribers and remembers recent ones
pub struct EventManager {
    /// Broadcast channel for live subscribers
    sender: broadcast::Sender<StatusChange>,
    /// Most recent changes, oldest first
    history: Mutex<VecDeque<StatusChange>>,
}

impl EventManager {
    /// Create a new event manager with the specified channel capacity
    ///
    /// # Arguments
    ///
    /// * `capacity` - Messages buffered per subscriber before it starts lagging
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self {
            sender,
            history: Mutex::new(VecDeque::new()),
        }
    }

    /// Get a new receiver for live changes
    pub fn subscribe(&self) -> broadcast::Receiver<StatusChange> {
        self.sender.subscribe()
    }

    /// Record and broadcast a change
    pub fn emit(&self, change: StatusChange) {
        tracing::debug!(
            server_id = %change.server_id,
            old = %change.old,
            new = %change.new,
            "server.status_changed"
        );

        match self.history.lock() {
            Ok(mut history) => {
                history.push_back(change.clone());
                while history.len() > HISTORY_LIMIT {
                    history.pop_front();
                }
            }
            Err(_) => tracing::error!("Failed to lock event history"),
        }

        // Only try to send if there are receivers
        if self.sender.receiver_count() > 0 {
            if let Err(e) = self.sender.send(change) {
                tracing::warn!(error = %e, "Failed to broadcast status change");
            }
        }
    }

    /// Recent changes for one server, newest first
    pub fn server_events(&self, id: ServerId, limit: Option<usize>) -> Result<Vec<StatusChange>> {
        let history = self
            .history
            .lock()
            .map_err(|_| Error::Other("Failed to lock event history".to_string()))?;

        let events = history
            .iter()
            .rev()
            .filter(|e| e.server_id == id)
            .take(limit.unwrap_or(usize::MAX))
            .cloned()
            .collect();

        Ok(events)
    }

    /// Recent changes for all servers, newest first
    pub fn all_events(&self, limit: Option<usize>) -> Result<Vec<StatusChange>> {
        let history = self
            .history
            .lock()
            .map_err(|_| Error::Other("Failed to lock event history".to_string()))?;

        Ok(history
            .iter()
            .rev()
            .take(limit.unwrap_or(usize::MAX))
            .cloned()
            .collect())
    }
}

impl Default for EventManager {
    fn default() -> Self {
        Self::new(256)
    }
}
