//! Persistence seam for server records.
//!
//! The orchestrator does not own a database. The API layer hands it a
//! [`ServerStore`]; the lifecycle manager reads records through it and writes
//! every state change back. [`InMemoryServerStore`] backs tests and
//! single-process deployments.

use crate::error::Result;
use crate::server::{Server, ServerId};
use async_trait::async_trait;
use std::collections::HashMap;
use tokio::sync::RwLock;

/// Storage collaborator for server records
#[async_trait]
pub trait ServerStore: Send + Sync {
    /// Fetch one record
    async fn get(&self, id: ServerId) -> Result<Option<Server>>;

    /// All records
    async fn list(&self) -> Result<Vec<Server>>;

    /// Insert or replace a record
    async fn put(&self, server: Server) -> Result<()>;

    /// Remove a record, returning whether it existed
    async fn remove(&self, id: ServerId) -> Result<bool>;
}

/// Process-local [`ServerStore`]
#[derive(Default)]
pub struct InMemoryServerStore {
    servers: RwLock<HashMap<ServerId, Server>>,
}

impl InMemoryServerStore {
    /// Create an empty store
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ServerStore for InMemoryServerStore {
    async fn get(&self, id: ServerId) -> Result<Option<Server>> {
        Ok(self.servers.read().await.get(&id).cloned())
    }

    async fn list(&self) -> Result<Vec<Server>> {
        let mut servers: Vec<Server> = self.servers.read().await.values().cloned().collect();
        servers.sort_by(|a, b| a.created_at.cmp(&b.created_at).then(a.id.cmp(&b.id)));
        Ok(servers)
    }

    async fn put(&self, server: Server) -> Result<()> {
        self.servers.write().await.insert(server.id, server);
        Ok(())
    }

    async fn remove(&self, id: ServerId) -> Result<bool> {
        Ok(self.servers.write().await.remove(&id).is_some())
    }
}
