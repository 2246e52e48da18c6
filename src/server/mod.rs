//! Game server records and their lifecycle.
//!
//! # Components
//!
//! * `record` - Server ids, states and the persisted record
//! * `store` - The storage seam records are read from and written to
//! * `events` - Observed-state change notifications
//! * `lifecycle` - The state machine driving servers against the engine
//!
//! # Examples
//!
//! Provisioning and starting a server:
//!
//! ```no_run
//! use gamehost_orchestrator::Orchestrator;
//! use gamehost_orchestrator::config::Config;
//! use gamehost_orchestrator::server::NewServer;
//!
//! # async fn run() -> gamehost_orchestrator::Result<()> {
//! let orchestrator = Orchestrator::connect(Config::default()).await?;
//! let manager = orchestrator.manager();
//!
//! let server = manager
//!     .register(NewServer {
//!         name: "Survival".to_string(),
//!         game: "Minecraft".to_string(),
//!         template: "minecraft-vanilla".to_string(),
//!         limits: None,
//!         ports: Vec::new(),
//!         owner: "alice".to_string(),
//!     })
//!     .await?;
//!
//! manager.provision(server.id).await?;
//! manager.start(server.id).await?;
//!
//! let status = manager.get_status(server.id).await?;
//! println!("{} is {}", server.name, status.observed);
//! # Ok(())
//! # }
//! ```
pub mod events;
pub mod lifecycle;
mod record;
pub mod store;

pub use events::{EventManager, StatusChange};
pub use lifecycle::{LifecycleManager, ServerLogs};
pub use record::{NewServer, Server, ServerId, ServerState, ServerStatus};
pub use store::{InMemoryServerStore, ServerStore};
