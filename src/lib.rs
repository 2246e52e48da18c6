/*!
 # GameHost Orchestrator

 A Rust library for running game servers as containers and watching them live.

 ## Overview

 The orchestrator provides functionality to:
 - Resolve game server templates and validate resource requests against quota
 - Provision, start, stop, restart and delete one container per game server
 - Keep each server's desired and observed state in step with the engine
 - Tail logs and run console commands inside a running server
 - Sample CPU, memory and network usage and push it to subscribers

 ## Basic Usage

 ```no_run
 use gamehost_orchestrator::{Orchestrator, Result};
 use gamehost_orchestrator::server::NewServer;
 use gamehost_orchestrator::stats::Topic;

 #[tokio::main]
 async fn main() -> Result<()> {
     // Connect to the local Docker engine using a config file
     let mut orchestrator = Orchestrator::from_config_file("gamehost.yaml").await?;
     orchestrator.start()?;

     let manager = orchestrator.manager();
     let server = manager
         .register(NewServer {
             name: "Vikings".to_string(),
             game: "Valheim".to_string(),
             template: "valheim-dedicated".to_string(),
             limits: None,
             ports: Vec::new(),
             owner: "alice".to_string(),
         })
         .await?;

     manager.provision(server.id).await?;
     manager.start(server.id).await?;

     // Watch live stats
     let mut updates = orchestrator.broadcaster().subscribe(Topic::Server(server.id));
     if let Ok(message) = updates.recv().await {
         println!("{:?}", message);
     }

     orchestrator.shutdown().await
 }
 ```

 ## Features

 - **Templates**: Built-in game templates with operator overrides
 - **Lifecycle**: A validated state machine with one operation per server at a time
 - **Drift reconciliation**: Containers removed behind the orchestrator's back are noticed and cleared
 - **Live stats**: Bounded-concurrency sampling only for servers somebody watches
 - **Configuration**: JSON or YAML files with defaults for every section
*/

pub mod config;
pub mod error;
pub mod runtime;
pub mod server;
pub mod stats;
pub mod template;
pub mod types;

pub use config::Config;
pub use error::{Error, Result};
pub use server::{LifecycleManager, NewServer, Server, ServerId, ServerState, ServerStatus};
pub use stats::{StatusBroadcaster, Topic};

use runtime::{DockerRuntime, Runtime};
use server::{EventManager, InMemoryServerStore, ServerStore};
use std::path::Path;
use std::sync::Arc;
use template::TemplateRegistry;

/// Wires the lifecycle manager, the template registry and the status
/// broadcaster together over one engine and one store.
///
/// All public methods are instrumented with `tracing` spans.
pub struct Orchestrator {
    /// Configuration
    config: Config,
    /// Lifecycle manager shared with the broadcaster
    manager: Arc<LifecycleManager>,
    /// Live status broadcaster
    broadcaster: StatusBroadcaster,
}

impl Orchestrator {
    /// Load a configuration file and connect to the engine it names
    #[tracing::instrument(skip(path), fields(config_path = ?path.as_ref()))]
    pub async fn from_config_file(path: impl AsRef<Path>) -> Result<Self> {
        tracing::info!("Loading configuration from file");
        let config = Config::from_file(path)?;
        Self::connect(config).await
    }

    /// Connect to Docker, make sure the game server network exists and keep
    /// records in memory
    #[tracing::instrument(skip(config))]
    pub async fn connect(config: Config) -> Result<Self> {
        config::validate_config(&config)?;

        let docker = DockerRuntime::connect(&config.engine)?;
        docker
            .ensure_network(&config.engine.network, config.engine.subnet.as_deref())
            .await?;

        match docker.engine_summary().await {
            Ok(summary) => tracing::info!(
                version = ?summary.version,
                running = summary.running_containers,
                "Connected to container engine"
            ),
            Err(e) => tracing::warn!(error = %e, "Could not read engine summary"),
        }

        Self::new(config, Arc::new(docker), Arc::new(InMemoryServerStore::new()))
    }

    /// Build an orchestrator over any engine and store
    #[tracing::instrument(skip_all, fields(templates = config.templates.len()))]
    pub fn new(
        config: Config,
        runtime: Arc<dyn Runtime>,
        store: Arc<dyn ServerStore>,
    ) -> Result<Self> {
        config::validate_config(&config)?;
        tracing::info!("Creating orchestrator");

        let registry = Arc::new(TemplateRegistry::new(
            config.templates.clone(),
            config.limits.clone(),
        ));
        let events = Arc::new(EventManager::new(config.broadcaster.channel_capacity));
        let manager = Arc::new(LifecycleManager::new(
            runtime,
            store,
            registry,
            events,
            config.lifecycle.clone(),
            config.engine.clone(),
        ));
        let broadcaster = StatusBroadcaster::new(Arc::clone(&manager), config.broadcaster.clone());

        Ok(Self {
            config,
            manager,
            broadcaster,
        })
    }

    /// The configuration in use
    pub fn config(&self) -> &Config {
        &self.config
    }

    /// The lifecycle manager
    pub fn manager(&self) -> &Arc<LifecycleManager> {
        &self.manager
    }

    /// The status broadcaster
    pub fn broadcaster(&self) -> &StatusBroadcaster {
        &self.broadcaster
    }

    /// Start the background broadcast loop
    #[tracing::instrument(skip(self))]
    pub fn start(&mut self) -> Result<()> {
        self.broadcaster.start()
    }

    /// Stop background work. Game server containers keep running.
    #[tracing::instrument(skip(self))]
    pub async fn shutdown(&mut self) -> Result<()> {
        tracing::info!("Shutting down orchestrator");
        self.broadcaster.stop().await
    }
}
