//! Configuration module for the orchestrator.
//!
//! This module handles parsing and validation of the orchestrator settings:
//! engine connection, administrative quotas, polling budgets, broadcaster
//! timing and operator template overrides. Configurations load from JSON or
//! YAML files.
//!
//! # Examples
//!
//! Loading a configuration from a file:
//!
//! ```no_run
//! use gamehost_orchestrator::config::{Config, validate_config};
//!
//! let config = Config::from_file("gamehost.yaml").unwrap();
//! validate_config(&config).unwrap();
//! println!("{} template overrides", config.templates.len());
//! ```
//!
//! Building one programmatically:
//!
//! ```
//! use gamehost_orchestrator::config::{Config, ResourceQuota};
//!
//! let config = Config {
//!     limits: ResourceQuota {
//!         max_cpu: 4.0,
//!         max_memory_mb: 8192,
//!         max_servers_per_owner: None,
//!     },
//!     ..Default::default()
//! };
//! assert_eq!(config.broadcaster.interval_ms, 5000);
//! ```
mod parser;
pub mod validator;

pub use parser::{BroadcasterConfig, Config, EngineConfig, LifecycleConfig, ResourceQuota};
pub use validator::validate_config;
