//! Game server templates.
//!
//! A [`Template`] describes how to run one kind of game server: the image, its
//! environment, the ports it listens on, the directories it persists and the
//! resources it needs. The [`TemplateRegistry`] resolves template ids against
//! the built-in set merged with operator overrides from the configuration.
//!
//! # Override resolution
//!
//! For a given id the registry starts from the built-in template (if any) and
//! replaces each field the override sets. List fields (`env`, `ports`,
//! `volumes`, `startCommand`) are replaced wholesale, never concatenated. An
//! override whose id has no built-in defines a new template and must set
//! `image`.
//!
//! ```
//! use gamehost_orchestrator::config::ResourceQuota;
//! use gamehost_orchestrator::template::{TemplateOverride, TemplateRegistry};
//! use std::collections::HashMap;
//!
//! let mut overrides = HashMap::new();
//! overrides.insert(
//!     "minecraft-vanilla".to_string(),
//!     TemplateOverride {
//!         env: Some(vec!["EULA=TRUE".to_string(), "TYPE=PAPER".to_string()]),
//!         ..Default::default()
//!     },
//! );
//!
//! let registry = TemplateRegistry::new(overrides, ResourceQuota::default());
//! let template = registry.resolve("minecraft-vanilla").unwrap();
//! assert_eq!(template.env, vec!["EULA=TRUE", "TYPE=PAPER"]);
//! assert_eq!(template.image, "itzg/minecraft-server:latest");
//! ```
mod builtins;

pub use builtins::{builtin_ids, builtin_templates};

use crate::config::ResourceQuota;
use crate::error::{Error, Result};
use crate::types::{ExposedPort, ResourceLimits};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Resources a template needs to run comfortably.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResourceRequirements {
    /// CPU share in cores
    pub cpu: f64,
    /// Memory in megabytes
    pub memory_mb: u64,
    /// Disk in megabytes (informational)
    pub disk_mb: u64,
}

impl ResourceRequirements {
    /// Default limits for a server created from this template.
    pub fn limits(&self) -> ResourceLimits {
        ResourceLimits {
            cpu: self.cpu,
            memory_mb: self.memory_mb,
        }
    }
}

/// A fully resolved game server template.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Template {
    /// Template id, e.g. `minecraft-vanilla`
    pub id: String,
    /// Display name
    pub name: String,
    /// Game label
    pub game: String,
    /// Free text description
    pub description: String,
    /// Game version
    pub version: String,
    /// Category such as `survival` or `fps`
    pub category: String,
    /// Image reference
    pub image: String,
    /// `KEY=VALUE` environment, in order
    pub env: Vec<String>,
    /// Exposed ports, `25565` or `2456/udp`
    pub ports: Vec<String>,
    /// Container paths to persist on the host
    pub volumes: Vec<String>,
    /// Explicit command; `None` keeps the image default
    pub start_command: Option<Vec<String>>,
    /// Default resource requirements
    pub requirements: ResourceRequirements,
}

impl Template {
    /// Parsed exposed ports.
    pub fn exposed_ports(&self) -> Result<Vec<ExposedPort>> {
        self.ports.iter().map(|p| p.parse()).collect()
    }

    fn apply(mut self, patch: &TemplateOverride) -> Self {
        if let Some(name) = &patch.name {
            self.name = name.clone();
        }
        if let Some(game) = &patch.game {
            self.game = game.clone();
        }
        if let Some(description) = &patch.description {
            self.description = description.clone();
        }
        if let Some(version) = &patch.version {
            self.version = version.clone();
        }
        if let Some(category) = &patch.category {
            self.category = category.clone();
        }
        if let Some(image) = &patch.image {
            self.image = image.clone();
        }
        if let Some(env) = &patch.env {
            self.env = env.clone();
        }
        if let Some(ports) = &patch.ports {
            self.ports = ports.clone();
        }
        if let Some(volumes) = &patch.volumes {
            self.volumes = volumes.clone();
        }
        if let Some(command) = &patch.start_command {
            // An empty command restores the image default
            self.start_command = (!command.is_empty()).then(|| command.clone());
        }
        if let Some(requirements) = patch.requirements {
            self.requirements = requirements;
        }
        self
    }
}

/// Operator supplied replacement values for one template.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct TemplateOverride {
    /// Display name
    pub name: Option<String>,
    /// Game label
    pub game: Option<String>,
    /// Description
    pub description: Option<String>,
    /// Game version
    pub version: Option<String>,
    /// Category
    pub category: Option<String>,
    /// Image reference; required when the id is not built in
    pub image: Option<String>,
    /// Replaces the whole environment list
    pub env: Option<Vec<String>>,
    /// Replaces the whole port list
    pub ports: Option<Vec<String>>,
    /// Replaces the whole volume list
    pub volumes: Option<Vec<String>>,
    /// Replaces the command; an empty list means "image default"
    pub start_command: Option<Vec<String>>,
    /// Replaces the requirements
    pub requirements: Option<ResourceRequirements>,
}

/// Resolves template ids and validates resource requests against quota.
pub struct TemplateRegistry {
    builtins: HashMap<String, Template>,
    overrides: HashMap<String, TemplateOverride>,
    quota: ResourceQuota,
}

impl TemplateRegistry {
    /// Create a registry over the built-in templates and the given overrides.
    pub fn new(overrides: HashMap<String, TemplateOverride>, quota: ResourceQuota) -> Self {
        let builtins = builtin_templates()
            .into_iter()
            .map(|t| (t.id.clone(), t))
            .collect();

        Self {
            builtins,
            overrides,
            quota,
        }
    }

    /// The administrative quota requests are checked against.
    pub fn quota(&self) -> &ResourceQuota {
        &self.quota
    }

    /// Resolve a template id.
    ///
    /// # Errors
    ///
    /// [`Error::TemplateNotFound`] if neither a built-in nor an override defines
    /// the id, [`Error::Validation`] if an override-only template has no image.
    pub fn resolve(&self, id: &str) -> Result<Template> {
        let patch = self.overrides.get(id);

        let template = match (self.builtins.get(id), patch) {
            (Some(builtin), Some(patch)) => builtin.clone().apply(patch),
            (Some(builtin), None) => builtin.clone(),
            (None, Some(patch)) => {
                let image = patch.image.clone().ok_or_else(|| {
                    Error::Validation(format!("Template '{}' has no image", id))
                })?;
                Template {
                    id: id.to_string(),
                    name: id.to_string(),
                    game: String::new(),
                    description: String::new(),
                    version: "Latest".to_string(),
                    category: "custom".to_string(),
                    image,
                    env: Vec::new(),
                    ports: Vec::new(),
                    volumes: Vec::new(),
                    start_command: None,
                    requirements: ResourceRequirements {
                        cpu: 1.0,
                        memory_mb: 1024,
                        disk_mb: 1024,
                    },
                }
                .apply(patch)
            }
            (None, None) => return Err(Error::TemplateNotFound(id.to_string())),
        };

        tracing::debug!(template = %id, overridden = patch.is_some(), "Resolved template");
        Ok(template)
    }

    /// Every resolvable template, sorted by id.
    pub fn list(&self) -> Vec<Template> {
        let mut ids: Vec<&String> = self.builtins.keys().chain(self.overrides.keys()).collect();
        ids.sort();
        ids.dedup();

        ids.into_iter()
            .filter_map(|id| match self.resolve(id) {
                Ok(template) => Some(template),
                Err(e) => {
                    tracing::warn!(template = %id, error = %e, "Skipping unresolvable template");
                    None
                }
            })
            .collect()
    }

    /// Check a template and a resource request before anything is created.
    ///
    /// Never touches the engine.
    ///
    /// # Errors
    ///
    /// [`Error::Validation`] for a malformed template or a non-positive request,
    /// [`Error::ResourceLimitExceeded`] when the request is above quota.
    pub fn validate(&self, template: &Template, requested: &ResourceLimits) -> Result<()> {
        if template.image.trim().is_empty() {
            return Err(Error::Validation(format!(
                "Template '{}' has an empty image",
                template.id
            )));
        }
        template.exposed_ports()?;

        if !(requested.cpu.is_finite() && requested.cpu > 0.0) {
            return Err(Error::Validation(format!(
                "CPU share must be positive, got {}",
                requested.cpu
            )));
        }
        if requested.memory_mb == 0 {
            return Err(Error::Validation("Memory must be positive".to_string()));
        }

        if requested.cpu > self.quota.max_cpu {
            return Err(Error::ResourceLimitExceeded(format!(
                "CPU share {} exceeds the maximum of {}",
                requested.cpu, self.quota.max_cpu
            )));
        }
        if requested.memory_mb > self.quota.max_memory_mb {
            return Err(Error::ResourceLimitExceeded(format!(
                "Memory {} MB exceeds the maximum of {} MB",
                requested.memory_mb, self.quota.max_memory_mb
            )));
        }

        Ok(())
    }
}

impl Default for TemplateRegistry {
    fn default() -> Self {
        Self::new(HashMap::new(), ResourceQuota::default())
    }
}
