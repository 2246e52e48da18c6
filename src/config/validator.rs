use crate::config::{BroadcasterConfig, Config, LifecycleConfig, ResourceQuota};
use crate::error::{Error, Result};
use crate::template::{TemplateOverride, builtin_ids};
use crate::types::ExposedPort;
use std::collections::HashMap;

/// Validates the administrative quota
pub fn validate_quota(limits: &ResourceQuota) -> Result<()> {
    if !(limits.max_cpu.is_finite() && limits.max_cpu > 0.0) {
        return Err(Error::ConfigInvalid(format!(
            "maxCpu must be positive, got {}",
            limits.max_cpu
        )));
    }

    if limits.max_memory_mb == 0 {
        return Err(Error::ConfigInvalid("maxMemoryMb must be positive".to_string()));
    }

    if limits.max_servers_per_owner == Some(0) {
        return Err(Error::ConfigInvalid(
            "maxServersPerOwner must be positive or null".to_string(),
        ));
    }

    Ok(())
}

/// Validates polling and timeout settings
pub fn validate_lifecycle(lifecycle: &LifecycleConfig) -> Result<()> {
    if lifecycle.start_poll_attempts == 0 {
        return Err(Error::ConfigInvalid(
            "startPollAttempts must be at least 1".to_string(),
        ));
    }

    if lifecycle.max_backoff_ms < lifecycle.initial_backoff_ms {
        return Err(Error::ConfigInvalid(
            "maxBackoffMs must not be smaller than initialBackoffMs".to_string(),
        ));
    }

    if lifecycle.exec_timeout_secs == 0 {
        return Err(Error::ConfigInvalid("execTimeoutSecs must be positive".to_string()));
    }

    Ok(())
}

/// Validates broadcaster settings
pub fn validate_broadcaster(broadcaster: &BroadcasterConfig) -> Result<()> {
    if broadcaster.interval_ms == 0 {
        return Err(Error::ConfigInvalid("intervalMs must be positive".to_string()));
    }

    if broadcaster.max_in_flight == 0 {
        return Err(Error::ConfigInvalid("maxInFlight must be positive".to_string()));
    }

    if broadcaster.channel_capacity == 0 {
        return Err(Error::ConfigInvalid("channelCapacity must be positive".to_string()));
    }

    Ok(())
}

/// Validates operator template overrides
///
/// An override for an unknown id defines a new template and must carry an image.
pub fn validate_template_overrides(overrides: &HashMap<String, TemplateOverride>) -> Result<()> {
    let builtins = builtin_ids();

    for (id, template) in overrides {
        if id.trim().is_empty() {
            return Err(Error::ConfigInvalid("Template override with empty id".to_string()));
        }

        let is_builtin = builtins.contains(&id.as_str());
        match template.image.as_deref() {
            Some(image) if image.trim().is_empty() => {
                return Err(Error::ConfigInvalid(format!(
                    "Template '{}' has an empty image",
                    id
                )));
            }
            None if !is_builtin => {
                return Err(Error::ConfigInvalid(format!(
                    "Template '{}' is not built in and has no image",
                    id
                )));
            }
            _ => {}
        }

        for port in template.ports.iter().flatten() {
            port.parse::<ExposedPort>().map_err(|e| {
                Error::ConfigInvalid(format!("Template '{}': {}", id, e))
            })?;
        }
    }

    Ok(())
}

/// Full configuration validation
pub fn validate_config(config: &Config) -> Result<()> {
    validate_quota(&config.limits)?;
    validate_lifecycle(&config.lifecycle)?;
    validate_broadcaster(&config.broadcaster)?;
    validate_template_overrides(&config.templates)?;

    if config.engine.network.trim().is_empty() {
        return Err(Error::ConfigInvalid("Engine network name is empty".to_string()));
    }

    Ok(())
}
