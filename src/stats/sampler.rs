//! Rate computation over raw engine counters.
//!
//! The engine reports cumulative counters. Percentages and per-second rates
//! need two reads, so the sampler keeps the previous read per server and
//! derives the rates from the delta.

use crate::runtime::{ContainerHandle, RawCounterSnapshot, Runtime, RuntimeError};
use crate::server::ServerId;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};

/// Why a snapshot carries no numbers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum UnavailableReason {
    /// The server has no container
    NotProvisioned,
    /// The container is gone from the engine
    ContainerMissing,
    /// The engine did not answer
    EngineUnreachable,
}

/// Derived resource usage of one server
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResourceSnapshot {
    /// Sampled server
    pub server_id: ServerId,
    /// CPU usage; 100 is one full core
    pub cpu_percent: f64,
    /// Memory usage excluding page cache, as a share of the limit
    pub memory_percent: f64,
    /// Memory in use excluding page cache
    pub memory_used_bytes: u64,
    /// Memory limit
    pub memory_limit_bytes: u64,
    /// Received bytes per second
    pub rx_bytes_per_sec: f64,
    /// Sent bytes per second
    pub tx_bytes_per_sec: f64,
    /// Whether CPU and network figures were computed against a previous read
    pub has_baseline: bool,
    /// Set when no read could be taken
    pub unavailable: bool,
    /// Why no read could be taken
    pub unavailable_reason: Option<UnavailableReason>,
    /// When the snapshot was produced
    pub sampled_at: DateTime<Utc>,
}

impl ResourceSnapshot {
    /// A snapshot flagged unavailable with all figures zeroed
    pub fn unavailable(server_id: ServerId, reason: UnavailableReason) -> Self {
        Self {
            server_id,
            cpu_percent: 0.0,
            memory_percent: 0.0,
            memory_used_bytes: 0,
            memory_limit_bytes: 0,
            rx_bytes_per_sec: 0.0,
            tx_bytes_per_sec: 0.0,
            has_baseline: false,
            unavailable: true,
            unavailable_reason: Some(reason),
            sampled_at: Utc::now(),
        }
    }
}

/// CPU usage between two reads.
///
/// `(Δcontainer / Δsystem) × onlineCpus × 100`, clamped to
/// `[0, onlineCpus × 100]`. Zero when the host counter did not move.
pub fn cpu_percent(previous: &RawCounterSnapshot, current: &RawCounterSnapshot) -> f64 {
    let cpu_delta = current.cpu_total_ns.saturating_sub(previous.cpu_total_ns) as f64;
    let system_delta = current.system_cpu_ns.saturating_sub(previous.system_cpu_ns) as f64;
    if system_delta <= 0.0 {
        return 0.0;
    }

    let cpus = f64::from(current.online_cpus);
    ((cpu_delta / system_delta) * cpus * 100.0).clamp(0.0, cpus * 100.0)
}

/// Memory usage of one read, page cache excluded. Zero without a limit.
pub fn memory_percent(current: &RawCounterSnapshot) -> f64 {
    if current.mem_limit_bytes == 0 {
        return 0.0;
    }
    let used = current.mem_usage_bytes.saturating_sub(current.mem_cache_bytes) as f64;
    (used / current.mem_limit_bytes as f64 * 100.0).clamp(0.0, 100.0)
}

fn went_backwards(previous: &RawCounterSnapshot, current: &RawCounterSnapshot) -> bool {
    current.cpu_total_ns < previous.cpu_total_ns
        || current.system_cpu_ns < previous.system_cpu_ns
        || current.rx_bytes < previous.rx_bytes
        || current.tx_bytes < previous.tx_bytes
}

/// Derive a snapshot from the current read and, if any, the previous one.
///
/// Without a usable previous read (none, or any counter went backwards after
/// a container restart) CPU and network rates are zero and `has_baseline` is
/// false. Memory never needs a baseline.
pub fn compute(
    server_id: ServerId,
    previous: Option<&RawCounterSnapshot>,
    current: &RawCounterSnapshot,
) -> ResourceSnapshot {
    let baseline = previous.filter(|prev| !went_backwards(prev, current));

    let (cpu, rx_rate, tx_rate) = match baseline {
        Some(prev) => {
            let elapsed = (current.captured_at - prev.captured_at).num_milliseconds() as f64 / 1000.0;
            let (rx, tx) = if elapsed > 0.0 {
                (
                    (current.rx_bytes - prev.rx_bytes) as f64 / elapsed,
                    (current.tx_bytes - prev.tx_bytes) as f64 / elapsed,
                )
            } else {
                (0.0, 0.0)
            };
            (cpu_percent(prev, current), rx, tx)
        }
        None => (0.0, 0.0, 0.0),
    };

    ResourceSnapshot {
        server_id,
        cpu_percent: cpu,
        memory_percent: memory_percent(current),
        memory_used_bytes: current.mem_usage_bytes.saturating_sub(current.mem_cache_bytes),
        memory_limit_bytes: current.mem_limit_bytes,
        rx_bytes_per_sec: rx_rate,
        tx_bytes_per_sec: tx_rate,
        has_baseline: baseline.is_some(),
        unavailable: false,
        unavailable_reason: None,
        sampled_at: current.captured_at,
    }
}

/// Samples servers and remembers the last read of each
pub struct ResourceSampler {
    runtime: Arc<dyn Runtime>,
    previous: Mutex<HashMap<ServerId, RawCounterSnapshot>>,
}

impl ResourceSampler {
    /// Create a sampler over the given engine
    pub fn new(runtime: Arc<dyn Runtime>) -> Self {
        Self {
            runtime,
            previous: Mutex::new(HashMap::new()),
        }
    }

    /// Take one read and derive a snapshot.
    ///
    /// Never fails. Engine problems come back as an unavailable snapshot and
    /// leave the stored baseline untouched, except a missing container which
    /// drops it.
    #[tracing::instrument(skip(self, container), fields(server_id = %server_id))]
    pub async fn sample(
        &self,
        server_id: ServerId,
        container: Option<&ContainerHandle>,
    ) -> ResourceSnapshot {
        let Some(handle) = container else {
            return ResourceSnapshot::unavailable(server_id, UnavailableReason::NotProvisioned);
        };

        let current = match self.runtime.stats(handle).await {
            Ok(current) => current,
            Err(RuntimeError::NotFound(msg)) => {
                tracing::debug!(container = %handle, %msg, "Container missing while sampling");
                self.reset(server_id);
                return ResourceSnapshot::unavailable(server_id, UnavailableReason::ContainerMissing);
            }
            Err(e) => {
                tracing::warn!(container = %handle, error = %e, "Failed to read container stats");
                return ResourceSnapshot::unavailable(server_id, UnavailableReason::EngineUnreachable);
            }
        };

        let mut previous = self.previous.lock().unwrap_or_else(|p| p.into_inner());
        let baseline = previous.get(&server_id).copied();
        match baseline {
            // A concurrent sample stored a newer read while this one was in flight
            Some(stored) if stored.captured_at > current.captured_at => {
                tracing::trace!(container = %handle, "Discarding out-of-order stats read");
                compute(server_id, None, &current)
            }
            _ => {
                previous.insert(server_id, current);
                compute(server_id, baseline.as_ref(), &current)
            }
        }
    }

    /// Forget the stored read so the next sample starts a fresh baseline
    pub fn reset(&self, server_id: ServerId) {
        let mut previous = self.previous.lock().unwrap_or_else(|p| p.into_inner());
        if previous.remove(&server_id).is_some() {
            tracing::trace!(server_id = %server_id, "Dropped stats baseline");
        }
    }

    /// Whether a previous read is stored for the server
    pub fn has_baseline(&self, server_id: ServerId) -> bool {
        self.previous
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .contains_key(&server_id)
    }
}
