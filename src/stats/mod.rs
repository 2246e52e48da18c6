//! Resource sampling and live status broadcasting.
//!
//! * `sampler` - Turns cumulative engine counters into percentages and rates
//! * `broadcaster` - Pushes snapshots and status changes to topic subscribers
mod broadcaster;
mod sampler;

pub use broadcaster::{BroadcastMessage, StatusBroadcaster, Topic};
pub use sampler::{
    ResourceSampler, ResourceSnapshot, UnavailableReason, compute, cpu_percent, memory_percent,
};
