use async_trait::async_trait;
use chrono::Utc;
use futures::StreamExt;
use gamehost_orchestrator::config::Config;
use gamehost_orchestrator::runtime::{
    ContainerHandle, ContainerInspection, ContainerSpec, LogStream, RawCounterSnapshot, Runtime,
    RuntimeError, RuntimeResult,
};
use gamehost_orchestrator::server::{InMemoryServerStore, NewServer};
use gamehost_orchestrator::Orchestrator;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

#[derive(Default)]
struct FakeState {
    containers: HashMap<String, FakeContainer>,
    next_id: u64,
    created: Vec<ContainerSpec>,
    execs: Vec<Vec<String>>,
    create_delay: Duration,
    start_delay: Duration,
    inspect_delay: Duration,
    exec_delay: Duration,
    never_runs: bool,
    hang_stop: bool,
    engine_down: bool,
    fail_remove: Option<RuntimeError>,
    logs: Vec<String>,
}

struct FakeContainer {
    running: bool,
    counters: RawCounterSnapshot,
}

/// In-process engine with knobs for the failure modes the manager handles
#[derive(Default)]
pub struct FakeRuntime {
    state: Mutex<FakeState>,
}

#[allow(dead_code)]
impl FakeRuntime {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    fn with<R>(&self, f: impl FnOnce(&mut FakeState) -> R) -> R {
        f(&mut self.state.lock().unwrap())
    }

    pub fn created(&self) -> Vec<ContainerSpec> {
        self.with(|s| s.created.clone())
    }

    pub fn execs(&self) -> Vec<Vec<String>> {
        self.with(|s| s.execs.clone())
    }

    pub fn container_count(&self) -> usize {
        self.with(|s| s.containers.len())
    }

    pub fn is_running(&self, handle: &ContainerHandle) -> bool {
        self.with(|s| s.containers.get(handle.as_str()).is_some_and(|c| c.running))
    }

    pub fn set_create_delay(&self, delay: Duration) {
        self.with(|s| s.create_delay = delay);
    }

    pub fn set_inspect_delay(&self, delay: Duration) {
        self.with(|s| s.inspect_delay = delay);
    }

    pub fn set_start_delay(&self, delay: Duration) {
        self.with(|s| s.start_delay = delay);
    }

    pub fn set_exec_delay(&self, delay: Duration) {
        self.with(|s| s.exec_delay = delay);
    }

    pub fn set_never_runs(&self, never: bool) {
        self.with(|s| s.never_runs = never);
    }

    pub fn set_hang_stop(&self, hang: bool) {
        self.with(|s| s.hang_stop = hang);
    }

    pub fn set_engine_down(&self, down: bool) {
        self.with(|s| s.engine_down = down);
    }

    pub fn set_fail_remove(&self, error: Option<RuntimeError>) {
        self.with(|s| s.fail_remove = error);
    }

    pub fn set_logs(&self, lines: &[&str]) {
        self.with(|s| s.logs = lines.iter().map(|l| l.to_string()).collect());
    }

    /// Somebody removed the container behind the orchestrator's back
    pub fn vanish(&self, handle: &ContainerHandle) {
        self.with(|s| s.containers.remove(handle.as_str()));
    }

    /// Simulate a crash without the orchestrator noticing
    pub fn kill(&self, handle: &ContainerHandle) {
        self.with(|s| {
            if let Some(c) = s.containers.get_mut(handle.as_str()) {
                c.running = false;
            }
        });
    }

    pub fn set_counters(&self, handle: &ContainerHandle, counters: RawCounterSnapshot) {
        self.with(|s| {
            if let Some(c) = s.containers.get_mut(handle.as_str()) {
                c.counters = counters;
            }
        });
    }

    fn missing(handle: &ContainerHandle) -> RuntimeError {
        RuntimeError::NotFound(format!("no such container: {}", handle))
    }
}

pub fn counters(cpu_ns: u64, system_ns: u64) -> RawCounterSnapshot {
    RawCounterSnapshot {
        cpu_total_ns: cpu_ns,
        system_cpu_ns: system_ns,
        online_cpus: 2,
        mem_usage_bytes: 400 * 1024 * 1024,
        mem_cache_bytes: 100 * 1024 * 1024,
        mem_limit_bytes: 1024 * 1024 * 1024,
        rx_bytes: 0,
        tx_bytes: 0,
        captured_at: Utc::now(),
    }
}

#[async_trait]
impl Runtime for FakeRuntime {
    async fn create(&self, spec: &ContainerSpec) -> RuntimeResult<ContainerHandle> {
        let delay = self.with(|s| s.create_delay);
        tokio::time::sleep(delay).await;
        self.with(|s| {
            if s.engine_down {
                return Err(RuntimeError::Unavailable("engine down".to_string()));
            }
            s.next_id += 1;
            let id = format!("fake-{}", s.next_id);
            s.created.push(spec.clone());
            s.containers.insert(
                id.clone(),
                FakeContainer {
                    running: false,
                    counters: counters(0, 0),
                },
            );
            Ok(ContainerHandle::new(id))
        })
    }

    async fn start(&self, handle: &ContainerHandle) -> RuntimeResult<()> {
        let delay = self.with(|s| s.start_delay);
        tokio::time::sleep(delay).await;
        self.with(|s| {
            let never_runs = s.never_runs;
            let container = s
                .containers
                .get_mut(handle.as_str())
                .ok_or_else(|| Self::missing(handle))?;
            container.running = !never_runs;
            Ok(())
        })
    }

    async fn stop(&self, handle: &ContainerHandle, _timeout: Duration) -> RuntimeResult<()> {
        if self.with(|s| s.hang_stop) {
            tokio::time::sleep(Duration::from_secs(5)).await;
        }
        self.with(|s| {
            let container = s
                .containers
                .get_mut(handle.as_str())
                .ok_or_else(|| Self::missing(handle))?;
            container.running = false;
            Ok(())
        })
    }

    async fn restart(&self, handle: &ContainerHandle) -> RuntimeResult<()> {
        self.with(|s| {
            let never_runs = s.never_runs;
            let container = s
                .containers
                .get_mut(handle.as_str())
                .ok_or_else(|| Self::missing(handle))?;
            container.running = !never_runs;
            Ok(())
        })
    }

    async fn remove(&self, handle: &ContainerHandle, _force: bool) -> RuntimeResult<()> {
        self.with(|s| {
            if let Some(error) = s.fail_remove.clone() {
                return Err(error);
            }
            s.containers
                .remove(handle.as_str())
                .map(|_| ())
                .ok_or_else(|| Self::missing(handle))
        })
    }

    async fn inspect(&self, handle: &ContainerHandle) -> RuntimeResult<ContainerInspection> {
        let delay = self.with(|s| s.inspect_delay);
        tokio::time::sleep(delay).await;
        self.with(|s| {
            let container = s
                .containers
                .get(handle.as_str())
                .ok_or_else(|| Self::missing(handle))?;
            Ok(ContainerInspection {
                running: container.running,
                restarting: false,
                exit_code: (!container.running).then_some(0),
            })
        })
    }

    async fn stats(&self, handle: &ContainerHandle) -> RuntimeResult<RawCounterSnapshot> {
        self.with(|s| {
            if s.engine_down {
                return Err(RuntimeError::Unavailable("engine down".to_string()));
            }
            s.containers
                .get(handle.as_str())
                .map(|c| c.counters)
                .ok_or_else(|| Self::missing(handle))
        })
    }

    async fn logs(&self, handle: &ContainerHandle, tail_lines: usize) -> RuntimeResult<LogStream> {
        let lines = self.with(|s| {
            if !s.containers.contains_key(handle.as_str()) {
                return Err(Self::missing(handle));
            }
            let skip = s.logs.len().saturating_sub(tail_lines);
            Ok(s.logs[skip..].to_vec())
        })?;
        Ok(futures::stream::iter(lines.into_iter().map(Ok)).boxed())
    }

    async fn exec(&self, handle: &ContainerHandle, command: Vec<String>) -> RuntimeResult<String> {
        let delay = self.with(|s| s.exec_delay);
        tokio::time::sleep(delay).await;
        self.with(|s| {
            if !s.containers.contains_key(handle.as_str()) {
                return Err(Self::missing(handle));
            }
            let output = format!("ran: {}", command.join(" "));
            s.execs.push(command);
            Ok(output)
        })
    }
}

/// Configuration with timings short enough for tests
pub fn test_config() -> Config {
    let mut config = Config::default();
    config.engine.data_root = "/srv/gamehost".to_string();
    config.lifecycle.start_poll_attempts = 3;
    config.lifecycle.initial_backoff_ms = 1;
    config.lifecycle.max_backoff_ms = 5;
    config.lifecycle.stop_grace_secs = 0;
    config.lifecycle.stop_slack_ms = 100;
    config.lifecycle.exec_timeout_secs = 1;
    config.broadcaster.interval_ms = 20;
    config
}

pub fn setup_with(config: Config) -> (Arc<FakeRuntime>, Orchestrator) {
    let runtime = FakeRuntime::new();
    let orchestrator = Orchestrator::new(
        config,
        runtime.clone(),
        Arc::new(InMemoryServerStore::new()),
    )
    .expect("valid test config");
    (runtime, orchestrator)
}

pub fn setup() -> (Arc<FakeRuntime>, Orchestrator) {
    setup_with(test_config())
}

pub fn new_server(template: &str, owner: &str) -> NewServer {
    NewServer {
        name: format!("{} server", template),
        game: "Test".to_string(),
        template: template.to_string(),
        limits: None,
        ports: Vec::new(),
        owner: owner.to_string(),
    }
}
