// src/runtime/docker.rs
use super::{
    ContainerHandle, ContainerInspection, ContainerSpec, LogStream, RawCounterSnapshot, Runtime,
    RuntimeError, RuntimeResult,
};
use crate::config::EngineConfig;
use crate::error::{Error, Result};
use async_stream::stream;
use async_trait::async_trait;
use bollard::API_DEFAULT_VERSION;
use bollard::Docker;
use bollard::container::{
    Config, CreateContainerOptions, InspectContainerOptions, ListContainersOptions, LogOutput,
    LogsOptions, MemoryStatsStats, RemoveContainerOptions, StartContainerOptions, Stats,
    StatsOptions, StopContainerOptions,
};
use bollard::errors::Error as BollardError;
use bollard::exec::{CreateExecOptions, StartExecResults};
use bollard::models::{
    HostConfig, Ipam, IpamConfig, PortBinding as EnginePortBinding, RestartPolicy,
    RestartPolicyNameEnum,
};
use bollard::network::{CreateNetworkOptions, ListNetworksOptions};
use chrono::Utc;
use futures::StreamExt;
use std::collections::HashMap;
use std::time::Duration;

/// Counts and host facts reported by the engine.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct EngineSummary {
    /// All containers known to the engine
    pub total_containers: usize,
    /// Containers in the `running` state
    pub running_containers: usize,
    /// Containers in the `exited` state
    pub stopped_containers: usize,
    /// Host CPUs
    pub cpus: Option<i64>,
    /// Host memory, bytes
    pub memory_bytes: Option<i64>,
    /// Engine version string
    pub version: Option<String>,
}

/// [`Runtime`] backed by a local Docker daemon.
#[derive(Clone)]
pub struct DockerRuntime {
    docker: Docker,
}

impl DockerRuntime {
    /// Connect to the daemon named in `config`, or the platform default socket.
    #[tracing::instrument(skip(config), fields(socket = ?config.socket))]
    pub fn connect(config: &EngineConfig) -> Result<Self> {
        let docker = match &config.socket {
            Some(socket) => {
                Docker::connect_with_socket(socket, config.request_timeout_secs, API_DEFAULT_VERSION)
            }
            None => Docker::connect_with_local_defaults()
                .map(|docker| docker.with_timeout(Duration::from_secs(config.request_timeout_secs))),
        }
        .map_err(|e| {
            tracing::error!(error = %e, "Failed to connect to Docker");
            Error::EngineUnavailable(format!("Failed to connect to Docker: {}", e))
        })?;

        Ok(Self::from_client(docker))
    }

    /// Wrap an already configured client.
    pub fn from_client(docker: Docker) -> Self {
        Self { docker }
    }

    /// Create the bridge network game servers attach to, if it is missing.
    #[tracing::instrument(skip(self, subnet))]
    pub async fn ensure_network(&self, name: &str, subnet: Option<&str>) -> Result<()> {
        let mut filters = HashMap::new();
        filters.insert("name".to_string(), vec![name.to_string()]);

        let existing = self
            .docker
            .list_networks(Some(ListNetworksOptions { filters }))
            .await
            .map_err(|e| Error::from(classify(e)))?;

        // The name filter is a substring match
        if existing.iter().any(|n| n.name.as_deref() == Some(name)) {
            tracing::debug!("Network already exists");
            return Ok(());
        }

        let ipam = Ipam {
            config: subnet.map(|subnet| {
                vec![IpamConfig {
                    subnet: Some(subnet.to_string()),
                    ..Default::default()
                }]
            }),
            ..Default::default()
        };

        self.docker
            .create_network(CreateNetworkOptions {
                name: name.to_string(),
                driver: "bridge".to_string(),
                ipam,
                ..Default::default()
            })
            .await
            .map_err(|e| Error::from(classify(e)))?;

        tracing::info!("Created network");
        Ok(())
    }

    /// Container counts and host facts.
    #[tracing::instrument(skip(self))]
    pub async fn engine_summary(&self) -> Result<EngineSummary> {
        let containers = self
            .docker
            .list_containers(Some(ListContainersOptions::<String> {
                all: true,
                ..Default::default()
            }))
            .await
            .map_err(|e| Error::from(classify(e)))?;

        let info = self
            .docker
            .info()
            .await
            .map_err(|e| Error::from(classify(e)))?;

        let in_state =
            |state: &str| containers.iter().filter(|c| c.state.as_deref() == Some(state)).count();

        Ok(EngineSummary {
            total_containers: containers.len(),
            running_containers: in_state("running"),
            stopped_containers: in_state("exited"),
            cpus: info.ncpu,
            memory_bytes: info.mem_total,
            version: info.server_version,
        })
    }
}

/// Map a Docker client error onto the runtime error taxonomy.
fn classify(err: BollardError) -> RuntimeError {
    match err {
        BollardError::DockerResponseServerError {
            status_code: 404,
            message,
        } => RuntimeError::NotFound(message),
        BollardError::DockerResponseServerError {
            status_code,
            message,
        } => RuntimeError::Engine(format!("{} ({})", message, status_code)),
        BollardError::RequestTimeoutError => RuntimeError::Timeout(err.to_string()),
        BollardError::IOError { .. }
        | BollardError::SocketNotFoundError(_)
        | BollardError::HyperResponseError { .. } => RuntimeError::Unavailable(err.to_string()),
        other => RuntimeError::Engine(other.to_string()),
    }
}

/// 304 from start/stop means the container is already in the requested state.
fn ignore_not_modified(result: std::result::Result<(), BollardError>) -> RuntimeResult<()> {
    match result {
        Ok(()) => Ok(()),
        Err(BollardError::DockerResponseServerError {
            status_code: 304, ..
        }) => Ok(()),
        Err(e) => Err(classify(e)),
    }
}

fn container_config(spec: &ContainerSpec) -> Config<String> {
    let exposed_ports = spec
        .ports
        .iter()
        .map(|p| (p.key(), HashMap::new()))
        .collect::<HashMap<_, _>>();

    let port_bindings = spec
        .ports
        .iter()
        .map(|p| {
            (
                p.key(),
                Some(vec![EnginePortBinding {
                    host_ip: None,
                    host_port: Some(p.host_port.to_string()),
                }]),
            )
        })
        .collect::<HashMap<_, _>>();

    let binds = spec
        .binds
        .iter()
        .map(|b| format!("{}:{}", b.host_path, b.container_path))
        .collect::<Vec<_>>();

    let restart_policy = spec.restart_unless_stopped.then(|| RestartPolicy {
        name: Some(RestartPolicyNameEnum::UNLESS_STOPPED),
        maximum_retry_count: None,
    });

    Config {
        image: Some(spec.image.clone()),
        env: Some(spec.env.clone()),
        exposed_ports: Some(exposed_ports),
        working_dir: spec.working_dir.clone(),
        cmd: spec.command.clone(),
        host_config: Some(HostConfig {
            memory: Some(spec.limits.memory_bytes()),
            nano_cpus: Some(spec.limits.nano_cpus()),
            port_bindings: Some(port_bindings),
            binds: Some(binds),
            network_mode: spec.network.clone(),
            restart_policy,
            ..Default::default()
        }),
        ..Default::default()
    }
}

fn raw_counters(stats: &Stats) -> RawCounterSnapshot {
    let cache = match &stats.memory_stats.stats {
        Some(MemoryStatsStats::V1(v1)) => v1.cache,
        Some(MemoryStatsStats::V2(v2)) => v2.inactive_file,
        None => 0,
    };

    let (rx_bytes, tx_bytes) = stats
        .networks
        .as_ref()
        .map(|networks| {
            networks.values().fold((0u64, 0u64), |(rx, tx), n| {
                (rx.saturating_add(n.rx_bytes), tx.saturating_add(n.tx_bytes))
            })
        })
        .unwrap_or_default();

    RawCounterSnapshot {
        cpu_total_ns: stats.cpu_stats.cpu_usage.total_usage,
        system_cpu_ns: stats.cpu_stats.system_cpu_usage.unwrap_or(0),
        online_cpus: stats.cpu_stats.online_cpus.unwrap_or(0) as u32,
        mem_usage_bytes: stats.memory_stats.usage.unwrap_or(0),
        mem_cache_bytes: cache,
        mem_limit_bytes: stats.memory_stats.limit.unwrap_or(0),
        rx_bytes,
        tx_bytes,
        captured_at: Utc::now(),
    }
}

#[async_trait]
impl Runtime for DockerRuntime {
    #[tracing::instrument(skip(self, spec), fields(name = %spec.name, image = %spec.image))]
    async fn create(&self, spec: &ContainerSpec) -> RuntimeResult<ContainerHandle> {
        let response = self
            .docker
            .create_container(
                Some(CreateContainerOptions {
                    name: spec.name.clone(),
                    ..Default::default()
                }),
                container_config(spec),
            )
            .await
            .map_err(classify)?;

        for warning in &response.warnings {
            tracing::warn!(%warning, "Engine warning on create");
        }

        tracing::info!(container_id = %response.id, "Created container");
        Ok(ContainerHandle::new(response.id))
    }

    async fn start(&self, handle: &ContainerHandle) -> RuntimeResult<()> {
        ignore_not_modified(
            self.docker
                .start_container(handle.as_str(), None::<StartContainerOptions<String>>)
                .await,
        )
    }

    async fn stop(&self, handle: &ContainerHandle, timeout: Duration) -> RuntimeResult<()> {
        ignore_not_modified(
            self.docker
                .stop_container(
                    handle.as_str(),
                    Some(StopContainerOptions {
                        t: timeout.as_secs() as i64,
                    }),
                )
                .await,
        )
    }

    async fn restart(&self, handle: &ContainerHandle) -> RuntimeResult<()> {
        self.docker
            .restart_container(handle.as_str(), None)
            .await
            .map_err(classify)
    }

    async fn remove(&self, handle: &ContainerHandle, force: bool) -> RuntimeResult<()> {
        self.docker
            .remove_container(
                handle.as_str(),
                Some(RemoveContainerOptions {
                    force,
                    ..Default::default()
                }),
            )
            .await
            .map_err(classify)
    }

    async fn inspect(&self, handle: &ContainerHandle) -> RuntimeResult<ContainerInspection> {
        let response = self
            .docker
            .inspect_container(handle.as_str(), None::<InspectContainerOptions>)
            .await
            .map_err(classify)?;

        let state = response.state.unwrap_or_default();
        let running = state.running.unwrap_or(false);

        Ok(ContainerInspection {
            running,
            restarting: state.restarting.unwrap_or(false),
            exit_code: if running { None } else { state.exit_code },
        })
    }

    async fn stats(&self, handle: &ContainerHandle) -> RuntimeResult<RawCounterSnapshot> {
        let mut stream = Box::pin(self.docker.stats(
            handle.as_str(),
            Some(StatsOptions {
                stream: false,
                one_shot: true,
            }),
        ));

        match stream.next().await {
            Some(Ok(stats)) => Ok(raw_counters(&stats)),
            Some(Err(e)) => Err(classify(e)),
            None => Err(RuntimeError::Engine(
                "stats stream ended without a sample".to_string(),
            )),
        }
    }

    async fn logs(&self, handle: &ContainerHandle, tail_lines: usize) -> RuntimeResult<LogStream> {
        // Surface a missing container now rather than on first poll
        self.inspect(handle).await?;

        let docker = self.docker.clone();
        let id = handle.as_str().to_string();

        let stream = stream! {
            let mut raw = Box::pin(docker.logs(
                &id,
                Some(LogsOptions::<String> {
                    stdout: true,
                    stderr: true,
                    timestamps: true,
                    tail: tail_lines.to_string(),
                    ..Default::default()
                }),
            ));

            while let Some(chunk) = raw.next().await {
                let text = match chunk {
                    Ok(LogOutput::StdOut { message })
                    | Ok(LogOutput::StdErr { message })
                    | Ok(LogOutput::Console { message }) => {
                        String::from_utf8_lossy(&message).into_owned()
                    }
                    Ok(LogOutput::StdIn { .. }) => continue,
                    Err(e) => {
                        yield Err::<String, RuntimeError>(classify(e));
                        break;
                    }
                };

                for line in text.lines().filter(|l| !l.trim().is_empty()) {
                    yield Ok(line.to_string());
                }
            }
        };

        Ok(Box::pin(stream))
    }

    #[tracing::instrument(skip(self, command), fields(container_id = %handle))]
    async fn exec(&self, handle: &ContainerHandle, command: Vec<String>) -> RuntimeResult<String> {
        let exec = self
            .docker
            .create_exec(
                handle.as_str(),
                CreateExecOptions {
                    attach_stdout: Some(true),
                    attach_stderr: Some(true),
                    cmd: Some(command),
                    ..Default::default()
                },
            )
            .await
            .map_err(classify)?;

        match self.docker.start_exec(&exec.id, None).await.map_err(classify)? {
            StartExecResults::Attached { mut output, .. } => {
                let mut collected = Vec::new();
                while let Some(chunk) = output.next().await {
                    collected.extend_from_slice(&chunk.map_err(classify)?.into_bytes());
                }
                Ok(String::from_utf8_lossy(&collected).into_owned())
            }
            StartExecResults::Detached => Ok(String::new()),
        }
    }
}
