//! The server lifecycle state machine.
//!
//! [`LifecycleManager`] drives one server at a time through
//! provision → start → stop/restart → delete against the container engine,
//! persisting every transition through the [`ServerStore`] and announcing
//! observed-state changes on the [`EventManager`].
//!
//! Only one mutating operation may run per server. A second request for a
//! server that is busy fails immediately with
//! [`Error::ConcurrencyConflict`]; it is never queued.

use crate::config::{EngineConfig, LifecycleConfig};
use crate::error::{Error, Result};
use crate::runtime::{ContainerHandle, ContainerSpec, Runtime, RuntimeError, VolumeBind};
use crate::server::events::{EventManager, StatusChange};
use crate::server::store::ServerStore;
use crate::server::{NewServer, Server, ServerId, ServerState, ServerStatus};
use crate::stats::{ResourceSampler, ResourceSnapshot, UnavailableReason};
use crate::template::{Template, TemplateRegistry};
use crate::types::{PortBinding, ResourceLimits};
use chrono::Utc;
use futures::StreamExt;
use futures::stream::BoxStream;
use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use tokio::time;

/// Log lines of a server, read lazily
pub type ServerLogs = BoxStream<'static, Result<String>>;

const DRIFT_REASON: &str = "container removed outside the orchestrator";

/// Marks a server busy for as long as it lives
struct OperationGuard {
    in_flight: Arc<Mutex<HashSet<ServerId>>>,
    id: ServerId,
}

impl Drop for OperationGuard {
    fn drop(&mut self) {
        let mut in_flight = self.in_flight.lock().unwrap_or_else(|p| p.into_inner());
        in_flight.remove(&self.id);
    }
}

/// Counts a provision against its owner until the record holds the container
struct QuotaReservation {
    pending: Arc<Mutex<HashMap<ServerId, String>>>,
    id: ServerId,
}

impl Drop for QuotaReservation {
    fn drop(&mut self) {
        let mut pending = self.pending.lock().unwrap_or_else(|p| p.into_inner());
        pending.remove(&self.id);
    }
}

/// Drives game servers through their lifecycle
pub struct LifecycleManager {
    runtime: Arc<dyn Runtime>,
    store: Arc<dyn ServerStore>,
    registry: Arc<TemplateRegistry>,
    sampler: Arc<ResourceSampler>,
    events: Arc<EventManager>,
    config: LifecycleConfig,
    engine: EngineConfig,
    in_flight: Arc<Mutex<HashSet<ServerId>>>,
    pending_provisions: Arc<Mutex<HashMap<ServerId, String>>>,
}

impl LifecycleManager {
    /// Create a new lifecycle manager
    pub fn new(
        runtime: Arc<dyn Runtime>,
        store: Arc<dyn ServerStore>,
        registry: Arc<TemplateRegistry>,
        events: Arc<EventManager>,
        config: LifecycleConfig,
        engine: EngineConfig,
    ) -> Self {
        let sampler = Arc::new(ResourceSampler::new(Arc::clone(&runtime)));
        Self {
            runtime,
            store,
            registry,
            sampler,
            events,
            config,
            engine,
            in_flight: Arc::new(Mutex::new(HashSet::new())),
            pending_provisions: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// The shared resource sampler
    pub fn sampler(&self) -> &Arc<ResourceSampler> {
        &self.sampler
    }

    /// The status change events
    pub fn events(&self) -> &Arc<EventManager> {
        &self.events
    }

    /// The template registry
    pub fn registry(&self) -> &Arc<TemplateRegistry> {
        &self.registry
    }

    /// Whether a mutating operation is running for the server
    pub fn is_busy(&self, id: ServerId) -> bool {
        self.in_flight
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .contains(&id)
    }

    fn begin(&self, id: ServerId) -> Result<OperationGuard> {
        self.try_claim(id).ok_or_else(|| {
            tracing::warn!(server_id = %id, "Rejecting operation, another one is in progress");
            Error::ConcurrencyConflict(id.to_string())
        })
    }

    fn try_claim(&self, id: ServerId) -> Option<OperationGuard> {
        let mut in_flight = self.in_flight.lock().unwrap_or_else(|p| p.into_inner());
        in_flight.insert(id).then(|| OperationGuard {
            in_flight: Arc::clone(&self.in_flight),
            id,
        })
    }

    /// Re-read a record under the guard so a read can write back what it saw
    /// on the engine.
    ///
    /// Gives nothing back when an operation holds the server or the record
    /// changed since `seen` was loaded; the observation is stale then.
    async fn settle(&self, seen: &Server) -> Result<Option<(OperationGuard, Server)>> {
        let Some(guard) = self.try_claim(seen.id) else {
            tracing::debug!(server_id = %seen.id, "Operation in flight, dropping observation");
            return Ok(None);
        };

        match self.store.get(seen.id).await? {
            Some(fresh) if fresh == *seen => Ok(Some((guard, fresh))),
            _ => {
                tracing::debug!(server_id = %seen.id, "Record changed while reading, dropping observation");
                Ok(None)
            }
        }
    }

    /// A read found the container gone: reconcile unless the record moved on
    async fn reconcile_seen_drift(&self, seen: &Server) -> Result<()> {
        if let Some((_guard, mut fresh)) = self.settle(seen).await? {
            self.reconcile_drift(&mut fresh).await?;
        }
        Ok(())
    }

    /// Create an unprovisioned server record
    #[tracing::instrument(skip(self, new), fields(name = %new.name, template = %new.template))]
    pub async fn register(&self, new: NewServer) -> Result<Server> {
        if new.name.trim().is_empty() {
            return Err(Error::Validation("Server name must not be empty".to_string()));
        }
        if new.owner.trim().is_empty() {
            return Err(Error::Validation("Server owner must not be empty".to_string()));
        }

        let server = Server::new(new);
        self.store.put(server.clone()).await?;

        tracing::info!(server_id = %server.id, "Registered server");
        Ok(server)
    }

    /// Fetch a server record
    pub async fn get(&self, id: ServerId) -> Result<Server> {
        self.store
            .get(id)
            .await?
            .ok_or_else(|| Error::ServerNotFound(id.to_string()))
    }

    /// All server records
    pub async fn list(&self) -> Result<Vec<Server>> {
        self.store.list().await
    }

    /// Create the engine container for an unprovisioned server.
    ///
    /// Template resolution, resource validation and the owner quota are all
    /// checked before the engine is touched.
    #[tracing::instrument(skip(self), fields(server_id = %id))]
    pub async fn provision(&self, id: ServerId) -> Result<Server> {
        let _guard = self.begin(id)?;
        let mut server = self.get(id).await?;

        if server.desired_state != ServerState::Unprovisioned || server.container.is_some() {
            return Err(Error::InvalidTransition {
                from: server.desired_state,
                to: ServerState::Offline,
            });
        }

        let template = self.registry.resolve(&server.template).map_err(|e| match e {
            Error::TemplateNotFound(name) => {
                Error::Validation(format!("Unknown template '{}'", name))
            }
            other => other,
        })?;

        let limits = server.limits.unwrap_or_else(|| template.requirements.limits());
        self.registry.validate(&template, &limits)?;
        let _reservation = self.check_owner_quota(&server).await?;

        let ports = if server.ports.is_empty() {
            template
                .exposed_ports()?
                .into_iter()
                .map(PortBinding::identity)
                .collect()
        } else {
            server.ports.clone()
        };

        let spec = self.container_spec(&server, &template, ports.clone(), limits);
        tracing::info!(image = %spec.image, container = %spec.name, "Creating container");

        let handle = self.runtime.create(&spec).await.map_err(|e| {
            tracing::error!(error = %e, "Container creation failed");
            Error::from(e)
        })?;

        server.container = Some(handle.clone());
        server.limits = Some(limits);
        server.ports = ports;

        if let Err(e) = self.transition(&mut server, ServerState::Offline, None).await {
            tracing::error!(error = %e, container = %handle, "Could not record provisioned container, removing it");
            if let Err(cleanup) = self.runtime.remove(&handle, true).await {
                tracing::warn!(error = %cleanup, container = %handle, "Failed to remove orphaned container");
            }
            return Err(e);
        }

        Ok(server)
    }

    /// Start a provisioned server and wait for the engine to report it running
    #[tracing::instrument(skip(self), fields(server_id = %id))]
    pub async fn start(&self, id: ServerId) -> Result<Server> {
        let _guard = self.begin(id)?;
        let mut server = self.get(id).await?;
        let handle = server.require_container()?;

        self.transition(&mut server, ServerState::Starting, None).await?;

        if let Err(e) = self.runtime.start(&handle).await {
            return Err(self.abort(&mut server, e, "start").await);
        }

        self.await_running(&mut server, &handle).await?;
        Ok(server)
    }

    /// Stop a running server within the configured grace period
    #[tracing::instrument(skip(self), fields(server_id = %id))]
    pub async fn stop(&self, id: ServerId) -> Result<Server> {
        let _guard = self.begin(id)?;
        let mut server = self.get(id).await?;
        let handle = server.require_container()?;

        self.transition(&mut server, ServerState::Stopping, None).await?;

        let grace = self.config.stop_grace();
        match time::timeout(self.config.stop_budget(), self.runtime.stop(&handle, grace)).await {
            Ok(Ok(())) => {
                self.transition(&mut server, ServerState::Offline, None).await?;
                Ok(server)
            }
            Ok(Err(RuntimeError::NotFound(msg))) => {
                // Nothing left to stop
                tracing::info!(%msg, "Container already gone while stopping");
                self.reconcile_drift(&mut server).await?;
                Ok(server)
            }
            Ok(Err(e)) => Err(self.abort(&mut server, e, "stop").await),
            Err(_) => {
                let reason = format!(
                    "container did not stop within {:?}",
                    self.config.stop_budget()
                );
                tracing::error!(%reason, "Stop timed out");
                self.transition(&mut server, ServerState::Error, Some(reason.clone()))
                    .await?;
                Err(Error::Timeout(reason))
            }
        }
    }

    /// Stop then start a running server and wait for it to come back
    #[tracing::instrument(skip(self), fields(server_id = %id))]
    pub async fn restart(&self, id: ServerId) -> Result<Server> {
        let _guard = self.begin(id)?;
        let mut server = self.get(id).await?;
        let handle = server.require_container()?;

        self.transition(&mut server, ServerState::Restarting, None).await?;

        let grace = self.config.stop_grace();
        match time::timeout(self.config.stop_budget(), self.runtime.stop(&handle, grace)).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => return Err(self.abort(&mut server, e, "restart").await),
            Err(_) => {
                let reason = format!(
                    "container did not stop within {:?} during restart",
                    self.config.stop_budget()
                );
                tracing::error!(%reason, "Restart timed out");
                self.transition(&mut server, ServerState::Error, Some(reason.clone()))
                    .await?;
                return Err(Error::Timeout(reason));
            }
        }

        if let Err(e) = self.runtime.start(&handle).await {
            return Err(self.abort(&mut server, e, "restart").await);
        }

        self.await_running(&mut server, &handle).await?;
        Ok(server)
    }

    /// Remove the container and the record.
    ///
    /// Deleting a server that does not exist succeeds. If the engine refuses
    /// to remove the container the record is kept and the error returned.
    #[tracing::instrument(skip(self), fields(server_id = %id))]
    pub async fn delete(&self, id: ServerId) -> Result<()> {
        let _guard = self.begin(id)?;

        let Some(server) = self.store.get(id).await? else {
            tracing::debug!("Server already deleted");
            self.sampler.reset(id);
            return Ok(());
        };

        if let Some(handle) = &server.container {
            let grace = self.config.stop_grace();
            match time::timeout(self.config.stop_budget(), self.runtime.stop(handle, grace)).await {
                Ok(Ok(())) | Ok(Err(RuntimeError::NotFound(_))) => {}
                Ok(Err(e)) => tracing::warn!(error = %e, "Stop before removal failed, forcing removal"),
                Err(_) => tracing::warn!("Stop before removal timed out, forcing removal"),
            }

            match self.runtime.remove(handle, true).await {
                Ok(()) | Err(RuntimeError::NotFound(_)) => {}
                Err(e) => {
                    tracing::error!(error = %e, container = %handle, "Failed to remove container");
                    return Err(e.into());
                }
            }
        }

        self.store.remove(id).await?;
        self.sampler.reset(id);

        if server.observed_state != ServerState::Unprovisioned {
            self.events.emit(StatusChange {
                server_id: id,
                old: server.observed_state,
                new: ServerState::Unprovisioned,
                reason: Some("deleted".to_string()),
                at: Utc::now(),
            });
        }

        tracing::info!("Deleted server");
        Ok(())
    }

    /// Desired and observed state, refreshing observed from the engine.
    ///
    /// A server with an operation in flight reports its stored state without
    /// asking the engine.
    #[tracing::instrument(skip(self), fields(server_id = %id))]
    pub async fn get_status(&self, id: ServerId) -> Result<ServerStatus> {
        let server = self.get(id).await?;

        let Some(handle) = server.container.clone() else {
            return Ok(server.status());
        };
        if self.is_busy(id) {
            return Ok(server.status());
        }

        match self.runtime.inspect(&handle).await {
            Ok(inspection) => {
                let observed = if inspection.running {
                    ServerState::Online
                } else if inspection.restarting {
                    ServerState::Restarting
                } else {
                    ServerState::Offline
                };
                if observed != server.observed_state {
                    if let Some((_guard, mut fresh)) = self.settle(&server).await? {
                        self.observe(&mut fresh, observed).await?;
                        return Ok(fresh.status());
                    }
                }
            }
            Err(RuntimeError::NotFound(_)) => {
                if let Some((_guard, mut fresh)) = self.settle(&server).await? {
                    self.reconcile_drift(&mut fresh).await?;
                    return Ok(fresh.status());
                }
            }
            Err(e) => {
                tracing::warn!(error = %e, "Could not refresh observed state");
            }
        }

        Ok(server.status())
    }

    /// Current resource usage of a server
    #[tracing::instrument(skip(self), fields(server_id = %id))]
    pub async fn get_stats(&self, id: ServerId) -> Result<ResourceSnapshot> {
        let server = self.get(id).await?;
        let snapshot = self.sampler.sample(id, server.container.as_ref()).await;

        if snapshot.unavailable_reason == Some(UnavailableReason::ContainerMissing) {
            self.reconcile_seen_drift(&server).await?;
        }

        Ok(snapshot)
    }

    /// Tail a server's log output
    #[tracing::instrument(skip(self), fields(server_id = %id))]
    pub async fn get_logs(&self, id: ServerId, tail_lines: usize) -> Result<ServerLogs> {
        let server = self.get(id).await?;
        let handle = server.require_container()?;

        match self.runtime.logs(&handle, tail_lines).await {
            Ok(lines) => Ok(lines.map(|line| line.map_err(Error::from)).boxed()),
            Err(RuntimeError::NotFound(msg)) => {
                self.reconcile_seen_drift(&server).await?;
                Err(Error::NotFound(msg))
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Run a console command inside a running server.
    ///
    /// The command is split on whitespace; no shell is involved.
    #[tracing::instrument(skip(self), fields(server_id = %id))]
    pub async fn exec_command(&self, id: ServerId, command: &str) -> Result<String> {
        let argv: Vec<String> = command.split_whitespace().map(str::to_string).collect();
        if argv.is_empty() {
            return Err(Error::Validation("Command must not be empty".to_string()));
        }

        let server = self.get(id).await?;
        let handle = server.require_container()?;

        let timeout = self.config.exec_timeout();
        match time::timeout(timeout, self.runtime.exec(&handle, argv)).await {
            Ok(Ok(output)) => Ok(output),
            Ok(Err(RuntimeError::NotFound(msg))) => {
                self.reconcile_seen_drift(&server).await?;
                Err(Error::NotFound(msg))
            }
            Ok(Err(e)) => Err(e.into()),
            Err(_) => {
                tracing::warn!(?timeout, "Console command timed out");
                Err(Error::Timeout(format!("command did not finish within {:?}", timeout)))
            }
        }
    }

    /// Poll `inspect` until the container runs or the attempt budget is spent.
    async fn await_running(&self, server: &mut Server, handle: &ContainerHandle) -> Result<()> {
        let attempts = self.config.start_poll_attempts;

        for attempt in 0..attempts {
            match self.runtime.inspect(handle).await {
                Ok(inspection) if inspection.running => {
                    tracing::info!(attempt, "Container is running");
                    return self.transition(server, ServerState::Online, None).await;
                }
                Ok(inspection) => {
                    tracing::debug!(
                        attempt,
                        restarting = inspection.restarting,
                        exit_code = ?inspection.exit_code,
                        "Container not running yet"
                    );
                }
                Err(RuntimeError::NotFound(msg)) => {
                    self.reconcile_drift(server).await?;
                    return Err(Error::NotFound(msg));
                }
                Err(e) => {
                    tracing::warn!(attempt, error = %e, "Inspect failed while waiting for start");
                }
            }

            if attempt + 1 < attempts {
                time::sleep(self.config.backoff(attempt)).await;
            }
        }

        let reason = format!("container not running after {} checks", attempts);
        tracing::error!(%reason, "Start timed out");
        self.transition(server, ServerState::Error, Some(reason.clone()))
            .await?;
        Err(Error::Timeout(reason))
    }

    /// Record a failed engine call and turn it into the returned error.
    async fn abort(&self, server: &mut Server, error: RuntimeError, action: &str) -> Error {
        match error {
            RuntimeError::NotFound(msg) => match self.reconcile_drift(server).await {
                Ok(()) => Error::NotFound(msg),
                Err(e) => e,
            },
            error => {
                tracing::error!(error = %error, "Container {} failed", action);
                let reason = format!("{} failed: {}", action, error);
                match self.transition(server, ServerState::Error, Some(reason)).await {
                    Ok(()) => error.into(),
                    Err(e) => e,
                }
            }
        }
    }

    /// Validate and persist a lifecycle transition.
    async fn transition(
        &self,
        server: &mut Server,
        to: ServerState,
        reason: Option<String>,
    ) -> Result<()> {
        let from = server.desired_state;
        if !from.can_transition_to(to) || to == ServerState::Unprovisioned {
            return Err(Error::InvalidTransition { from, to });
        }

        tracing::info!(server_id = %server.id, %from, %to, "Server transition");
        server.desired_state = to;
        server.status_reason = reason;
        self.observe(server, to).await
    }

    /// Persist a new observed state and announce it.
    async fn observe(&self, server: &mut Server, observed: ServerState) -> Result<()> {
        let old = server.observed_state;
        server.observed_state = observed;
        server.updated_at = Utc::now();
        self.store.put(server.clone()).await?;

        if old != observed {
            self.events.emit(StatusChange {
                server_id: server.id,
                old,
                new: observed,
                reason: server.status_reason.clone(),
                at: server.updated_at,
            });
        }
        Ok(())
    }

    /// The container vanished from the engine: forget it.
    async fn reconcile_drift(&self, server: &mut Server) -> Result<()> {
        tracing::warn!(
            server_id = %server.id,
            container = ?server.container,
            "Container vanished from the engine, clearing handle"
        );

        server.container = None;
        server.desired_state = ServerState::Unprovisioned;
        server.status_reason = Some(DRIFT_REASON.to_string());
        self.sampler.reset(server.id);
        self.observe(server, ServerState::Offline).await
    }

    /// Reserve a slot in the owner's quota for the duration of a provision.
    ///
    /// Provisions still waiting on the engine count against the owner, so
    /// parallel provisions for one owner cannot overshoot the limit.
    async fn check_owner_quota(&self, server: &Server) -> Result<Option<QuotaReservation>> {
        let Some(max) = self.registry.quota().max_servers_per_owner else {
            return Ok(None);
        };

        let (reservation, pending) = {
            let mut pending = self
                .pending_provisions
                .lock()
                .unwrap_or_else(|p| p.into_inner());
            let others: HashSet<ServerId> = pending
                .iter()
                .filter(|(id, owner)| **owner == server.owner && **id != server.id)
                .map(|(id, _)| *id)
                .collect();
            pending.insert(server.id, server.owner.clone());
            let reservation = QuotaReservation {
                pending: Arc::clone(&self.pending_provisions),
                id: server.id,
            };
            (reservation, others)
        };

        let provisioned = self
            .store
            .list()
            .await?
            .into_iter()
            .filter(|s| {
                s.owner == server.owner
                    && s.id != server.id
                    && s.container.is_some()
                    && !pending.contains(&s.id)
            })
            .count();
        let owned = provisioned + pending.len();

        if owned >= max {
            return Err(Error::ResourceLimitExceeded(format!(
                "Owner '{}' already has {} provisioned servers (maximum {})",
                server.owner, owned, max
            )));
        }
        Ok(Some(reservation))
    }

    fn container_spec(
        &self,
        server: &Server,
        template: &Template,
        ports: Vec<PortBinding>,
        limits: ResourceLimits,
    ) -> ContainerSpec {
        let server_dir = data_root(&self.engine.data_root).join(server.id.to_string());

        let binds = template
            .volumes
            .iter()
            .map(|volume| VolumeBind {
                host_path: server_dir
                    .join(volume_dir_name(volume))
                    .to_string_lossy()
                    .into_owned(),
                container_path: volume.clone(),
            })
            .collect();

        ContainerSpec {
            name: server.container_name(),
            image: template.image.clone(),
            env: template.env.clone(),
            ports,
            binds,
            limits,
            working_dir: template.volumes.first().cloned(),
            command: template.start_command.clone(),
            network: (!self.engine.network.is_empty()).then(|| self.engine.network.clone()),
            restart_unless_stopped: true,
        }
    }
}

/// Bind sources must be absolute for the engine
fn data_root(configured: &str) -> PathBuf {
    let path = Path::new(configured);
    std::path::absolute(path).unwrap_or_else(|_| path.to_path_buf())
}

/// `/opt/valheim` → `opt-valheim`
fn volume_dir_name(volume: &str) -> String {
    let name = volume
        .trim_matches('/')
        .split('/')
        .filter(|part| !part.is_empty() && *part != "..")
        .collect::<Vec<_>>()
        .join("-");
    if name.is_empty() { "root".to_string() } else { name }
}
