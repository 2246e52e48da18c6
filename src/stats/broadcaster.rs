use crate::config::BroadcasterConfig;
use crate::error::{Error, Result};
use crate::server::{LifecycleManager, ServerId, StatusChange};
use crate::stats::ResourceSnapshot;
use futures::StreamExt;
use serde::Serialize;
use std::collections::{HashMap, HashSet};
use std::fmt;
use std::sync::{Arc, Mutex};
use tokio::sync::broadcast::error::RecvError;
use tokio::sync::{broadcast, watch};
use tokio::task::JoinHandle;
use tokio::time::{self, MissedTickBehavior};

/// Subscription topic
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Topic {
    /// Updates for one server
    Server(ServerId),
    /// Updates for every provisioned server
    AdminAll,
}

impl fmt::Display for Topic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Topic::Server(id) => write!(f, "server:{}", id),
            Topic::AdminAll => write!(f, "admin:all"),
        }
    }
}

/// Message delivered to topic subscribers
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", content = "data", rename_all = "camelCase")]
pub enum BroadcastMessage {
    /// `server:stats`
    Stats(ResourceSnapshot),
    /// `server:status_changed`
    StatusChanged(StatusChange),
}

impl BroadcastMessage {
    /// Server the message is about
    pub fn server_id(&self) -> ServerId {
        match self {
            BroadcastMessage::Stats(snapshot) => snapshot.server_id,
            BroadcastMessage::StatusChanged(change) => change.server_id,
        }
    }
}

struct Shared {
    manager: Arc<LifecycleManager>,
    topics: Mutex<HashMap<Topic, broadcast::Sender<BroadcastMessage>>>,
    active: Mutex<HashSet<ServerId>>,
    config: BroadcasterConfig,
}

/// Periodically samples servers that somebody is watching and pushes the
/// results to topic subscribers.
///
/// A subscription is a [`broadcast::Receiver`]; dropping it unsubscribes.
/// Servers without subscribers are not sampled, and a server that gains its
/// first subscriber again starts from a fresh stats baseline.
pub struct StatusBroadcaster {
    shared: Arc<Shared>,
    task: Option<JoinHandle<()>>,
    shutdown: Option<watch::Sender<bool>>,
}

impl StatusBroadcaster {
    /// Create a broadcaster over the given lifecycle manager
    pub fn new(manager: Arc<LifecycleManager>, config: BroadcasterConfig) -> Self {
        Self {
            shared: Arc::new(Shared {
                manager,
                topics: Mutex::new(HashMap::new()),
                active: Mutex::new(HashSet::new()),
                config,
            }),
            task: None,
            shutdown: None,
        }
    }

    /// Subscribe to a topic
    pub fn subscribe(&self, topic: Topic) -> broadcast::Receiver<BroadcastMessage> {
        self.shared.subscribe(topic)
    }

    /// Live subscribers of a topic
    pub fn subscriber_count(&self, topic: Topic) -> usize {
        self.shared
            .topics
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .get(&topic)
            .map_or(0, |sender| sender.receiver_count())
    }

    /// Servers sampled in the last round
    pub fn active_servers(&self) -> Vec<ServerId> {
        let mut active: Vec<ServerId> = self
            .shared
            .active
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .iter()
            .copied()
            .collect();
        active.sort();
        active
    }

    /// Run one sampling round now, returning how many snapshots went out
    pub async fn tick(&self) -> Result<usize> {
        self.shared.tick().await
    }

    /// Deliver a message to the server's topic and to `admin:all`
    pub fn publish(&self, message: BroadcastMessage) -> usize {
        self.shared.publish(message)
    }

    /// Whether the background loop is running
    pub fn is_running(&self) -> bool {
        self.task.as_ref().is_some_and(|task| !task.is_finished())
    }

    /// Start the background loop.
    ///
    /// Samples on every interval tick and forwards status change events as
    /// they happen. Calling `start` on a running broadcaster does nothing.
    pub fn start(&mut self) -> Result<()> {
        if self.is_running() {
            return Ok(());
        }

        let (shutdown_tx, mut shutdown_rx) = watch::channel(false);
        let shared = Arc::clone(&self.shared);
        let mut events = shared.manager.events().subscribe();

        tracing::info!(interval = ?shared.config.interval(), "Starting status broadcaster");

        let task = tokio::spawn(async move {
            let mut interval = time::interval(shared.config.interval());
            interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
            let mut events_open = true;

            loop {
                tokio::select! {
                    _ = shutdown_rx.changed() => break,
                    _ = interval.tick() => {
                        if let Err(e) = shared.tick().await {
                            tracing::warn!(error = %e, "Broadcast round failed");
                        }
                    }
                    event = events.recv(), if events_open => match event {
                        Ok(change) => {
                            shared.publish(BroadcastMessage::StatusChanged(change));
                        }
                        Err(RecvError::Lagged(skipped)) => {
                            tracing::warn!(skipped, "Status broadcaster fell behind on events");
                        }
                        Err(RecvError::Closed) => events_open = false,
                    },
                }
            }

            tracing::debug!("Status broadcaster loop exited");
        });

        self.task = Some(task);
        self.shutdown = Some(shutdown_tx);
        Ok(())
    }

    /// Stop the background loop and wait for it to exit
    pub async fn stop(&mut self) -> Result<()> {
        if let Some(shutdown) = self.shutdown.take() {
            // The loop may already be gone
            let _ = shutdown.send(true);
        }

        if let Some(task) = self.task.take() {
            task.await
                .map_err(|e| Error::Other(format!("Status broadcaster task failed: {}", e)))?;
            tracing::info!("Stopped status broadcaster");
        }

        Ok(())
    }
}

impl Drop for StatusBroadcaster {
    fn drop(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}

impl Shared {
    fn subscribe(&self, topic: Topic) -> broadcast::Receiver<BroadcastMessage> {
        let mut topics = self.topics.lock().unwrap_or_else(|p| p.into_inner());
        let sender = topics
            .entry(topic)
            .or_insert_with(|| broadcast::channel(self.config.channel_capacity).0);

        if let Topic::Server(id) = topic {
            if sender.receiver_count() == 0 {
                // Nobody was watching; rates must not span the gap
                self.manager.sampler().reset(id);
                self.active
                    .lock()
                    .unwrap_or_else(|p| p.into_inner())
                    .remove(&id);
            }
        }

        tracing::debug!(%topic, "New subscriber");
        sender.subscribe()
    }

    fn publish(&self, message: BroadcastMessage) -> usize {
        let server_topic = Topic::Server(message.server_id());
        let topics = self.topics.lock().unwrap_or_else(|p| p.into_inner());

        let mut delivered = 0;
        for topic in [server_topic, Topic::AdminAll] {
            if let Some(sender) = topics.get(&topic) {
                // Fails only when every receiver is gone
                if sender.send(message.clone()).is_ok() {
                    delivered += 1;
                }
            }
        }
        delivered
    }

    /// Drop idle topics and report who is still listening.
    fn prune(&self) -> (HashSet<ServerId>, bool) {
        let mut topics = self.topics.lock().unwrap_or_else(|p| p.into_inner());
        topics.retain(|topic, sender| {
            let keep = sender.receiver_count() > 0;
            if !keep {
                tracing::debug!(%topic, "Dropping idle topic");
            }
            keep
        });

        let watched = topics
            .keys()
            .filter_map(|topic| match topic {
                Topic::Server(id) => Some(*id),
                Topic::AdminAll => None,
            })
            .collect();
        (watched, topics.contains_key(&Topic::AdminAll))
    }

    async fn tick(&self) -> Result<usize> {
        let (mut wanted, admin) = self.prune();

        if admin {
            wanted.extend(
                self.manager
                    .list()
                    .await?
                    .into_iter()
                    .filter(|server| server.container.is_some())
                    .map(|server| server.id),
            );
        }

        {
            let mut active = self.active.lock().unwrap_or_else(|p| p.into_inner());
            for gone in active.difference(&wanted) {
                self.manager.sampler().reset(*gone);
            }
            for fresh in wanted.difference(&active) {
                self.manager.sampler().reset(*fresh);
            }
            *active = wanted.clone();
        }

        if wanted.is_empty() {
            return Ok(0);
        }

        let manager = &self.manager;
        let snapshots: Vec<ResourceSnapshot> = futures::stream::iter(wanted)
            .map(|id| async move {
                match manager.get_stats(id).await {
                    Ok(snapshot) => Some(snapshot),
                    Err(e) => {
                        tracing::debug!(server_id = %id, error = %e, "Skipping server this round");
                        None
                    }
                }
            })
            .buffer_unordered(self.config.max_in_flight.max(1))
            .filter_map(|snapshot| async move { snapshot })
            .collect()
            .await;

        let published = snapshots.len();
        for snapshot in snapshots {
            self.publish(BroadcastMessage::Stats(snapshot));
        }

        tracing::trace!(published, "Broadcast round complete");
        Ok(published)
    }
}
