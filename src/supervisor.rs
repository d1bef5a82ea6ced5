//! Worker supervisor: keeps one consumer task alive per active analytics.
//!
//! Each worker gets an exclusive pub/sub connection, split so the
//! supervisor retains the subscribe half while the consumer task owns the
//! message stream. Reconciliation runs on the single supervisor loop in
//! response to `refresh` commands; crashed workers are reaped and
//! respawned; SIGTERM/ctrl-c tears the whole fleet down.

use std::collections::{BTreeSet, HashMap};

use futures_util::StreamExt;
use redis::aio::{ConnectionManager, PubSubSink};
use tokio::signal::unix::{SignalKind, signal};
use tokio::task::{AbortHandle, Id, JoinError, JoinSet};

use crate::config::Settings;
use crate::consumer;
use crate::registry;
use crate::store;

struct Worker {
    sink: PubSubSink,
    channels: BTreeSet<String>,
    abort: AbortHandle,
}

pub struct Supervisor {
    settings: Settings,
    client: redis::Client,
    conf: ConnectionManager,
    workers: HashMap<String, Worker>,
    tasks: JoinSet<String>,
    task_names: HashMap<Id, String>,
}

impl Supervisor {
    pub async fn new(settings: Settings) -> anyhow::Result<Self> {
        let client = store::config_client(&settings)?;
        let conf = client.get_connection_manager().await?;
        Ok(Self {
            settings,
            client,
            conf,
            workers: HashMap::new(),
            tasks: JoinSet::new(),
            task_names: HashMap::new(),
        })
    }

    /// Spawn workers for every active analytics, then serve the control
    /// channel until shutdown.
    pub async fn run(mut self) -> anyhow::Result<()> {
        for name in registry::active_analytics(&mut self.conf).await? {
            if let Err(err) = self.create_worker(&name).await {
                tracing::error!("failed to start worker for '{name}': {err:#}");
            }
        }

        let mut pubsub = self.client.get_async_pubsub().await?;
        pubsub.subscribe(registry::COMMAND_CHANNEL).await?;
        tracing::info!("listening on '{}' channel", registry::COMMAND_CHANNEL);
        // The sink half must outlive the loop or the subscription drops.
        let (_command_sink, mut commands) = pubsub.split();
        let mut sigterm = signal(SignalKind::terminate())?;

        loop {
            tokio::select! {
                msg = commands.next() => match msg {
                    Some(msg) => self.handle_command(msg).await,
                    None => {
                        tracing::error!("command subscription closed, shutting down");
                        break;
                    }
                },
                Some(exited) = self.tasks.join_next_with_id() => {
                    self.handle_worker_exit(exited).await;
                }
                _ = tokio::signal::ctrl_c() => {
                    tracing::info!("analytics worker is shutting down");
                    break;
                }
                _ = sigterm.recv() => {
                    tracing::info!("analytics worker is shutting down");
                    break;
                }
            }
        }

        self.shutdown().await;
        Ok(())
    }

    async fn handle_command(&mut self, msg: redis::Msg) {
        let command: String = match msg.get_payload() {
            Ok(command) => command,
            Err(err) => {
                tracing::warn!("undecodable control message: {err}");
                return;
            }
        };
        tracing::debug!("received '{command}'");
        if command.eq_ignore_ascii_case(registry::REFRESH_COMMAND) {
            if let Err(err) = self.update_analytics().await {
                tracing::error!("refresh failed: {err:#}");
            }
            tracing::info!("analytics workers refreshed");
        }
    }

    /// Reconcile the worker fleet against `Analytics:Active`: start missing
    /// workers, stop disabled ones, and re-point surviving subscriptions at
    /// their current channel sets.
    async fn update_analytics(&mut self) -> anyhow::Result<()> {
        let active = registry::active_analytics(&mut self.conf).await?;
        let current: BTreeSet<String> = self.workers.keys().cloned().collect();

        for name in active.difference(&current) {
            if let Err(err) = self.create_worker(name).await {
                tracing::error!("failed to start worker for '{name}': {err:#}");
            }
        }

        for name in current.difference(&active) {
            self.destroy_worker(name);
        }

        for name in current.intersection(&active) {
            let wanted = registry::subscriptions(&mut self.conf, name).await?;
            let mut emptied = false;
            if let Some(worker) = self.workers.get_mut(name) {
                let have = worker.channels.clone();
                for channel in wanted.difference(&have) {
                    worker.sink.subscribe(channel).await?;
                    worker.channels.insert(channel.clone());
                }
                for channel in have.difference(&wanted) {
                    worker.sink.unsubscribe(channel).await?;
                    worker.channels.remove(channel);
                }
                emptied = worker.channels.is_empty();
            }
            if emptied {
                self.destroy_worker(name);
            }
        }
        Ok(())
    }

    /// Open a dedicated subscription over the analytics' channel set and
    /// spawn its consumer task on the stream half.
    async fn create_worker(&mut self, name: &str) -> anyhow::Result<()> {
        let channels = registry::subscriptions(&mut self.conf, name).await?;
        let mut pubsub = self.client.get_async_pubsub().await?;
        for channel in &channels {
            pubsub.subscribe(channel).await?;
        }
        let (sink, stream) = pubsub.split();

        tracing::info!("creating worker for {name}");
        let task_name = name.to_string();
        let settings = self.settings.clone();
        let abort = self.tasks.spawn(async move {
            consumer::run(task_name.clone(), settings, stream).await;
            task_name
        });
        self.task_names.insert(abort.id(), name.to_string());
        self.workers.insert(name.to_string(), Worker { sink, channels, abort });
        Ok(())
    }

    /// Terminate a worker and release its subscription connection.
    fn destroy_worker(&mut self, name: &str) {
        let Some(worker) = self.workers.remove(name) else {
            return;
        };
        tracing::info!("{name} is getting deleted");
        self.task_names.remove(&worker.abort.id());
        worker.abort.abort();
        // Dropping the sink closes the exclusive pub/sub connection.
    }

    /// Reap an exited consumer task and respawn it unless the exit was a
    /// deliberate abort.
    async fn handle_worker_exit(&mut self, exited: Result<(Id, String), JoinError>) {
        let name = match exited {
            Ok((id, name)) => {
                self.task_names.remove(&id);
                name
            }
            Err(err) => {
                let Some(name) = self.task_names.remove(&err.id()) else {
                    return;
                };
                if err.is_cancelled() {
                    return;
                }
                name
            }
        };
        if !self.workers.contains_key(&name) {
            return;
        }
        tracing::warn!("worker for {name} is not alive, respawning");
        self.destroy_worker(&name);
        if let Err(err) = self.create_worker(&name).await {
            tracing::error!("failed to respawn worker for '{name}': {err:#}");
        }
    }

    async fn shutdown(&mut self) {
        for name in self.workers.keys() {
            tracing::info!("terminating worker for {name}");
        }
        self.workers.clear();
        self.tasks.shutdown().await;
    }
}
