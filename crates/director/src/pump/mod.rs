//! Event & log pump — watches the engine's event stream, follows logs for
//! every running managed container, and republishes both as broadcast
//! channels. Grounded on the original system's `events_reader`/`logs_reader`
//! pair and on the teacher's `background_inventory_sync` resilience pattern:
//! a failure in one follower is logged and dropped, never propagated to its
//! siblings.

pub mod frame;

use std::collections::HashSet;
use std::sync::Arc;

use futures_util::StreamExt;
use tokio::sync::{broadcast, watch, Mutex};

use crate::docker::{DockerClient, LogStreamKind};

#[derive(Debug, Clone)]
pub struct LogEvent {
    pub container_id: String,
    pub container_name: String,
    pub timestamp_ms: i64,
    pub stream: LogStreamKind,
    pub payload: String,
}

#[derive(Debug, Clone)]
pub struct ContainerEvent {
    pub action: String,
    pub container_id: Option<String>,
}

pub struct Pump {
    docker: Arc<DockerClient>,
    logs_tx: broadcast::Sender<LogEvent>,
    events_tx: broadcast::Sender<ContainerEvent>,
    following: Mutex<HashSet<String>>,
}

impl Pump {
    pub fn new(docker: Arc<DockerClient>) -> Self {
        let (logs_tx, _) = broadcast::channel(4096);
        let (events_tx, _) = broadcast::channel(1024);
        Self {
            docker,
            logs_tx,
            events_tx,
            following: Mutex::new(HashSet::new()),
        }
    }

    pub fn subscribe_logs(&self) -> broadcast::Receiver<LogEvent> {
        self.logs_tx.subscribe()
    }

    pub fn subscribe_events(&self) -> broadcast::Receiver<ContainerEvent> {
        self.events_tx.subscribe()
    }

    /// Bootstrap followers for already-running containers, then consume
    /// engine events until `shutdown` reports true.
    pub async fn run(self: Arc<Self>, mut shutdown: watch::Receiver<bool>) {
        match self.docker.list_containers().await {
            Ok(containers) => {
                for container in containers.into_iter().filter(|c| c.state == "running") {
                    self.clone().spawn_follower(container.id, container.name).await;
                }
            }
            Err(e) => tracing::warn!(error = %e, "failed to list containers at pump startup"),
        }

        let since = chrono::Utc::now().timestamp();
        let mut events = self.docker.stream_events(vec!["container".to_string()], Some(since), None);

        loop {
            tokio::select! {
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
                maybe_event = events.next() => {
                    match maybe_event {
                        None => break,
                        Some(Ok(event)) => self.clone().handle_event(event).await,
                        Some(Err(e)) => tracing::warn!(error = %e, "event stream error"),
                    }
                }
            }
        }
    }

    async fn handle_event(self: Arc<Self>, event: bollard::models::EventMessage) {
        let action = event.action.clone().unwrap_or_default();
        let container_id = event.actor.as_ref().and_then(|a| a.id.clone());

        let _ = self.events_tx.send(ContainerEvent {
            action: action.clone(),
            container_id: container_id.clone(),
        });

        if action == "start" {
            if let Some(id) = container_id {
                let name = self
                    .docker
                    .inspect_container(&id)
                    .await
                    .map(|info| info.name)
                    .unwrap_or_else(|_| id.clone());
                self.spawn_follower(id, name).await;
            }
        }
        // On "stop"/"die", the corresponding follower's log stream closes on
        // its own and the task exits; nothing to do here.
    }

    async fn spawn_follower(self: Arc<Self>, container_id: String, container_name: String) {
        {
            let mut following = self.following.lock().await;
            if !following.insert(container_id.clone()) {
                return;
            }
        }

        let pump = self;
        let id_for_task = container_id.clone();
        tokio::spawn(async move {
            pump.follow(id_for_task.clone(), container_name).await;
            pump.following.lock().await.remove(&id_for_task);
        });
    }

    async fn follow(&self, container_id: String, container_name: String) {
        let since = chrono::Utc::now().timestamp();
        let stream = match self
            .docker
            .stream_container_logs(&container_id, true, Some(since), None)
            .await
        {
            Ok(stream) => stream,
            Err(e) => {
                tracing::warn!(container_id, error = %e, "failed to start log follower");
                return;
            }
        };

        tokio::pin!(stream);
        while let Some(item) = stream.next().await {
            match item {
                Ok(record) => {
                    let event = LogEvent {
                        container_id: container_id.clone(),
                        container_name: container_name.clone(),
                        timestamp_ms: record.timestamp / 1_000_000,
                        stream: record.stream,
                        payload: String::from_utf8_lossy(&record.content).into_owned(),
                    };
                    // A lagging subscriber drops messages rather than
                    // blocking this writer — `send` erroring just means
                    // there are currently no subscribers at all.
                    let _ = self.logs_tx.send(event);
                }
                Err(e) => {
                    tracing::debug!(container_id, error = %e, "log follower ended");
                    break;
                }
            }
        }
    }
}
