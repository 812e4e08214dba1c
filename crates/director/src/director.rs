//! Director — the top-level handle wiring the image catalog, config store,
//! event pump, and state manager together. Its `boot`/`unload` are the
//! process lifecycle entry points, grounded on the teacher's
//! `runtime::boot::boot` sequence (load config, connect, build shared
//! state, spawn background sync) generalized to this system's richer boot
//! steps (§4.G).

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{watch, Mutex as AsyncMutex};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

use crate::catalog::ImageCatalog;
use crate::config_store::{ConfigStore, STARTED_SET_KEY};
use crate::error::DirectorError;
use crate::manager::StateManager;
use crate::pump::Pump;
use crate::runtime;

pub struct Director {
    manager: Arc<StateManager>,
    catalog: Arc<ImageCatalog>,
    config_store: Arc<dyn ConfigStore>,
    pump: Arc<Pump>,
    initial_startup: Vec<String>,
    reconcile_interval: Duration,
    image_refresh_interval: Duration,
    shutdown_tx: watch::Sender<bool>,
    shutdown_rx: watch::Receiver<bool>,
    workers: AsyncMutex<Vec<JoinHandle<()>>>,
}

impl Director {
    pub fn new(
        manager: Arc<StateManager>,
        catalog: Arc<ImageCatalog>,
        config_store: Arc<dyn ConfigStore>,
        pump: Arc<Pump>,
        initial_startup: Vec<String>,
        reconcile_interval: Duration,
        image_refresh_interval: Duration,
    ) -> Self {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        Self {
            manager,
            catalog,
            config_store,
            pump,
            initial_startup,
            reconcile_interval,
            image_refresh_interval,
            shutdown_tx,
            shutdown_rx,
            workers: AsyncMutex::new(Vec::new()),
        }
    }

    pub fn manager(&self) -> &Arc<StateManager> {
        &self.manager
    }

    pub fn pump(&self) -> &Arc<Pump> {
        &self.pump
    }

    /// Runs the six-step boot sequence (§4.G): load the catalog and shared
    /// config, reconcile dockstate, seed the started set if empty, probe
    /// already-running native services, then spawn the long-running
    /// workers and perform the initial autostart pass.
    pub async fn boot(&self) -> Result<(), DirectorError> {
        self.catalog.load()?;
        self.manager.load_shared_config().await?;

        self.manager.reconcile_once().await?;

        if self.config_store.set_get(STARTED_SET_KEY).await?.is_empty()
            && !self.initial_startup.is_empty()
        {
            self.config_store
                .set_add(STARTED_SET_KEY, &self.initial_startup)
                .await?;
        }

        for name in self.manager.service_names() {
            if !self.manager.is_native(&name) {
                continue;
            }
            if let Some(record) = self.manager.get_snapshot(&name) {
                if record.effective_status() == "running" {
                    if let Err(e) = self.manager.request_app_state(&name).await {
                        tracing::warn!(service = name, error = %e, "boot-time status probe failed");
                    }
                }
            }
        }

        self.spawn_workers().await;

        for name in self.manager.should_start().await? {
            if self.manager.is_native(&name) {
                if let Err(e) = self.manager.run_service(&name).await {
                    tracing::error!(service = name, error = %e, "autostart failed");
                }
            }
        }

        Ok(())
    }

    async fn spawn_workers(&self) {
        let pump = self.pump.clone();
        let pump_shutdown = self.shutdown_rx.clone();
        let pump_handle = tokio::spawn(async move {
            pump.run(pump_shutdown).await;
        });

        let manager = self.manager.clone();
        let mut reconcile_shutdown = self.shutdown_rx.clone();
        let reconcile_period = self.reconcile_interval + Duration::from_secs(1);
        let reconciler = runtime::spawn("reconciler", async move {
            let mut ticker = tokio::time::interval(reconcile_period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        manager.reconcile_once().await?;
                    }
                    changed = reconcile_shutdown.changed() => {
                        if changed.is_err() || *reconcile_shutdown.borrow() {
                            return Ok(());
                        }
                    }
                }
            }
        });

        let catalog = self.catalog.clone();
        let mut refresh_shutdown = self.shutdown_rx.clone();
        let refresh_period = self.image_refresh_interval;
        let image_refresh = runtime::spawn("image-refresh", async move {
            let mut ticker = tokio::time::interval(refresh_period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        catalog.load()?;
                    }
                    changed = refresh_shutdown.changed() => {
                        if changed.is_err() || *refresh_shutdown.borrow() {
                            return Ok(());
                        }
                    }
                }
            }
        });

        let mut workers = self.workers.lock().await;
        workers.push(pump_handle);
        workers.push(reconciler);
        workers.push(image_refresh);
    }

    /// Signals every worker to stop and waits for them to exit.
    pub async fn unload(&self) -> Result<(), DirectorError> {
        let _ = self.shutdown_tx.send(true);
        let mut workers = self.workers.lock().await;
        for handle in workers.drain(..) {
            let _ = handle.await;
        }
        Ok(())
    }
}
