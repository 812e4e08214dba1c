//! Demonstration binary — wires the `director` library against its
//! collaborators and runs the boot sequence to completion. This crate ships
//! no gRPC/HTTP facade: that surface, along with mTLS termination, is
//! deliberately out of scope (a real deployment builds a facade on top of
//! this library). A real `bollard`-backed driver is used when the
//! configured Docker socket is reachable; otherwise the demonstration falls
//! back to the in-memory fake driver so the boot sequence still has
//! somewhere to run services.

use std::sync::Arc;
use std::time::Duration;

use director::catalog::{ImageCatalog, StaticImageSource};
use director::config::DirectorConfig;
use director::config_store::InMemoryConfigStore;
use director::docker::DockerClient;
use director::Director;
use director::driver::{BollardDriver, DriverOps};
use director::manager::StateManager;
use director::ports::PortAllocator;
use director::pump::Pump;
use director::rpc::MockRpcClient;
use director::runtime;
use tracing::{error, info, warn};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    runtime::init_logging();

    info!("starting director");

    let config = DirectorConfig::load()?;
    config.validate().map_err(|e| -> Box<dyn std::error::Error> { e.into() })?;
    info!(
        images = config.images.len(),
        start_port = config.start_port,
        end_port = config.end_port,
        "loaded configuration"
    );

    let docker = DockerClient::new(&config.docker_socket)?;
    let driver: Arc<dyn DriverOps> = match docker.system_info().await {
        Ok(_) => {
            info!("docker daemon reachable, using live driver");
            Arc::new(BollardDriver::new(Arc::new(docker.clone())))
        }
        Err(e) => {
            warn!(error = %e, "docker daemon unreachable, falling back to in-memory driver");
            Arc::new(director::driver::fake::FakeDriver::new())
        }
    };

    let catalog = Arc::new(ImageCatalog::new(Arc::new(StaticImageSource::new(
        config.images.clone(),
    ))));
    let config_store = Arc::new(InMemoryConfigStore::new());
    let rpc = Arc::new(MockRpcClient::new());
    let ports = Arc::new(PortAllocator::new(config.start_port, config.end_port));

    let manager = Arc::new(StateManager::new(
        catalog.clone(),
        config_store.clone(),
        ports,
        driver,
        rpc,
        config.container_params.clone(),
        config.frontier_service.clone(),
        Duration::from_secs(config.service_timeout_secs),
    ));

    let pump = Arc::new(Pump::new(Arc::new(docker)));

    let director = Director::new(
        manager,
        catalog,
        config_store,
        pump,
        config.initial_startup.clone(),
        Duration::from_secs(config.reconcile_interval_secs),
        Duration::from_secs(config.image_refresh_interval_secs),
    );

    if let Err(e) = director.boot().await {
        error!(error = %e, "boot failed");
        return Err(e.into());
    }

    info!("director is ready, press Ctrl+C to shut down");
    runtime::shutdown_signal().await;

    director.unload().await?;
    info!("shutdown complete");
    Ok(())
}
