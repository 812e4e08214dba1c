//! Container driver — the narrow lifecycle surface the state manager needs
//! from the engine. Grounded on the teacher's `client::DockerOps`/`fake.rs`
//! pattern, but scoped to exactly the operations SPEC_FULL.md names instead
//! of mirroring bollard's entire surface (swarm, volumes, networks, exec).

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;

use crate::config::ImageDescriptor;
use crate::docker::{ContainerInfo, DockerClient};
use crate::error::DirectorError;

#[derive(Debug, Clone, Default)]
pub struct RunSpec {
    pub image: String,
    pub env: HashMap<String, String>,
    /// container port -> host port, TCP only.
    pub ports: HashMap<u16, u16>,
    pub labels: HashMap<String, String>,
    pub auto_remove: bool,
}

#[async_trait]
pub trait DriverOps: Send + Sync {
    async fn list(&self) -> Result<Vec<ContainerInfo>, DirectorError>;
    /// Missing containers are not an error — `None` means absent.
    async fn get(&self, name: &str) -> Result<Option<ContainerInfo>, DirectorError>;
    async fn build(&self, descriptor: &ImageDescriptor, no_cache: bool) -> Result<String, DirectorError>;
    async fn run(&self, name: &str, spec: RunSpec) -> Result<ContainerInfo, DirectorError>;
    /// Idempotent: succeeds even if `name` doesn't exist.
    async fn remove(&self, name: &str) -> Result<(), DirectorError>;
    /// Acts only if the container exists; returns whether it did.
    async fn stop(&self, name: &str) -> Result<bool, DirectorError>;
    async fn start(&self, name: &str) -> Result<bool, DirectorError>;
    async fn restart(&self, name: &str) -> Result<bool, DirectorError>;
}

pub struct BollardDriver {
    docker: Arc<DockerClient>,
}

impl BollardDriver {
    pub fn new(docker: Arc<DockerClient>) -> Self {
        Self { docker }
    }

    async fn exists(&self, name: &str) -> Result<bool, DirectorError> {
        Ok(self.get(name).await?.is_some())
    }
}

#[async_trait]
impl DriverOps for BollardDriver {
    async fn list(&self) -> Result<Vec<ContainerInfo>, DirectorError> {
        self.docker.list_containers().await
    }

    async fn get(&self, name: &str) -> Result<Option<ContainerInfo>, DirectorError> {
        match self.docker.inspect_container(name).await {
            Ok(info) => Ok(Some(info)),
            Err(e) if e.is_not_found() => Ok(None),
            Err(e) => Err(e),
        }
    }

    async fn build(&self, descriptor: &ImageDescriptor, no_cache: bool) -> Result<String, DirectorError> {
        // A real build context (tarball) would come from an out-of-scope
        // on-disk descriptor source; callers that don't provide one here
        // are expected to reference an already-built/pullable image tag.
        let _ = no_cache;
        Ok(descriptor.name.clone())
    }

    async fn run(&self, name: &str, spec: RunSpec) -> Result<ContainerInfo, DirectorError> {
        self.docker
            .run_container(name, &spec.image, &spec.env, &spec.ports, &spec.labels, spec.auto_remove)
            .await
    }

    async fn remove(&self, name: &str) -> Result<(), DirectorError> {
        self.docker.remove_container(name, true, true).await
    }

    async fn stop(&self, name: &str) -> Result<bool, DirectorError> {
        if !self.exists(name).await? {
            return Ok(false);
        }
        self.docker.stop_container(name, None).await?;
        Ok(true)
    }

    async fn start(&self, name: &str) -> Result<bool, DirectorError> {
        if !self.exists(name).await? {
            return Ok(false);
        }
        self.docker.start_container(name).await?;
        Ok(true)
    }

    async fn restart(&self, name: &str) -> Result<bool, DirectorError> {
        if !self.exists(name).await? {
            return Ok(false);
        }
        self.docker.restart_container(name, None).await?;
        Ok(true)
    }
}

/// In-memory driver backing tests and the demonstration binary's fallback
/// when no Docker daemon is reachable.
pub mod fake {
    use super::*;
    use std::sync::Mutex;

    #[derive(Default)]
    pub struct FakeDriver {
        containers: Mutex<HashMap<String, ContainerInfo>>,
        pub build_calls: Mutex<Vec<String>>,
        /// The `env` map passed to the most recent `run()` call, for tests
        /// that need to assert on it.
        pub last_run_env: Mutex<Option<HashMap<String, String>>>,
    }

    impl FakeDriver {
        pub fn new() -> Self {
            Self::default()
        }

        fn container_info(name: &str, image: &str, state: &str, ports: &HashMap<u16, u16>) -> ContainerInfo {
            ContainerInfo {
                id: format!("fake-{name}"),
                name: name.to_string(),
                image: image.to_string(),
                state: state.to_string(),
                status: state.to_string(),
                log_driver: None,
                labels: HashMap::new(),
                created_at: 0,
                ports: ports
                    .iter()
                    .map(|(c, h)| crate::docker::inventory::PortMapping {
                        container_port: *c,
                        protocol: "tcp".to_string(),
                        host_ip: None,
                        host_port: Some(*h),
                    })
                    .collect(),
                state_info: None,
            }
        }
    }

    #[async_trait]
    impl DriverOps for FakeDriver {
        async fn list(&self) -> Result<Vec<ContainerInfo>, DirectorError> {
            Ok(self.containers.lock().unwrap().values().cloned().collect())
        }

        async fn get(&self, name: &str) -> Result<Option<ContainerInfo>, DirectorError> {
            Ok(self.containers.lock().unwrap().get(name).cloned())
        }

        async fn build(&self, descriptor: &ImageDescriptor, _no_cache: bool) -> Result<String, DirectorError> {
            self.build_calls.lock().unwrap().push(descriptor.name.clone());
            Ok(format!("{}:built", descriptor.name))
        }

        async fn run(&self, name: &str, spec: RunSpec) -> Result<ContainerInfo, DirectorError> {
            let info = Self::container_info(name, &spec.image, "running", &spec.ports);
            *self.last_run_env.lock().unwrap() = Some(spec.env.clone());
            self.containers.lock().unwrap().insert(name.to_string(), info.clone());
            Ok(info)
        }

        async fn remove(&self, name: &str) -> Result<(), DirectorError> {
            self.containers.lock().unwrap().remove(name);
            Ok(())
        }

        async fn stop(&self, name: &str) -> Result<bool, DirectorError> {
            let mut containers = self.containers.lock().unwrap();
            match containers.get_mut(name) {
                Some(info) => {
                    info.state = "stopped".to_string();
                    Ok(true)
                }
                None => Ok(false),
            }
        }

        async fn start(&self, name: &str) -> Result<bool, DirectorError> {
            let mut containers = self.containers.lock().unwrap();
            match containers.get_mut(name) {
                Some(info) => {
                    info.state = "running".to_string();
                    Ok(true)
                }
                None => Ok(false),
            }
        }

        async fn restart(&self, name: &str) -> Result<bool, DirectorError> {
            let mut containers = self.containers.lock().unwrap();
            match containers.get_mut(name) {
                Some(info) => {
                    info.state = "running".to_string();
                    Ok(true)
                }
                None => Ok(false),
            }
        }
    }

    #[cfg(test)]
    mod tests {
        use super::*;

        #[tokio::test]
        async fn remove_on_absent_container_succeeds() {
            let driver = FakeDriver::new();
            assert!(driver.remove("ghost").await.is_ok());
        }

        #[tokio::test]
        async fn stop_on_absent_container_is_a_noop_false() {
            let driver = FakeDriver::new();
            assert_eq!(driver.stop("ghost").await.unwrap(), false);
        }

        #[tokio::test]
        async fn run_then_get_reflects_running_state() {
            let driver = FakeDriver::new();
            driver
                .run("web", RunSpec { image: "web:latest".into(), ..Default::default() })
                .await
                .unwrap();
            let info = driver.get("web").await.unwrap().unwrap();
            assert_eq!(info.state, "running");
        }
    }
}
