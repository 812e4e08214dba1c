//! Docker client — core struct and constructor.
//!
//! Domain methods live in sibling modules (`container`, `image`, `event`,
//! `inventory`) which add `impl DockerClient` blocks.

use bollard::Docker;

use crate::error::DirectorError;

#[derive(Debug, Clone)]
pub struct DockerClient {
    /// The bollard Docker client.  `pub(super)` so that domain modules
    /// in sibling files can call bollard APIs directly.
    pub(super) client: Docker,
    /// The Docker socket path this client is connected to.
    pub(super) socket_path: String,
}

impl DockerClient {
    pub fn new(socket_path: &str) -> Result<Self, DirectorError> {
        let connection = if socket_path.is_empty() {
            Docker::connect_with_defaults()
                .map_err(|e| DirectorError::EngineError { status: 0, message: e.to_string() })?
        } else {
            let clean_path = socket_path.trim_start_matches("unix://");
            Docker::connect_with_socket(clean_path, 120, &bollard::API_DEFAULT_VERSION)
                .map_err(|e| DirectorError::EngineError { status: 0, message: e.to_string() })?
        };

        Ok(DockerClient {
            client: connection,
            socket_path: socket_path.to_string(),
        })
    }

    /// Get Docker system information.
    pub async fn system_info(&self) -> Result<bollard::models::SystemInfo, DirectorError> {
        self.client.info().await.map_err(DirectorError::from_bollard)
    }
}
