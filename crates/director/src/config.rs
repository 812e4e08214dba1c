use std::collections::HashMap;
use std::fs::File;
use std::io::Read as _;
use std::path::Path;

use serde::{Deserialize, Serialize};

/// Declarative description of one image the catalog can build and run.
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
pub struct ImageDescriptor {
    pub name: String,
    /// Container-internal ports this image exposes.
    #[serde(default)]
    pub ports: Vec<u16>,
    /// Default environment merged in ahead of stored/per-run env.
    #[serde(default)]
    pub env: HashMap<String, String>,
    /// Default dashboard position, if any.
    pub pos: Option<(i32, i32)>,
    /// Whether this image's containers speak the in-band status RPC.
    #[serde(default)]
    pub native: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DirectorConfig {
    pub images: Vec<ImageDescriptor>,
    /// Defaults merged into every `run` (labels, networking, restart policy).
    pub container_params: HashMap<String, String>,
    /// Defaults merged into every `build` (nocache, build args).
    pub image_params: HashMap<String, String>,
    pub start_port: u16,
    pub end_port: u16,
    pub initial_startup: Vec<String>,
    pub docker_socket: String,
    /// How often the reconciler walks container state, in seconds.
    pub reconcile_interval_secs: u64,
    /// How often the image catalog rescans its source, in seconds.
    pub image_refresh_interval_secs: u64,
    /// Per-service status-RPC probe timeout, in seconds.
    pub service_timeout_secs: u64,
    /// Name of the distinguished service that mirrors the fleet's
    /// registration table to UI clients, if any.
    pub frontier_service: Option<String>,
}

impl Default for DirectorConfig {
    fn default() -> Self {
        Self {
            images: Vec::new(),
            container_params: HashMap::new(),
            image_params: HashMap::new(),
            start_port: 8900,
            end_port: 8999,
            initial_startup: Vec::new(),
            docker_socket: String::new(),
            reconcile_interval_secs: 5,
            image_refresh_interval_secs: 15,
            service_timeout_secs: 30,
            frontier_service: None,
        }
    }
}

impl DirectorConfig {
    /// Load configuration from file or environment variables.
    /// Priority: Environment Variables > Config File > Defaults
    ///
    /// Environment variables always override config file settings for critical values.
    pub fn load() -> Result<Self, Box<dyn std::error::Error>> {
        let config_path = std::env::var("DIRECTOR_CONFIG_FILE")
            .unwrap_or_else(|_| "/etc/director/director.toml".to_string());

        let mut config = if Path::new(&config_path).exists() {
            tracing::info!("Loading configuration from: {}", config_path);
            Self::from_file(&config_path)?
        } else {
            tracing::info!(
                "Config file not found at {}, using environment variables",
                config_path
            );
            Self::from_env()
        };

        if let Ok(socket) = std::env::var("DOCKER_SOCKET") {
            config.docker_socket = socket;
        }
        if let Ok(start) = std::env::var("DIRECTOR_START_PORT") {
            if let Ok(v) = start.parse() {
                config.start_port = v;
            }
        }
        if let Ok(end) = std::env::var("DIRECTOR_END_PORT") {
            if let Ok(v) = end.parse() {
                config.end_port = v;
            }
        }

        Ok(config)
    }

    /// Load configuration from a TOML file.
    pub fn from_file(path: &str) -> Result<Self, Box<dyn std::error::Error>> {
        let mut file = File::open(path)?;
        let mut contents = String::new();
        file.read_to_string(&mut contents)?;

        let config: DirectorConfig = toml::from_str(&contents)?;
        Ok(config)
    }

    /// Load configuration from environment variables with sensible defaults.
    pub fn from_env() -> Self {
        let mut config = Self::default();
        config.docker_socket = std::env::var("DOCKER_SOCKET").unwrap_or_default();
        if let Ok(start) = std::env::var("DIRECTOR_START_PORT") {
            config.start_port = start.parse().unwrap_or(config.start_port);
        }
        if let Ok(end) = std::env::var("DIRECTOR_END_PORT") {
            config.end_port = end.parse().unwrap_or(config.end_port);
        }
        if let Ok(interval) = std::env::var("DIRECTOR_RECONCILE_INTERVAL_SECS") {
            config.reconcile_interval_secs =
                interval.parse().unwrap_or(config.reconcile_interval_secs);
        }
        config
    }

    /// Validate that configuration values are internally consistent.
    pub fn validate(&self) -> Result<(), String> {
        if self.start_port == 0 || self.end_port == 0 {
            return Err("start_port/end_port must not be zero".to_string());
        }
        if self.start_port >= self.end_port {
            return Err("start_port must be less than end_port".to_string());
        }
        if self.reconcile_interval_secs == 0 {
            return Err("reconcile_interval_secs must be > 0".to_string());
        }
        if self.image_refresh_interval_secs == 0 {
            return Err("image_refresh_interval_secs must be > 0".to_string());
        }
        if self.service_timeout_secs == 0 {
            return Err("service_timeout_secs must be > 0".to_string());
        }
        for name in &self.initial_startup {
            if !self.images.iter().any(|img| &img.name == name) {
                return Err(format!(
                    "initial_startup references unknown image '{}'",
                    name
                ));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn image(name: &str) -> ImageDescriptor {
        ImageDescriptor {
            name: name.to_string(),
            ..ImageDescriptor::default()
        }
    }

    #[test]
    fn defaults_are_valid() {
        assert!(DirectorConfig::default().validate().is_ok());
    }

    #[test]
    fn default_port_range_matches_original() {
        let config = DirectorConfig::default();
        assert_eq!(config.start_port, 8900);
        assert_eq!(config.end_port, 8999);
    }

    #[test]
    fn rejects_inverted_port_range() {
        let mut config = DirectorConfig::default();
        config.start_port = 9000;
        config.end_port = 8900;
        let err = config.validate().unwrap_err();
        assert!(err.contains("start_port"));
    }

    #[test]
    fn rejects_zero_reconcile_interval() {
        let mut config = DirectorConfig::default();
        config.reconcile_interval_secs = 0;
        let err = config.validate().unwrap_err();
        assert!(err.contains("reconcile_interval_secs"));
    }

    #[test]
    fn rejects_unknown_initial_startup_image() {
        let mut config = DirectorConfig::default();
        config.images.push(image("web"));
        config.initial_startup.push("worker".to_string());
        let err = config.validate().unwrap_err();
        assert!(err.contains("worker"));
    }

    #[test]
    fn accepts_known_initial_startup_image() {
        let mut config = DirectorConfig::default();
        config.images.push(image("web"));
        config.initial_startup.push("web".to_string());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn from_env_reads_docker_socket() {
        std::env::set_var("DOCKER_SOCKET", "/var/run/docker.test.sock");
        let config = DirectorConfig::from_env();
        assert_eq!(config.docker_socket, "/var/run/docker.test.sock");
        std::env::remove_var("DOCKER_SOCKET");
    }
}
