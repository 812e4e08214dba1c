//! Container domain — list, inspect, lifecycle, and log streaming.

use super::client::DockerClient;
use super::inventory::ContainerInfo;
use crate::error::DirectorError;

use bollard::container::LogOutput;
use bollard::models::ContainerInspectResponse;
use bollard::query_parameters::{ListContainersOptions, LogsOptions, RemoveContainerOptions};
use bytes::Bytes;
use futures_util::stream::StreamExt;

const SUPPORTED_LOG_DRIVERS: &[&str] = &["json-file", "journald", "local"];

/// Which of a container's two output streams a log record came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogStreamKind {
    Stdout,
    Stderr,
}

#[derive(Debug, Clone)]
pub struct LogRecord {
    /// Nanoseconds since the Unix epoch.
    pub timestamp: i64,
    pub stream: LogStreamKind,
    pub content: Bytes,
}

impl DockerClient {
    pub async fn list_containers(&self) -> Result<Vec<ContainerInfo>, DirectorError> {
        let options = Some(ListContainersOptions {
            all: true,
            ..Default::default()
        });
        let containers = self
            .client
            .list_containers(options)
            .await
            .map_err(DirectorError::from_bollard)?;
        Ok(containers.into_iter().map(|c| c.into()).collect())
    }

    /// Stream log records for a container, optionally bounded by `since`/`until`
    /// (Unix seconds). Raises `EngineError` up front if the container's log
    /// driver doesn't support time-travel and a bound was requested.
    pub async fn stream_container_logs(
        &self,
        container_id: &str,
        follow: bool,
        since: Option<i64>,
        until: Option<i64>,
    ) -> Result<impl futures_util::stream::Stream<Item = Result<LogRecord, DirectorError>>, DirectorError>
    {
        if since.is_some() || until.is_some() {
            let container = self.inspect_container(container_id).await?;
            if let Some(driver) = container.log_driver {
                if !SUPPORTED_LOG_DRIVERS.contains(&driver.as_str()) {
                    return Err(DirectorError::Internal(format!(
                        "log driver '{}' does not support time-travel (since/until); supported: {:?}",
                        driver, SUPPORTED_LOG_DRIVERS
                    )));
                }
            }
        }

        let since_raw = since.unwrap_or(0);
        let until_raw = until.unwrap_or(0);
        if since_raw > i32::MAX as i64 || until_raw > i32::MAX as i64 {
            tracing::warn!(
                since = since_raw,
                until = until_raw,
                "timestamp exceeds i32 range (year 2038 limit) — clamping"
            );
        }

        let options = LogsOptions {
            follow,
            stdout: true,
            stderr: true,
            since: since_raw.clamp(i32::MIN as i64, i32::MAX as i64) as i32,
            until: until_raw.clamp(i32::MIN as i64, i32::MAX as i64) as i32,
            timestamps: true,
            tail: "all".to_string(),
        };

        let bollard_stream = self.client.logs(container_id, Some(options));
        Ok(bollard_stream.map(|result| match result {
            Ok(output) => convert_bollard_log(output),
            Err(e) => Err(DirectorError::from_bollard(e)),
        }))
    }

    pub async fn inspect_container(&self, id: &str) -> Result<ContainerInfo, DirectorError> {
        let details: ContainerInspectResponse = self
            .client
            .inspect_container(id, None)
            .await
            .map_err(DirectorError::from_bollard)?;
        Ok(ContainerInfo::from(details))
    }

    pub async fn inspect_container_raw(
        &self,
        id: &str,
    ) -> Result<ContainerInspectResponse, DirectorError> {
        self.client
            .inspect_container(id, None)
            .await
            .map_err(DirectorError::from_bollard)
    }

    /// Create and start a container named `name` from `image`, publishing
    /// `port_bindings` (container port → host port, TCP) and applying `env`
    /// and `labels`. Returns the resulting container's inventory info.
    pub async fn run_container(
        &self,
        name: &str,
        image: &str,
        env: &std::collections::HashMap<String, String>,
        port_bindings: &std::collections::HashMap<u16, u16>,
        labels: &std::collections::HashMap<String, String>,
        auto_remove: bool,
    ) -> Result<ContainerInfo, DirectorError> {
        use bollard::container::Config;
        use bollard::models::{HostConfig, PortBinding};
        use bollard::query_parameters::CreateContainerOptions;
        use std::collections::HashMap;

        let env_vec: Vec<String> = env.iter().map(|(k, v)| format!("{k}={v}")).collect();

        let mut bindings: HashMap<String, Option<Vec<PortBinding>>> = HashMap::new();
        let mut exposed_ports: HashMap<String, HashMap<(), ()>> = HashMap::new();
        for (container_port, host_port) in port_bindings {
            let key = format!("{container_port}/tcp");
            bindings.insert(
                key.clone(),
                Some(vec![PortBinding {
                    host_ip: None,
                    host_port: Some(host_port.to_string()),
                }]),
            );
            exposed_ports.insert(key, HashMap::new());
        }

        let host_config = HostConfig {
            port_bindings: Some(bindings),
            auto_remove: Some(auto_remove),
            ..Default::default()
        };

        let config = Config {
            image: Some(image.to_string()),
            env: Some(env_vec),
            labels: Some(labels.clone()),
            exposed_ports: Some(exposed_ports),
            host_config: Some(host_config),
            ..Default::default()
        };

        let options = Some(CreateContainerOptions {
            name: Some(name.to_string()),
            ..Default::default()
        });

        self.client
            .create_container(options, config)
            .await
            .map_err(DirectorError::from_bollard)?;
        self.start_container(name).await?;
        self.inspect_container(name).await
    }

    // ── Container lifecycle ───────────────────────────────────────

    pub async fn start_container(&self, container_id: &str) -> Result<(), DirectorError> {
        self.client
            .start_container(container_id, None)
            .await
            .map_err(DirectorError::from_bollard)
    }

    pub async fn stop_container(
        &self,
        container_id: &str,
        timeout_secs: Option<u32>,
    ) -> Result<(), DirectorError> {
        use bollard::query_parameters::StopContainerOptions;

        let options = timeout_secs.map(|t| StopContainerOptions {
            t: Some(t as i32),
            ..Default::default()
        });

        self.client
            .stop_container(container_id, options)
            .await
            .map_err(DirectorError::from_bollard)
    }

    pub async fn restart_container(
        &self,
        container_id: &str,
        timeout_secs: Option<u32>,
    ) -> Result<(), DirectorError> {
        use bollard::query_parameters::RestartContainerOptions;

        let options = timeout_secs.map(|t| RestartContainerOptions {
            t: Some(t as i32),
            ..Default::default()
        });

        self.client
            .restart_container(container_id, options)
            .await
            .map_err(DirectorError::from_bollard)
    }

    /// Remove a container. Per the spec's "remove is idempotent" rule, a 404
    /// from the engine is treated as success rather than propagated.
    pub async fn remove_container(
        &self,
        container_id: &str,
        force: bool,
        remove_volumes: bool,
    ) -> Result<(), DirectorError> {
        let options = Some(RemoveContainerOptions {
            force,
            v: remove_volumes,
            ..Default::default()
        });

        match self.client.remove_container(container_id, options).await {
            Ok(()) => Ok(()),
            Err(e) => {
                let mapped = DirectorError::from_bollard(e);
                if mapped.is_not_found() {
                    Ok(())
                } else {
                    Err(mapped)
                }
            }
        }
    }
}

/// Converts Bollard's `LogOutput` to our `LogRecord` format.
///
/// Docker with `timestamps: true` prepends an RFC3339Nano timestamp like
/// `"2023-01-01T00:00:00.000000000Z message content..."`.
pub(crate) fn convert_bollard_log(output: LogOutput) -> Result<LogRecord, DirectorError> {
    let (stream, raw_bytes) = match output {
        LogOutput::StdOut { message } => (LogStreamKind::Stdout, message),
        LogOutput::StdErr { message } => (LogStreamKind::Stderr, message),
        LogOutput::StdIn { message } => (LogStreamKind::Stdout, message),
        LogOutput::Console { message } => (LogStreamKind::Stdout, message),
    };

    let split_idx = raw_bytes.iter().position(|&b| b == b' ');

    let (timestamp, content) = match split_idx {
        Some(idx) => match std::str::from_utf8(&raw_bytes[..idx]) {
            Ok(ts_str) => match chrono::DateTime::parse_from_rfc3339(ts_str) {
                Ok(dt) => {
                    let ts_nanos = dt
                        .timestamp_nanos_opt()
                        .unwrap_or_else(|| chrono::Utc::now().timestamp_nanos_opt().unwrap_or(0));
                    let msg_start = idx + 1;
                    let clean_content = if msg_start < raw_bytes.len() {
                        raw_bytes.slice(msg_start..)
                    } else {
                        Bytes::new()
                    };
                    (ts_nanos, clean_content)
                }
                Err(_) => (
                    chrono::Utc::now().timestamp_nanos_opt().unwrap_or(0),
                    raw_bytes,
                ),
            },
            Err(_) => (
                chrono::Utc::now().timestamp_nanos_opt().unwrap_or(0),
                raw_bytes,
            ),
        },
        None => (
            chrono::Utc::now().timestamp_nanos_opt().unwrap_or(0),
            raw_bytes,
        ),
    };

    Ok(LogRecord {
        timestamp,
        stream,
        content,
    })
}
