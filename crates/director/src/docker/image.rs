//! Image domain — list, inspect, pull, build, remove.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use super::client::DockerClient;
use crate::error::DirectorError;
use bollard::body_full;
use futures_util::stream::StreamExt;

/// How often build progress is logged, mirroring the throttled progress
/// reporting a long `docker build` needs to avoid flooding the log.
const BUILD_PROGRESS_THROTTLE: Duration = Duration::from_secs(1);

impl DockerClient {
    /// List all images on the Docker host.
    pub async fn list_images(&self) -> Result<Vec<bollard::models::ImageSummary>, DirectorError> {
        use bollard::query_parameters::ListImagesOptions;

        let options = Some(ListImagesOptions {
            all: false,
            ..Default::default()
        });

        self.client
            .list_images(options)
            .await
            .map_err(DirectorError::from_bollard)
    }

    /// Inspect a specific image by ID or tag.
    pub async fn inspect_image(
        &self,
        image_id: &str,
    ) -> Result<bollard::models::ImageInspect, DirectorError> {
        self.client
            .inspect_image(image_id)
            .await
            .map_err(DirectorError::from_bollard)
    }

    /// Pull an image from a registry. Returns when the pull is complete.
    pub async fn pull_image(
        &self,
        image: &str,
        tag: &str,
        registry_auth: Option<&str>,
    ) -> Result<(), DirectorError> {
        use bollard::auth::DockerCredentials;
        use bollard::query_parameters::CreateImageOptions;

        let options = Some(CreateImageOptions {
            from_image: Some(image.to_string()),
            tag: Some(tag.to_string()),
            ..Default::default()
        });

        let credentials = registry_auth.map(|auth| DockerCredentials {
            auth: Some(auth.to_string()),
            ..Default::default()
        });

        let mut stream = self.client.create_image(options, None, credentials);

        while let Some(result) = stream.next().await {
            match result {
                Ok(info) => {
                    tracing::debug!(status = ?info.status, "image pull progress");
                }
                Err(e) => return Err(DirectorError::from_bollard(e)),
            }
        }

        Ok(())
    }

    /// Build an image from a build context tarball, returning the built
    /// image's id. Progress chunks are logged at most once per second —
    /// a real build context emits far more of them than is useful to log.
    pub async fn build_image(
        &self,
        tag: &str,
        context_tar: Vec<u8>,
        build_args: &HashMap<String, String>,
        no_cache: bool,
    ) -> Result<String, DirectorError> {
        use bollard::query_parameters::BuildImageOptions;

        let options = BuildImageOptions {
            t: Some(tag.to_string()),
            buildargs: Some(serde_json::to_string(build_args).unwrap_or_default()),
            nocache: no_cache,
            rm: true,
            ..Default::default()
        };

        let mut stream = self
            .client
            .build_image(options, None, Some(body_full(context_tar.into())));

        let mut image_id: Option<String> = None;
        let mut last_logged = Instant::now() - BUILD_PROGRESS_THROTTLE;

        while let Some(result) = stream.next().await {
            let info = result.map_err(DirectorError::from_bollard)?;

            if let Some(aux) = info.aux {
                if let Some(id) = aux.id {
                    image_id = Some(id);
                }
            }

            if let Some(error) = info.error {
                return Err(DirectorError::EngineError { status: 0, message: error });
            }

            if let Some(text) = info.stream {
                if last_logged.elapsed() >= BUILD_PROGRESS_THROTTLE {
                    tracing::debug!(tag, progress = text.trim_end(), "build progress");
                    last_logged = Instant::now();
                }
            }
        }

        image_id.ok_or_else(|| {
            DirectorError::Internal(format!("build for '{}' produced no image id", tag))
        })
    }

    /// Remove an image by ID or tag.
    pub async fn remove_image(
        &self,
        image_id: &str,
        force: bool,
        no_prune: bool,
    ) -> Result<(), DirectorError> {
        use bollard::query_parameters::RemoveImageOptions;

        let options = Some(RemoveImageOptions {
            force,
            noprune: no_prune,
            ..Default::default()
        });

        self.client
            .remove_image(image_id, options, None)
            .await
            .map_err(DirectorError::from_bollard)?;

        Ok(())
    }
}
