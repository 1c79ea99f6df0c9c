//! Docker container runtime.

use async_trait::async_trait;
use bollard::Docker;
use bollard::container::{
    Config, CreateContainerOptions, LogOutput, LogsOptions, RemoveContainerOptions,
    StartContainerOptions, StopContainerOptions, WaitContainerOptions,
};
use bollard::errors::Error as DockerError;
use bollard::image::CreateImageOptions;
use bytes::Bytes;
use conveyor_core::runtime::{ContainerHandle, ContainerRuntime, ContainerSpec};
use conveyor_core::{Error, Result};
use futures::StreamExt;
use futures::stream::BoxStream;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Runs step containers on a Docker daemon.
pub struct DockerRuntime {
    docker: Docker,
}

impl DockerRuntime {
    /// Connect to the local Docker daemon.
    pub fn new() -> Result<Self> {
        let docker =
            Docker::connect_with_local_defaults().map_err(|e| Error::Unavailable(e.to_string()))?;
        Ok(Self { docker })
    }

    /// Check the daemon answers.
    pub async fn ping(&self) -> Result<()> {
        self.docker
            .ping()
            .await
            .map(|_| ())
            .map_err(|e| Error::Unavailable(format!("Docker daemon unreachable: {}", e)))
    }

    async fn pull(&self, image: &str) -> Result<()> {
        info!(image = %image, "Pulling image");
        let options = CreateImageOptions {
            from_image: image.to_string(),
            ..Default::default()
        };

        let mut pull_stream = self.docker.create_image(Some(options), None, None);
        while let Some(result) = pull_stream.next().await {
            match result {
                Ok(info) => {
                    if let Some(status) = info.status {
                        debug!(status = %status, "Pull progress");
                    }
                }
                Err(e) => {
                    return Err(Error::ExecutionFailed(format!(
                        "Failed to pull image {}: {}",
                        image, e
                    )));
                }
            }
        }
        Ok(())
    }
}

#[async_trait]
impl ContainerRuntime for DockerRuntime {
    fn name(&self) -> &'static str {
        "docker"
    }

    async fn ensure_image(&self, image: &str) -> Result<()> {
        match self.docker.inspect_image(image).await {
            Ok(_) => {
                debug!(image = %image, "Image present");
                Ok(())
            }
            Err(DockerError::DockerResponseServerError {
                status_code: 404, ..
            }) => self.pull(image).await,
            Err(e) => Err(Error::ExecutionFailed(format!(
                "Failed to inspect image {}: {}",
                image, e
            ))),
        }
    }

    async fn create(&self, spec: &ContainerSpec) -> Result<ContainerHandle> {
        let env: Vec<String> = spec
            .env
            .iter()
            .map(|(k, v)| format!("{}={}", k, v))
            .collect();

        let config = Config {
            image: Some(spec.image.clone()),
            cmd: Some(spec.command.clone()),
            env: Some(env),
            working_dir: spec.working_dir.clone(),
            labels: Some(spec.labels.clone()),
            attach_stdout: Some(true),
            attach_stderr: Some(true),
            tty: Some(false),
            ..Default::default()
        };

        let options = CreateContainerOptions {
            name: spec.name.clone(),
            platform: None,
        };

        info!(container = %spec.name, image = %spec.image, "Creating container");
        let created = self
            .docker
            .create_container(Some(options), config)
            .await
            .map_err(|e| Error::ExecutionFailed(format!("Failed to create container: {}", e)))?;
        for warning in &created.warnings {
            warn!(container = %spec.name, warning = %warning, "Container create warning");
        }

        Ok(ContainerHandle {
            id: created.id,
            name: spec.name.clone(),
        })
    }

    async fn start(&self, handle: &ContainerHandle) -> Result<()> {
        info!(container = %handle.name, "Starting container");
        self.docker
            .start_container(&handle.name, None::<StartContainerOptions<String>>)
            .await
            .map_err(|e| Error::ExecutionFailed(format!("Failed to start container: {}", e)))
    }

    async fn logs(&self, handle: &ContainerHandle) -> Result<BoxStream<'static, Bytes>> {
        let options = LogsOptions::<String> {
            follow: true,
            stdout: true,
            stderr: true,
            ..Default::default()
        };

        let stream = self.docker.logs(&handle.name, Some(options));
        let mapped = stream.filter_map(|result| async move {
            match result {
                Ok(LogOutput::StdOut { message })
                | Ok(LogOutput::StdErr { message })
                | Ok(LogOutput::Console { message }) => Some(message),
                Ok(LogOutput::StdIn { .. }) => None,
                Err(e) => {
                    warn!(error = %e, "Log stream error");
                    None
                }
            }
        });

        Ok(Box::pin(mapped))
    }

    async fn wait(&self, handle: &ContainerHandle) -> Result<i64> {
        let options = WaitContainerOptions {
            condition: "not-running",
        };
        let mut stream = self.docker.wait_container(&handle.name, Some(options));

        match stream.next().await {
            Some(Ok(response)) => Ok(response.status_code),
            // Non-zero exits surface as an error carrying the code.
            Some(Err(DockerError::DockerContainerWaitError { code, .. })) => Ok(code),
            Some(Err(e)) => Err(Error::ExecutionFailed(format!(
                "Failed to wait for container: {}",
                e
            ))),
            None => Err(Error::ExecutionFailed(
                "Container wait ended without a status".to_string(),
            )),
        }
    }

    async fn stop(&self, handle: &ContainerHandle, grace: Duration) -> Result<()> {
        info!(container = %handle.name, grace_secs = grace.as_secs(), "Stopping container");
        let options = StopContainerOptions {
            t: grace.as_secs() as i64,
        };
        match self.docker.stop_container(&handle.name, Some(options)).await {
            Ok(()) => Ok(()),
            // Already stopped.
            Err(DockerError::DockerResponseServerError {
                status_code: 304, ..
            }) => Ok(()),
            Err(e) => Err(Error::ExecutionFailed(format!(
                "Failed to stop container: {}",
                e
            ))),
        }
    }

    async fn remove(&self, handle: &ContainerHandle) -> Result<()> {
        let options = RemoveContainerOptions {
            force: true,
            ..Default::default()
        };
        self.docker
            .remove_container(&handle.name, Some(options))
            .await
            .map_err(|e| Error::ExecutionFailed(format!("Failed to remove container: {}", e)))?;
        debug!(container = %handle.name, "Container removed");
        Ok(())
    }
}

/// Integration tests that require Docker to be running.
/// Run with: cargo test -- --ignored
#[cfg(test)]
mod integration_tests {
    use super::*;
    use conveyor_core::{JobId, StepId};
    use std::collections::HashMap;

    fn spec(script: &str) -> ContainerSpec {
        ContainerSpec {
            name: ContainerSpec::name_for(&JobId::new(), &StepId::new()),
            image: "alpine:latest".to_string(),
            command: vec!["/bin/sh".to_string(), "-c".to_string(), script.to_string()],
            working_dir: None,
            env: HashMap::from([("MY_VAR".to_string(), "hello_world".to_string())]),
            labels: HashMap::new(),
        }
    }

    async fn run(runtime: &DockerRuntime, script: &str) -> (i64, Vec<u8>) {
        runtime.ensure_image("alpine:latest").await.unwrap();
        let handle = runtime.create(&spec(script)).await.unwrap();
        runtime.start(&handle).await.unwrap();
        let code = runtime.wait(&handle).await.unwrap();

        let mut output = Vec::new();
        let mut logs = runtime.logs(&handle).await.unwrap();
        while let Some(line) = logs.next().await {
            output.extend_from_slice(&line);
        }
        runtime.remove(&handle).await.unwrap();
        (code, output)
    }

    #[tokio::test]
    #[ignore]
    async fn test_successful_container() {
        let runtime = DockerRuntime::new().unwrap();
        runtime.ping().await.unwrap();
        let (code, output) = run(&runtime, "echo line1; echo $MY_VAR").await;
        assert_eq!(code, 0);
        let output = String::from_utf8_lossy(&output);
        assert!(output.contains("line1"));
        assert!(output.contains("hello_world"));
    }

    #[tokio::test]
    #[ignore]
    async fn test_failing_container_reports_exit_code() {
        let runtime = DockerRuntime::new().unwrap();
        let (code, _) = run(&runtime, "exit 42").await;
        assert_eq!(code, 42);
    }

    #[tokio::test]
    #[ignore]
    async fn test_stop_running_container() {
        let runtime = DockerRuntime::new().unwrap();
        runtime.ensure_image("alpine:latest").await.unwrap();
        let handle = runtime.create(&spec("sleep 300")).await.unwrap();
        runtime.start(&handle).await.unwrap();

        tokio::time::sleep(Duration::from_secs(1)).await;
        runtime.stop(&handle, Duration::from_secs(1)).await.unwrap();
        let code = runtime.wait(&handle).await.unwrap();
        assert_ne!(code, 0);
        runtime.remove(&handle).await.unwrap();
    }
}
