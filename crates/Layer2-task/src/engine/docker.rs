//! Docker engine client - talks to the local daemon through bollard

use super::{AttachedExec, EngineClient, ExecSpec, FrameKind, OutputFrame};
use async_trait::async_trait;
use bollard::container::{
    Config, CreateContainerOptions, InspectContainerOptions, LogOutput, RemoveContainerOptions,
    StartContainerOptions, StopContainerOptions,
};
use bollard::exec::{CreateExecOptions, StartExecOptions, StartExecResults};
use bollard::image::CreateImageOptions;
use bollard::Docker;
use execleak_foundation::{Error, Result};
use futures::StreamExt;
use std::time::Duration;
use tracing::{debug, info};
use uuid::Uuid;

impl From<LogOutput> for OutputFrame {
    fn from(output: LogOutput) -> Self {
        let (kind, message) = match output {
            LogOutput::StdOut { message } => (FrameKind::StdOut, message),
            LogOutput::StdErr { message } => (FrameKind::StdErr, message),
            LogOutput::StdIn { message } => (FrameKind::StdIn, message),
            LogOutput::Console { message } => (FrameKind::Console, message),
        };
        Self {
            kind,
            bytes: message.to_vec(),
        }
    }
}

/// Engine client backed by the local Docker daemon
pub struct DockerEngine {
    docker: Docker,
}

impl DockerEngine {
    /// Connect with local defaults (`DOCKER_HOST` or the platform socket)
    /// and verify the daemon answers
    pub async fn connect() -> Result<Self> {
        let docker = Docker::connect_with_local_defaults()
            .map_err(|e| Error::engine("Failed to connect to Docker", e))?;
        docker
            .ping()
            .await
            .map_err(|e| Error::engine("Docker is not available", e))?;
        Ok(Self { docker })
    }
}

#[async_trait]
impl EngineClient for DockerEngine {
    async fn pull_image(&self, image: &str) -> Result<()> {
        info!("Pulling image: {}", image);

        let options = CreateImageOptions {
            from_image: image,
            ..Default::default()
        };
        let mut progress = self.docker.create_image(Some(options), None, None);
        while let Some(item) = progress.next().await {
            let info = item.map_err(|e| Error::Pull(format!("{}: {}", image, e)))?;
            if let Some(status) = info.status {
                debug!(image, "{}", status);
            }
        }
        Ok(())
    }

    async fn create_container(&self, image: &str, command: &[String]) -> Result<String> {
        let options = CreateContainerOptions {
            name: format!("execleak-{}", Uuid::new_v4()),
            ..Default::default()
        };
        let config = Config {
            image: Some(image.to_string()),
            cmd: Some(command.to_vec()),
            ..Default::default()
        };

        let response = self
            .docker
            .create_container(Some(options), config)
            .await
            .map_err(|e| Error::engine("Failed to create container", e))?;
        Ok(response.id)
    }

    async fn start_container(&self, id: &str) -> Result<()> {
        self.docker
            .start_container(id, None::<StartContainerOptions<String>>)
            .await
            .map_err(|e| Error::engine("Failed to start container", e))
    }

    async fn is_running(&self, id: &str) -> Result<bool> {
        let inspect = self
            .docker
            .inspect_container(id, None::<InspectContainerOptions>)
            .await
            .map_err(|e| Error::engine("Failed to inspect container", e))?;
        Ok(inspect.state.and_then(|s| s.running).unwrap_or(false))
    }

    async fn create_exec(&self, container_id: &str, spec: &ExecSpec) -> Result<String> {
        let options = CreateExecOptions {
            cmd: Some(spec.command.clone()),
            attach_stdout: Some(spec.attach_stdout),
            attach_stdin: Some(spec.attach_stdin),
            tty: Some(spec.tty),
            ..Default::default()
        };

        let exec = self
            .docker
            .create_exec(container_id, options)
            .await
            .map_err(|e| Error::engine("Failed to create exec", e))?;
        Ok(exec.id)
    }

    async fn start_exec(&self, exec_id: &str, tty: bool) -> Result<AttachedExec> {
        let options = StartExecOptions {
            detach: false,
            tty,
            ..Default::default()
        };

        let results = self
            .docker
            .start_exec(exec_id, Some(options))
            .await
            .map_err(|e| Error::engine("Failed to start exec", e))?;

        match results {
            StartExecResults::Attached { output, input } => Ok(AttachedExec {
                output: output
                    .map(|item| {
                        item.map(OutputFrame::from)
                            .map_err(|e| Error::engine("Exec stream failed", e))
                    })
                    .boxed(),
                input,
            }),
            StartExecResults::Detached => Err(Error::Engine(format!(
                "exec {} started detached, no stream to attach",
                exec_id
            ))),
        }
    }

    async fn stop_container(&self, id: &str, timeout: Duration) -> Result<()> {
        info!("Stopping container: {}", id);

        let options = StopContainerOptions {
            t: timeout.as_secs() as i64,
        };
        self.docker
            .stop_container(id, Some(options))
            .await
            .map_err(|e| Error::engine("Failed to stop container", e))
    }

    async fn remove_container(&self, id: &str) -> Result<()> {
        info!("Removing container: {}", id);

        let options = RemoveContainerOptions {
            force: true,
            ..Default::default()
        };
        self.docker
            .remove_container(id, Some(options))
            .await
            .map_err(|e| Error::engine("Failed to remove container", e))
    }
}
