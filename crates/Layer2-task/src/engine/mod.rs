//! Container engine client boundary
//!
//! The harness never talks to Docker directly; everything goes through
//! [`EngineClient`] so trials can run against a fake engine in tests.
//!
//! - `DockerEngine` - bollard-backed implementation for a local daemon

pub mod docker;

pub use docker::DockerEngine;

use crate::state::ContainerState;
use async_trait::async_trait;
use execleak_foundation::Result;
use futures::stream::BoxStream;
use serde::{Deserialize, Serialize};
use std::pin::Pin;
use std::time::Duration;
use tokio::io::AsyncWrite;

/// A container created by the harness
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Container {
    /// Engine-assigned identifier
    pub id: String,
    /// Image reference the container was created from
    pub image: String,
    /// Lifecycle state as last observed by the harness
    pub state: ContainerState,
}

impl Container {
    pub fn new(id: impl Into<String>, image: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            image: image.into(),
            state: ContainerState::Created,
        }
    }
}

/// Exec instance creation request
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecSpec {
    pub command: Vec<String>,
    pub attach_stdout: bool,
    pub attach_stdin: bool,
    pub tty: bool,
}

/// Which stream a frame was multiplexed from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FrameKind {
    StdOut,
    StdErr,
    StdIn,
    /// Raw TTY output (no stdout/stderr split)
    Console,
}

/// One chunk of output delivered by the engine
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutputFrame {
    pub kind: FrameKind,
    pub bytes: Vec<u8>,
}

impl OutputFrame {
    pub fn console(bytes: impl Into<Vec<u8>>) -> Self {
        Self {
            kind: FrameKind::Console,
            bytes: bytes.into(),
        }
    }
}

/// Output of an attached exec, ending when the remote process ends or the
/// connection closes
pub type FrameStream = BoxStream<'static, Result<OutputFrame>>;

/// Write half of an attached exec
pub type ExecInput = Pin<Box<dyn AsyncWrite + Send>>;

/// Both halves of an attached exec connection
pub struct AttachedExec {
    pub output: FrameStream,
    pub input: ExecInput,
}

/// Container engine operations consumed by the harness
#[async_trait]
pub trait EngineClient: Send + Sync {
    /// Pull an image, blocking until the pull completes
    async fn pull_image(&self, image: &str) -> Result<()>;

    /// Create a container and return its id
    async fn create_container(&self, image: &str, command: &[String]) -> Result<String>;

    /// Start a created container
    async fn start_container(&self, id: &str) -> Result<()>;

    /// Whether the container is currently running
    async fn is_running(&self, id: &str) -> Result<bool>;

    /// Create an exec instance and return its id
    async fn create_exec(&self, container_id: &str, spec: &ExecSpec) -> Result<String>;

    /// Start an exec attached (not detached) and hand back its streams
    async fn start_exec(&self, exec_id: &str, tty: bool) -> Result<AttachedExec>;

    /// Stop a container
    async fn stop_container(&self, id: &str, timeout: Duration) -> Result<()>;

    /// Remove a container
    async fn remove_container(&self, id: &str) -> Result<()>;
}
