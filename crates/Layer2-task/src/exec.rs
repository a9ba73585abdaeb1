//! Exec Session Controller - creates exec instances and attaches to them

use crate::engine::{EngineClient, ExecSpec};
use crate::handle::StreamingHandle;
use crate::probe::ReaderRegistry;
use crate::stdin::StdinForwarder;
use execleak_foundation::{Error, Result, DEFAULT_READER_PREFIX};
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, OnceLock};
use tracing::{debug, info};

/// A command executed inside an already-running container
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecSession {
    /// Engine-assigned exec id
    pub id: String,
    /// Container the exec runs in
    pub container_id: String,
    pub command: Vec<String>,
    pub attach_stdout: bool,
    pub attach_stdin: bool,
    pub tty: bool,
}

/// Creates exec sessions and hands back streaming handles
pub struct ExecSessionController {
    engine: Arc<dyn EngineClient>,
    registry: ReaderRegistry,
    reader_prefix: String,
    tty: bool,
    forward_stdin: bool,
    /// Started on the first exec when stdin is forwarded
    stdin: OnceLock<Arc<StdinForwarder>>,
    /// Reader sequence number, used in thread names
    sequence: AtomicU64,
}

impl ExecSessionController {
    pub fn new(engine: Arc<dyn EngineClient>, registry: ReaderRegistry) -> Self {
        Self {
            engine,
            registry,
            reader_prefix: DEFAULT_READER_PREFIX.to_string(),
            tty: true,
            forward_stdin: false,
            stdin: OnceLock::new(),
            sequence: AtomicU64::new(0),
        }
    }

    pub fn with_reader_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.reader_prefix = prefix.into();
        self
    }

    pub fn with_tty(mut self, tty: bool) -> Self {
        self.tty = tty;
        self
    }

    pub fn with_forward_stdin(mut self, forward: bool) -> Self {
        self.forward_stdin = forward;
        self
    }

    /// Create an exec with stdout and stdin attached, start it attached,
    /// and return a handle owning the output subscription.
    pub async fn create_and_start(
        &self,
        container_id: &str,
        command: &[String],
    ) -> Result<StreamingHandle> {
        if !self.engine.is_running(container_id).await? {
            return Err(Error::ContainerNotRunning(container_id.to_string()));
        }

        let spec = ExecSpec {
            command: command.to_vec(),
            attach_stdout: true,
            attach_stdin: true,
            tty: self.tty,
        };
        let exec_id = self.engine.create_exec(container_id, &spec).await?;
        debug!(container_id, exec_id = %exec_id, "Exec created");

        let attached = self.engine.start_exec(&exec_id, self.tty).await?;

        let seq = self.sequence.fetch_add(1, Ordering::Relaxed) + 1;
        let reader_name = format!("{}{}", self.reader_prefix, seq);
        let session = ExecSession {
            id: exec_id,
            container_id: container_id.to_string(),
            command: spec.command,
            attach_stdout: spec.attach_stdout,
            attach_stdin: spec.attach_stdin,
            tty: spec.tty,
        };

        info!(
            exec_id = %session.id,
            reader = %reader_name,
            "Exec started: {}",
            session.command.join(" ")
        );
        let stdin = self
            .forward_stdin
            .then(|| Arc::clone(self.stdin.get_or_init(StdinForwarder::spawn)));
        StreamingHandle::spawn(session, attached, reader_name, &self.registry, stdin).await
    }
}
