//! Streaming handle for an attached exec
//!
//! Each handle owns one background reader: a named OS thread that drives the
//! exec's output stream on the async runtime. Closing the handle raises a
//! cancel flag and shuts down the exec's input. It does not join or wake the
//! reader. The reader only looks at the flag when a frame arrives, so a
//! stream that never yields keeps its reader parked after `close()` returns.

use crate::engine::{AttachedExec, ExecInput, FrameStream};
use crate::exec::ExecSession;
use crate::probe::{ReaderGuard, ReaderRegistry};
use crate::state::HandleState;
use crate::stdin::StdinForwarder;
use execleak_foundation::{Error, Result};
use futures::StreamExt;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use tokio::io::AsyncWriteExt;
use tokio::runtime::Handle;
use tracing::{debug, trace, warn};

/// Caller-facing side of an attached exec stream
pub struct StreamingHandle {
    session: ExecSession,
    state: HandleState,
    /// `None` once closed, or while attached to the stdin forwarder
    input: Option<ExecInput>,
    stdin: Option<(Arc<StdinForwarder>, u64)>,
    cancel: Arc<AtomicBool>,
    frames: Arc<AtomicU64>,
    reader_name: String,
    reader: JoinHandle<()>,
}

impl StreamingHandle {
    /// Spawn the background reader and wrap the attached exec. With a
    /// forwarder, the exec's input receives this process's stdin until
    /// the handle closes.
    ///
    /// Must be called from within a tokio runtime.
    pub(crate) async fn spawn(
        session: ExecSession,
        attached: AttachedExec,
        reader_name: String,
        registry: &ReaderRegistry,
        stdin: Option<Arc<StdinForwarder>>,
    ) -> Result<Self> {
        if reader_name.contains('\0') {
            return Err(Error::Config(format!(
                "reader name {:?} contains NUL",
                reader_name
            )));
        }
        let runtime = Handle::try_current()
            .map_err(|e| Error::Engine(format!("no async runtime for stream reader: {}", e)))?;

        let AttachedExec { output, input } = attached;
        let cancel = Arc::new(AtomicBool::new(false));
        let frames = Arc::new(AtomicU64::new(0));

        let guard = registry.register(reader_name.clone());
        let reader = {
            let cancel = Arc::clone(&cancel);
            let frames = Arc::clone(&frames);
            let name = reader_name.clone();
            let exec_id = session.id.clone();
            std::thread::Builder::new()
                .name(reader_name.clone())
                .spawn(move || {
                    runtime.block_on(read_frames(output, cancel, frames, guard, &name, &exec_id))
                })?
        };

        let (input, stdin) = match stdin {
            Some(forwarder) => {
                let id = forwarder.attach(input).await;
                (None, Some((forwarder, id)))
            }
            None => (Some(input), None),
        };

        debug!(exec_id = %session.id, reader = %reader_name, "Stream reader started");

        Ok(Self {
            session,
            state: HandleState::Active,
            input,
            stdin,
            cancel,
            frames,
            reader_name,
            reader,
        })
    }

    /// Close the local attachment.
    ///
    /// Idempotent: closing a handle that is not active returns `Ok(())`.
    /// The state ends in `Closed` even when input shutdown fails; that
    /// failure is returned as `Error::Io`.
    pub async fn close(&mut self) -> Result<()> {
        if !self.state.is_active() {
            trace!(exec_id = %self.session.id, "close() on inactive handle");
            return Ok(());
        }

        self.state = HandleState::Closing;
        self.cancel.store(true, Ordering::Release);

        if let Some((forwarder, id)) = self.stdin.take() {
            self.input = forwarder.detach(id).await;
        }
        let result = match self.input.take() {
            Some(mut input) => input.shutdown().await,
            None => Ok(()),
        };

        self.state = HandleState::Closed;
        debug!(
            exec_id = %self.session.id,
            reader = %self.reader_name,
            reader_finished = self.reader.is_finished(),
            "Handle closed"
        );
        result.map_err(Error::from)
    }

    pub fn state(&self) -> HandleState {
        self.state
    }

    pub fn session(&self) -> &ExecSession {
        &self.session
    }

    pub fn exec_id(&self) -> &str {
        &self.session.id
    }

    pub fn reader_name(&self) -> &str {
        &self.reader_name
    }

    /// Frames the reader has consumed so far
    pub fn frames_received(&self) -> u64 {
        self.frames.load(Ordering::Acquire)
    }

    /// Whether the background reader has exited. Never blocks.
    pub fn reader_finished(&self) -> bool {
        self.reader.is_finished()
    }
}

/// Reader body. Runs until the stream ends, errors, or a frame arrives
/// after close.
async fn read_frames(
    mut output: FrameStream,
    cancel: Arc<AtomicBool>,
    frames: Arc<AtomicU64>,
    _guard: ReaderGuard,
    name: &str,
    exec_id: &str,
) {
    while let Some(item) = output.next().await {
        if cancel.load(Ordering::Acquire) {
            debug!(reader = name, exec_id, "Reader observed close");
            break;
        }
        match item {
            Ok(frame) => {
                frames.fetch_add(1, Ordering::AcqRel);
                trace!(reader = name, kind = ?frame.kind, len = frame.bytes.len(), "Frame");
            }
            Err(e) => {
                warn!(reader = name, exec_id, "Stream error: {}", e);
                break;
            }
        }
    }
    debug!(reader = name, exec_id, "Stream reader exiting");
}
