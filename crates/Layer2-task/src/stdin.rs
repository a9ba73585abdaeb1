//! Process stdin shared across exec sessions
//!
//! One task reads this process's stdin for the whole run and writes each
//! chunk into whichever exec input is attached at the time. Handles attach
//! their input on start and detach it on close, so a chunk read after one
//! exec closes goes to the next exec instead of the closed one. Chunks read
//! while no exec is attached are dropped.

use crate::engine::ExecInput;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWriteExt};
use tokio::sync::Mutex;
use tracing::{debug, trace};

const CHUNK_SIZE: usize = 4096;

pub struct StdinForwarder {
    target: Mutex<Option<(u64, ExecInput)>>,
    next_id: AtomicU64,
}

impl StdinForwarder {
    /// Start forwarding this process's stdin. Must be called from within a
    /// tokio runtime.
    pub fn spawn() -> Arc<Self> {
        Self::spawn_with(tokio::io::stdin())
    }

    /// Start forwarding from `source`
    pub fn spawn_with<R>(source: R) -> Arc<Self>
    where
        R: AsyncRead + Unpin + Send + 'static,
    {
        let forwarder = Arc::new(Self {
            target: Mutex::new(None),
            next_id: AtomicU64::new(1),
        });
        tokio::spawn(Arc::clone(&forwarder).forward(source));
        forwarder
    }

    /// Route stdin into `input` until it is detached. Replaces any input
    /// still attached.
    pub async fn attach(&self, input: ExecInput) -> u64 {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        *self.target.lock().await = Some((id, input));
        id
    }

    /// Take the input back if `id` is still the attached one
    pub async fn detach(&self, id: u64) -> Option<ExecInput> {
        let mut target = self.target.lock().await;
        match target.as_ref() {
            Some((current, _)) if *current == id => target.take().map(|(_, input)| input),
            _ => None,
        }
    }

    async fn forward<R>(self: Arc<Self>, mut source: R)
    where
        R: AsyncRead + Unpin,
    {
        let mut buf = vec![0u8; CHUNK_SIZE];
        loop {
            let n = match source.read(&mut buf).await {
                Ok(0) => break,
                Ok(n) => n,
                Err(e) => {
                    debug!("stdin read failed: {}", e);
                    break;
                }
            };

            let mut target = self.target.lock().await;
            let failed = match target.as_mut() {
                Some((id, input)) => write_chunk(input, &buf[..n]).await.err().map(|e| (*id, e)),
                None => {
                    trace!(len = n, "No exec attached, stdin chunk dropped");
                    None
                }
            };
            if let Some((id, e)) = failed {
                debug!(input = id, "stdin forwarding to exec stopped: {}", e);
                *target = None;
            }
        }
        debug!("stdin forwarder finished");
    }
}

async fn write_chunk(input: &mut ExecInput, chunk: &[u8]) -> std::io::Result<()> {
    input.write_all(chunk).await?;
    input.flush().await
}
