//! Leak Probe - census of live background stream readers
//!
//! The probe never touches the readers themselves. It asks a
//! [`WorkerEnumerator`] for every live execution unit and keeps the ones
//! whose name starts with the reader prefix.
//!
//! Enumerators:
//! - `ReaderRegistry` - readers spawned by this process register themselves
//!   and deregister when their thread body returns
//! - `ProcThreadEnumerator` - every OS thread of this process, read from
//!   `/proc/self/task/*/comm` (Linux)

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::{debug, warn};

/// Runtime introspection capability
pub trait WorkerEnumerator: Send + Sync {
    /// Names of all live workers, in discovery order
    fn list_live_workers(&self) -> Vec<String>;
}

/// Point-in-time list of live stream readers
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProbeSnapshot {
    names: Vec<String>,
    captured_at: DateTime<Utc>,
}

impl ProbeSnapshot {
    pub fn new(names: Vec<String>) -> Self {
        Self {
            names,
            captured_at: Utc::now(),
        }
    }

    pub fn count(&self) -> usize {
        self.names.len()
    }

    pub fn names(&self) -> &[String] {
        &self.names
    }

    pub fn captured_at(&self) -> DateTime<Utc> {
        self.captured_at
    }

    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }
}

/// Filters live workers down to stream readers
#[derive(Clone)]
pub struct LeakProbe {
    enumerator: Arc<dyn WorkerEnumerator>,
    prefix: String,
}

impl LeakProbe {
    pub fn new(enumerator: Arc<dyn WorkerEnumerator>, prefix: impl Into<String>) -> Self {
        Self {
            enumerator,
            prefix: prefix.into(),
        }
    }

    /// Capture a fresh snapshot. Read-only; safe to call at any time.
    pub fn snapshot(&self) -> ProbeSnapshot {
        let names: Vec<String> = self
            .enumerator
            .list_live_workers()
            .into_iter()
            .filter(|name| name.starts_with(&self.prefix))
            .collect();
        debug!(count = names.len(), prefix = %self.prefix, "Probe snapshot");
        ProbeSnapshot::new(names)
    }
}

// ============================================================================
// Registry
// ============================================================================

#[derive(Default)]
struct RegistryInner {
    next_id: AtomicU64,
    live: Mutex<Vec<(u64, String)>>,
}

/// In-process registry of reader threads
///
/// Cloning shares the same registry.
#[derive(Clone, Default)]
pub struct ReaderRegistry {
    inner: Arc<RegistryInner>,
}

impl ReaderRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a live worker. It stays listed until the guard drops.
    pub fn register(&self, name: impl Into<String>) -> ReaderGuard {
        let id = self.inner.next_id.fetch_add(1, Ordering::Relaxed);
        self.inner.live.lock().push((id, name.into()));
        ReaderGuard {
            id,
            inner: Arc::clone(&self.inner),
        }
    }
}

impl WorkerEnumerator for ReaderRegistry {
    fn list_live_workers(&self) -> Vec<String> {
        self.inner
            .live
            .lock()
            .iter()
            .map(|(_, name)| name.clone())
            .collect()
    }
}

/// Keeps a worker listed in its registry while alive
pub struct ReaderGuard {
    id: u64,
    inner: Arc<RegistryInner>,
}

impl Drop for ReaderGuard {
    fn drop(&mut self) {
        self.inner.live.lock().retain(|(id, _)| *id != self.id);
    }
}

// ============================================================================
// /proc enumeration
// ============================================================================

/// Lists OS threads of the current process by their kernel `comm` name.
///
/// The kernel truncates thread names to 15 bytes.
pub struct ProcThreadEnumerator {
    task_dir: PathBuf,
}

impl Default for ProcThreadEnumerator {
    fn default() -> Self {
        Self {
            task_dir: PathBuf::from("/proc/self/task"),
        }
    }
}

impl ProcThreadEnumerator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Read from another task directory (e.g. `/proc/<pid>/task`)
    pub fn with_task_dir(task_dir: impl Into<PathBuf>) -> Self {
        Self {
            task_dir: task_dir.into(),
        }
    }
}

impl WorkerEnumerator for ProcThreadEnumerator {
    fn list_live_workers(&self) -> Vec<String> {
        let entries = match std::fs::read_dir(&self.task_dir) {
            Ok(entries) => entries,
            Err(e) => {
                warn!(dir = %self.task_dir.display(), "Cannot enumerate threads: {}", e);
                return Vec::new();
            }
        };

        // Sorted by tid so the order is stable between calls
        let mut threads: Vec<(u64, String)> = entries
            .filter_map(|entry| entry.ok())
            .filter_map(|entry| {
                let tid = entry.file_name().to_str()?.parse::<u64>().ok()?;
                // Threads can exit between read_dir and this read
                let comm = std::fs::read_to_string(entry.path().join("comm")).ok()?;
                Some((tid, comm.trim_end().to_string()))
            })
            .collect();
        threads.sort_by_key(|(tid, _)| *tid);
        threads.into_iter().map(|(_, name)| name).collect()
    }
}
