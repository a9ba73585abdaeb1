//! Trial Orchestrator - repeated start / settle / close / drain / probe
//!
//! Trials run one after another with plain sleeps between phases. The
//! orchestrator never synchronizes with a reader directly; the only contact
//! is `close()` followed by the drain delay.
//!
//! ## Run lifecycle
//! 1. create + start the container (`ContainerLease`)
//! 2. baseline probe
//! 3. `trials` x (start exec -> settle -> close -> drain -> probe)
//! 4. stop + remove the container, on every exit path

use crate::engine::EngineClient;
use crate::exec::ExecSessionController;
use crate::lease::ContainerLease;
use crate::probe::{
    LeakProbe, ProbeSnapshot, ProcThreadEnumerator, ReaderRegistry, WorkerEnumerator,
};
use execleak_foundation::{Error, HarnessConfig, ProbeSource, Result};
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{info, warn};

/// Which command the trials run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Scenario {
    /// Command that never writes output; expected to leak one reader per trial
    Silent,
    /// Command that writes periodically; control case, expected to leak none
    Periodic,
}

impl Scenario {
    pub fn name(&self) -> &'static str {
        match self {
            Scenario::Silent => "silent",
            Scenario::Periodic => "periodic",
        }
    }
}

impl std::fmt::Display for Scenario {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// Parameters of one orchestrated run
#[derive(Debug, Clone)]
pub struct TrialPlan {
    pub scenario: Scenario,
    pub image: String,
    pub container_command: Vec<String>,
    /// Command run by each trial's exec
    pub command: Vec<String>,
    pub trials: u32,
    /// D1: wait after start
    pub settle: Duration,
    /// D2: wait after close
    pub drain: Duration,
    pub stop_timeout: Duration,
}

impl TrialPlan {
    pub fn from_config(config: &HarnessConfig, scenario: Scenario) -> Self {
        let command = match scenario {
            Scenario::Silent => config.silent_command.clone(),
            Scenario::Periodic => config.periodic_command.clone(),
        };
        Self {
            scenario,
            image: config.image.clone(),
            container_command: config.container_command.clone(),
            command,
            trials: config.trials,
            settle: config.settle(),
            drain: config.drain(),
            stop_timeout: config.stop_timeout(),
        }
    }
}

/// Progress events emitted while a run executes
#[derive(Debug, Clone)]
pub enum TrialEvent {
    ContainerReady { container_id: String },
    ExecStarted { trial: u32, exec_id: String, reader: String },
    Closing { trial: u32 },
    Closed { trial: u32 },
    CloseFailed { trial: u32, error: String },
    Probed { trial: u32, snapshot: ProbeSnapshot },
    Interrupted { completed: u32 },
}

/// Outcome of one trial
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrialRecord {
    /// 1-based
    pub trial: u32,
    pub exec_id: String,
    pub reader: String,
    /// Error raised by `close()`, if any
    pub close_error: Option<String>,
    /// Frames this trial's reader consumed before the probe
    pub frames_received: u64,
    /// Whether this trial's own reader had exited at probe time
    pub reader_finished: bool,
    pub snapshot: ProbeSnapshot,
}

/// Result of one orchestrated run
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunReport {
    pub scenario: Scenario,
    pub container_id: String,
    /// Snapshot taken before the first trial
    pub baseline: ProbeSnapshot,
    pub trials: Vec<TrialRecord>,
    /// Trial loop stopped early on interrupt
    pub interrupted: bool,
}

impl RunReport {
    /// Reader count after each trial
    pub fn counts(&self) -> Vec<usize> {
        self.trials.iter().map(|t| t.snapshot.count()).collect()
    }

    pub fn final_count(&self) -> usize {
        self.trials
            .last()
            .map(|t| t.snapshot.count())
            .unwrap_or_else(|| self.baseline.count())
    }

    /// Readers that appeared during this run and are still alive
    pub fn leaked(&self) -> usize {
        self.final_count().saturating_sub(self.baseline.count())
    }

    pub fn leak_detected(&self) -> bool {
        self.leaked() > 0
    }

    /// Old leaks are never cleaned up, so counts must not shrink
    pub fn is_non_decreasing(&self) -> bool {
        self.counts().windows(2).all(|w| w[0] <= w[1])
    }
}

/// Pull an image, or fail with `PullCanceled` if `interrupt` fires first
pub async fn pull_image<F>(engine: &dyn EngineClient, image: &str, interrupt: F) -> Result<()>
where
    F: Future<Output = ()>,
{
    tokio::select! {
        result = engine.pull_image(image) => result,
        _ = interrupt => Err(Error::PullCanceled),
    }
}

/// Drives trials against one container
pub struct TrialOrchestrator {
    engine: Arc<dyn EngineClient>,
    controller: ExecSessionController,
    probe: LeakProbe,
    events: Option<mpsc::UnboundedSender<TrialEvent>>,
}

impl TrialOrchestrator {
    pub fn new(
        engine: Arc<dyn EngineClient>,
        controller: ExecSessionController,
        probe: LeakProbe,
    ) -> Self {
        Self {
            engine,
            controller,
            probe,
            events: None,
        }
    }

    /// Wire controller and probe from configuration. Reader threads
    /// register in `registry`, which is also the probe source unless the
    /// configuration selects `/proc`.
    pub fn from_config(
        engine: Arc<dyn EngineClient>,
        registry: ReaderRegistry,
        config: &HarnessConfig,
    ) -> Self {
        let enumerator: Arc<dyn WorkerEnumerator> = match config.probe_source {
            ProbeSource::Registry => Arc::new(registry.clone()),
            ProbeSource::Proc => Arc::new(ProcThreadEnumerator::new()),
        };
        let controller = ExecSessionController::new(Arc::clone(&engine), registry)
            .with_reader_prefix(config.reader_prefix.clone())
            .with_tty(config.tty)
            .with_forward_stdin(config.forward_stdin);
        let probe = LeakProbe::new(enumerator, config.reader_prefix.clone());
        Self::new(engine, controller, probe)
    }

    pub fn with_events(mut self, tx: mpsc::UnboundedSender<TrialEvent>) -> Self {
        self.events = Some(tx);
        self
    }

    fn emit(&self, event: TrialEvent) {
        if let Some(tx) = &self.events {
            let _ = tx.send(event);
        }
    }

    /// Run all trials of `plan`.
    ///
    /// When `interrupt` completes during a wait, remaining trials are
    /// skipped. The container is stopped and removed exactly once whether
    /// the loop finishes, is interrupted, or fails. If the returned future
    /// is dropped or the trial loop panics, the lease's drop starts the
    /// same cleanup on a background task; that cleanup is not awaited.
    pub async fn run<F>(&self, plan: &TrialPlan, interrupt: F) -> Result<RunReport>
    where
        F: Future<Output = ()>,
    {
        tokio::pin!(interrupt);

        let lease = ContainerLease::acquire(
            Arc::clone(&self.engine),
            &plan.image,
            &plan.container_command,
            plan.stop_timeout,
        )
        .await?;
        self.emit(TrialEvent::ContainerReady {
            container_id: lease.id().to_string(),
        });

        let outcome = self.run_trials(lease.id(), plan, interrupt.as_mut()).await;

        let container = lease.release().await;
        info!(container_id = %container.id, state = %container.state, "Run cleanup finished");
        outcome
    }

    async fn run_trials<F>(
        &self,
        container_id: &str,
        plan: &TrialPlan,
        mut interrupt: Pin<&mut F>,
    ) -> Result<RunReport>
    where
        F: Future<Output = ()>,
    {
        let mut report = RunReport {
            scenario: plan.scenario,
            container_id: container_id.to_string(),
            baseline: self.probe.snapshot(),
            trials: Vec::with_capacity(plan.trials as usize),
            interrupted: false,
        };

        for trial in 1..=plan.trials {
            // start
            let mut handle = self
                .controller
                .create_and_start(container_id, &plan.command)
                .await?;
            self.emit(TrialEvent::ExecStarted {
                trial,
                exec_id: handle.exec_id().to_string(),
                reader: handle.reader_name().to_string(),
            });

            // settle
            if wait_or_interrupt(plan.settle, interrupt.as_mut()).await {
                if let Err(e) = handle.close().await {
                    warn!(trial, "Close after interrupt failed: {}", e);
                }
                report.interrupted = true;
                break;
            }

            // cancel
            self.emit(TrialEvent::Closing { trial });
            let close_error = match handle.close().await {
                Ok(()) => {
                    self.emit(TrialEvent::Closed { trial });
                    None
                }
                Err(e) if e.is_fatal() => return Err(e),
                Err(e) => {
                    warn!(trial, exec_id = %handle.exec_id(), "Error during close: {}", e);
                    self.emit(TrialEvent::CloseFailed {
                        trial,
                        error: e.to_string(),
                    });
                    Some(e.to_string())
                }
            };

            // drain
            if wait_or_interrupt(plan.drain, interrupt.as_mut()).await {
                report.interrupted = true;
                break;
            }

            // probe
            let snapshot = self.probe.snapshot();
            info!(
                trial,
                scenario = %plan.scenario,
                readers = snapshot.count(),
                "Probe after close"
            );
            self.emit(TrialEvent::Probed {
                trial,
                snapshot: snapshot.clone(),
            });
            report.trials.push(TrialRecord {
                trial,
                exec_id: handle.exec_id().to_string(),
                reader: handle.reader_name().to_string(),
                close_error,
                frames_received: handle.frames_received(),
                reader_finished: handle.reader_finished(),
                snapshot,
            });
        }

        if report.interrupted {
            warn!(completed = report.trials.len(), "Trial loop interrupted");
            self.emit(TrialEvent::Interrupted {
                completed: report.trials.len() as u32,
            });
        }
        Ok(report)
    }
}

/// Sleep for `duration`; `true` if `interrupt` completed first
async fn wait_or_interrupt<F>(duration: Duration, interrupt: Pin<&mut F>) -> bool
where
    F: Future<Output = ()>,
{
    tokio::select! {
        _ = tokio::time::sleep(duration) => false,
        _ = interrupt => true,
    }
}
