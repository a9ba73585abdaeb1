//! Trial orchestration against a fake engine - no Docker daemon needed
//!
//! `cargo test -p execleak-task --test trial_test`

use async_trait::async_trait;
use execleak_foundation::{Error, Result};
use execleak_task::{
    pull_image, AttachedExec, EngineClient, ExecInput, ExecSessionController, ExecSpec,
    HandleState, LeakProbe, OutputFrame, ReaderRegistry, Scenario, TrialEvent, TrialOrchestrator,
    TrialPlan,
};
use futures::StreamExt;
use parking_lot::Mutex;
use std::io;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::Duration;
use tokio::io::AsyncWrite;
use tokio::sync::{mpsc, oneshot};

const PREFIX: &str = "stream-reader-";

#[derive(Clone, Copy)]
enum Output {
    /// Never sends a frame; the sender is kept alive by the engine
    Silent,
    /// One frame per interval until the receiver goes away
    Periodic(Duration),
}

/// Input whose shutdown always fails
struct BrokenInput;

impl AsyncWrite for BrokenInput {
    fn poll_write(self: Pin<&mut Self>, _: &mut Context<'_>, buf: &[u8]) -> Poll<io::Result<usize>> {
        Poll::Ready(Ok(buf.len()))
    }

    fn poll_flush(self: Pin<&mut Self>, _: &mut Context<'_>) -> Poll<io::Result<()>> {
        Poll::Ready(Ok(()))
    }

    fn poll_shutdown(self: Pin<&mut Self>, _: &mut Context<'_>) -> Poll<io::Result<()>> {
        Poll::Ready(Err(io::Error::new(
            io::ErrorKind::BrokenPipe,
            "connection reset",
        )))
    }
}

struct FakeEngine {
    output: Output,
    fail_pull: bool,
    hang_pull: bool,
    fail_start_container: bool,
    /// 1-based exec creation that is rejected
    fail_exec_on: Option<u32>,
    broken_input: bool,
    running: AtomicBool,
    exec_count: AtomicU32,
    calls: Mutex<Vec<&'static str>>,
    specs: Mutex<Vec<ExecSpec>>,
    start_ttys: Mutex<Vec<bool>>,
    silent_senders: Mutex<Vec<mpsc::UnboundedSender<Result<OutputFrame>>>>,
}

impl FakeEngine {
    fn new(output: Output) -> Self {
        Self {
            output,
            fail_pull: false,
            hang_pull: false,
            fail_start_container: false,
            fail_exec_on: None,
            broken_input: false,
            running: AtomicBool::new(false),
            exec_count: AtomicU32::new(0),
            calls: Mutex::new(Vec::new()),
            specs: Mutex::new(Vec::new()),
            start_ttys: Mutex::new(Vec::new()),
            silent_senders: Mutex::new(Vec::new()),
        }
    }

    fn silent() -> Self {
        Self::new(Output::Silent)
    }

    fn periodic() -> Self {
        Self::new(Output::Periodic(Duration::from_millis(10)))
    }

    fn count(&self, call: &str) -> usize {
        self.calls.lock().iter().filter(|c| **c == call).count()
    }

    fn record(&self, call: &'static str) {
        self.calls.lock().push(call);
    }
}

#[async_trait]
impl EngineClient for FakeEngine {
    async fn pull_image(&self, image: &str) -> Result<()> {
        self.record("pull_image");
        if self.hang_pull {
            futures::future::pending::<()>().await;
        }
        if self.fail_pull {
            return Err(Error::Pull(format!("{}: manifest unknown", image)));
        }
        Ok(())
    }

    async fn create_container(&self, _image: &str, _command: &[String]) -> Result<String> {
        self.record("create_container");
        Ok("c0ffee".to_string())
    }

    async fn start_container(&self, _id: &str) -> Result<()> {
        self.record("start_container");
        if self.fail_start_container {
            return Err(Error::Engine("start rejected".into()));
        }
        self.running.store(true, Ordering::SeqCst);
        Ok(())
    }

    async fn is_running(&self, _id: &str) -> Result<bool> {
        Ok(self.running.load(Ordering::SeqCst))
    }

    async fn create_exec(&self, _container_id: &str, spec: &ExecSpec) -> Result<String> {
        self.record("create_exec");
        let n = self.exec_count.fetch_add(1, Ordering::SeqCst) + 1;
        if self.fail_exec_on == Some(n) {
            return Err(Error::Engine("exec create rejected".into()));
        }
        self.specs.lock().push(spec.clone());
        Ok(format!("exec-{}", n))
    }

    async fn start_exec(&self, _exec_id: &str, tty: bool) -> Result<AttachedExec> {
        self.record("start_exec");
        self.start_ttys.lock().push(tty);

        let (tx, rx) = mpsc::unbounded_channel::<Result<OutputFrame>>();
        match self.output {
            Output::Silent => self.silent_senders.lock().push(tx),
            Output::Periodic(every) => {
                tokio::spawn(async move {
                    loop {
                        tokio::time::sleep(every).await;
                        if tx.send(Ok(OutputFrame::console("tick\n"))).is_err() {
                            break;
                        }
                    }
                });
            }
        }

        let output = futures::stream::unfold(rx, |mut rx| async move {
            rx.recv().await.map(|item| (item, rx))
        })
        .boxed();
        let input: ExecInput = if self.broken_input {
            Box::pin(BrokenInput)
        } else {
            Box::pin(tokio::io::sink())
        };
        Ok(AttachedExec { output, input })
    }

    async fn stop_container(&self, _id: &str, _timeout: Duration) -> Result<()> {
        self.record("stop_container");
        self.running.store(false, Ordering::SeqCst);
        Ok(())
    }

    async fn remove_container(&self, _id: &str) -> Result<()> {
        self.record("remove_container");
        Ok(())
    }
}

fn plan(scenario: Scenario, trials: u32) -> TrialPlan {
    let command = match scenario {
        Scenario::Silent => vec!["tail", "-f", "/dev/null"],
        Scenario::Periodic => vec!["watch", "-n", "1", "date"],
    };
    TrialPlan {
        scenario,
        image: "alpine:3".into(),
        container_command: vec!["tail".into(), "-f".into(), "/dev/null".into()],
        command: command.into_iter().map(String::from).collect(),
        trials,
        settle: Duration::from_millis(30),
        drain: Duration::from_millis(100),
        stop_timeout: Duration::from_secs(1),
    }
}

fn orchestrator(engine: Arc<FakeEngine>) -> TrialOrchestrator {
    let registry = ReaderRegistry::new();
    let controller = ExecSessionController::new(engine.clone(), registry.clone());
    let probe = LeakProbe::new(Arc::new(registry), PREFIX);
    TrialOrchestrator::new(engine, controller, probe)
}

fn never() -> futures::future::Pending<()> {
    futures::future::pending()
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_silent_exec_leaks_one_reader_per_trial() {
    let engine = Arc::new(FakeEngine::silent());
    let report = orchestrator(engine.clone())
        .run(&plan(Scenario::Silent, 4), never())
        .await
        .expect("run failed");

    assert_eq!(report.counts(), vec![1, 2, 3, 4]);
    assert!(report.is_non_decreasing());
    assert!(report.leak_detected());
    assert!(!report.interrupted);
    assert_eq!(
        report.trials[3].snapshot.names(),
        ["stream-reader-1", "stream-reader-2", "stream-reader-3", "stream-reader-4"]
    );
    for record in &report.trials {
        assert!(record.close_error.is_none());
        assert!(!record.reader_finished);
        assert_eq!(record.frames_received, 0);
    }

    assert_eq!(engine.count("stop_container"), 1);
    assert_eq!(engine.count("remove_container"), 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_periodic_exec_leaks_nothing() {
    let engine = Arc::new(FakeEngine::periodic());
    let report = orchestrator(engine.clone())
        .run(&plan(Scenario::Periodic, 3), never())
        .await
        .expect("run failed");

    assert_eq!(report.counts(), vec![0, 0, 0]);
    assert!(!report.leak_detected());
    for record in &report.trials {
        assert!(record.reader_finished);
        assert!(record.frames_received > 0);
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_exec_attaches_stdout_and_stdin_with_tty() {
    let engine = Arc::new(FakeEngine::silent());
    orchestrator(engine.clone())
        .run(&plan(Scenario::Silent, 1), never())
        .await
        .unwrap();

    let specs = engine.specs.lock().clone();
    assert_eq!(specs.len(), 1);
    assert!(specs[0].attach_stdout && specs[0].attach_stdin && specs[0].tty);
    assert_eq!(specs[0].command, vec!["tail", "-f", "/dev/null"]);
    assert_eq!(*engine.start_ttys.lock(), vec![true]);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_tty_off_propagates() {
    let engine = Arc::new(FakeEngine::silent());
    engine.start_container("c0ffee").await.unwrap();
    let controller =
        ExecSessionController::new(engine.clone(), ReaderRegistry::new()).with_tty(false);

    let handle = controller
        .create_and_start("c0ffee", &["true".to_string()])
        .await
        .unwrap();
    assert!(!handle.session().tty);
    assert!(!engine.specs.lock()[0].tty);
    assert_eq!(*engine.start_ttys.lock(), vec![false]);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_second_close_is_harmless() {
    let engine = Arc::new(FakeEngine::silent());
    engine.start_container("c0ffee").await.unwrap();
    let registry = ReaderRegistry::new();
    let controller = ExecSessionController::new(engine.clone(), registry.clone());
    let probe = LeakProbe::new(Arc::new(registry), PREFIX);

    let mut handle = controller
        .create_and_start("c0ffee", &["tail".to_string()])
        .await
        .unwrap();
    assert_eq!(handle.state(), HandleState::Active);

    handle.close().await.expect("first close");
    assert_eq!(handle.state(), HandleState::Closed);
    tokio::time::sleep(Duration::from_millis(50)).await;
    let before = probe.snapshot();

    handle.close().await.expect("second close");
    assert_eq!(handle.state(), HandleState::Closed);
    let after = probe.snapshot();

    assert_eq!(before.count(), 1);
    assert_eq!(before.names(), after.names());
    assert!(!handle.reader_finished());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_close_io_error_does_not_stop_measurement() {
    let mut engine = FakeEngine::silent();
    engine.broken_input = true;
    let engine = Arc::new(engine);

    let report = orchestrator(engine.clone())
        .run(&plan(Scenario::Silent, 2), never())
        .await
        .expect("close errors must not fail the run");

    assert_eq!(report.counts(), vec![1, 2]);
    for record in &report.trials {
        let error = record.close_error.as_deref().expect("close error recorded");
        assert!(error.contains("connection reset"));
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_interrupt_skips_remaining_trials_and_cleans_up_once() {
    let engine = Arc::new(FakeEngine::silent());
    let (events_tx, mut events_rx) = mpsc::unbounded_channel();
    let (stop_tx, stop_rx) = oneshot::channel::<()>();

    tokio::spawn(async move {
        let mut stop_tx = Some(stop_tx);
        while let Some(event) = events_rx.recv().await {
            if let TrialEvent::Probed { trial: 2, .. } = event {
                if let Some(tx) = stop_tx.take() {
                    let _ = tx.send(());
                }
            }
        }
    });

    let mut plan = plan(Scenario::Silent, 10);
    plan.settle = Duration::from_millis(500);
    plan.drain = Duration::from_millis(20);

    let report = orchestrator(engine.clone())
        .with_events(events_tx)
        .run(&plan, async move {
            let _ = stop_rx.await;
        })
        .await
        .expect("interrupt is not an error");

    assert!(report.interrupted);
    assert_eq!(report.trials.len(), 2);
    assert_eq!(engine.count("create_exec"), 3);
    assert_eq!(engine.count("stop_container"), 1);
    assert_eq!(engine.count("remove_container"), 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_ten_silent_trials_grow_by_one_each() {
    let engine = Arc::new(FakeEngine::silent());
    let mut plan = plan(Scenario::Silent, 10);
    plan.settle = Duration::from_millis(10);
    plan.drain = Duration::from_millis(20);

    let report = orchestrator(engine.clone())
        .run(&plan, never())
        .await
        .expect("run failed");

    assert_eq!(report.counts(), (1..=10).collect::<Vec<usize>>());
    assert_eq!(report.leaked(), 10);
    assert_eq!(engine.count("create_exec"), 10);
    assert_eq!(engine.count("remove_container"), 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_interrupt_during_drain_skips_that_trials_record() {
    let engine = Arc::new(FakeEngine::silent());
    let (events_tx, mut events_rx) = mpsc::unbounded_channel();
    let (stop_tx, stop_rx) = oneshot::channel::<()>();

    tokio::spawn(async move {
        let mut stop_tx = Some(stop_tx);
        while let Some(event) = events_rx.recv().await {
            if let TrialEvent::Closed { trial: 2 } = event {
                if let Some(tx) = stop_tx.take() {
                    let _ = tx.send(());
                }
            }
        }
    });

    let mut plan = plan(Scenario::Silent, 5);
    plan.settle = Duration::from_millis(10);
    plan.drain = Duration::from_millis(500);

    let report = orchestrator(engine.clone())
        .with_events(events_tx)
        .run(&plan, async move {
            let _ = stop_rx.await;
        })
        .await
        .expect("interrupt is not an error");

    assert!(report.interrupted);
    assert_eq!(report.counts(), vec![1]);
    assert_eq!(engine.count("create_exec"), 2);
    assert_eq!(engine.count("stop_container"), 1);
    assert_eq!(engine.count("remove_container"), 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_dropped_run_still_removes_container() {
    let engine = Arc::new(FakeEngine::silent());
    let mut plan = plan(Scenario::Silent, 3);
    plan.settle = Duration::from_secs(30);

    let orchestrator = orchestrator(engine.clone());
    let run = orchestrator.run(&plan, never());
    assert!(tokio::time::timeout(Duration::from_millis(200), run)
        .await
        .is_err());

    let removed = async {
        while engine.count("remove_container") == 0 {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    };
    tokio::time::timeout(Duration::from_secs(2), removed)
        .await
        .expect("container was not cleaned up after the run was dropped");
    assert_eq!(engine.count("stop_container"), 1);
    assert_eq!(engine.count("remove_container"), 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_nul_in_reader_name_is_config_error() {
    let engine = Arc::new(FakeEngine::silent());
    engine.start_container("c0ffee").await.unwrap();
    let registry = ReaderRegistry::new();
    let controller = ExecSessionController::new(engine.clone(), registry.clone())
        .with_reader_prefix("stream\0reader-");

    let result = controller
        .create_and_start("c0ffee", &["tail".to_string()])
        .await;

    assert!(matches!(result, Err(Error::Config(_))));
    assert!(LeakProbe::new(Arc::new(registry), "stream").snapshot().is_empty());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_engine_error_is_fatal_but_cleans_up() {
    let mut engine = FakeEngine::silent();
    engine.fail_exec_on = Some(2);
    let engine = Arc::new(engine);

    let err = orchestrator(engine.clone())
        .run(&plan(Scenario::Silent, 5), never())
        .await
        .unwrap_err();

    assert!(matches!(err, Error::Engine(_)));
    assert!(err.is_fatal());
    assert_eq!(engine.count("create_exec"), 2);
    assert_eq!(engine.count("stop_container"), 1);
    assert_eq!(engine.count("remove_container"), 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_failed_container_start_removes_container() {
    let mut engine = FakeEngine::silent();
    engine.fail_start_container = true;
    let engine = Arc::new(engine);

    let err = orchestrator(engine.clone())
        .run(&plan(Scenario::Silent, 1), never())
        .await
        .unwrap_err();

    assert!(matches!(err, Error::Engine(_)));
    assert_eq!(engine.count("create_exec"), 0);
    assert_eq!(engine.count("stop_container"), 0);
    assert_eq!(engine.count("remove_container"), 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_exec_on_stopped_container_is_rejected() {
    let engine = Arc::new(FakeEngine::silent());
    let controller = ExecSessionController::new(engine.clone(), ReaderRegistry::new());

    let result = controller
        .create_and_start("c0ffee", &["tail".to_string()])
        .await;

    assert!(matches!(result, Err(Error::ContainerNotRunning(_))));
    assert_eq!(engine.count("create_exec"), 0);
}

#[tokio::test]
async fn test_pull_failure_happens_before_any_container() {
    let mut engine = FakeEngine::silent();
    engine.fail_pull = true;

    let err = pull_image(&engine, "registry.invalid/nope:0", never())
        .await
        .unwrap_err();

    assert!(matches!(err, Error::Pull(_)));
    assert_ne!(err.exit_code(), 0);
    assert_eq!(engine.count("create_container"), 0);
}

#[tokio::test]
async fn test_interrupted_pull_is_canceled() {
    let mut engine = FakeEngine::silent();
    engine.hang_pull = true;

    let err = pull_image(&engine, "alpine:3", async {}).await.unwrap_err();

    assert!(matches!(err, Error::PullCanceled));
    assert_ne!(err.exit_code(), 0);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_report_serializes() {
    let engine = Arc::new(FakeEngine::silent());
    let report = orchestrator(engine)
        .run(&plan(Scenario::Silent, 1), never())
        .await
        .unwrap();

    let json = serde_json::to_value(&report).unwrap();
    assert_eq!(json["scenario"], "silent");
    assert_eq!(json["trials"][0]["reader"], "stream-reader-1");
}
