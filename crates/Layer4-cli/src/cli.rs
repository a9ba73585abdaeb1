//! Non-interactive run: pull, then one orchestrated run per scenario

use execleak_foundation::{Error, HarnessConfig};
use execleak_task::{
    pull_image, DockerEngine, EngineClient, ReaderRegistry, RunReport, Scenario, TrialEvent,
    TrialOrchestrator, TrialPlan,
};
use std::sync::Arc;
use tokio::sync::mpsc;

/// Run the given scenarios in order against the local Docker daemon
pub async fn run(config: &HarnessConfig, scenarios: &[Scenario], json: bool) -> anyhow::Result<()> {
    let engine: Arc<dyn EngineClient> = Arc::new(DockerEngine::connect().await?);

    println!("Pulling {}", config.image);
    pull_image(engine.as_ref(), &config.image, ctrl_c()).await?;
    println!("Pull complete!");

    let registry = ReaderRegistry::new();
    let mut reports = Vec::with_capacity(scenarios.len());

    for &scenario in scenarios {
        let plan = TrialPlan::from_config(config, scenario);
        let (tx, rx) = mpsc::unbounded_channel();
        let printer = tokio::spawn(print_events(rx));

        println!(
            "Running {} exec instances of `{}` ({}). Press Ctrl+C to cancel",
            plan.trials,
            plan.command.join(" "),
            scenario
        );
        let orchestrator =
            TrialOrchestrator::from_config(Arc::clone(&engine), registry.clone(), config)
                .with_events(tx);
        let result = orchestrator.run(&plan, ctrl_c()).await;

        // Dropping the orchestrator closes the event channel
        drop(orchestrator);
        let _ = printer.await;

        let report = result?;
        print_summary(&report);
        let interrupted = report.interrupted;
        reports.push(report);
        if interrupted {
            break;
        }
    }

    if json {
        println!("{}", serde_json::to_string_pretty(&reports)?);
    }
    Ok(interrupted_outcome(&reports)?)
}

/// An interrupted run still prints its reports, then exits as interrupted
fn interrupted_outcome(reports: &[RunReport]) -> execleak_foundation::Result<()> {
    if reports.iter().any(|r| r.interrupted) {
        return Err(Error::Interrupted);
    }
    Ok(())
}

async fn ctrl_c() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::warn!("Cannot listen for Ctrl+C: {}", e);
        std::future::pending::<()>().await;
    }
}

async fn print_events(mut rx: mpsc::UnboundedReceiver<TrialEvent>) {
    while let Some(event) = rx.recv().await {
        match event {
            TrialEvent::ContainerReady { container_id } => {
                println!("Container {} is running", container_id);
            }
            TrialEvent::ExecStarted { trial, .. } => {
                println!("Exec No {}...", trial);
            }
            TrialEvent::Closing { .. } => {
                println!("Closing exec instance prematurely...");
            }
            TrialEvent::Closed { .. } => {
                println!("Called close()");
            }
            TrialEvent::CloseFailed { error, .. } => {
                eprintln!("Error during close: {}", error);
            }
            TrialEvent::Probed { snapshot, .. } => {
                println!("There are {} streaming threads:", snapshot.count());
                for name in snapshot.names() {
                    println!("{}", name);
                }
                println!("----------------------------------");
            }
            TrialEvent::Interrupted { completed } => {
                println!("Interrupted after {} trials, cleaning up", completed);
            }
        }
    }
}

fn print_summary(report: &RunReport) {
    let counts: Vec<String> = report.counts().iter().map(|c| c.to_string()).collect();
    println!(
        "[{}] reader counts: {} | baseline {} | leaked {} | non-decreasing: {}",
        report.scenario,
        counts.join(","),
        report.baseline.count(),
        report.leaked(),
        if report.is_non_decreasing() { "yes" } else { "no" }
    );
}
