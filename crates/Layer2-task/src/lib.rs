//! # execleak-task
//!
//! Exec stream lifecycle and leak detection for execleak.
//!
//! ## Features
//!
//! - Container engine boundary (`EngineClient`) with a bollard-backed Docker client
//! - Exec sessions attached through a cancellable `StreamingHandle`
//! - Background stream readers as named threads
//! - Leak probe over an injectable worker enumerator
//! - Sequential trial orchestration with guaranteed container cleanup

pub mod engine;
pub mod exec;
pub mod handle;
pub mod lease;
pub mod orchestrator;
pub mod probe;
pub mod state;
pub mod stdin;

// Engine boundary
pub use engine::{
    AttachedExec, Container, DockerEngine, EngineClient, ExecInput, ExecSpec, FrameKind,
    FrameStream, OutputFrame,
};

// Exec sessions
pub use exec::{ExecSession, ExecSessionController};
pub use handle::StreamingHandle;
pub use state::{ContainerState, HandleState};
pub use stdin::StdinForwarder;

// Probe
pub use probe::{
    LeakProbe, ProbeSnapshot, ProcThreadEnumerator, ReaderGuard, ReaderRegistry, WorkerEnumerator,
};

// Orchestration
pub use lease::ContainerLease;
pub use orchestrator::{
    pull_image, RunReport, Scenario, TrialEvent, TrialOrchestrator, TrialPlan, TrialRecord,
};
