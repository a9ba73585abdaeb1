//! Lifecycle states for containers and streaming handles

use serde::{Deserialize, Serialize};

/// Lifecycle of the container shared by all trials of a run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ContainerState {
    /// Created but not started
    Created,

    /// Main process is running
    Running,

    /// Stopped by the harness
    Stopped,

    /// Removed from the engine
    Removed,
}

impl ContainerState {
    /// Check if this is a terminal state
    pub fn is_terminal(&self) -> bool {
        matches!(self, ContainerState::Removed)
    }

    /// Get display name for the state
    pub fn display_name(&self) -> &'static str {
        match self {
            ContainerState::Created => "Created",
            ContainerState::Running => "Running",
            ContainerState::Stopped => "Stopped",
            ContainerState::Removed => "Removed",
        }
    }
}

impl std::fmt::Display for ContainerState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.display_name())
    }
}

/// Caller-side state of a streaming handle.
///
/// This tracks the caller's view only. A handle in `Closed` may still have a
/// live background reader.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum HandleState {
    /// Stream attached, reader running
    Active,

    /// Close requested, input teardown in progress
    Closing,

    /// Close finished from the caller's perspective
    Closed,
}

impl HandleState {
    pub fn is_active(&self) -> bool {
        matches!(self, HandleState::Active)
    }

    /// Get display name for the state
    pub fn display_name(&self) -> &'static str {
        match self {
            HandleState::Active => "Active",
            HandleState::Closing => "Closing",
            HandleState::Closed => "Closed",
        }
    }
}
