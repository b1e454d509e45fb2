// Orchestrator state machine

use serde::{Deserialize, Serialize};
use std::fmt;

/// Where a sync session is in its arm/run/align cycle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum SyncState {
    #[default]
    Idle,
    Armed,
    Running,
    Stopped,
}

impl SyncState {
    /// Check if audio is live (playback and capture running)
    pub fn is_running(&self) -> bool {
        matches!(self, SyncState::Running)
    }

    pub fn is_idle(&self) -> bool {
        matches!(self, SyncState::Idle)
    }
}

impl fmt::Display for SyncState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SyncState::Idle => "idle",
            SyncState::Armed => "armed",
            SyncState::Running => "running",
            SyncState::Stopped => "stopped",
        };
        f.write_str(name)
    }
}

/// Session operations that depend on the current state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncOperation {
    Arm,
    StartRun,
    StopRun,
    AwaitAlignment,
    PlayAligned,
    TakeResult,
}

impl SyncOperation {
    /// What the caller has to do before this operation is allowed
    pub fn hint(&self) -> &'static str {
        match self {
            SyncOperation::Arm => "reset the session first",
            SyncOperation::StartRun => "arm the session first",
            SyncOperation::StopRun => "start a run first",
            SyncOperation::AwaitAlignment => "stop a run first",
            SyncOperation::PlayAligned | SyncOperation::TakeResult => {
                "stop a run and wait for its alignment first"
            }
        }
    }
}

impl fmt::Display for SyncOperation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SyncOperation::Arm => "arm",
            SyncOperation::StartRun => "start run",
            SyncOperation::StopRun => "stop run",
            SyncOperation::AwaitAlignment => "await alignment",
            SyncOperation::PlayAligned => "play aligned take",
            SyncOperation::TakeResult => "take result",
        };
        f.write_str(name)
    }
}
