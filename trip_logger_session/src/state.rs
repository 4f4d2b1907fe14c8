use serde::{Deserialize, Serialize};
use trip_logger_lib::{statistics::TripStatistics, waypoint::Waypoint};

use crate::error::RecoverableError;

/// Session lifecycle status. Completed and cancelled sessions fall back
/// to `Idle`; the terminal status lives on the persisted record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SessionStatus {
    Idle,
    Active,
    Paused,
}

/// Commands accepted by the session state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommandKind {
    Start,
    Pause,
    Resume,
    Complete,
    Cancel,
    AddWaypoint,
    DismissError,
}

/// The transition table. Any (status, command) pair not listed here is
/// rejected as an invariant violation, never silently applied.
pub fn permits(status: SessionStatus, command: CommandKind) -> bool {
    use CommandKind::*;
    use SessionStatus::*;

    matches!(
        (status, command),
        (_, DismissError)
            | (Idle, Start)
            | (Active, Pause)
            | (Active, Complete)
            | (Active, Cancel)
            | (Active, AddWaypoint)
            | (Paused, Resume)
            | (Paused, Complete)
            | (Paused, Cancel)
            | (Paused, AddWaypoint)
    )
}

/// Read-only view of the session runtime state, published to
/// presentation collaborators on every mutation and display tick.
#[derive(Debug, Clone)]
pub struct SessionSnapshot {
    pub status: SessionStatus,
    pub elapsed_secs: i64,
    pub statistics: TripStatistics,
    pub waypoints: Vec<Waypoint>,
    pub errors: Vec<RecoverableError>,
}

impl SessionSnapshot {
    pub fn idle() -> Self {
        Self {
            status: SessionStatus::Idle,
            elapsed_secs: 0,
            statistics: TripStatistics::default(),
            waypoints: Vec::new(),
            errors: Vec::new(),
        }
    }

    pub fn last_error(&self) -> Option<&RecoverableError> {
        self.errors.last()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn start_only_from_idle() {
        assert!(permits(SessionStatus::Idle, CommandKind::Start));
        assert!(!permits(SessionStatus::Active, CommandKind::Start));
        assert!(!permits(SessionStatus::Paused, CommandKind::Start));
    }

    #[test]
    fn pause_resume_are_asymmetric() {
        assert!(permits(SessionStatus::Active, CommandKind::Pause));
        assert!(!permits(SessionStatus::Paused, CommandKind::Pause));
        assert!(permits(SessionStatus::Paused, CommandKind::Resume));
        assert!(!permits(SessionStatus::Active, CommandKind::Resume));
    }

    #[test]
    fn terminal_commands_need_a_running_session() {
        for cmd in [CommandKind::Complete, CommandKind::Cancel, CommandKind::AddWaypoint] {
            assert!(!permits(SessionStatus::Idle, cmd));
            assert!(permits(SessionStatus::Active, cmd));
            assert!(permits(SessionStatus::Paused, cmd));
        }
    }

    #[test]
    fn dismiss_error_is_always_allowed() {
        for status in [SessionStatus::Idle, SessionStatus::Active, SessionStatus::Paused] {
            assert!(permits(status, CommandKind::DismissError));
        }
    }
}
