//! Task state machine.

use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Lifecycle state of a task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TaskState {
    /// Recorded and queued, not yet claimed by a worker.
    Pending,
    /// Claimed by a worker unit and executing.
    Running,
    /// Finished normally; a result is attached.
    Success,
    /// Finished with a fault; an error description is attached.
    Failure,
}

impl TaskState {
    /// Check if this state allows transitioning to another state.
    pub fn can_transition_to(&self, target: TaskState) -> bool {
        use TaskState::*;

        matches!(
            (self, target),
            (Pending, Running) | (Running, Success) | (Running, Failure)
        )
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Success | Self::Failure)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "PENDING",
            Self::Running => "RUNNING",
            Self::Success => "SUCCESS",
            Self::Failure => "FAILURE",
        }
    }
}

impl std::fmt::Display for TaskState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for TaskState {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "PENDING" => Ok(Self::Pending),
            "RUNNING" => Ok(Self::Running),
            "SUCCESS" => Ok(Self::Success),
            "FAILURE" => Ok(Self::Failure),
            other => Err(format!("unknown task state: {other}")),
        }
    }
}

/// A requested move along the lifecycle, carrying the data the target state
/// requires.
#[derive(Debug, Clone, PartialEq)]
pub enum Transition {
    /// `PENDING -> RUNNING`.
    Start,
    /// `RUNNING -> SUCCESS` with the function's result.
    Succeed(serde_json::Value),
    /// `RUNNING -> FAILURE` with a human-readable description.
    Fail(String),
}

impl Transition {
    /// The only state a record may be in for this transition to apply.
    ///
    /// Every target has exactly one legal source, which lets a registry apply
    /// the transition as a single conditional update.
    pub fn source(&self) -> TaskState {
        match self {
            Self::Start => TaskState::Pending,
            Self::Succeed(_) | Self::Fail(_) => TaskState::Running,
        }
    }

    pub fn target(&self) -> TaskState {
        match self {
            Self::Start => TaskState::Running,
            Self::Succeed(_) => TaskState::Success,
            Self::Fail(_) => TaskState::Failure,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const ALL: [TaskState; 4] = [
        TaskState::Pending,
        TaskState::Running,
        TaskState::Success,
        TaskState::Failure,
    ];

    #[test]
    fn legal_transitions() {
        assert!(TaskState::Pending.can_transition_to(TaskState::Running));
        assert!(TaskState::Running.can_transition_to(TaskState::Success));
        assert!(TaskState::Running.can_transition_to(TaskState::Failure));
    }

    #[test]
    fn pending_cannot_skip_running() {
        assert!(!TaskState::Pending.can_transition_to(TaskState::Success));
        assert!(!TaskState::Pending.can_transition_to(TaskState::Failure));
    }

    #[test]
    fn terminal_states_are_final() {
        for from in [TaskState::Success, TaskState::Failure] {
            assert!(from.is_terminal());
            for to in ALL {
                assert!(!from.can_transition_to(to), "{from} -> {to} must be rejected");
            }
        }
    }

    #[test]
    fn transition_source_is_the_unique_legal_predecessor() {
        let transitions = [
            Transition::Start,
            Transition::Succeed(serde_json::json!(null)),
            Transition::Fail("boom".into()),
        ];
        for t in transitions {
            for from in ALL {
                assert_eq!(
                    from.can_transition_to(t.target()),
                    from == t.source(),
                    "{from} -> {}",
                    t.target()
                );
            }
        }
    }

    #[test]
    fn serializes_uppercase() {
        let json = serde_json::to_string(&TaskState::Running).unwrap();
        assert_eq!(json, "\"RUNNING\"");
        let back: TaskState = serde_json::from_str("\"FAILURE\"").unwrap();
        assert_eq!(back, TaskState::Failure);
    }

    #[test]
    fn parse_is_case_insensitive() {
        assert_eq!("running".parse::<TaskState>().unwrap(), TaskState::Running);
        assert_eq!("SUCCESS".parse::<TaskState>().unwrap(), TaskState::Success);
        assert!("done".parse::<TaskState>().is_err());
    }

    #[test]
    fn transition_targets() {
        assert_eq!(Transition::Start.target(), TaskState::Running);
        assert_eq!(
            Transition::Succeed(serde_json::json!(1)).target(),
            TaskState::Success
        );
        assert_eq!(Transition::Fail("x".into()).target(), TaskState::Failure);
    }
}
