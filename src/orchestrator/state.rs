//! Per-term state machine.

use std::path::PathBuf;
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};

/// State of one worklist term within a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TermState {
    /// Selected from the worklist, not started.
    Pending,
    /// Collector and downloader are working on it.
    Running,
    /// Finished; the worklist line is marked done.
    Done,
    /// Failed; the worklist line is left pending for the next run.
    Failed,
}

impl TermState {
    pub fn can_transition_to(&self, target: TermState) -> bool {
        use TermState::*;

        matches!(
            (self, target),
            (Pending, Running) | (Running, Done) | (Running, Failed)
        )
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Done | Self::Failed)
    }
}

impl std::fmt::Display for TermState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Pending => "pending",
            Self::Running => "running",
            Self::Done => "done",
            Self::Failed => "failed",
        };
        write!(f, "{s}")
    }
}

/// Progress and outcome of one term.
#[derive(Debug, Clone, Serialize)]
pub struct TermRun {
    pub term: String,
    pub requested: u32,
    pub state: TermState,
    /// Images in the term folder when it finished.
    pub saved: u32,
    /// Candidate URLs listed in extract-only mode.
    pub listed: usize,
    pub folder: Option<PathBuf>,
    /// Why the term failed, or why it finished short.
    pub reason: Option<String>,
    pub elapsed: Option<Duration>,
    #[serde(skip)]
    started_at: Option<Instant>,
}

impl TermRun {
    pub fn new(term: impl Into<String>, requested: u32) -> Self {
        Self {
            term: term.into(),
            requested,
            state: TermState::Pending,
            saved: 0,
            listed: 0,
            folder: None,
            reason: None,
            elapsed: None,
            started_at: None,
        }
    }

    pub fn transition_to(&mut self, new_state: TermState, reason: Option<String>) -> Result<(), String> {
        if !self.state.can_transition_to(new_state) {
            return Err(format!(
                "Cannot transition from {} to {}",
                self.state, new_state
            ));
        }

        self.state = new_state;
        if reason.is_some() {
            self.reason = reason;
        }

        match new_state {
            TermState::Running => self.started_at = Some(Instant::now()),
            TermState::Done | TermState::Failed => {
                self.elapsed = self.started_at.map(|start| start.elapsed());
            }
            TermState::Pending => {}
        }
        Ok(())
    }

    /// One-line outcome for the run summary.
    pub fn describe(&self) -> String {
        match (self.state, &self.folder) {
            (TermState::Done, Some(folder)) => {
                format!("{}/{} -> {}", self.saved, self.requested, folder.display())
            }
            (TermState::Done, None) => format!("{} candidate URLs listed", self.listed),
            (TermState::Failed, _) => format!(
                "failed: {}",
                self.reason.as_deref().unwrap_or("unknown error")
            ),
            (state, _) => state.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn state_transitions_valid() {
        assert!(TermState::Pending.can_transition_to(TermState::Running));
        assert!(TermState::Running.can_transition_to(TermState::Done));
        assert!(TermState::Running.can_transition_to(TermState::Failed));
    }

    #[test]
    fn state_transitions_invalid() {
        assert!(!TermState::Pending.can_transition_to(TermState::Done));
        assert!(!TermState::Done.can_transition_to(TermState::Running));
        assert!(!TermState::Failed.can_transition_to(TermState::Pending));
        assert!(!TermState::Done.can_transition_to(TermState::Failed));
    }

    #[test]
    fn terminal_states() {
        assert!(TermState::Done.is_terminal());
        assert!(TermState::Failed.is_terminal());
        assert!(!TermState::Pending.is_terminal());
        assert!(!TermState::Running.is_terminal());
    }

    #[test]
    fn term_run_records_elapsed() {
        let mut run = TermRun::new("cats", 3);
        run.transition_to(TermState::Running, None).unwrap();
        assert!(run.elapsed.is_none());
        run.transition_to(TermState::Done, None).unwrap();
        assert!(run.elapsed.is_some());
        assert!(run.transition_to(TermState::Running, None).is_err());
    }

    #[test]
    fn describe_outcomes() {
        let mut done = TermRun::new("cats", 3);
        done.saved = 2;
        done.folder = Some(PathBuf::from("out/cats"));
        done.transition_to(TermState::Running, None).unwrap();
        done.transition_to(TermState::Done, None).unwrap();
        assert_eq!(done.describe(), format!("2/3 -> {}", PathBuf::from("out/cats").display()));

        let mut failed = TermRun::new("dogs", 5);
        failed.transition_to(TermState::Running, None).unwrap();
        failed
            .transition_to(TermState::Failed, Some("results did not load".into()))
            .unwrap();
        assert_eq!(failed.describe(), "failed: results did not load");
    }

    #[test]
    fn term_state_serde_roundtrip() {
        let json = serde_json::to_string(&TermState::Running).unwrap();
        assert_eq!(json, "\"running\"");
        let parsed: TermState = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, TermState::Running);
    }
}
