//! Per-phase progress tracking

use crate::context::Phase;
use indexmap::IndexMap;
use serde::Serialize;
use std::fmt;
use std::time::Duration;
use tokio::time::Instant;

/// Progress of one phase
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum PhaseState {
    /// Not started
    Pending,
    /// In progress
    Running,
    /// Finished
    Done,
    /// Executor failed
    Failed,
    /// Disabled or overridden
    Skipped,
}

impl fmt::Display for PhaseState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Pending => "pending",
            Self::Running => "running",
            Self::Done => "done",
            Self::Failed => "failed",
            Self::Skipped => "skipped",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone)]
struct Entry {
    state: PhaseState,
    started: Option<Instant>,
    elapsed: Option<Duration>,
}

/// Tracks every phase through pending -> running -> done/failed, or
/// pending -> skipped. Illegal transitions are logged and ignored.
#[derive(Debug, Clone)]
pub struct PhaseChecklist {
    entries: IndexMap<Phase, Entry>,
}

impl Default for PhaseChecklist {
    fn default() -> Self {
        Self::new()
    }
}

impl PhaseChecklist {
    /// Every phase pending
    #[must_use]
    pub fn new() -> Self {
        let entries = Phase::ALL
            .into_iter()
            .map(|p| {
                (
                    p,
                    Entry {
                        state: PhaseState::Pending,
                        started: None,
                        elapsed: None,
                    },
                )
            })
            .collect();
        Self { entries }
    }

    fn transition(&mut self, name: &str, from: PhaseState, to: PhaseState) -> bool {
        let Ok(phase) = name.parse::<Phase>() else {
            tracing::debug!(phase = name, "checklist_unknown_phase");
            return false;
        };
        let Some(entry) = self.entries.get_mut(&phase) else {
            return false;
        };
        if entry.state != from {
            tracing::debug!(
                phase = %phase,
                current = %entry.state,
                requested = %to,
                "checklist_illegal_transition"
            );
            return false;
        }
        entry.state = to;
        match to {
            PhaseState::Running => entry.started = Some(Instant::now()),
            PhaseState::Done | PhaseState::Failed => {
                entry.elapsed = entry.started.map(|s| s.elapsed());
            }
            _ => {}
        }
        true
    }

    /// pending -> running
    pub fn start(&mut self, phase: &str) -> bool {
        self.transition(phase, PhaseState::Pending, PhaseState::Running)
    }

    /// running -> done
    pub fn complete(&mut self, phase: &str) -> bool {
        self.transition(phase, PhaseState::Running, PhaseState::Done)
    }

    /// running -> failed
    pub fn fail(&mut self, phase: &str) -> bool {
        self.transition(phase, PhaseState::Running, PhaseState::Failed)
    }

    /// pending -> skipped
    pub fn skip(&mut self, phase: &str) -> bool {
        self.transition(phase, PhaseState::Pending, PhaseState::Skipped)
    }

    /// State of a phase; `None` for unknown names
    #[must_use]
    pub fn state(&self, phase: &str) -> Option<PhaseState> {
        let phase = phase.parse::<Phase>().ok()?;
        self.entries.get(&phase).map(|e| e.state)
    }

    /// Time spent in a finished phase
    #[must_use]
    pub fn elapsed(&self, phase: &str) -> Option<Duration> {
        let phase = phase.parse::<Phase>().ok()?;
        self.entries.get(&phase).and_then(|e| e.elapsed)
    }

    /// Phase currently running
    #[must_use]
    pub fn active_phase(&self) -> Option<Phase> {
        self.entries
            .iter()
            .find(|(_, e)| e.state == PhaseState::Running)
            .map(|(p, _)| *p)
    }

    /// Done plus skipped
    #[must_use]
    pub fn completed_count(&self) -> usize {
        self.entries
            .values()
            .filter(|e| matches!(e.state, PhaseState::Done | PhaseState::Skipped))
            .count()
    }

    /// Number of phases
    #[must_use]
    pub fn total_count(&self) -> usize {
        self.entries.len()
    }

    /// One line per phase, e.g. `[done] ANALYSIS (12ms)`
    #[must_use]
    pub fn render(&self) -> Vec<String> {
        self.entries
            .iter()
            .map(|(phase, entry)| match entry.elapsed {
                Some(d) => format!("[{}] {phase} ({}ms)", entry.state, d.as_millis()),
                None => format!("[{}] {phase}", entry.state),
            })
            .collect()
    }
}
