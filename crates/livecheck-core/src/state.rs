//! Session outcome state machine.
//!
//! ```text
//! Running ──(success_count == threshold)──▶ Passed ─────────┐
//!    │                                                      ├─(upload ack)─▶ Completed
//!    ├──(soft deadline)──▶ SoftExpiredPendingUpload ────────┘
//!    └──(hard deadline)──▶ HardExpired
//! ```
//!
//! The hard deadline supersedes every phase except `Completed`. Scoring
//! finishing is kept apart from the upload acknowledgment: a session is only
//! certified, and its artifact derived, once the external finalize signal has
//! been observed.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::artifact::SessionSeed;
use crate::liveness::Verdict;

/// Default number of qualifying submissions needed to pass.
pub const DEFAULT_SUCCESS_THRESHOLD: u32 = 5;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum SessionPhase {
    Running,
    Passed,
    HardExpired,
    SoftExpiredPendingUpload,
    Completed,
}

impl SessionPhase {
    /// No transition leads out of a terminal phase.
    pub fn is_terminal(self) -> bool {
        matches!(self, SessionPhase::HardExpired | SessionPhase::Completed)
    }

    pub fn awaits_upload(self) -> bool {
        matches!(
            self,
            SessionPhase::Passed | SessionPhase::SoftExpiredPendingUpload
        )
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionCounters {
    pub frame_tick: u64,
    pub success_count: u32,
    pub has_expired: bool,
    pub has_passed: bool,
}

#[derive(Error, Debug, PartialEq, Eq)]
pub enum StateError {
    #[error("upload acknowledged while session is {0:?}")]
    NotAwaitingUpload(SessionPhase),
}

pub struct SessionStateMachine {
    phase: SessionPhase,
    counters: SessionCounters,
    success_threshold: u32,
    artifact: Option<String>,
}

impl SessionStateMachine {
    pub fn new(success_threshold: u32) -> Self {
        Self {
            phase: SessionPhase::Running,
            counters: SessionCounters::default(),
            success_threshold,
            artifact: None,
        }
    }

    pub fn phase(&self) -> SessionPhase {
        self.phase
    }

    pub fn counters(&self) -> SessionCounters {
        self.counters
    }

    pub fn success_threshold(&self) -> u32 {
        self.success_threshold
    }

    /// The completion artifact, present once the session is `Completed`.
    pub fn artifact(&self) -> Option<&str> {
        self.artifact.as_deref()
    }

    /// Scoring only continues while the session is running.
    pub fn accepts_submissions(&self) -> bool {
        self.phase == SessionPhase::Running
    }

    pub fn advance_frame(&mut self) -> u64 {
        let tick = self.counters.frame_tick;
        self.counters.frame_tick += 1;
        tick
    }

    /// Record the verdict of a resolved submission.
    ///
    /// Verdicts arriving after the session left `Running` (a submission that
    /// was still in flight when a deadline fired) are discarded.
    pub fn record_verdict(&mut self, verdict: Verdict) -> Option<SessionPhase> {
        if !self.accepts_submissions() || !verdict.is_qualifying() {
            return None;
        }
        self.counters.success_count += 1;
        tracing::debug!(
            success_count = self.counters.success_count,
            threshold = self.success_threshold,
            "qualifying submission"
        );
        if self.counters.success_count >= self.success_threshold {
            return self.transition(SessionPhase::Passed);
        }
        None
    }

    pub fn hard_expired(&mut self) -> Option<SessionPhase> {
        if self.phase.is_terminal() {
            return None;
        }
        self.counters.has_expired = true;
        self.transition(SessionPhase::HardExpired)
    }

    pub fn soft_expired(&mut self) -> Option<SessionPhase> {
        if self.phase != SessionPhase::Running {
            return None;
        }
        self.counters.has_expired = true;
        self.transition(SessionPhase::SoftExpiredPendingUpload)
    }

    /// Apply the external upload/finalize signal and derive the artifact.
    pub fn acknowledge_upload(&mut self, seed: &SessionSeed) -> Result<&str, StateError> {
        if !self.phase.awaits_upload() {
            return Err(StateError::NotAwaitingUpload(self.phase));
        }
        self.transition(SessionPhase::Completed);
        Ok(self.artifact.insert(seed.completion_artifact()).as_str())
    }

    /// Debug override: mark a running session as passed.
    pub fn force_pass(&mut self) -> Option<SessionPhase> {
        if self.phase != SessionPhase::Running {
            return None;
        }
        self.transition(SessionPhase::Passed)
    }

    fn transition(&mut self, next: SessionPhase) -> Option<SessionPhase> {
        tracing::info!(from = ?self.phase, to = ?next, "session phase changed");
        if next == SessionPhase::Passed {
            self.counters.has_passed = true;
        }
        self.phase = next;
        Some(next)
    }
}
