//! Session logic for unattended liveness verification.
//!
//! Everything here is synchronous and free of I/O: scoring verdicts, the
//! whole-second countdowns, the outcome state machine, the coordinate
//! transforms used to draw face boxes, and the completion-artifact codec.
//! Hardware access lives in `livecheck-hw`; the runtime that drives a live
//! session lives in `livecheck-session`.

pub mod artifact;
pub mod clock;
pub mod geometry;
pub mod liveness;
pub mod params;
pub mod scoring;
pub mod state;

pub use artifact::{ArtifactError, SessionSeed, COMPLETION_MARKER};
pub use clock::{format_mmss, ClockEvents, Countdown, SessionClock};
pub use geometry::{
    fit_to_width, project_to_preview, BoundingBox, Classification, FaceRegion, PixelRect,
};
pub use liveness::{classify, SoftResetPolicy, SubmissionResult, Thresholds, Verdict};
pub use params::SessionParams;
pub use scoring::{DeviceInfo, ScoreRequest, ScoreResponse};
pub use state::{SessionCounters, SessionPhase, SessionStateMachine, StateError};
