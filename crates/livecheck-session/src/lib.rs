//! Runtime for a single liveness-verification session.
//!
//! [`SessionCore`] wires the capture stream, frame sampler, submission
//! pipeline, countdowns and outcome state machine together synchronously;
//! [`SessionRunner`] schedules it on tokio and hands out a [`SessionHandle`]
//! for external commands and read-only snapshots.

pub mod config;
pub mod pipeline;
pub mod runner;
pub mod sampler;
pub mod scorer;
pub mod session;

pub use config::{Config, ConfigError};
pub use pipeline::{SessionMetadata, SubmissionPipeline};
pub use runner::{NullSink, PreviewSink, SessionHandle, SessionOutcome, SessionRunner};
pub use sampler::{FrameSampler, SampledTick, SamplerSettings};
pub use scorer::{HttpScorer, ScoreFuture, Scorer, ScorerError};
pub use session::{FrameOutcome, SessionCore, SessionError, SessionSnapshot};
