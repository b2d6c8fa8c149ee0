//! The synchronous heart of a session.
//!
//! [`SessionCore`] owns every per-session component and exposes one method
//! per event source: frame ticks, clock ticks, scoring replies, device
//! selection changes and the external commands. Frame reads, enumeration and
//! encoding may block, so the async runner only calls into it from the
//! blocking pool; tests drive it directly and replay whole sessions tick by
//! tick.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use image::RgbImage;
use livecheck_core::{
    FaceRegion, ScoreRequest, ScoreResponse, SessionClock, SessionCounters, SessionParams,
    SessionPhase, SessionStateMachine, SoftResetPolicy, StateError,
};
use livecheck_hw::{CameraBackend, CameraError, CaptureStream, DeviceRegistry};
use serde::Serialize;
use thiserror::Error;
use uuid::Uuid;

use crate::config::{Config, ConfigError};
use crate::pipeline::{SessionMetadata, SubmissionPipeline};
use crate::sampler::{FrameSampler, SamplerSettings};
use crate::scorer::ScorerError;

#[derive(Error, Debug)]
pub enum SessionError {
    #[error("device error: {0}")]
    Device(#[from] CameraError),
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),
    #[error(transparent)]
    State(#[from] StateError),
    #[error("session task exited")]
    Closed,
    #[error("session worker failed: {0}")]
    Worker(String),
}

/// Read-only view of a session, published to observers.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionSnapshot {
    pub session_id: String,
    pub started_at: DateTime<Utc>,
    pub phase: SessionPhase,
    #[serde(flatten)]
    pub counters: SessionCounters,
    pub success_threshold: u32,
    pub hard_remaining_secs: u64,
    pub soft_remaining_secs: Option<u64>,
    pub spoof_score: Option<f32>,
    pub face_match_score: Option<f32>,
    pub face_region: Option<FaceRegion>,
    pub device: Option<String>,
    pub mirrored: bool,
    pub artifact: Option<String>,
    pub fault: Option<String>,
}

/// What a frame tick produced.
pub struct FrameOutcome {
    pub tick: u64,
    pub preview: Option<RgbImage>,
    /// A still to score; only produced when nothing is in flight.
    pub request: Option<ScoreRequest>,
}

pub struct SessionCore {
    id: Uuid,
    started_at: DateTime<Utc>,
    params: SessionParams,
    registry: Arc<DeviceRegistry>,
    stream: CaptureStream,
    sampler: FrameSampler,
    pipeline: SubmissionPipeline,
    clock: SessionClock,
    machine: SessionStateMachine,
    soft_policy: SoftResetPolicy,
    fault: Option<String>,
}

impl SessionCore {
    /// Assemble a session. Nothing is enumerated or acquired until
    /// [`SessionCore::start`].
    pub fn new(params: SessionParams, config: &Config, backend: Arc<dyn CameraBackend>) -> Self {
        let settings = SamplerSettings {
            still_every: config.still_every,
            still_width: config.still_width,
            still_quality: config.still_quality,
            preview_width: config.preview_width,
        };
        Self {
            id: Uuid::new_v4(),
            started_at: Utc::now(),
            params,
            registry: Arc::new(DeviceRegistry::new(Arc::clone(&backend))),
            stream: CaptureStream::new(backend),
            sampler: FrameSampler::new(settings, config.mirrored),
            pipeline: SubmissionPipeline::new(config.thresholds()),
            clock: SessionClock::start(config.hard_limit_secs, config.soft_limit_secs),
            machine: SessionStateMachine::new(config.success_threshold),
            soft_policy: config.soft_policy,
            fault: None,
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn registry(&self) -> &Arc<DeviceRegistry> {
        &self.registry
    }

    pub fn phase(&self) -> SessionPhase {
        self.machine.phase()
    }

    pub fn counters(&self) -> SessionCounters {
        self.machine.counters()
    }

    pub fn artifact(&self) -> Option<&str> {
        self.machine.artifact()
    }

    pub fn stream(&self) -> &CaptureStream {
        &self.stream
    }

    pub fn pipeline(&self) -> &SubmissionPipeline {
        &self.pipeline
    }

    pub fn fault(&self) -> Option<&str> {
        self.fault.as_deref()
    }

    /// Enumerate devices, apply the initial selection and bind the stream.
    ///
    /// Failures are fatal: the fault is recorded for observers and no
    /// fallback device is tried.
    pub fn start(&mut self, device: Option<&str>) -> Result<(), SessionError> {
        let listed = self
            .registry
            .list_devices()
            .and_then(|_| self.registry.select(device));
        if let Err(e) = listed {
            return Err(self.record_fault(e));
        }
        self.rebind()
    }

    /// Rebind the stream to the registry's current selection.
    pub fn rebind(&mut self) -> Result<(), SessionError> {
        let selected = self.registry.selected_id();
        match self.stream.rebind(selected.as_deref()) {
            Ok(()) => {
                self.fault = None;
                Ok(())
            }
            Err(e) => Err(self.record_fault(e)),
        }
    }

    fn record_fault(&mut self, error: CameraError) -> SessionError {
        tracing::error!(error = %error, "session blocked on device failure");
        self.fault = Some(error.to_string());
        SessionError::Device(error)
    }

    /// True while a scoring reply is still wanted.
    pub fn awaiting_score(&self) -> bool {
        self.pipeline.is_busy()
    }

    pub fn on_frame_tick(&mut self) -> FrameOutcome {
        let tick = self.machine.advance_frame();
        let allow_still =
            self.machine.accepts_submissions() && !self.pipeline.is_busy() && self.fault.is_none();
        let sampled = self.sampler.tick(tick, &mut self.stream, allow_still);

        let request = match sampled.still {
            Some(still) => {
                let meta = self.metadata();
                self.pipeline.begin(&still, meta)
            }
            None => None,
        };
        if request.is_some() {
            tracing::debug!(tick, "still submitted");
        }

        FrameOutcome {
            tick,
            preview: sampled.preview,
            request,
        }
    }

    /// Apply a scoring reply. Returns the new phase if it changed.
    pub fn on_scored(
        &mut self,
        outcome: Result<ScoreResponse, ScorerError>,
    ) -> Option<SessionPhase> {
        let (result, still_width) = self.pipeline.complete(outcome)?;
        self.sampler.set_overlay(result.face_region, still_width);

        if !self.machine.accepts_submissions() {
            tracing::debug!(phase = ?self.phase(), "late verdict discarded");
            return None;
        }
        if self.soft_policy.rearms_on(result.verdict) {
            self.clock.rearm_soft();
            tracing::debug!(verdict = ?result.verdict, "soft deadline re-armed");
        }
        let changed = self.machine.record_verdict(result.verdict);
        self.settle(changed)
    }

    /// Advance both countdowns by one second. The hard deadline is applied
    /// before the soft one when both fire together.
    pub fn on_clock_tick(&mut self) -> Option<SessionPhase> {
        let events = self.clock.tick();
        let mut changed = None;
        if events.hard_fired {
            changed = self.machine.hard_expired().or(changed);
        }
        if events.soft_fired {
            changed = self.machine.soft_expired().or(changed);
        }
        self.settle(changed)
    }

    pub fn acknowledge_upload(&mut self) -> Result<String, StateError> {
        let artifact = self
            .machine
            .acknowledge_upload(&self.params.seed)?
            .to_string();
        self.settle(Some(SessionPhase::Completed));
        Ok(artifact)
    }

    pub fn force_pass(&mut self) -> Option<SessionPhase> {
        let changed = self.machine.force_pass();
        self.settle(changed)
    }

    pub fn set_mirrored(&mut self, mirrored: bool) {
        self.sampler.set_mirrored(mirrored);
    }

    /// Once scoring stops, drop the in-flight submission; once terminal, also
    /// freeze the clock.
    fn settle(&mut self, changed: Option<SessionPhase>) -> Option<SessionPhase> {
        if !self.machine.accepts_submissions() {
            self.pipeline.cancel();
        }
        if self.machine.phase().is_terminal() {
            self.clock.stop();
        }
        changed
    }

    pub fn is_finished(&self) -> bool {
        self.machine.phase().is_terminal()
    }

    /// Cancel both countdowns, abandon any submission and release the stream.
    pub fn teardown(&mut self) {
        self.clock.stop();
        self.pipeline.cancel();
        self.stream.release();
        tracing::info!(phase = ?self.phase(), "session torn down");
    }

    fn metadata(&self) -> SessionMetadata {
        SessionMetadata {
            subject_id: self.params.subject_id.clone(),
            session_token: self.params.seed.as_param().to_string(),
            selected_device: self.registry.active_device().map(|d| d.info()),
            device_list: self
                .registry
                .cached_devices()
                .unwrap_or_default()
                .iter()
                .map(|d| d.info())
                .collect(),
            elapsed_seconds: Some(self.clock.elapsed_secs()),
        }
    }

    pub fn snapshot(&self) -> SessionSnapshot {
        let last = self.pipeline.last().map(|(result, _)| result);
        SessionSnapshot {
            session_id: self.id.to_string(),
            started_at: self.started_at,
            phase: self.machine.phase(),
            counters: self.machine.counters(),
            success_threshold: self.machine.success_threshold(),
            hard_remaining_secs: self.clock.hard().remaining_secs(),
            soft_remaining_secs: self.clock.soft().map(|c| c.remaining_secs()),
            spoof_score: last.map(|r| r.spoof_score),
            face_match_score: last.map(|r| r.face_match_score),
            face_region: last.map(|r| r.face_region),
            device: self.stream.bound_device().map(str::to_string),
            mirrored: self.sampler.mirrored(),
            artifact: self.machine.artifact().map(str::to_string),
            fault: self.fault.clone(),
        }
    }
}
