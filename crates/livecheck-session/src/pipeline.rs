use livecheck_core::{DeviceInfo, ScoreRequest, ScoreResponse, SubmissionResult, Thresholds};
use livecheck_hw::Still;

use crate::scorer::ScorerError;

/// Identity and device context attached to every submission.
#[derive(Debug, Clone)]
pub struct SessionMetadata {
    pub subject_id: String,
    pub session_token: String,
    pub selected_device: Option<DeviceInfo>,
    pub device_list: Vec<DeviceInfo>,
    pub elapsed_seconds: Option<u64>,
}

/// Tracks the single outstanding scoring round-trip and interprets replies.
pub struct SubmissionPipeline {
    thresholds: Thresholds,
    in_flight: Option<u32>,
    last: Option<(SubmissionResult, u32)>,
    submitted: u64,
    failed: u64,
}

impl SubmissionPipeline {
    pub fn new(thresholds: Thresholds) -> Self {
        Self {
            thresholds,
            in_flight: None,
            last: None,
            submitted: 0,
            failed: 0,
        }
    }

    pub fn is_busy(&self) -> bool {
        self.in_flight.is_some()
    }

    /// Build the request for `still`, or `None` while a submission is
    /// already in flight.
    pub fn begin(&mut self, still: &Still, meta: SessionMetadata) -> Option<ScoreRequest> {
        if self.in_flight.is_some() {
            tracing::debug!("submission in flight, dropping still");
            return None;
        }
        self.in_flight = Some(still.width);
        self.submitted += 1;
        Some(ScoreRequest {
            image: still.to_base64(),
            subject_id: meta.subject_id,
            session_token: meta.session_token,
            selected_device: meta.selected_device,
            device_list: meta.device_list,
            elapsed_seconds: meta.elapsed_seconds,
        })
    }

    /// Settle the in-flight submission.
    ///
    /// A failed round-trip leaves the previous result in place and yields
    /// `None`; no result is ever synthesized from a failure.
    pub fn complete(
        &mut self,
        outcome: Result<ScoreResponse, ScorerError>,
    ) -> Option<(SubmissionResult, u32)> {
        let Some(still_width) = self.in_flight.take() else {
            tracing::warn!("scoring reply without a submission in flight, ignoring");
            return None;
        };
        match outcome {
            Ok(response) => {
                let result = SubmissionResult::from_response(response, &self.thresholds);
                tracing::debug!(
                    spoof = result.spoof_score,
                    face_match = result.face_match_score,
                    verdict = ?result.verdict,
                    "submission scored"
                );
                self.last = Some((result.clone(), still_width));
                Some((result, still_width))
            }
            Err(e) => {
                self.failed += 1;
                tracing::warn!(error = %e, "submission failed");
                None
            }
        }
    }

    /// Forget the in-flight submission without interpreting a reply.
    pub fn cancel(&mut self) {
        if self.in_flight.take().is_some() {
            tracing::debug!("in-flight submission abandoned");
        }
    }

    /// The most recent successful result and the still width it was scored at.
    pub fn last(&self) -> Option<&(SubmissionResult, u32)> {
        self.last.as_ref()
    }

    pub fn submitted(&self) -> u64 {
        self.submitted
    }

    pub fn failed(&self) -> u64 {
        self.failed
    }
}
