//! Liveness verdicts from remote scores.
//!
//! The scoring service returns two independent scores per still:
//!
//! - `spoof_score` in `[0, 1]`: likelihood that the subject is a photo,
//!   screen replay or mask. Lower is more live.
//! - `face_match_score` in `[0, 1]`: distance to the enrolled identity.
//!   Lower is a closer match.
//!
//! A still *qualifies* only when both scores fall strictly below their
//! thresholds. Non-qualifying stills are further split by whether the face
//! match failed, since a missing or unrecognised face is what re-arms the
//! soft countdown.

use serde::{Deserialize, Serialize};

use crate::geometry::{Classification, FaceRegion};
use crate::scoring::ScoreResponse;

/// Default spoof threshold; scores at or above it are treated as spoofed.
pub const DEFAULT_SPOOF_THRESHOLD: f32 = 0.3;

/// Default face-match threshold; scores at or above it are "not matched".
pub const DEFAULT_FACE_MATCH_THRESHOLD: f32 = 0.7;

/// Fixed thresholds applied to every submission in a session.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Thresholds {
    pub spoof: f32,
    pub face_match: f32,
}

impl Default for Thresholds {
    fn default() -> Self {
        Self {
            spoof: DEFAULT_SPOOF_THRESHOLD,
            face_match: DEFAULT_FACE_MATCH_THRESHOLD,
        }
    }
}

/// Outcome class of a single scored still.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Verdict {
    /// Both scores cleared their thresholds.
    Qualifying,
    /// The face was not confidently matched to the subject.
    LowMatch,
    /// The face matched but looked spoofed.
    Spoofed,
}

impl Verdict {
    pub fn is_qualifying(self) -> bool {
        matches!(self, Verdict::Qualifying)
    }

    pub fn classification(self) -> Classification {
        match self {
            Verdict::Qualifying => Classification::ProbableLive,
            Verdict::LowMatch | Verdict::Spoofed => Classification::ProbableSpoof,
        }
    }
}

/// Which non-qualifying verdicts re-arm the soft countdown.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum SoftResetPolicy {
    /// Only verdicts where the face match failed.
    #[default]
    LowMatch,
    /// Every non-qualifying verdict.
    AnyFailure,
}

impl SoftResetPolicy {
    pub fn rearms_on(self, verdict: Verdict) -> bool {
        match (self, verdict) {
            (_, Verdict::Qualifying) => false,
            (SoftResetPolicy::LowMatch, Verdict::LowMatch) => true,
            (SoftResetPolicy::LowMatch, Verdict::Spoofed) => false,
            (SoftResetPolicy::AnyFailure, _) => true,
        }
    }
}

impl std::str::FromStr for SoftResetPolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "low-match" => Ok(SoftResetPolicy::LowMatch),
            "any-failure" => Ok(SoftResetPolicy::AnyFailure),
            other => Err(format!("unknown soft reset policy '{other}'")),
        }
    }
}

/// Classify a pair of scores against the thresholds.
pub fn classify(spoof_score: f32, face_match_score: f32, thresholds: &Thresholds) -> Verdict {
    if face_match_score >= thresholds.face_match {
        Verdict::LowMatch
    } else if spoof_score >= thresholds.spoof {
        Verdict::Spoofed
    } else {
        Verdict::Qualifying
    }
}

/// A scored still, ready for display and bookkeeping.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubmissionResult {
    pub face_region: FaceRegion,
    pub spoof_score: f32,
    pub face_match_score: f32,
    pub verdict: Verdict,
    pub raw_response: ScoreResponse,
}

impl SubmissionResult {
    pub fn from_response(response: ScoreResponse, thresholds: &Thresholds) -> Self {
        let verdict = classify(response.spoof_score, response.face_match_score, thresholds);
        Self {
            face_region: FaceRegion {
                bbox: response.bounding_box,
                classification: verdict.classification(),
            },
            spoof_score: response.spoof_score,
            face_match_score: response.face_match_score,
            verdict,
            raw_response: response,
        }
    }
}
