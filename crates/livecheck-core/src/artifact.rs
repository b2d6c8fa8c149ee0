//! Completion artifact codec.
//!
//! A session is opened with a base64 seed. Once the session is certified
//! complete, the decoded seed is suffixed with [`COMPLETION_MARKER`] and
//! re-encoded with the same engine; the result is what the subject copies
//! back to the verifying party.

use base64::alphabet;
use base64::engine::{DecodePaddingMode, GeneralPurpose, GeneralPurposeConfig};
use base64::Engine;
use thiserror::Error;

/// Suffix appended to the decoded seed in the completion artifact.
pub const COMPLETION_MARKER: &str = ":liveness-verified";

/// Standard alphabet; padding optional on input, trailing bits tolerated.
const SEED_ENGINE: GeneralPurpose = GeneralPurpose::new(
    &alphabet::STANDARD,
    GeneralPurposeConfig::new()
        .with_decode_padding_mode(DecodePaddingMode::Indifferent)
        .with_decode_allow_trailing_bits(true),
);

#[derive(Error, Debug)]
pub enum ArtifactError {
    #[error("artifact is not valid base64: {0}")]
    Decode(#[from] base64::DecodeError),
}

/// Encode raw bytes with the session codec.
pub fn encode(bytes: &[u8]) -> String {
    SEED_ENGINE.encode(bytes)
}

/// Decode a value produced by [`encode`].
pub fn decode(value: &str) -> Result<Vec<u8>, ArtifactError> {
    Ok(SEED_ENGINE.decode(value)?)
}

/// The session's secret seed, kept in decoded form.
#[derive(Clone, PartialEq, Eq)]
pub struct SessionSeed {
    raw: String,
    decoded: Vec<u8>,
}

impl SessionSeed {
    /// Parse the seed parameter. Values that are not base64 are used verbatim.
    pub fn from_param(raw: &str) -> Self {
        let decoded = match decode(raw) {
            Ok(bytes) => bytes,
            Err(e) => {
                tracing::debug!(error = %e, "seed is not base64, using raw bytes");
                raw.as_bytes().to_vec()
            }
        };
        Self {
            raw: raw.to_string(),
            decoded,
        }
    }

    /// The seed exactly as supplied, used as the scorer's session token.
    pub fn as_param(&self) -> &str {
        &self.raw
    }

    pub fn decoded(&self) -> &[u8] {
        &self.decoded
    }

    /// Derive the completion artifact: `encode(decoded_seed + marker)`.
    pub fn completion_artifact(&self) -> String {
        let mut bytes = self.decoded.clone();
        bytes.extend_from_slice(COMPLETION_MARKER.as_bytes());
        encode(&bytes)
    }
}

impl std::fmt::Debug for SessionSeed {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionSeed")
            .field("len", &self.decoded.len())
            .finish_non_exhaustive()
    }
}

/// Check whether an artifact carries the completion marker, returning the
/// embedded seed bytes.
pub fn verify_artifact(artifact: &str) -> Result<Option<Vec<u8>>, ArtifactError> {
    let bytes = decode(artifact)?;
    Ok(bytes
        .strip_suffix(COMPLETION_MARKER.as_bytes())
        .map(<[u8]>::to_vec))
}
