//! Client side of the remote scoring service.

use std::future::Future;
use std::pin::Pin;
use std::time::Duration;

use livecheck_core::{ScoreRequest, ScoreResponse};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ScorerError {
    #[error("scoring transport failed: {0}")]
    Transport(String),
    #[error("scoring service returned HTTP {0}")]
    Status(u16),
    #[error("invalid scoring payload: {0}")]
    Decode(#[from] serde_json::Error),
    #[error("scoring task aborted: {0}")]
    Task(String),
}

pub type ScoreFuture = Pin<Box<dyn Future<Output = Result<ScoreResponse, ScorerError>> + Send>>;

/// The scoring collaborator: one still in, one bounding box and two scores
/// out. Retries are the caller's business.
pub trait Scorer: Send + Sync + 'static {
    fn score(&self, request: ScoreRequest) -> ScoreFuture;
}

/// Scorer backed by a single HTTP POST per still.
///
/// The blocking HTTP client runs on tokio's blocking pool.
pub struct HttpScorer {
    agent: ureq::Agent,
    url: String,
}

impl HttpScorer {
    pub fn new(url: impl Into<String>, timeout: Duration) -> Self {
        let agent: ureq::Agent = ureq::Agent::config_builder()
            .timeout_global(Some(timeout))
            .build()
            .into();
        Self {
            agent,
            url: url.into(),
        }
    }

    pub fn url(&self) -> &str {
        &self.url
    }
}

impl Scorer for HttpScorer {
    fn score(&self, request: ScoreRequest) -> ScoreFuture {
        let agent = self.agent.clone();
        let url = self.url.clone();
        Box::pin(async move {
            let body = request.to_body()?;
            tokio::task::spawn_blocking(move || post(&agent, &url, body))
                .await
                .map_err(|e| ScorerError::Task(e.to_string()))?
        })
    }
}

fn post(agent: &ureq::Agent, url: &str, body: String) -> Result<ScoreResponse, ScorerError> {
    let started = std::time::Instant::now();
    let mut resp = agent
        .post(url)
        .header("Content-Type", "application/json")
        .send(body.as_bytes())
        .map_err(|e| match e {
            ureq::Error::StatusCode(code) => ScorerError::Status(code),
            other => ScorerError::Transport(other.to_string()),
        })?;

    let text = resp
        .body_mut()
        .read_to_string()
        .map_err(|e| ScorerError::Transport(e.to_string()))?;
    tracing::debug!(
        elapsed_ms = started.elapsed().as_millis() as u64,
        bytes = text.len(),
        "scoring response received"
    );
    Ok(ScoreResponse::from_json(&text)?)
}
