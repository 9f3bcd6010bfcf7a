/// Availability checks for bulletin candidates.
///
/// A probe is single-use: it reports one outcome through its emitter, or
/// nothing at all if it is released first.
use std::time::Duration;

use thiserror::Error;
use tokio::task::AbortHandle;
use tracing::debug;

use crate::observers::{Emitter, Observed, Release};

#[derive(Debug, Clone, PartialEq)]
pub enum ProbeOutcome {
    Playable,
    Failed(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProbeOutcomeKind {
    Playable,
    Failed,
}

/// "became playable" and "failed".
pub const PROBE_OBSERVERS: [ProbeOutcomeKind; 2] =
    [ProbeOutcomeKind::Playable, ProbeOutcomeKind::Failed];

impl Observed for ProbeOutcome {
    type Kind = ProbeOutcomeKind;

    fn kind(&self) -> ProbeOutcomeKind {
        match self {
            Self::Playable => ProbeOutcomeKind::Playable,
            Self::Failed(_) => ProbeOutcomeKind::Failed,
        }
    }
}

#[derive(Debug, Error, PartialEq)]
pub enum ProbeError {
    #[error("HTTP {0}")]
    Status(u16),
    #[error("not audio ({0})")]
    NotAudio(String),
    #[error("timed out after {0:?}")]
    Timeout(Duration),
    #[error("request failed: {0}")]
    Request(String),
}

pub trait ProbeHandle: Release + Send {}

pub trait Prober: Send {
    fn probe(&mut self, url: &str, observers: Emitter<ProbeOutcome>) -> Box<dyn ProbeHandle>;
}

/// Decide from the response head whether the URL serves playable audio.
pub fn judge(status: u16, content_type: Option<&str>) -> Result<(), ProbeError> {
    if !(200..300).contains(&status) {
        return Err(ProbeError::Status(status));
    }
    match content_type {
        Some(ct) if ct.to_ascii_lowercase().starts_with("text/") => {
            Err(ProbeError::NotAudio(ct.to_string()))
        }
        _ => Ok(()),
    }
}

pub struct HttpProber {
    client: reqwest::Client,
    timeout: Duration,
}

impl HttpProber {
    pub fn new(timeout: Duration) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder()
            .user_agent(concat!("newsdesk/", env!("CARGO_PKG_VERSION")))
            .build()?;
        Ok(Self { client, timeout })
    }
}

async fn check(client: reqwest::Client, url: String, timeout: Duration) -> Result<(), ProbeError> {
    let request = client
        .get(&url)
        .header(reqwest::header::RANGE, "bytes=0-1023")
        .send();
    let resp = tokio::time::timeout(timeout, request)
        .await
        .map_err(|_| ProbeError::Timeout(timeout))?
        .map_err(|e| ProbeError::Request(e.to_string()))?;
    let content_type = resp
        .headers()
        .get(reqwest::header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string);
    judge(resp.status().as_u16(), content_type.as_deref())
}

impl Prober for HttpProber {
    fn probe(&mut self, url: &str, observers: Emitter<ProbeOutcome>) -> Box<dyn ProbeHandle> {
        let client = self.client.clone();
        let timeout = self.timeout;
        let url = url.to_string();
        let task = tokio::spawn(async move {
            let outcome = match check(client, url.clone(), timeout).await {
                Ok(()) => ProbeOutcome::Playable,
                Err(e) => {
                    debug!("probe: {} failed: {}", url, e);
                    ProbeOutcome::Failed(e.to_string())
                }
            };
            observers.emit(outcome);
        });
        Box::new(HttpProbe {
            abort: task.abort_handle(),
        })
    }
}

struct HttpProbe {
    abort: AbortHandle,
}

impl Release for HttpProbe {
    fn release(&mut self) {
        self.abort.abort();
    }
}

impl ProbeHandle for HttpProbe {}
