//! # Fallback Source
//!
//! A retry cursor over a candidate URL list. Media consumers (audio players,
//! image elements) hold one `FallbackSource` each and call [`FallbackSource::advance`]
//! whenever the current URL fails to load, instead of keeping their own
//! index bookkeeping.
//!
//! Candidates are always tried strictly in order, one at a time.

use std::fmt;
use std::future::Future;

use tracing::{debug, warn};

use crate::{FailedAttempt, GatewayError};

/// Passed to the exhaustion callback once every candidate has failed
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExhaustedReport {
    /// Every candidate that was attempted, in order
    pub attempted: Vec<String>,
}

type ExhaustedCallback = Box<dyn FnMut(&ExhaustedReport) + Send + 'static>;

pub struct FallbackSource {
    candidates: Vec<String>,
    index: usize,
    exhausted: bool,
    on_exhausted: Option<ExhaustedCallback>,
}

impl FallbackSource {
    /// Create a source positioned at the first candidate.
    ///
    /// An empty candidate list starts out exhausted and never reports.
    pub fn new(candidates: Vec<String>) -> Self {
        let exhausted = candidates.is_empty();
        Self {
            candidates,
            index: 0,
            exhausted,
            on_exhausted: None,
        }
    }

    /// Register the callback fired when the last candidate fails
    pub fn on_exhausted<F>(mut self, callback: F) -> Self
    where
        F: FnMut(&ExhaustedReport) + Send + 'static,
    {
        self.on_exhausted = Some(Box::new(callback));
        self
    }

    /// The URL to load now, or `None` once exhausted
    pub fn current(&self) -> Option<&str> {
        if self.exhausted {
            return None;
        }
        self.candidates.get(self.index).map(String::as_str)
    }

    pub fn index(&self) -> usize {
        self.index
    }

    pub fn candidates(&self) -> &[String] {
        &self.candidates
    }

    pub fn is_exhausted(&self) -> bool {
        self.exhausted
    }

    /// Record a load failure of the current candidate and move to the next.
    ///
    /// Returns the next URL to load. Failing past the last candidate marks
    /// the source exhausted and fires the exhaustion callback exactly once.
    pub fn advance(&mut self) -> Option<&str> {
        if self.exhausted {
            return None;
        }

        if self.index + 1 < self.candidates.len() {
            self.index += 1;
            debug!(
                index = self.index,
                url = %self.candidates[self.index],
                "Advancing to next candidate"
            );
            return self.current();
        }

        self.exhausted = true;
        warn!(
            attempted = self.candidates.len(),
            "All candidate URLs failed"
        );
        if let Some(callback) = self.on_exhausted.as_mut() {
            let report = ExhaustedReport {
                attempted: self.candidates.clone(),
            };
            callback(&report);
        }
        None
    }

    /// Start over with a new candidate list, keeping the callback
    pub fn reset(&mut self, candidates: Vec<String>) {
        self.exhausted = candidates.is_empty();
        self.candidates = candidates;
        self.index = 0;
    }

    /// Drive `attempt` over the candidates from the current position until
    /// one succeeds.
    ///
    /// Returns the winning URL with its value, or [`GatewayError::Exhausted`]
    /// carrying every per-candidate failure.
    pub async fn resolve_first<F, Fut, T, E>(
        &mut self,
        mut attempt: F,
    ) -> Result<(String, T), GatewayError>
    where
        F: FnMut(String) -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: fmt::Display,
    {
        let mut failures = Vec::new();

        while let Some(url) = self.current().map(str::to_owned) {
            match attempt(url.clone()).await {
                Ok(value) => return Ok((url, value)),
                Err(e) => {
                    warn!(url = %url, error = %e, "Candidate failed");
                    failures.push(FailedAttempt {
                        url,
                        error: e.to_string(),
                    });
                    self.advance();
                }
            }
        }

        Err(GatewayError::Exhausted { attempts: failures })
    }
}

impl fmt::Debug for FallbackSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FallbackSource")
            .field("candidates", &self.candidates)
            .field("index", &self.index)
            .field("exhausted", &self.exhausted)
            .field("on_exhausted", &self.on_exhausted.is_some())
            .finish()
    }
}
