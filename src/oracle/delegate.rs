//! Oracle delegation with pacing, timeout, and fallback.
//!
//! The delegate is the only component allowed to talk to an oracle. It
//! enforces a minimum inter-call delay (a scheduling policy of the
//! orchestrator, not a property of any document), bounds every call with a
//! timeout, and on any failure returns the input bundle unchanged — a
//! sample is never aborted because the oracle misbehaved.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::{debug, warn};

use crate::manifest::parse::parse_bundle;

use super::{RemediationOracle, RepairOutcome, RepairRequest};

/// Delegation timing knobs.
#[derive(Debug, Clone, Copy)]
pub struct DelegateConfig {
    /// Upper bound for one oracle call.
    pub timeout: Duration,
    /// Minimum delay enforced before each oracle call.
    pub min_call_interval: Duration,
}

impl Default for DelegateConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(30),
            min_call_interval: Duration::from_millis(500),
        }
    }
}

/// What the delegation stage did with a bundle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Disposition {
    /// The oracle supplied a replacement bundle that passed re-parse.
    Repaired,
    /// The oracle reported the bundle already fits its role.
    NoChanges,
    /// The oracle failed or returned unusable output; input kept.
    Fallback(String),
}

/// Result of delegating one bundle.
#[derive(Debug, Clone)]
pub struct Delegation {
    /// The bundle text to carry forward.
    pub manifest: String,
    /// How the result came about.
    pub disposition: Disposition,
}

/// Wraps a [`RemediationOracle`] with the delegation policy.
pub struct OracleDelegate {
    oracle: Arc<dyn RemediationOracle>,
    config: DelegateConfig,
    last_call: Mutex<Option<Instant>>,
}

impl OracleDelegate {
    /// Create a delegate over an oracle.
    pub fn new(oracle: Arc<dyn RemediationOracle>, config: DelegateConfig) -> Self {
        Self {
            oracle,
            config,
            last_call: Mutex::new(None),
        }
    }

    /// Delegate one bundle for repair.
    ///
    /// The returned manifest is the oracle's replacement when it is usable,
    /// otherwise the input unchanged. Oracle output is untrusted text: it
    /// must survive a re-parse into at least one document to be accepted.
    pub async fn remediate(&self, request: RepairRequest) -> Delegation {
        let original = request.manifest.clone();
        self.pace().await;

        let outcome = tokio::time::timeout(self.config.timeout, self.oracle.repair(request)).await;
        match outcome {
            Err(_) => self.fallback(original, "oracle call timed out"),
            Ok(Err(err)) => self.fallback(original, &err.to_string()),
            Ok(Ok(RepairOutcome::NoChanges)) => Delegation {
                manifest: original,
                disposition: Disposition::NoChanges,
            },
            Ok(Ok(RepairOutcome::Repaired(text))) => {
                if text.trim() == original.trim() {
                    return Delegation {
                        manifest: original,
                        disposition: Disposition::NoChanges,
                    };
                }
                if parse_bundle(&text).is_empty() {
                    return self.fallback(original, "oracle returned unparseable manifest");
                }
                debug!("accepted oracle replacement bundle");
                Delegation {
                    manifest: text,
                    disposition: Disposition::Repaired,
                }
            }
        }
    }

    /// Ask the oracle for a policy description, falling back on failure.
    pub async fn describe(&self, constraint: &str, fallback: &str) -> String {
        self.pace().await;
        let outcome = tokio::time::timeout(self.config.timeout, self.oracle.describe(constraint));
        match outcome.await {
            Ok(Ok(description)) if !description.trim().is_empty() => {
                description.trim().to_owned()
            }
            Ok(Ok(_)) => fallback.to_owned(),
            Ok(Err(err)) => {
                warn!(error = %err, "policy description failed, using fallback");
                fallback.to_owned()
            }
            Err(_) => {
                warn!("policy description timed out, using fallback");
                fallback.to_owned()
            }
        }
    }

    fn fallback(&self, manifest: String, reason: &str) -> Delegation {
        warn!(reason, "oracle delegation fell back to input bundle");
        Delegation {
            manifest,
            disposition: Disposition::Fallback(reason.to_owned()),
        }
    }

    /// Sleep out the remainder of the minimum inter-call interval.
    async fn pace(&self) {
        if self.config.min_call_interval.is_zero() {
            return;
        }
        let mut last = self.last_call.lock().await;
        if let Some(previous) = *last {
            let remaining = self
                .config
                .min_call_interval
                .saturating_sub(previous.elapsed());
            if !remaining.is_zero() {
                tokio::time::sleep(remaining).await;
            }
        }
        *last = Some(Instant::now());
    }
}
