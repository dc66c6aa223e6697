//! Remediation oracle abstraction layer.
//!
//! Some corrections need judgment no fixed rule can express — picking an
//! image tag that keeps a violating fixture violating, for instance. Those
//! are delegated to an external oracle behind the [`RemediationOracle`]
//! trait so the deterministic core stays testable without a network.
//!
//! One oracle is implemented: [`gemini::GeminiOracle`] over the Google
//! `generateContent` REST API. The [`delegate::OracleDelegate`] wraps any
//! oracle with pacing, a bounded timeout, and fallback-to-input on failure.

use async_trait::async_trait;
use regex::Regex;

pub mod delegate;
pub mod gemini;

// ---------------------------------------------------------------------------
// Core types
// ---------------------------------------------------------------------------

/// The compliance outcome a bundle must preserve through repair.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ComplianceRole {
    /// The fixture must stay compliant with the policy.
    MustComply,
    /// The fixture must keep violating the policy.
    MustViolate,
}

impl ComplianceRole {
    /// Human-readable role label used in oracle instructions.
    pub fn label(self) -> &'static str {
        match self {
            Self::MustComply => "alpha (must be compliant)",
            Self::MustViolate => "beta (must violate)",
        }
    }
}

/// A request to an oracle to repair one fixture bundle.
#[derive(Debug, Clone)]
pub struct RepairRequest {
    /// The neutralized, locally-remediated bundle text.
    pub manifest: String,
    /// Identifier of the policy the fixture belongs to.
    pub policy_id: String,
    /// Natural-language description of the policy.
    pub description: String,
    /// The constraint document text, for context.
    pub constraint: String,
    /// Whether the bundle must remain compliant or violating.
    pub role: ComplianceRole,
}

/// The oracle's verdict on a repair request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RepairOutcome {
    /// A full replacement bundle. Untrusted text: callers must re-parse.
    Repaired(String),
    /// The input already satisfies its role.
    NoChanges,
}

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

/// Errors returned by oracle implementations.
#[derive(Debug, thiserror::Error)]
pub enum OracleError {
    /// HTTP transport failure.
    #[error("oracle request failed: {0}")]
    Request(#[from] reqwest::Error),
    /// Upstream service responded with an error status.
    #[error("oracle returned non-success status {status}: {body}")]
    HttpStatus {
        /// HTTP status code.
        status: u16,
        /// Sanitized response body.
        body: String,
    },
    /// Response did not match the expected schema.
    #[error("oracle response parse error: {0}")]
    Parse(String),
    /// Oracle cannot serve requests with the current configuration.
    #[error("oracle unavailable: {0}")]
    Unavailable(String),
}

// ---------------------------------------------------------------------------
// Trait
// ---------------------------------------------------------------------------

/// External remediation capability.
///
/// Implementations must be `Send + Sync`; the pipeline holds them behind a
/// shared handle. The oracle is expected, but not guaranteed, to preserve
/// the requested compliance outcome — callers own the fallback.
#[async_trait]
pub trait RemediationOracle: Send + Sync {
    /// Ask the oracle for a corrected bundle.
    ///
    /// # Errors
    ///
    /// Returns [`OracleError`] on transport, status, or parse failure.
    async fn repair(&self, request: RepairRequest) -> Result<RepairOutcome, OracleError>;

    /// Ask the oracle for a concise natural-language policy description.
    ///
    /// # Errors
    ///
    /// Returns [`OracleError`] on transport, status, or parse failure.
    async fn describe(&self, constraint: &str) -> Result<String, OracleError>;
}

// ---------------------------------------------------------------------------
// HTTP helpers
// ---------------------------------------------------------------------------

/// Check HTTP response status and return body text or a structured error.
///
/// # Errors
///
/// Returns `OracleError::Request` on transport failure and
/// `OracleError::HttpStatus` with a sanitized body on non-2xx.
pub async fn check_http_response(response: reqwest::Response) -> Result<String, OracleError> {
    let status = response.status();
    let body = response.text().await?;
    if !status.is_success() {
        return Err(OracleError::HttpStatus {
            status: status.as_u16(),
            body: sanitize_http_error_body(&body),
        });
    }
    Ok(body)
}

/// Collapse, redact, and truncate an upstream error body.
///
/// The API key travels as a query parameter, so error bodies that echo the
/// request URL must never reach logs unredacted.
fn sanitize_http_error_body(raw: &str) -> String {
    let collapsed = raw.split_whitespace().collect::<Vec<_>>().join(" ");

    let mut sanitized = collapsed;
    if let Ok(regex) = Regex::new(r"key=[A-Za-z0-9_\-]+") {
        sanitized = regex.replace_all(&sanitized, "key=[REDACTED]").into_owned();
    }

    const MAX_ERROR_BODY_CHARS: usize = 256;
    if sanitized.chars().count() > MAX_ERROR_BODY_CHARS {
        let shortened = sanitized
            .chars()
            .take(MAX_ERROR_BODY_CHARS)
            .collect::<String>();
        return format!("{shortened}...[truncated]");
    }

    sanitized
}

// ---------------------------------------------------------------------------
// Output cleanup
// ---------------------------------------------------------------------------

/// Strip a surrounding markdown code fence from oracle output.
///
/// Oracles are instructed to return bare YAML but routinely wrap it anyway.
pub fn strip_code_fences(text: &str) -> String {
    let trimmed = text.trim();
    if !trimmed.starts_with("```") {
        return trimmed.to_owned();
    }
    let mut lines: Vec<&str> = trimmed.lines().collect();
    if lines.first().is_some_and(|line| line.starts_with("```")) {
        lines.remove(0);
    }
    if lines.last().is_some_and(|line| line.starts_with("```")) {
        lines.pop();
    }
    lines.join("\n").trim().to_owned()
}
