//! Gemini oracle implementation using the `generateContent` REST API.

use std::fmt::Write as _;

use serde::{Deserialize, Serialize};

use super::{
    check_http_response, strip_code_fences, OracleError, RemediationOracle, RepairOutcome,
    RepairRequest,
};

const GEMINI_API_BASE: &str = "https://generativelanguage.googleapis.com/v1beta";
const DEFAULT_MODEL: &str = "gemini-2.0-flash";

/// Sentinel the oracle returns when the manifest already fits its role.
const NO_CHANGES_SENTINEL: &str = "NO_CHANGES";

/// Character budget for YAML sections embedded in prompts.
const SECTION_CHAR_LIMIT: usize = 2000;

// ---------------------------------------------------------------------------
// Wire types (pub for integration testing)
// ---------------------------------------------------------------------------

/// Gemini `generateContent` request body.
#[doc(hidden)]
#[derive(Debug, Serialize)]
pub struct GenerateRequest {
    /// Conversation contents; a single user turn for this oracle.
    pub contents: Vec<RequestContent>,
}

/// One content entry of a request.
#[doc(hidden)]
#[derive(Debug, Serialize)]
pub struct RequestContent {
    /// Content parts.
    pub parts: Vec<RequestPart>,
}

/// One part of a request content entry.
#[doc(hidden)]
#[derive(Debug, Serialize)]
pub struct RequestPart {
    /// Prompt text.
    pub text: String,
}

/// Gemini `generateContent` response body.
#[doc(hidden)]
#[derive(Debug, Deserialize)]
pub struct GenerateResponse {
    /// Response candidates; the first one is used.
    #[serde(default)]
    pub candidates: Vec<Candidate>,
}

/// One response candidate.
#[doc(hidden)]
#[derive(Debug, Deserialize)]
pub struct Candidate {
    /// Candidate content.
    pub content: Option<CandidateContent>,
}

/// Content of a response candidate.
#[doc(hidden)]
#[derive(Debug, Deserialize)]
pub struct CandidateContent {
    /// Content parts.
    #[serde(default)]
    pub parts: Vec<ResponsePart>,
}

/// One part of a candidate's content.
#[doc(hidden)]
#[derive(Debug, Deserialize)]
pub struct ResponsePart {
    /// Generated text, absent for non-text parts.
    pub text: Option<String>,
}

// ---------------------------------------------------------------------------
// Request / response builders (pub for integration testing)
// ---------------------------------------------------------------------------

/// Build a single-turn `generateContent` request.
#[doc(hidden)]
pub fn build_generate_request(prompt: &str) -> GenerateRequest {
    GenerateRequest {
        contents: vec![RequestContent {
            parts: vec![RequestPart {
                text: prompt.to_owned(),
            }],
        }],
    }
}

/// Extract the first candidate's text from a response body.
#[doc(hidden)]
pub fn parse_generate_response(body: &str) -> Result<String, OracleError> {
    let response: GenerateResponse =
        serde_json::from_str(body).map_err(|err| OracleError::Parse(err.to_string()))?;
    let text = response
        .candidates
        .into_iter()
        .next()
        .and_then(|candidate| candidate.content)
        .and_then(|content| content.parts.into_iter().next())
        .and_then(|part| part.text)
        .unwrap_or_default();
    if text.trim().is_empty() {
        return Err(OracleError::Parse("empty response from oracle".to_owned()));
    }
    Ok(text.trim().to_owned())
}

/// Build the repair instruction for one fixture bundle.
#[doc(hidden)]
pub fn build_repair_prompt(request: &RepairRequest) -> String {
    let mut prompt = String::new();

    prompt.push_str("# Context\n");
    prompt.push_str("You are a Kubernetes expert maintaining a policy compliance benchmark.\n");
    prompt.push_str(
        "We have a set of manifests used to test admission policy constraints. \
         Your task is to repair a specific manifest to either satisfy or violate \
         a constraint, as requested.\n\n",
    );

    prompt.push_str("# Goal\n");
    let _ = writeln!(prompt, "Policy: {}", request.policy_id);
    let _ = writeln!(prompt, "Target role: {}", request.role.label());
    prompt.push_str("1. Ensure the manifest fulfills the target role.\n");
    prompt.push_str("2. Keep the manifest a valid Kubernetes object.\n\n");

    prompt.push_str("# Instructions\n");
    prompt.push_str("Keep metadata.name and all labels unchanged.\n");
    prompt.push_str("Do not change kind, apiVersion, or container names.\n");
    prompt.push_str(
        "Prefer the smallest possible resource values (cpu: 1m, memory: 1Mi) \
         while satisfying the constraint.\n",
    );
    prompt.push_str("Do not add or remove containers unless required to satisfy the policy.\n");
    prompt.push_str("Return ONLY the full updated YAML for the manifest. Do not return a diff.\n");
    let _ = writeln!(
        prompt,
        "If the manifest already satisfies the role, respond with {NO_CHANGES_SENTINEL}.",
    );
    prompt.push('\n');

    if !request.description.trim().is_empty() {
        let _ = writeln!(prompt, "Policy description: {}\n", request.description.trim());
    }
    push_yaml_section(&mut prompt, "Constraint", &request.constraint);
    push_yaml_section(&mut prompt, "Target manifest", &request.manifest);

    prompt.trim().to_owned()
}

/// Build the policy-description instruction.
#[doc(hidden)]
pub fn build_describe_prompt(constraint: &str) -> String {
    format!(
        "Describe this constraint policy in plain English. Be concise (2-3 \
         sentences). Focus on what the policy requires or forbids. Don't \
         mention Gatekeeper or Kubernetes jargon.\n\n{constraint}"
    )
}

/// Interpret oracle repair output: fence-stripped text or the sentinel.
#[doc(hidden)]
pub fn parse_repair_text(text: &str) -> RepairOutcome {
    let cleaned = strip_code_fences(text);
    if cleaned.to_uppercase().contains(NO_CHANGES_SENTINEL) {
        return RepairOutcome::NoChanges;
    }
    RepairOutcome::Repaired(cleaned)
}

fn push_yaml_section(prompt: &mut String, title: &str, raw: &str) {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return;
    }
    let _ = writeln!(
        prompt,
        "{title}:\n```yaml\n{}\n```\n",
        truncate_chars(trimmed, SECTION_CHAR_LIMIT)
    );
}

fn truncate_chars(text: &str, limit: usize) -> String {
    if text.chars().count() <= limit {
        return text.to_owned();
    }
    let shortened: String = text.chars().take(limit).collect();
    format!("{shortened}\n... (truncated)")
}

// ---------------------------------------------------------------------------
// Oracle
// ---------------------------------------------------------------------------

/// Gemini `generateContent` oracle.
#[derive(Debug, Clone)]
pub struct GeminiOracle {
    model: String,
    api_key: String,
    base_url: String,
    client: reqwest::Client,
}

impl GeminiOracle {
    /// Create an oracle for the given model and API key.
    pub fn new(model: impl Into<String>, api_key: impl Into<String>) -> Self {
        Self::with_base_url(model, api_key, GEMINI_API_BASE)
    }

    /// Create an oracle pointed at an alternate endpoint.
    pub fn with_base_url(
        model: impl Into<String>,
        api_key: impl Into<String>,
        base_url: impl Into<String>,
    ) -> Self {
        let mut model = model.into();
        if model.is_empty() {
            model = DEFAULT_MODEL.to_owned();
        }
        Self {
            model,
            api_key: api_key.into(),
            base_url: base_url.into(),
            client: reqwest::Client::new(),
        }
    }

    /// The model identifier this oracle is instantiated for.
    pub fn model_id(&self) -> &str {
        &self.model
    }

    async fn generate(&self, prompt: &str) -> Result<String, OracleError> {
        if self.api_key.is_empty() {
            return Err(OracleError::Unavailable("API key not configured".to_owned()));
        }
        let url = format!(
            "{}/models/{}:generateContent?key={}",
            self.base_url, self.model, self.api_key
        );
        let response = self
            .client
            .post(&url)
            .json(&build_generate_request(prompt))
            .send()
            .await?;
        let body = check_http_response(response).await?;
        parse_generate_response(&body)
    }
}

#[async_trait::async_trait]
impl RemediationOracle for GeminiOracle {
    async fn repair(&self, request: RepairRequest) -> Result<RepairOutcome, OracleError> {
        let text = self.generate(&build_repair_prompt(&request)).await?;
        Ok(parse_repair_text(&text))
    }

    async fn describe(&self, constraint: &str) -> Result<String, OracleError> {
        self.generate(&build_describe_prompt(constraint)).await
    }
}
