//! Gemini oracle wire format tests.

use gatebench::oracle::gemini::{
    build_describe_prompt, build_generate_request, build_repair_prompt, parse_generate_response,
    parse_repair_text,
};
use gatebench::oracle::{ComplianceRole, OracleError, RepairOutcome, RepairRequest};
use serde_json::json;

fn repair_request() -> RepairRequest {
    RepairRequest {
        manifest: "kind: Pod\nmetadata:\n  name: resource-beta\n".to_owned(),
        policy_id: "general/containerlimits".to_owned(),
        description: "Containers must declare memory limits.".to_owned(),
        constraint: "kind: K8sContainerLimits\n".to_owned(),
        role: ComplianceRole::MustViolate,
    }
}

#[test]
fn generate_request_wraps_prompt_in_single_turn() {
    let request = build_generate_request("hello");
    let body = serde_json::to_value(&request).expect("should serialize");
    assert_eq!(body["contents"][0]["parts"][0]["text"], "hello");
}

#[test]
fn parse_response_returns_first_candidate_text() {
    let body = json!({
        "candidates": [
            {"content": {"parts": [{"text": "  kind: Pod\n  "}]}},
            {"content": {"parts": [{"text": "ignored"}]}}
        ]
    });
    let text = parse_generate_response(&body.to_string()).expect("should parse");
    assert_eq!(text, "kind: Pod");
}

#[test]
fn parse_response_rejects_empty_candidates() {
    let body = json!({"candidates": []});
    let result = parse_generate_response(&body.to_string());
    assert!(matches!(result, Err(OracleError::Parse(_))));
}

#[test]
fn parse_response_rejects_blank_text() {
    let body = json!({
        "candidates": [{"content": {"parts": [{"text": "   "}]}}]
    });
    let result = parse_generate_response(&body.to_string());
    assert!(matches!(result, Err(OracleError::Parse(_))));
}

#[test]
fn parse_response_rejects_malformed_json() {
    let result = parse_generate_response("not json");
    assert!(matches!(result, Err(OracleError::Parse(_))));
}

#[test]
fn repair_prompt_carries_role_policy_and_manifest() {
    let prompt = build_repair_prompt(&repair_request());
    assert!(prompt.contains("beta (must violate)"));
    assert!(prompt.contains("general/containerlimits"));
    assert!(prompt.contains("Containers must declare memory limits."));
    assert!(prompt.contains("kind: K8sContainerLimits"));
    assert!(prompt.contains("name: resource-beta"));
    assert!(prompt.contains("NO_CHANGES"));
}

#[test]
fn repair_prompt_truncates_oversized_sections() {
    let mut request = repair_request();
    request.manifest = "x".repeat(5000);
    let prompt = build_repair_prompt(&request);
    assert!(prompt.contains("... (truncated)"));
    assert!(prompt.len() < 5000);
}

#[test]
fn describe_prompt_embeds_constraint() {
    let prompt = build_describe_prompt("kind: K8sRequiredLabels\n");
    assert!(prompt.contains("plain English"));
    assert!(prompt.contains("kind: K8sRequiredLabels"));
}

#[test]
fn repair_text_strips_code_fences() {
    let outcome = parse_repair_text("```yaml\nkind: Pod\nmetadata:\n  name: x\n```");
    match outcome {
        RepairOutcome::Repaired(text) => {
            assert!(text.starts_with("kind: Pod"));
            assert!(!text.contains("```"));
        }
        RepairOutcome::NoChanges => panic!("expected a repaired bundle"),
    }
}

#[test]
fn repair_text_detects_no_changes_sentinel() {
    assert_eq!(parse_repair_text("NO_CHANGES"), RepairOutcome::NoChanges);
    assert_eq!(
        parse_repair_text("```\nno_changes\n```"),
        RepairOutcome::NoChanges
    );
}
