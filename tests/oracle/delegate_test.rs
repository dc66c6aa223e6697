//! Oracle delegation policy tests — fallback, timeout, pacing.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use gatebench::oracle::delegate::{DelegateConfig, Disposition, OracleDelegate};
use gatebench::oracle::{
    ComplianceRole, OracleError, RemediationOracle, RepairOutcome, RepairRequest,
};
use tokio::sync::Mutex;
use tokio::time::Instant;

const INPUT: &str = "kind: Pod\nmetadata:\n  name: resource-beta\n";
const REPLACEMENT: &str = "kind: Pod\nmetadata:\n  name: resource-beta\n  labels:\n    tier: web\n";

fn request() -> RepairRequest {
    RepairRequest {
        manifest: INPUT.to_owned(),
        policy_id: "general/containerlimits".to_owned(),
        description: "Containers must declare limits.".to_owned(),
        constraint: "kind: K8sContainerLimits\n".to_owned(),
        role: ComplianceRole::MustViolate,
    }
}

fn config(timeout_ms: u64, interval_ms: u64) -> DelegateConfig {
    DelegateConfig {
        timeout: Duration::from_millis(timeout_ms),
        min_call_interval: Duration::from_millis(interval_ms),
    }
}

/// Scripted oracle that records call times.
struct FakeOracle {
    repair_response: Result<RepairOutcome, OracleError>,
    call_instants: Mutex<Vec<Instant>>,
}

impl FakeOracle {
    fn repairing(outcome: RepairOutcome) -> Self {
        Self {
            repair_response: Ok(outcome),
            call_instants: Mutex::new(Vec::new()),
        }
    }

    fn failing(message: &str) -> Self {
        Self {
            repair_response: Err(OracleError::Unavailable(message.to_owned())),
            call_instants: Mutex::new(Vec::new()),
        }
    }
}

#[async_trait]
impl RemediationOracle for FakeOracle {
    async fn repair(&self, _request: RepairRequest) -> Result<RepairOutcome, OracleError> {
        self.call_instants.lock().await.push(Instant::now());
        match &self.repair_response {
            Ok(outcome) => Ok(outcome.clone()),
            Err(_) => Err(OracleError::Unavailable("scripted failure".to_owned())),
        }
    }

    async fn describe(&self, _constraint: &str) -> Result<String, OracleError> {
        match &self.repair_response {
            Ok(_) => Ok("Scripted description.".to_owned()),
            Err(_) => Err(OracleError::Unavailable("scripted failure".to_owned())),
        }
    }
}

/// Oracle that never answers; exercises the timeout path.
struct HangingOracle;

#[async_trait]
impl RemediationOracle for HangingOracle {
    async fn repair(&self, _request: RepairRequest) -> Result<RepairOutcome, OracleError> {
        std::future::pending().await
    }

    async fn describe(&self, _constraint: &str) -> Result<String, OracleError> {
        std::future::pending().await
    }
}

#[tokio::test]
async fn accepts_parseable_replacement() {
    let oracle = Arc::new(FakeOracle::repairing(RepairOutcome::Repaired(
        REPLACEMENT.to_owned(),
    )));
    let delegate = OracleDelegate::new(oracle, config(1_000, 0));

    let delegation = delegate.remediate(request()).await;
    assert_eq!(delegation.manifest, REPLACEMENT);
    assert_eq!(delegation.disposition, Disposition::Repaired);
}

#[tokio::test]
async fn no_changes_keeps_input() {
    let oracle = Arc::new(FakeOracle::repairing(RepairOutcome::NoChanges));
    let delegate = OracleDelegate::new(oracle, config(1_000, 0));

    let delegation = delegate.remediate(request()).await;
    assert_eq!(delegation.manifest, INPUT);
    assert_eq!(delegation.disposition, Disposition::NoChanges);
}

#[tokio::test]
async fn oracle_error_falls_back_to_input() {
    let oracle = Arc::new(FakeOracle::failing("no quota"));
    let delegate = OracleDelegate::new(oracle, config(1_000, 0));

    let delegation = delegate.remediate(request()).await;
    assert_eq!(delegation.manifest, INPUT);
    assert!(matches!(delegation.disposition, Disposition::Fallback(_)));
}

#[tokio::test]
async fn unparseable_replacement_falls_back_to_input() {
    let oracle = Arc::new(FakeOracle::repairing(RepairOutcome::Repaired(
        "not: [valid yaml".to_owned(),
    )));
    let delegate = OracleDelegate::new(oracle, config(1_000, 0));

    let delegation = delegate.remediate(request()).await;
    assert_eq!(delegation.manifest, INPUT);
    assert!(matches!(delegation.disposition, Disposition::Fallback(_)));
}

#[tokio::test]
async fn echoed_replacement_counts_as_no_changes() {
    let oracle = Arc::new(FakeOracle::repairing(RepairOutcome::Repaired(
        INPUT.to_owned(),
    )));
    let delegate = OracleDelegate::new(oracle, config(1_000, 0));

    let delegation = delegate.remediate(request()).await;
    assert_eq!(delegation.disposition, Disposition::NoChanges);
}

#[tokio::test(start_paused = true)]
async fn timed_out_call_falls_back_to_input() {
    let delegate = OracleDelegate::new(Arc::new(HangingOracle), config(50, 0));

    let delegation = delegate.remediate(request()).await;
    assert_eq!(delegation.manifest, INPUT);
    match delegation.disposition {
        Disposition::Fallback(reason) => assert!(reason.contains("timed out")),
        other => panic!("expected fallback, got {other:?}"),
    }
}

#[tokio::test(start_paused = true)]
async fn calls_are_paced_by_the_minimum_interval() {
    let oracle = Arc::new(FakeOracle::repairing(RepairOutcome::NoChanges));
    let delegate = OracleDelegate::new(Arc::clone(&oracle) as Arc<dyn RemediationOracle>, config(1_000, 200));

    delegate.remediate(request()).await;
    delegate.remediate(request()).await;

    let instants = oracle.call_instants.lock().await;
    assert_eq!(instants.len(), 2);
    let gap = instants[1].duration_since(instants[0]);
    assert!(gap >= Duration::from_millis(200), "calls paced {gap:?} apart");
}

#[tokio::test]
async fn describe_falls_back_on_failure() {
    let oracle = Arc::new(FakeOracle::failing("no quota"));
    let delegate = OracleDelegate::new(oracle, config(1_000, 0));

    let description = delegate.describe("kind: K8sRequiredLabels\n", "fallback text").await;
    assert_eq!(description, "fallback text");
}

#[tokio::test]
async fn describe_returns_oracle_text_on_success() {
    let oracle = Arc::new(FakeOracle::repairing(RepairOutcome::NoChanges));
    let delegate = OracleDelegate::new(oracle, config(1_000, 0));

    let description = delegate.describe("kind: K8sRequiredLabels\n", "fallback").await;
    assert_eq!(description, "Scripted description.");
}

#[tokio::test(start_paused = true)]
async fn describe_timeout_falls_back() {
    let delegate = OracleDelegate::new(Arc::new(HangingOracle), config(50, 0));
    let description = delegate.describe("kind: X\n", "fallback").await;
    assert_eq!(description, "fallback");
}
