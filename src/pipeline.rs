//! Per-sample transformation pipeline.
//!
//! One sample is processed start-to-finish before the next begins:
//! parse → neutralize → serialize → deterministic remediation → oracle
//! delegation, for the allowed and the disallowed bundle in turn. The
//! pipeline never evaluates the policy itself; it preserves the design
//! contract that the allowed bundle stays compliant and the disallowed
//! bundle stays violating.

use tracing::{debug, warn};

use crate::library::SampleCase;
use crate::manifest::neutralize::neutralize;
use crate::manifest::parse::{parse_bundle, serialize_bundle};
use crate::manifest::remediate::Remediator;
use crate::oracle::delegate::{Disposition, OracleDelegate};
use crate::oracle::{ComplianceRole, RepairRequest};

/// Suffix marking the expected-compliant fixture.
pub const COMPLIANT_SUFFIX: &str = "alpha";

/// Suffix marking the expected-violating fixture.
pub const VIOLATING_SUFFIX: &str = "beta";

/// Fallback policy description when the oracle cannot supply one.
pub const DEFAULT_DESCRIPTION: &str = "A compliance policy is in effect for this cluster.";

/// One deployable fixture produced from a sample example.
#[derive(Debug, Clone)]
pub struct Fixture {
    /// Final multi-document manifest text.
    pub manifest: String,
    /// Synthetic name of the bundle's first document, used as the
    /// expected-answer reference.
    pub primary_name: String,
    /// What oracle delegation did, or `None` when delegation was off.
    pub disposition: Option<Disposition>,
}

/// A fully transformed sample, ready for emission.
#[derive(Debug, Clone)]
pub struct PreparedSample {
    /// Category name.
    pub category: String,
    /// Policy name.
    pub policy: String,
    /// Sample directory name.
    pub sample: String,
    /// Constraint document text, unmodified.
    pub constraint: String,
    /// Natural-language policy description.
    pub description: String,
    /// Expected-compliant fixture.
    pub compliant: Fixture,
    /// Expected-violating fixture.
    pub violating: Fixture,
}

/// The sample transformation pipeline.
pub struct Pipeline {
    remediator: Remediator,
    delegate: Option<OracleDelegate>,
}

impl Pipeline {
    /// Create a pipeline; `delegate` is `None` when oracle delegation is
    /// disabled.
    pub fn new(remediator: Remediator, delegate: Option<OracleDelegate>) -> Self {
        Self {
            remediator,
            delegate,
        }
    }

    /// Transform one raw sample into a pair of deployable fixtures.
    ///
    /// Returns `None` when either example yields no parseable documents;
    /// the sample is skipped, never the batch.
    pub async fn prepare(&self, case: &SampleCase) -> Option<PreparedSample> {
        let policy_id = format!("{}/{}", case.category, case.policy);

        let Some(compliant) = self.transform(&case.allowed, COMPLIANT_SUFFIX) else {
            warn!(policy = %policy_id, sample = %case.sample, "allowed example has no usable documents");
            return None;
        };
        let Some(violating) = self.transform(&case.disallowed, VIOLATING_SUFFIX) else {
            warn!(policy = %policy_id, sample = %case.sample, "disallowed example has no usable documents");
            return None;
        };

        let description = match &self.delegate {
            Some(delegate) => {
                delegate
                    .describe(&case.constraint, DEFAULT_DESCRIPTION)
                    .await
            }
            None => DEFAULT_DESCRIPTION.to_owned(),
        };

        let compliant = self
            .delegated(compliant, ComplianceRole::MustComply, &policy_id, &description, case)
            .await;
        let violating = self
            .delegated(violating, ComplianceRole::MustViolate, &policy_id, &description, case)
            .await;

        Some(PreparedSample {
            category: case.category.clone(),
            policy: case.policy.clone(),
            sample: case.sample.clone(),
            constraint: case.constraint.clone(),
            description,
            compliant,
            violating,
        })
    }

    /// Deterministic half of the pipeline: neutralize then remediate.
    fn transform(&self, text: &str, suffix: &str) -> Option<(String, String)> {
        let mut bundle = parse_bundle(text);
        if bundle.is_empty() {
            return None;
        }
        for (index, doc) in bundle.iter_mut().enumerate() {
            neutralize(doc, suffix, index);
        }
        let primary_name = bundle.first()?.name()?.to_owned();
        let neutralized = serialize_bundle(&bundle);
        let remediated = self.remediator.remediate(&neutralized);
        Some((remediated, primary_name))
    }

    async fn delegated(
        &self,
        local: (String, String),
        role: ComplianceRole,
        policy_id: &str,
        description: &str,
        case: &SampleCase,
    ) -> Fixture {
        let (manifest, primary_name) = local;
        let Some(delegate) = &self.delegate else {
            debug!(policy = policy_id, "oracle delegation disabled");
            return Fixture {
                manifest,
                primary_name,
                disposition: None,
            };
        };

        let delegation = delegate
            .remediate(RepairRequest {
                manifest,
                policy_id: policy_id.to_owned(),
                description: description.to_owned(),
                constraint: case.constraint.clone(),
                role,
            })
            .await;
        Fixture {
            manifest: delegation.manifest,
            primary_name,
            disposition: Some(delegation.disposition),
        }
    }
}
