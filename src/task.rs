//! Benchmark task emission.
//!
//! Writes one task directory per prepared sample: the two fixture files,
//! the constraint (re-scoped to the task namespace when it pins
//! namespaces), setup/cleanup scripts with readiness waits, and the task
//! descriptor carrying the prompt and the expected answer.

use std::fmt::Write as _;
use std::io;
use std::path::{Path, PathBuf};

use serde::Serialize;
use serde_yaml::Value;
use tracing::debug;

use crate::manifest::parse::{parse_bundle, serialize_bundle};
use crate::manifest::{get_mapping_mut, DocumentBundle};
use crate::oracle::delegate::Disposition;
use crate::pipeline::PreparedSample;

/// Readiness conditions for kinds `kubectl wait` can observe.
///
/// Injected configuration data, not process-wide state, so tests can supply
/// alternate tables.
#[derive(Debug, Clone)]
pub struct WaitableKinds(Vec<(String, String)>);

impl Default for WaitableKinds {
    fn default() -> Self {
        let table = [
            ("Pod", "condition=Ready"),
            ("Deployment", "condition=Available"),
            ("StatefulSet", "condition=Ready"),
            ("DaemonSet", "condition=Ready"),
            ("ReplicaSet", "condition=Ready"),
            ("Job", "condition=Complete"),
        ];
        Self(
            table
                .iter()
                .map(|(kind, condition)| ((*kind).to_owned(), (*condition).to_owned()))
                .collect(),
        )
    }
}

impl WaitableKinds {
    /// The wait condition for `kind`, if it is waitable.
    pub fn condition_for(&self, kind: &str) -> Option<&str> {
        self.0
            .iter()
            .find(|(waitable, _)| waitable == kind)
            .map(|(_, condition)| condition.as_str())
    }
}

/// A record of one emitted task, kept for the run report.
#[derive(Debug, Clone)]
pub struct TaskRecord {
    /// Task directory name.
    pub task_name: String,
    /// Policy identifier (`category/policy`).
    pub policy_id: String,
    /// Deploy namespace baked into the scripts.
    pub namespace: String,
    /// Synthetic name of the violating fixture's first document.
    pub violating_name: String,
    /// Oracle disposition of the compliant fixture.
    pub compliant_disposition: Option<Disposition>,
    /// Oracle disposition of the violating fixture.
    pub violating_disposition: Option<Disposition>,
}

// ---------------------------------------------------------------------------
// task.yaml descriptor
// ---------------------------------------------------------------------------

#[derive(Debug, Serialize)]
struct TaskSpec {
    setup: String,
    cleanup: String,
    difficulty: String,
    expect: Vec<Expectation>,
    script: Vec<ScriptStep>,
}

#[derive(Debug, Serialize)]
struct Expectation {
    answer: String,
}

#[derive(Debug, Serialize)]
struct ScriptStep {
    prompt: String,
}

// ---------------------------------------------------------------------------
// Emitter
// ---------------------------------------------------------------------------

/// Writes prepared samples out as benchmark task directories.
#[derive(Debug, Clone)]
pub struct TaskEmitter {
    out_dir: PathBuf,
    namespace_prefix: String,
    difficulty: String,
    waitable: WaitableKinds,
}

impl TaskEmitter {
    /// Create an emitter rooted at `out_dir`.
    pub fn new(
        out_dir: impl Into<PathBuf>,
        namespace_prefix: impl Into<String>,
        difficulty: impl Into<String>,
        waitable: WaitableKinds,
    ) -> Self {
        Self {
            out_dir: out_dir.into(),
            namespace_prefix: namespace_prefix.into(),
            difficulty: difficulty.into(),
            waitable,
        }
    }

    /// Emit one task directory for a prepared sample.
    ///
    /// # Errors
    ///
    /// Returns the underlying I/O error when a file or directory cannot be
    /// written; the caller decides whether to continue the batch.
    pub fn emit(&self, sample: &PreparedSample, index: usize) -> io::Result<TaskRecord> {
        let task_name = format!("gk-{}-{}-{index:02}", sample.category, sample.policy);
        let namespace = format!("{}-{index:03}", self.namespace_prefix);
        let task_dir = self.out_dir.join(&task_name);
        let artifacts_dir = task_dir.join("artifacts");
        std::fs::create_dir_all(&artifacts_dir)?;

        std::fs::write(
            artifacts_dir.join("resource-alpha.yaml"),
            &sample.compliant.manifest,
        )?;
        std::fs::write(
            artifacts_dir.join("resource-beta.yaml"),
            &sample.violating.manifest,
        )?;
        std::fs::write(
            artifacts_dir.join("constraint.yaml"),
            rescope_constraint(&sample.constraint, &namespace),
        )?;

        let mut wait_cmds = self.wait_commands(&sample.compliant.manifest, &namespace);
        wait_cmds.extend(self.wait_commands(&sample.violating.manifest, &namespace));

        let setup_path = task_dir.join("setup.sh");
        std::fs::write(
            &setup_path,
            build_setup_script(&namespace, &sample.category, &wait_cmds),
        )?;
        make_executable(&setup_path)?;

        let cleanup_path = task_dir.join("cleanup.sh");
        std::fs::write(&cleanup_path, build_cleanup_script(&namespace))?;
        make_executable(&cleanup_path)?;

        let violating_name = sample.violating.primary_name.clone();
        let spec = TaskSpec {
            setup: "setup.sh".to_owned(),
            cleanup: "cleanup.sh".to_owned(),
            difficulty: self.difficulty.clone(),
            expect: vec![Expectation {
                answer: format!("VIOLATING: {violating_name}"),
            }],
            script: vec![ScriptStep {
                prompt: build_prompt(&sample.description, &namespace),
            }],
        };
        let descriptor = serde_yaml::to_string(&spec)
            .map_err(|err| io::Error::new(io::ErrorKind::InvalidData, err))?;
        std::fs::write(task_dir.join("task.yaml"), descriptor)?;

        Ok(TaskRecord {
            task_name,
            policy_id: format!("{}/{}", sample.category, sample.policy),
            namespace,
            violating_name,
            compliant_disposition: sample.compliant.disposition.clone(),
            violating_disposition: sample.violating.disposition.clone(),
        })
    }

    /// `kubectl wait` commands for every waitable document in a manifest.
    fn wait_commands(&self, manifest: &str, namespace: &str) -> Vec<String> {
        let bundle = parse_bundle(manifest);
        let mut commands = Vec::new();
        for doc in &bundle {
            let (Some(kind), Some(name)) = (doc.kind(), doc.name()) else {
                continue;
            };
            let Some(condition) = self.waitable.condition_for(kind) else {
                continue;
            };
            commands.push(format!(
                "kubectl wait --for={condition} {}/{name} -n {namespace} --timeout=180s",
                kind.to_lowercase()
            ));
        }
        commands
    }
}

// ---------------------------------------------------------------------------
// Script and prompt templates
// ---------------------------------------------------------------------------

fn build_setup_script(namespace: &str, category: &str, wait_cmds: &[String]) -> String {
    let wait_block = if wait_cmds.is_empty() {
        "echo \"Resources deployed. Waiting for readiness...\"\nsleep 3".to_owned()
    } else {
        format!(
            "echo \"Waiting for resources to be ready...\"\n{}",
            wait_cmds.join("\n")
        )
    };

    // Pod-security-policy fixtures need the namespace opted out of the
    // baseline Pod Security admission level.
    let mut extra_setup = String::new();
    if category.contains("pod-security-policy") {
        let _ = writeln!(
            extra_setup,
            "kubectl label namespace {namespace} pod-security.kubernetes.io/enforce=privileged"
        );
    }

    format!(
        "#!/usr/bin/env bash\n\
         set -e\n\
         kubectl delete namespace {namespace} --ignore-not-found --wait=true\n\
         kubectl create namespace {namespace}\n\
         {extra_setup}sleep 2  # Allow namespace to stabilize\n\
         kubectl apply -f artifacts/resource-alpha.yaml -n {namespace}\n\
         kubectl apply -f artifacts/resource-beta.yaml -n {namespace}\n\
         sleep 3  # Allow pods to be scheduled\n\
         {wait_block}\n"
    )
}

fn build_cleanup_script(namespace: &str) -> String {
    format!(
        "#!/usr/bin/env bash\n\
         kubectl delete namespace {namespace} --ignore-not-found\n\
         exit 0\n"
    )
}

fn build_prompt(description: &str, namespace: &str) -> String {
    format!(
        "{description}\n\n\
         Look at the resources that have been deployed in namespace {namespace}. \
         Examine them and determine which resource(s) violate the policy.\n\n\
         After your analysis, output a single line starting with \"VIOLATING:\" \
         followed by the resource name(s) that violate the policy, or \
         \"VIOLATING: none\" if all resources comply.\n\
         IMPORTANT: You must NOT output anything other than the XML block below \
         in your final response.\n\
         <answer>VIOLATING: your-answer-here</answer>"
    )
}

// ---------------------------------------------------------------------------
// Constraint re-scoping
// ---------------------------------------------------------------------------

/// Rewrite `spec.match.namespaces` to the task namespace when present.
///
/// Constraints that pin namespaces would otherwise never match the isolated
/// deploy namespace. Constraints without a namespace pin pass through
/// unchanged, as does anything that fails to parse.
fn rescope_constraint(constraint: &str, namespace: &str) -> String {
    let mut bundle: DocumentBundle = parse_bundle(constraint);
    let Some(doc) = bundle.iter_mut().next() else {
        return constraint.to_owned();
    };

    let Some(matcher) = get_mapping_mut(doc.root_mut(), "spec")
        .and_then(|spec| get_mapping_mut(spec, "match"))
    else {
        return constraint.to_owned();
    };
    let namespaces_key = Value::String("namespaces".to_owned());
    let pinned = matches!(
        matcher.get(&namespaces_key),
        Some(Value::Sequence(entries)) if !entries.is_empty()
            && entries.iter().all(|entry| entry.as_str().is_some())
    );
    if !pinned {
        return constraint.to_owned();
    }

    debug!(namespace, "rescoping constraint namespaces");
    matcher.insert(
        namespaces_key,
        Value::Sequence(vec![Value::String(namespace.to_owned())]),
    );
    serialize_bundle(&bundle)
}

#[cfg(unix)]
fn make_executable(path: &Path) -> io::Result<()> {
    use std::os::unix::fs::PermissionsExt;
    std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o755))
}

#[cfg(not(unix))]
fn make_executable(_path: &Path) -> io::Result<()> {
    Ok(())
}
