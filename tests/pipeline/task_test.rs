//! Task emission tests.

use gatebench::pipeline::{Fixture, PreparedSample};
use gatebench::task::{TaskEmitter, WaitableKinds};
use serde_yaml::Value;

const COMPLIANT: &str = "\
apiVersion: v1
kind: Pod
metadata:
  name: resource-alpha
spec:
  containers:
    - name: container-alpha
      image: nginx:latest
";

const VIOLATING: &str = "\
apiVersion: v1
kind: Pod
metadata:
  name: resource-beta
spec:
  containers:
    - name: container-beta
      image: nginx:latest
";

fn prepared(category: &str) -> PreparedSample {
    PreparedSample {
        category: category.to_owned(),
        policy: "containerlimits".to_owned(),
        sample: "memory".to_owned(),
        constraint: "kind: K8sContainerLimits\nspec:\n  match:\n    namespaces:\n      - default\n"
            .to_owned(),
        description: "Containers must declare memory limits.".to_owned(),
        compliant: Fixture {
            manifest: COMPLIANT.to_owned(),
            primary_name: "resource-alpha".to_owned(),
            disposition: None,
        },
        violating: Fixture {
            manifest: VIOLATING.to_owned(),
            primary_name: "resource-beta".to_owned(),
            disposition: None,
        },
    }
}

fn emitter(dir: &std::path::Path) -> TaskEmitter {
    TaskEmitter::new(dir, "gk-test", "medium", WaitableKinds::default())
}

#[test]
fn emit_writes_the_full_task_layout() {
    let out = tempfile::tempdir().expect("tempdir");
    let record = emitter(out.path())
        .emit(&prepared("general"), 0)
        .expect("emit succeeds");

    assert_eq!(record.task_name, "gk-general-containerlimits-00");
    assert_eq!(record.namespace, "gk-test-000");
    assert_eq!(record.violating_name, "resource-beta");

    let task_dir = out.path().join("gk-general-containerlimits-00");
    for file in [
        "artifacts/resource-alpha.yaml",
        "artifacts/resource-beta.yaml",
        "artifacts/constraint.yaml",
        "setup.sh",
        "cleanup.sh",
        "task.yaml",
    ] {
        assert!(task_dir.join(file).is_file(), "missing {file}");
    }

    let alpha = std::fs::read_to_string(task_dir.join("artifacts/resource-alpha.yaml"))
        .expect("alpha fixture");
    assert_eq!(alpha, COMPLIANT);
}

#[test]
fn task_descriptor_names_the_violating_fixture() {
    let out = tempfile::tempdir().expect("tempdir");
    emitter(out.path())
        .emit(&prepared("general"), 3)
        .expect("emit succeeds");

    let descriptor = std::fs::read_to_string(
        out.path()
            .join("gk-general-containerlimits-03")
            .join("task.yaml"),
    )
    .expect("task.yaml");
    let spec: Value = serde_yaml::from_str(&descriptor).expect("task.yaml parses");

    assert_eq!(spec["setup"], Value::String("setup.sh".to_owned()));
    assert_eq!(spec["difficulty"], Value::String("medium".to_owned()));
    assert_eq!(
        spec["expect"][0]["answer"],
        Value::String("VIOLATING: resource-beta".to_owned())
    );
    let prompt = spec["script"][0]["prompt"].as_str().expect("prompt");
    assert!(prompt.starts_with("Containers must declare memory limits."));
    assert!(prompt.contains("namespace gk-test-003"));
}

#[test]
fn setup_script_waits_for_waitable_kinds() {
    let out = tempfile::tempdir().expect("tempdir");
    emitter(out.path())
        .emit(&prepared("general"), 0)
        .expect("emit succeeds");

    let setup = std::fs::read_to_string(
        out.path().join("gk-general-containerlimits-00").join("setup.sh"),
    )
    .expect("setup.sh");
    assert!(setup.contains("kubectl create namespace gk-test-000"));
    assert!(setup.contains(
        "kubectl wait --for=condition=Ready pod/resource-alpha -n gk-test-000 --timeout=180s"
    ));
    assert!(setup.contains(
        "kubectl wait --for=condition=Ready pod/resource-beta -n gk-test-000 --timeout=180s"
    ));
    assert!(!setup.contains("pod-security.kubernetes.io"));
}

#[test]
fn psp_category_opts_namespace_out_of_baseline_enforcement() {
    let out = tempfile::tempdir().expect("tempdir");
    emitter(out.path())
        .emit(&prepared("pod-security-policy"), 0)
        .expect("emit succeeds");

    let setup = std::fs::read_to_string(
        out.path()
            .join("gk-pod-security-policy-containerlimits-00")
            .join("setup.sh"),
    )
    .expect("setup.sh");
    assert!(setup.contains("pod-security.kubernetes.io/enforce=privileged"));
}

#[test]
fn constraint_namespace_pin_follows_the_task_namespace() {
    let out = tempfile::tempdir().expect("tempdir");
    emitter(out.path())
        .emit(&prepared("general"), 7)
        .expect("emit succeeds");

    let constraint = std::fs::read_to_string(
        out.path()
            .join("gk-general-containerlimits-07")
            .join("artifacts/constraint.yaml"),
    )
    .expect("constraint.yaml");
    assert!(constraint.contains("gk-test-007"));
    assert!(!constraint.contains("- default"));
}

#[cfg(unix)]
#[test]
fn scripts_are_executable() {
    use std::os::unix::fs::PermissionsExt;

    let out = tempfile::tempdir().expect("tempdir");
    emitter(out.path())
        .emit(&prepared("general"), 0)
        .expect("emit succeeds");

    let setup = out.path().join("gk-general-containerlimits-00").join("setup.sh");
    let mode = std::fs::metadata(setup).expect("metadata").permissions().mode();
    assert_eq!(mode & 0o111, 0o111, "setup.sh should be executable");
}
