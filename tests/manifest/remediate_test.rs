//! Remediation engine tests.

use gatebench::manifest::parse::parse_bundle;
use gatebench::manifest::remediate::{RemediationTables, Remediator, SCRATCH_VOLUME_NAME};
use gatebench::manifest::{get_mapping, get_str};
use serde_yaml::Value;

fn containers(manifest: &str) -> Vec<serde_yaml::Mapping> {
    parse_bundle(manifest)
        .first()
        .and_then(|doc| doc.spec().cloned())
        .and_then(|spec| {
            spec.get(&Value::String("containers".to_owned()))
                .and_then(Value::as_sequence)
                .cloned()
        })
        .map(|list| {
            list.into_iter()
                .filter_map(|entry| entry.as_mapping().cloned())
                .collect()
        })
        .unwrap_or_default()
}

#[test]
fn placeholder_images_are_substituted() {
    let manifest = "\
kind: Pod
metadata:
  name: demo
spec:
  containers:
    - name: main
      image: openpolicyagent/opa:0.9.2
";
    let output = Remediator::default().remediate(manifest);
    assert!(output.contains("image: nginx:latest"));
    assert!(!output.contains("openpolicyagent"));
}

#[test]
fn sentinel_image_value_is_replaced_textually() {
    let manifest = "\
kind: Pod
metadata:
  name: demo
spec:
  containers:
    - name: main
      image: exempt
";
    let output = Remediator::default().remediate(manifest);
    assert!(output.contains("image: nginx:latest"));
}

#[test]
fn root_requiring_image_gets_unprivileged_variant() {
    let manifest = "\
kind: Pod
metadata:
  name: demo
spec:
  containers:
    - name: main
      image: nginx
";
    let output = Remediator::default().remediate(manifest);
    assert!(output.contains("image: nginxinc/nginx-unprivileged:latest"));
}

#[test]
fn policy_server_args_are_stripped() {
    let manifest = "\
kind: Pod
metadata:
  name: demo
spec:
  containers:
    - name: main
      image: nginx:1.25
      args:
        - run
        - --server
        - --addr=localhost:8181
";
    let output = Remediator::default().remediate(manifest);
    let patched = containers(&output);
    assert!(!patched[0].contains_key(&Value::String("args".to_owned())));
}

#[test]
fn unrelated_args_are_kept() {
    let manifest = "\
kind: Pod
metadata:
  name: demo
spec:
  containers:
    - name: main
      image: nginx:1.25
      args:
        - serve
        - --port=8080
";
    let output = Remediator::default().remediate(manifest);
    let patched = containers(&output);
    assert!(patched[0].contains_key(&Value::String("args".to_owned())));
}

#[test]
fn localhost_seccomp_profile_becomes_runtime_default() {
    let manifest = "\
kind: Pod
metadata:
  name: demo
spec:
  containers:
    - name: main
      image: nginx:1.25
      securityContext:
        seccompProfile:
          type: Localhost
          localhostProfile: profiles/audit.json
";
    let output = Remediator::default().remediate(manifest);
    let patched = containers(&output);
    let profile = get_mapping(&patched[0], "securityContext")
        .and_then(|sc| get_mapping(sc, "seccompProfile"))
        .cloned()
        .expect("seccompProfile");
    assert_eq!(get_str(&profile, "type"), Some("RuntimeDefault"));
    assert_eq!(get_str(&profile, "localhostProfile"), None);
}

#[test]
fn two_gibibytes_become_512_mebibytes() {
    let manifest = "\
kind: Pod
metadata:
  name: demo
spec:
  containers:
    - name: main
      image: nginx:1.25
      resources:
        requests:
          memory: 2Gi
        limits:
          memory: 2Gi
          cpu: 500m
";
    let output = Remediator::default().remediate(manifest);
    let patched = containers(&output);
    let resources = get_mapping(&patched[0], "resources").cloned().expect("resources");
    let requests = get_mapping(&resources, "requests").cloned().expect("requests");
    let limits = get_mapping(&resources, "limits").cloned().expect("limits");
    assert_eq!(get_str(&requests, "memory"), Some("512Mi"));
    assert_eq!(get_str(&limits, "memory"), Some("512Mi"));
    assert_eq!(get_str(&limits, "cpu"), Some("500m"));
}

#[test]
fn sub_gibibyte_and_mebibyte_quantities_are_untouched() {
    let manifest = "\
kind: Pod
metadata:
  name: demo
spec:
  containers:
    - name: main
      image: nginx:1.25
      resources:
        limits:
          memory: 512Mi
";
    let remediator = Remediator::default();
    assert_eq!(remediator.remediate(manifest), manifest);
}

#[test]
fn read_only_root_filesystem_gets_one_scratch_volume() {
    let manifest = "\
kind: Pod
metadata:
  name: demo
spec:
  containers:
    - name: main
      image: nginx:1.25
      securityContext:
        readOnlyRootFilesystem: true
";
    let remediator = Remediator::default();
    let once = remediator.remediate(manifest);

    let patched = containers(&once);
    let mounts = patched[0]
        .get(&Value::String("volumeMounts".to_owned()))
        .and_then(Value::as_sequence)
        .cloned()
        .expect("volumeMounts");
    assert_eq!(mounts.len(), 1);
    let mount = mounts[0].as_mapping().expect("mount mapping");
    assert_eq!(get_str(mount, "name"), Some(SCRATCH_VOLUME_NAME));
    assert_eq!(get_str(mount, "mountPath"), Some("/tmp"));

    let spec = parse_bundle(&once)
        .first()
        .and_then(|doc| doc.spec().cloned())
        .expect("spec");
    let volumes = spec
        .get(&Value::String("volumes".to_owned()))
        .and_then(Value::as_sequence)
        .cloned()
        .expect("volumes");
    assert_eq!(volumes.len(), 1);
    let volume = volumes[0].as_mapping().expect("volume mapping");
    assert_eq!(get_str(volume, "name"), Some(SCRATCH_VOLUME_NAME));
    assert!(volume.contains_key(&Value::String("emptyDir".to_owned())));

    // Re-running adds no second copy.
    let twice = remediator.remediate(&once);
    assert_eq!(twice, once);
}

#[test]
fn remediation_is_idempotent() {
    let manifest = "\
kind: Pod
metadata:
  name: demo
spec:
  containers:
    - name: main
      image: nginx
      args:
        - run
      securityContext:
        readOnlyRootFilesystem: true
        seccompProfile:
          type: Localhost
          localhostProfile: profiles/audit.json
      resources:
        limits:
          memory: 4Gi
";
    let remediator = Remediator::default();
    let once = remediator.remediate(manifest);
    assert_eq!(remediator.remediate(&once), once);
}

#[test]
fn init_containers_are_patched_too() {
    let manifest = "\
kind: Pod
metadata:
  name: demo
spec:
  initContainers:
    - name: setup
      image: nginx:1.25
      resources:
        limits:
          memory: 1Gi
";
    let output = Remediator::default().remediate(manifest);
    assert!(output.contains("256Mi"));
}

#[test]
fn unparseable_document_passes_through_after_text_phase() {
    let manifest = "kind: Pod\n  bad indent: [unclosed\nimage: safe-images.com/nginx\n";
    let output = Remediator::default().remediate(manifest);
    // Structural phase is skipped, literal substitution still applies.
    assert!(output.contains("nginx:latest"));
    assert!(output.contains("bad indent"));
}

#[test]
fn malformed_containers_field_is_skipped_not_fatal() {
    let manifest = "\
kind: Pod
metadata:
  name: demo
spec:
  containers: not-a-sequence
";
    assert_eq!(Remediator::default().remediate(manifest), manifest);
}

#[test]
fn alternate_tables_can_be_injected() {
    let tables = RemediationTables {
        image_substitutions: vec![("internal/hold".to_owned(), "public/ok".to_owned())],
        unprivileged_variants: Vec::new(),
        server_arg_markers: Vec::new(),
    };
    let remediator = Remediator::new(tables);
    let output = remediator.remediate("image: internal/hold\n");
    assert_eq!(output, "image: public/ok\n");
}
