//! Deployability remediation.
//!
//! Makes a neutralized document deployable on a minimal local cluster
//! without flipping its policy-compliance outcome. Repair runs in two
//! phases: literal text substitution first (some inputs only become
//! parseable once an offending token is replaced), then a structural pass
//! over each document. Every additive fix carries an already-present guard,
//! so re-applying the engine to its own output is a no-op.

use serde_yaml::{Mapping, Value};
use tracing::debug;

use super::parse::split_documents;
use super::{get_mapping_mut, get_sequence_mut, get_str, remove, set_str};

/// Writable scratch path mounted for read-only root filesystems.
pub const SCRATCH_MOUNT_PATH: &str = "/tmp";

/// Name of the injected ephemeral scratch volume and its mount.
pub const SCRATCH_VOLUME_NAME: &str = "tmp-volume";

/// Seccomp profile type available on any target cluster.
pub const RUNTIME_DEFAULT_PROFILE: &str = "RuntimeDefault";

/// Mebibytes substituted per requested gibibyte. 2Gi -> 512Mi.
pub const MEMORY_MI_PER_GI: f64 = 256.0;

// ---------------------------------------------------------------------------
// Tables
// ---------------------------------------------------------------------------

/// Immutable replacement tables driving the engine.
///
/// Injected rather than process-wide so tests can supply alternates. Image
/// substitutions are ordered `(match, replacement)` pairs applied literally
/// to the whole blob; order matters because later pairs clean up artifacts
/// of earlier ones (for example a doubled tag).
#[derive(Debug, Clone)]
pub struct RemediationTables {
    /// Known-bad or placeholder image references and their safe defaults.
    pub image_substitutions: Vec<(String, String)>,
    /// Root-requiring base images and their unprivileged-by-default variants.
    pub unprivileged_variants: Vec<(String, String)>,
    /// Argument markers identifying a policy-engine server invocation.
    pub server_arg_markers: Vec<String>,
}

impl Default for RemediationTables {
    fn default() -> Self {
        let pairs = |table: &[(&str, &str)]| {
            table
                .iter()
                .map(|(from, to)| ((*from).to_owned(), (*to).to_owned()))
                .collect()
        };
        Self {
            image_substitutions: pairs(&[
                ("safe-images.com/nginx", "nginx:latest"),
                ("safeimages.com/nginx", "nginx:latest"),
                ("openpolicyagent/opa:0.9.2", "nginx:latest"),
                ("openpolicyagent/opa", "nginx:latest"),
                ("localhost/custom", "runtime/default"),
                ("nginx-exempt", "nginx:latest"),
                ("unnginx:latest", "nginx:latest"),
                // Doubled tag produced by the replacements above.
                ("nginx:latest:latest", "nginx:latest"),
                ("image: exempt", "image: nginx:latest"),
            ]),
            unprivileged_variants: pairs(&[(
                "image: nginx\n",
                "image: nginxinc/nginx-unprivileged:latest\n",
            )]),
            server_arg_markers: vec!["--server".to_owned(), "--addr".to_owned()],
        }
    }
}

/// Argument element marking a bare policy-engine `run` subcommand.
const BARE_RUN_ARG: &str = "run";

// ---------------------------------------------------------------------------
// Engine
// ---------------------------------------------------------------------------

/// The remediation engine.
#[derive(Debug, Clone, Default)]
pub struct Remediator {
    tables: RemediationTables,
}

struct ContainerPatch {
    modified: bool,
    needs_scratch: bool,
}

impl Remediator {
    /// Create an engine over the given tables.
    pub fn new(tables: RemediationTables) -> Self {
        Self { tables }
    }

    /// Remediate a manifest blob, returning the repaired text.
    ///
    /// Documents that cannot be parsed pass through unchanged; this
    /// function never errors and is idempotent.
    pub fn remediate(&self, manifest: &str) -> String {
        let text = self.substitute_text(manifest);
        self.patch_structure(&text)
    }

    /// Phase 1: literal substitution across the whole blob, before parsing.
    fn substitute_text(&self, manifest: &str) -> String {
        let mut text = manifest.to_owned();
        for (from, to) in &self.tables.image_substitutions {
            text = text.replace(from, to);
        }
        for (from, to) in &self.tables.unprivileged_variants {
            text = text.replace(from, to);
        }
        text
    }

    /// Phase 2: per-document structural patching.
    ///
    /// Each document chunk is handled independently: an unparseable chunk
    /// is kept verbatim, and an unmodified chunk keeps its original text.
    fn patch_structure(&self, text: &str) -> String {
        let mut any_modified = false;
        let chunks: Vec<String> = split_documents(text)
            .into_iter()
            .filter(|chunk| !chunk.trim().is_empty())
            .map(|chunk| match serde_yaml::from_str::<Value>(&chunk) {
                Ok(Value::Mapping(mut root)) => {
                    if self.patch_document(&mut root) {
                        match serde_yaml::to_string(&root) {
                            Ok(rendered) => {
                                any_modified = true;
                                rendered
                            }
                            Err(err) => {
                                debug!(error = %err, "keeping original document text");
                                chunk
                            }
                        }
                    } else {
                        chunk
                    }
                }
                Ok(_) => chunk,
                Err(err) => {
                    debug!(error = %err, "skipping remediation of unparseable document");
                    chunk
                }
            })
            .collect();

        if any_modified {
            chunks.join("---\n")
        } else {
            text.to_owned()
        }
    }

    fn patch_document(&self, root: &mut Mapping) -> bool {
        let mut modified = false;
        let mut needs_scratch = false;

        // Containers live directly under `spec`; workload templates nest
        // deeper and are left alone.
        let Some(spec) = get_mapping_mut(root, "spec") else {
            return false;
        };

        for field in ["containers", "initContainers"] {
            let Some(list) = get_sequence_mut(spec, field) else {
                continue;
            };
            for entry in list.iter_mut() {
                let Some(container) = entry.as_mapping_mut() else {
                    continue;
                };
                let patch = self.patch_container(container);
                modified |= patch.modified;
                needs_scratch |= patch.needs_scratch;
            }
        }

        if needs_scratch {
            modified |= ensure_scratch_volume(spec);
        }
        modified
    }

    fn patch_container(&self, container: &mut Mapping) -> ContainerPatch {
        let mut modified = false;

        if self.should_strip_args(container) {
            remove(container, "args");
            modified = true;
        }
        modified |= normalize_seccomp(container);
        modified |= scale_memory_quantities(container);

        let needs_scratch = root_filesystem_is_read_only(container);
        if needs_scratch {
            modified |= ensure_scratch_mount(container);
        }

        ContainerPatch {
            modified,
            needs_scratch,
        }
    }

    /// Whether the argument list marks a policy-engine server invocation.
    ///
    /// Such arguments are meaningless once the image has been substituted
    /// and would crash the container.
    fn should_strip_args(&self, container: &Mapping) -> bool {
        let Some(args) = container
            .get(&Value::String("args".to_owned()))
            .and_then(Value::as_sequence)
        else {
            return false;
        };
        args.iter().filter_map(Value::as_str).any(|arg| {
            arg == BARE_RUN_ARG
                || self
                    .tables
                    .server_arg_markers
                    .iter()
                    .any(|marker| arg.contains(marker.as_str()))
        })
    }
}

// ---------------------------------------------------------------------------
// Structural fixes
// ---------------------------------------------------------------------------

/// Rewrite `Localhost` seccomp profiles to the cluster default.
///
/// Local profiles are not guaranteed present on an arbitrary target
/// cluster; the profile path field is dropped along with the type.
fn normalize_seccomp(container: &mut Mapping) -> bool {
    let Some(profile) = get_mapping_mut(container, "securityContext")
        .and_then(|sc| get_mapping_mut(sc, "seccompProfile"))
    else {
        return false;
    };
    if get_str(profile, "type") != Some("Localhost") {
        return false;
    }
    set_str(profile, "type", RUNTIME_DEFAULT_PROFILE);
    remove(profile, "localhostProfile");
    true
}

/// Scale gibibyte memory quantities down to mebibytes.
fn scale_memory_quantities(container: &mut Mapping) -> bool {
    let Some(resources) = get_mapping_mut(container, "resources") else {
        return false;
    };
    let mut modified = false;
    for section in ["requests", "limits"] {
        let Some(block) = get_mapping_mut(resources, section) else {
            continue;
        };
        let Some(scaled) = get_str(block, "memory").and_then(scaled_memory) else {
            continue;
        };
        set_str(block, "memory", &scaled);
        modified = true;
    }
    modified
}

/// `NGi` with `N >= 1` becomes the fixed-factor mebibyte equivalent.
fn scaled_memory(value: &str) -> Option<String> {
    let amount: f64 = value.strip_suffix("Gi")?.parse().ok()?;
    if amount < 1.0 {
        return None;
    }
    let mebibytes = (amount * MEMORY_MI_PER_GI).floor();
    Some(format!("{mebibytes}Mi"))
}

fn root_filesystem_is_read_only(container: &Mapping) -> bool {
    let Some(sc) = container
        .get(&Value::String("securityContext".to_owned()))
        .and_then(Value::as_mapping)
    else {
        return false;
    };
    matches!(
        sc.get(&Value::String("readOnlyRootFilesystem".to_owned())),
        Some(Value::Bool(true))
    )
}

/// Ensure the container mounts the scratch volume; add only if absent.
fn ensure_scratch_mount(container: &mut Mapping) -> bool {
    if !container.contains_key(&Value::String("volumeMounts".to_owned())) {
        container.insert(
            Value::String("volumeMounts".to_owned()),
            Value::Sequence(Vec::new()),
        );
    }
    // A `volumeMounts` field with any other shape skips this fix.
    let Some(mounts) = get_sequence_mut(container, "volumeMounts") else {
        return false;
    };
    let already_mounted = mounts
        .iter()
        .filter_map(Value::as_mapping)
        .any(|mount| get_str(mount, "mountPath") == Some(SCRATCH_MOUNT_PATH));
    if already_mounted {
        return false;
    }
    let mut mount = Mapping::new();
    set_str(&mut mount, "name", SCRATCH_VOLUME_NAME);
    set_str(&mut mount, "mountPath", SCRATCH_MOUNT_PATH);
    mounts.push(Value::Mapping(mount));
    true
}

/// Ensure the document declares the ephemeral scratch volume.
fn ensure_scratch_volume(spec: &mut Mapping) -> bool {
    if !spec.contains_key(&Value::String("volumes".to_owned())) {
        spec.insert(
            Value::String("volumes".to_owned()),
            Value::Sequence(Vec::new()),
        );
    }
    let Some(volumes) = get_sequence_mut(spec, "volumes") else {
        return false;
    };
    let already_declared = volumes
        .iter()
        .filter_map(Value::as_mapping)
        .any(|volume| get_str(volume, "name") == Some(SCRATCH_VOLUME_NAME));
    if already_declared {
        return false;
    }
    let mut volume = Mapping::new();
    set_str(&mut volume, "name", SCRATCH_VOLUME_NAME);
    volume.insert(
        Value::String("emptyDir".to_owned()),
        Value::Mapping(Mapping::new()),
    );
    volumes.push(Value::Mapping(volume));
    true
}
