//! Identity neutralization.
//!
//! Rewrites every identity-bearing field of a document to a fixed synthetic
//! value so that fixtures neither leak their origin policy nor collide when
//! several documents land in one namespace. All rewrites are pure functions
//! of `(document, suffix, index)` — identical input always yields identical
//! output.

use std::collections::BTreeMap;

use serde_yaml::{Mapping, Value};

use super::{get_mapping_mut, get_sequence_mut, get_str, remove, set_str, Resource};

/// Original container name → synthetic replacement, scoped to one document.
///
/// Used only to repair annotation keys of the form `<group>/<container-name>`
/// that would otherwise silently stop applying after the rename.
pub type RenameMap = BTreeMap<String, String>;

/// Container list fields and the role encoded into their synthetic names.
const CONTAINER_FIELDS: [(&str, &str); 2] =
    [("containers", "container"), ("initContainers", "init-container")];

/// Synthetic `metadata.name` for the document at `index` within a bundle.
///
/// Index zero is elided for readability; names are pairwise distinct across
/// any bundle assembled with one suffix.
pub fn document_name(suffix: &str, index: usize) -> String {
    if index == 0 {
        format!("resource-{suffix}")
    } else {
        format!("resource-{suffix}-{index}")
    }
}

/// Synthetic `app` label value for a suffix.
pub fn app_label(suffix: &str) -> String {
    format!("app-{suffix}")
}

fn container_name(role: &str, suffix: &str, index: usize, position: usize) -> String {
    // Documents past the first always carry both index and position so a
    // first-document name like `container-alpha-1` can never collide with
    // a later document's `container-alpha-1-0`.
    if index == 0 {
        if position == 0 {
            format!("{role}-{suffix}")
        } else {
            format!("{role}-{suffix}-{position}")
        }
    } else {
        format!("{role}-{suffix}-{index}-{position}")
    }
}

/// Neutralize one document in place and return the container rename map.
///
/// - `metadata.name` becomes [`document_name`]`(suffix, index)`.
/// - `metadata.namespace` is dropped unconditionally; the harness assigns
///   the namespace at deploy time.
/// - The `app` label is rewritten to [`app_label`]`(suffix)` wherever it
///   appears among `metadata.labels`, `spec.selector.matchLabels` and
///   `spec.template.metadata.labels`, keeping selectors matching their
///   templates.
/// - Containers and init-containers are renamed by role, suffix, index and
///   position; annotation keys whose `/`-suffix exactly equals a replaced
///   container name are repaired to reference the new name.
pub fn neutralize(doc: &mut Resource, suffix: &str, index: usize) -> RenameMap {
    let meta = doc.metadata_mut();
    set_str(meta, "name", &document_name(suffix, index));
    remove(meta, "namespace");

    rewrite_app_labels(doc, suffix);
    let renames = rename_containers(doc, suffix, index);
    repair_annotation_keys(doc.metadata_mut(), &renames);
    renames
}

fn rewrite_app_labels(doc: &mut Resource, suffix: &str) {
    let value = app_label(suffix);
    let root = doc.root_mut();

    if let Some(labels) =
        get_mapping_mut(root, "metadata").and_then(|meta| get_mapping_mut(meta, "labels"))
    {
        rewrite_app_entry(labels, &value);
    }

    let Some(spec) = get_mapping_mut(root, "spec") else {
        return;
    };
    if let Some(match_labels) = get_mapping_mut(spec, "selector")
        .and_then(|selector| get_mapping_mut(selector, "matchLabels"))
    {
        rewrite_app_entry(match_labels, &value);
    }
    if let Some(labels) = get_mapping_mut(spec, "template")
        .and_then(|template| get_mapping_mut(template, "metadata"))
        .and_then(|meta| get_mapping_mut(meta, "labels"))
    {
        rewrite_app_entry(labels, &value);
    }
}

fn rewrite_app_entry(labels: &mut Mapping, value: &str) {
    // Insert keeps the original key position, so label order is stable.
    if labels.contains_key(&Value::String("app".to_owned())) {
        set_str(labels, "app", value);
    }
}

fn rename_containers(doc: &mut Resource, suffix: &str, index: usize) -> RenameMap {
    let mut renames = RenameMap::new();
    let Some(spec) = doc.spec_mut() else {
        return renames;
    };

    for (field, role) in CONTAINER_FIELDS {
        // A `containers` field that is not a sequence is skipped, not fatal.
        let Some(list) = get_sequence_mut(spec, field) else {
            continue;
        };
        for (position, entry) in list.iter_mut().enumerate() {
            let Some(container) = entry.as_mapping_mut() else {
                continue;
            };
            let replacement = container_name(role, suffix, index, position);
            if let Some(old) = get_str(container, "name") {
                if !old.is_empty() {
                    renames.insert(old.to_owned(), replacement.clone());
                }
            }
            set_str(container, "name", &replacement);
        }
    }
    renames
}

fn repair_annotation_keys(meta: &mut Mapping, renames: &RenameMap) {
    if renames.is_empty() {
        return;
    }
    let Some(annotations) = get_mapping_mut(meta, "annotations") else {
        return;
    };

    let mut rebuilt = Mapping::new();
    for (k, v) in annotations.iter() {
        let repaired = k
            .as_str()
            .and_then(|name| repaired_annotation_key(name, renames))
            .map(Value::String);
        rebuilt.insert(repaired.unwrap_or_else(|| k.clone()), v.clone());
    }
    *annotations = rebuilt;
}

/// Rewrite `<group>/<old-container-name>` to `<group>/<new-container-name>`.
///
/// Only suffix-exact matches after the last `/` are rewritten; partial or
/// prefix matches are left untouched.
fn repaired_annotation_key(name: &str, renames: &RenameMap) -> Option<String> {
    let (group, container) = name.rsplit_once('/')?;
    let replacement = renames.get(container)?;
    Some(format!("{group}/{replacement}"))
}
