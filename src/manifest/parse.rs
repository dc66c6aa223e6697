//! Multi-document blob parsing and canonical serialization.
//!
//! Parsing is tolerant by contract: malformed chunks and empty/null
//! documents are dropped silently, and only mapping-rooted documents are
//! kept — a resource is a tree, not a bare scalar. Serialization is always
//! block-style (flow style is never emitted) so downstream humans and
//! agents can read the fixtures.

use serde_yaml::Value;
use tracing::debug;

use super::{DocumentBundle, Resource};

/// Parse a multi-document blob into an ordered bundle.
///
/// Documents are separated by `---` marker lines. A chunk that fails to
/// parse, parses to null, or is not rooted at a mapping is omitted; this
/// function never errors.
pub fn parse_bundle(text: &str) -> DocumentBundle {
    let mut bundle = DocumentBundle::new();
    for chunk in split_documents(text) {
        if chunk.trim().is_empty() {
            continue;
        }
        match serde_yaml::from_str::<Value>(&chunk) {
            Ok(Value::Mapping(root)) => bundle.push(Resource::new(root)),
            Ok(Value::Null) => {}
            Ok(_) => debug!("dropping non-mapping document"),
            Err(err) => debug!(error = %err, "dropping unparseable document"),
        }
    }
    bundle
}

/// Serialize a bundle back to canonical multi-document text.
///
/// Output re-parses to an equal bundle for every field the pipeline does
/// not itself rewrite.
pub fn serialize_bundle(bundle: &DocumentBundle) -> String {
    let rendered: Vec<String> = bundle
        .iter()
        .filter_map(|doc| match serde_yaml::to_string(doc.root()) {
            Ok(text) => Some(text),
            Err(err) => {
                debug!(error = %err, "dropping unserializable document");
                None
            }
        })
        .collect();
    rendered.join("---\n")
}

/// Split a blob on bare `---` separator lines.
///
/// Only unindented `---` lines separate documents; indented content inside
/// block scalars can never start at column zero, so this split is safe for
/// the block-style text this tool consumes and emits.
pub(crate) fn split_documents(text: &str) -> Vec<String> {
    let mut chunks = vec![String::new()];
    for line in text.lines() {
        if line.trim_end() == "---" {
            chunks.push(String::new());
            continue;
        }
        if let Some(current) = chunks.last_mut() {
            current.push_str(line);
            current.push('\n');
        }
    }
    chunks
}
