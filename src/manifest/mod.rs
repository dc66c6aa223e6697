//! Manifest document model and transformation stages.
//!
//! Resources are schema-less YAML trees. Rather than typed structs, this
//! module wraps [`serde_yaml::Mapping`] in a [`Resource`] with accessor
//! helpers that tolerate absent or oddly-shaped fields — a manifest without
//! `metadata` or `spec` is valid input, never an error.
//!
//! The stages are:
//! - [`parse`] — multi-document blob ⇄ ordered [`DocumentBundle`]
//! - [`neutralize`] — synthetic identity rewriting
//! - [`remediate`] — deployability repair

use serde_yaml::{Mapping, Value};

pub mod neutralize;
pub mod parse;
pub mod remediate;

// ---------------------------------------------------------------------------
// Resource
// ---------------------------------------------------------------------------

/// One structured resource document: a tree of nested mappings, sequences
/// and scalars rooted at a mapping.
#[derive(Debug, Clone, PartialEq)]
pub struct Resource(Mapping);

impl Resource {
    /// Wrap a parsed root mapping.
    pub fn new(root: Mapping) -> Self {
        Self(root)
    }

    /// The root mapping.
    pub fn root(&self) -> &Mapping {
        &self.0
    }

    /// Mutable access to the root mapping.
    pub fn root_mut(&mut self) -> &mut Mapping {
        &mut self.0
    }

    /// `kind`, if present and a string.
    pub fn kind(&self) -> Option<&str> {
        get_str(&self.0, "kind")
    }

    /// `metadata.name`, if present and a string.
    pub fn name(&self) -> Option<&str> {
        get_mapping(&self.0, "metadata").and_then(|meta| get_str(meta, "name"))
    }

    /// `metadata`, created empty if absent.
    pub fn metadata_mut(&mut self) -> &mut Mapping {
        ensure_mapping(&mut self.0, "metadata")
    }

    /// `spec`, if present and a mapping.
    pub fn spec(&self) -> Option<&Mapping> {
        get_mapping(&self.0, "spec")
    }

    /// `spec`, if present and a mapping, mutably.
    pub fn spec_mut(&mut self) -> Option<&mut Mapping> {
        get_mapping_mut(&mut self.0, "spec")
    }
}

impl From<Resource> for Value {
    fn from(doc: Resource) -> Self {
        Value::Mapping(doc.0)
    }
}

// ---------------------------------------------------------------------------
// DocumentBundle
// ---------------------------------------------------------------------------

/// An ordered sequence of resource documents produced from one
/// multi-document blob. Order is preserved on round-trip.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DocumentBundle {
    docs: Vec<Resource>,
}

impl DocumentBundle {
    /// An empty bundle.
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a document, preserving order.
    pub fn push(&mut self, doc: Resource) {
        self.docs.push(doc);
    }

    /// Number of documents.
    pub fn len(&self) -> usize {
        self.docs.len()
    }

    /// Whether the bundle holds no documents.
    pub fn is_empty(&self) -> bool {
        self.docs.is_empty()
    }

    /// The first document, if any.
    pub fn first(&self) -> Option<&Resource> {
        self.docs.first()
    }

    /// Iterate over documents in order.
    pub fn iter(&self) -> std::slice::Iter<'_, Resource> {
        self.docs.iter()
    }

    /// Iterate mutably over documents in order.
    pub fn iter_mut(&mut self) -> std::slice::IterMut<'_, Resource> {
        self.docs.iter_mut()
    }
}

impl<'a> IntoIterator for &'a DocumentBundle {
    type Item = &'a Resource;
    type IntoIter = std::slice::Iter<'a, Resource>;

    fn into_iter(self) -> Self::IntoIter {
        self.docs.iter()
    }
}

impl<'a> IntoIterator for &'a mut DocumentBundle {
    type Item = &'a mut Resource;
    type IntoIter = std::slice::IterMut<'a, Resource>;

    fn into_iter(self) -> Self::IntoIter {
        self.docs.iter_mut()
    }
}

impl FromIterator<Resource> for DocumentBundle {
    fn from_iter<I: IntoIterator<Item = Resource>>(iter: I) -> Self {
        Self {
            docs: iter.into_iter().collect(),
        }
    }
}

// ---------------------------------------------------------------------------
// Typed accessor helpers
// ---------------------------------------------------------------------------

fn key(k: &str) -> Value {
    Value::String(k.to_owned())
}

/// A string field of `map`, if present and a string.
pub fn get_str<'a>(map: &'a Mapping, k: &str) -> Option<&'a str> {
    map.get(&key(k)).and_then(Value::as_str)
}

/// Set a string field on `map`.
pub fn set_str(map: &mut Mapping, k: &str, v: &str) {
    map.insert(key(k), Value::String(v.to_owned()));
}

/// A nested mapping of `map`, if present and a mapping.
pub fn get_mapping<'a>(map: &'a Mapping, k: &str) -> Option<&'a Mapping> {
    map.get(&key(k)).and_then(Value::as_mapping)
}

/// A nested mapping of `map`, if present and a mapping, mutably.
pub fn get_mapping_mut<'a>(map: &'a mut Mapping, k: &str) -> Option<&'a mut Mapping> {
    map.get_mut(&key(k)).and_then(Value::as_mapping_mut)
}

/// A nested sequence of `map`, if present and a sequence, mutably.
///
/// A field that exists with any other shape yields `None`; callers skip the
/// affected sub-step rather than failing the document.
pub fn get_sequence_mut<'a>(map: &'a mut Mapping, k: &str) -> Option<&'a mut Vec<Value>> {
    map.get_mut(&key(k)).and_then(Value::as_sequence_mut)
}

/// A nested mapping of `map`, created empty if absent.
///
/// An existing non-mapping value under `k` is replaced, mirroring how the
/// rest of the pipeline treats malformed shapes as absent.
pub fn ensure_mapping<'a>(map: &'a mut Mapping, k: &str) -> &'a mut Mapping {
    let k = key(k);
    if !matches!(map.get(&k), Some(Value::Mapping(_))) {
        map.insert(k.clone(), Value::Mapping(Mapping::new()));
    }
    match map.get_mut(&k) {
        Some(Value::Mapping(inner)) => inner,
        _ => unreachable!("key was just inserted as a mapping"),
    }
}

/// Remove a field from `map`, returning the previous value if any.
pub fn remove(map: &mut Mapping, k: &str) -> Option<Value> {
    map.remove(&key(k))
}
