//! Snapshot-to-tree conversion and the patches computed from a before/after
//! pair.
//!
//! Snapshots are compared as generic JSON trees, so nothing here depends on
//! a resource schema. The `status` member is split off before the body is
//! compared, because the store versions it separately: a status-only change
//! must not produce a body patch, and vice versa.

use json_patch::{PatchOperation, TestOperation};
use serde::{de::DeserializeOwned, Serialize};
use serde_json::{Map, Value};

use crate::{
    error::{Error, Result},
    object::ObjectRef,
    store::write::{resource_version_pointer, STATUS},
};

/// Serialize a snapshot into a generic tree. The tree is always a map.
pub fn to_tree<T: Serialize>(key: &ObjectRef, object: &T) -> Result<Value> {
    let tree = serde_json::to_value(object)
        .map_err(|e| Error::malformed(format_args!("snapshot of {}", key), e))?;
    if !tree.is_object() {
        return Err(Error::malformed(
            format_args!("snapshot of {}", key),
            serde::ser::Error::custom("a resource must serialize to a map"),
        ));
    }
    Ok(tree)
}

pub fn from_tree<T: DeserializeOwned>(key: &ObjectRef, tree: Value) -> Result<T> {
    serde_json::from_value(tree).map_err(|e| Error::malformed(format_args!("document {}", key), e))
}

/// Remove and return the status member of a document.
pub fn take_status(tree: &mut Value) -> Option<Value> {
    tree.as_object_mut().and_then(|map| map.remove(STATUS))
}

/// Remove the concurrency token of a document, if any.
pub fn strip_resource_version(tree: &mut Value) {
    if let Some(metadata) = tree.get_mut("metadata").and_then(Value::as_object_mut) {
        metadata.remove("resourceVersion");
    }
}

/// Set (or with `None`, remove) the concurrency token of a document.
pub fn set_resource_version(tree: &mut Value, resource_version: Option<&str>) {
    let Some(resource_version) = resource_version else {
        strip_resource_version(tree);
        return;
    };
    if let Some(map) = tree.as_object_mut() {
        let metadata = map
            .entry("metadata")
            .or_insert_with(|| Value::Object(Map::new()));
        if let Some(metadata) = metadata.as_object_mut() {
            metadata.insert(
                "resourceVersion".to_owned(),
                Value::String(resource_version.to_owned()),
            );
        }
    }
}

/// Equality of two documents as trees, ignoring key order and the
/// concurrency token.
pub fn structurally_equal(a: &Value, b: &Value) -> bool {
    let mut a = a.clone();
    let mut b = b.clone();
    strip_resource_version(&mut a);
    strip_resource_version(&mut b);
    a == b
}

/// The writes needed to turn one snapshot into another.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct PatchPlan {
    /// RFC 6902 operations on everything but `status`.
    pub body: Option<json_patch::Patch>,
    /// RFC 6902 operations rooted at the document, touching only `/status`.
    pub status: Option<json_patch::Patch>,
}

impl PatchPlan {
    /// Diff `before` against `after`. The token is ignored; the status is
    /// compared on its own.
    pub fn compute(before: &Value, after: &Value) -> PatchPlan {
        let mut before = before.clone();
        let mut after = after.clone();
        strip_resource_version(&mut before);
        strip_resource_version(&mut after);
        let before_status = take_status(&mut before);
        let after_status = take_status(&mut after);

        let body = json_patch::diff(&before, &after);
        let status = if before_status != after_status {
            Some(json_patch::diff(
                &status_only(before_status),
                &status_only(after_status),
            ))
        } else {
            None
        };

        PatchPlan {
            body: non_empty(body),
            status: status.and_then(non_empty),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.body.is_none() && self.status.is_none()
    }
}

fn status_only(status: Option<Value>) -> Value {
    let mut map = Map::new();
    if let Some(status) = status {
        map.insert(STATUS.to_owned(), status);
    }
    Value::Object(map)
}

fn non_empty(patch: json_patch::Patch) -> Option<json_patch::Patch> {
    if patch.0.is_empty() {
        None
    } else {
        Some(patch)
    }
}

/// Prefix `patch` with a test of the concurrency token, making it apply only
/// to the version it was computed against. Without a token the patch is
/// returned unconditional.
pub fn guard(patch: json_patch::Patch, resource_version: Option<&str>) -> json_patch::Patch {
    let Some(resource_version) = resource_version else {
        return patch;
    };
    let mut ops = Vec::with_capacity(patch.0.len() + 1);
    ops.push(PatchOperation::Test(TestOperation {
        path: resource_version_pointer(),
        value: Value::String(resource_version.to_owned()),
    }));
    ops.extend(patch.0);
    json_patch::Patch(ops)
}

/// An RFC 7396 merge document that turns `before` into `after`.
///
/// Only changed members appear; removed members are `null`; nested maps are
/// descended into and everything else (including lists) is replaced whole.
/// Returns `None` when nothing changed. Neither document may hold `null`
/// values in maps, as merge patches cannot express them.
pub fn merge_diff(before: &Value, after: &Value) -> Option<Value> {
    match (before, after) {
        (Value::Object(before), Value::Object(after)) => {
            let mut patch = Map::new();
            for (name, old) in before {
                if !after.contains_key(name) {
                    patch.insert(name.clone(), Value::Null);
                } else if let Some(change) = merge_diff(old, &after[name]) {
                    patch.insert(name.clone(), change);
                }
            }
            for (name, new) in after {
                if !before.contains_key(name) {
                    patch.insert(name.clone(), new.clone());
                }
            }
            if patch.is_empty() {
                None
            } else {
                Some(Value::Object(patch))
            }
        }
        (before, after) if before == after => None,
        (_, after) => Some(after.clone()),
    }
}

/// A merge document for `before` -> `after`, conditional on `resource_version`.
pub fn guarded_merge_diff(
    before: &Value,
    after: &Value,
    resource_version: Option<&str>,
) -> Option<Value> {
    let mut before = before.clone();
    let mut after = after.clone();
    strip_resource_version(&mut before);
    strip_resource_version(&mut after);
    let mut patch = merge_diff(&before, &after)?;
    if resource_version.is_some() {
        set_resource_version(&mut patch, resource_version);
    }
    Some(patch)
}
