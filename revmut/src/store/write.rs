//! Write semantics shared by the bundled stores.
//!
//! [`apply`] computes the document a store should hold after a write, given
//! what it holds now. It enforces the token check, keeps identity fields
//! pinned to the key, and keeps body and status writes apart.

use json_patch::{jsonptr::PointerBuf, PatchOperation};
use serde_json::{Map, Value};

use super::{Patch, StoreError};
use crate::object::ObjectRef;

pub const STATUS: &str = "status";

/// A single write request against one key.
#[derive(Debug)]
pub enum Write {
    Create(Value),
    Update(Value),
    Patch(Patch),
    UpdateStatus(Value),
    PatchStatus(Patch),
}

/// The JSON pointer of the concurrency token inside a document.
pub fn resource_version_pointer() -> PointerBuf {
    PointerBuf::from_tokens(["metadata", "resourceVersion"])
}

/// The concurrency token of a document, if it has one.
pub fn resource_version(doc: &Value) -> Option<&str> {
    doc.pointer("/metadata/resourceVersion")
        .and_then(Value::as_str)
}

/// Computes the next stored document for `write`, assigning it `revision`.
///
/// `current` is the document stored under `key`, if any.
pub fn apply(
    key: &ObjectRef,
    current: Option<&Value>,
    write: Write,
    revision: &str,
) -> Result<Value, StoreError> {
    let mut next = match write {
        Write::Create(doc) => {
            if current.is_some() {
                return Err(StoreError::already_exists(key));
            }
            doc
        }
        Write::Update(doc) => {
            let current = current.ok_or_else(|| StoreError::not_found(key))?;
            check_token(key, current, resource_version(&doc))?;
            doc
        }
        Write::Patch(patch) => {
            let current = current.ok_or_else(|| StoreError::not_found(key))?;
            let mut next = current.clone();
            apply_patch(key, current, &mut next, &patch)?;
            replace_status(key, &mut next, current.get(STATUS).cloned())?;
            next
        }
        Write::UpdateStatus(doc) => {
            let current = current.ok_or_else(|| StoreError::not_found(key))?;
            check_token(key, current, resource_version(&doc))?;
            let mut next = current.clone();
            replace_status(key, &mut next, doc.get(STATUS).cloned())?;
            next
        }
        Write::PatchStatus(patch) => {
            let current = current.ok_or_else(|| StoreError::not_found(key))?;
            let mut patched = current.clone();
            apply_patch(key, current, &mut patched, &patch)?;
            let mut next = current.clone();
            replace_status(key, &mut next, patched.get(STATUS).cloned())?;
            next
        }
    };

    let metadata = metadata_mut(key, &mut next)?;
    metadata.insert("namespace".to_owned(), Value::String(key.namespace.clone()));
    metadata.insert("name".to_owned(), Value::String(key.name.clone()));
    metadata.insert(
        "resourceVersion".to_owned(),
        Value::String(revision.to_owned()),
    );
    Ok(next)
}

fn check_token(key: &ObjectRef, current: &Value, expected: Option<&str>) -> Result<(), StoreError> {
    // A write without a token is unconditional.
    let Some(expected) = expected else {
        return Ok(());
    };
    match resource_version(current) {
        Some(actual) if actual == expected => Ok(()),
        actual => Err(StoreError::conflict(
            key,
            format!(
                "the object has been modified; expected version {}, found {}",
                expected,
                actual.unwrap_or("<none>")
            ),
        )),
    }
}

fn apply_patch(
    key: &ObjectRef,
    current: &Value,
    doc: &mut Value,
    patch: &Patch,
) -> Result<(), StoreError> {
    match patch {
        Patch::Json(patch) => {
            let token_path = resource_version_pointer();
            for op in patch.0.iter() {
                if let PatchOperation::Test(test) = op {
                    if test.path == token_path {
                        check_token(key, current, Some(test.value.as_str().unwrap_or("")))?;
                    }
                }
            }
            json_patch::patch(doc, &patch.0).map_err(|e| StoreError::invalid(key, e))
        }
        Patch::Merge(merge) => {
            if !merge.is_object() {
                return Err(StoreError::invalid(key, "merge patch must be an object"));
            }
            if let Some(token) = merge.pointer("/metadata/resourceVersion") {
                check_token(key, current, Some(token.as_str().unwrap_or("")))?;
            }
            json_patch::merge(doc, merge);
            Ok(())
        }
    }
}

fn replace_status(key: &ObjectRef, doc: &mut Value, status: Option<Value>) -> Result<(), StoreError> {
    let object = doc
        .as_object_mut()
        .ok_or_else(|| StoreError::invalid(key, "document must be an object"))?;
    match status {
        Some(status) => {
            object.insert(STATUS.to_owned(), status);
        }
        None => {
            object.remove(STATUS);
        }
    }
    Ok(())
}

fn metadata_mut<'a>(key: &ObjectRef, doc: &'a mut Value) -> Result<&'a mut Map<String, Value>, StoreError> {
    doc.as_object_mut()
        .ok_or_else(|| StoreError::invalid(key, "document must be an object"))?
        .entry("metadata")
        .or_insert_with(|| Value::Object(Map::new()))
        .as_object_mut()
        .ok_or_else(|| StoreError::invalid(key, "metadata must be an object"))
}
