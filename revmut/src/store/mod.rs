//! The object store collaborator.
//!
//! The client does not implement storage; it builds on a store that offers
//! atomic get/create/update/patch with a compare-and-swap token. Stores speak
//! in generic JSON documents so that one implementation serves every
//! resource type.

pub mod memory;
pub mod write;

use std::fmt::Display;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::object::ObjectRef;

/// A patch document for [`ObjectStore::patch`] and [`ObjectStore::patch_status`].
#[derive(Debug, Clone, PartialEq)]
pub enum Patch {
    /// RFC 6902 operations. A leading `test` of `/metadata/resourceVersion`
    /// makes the patch conditional on the token.
    Json(json_patch::Patch),
    /// RFC 7396 merge document. A `metadata.resourceVersion` member makes the
    /// patch conditional on the token.
    Merge(Value),
}

impl Display for Patch {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let (kind, doc) = match self {
            Patch::Json(p) => ("json", serde_json::to_string(p)),
            Patch::Merge(v) => ("merge", serde_json::to_string(v)),
        };
        match doc {
            Ok(doc) => write!(f, "{} patch {}", kind, doc),
            Err(_) => write!(f, "{} patch <unprintable>", kind),
        }
    }
}

/// Why the store refused a request, as reported by the store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Reason {
    Conflict,
    NotFound,
    AlreadyExists,
    Invalid,
    /// The store gave no machine-readable reason; only the code is meaningful.
    Unknown,
}

/// An API-level failure reported by the store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Status {
    pub code: u16,
    pub reason: Reason,
    pub message: String,
}

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("{} ({:?}): {}", .0.code, .0.reason, .0.message)]
    Status(Status),
    /// The request did not produce an API answer (IO, decoding, connection).
    #[error(transparent)]
    Transport(#[from] anyhow::Error),
}

impl StoreError {
    pub fn status(code: u16, reason: Reason, message: impl Into<String>) -> Self {
        StoreError::Status(Status {
            code,
            reason,
            message: message.into(),
        })
    }

    pub fn conflict(key: &ObjectRef, message: impl Display) -> Self {
        Self::status(
            409,
            Reason::Conflict,
            format!("operation cannot be fulfilled on {}: {}", key, message),
        )
    }

    pub fn not_found(key: &ObjectRef) -> Self {
        Self::status(404, Reason::NotFound, format!("{} not found", key))
    }

    pub fn already_exists(key: &ObjectRef) -> Self {
        Self::status(409, Reason::AlreadyExists, format!("{} already exists", key))
    }

    pub fn invalid(key: &ObjectRef, message: impl Display) -> Self {
        Self::status(422, Reason::Invalid, format!("{} is invalid: {}", key, message))
    }
}

/// A versioned document store.
///
/// Every successful write returns the document as stored, including the new
/// `metadata.resourceVersion`. The status of a document is an independent
/// sub-resource: body writes (`patch`) leave it alone and status writes leave
/// the body alone. `create` and `update` write the whole document.
#[async_trait]
pub trait ObjectStore: Send + Sync {
    async fn get(&self, key: &ObjectRef) -> Result<Value, StoreError>;

    /// Fails with `AlreadyExists` when the key is taken.
    async fn create(&self, key: &ObjectRef, doc: Value) -> Result<Value, StoreError>;

    /// Replaces the document. Fails with `Conflict` when the document's token
    /// does not match the stored one.
    async fn update(&self, key: &ObjectRef, doc: Value) -> Result<Value, StoreError>;

    async fn patch(&self, key: &ObjectRef, patch: &Patch) -> Result<Value, StoreError>;

    async fn update_status(&self, key: &ObjectRef, doc: Value) -> Result<Value, StoreError>;

    async fn patch_status(&self, key: &ObjectRef, patch: &Patch) -> Result<Value, StoreError>;
}

#[async_trait]
impl<S: ObjectStore + ?Sized> ObjectStore for std::sync::Arc<S> {
    async fn get(&self, key: &ObjectRef) -> Result<Value, StoreError> {
        (**self).get(key).await
    }

    async fn create(&self, key: &ObjectRef, doc: Value) -> Result<Value, StoreError> {
        (**self).create(key, doc).await
    }

    async fn update(&self, key: &ObjectRef, doc: Value) -> Result<Value, StoreError> {
        (**self).update(key, doc).await
    }

    async fn patch(&self, key: &ObjectRef, patch: &Patch) -> Result<Value, StoreError> {
        (**self).patch(key, patch).await
    }

    async fn update_status(&self, key: &ObjectRef, doc: Value) -> Result<Value, StoreError> {
        (**self).update_status(key, doc).await
    }

    async fn patch_status(&self, key: &ObjectRef, patch: &Patch) -> Result<Value, StoreError> {
        (**self).patch_status(key, patch).await
    }
}
