use std::collections::BTreeMap;

use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::Mutex;

use super::{
    write::{self, Write},
    ObjectStore, Patch, StoreError,
};
use crate::object::ObjectRef;

/// An [`ObjectStore`] held in process memory.
///
/// Versions come from a single store-wide counter, rendered as `v1`, `v2`, ...
#[derive(Debug, Default)]
pub struct MemoryStore {
    inner: Mutex<Inner>,
}

#[derive(Debug, Default)]
struct Inner {
    objects: BTreeMap<ObjectRef, Value>,
    revision: u64,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored objects.
    pub async fn len(&self) -> usize {
        self.inner.lock().await.objects.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    async fn write(&self, key: &ObjectRef, write: Write) -> Result<Value, StoreError> {
        let mut inner = self.inner.lock().await;
        let revision = inner.revision + 1;
        let next = write::apply(
            key,
            inner.objects.get(key),
            write,
            &format!("v{}", revision),
        )?;
        inner.revision = revision;
        inner.objects.insert(key.clone(), next.clone());
        Ok(next)
    }
}

#[async_trait]
impl ObjectStore for MemoryStore {
    async fn get(&self, key: &ObjectRef) -> Result<Value, StoreError> {
        self.inner
            .lock()
            .await
            .objects
            .get(key)
            .cloned()
            .ok_or_else(|| StoreError::not_found(key))
    }

    async fn create(&self, key: &ObjectRef, doc: Value) -> Result<Value, StoreError> {
        self.write(key, Write::Create(doc)).await
    }

    async fn update(&self, key: &ObjectRef, doc: Value) -> Result<Value, StoreError> {
        self.write(key, Write::Update(doc)).await
    }

    async fn patch(&self, key: &ObjectRef, patch: &Patch) -> Result<Value, StoreError> {
        self.write(key, Write::Patch(patch.clone())).await
    }

    async fn update_status(&self, key: &ObjectRef, doc: Value) -> Result<Value, StoreError> {
        self.write(key, Write::UpdateStatus(doc)).await
    }

    async fn patch_status(&self, key: &ObjectRef, patch: &Patch) -> Result<Value, StoreError> {
        self.write(key, Write::PatchStatus(patch.clone())).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::classify::{classify, ErrorClass};
    use serde_json::json;

    #[tokio::test]
    async fn versions_increase_across_keys() {
        let store = MemoryStore::new();
        let a = ObjectRef::new("Widget", "ns", "a");
        let b = ObjectRef::new("Widget", "ns", "b");
        let doc_a = store.create(&a, json!({"spec": {}})).await.unwrap();
        let doc_b = store.create(&b, json!({"spec": {}})).await.unwrap();
        assert_eq!(write::resource_version(&doc_a), Some("v1"));
        assert_eq!(write::resource_version(&doc_b), Some("v2"));
        assert_eq!(store.len().await, 2);
    }

    #[tokio::test]
    async fn failed_write_leaves_store_untouched() {
        let store = MemoryStore::new();
        let key = ObjectRef::new("Widget", "ns", "a");
        let created = store.create(&key, json!({"spec": {"size": 1}})).await.unwrap();

        let mut stale = created.clone();
        stale["metadata"]["resourceVersion"] = json!("v0");
        stale["spec"]["size"] = json!(2);
        let err = store.update(&key, stale).await.unwrap_err();
        assert_eq!(classify(&err), ErrorClass::Conflict);

        assert_eq!(store.get(&key).await.unwrap(), created);
    }

    #[tokio::test]
    async fn get_missing_is_not_found() {
        let store = MemoryStore::new();
        let err = store
            .get(&ObjectRef::new("Widget", "ns", "nope"))
            .await
            .unwrap_err();
        assert_eq!(classify(&err), ErrorClass::NotFound);
        assert!(store.is_empty().await);
    }
}
