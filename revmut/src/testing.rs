//! A store wrapper for tests: counts calls, records patches and can inject
//! conflicts or a racing writer.

use std::sync::{
    atomic::{AtomicU32, Ordering},
    Arc, Mutex,
};

use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::Barrier;

use crate::{
    object::ObjectRef,
    store::{memory::MemoryStore, ObjectStore, Patch, StoreError},
};

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct CallCounts {
    pub get: usize,
    pub create: usize,
    pub update: usize,
    pub patch: usize,
    pub update_status: usize,
    pub patch_status: usize,
}

impl CallCounts {
    pub fn writes(&self) -> usize {
        self.create + self.update + self.patch + self.update_status + self.patch_status
    }
}

#[derive(Default)]
pub struct RecordingStore {
    inner: MemoryStore,
    calls: Mutex<CallCounts>,
    patches: Mutex<Vec<Patch>>,
    conflicts: AtomicU32,
    interleaved: Mutex<Option<Patch>>,
    get_barrier: Option<Arc<Barrier>>,
}

impl RecordingStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every `get` waits until `n` callers have reached it.
    pub fn with_get_barrier(mut self, n: usize) -> Self {
        self.get_barrier = Some(Arc::new(Barrier::new(n)));
        self
    }

    /// The wrapped store, for setting up and inspecting state unrecorded.
    pub fn inner(&self) -> &MemoryStore {
        &self.inner
    }

    pub fn calls(&self) -> CallCounts {
        *self.calls.lock().unwrap()
    }

    /// Patches received by `patch` and `patch_status`, in order.
    pub fn patches(&self) -> Vec<Patch> {
        self.patches.lock().unwrap().clone()
    }

    /// Fail the next `n` writes with a conflict, without touching the store.
    pub fn fail_writes_with_conflict(&self, n: u32) {
        self.conflicts.store(n, Ordering::SeqCst);
    }

    /// Apply `patch` unconditionally right before the next write is served,
    /// as if another writer got there first.
    pub fn interleave_before_next_write(&self, patch: Patch) {
        *self.interleaved.lock().unwrap() = Some(patch);
    }

    fn record(&self, count: impl FnOnce(&mut CallCounts) -> &mut usize) {
        *count(&mut self.calls.lock().unwrap()) += 1;
    }

    async fn before_write(&self, key: &ObjectRef) -> Result<(), StoreError> {
        let interleaved = self.interleaved.lock().unwrap().take();
        if let Some(patch) = interleaved {
            self.inner.patch(key, &patch).await?;
        }
        let injected = self
            .conflicts
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1));
        if injected.is_ok() {
            return Err(StoreError::conflict(key, "injected"));
        }
        Ok(())
    }
}

#[async_trait]
impl ObjectStore for RecordingStore {
    async fn get(&self, key: &ObjectRef) -> Result<Value, StoreError> {
        self.record(|c| &mut c.get);
        let result = self.inner.get(key).await;
        if let Some(barrier) = &self.get_barrier {
            barrier.wait().await;
        }
        result
    }

    async fn create(&self, key: &ObjectRef, doc: Value) -> Result<Value, StoreError> {
        self.record(|c| &mut c.create);
        self.before_write(key).await?;
        self.inner.create(key, doc).await
    }

    async fn update(&self, key: &ObjectRef, doc: Value) -> Result<Value, StoreError> {
        self.record(|c| &mut c.update);
        self.before_write(key).await?;
        self.inner.update(key, doc).await
    }

    async fn patch(&self, key: &ObjectRef, patch: &Patch) -> Result<Value, StoreError> {
        self.record(|c| &mut c.patch);
        self.patches.lock().unwrap().push(patch.clone());
        self.before_write(key).await?;
        self.inner.patch(key, patch).await
    }

    async fn update_status(&self, key: &ObjectRef, doc: Value) -> Result<Value, StoreError> {
        self.record(|c| &mut c.update_status);
        self.before_write(key).await?;
        self.inner.update_status(key, doc).await
    }

    async fn patch_status(&self, key: &ObjectRef, patch: &Patch) -> Result<Value, StoreError> {
        self.record(|c| &mut c.patch_status);
        self.patches.lock().unwrap().push(patch.clone());
        self.before_write(key).await?;
        self.inner.patch_status(key, patch).await
    }
}
