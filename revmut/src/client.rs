//! Read-modify-write operations over an [`ObjectStore`].
//!
//! Each mutating operation fetches the current snapshot, lets the caller's
//! function edit it, and writes back only what changed, guarded by the token
//! of the fetched snapshot. A conflicting write restarts the whole sequence
//! under the client's [`RetryPolicy`], so the caller's function runs once per
//! attempt.

use std::sync::atomic::{AtomicBool, Ordering};

use serde_json::Value;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info_span, Instrument as _};

use crate::{
    error::{Error, Result},
    object::{Applied, Object, ObjectRef, Outcome},
    options::ClientOptions,
    patch::{self, PatchPlan},
    retry::RetryPolicy,
    store::{
        write::{resource_version, STATUS},
        ObjectStore, Patch,
    },
};

/// A conflict-safe client for one store.
///
/// Holds no per-object state; concurrent operations on different objects
/// are independent, and races on one object are settled by the store.
#[derive(Debug)]
pub struct Client<S> {
    store: S,
    policy: RetryPolicy,
}

impl<S: ObjectStore> Client<S> {
    /// A client with the default backoff.
    pub fn new(store: S) -> Self {
        Self::with_policy(store, RetryPolicy::default())
    }

    pub fn with_policy(store: S, policy: RetryPolicy) -> Self {
        Client { store, policy }
    }

    pub fn with_options(store: S, options: ClientOptions) -> anyhow::Result<Self> {
        Ok(Self::with_policy(store, options.retry_policy()?))
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    /// Fetch `key`, apply `mutate` and write the whole document back if it
    /// changed.
    pub async fn fetch_and_update<T, F>(
        &self,
        cancel: &CancellationToken,
        key: &ObjectRef,
        mutate: F,
    ) -> Result<Applied<T>>
    where
        T: Object,
        F: FnMut(&mut T) -> anyhow::Result<()> + Send,
    {
        let mutate = Mutex::new(mutate);
        self.policy
            .execute(key, cancel, || async {
                let (object, before) = self.fetch::<T>(key).await?;
                self.update_fetched(key, &mutate, object, before).await
            })
            .instrument(info_span!("Updating object", object = %key))
            .await
    }

    /// Fetch `key`, apply `mutate` and write the changes back as a body patch
    /// and a status patch, each only when its part changed.
    pub async fn fetch_and_patch<T, F>(
        &self,
        cancel: &CancellationToken,
        key: &ObjectRef,
        mutate: F,
    ) -> Result<Applied<T>>
    where
        T: Object,
        F: FnMut(&mut T) -> anyhow::Result<()> + Send,
    {
        let mutate = Mutex::new(mutate);
        self.policy
            .execute(key, cancel, || async {
                let (object, before) = self.fetch::<T>(key).await?;
                self.patch_fetched(key, &mutate, object, before).await
            })
            .instrument(info_span!("Patching object", object = %key))
            .await
    }

    /// Like [`Client::fetch_and_update`], but creates the object from
    /// `T::default()` when it does not exist.
    pub async fn create_or_update<T, F>(
        &self,
        cancel: &CancellationToken,
        key: &ObjectRef,
        mutate: F,
    ) -> Result<Applied<T>>
    where
        T: Object + Default,
        F: FnMut(&mut T) -> anyhow::Result<()> + Send,
    {
        let mutate = Mutex::new(mutate);
        self.policy
            .execute(key, cancel, || async {
                match self.fetch_optional::<T>(key).await? {
                    Some((object, before)) => {
                        self.update_fetched(key, &mutate, object, before).await
                    }
                    None => self.create_mutated(key, &mutate).await,
                }
            })
            .instrument(info_span!("Creating or updating object", object = %key))
            .await
    }

    /// Like [`Client::fetch_and_patch`], but creates the object from
    /// `T::default()` when it does not exist.
    pub async fn create_or_patch<T, F>(
        &self,
        cancel: &CancellationToken,
        key: &ObjectRef,
        mutate: F,
    ) -> Result<Applied<T>>
    where
        T: Object + Default,
        F: FnMut(&mut T) -> anyhow::Result<()> + Send,
    {
        let mutate = Mutex::new(mutate);
        self.policy
            .execute(key, cancel, || async {
                match self.fetch_optional::<T>(key).await? {
                    Some((object, before)) => {
                        self.patch_fetched(key, &mutate, object, before).await
                    }
                    None => self.create_mutated(key, &mutate).await,
                }
            })
            .instrument(info_span!("Creating or patching object", object = %key))
            .await
    }

    /// Creates the object when absent; otherwise writes the changes as one
    /// RFC 7396 merge patch.
    ///
    /// The merge patch is computed over the whole document. It is sent to the
    /// body endpoint, so status changes made by `mutate` are not persisted.
    pub async fn create_or_merge_patch<T, F>(
        &self,
        cancel: &CancellationToken,
        key: &ObjectRef,
        mutate: F,
    ) -> Result<Applied<T>>
    where
        T: Object + Default,
        F: FnMut(&mut T) -> anyhow::Result<()> + Send,
    {
        let mutate = Mutex::new(mutate);
        self.policy
            .execute(key, cancel, || async {
                let Some((mut object, before)) = self.fetch_optional::<T>(key).await? else {
                    return self.create_mutated(key, &mutate).await;
                };
                let token = object.resource_version().map(str::to_owned);
                apply_mutation(key, &mutate, &mut object).await?;
                let after = patch::to_tree(key, &object)?;
                let Some(merge) = patch::guarded_merge_diff(&before, &after, token.as_deref())
                else {
                    object.metadata_mut().resource_version = token;
                    return Ok(Applied {
                        outcome: Outcome::NoChange,
                        object,
                    });
                };
                let merge = Patch::Merge(merge);
                debug!(%merge, "writing merge patch");
                let stored = self
                    .store
                    .patch(key, &merge)
                    .await
                    .map_err(|e| Error::from_store(key, e))?;
                Ok(Applied {
                    outcome: Outcome::Updated,
                    object: patch::from_tree(key, stored)?,
                })
            })
            .instrument(info_span!("Creating or merge-patching object", object = %key))
            .await
    }

    /// Create `object` unless `key` already exists.
    ///
    /// Losing a creation race to another writer is not an error: the outcome
    /// is [`Outcome::NoChange`], as when the object was there all along.
    pub async fn create_if_absent<T: Object>(
        &self,
        cancel: &CancellationToken,
        key: &ObjectRef,
        object: &T,
    ) -> Result<Outcome> {
        check_identity(key, object)?;
        self.policy
            .execute(key, cancel, || async {
                match self.store.get(key).await {
                    Ok(_) => return Ok(Outcome::NoChange),
                    Err(e) => {
                        let e = Error::from_store(key, e);
                        if !e.is_not_found() {
                            return Err(e);
                        }
                    }
                }
                match self.create(key, object).await {
                    Ok(_) => Ok(Outcome::Created),
                    Err(e) if e.is_already_exists() => {
                        debug!("lost creation race");
                        Ok(Outcome::NoChange)
                    }
                    Err(e) => Err(e),
                }
            })
            .instrument(info_span!("Creating object if absent", object = %key))
            .await
    }

    /// Write the status of `object`, which the caller has already fetched and
    /// edited.
    ///
    /// The first attempt is guarded by the token `object` carries. After a
    /// conflict, the latest document is fetched and the same status is
    /// written against its token.
    pub async fn update_status<T: Object>(
        &self,
        cancel: &CancellationToken,
        key: &ObjectRef,
        object: &T,
    ) -> Result<Applied<T>> {
        check_identity(key, object)?;
        let mut doc = patch::to_tree(key, object)?;
        let status = patch::take_status(&mut doc);
        let first = AtomicBool::new(true);
        self.policy
            .execute(key, cancel, || async {
                let mut doc = if first.swap(false, Ordering::SeqCst) {
                    doc.clone()
                } else {
                    self.get(key).await?
                };
                if let Some(map) = doc.as_object_mut() {
                    match &status {
                        Some(status) => map.insert(STATUS.to_owned(), status.clone()),
                        None => map.remove(STATUS),
                    };
                }
                debug!(resource_version = resource_version(&doc), "writing status");
                let stored = self
                    .store
                    .update_status(key, doc)
                    .await
                    .map_err(|e| Error::from_store(key, e))?;
                Ok(Applied {
                    outcome: Outcome::StatusUpdated,
                    object: patch::from_tree(key, stored)?,
                })
            })
            .instrument(info_span!("Updating object status", object = %key))
            .await
    }

    pub(crate) async fn get(&self, key: &ObjectRef) -> Result<Value> {
        self.store
            .get(key)
            .await
            .map_err(|e| Error::from_store(key, e))
    }

    /// The typed snapshot of `key` and its tree.
    ///
    /// The tree is taken from the typed snapshot rather than the stored
    /// document, so members `T` does not model never show up in a diff.
    async fn fetch<T: Object>(&self, key: &ObjectRef) -> Result<(T, Value)> {
        let object: T = patch::from_tree(key, self.get(key).await?)?;
        let tree = patch::to_tree(key, &object)?;
        Ok((object, tree))
    }

    async fn fetch_optional<T: Object>(&self, key: &ObjectRef) -> Result<Option<(T, Value)>> {
        match self.fetch(key).await {
            Ok(fetched) => Ok(Some(fetched)),
            Err(e) if e.is_not_found() => Ok(None),
            Err(e) => Err(e),
        }
    }

    async fn create<T: Object>(&self, key: &ObjectRef, object: &T) -> Result<Value> {
        let mut doc = patch::to_tree(key, object)?;
        patch::strip_resource_version(&mut doc);
        debug!("creating");
        self.store
            .create(key, doc)
            .await
            .map_err(|e| Error::from_store(key, e))
    }

    async fn create_mutated<T, F>(&self, key: &ObjectRef, mutate: &Mutex<F>) -> Result<Applied<T>>
    where
        T: Object + Default,
        F: FnMut(&mut T) -> anyhow::Result<()> + Send,
    {
        let mut object = T::default();
        let metadata = object.metadata_mut();
        metadata.namespace = key.namespace.clone();
        metadata.name = key.name.clone();
        apply_mutation(key, mutate, &mut object).await?;
        let stored = self.create(key, &object).await?;
        Ok(Applied {
            outcome: Outcome::Created,
            object: patch::from_tree(key, stored)?,
        })
    }

    async fn update_fetched<T, F>(
        &self,
        key: &ObjectRef,
        mutate: &Mutex<F>,
        mut object: T,
        before: Value,
    ) -> Result<Applied<T>>
    where
        T: Object,
        F: FnMut(&mut T) -> anyhow::Result<()> + Send,
    {
        let token = object.resource_version().map(str::to_owned);
        apply_mutation(key, mutate, &mut object).await?;
        let mut after = patch::to_tree(key, &object)?;
        if patch::structurally_equal(&before, &after) {
            object.metadata_mut().resource_version = token;
            return Ok(Applied {
                outcome: Outcome::NoChange,
                object,
            });
        }
        patch::set_resource_version(&mut after, token.as_deref());
        debug!(resource_version = token.as_deref(), "writing full document");
        let stored = self
            .store
            .update(key, after)
            .await
            .map_err(|e| Error::from_store(key, e))?;
        Ok(Applied {
            outcome: Outcome::Updated,
            object: patch::from_tree(key, stored)?,
        })
    }

    async fn patch_fetched<T, F>(
        &self,
        key: &ObjectRef,
        mutate: &Mutex<F>,
        mut object: T,
        before: Value,
    ) -> Result<Applied<T>>
    where
        T: Object,
        F: FnMut(&mut T) -> anyhow::Result<()> + Send,
    {
        let fetched_token = object.resource_version().map(str::to_owned);
        let mut token = fetched_token.clone();
        apply_mutation(key, mutate, &mut object).await?;
        let after = patch::to_tree(key, &object)?;
        let plan = PatchPlan::compute(&before, &after);

        let body_changed = plan.body.is_some();
        let status_changed = plan.status.is_some();
        let mut stored = None;

        if let Some(body) = plan.body {
            let body = Patch::Json(patch::guard(body, token.as_deref()));
            debug!(%body, "writing body patch");
            let doc = self
                .store
                .patch(key, &body)
                .await
                .map_err(|e| Error::from_store(key, e))?;
            token = resource_version(&doc).map(str::to_owned);
            stored = Some(doc);
        }
        // Guarded by the token of the body write, if there was one.
        if let Some(status) = plan.status {
            let status = Patch::Json(patch::guard(status, token.as_deref()));
            debug!(%status, "writing status patch");
            let doc = self
                .store
                .patch_status(key, &status)
                .await
                .map_err(|e| Error::from_store(key, e))?;
            stored = Some(doc);
        }

        let outcome = match (body_changed, status_changed) {
            (false, false) => Outcome::NoChange,
            (true, false) => Outcome::Updated,
            (false, true) => Outcome::StatusUpdated,
            (true, true) => Outcome::UpdatedAndStatusUpdated,
        };
        let object = match stored {
            Some(doc) => patch::from_tree(key, doc)?,
            None => {
                // The token is left out of the diff; report the fetched one.
                object.metadata_mut().resource_version = fetched_token;
                object
            }
        };
        Ok(Applied { outcome, object })
    }
}

async fn apply_mutation<T, F>(key: &ObjectRef, mutate: &Mutex<F>, object: &mut T) -> Result<()>
where
    T: Object,
    F: FnMut(&mut T) -> anyhow::Result<()> + Send,
{
    let mut mutate = mutate.lock().await;
    (*mutate)(object).map_err(|error| Error::Mutation {
        key: key.clone(),
        error,
    })?;
    check_identity(key, object)
}

fn check_identity<T: Object>(key: &ObjectRef, object: &T) -> Result<()> {
    let metadata = object.metadata();
    if key.matches(metadata) {
        Ok(())
    } else {
        Err(Error::IdentityViolation {
            key: key.clone(),
            namespace: metadata.namespace.clone(),
            name: metadata.name.clone(),
        })
    }
}
