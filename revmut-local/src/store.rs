use std::{
    fs::{self, File, OpenOptions},
    io::{self, Write as _},
    path::{Path, PathBuf},
};

use anyhow::{Context, Result};
use async_trait::async_trait;
use revmut::{
    store::write::{self, resource_version, Write},
    ObjectRef, ObjectStore, Patch, StoreError,
};
use serde_json::Value;
use tracing::debug;

use crate::wait::LockWait;

const LOCK_FILE: &str = ".lock";

/// An [`ObjectStore`] that keeps every object as a pretty-printed JSON file,
/// at `<root>/<kind>/<namespace>/<name>.json`.
///
/// Writes to a kind are serialized with an advisory lock on
/// `<root>/<kind>/.lock`, so any number of handles (in any number of
/// processes) can share a directory. Files are replaced atomically; reads do
/// not lock.
///
/// Versions count per object: `1` on create, then up by one per write.
#[derive(Debug, Clone)]
pub struct LocalStore {
    root: PathBuf,
}

impl LocalStore {
    pub fn open<P: AsRef<Path>>(root: P) -> Result<LocalStore> {
        let root = root.as_ref();
        fs::create_dir_all(root)
            .with_context(|| format!("Could not create store directory {}", root.display()))?;
        Ok(LocalStore {
            root: root.to_owned(),
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn kind_dir(&self, key: &ObjectRef) -> Result<PathBuf, StoreError> {
        check_component(key, "kind", &key.kind)?;
        Ok(self.root.join(&key.kind))
    }

    fn object_path(&self, key: &ObjectRef) -> Result<PathBuf, StoreError> {
        check_component(key, "namespace", &key.namespace)?;
        check_component(key, "name", &key.name)?;
        Ok(self
            .kind_dir(key)?
            .join(&key.namespace)
            .join(format!("{}.json", key.name)))
    }

    async fn write(&self, key: &ObjectRef, write: Write) -> Result<Value, StoreError> {
        let kind_dir = self.kind_dir(key)?;
        let path = self.object_path(key)?;
        let key = key.clone();
        tokio::task::spawn_blocking(move || write_locked(&kind_dir, &path, &key, write))
            .await
            .map_err(anyhow::Error::from)?
    }
}

fn check_component(key: &ObjectRef, what: &str, value: &str) -> Result<(), StoreError> {
    let unsafe_char = |c: char| c == '/' || c == '\\' || c == '\0';
    if value.is_empty() || value.starts_with('.') || value.contains(unsafe_char) {
        return Err(StoreError::invalid(
            key,
            format!("{} {:?} cannot be stored as a file name", what, value),
        ));
    }
    Ok(())
}

fn lock_write<'a>(
    locking: &'a mut fd_lock::RwLock<File>,
    lock_path: &Path,
) -> Result<fd_lock::RwLockWriteGuard<'a, File>> {
    let _wait = LockWait::start(lock_path.to_owned());
    Ok(locking.write()?)
}

fn write_locked(
    kind_dir: &Path,
    path: &Path,
    key: &ObjectRef,
    write: Write,
) -> Result<Value, StoreError> {
    let dir = path.parent().unwrap_or(kind_dir);
    fs::create_dir_all(dir).with_context(|| format!("Could not create {}", dir.display()))?;
    let lock_path = kind_dir.join(LOCK_FILE);
    let lock_file = OpenOptions::new()
        .create(true)
        .truncate(false)
        .write(true)
        .open(&lock_path)
        .with_context(|| format!("Could not open lock file {}", lock_path.display()))?;
    let mut locking = fd_lock::RwLock::new(lock_file);
    let lock_guard = lock_write(&mut locking, &lock_path)
        .with_context(|| format!("Could not lock {}", lock_path.display()))?;

    let current = read_document(path)?;
    let revision = current
        .as_ref()
        .and_then(resource_version)
        .and_then(|v| v.parse::<u64>().ok())
        .unwrap_or(0)
        + 1;
    let next = write::apply(key, current.as_ref(), write, &revision.to_string())?;
    write_document(dir, path, &next)?;
    debug!(%key, revision, "stored");

    drop(lock_guard);
    Ok(next)
}

fn read_document(path: &Path) -> Result<Option<Value>> {
    let text = match fs::read_to_string(path) {
        Ok(text) => text,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
        Err(e) => {
            return Err(e).with_context(|| format!("Could not read {}", path.display()));
        }
    };
    let doc = serde_json::from_str(&text)
        .with_context(|| format!("Stored object {} is not valid JSON", path.display()))?;
    Ok(Some(doc))
}

fn write_document(dir: &Path, path: &Path, doc: &Value) -> Result<()> {
    let mut file = tempfile::NamedTempFile::new_in(dir)
        .with_context(|| format!("Could not create a temporary file in {}", dir.display()))?;
    // Pretty, so that the store stays readable and diffable by hand.
    serde_json::to_writer_pretty(&mut file, doc)?;
    file.write_all(b"\n")?;
    file.as_file().sync_all()?;
    file.persist(path)
        .with_context(|| format!("Could not replace {}", path.display()))?;
    Ok(())
}

#[async_trait]
impl ObjectStore for LocalStore {
    async fn get(&self, key: &ObjectRef) -> Result<Value, StoreError> {
        let path = self.object_path(key)?;
        let doc = tokio::task::spawn_blocking(move || read_document(&path))
            .await
            .map_err(anyhow::Error::from)??;
        doc.ok_or_else(|| StoreError::not_found(key))
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
    use revmut::{
        classify::{classify, ErrorClass},
        CancellationToken, Client, DynamicObject, Outcome,
    };
    use serde_json::json;

    use super::*;

    fn key() -> ObjectRef {
        ObjectRef::new("Widget", "ns", "a")
    }

    #[tokio::test]
    async fn objects_live_in_kind_namespace_name_files() {
        let dir = tempfile::tempdir().unwrap();
        let store = LocalStore::open(dir.path()).unwrap();
        let created = store.create(&key(), json!({"spec": {"size": 1}})).await.unwrap();
        assert_eq!(resource_version(&created), Some("1"));

        let on_disk: Value = serde_json::from_str(
            &fs::read_to_string(dir.path().join("Widget/ns/a.json")).unwrap(),
        )
        .unwrap();
        assert_eq!(on_disk, created);
        assert_eq!(store.get(&key()).await.unwrap(), created);
    }

    #[tokio::test]
    async fn stale_token_conflicts_across_handles() {
        let dir = tempfile::tempdir().unwrap();
        let a = LocalStore::open(dir.path()).unwrap();
        let b = LocalStore::open(dir.path()).unwrap();

        a.create(&key(), json!({"spec": {"size": 1}})).await.unwrap();
        let seen_by_b = b.get(&key()).await.unwrap();

        let mut doc = a.get(&key()).await.unwrap();
        doc["spec"]["size"] = json!(2);
        let updated = a.update(&key(), doc).await.unwrap();
        assert_eq!(resource_version(&updated), Some("2"));

        let mut stale = seen_by_b;
        stale["spec"]["size"] = json!(3);
        let err = b.update(&key(), stale).await.unwrap_err();
        assert_eq!(classify(&err), ErrorClass::Conflict);
        assert_eq!(b.get(&key()).await.unwrap()["spec"]["size"], json!(2));
    }

    #[tokio::test]
    async fn body_patch_keeps_status() {
        let dir = tempfile::tempdir().unwrap();
        let store = LocalStore::open(dir.path()).unwrap();
        store
            .create(&key(), json!({"spec": {"size": 1}, "status": {"phase": "Pending"}}))
            .await
            .unwrap();
        let patched = store
            .patch(
                &key(),
                &Patch::Merge(json!({"spec": {"size": 2}, "status": {"phase": "Gone"}})),
            )
            .await
            .unwrap();
        assert_eq!(patched["spec"]["size"], json!(2));
        assert_eq!(patched["status"]["phase"], json!("Pending"));
    }

    #[tokio::test]
    async fn missing_and_unsafe_keys() {
        let dir = tempfile::tempdir().unwrap();
        let store = LocalStore::open(dir.path()).unwrap();
        let err = store.get(&key()).await.unwrap_err();
        assert_eq!(classify(&err), ErrorClass::NotFound);

        for bad in [
            ObjectRef::new("Widget", "..", "a"),
            ObjectRef::new("Widget", "ns", "a/b"),
            ObjectRef::new("", "ns", "a"),
            ObjectRef::new("Widget", "ns", ".lock"),
        ] {
            let err = store.create(&bad, json!({})).await.unwrap_err();
            assert_eq!(classify(&err), ErrorClass::Other, "{}", bad);
        }
    }

    #[tokio::test]
    async fn client_runs_against_local_store() {
        let dir = tempfile::tempdir().unwrap();
        let client = Client::new(LocalStore::open(dir.path()).unwrap());
        let cancel = CancellationToken::new();

        let object = DynamicObject::new(&key()).with_field("status", json!({"phase": "Pending"}));
        let outcome = client.create_if_absent(&cancel, &key(), &object).await.unwrap();
        assert_eq!(outcome, Outcome::Created);

        let applied = client
            .fetch_and_patch(&cancel, &key(), |o: &mut DynamicObject| {
                *o.status_mut() = json!({"phase": "Running"});
                Ok(())
            })
            .await
            .unwrap();
        assert_eq!(applied.outcome, Outcome::StatusUpdated);
        assert_eq!(applied.object.metadata.resource_version.as_deref(), Some("2"));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_increments_are_not_lost() {
        let dir = tempfile::tempdir().unwrap();
        let store = LocalStore::open(dir.path()).unwrap();
        store.create(&key(), json!({"count": 0})).await.unwrap();

        let options = revmut::ClientOptions {
            backoff: revmut::Backoff {
                steps: 50,
                duration: std::time::Duration::from_millis(1),
                factor: 1.0,
                jitter: 1.0,
            },
        };
        let mut tasks = Vec::new();
        for _ in 0..8 {
            let client = Client::with_options(store.clone(), options.clone()).unwrap();
            tasks.push(tokio::spawn(async move {
                client
                    .fetch_and_update(&CancellationToken::new(), &key(), |o: &mut DynamicObject| {
                        let count = o.fields["count"].as_u64().unwrap_or(0);
                        o.fields.insert("count".to_owned(), json!(count + 1));
                        Ok(())
                    })
                    .await
            }));
        }
        for task in tasks {
            task.await.unwrap().unwrap();
        }
        assert_eq!(store.get(&key()).await.unwrap()["count"], json!(8));
    }
}
