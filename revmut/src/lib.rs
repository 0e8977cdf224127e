//! Conflict-safe read-modify-write operations on a versioned object store.
//!
//! A [`Client`] fetches an object, hands it to a caller-supplied mutation
//! function, and writes back only what changed, guarded by the object's
//! `resourceVersion`. Version conflicts restart the operation under a bounded
//! exponential backoff ([`RetryPolicy`]).

pub mod classify;
pub mod client;
pub mod error;
pub mod fields;
pub mod object;
pub mod options;
pub mod patch;
pub mod retry;
pub mod store;

#[cfg(test)]
mod testing;

pub use client::Client;
pub use error::{Error, ErrorKind, Result};
pub use object::{Applied, DynamicObject, Object, ObjectMeta, ObjectRef, Outcome};
pub use options::ClientOptions;
pub use retry::{Backoff, RetryPolicy};
pub use store::{memory::MemoryStore, ObjectStore, Patch, StoreError};
pub use tokio_util::sync::CancellationToken;
