use std::fmt::Display;

use crate::{
    classify::{classify, ErrorClass},
    object::ObjectRef,
    store::StoreError,
};

/// The kinds of failure callers can tell apart.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Conflict,
    NotFound,
    AlreadyExists,
    IdentityViolation,
    Malformed,
    Cancelled,
    Mutation,
    EmptyField,
    Other,
}

#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Only this kind is retried. After the last attempt it is returned as is.
    #[error("conflict writing {key}")]
    Conflict {
        key: ObjectRef,
        #[source]
        source: StoreError,
    },

    #[error("{key} not found")]
    NotFound {
        key: ObjectRef,
        #[source]
        source: StoreError,
    },

    #[error("{key} already exists")]
    AlreadyExists {
        key: ObjectRef,
        #[source]
        source: StoreError,
    },

    #[error("mutation of {key} must not change its identity, got {namespace}/{name}")]
    IdentityViolation {
        key: ObjectRef,
        namespace: String,
        name: String,
    },

    #[error("malformed {what}")]
    Malformed {
        what: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("malformed field {field} of {key}")]
    MalformedField {
        key: ObjectRef,
        field: String,
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },

    #[error("operation on {key} was cancelled")]
    Cancelled { key: ObjectRef },

    #[error("mutation of {key} failed: {error:#}")]
    Mutation { key: ObjectRef, error: anyhow::Error },

    #[error("{key} has no data in field {field}")]
    EmptyField { key: ObjectRef, field: String },

    #[error("store request for {key} failed")]
    Other {
        key: ObjectRef,
        #[source]
        source: StoreError,
    },
}

pub type Result<T, E = Error> = std::result::Result<T, E>;

impl Error {
    /// Wrap a store error according to its [`ErrorClass`].
    pub fn from_store(key: &ObjectRef, source: StoreError) -> Self {
        let key = key.clone();
        match classify(&source) {
            ErrorClass::Conflict => Error::Conflict { key, source },
            ErrorClass::NotFound => Error::NotFound { key, source },
            ErrorClass::AlreadyExists => Error::AlreadyExists { key, source },
            ErrorClass::Other => Error::Other { key, source },
        }
    }

    pub(crate) fn malformed(what: impl Display, source: serde_json::Error) -> Self {
        Error::Malformed {
            what: what.to_string(),
            source,
        }
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::Conflict { .. } => ErrorKind::Conflict,
            Error::NotFound { .. } => ErrorKind::NotFound,
            Error::AlreadyExists { .. } => ErrorKind::AlreadyExists,
            Error::IdentityViolation { .. } => ErrorKind::IdentityViolation,
            Error::Malformed { .. } | Error::MalformedField { .. } => ErrorKind::Malformed,
            Error::Cancelled { .. } => ErrorKind::Cancelled,
            Error::Mutation { .. } => ErrorKind::Mutation,
            Error::EmptyField { .. } => ErrorKind::EmptyField,
            Error::Other { .. } => ErrorKind::Other,
        }
    }

    pub fn is_conflict(&self) -> bool {
        self.kind() == ErrorKind::Conflict
    }

    pub fn is_not_found(&self) -> bool {
        self.kind() == ErrorKind::NotFound
    }

    pub fn is_already_exists(&self) -> bool {
        self.kind() == ErrorKind::AlreadyExists
    }
}
