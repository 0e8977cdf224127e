//! Maps store failures onto the few classes the client reacts to.

use crate::store::{Reason, StoreError};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    /// The concurrency token did not match; the operation may be retried from
    /// a fresh read.
    Conflict,
    NotFound,
    AlreadyExists,
    /// Anything else. Fatal.
    Other,
}

/// Classify a store error.
///
/// An explicit reason decides. Without one, the status code does: 404 is
/// `NotFound` and 409 is `Conflict`. Transport failures are always `Other`.
pub fn classify(error: &StoreError) -> ErrorClass {
    let status = match error {
        StoreError::Status(status) => status,
        StoreError::Transport(_) => return ErrorClass::Other,
    };
    match status.reason {
        Reason::Conflict => ErrorClass::Conflict,
        Reason::NotFound => ErrorClass::NotFound,
        Reason::AlreadyExists => ErrorClass::AlreadyExists,
        Reason::Invalid => ErrorClass::Other,
        Reason::Unknown => match status.code {
            404 => ErrorClass::NotFound,
            409 => ErrorClass::Conflict,
            _ => ErrorClass::Other,
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::object::ObjectRef;

    #[test]
    fn reason_decides() {
        let key = ObjectRef::new("Widget", "ns", "a");
        assert_eq!(
            classify(&StoreError::conflict(&key, "stale")),
            ErrorClass::Conflict
        );
        assert_eq!(classify(&StoreError::not_found(&key)), ErrorClass::NotFound);
        assert_eq!(
            classify(&StoreError::already_exists(&key)),
            ErrorClass::AlreadyExists
        );
        assert_eq!(
            classify(&StoreError::invalid(&key, "bad")),
            ErrorClass::Other
        );
    }

    #[test]
    fn already_exists_is_not_a_conflict_despite_409() {
        let err = StoreError::status(409, Reason::AlreadyExists, "taken");
        assert_eq!(classify(&err), ErrorClass::AlreadyExists);
    }

    #[test]
    fn code_decides_without_reason() {
        let status = |code| StoreError::status(code, Reason::Unknown, "");
        assert_eq!(classify(&status(404)), ErrorClass::NotFound);
        assert_eq!(classify(&status(409)), ErrorClass::Conflict);
        assert_eq!(classify(&status(500)), ErrorClass::Other);
        assert_eq!(classify(&status(429)), ErrorClass::Other);
    }

    #[test]
    fn transport_failures_are_other() {
        let err = StoreError::from(anyhow::anyhow!("connection reset"));
        assert_eq!(classify(&err), ErrorClass::Other);
    }
}
