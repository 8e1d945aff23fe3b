//! Caller-facing error type: unifies [`vectordb_core::CoreError`] and
//! [`vectordb_storage::StorageError`] behind the taxonomy callers actually
//! need to branch on.

use std::fmt;
use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Caller-visible input problem: bad dimension, empty content, field out of range.
    Validation,
    /// Library/chunk/document absent.
    NotFound,
    /// Uniqueness violation (duplicate library name).
    Conflict,
    /// Index construction or mutation failure.
    Index,
    /// Everything else: persistence, lock, or other unexpected failure.
    Internal,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::Validation => "validation",
            ErrorKind::NotFound => "not_found",
            ErrorKind::Conflict => "conflict",
            ErrorKind::Index => "index",
            ErrorKind::Internal => "internal",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[derive(Debug, Error)]
#[error("[{kind}] {message}")]
pub struct ServiceError {
    #[source]
    pub source: Option<Box<dyn std::error::Error + Send + Sync>>,
    pub kind: ErrorKind,
    pub message: String,
}

impl ServiceError {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self { kind, message: message.into(), source: None }
    }

    pub fn validation(field: &str, message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Validation, format!("{field}: {}", message.into()))
    }

    pub fn not_found(resource: &str, id: impl fmt::Display) -> Self {
        Self::new(ErrorKind::NotFound, format!("{resource} {id} not found"))
    }

    pub fn conflict(conflict_type: &str, message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Conflict, format!("[{conflict_type}] {}", message.into()))
    }

    pub fn index(index_kind: impl fmt::Display, operation: &str, message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Index, format!("{operation} on {index_kind} index: {}", message.into()))
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Internal, message)
    }
}

impl From<vectordb_core::CoreError> for ServiceError {
    fn from(err: vectordb_core::CoreError) -> Self {
        use vectordb_core::CoreErrorKind;
        let kind = match err.kind() {
            CoreErrorKind::DimensionMismatch | CoreErrorKind::DuplicateId => ErrorKind::Validation,
            CoreErrorKind::InvalidConfig => ErrorKind::Index,
            CoreErrorKind::LockOrder => ErrorKind::Internal,
        };
        Self::new(kind, err.to_string())
    }
}

impl From<vectordb_storage::StorageError> for ServiceError {
    fn from(err: vectordb_storage::StorageError) -> Self {
        use vectordb_storage::ErrorKind as StorageKind;
        let kind = match err.kind {
            StorageKind::NotFound => ErrorKind::NotFound,
            StorageKind::Conflict => ErrorKind::Conflict,
            StorageKind::Validation => ErrorKind::Validation,
            StorageKind::Io | StorageKind::Serialization | StorageKind::Checksum => ErrorKind::Internal,
        };
        Self::new(kind, err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, ServiceError>;

#[cfg(test)]
mod tests {
    use super::*;

    // ═══ Conversion Tests ═══

    #[test]
    fn core_dimension_mismatch_becomes_validation() {
        let err: ServiceError = vectordb_core::CoreError::dimension_mismatch(8, 16).into();
        assert_eq!(err.kind, ErrorKind::Validation);
    }

    #[test]
    fn storage_not_found_stays_not_found() {
        let err: ServiceError = vectordb_storage::StorageError::not_found("library", uuid::Uuid::nil()).into();
        assert_eq!(err.kind, ErrorKind::NotFound);
    }

    // ═══ Display Tests ═══

    #[test]
    fn display_prefixes_with_kind() {
        let err = ServiceError::validation("dimension", "must be >= 1");
        assert_eq!(err.to_string(), "[validation] dimension: must be >= 1");
    }
}
