//! Error type for the repository, WAL and snapshot layers.

use std::fmt;
use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Entity absent from a repository, a WAL segment, or the snapshot store.
    NotFound,
    /// Uniqueness violation (duplicate library name).
    Conflict,
    /// Caller-visible input problem (bad dimension, malformed metadata filter).
    Validation,
    /// Filesystem I/O.
    Io,
    /// JSON/MessagePack encode or decode failure.
    Serialization,
    /// A checksum (WAL entry prefix, snapshot SHA-256) did not match.
    Checksum,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::NotFound => "not_found",
            ErrorKind::Conflict => "conflict",
            ErrorKind::Validation => "validation",
            ErrorKind::Io => "io",
            ErrorKind::Serialization => "serialization",
            ErrorKind::Checksum => "checksum",
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
pub struct StorageError {
    #[source]
    pub source: Option<Box<dyn std::error::Error + Send + Sync>>,
    pub kind: ErrorKind,
    pub message: String,
}

impl StorageError {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self { kind, message: message.into(), source: None }
    }

    pub fn with_source(mut self, source: impl std::error::Error + Send + Sync + 'static) -> Self {
        self.source = Some(Box::new(source));
        self
    }

    pub fn not_found(resource: &str, id: impl fmt::Display) -> Self {
        Self::new(ErrorKind::NotFound, format!("{resource} {id} not found"))
    }

    pub fn conflict(conflict_type: &str, message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Conflict, format!("[{conflict_type}] {}", message.into()))
    }

    pub fn validation(field: &str, message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Validation, format!("{field}: {}", message.into()))
    }

    pub fn io(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Io, message)
    }

    pub fn serialization(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Serialization, message)
    }

    pub fn checksum_mismatch(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Checksum, message)
    }
}

impl From<std::io::Error> for StorageError {
    fn from(err: std::io::Error) -> Self {
        StorageError::io(err.to_string()).with_source(err)
    }
}

impl From<serde_json::Error> for StorageError {
    fn from(err: serde_json::Error) -> Self {
        StorageError::serialization(format!("JSON error: {err}")).with_source(err)
    }
}

impl From<rmp_serde::encode::Error> for StorageError {
    fn from(err: rmp_serde::encode::Error) -> Self {
        StorageError::serialization(format!("MessagePack encode error: {err}")).with_source(err)
    }
}

impl From<rmp_serde::decode::Error> for StorageError {
    fn from(err: rmp_serde::decode::Error) -> Self {
        StorageError::serialization(format!("MessagePack decode error: {err}")).with_source(err)
    }
}

pub type Result<T> = std::result::Result<T, StorageError>;

#[cfg(test)]
mod tests {
    use super::*;

    // ═══ Error Construction Tests ═══

    #[test]
    fn not_found_names_resource_and_id() {
        let id = uuid::Uuid::nil();
        let err = StorageError::not_found("library", id);
        assert_eq!(err.kind, ErrorKind::NotFound);
        assert!(err.message.contains("library"));
    }

    #[test]
    fn conflict_carries_conflict_type() {
        let err = StorageError::conflict("duplicate_name", "name 'foo' already exists");
        assert_eq!(err.kind, ErrorKind::Conflict);
        assert!(err.to_string().contains("duplicate_name"));
    }

    // ═══ Display Tests ═══

    #[test]
    fn display_prefixes_with_kind() {
        let err = StorageError::io("disk full");
        assert_eq!(err.to_string(), "[io] disk full");
    }
}
