//! Error type shared by the lock, index and factory modules.

use std::error::Error as StdError;
use std::fmt;

/// Discriminant for [`CoreError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CoreErrorKind {
    /// Vector dimension did not match the index's configured dimension.
    DimensionMismatch,
    /// `add`/`add_batch` referenced an id already present in the index.
    DuplicateId,
    /// `IndexFactory` was asked for an unknown index kind or an invalid configuration.
    InvalidConfig,
    /// Lock acquisition was attempted in violation of the hierarchical ordering.
    LockOrder,
}

impl CoreErrorKind {
    fn as_str(self) -> &'static str {
        match self {
            CoreErrorKind::DimensionMismatch => "dimension_mismatch",
            CoreErrorKind::DuplicateId => "duplicate_id",
            CoreErrorKind::InvalidConfig => "invalid_config",
            CoreErrorKind::LockOrder => "lock_order",
        }
    }
}

impl fmt::Display for CoreErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Error produced by the ANN index family and the concurrency substrate.
#[derive(Debug)]
pub struct CoreError {
    kind: CoreErrorKind,
    message: String,
    source: Option<Box<dyn StdError + Send + Sync>>,
}

impl CoreError {
    pub fn new(kind: CoreErrorKind, message: impl Into<String>) -> Self {
        Self { kind, message: message.into(), source: None }
    }

    pub fn kind(&self) -> CoreErrorKind {
        self.kind
    }

    pub fn dimension_mismatch(expected: usize, got: usize) -> Self {
        Self::new(
            CoreErrorKind::DimensionMismatch,
            format!("vector dimension {got} != index dimension {expected}"),
        )
    }

    pub fn duplicate_id(id: impl fmt::Display) -> Self {
        Self::new(CoreErrorKind::DuplicateId, format!("id {id} already present in index"))
    }

    pub fn invalid_config(message: impl Into<String>) -> Self {
        Self::new(CoreErrorKind::InvalidConfig, message)
    }

    pub fn lock_order(message: impl Into<String>) -> Self {
        Self::new(CoreErrorKind::LockOrder, message)
    }
}

impl fmt::Display for CoreError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}", self.kind, self.message)
    }
}

impl StdError for CoreError {
    fn source(&self) -> Option<&(dyn StdError + 'static)> {
        self.source.as_ref().map(|e| e.as_ref() as &(dyn StdError + 'static))
    }
}

pub type Result<T> = std::result::Result<T, CoreError>;

#[cfg(test)]
mod tests {
    use super::*;

    // ═══ Error Construction Tests ═══

    #[test]
    fn dimension_mismatch_message_names_both_sizes() {
        let err = CoreError::dimension_mismatch(8, 16);
        assert_eq!(err.kind(), CoreErrorKind::DimensionMismatch);
        assert!(err.to_string().contains('8'));
        assert!(err.to_string().contains("16"));
    }

    #[test]
    fn duplicate_id_carries_the_id() {
        let err = CoreError::duplicate_id(42);
        assert!(err.to_string().contains("42"));
    }

    // ═══ Display Tests ═══

    #[test]
    fn display_prefixes_with_kind() {
        let err = CoreError::invalid_config("unknown index kind");
        assert_eq!(err.to_string(), "[invalid_config] unknown index kind");
    }
}
