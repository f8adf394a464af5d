//! Error taxonomy for the release store.
//!
//! Every failure the store raises is classified so callers can tell bad input
//! from a conflict, a missing record or an illegal lifecycle transition.

use thiserror::Error;
use uuid::Uuid;

pub type Result<T> = std::result::Result<T, StoreError>;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Validation failed: {0}")]
    Validation(String),

    #[error("Duplicate {entity_type}: an entity with {key} already exists in this release")]
    DuplicateEntity { entity_type: String, key: String },

    #[error("Entity {0} not found")]
    EntityNotFound(Uuid),

    #[error("Release {0} not found")]
    ReleaseNotFound(Uuid),

    #[error("{0}")]
    ReleaseState(String),

    #[error("Cannot resolve release scope: {0}")]
    ScopeResolution(String),

    #[error("Release {release_id} has {parallel} parallel and {overwrite} overwrite conflicts")]
    ReleaseConflicts {
        release_id: Uuid,
        parallel: usize,
        overwrite: usize,
    },

    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("database lock poisoned")]
    LockPoisoned,
}

impl StoreError {
    /// Short machine-readable code for the error kind.
    pub fn code(&self) -> &'static str {
        match self {
            Self::Validation(_) => "validation_error",
            Self::DuplicateEntity { .. } => "duplicate_entity",
            Self::EntityNotFound(_) => "entity_not_found",
            Self::ReleaseNotFound(_) => "release_not_found",
            Self::ReleaseState(_) => "release_state",
            Self::ScopeResolution(_) => "scope_resolution",
            Self::ReleaseConflicts { .. } => "release_conflicts",
            Self::Database(_) | Self::Serialization(_) | Self::LockPoisoned => "internal",
        }
    }

    /// Whether the error describes caller input or state rather than a fault.
    pub fn is_client_error(&self) -> bool {
        self.code() != "internal"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classified_errors_are_client_errors() {
        assert!(StoreError::Validation("x".into()).is_client_error());
        assert!(StoreError::ReleaseNotFound(Uuid::nil()).is_client_error());
        assert!(!StoreError::LockPoisoned.is_client_error());
    }

    #[test]
    fn duplicate_message_names_the_key() {
        let err = StoreError::DuplicateEntity {
            entity_type: "brand".into(),
            key: "slug=acme".into(),
        };
        assert_eq!(
            err.to_string(),
            "Duplicate brand: an entity with slug=acme already exists in this release"
        );
    }
}
