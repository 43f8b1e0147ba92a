//! Pieces shared by the digest-guarded document stores.

use std::fs;
use std::path::Path;

use chrono::{DateTime, Utc};

use crate::error::ValidationError;

/// Failure of a versioned store operation.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// The on-disk document no longer matches the digest the caller read.
    #[error("{store} changed on disk; reload and retry")]
    VersionConflict { store: &'static str },
    #[error("{store}: {cause}")]
    Invalid {
        store: &'static str,
        #[source]
        cause: ValidationError,
    },
    #[error("{store}: {cause:#}")]
    Io {
        store: &'static str,
        cause: anyhow::Error,
    },
}

impl StoreError {
    pub(crate) fn io(store: &'static str, cause: anyhow::Error) -> Self {
        StoreError::Io { store, cause }
    }

    pub(crate) fn invalid(store: &'static str, message: impl Into<String>) -> Self {
        StoreError::Invalid {
            store,
            cause: ValidationError::new(message),
        }
    }
}

/// Fail with a conflict when `expected` is given and differs from `current`.
pub(crate) fn check_digest(
    store: &'static str,
    expected: Option<&str>,
    current: &str,
) -> Result<(), StoreError> {
    match expected {
        Some(expected) if expected != current => Err(StoreError::VersionConflict { store }),
        _ => Ok(()),
    }
}

/// Last modification time, if the file exists.
pub(crate) fn modified_at(path: &Path) -> Option<DateTime<Utc>> {
    fs::metadata(path)
        .and_then(|meta| meta.modified())
        .ok()
        .map(DateTime::<Utc>::from)
}
