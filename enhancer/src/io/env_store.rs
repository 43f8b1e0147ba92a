//! Versioned `KEY=value` env file.

use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use anyhow::Context;
use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{info, instrument};

use crate::core::digest::content_digest;
use crate::core::env_file::{self, EnvEntry};
use crate::io::atomic::write_atomic_or_in_place;
use crate::io::store::{StoreError, check_digest, modified_at};

pub const STORE_NAME: &str = "env file";

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct EnvValue {
    pub key: String,
    pub value: String,
}

/// Parsed env file plus its version token.
#[derive(Debug, Clone, Serialize)]
pub struct EnvSnapshot {
    pub values: Vec<EnvValue>,
    #[serde(skip)]
    pub entries: Vec<EnvEntry>,
    pub digest: String,
    pub modified: Option<DateTime<Utc>>,
}

impl EnvSnapshot {
    pub fn get(&self, key: &str) -> Option<&str> {
        self.values
            .iter()
            .find(|entry| entry.key == key)
            .map(|entry| entry.value.as_str())
    }
}

#[derive(Debug, Clone)]
pub struct EnvStore {
    path: PathBuf,
}

impl EnvStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// A missing file reads as an empty document.
    pub fn load(&self) -> Result<EnvSnapshot, StoreError> {
        let text = self.read_text()?;
        let entries = env_file::parse(&text);
        let values = env_file::values(&entries)
            .into_iter()
            .map(|(key, value)| EnvValue { key, value })
            .collect();
        Ok(EnvSnapshot {
            values,
            entries,
            digest: content_digest(text.as_bytes()),
            modified: modified_at(&self.path),
        })
    }

    /// Rewrite the lines whose key is updated and append new keys; every other
    /// line keeps its bytes and position.
    #[instrument(skip_all, fields(path = %self.path.display(), updates = updates.len()))]
    pub fn save(
        &self,
        updates: &[(String, String)],
        expected_digest: Option<&str>,
    ) -> Result<EnvSnapshot, StoreError> {
        for (key, value) in updates {
            validate_pair(key, value)?;
        }
        let current = self.load()?;
        check_digest(STORE_NAME, expected_digest, &current.digest)?;
        let rendered = env_file::render(&current.entries, updates);
        self.write_text(&rendered)?;
        info!("env file updated");
        self.load()
    }

    /// Replace the whole document.
    #[instrument(skip_all, fields(path = %self.path.display()))]
    pub fn overwrite(
        &self,
        content: &str,
        expected_digest: Option<&str>,
    ) -> Result<EnvSnapshot, StoreError> {
        let current = self.load()?;
        check_digest(STORE_NAME, expected_digest, &current.digest)?;
        self.write_text(&env_file::normalize_document(content))?;
        info!("env file overwritten");
        self.load()
    }

    fn read_text(&self) -> Result<String, StoreError> {
        match fs::read_to_string(&self.path) {
            Ok(text) => Ok(text),
            Err(err) if err.kind() == ErrorKind::NotFound => Ok(String::new()),
            Err(err) => Err(StoreError::io(
                STORE_NAME,
                anyhow::Error::new(err).context(format!("read {}", self.path.display())),
            )),
        }
    }

    fn write_text(&self, content: &str) -> Result<(), StoreError> {
        write_atomic_or_in_place(&self.path, content.as_bytes())
            .with_context(|| format!("unable to write {}", self.path.display()))
            .map_err(|err| StoreError::io(STORE_NAME, err))
    }
}

fn validate_pair(key: &str, value: &str) -> Result<(), StoreError> {
    let trimmed = key.trim();
    if trimmed.is_empty() {
        return Err(StoreError::invalid(STORE_NAME, "key cannot be empty"));
    }
    if trimmed != key || trimmed.contains('=') || trimmed.starts_with('#') {
        return Err(StoreError::invalid(STORE_NAME, format!("invalid key '{key}'")));
    }
    if key.contains('\n') || value.contains('\n') {
        return Err(StoreError::invalid(
            STORE_NAME,
            format!("value for '{key}' must be a single line"),
        ));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pairs(items: &[(&str, &str)]) -> Vec<(String, String)> {
        items
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn missing_file_is_empty_document() {
        let temp = tempfile::tempdir().expect("tempdir");
        let store = EnvStore::new(temp.path().join(".env"));
        let snapshot = store.load().expect("load");
        assert!(snapshot.values.is_empty());
        assert_eq!(snapshot.digest, content_digest(b""));
        assert_eq!(snapshot.modified, None);
    }

    #[test]
    fn save_preserves_untouched_lines() {
        let temp = tempfile::tempdir().expect("tempdir");
        let path = temp.path().join(".env");
        fs::write(&path, "FOO=one\n\nBAR=two\n").expect("seed");
        let store = EnvStore::new(&path);

        let snapshot = store
            .save(&pairs(&[("FOO", "alpha"), ("BAZ", "new")]), None)
            .expect("save");

        assert_eq!(
            fs::read_to_string(&path).expect("read"),
            "FOO=alpha\n\nBAR=two\n\nBAZ=new\n"
        );
        assert_eq!(snapshot.get("BAZ"), Some("new"));
        assert!(snapshot.modified.is_some());
    }

    #[test]
    fn stale_digest_conflicts_without_writing() {
        let temp = tempfile::tempdir().expect("tempdir");
        let path = temp.path().join(".env");
        fs::write(&path, "FOO=one\n").expect("seed");
        let store = EnvStore::new(&path);
        let stale = store.load().expect("load").digest;

        fs::write(&path, "FOO=external\n").expect("external edit");
        let err = store
            .overwrite("FOO=mine\n", Some(&stale))
            .unwrap_err();
        assert!(matches!(err, StoreError::VersionConflict { store: "env file" }));
        assert_eq!(fs::read_to_string(&path).expect("read"), "FOO=external\n");
    }

    #[test]
    fn overwrite_appends_trailing_newline() {
        let temp = tempfile::tempdir().expect("tempdir");
        let store = EnvStore::new(temp.path().join(".env"));
        let first = store.load().expect("load");
        let snapshot = store
            .overwrite("# secrets\nTOKEN=abc", Some(&first.digest))
            .expect("overwrite");
        assert_eq!(
            fs::read_to_string(store.path()).expect("read"),
            "# secrets\nTOKEN=abc\n"
        );
        assert_eq!(snapshot.get("TOKEN"), Some("abc"));
    }

    #[test]
    fn rejects_multiline_values() {
        let temp = tempfile::tempdir().expect("tempdir");
        let store = EnvStore::new(temp.path().join(".env"));
        let err = store.save(&pairs(&[("KEY", "a\nb")]), None).unwrap_err();
        assert!(matches!(err, StoreError::Invalid { .. }));
        assert!(!store.path().exists());
    }
}
