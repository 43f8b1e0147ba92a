//! Versioned JSON overrides for pipeline runs.
//!
//! The document is created with defaults on first read so callers always have
//! a digest to send back. Writes merge updates into the current document,
//! validate the merge against the embedded schema, and replace the file
//! atomically.

use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use anyhow::{Context, anyhow};
use chrono::{DateTime, Utc};
use jsonschema::Draft;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::{info, instrument};

use crate::core::digest::content_digest;
use crate::core::types::{CodexOptions, ReasoningEffort};
use crate::error::ValidationError;
use crate::io::atomic::write_atomic;
use crate::io::store::{StoreError, check_digest, modified_at};

pub const STORE_NAME: &str = "pipeline overrides";

const OVERRIDES_SCHEMA: &str =
    include_str!("../../schemas/pipeline_overrides.schema.json");

/// Persisted run defaults. Fields are declared in key order so the
/// serialized document has sorted keys.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PipelineOverrides {
    #[serde(default)]
    pub artifacts_dir: Option<PathBuf>,
    #[serde(default)]
    pub demo: bool,
    #[serde(default = "default_iterations")]
    pub iterations: u32,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub model_reasoning_effort: Option<ReasoningEffort>,
}

fn default_iterations() -> u32 {
    1
}

impl Default for PipelineOverrides {
    fn default() -> Self {
        Self {
            artifacts_dir: None,
            demo: false,
            iterations: default_iterations(),
            model: None,
            model_reasoning_effort: None,
        }
    }
}

impl PipelineOverrides {
    pub fn codex_options(&self) -> Result<Option<CodexOptions>, ValidationError> {
        CodexOptions::from_parts(self.model.as_deref(), self.model_reasoning_effort)
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct OverridesSnapshot {
    pub overrides: PipelineOverrides,
    pub digest: String,
    pub modified: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone)]
pub struct OverridesStore {
    path: PathBuf,
}

impl OverridesStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn load(&self) -> Result<OverridesSnapshot, StoreError> {
        let text = self.read_or_initialize()?;
        let value: Value = serde_json::from_str(&text)
            .map_err(|err| StoreError::invalid(STORE_NAME, format!("invalid JSON: {err}")))?;
        let overrides = parse_document(value)?;
        Ok(OverridesSnapshot {
            overrides,
            digest: content_digest(text.as_bytes()),
            modified: modified_at(&self.path),
        })
    }

    /// Merge `updates` (top-level keys) into the stored document.
    #[instrument(skip_all, fields(path = %self.path.display(), keys = updates.len()))]
    pub fn save(
        &self,
        updates: Map<String, Value>,
        expected_digest: Option<&str>,
    ) -> Result<OverridesSnapshot, StoreError> {
        let current = self.load()?;
        check_digest(STORE_NAME, expected_digest, &current.digest)?;

        let mut merged = match serde_json::to_value(&current.overrides) {
            Ok(Value::Object(map)) => map,
            Ok(_) => {
                return Err(StoreError::io(
                    STORE_NAME,
                    anyhow!("overrides did not serialize to an object"),
                ));
            }
            Err(err) => return Err(StoreError::io(STORE_NAME, err.into())),
        };
        merged.extend(updates);
        let overrides = parse_document(Value::Object(merged))?;

        let rendered = render(&overrides).map_err(|err| StoreError::io(STORE_NAME, err))?;
        write_atomic(&self.path, rendered.as_bytes())
            .with_context(|| format!("unable to write {}", self.path.display()))
            .map_err(|err| StoreError::io(STORE_NAME, err))?;
        info!("pipeline overrides updated");
        self.load()
    }

    fn read_or_initialize(&self) -> Result<String, StoreError> {
        match fs::read_to_string(&self.path) {
            Ok(text) => Ok(text),
            Err(err) if err.kind() == ErrorKind::NotFound => {
                let rendered = render(&PipelineOverrides::default())
                    .map_err(|err| StoreError::io(STORE_NAME, err))?;
                write_atomic(&self.path, rendered.as_bytes())
                    .with_context(|| format!("unable to initialize {}", self.path.display()))
                    .map_err(|err| StoreError::io(STORE_NAME, err))?;
                info!(path = %self.path.display(), "initialized pipeline overrides");
                Ok(rendered)
            }
            Err(err) => Err(StoreError::io(
                STORE_NAME,
                anyhow::Error::new(err).context(format!("read {}", self.path.display())),
            )),
        }
    }
}

fn render(overrides: &PipelineOverrides) -> anyhow::Result<String> {
    let mut payload = serde_json::to_string_pretty(overrides).context("serialize overrides")?;
    payload.push('\n');
    Ok(payload)
}

/// Schema-check a document, then deserialize it.
fn parse_document(value: Value) -> Result<PipelineOverrides, StoreError> {
    let schema: Value = serde_json::from_str(OVERRIDES_SCHEMA)
        .context("parse overrides schema")
        .map_err(|err| StoreError::io(STORE_NAME, err))?;
    let validator = jsonschema::options()
        .with_draft(Draft::Draft202012)
        .build(&schema)
        .map_err(|err| StoreError::io(STORE_NAME, anyhow!("compile overrides schema: {err}")))?;
    let messages: Vec<String> = validator
        .iter_errors(&value)
        .map(|err| err.to_string())
        .collect();
    if !messages.is_empty() {
        return Err(StoreError::invalid(
            STORE_NAME,
            format!("schema validation failed:\n- {}", messages.join("\n- ")),
        ));
    }
    serde_json::from_value(value).map_err(|err| StoreError::invalid(STORE_NAME, err.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn updates(value: Value) -> Map<String, Value> {
        match value {
            Value::Object(map) => map,
            other => panic!("expected object, got {other}"),
        }
    }

    #[test]
    fn first_load_initializes_sorted_default_document() {
        let temp = tempfile::tempdir().expect("tempdir");
        let store = OverridesStore::new(temp.path().join("config").join("overrides.json"));
        let snapshot = store.load().expect("load");

        assert_eq!(snapshot.overrides, PipelineOverrides::default());
        let text = fs::read_to_string(store.path()).expect("read");
        assert_eq!(content_digest(text.as_bytes()), snapshot.digest);
        let keys: Vec<usize> = [
            "artifacts_dir",
            "demo",
            "iterations",
            "model",
            "model_reasoning_effort",
        ]
        .iter()
        .map(|key| text.find(&format!("\"{key}\"")).expect("key present"))
        .collect();
        assert!(keys.windows(2).all(|pair| pair[0] < pair[1]));
        assert!(text.ends_with("}\n"));
    }

    #[test]
    fn repeated_loads_have_identical_digests() {
        let temp = tempfile::tempdir().expect("tempdir");
        let store = OverridesStore::new(temp.path().join("overrides.json"));
        let first = store.load().expect("first").digest;
        let second = store.load().expect("second").digest;
        assert_eq!(first, second);
    }

    #[test]
    fn save_merges_updates() {
        let temp = tempfile::tempdir().expect("tempdir");
        let store = OverridesStore::new(temp.path().join("overrides.json"));
        let initial = store.load().expect("load");

        let snapshot = store
            .save(
                updates(json!({"iterations": 2, "demo": true, "model_reasoning_effort": "high"})),
                Some(&initial.digest),
            )
            .expect("save");
        assert_eq!(snapshot.overrides.iterations, 2);
        assert!(snapshot.overrides.demo);
        assert_eq!(
            snapshot.overrides.model_reasoning_effort,
            Some(ReasoningEffort::High)
        );
        assert_ne!(snapshot.digest, initial.digest);
    }

    #[test]
    fn invalid_merge_is_rejected_without_writing() {
        let temp = tempfile::tempdir().expect("tempdir");
        let store = OverridesStore::new(temp.path().join("overrides.json"));
        let before = store.load().expect("load");

        for bad in [
            json!({"iterations": 0}),
            json!({"model_reasoning_effort": "extreme"}),
            json!({"unknown": 1}),
        ] {
            let err = store.save(updates(bad), None).unwrap_err();
            assert!(matches!(err, StoreError::Invalid { .. }), "{err}");
        }
        assert_eq!(store.load().expect("reload").digest, before.digest);
    }

    #[test]
    fn stale_digest_conflicts() {
        let temp = tempfile::tempdir().expect("tempdir");
        let store = OverridesStore::new(temp.path().join("overrides.json"));
        let stale = store.load().expect("load").digest;
        store
            .save(updates(json!({"iterations": 3})), None)
            .expect("concurrent write");

        let err = store
            .save(updates(json!({"demo": true})), Some(&stale))
            .unwrap_err();
        assert_eq!(err.to_string(), "pipeline overrides changed on disk; reload and retry");
        assert_eq!(store.load().expect("reload").overrides.iterations, 3);
        assert!(!store.load().expect("reload").overrides.demo);
    }
}
