//! Run artifact directories and files.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::Value;
use tracing::{debug, warn};

use crate::core::attempts::{attempt_dir, run_dir_name};
use crate::core::types::{FeedbackPayload, ScreenshotPayload};

pub const SCREENSHOT_JSON: &str = "screenshot.json";
pub const SCREENSHOT_PNG: &str = "screenshot.png";
pub const FEEDBACK_JSON: &str = "feedback.json";
pub const ROUTER_JSON: &str = "router.json";
pub const ERROR_LOG: &str = "error.log";

/// Create a fresh run directory under `root`. Fails if the name is taken.
pub fn create_run_dir(root: &Path, now: DateTime<Utc>, demo: bool) -> Result<PathBuf> {
    fs::create_dir_all(root).with_context(|| format!("create {}", root.display()))?;
    let path = root.join(run_dir_name(now, demo));
    fs::create_dir(&path).with_context(|| format!("create run directory {}", path.display()))?;
    Ok(path)
}

/// Directory for attempt `attempt`; created (never reused) unless it is the
/// run directory itself.
pub fn create_attempt_dir(run_dir: &Path, attempt: u32, max_attempts: u32) -> Result<PathBuf> {
    let path = attempt_dir(run_dir, attempt, max_attempts);
    if path != run_dir {
        fs::create_dir(&path)
            .with_context(|| format!("create attempt directory {}", path.display()))?;
    }
    Ok(path)
}

/// Decode the captured image.
pub fn decode_image(screenshot: &ScreenshotPayload) -> Result<Vec<u8>, base64::DecodeError> {
    STANDARD.decode(screenshot.image_b64.trim())
}

const SUCCESS_FILES: [&str; 4] = [SCREENSHOT_JSON, SCREENSHOT_PNG, FEEDBACK_JSON, ROUTER_JSON];

/// Persist a successful attempt: sanitized screenshot JSON, raw image bytes,
/// feedback and router payloads.
///
/// All or nothing: if any write fails, files already written are removed.
pub fn write_success(
    dir: &Path,
    screenshot: &ScreenshotPayload,
    image: &[u8],
    feedback: &FeedbackPayload,
    router: &Value,
) -> Result<()> {
    let written = (|| -> Result<()> {
        write_json(&dir.join(SCREENSHOT_JSON), &screenshot.sanitized())?;
        let png = dir.join(SCREENSHOT_PNG);
        fs::write(&png, image).with_context(|| format!("write {}", png.display()))?;
        write_json(&dir.join(FEEDBACK_JSON), feedback)?;
        write_json(&dir.join(ROUTER_JSON), router)
    })();
    if let Err(err) = written {
        remove_success_files(dir);
        return Err(err);
    }
    debug!(dir = %dir.display(), "attempt artifacts written");
    Ok(())
}

/// Record why an attempt failed.
pub fn write_error_log(dir: &Path, attempt: u32, message: &str) -> Result<()> {
    let path = dir.join(ERROR_LOG);
    let contents = format!("attempt: {attempt}\nerror: {message}\n");
    fs::write(&path, contents).with_context(|| format!("write {}", path.display()))
}

fn remove_success_files(dir: &Path) {
    for name in SUCCESS_FILES {
        let path = dir.join(name);
        if path.is_file() {
            if let Err(err) = fs::remove_file(&path) {
                warn!(path = %path.display(), error = %err, "failed to remove partial artifact");
            }
        }
    }
}

fn write_json<T: Serialize + ?Sized>(path: &Path, value: &T) -> Result<()> {
    let mut payload = serde_json::to_string_pretty(value).context("serialize json")?;
    payload.push('\n');
    fs::write(path, payload).with_context(|| format!("write {}", path.display()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use serde_json::json;

    #[test]
    fn run_dir_collision_fails_loudly() {
        let temp = tempfile::tempdir().expect("tempdir");
        let now = Utc.with_ymd_and_hms(2026, 1, 2, 3, 4, 5).single().expect("time");
        let first = create_run_dir(temp.path(), now, true).expect("first");
        assert!(first.ends_with("20260102-030405-000000-demo"));
        assert!(create_run_dir(temp.path(), now, true).is_err());
    }

    #[test]
    fn attempt_dirs_are_flat_for_single_attempt() {
        let temp = tempfile::tempdir().expect("tempdir");
        let run = temp.path().join("run");
        fs::create_dir(&run).expect("run");
        assert_eq!(create_attempt_dir(&run, 1, 1).expect("flat"), run);
        let second = create_attempt_dir(&run, 2, 3).expect("nested");
        assert_eq!(second, run.join("attempt-2"));
        assert!(second.is_dir());
        assert!(create_attempt_dir(&run, 2, 3).is_err());
    }

    #[test]
    fn success_artifacts_sanitize_json_and_keep_raw_image() {
        let temp = tempfile::tempdir().expect("tempdir");
        let screenshot = ScreenshotPayload {
            image_b64: STANDARD.encode("demo".repeat(40)),
            metadata: Default::default(),
        };
        let image = decode_image(&screenshot).expect("decode");
        let feedback = FeedbackPayload {
            feedback: "Tighten copy".to_string(),
            metadata: Default::default(),
        };
        write_success(temp.path(), &screenshot, &image, &feedback, &json!({"status": "ok"}))
            .expect("write");

        assert_eq!(
            fs::read(temp.path().join(SCREENSHOT_PNG)).expect("png"),
            "demo".repeat(40).into_bytes()
        );
        let saved: Value = serde_json::from_str(
            &fs::read_to_string(temp.path().join(SCREENSHOT_JSON)).expect("json"),
        )
        .expect("parse");
        let marker = saved["image_b64"].as_str().expect("marker");
        assert_eq!(marker.len(), 53);
        assert!(marker.ends_with("..."));
        assert!(temp.path().join(ROUTER_JSON).is_file());
    }

    #[test]
    fn failed_success_write_leaves_no_partial_artifacts() {
        let temp = tempfile::tempdir().expect("tempdir");
        // A directory in the way makes the last write fail.
        fs::create_dir(temp.path().join(ROUTER_JSON)).expect("block router.json");
        let screenshot = ScreenshotPayload {
            image_b64: STANDARD.encode("demo"),
            metadata: Default::default(),
        };
        let feedback = FeedbackPayload {
            feedback: "Tighten copy".to_string(),
            metadata: Default::default(),
        };

        let result = write_success(temp.path(), &screenshot, b"demo", &feedback, &json!({}));

        assert!(result.is_err());
        for name in [SCREENSHOT_JSON, SCREENSHOT_PNG, FEEDBACK_JSON] {
            assert!(!temp.path().join(name).exists(), "{name} left behind");
        }
    }
}
