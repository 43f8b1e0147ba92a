//! Temp-file-then-rename writes.

use std::ffi::OsString;
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use tracing::warn;

/// Atomically replace `path` with `contents` (temp file + rename).
pub fn write_atomic(path: &Path, contents: &[u8]) -> Result<()> {
    write_with_rename(path, contents, false)
}

/// Like [`write_atomic`], but falls back to an in-place write when the rename
/// is refused (e.g. the target is a bind-mounted file).
pub fn write_atomic_or_in_place(path: &Path, contents: &[u8]) -> Result<()> {
    write_with_rename(path, contents, true)
}

fn write_with_rename(path: &Path, contents: &[u8], allow_in_place: bool) -> Result<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent)
            .with_context(|| format!("create directory {}", parent.display()))?;
    }
    let tmp_path = temp_path(path);
    let result = (|| -> Result<()> {
        fs::write(&tmp_path, contents)
            .with_context(|| format!("write temp file {}", tmp_path.display()))?;
        match fs::rename(&tmp_path, path) {
            Ok(()) => Ok(()),
            Err(err) if allow_in_place => {
                warn!(path = %path.display(), err = %err, "rename refused, writing in place");
                fs::write(path, contents).with_context(|| format!("write {}", path.display()))
            }
            Err(err) => Err(err).with_context(|| format!("replace {}", path.display())),
        }
    })();
    if tmp_path.exists() {
        // Leftover only when the rename did not happen.
        let _ = fs::remove_file(&tmp_path);
    }
    result
}

fn temp_path(path: &Path) -> PathBuf {
    let mut name: OsString = path.as_os_str().to_owned();
    name.push(".tmp");
    PathBuf::from(name)
}
