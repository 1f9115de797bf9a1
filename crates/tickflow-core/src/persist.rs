//! Atomic JSON file writes.
//! Write to a sibling temp file, restrict permissions, then rename over the target
//! so readers never observe a half-written store.

use serde::Serialize;
use std::path::{Path, PathBuf};

use crate::error::{Result, TickflowError};

/// Serialize `value` as pretty JSON and atomically replace `path` with it.
pub fn write_json_atomic<T: Serialize + ?Sized>(path: &Path, value: &T) -> Result<()> {
    if let Some(parent) = path.parent()
        && !parent.as_os_str().is_empty()
    {
        std::fs::create_dir_all(parent)
            .map_err(|e| TickflowError::Persistence(format!("create {}: {e}", parent.display())))?;
    }

    let json = serde_json::to_string_pretty(value)?;
    let tmp = temp_path(path);

    std::fs::write(&tmp, json)
        .map_err(|e| TickflowError::Persistence(format!("write {}: {e}", tmp.display())))?;
    restrict_permissions(&tmp);

    if let Err(e) = std::fs::rename(&tmp, path) {
        std::fs::remove_file(&tmp).ok();
        return Err(TickflowError::Persistence(format!(
            "rename {} -> {}: {e}",
            tmp.display(),
            path.display()
        )));
    }
    Ok(())
}

fn temp_path(path: &Path) -> PathBuf {
    let mut name = path
        .file_name()
        .map(|n| n.to_os_string())
        .unwrap_or_else(|| "store".into());
    name.push(format!(".{}.tmp", std::process::id()));
    path.with_file_name(name)
}

#[cfg(unix)]
fn restrict_permissions(path: &Path) {
    use std::os::unix::fs::PermissionsExt;
    if let Err(e) = std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o600)) {
        tracing::warn!("⚠️ Failed to restrict permissions on {}: {e}", path.display());
    }
}

#[cfg(not(unix))]
fn restrict_permissions(_path: &Path) {}
