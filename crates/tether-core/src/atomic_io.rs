use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};

use anyhow::{bail, Context, Result};

use crate::time_utils::current_unix_timestamp_ms;

static STAGING_SEQUENCE: AtomicU64 = AtomicU64::new(0);

/// Hidden sibling of `path` that is unique within this process.
pub fn staging_path(path: &Path) -> PathBuf {
    let file_name = path
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_else(|| "tether".to_string());
    let sequence = STAGING_SEQUENCE.fetch_add(1, Ordering::Relaxed);
    path.with_file_name(format!(
        ".{file_name}.tmp-{}-{}-{sequence}",
        std::process::id(),
        current_unix_timestamp_ms()
    ))
}

/// File stem safe to join under a directory: anything other than ASCII
/// alphanumerics, `-` and `_` becomes `_`.
pub fn sanitized_file_stem(name: &str) -> String {
    let stem: String = name
        .chars()
        .map(|character| {
            if character.is_ascii_alphanumeric() || matches!(character, '-' | '_') {
                character
            } else {
                '_'
            }
        })
        .collect();
    if stem.is_empty() {
        "plugin".to_string()
    } else {
        stem
    }
}

fn prepare_destination(path: &Path) -> Result<()> {
    if path.as_os_str().is_empty() {
        bail!("destination path cannot be empty");
    }
    if path.is_dir() {
        bail!("destination path '{}' is a directory", path.display());
    }
    if let Some(parent) = path.parent().filter(|dir| !dir.as_os_str().is_empty()) {
        fs::create_dir_all(parent)
            .with_context(|| format!("failed to create {}", parent.display()))?;
    }
    Ok(())
}

/// Renames `staged` over `path`. The staged file is removed on failure.
fn replace_with_staged(staged: &Path, path: &Path) -> Result<()> {
    if let Err(error) = fs::rename(staged, path) {
        let _ = fs::remove_file(staged);
        return Err(error).with_context(|| {
            format!(
                "failed to move {} into place at {}",
                staged.display(),
                path.display()
            )
        });
    }
    Ok(())
}

/// Replaces `path` with `content` so readers see either the old or the new text.
pub fn write_text_atomic(path: &Path, content: &str) -> Result<()> {
    prepare_destination(path)?;
    let staged = staging_path(path);
    fs::write(&staged, content)
        .with_context(|| format!("failed to write temporary file {}", staged.display()))?;
    replace_with_staged(&staged, path)
}

/// Copies `source` over `destination` through a staged sibling, so a process
/// still executing the old file keeps its inode.
pub fn copy_file_atomic(source: &Path, destination: &Path) -> Result<()> {
    prepare_destination(destination)?;
    let staged = staging_path(destination);
    if let Err(error) = fs::copy(source, &staged) {
        let _ = fs::remove_file(&staged);
        return Err(error).with_context(|| {
            format!(
                "failed to copy {} to {}",
                source.display(),
                staged.display()
            )
        });
    }
    replace_with_staged(&staged, destination)
}
