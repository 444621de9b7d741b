use std::fs;
use std::io::Write;
use std::path::Path;
use tempfile::NamedTempFile;
use tracing::{debug, info};

use super::error::{Result, UpdateError};
use super::verify::VerifiedBinary;

/// Replace the executable at `target` with `binary`
///
/// The new image is written to a staging file next to `target` and renamed
/// over it, so a reader sees either the old or the new file. On failure the
/// original is left in place.
pub fn replace_binary(binary: &VerifiedBinary, target: &Path) -> Result<()> {
    if !cfg!(any(unix, windows)) {
        return Err(UpdateError::PlatformUnsupported(std::env::consts::OS));
    }

    let dir = match target.parent() {
        Some(dir) if !dir.as_os_str().is_empty() => dir,
        _ => Path::new("."),
    };

    let mut staged = NamedTempFile::new_in(dir).map_err(|e| UpdateError::from_io(dir, e))?;
    debug!(staging = %staged.path().display(), "staging new binary");

    staged
        .write_all(binary.bytes())
        .and_then(|()| staged.as_file().sync_all())
        .map_err(|e| UpdateError::from_io(staged.path(), e))?;

    let permissions = match fs::metadata(target) {
        Ok(meta) => meta.permissions(),
        Err(_) => default_permissions(staged.path())?,
    };
    fs::set_permissions(staged.path(), permissions)
        .map_err(|e| UpdateError::from_io(staged.path(), e))?;

    swap_into_place(staged, target)?;
    info!(target = %target.display(), "installed new binary");
    Ok(())
}

#[cfg(unix)]
fn default_permissions(_path: &Path) -> Result<fs::Permissions> {
    use std::os::unix::fs::PermissionsExt;
    Ok(fs::Permissions::from_mode(0o755))
}

#[cfg(not(unix))]
fn default_permissions(path: &Path) -> Result<fs::Permissions> {
    fs::metadata(path)
        .map(|meta| meta.permissions())
        .map_err(|e| UpdateError::from_io(path, e))
}

#[cfg(not(windows))]
fn swap_into_place(staged: NamedTempFile, target: &Path) -> Result<()> {
    staged
        .persist(target)
        .map_err(|e| UpdateError::from_io(target, e.error))?;
    Ok(())
}

// A running image cannot be overwritten on Windows, but it can be renamed.
#[cfg(windows)]
fn swap_into_place(staged: NamedTempFile, target: &Path) -> Result<()> {
    let backup = target.with_extension("old");
    if backup.exists() {
        fs::remove_file(&backup).map_err(|e| UpdateError::from_io(&backup, e))?;
    }

    let had_target = target.exists();
    if had_target {
        fs::rename(target, &backup).map_err(|e| UpdateError::from_io(target, e))?;
    }

    if let Err(e) = staged.persist(target) {
        if had_target {
            if let Err(restore) = fs::rename(&backup, target) {
                tracing::warn!(
                    "restoring {} from {} failed: {}",
                    target.display(),
                    backup.display(),
                    restore
                );
            }
        }
        return Err(UpdateError::from_io(target, e.error));
    }

    if had_target && fs::remove_file(&backup).is_err() {
        debug!(backup = %backup.display(), "old binary still in use, left in place");
    }
    Ok(())
}
