use filetime::FileTime;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use crate::undo::UndoSession;

/// Suffix of the sibling file a rewrite is staged into.
const TEMP_SUFFIX: &str = ".exif_stripped_tmp";

/// Path of the temporary sibling used while rewriting `path`.
pub(crate) fn temp_sibling(path: &Path) -> PathBuf {
    let mut name = path.as_os_str().to_os_string();
    name.push(TEMP_SUFFIX);
    PathBuf::from(name)
}

/// Replace `dest` with the staged rewrite at `temp`.
///
/// When `dest` exists its access/modification times are snapshotted, the
/// read-only flag is cleared and the undo session (if any) captures the
/// pre-image. This is the only place a backup is ever requested.
pub(crate) fn replace(temp: &Path, dest: &Path, undo: Option<&UndoSession>) -> io::Result<()> {
    let mut times = None;

    if let Ok(meta) = fs::metadata(dest) {
        times = Some((
            FileTime::from_last_access_time(&meta),
            FileTime::from_last_modification_time(&meta),
        ));
        clear_readonly(dest);
        if let Some(undo) = undo {
            undo.request_backup(dest);
        }
    }

    fs::copy(temp, dest)?;

    if let Some((atime, mtime)) = times {
        if let Err(e) = filetime::set_file_times(dest, atime, mtime) {
            log::debug!("Could not restore timestamps on {}: {e}", dest.display());
        }
    }

    remove_quietly(temp);
    Ok(())
}

/// Clear the read-only permission on `path`. Best-effort.
#[allow(clippy::permissions_set_readonly_false)]
pub(crate) fn clear_readonly(path: &Path) {
    let Ok(meta) = fs::metadata(path) else {
        return;
    };
    let mut perms = meta.permissions();
    if perms.readonly() {
        perms.set_readonly(false);
        if let Err(e) = fs::set_permissions(path, perms) {
            log::debug!("Could not clear read-only on {}: {e}", path.display());
        }
    }
}

/// Delete a file, ignoring any failure.
pub(crate) fn remove_quietly(path: &Path) {
    if path.exists() {
        if let Err(e) = fs::remove_file(path) {
            log::debug!("Could not remove {}: {e}", path.display());
        }
    }
}
