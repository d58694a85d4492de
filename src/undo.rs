//! Session-scoped backups of files before they are overwritten.
//!
//! An [`UndoSession`] owns a private directory (the session mirror root)
//! under which the pre-image of every rewritten file is stored, mirroring the
//! original's drive and directory layout so two files with the same name can
//! never collide. Backups live only as long as the session: dropping it (or
//! calling [`UndoSession::cleanup`]) deletes the whole tree.
//!
//! A file is captured at most once per session. If the same file is stripped
//! twice, restoring it brings back the *first* pre-image, i.e. the true
//! original.

use anyhow::{Context, Result};
use chrono::Utc;
use std::collections::HashMap;
use std::fs;
use std::io;
use std::path::{Component, Path, PathBuf};
use std::sync::{PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use crate::exif::clear_readonly;
use crate::paths::{absolutize, dir_key, path_key};

/// Directory under the backup base that holds one sub-directory per session.
const SESSIONS_DIR: &str = "SessionBackups";

/// Default base directory for session backups (inside the system temp dir).
pub fn default_backup_base() -> PathBuf {
    std::env::temp_dir().join("exif-strip")
}

/// One captured pre-image.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BackupEntry {
    /// Absolute path of the file that was backed up.
    pub original: PathBuf,
    /// Where its pre-image is stored inside the session root.
    pub backup: PathBuf,
}

/// Backup/undo store for one run of the program.
///
/// All methods take `&self`; the entry map is internally synchronized so
/// worker threads can record backups while another thread restores.
#[derive(Debug)]
pub struct UndoSession {
    root: PathBuf,
    entries: RwLock<HashMap<String, BackupEntry>>,
}

impl UndoSession {
    /// Create a session with a fresh, uniquely named mirror root under `base`.
    pub fn new(base: &Path) -> Result<Self> {
        let sessions = base.join(SESSIONS_DIR);
        fs::create_dir_all(&sessions).with_context(|| {
            format!("Failed to create backup directory {}", sessions.display())
        })?;

        let stamp = Utc::now().format("%Y%m%d_%H%M%S_%3f").to_string();
        let mut attempt = 0u32;
        let root = loop {
            let name = if attempt == 0 {
                stamp.clone()
            } else {
                format!("{stamp}_{attempt}")
            };
            let candidate = sessions.join(name);
            match fs::create_dir(&candidate) {
                Ok(()) => break candidate,
                Err(e) if e.kind() == io::ErrorKind::AlreadyExists => attempt += 1,
                Err(e) => {
                    return Err(e).with_context(|| {
                        format!("Failed to create session directory {}", candidate.display())
                    });
                }
            }
        };

        log::debug!("Undo session root: {}", root.display());
        Ok(Self {
            root,
            entries: RwLock::new(HashMap::new()),
        })
    }

    /// Delete all session backups under `base`, including leftovers of a
    /// crashed run. Best-effort; returns whether anything was removed.
    pub fn purge_stale(base: &Path) -> bool {
        let sessions = base.join(SESSIONS_DIR);
        if !sessions.exists() {
            return false;
        }
        match fs::remove_dir_all(&sessions) {
            Ok(()) => {
                log::debug!("Purged stale backups in {}", sessions.display());
                true
            }
            Err(e) => {
                log::warn!("Could not purge stale backups in {}: {e}", sessions.display());
                false
            }
        }
    }

    /// Root directory holding this session's backups.
    pub fn session_root(&self) -> &Path {
        &self.root
    }

    /// Capture the current content of `original` unless it is missing or was
    /// already captured this session. A failed copy leaves the file untracked.
    pub fn request_backup(&self, original: &Path) {
        let original = absolutize(original);
        if !original.is_file() {
            return;
        }
        let key = path_key(&original);
        if self.read_entries().contains_key(&key) {
            return;
        }

        // Check, copy and insert under one write lock so that only the first
        // caller for a path ever writes its backup file.
        let mut entries = self.write_entries();
        if entries.contains_key(&key) {
            return;
        }

        let backup = self.root.join(mirror_relative(&original));
        if let Some(parent) = backup.parent() {
            if let Err(e) = fs::create_dir_all(parent) {
                log::debug!("Could not create {}: {e}", parent.display());
            }
        }

        match fs::copy(&original, &backup) {
            Ok(_) => {
                log::debug!("Backed up {} -> {}", original.display(), backup.display());
                entries.insert(key, BackupEntry { original, backup });
            }
            Err(e) => {
                log::debug!("Backup of {} failed, no undo available: {e}", original.display());
            }
        }
    }

    /// Copy the captured pre-image back over `original`.
    ///
    /// Returns `false` if nothing was captured for it or the backup is gone.
    /// The entry is kept, so restoring again later works the same way.
    pub fn restore(&self, original: &Path) -> bool {
        let Some(entry) = self.entry(original) else {
            return false;
        };
        if !entry.backup.is_file() {
            return false;
        }

        clear_readonly(&entry.original);
        match fs::copy(&entry.backup, &entry.original) {
            Ok(_) => {
                log::debug!("Restored {}", entry.original.display());
                true
            }
            Err(e) => {
                log::warn!("Restore of {} failed: {e}", entry.original.display());
                false
            }
        }
    }

    /// Restore every tracked file lexically inside `dir` (case-insensitive).
    /// Returns how many were restored.
    pub fn restore_folder(&self, dir: &Path) -> usize {
        if !dir.is_dir() {
            return 0;
        }
        // Prefix match ignores case on every platform.
        let prefix = dir_key(dir).to_lowercase();
        let originals: Vec<PathBuf> = self
            .read_entries()
            .iter()
            .filter(|(key, _)| key.to_lowercase().starts_with(&prefix))
            .map(|(_, entry)| entry.original.clone())
            .collect();

        originals.iter().filter(|p| self.restore(p)).count()
    }

    /// Whether a pre-image of `original` was captured this session.
    pub fn has_backup(&self, original: &Path) -> bool {
        self.read_entries().contains_key(&path_key(original))
    }

    /// Map a display string (bare file name or trailing part of a path) back
    /// to a tracked original. Matching ignores case; the first match in path
    /// order wins.
    pub fn resolve_by_suffix(&self, display: &str) -> Option<PathBuf> {
        let display = display.trim();
        if display.is_empty() {
            return None;
        }
        let wanted = display.to_lowercase();
        self.entries().into_iter().map(|e| e.original).find(|original| {
            let name_matches = original
                .file_name()
                .is_some_and(|n| n.to_string_lossy().to_lowercase() == wanted);
            name_matches || original.to_string_lossy().to_lowercase().ends_with(&wanted)
        })
    }

    /// Snapshot of all entries, ordered by original path.
    pub fn entries(&self) -> Vec<BackupEntry> {
        let mut entries: Vec<BackupEntry> = self.read_entries().values().cloned().collect();
        entries.sort_by(|a, b| a.original.cmp(&b.original));
        entries
    }

    pub fn len(&self) -> usize {
        self.read_entries().len()
    }

    pub fn is_empty(&self) -> bool {
        self.read_entries().is_empty()
    }

    /// Delete the session root and everything in it. Best-effort.
    pub fn cleanup(&self) {
        if !self.root.exists() {
            return;
        }
        if let Err(e) = fs::remove_dir_all(&self.root) {
            log::warn!("Could not remove backups in {}: {e}", self.root.display());
        }
    }

    fn entry(&self, original: &Path) -> Option<BackupEntry> {
        self.read_entries().get(&path_key(original)).cloned()
    }

    fn read_entries(&self) -> RwLockReadGuard<'_, HashMap<String, BackupEntry>> {
        self.entries.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write_entries(&self) -> RwLockWriteGuard<'_, HashMap<String, BackupEntry>> {
        self.entries.write().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Drop for UndoSession {
    fn drop(&mut self) {
        self.cleanup();
    }
}

/// Relative location of an absolute path's backup: the drive (if any)
/// becomes the first directory, e.g. `C:\Images\a.jpg` -> `C\Images\a.jpg`
/// and `/home/me/a.jpg` -> `home/me/a.jpg`.
fn mirror_relative(original: &Path) -> PathBuf {
    let mut rel = PathBuf::new();
    for c in original.components() {
        match c {
            Component::Prefix(prefix) => {
                let drive: String = prefix
                    .as_os_str()
                    .to_string_lossy()
                    .chars()
                    .filter(char::is_ascii_alphanumeric)
                    .collect();
                if !drive.is_empty() {
                    rel.push(drive);
                }
            }
            Component::Normal(part) => rel.push(part),
            Component::ParentDir => rel.push("__up"),
            Component::RootDir | Component::CurDir => {}
        }
    }
    if rel.as_os_str().is_empty() {
        rel.push(original.file_name().unwrap_or(original.as_os_str()));
    }
    rel
}
