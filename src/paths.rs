//! Path identity and display helpers shared by the queue, the batch runner
//! and the undo store.

use std::collections::HashSet;
use std::path::{Component, MAIN_SEPARATOR, Path, PathBuf};

/// Whether path identity ignores case on this platform's default filesystems.
const CASE_INSENSITIVE: bool = cfg!(any(windows, target_os = "macos"));

/// Make `path` absolute against the current directory (lexically, no symlink
/// resolution). Falls back to the input when the cwd is unavailable.
pub fn absolutize(path: &Path) -> PathBuf {
    std::path::absolute(path).unwrap_or_else(|_| path.to_path_buf())
}

/// Identity key of a path: absolute, and case-folded where the platform
/// treats names case-insensitively. Two paths with equal keys are the same file.
pub fn path_key(path: &Path) -> String {
    let s = absolutize(path).to_string_lossy().into_owned();
    if CASE_INSENSITIVE { s.to_lowercase() } else { s }
}

/// [`path_key`] of a directory, always ending in a separator so that a prefix
/// test cannot match a sibling such as `/photos2` for `/photos`.
pub fn dir_key(dir: &Path) -> String {
    let mut key = path_key(dir);
    if !key.ends_with(MAIN_SEPARATOR) {
        key.push(MAIN_SEPARATOR);
    }
    key
}

/// Deepest directory shared by the parent directories of `files`, compared
/// segment by segment ignoring case.
///
/// Returns `None` when the only thing in common is the filesystem root (or
/// nothing at all); callers then display bare file names.
pub fn common_base<P: AsRef<Path>>(files: &[P]) -> Option<PathBuf> {
    let mut seen = HashSet::new();
    let dirs: Vec<PathBuf> = files
        .iter()
        .filter_map(|f| absolutize(f.as_ref()).parent().map(Path::to_path_buf))
        .filter(|d| !d.as_os_str().is_empty())
        .filter(|d| seen.insert(path_key(d)))
        .collect();

    let first = dirs.first()?;
    let first_segs = segments(first);
    let mut common = first_segs.len();
    for dir in &dirs[1..] {
        let segs = segments(dir);
        common = first_segs
            .iter()
            .zip(&segs)
            .take(common)
            .take_while(|(a, b)| a == b)
            .count();
        if common == 0 {
            return None;
        }
    }
    if common == 0 {
        return None;
    }

    let mut base = PathBuf::new();
    let mut taken = 0;
    for c in first.components() {
        if is_segment(&c) {
            if taken == common {
                break;
            }
            taken += 1;
        }
        base.push(c.as_os_str());
    }
    Some(base)
}

/// Display form of `full` relative to `base`; the bare file name when there
/// is no base or `full` lies outside it.
pub fn display_path(base: Option<&Path>, full: &Path) -> String {
    let name = full
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| full.display().to_string());
    let Some(base) = base else {
        return name;
    };

    let full = absolutize(full);
    let mut rest = full.components();
    for bc in base.components() {
        match rest.next() {
            Some(fc) if fold(&bc) == fold(&fc) => {}
            _ => return name,
        }
    }
    let rel = rest.as_path();
    if rel.as_os_str().is_empty() {
        name
    } else {
        rel.display().to_string()
    }
}

fn is_segment(c: &Component<'_>) -> bool {
    matches!(c, Component::Prefix(_) | Component::Normal(_))
}

fn segments(dir: &Path) -> Vec<String> {
    dir.components().filter(is_segment).map(|c| fold(&c)).collect()
}

fn fold(c: &Component<'_>) -> String {
    c.as_os_str().to_string_lossy().to_lowercase()
}
