use chrono::{DateTime, Local, NaiveDateTime, TimeZone};
use filetime::FileTime;
use nom_exif::*;
use std::path::Path;

/// Formats nom-exif may render a DateTimeOriginal value in, plus the raw EXIF form.
const CAPTURE_TIME_FORMATS: &[&str] = &[
    "%Y:%m:%d %H:%M:%S",
    "%Y-%m-%d %H:%M:%S",
    "%Y-%m-%dT%H:%M:%S",
    "%Y:%m:%d %H:%M",
];

/// Read the EXIF DateTimeOriginal of an image, if it has one.
///
/// Best-effort: any parse failure (no EXIF, unsupported container, odd
/// value) yields `None` and is only logged at debug level.
pub fn read_capture_time(path: &Path) -> Option<NaiveDateTime> {
    let mut parser = MediaParser::new();
    let ms = match MediaSource::file_path(path) {
        Ok(ms) => ms,
        Err(e) => {
            log::debug!("Cannot open {} for EXIF read: {e}", path.display());
            return None;
        }
    };

    let iter: ExifIter = match parser.parse(ms) {
        Ok(iter) => iter,
        Err(_) => {
            log::debug!("No EXIF data found in {}", path.display());
            return None;
        }
    };
    let exif: Exif = iter.into();

    let raw = exif.get(ExifTag::DateTimeOriginal)?.to_string();
    let parsed = parse_capture_time(&raw);
    if parsed.is_none() {
        log::debug!("Unparseable DateTimeOriginal {raw:?} in {}", path.display());
    }
    parsed
}

/// Parse an EXIF-style timestamp (`YYYY:MM:DD HH:MM:SS`), tolerating trailing
/// NULs, whitespace, quotes and the ISO renderings nom-exif produces.
///
/// A value carrying a UTC offset is reduced to its wall-clock part: EXIF
/// capture times are local times.
pub fn parse_capture_time(raw: &str) -> Option<NaiveDateTime> {
    let s = raw
        .trim_matches(|c: char| c == '\0' || c.is_whitespace())
        .trim_matches('"')
        .trim();
    if s.is_empty() {
        return None;
    }

    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Some(dt.naive_local());
    }
    if let Ok(dt) = DateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S %:z") {
        return Some(dt.naive_local());
    }

    CAPTURE_TIME_FORMATS
        .iter()
        .find_map(|fmt| NaiveDateTime::parse_from_str(s, fmt).ok())
}

/// Convert a local wall-clock capture time into a file timestamp.
pub fn capture_time_to_filetime(naive: &NaiveDateTime) -> Option<FileTime> {
    let local = Local.from_local_datetime(naive).earliest()?;
    Some(FileTime::from_unix_time(local.timestamp(), 0))
}

/// Set a file's last-write time to its photo capture time. Failures are
/// swallowed: timestamp fidelity never decides whether a strip succeeded.
pub(crate) fn apply_capture_time(path: &Path, captured: Option<NaiveDateTime>) {
    let Some(ft) = captured.as_ref().and_then(capture_time_to_filetime) else {
        return;
    };
    if let Err(e) = filetime::set_file_mtime(path, ft) {
        log::debug!("Could not set capture time on {}: {e}", path.display());
    }
}
