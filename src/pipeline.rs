use serde::Serialize;
use std::collections::HashSet;
use std::fmt;
use std::path::{Path, PathBuf};
use walkdir::{DirEntry, WalkDir};

use crate::exif;
use crate::paths::{absolutize, common_base, display_path, path_key};
use crate::undo::UndoSession;

/// Supported image extensions.
const IMAGE_EXTENSIONS: &[&str] = &["jpg", "jpeg", "png"];

/// The container format of an image, determined by its extension.
///
/// # Example
///
/// ```rust
/// use exif_strip::pipeline::ImageKind;
/// use std::path::Path;
///
/// assert_eq!(ImageKind::from_path(Path::new("photo.JPG")), Some(ImageKind::Jpeg));
/// assert_eq!(ImageKind::from_path(Path::new("scan.png")), Some(ImageKind::Png));
/// assert_eq!(ImageKind::from_path(Path::new("clip.heic")), None);
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ImageKind {
    /// JPEG: APP1 EXIF and XMP segments are stripped
    Jpeg,
    /// PNG: `eXIf` chunks are stripped
    Png,
}

impl ImageKind {
    /// Determine the image kind from a file path extension.
    pub fn from_path(path: &Path) -> Option<Self> {
        let ext = path.extension()?.to_str()?.to_lowercase();
        match ext.as_str() {
            "jpg" | "jpeg" => Some(Self::Jpeg),
            "png" => Some(Self::Png),
            _ => None,
        }
    }
}

/// What happened to one file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Outcome {
    /// Metadata was found and the file rewritten without it.
    Removed,
    /// The file had nothing to strip and was left untouched.
    NoMetadataPresent,
    /// Not a JPEG or PNG by extension.
    Unsupported,
    /// Stripping failed; see [`ProcessResult::error`].
    Error,
}

impl Outcome {
    /// Tag used in report lines.
    pub fn tag(self) -> &'static str {
        match self {
            Self::Removed => "Removed EXIF",
            Self::NoMetadataPresent => "No EXIF present",
            Self::Unsupported => "Unsupported file",
            Self::Error => "Error",
        }
    }
}

/// Kind and message of a failed strip.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ErrorDetail {
    pub kind: String,
    pub message: String,
}

/// The result of processing a single file in a batch.
///
/// Its [`Display`](fmt::Display) form is the report line, e.g.
/// `[Removed EXIF] [trip/IMG_0001.jpg]` or
/// `[Error] [TruncatedError: unexpected end of file while reading segment payload] [a.jpg]`.
#[derive(Debug, Clone, Serialize)]
pub struct ProcessResult {
    pub path: PathBuf,
    /// Path shown to the user, relative to the batch's common base.
    pub display: String,
    pub outcome: Outcome,
    pub error: Option<ErrorDetail>,
    /// A pre-image was captured, so the file can be restored.
    pub restorable: bool,
}

impl fmt::Display for ProcessResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] ", self.outcome.tag())?;
        if let Some(ref err) = self.error {
            write!(f, "[{}: {}] ", err.kind, err.message)?;
        }
        write!(f, "[{}]", self.display)
    }
}

/// Per-outcome counts for one batch.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct BatchSummary {
    pub batch: u64,
    pub removed: usize,
    pub no_metadata: usize,
    pub unsupported: usize,
    pub errors: usize,
}

impl BatchSummary {
    fn record(&mut self, outcome: Outcome) {
        match outcome {
            Outcome::Removed => self.removed += 1,
            Outcome::NoMetadataPresent => self.no_metadata += 1,
            Outcome::Unsupported => self.unsupported += 1,
            Outcome::Error => self.errors += 1,
        }
    }

    /// Files that were left alone (nothing to strip or unsupported).
    pub fn skipped(&self) -> usize {
        self.no_metadata + self.unsupported
    }

    pub fn total(&self) -> usize {
        self.removed + self.skipped() + self.errors
    }
}

impl fmt::Display for BatchSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Removed: {}, No EXIF / Unsupported: {}, Errors: {}",
            self.removed,
            self.skipped(),
            self.errors
        )
    }
}

/// A frozen, deduplicated set of files collected in one debounce window.
#[derive(Debug, Clone)]
pub struct Batch {
    /// Sequence number, starting at 1 for the first batch of a queue.
    pub id: u64,
    pub files: Vec<PathBuf>,
}

/// Progress of a batch, streamed to a [`ReportSink`] in order: `Started`,
/// one `Processed` per file, then `Finished`. A batch whose files all
/// vanished reports `NoValidFiles` and nothing else.
#[derive(Debug, Clone)]
pub enum BatchEvent {
    Started {
        batch: u64,
        files: usize,
        base: Option<PathBuf>,
    },
    NoValidFiles {
        batch: u64,
    },
    Processed(ProcessResult),
    Finished(BatchSummary),
}

/// Receiver of batch progress (log window, terminal, JSON writer, test probe).
///
/// Called from the worker thread running the batch.
pub trait ReportSink: Send + Sync {
    fn report(&self, event: &BatchEvent);
}

impl<F> ReportSink for F
where
    F: Fn(&BatchEvent) + Send + Sync,
{
    fn report(&self, event: &BatchEvent) {
        self(event)
    }
}

/// Expand files and directories into a flat, deduplicated list of absolute
/// file paths, in discovery order.
///
/// Directories are walked depth-first (files of a directory before its
/// sub-directories, each sorted by name), following symlinks and skipping
/// directories flagged as system directories. Only supported images are taken
/// from directories; a file given explicitly is always kept so that it can be
/// reported as unsupported later. Unreadable sub-directories are logged and
/// skipped.
///
/// # Example
///
/// ```rust,no_run
/// use exif_strip::pipeline::expand_paths;
/// use std::path::PathBuf;
///
/// let files = expand_paths(&[
///     PathBuf::from("photo.jpg"),   // single file
///     PathBuf::from("./photos/"),   // entire directory
/// ]);
/// println!("Found {} files", files.len());
/// ```
pub fn expand_paths<P: AsRef<Path>>(inputs: &[P]) -> Vec<PathBuf> {
    let mut seen = HashSet::new();
    let mut files = Vec::new();

    for input in inputs {
        let input = input.as_ref();
        if input.as_os_str().is_empty() {
            continue;
        }
        let path = absolutize(input);

        if path.is_file() {
            if seen.insert(path_key(&path)) {
                files.push(path);
            }
            continue;
        }
        if !path.is_dir() {
            log::warn!("Path does not exist: {}", path.display());
            continue;
        }

        let walker = WalkDir::new(&path)
            .follow_links(true)
            .sort_by(|a, b| {
                a.file_type()
                    .is_dir()
                    .cmp(&b.file_type().is_dir())
                    .then_with(|| a.file_name().cmp(b.file_name()))
            })
            .into_iter()
            .filter_entry(|e| !is_system_dir(e));

        for entry in walker {
            let entry = match entry {
                Ok(entry) => entry,
                Err(e) => {
                    log::warn!("Skipping unreadable path: {e}");
                    continue;
                }
            };
            if entry.file_type().is_file() && is_supported_image(entry.path()) {
                let p = entry.into_path();
                if seen.insert(path_key(&p)) {
                    files.push(p);
                }
            }
        }
    }

    files
}

/// Check if a file has a supported image extension.
pub fn is_supported_image(path: &Path) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| IMAGE_EXTENSIONS.contains(&ext.to_lowercase().as_str()))
        .unwrap_or(false)
}

#[cfg(windows)]
fn is_system_dir(entry: &DirEntry) -> bool {
    use std::os::windows::fs::MetadataExt;
    const FILE_ATTRIBUTE_SYSTEM: u32 = 0x4;

    entry.depth() > 0
        && entry.file_type().is_dir()
        && entry
            .metadata()
            .map(|m| m.file_attributes() & FILE_ATTRIBUTE_SYSTEM != 0)
            .unwrap_or(false)
}

#[cfg(not(windows))]
fn is_system_dir(_entry: &DirEntry) -> bool {
    false
}

/// Strip one file and classify the outcome. Never fails: errors become an
/// [`Outcome::Error`] result.
pub fn process_file(path: &Path, base: Option<&Path>, undo: Option<&UndoSession>) -> ProcessResult {
    let display = display_path(base, path);
    let mut error = None;

    let outcome = match ImageKind::from_path(path) {
        None => Outcome::Unsupported,
        Some(kind) => match exif::strip_metadata(path, kind, undo) {
            Ok(true) => Outcome::Removed,
            Ok(false) => Outcome::NoMetadataPresent,
            Err(e) => {
                log::debug!("Strip failed for {}: {e}", path.display());
                error = Some(ErrorDetail {
                    kind: e.kind().to_string(),
                    message: e.to_string(),
                });
                Outcome::Error
            }
        },
    };

    let restorable =
        outcome == Outcome::Removed && undo.is_some_and(|undo| undo.has_backup(path));

    ProcessResult {
        path: path.to_path_buf(),
        display,
        outcome,
        error,
        restorable,
    }
}

/// Process one frozen batch, reporting each file as soon as it is done.
///
/// The display base is recomputed from this batch's own files. Paths that no
/// longer exist are dropped; duplicates are removed again.
///
/// # Example
///
/// ```rust,no_run
/// use exif_strip::pipeline::{run_batch, Batch, BatchEvent};
/// use std::path::PathBuf;
///
/// let batch = Batch { id: 1, files: vec![PathBuf::from("/photos/a.jpg")] };
/// let print = |event: &BatchEvent| {
///     if let BatchEvent::Processed(result) = event {
///         println!("{result}");
///     }
/// };
/// let summary = run_batch(&batch, None, &print);
/// println!("{summary}");
/// ```
pub fn run_batch(batch: &Batch, undo: Option<&UndoSession>, sink: &dyn ReportSink) -> BatchSummary {
    let base = common_base(&batch.files);

    let mut seen = HashSet::new();
    let targets: Vec<&PathBuf> = batch
        .files
        .iter()
        .filter(|p| p.is_file())
        .filter(|p| seen.insert(path_key(p)))
        .collect();

    let mut summary = BatchSummary {
        batch: batch.id,
        ..Default::default()
    };

    if targets.is_empty() {
        log::info!("Batch {}: no valid files", batch.id);
        sink.report(&BatchEvent::NoValidFiles { batch: batch.id });
        return summary;
    }

    // Front ends print the header from `Started`; the log line is for tracing.
    log::debug!("Batch {}: processing {} file(s)", batch.id, targets.len());
    sink.report(&BatchEvent::Started {
        batch: batch.id,
        files: targets.len(),
        base: base.clone(),
    });

    let total = targets.len();
    for (i, path) in targets.into_iter().enumerate() {
        log::debug!("[{}/{}] {}", i + 1, total, path.display());
        let result = process_file(path, base.as_deref(), undo);
        summary.record(result.outcome);
        sink.report(&BatchEvent::Processed(result));
    }

    log::info!("Batch {} done: {summary}", batch.id);
    sink.report(&BatchEvent::Finished(summary));
    summary
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use std::sync::Mutex;
    use tempfile::TempDir;

    const CLEAN_JPEG: &[u8] = &[0xFF, 0xD8, 0xFF, 0xFE, 0x00, 0x03, b'c', 0xFF, 0xD9];
    const EXIF_JPEG: &[u8] = &[
        0xFF, 0xD8, 0xFF, 0xE1, 0x00, 0x08, b'E', b'x', b'i', b'f', 0, 0, 0xFF, 0xD9,
    ];

    fn collect(batch: &Batch, undo: Option<&UndoSession>) -> (Vec<BatchEvent>, BatchSummary) {
        let events = Mutex::new(Vec::new());
        let sink = |e: &BatchEvent| events.lock().unwrap().push(e.clone());
        let summary = run_batch(batch, undo, &sink);
        (events.into_inner().unwrap(), summary)
    }

    fn processed(events: &[BatchEvent]) -> Vec<&ProcessResult> {
        events
            .iter()
            .filter_map(|e| match e {
                BatchEvent::Processed(r) => Some(r),
                _ => None,
            })
            .collect()
    }

    // ── ImageKind::from_path ──────────────────────────────────────────

    #[test]
    fn image_kind_jpeg() {
        assert_eq!(ImageKind::from_path(Path::new("photo.jpg")), Some(ImageKind::Jpeg));
        assert_eq!(ImageKind::from_path(Path::new("photo.jpeg")), Some(ImageKind::Jpeg));
        assert_eq!(ImageKind::from_path(Path::new("PHOTO.JPG")), Some(ImageKind::Jpeg));
    }

    #[test]
    fn image_kind_png() {
        assert_eq!(ImageKind::from_path(Path::new("image.png")), Some(ImageKind::Png));
        assert_eq!(ImageKind::from_path(Path::new("IMAGE.PNG")), Some(ImageKind::Png));
    }

    #[test]
    fn image_kind_unsupported() {
        assert_eq!(ImageKind::from_path(Path::new("photo.webp")), None);
        assert_eq!(ImageKind::from_path(Path::new("doc.pdf")), None);
        assert_eq!(ImageKind::from_path(Path::new("noext")), None);
    }

    // ── is_supported_image ───────────────────────────────────────────

    #[test]
    fn supported_image_extensions() {
        assert!(is_supported_image(Path::new("photo.jpg")));
        assert!(is_supported_image(Path::new("photo.JPEG")));
        assert!(is_supported_image(Path::new("photo.Png")));
        assert!(!is_supported_image(Path::new("photo.tif")));
        assert!(!is_supported_image(Path::new("readme.txt")));
        assert!(!is_supported_image(Path::new("noext")));
    }

    // ── expand_paths ─────────────────────────────────────────────────

    #[test]
    fn expand_keeps_explicit_unsupported_file() {
        let dir = TempDir::new().unwrap();
        let txt = dir.path().join("readme.txt");
        fs::write(&txt, b"hello").unwrap();

        let files = expand_paths(&[txt.clone()]);
        assert_eq!(files, vec![txt]);
    }

    #[test]
    fn expand_directory_recursive_filters_extensions() {
        let dir = TempDir::new().unwrap();
        let sub = dir.path().join("sub");
        fs::create_dir(&sub).unwrap();
        fs::write(dir.path().join("a.jpg"), b"fake").unwrap();
        fs::write(sub.join("b.png"), b"fake").unwrap();
        fs::write(sub.join("c.txt"), b"fake").unwrap();

        let files = expand_paths(&[dir.path().to_path_buf()]);
        assert_eq!(files, vec![dir.path().join("a.jpg"), sub.join("b.png")]);
    }

    #[test]
    fn expand_lists_files_before_subdirectories() {
        let dir = TempDir::new().unwrap();
        let sub = dir.path().join("a_sub");
        fs::create_dir(&sub).unwrap();
        fs::write(sub.join("x.jpg"), b"fake").unwrap();
        fs::write(dir.path().join("z.jpg"), b"fake").unwrap();

        let files = expand_paths(&[dir.path().to_path_buf()]);
        assert_eq!(files, vec![dir.path().join("z.jpg"), sub.join("x.jpg")]);
    }

    #[test]
    fn expand_deduplicates_across_inputs() {
        let dir = TempDir::new().unwrap();
        let jpg = dir.path().join("a.jpg");
        fs::write(&jpg, b"fake").unwrap();

        let files = expand_paths(&[jpg.clone(), dir.path().to_path_buf(), jpg.clone()]);
        assert_eq!(files, vec![jpg]);
    }

    #[test]
    fn expand_skips_missing_and_empty() {
        let files = expand_paths(&[PathBuf::from("/nonexistent/path"), PathBuf::new()]);
        assert!(files.is_empty());
    }

    // ── report lines ─────────────────────────────────────────────────

    #[test]
    fn result_lines() {
        let mut r = ProcessResult {
            path: PathBuf::from("/p/a.jpg"),
            display: "sub/a.jpg".into(),
            outcome: Outcome::Removed,
            error: None,
            restorable: true,
        };
        assert_eq!(r.to_string(), "[Removed EXIF] [sub/a.jpg]");
        r.outcome = Outcome::NoMetadataPresent;
        assert_eq!(r.to_string(), "[No EXIF present] [sub/a.jpg]");
        r.outcome = Outcome::Unsupported;
        assert_eq!(r.to_string(), "[Unsupported file] [sub/a.jpg]");
        r.outcome = Outcome::Error;
        r.error = Some(ErrorDetail {
            kind: "FormatError".into(),
            message: "not a valid JPEG file (bad signature)".into(),
        });
        assert_eq!(
            r.to_string(),
            "[Error] [FormatError: not a valid JPEG file (bad signature)] [sub/a.jpg]"
        );
    }

    #[test]
    fn summary_line() {
        let s = BatchSummary {
            batch: 1,
            removed: 2,
            no_metadata: 1,
            unsupported: 3,
            errors: 1,
        };
        assert_eq!(s.to_string(), "Removed: 2, No EXIF / Unsupported: 4, Errors: 1");
        assert_eq!(s.total(), 7);
    }

    // ── run_batch ────────────────────────────────────────────────────

    #[test]
    fn batch_classifies_every_outcome_in_order() {
        let dir = TempDir::new().unwrap();
        let undo = UndoSession::new(&dir.path().join("undo")).unwrap();
        let photos = dir.path().join("photos");
        fs::create_dir_all(photos.join("trip")).unwrap();

        let with_exif = photos.join("trip").join("a.jpg");
        let clean = photos.join("b.jpg");
        let text = photos.join("notes.txt");
        let broken = photos.join("c.png");
        fs::write(&with_exif, EXIF_JPEG).unwrap();
        fs::write(&clean, CLEAN_JPEG).unwrap();
        fs::write(&text, b"hi").unwrap();
        fs::write(&broken, b"not a png").unwrap();

        let batch = Batch {
            id: 7,
            files: vec![with_exif.clone(), clean.clone(), text.clone(), broken.clone()],
        };
        let (events, summary) = collect(&batch, Some(&undo));

        assert!(matches!(
            events.first(),
            Some(BatchEvent::Started { batch: 7, files: 4, .. })
        ));
        assert!(matches!(events.last(), Some(BatchEvent::Finished(_))));

        let results = processed(&events);
        let lines: Vec<String> = results.iter().map(|r| r.to_string()).collect();
        let sep = std::path::MAIN_SEPARATOR;
        assert_eq!(
            lines,
            vec![
                format!("[Removed EXIF] [trip{sep}a.jpg]"),
                "[No EXIF present] [b.jpg]".to_string(),
                "[Unsupported file] [notes.txt]".to_string(),
                "[Error] [FormatError: not a valid PNG file (bad signature)] [c.png]".to_string(),
            ]
        );
        assert!(results[0].restorable);
        assert!(!results[1].restorable);

        assert_eq!(
            summary,
            BatchSummary {
                batch: 7,
                removed: 1,
                no_metadata: 1,
                unsupported: 1,
                errors: 1
            }
        );
    }

    #[test]
    fn batch_without_existing_files_reports_no_valid_files() {
        let dir = TempDir::new().unwrap();
        let batch = Batch {
            id: 1,
            files: vec![dir.path().join("gone.jpg")],
        };
        let (events, summary) = collect(&batch, None);
        assert_eq!(events.len(), 1);
        assert!(matches!(events[0], BatchEvent::NoValidFiles { batch: 1 }));
        assert_eq!(summary.total(), 0);
    }

    #[test]
    fn batch_deduplicates_again() {
        let dir = TempDir::new().unwrap();
        let clean = dir.path().join("b.jpg");
        fs::write(&clean, CLEAN_JPEG).unwrap();
        let batch = Batch {
            id: 2,
            files: vec![clean.clone(), clean.clone()],
        };
        let (events, _) = collect(&batch, None);
        assert_eq!(processed(&events).len(), 1);
    }

    /// Records every log line at info or above, for checking what a user sees.
    struct InfoLog(Mutex<Vec<String>>);

    impl log::Log for InfoLog {
        fn enabled(&self, meta: &log::Metadata) -> bool {
            meta.level() <= log::Level::Info
        }
        fn log(&self, record: &log::Record) {
            if self.enabled(record.metadata()) {
                self.0.lock().unwrap().push(record.args().to_string());
            }
        }
        fn flush(&self) {}
    }

    static INFO_LOG: InfoLog = InfoLog(Mutex::new(Vec::new()));

    #[test]
    fn batch_header_is_only_reported_through_the_sink() {
        let _ = log::set_logger(&INFO_LOG);
        log::set_max_level(log::LevelFilter::Info);

        let dir = TempDir::new().unwrap();
        let clean = dir.path().join("b.jpg");
        fs::write(&clean, CLEAN_JPEG).unwrap();
        let batch = Batch {
            id: 9041,
            files: vec![clean],
        };
        let (events, _) = collect(&batch, None);

        let headers = events
            .iter()
            .filter(|e| matches!(e, BatchEvent::Started { .. }))
            .count();
        assert_eq!(headers, 1);
        let lines = INFO_LOG.0.lock().unwrap();
        assert!(
            !lines.iter().any(|l| l.starts_with("Batch 9041: processing")),
            "header duplicated at info level: {lines:?}"
        );
        assert!(lines.iter().any(|l| l.starts_with("Batch 9041 done")));
    }
}
