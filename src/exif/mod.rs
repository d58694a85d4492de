//! EXIF/XMP stripping for JPEG and PNG.
//!
//! Both strippers stream the file into a temporary sibling, dropping
//! metadata segments (JPEG APP1 EXIF/XMP) or chunks (PNG `eXIf`) and copying
//! everything else byte-for-byte. Only when something was dropped is the
//! original replaced; an untouched file keeps its bytes and timestamps.
//!
//! - [`strip_jpeg`] / [`strip_png`]: format-specific entry points
//! - [`strip_metadata`]: routes on [`ImageKind`](crate::pipeline::ImageKind)
//! - [`read_capture_time`]: EXIF DateTimeOriginal, re-applied as the file's
//!   modification time after a rewrite

mod io_util;
mod jpeg;
mod png;
mod reader;
mod replace;

pub use reader::{parse_capture_time, read_capture_time};
pub(crate) use replace::clear_readonly;

use std::fs::File;
use std::io::{BufReader, BufWriter, Write};
use std::path::Path;

use crate::error::Result;
use crate::pipeline::ImageKind;
use crate::undo::UndoSession;
use replace::{remove_quietly, replace, temp_sibling};

/// Remove EXIF and XMP APP1 segments from a JPEG in place.
///
/// Returns `Ok(true)` when the file was rewritten, `Ok(false)` when there was
/// nothing to strip (the file is left untouched). The undo session, when
/// given, captures the original right before it is overwritten.
pub fn strip_jpeg(path: &Path, undo: Option<&UndoSession>) -> Result<bool> {
    strip_in_place(path, ImageKind::Jpeg, undo)
}

/// Remove `eXIf` chunks from a PNG in place. Same contract as [`strip_jpeg`].
pub fn strip_png(path: &Path, undo: Option<&UndoSession>) -> Result<bool> {
    strip_in_place(path, ImageKind::Png, undo)
}

/// Strip metadata from `path` using the stripper for `kind`.
pub fn strip_metadata(path: &Path, kind: ImageKind, undo: Option<&UndoSession>) -> Result<bool> {
    match kind {
        ImageKind::Jpeg => strip_jpeg(path, undo),
        ImageKind::Png => strip_png(path, undo),
    }
}

fn strip_in_place(path: &Path, kind: ImageKind, undo: Option<&UndoSession>) -> Result<bool> {
    let mut src = BufReader::new(File::open(path)?);
    match kind {
        ImageKind::Jpeg => jpeg::read_signature(&mut src)?,
        ImageKind::Png => png::read_signature(&mut src)?,
    }

    let temp = temp_sibling(path);
    let removed = match write_stripped(&mut src, &temp, kind) {
        Ok(removed) => removed,
        Err(e) => {
            remove_quietly(&temp);
            return Err(e);
        }
    };
    drop(src);

    if !removed {
        remove_quietly(&temp);
        return Ok(false);
    }

    // The original is still the pre-image at this point.
    let captured = read_capture_time(path);

    if let Err(e) = replace(&temp, path, undo) {
        remove_quietly(&temp);
        return Err(e.into());
    }
    reader::apply_capture_time(path, captured);

    Ok(true)
}

fn write_stripped(src: &mut BufReader<File>, temp: &Path, kind: ImageKind) -> Result<bool> {
    let mut dst = BufWriter::new(File::create(temp)?);
    let removed = match kind {
        ImageKind::Jpeg => jpeg::copy_stripped(src, &mut dst)?,
        ImageKind::Png => png::copy_stripped(src, &mut dst)?,
    };
    dst.flush()?;
    Ok(removed)
}
