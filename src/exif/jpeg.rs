use std::io::{self, Read, Write};

use super::io_util::{read_byte, read_exact_or};
use crate::error::{Result, StripError};

const SOI: [u8; 2] = [0xFF, 0xD8];
const EOI: u8 = 0xD9;
const SOS: u8 = 0xDA;
const APP1: u8 = 0xE1;
const TEM: u8 = 0x01;

const EXIF_PREFIX: &[u8] = b"Exif\0\0";
const XMP_PREFIX: &[u8] = b"http://ns.adobe.com/xap/1.0/";
const XMP_EXTENSION_PREFIX: &[u8] = b"http://ns.adobe.com/xmp/extension/";

/// Consume and verify the start-of-image marker.
pub(crate) fn read_signature<R: Read>(src: &mut R) -> Result<()> {
    let mut soi = [0u8; 2];
    match src.read_exact(&mut soi) {
        Ok(()) if soi == SOI => Ok(()),
        Ok(()) => Err(StripError::Format("JPEG")),
        Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => Err(StripError::Format("JPEG")),
        Err(e) => Err(e.into()),
    }
}

/// Copy a JPEG stream (positioned just after SOI) to `dst`, dropping every
/// APP1 segment that carries EXIF or XMP. Returns whether anything was dropped.
///
/// Entropy-coded data after the first SOS is copied through without parsing.
pub(crate) fn copy_stripped<R: Read, W: Write>(src: &mut R, dst: &mut W) -> Result<bool> {
    dst.write_all(&SOI)?;
    let mut removed = false;

    while let Some(marker) = next_marker(src)? {
        match marker {
            EOI => {
                dst.write_all(&[0xFF, EOI])?;
                break;
            }
            SOS => {
                let header = read_segment(src, marker)?;
                write_segment(dst, marker, &header)?;
                io::copy(src, dst)?;
                break;
            }
            TEM | 0xD0..=0xD7 => dst.write_all(&[0xFF, marker])?,
            _ => {
                let payload = read_segment(src, marker)?;
                if marker == APP1 && is_metadata_payload(&payload) {
                    log::debug!("Dropping APP1 segment ({} bytes)", payload.len() + 2);
                    removed = true;
                } else {
                    write_segment(dst, marker, &payload)?;
                }
            }
        }
    }

    Ok(removed)
}

/// True for APP1 payloads holding EXIF or (extended) XMP.
fn is_metadata_payload(payload: &[u8]) -> bool {
    payload.starts_with(EXIF_PREFIX)
        || payload.starts_with(XMP_PREFIX)
        || payload.starts_with(XMP_EXTENSION_PREFIX)
}

/// Find the next marker byte: skip to a 0xFF, then over any 0xFF fill bytes.
/// `None` at end of stream.
fn next_marker<R: Read>(src: &mut R) -> io::Result<Option<u8>> {
    loop {
        match read_byte(src)? {
            None => return Ok(None),
            Some(0xFF) => break,
            Some(_) => {}
        }
    }
    loop {
        match read_byte(src)? {
            None => return Ok(None),
            Some(0xFF) => {}
            Some(marker) => return Ok(Some(marker)),
        }
    }
}

/// Read a length-prefixed segment body (without the length field).
fn read_segment<R: Read>(src: &mut R, marker: u8) -> Result<Vec<u8>> {
    let mut len_bytes = [0u8; 2];
    read_exact_or(src, &mut len_bytes, "segment length")?;
    let len = u16::from_be_bytes(len_bytes);
    if len < 2 {
        return Err(StripError::InvalidData(format!(
            "invalid segment length {len} for marker 0x{marker:02X}"
        )));
    }

    let body_len = usize::from(len - 2);
    let mut body = Vec::with_capacity(body_len);
    src.by_ref().take(body_len as u64).read_to_end(&mut body)?;
    if body.len() != body_len {
        return Err(StripError::Truncated("segment payload"));
    }
    Ok(body)
}

fn write_segment<W: Write>(dst: &mut W, marker: u8, body: &[u8]) -> io::Result<()> {
    // body came from a u16 length field, so this cannot overflow
    let len = (body.len() + 2) as u16;
    dst.write_all(&[0xFF, marker])?;
    dst.write_all(&len.to_be_bytes())?;
    dst.write_all(body)
}
