use std::io::{self, Read, Write};

use super::io_util::{copy_exact, read_exact_or, read_full};
use crate::error::{Result, StripError};

const SIGNATURE: [u8; 8] = [0x89, b'P', b'N', b'G', 0x0D, 0x0A, 0x1A, 0x0A];
const EXIF_CHUNK: [u8; 4] = *b"eXIf";
const IEND_CHUNK: [u8; 4] = *b"IEND";

/// Largest chunk length the PNG format allows (2^31 - 1).
const MAX_CHUNK_LEN: u32 = 0x7FFF_FFFF;

/// Consume and verify the 8-byte PNG signature.
pub(crate) fn read_signature<R: Read>(src: &mut R) -> Result<()> {
    let mut sig = [0u8; 8];
    if read_full(src, &mut sig)? != sig.len() || sig != SIGNATURE {
        return Err(StripError::Format("PNG"));
    }
    Ok(())
}

/// Copy a PNG stream (positioned just after the signature) to `dst`,
/// dropping `eXIf` chunks. CRCs of kept chunks are copied, never recomputed.
///
/// Stops after `IEND`; a clean end of stream on a chunk boundary also ends
/// the walk.
pub(crate) fn copy_stripped<R: Read, W: Write>(src: &mut R, dst: &mut W) -> Result<bool> {
    dst.write_all(&SIGNATURE)?;
    let mut removed = false;

    loop {
        let mut len_bytes = [0u8; 4];
        match read_full(src, &mut len_bytes)? {
            0 => break,
            4 => {}
            _ => return Err(StripError::Truncated("chunk length")),
        }
        let mut kind = [0u8; 4];
        read_exact_or(src, &mut kind, "chunk type")?;

        let len = u32::from_be_bytes(len_bytes);
        if len > MAX_CHUNK_LEN {
            return Err(StripError::InvalidData(format!(
                "chunk {} declares {len} bytes",
                String::from_utf8_lossy(&kind)
            )));
        }

        if kind == EXIF_CHUNK {
            log::debug!("Dropping eXIf chunk ({len} bytes)");
            copy_exact(src, &mut io::sink(), u64::from(len), "chunk data")?;
            copy_exact(src, &mut io::sink(), 4, "chunk CRC")?;
            removed = true;
        } else {
            dst.write_all(&len_bytes)?;
            dst.write_all(&kind)?;
            copy_exact(src, dst, u64::from(len), "chunk data")?;
            copy_exact(src, dst, 4, "chunk CRC")?;
        }

        if kind == IEND_CHUNK {
            break;
        }
    }

    Ok(removed)
}
