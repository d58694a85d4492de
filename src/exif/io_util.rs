use std::io::{self, Read, Write};

use crate::error::{Result, StripError};

/// Read one byte, `None` at end of stream.
pub(super) fn read_byte<R: Read>(src: &mut R) -> io::Result<Option<u8>> {
    let mut b = [0u8; 1];
    loop {
        match src.read(&mut b) {
            Ok(0) => return Ok(None),
            Ok(_) => return Ok(Some(b[0])),
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        }
    }
}

/// Fill `buf` as far as the stream allows and return how many bytes were read.
pub(super) fn read_full<R: Read>(src: &mut R, buf: &mut [u8]) -> io::Result<usize> {
    let mut filled = 0;
    while filled < buf.len() {
        match src.read(&mut buf[filled..]) {
            Ok(0) => break,
            Ok(n) => filled += n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        }
    }
    Ok(filled)
}

/// `read_exact`, reporting a short read as a truncated `what`.
pub(super) fn read_exact_or<R: Read>(src: &mut R, buf: &mut [u8], what: &'static str) -> Result<()> {
    src.read_exact(buf).map_err(|e| match e.kind() {
        io::ErrorKind::UnexpectedEof => StripError::Truncated(what),
        _ => StripError::Io(e),
    })
}

/// Copy exactly `len` bytes from `src` to `dst`; fewer available is a truncated `what`.
pub(super) fn copy_exact<R: Read, W: Write>(
    src: &mut R,
    dst: &mut W,
    len: u64,
    what: &'static str,
) -> Result<()> {
    let copied = io::copy(&mut src.by_ref().take(len), dst)?;
    if copied != len {
        return Err(StripError::Truncated(what));
    }
    Ok(())
}
