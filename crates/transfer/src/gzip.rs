use std::io::{BufReader, BufWriter, Read, Write};
use std::path::Path;

use flate2::read::MultiGzDecoder;

use crate::TransferError;

/// The two leading bytes of every gzip member (RFC 1952).
pub const GZIP_MAGIC: [u8; 2] = [0x1f, 0x8b];

/// Reports whether the file at `path` starts with a gzip header.
///
/// The decision is made from content framing only; file names are not
/// consulted because the remote serves compressed and plain content
/// under either extension.
pub fn is_gzip_framed(path: &Path) -> Result<bool, TransferError> {
    let mut file = std::fs::File::open(path)?;
    let mut head = [0u8; 2];
    let mut filled = 0;
    while filled < head.len() {
        let n = file.read(&mut head[filled..])?;
        if n == 0 {
            return Ok(false);
        }
        filled += n;
    }
    Ok(head == GZIP_MAGIC)
}

/// Stream-decompresses `src` into `dst`, returning the decompressed size.
///
/// Concatenated gzip members are decoded as one stream, matching `gzip -d`.
pub fn decompress_file(src: &Path, dst: &Path) -> Result<u64, TransferError> {
    let input = BufReader::new(std::fs::File::open(src)?);
    let mut decoder = MultiGzDecoder::new(input);
    let out = std::fs::File::create(dst)?;
    let mut writer = BufWriter::new(out);

    let written = std::io::copy(&mut decoder, &mut writer).map_err(|e| {
        if e.kind() == std::io::ErrorKind::InvalidInput
            || e.kind() == std::io::ErrorKind::InvalidData
            || e.kind() == std::io::ErrorKind::UnexpectedEof
        {
            TransferError::Decompress(e.to_string())
        } else {
            TransferError::Io(e)
        }
    })?;

    writer.flush()?;
    writer
        .into_inner()
        .map_err(|e| TransferError::Io(e.into_error()))?
        .sync_all()?;
    Ok(written)
}
