//! Store and deflate codecs.
//!
//! Compression works on whole buffers. Decompression is streaming: output
//! goes through a fixed [`CHUNK_SIZE`] buffer and stops as soon as it passes
//! the size recorded in the directory, so a hostile entry cannot make the
//! reader allocate more than one chunk regardless of its claimed size.

use capzip_core::{CompressionMethod, Crc32, Result, ZipError};
use flate2::Compression;
use flate2::read::DeflateDecoder;
use flate2::write::DeflateEncoder;
use std::io::{self, Read, Write};

/// Decompression buffer size.
pub const CHUNK_SIZE: usize = 32 * 1024;

/// ZIP compression level for writing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CompressionLevel {
    /// Store without compression (method 0).
    Store,
    /// Fast compression (deflate level 1).
    Fast,
    /// Normal compression (deflate level 6).
    #[default]
    Normal,
    /// Best compression (deflate level 9).
    Best,
}

impl CompressionLevel {
    /// The deflate level, or `None` for [`CompressionLevel::Store`].
    pub fn deflate_level(self) -> Option<Compression> {
        match self {
            Self::Store => None,
            Self::Fast => Some(Compression::fast()),
            Self::Normal => Some(Compression::new(6)),
            Self::Best => Some(Compression::best()),
        }
    }
}

/// Compress `data` with `method`.
pub fn compress(data: &[u8], method: CompressionMethod, level: CompressionLevel) -> Result<Vec<u8>> {
    match method {
        CompressionMethod::Stored => Ok(data.to_vec()),
        CompressionMethod::Deflate => {
            let level = level.deflate_level().unwrap_or_default();
            let mut encoder = DeflateEncoder::new(Vec::with_capacity(data.len() / 2), level);
            encoder.write_all(data)?;
            Ok(encoder.finish()?)
        }
        CompressionMethod::Unknown(id) => {
            Err(ZipError::unsupported(format!("compression method {id}")))
        }
    }
}

/// Compress `data` according to `level`, falling back to store when deflate
/// does not make it smaller.
pub fn compress_for_level(
    data: &[u8],
    level: CompressionLevel,
) -> Result<(CompressionMethod, Vec<u8>)> {
    if level == CompressionLevel::Store {
        return Ok((CompressionMethod::Stored, data.to_vec()));
    }
    let compressed = compress(data, CompressionMethod::Deflate, level)?;
    if compressed.len() < data.len() {
        Ok((CompressionMethod::Deflate, compressed))
    } else {
        Ok((CompressionMethod::Stored, data.to_vec()))
    }
}

/// Decode one entry from `input` into `out`.
///
/// Exactly `expected_size` bytes must come out, and when `expected_crc` is
/// given their CRC-32 must match it; anything else, including a corrupt
/// deflate stream, is a [`ZipError::ChecksumMismatch`]. Returns the number
/// of bytes written.
pub fn decompress_to<R: Read, W: Write + ?Sized>(
    input: R,
    method: CompressionMethod,
    name: &str,
    expected_size: u64,
    expected_crc: Option<u32>,
    out: &mut W,
) -> Result<u64> {
    match method {
        CompressionMethod::Stored => copy_verified(input, name, expected_size, expected_crc, out),
        CompressionMethod::Deflate => copy_verified(
            DeflateDecoder::new(input),
            name,
            expected_size,
            expected_crc,
            out,
        ),
        CompressionMethod::Unknown(id) => {
            Err(ZipError::unsupported(format!("compression method {id}")))
        }
    }
}

/// Buffer-to-buffer form of [`decompress_to`].
pub fn decompress(
    data: &[u8],
    method: CompressionMethod,
    name: &str,
    expected_size: u64,
    expected_crc: Option<u32>,
) -> Result<Vec<u8>> {
    let mut out = Vec::with_capacity(expected_size.min(CHUNK_SIZE as u64 * 32) as usize);
    decompress_to(data, method, name, expected_size, expected_crc, &mut out)?;
    Ok(out)
}

fn copy_verified<S: Read, W: Write + ?Sized>(
    mut source: S,
    name: &str,
    expected_size: u64,
    expected_crc: Option<u32>,
    out: &mut W,
) -> Result<u64> {
    let mut crc = Crc32::new();
    let mut buf = vec![0u8; CHUNK_SIZE];
    let mut total = 0u64;

    loop {
        let n = match source.read(&mut buf) {
            Ok(0) => break,
            Ok(n) => n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) if matches!(e.kind(), io::ErrorKind::InvalidInput | io::ErrorKind::InvalidData) => {
                log::debug!("entry '{name}': {e}");
                return Err(mismatch(name, expected_crc, &crc));
            }
            Err(e) => return Err(ZipError::malformed(format!("entry '{name}': {e}"))),
        };
        total += n as u64;
        if total > expected_size {
            log::debug!("entry '{name}' decodes past its declared size of {expected_size} bytes");
            return Err(mismatch(name, expected_crc, &crc));
        }
        crc.update(&buf[..n]);
        out.write_all(&buf[..n])?;
    }

    if total != expected_size {
        log::debug!("entry '{name}' decoded to {total} of {expected_size} bytes");
        return Err(mismatch(name, expected_crc, &crc));
    }
    if let Some(expected) = expected_crc {
        let computed = crc.value();
        if computed != expected {
            return Err(ZipError::checksum_mismatch(name, expected, computed));
        }
    }
    Ok(total)
}

fn mismatch(name: &str, expected_crc: Option<u32>, crc: &Crc32) -> ZipError {
    ZipError::checksum_mismatch(name, expected_crc.unwrap_or(0), crc.value())
}
