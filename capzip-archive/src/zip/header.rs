//! ZIP header structures.
//!
//! Byte layouts follow the PKWARE APPNOTE: local file header, data
//! descriptor, central directory header, the end of central directory
//! record and its Zip64 record/locator. All integers are little-endian.

use capzip_core::entry::{AesStrength, ArchiveEntry, CompressionMethod, Encryption};
use capzip_core::error::{Result, ZipError};
use chrono::{DateTime, Datelike, NaiveDate, Timelike, Utc};
use std::io::{Cursor, Read, Seek, SeekFrom, Write};
use std::time::SystemTime;

/// ZIP local file header signature.
pub const LOCAL_FILE_HEADER_SIG: u32 = 0x04034B50;

/// ZIP central directory header signature.
pub const CENTRAL_DIR_HEADER_SIG: u32 = 0x02014B50;

/// ZIP end of central directory signature.
pub const END_OF_CENTRAL_DIR_SIG: u32 = 0x06054B50;

/// ZIP64 end of central directory signature.
pub const ZIP64_END_OF_CENTRAL_DIR_SIG: u32 = 0x06064B50;

/// ZIP64 end of central directory locator signature.
pub const ZIP64_END_OF_CENTRAL_DIR_LOCATOR_SIG: u32 = 0x07064B50;

/// Data descriptor signature (optional, PK\x07\x08).
pub const DATA_DESCRIPTOR_SIG: u32 = 0x08074B50;

/// ZIP64 extra field header ID.
pub const ZIP64_EXTRA_FIELD_ID: u16 = 0x0001;

/// WinZip AES extra field header ID.
pub const AES_EXTRA_FIELD_ID: u16 = 0x9901;

/// Marker value for Zip64 (0xFFFFFFFF for 32-bit fields).
pub const ZIP64_MARKER_32: u32 = 0xFFFF_FFFF;

/// Marker value for Zip64 (0xFFFF for 16-bit fields).
pub const ZIP64_MARKER_16: u16 = 0xFFFF;

/// Flag bit: entry is encrypted.
pub const FLAG_ENCRYPTED: u16 = 0x0001;

/// Flag bit: sizes and CRC follow the data in a data descriptor.
pub const FLAG_DATA_DESCRIPTOR: u16 = 0x0008;

/// Flag bit: PKWARE strong encryption.
pub const FLAG_STRONG_ENCRYPTION: u16 = 0x0040;

/// Flag bit: name and comment are UTF-8.
pub const FLAG_UTF8: u16 = 0x0800;

/// Method id signalling WinZip AES; the real method is in the extra field.
pub const METHOD_AES: u16 = 99;

/// Fixed part of a local file header.
pub const LOCAL_HEADER_LEN: u64 = 30;

const CENTRAL_HEADER_LEN: usize = 46;
const EOCD_LEN: usize = 22;
const ZIP64_EOCD_LEN: usize = 56;
const ZIP64_LOCATOR_LEN: usize = 20;
const MAX_COMMENT_LEN: usize = 0xFFFF;

/// DOS date for 1980-01-01, the earliest representable day.
const DOS_EPOCH_DATE: u16 = (1 << 5) | 1;

#[inline]
fn u16_at(buf: &[u8], at: usize) -> u16 {
    u16::from_le_bytes([buf[at], buf[at + 1]])
}

#[inline]
fn u32_at(buf: &[u8], at: usize) -> u32 {
    u32::from_le_bytes([buf[at], buf[at + 1], buf[at + 2], buf[at + 3]])
}

#[inline]
fn u64_at(buf: &[u8], at: usize) -> u64 {
    let mut bytes = [0u8; 8];
    bytes.copy_from_slice(&buf[at..at + 8]);
    u64::from_le_bytes(bytes)
}

#[inline]
fn clamp32(value: u64) -> u32 {
    if value >= ZIP64_MARKER_32 as u64 {
        ZIP64_MARKER_32
    } else {
        value as u32
    }
}

/// Convert a timestamp to DOS `(time, date)`, in UTC.
///
/// Times before 1980 clamp to 1980-01-01 00:00:00, times after 2107 to the
/// last representable second.
pub fn dos_datetime(time: Option<SystemTime>) -> (u16, u16) {
    let Some(time) = time else {
        return (0, DOS_EPOCH_DATE);
    };
    let dt: DateTime<Utc> = time.into();
    if dt.year() < 1980 {
        return (0, DOS_EPOCH_DATE);
    }
    if dt.year() > 2107 {
        return (0xBF7D, 0xFF9F);
    }
    let dos_time = (dt.hour() << 11) | (dt.minute() << 5) | (dt.second() / 2);
    let dos_date = (((dt.year() - 1980) as u32) << 9) | (dt.month() << 5) | dt.day();
    (dos_time as u16, dos_date as u16)
}

/// Convert DOS `(time, date)` to a timestamp. Invalid dates yield `None`.
pub fn system_time(dos_time: u16, dos_date: u16) -> Option<SystemTime> {
    let year = 1980 + i32::from(dos_date >> 9);
    let month = u32::from((dos_date >> 5) & 0x0F);
    let day = u32::from(dos_date & 0x1F);
    let hour = u32::from(dos_time >> 11);
    let minute = u32::from((dos_time >> 5) & 0x3F);
    let second = (u32::from(dos_time & 0x1F) * 2).min(59);
    let dt = NaiveDate::from_ymd_opt(year, month, day)?.and_hms_opt(hour, minute, second)?;
    Some(SystemTime::from(dt.and_utc()))
}

/// Iterator over `(header id, body)` pairs of an extra field block.
///
/// Iteration stops at the first truncated record.
#[derive(Debug, Clone)]
pub struct ExtraFields<'a> {
    data: &'a [u8],
}

impl<'a> Iterator for ExtraFields<'a> {
    type Item = (u16, &'a [u8]);

    fn next(&mut self) -> Option<Self::Item> {
        if self.data.len() < 4 {
            return None;
        }
        let id = u16_at(self.data, 0);
        let len = u16_at(self.data, 2) as usize;
        let Some(body) = self.data.get(4..4 + len) else {
            self.data = &[];
            return None;
        };
        self.data = &self.data[4 + len..];
        Some((id, body))
    }
}

/// Walk the records of an extra field block.
pub fn extra_fields(extra: &[u8]) -> ExtraFields<'_> {
    ExtraFields { data: extra }
}

fn find_extra(extra: &[u8], id: u16) -> Option<&[u8]> {
    extra_fields(extra).find(|(field, _)| *field == id).map(|(_, body)| body)
}

/// Replace every marker-valued field with its 64-bit value, in APPNOTE order.
fn apply_zip64(extra: &[u8], fields: &mut [&mut u64], name: &str) -> Result<()> {
    let marker = ZIP64_MARKER_32 as u64;
    if !fields.iter().any(|value| **value == marker) {
        return Ok(());
    }
    let body = find_extra(extra, ZIP64_EXTRA_FIELD_ID).ok_or_else(|| {
        ZipError::malformed(format!("entry '{name}' is missing its Zip64 extra field"))
    })?;
    let mut at = 0;
    for value in fields.iter_mut() {
        if **value != marker {
            continue;
        }
        if body.len() < at + 8 {
            return Err(ZipError::malformed(format!(
                "entry '{name}' has a truncated Zip64 extra field"
            )));
        }
        **value = u64_at(body, at);
        at += 8;
    }
    Ok(())
}

/// WinZip AES extra field (0x9901).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AesExtraField {
    /// 1 = AE-1, 2 = AE-2.
    pub vendor_version: u16,
    /// Key strength.
    pub strength: AesStrength,
    /// Compression method applied before encryption.
    pub method: CompressionMethod,
}

impl AesExtraField {
    /// Encoded length including the 4-byte record header.
    pub const LEN: usize = 11;

    /// Parse the body of a 0x9901 record.
    pub fn parse(body: &[u8], name: &str) -> Result<Self> {
        if body.len() < 7 || &body[2..4] != b"AE" {
            return Err(ZipError::malformed(format!(
                "entry '{name}' has an invalid AES extra field"
            )));
        }
        let vendor_version = u16_at(body, 0);
        if !(1..=2).contains(&vendor_version) {
            return Err(ZipError::unsupported(format!(
                "AES vendor version {vendor_version}"
            )));
        }
        let strength = AesStrength::from_u8(body[4])
            .ok_or_else(|| ZipError::unsupported(format!("AES strength {}", body[4])))?;
        Ok(Self {
            vendor_version,
            strength,
            method: CompressionMethod::from_u16(u16_at(body, 5)),
        })
    }

    /// Encode the full record.
    pub fn to_bytes(&self) -> [u8; Self::LEN] {
        let mut out = [0u8; Self::LEN];
        out[0..2].copy_from_slice(&AES_EXTRA_FIELD_ID.to_le_bytes());
        out[2..4].copy_from_slice(&7u16.to_le_bytes());
        out[4..6].copy_from_slice(&self.vendor_version.to_le_bytes());
        out[6..8].copy_from_slice(b"AE");
        out[8] = self.strength as u8;
        out[9..11].copy_from_slice(&self.method.to_u16().to_le_bytes());
        out
    }
}

/// The method id stored in the headers of `entry`.
pub fn stored_method(entry: &ArchiveEntry) -> u16 {
    match entry.encryption {
        Encryption::Aes { .. } => METHOD_AES,
        _ => entry.method.to_u16(),
    }
}

/// Minimum "version needed to extract" for `entry`.
pub fn version_needed(entry: &ArchiveEntry, zip64: bool) -> u16 {
    if matches!(entry.encryption, Encryption::Aes { .. }) {
        51
    } else if zip64 {
        45
    } else if entry.method == CompressionMethod::Deflate || entry.is_encrypted() {
        20
    } else {
        10
    }
}

fn aes_extra(entry: &ArchiveEntry) -> Option<[u8; AesExtraField::LEN]> {
    match entry.encryption {
        Encryption::Aes {
            strength,
            vendor_version,
        } => Some(
            AesExtraField {
                vendor_version,
                strength,
                method: entry.method,
            }
            .to_bytes(),
        ),
        _ => None,
    }
}

/// ZIP local file header.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LocalFileHeader {
    /// Minimum version needed to extract.
    pub version_needed: u16,
    /// General purpose bit flag.
    pub flags: u16,
    /// Stored method id (99 for AES).
    pub method: u16,
    /// Last modification time.
    pub mtime: u16,
    /// Last modification date.
    pub mdate: u16,
    /// CRC-32 of uncompressed data.
    pub crc32: u32,
    /// Compressed size, resolved through Zip64 when present.
    pub compressed_size: u64,
    /// Uncompressed size, resolved through Zip64 when present.
    pub uncompressed_size: u64,
    /// Raw file name bytes.
    pub name: Vec<u8>,
    /// Extra field block.
    pub extra: Vec<u8>,
}

impl LocalFileHeader {
    /// Read a local file header.
    pub fn read<R: Read>(reader: &mut R) -> Result<Self> {
        let mut buf = [0u8; LOCAL_HEADER_LEN as usize];
        reader.read_exact(&mut buf)?;

        if u32_at(&buf, 0) != LOCAL_FILE_HEADER_SIG {
            return Err(ZipError::malformed("invalid local file header signature"));
        }

        let name_len = u16_at(&buf, 26) as usize;
        let extra_len = u16_at(&buf, 28) as usize;
        let mut name = vec![0u8; name_len];
        reader.read_exact(&mut name)?;
        let mut extra = vec![0u8; extra_len];
        reader.read_exact(&mut extra)?;

        let mut compressed_size = u32_at(&buf, 18) as u64;
        let mut uncompressed_size = u32_at(&buf, 22) as u64;
        // A local Zip64 field always carries both sizes.
        let marker = ZIP64_MARKER_32 as u64;
        if compressed_size == marker || uncompressed_size == marker {
            if let Some(body) = find_extra(&extra, ZIP64_EXTRA_FIELD_ID).filter(|b| b.len() >= 16) {
                uncompressed_size = u64_at(body, 0);
                compressed_size = u64_at(body, 8);
            }
        }

        Ok(Self {
            version_needed: u16_at(&buf, 4),
            flags: u16_at(&buf, 6),
            method: u16_at(&buf, 8),
            mtime: u16_at(&buf, 10),
            mdate: u16_at(&buf, 12),
            crc32: u32_at(&buf, 14),
            compressed_size,
            uncompressed_size,
            name,
            extra,
        })
    }

    /// Build the local header for `entry`. With `zip64` the header carries a
    /// Zip64 field holding both sizes.
    pub fn for_entry(entry: &ArchiveEntry, zip64: bool) -> Self {
        let (mtime, mdate) = dos_datetime(entry.modified);
        let mut extra = Vec::new();
        if zip64 {
            extra.extend_from_slice(&ZIP64_EXTRA_FIELD_ID.to_le_bytes());
            extra.extend_from_slice(&16u16.to_le_bytes());
            extra.extend_from_slice(&entry.uncompressed_size.to_le_bytes());
            extra.extend_from_slice(&entry.compressed_size.to_le_bytes());
        }
        if let Some(aes) = aes_extra(entry) {
            extra.extend_from_slice(&aes);
        }
        Self {
            version_needed: version_needed(entry, zip64),
            flags: entry.flags,
            method: stored_method(entry),
            mtime,
            mdate,
            crc32: entry.crc32,
            compressed_size: entry.compressed_size,
            uncompressed_size: entry.uncompressed_size,
            name: entry.name.as_bytes().to_vec(),
            extra,
        }
    }

    /// Whether the extra block holds a Zip64 field.
    pub fn is_zip64(&self) -> bool {
        find_extra(&self.extra, ZIP64_EXTRA_FIELD_ID).is_some()
    }

    /// Write the header.
    pub fn write<W: Write>(&self, writer: &mut W) -> Result<()> {
        let (compressed_32, uncompressed_32) = if self.is_zip64() {
            (ZIP64_MARKER_32, ZIP64_MARKER_32)
        } else {
            (clamp32(self.compressed_size), clamp32(self.uncompressed_size))
        };

        writer.write_all(&LOCAL_FILE_HEADER_SIG.to_le_bytes())?;
        writer.write_all(&self.version_needed.to_le_bytes())?;
        writer.write_all(&self.flags.to_le_bytes())?;
        writer.write_all(&self.method.to_le_bytes())?;
        writer.write_all(&self.mtime.to_le_bytes())?;
        writer.write_all(&self.mdate.to_le_bytes())?;
        writer.write_all(&self.crc32.to_le_bytes())?;
        writer.write_all(&compressed_32.to_le_bytes())?;
        writer.write_all(&uncompressed_32.to_le_bytes())?;
        writer.write_all(&(self.name.len() as u16).to_le_bytes())?;
        writer.write_all(&(self.extra.len() as u16).to_le_bytes())?;
        writer.write_all(&self.name)?;
        writer.write_all(&self.extra)?;
        Ok(())
    }

    /// Encoded length of the header, i.e. the distance to the entry data.
    pub fn header_len(&self) -> u64 {
        LOCAL_HEADER_LEN + self.name.len() as u64 + self.extra.len() as u64
    }

    /// Check if this entry has a data descriptor following the compressed data.
    pub fn has_data_descriptor(&self) -> bool {
        self.flags & FLAG_DATA_DESCRIPTOR != 0
    }
}

/// ZIP data descriptor (appears after compressed data when FLAG_DATA_DESCRIPTOR is set).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DataDescriptor {
    /// CRC-32 of uncompressed data.
    pub crc32: u32,
    /// Compressed size.
    pub compressed_size: u64,
    /// Uncompressed size.
    pub uncompressed_size: u64,
}

impl DataDescriptor {
    /// Read a data descriptor.
    /// The descriptor may optionally start with a signature (0x08074B50).
    /// Returns (descriptor, bytes_consumed).
    pub fn read<R: Read>(reader: &mut R, zip64: bool) -> Result<(Self, usize)> {
        let mut word = [0u8; 4];
        reader.read_exact(&mut word)?;
        let mut consumed = 4;

        let crc32 = if u32::from_le_bytes(word) == DATA_DESCRIPTOR_SIG {
            reader.read_exact(&mut word)?;
            consumed += 4;
            u32::from_le_bytes(word)
        } else {
            u32::from_le_bytes(word)
        };

        let (compressed_size, uncompressed_size) = if zip64 {
            let mut sizes = [0u8; 16];
            reader.read_exact(&mut sizes)?;
            consumed += 16;
            (u64_at(&sizes, 0), u64_at(&sizes, 8))
        } else {
            let mut sizes = [0u8; 8];
            reader.read_exact(&mut sizes)?;
            consumed += 8;
            (u32_at(&sizes, 0) as u64, u32_at(&sizes, 4) as u64)
        };

        Ok((
            Self {
                crc32,
                compressed_size,
                uncompressed_size,
            },
            consumed,
        ))
    }

    /// Write the descriptor with its signature.
    pub fn write<W: Write>(&self, writer: &mut W, zip64: bool) -> Result<()> {
        writer.write_all(&DATA_DESCRIPTOR_SIG.to_le_bytes())?;
        writer.write_all(&self.crc32.to_le_bytes())?;
        if zip64 {
            writer.write_all(&self.compressed_size.to_le_bytes())?;
            writer.write_all(&self.uncompressed_size.to_le_bytes())?;
        } else {
            writer.write_all(&clamp32(self.compressed_size).to_le_bytes())?;
            writer.write_all(&clamp32(self.uncompressed_size).to_le_bytes())?;
        }
        Ok(())
    }
}

/// End of central directory, merged with its Zip64 record when present.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct EndOfCentralDirectory {
    /// Total number of entries.
    pub entry_count: u64,
    /// Size of the central directory in bytes.
    pub directory_size: u64,
    /// Offset of the first central directory header.
    pub directory_offset: u64,
    /// Archive comment.
    pub comment: String,
    /// Whether the values came from a Zip64 record.
    pub zip64: bool,
}

/// The parsed index of an archive.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CentralDirectory {
    /// Entries in directory order.
    pub entries: Vec<ArchiveEntry>,
    /// Byte offset of the directory.
    pub offset: u64,
    /// Byte length of the directory.
    pub size: u64,
    /// The end record.
    pub end: EndOfCentralDirectory,
}

impl CentralDirectory {
    /// Parse the central directory of a complete in-memory archive.
    pub fn parse(bytes: &[u8]) -> Result<Self> {
        Self::read(&mut Cursor::new(bytes))
    }

    /// Locate and parse the central directory of a seekable archive.
    pub fn read<R: Read + Seek>(reader: &mut R) -> Result<Self> {
        let file_size = reader.seek(SeekFrom::End(0))?;
        if file_size < EOCD_LEN as u64 {
            return Err(ZipError::malformed(
                "archive is too small to hold an end of central directory record",
            ));
        }

        let tail_len = file_size.min((MAX_COMMENT_LEN + EOCD_LEN) as u64);
        let tail_start = file_size - tail_len;
        reader.seek(SeekFrom::Start(tail_start))?;
        let mut tail = vec![0u8; tail_len as usize];
        reader.read_exact(&mut tail)?;

        let eocd_at = find_eocd(&tail)
            .ok_or_else(|| ZipError::malformed("end of central directory record not found"))?;
        let eocd_pos = tail_start + eocd_at as u64;
        let record = &tail[eocd_at..];
        let comment_len = u16_at(record, 20) as usize;

        let mut end = EndOfCentralDirectory {
            entry_count: u16_at(record, 10) as u64,
            directory_size: u32_at(record, 12) as u64,
            directory_offset: u32_at(record, 16) as u64,
            comment: String::from_utf8_lossy(&record[EOCD_LEN..EOCD_LEN + comment_len])
                .into_owned(),
            zip64: false,
        };
        let mut directory_limit = eocd_pos;

        if let Some(zip64_pos) = read_zip64_locator(reader, eocd_pos)? {
            let record_end = zip64_pos.checked_add(ZIP64_EOCD_LEN as u64);
            if record_end.is_none_or(|end| end > eocd_pos - ZIP64_LOCATOR_LEN as u64) {
                return Err(ZipError::malformed(
                    "Zip64 end of central directory record lies outside the archive",
                ));
            }
            reader.seek(SeekFrom::Start(zip64_pos))?;
            let mut rec = [0u8; ZIP64_EOCD_LEN];
            reader.read_exact(&mut rec)?;
            if u32_at(&rec, 0) != ZIP64_END_OF_CENTRAL_DIR_SIG {
                return Err(ZipError::malformed(
                    "invalid Zip64 end of central directory signature",
                ));
            }
            if u32_at(&rec, 16) != 0 || u32_at(&rec, 20) != 0 || u64_at(&rec, 24) != u64_at(&rec, 32)
            {
                return Err(ZipError::unsupported("multi-disk archives"));
            }
            end.entry_count = u64_at(&rec, 32);
            end.directory_size = u64_at(&rec, 40);
            end.directory_offset = u64_at(&rec, 48);
            end.zip64 = true;
            directory_limit = zip64_pos;
        } else if u16_at(record, 4) != 0
            || u16_at(record, 6) != 0
            || u16_at(record, 8) != u16_at(record, 10)
        {
            return Err(ZipError::unsupported("multi-disk archives"));
        }

        let in_range = end
            .directory_offset
            .checked_add(end.directory_size)
            .is_some_and(|dir_end| dir_end <= directory_limit);
        if !in_range {
            return Err(ZipError::malformed(format!(
                "central directory at offset {} with length {} lies outside the archive",
                end.directory_offset, end.directory_size
            )));
        }

        reader.seek(SeekFrom::Start(end.directory_offset))?;
        let mut directory = vec![0u8; end.directory_size as usize];
        reader.read_exact(&mut directory)?;

        let capacity = end.entry_count.min((directory.len() / CENTRAL_HEADER_LEN) as u64);
        let mut entries = Vec::with_capacity(capacity as usize);
        let mut pos = 0;
        while pos < directory.len() {
            let (entry, consumed) = parse_central_header(&directory[pos..])?;
            check_data_range(&entry, end.directory_offset)?;
            entries.push(entry);
            pos += consumed;
        }

        if entries.len() as u64 != end.entry_count {
            return Err(ZipError::malformed(format!(
                "end record declares {} entries but the central directory holds {}",
                end.entry_count,
                entries.len()
            )));
        }

        Ok(Self {
            entries,
            offset: end.directory_offset,
            size: end.directory_size,
            end,
        })
    }
}

/// Position of the last complete end record in `tail`.
fn find_eocd(tail: &[u8]) -> Option<usize> {
    (0..=tail.len() - EOCD_LEN).rev().find(|&i| {
        u32_at(tail, i) == END_OF_CENTRAL_DIR_SIG
            && i + EOCD_LEN + u16_at(tail, i + 20) as usize <= tail.len()
    })
}

/// Offset of the Zip64 end record if a locator precedes the end record.
fn read_zip64_locator<R: Read + Seek>(reader: &mut R, eocd_pos: u64) -> Result<Option<u64>> {
    if eocd_pos < ZIP64_LOCATOR_LEN as u64 {
        return Ok(None);
    }
    reader.seek(SeekFrom::Start(eocd_pos - ZIP64_LOCATOR_LEN as u64))?;
    let mut locator = [0u8; ZIP64_LOCATOR_LEN];
    reader.read_exact(&mut locator)?;
    if u32_at(&locator, 0) != ZIP64_END_OF_CENTRAL_DIR_LOCATOR_SIG {
        return Ok(None);
    }
    if u32_at(&locator, 4) != 0 || u32_at(&locator, 16) > 1 {
        return Err(ZipError::unsupported("multi-disk archives"));
    }
    Ok(Some(u64_at(&locator, 8)))
}

fn check_data_range(entry: &ArchiveEntry, data_end: u64) -> Result<()> {
    let fits = entry
        .local_header_offset
        .checked_add(LOCAL_HEADER_LEN)
        .and_then(|pos| pos.checked_add(entry.compressed_size))
        .is_some_and(|end| end <= data_end);
    if fits {
        Ok(())
    } else {
        Err(ZipError::malformed(format!(
            "entry '{}' declares {} bytes of data past the end of the archive data",
            entry.name, entry.compressed_size
        )))
    }
}

/// Parse one central directory header. Returns the entry and bytes consumed.
fn parse_central_header(buf: &[u8]) -> Result<(ArchiveEntry, usize)> {
    if buf.len() < CENTRAL_HEADER_LEN {
        return Err(ZipError::malformed("truncated central directory header"));
    }
    if u32_at(buf, 0) != CENTRAL_DIR_HEADER_SIG {
        return Err(ZipError::malformed("invalid central directory header signature"));
    }

    let version_made_by = u16_at(buf, 4);
    let flags = u16_at(buf, 8);
    let raw_method = u16_at(buf, 10);
    let mtime = u16_at(buf, 12);
    let mdate = u16_at(buf, 14);
    let crc32 = u32_at(buf, 16);
    let name_len = u16_at(buf, 28) as usize;
    let extra_len = u16_at(buf, 30) as usize;
    let comment_len = u16_at(buf, 32) as usize;
    let disk_start = u16_at(buf, 34);
    let external_attributes = u32_at(buf, 38);

    let total = CENTRAL_HEADER_LEN + name_len + extra_len + comment_len;
    if buf.len() < total {
        return Err(ZipError::malformed("truncated central directory header"));
    }
    let name_end = CENTRAL_HEADER_LEN + name_len;
    let extra_end = name_end + extra_len;
    let name = String::from_utf8_lossy(&buf[CENTRAL_HEADER_LEN..name_end]).into_owned();
    let extra = &buf[name_end..extra_end];
    let comment = String::from_utf8_lossy(&buf[extra_end..total]).into_owned();

    if flags & FLAG_STRONG_ENCRYPTION != 0 {
        return Err(ZipError::unsupported(format!(
            "strong encryption (entry '{name}')"
        )));
    }
    if disk_start != 0 && disk_start != ZIP64_MARKER_16 {
        return Err(ZipError::unsupported("multi-disk archives"));
    }

    let mut uncompressed_size = u32_at(buf, 24) as u64;
    let mut compressed_size = u32_at(buf, 20) as u64;
    let mut local_header_offset = u32_at(buf, 42) as u64;
    apply_zip64(
        extra,
        &mut [
            &mut uncompressed_size,
            &mut compressed_size,
            &mut local_header_offset,
        ],
        &name,
    )?;

    let (method, encryption) = if raw_method == METHOD_AES {
        let body = find_extra(extra, AES_EXTRA_FIELD_ID).ok_or_else(|| {
            ZipError::malformed(format!("entry '{name}' uses AES without an AES extra field"))
        })?;
        let aes = AesExtraField::parse(body, &name)?;
        (
            aes.method,
            Encryption::Aes {
                strength: aes.strength,
                vendor_version: aes.vendor_version,
            },
        )
    } else if flags & FLAG_ENCRYPTED != 0 {
        (CompressionMethod::from_u16(raw_method), Encryption::ZipCrypto)
    } else {
        (CompressionMethod::from_u16(raw_method), Encryption::None)
    };

    let entry = ArchiveEntry {
        kind: ArchiveEntry::classify(&name, version_made_by, external_attributes),
        name,
        uncompressed_size,
        compressed_size,
        crc32,
        method,
        encryption,
        modified: system_time(mtime, mdate),
        version_made_by,
        external_attributes,
        flags,
        local_header_offset,
        comment,
    };
    Ok((entry, total))
}

fn needs_zip64(entry: &ArchiveEntry) -> bool {
    let marker = ZIP64_MARKER_32 as u64;
    entry.compressed_size >= marker
        || entry.uncompressed_size >= marker
        || entry.local_header_offset >= marker
}

fn write_central_header(entry: &ArchiveEntry, local_zip64: bool, out: &mut Vec<u8>) {
    let marker = ZIP64_MARKER_32 as u64;
    // A local header with a Zip64 field marks both sizes; the record matches it.
    let sizes_zip64 =
        local_zip64 || entry.compressed_size >= marker || entry.uncompressed_size >= marker;
    let offset_zip64 = entry.local_header_offset >= marker;
    let zip64 = sizes_zip64 || offset_zip64;
    let mut values = Vec::new();
    if sizes_zip64 {
        values.extend([entry.uncompressed_size, entry.compressed_size]);
    }
    if offset_zip64 {
        values.push(entry.local_header_offset);
    }
    let mut zip64_extra = Vec::new();
    if zip64 {
        zip64_extra.extend_from_slice(&ZIP64_EXTRA_FIELD_ID.to_le_bytes());
        zip64_extra.extend_from_slice(&((values.len() * 8) as u16).to_le_bytes());
        for value in values {
            zip64_extra.extend_from_slice(&value.to_le_bytes());
        }
    }
    let (compressed_32, uncompressed_32) = if sizes_zip64 {
        (ZIP64_MARKER_32, ZIP64_MARKER_32)
    } else {
        (clamp32(entry.compressed_size), clamp32(entry.uncompressed_size))
    };
    let aes = aes_extra(entry);
    let extra_len = zip64_extra.len() + aes.map_or(0, |a| a.len());
    let (mtime, mdate) = dos_datetime(entry.modified);
    let name = entry.name.as_bytes();
    let comment = entry.comment.as_bytes();

    out.extend_from_slice(&CENTRAL_DIR_HEADER_SIG.to_le_bytes());
    out.extend_from_slice(&entry.version_made_by.to_le_bytes());
    out.extend_from_slice(&version_needed(entry, zip64).to_le_bytes());
    out.extend_from_slice(&entry.flags.to_le_bytes());
    out.extend_from_slice(&stored_method(entry).to_le_bytes());
    out.extend_from_slice(&mtime.to_le_bytes());
    out.extend_from_slice(&mdate.to_le_bytes());
    out.extend_from_slice(&entry.crc32.to_le_bytes());
    out.extend_from_slice(&compressed_32.to_le_bytes());
    out.extend_from_slice(&uncompressed_32.to_le_bytes());
    out.extend_from_slice(&(name.len() as u16).to_le_bytes());
    out.extend_from_slice(&(extra_len as u16).to_le_bytes());
    out.extend_from_slice(&(comment.len() as u16).to_le_bytes());
    // Disk number start, internal attributes
    out.extend_from_slice(&0u16.to_le_bytes());
    out.extend_from_slice(&0u16.to_le_bytes());
    out.extend_from_slice(&entry.external_attributes.to_le_bytes());
    out.extend_from_slice(&clamp32(entry.local_header_offset).to_le_bytes());
    out.extend_from_slice(name);
    out.extend_from_slice(&zip64_extra);
    if let Some(aes) = aes {
        out.extend_from_slice(&aes);
    }
    out.extend_from_slice(comment);
}

/// Encode the central directory for `entries`, in insertion order, followed
/// by the end records. `offset` is where the directory starts in the archive.
pub fn write_central_directory(entries: &[ArchiveEntry], offset: u64) -> Vec<u8> {
    write_central_directory_with(entries, &[], offset)
}

/// Like [`write_central_directory`], where `local_zip64[i]` tells whether the
/// local header of entry `i` reserved a Zip64 field. Missing flags count as
/// `false`.
pub fn write_central_directory_with(
    entries: &[ArchiveEntry],
    local_zip64: &[bool],
    offset: u64,
) -> Vec<u8> {
    let mut out = Vec::new();
    for (i, entry) in entries.iter().enumerate() {
        let forced = local_zip64.get(i).copied().unwrap_or(false);
        write_central_header(entry, forced, &mut out);
    }
    let size = out.len() as u64;
    let count = entries.len() as u64;
    let marker = ZIP64_MARKER_32 as u64;

    let zip64 = count >= ZIP64_MARKER_16 as u64
        || size >= marker
        || offset >= marker
        || entries.iter().any(needs_zip64);

    if zip64 {
        let record_offset = offset + size;
        out.extend_from_slice(&ZIP64_END_OF_CENTRAL_DIR_SIG.to_le_bytes());
        // Size of the remaining record
        out.extend_from_slice(&44u64.to_le_bytes());
        out.extend_from_slice(&capzip_core::entry::VERSION_MADE_BY.to_le_bytes());
        out.extend_from_slice(&45u16.to_le_bytes());
        out.extend_from_slice(&0u32.to_le_bytes());
        out.extend_from_slice(&0u32.to_le_bytes());
        out.extend_from_slice(&count.to_le_bytes());
        out.extend_from_slice(&count.to_le_bytes());
        out.extend_from_slice(&size.to_le_bytes());
        out.extend_from_slice(&offset.to_le_bytes());

        out.extend_from_slice(&ZIP64_END_OF_CENTRAL_DIR_LOCATOR_SIG.to_le_bytes());
        out.extend_from_slice(&0u32.to_le_bytes());
        out.extend_from_slice(&record_offset.to_le_bytes());
        out.extend_from_slice(&1u32.to_le_bytes());
    }

    let count_16 = if count >= ZIP64_MARKER_16 as u64 {
        ZIP64_MARKER_16
    } else {
        count as u16
    };
    out.extend_from_slice(&END_OF_CENTRAL_DIR_SIG.to_le_bytes());
    out.extend_from_slice(&0u16.to_le_bytes());
    out.extend_from_slice(&0u16.to_le_bytes());
    out.extend_from_slice(&count_16.to_le_bytes());
    out.extend_from_slice(&count_16.to_le_bytes());
    out.extend_from_slice(&clamp32(size).to_le_bytes());
    out.extend_from_slice(&clamp32(offset).to_le_bytes());
    out.extend_from_slice(&0u16.to_le_bytes());
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use capzip_core::ErrorKind;
    use std::time::{Duration, UNIX_EPOCH};

    /// Fake archive: `data_len` zero bytes of entry data followed by the directory.
    fn archive_with(entries: &[ArchiveEntry], data_len: usize) -> Vec<u8> {
        let mut bytes = vec![0u8; data_len];
        bytes.extend(write_central_directory(entries, data_len as u64));
        bytes
    }

    fn sample_entries() -> Vec<ArchiveEntry> {
        let modified = UNIX_EPOCH + Duration::from_secs(1_700_000_000);
        let mut a = ArchiveEntry::file("a.txt", 11)
            .with_crc32(0x0D4A1185)
            .with_modified(modified);
        a.compressed_size = 11;
        let dir = ArchiveEntry::directory("sub").with_modified(modified);
        let mut b = ArchiveEntry::file("sub/b.txt", 100)
            .with_method(CompressionMethod::Deflate)
            .with_modified(modified);
        b.compressed_size = 20;
        b.local_header_offset = 60;
        vec![a, dir, b]
    }

    #[test]
    fn test_dos_datetime_roundtrip() {
        // 2023-11-14 22:13:20 UTC
        let time = UNIX_EPOCH + Duration::from_secs(1_700_000_000);
        let (t, d) = dos_datetime(Some(time));
        assert_eq!(system_time(t, d), Some(time));
    }

    #[test]
    fn test_dos_datetime_clamps() {
        assert_eq!(dos_datetime(Some(UNIX_EPOCH)), (0, DOS_EPOCH_DATE));
        assert_eq!(dos_datetime(None), (0, DOS_EPOCH_DATE));
        assert_eq!(system_time(0, 0), None);
    }

    #[test]
    fn test_extra_fields_stop_at_truncation() {
        let mut extra = vec![0x01, 0x00, 0x02, 0x00, 0xAA, 0xBB];
        extra.extend_from_slice(&[0x99, 0x99, 0x10, 0x00, 0x01]);
        let fields: Vec<_> = extra_fields(&extra).collect();
        assert_eq!(fields, vec![(0x0001, &[0xAA, 0xBB][..])]);
    }

    #[test]
    fn test_aes_extra_field_roundtrip() {
        let field = AesExtraField {
            vendor_version: 2,
            strength: AesStrength::Aes256,
            method: CompressionMethod::Deflate,
        };
        let bytes = field.to_bytes();
        assert_eq!(&bytes[0..2], &[0x01, 0x99]);
        assert_eq!(AesExtraField::parse(&bytes[4..], "x").ok(), Some(field));
    }

    #[test]
    fn test_aes_extra_field_rejects_bad_vendor() {
        let body = [0x02, 0x00, b'X', b'Y', 0x03, 0x08, 0x00];
        let err = AesExtraField::parse(&body, "x").unwrap_err();
        assert_eq!(err.kind(), ErrorKind::MalformedArchive);
    }

    #[test]
    fn test_central_directory_roundtrip() {
        let entries = sample_entries();
        let bytes = archive_with(&entries, 200);

        let cd = CentralDirectory::parse(&bytes).unwrap();
        assert_eq!(cd.offset, 200);
        assert_eq!(cd.end.entry_count, 3);
        assert!(!cd.end.zip64);
        assert_eq!(cd.entries, entries);
    }

    #[test]
    fn test_missing_eocd() {
        let err = CentralDirectory::parse(b"this is not a zip archive at all").unwrap_err();
        assert_eq!(err.kind(), ErrorKind::MalformedArchive);
        let err = CentralDirectory::parse(b"PK").unwrap_err();
        assert_eq!(err.kind(), ErrorKind::MalformedArchive);
    }

    #[test]
    fn test_entry_count_mismatch() {
        let mut bytes = archive_with(&sample_entries(), 200);
        let eocd = bytes.len() - EOCD_LEN;
        bytes[eocd + 8] = 4;
        bytes[eocd + 10] = 4;
        let err = CentralDirectory::parse(&bytes).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::MalformedArchive);
        assert!(err.to_string().contains("declares 4 entries"));
    }

    #[test]
    fn test_directory_offset_out_of_range() {
        let mut bytes = archive_with(&sample_entries(), 200);
        let eocd = bytes.len() - EOCD_LEN;
        bytes[eocd + 16..eocd + 20].copy_from_slice(&0x00FF_FFFFu32.to_le_bytes());
        let err = CentralDirectory::parse(&bytes).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::MalformedArchive);
    }

    #[test]
    fn test_entry_size_overflows_data() {
        let mut entries = sample_entries();
        entries[2].compressed_size = 10_000;
        let bytes = archive_with(&entries, 200);
        let err = CentralDirectory::parse(&bytes).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::MalformedArchive);
        assert!(err.to_string().contains("sub/b.txt"));
    }

    #[test]
    fn test_multi_disk_rejected() {
        let mut bytes = archive_with(&sample_entries(), 200);
        let eocd = bytes.len() - EOCD_LEN;
        bytes[eocd + 4] = 1;
        let err = CentralDirectory::parse(&bytes).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::UnsupportedFeature);
    }

    #[test]
    fn test_zip64_sizes_roundtrip() {
        let mut big = ArchiveEntry::file("big.bin", 5 * 1024 * 1024 * 1024);
        big.compressed_size = 64;
        big.method = CompressionMethod::Deflate;
        let bytes = archive_with(&[big.clone()], 128);

        let cd = CentralDirectory::parse(&bytes).unwrap();
        assert!(cd.end.zip64);
        assert_eq!(cd.entries[0].uncompressed_size, big.uncompressed_size);
        assert_eq!(cd.entries[0].compressed_size, 64);
    }

    #[test]
    fn test_reserved_zip64_matches_local_header() {
        let mut streamed = ArchiveEntry::file("streamed.bin", 100);
        streamed.compressed_size = 20;
        let mut bytes = vec![0u8; 64];
        bytes.extend(write_central_directory_with(&[streamed.clone()], &[true], 64));

        // Central record: version needed 45, both sizes as markers.
        assert_eq!(u16_at(&bytes, 64 + 6), 45);
        assert_eq!(u32_at(&bytes, 64 + 20), ZIP64_MARKER_32);
        assert_eq!(u32_at(&bytes, 64 + 24), ZIP64_MARKER_32);

        let cd = CentralDirectory::parse(&bytes).unwrap();
        assert_eq!(cd.entries[0].uncompressed_size, 100);
        assert_eq!(cd.entries[0].compressed_size, 20);

        let local = LocalFileHeader::for_entry(&streamed, true);
        assert_eq!(local.version_needed, u16_at(&bytes, 64 + 6));
    }

    #[test]
    fn test_aes_entry_roundtrip() {
        let mut entry = ArchiveEntry::file("secret.txt", 5)
            .with_method(CompressionMethod::Deflate)
            .with_encryption(Encryption::Aes {
                strength: AesStrength::Aes256,
                vendor_version: 2,
            });
        entry.compressed_size = 40;
        entry.flags = FLAG_ENCRYPTED;
        let bytes = archive_with(&[entry.clone()], 100);

        let cd = CentralDirectory::parse(&bytes).unwrap();
        assert_eq!(cd.entries[0].method, CompressionMethod::Deflate);
        assert_eq!(cd.entries[0].encryption, entry.encryption);
    }

    #[test]
    fn test_strong_encryption_rejected() {
        let mut entry = ArchiveEntry::file("x", 0);
        entry.flags = FLAG_ENCRYPTED | FLAG_STRONG_ENCRYPTION;
        let bytes = archive_with(&[entry], 30);
        let err = CentralDirectory::parse(&bytes).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::UnsupportedFeature);
    }

    #[test]
    fn test_local_header_roundtrip() {
        let mut entry = ArchiveEntry::file("notes.txt", 11).with_crc32(0x0D4A1185);
        entry.compressed_size = 11;
        let header = LocalFileHeader::for_entry(&entry, false);
        let mut buf = Vec::new();
        header.write(&mut buf).unwrap();
        assert_eq!(buf.len() as u64, header.header_len());

        let parsed = LocalFileHeader::read(&mut Cursor::new(&buf)).unwrap();
        assert_eq!(parsed, header);
        assert_eq!(parsed.version_needed, 10);
    }

    #[test]
    fn test_local_header_zip64() {
        let mut entry = ArchiveEntry::file("big.bin", 6_000_000_000);
        entry.compressed_size = 5_000_000_000;
        let header = LocalFileHeader::for_entry(&entry, true);
        let mut buf = Vec::new();
        header.write(&mut buf).unwrap();
        assert_eq!(u32_at(&buf, 18), ZIP64_MARKER_32);

        let parsed = LocalFileHeader::read(&mut Cursor::new(&buf)).unwrap();
        assert_eq!(parsed.uncompressed_size, 6_000_000_000);
        assert_eq!(parsed.compressed_size, 5_000_000_000);
        assert_eq!(parsed.version_needed, 45);
    }

    #[test]
    fn test_data_descriptor_with_signature() {
        let descriptor = DataDescriptor {
            crc32: 0x12345678,
            compressed_size: 100,
            uncompressed_size: 200,
        };
        let mut buf = Vec::new();
        descriptor.write(&mut buf, false).unwrap();
        let (parsed, consumed) = DataDescriptor::read(&mut Cursor::new(&buf), false).unwrap();
        assert_eq!(parsed, descriptor);
        assert_eq!(consumed, 16);
    }

    #[test]
    fn test_data_descriptor_without_signature() {
        let mut data = Vec::new();
        data.extend_from_slice(&0xDEADBEEFu32.to_le_bytes());
        data.extend_from_slice(&50u32.to_le_bytes());
        data.extend_from_slice(&75u32.to_le_bytes());
        let (parsed, consumed) = DataDescriptor::read(&mut Cursor::new(data), false).unwrap();
        assert_eq!(parsed.crc32, 0xDEADBEEF);
        assert_eq!(parsed.uncompressed_size, 75);
        assert_eq!(consumed, 12);
    }

    #[test]
    fn test_data_descriptor_zip64() {
        let descriptor = DataDescriptor {
            crc32: 0xCAFEBABE,
            compressed_size: 5_000_000_000,
            uncompressed_size: 10_000_000_000,
        };
        let mut buf = Vec::new();
        descriptor.write(&mut buf, true).unwrap();
        let (parsed, consumed) = DataDescriptor::read(&mut Cursor::new(&buf), true).unwrap();
        assert_eq!(parsed, descriptor);
        assert_eq!(consumed, 24);
    }
}
