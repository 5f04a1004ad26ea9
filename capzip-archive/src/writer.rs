//! Archive creation.
//!
//! [`ArchiveWriter`] lays entries down in insertion order and appends the
//! central directory in [`ArchiveWriter::finish`]. [`zip`] drives it over a
//! file or directory tree and publishes the result with an atomic rename, so
//! the destination is either the complete new archive or untouched.
//!
//! Small files are read and encoded in memory, in parallel batches when the
//! `parallel` feature is on; the batch is written back in the original order.
//! Files above [`INLINE_LIMIT`] are streamed through the encoder and their
//! local header is patched once the sizes are known.

#[cfg(feature = "aes-crypto")]
use crate::zip::aes::{self, AesWriter};
use crate::options::ZipOptions;
use crate::zip::compression::CHUNK_SIZE;
#[cfg(feature = "aes-crypto")]
use crate::zip::header::FLAG_ENCRYPTED;
use crate::zip::header::{FLAG_UTF8, LocalFileHeader, ZIP64_MARKER_32, write_central_directory_with};
use crate::zip::{CompressionLevel, compress_for_level};
#[cfg(feature = "aes-crypto")]
use capzip_core::Encryption;
use capzip_core::{ArchiveEntry, CancellationToken, CompressionMethod, Crc32, Result, ZipError};
use flate2::write::DeflateEncoder;
use std::fs::{self, File};
use std::io::{self, BufWriter, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use tempfile::NamedTempFile;
use walkdir::WalkDir;

/// Files up to this size are encoded in memory.
pub const INLINE_LIMIT: u64 = 8 * 1024 * 1024;

/// Upper bound on the source bytes held by one in-memory batch.
const BATCH_BYTES: u64 = 64 * 1024 * 1024;

/// Streamed files at least this large reserve a Zip64 local field.
const STREAMED_ZIP64_THRESHOLD: u64 = 0xF000_0000;

/// An entry whose payload is fully encoded and ready to be written.
#[derive(Debug, Clone)]
pub struct PreparedEntry {
    /// Central directory record; sizes, CRC and method are final.
    pub entry: ArchiveEntry,
    /// Stored payload.
    pub payload: Vec<u8>,
}

impl PreparedEntry {
    /// Compress and optionally encrypt `data` as the payload of `entry`.
    pub fn encode(
        mut entry: ArchiveEntry,
        data: &[u8],
        level: CompressionLevel,
        password: Option<&str>,
    ) -> Result<Self> {
        let (method, payload) = compress_for_level(data, level)?;
        entry.method = method;
        entry.uncompressed_size = data.len() as u64;
        entry.crc32 = Crc32::compute(data);
        let payload = match password {
            Some(password) => seal(&mut entry, &payload, password)?,
            None => payload,
        };
        entry.compressed_size = payload.len() as u64;
        mark_utf8(&mut entry);
        Ok(Self { entry, payload })
    }

    /// A directory record. Directories carry no payload and are never encrypted.
    pub fn directory(mut entry: ArchiveEntry) -> Self {
        entry.uncompressed_size = 0;
        entry.compressed_size = 0;
        entry.crc32 = 0;
        mark_utf8(&mut entry);
        Self {
            entry,
            payload: Vec::new(),
        }
    }
}

fn mark_utf8(entry: &mut ArchiveEntry) {
    if !entry.name.is_ascii() {
        entry.flags |= FLAG_UTF8;
    }
}

#[cfg(feature = "aes-crypto")]
fn mark_encrypted(entry: &mut ArchiveEntry) {
    entry.encryption = Encryption::Aes {
        strength: aes::WRITE_STRENGTH,
        vendor_version: aes::WRITE_VENDOR_VERSION,
    };
    entry.flags |= FLAG_ENCRYPTED;
}

#[cfg(feature = "aes-crypto")]
fn seal(entry: &mut ArchiveEntry, payload: &[u8], password: &str) -> Result<Vec<u8>> {
    mark_encrypted(entry);
    // AE-2: the authentication code replaces the CRC.
    entry.crc32 = 0;
    let capacity = payload.len() + aes::overhead(aes::WRITE_STRENGTH) as usize;
    let mut writer = AesWriter::new(
        Vec::with_capacity(capacity),
        password.as_bytes(),
        aes::WRITE_STRENGTH,
    )?;
    writer.write_all(payload)?;
    writer.finish()
}

#[cfg(not(feature = "aes-crypto"))]
fn seal(_entry: &mut ArchiveEntry, _payload: &[u8], _password: &str) -> Result<Vec<u8>> {
    Err(encryption_unavailable())
}

fn encryption_unavailable() -> ZipError {
    ZipError::unsupported("AES encryption (built without the `aes-crypto` feature)")
}

/// Counts the bytes that pass through to the archive.
struct CountingWriter<W> {
    inner: W,
    count: u64,
}

impl<W: Write> Write for CountingWriter<W> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let n = self.inner.write(buf)?;
        self.count += n as u64;
        Ok(n)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.inner.flush()
    }
}

/// ZIP archive writer.
pub struct ArchiveWriter<W: Write + Seek> {
    writer: W,
    entries: Vec<ArchiveEntry>,
    // Whether each entry's local header carries a Zip64 field.
    local_zip64: Vec<bool>,
    offset: u64,
}

impl<W: Write + Seek> ArchiveWriter<W> {
    /// Create a writer that starts at the current beginning of `writer`.
    pub fn new(writer: W) -> Self {
        Self {
            writer,
            entries: Vec::new(),
            local_zip64: Vec::new(),
            offset: 0,
        }
    }

    /// Entries written so far.
    pub fn entries(&self) -> &[ArchiveEntry] {
        &self.entries
    }

    /// Bytes written so far, not counting the central directory.
    pub fn bytes_written(&self) -> u64 {
        self.offset
    }

    /// Write an encoded entry.
    pub fn add_prepared(&mut self, prepared: PreparedEntry) -> Result<()> {
        let PreparedEntry { mut entry, payload } = prepared;
        entry.local_header_offset = self.offset;

        let marker = ZIP64_MARKER_32 as u64;
        let zip64 = entry.compressed_size >= marker || entry.uncompressed_size >= marker;
        let header = LocalFileHeader::for_entry(&entry, zip64);
        header.write(&mut self.writer)?;
        self.writer.write_all(&payload)?;

        self.offset += header.header_len() + payload.len() as u64;
        log::trace!(
            "wrote '{}' ({} -> {} bytes, {})",
            entry.name,
            entry.uncompressed_size,
            entry.compressed_size,
            entry.method
        );
        self.entries.push(entry);
        self.local_zip64.push(zip64);
        Ok(())
    }

    /// Add a file from memory, stamped with the current time.
    pub fn add_file(
        &mut self,
        name: &str,
        data: &[u8],
        level: CompressionLevel,
        password: Option<&str>,
    ) -> Result<()> {
        let entry = ArchiveEntry::file(name, data.len() as u64).with_modified(std::time::SystemTime::now());
        self.add_prepared(PreparedEntry::encode(entry, data, level, password)?)
    }

    /// Add a directory. A trailing `/` is added if missing.
    pub fn add_directory(&mut self, name: &str) -> Result<()> {
        let entry = ArchiveEntry::directory(name).with_modified(std::time::SystemTime::now());
        self.add_prepared(PreparedEntry::directory(entry))
    }

    /// Add a symlink whose payload is `target`.
    pub fn add_symlink(&mut self, name: &str, target: &str, password: Option<&str>) -> Result<()> {
        let entry = ArchiveEntry::symlink(name, target.len() as u64)
            .with_modified(std::time::SystemTime::now());
        self.add_prepared(PreparedEntry::encode(
            entry,
            target.as_bytes(),
            CompressionLevel::Store,
            password,
        )?)
    }

    /// Stream the file at `path` into the archive as `entry`.
    ///
    /// The local header goes out with placeholder sizes and is rewritten once
    /// the payload is complete. There is no store fallback on this path.
    /// Returns the number of bytes read from `path`.
    pub fn add_file_from_path(
        &mut self,
        mut entry: ArchiveEntry,
        path: &Path,
        level: CompressionLevel,
        password: Option<&str>,
    ) -> Result<u64> {
        let source = File::open(path).map_err(|e| unreadable(path, e))?;
        let zip64 = entry.uncompressed_size >= STREAMED_ZIP64_THRESHOLD;
        entry.method = match level {
            CompressionLevel::Store => CompressionMethod::Stored,
            _ => CompressionMethod::Deflate,
        };
        entry.crc32 = 0;
        entry.local_header_offset = self.offset;
        #[cfg(feature = "aes-crypto")]
        if password.is_some() {
            mark_encrypted(&mut entry);
        }
        mark_utf8(&mut entry);

        let header = LocalFileHeader::for_entry(&entry, zip64);
        header.write(&mut self.writer)?;
        let data_start = self.offset + header.header_len();

        let sink = CountingWriter {
            inner: &mut self.writer,
            count: 0,
        };
        let (sink, crc, read) = match password {
            Some(password) => pump_sealed(source, path, entry.method, level, sink, password)?,
            None => pump(source, path, entry.method, level, sink)?,
        };
        let written = sink.count;

        let marker = ZIP64_MARKER_32 as u64;
        if !zip64 && (read >= marker || written >= marker) {
            return Err(ZipError::unsupported(format!(
                "'{}' grew past the Zip64 threshold while being archived",
                path.display()
            )));
        }
        entry.uncompressed_size = read;
        entry.compressed_size = written;
        if !entry.is_encrypted() {
            entry.crc32 = crc;
        }

        self.writer.seek(SeekFrom::Start(entry.local_header_offset))?;
        LocalFileHeader::for_entry(&entry, zip64).write(&mut self.writer)?;
        self.offset = data_start + written;
        self.writer.seek(SeekFrom::Start(self.offset))?;

        log::trace!("streamed '{}' ({read} -> {written} bytes)", entry.name);
        self.entries.push(entry);
        self.local_zip64.push(zip64);
        Ok(read)
    }

    /// Write the central directory and return the underlying writer.
    pub fn finish(mut self) -> Result<W> {
        let directory = write_central_directory_with(&self.entries, &self.local_zip64, self.offset);
        self.writer.write_all(&directory)?;
        self.writer.flush()?;
        Ok(self.writer)
    }
}

/// Copy `source` through the CRC into `out`. Read failures are reported
/// against `path`.
fn copy_hashed<W: Write>(mut source: File, path: &Path, out: &mut W) -> Result<(u32, u64)> {
    let mut crc = Crc32::new();
    let mut buf = vec![0u8; CHUNK_SIZE];
    let mut total = 0u64;
    loop {
        let n = match source.read(&mut buf) {
            Ok(0) => break,
            Ok(n) => n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(unreadable(path, e)),
        };
        crc.update(&buf[..n]);
        out.write_all(&buf[..n])?;
        total += n as u64;
    }
    Ok((crc.finalize(), total))
}

fn pump<W: Write>(
    source: File,
    path: &Path,
    method: CompressionMethod,
    level: CompressionLevel,
    mut out: W,
) -> Result<(W, u32, u64)> {
    match method {
        CompressionMethod::Deflate => {
            let mut encoder = DeflateEncoder::new(out, level.deflate_level().unwrap_or_default());
            let (crc, read) = copy_hashed(source, path, &mut encoder)?;
            Ok((encoder.finish()?, crc, read))
        }
        _ => {
            let (crc, read) = copy_hashed(source, path, &mut out)?;
            Ok((out, crc, read))
        }
    }
}

#[cfg(feature = "aes-crypto")]
fn pump_sealed<W: Write>(
    source: File,
    path: &Path,
    method: CompressionMethod,
    level: CompressionLevel,
    out: W,
    password: &str,
) -> Result<(W, u32, u64)> {
    let writer = AesWriter::new(out, password.as_bytes(), aes::WRITE_STRENGTH)?;
    let (writer, crc, read) = pump(source, path, method, level, writer)?;
    Ok((writer.finish()?, crc, read))
}

#[cfg(not(feature = "aes-crypto"))]
fn pump_sealed<W: Write>(
    _source: File,
    _path: &Path,
    _method: CompressionMethod,
    _level: CompressionLevel,
    _out: W,
    _password: &str,
) -> Result<(W, u32, u64)> {
    Err(encryption_unavailable())
}

fn unreadable(path: &Path, err: io::Error) -> ZipError {
    log::warn!("cannot read {}: {err}", path.display());
    ZipError::source_not_found(path)
}

/// Summary of a finished [`zip`] run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ZipReport {
    /// Entries written.
    pub entries: usize,
    /// Source bytes read from regular files.
    pub bytes_read: u64,
    /// Size of the finished archive.
    pub bytes_written: u64,
}

/// Stages of a [`zip`] run, logged as they are entered.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteStage {
    /// Nothing started yet.
    Idle,
    /// Checking the source and destination.
    Validating,
    /// Walking the source tree.
    Enumerating,
    /// Writing entries to the temporary archive.
    Compressing,
    /// Writing the central directory and publishing the archive.
    Finalizing,
    /// The archive is in place.
    Done,
    /// Terminal failure; the destination was not touched.
    Failed,
}

struct Progress<'a> {
    destination: &'a Path,
    stage: WriteStage,
}

impl Progress<'_> {
    fn enter(&mut self, stage: WriteStage) {
        log::debug!(
            "zip {}: {:?} -> {:?}",
            self.destination.display(),
            self.stage,
            stage
        );
        self.stage = stage;
    }
}

/// Archive `source` (a file or a directory tree) into `destination`.
///
/// Entries are stored in lexicographic walk order with forward-slash names
/// relative to `source`. An existing destination is replaced only once the
/// new archive is complete.
pub fn zip(source: &Path, destination: &Path, options: &ZipOptions) -> Result<ZipReport> {
    let mut progress = Progress {
        destination,
        stage: WriteStage::Idle,
    };
    match create(source, destination, options, &mut progress) {
        Ok(report) => {
            progress.enter(WriteStage::Done);
            log::info!(
                "created {} ({} entries, {} bytes)",
                destination.display(),
                report.entries,
                report.bytes_written
            );
            Ok(report)
        }
        Err(err) => {
            progress.enter(WriteStage::Failed);
            let err = err.on_write(destination);
            log::warn!("zip {} failed: {err}", destination.display());
            Err(err)
        }
    }
}

fn create(
    source: &Path,
    destination: &Path,
    options: &ZipOptions,
    progress: &mut Progress<'_>,
) -> Result<ZipReport> {
    progress.enter(WriteStage::Validating);
    let metadata = fs::metadata(source).map_err(|_| ZipError::source_not_found(source))?;
    if options.password.is_some() && !cfg!(feature = "aes-crypto") {
        return Err(encryption_unavailable());
    }
    let file_name = destination.file_name().ok_or_else(|| {
        ZipError::unwritable(
            destination,
            io::Error::new(io::ErrorKind::InvalidInput, "destination has no file name"),
        )
    })?;
    if destination.is_dir() {
        return Err(ZipError::unwritable(
            destination,
            io::Error::new(io::ErrorKind::IsADirectory, "destination is a directory"),
        ));
    }
    let parent = match destination.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
        _ => PathBuf::from("."),
    };
    fs::create_dir_all(&parent).map_err(|e| ZipError::unwritable(&parent, e))?;
    let parent = fs::canonicalize(&parent).map_err(|e| ZipError::unwritable(&parent, e))?;
    let archive_path = parent.join(file_name);

    progress.enter(WriteStage::Enumerating);
    let items = enumerate(source, &metadata, &archive_path, options.include_root)?;
    log::debug!("{} entries to archive from {}", items.len(), source.display());

    let mut tmp = NamedTempFile::new_in(&parent).map_err(|e| ZipError::unwritable(destination, e))?;
    progress.enter(WriteStage::Compressing);
    let bytes_read = {
        let mut writer = ArchiveWriter::new(BufWriter::new(tmp.as_file_mut()));
        let bytes_read = write_items(&mut writer, &items, options)?;
        progress.enter(WriteStage::Finalizing);
        writer.finish()?.into_inner().map_err(io::IntoInnerError::into_error)?;
        bytes_read
    };

    tmp.as_file().sync_all()?;
    #[cfg(unix)]
    tmp.as_file().set_permissions(archive_permissions(&archive_path))?;
    let bytes_written = tmp.as_file().metadata()?.len();
    tmp.persist(&archive_path)
        .map_err(|e| ZipError::unwritable(destination, e.error))?;

    Ok(ZipReport {
        entries: items.len(),
        bytes_read,
        bytes_written,
    })
}

/// Keep the mode of an archive being replaced; new archives get 0644.
#[cfg(unix)]
fn archive_permissions(existing: &Path) -> fs::Permissions {
    use std::os::unix::fs::PermissionsExt;
    fs::metadata(existing)
        .map(|meta| meta.permissions())
        .unwrap_or_else(|_| fs::Permissions::from_mode(0o644))
}

#[derive(Debug)]
enum Source {
    File,
    Directory,
    Symlink(String),
}

/// One enumerated source path and the record it becomes.
#[derive(Debug)]
struct SourceItem {
    path: PathBuf,
    entry: ArchiveEntry,
    source: Source,
}

impl SourceItem {
    fn is_inline(&self) -> bool {
        !matches!(self.source, Source::File) || self.entry.uncompressed_size <= INLINE_LIMIT
    }

    fn prepare(&self, level: CompressionLevel, password: Option<&str>) -> Result<PreparedEntry> {
        match &self.source {
            Source::File => {
                let data = fs::read(&self.path).map_err(|e| unreadable(&self.path, e))?;
                PreparedEntry::encode(self.entry.clone(), &data, level, password)
            }
            Source::Directory => Ok(PreparedEntry::directory(self.entry.clone())),
            Source::Symlink(target) => PreparedEntry::encode(
                self.entry.clone(),
                target.as_bytes(),
                CompressionLevel::Store,
                password,
            ),
        }
    }
}

fn enumerate(
    source: &Path,
    metadata: &fs::Metadata,
    archive_path: &Path,
    include_root: bool,
) -> Result<Vec<SourceItem>> {
    if metadata.is_file() {
        let name = source
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .ok_or_else(|| ZipError::source_not_found(source))?;
        return Ok(vec![SourceItem {
            path: source.to_path_buf(),
            entry: with_metadata(ArchiveEntry::file(name, metadata.len()), metadata),
            source: Source::File,
        }]);
    }
    if !metadata.is_dir() {
        return Err(ZipError::unsupported(format!(
            "'{}' is neither a regular file nor a directory",
            source.display()
        )));
    }

    let root = fs::canonicalize(source).map_err(|e| unreadable(source, e))?;
    let prefix = include_root
        .then(|| root.file_name().map(|n| format!("{}/", n.to_string_lossy())))
        .flatten();

    let mut items = Vec::new();
    if let Some(prefix) = &prefix {
        items.push(SourceItem {
            path: root.clone(),
            entry: with_metadata(ArchiveEntry::directory(prefix.clone()), metadata),
            source: Source::Directory,
        });
    }

    for walked in WalkDir::new(&root)
        .follow_links(false)
        .sort_by_file_name()
        .min_depth(1)
    {
        let walked = walked.map_err(|e| walk_error(e, &root))?;
        let path = walked.path();
        if path == archive_path {
            log::debug!("skipping the archive being written: {}", path.display());
            continue;
        }
        let relative = path
            .strip_prefix(&root)
            .map_err(|_| ZipError::source_not_found(path))?;
        let name = entry_name(prefix.as_deref(), relative);
        let meta = walked.metadata().map_err(|e| walk_error(e, &root))?;
        let file_type = walked.file_type();

        let (entry, source) = if file_type.is_dir() {
            (with_metadata(ArchiveEntry::directory(name), &meta), Source::Directory)
        } else if file_type.is_file() {
            (with_metadata(ArchiveEntry::file(name, meta.len()), &meta), Source::File)
        } else if file_type.is_symlink() {
            let target = fs::read_link(path).map_err(|e| unreadable(path, e))?;
            let target = target.to_string_lossy().replace('\\', "/");
            let mut entry = ArchiveEntry::symlink(name, target.len() as u64);
            if let Ok(modified) = meta.modified() {
                entry = entry.with_modified(modified);
            }
            (entry, Source::Symlink(target))
        } else {
            log::debug!("skipping special file {}", path.display());
            continue;
        };
        items.push(SourceItem {
            path: path.to_path_buf(),
            entry,
            source,
        });
    }
    Ok(items)
}

fn with_metadata(mut entry: ArchiveEntry, metadata: &fs::Metadata) -> ArchiveEntry {
    if let Ok(modified) = metadata.modified() {
        entry = entry.with_modified(modified);
    }
    if let Some(mode) = unix_permissions(metadata) {
        entry = entry.with_permissions(mode);
    }
    entry
}

#[cfg(unix)]
fn unix_permissions(metadata: &fs::Metadata) -> Option<u32> {
    use std::os::unix::fs::PermissionsExt;
    Some(metadata.permissions().mode() & 0o7777)
}

#[cfg(not(unix))]
fn unix_permissions(_metadata: &fs::Metadata) -> Option<u32> {
    None
}

fn entry_name(prefix: Option<&str>, relative: &Path) -> String {
    let mut name = prefix.unwrap_or_default().to_string();
    for (i, component) in relative.components().enumerate() {
        if i > 0 {
            name.push('/');
        }
        let part = component.as_os_str();
        match part.to_str() {
            Some(part) => name.push_str(part),
            None => {
                log::warn!("file name {part:?} is not UTF-8 and is stored lossily");
                name.push_str(&part.to_string_lossy());
            }
        }
    }
    name
}

fn walk_error(err: walkdir::Error, root: &Path) -> ZipError {
    let path = err.path().unwrap_or(root).to_path_buf();
    log::warn!("cannot read {}: {err}", path.display());
    ZipError::source_not_found(path)
}

fn check_cancelled(token: Option<&CancellationToken>) -> Result<()> {
    token.map_or(Ok(()), CancellationToken::check)
}

fn write_items<W: Write + Seek>(
    writer: &mut ArchiveWriter<W>,
    items: &[SourceItem],
    options: &ZipOptions,
) -> Result<u64> {
    let mut bytes_read = 0;
    let mut batch: Vec<&SourceItem> = Vec::new();
    let mut batch_bytes = 0;

    for item in items {
        if item.is_inline() {
            batch_bytes += item.entry.uncompressed_size;
            batch.push(item);
            if batch_bytes >= BATCH_BYTES {
                bytes_read += flush_batch(writer, &mut batch, options)?;
                batch_bytes = 0;
            }
            continue;
        }

        bytes_read += flush_batch(writer, &mut batch, options)?;
        batch_bytes = 0;
        check_cancelled(options.cancel_token.as_ref())?;
        bytes_read += writer.add_file_from_path(
            item.entry.clone(),
            &item.path,
            options.compression,
            options.password.as_deref(),
        )?;
    }
    bytes_read += flush_batch(writer, &mut batch, options)?;
    Ok(bytes_read)
}

fn flush_batch<W: Write + Seek>(
    writer: &mut ArchiveWriter<W>,
    batch: &mut Vec<&SourceItem>,
    options: &ZipOptions,
) -> Result<u64> {
    if batch.is_empty() {
        return Ok(0);
    }
    check_cancelled(options.cancel_token.as_ref())?;
    let prepared = prepare_all(batch, options);

    let mut bytes_read = 0;
    for (item, prepared) in batch.drain(..).zip(prepared) {
        check_cancelled(options.cancel_token.as_ref())?;
        let prepared = prepared?;
        if matches!(item.source, Source::File) {
            bytes_read += prepared.entry.uncompressed_size;
        }
        writer.add_prepared(prepared)?;
    }
    Ok(bytes_read)
}

fn prepare_all(batch: &[&SourceItem], options: &ZipOptions) -> Vec<Result<PreparedEntry>> {
    let level = options.compression;
    let password = options.password.as_deref();

    #[cfg(feature = "parallel")]
    {
        if options.parallel && batch.len() > 1 {
            use rayon::prelude::*;
            return batch
                .par_iter()
                .map(|item| item.prepare(level, password))
                .collect();
        }
    }
    batch.iter().map(|item| item.prepare(level, password)).collect()
}
