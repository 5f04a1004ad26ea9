//! Archive reading and extraction.
//!
//! [`ZipArchive`] indexes an archive from its central directory and checks
//! every local header up front, so a structurally broken archive fails
//! before any output exists. [`unzip`] extracts it under a canonical root:
//! names go through the path sanitizer, each file is decoded into a
//! temporary file next to its target and renamed into place only after its
//! checksum (or AES authentication code) verified.

use crate::options::{SymlinkPolicy, UnzipOptions};
use crate::sanitize::ExtractionTarget;
#[cfg(feature = "aes-crypto")]
use crate::zip::aes;
use crate::zip::crypto::{self, ZipCryptoReader};
use crate::zip::header::FLAG_DATA_DESCRIPTOR;
use crate::zip::{CentralDirectory, LocalFileHeader, decompress_to};
use capzip_core::{
    AesStrength, ArchiveEntry, CancellationToken, Encryption, EntryKind, Result, Warning, ZipError,
};
use filetime::FileTime;
use std::fs::{self, File};
use std::io::{self, BufReader, BufWriter, Read, Seek, SeekFrom, Write};
use std::path::Path;
use tempfile::NamedTempFile;

/// Longest symlink target accepted when restoring links.
pub const MAX_LINK_TARGET: u64 = 4096;

#[derive(Debug, Clone, Copy)]
struct LocalInfo {
    data_offset: u64,
    mtime: u16,
}

/// Random-access reader over a ZIP archive.
pub struct ZipArchive<R: Read + Seek> {
    reader: R,
    directory: CentralDirectory,
    locals: Vec<LocalInfo>,
}

impl<R: Read + Seek> ZipArchive<R> {
    /// Index `reader`. Fails with [`ZipError::MalformedArchive`] if the
    /// directory or any local header is inconsistent.
    pub fn new(mut reader: R) -> Result<Self> {
        let directory = CentralDirectory::read(&mut reader).map_err(archive_error)?;
        let mut locals = Vec::with_capacity(directory.entries.len());
        for entry in &directory.entries {
            locals.push(read_local(&mut reader, entry, directory.offset)?);
        }
        log::debug!("indexed {} entries", directory.entries.len());
        Ok(Self {
            reader,
            directory,
            locals,
        })
    }

    /// Number of entries.
    pub fn len(&self) -> usize {
        self.directory.entries.len()
    }

    /// Whether the archive has no entries.
    pub fn is_empty(&self) -> bool {
        self.directory.entries.is_empty()
    }

    /// Entries in directory order.
    pub fn entries(&self) -> &[ArchiveEntry] {
        &self.directory.entries
    }

    /// Get entry by name.
    pub fn entry_by_name(&self, name: &str) -> Option<&ArchiveEntry> {
        self.directory.entries.iter().find(|e| e.name == name)
    }

    /// The archive comment.
    pub fn comment(&self) -> &str {
        &self.directory.end.comment
    }

    /// Decode entry `index` into `out`.
    ///
    /// Output is only complete once this returns `Ok`; the caller discards it
    /// otherwise. Archive-side failures are classified here, so a remaining
    /// [`ZipError::Io`] always comes from `out`. A ZipCrypto entry yields a
    /// [`Warning::WeakEncryption`].
    pub fn read_entry<W: Write + ?Sized>(
        &mut self,
        index: usize,
        password: Option<&[u8]>,
        out: &mut W,
    ) -> Result<Option<Warning>> {
        let (entry, local) = match (self.directory.entries.get(index), self.locals.get(index)) {
            (Some(entry), Some(local)) => (entry, *local),
            _ => return Err(ZipError::malformed(format!("no entry at index {index}"))),
        };
        if entry.is_dir() {
            return Ok(None);
        }
        self.reader
            .seek(SeekFrom::Start(local.data_offset))
            .map_err(|e| archive_error(e.into()))?;

        match entry.encryption {
            Encryption::None => {
                decompress_to(
                    (&mut self.reader).take(entry.compressed_size),
                    entry.method,
                    &entry.name,
                    entry.uncompressed_size,
                    Some(entry.crc32),
                    out,
                )?;
                Ok(None)
            }
            Encryption::ZipCrypto => {
                let password =
                    password.ok_or_else(|| ZipError::password_required(&entry.name))?;
                let check = crypto::check_byte(
                    entry.crc32,
                    local.mtime,
                    entry.flags & FLAG_DATA_DESCRIPTOR != 0,
                );
                let plain = ZipCryptoReader::open(
                    (&mut self.reader).take(entry.compressed_size),
                    &entry.name,
                    password,
                    check,
                )
                .map_err(archive_error)?;
                decompress_to(
                    plain,
                    entry.method,
                    &entry.name,
                    entry.uncompressed_size,
                    Some(entry.crc32),
                    out,
                )?;
                Ok(Some(Warning::WeakEncryption {
                    entry: entry.name.clone(),
                }))
            }
            Encryption::Aes {
                strength,
                vendor_version,
            } => {
                let password =
                    password.ok_or_else(|| ZipError::password_required(&entry.name))?;
                read_aes(
                    &mut self.reader,
                    entry,
                    local,
                    strength,
                    vendor_version,
                    password,
                    out,
                )?;
                Ok(None)
            }
        }
    }

    /// Decode entry `index` into memory.
    pub fn read_to_vec(
        &mut self,
        index: usize,
        password: Option<&[u8]>,
    ) -> Result<(Vec<u8>, Option<Warning>)> {
        let mut out = Vec::new();
        let warning = self.read_entry(index, password, &mut out)?;
        Ok((out, warning))
    }

    /// Return the underlying reader.
    pub fn into_inner(self) -> R {
        self.reader
    }
}

/// Authenticate the whole ciphertext, then decrypt it in a second pass.
#[cfg(feature = "aes-crypto")]
fn read_aes<R: Read + Seek, W: Write + ?Sized>(
    reader: &mut R,
    entry: &ArchiveEntry,
    local: LocalInfo,
    strength: AesStrength,
    vendor_version: u16,
    password: &[u8],
    out: &mut W,
) -> Result<()> {
    let ciphertext_len = entry
        .compressed_size
        .checked_sub(aes::overhead(strength))
        .ok_or_else(|| {
            ZipError::malformed(format!(
                "entry '{}' is too short for its AES header",
                entry.name
            ))
        })?;

    let key = aes::open(reader, &entry.name, password, strength).map_err(archive_error)?;
    aes::authenticate(reader, &entry.name, ciphertext_len, &key).map_err(archive_error)?;

    let ciphertext_start =
        local.data_offset + (strength.salt_len() + aes::PASSWORD_VERIFICATION_LEN) as u64;
    reader
        .seek(SeekFrom::Start(ciphertext_start))
        .map_err(|e| archive_error(e.into()))?;
    let plain = key.decrypting(reader.take(ciphertext_len))?;
    // AE-2 stores no CRC; the authentication code already covered the data.
    let crc = (vendor_version == 1).then_some(entry.crc32);
    decompress_to(
        plain,
        entry.method,
        &entry.name,
        entry.uncompressed_size,
        crc,
        out,
    )?;
    Ok(())
}

#[cfg(not(feature = "aes-crypto"))]
fn read_aes<R: Read + Seek, W: Write + ?Sized>(
    _reader: &mut R,
    _entry: &ArchiveEntry,
    _local: LocalInfo,
    _strength: AesStrength,
    _vendor_version: u16,
    _password: &[u8],
    _out: &mut W,
) -> Result<()> {
    Err(ZipError::unsupported(
        "AES encryption (built without the `aes-crypto` feature)",
    ))
}

fn read_local<R: Read + Seek>(
    reader: &mut R,
    entry: &ArchiveEntry,
    data_end: u64,
) -> Result<LocalInfo> {
    reader
        .seek(SeekFrom::Start(entry.local_header_offset))
        .map_err(|e| archive_error(e.into()))?;
    let header = LocalFileHeader::read(reader).map_err(|err| {
        ZipError::malformed(format!("entry '{}': bad local header: {err}", entry.name))
    })?;
    let data_offset = entry.local_header_offset + header.header_len();
    let fits = data_offset
        .checked_add(entry.compressed_size)
        .is_some_and(|end| end <= data_end);
    if !fits {
        return Err(ZipError::malformed(format!(
            "entry '{}' overlaps the central directory",
            entry.name
        )));
    }
    Ok(LocalInfo {
        data_offset,
        mtime: header.mtime,
    })
}

/// Classify an I/O error raised while reading the archive itself.
fn archive_error(err: ZipError) -> ZipError {
    match err {
        ZipError::Io(err) => ZipError::malformed(err.to_string()),
        other => other,
    }
}

/// Summary of a finished [`unzip`] run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct UnzipReport {
    /// Entries processed, skipped symlinks included.
    pub entries: usize,
    /// Bytes written to regular files.
    pub bytes_written: u64,
    /// Non-fatal advisories, in entry order.
    pub warnings: Vec<Warning>,
}

/// Stages of an [`unzip`] run, logged as they are entered.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadStage {
    /// Nothing started yet.
    Idle,
    /// Checking that the archive exists.
    Locating,
    /// Reading the central directory and local headers.
    ParsingDirectory,
    /// Writing entries under the destination.
    Extracting,
    /// Every entry is in place.
    Done,
    /// Terminal failure; entries extracted before it remain.
    Failed,
}

struct Progress<'a> {
    source: &'a Path,
    stage: ReadStage,
}

impl Progress<'_> {
    fn enter(&mut self, stage: ReadStage) {
        log::debug!("unzip {}: {:?} -> {:?}", self.source.display(), self.stage, stage);
        self.stage = stage;
    }
}

/// Extract the archive at `source` into `destination`.
///
/// The destination directory is created if needed. Entries are processed in
/// directory order and the first failure stops the run; files already in
/// place stay, while the failing entry leaves nothing behind.
pub fn unzip(source: &Path, destination: &Path, options: &UnzipOptions) -> Result<UnzipReport> {
    let mut progress = Progress {
        source,
        stage: ReadStage::Idle,
    };
    match extract(source, destination, options, &mut progress) {
        Ok(report) => {
            progress.enter(ReadStage::Done);
            log::info!(
                "extracted {} into {} ({} entries, {} bytes)",
                source.display(),
                destination.display(),
                report.entries,
                report.bytes_written
            );
            Ok(report)
        }
        Err(err) => {
            progress.enter(ReadStage::Failed);
            log::warn!("unzip {} failed: {err}", source.display());
            Err(err)
        }
    }
}

fn extract(
    source: &Path,
    destination: &Path,
    options: &UnzipOptions,
    progress: &mut Progress<'_>,
) -> Result<UnzipReport> {
    progress.enter(ReadStage::Locating);
    let metadata = fs::metadata(source).map_err(|_| ZipError::source_not_found(source))?;
    if !metadata.is_file() || metadata.len() == 0 {
        return Err(ZipError::source_not_found(source));
    }
    let file = File::open(source).map_err(|_| ZipError::source_not_found(source))?;

    progress.enter(ReadStage::ParsingDirectory);
    let mut archive = ZipArchive::new(BufReader::new(file)).map_err(|e| e.on_read(source))?;

    progress.enter(ReadStage::Extracting);
    let target = ExtractionTarget::create(destination)?;
    let password = options.password.as_deref().map(str::as_bytes);

    let mut report = UnzipReport::default();
    let mut directories = Vec::new();
    for index in 0..archive.len() {
        check_cancelled(options.cancel_token.as_ref())?;
        let entry = archive.entries()[index].clone();
        log::debug!("extracting '{}'", entry.name);
        let path = target.resolve(&entry.name)?;
        target.ensure_no_symlink_ancestors(&entry.name, &path)?;

        let warning = match entry.kind {
            EntryKind::Directory => {
                refuse_existing_symlink(&entry.name, &path)?;
                fs::create_dir_all(&path).map_err(|e| ZipError::unwritable(&path, e))?;
                directories.push((path, entry));
                None
            }
            EntryKind::File => {
                let (written, warning) =
                    extract_file(&mut archive, index, &entry, &path, &target, password)
                        .map_err(|e| e.on_write(&path))?;
                apply_metadata(&path, &entry, options);
                report.bytes_written += written;
                warning
            }
            EntryKind::Symlink => {
                extract_symlink(&mut archive, index, &entry, &path, &target, password, options)
                    .map_err(|e| e.on_write(&path))?
            }
        };
        if let Some(warning) = warning {
            log::warn!("{warning}");
            report.warnings.push(warning);
        }
        report.entries += 1;
    }

    // Children first, so creating their contents cannot bump a restored time.
    for (path, entry) in directories.iter().rev() {
        if is_symlink(path) {
            log::warn!("leaving {} alone: it is now a symlink", path.display());
            continue;
        }
        apply_metadata(path, entry, options);
    }
    Ok(report)
}

fn check_cancelled(token: Option<&CancellationToken>) -> Result<()> {
    token.map_or(Ok(()), CancellationToken::check)
}

fn is_symlink(path: &Path) -> bool {
    fs::symlink_metadata(path).is_ok_and(|meta| meta.file_type().is_symlink())
}

/// Directories are created in place, so an existing link there would be followed.
fn refuse_existing_symlink(entry_name: &str, path: &Path) -> Result<()> {
    if is_symlink(path) {
        return Err(ZipError::unsafe_path(entry_name, "path is an existing symlink"));
    }
    Ok(())
}

/// A temporary file created with the mode a plain `File::create` would get.
#[cfg(unix)]
fn staging_file(parent: &Path) -> io::Result<NamedTempFile> {
    use std::os::unix::fs::PermissionsExt;
    // Subject to the umask, like any newly created file.
    tempfile::Builder::new()
        .permissions(fs::Permissions::from_mode(0o666))
        .tempfile_in(parent)
}

#[cfg(not(unix))]
fn staging_file(parent: &Path) -> io::Result<NamedTempFile> {
    NamedTempFile::new_in(parent)
}

fn create_parent(path: &Path, target: &ExtractionTarget) -> Result<()> {
    let parent = path.parent().unwrap_or(target.root());
    fs::create_dir_all(parent).map_err(|e| ZipError::unwritable(parent, e))
}

fn extract_file<R: Read + Seek>(
    archive: &mut ZipArchive<R>,
    index: usize,
    entry: &ArchiveEntry,
    path: &Path,
    target: &ExtractionTarget,
    password: Option<&[u8]>,
) -> Result<(u64, Option<Warning>)> {
    if entry.is_encrypted() && password.is_none() {
        return Err(ZipError::password_required(&entry.name));
    }
    create_parent(path, target)?;
    let parent = path.parent().unwrap_or(target.root());
    let mut tmp = staging_file(parent).map_err(|e| ZipError::unwritable(path, e))?;
    let warning = {
        let mut out = BufWriter::new(tmp.as_file_mut());
        let warning = archive.read_entry(index, password, &mut out)?;
        out.flush()?;
        warning
    };
    tmp.persist(path)
        .map_err(|e| ZipError::unwritable(path, e.error))?;
    Ok((entry.uncompressed_size, warning))
}

fn extract_symlink<R: Read + Seek>(
    archive: &mut ZipArchive<R>,
    index: usize,
    entry: &ArchiveEntry,
    path: &Path,
    target: &ExtractionTarget,
    password: Option<&[u8]>,
    options: &UnzipOptions,
) -> Result<Option<Warning>> {
    let skipped = Warning::SymlinkSkipped {
        entry: entry.name.clone(),
    };
    if options.symlinks == SymlinkPolicy::Skip || !cfg!(unix) {
        return Ok(Some(skipped));
    }
    if entry.uncompressed_size > MAX_LINK_TARGET {
        return Err(ZipError::unsafe_path(&entry.name, "symlink target is too long"));
    }
    let (link, warning) = archive.read_to_vec(index, password)?;
    let link = String::from_utf8(link)
        .map_err(|_| ZipError::unsafe_path(&entry.name, "symlink target is not UTF-8"))?
        .replace('\\', "/");
    target.resolve_link_target(&entry.name, path, &link)?;

    create_parent(path, target)?;
    if let Ok(existing) = fs::symlink_metadata(path) {
        if existing.is_dir() {
            return Err(ZipError::unwritable(
                path,
                io::Error::new(io::ErrorKind::AlreadyExists, "a directory is in the way"),
            ));
        }
        fs::remove_file(path).map_err(|e| ZipError::unwritable(path, e))?;
    }
    create_symlink(&link, path)?;
    if options.restore_modified {
        if let Some(modified) = entry.modified {
            let time = FileTime::from_system_time(modified);
            if let Err(err) = filetime::set_symlink_file_times(path, time, time) {
                log::debug!("cannot set time of {}: {err}", path.display());
            }
        }
    }
    Ok(warning)
}

#[cfg(unix)]
fn create_symlink(link: &str, path: &Path) -> Result<()> {
    std::os::unix::fs::symlink(link, path).map_err(|e| ZipError::unwritable(path, e))
}

#[cfg(not(unix))]
fn create_symlink(_link: &str, path: &Path) -> Result<()> {
    Err(ZipError::unwritable(
        path,
        io::Error::new(io::ErrorKind::Unsupported, "symlinks are not supported here"),
    ))
}

/// Best effort: metadata that cannot be applied is logged, not fatal.
fn apply_metadata(path: &Path, entry: &ArchiveEntry, options: &UnzipOptions) {
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        if let (true, Some(mode)) = (options.restore_permissions, entry.permissions()) {
            if let Err(err) = fs::set_permissions(path, fs::Permissions::from_mode(mode)) {
                log::warn!("cannot set permissions of {}: {err}", path.display());
            }
        }
    }
    if options.restore_modified {
        if let Some(modified) = entry.modified {
            if let Err(err) = filetime::set_file_mtime(path, FileTime::from_system_time(modified)) {
                log::warn!("cannot set modification time of {}: {err}", path.display());
            }
        }
    }
}
