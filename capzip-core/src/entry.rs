//! Archive entry metadata.
//!
//! [`ArchiveEntry`] is the in-memory form of one central directory record:
//! the name, sizes, checksum, compression and encryption of a single file,
//! directory or symlink, plus where its local header lives.

use std::time::SystemTime;

/// Unix file type mask.
pub const S_IFMT: u32 = 0o170_000;
/// Unix directory type bits.
pub const S_IFDIR: u32 = 0o040_000;
/// Unix regular file type bits.
pub const S_IFREG: u32 = 0o100_000;
/// Unix symlink type bits.
pub const S_IFLNK: u32 = 0o120_000;

/// MS-DOS directory attribute bit.
pub const DOS_DIRECTORY: u32 = 0x10;

/// "Version made by" host value for Unix.
pub const HOST_UNIX: u8 = 3;

/// "Version made by" written for new entries: Unix host, APPNOTE 6.3.
pub const VERSION_MADE_BY: u16 = ((HOST_UNIX as u16) << 8) | 63;

/// Compression method used for an entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CompressionMethod {
    /// No compression (stored).
    #[default]
    Stored,
    /// DEFLATE compression.
    Deflate,
    /// Unknown/unsupported method.
    Unknown(u16),
}

impl CompressionMethod {
    /// Create from the on-disk method id.
    pub fn from_u16(value: u16) -> Self {
        match value {
            0 => Self::Stored,
            8 => Self::Deflate,
            _ => Self::Unknown(value),
        }
    }

    /// The on-disk method id.
    pub fn to_u16(self) -> u16 {
        match self {
            Self::Stored => 0,
            Self::Deflate => 8,
            Self::Unknown(id) => id,
        }
    }

    /// Get the method name as a string.
    pub fn name(&self) -> &'static str {
        match self {
            Self::Stored => "Stored",
            Self::Deflate => "Deflate",
            Self::Unknown(_) => "Unknown",
        }
    }
}

impl std::fmt::Display for CompressionMethod {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Unknown(id) => write!(f, "Unknown({})", id),
            _ => write!(f, "{}", self.name()),
        }
    }
}

/// Entry type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum EntryKind {
    /// Regular file.
    #[default]
    File,
    /// Directory.
    Directory,
    /// Symbolic link; the payload is the link target.
    Symlink,
}

/// WinZip AES key strength.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum AesStrength {
    /// AES-128 (16-byte key, 8-byte salt)
    Aes128 = 1,
    /// AES-192 (24-byte key, 12-byte salt)
    Aes192 = 2,
    /// AES-256 (32-byte key, 16-byte salt)
    Aes256 = 3,
}

impl AesStrength {
    /// Get salt length for this strength.
    pub fn salt_len(self) -> usize {
        match self {
            AesStrength::Aes128 => 8,
            AesStrength::Aes192 => 12,
            AesStrength::Aes256 => 16,
        }
    }

    /// Get key length for this strength.
    pub fn key_len(self) -> usize {
        match self {
            AesStrength::Aes128 => 16,
            AesStrength::Aes192 => 24,
            AesStrength::Aes256 => 32,
        }
    }

    /// Convert from the extra-field strength byte.
    pub fn from_u8(value: u8) -> Option<Self> {
        match value {
            1 => Some(AesStrength::Aes128),
            2 => Some(AesStrength::Aes192),
            3 => Some(AesStrength::Aes256),
            _ => None,
        }
    }
}

/// How an entry's payload is protected.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Encryption {
    /// Plain payload.
    #[default]
    None,
    /// WinZip AES (AE-1 or AE-2).
    Aes {
        /// Key strength.
        strength: AesStrength,
        /// 1 for AE-1 (CRC stored), 2 for AE-2 (CRC zeroed).
        vendor_version: u16,
    },
    /// Traditional PKWARE encryption. Read-only.
    ZipCrypto,
}

impl Encryption {
    /// Whether the payload is encrypted at all.
    pub fn is_encrypted(&self) -> bool {
        !matches!(self, Self::None)
    }
}

/// One record of the central directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArchiveEntry {
    /// Relative, forward-slash separated UTF-8 name. Directories end with `/`.
    pub name: String,
    /// The type of entry.
    pub kind: EntryKind,
    /// Uncompressed size in bytes.
    pub uncompressed_size: u64,
    /// Stored payload size in bytes, including any encryption overhead.
    pub compressed_size: u64,
    /// CRC-32 of the uncompressed data (zero for AE-2 entries).
    pub crc32: u32,
    /// Compression method applied before encryption.
    pub method: CompressionMethod,
    /// Encryption scheme.
    pub encryption: Encryption,
    /// Last modification time.
    pub modified: Option<SystemTime>,
    /// "Version made by" field; the high byte is the host system.
    pub version_made_by: u16,
    /// External file attributes (Unix mode in the high 16 bits).
    pub external_attributes: u32,
    /// General purpose bit flag as stored.
    pub flags: u16,
    /// Offset of the local file header in the archive.
    pub local_header_offset: u64,
    /// Per-entry comment.
    pub comment: String,
}

impl ArchiveEntry {
    fn new(name: String, kind: EntryKind, mode: u32) -> Self {
        Self {
            name,
            kind,
            uncompressed_size: 0,
            compressed_size: 0,
            crc32: 0,
            method: CompressionMethod::Stored,
            encryption: Encryption::None,
            modified: None,
            version_made_by: VERSION_MADE_BY,
            external_attributes: mode << 16,
            flags: 0,
            local_header_offset: 0,
            comment: String::new(),
        }
    }

    /// Create a new file entry.
    pub fn file(name: impl Into<String>, size: u64) -> Self {
        let mut entry = Self::new(name.into(), EntryKind::File, S_IFREG | 0o644);
        entry.uncompressed_size = size;
        entry.compressed_size = size;
        entry
    }

    /// Create a new directory entry. A trailing `/` is added if missing.
    pub fn directory(name: impl Into<String>) -> Self {
        let mut name = name.into();
        if !name.ends_with('/') {
            name.push('/');
        }
        let mut entry = Self::new(name, EntryKind::Directory, S_IFDIR | 0o755);
        entry.external_attributes |= DOS_DIRECTORY;
        entry
    }

    /// Create a new symlink entry whose payload is `target_len` bytes.
    pub fn symlink(name: impl Into<String>, target_len: u64) -> Self {
        let mut entry = Self::new(name.into(), EntryKind::Symlink, S_IFLNK | 0o777);
        entry.uncompressed_size = target_len;
        entry.compressed_size = target_len;
        entry
    }

    /// Check if this is a file.
    pub fn is_file(&self) -> bool {
        self.kind == EntryKind::File
    }

    /// Check if this is a directory.
    pub fn is_dir(&self) -> bool {
        self.kind == EntryKind::Directory
    }

    /// Check if this is a symlink.
    pub fn is_symlink(&self) -> bool {
        self.kind == EntryKind::Symlink
    }

    /// Check if the payload is encrypted.
    pub fn is_encrypted(&self) -> bool {
        self.encryption.is_encrypted()
    }

    /// Host system that produced the entry.
    pub fn host(&self) -> u8 {
        (self.version_made_by >> 8) as u8
    }

    /// Full Unix mode (type and permission bits), when the entry carries one.
    pub fn unix_mode(&self) -> Option<u32> {
        let mode = self.external_attributes >> 16;
        (self.host() == HOST_UNIX && mode != 0).then_some(mode)
    }

    /// Unix permission bits only.
    pub fn permissions(&self) -> Option<u32> {
        self.unix_mode().map(|mode| mode & 0o777)
    }

    /// Derive the entry kind from its name and attributes.
    pub fn classify(name: &str, version_made_by: u16, external_attributes: u32) -> EntryKind {
        let mode = external_attributes >> 16;
        let unix = (version_made_by >> 8) as u8 == HOST_UNIX;
        if name.ends_with('/') {
            EntryKind::Directory
        } else if unix && mode & S_IFMT == S_IFLNK {
            EntryKind::Symlink
        } else if (unix && mode & S_IFMT == S_IFDIR) || external_attributes & DOS_DIRECTORY != 0 {
            EntryKind::Directory
        } else {
            EntryKind::File
        }
    }

    /// Get the compression ratio (compressed/uncompressed).
    pub fn compression_ratio(&self) -> f64 {
        if self.uncompressed_size == 0 {
            1.0
        } else {
            self.compressed_size as f64 / self.uncompressed_size as f64
        }
    }

    /// Builder method to set compression method.
    pub fn with_method(mut self, method: CompressionMethod) -> Self {
        self.method = method;
        self
    }

    /// Builder method to set modification time.
    pub fn with_modified(mut self, time: SystemTime) -> Self {
        self.modified = Some(time);
        self
    }

    /// Builder method to set CRC-32.
    pub fn with_crc32(mut self, crc: u32) -> Self {
        self.crc32 = crc;
        self
    }

    /// Builder method to replace the Unix permission bits, keeping the type bits.
    pub fn with_permissions(mut self, perms: u32) -> Self {
        let mode = (self.external_attributes >> 16) & S_IFMT | perms & 0o7777;
        self.external_attributes = mode << 16 | self.external_attributes & 0xFFFF;
        self
    }

    /// Builder method to set encryption.
    pub fn with_encryption(mut self, encryption: Encryption) -> Self {
        self.encryption = encryption;
        self
    }
}

impl std::fmt::Display for ArchiveEntry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let type_char = match self.kind {
            EntryKind::Directory => 'd',
            EntryKind::Symlink => 'l',
            EntryKind::File => '-',
        };
        let lock = if self.is_encrypted() { '*' } else { ' ' };
        write!(
            f,
            "{}{}{:>10} {:>10} {:>8} {}",
            type_char, lock, self.uncompressed_size, self.compressed_size, self.method, self.name
        )
    }
}
