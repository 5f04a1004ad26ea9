//! Error types for capzip operations.
//!
//! Every failure an operation can report maps onto one [`ErrorKind`]. The
//! `Io` variant only exists so codecs can use `?` on `std::io` calls; the
//! `zip`/`unzip` boundaries rewrite it into one of the reportable kinds with
//! [`ZipError::on_read`] / [`ZipError::on_write`].

use std::fmt;
use std::io;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// The reportable failure categories.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// The source path (file, directory or archive) does not exist or cannot be read.
    SourceNotFound,
    /// The destination cannot be created or written.
    DestinationUnwritable,
    /// The archive structure is corrupt, truncated or inconsistent.
    MalformedArchive,
    /// An entry name would escape the extraction root.
    UnsafeEntryPath,
    /// An encrypted entry was found but no password was supplied.
    PasswordRequired,
    /// The supplied password does not verify.
    WrongPassword,
    /// Entry payload does not match its stored checksum or size.
    ChecksumMismatch,
    /// The archive uses a feature this engine does not implement.
    UnsupportedFeature,
    /// Advisory: an entry uses legacy ZipCrypto. Never returned as an error.
    WeakEncryption,
    /// The operation was cancelled by the caller.
    Cancelled,
}

impl ErrorKind {
    /// Stable identifier for the kind.
    pub fn name(self) -> &'static str {
        match self {
            Self::SourceNotFound => "SourceNotFound",
            Self::DestinationUnwritable => "DestinationUnwritable",
            Self::MalformedArchive => "MalformedArchive",
            Self::UnsafeEntryPath => "UnsafeEntryPath",
            Self::PasswordRequired => "PasswordRequired",
            Self::WrongPassword => "WrongPassword",
            Self::ChecksumMismatch => "ChecksumMismatch",
            Self::UnsupportedFeature => "UnsupportedFeature",
            Self::WeakEncryption => "WeakEncryption",
            Self::Cancelled => "Cancelled",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// The main error type for capzip operations.
#[derive(Debug, Error)]
pub enum ZipError {
    /// Source path missing or unreadable.
    #[error("Source path does not exist: {}", .path.display())]
    SourceNotFound {
        /// The path that could not be found or opened.
        path: PathBuf,
    },

    /// Destination could not be created or written.
    #[error("Destination is not writable: {}: {source}", .path.display())]
    DestinationUnwritable {
        /// The path that could not be written.
        path: PathBuf,
        /// Underlying cause.
        source: io::Error,
    },

    /// Corrupt or inconsistent archive structure.
    #[error("Malformed archive: {message}")]
    MalformedArchive {
        /// Description of the inconsistency.
        message: String,
    },

    /// Entry name rejected by the path sanitizer.
    #[error("Unsafe entry path '{entry}': {reason}")]
    UnsafeEntryPath {
        /// The entry name as stored in the archive.
        entry: String,
        /// Why the name was rejected.
        reason: &'static str,
    },

    /// Encrypted entry without a password.
    #[error("Entry '{entry}' is encrypted and no password was given")]
    PasswordRequired {
        /// The encrypted entry.
        entry: String,
    },

    /// Password verification or authentication failed.
    #[error("Wrong password for entry '{entry}'")]
    WrongPassword {
        /// The entry whose verification failed.
        entry: String,
    },

    /// Payload integrity check failed.
    #[error("Checksum mismatch in entry '{entry}': expected {expected:#010x}, computed {computed:#010x}")]
    ChecksumMismatch {
        /// The entry being decoded.
        entry: String,
        /// CRC-32 stored in the archive.
        expected: u32,
        /// CRC-32 of the bytes actually decoded.
        computed: u32,
    },

    /// Feature outside the engine's capabilities.
    #[error("Unsupported feature: {feature}")]
    UnsupportedFeature {
        /// Name of the missing feature.
        feature: String,
    },

    /// Cancelled between entries.
    #[error("Operation cancelled")]
    Cancelled,

    /// Raw I/O error, only seen below the operation boundary.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

/// Result type alias for capzip operations.
pub type Result<T> = std::result::Result<T, ZipError>;

impl ZipError {
    /// Create a source-not-found error.
    pub fn source_not_found(path: impl Into<PathBuf>) -> Self {
        Self::SourceNotFound { path: path.into() }
    }

    /// Create a destination-unwritable error.
    pub fn unwritable(path: impl Into<PathBuf>, source: io::Error) -> Self {
        Self::DestinationUnwritable {
            path: path.into(),
            source,
        }
    }

    /// Create a malformed-archive error.
    pub fn malformed(message: impl Into<String>) -> Self {
        Self::MalformedArchive {
            message: message.into(),
        }
    }

    /// Create an unsafe-path error.
    pub fn unsafe_path(entry: impl Into<String>, reason: &'static str) -> Self {
        Self::UnsafeEntryPath {
            entry: entry.into(),
            reason,
        }
    }

    /// Create a password-required error.
    pub fn password_required(entry: impl Into<String>) -> Self {
        Self::PasswordRequired {
            entry: entry.into(),
        }
    }

    /// Create a wrong-password error.
    pub fn wrong_password(entry: impl Into<String>) -> Self {
        Self::WrongPassword {
            entry: entry.into(),
        }
    }

    /// Create a checksum-mismatch error.
    pub fn checksum_mismatch(entry: impl Into<String>, expected: u32, computed: u32) -> Self {
        Self::ChecksumMismatch {
            entry: entry.into(),
            expected,
            computed,
        }
    }

    /// Create an unsupported-feature error.
    pub fn unsupported(feature: impl Into<String>) -> Self {
        Self::UnsupportedFeature {
            feature: feature.into(),
        }
    }

    /// The reportable kind of this error.
    ///
    /// A stray `Io` is classified as `MalformedArchive` when it signals
    /// truncated or invalid data and as `DestinationUnwritable` otherwise.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::SourceNotFound { .. } => ErrorKind::SourceNotFound,
            Self::DestinationUnwritable { .. } => ErrorKind::DestinationUnwritable,
            Self::MalformedArchive { .. } => ErrorKind::MalformedArchive,
            Self::UnsafeEntryPath { .. } => ErrorKind::UnsafeEntryPath,
            Self::PasswordRequired { .. } => ErrorKind::PasswordRequired,
            Self::WrongPassword { .. } => ErrorKind::WrongPassword,
            Self::ChecksumMismatch { .. } => ErrorKind::ChecksumMismatch,
            Self::UnsupportedFeature { .. } => ErrorKind::UnsupportedFeature,
            Self::Cancelled => ErrorKind::Cancelled,
            Self::Io(err) if is_data_error(err) => ErrorKind::MalformedArchive,
            Self::Io(_) => ErrorKind::DestinationUnwritable,
        }
    }

    /// Interpret a stray I/O error raised while reading `archive`.
    pub fn on_read(self, archive: &Path) -> Self {
        match self {
            Self::Io(err) if is_data_error(&err) => Self::malformed(err.to_string()),
            Self::Io(err) if err.kind() == io::ErrorKind::NotFound => {
                Self::source_not_found(archive)
            }
            Self::Io(err) => Self::malformed(format!("{}: {err}", archive.display())),
            other => other,
        }
    }

    /// Interpret a stray I/O error raised while writing `destination`.
    pub fn on_write(self, destination: &Path) -> Self {
        match self {
            Self::Io(err) => Self::unwritable(destination, err),
            other => other,
        }
    }
}

fn is_data_error(err: &io::Error) -> bool {
    matches!(
        err.kind(),
        io::ErrorKind::UnexpectedEof | io::ErrorKind::InvalidData | io::ErrorKind::InvalidInput
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = ZipError::checksum_mismatch("a.txt", 0x12345678, 0xDEADBEEF);
        assert!(err.to_string().contains("Checksum mismatch"));
        assert!(err.to_string().contains("a.txt"));

        let err = ZipError::unsafe_path("../../evil", "parent directory segment");
        assert!(err.to_string().contains("../../evil"));
    }

    #[test]
    fn test_kinds() {
        assert_eq!(
            ZipError::wrong_password("x").kind(),
            ErrorKind::WrongPassword
        );
        assert_eq!(ZipError::Cancelled.kind(), ErrorKind::Cancelled);
        assert_eq!(ErrorKind::PasswordRequired.to_string(), "PasswordRequired");
    }

    #[test]
    fn test_io_error_conversion() {
        let io_err = io::Error::new(io::ErrorKind::NotFound, "file not found");
        let err: ZipError = io_err.into();
        assert!(matches!(err, ZipError::Io(_)));
    }

    #[test]
    fn test_boundary_rewrites_io() {
        let eof: ZipError = io::Error::from(io::ErrorKind::UnexpectedEof).into();
        assert_eq!(eof.kind(), ErrorKind::MalformedArchive);
        let err = eof.on_read(Path::new("a.zip"));
        assert!(matches!(err, ZipError::MalformedArchive { .. }));

        let denied: ZipError = io::Error::from(io::ErrorKind::PermissionDenied).into();
        let err = denied.on_write(Path::new("out.zip"));
        assert!(matches!(err, ZipError::DestinationUnwritable { .. }));

        let untouched = ZipError::wrong_password("a").on_write(Path::new("out"));
        assert_eq!(untouched.kind(), ErrorKind::WrongPassword);
    }
}
