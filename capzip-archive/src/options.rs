//! Options for [`zip`](crate::writer::zip) and [`unzip`](crate::reader::unzip).

use crate::zip::CompressionLevel;
use capzip_core::CancellationToken;

/// What to do with symlink entries when extracting.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SymlinkPolicy {
    /// Recreate them on Unix when the target stays inside the destination.
    #[default]
    Restore,
    /// Leave them out and report a warning.
    Skip,
}

/// Settings for creating an archive.
#[derive(Debug, Clone)]
pub struct ZipOptions {
    /// Encrypt every file with AES-256 under this password.
    pub password: Option<String>,
    /// Compression level. Store is used per entry whenever deflate does not help.
    pub compression: CompressionLevel,
    /// Prefix entry names with the source directory's own name.
    pub include_root: bool,
    /// Prepare entries on the rayon pool when the `parallel` feature is on.
    pub parallel: bool,
    /// Checked between entries.
    pub cancel_token: Option<CancellationToken>,
}

impl Default for ZipOptions {
    fn default() -> Self {
        Self {
            password: None,
            compression: CompressionLevel::default(),
            include_root: false,
            parallel: true,
            cancel_token: None,
        }
    }
}

impl ZipOptions {
    /// Set the password. An empty string means no encryption.
    pub fn password(mut self, password: impl Into<String>) -> Self {
        let password = password.into();
        self.password = (!password.is_empty()).then_some(password);
        self
    }

    /// Set the compression level.
    pub fn compression(mut self, level: CompressionLevel) -> Self {
        self.compression = level;
        self
    }

    /// Prefix entries with the source directory name.
    pub fn include_root(mut self, include: bool) -> Self {
        self.include_root = include;
        self
    }

    /// Enable or disable parallel entry preparation.
    pub fn parallel(mut self, parallel: bool) -> Self {
        self.parallel = parallel;
        self
    }

    /// Attach a cancellation token.
    pub fn cancel_token(mut self, token: CancellationToken) -> Self {
        self.cancel_token = Some(token);
        self
    }
}

/// Settings for extracting an archive.
#[derive(Debug, Clone)]
pub struct UnzipOptions {
    /// Password for encrypted entries.
    pub password: Option<String>,
    /// Apply stored Unix permission bits.
    pub restore_permissions: bool,
    /// Apply stored modification times.
    pub restore_modified: bool,
    /// Symlink handling.
    pub symlinks: SymlinkPolicy,
    /// Checked between entries.
    pub cancel_token: Option<CancellationToken>,
}

impl Default for UnzipOptions {
    fn default() -> Self {
        Self {
            password: None,
            restore_permissions: true,
            restore_modified: true,
            symlinks: SymlinkPolicy::default(),
            cancel_token: None,
        }
    }
}

impl UnzipOptions {
    /// Set the password. An empty string means none.
    pub fn password(mut self, password: impl Into<String>) -> Self {
        let password = password.into();
        self.password = (!password.is_empty()).then_some(password);
        self
    }

    /// Restore Unix permission bits.
    pub fn restore_permissions(mut self, restore: bool) -> Self {
        self.restore_permissions = restore;
        self
    }

    /// Restore modification times.
    pub fn restore_modified(mut self, restore: bool) -> Self {
        self.restore_modified = restore;
        self
    }

    /// Set the symlink policy.
    pub fn symlinks(mut self, policy: SymlinkPolicy) -> Self {
        self.symlinks = policy;
        self
    }

    /// Attach a cancellation token.
    pub fn cancel_token(mut self, token: CancellationToken) -> Self {
        self.cancel_token = Some(token);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_password_is_none() {
        assert_eq!(ZipOptions::default().password("").password, None);
        assert_eq!(
            UnzipOptions::default().password("pw").password.as_deref(),
            Some("pw")
        );
    }

    #[test]
    fn test_defaults() {
        let zip = ZipOptions::default();
        assert_eq!(zip.compression, CompressionLevel::Normal);
        assert!(!zip.include_root);
        assert!(zip.parallel);

        let unzip = UnzipOptions::default();
        assert!(unzip.restore_permissions && unzip.restore_modified);
        assert_eq!(unzip.symlinks, SymlinkPolicy::Restore);
    }
}
