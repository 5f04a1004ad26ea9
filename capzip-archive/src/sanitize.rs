//! Entry path sanitizing ("zip slip" protection).
//!
//! Every entry name is resolved against the canonical extraction root
//! before anything touches the filesystem. Names are split on both `/` and
//! `\`; empty and `.` segments are dropped; `..` segments, absolute paths
//! and drive prefixes are rejected outright instead of being folded away,
//! so a hostile name fails loudly rather than landing somewhere unexpected.

use capzip_core::{Result, ZipError};
use std::fs;
use std::path::{Path, PathBuf};

/// Destination root of an extraction, absolute and canonicalized.
#[derive(Debug, Clone)]
pub struct ExtractionTarget {
    root: PathBuf,
}

impl ExtractionTarget {
    /// Create `path` if needed and canonicalize it.
    pub fn create(path: &Path) -> Result<Self> {
        fs::create_dir_all(path).map_err(|e| ZipError::unwritable(path, e))?;
        let root = fs::canonicalize(path).map_err(|e| ZipError::unwritable(path, e))?;
        Ok(Self { root })
    }

    /// The canonical root.
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Resolve an entry name inside this root.
    pub fn resolve(&self, entry_name: &str) -> Result<PathBuf> {
        resolve(entry_name, &self.root)
    }

    /// Resolve the target of a symlink entry stored at `link`.
    ///
    /// The target must be relative and stay inside the root. `..` is only
    /// accepted at the start of the target, where it walks up through real
    /// directories this extraction created.
    pub fn resolve_link_target(&self, entry_name: &str, link: &Path, target: &str) -> Result<PathBuf> {
        let target = target.replace('\\', "/");
        if target.is_empty() {
            return Err(ZipError::unsafe_path(entry_name, "empty symlink target"));
        }
        if target.contains('\0') {
            return Err(ZipError::unsafe_path(entry_name, "NUL byte in symlink target"));
        }
        if target.starts_with('/') || has_drive_prefix(&target) {
            return Err(ZipError::unsafe_path(entry_name, "absolute symlink target"));
        }

        let mut resolved = link
            .parent()
            .map(Path::to_path_buf)
            .unwrap_or_else(|| self.root.clone());
        let mut descended = false;
        for segment in target.split('/') {
            match segment {
                "" | "." => {}
                ".." if descended => {
                    return Err(ZipError::unsafe_path(
                        entry_name,
                        "symlink target climbs out of a subdirectory",
                    ));
                }
                ".." => {
                    if resolved == self.root {
                        return Err(ZipError::unsafe_path(
                            entry_name,
                            "symlink target escapes the destination",
                        ));
                    }
                    resolved.pop();
                }
                part => {
                    descended = true;
                    resolved.push(part);
                }
            }
        }

        if !resolved.starts_with(&self.root) {
            return Err(ZipError::unsafe_path(
                entry_name,
                "symlink target escapes the destination",
            ));
        }
        Ok(resolved)
    }

    /// Fail if any directory between the root and `path` is a symlink.
    ///
    /// `path` itself is not checked: a replaced symlink is unlinked by the
    /// final rename, never written through.
    pub fn ensure_no_symlink_ancestors(&self, entry_name: &str, path: &Path) -> Result<()> {
        let Ok(relative) = path.strip_prefix(&self.root) else {
            return Err(ZipError::unsafe_path(entry_name, "path escapes the destination"));
        };
        let mut current = self.root.clone();
        let mut components = relative.components().peekable();
        while let Some(component) = components.next() {
            if components.peek().is_none() {
                break;
            }
            current.push(component);
            match fs::symlink_metadata(&current) {
                Ok(meta) if meta.file_type().is_symlink() => {
                    return Err(ZipError::unsafe_path(
                        entry_name,
                        "path passes through an existing symlink",
                    ));
                }
                Ok(_) => {}
                // Nothing below a missing directory can be a symlink yet.
                Err(_) => break,
            }
        }
        Ok(())
    }
}

fn has_drive_prefix(name: &str) -> bool {
    let bytes = name.as_bytes();
    bytes.len() >= 2 && bytes[0].is_ascii_alphabetic() && bytes[1] == b':'
}

/// Resolve `entry_name` against `root`, failing with
/// [`ZipError::UnsafeEntryPath`] when it could escape.
pub fn resolve(entry_name: &str, root: &Path) -> Result<PathBuf> {
    let normalized = entry_name.replace('\\', "/");
    if normalized.is_empty() {
        return Err(ZipError::unsafe_path(entry_name, "empty name"));
    }
    if normalized.contains('\0') {
        return Err(ZipError::unsafe_path(entry_name, "NUL byte in name"));
    }
    if normalized.starts_with('/') {
        return Err(ZipError::unsafe_path(entry_name, "absolute path"));
    }
    if has_drive_prefix(&normalized) {
        return Err(ZipError::unsafe_path(entry_name, "drive letter prefix"));
    }

    let mut resolved = root.to_path_buf();
    let mut segments = 0;
    for segment in normalized.split('/') {
        match segment {
            "" | "." => continue,
            ".." => return Err(ZipError::unsafe_path(entry_name, "parent directory segment")),
            part => resolved.push(part),
        }
        segments += 1;
    }

    if segments == 0 {
        return Err(ZipError::unsafe_path(entry_name, "name has no path segments"));
    }
    if !resolved.starts_with(root) {
        return Err(ZipError::unsafe_path(entry_name, "path escapes the destination"));
    }
    Ok(resolved)
}

#[cfg(test)]
mod tests {
    use super::*;
    use capzip_core::ErrorKind;

    fn test_base_path() -> &'static Path {
        if cfg!(windows) {
            Path::new("C:/opt/myapp")
        } else {
            Path::new("/opt/myapp")
        }
    }

    fn rejected(name: &str) -> bool {
        matches!(
            resolve(name, test_base_path()),
            Err(ZipError::UnsafeEntryPath { .. })
        )
    }

    #[test]
    fn test_basic_resolution() {
        let resolved = resolve("sub/b.txt", test_base_path()).unwrap();
        assert_eq!(resolved, test_base_path().join("sub").join("b.txt"));

        let resolved = resolve("./a//b/./c.txt", test_base_path()).unwrap();
        assert_eq!(resolved, test_base_path().join("a").join("b").join("c.txt"));

        let resolved = resolve("dir/", test_base_path()).unwrap();
        assert_eq!(resolved, test_base_path().join("dir"));
    }

    #[test]
    fn test_zip_slip_rejected() {
        assert!(rejected("../../evil"));
        assert!(rejected("a/../../evil"));
        assert!(rejected("a\\..\\..\\evil"));
        assert!(rejected("ok/.."));
    }

    #[test]
    fn test_absolute_names_rejected() {
        assert!(rejected("/etc/passwd"));
        assert!(rejected("\\windows\\system32"));
        assert!(rejected("C:\\evil.txt"));
        assert!(rejected("c:evil.txt"));
    }

    #[test]
    fn test_degenerate_names_rejected() {
        assert!(rejected(""));
        assert!(rejected("./"));
        assert!(rejected("a\0b"));
        let err = resolve("", test_base_path()).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::UnsafeEntryPath);
    }

    #[test]
    fn test_symlink_targets() {
        let target = ExtractionTarget {
            root: test_base_path().to_path_buf(),
        };
        let link = test_base_path().join("bin").join("tool");

        let resolved = target.resolve_link_target("bin/tool", &link, "../lib/tool").unwrap();
        assert_eq!(resolved, test_base_path().join("lib").join("tool"));

        assert!(target.resolve_link_target("bin/tool", &link, "../../etc").is_err());
        assert!(target.resolve_link_target("bin/tool", &link, "/etc/passwd").is_err());
        assert!(target.resolve_link_target("bin/tool", &link, "x/../y").is_err());
        assert!(target.resolve_link_target("bin/tool", &link, "").is_err());
    }

    #[cfg(unix)]
    #[test]
    fn test_symlink_ancestor_detected() {
        let dir = tempfile::tempdir().unwrap();
        let outside = tempfile::tempdir().unwrap();
        let target = ExtractionTarget::create(dir.path()).unwrap();
        std::os::unix::fs::symlink(outside.path(), target.root().join("escape")).unwrap();

        let through = target.resolve("escape/file.txt").unwrap();
        let err = target
            .ensure_no_symlink_ancestors("escape/file.txt", &through)
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::UnsafeEntryPath);

        let plain = target.resolve("real/file.txt").unwrap();
        assert!(target.ensure_no_symlink_ancestors("real/file.txt", &plain).is_ok());
        let replaced = target.resolve("escape").unwrap();
        assert!(target.ensure_no_symlink_ancestors("escape", &replaced).is_ok());
    }
}
