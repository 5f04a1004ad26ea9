//! Call payloads as the host sends them.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Arguments of a `zip` call.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ZipRequest {
    /// File or directory to archive.
    #[serde(default)]
    pub source: String,
    /// Archive to create.
    #[serde(default)]
    pub destination: String,
    /// Encrypt entries with AES-256 when set and non-empty.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub password: Option<String>,
}

/// Arguments of an `unzip` call.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UnzipRequest {
    /// Archive to extract.
    #[serde(default)]
    pub source: String,
    /// Directory to extract into.
    #[serde(default)]
    pub destination: String,
    /// Password for encrypted entries.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub password: Option<String>,
}

macro_rules! request_builders {
    ($ty:ty) => {
        impl $ty {
            /// Create a request without a password.
            pub fn new(source: impl Into<String>, destination: impl Into<String>) -> Self {
                Self {
                    source: source.into(),
                    destination: destination.into(),
                    password: None,
                }
            }

            /// Set the password.
            pub fn password(mut self, password: impl Into<String>) -> Self {
                self.password = Some(password.into());
                self
            }
        }
    };
}

request_builders!(ZipRequest);
request_builders!(UnzipRequest);

/// Turn a host path or `file://` URL into a filesystem path.
pub(crate) fn host_path(raw: &str) -> PathBuf {
    PathBuf::from(raw.strip_prefix("file://").unwrap_or(raw))
}

/// A missing or empty password means none.
pub(crate) fn effective_password(password: Option<&str>) -> Option<&str> {
    password.filter(|p| !p.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::Path;

    #[test]
    fn test_file_urls_are_stripped() {
        assert_eq!(host_path("file:///data/a.zip"), Path::new("/data/a.zip"));
        assert_eq!(host_path("/data/a.zip"), Path::new("/data/a.zip"));
    }

    #[test]
    fn test_empty_password_is_none() {
        assert_eq!(effective_password(Some("")), None);
        assert_eq!(effective_password(None), None);
        assert_eq!(effective_password(Some("pw")), Some("pw"));
    }
}
