//! Non-fatal advisories collected during an operation.

use crate::error::ErrorKind;
use std::fmt;

/// An advisory reported alongside a successful operation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Warning {
    /// Entry was protected with legacy ZipCrypto, which is cryptographically weak.
    WeakEncryption {
        /// The affected entry.
        entry: String,
    },
    /// Symlink entry was not materialized.
    SymlinkSkipped {
        /// The affected entry.
        entry: String,
    },
}

impl Warning {
    /// The entry this warning refers to.
    pub fn entry(&self) -> &str {
        match self {
            Self::WeakEncryption { entry } | Self::SymlinkSkipped { entry } => entry,
        }
    }

    /// The error kind this advisory corresponds to, if any.
    pub fn kind(&self) -> Option<ErrorKind> {
        match self {
            Self::WeakEncryption { .. } => Some(ErrorKind::WeakEncryption),
            Self::SymlinkSkipped { .. } => None,
        }
    }
}

impl fmt::Display for Warning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::WeakEncryption { entry } => {
                write!(f, "entry '{entry}' uses weak legacy ZipCrypto encryption")
            }
            Self::SymlinkSkipped { entry } => write!(f, "symlink entry '{entry}' was skipped"),
        }
    }
}
