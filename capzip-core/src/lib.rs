//! # capzip core
//!
//! Shared building blocks for the capzip ZIP engine:
//!
//! - [`entry`]: archive entry metadata
//! - [`crc`]: CRC-32 checksum
//! - [`error`]: error kinds and the [`ZipError`] type
//! - [`warning`]: non-fatal advisories
//! - [`cancel`]: caller-driven cancellation
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────┐
//! │ capzip: plugin surface                                  │
//! │     zip / unzip / getPluginVersion, async wrappers      │
//! ├─────────────────────────────────────────────────────────┤
//! │ capzip-archive: container                               │
//! │     writer, reader, sanitizer, codecs                   │
//! ├─────────────────────────────────────────────────────────┤
//! │ capzip-core (this crate)                                │
//! │     entries, CRC, errors, cancellation                  │
//! └─────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Example
//!
//! ```rust
//! use capzip_core::crc::Crc32;
//! use capzip_core::entry::ArchiveEntry;
//!
//! let entry = ArchiveEntry::file("notes.txt", 11).with_crc32(Crc32::compute(b"hello world"));
//! assert_eq!(entry.crc32, 0x0D4A1185);
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![allow(clippy::module_name_repetitions)]

pub mod cancel;
pub mod crc;
pub mod entry;
pub mod error;
pub mod warning;

// Re-exports for convenience
pub use cancel::CancellationToken;
pub use crc::Crc32;
pub use entry::{AesStrength, ArchiveEntry, CompressionMethod, Encryption, EntryKind};
pub use error::{ErrorKind, Result, ZipError};
pub use warning::Warning;

/// Prelude module for convenient imports.
pub mod prelude {
    pub use crate::cancel::CancellationToken;
    pub use crate::crc::Crc32;
    pub use crate::entry::{ArchiveEntry, CompressionMethod, Encryption, EntryKind};
    pub use crate::error::{ErrorKind, Result, ZipError};
    pub use crate::warning::Warning;
}
