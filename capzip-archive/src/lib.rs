//! # capzip archive
//!
//! ZIP container support for capzip:
//!
//! - [`zip`](mod@zip): headers, store/deflate codecs, WinZip AES and legacy
//!   ZipCrypto decryption
//! - [`writer`]: [`ArchiveWriter`] and the directory-tree [`zip`](fn@zip) operation
//! - [`reader`]: [`ZipArchive`] and the [`unzip`] operation
//! - [`sanitize`]: entry path resolution against the extraction root
//!
//! ## Example
//!
//! ```rust,no_run
//! use capzip_archive::{UnzipOptions, ZipOptions, unzip, zip};
//! use std::path::Path;
//!
//! let options = ZipOptions::default().password("hunter2");
//! zip(Path::new("docs"), Path::new("out/docs.zip"), &options).unwrap();
//!
//! let report = unzip(
//!     Path::new("out/docs.zip"),
//!     Path::new("restored"),
//!     &UnzipOptions::default().password("hunter2"),
//! )
//! .unwrap();
//! println!("{} entries", report.entries);
//! ```
//!
//! ## Features
//!
//! - `aes-crypto` (default): AES-256 encryption on write, AES-128/192/256 on read
//! - `parallel` (default): prepare small entries on the rayon thread pool

#![warn(missing_docs)]
#![warn(clippy::all)]
#![allow(clippy::module_name_repetitions)]

pub mod options;
pub mod reader;
pub mod sanitize;
pub mod writer;
pub mod zip;

// Re-exports
pub use options::{SymlinkPolicy, UnzipOptions, ZipOptions};
pub use reader::{ReadStage, UnzipReport, ZipArchive, unzip};
pub use sanitize::ExtractionTarget;
pub use writer::{ArchiveWriter, PreparedEntry, WriteStage, ZipReport, zip};
pub use zip::CompressionLevel;

/// Whether this build can read and write AES-encrypted entries.
pub fn supports_encryption() -> bool {
    cfg!(feature = "aes-crypto")
}
