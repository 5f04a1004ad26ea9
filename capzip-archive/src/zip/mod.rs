//! ZIP archive format support.
//!
//! This module provides the codecs behind the archive writer and reader,
//! as specified in the PKWARE APPNOTE and the WinZip AES extension.

#[cfg(feature = "aes-crypto")]
pub mod aes;
pub mod compression;
pub mod crypto;
pub mod header;

pub use compression::{CompressionLevel, compress, compress_for_level, decompress, decompress_to};
pub use header::{
    AesExtraField, CentralDirectory, DataDescriptor, EndOfCentralDirectory, LocalFileHeader,
    write_central_directory, write_central_directory_with,
};
