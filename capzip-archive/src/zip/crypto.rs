//! ZIP Traditional (PKWARE) decryption.
//!
//! **Security Warning**: ZipCrypto is cryptographically weak and falls to
//! known-plaintext attacks. It is supported for reading legacy archives only;
//! every entry decrypted this way produces a
//! [`Warning::WeakEncryption`](capzip_core::Warning::WeakEncryption) advisory.
//!
//! The cipher keeps three 32-bit keys seeded from the password. Each entry
//! starts with a 12-byte encrypted header whose last byte is a check byte:
//! the high byte of the CRC-32, or of the DOS modification time when the
//! sizes live in a data descriptor.

use capzip_core::{Result, ZipError};
use std::io::{self, Read};

const INITIAL_KEYS: [u32; 3] = [0x12345678, 0x23456789, 0x34567890];

/// Size of the encryption header in bytes.
pub const ENCRYPTION_HEADER_SIZE: usize = 12;

/// One raw CRC-32 table step, without the pre and post inversion.
#[inline]
fn crc32_update(crc: u32, byte: u8) -> u32 {
    let mut hasher = crc32fast::Hasher::new_with_initial(!crc);
    hasher.update(&[byte]);
    !hasher.finalize()
}

/// ZipCrypto key state.
#[derive(Debug, Clone)]
pub struct ZipCrypto {
    keys: [u32; 3],
}

impl ZipCrypto {
    /// Initialize the keys from a password.
    #[must_use]
    pub fn new(password: &[u8]) -> Self {
        let mut cipher = Self { keys: INITIAL_KEYS };
        for &byte in password {
            cipher.update_keys(byte);
        }
        cipher
    }

    #[inline]
    fn update_keys(&mut self, byte: u8) {
        let [k0, k1, k2] = &mut self.keys;
        *k0 = crc32_update(*k0, byte);
        *k1 = k1
            .wrapping_add(*k0 & 0xFF)
            .wrapping_mul(134775813)
            .wrapping_add(1);
        *k2 = crc32_update(*k2, (*k1 >> 24) as u8);
    }

    #[inline]
    fn stream_byte(&self) -> u8 {
        let temp = (self.keys[2] | 2) as u16;
        (temp.wrapping_mul(temp ^ 1) >> 8) as u8
    }

    /// Decrypt a single byte.
    #[inline]
    pub fn decrypt_byte(&mut self, byte: u8) -> u8 {
        let plain = byte ^ self.stream_byte();
        self.update_keys(plain);
        plain
    }

    /// Decrypt a buffer in place.
    pub fn decrypt_buffer(&mut self, buffer: &mut [u8]) {
        for byte in buffer.iter_mut() {
            *byte = self.decrypt_byte(*byte);
        }
    }

    #[cfg(test)]
    fn encrypt_byte(&mut self, byte: u8) -> u8 {
        let cipher = byte ^ self.stream_byte();
        self.update_keys(byte);
        cipher
    }
}

/// Decrypting reader for one ZipCrypto entry.
pub struct ZipCryptoReader<R: Read> {
    inner: R,
    cipher: ZipCrypto,
}

impl<R: Read> ZipCryptoReader<R> {
    /// Consume and check the 12-byte header.
    ///
    /// `check_byte` is the expected last header byte. A mismatch means the
    /// password is wrong.
    pub fn open(mut inner: R, name: &str, password: &[u8], check_byte: u8) -> Result<Self> {
        let mut cipher = ZipCrypto::new(password);
        let mut header = [0u8; ENCRYPTION_HEADER_SIZE];
        inner.read_exact(&mut header)?;
        cipher.decrypt_buffer(&mut header);

        if header[ENCRYPTION_HEADER_SIZE - 1] != check_byte {
            return Err(ZipError::wrong_password(name));
        }
        Ok(Self { inner, cipher })
    }
}

impl<R: Read> Read for ZipCryptoReader<R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let n = self.inner.read(buf)?;
        self.cipher.decrypt_buffer(&mut buf[..n]);
        Ok(n)
    }
}

/// Expected header check byte for an entry.
pub fn check_byte(crc32: u32, dos_time: u16, has_data_descriptor: bool) -> u8 {
    if has_data_descriptor {
        (dos_time >> 8) as u8
    } else {
        (crc32 >> 24) as u8
    }
}

/// Encrypt `data` the way legacy tools do. Test fixtures only.
#[cfg(test)]
pub(crate) fn encrypt_for_tests(password: &[u8], check: u8, data: &[u8]) -> Vec<u8> {
    let mut cipher = ZipCrypto::new(password);
    let mut out = Vec::with_capacity(ENCRYPTION_HEADER_SIZE + data.len());
    for i in 0..ENCRYPTION_HEADER_SIZE - 1 {
        out.push(cipher.encrypt_byte(0x5A ^ i as u8));
    }
    out.push(cipher.encrypt_byte(check));
    for &byte in data {
        out.push(cipher.encrypt_byte(byte));
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use capzip_core::ErrorKind;

    #[test]
    fn test_initial_keys() {
        assert_eq!(ZipCrypto::new(b"").keys, INITIAL_KEYS);
        assert_ne!(ZipCrypto::new(b"test").keys, INITIAL_KEYS);
    }

    #[test]
    fn test_crc32_step_chains_to_standard_crc() {
        // With the pre/post inversion applied here, chained steps give the standard CRC-32.
        assert_eq!(!crc32_update(!0, b'a'), 0xE8B7BE43);
        let raw = b"hello world".iter().fold(!0u32, |crc, &b| crc32_update(crc, b));
        assert_eq!(!raw, 0x0D4A1185);
    }

    #[test]
    fn test_reader_roundtrip() {
        let encrypted = encrypt_for_tests(b"legacy", 0xAB, b"old secrets");
        let mut reader = ZipCryptoReader::open(&encrypted[..], "x", b"legacy", 0xAB).unwrap();
        let mut out = Vec::new();
        reader.read_to_end(&mut out).unwrap();
        assert_eq!(out, b"old secrets");
    }

    #[test]
    fn test_wrong_check_byte() {
        let encrypted = encrypt_for_tests(b"legacy", 0xAB, b"old secrets");
        let err = ZipCryptoReader::open(&encrypted[..], "x", b"legacy", 0xAC)
            .err()
            .unwrap();
        assert_eq!(err.kind(), ErrorKind::WrongPassword);
    }

    #[test]
    fn test_check_byte_source() {
        assert_eq!(check_byte(0x12345678, 0xABCD, false), 0x12);
        assert_eq!(check_byte(0x12345678, 0xABCD, true), 0xAB);
    }
}
