//! WinZip AES encryption (AE-1 / AE-2).
//!
//! An encrypted payload is laid out as
//!
//! ```text
//! salt (8/12/16) | password verifier (2) | AES-CTR ciphertext | HMAC-SHA1 code (10)
//! ```
//!
//! Keys come from PBKDF2-HMAC-SHA1 over the password and salt with 1000
//! iterations, producing the AES key, the HMAC key and the verifier in that
//! order. The CTR counter is a 128-bit little-endian block starting at 1.
//! The HMAC covers the ciphertext and is always checked before any
//! plaintext is handed out.

use aes::{Aes128, Aes192, Aes256};
use capzip_core::{AesStrength, Result, ZipError};
use ctr::Ctr128LE;
use ctr::cipher::{KeyIvInit, StreamCipher};
use hmac::{Hmac, Mac};
use rand::RngCore;
use sha1::Sha1;
use std::io::{self, Read, Write};

type HmacSha1 = Hmac<Sha1>;

/// PBKDF2 iteration count fixed by the WinZip format.
pub const PBKDF2_ITERATIONS: u32 = 1000;

/// Password verification value length.
pub const PASSWORD_VERIFICATION_LEN: usize = 2;

/// HMAC-SHA1 authentication code length (10 bytes for WinZip).
pub const AUTH_CODE_LEN: usize = 10;

/// Strength used for new archives.
pub const WRITE_STRENGTH: AesStrength = AesStrength::Aes256;

/// Vendor version used for new archives (AE-2, CRC field zeroed).
pub const WRITE_VENDOR_VERSION: u16 = 2;

/// Bytes encryption adds around a payload of the given strength.
pub fn overhead(strength: AesStrength) -> u64 {
    (strength.salt_len() + PASSWORD_VERIFICATION_LEN + AUTH_CODE_LEN) as u64
}

enum AesCtr {
    Aes128(Ctr128LE<Aes128>),
    Aes192(Ctr128LE<Aes192>),
    Aes256(Ctr128LE<Aes256>),
}

impl AesCtr {
    fn new(strength: AesStrength, key: &[u8]) -> Result<Self> {
        let mut iv = [0u8; 16];
        iv[0] = 1;
        let cipher = match strength {
            AesStrength::Aes128 => Ctr128LE::<Aes128>::new_from_slices(key, &iv).map(Self::Aes128),
            AesStrength::Aes192 => Ctr128LE::<Aes192>::new_from_slices(key, &iv).map(Self::Aes192),
            AesStrength::Aes256 => Ctr128LE::<Aes256>::new_from_slices(key, &iv).map(Self::Aes256),
        };
        cipher.map_err(|_| ZipError::malformed("invalid AES key length"))
    }

    fn apply(&mut self, buf: &mut [u8]) {
        match self {
            Self::Aes128(c) => c.apply_keystream(buf),
            Self::Aes192(c) => c.apply_keystream(buf),
            Self::Aes256(c) => c.apply_keystream(buf),
        }
    }
}

/// Key material derived for one entry. Never persisted.
pub struct EncryptionContext {
    strength: AesStrength,
    key: Vec<u8>,
    hmac_key: Vec<u8>,
    verifier: [u8; PASSWORD_VERIFICATION_LEN],
}

impl std::fmt::Debug for EncryptionContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EncryptionContext")
            .field("strength", &self.strength)
            .finish_non_exhaustive()
    }
}

impl EncryptionContext {
    /// Key strength.
    pub fn strength(&self) -> AesStrength {
        self.strength
    }

    /// The two password verification bytes.
    pub fn verifier(&self) -> [u8; PASSWORD_VERIFICATION_LEN] {
        self.verifier
    }

    fn cipher(&self) -> Result<AesCtr> {
        AesCtr::new(self.strength, &self.key)
    }

    fn mac(&self) -> Result<HmacSha1> {
        HmacSha1::new_from_slice(&self.hmac_key)
            .map_err(|_| ZipError::malformed("invalid HMAC key length"))
    }

    /// Wrap `reader` so that it yields plaintext. Only use after
    /// [`authenticate`] succeeded for the same ciphertext.
    pub fn decrypting<R: Read>(&self, reader: R) -> Result<AesReader<R>> {
        Ok(AesReader {
            inner: reader,
            cipher: self.cipher()?,
        })
    }
}

/// Derive the key material for `password` and `salt`.
pub fn derive_key(
    password: &[u8],
    salt: &[u8],
    strength: AesStrength,
    iterations: u32,
) -> EncryptionContext {
    let key_len = strength.key_len();
    let mut derived = vec![0u8; key_len * 2 + PASSWORD_VERIFICATION_LEN];
    pbkdf2::pbkdf2_hmac::<Sha1>(password, salt, iterations, &mut derived);

    EncryptionContext {
        strength,
        key: derived[..key_len].to_vec(),
        hmac_key: derived[key_len..key_len * 2].to_vec(),
        verifier: [derived[key_len * 2], derived[key_len * 2 + 1]],
    }
}

/// Encrypt a whole payload, returning the ciphertext and authentication code.
pub fn encrypt_entry(
    plaintext: &[u8],
    key: &EncryptionContext,
) -> Result<(Vec<u8>, [u8; AUTH_CODE_LEN])> {
    let mut ciphertext = plaintext.to_vec();
    key.cipher()?.apply(&mut ciphertext);
    let mut mac = key.mac()?;
    mac.update(&ciphertext);
    let mut tag = [0u8; AUTH_CODE_LEN];
    tag.copy_from_slice(&mac.finalize().into_bytes()[..AUTH_CODE_LEN]);
    Ok((ciphertext, tag))
}

/// Verify `tag` over `ciphertext`, then decrypt it.
///
/// Fails with [`ZipError::WrongPassword`] without decrypting anything when
/// the code does not verify.
pub fn decrypt_entry(
    name: &str,
    ciphertext: &[u8],
    key: &EncryptionContext,
    tag: &[u8],
) -> Result<Vec<u8>> {
    let mut mac = key.mac()?;
    mac.update(ciphertext);
    mac.verify_truncated_left(tag)
        .map_err(|_| ZipError::wrong_password(name))?;

    let mut plaintext = ciphertext.to_vec();
    key.cipher()?.apply(&mut plaintext);
    Ok(plaintext)
}

/// Read the salt and verifier at the start of an encrypted payload and check
/// the password against them.
pub fn open<R: Read>(
    reader: &mut R,
    name: &str,
    password: &[u8],
    strength: AesStrength,
) -> Result<EncryptionContext> {
    let mut salt = vec![0u8; strength.salt_len()];
    reader.read_exact(&mut salt)?;
    let mut verifier = [0u8; PASSWORD_VERIFICATION_LEN];
    reader.read_exact(&mut verifier)?;

    let key = derive_key(password, &salt, strength, PBKDF2_ITERATIONS);
    if key.verifier != verifier {
        return Err(ZipError::wrong_password(name));
    }
    Ok(key)
}

/// Run `ciphertext_len` bytes from `reader` through the HMAC and check the
/// authentication code that follows them.
pub fn authenticate<R: Read>(
    reader: &mut R,
    name: &str,
    ciphertext_len: u64,
    key: &EncryptionContext,
) -> Result<()> {
    let mut mac = key.mac()?;
    let mut limited = reader.by_ref().take(ciphertext_len);
    let mut buf = vec![0u8; 32 * 1024];
    loop {
        let n = limited.read(&mut buf)?;
        if n == 0 {
            break;
        }
        mac.update(&buf[..n]);
    }
    if limited.limit() != 0 {
        return Err(ZipError::malformed(format!(
            "entry '{name}' is truncated inside its encrypted data"
        )));
    }

    let mut tag = [0u8; AUTH_CODE_LEN];
    reader.read_exact(&mut tag)?;
    mac.verify_truncated_left(&tag)
        .map_err(|_| ZipError::wrong_password(name))
}

/// Encrypting writer. The salt and verifier are written on creation, the
/// authentication code by [`AesWriter::finish`].
pub struct AesWriter<W: Write> {
    inner: W,
    cipher: AesCtr,
    mac: HmacSha1,
    buf: Vec<u8>,
}

impl<W: Write> AesWriter<W> {
    /// Start an encrypted payload with a fresh random salt.
    pub fn new(mut inner: W, password: &[u8], strength: AesStrength) -> Result<Self> {
        let mut salt = vec![0u8; strength.salt_len()];
        rand::rng().fill_bytes(&mut salt);
        let key = derive_key(password, &salt, strength, PBKDF2_ITERATIONS);

        inner.write_all(&salt)?;
        inner.write_all(&key.verifier)?;
        Ok(Self {
            inner,
            cipher: key.cipher()?,
            mac: key.mac()?,
            buf: Vec::new(),
        })
    }

    /// Write the authentication code and return the inner writer.
    pub fn finish(self) -> Result<W> {
        let Self { mut inner, mac, .. } = self;
        let code = mac.finalize().into_bytes();
        inner.write_all(&code[..AUTH_CODE_LEN])?;
        Ok(inner)
    }
}

impl<W: Write> Write for AesWriter<W> {
    fn write(&mut self, data: &[u8]) -> io::Result<usize> {
        self.buf.clear();
        self.buf.extend_from_slice(data);
        self.cipher.apply(&mut self.buf);
        self.mac.update(&self.buf);
        self.inner.write_all(&self.buf)?;
        Ok(data.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        self.inner.flush()
    }
}

/// Decrypting reader over AES-CTR ciphertext.
pub struct AesReader<R: Read> {
    inner: R,
    cipher: AesCtr,
}

impl<R: Read> Read for AesReader<R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let n = self.inner.read(buf)?;
        self.cipher.apply(&mut buf[..n]);
        Ok(n)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use capzip_core::ErrorKind;
    use std::io::Cursor;

    #[test]
    fn test_derive_key_matches_pbkdf2_vector() {
        // RFC 6070: P = "password", S = "salt", c = 1
        let key = derive_key(b"password", b"salt", AesStrength::Aes128, 1);
        assert_eq!(
            key.key,
            [
                0x0c, 0x60, 0xc8, 0x0f, 0x96, 0x1f, 0x0e, 0x71, 0xf3, 0xa9, 0xb5, 0x24, 0xaf,
                0x60, 0x12, 0x06
            ]
        );
        assert_eq!(key.hmac_key.len(), 16);
    }

    #[test]
    fn test_derive_key_lengths() {
        let salt = [7u8; 16];
        let key = derive_key(b"secret", &salt, AesStrength::Aes256, PBKDF2_ITERATIONS);
        assert_eq!(key.key.len(), 32);
        assert_eq!(key.hmac_key.len(), 32);
        assert_eq!(overhead(AesStrength::Aes256), 28);
    }

    #[test]
    fn test_encrypt_decrypt_entry() {
        let key = derive_key(b"correct", &[1u8; 16], AesStrength::Aes256, PBKDF2_ITERATIONS);
        let plaintext = b"attack at dawn, attack at dawn, attack at dawn";
        let (ciphertext, tag) = encrypt_entry(plaintext, &key).unwrap();
        assert_ne!(&ciphertext[..], &plaintext[..]);

        let decrypted = decrypt_entry("a.txt", &ciphertext, &key, &tag).unwrap();
        assert_eq!(decrypted, plaintext);
    }

    #[test]
    fn test_tampered_ciphertext_rejected() {
        let key = derive_key(b"correct", &[2u8; 8], AesStrength::Aes128, PBKDF2_ITERATIONS);
        let (mut ciphertext, tag) = encrypt_entry(b"hello world", &key).unwrap();
        ciphertext[3] ^= 0x40;

        let err = decrypt_entry("a.txt", &ciphertext, &key, &tag).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::WrongPassword);
    }

    #[test]
    fn test_streaming_roundtrip() {
        let plaintext = b"streamed through the writer and back".repeat(100);
        let mut writer = AesWriter::new(Vec::new(), b"correct", AesStrength::Aes256).unwrap();
        for chunk in plaintext.chunks(333) {
            writer.write_all(chunk).unwrap();
        }
        let payload = writer.finish().unwrap();
        assert_eq!(payload.len() as u64, plaintext.len() as u64 + overhead(AesStrength::Aes256));

        let mut cursor = Cursor::new(&payload);
        let key = open(&mut cursor, "s", b"correct", AesStrength::Aes256).unwrap();
        let start = cursor.position();
        authenticate(&mut cursor, "s", plaintext.len() as u64, &key).unwrap();

        cursor.set_position(start);
        let mut decrypted = Vec::new();
        key.decrypting((&mut cursor).take(plaintext.len() as u64))
            .unwrap()
            .read_to_end(&mut decrypted)
            .unwrap();
        assert_eq!(decrypted, plaintext);
    }

    #[test]
    fn test_streaming_wrong_password() {
        let mut writer = AesWriter::new(Vec::new(), b"correct", AesStrength::Aes256).unwrap();
        writer.write_all(b"hello world").unwrap();
        let payload = writer.finish().unwrap();

        let mut cursor = Cursor::new(&payload);
        let result = open(&mut cursor, "s", b"incorrect", AesStrength::Aes256)
            .and_then(|key| authenticate(&mut cursor, "s", 11, &key));
        assert_eq!(result.unwrap_err().kind(), ErrorKind::WrongPassword);
    }
}
