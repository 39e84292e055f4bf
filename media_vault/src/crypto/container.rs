//! Media Vault - Flat Encrypted Container
//!
//! Whole-buffer format used for metadata blobs (tag catalog, media metadata)
//! and for every block of a block-encrypted asset.
//!
//! ```text
//! [METHOD 2B][u16 big-endian]
//! [LENGTH 4B][u32 big-endian, payload length before padding]
//! [IV 16B][random]
//! [CIPHERTEXT variable][AES-256-CBC, PKCS#5 padded]
//! ```
//!
//! Empty input encrypts to the empty byte string, with no header.

use std::io::{Read, Write};

use aes::cipher::{
    block_padding::{NoPadding, Pkcs7},
    BlockDecryptMut, BlockEncryptMut, KeyIvInit,
};
use flate2::{read::ZlibDecoder, write::ZlibEncoder, Compression};
use serde::{de::DeserializeOwned, Serialize};

use super::keys::{generate_iv, VaultKey, IV_LEN};
use crate::error::{VaultError, VaultResult};

type Aes256CbcEnc = cbc::Encryptor<aes::Aes256>;
type Aes256CbcDec = cbc::Decryptor<aes::Aes256>;

/// AES block size
const BLOCK_LEN: usize = 16;

/// Header size: METHOD(2) + LENGTH(4) + IV(16)
pub const HEADER_SIZE: usize = 2 + 4 + IV_LEN;

/// Method tags stored in the first two bytes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u16)]
pub enum EncryptionMethod {
    /// zlib-compress, then encrypt
    Aes256Zip = 1,
    /// Encrypt only
    Aes256Flat = 2,
}

impl EncryptionMethod {
    fn from_tag(tag: u16) -> VaultResult<Self> {
        match tag {
            1 => Ok(Self::Aes256Zip),
            2 => Ok(Self::Aes256Flat),
            other => Err(VaultError::UnknownMethod(other)),
        }
    }
}

impl Default for EncryptionMethod {
    fn default() -> Self {
        Self::Aes256Zip
    }
}

/// Encrypt data with the default method (compressed)
pub fn encrypt(data: &[u8], key: &VaultKey) -> VaultResult<Vec<u8>> {
    encrypt_with_method(data, EncryptionMethod::default(), key)
}

/// Encrypt data with an explicit method
pub fn encrypt_with_method(
    data: &[u8],
    method: EncryptionMethod,
    key: &VaultKey,
) -> VaultResult<Vec<u8>> {
    if data.is_empty() {
        return Ok(Vec::new());
    }

    let compressed;
    let payload: &[u8] = match method {
        EncryptionMethod::Aes256Zip => {
            compressed = compress(data)?;
            &compressed
        }
        EncryptionMethod::Aes256Flat => data,
    };

    let payload_len = u32::try_from(payload.len()).map_err(|_| {
        VaultError::EncryptionFailed(format!("payload too large: {} bytes", payload.len()))
    })?;

    let iv = generate_iv();
    let ciphertext = Aes256CbcEnc::new(&(*key.expose()).into(), &iv.into())
        .encrypt_padded_vec_mut::<Pkcs7>(payload);

    let mut out = Vec::with_capacity(HEADER_SIZE + ciphertext.len());
    out.extend_from_slice(&(method as u16).to_be_bytes());
    out.extend_from_slice(&payload_len.to_be_bytes());
    out.extend_from_slice(&iv);
    out.extend_from_slice(&ciphertext);

    Ok(out)
}

/// Decrypt a container produced by [`encrypt`]
pub fn decrypt(data: &[u8], key: &VaultKey) -> VaultResult<Vec<u8>> {
    if data.is_empty() {
        return Ok(Vec::new());
    }

    if data.len() < 2 {
        return Err(VaultError::InvalidFormat("truncated method tag".into()));
    }

    let method = EncryptionMethod::from_tag(u16::from_be_bytes([data[0], data[1]]))?;

    if data.len() <= HEADER_SIZE {
        return Err(VaultError::InvalidFormat(format!(
            "container too short: {} bytes",
            data.len()
        )));
    }

    let payload_len = u32::from_be_bytes([data[2], data[3], data[4], data[5]]) as usize;
    let iv: [u8; IV_LEN] = data[6..HEADER_SIZE]
        .try_into()
        .map_err(|_| VaultError::InvalidFormat("invalid IV".into()))?;
    let ciphertext = &data[HEADER_SIZE..];

    if ciphertext.len() % BLOCK_LEN != 0 {
        return Err(VaultError::InvalidFormat(format!(
            "ciphertext length {} is not a multiple of {}",
            ciphertext.len(),
            BLOCK_LEN
        )));
    }

    if payload_len > ciphertext.len() {
        return Err(VaultError::InvalidFormat(format!(
            "declared length {} exceeds ciphertext length {}",
            payload_len,
            ciphertext.len()
        )));
    }

    let mut plaintext = Aes256CbcDec::new(&(*key.expose()).into(), &iv.into())
        .decrypt_padded_vec_mut::<NoPadding>(ciphertext)
        .map_err(|e| VaultError::DecryptionFailed(e.to_string()))?;

    plaintext.truncate(payload_len);

    match method {
        EncryptionMethod::Aes256Zip => decompress(&plaintext),
        EncryptionMethod::Aes256Flat => Ok(plaintext),
    }
}

/// Serialize a value as JSON and encrypt it
pub fn encrypt_json<T: Serialize>(value: &T, key: &VaultKey) -> VaultResult<Vec<u8>> {
    let json = zeroize::Zeroizing::new(serde_json::to_vec(value)?);
    encrypt(&json, key)
}

/// Decrypt a container and parse its JSON content
pub fn decrypt_json<T: DeserializeOwned>(data: &[u8], key: &VaultKey) -> VaultResult<T> {
    let json = zeroize::Zeroizing::new(decrypt(data, key)?);
    Ok(serde_json::from_slice(&json)?)
}

fn compress(data: &[u8]) -> VaultResult<Vec<u8>> {
    let mut encoder = ZlibEncoder::new(Vec::new(), Compression::default());
    encoder.write_all(data)?;
    Ok(encoder.finish()?)
}

fn decompress(data: &[u8]) -> VaultResult<Vec<u8>> {
    let mut out = Vec::new();
    ZlibDecoder::new(data)
        .read_to_end(&mut out)
        .map_err(|e| VaultError::DecryptionFailed(format!("inflate failed: {}", e)))?;
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_key() -> VaultKey {
        VaultKey::new([0x42u8; 32])
    }

    #[test]
    fn test_roundtrip_sizes() {
        let key = test_key();

        for size in [1usize, 15, 16, 17, 4096, 100_003] {
            let data: Vec<u8> = (0..size).map(|i| (i * 7 % 251) as u8).collect();
            let encrypted = encrypt(&data, &key).unwrap();
            assert_eq!(decrypt(&encrypted, &key).unwrap(), data, "size {}", size);
        }
    }

    #[test]
    fn test_empty_is_empty() {
        let key = test_key();
        assert!(encrypt(b"", &key).unwrap().is_empty());
        assert!(decrypt(b"", &key).unwrap().is_empty());
    }

    #[test]
    fn test_flat_method_roundtrip() {
        let key = test_key();
        let data = b"Media Vault flat payload";

        let encrypted = encrypt_with_method(data, EncryptionMethod::Aes256Flat, &key).unwrap();
        assert_eq!(&encrypted[..2], &[0, 2]);
        assert_eq!(&encrypted[2..6], &(data.len() as u32).to_be_bytes());
        assert_eq!(decrypt(&encrypted, &key).unwrap(), data);
    }

    #[test]
    fn test_header_layout() {
        let key = test_key();
        let encrypted = encrypt(b"hello hello hello", &key).unwrap();

        assert_eq!(&encrypted[..2], &[0, 1]);
        assert_eq!((encrypted.len() - HEADER_SIZE) % BLOCK_LEN, 0);
    }

    #[test]
    fn test_encryption_is_not_deterministic() {
        let key = test_key();
        let a = encrypt(b"same plaintext", &key).unwrap();
        let b = encrypt(b"same plaintext", &key).unwrap();
        assert_ne!(a, b);
    }

    #[test]
    fn test_unknown_method_rejected() {
        let key = test_key();
        let mut encrypted = encrypt(b"data", &key).unwrap();
        encrypted[1] = 9;

        assert!(matches!(decrypt(&encrypted, &key), Err(VaultError::UnknownMethod(9))));
    }

    #[test]
    fn test_truncated_input_rejected() {
        let key = test_key();
        let encrypted = encrypt(b"some data to protect", &key).unwrap();

        let err = decrypt(&encrypted[..1], &key).unwrap_err();
        assert!(err.is_format_error());

        let err = decrypt(&encrypted[..HEADER_SIZE], &key).unwrap_err();
        assert!(err.is_format_error());

        let err = decrypt(&encrypted[..encrypted.len() - 3], &key).unwrap_err();
        assert!(err.is_format_error());
    }

    #[test]
    fn test_declared_length_too_large() {
        let key = test_key();
        let mut encrypted = encrypt(b"abc", &key).unwrap();
        encrypted[2..6].copy_from_slice(&1000u32.to_be_bytes());

        assert!(matches!(decrypt(&encrypted, &key), Err(VaultError::InvalidFormat(_))));
    }

    #[test]
    fn test_json_roundtrip() {
        let key = test_key();
        let value = serde_json::json!({"next_id": 3, "tags": {"0": "holidays"}});

        let encrypted = encrypt_json(&value, &key).unwrap();
        let back: serde_json::Value = decrypt_json(&encrypted, &key).unwrap();
        assert_eq!(back, value);
    }

    #[test]
    fn test_wrong_key_fails() {
        let encrypted = encrypt(b"Secret data for a single tenant", &test_key()).unwrap();
        let other = VaultKey::new([0x43u8; 32]);

        // Garbage after CBC decryption either fails to inflate or yields different bytes
        match decrypt(&encrypted, &other) {
            Ok(plain) => assert_ne!(plain, b"Secret data for a single tenant"),
            Err(e) => assert!(e.is_format_error()),
        }
    }
}
