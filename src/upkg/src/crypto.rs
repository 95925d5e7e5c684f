//! AES-256 block decryption for encrypted containers
//!
//! Containers encrypt their index and entry payloads with AES-256 in ECB
//! mode. The key is process-wide: it is installed once by the configuration
//! layer and read by every container opened afterwards. Functions taking an
//! explicit key never touch the global.

use std::sync::RwLock;

#[allow(deprecated)]
use aes::cipher::generic_array::GenericArray;
use aes::cipher::{BlockDecrypt, BlockEncrypt, KeyInit};
use aes::Aes256;

use crate::{Error, Result};

/// AES block size in bytes
pub const AES_BLOCK_SIZE: usize = 16;

pub type AesKey = [u8; 32];

static AES_KEY: RwLock<Option<AesKey>> = RwLock::new(None);

/// Install (or clear) the process-wide key.
pub fn set_aes_key(key: Option<AesKey>) {
    *AES_KEY.write().unwrap_or_else(|e| e.into_inner()) = key;
}

pub fn aes_key() -> Option<AesKey> {
    *AES_KEY.read().unwrap_or_else(|e| e.into_inner())
}

/// Parse a key given either as `0x`-prefixed hex or as a 32-character string.
pub fn parse_aes_key(text: &str) -> Result<AesKey> {
    let text = text.trim();
    let bytes = match text.strip_prefix("0x").or_else(|| text.strip_prefix("0X")) {
        Some(digits) => hex::decode(digits).map_err(|e| Error::InvalidKey(e.to_string()))?,
        None => text.as_bytes().to_vec(),
    };
    bytes
        .try_into()
        .map_err(|b: Vec<u8>| Error::InvalidKey(format!("expected 32 bytes, got {}", b.len())))
}

/// Round `size` up to a whole number of AES blocks.
pub fn align(size: usize) -> usize {
    size.div_ceil(AES_BLOCK_SIZE) * AES_BLOCK_SIZE
}

/// Decrypt `buf` in place with an explicit key.
pub fn decrypt_with_key(buf: &mut [u8], key: &AesKey) -> Result<()> {
    if !buf.len().is_multiple_of(AES_BLOCK_SIZE) {
        return Err(Error::InvalidSize(buf.len()));
    }
    #[allow(deprecated)]
    let cipher = Aes256::new(GenericArray::from_slice(key));
    for chunk in buf.chunks_exact_mut(AES_BLOCK_SIZE) {
        #[allow(deprecated)]
        cipher.decrypt_block(GenericArray::from_mut_slice(chunk));
    }
    Ok(())
}

/// Encrypt `buf` in place with an explicit key.
pub fn encrypt_with_key(buf: &mut [u8], key: &AesKey) -> Result<()> {
    if !buf.len().is_multiple_of(AES_BLOCK_SIZE) {
        return Err(Error::InvalidSize(buf.len()));
    }
    #[allow(deprecated)]
    let cipher = Aes256::new(GenericArray::from_slice(key));
    for chunk in buf.chunks_exact_mut(AES_BLOCK_SIZE) {
        #[allow(deprecated)]
        cipher.encrypt_block(GenericArray::from_mut_slice(chunk));
    }
    Ok(())
}

/// Decrypt `buf` in place with the process-wide key.
pub fn decrypt(buf: &mut [u8]) -> Result<()> {
    let key = aes_key().ok_or(Error::MissingAesKey)?;
    decrypt_with_key(buf, &key)
}

#[cfg(test)]
mod tests {
    use super::*;

    const KEY: AesKey = *b"0123456789abcdef0123456789ABCDEF";

    #[test]
    fn test_roundtrip() {
        let original: Vec<u8> = (0..64u8).collect();
        let mut data = original.clone();
        encrypt_with_key(&mut data, &KEY).unwrap();
        assert_ne!(data, original);
        decrypt_with_key(&mut data, &KEY).unwrap();
        assert_eq!(data, original);
    }

    #[test]
    fn test_decrypt_is_pure() {
        let mut a = vec![0x5Au8; 32];
        let mut b = a.clone();
        decrypt_with_key(&mut a, &KEY).unwrap();
        decrypt_with_key(&mut b, &KEY).unwrap();
        assert_eq!(a, b);
        // ECB: equal plaintext blocks give equal output blocks
        assert_eq!(a[..16], a[16..]);
    }

    #[test]
    fn test_invalid_size() {
        let mut data = vec![0u8; 17];
        let err = decrypt_with_key(&mut data, &KEY).unwrap_err();
        assert!(matches!(err, Error::InvalidSize(17)));
        assert!(err.to_string().contains("multiple of 16"));
    }

    #[test]
    fn test_parse_aes_key() {
        let hex_key = format!("0x{}", "ab".repeat(32));
        assert_eq!(parse_aes_key(&hex_key).unwrap(), [0xAB; 32]);
        assert_eq!(parse_aes_key("0123456789abcdef0123456789ABCDEF").unwrap(), KEY);
        assert!(parse_aes_key("0x1234").is_err());
        assert!(parse_aes_key("short").is_err());
        assert!(parse_aes_key("0xzz").is_err());
    }

    #[test]
    fn test_align() {
        assert_eq!(align(0), 0);
        assert_eq!(align(1), 16);
        assert_eq!(align(16), 16);
        assert_eq!(align(17), 32);
    }
}
