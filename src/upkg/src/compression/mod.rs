//! Block compression
//!
//! Provides a trait-based interface over every block codec a package or
//! container may use:
//! - `ZlibBackend`: deflate with a zlib header (flate2)
//! - `LzoBackend`: LZO1X, see [`lzo`]
//! - `LzxBackend`: console LZX frames, see [`lzx`]
//! - `Lz4Backend`: raw LZ4 blocks (lz4_flex)
//! - `OozextractBackend`: Oodle, open-source implementation
//!
//! [`Method::Auto`] sniffs the first two bytes of a block.

pub mod lzo;
pub mod lzx;

use std::io::{Read, Write};
use std::sync::Mutex;

use flate2::read::ZlibDecoder;
use flate2::write::ZlibEncoder;
use flate2::Compression;
use serde::Serialize;

use crate::game::Engine;
use crate::{Error, Result};

/// Compression method of a block
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize)]
pub enum Method {
    #[default]
    None,
    Zlib,
    Lzo,
    Lzx,
    Lz4,
    Oodle,
    /// Detect from the block contents.
    Auto,
}

impl Method {
    pub const FLAG_ZLIB: u32 = 0x01;
    pub const FLAG_LZO: u32 = 0x02;
    pub const FLAG_LZX: u32 = 0x04;

    /// Map package compression flags. Unknown values fall back to detection.
    pub fn from_flags(flags: u32) -> Method {
        match flags {
            0 => Method::None,
            Self::FLAG_ZLIB => Method::Zlib,
            Self::FLAG_LZO => Method::Lzo,
            Self::FLAG_LZX => Method::Lzx,
            other => {
                tracing::warn!("unknown compression flags 0x{:X}, detecting per block", other);
                Method::Auto
            }
        }
    }

    /// Map a container compression name (`zlib`, `oodle`, `lz4`, ...).
    pub fn from_name(name: &str) -> Option<Method> {
        match name.to_ascii_lowercase().as_str() {
            "" | "none" => Some(Method::None),
            "zlib" | "gzip" => Some(Method::Zlib),
            "lzo" => Some(Method::Lzo),
            "lzx" => Some(Method::Lzx),
            "lz4" => Some(Method::Lz4),
            "oodle" => Some(Method::Oodle),
            _ => None,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            Method::None => "none",
            Method::Zlib => "zlib",
            Method::Lzo => "lzo",
            Method::Lzx => "lzx",
            Method::Lz4 => "lz4",
            Method::Oodle => "oodle",
            Method::Auto => "auto",
        }
    }

    /// Guess the method of a block from its first bytes.
    pub fn detect(src: &[u8], engine: Engine) -> Method {
        match src {
            [0x78, 0x9C | 0xDA | 0x01 | 0x5E, ..] => Method::Zlib,
            [0x8C | 0xCC, 5 | 6 | 10 | 11 | 12, ..] => Method::Oodle,
            _ if engine == Engine::UE4 => Method::Lz4,
            _ => Method::Lzo,
        }
    }

    /// Replace [`Method::Auto`] with the detected method.
    pub fn resolve(self, src: &[u8], engine: Engine) -> Method {
        match self {
            Method::Auto => Method::detect(src, engine),
            other => other,
        }
    }
}

impl std::fmt::Display for Method {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// Codec behind one concrete [`Method`], chosen by [`decompressor`].
///
/// Backends may return fewer or more bytes than asked for; [`decompress_for`]
/// owns the size check so every method fails the same way.
pub trait Decompressor: Send + Sync {
    /// Decode one chunk block whose table entry promises `decompressed_size` bytes.
    fn decompress_block(&self, compressed: &[u8], decompressed_size: usize) -> Result<Vec<u8>>;

    /// Short method name, the same as [`Method::name`].
    fn name(&self) -> &'static str;
}

#[derive(Debug, Default)]
pub struct ZlibBackend;

impl Decompressor for ZlibBackend {
    fn decompress_block(&self, compressed: &[u8], decompressed_size: usize) -> Result<Vec<u8>> {
        let mut output = Vec::with_capacity(decompressed_size);
        ZlibDecoder::new(compressed)
            .take(decompressed_size as u64 + 1)
            .read_to_end(&mut output)
            .map_err(|e| Error::CorruptBlock {
                method: "zlib",
                message: e.to_string(),
            })?;
        Ok(output)
    }

    fn name(&self) -> &'static str {
        "zlib"
    }
}

#[derive(Debug, Default)]
pub struct LzoBackend;

impl Decompressor for LzoBackend {
    fn decompress_block(&self, compressed: &[u8], decompressed_size: usize) -> Result<Vec<u8>> {
        lzo::decompress(compressed, decompressed_size)
    }

    fn name(&self) -> &'static str {
        "lzo"
    }
}

#[derive(Debug, Default)]
pub struct LzxBackend;

impl Decompressor for LzxBackend {
    fn decompress_block(&self, compressed: &[u8], decompressed_size: usize) -> Result<Vec<u8>> {
        lzx::decompress(compressed, decompressed_size)
    }

    fn name(&self) -> &'static str {
        "lzx"
    }
}

#[derive(Debug, Default)]
pub struct Lz4Backend;

impl Decompressor for Lz4Backend {
    fn decompress_block(&self, compressed: &[u8], decompressed_size: usize) -> Result<Vec<u8>> {
        lz4_flex::decompress(compressed, decompressed_size).map_err(|e| Error::CorruptBlock {
            method: "lz4",
            message: e.to_string(),
        })
    }

    fn name(&self) -> &'static str {
        "lz4"
    }
}

/// Oodle blocks of UE4 packages.
///
/// The extractor keeps scratch state, so calls are serialized.
pub struct OozextractBackend {
    extractor: Mutex<oozextract::Extractor>,
}

impl OozextractBackend {
    pub fn new() -> Self {
        Self {
            extractor: Mutex::new(oozextract::Extractor::new()),
        }
    }
}

impl Default for OozextractBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for OozextractBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OozextractBackend").finish_non_exhaustive()
    }
}

impl Decompressor for OozextractBackend {
    fn decompress_block(&self, compressed: &[u8], decompressed_size: usize) -> Result<Vec<u8>> {
        let mut output = vec![0u8; decompressed_size];
        let mut extractor = self.extractor.lock().unwrap_or_else(|e| e.into_inner());

        let actual = extractor
            .read_from_slice(compressed, &mut output)
            .map_err(|e| Error::Oodle(format!("oozextract: {:?}", e)))?;
        output.truncate(actual);

        Ok(output)
    }

    fn name(&self) -> &'static str {
        "oodle"
    }
}

/// Backend for a concrete method.
pub fn decompressor(method: Method) -> Result<Box<dyn Decompressor>> {
    let backend: Box<dyn Decompressor> = match method {
        Method::Zlib => Box::new(ZlibBackend),
        Method::Lzo => Box::new(LzoBackend),
        Method::Lzx => Box::new(LzxBackend),
        Method::Lz4 => Box::new(Lz4Backend),
        Method::Oodle => Box::new(OozextractBackend::new()),
        Method::None | Method::Auto => {
            return Err(Error::UnsupportedMethod(method.name().to_string()))
        }
    };
    Ok(backend)
}

/// Decompress one block to exactly `dst_len` bytes.
///
/// `Auto` falls back to generation-neutral detection; see [`decompress_for`].
pub fn decompress(method: Method, src: &[u8], dst_len: usize) -> Result<Vec<u8>> {
    decompress_for(Engine::Unknown, method, src, dst_len)
}

/// Decompress one block, resolving `Auto` for an archive of `engine`.
pub fn decompress_for(engine: Engine, method: Method, src: &[u8], dst_len: usize) -> Result<Vec<u8>> {
    if dst_len == 0 {
        return Ok(Vec::new());
    }
    let method = method.resolve(src, engine);
    let output = match method {
        Method::None => src.to_vec(),
        Method::Lzo => match LzoBackend.decompress_block(src, dst_len) {
            Ok(output) => output,
            Err(e) if src.len() == dst_len => {
                tracing::debug!("lzo block failed ({}), treating as stored", e);
                src.to_vec()
            }
            Err(e) => return Err(e),
        },
        other => decompressor(other)?.decompress_block(src, dst_len)?,
    };
    if output.len() != dst_len {
        return Err(Error::DecompressionSize {
            expected: dst_len,
            actual: output.len(),
        });
    }
    Ok(output)
}

/// Compress one block. Only zlib, LZ4, LZO and stored blocks can be written.
pub fn compress(method: Method, data: &[u8]) -> Result<Vec<u8>> {
    match method {
        Method::None => Ok(data.to_vec()),
        Method::Zlib => {
            let mut encoder = ZlibEncoder::new(Vec::new(), Compression::best());
            encoder.write_all(data)?;
            Ok(encoder.finish()?)
        }
        Method::Lz4 => Ok(lz4_flex::compress(data)),
        Method::Lzo => Ok(lzo::compress(data)),
        other => Err(Error::UnsupportedMethod(format!("{} (compress)", other))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample(len: usize) -> Vec<u8> {
        (0..len).map(|i| ((i * 31) ^ (i >> 7)) as u8).collect()
    }

    #[test]
    fn test_roundtrip_all_writable_methods() {
        for method in [Method::Zlib, Method::Lz4, Method::Lzo] {
            for len in [1usize, 2, 0x1FFFF, 0x20000, 0x20001, 3 * 0x20000 + 5] {
                let data = sample(len);
                let packed = compress(method, &data).unwrap();
                let unpacked = decompress(method, &packed, len).unwrap();
                assert_eq!(unpacked, data, "{} len {}", method, len);
            }
        }
    }

    #[test]
    fn test_zero_length() {
        for method in [Method::Zlib, Method::Lz4, Method::Lzo, Method::Auto] {
            assert!(decompress(method, &[], 0).unwrap().is_empty());
        }
    }

    #[test]
    fn test_size_mismatch_is_fatal() {
        let packed = compress(Method::Zlib, &sample(100)).unwrap();
        let err = decompress(Method::Zlib, &packed, 200).unwrap_err();
        assert!(matches!(
            err,
            Error::DecompressionSize {
                expected: 200,
                actual: 100
            }
        ));
        assert!(decompress(Method::Zlib, &packed, 50).is_err());
    }

    #[test]
    fn test_lzo_stored_fallback() {
        // not an LZO stream, but compressed size equals uncompressed size
        let raw = vec![0x00u8, 0x00, 0x00, 0x00];
        assert_eq!(decompress(Method::Lzo, &raw, 4).unwrap(), raw);
        assert!(decompress(Method::Lzo, &raw, 8).is_err());
    }

    #[test]
    fn test_detect() {
        let zlib = compress(Method::Zlib, b"hello").unwrap();
        assert_eq!(Method::detect(&zlib, Engine::UE3), Method::Zlib);
        assert_eq!(Method::detect(&[0x8C, 0x06], Engine::UE4), Method::Oodle);
        assert_eq!(Method::detect(&[0x11, 0x00], Engine::UE4), Method::Lz4);
        assert_eq!(Method::detect(&[0x11, 0x00], Engine::UE3), Method::Lzo);
        assert_eq!(Method::detect(&[], Engine::UE3), Method::Lzo);

        let lzo = compress(Method::Lzo, b"hello world").unwrap();
        assert_eq!(decompress(Method::Auto, &lzo, 11).unwrap(), b"hello world");
        assert_eq!(decompress(Method::Auto, &zlib, 5).unwrap(), b"hello");

        let lz4 = compress(Method::Lz4, b"hello world").unwrap();
        assert_eq!(
            decompress_for(Engine::UE4, Method::Auto, &lz4, 11).unwrap(),
            b"hello world"
        );
    }

    #[test]
    fn test_from_flags() {
        assert_eq!(Method::from_flags(0), Method::None);
        assert_eq!(Method::from_flags(1), Method::Zlib);
        assert_eq!(Method::from_flags(2), Method::Lzo);
        assert_eq!(Method::from_flags(4), Method::Lzx);
        assert_eq!(Method::from_flags(0x40), Method::Auto);
        assert_eq!(Method::from_name("Oodle"), Some(Method::Oodle));
        assert_eq!(Method::from_name("brotli"), None);
    }

    #[test]
    fn test_backend_names_match_methods() {
        for method in [Method::Zlib, Method::Lzo, Method::Lzx, Method::Lz4, Method::Oodle] {
            assert_eq!(decompressor(method).unwrap().name(), method.name());
        }
        let Err(err) = decompressor(Method::Auto) else {
            panic!("auto has no backend");
        };
        assert!(err.to_string().contains("auto"));
    }

    #[test]
    fn test_unsupported_compress() {
        let err = compress(Method::Oodle, b"x").unwrap_err();
        assert_eq!(err.kind(), crate::ErrorKind::UnsupportedDialect);
    }
}
