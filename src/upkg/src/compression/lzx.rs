//! LZX blocks as written by console builds
//!
//! # Frame Layout
//!
//! A block is a sequence of frames, each producing up to 32 KiB:
//! - `FF uu uu cc cc`: explicit uncompressed (`uu`) and compressed (`cc`)
//!   sizes, big-endian
//! - `cc cc`: compressed size only, the frame decodes to a full 32 KiB
//!   (or whatever remains of the block)
//!
//! Frames share one 128 KiB window.

use lzxd::{Lzxd, WindowSize};

use crate::{Error, Result};

/// Output size of a frame without an explicit size.
pub const FRAME_SIZE: usize = 32768;

fn corrupt(message: impl Into<String>) -> Error {
    Error::CorruptBlock {
        method: "lzx",
        message: message.into(),
    }
}

/// Frame header at `pos`: (compressed size, uncompressed size, header length).
pub fn frame_header(src: &[u8], pos: usize) -> Result<(usize, usize, usize)> {
    let byte = |i: usize| {
        src.get(pos + i)
            .map(|&b| b as usize)
            .ok_or_else(|| corrupt(format!("truncated frame header at {}", pos)))
    };
    if byte(0)? == 0xFF {
        let uncompressed = (byte(1)? << 8) | byte(2)?;
        let compressed = (byte(3)? << 8) | byte(4)?;
        Ok((compressed, uncompressed, 5))
    } else {
        let compressed = (byte(0)? << 8) | byte(1)?;
        Ok((compressed, FRAME_SIZE, 2))
    }
}

pub fn decompress(src: &[u8], dst_len: usize) -> Result<Vec<u8>> {
    let mut lzx = Lzxd::new(WindowSize::KB128);
    let mut out = Vec::with_capacity(dst_len);
    let mut pos = 0;

    while out.len() < dst_len {
        let (compressed, uncompressed, header) = frame_header(src, pos)?;
        pos += header;
        let end = (pos + compressed).min(src.len());
        if compressed == 0 || pos >= end {
            return Err(corrupt(format!("empty frame at {}", pos)));
        }
        let want = uncompressed.min(dst_len - out.len());
        let frame = lzx
            .decompress_next(&src[pos..end], want)
            .map_err(|e| corrupt(format!("{:?}", e)))?;
        out.extend_from_slice(frame);
        pos = end;
    }

    Ok(out)
}

/// One frame holding `payload` as an uncompressed LZX block, for fixtures.
///
/// The block header is the E8 bit (off), block type 3 and a 24-bit size,
/// padded to a word, then R0..R2 and the raw bytes padded to even length.
#[cfg(test)]
pub(crate) fn stored_frame(payload: &[u8], explicit_size: bool) -> Vec<u8> {
    let size = payload.len() as u32;
    let mut body = Vec::new();
    body.extend_from_slice(&((0b0011u16 << 12) | (size >> 12) as u16).to_le_bytes());
    body.extend_from_slice(&(((size & 0xFFF) << 4) as u16).to_le_bytes());
    for _ in 0..3 {
        body.extend_from_slice(&1u32.to_le_bytes());
    }
    body.extend_from_slice(payload);
    if payload.len() % 2 != 0 {
        body.push(0);
    }

    let mut frame = Vec::new();
    if explicit_size {
        frame.push(0xFF);
        frame.extend_from_slice(&(size as u16).to_be_bytes());
    }
    frame.extend_from_slice(&(body.len() as u16).to_be_bytes());
    frame.extend_from_slice(&body);
    frame
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stored_block_decodes() {
        let payload = b"CookedXenon/Startup.xxx";
        assert_eq!(decompress(&stored_frame(payload, false), payload.len()).unwrap(), payload);
        assert_eq!(decompress(&stored_frame(payload, true), payload.len()).unwrap(), payload);
    }

    #[test]
    fn test_truncated_block() {
        let mut frame = stored_frame(&[0x41; 64], false);
        frame.truncate(frame.len() - 20);
        let err = decompress(&frame, 64).unwrap_err();
        assert!(err.to_string().contains("lzx"));
    }

    #[test]
    fn test_frame_header_short_form() {
        assert_eq!(frame_header(&[0x12, 0x34], 0).unwrap(), (0x1234, FRAME_SIZE, 2));
    }

    #[test]
    fn test_frame_header_explicit_sizes() {
        let src = [0x00, 0xFF, 0x10, 0x00, 0x02, 0x00];
        assert_eq!(frame_header(&src, 1).unwrap(), (0x0200, 0x1000, 5));
    }

    #[test]
    fn test_truncated_header() {
        let err = frame_header(&[0xFF, 0x00], 0).unwrap_err();
        assert!(err.to_string().contains("truncated frame header"));
        assert!(decompress(&[0x00], 16).is_err());
    }

    #[test]
    fn test_empty_frame() {
        let err = decompress(&[0x00, 0x00, 0x00], 16).unwrap_err();
        assert!(err.to_string().contains("empty frame"));
    }
}
