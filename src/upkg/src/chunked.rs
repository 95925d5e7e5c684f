//! Compressed chunk streams
//!
//! UE3 packages can store everything after the summary as a list of
//! compressed chunks, and some platforms compress the whole file as a single
//! chunk. Each chunk on disk starts with a [`CompressedChunkHeader`] followed
//! by the compressed blocks it lists.
//!
//! [`ChunkedReader`] presents the decompressed view as an ordinary
//! [`Archive`]. It keeps exactly one decoded block in memory: reads are
//! overwhelmingly sequential, so a block is decoded once and drained before
//! the next one is needed.

use serde::Serialize;

use crate::archive::{Archive, ArchiveVersion, ArchiveWriter, PACKAGE_FILE_TAG, PACKAGE_FILE_TAG_REV};
use crate::compression::{self, Method};
use crate::{Error, Result, ResultExt};

/// Block size used when a chunk header lists a single block.
pub const DEFAULT_BLOCK_SIZE: u32 = 0x20000;

/// One compressed chunk of a package, as listed in the summary.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub struct CompressedChunk {
    pub uncompressed_offset: u64,
    pub uncompressed_size: u64,
    pub compressed_offset: u64,
    pub compressed_size: u64,
}

impl CompressedChunk {
    /// Read the 32-bit summary form.
    pub fn read<A: Archive + ?Sized>(ar: &mut A) -> Result<Self> {
        let pos = ar.tell();
        let fields = [ar.read_i32()?, ar.read_i32()?, ar.read_i32()?, ar.read_i32()?];
        if fields.iter().any(|&f| f < 0) {
            return Err(Error::corrupt(pos, format!("negative compressed chunk field {:?}", fields)));
        }
        Ok(Self {
            uncompressed_offset: fields[0] as u64,
            uncompressed_size: fields[1] as u64,
            compressed_offset: fields[2] as u64,
            compressed_size: fields[3] as u64,
        })
    }

    pub fn uncompressed_end(&self) -> u64 {
        self.uncompressed_offset + self.uncompressed_size
    }

    /// Chunks whose sizes match carry their bytes without a chunk header.
    pub fn is_stored(&self) -> bool {
        self.compressed_size == self.uncompressed_size
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub struct ChunkBlock {
    pub compressed_size: u32,
    pub uncompressed_size: u32,
}

/// Header in front of every compressed chunk.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize)]
pub struct CompressedChunkHeader {
    pub tag: u32,
    pub block_size: u32,
    pub compressed_size: u32,
    pub uncompressed_size: u32,
    pub blocks: Vec<ChunkBlock>,
}

impl CompressedChunkHeader {
    /// Read a header. A byte-swapped tag flips the archive byte order.
    pub fn read<A: Archive + ?Sized>(ar: &mut A) -> Result<Self> {
        let pos = ar.tell();
        let tag = ar.read_u32()?;
        if tag == PACKAGE_FILE_TAG_REV {
            let version = ar.version_mut();
            version.reverse_bytes = !version.reverse_bytes;
        } else if tag != PACKAGE_FILE_TAG {
            return Err(Error::BadTag { tag }).context(format!("chunk header at {}", pos));
        }

        let _stored_block_size = ar.read_u32()?;
        let compressed_size = ar.read_u32()?;
        let uncompressed_size = ar.read_u32()?;

        let mut blocks = Vec::with_capacity(uncompressed_size.div_ceil(DEFAULT_BLOCK_SIZE) as usize);
        let (mut comp_sum, mut uncomp_sum) = (0u64, 0u64);
        while comp_sum < compressed_size as u64 && uncomp_sum < uncompressed_size as u64 {
            let block = ChunkBlock {
                compressed_size: ar.read_u32()?,
                uncompressed_size: ar.read_u32()?,
            };
            comp_sum += block.compressed_size as u64;
            uncomp_sum += block.uncompressed_size as u64;
            blocks.push(block);
        }

        // the compressed sum is sometimes short of the total, the uncompressed one never is
        if uncomp_sum != uncompressed_size as u64 {
            return Err(Error::corrupt(
                pos,
                format!(
                    "chunk blocks cover {} bytes, header declares {}",
                    uncomp_sum, uncompressed_size
                ),
            ));
        }

        let block_size = match blocks.as_slice() {
            [first, _, ..] => first.uncompressed_size,
            _ => DEFAULT_BLOCK_SIZE,
        };

        Ok(Self {
            tag,
            block_size,
            compressed_size,
            uncompressed_size,
            blocks,
        })
    }

    /// Header describing a chunk stored without compression.
    fn stored(size: u64) -> Self {
        Self {
            tag: PACKAGE_FILE_TAG,
            block_size: 0,
            compressed_size: size as u32,
            uncompressed_size: size as u32,
            blocks: vec![ChunkBlock {
                compressed_size: size as u32,
                uncompressed_size: size as u32,
            }],
        }
    }
}

/// Index of the chunk holding uncompressed position `pos`.
///
/// Positions before the first chunk resolve to it as well; the caller
/// checks `pos < uncompressed_offset` for the raw prefix.
pub fn chunk_for(chunks: &[CompressedChunk], pos: u64) -> Option<usize> {
    chunks.iter().position(|c| pos < c.uncompressed_end())
}

/// Block containing `offset` bytes into a chunk.
///
/// Returns the block index, the block's uncompressed start relative to the
/// chunk, and its compressed start relative to the chunk data.
pub fn block_for(blocks: &[ChunkBlock], offset: u64) -> Option<(usize, u64, u64)> {
    let (mut uncompressed, mut compressed) = (0u64, 0u64);
    for (i, block) in blocks.iter().enumerate() {
        if offset < uncompressed + block.uncompressed_size as u64 {
            return Some((i, uncompressed, compressed));
        }
        uncompressed += block.uncompressed_size as u64;
        compressed += block.compressed_size as u64;
    }
    None
}

/// Read and decompress a chunk of `size` bytes at the cursor.
pub fn read_compressed_chunk<A: Archive + ?Sized>(ar: &mut A, method: Method, size: usize) -> Result<Vec<u8>> {
    let header = CompressedChunkHeader::read(ar)?;
    let mut out = Vec::with_capacity(size);
    for block in &header.blocks {
        let compressed = ar.read_bytes_vec(block.compressed_size as usize)?;
        let data = compression::decompress_for(ar.version().engine(), method, &compressed, block.uncompressed_size as usize)?;
        out.extend_from_slice(&data);
    }
    if out.len() != size {
        return Err(Error::DecompressionSize {
            expected: size,
            actual: out.len(),
        });
    }
    Ok(out)
}

/// Write `data` as a compressed chunk: header, block table, blocks.
pub fn write_compressed_chunk(w: &mut ArchiveWriter, method: Method, data: &[u8], block_size: usize) -> Result<()> {
    let mut packed = Vec::new();
    for block in data.chunks(block_size.max(1)) {
        packed.push((compression::compress(method, block)?, block.len()));
    }
    let compressed_total: usize = packed.iter().map(|(p, _)| p.len()).sum();

    w.write_u32(PACKAGE_FILE_TAG)
        .write_u32(block_size as u32)
        .write_u32(compressed_total as u32)
        .write_u32(data.len() as u32);
    for (p, len) in &packed {
        w.write_u32(p.len() as u32).write_u32(*len as u32);
    }
    for (p, _) in &packed {
        w.write_bytes(p);
    }
    Ok(())
}

/// Archive over the decompressed view of a chunked stream.
pub struct ChunkedReader<A: Archive> {
    inner: A,
    method: Method,
    chunks: Vec<CompressedChunk>,
    fully_compressed: bool,
    pos: u64,
    version: ArchiveVersion,
    stopper: Option<u64>,
    buffer: Vec<u8>,
    buffer_start: u64,
    /// Index, header and data offset of the chunk whose header is loaded.
    current: Option<(usize, CompressedChunkHeader, u64)>,
}

impl<A: Archive> ChunkedReader<A> {
    pub fn new(inner: A, method: Method, chunks: Vec<CompressedChunk>) -> Result<Self> {
        if chunks.is_empty() {
            return Err(Error::corrupt(inner.tell(), "compressed package without chunks"));
        }
        let version = *inner.version();
        Ok(Self {
            inner,
            method,
            chunks,
            fully_compressed: false,
            pos: 0,
            version,
            stopper: None,
            buffer: Vec::new(),
            buffer_start: 0,
            current: None,
        })
    }

    /// Wrap a file that is one compressed chunk from its first byte.
    ///
    /// The chunk header is read to learn the decompressed size.
    pub fn fully_compressed(mut inner: A, method: Method) -> Result<Self> {
        inner.seek(0)?;
        let header = CompressedChunkHeader::read(&mut inner).context("fully compressed header")?;
        inner.seek(0)?;
        let chunk = CompressedChunk {
            uncompressed_offset: 0,
            uncompressed_size: header.uncompressed_size as u64,
            compressed_offset: 0,
            compressed_size: header.compressed_size as u64,
        };
        tracing::debug!(
            "fully compressed stream: {} -> {} bytes in {} blocks",
            header.compressed_size,
            header.uncompressed_size,
            header.blocks.len()
        );
        let mut reader = Self::new(inner, method, vec![chunk])?;
        reader.fully_compressed = true;
        Ok(reader)
    }

    pub fn is_fully_compressed(&self) -> bool {
        self.fully_compressed
    }

    pub fn chunks(&self) -> &[CompressedChunk] {
        &self.chunks
    }

    pub fn method(&self) -> Method {
        self.method
    }

    pub fn into_inner(self) -> A {
        self.inner
    }

    fn buffer_end(&self) -> u64 {
        self.buffer_start + self.buffer.len() as u64
    }

    fn prepare_buffer(&mut self, pos: u64) -> Result<()> {
        let index = chunk_for(&self.chunks, pos).ok_or(Error::Eof {
            pos,
            size: 0,
            len: self.len(),
        })?;
        let chunk = self.chunks[index];

        // uncompressed prefix, usually the summary itself
        if pos < chunk.uncompressed_offset {
            let size = chunk.uncompressed_offset.min(chunk.compressed_offset);
            if pos >= size {
                return Err(Error::corrupt(pos, "position falls between raw prefix and first chunk"));
            }
            self.inner.seek(0)?;
            self.buffer = self.inner.read_bytes_vec(size as usize)?;
            self.buffer_start = 0;
            return Ok(());
        }

        if self.current.as_ref().map(|c| c.0) != Some(index) {
            self.inner.seek(chunk.compressed_offset)?;
            let header = if chunk.is_stored() {
                CompressedChunkHeader::stored(chunk.uncompressed_size)
            } else {
                CompressedChunkHeader::read(&mut self.inner).with_context(|| format!("chunk {}", index))?
            };
            self.current = Some((index, header, self.inner.tell()));
        }

        let Some((_, header, data_pos)) = self.current.as_ref() else {
            return Err(Error::corrupt(pos, "chunk header not loaded"));
        };
        let stored = chunk.is_stored();
        let (block_index, block_start, block_data) = block_for(&header.blocks, pos - chunk.uncompressed_offset)
            .ok_or_else(|| Error::corrupt(pos, format!("no block in chunk {} covers this position", index)))?;
        let block = header.blocks[block_index];
        let data_pos = data_pos + block_data;

        self.inner.seek(data_pos)?;
        let compressed = self.inner.read_bytes_vec(block.compressed_size as usize)?;
        self.buffer = if stored {
            compressed
        } else {
            compression::decompress_for(self.version.engine(), self.method, &compressed, block.uncompressed_size as usize)
                .with_context(|| format!("block {} at {}", block_index, data_pos))?
        };
        self.buffer_start = chunk.uncompressed_offset + block_start;
        Ok(())
    }
}

impl<A: Archive> Archive for ChunkedReader<A> {
    fn read_raw(&mut self, buf: &mut [u8]) -> Result<()> {
        if self.pos + buf.len() as u64 > self.len() {
            return Err(Error::Eof {
                pos: self.pos,
                size: buf.len(),
                len: self.len(),
            });
        }
        let mut done = 0;
        while done < buf.len() {
            if self.pos < self.buffer_start || self.pos >= self.buffer_end() {
                self.prepare_buffer(self.pos)?;
                if self.pos < self.buffer_start || self.pos >= self.buffer_end() {
                    return Err(Error::corrupt(self.pos, "decoded block does not cover read position"));
                }
            }
            let from = (self.pos - self.buffer_start) as usize;
            let count = (self.buffer.len() - from).min(buf.len() - done);
            buf[done..done + count].copy_from_slice(&self.buffer[from..from + count]);
            done += count;
            self.pos += count as u64;
        }
        Ok(())
    }

    fn seek(&mut self, pos: u64) -> Result<()> {
        if pos > self.len() {
            return Err(Error::Eof {
                pos,
                size: 0,
                len: self.len(),
            });
        }
        self.pos = pos;
        Ok(())
    }

    fn tell(&self) -> u64 {
        self.pos
    }

    fn len(&self) -> u64 {
        self.chunks.last().map_or(0, |c| c.uncompressed_end())
    }

    fn version(&self) -> &ArchiveVersion {
        &self.version
    }

    fn version_mut(&mut self) -> &mut ArchiveVersion {
        &mut self.version
    }

    fn stopper(&self) -> Option<u64> {
        self.stopper
    }

    fn set_stopper(&mut self, stopper: Option<u64>) {
        self.stopper = stopper;
    }

    fn close(&mut self) {
        self.inner.close();
    }
}

impl<A: Archive> std::fmt::Debug for ChunkedReader<A> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChunkedReader")
            .field("method", &self.method)
            .field("chunks", &self.chunks.len())
            .field("fully_compressed", &self.fully_compressed)
            .field("pos", &self.pos)
            .finish()
    }
}
