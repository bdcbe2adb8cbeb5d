//! Chunked segment file format for compressed columns.
//!
//! Format:
//!   unit 0    - file header in a 4096-byte unit: magic u64, format version
//!               u32, compression code u32, total header size u64, block
//!               count u64, column width u32, all little-endian, zero padded
//!   units 1.. - chunk pointer array: u64 file offsets, one per chunk plus a
//!               final end-of-data offset, zero terminated. Offsets must
//!               strictly increase; each chunk's byte length is the gap to
//!               the next offset
//!   chunks    - each chunk covers 4 MiB of uncompressed blocks and is
//!               framed as codec magic u8, crc32 of the payload u32, payload
//!               length u32, then the compressed payload
//!
//! Checksum mismatches and decode failures are distinct errors so the reader
//! can tell torn writes from stale pointers when deciding what to retry.

use std::fs::File;
use std::io::{self, Write};
use std::os::unix::fs::FileExt;
use std::path::Path;

use crate::types::CompressionKind;

/// Size of one block, the unit the cache and the extent map work in.
pub const BLOCK_SIZE: usize = 8192;
/// Uncompressed blocks covered by one chunk.
pub const CHUNK_BLOCKS: usize = 512;
/// Uncompressed bytes covered by one chunk.
pub const CHUNK_SPAN: usize = BLOCK_SIZE * CHUNK_BLOCKS;
/// Granularity of the header area.
pub const HEADER_UNIT: usize = 4096;
/// Identifies a chunked segment file.
pub const FILE_MAGIC: u64 = 0xfdc1_19a3_84d0_778e;
/// Current format version.
pub const FORMAT_VERSION: u32 = 3;

/// Ceiling on a plausible header area. Guards the reader against allocating
/// from a corrupt header size field.
const MAX_HEADER_BYTES: u64 = 256 * HEADER_UNIT as u64;

const FILE_HEADER_LEN: usize = 36;
const CHUNK_HEADER_LEN: usize = 9;

const MAGIC_SNAPPY: u8 = 0xfd;
const MAGIC_LZ4: u8 = 0xfc;
const MAGIC_ZSTD: u8 = 0xfb;

// ============================================================================
// Errors
// ============================================================================

#[derive(Debug)]
pub enum ChunkError {
    /// The file does not start with the segment magic.
    BadMagic(u64),
    /// The format version is not one this reader understands.
    BadVersion(u32),
    /// The header names a compression code with no chunk codec.
    UnknownCompression(u32),
    /// The pointer array is malformed or the header size is implausible.
    BadPointers(String),
    /// The payload hash does not match the stored checksum.
    ChecksumMismatch { expected: u32, actual: u32 },
    /// The chunk frame carries the wrong codec magic for this file.
    BadCodecMagic { expected: u8, found: u8 },
    /// The checksum held but the codec rejected the payload.
    Decode(String),
    /// Underlying file I/O failed.
    Io(String),
}

impl std::fmt::Display for ChunkError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ChunkError::BadMagic(m) => write!(f, "bad segment magic {m:#018x}"),
            ChunkError::BadVersion(v) => {
                write!(f, "segment format version {v} is not supported (expect {FORMAT_VERSION})")
            }
            ChunkError::UnknownCompression(c) => {
                write!(f, "no chunk codec for compression code {c}")
            }
            ChunkError::BadPointers(msg) => write!(f, "bad chunk pointers: {msg}"),
            ChunkError::ChecksumMismatch { expected, actual } => {
                write!(f, "chunk checksum mismatch: stored {expected:#010x}, computed {actual:#010x}")
            }
            ChunkError::BadCodecMagic { expected, found } => {
                write!(f, "chunk codec magic {found:#04x} does not match segment codec {expected:#04x}")
            }
            ChunkError::Decode(msg) => write!(f, "chunk decode failed: {msg}"),
            ChunkError::Io(msg) => write!(f, "segment i/o failed: {msg}"),
        }
    }
}

impl std::error::Error for ChunkError {}

impl From<io::Error> for ChunkError {
    fn from(e: io::Error) -> Self {
        ChunkError::Io(e.to_string())
    }
}

// ============================================================================
// File header and pointer area
// ============================================================================

/// Decoded unit-0 header of a chunked segment file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChunkFileHeader {
    pub compression: CompressionKind,
    /// Total header bytes: unit 0 plus the pointer units. Chunk data starts
    /// here.
    pub header_size: u64,
    /// Uncompressed blocks stored in the file.
    pub block_count: u64,
    /// Width of the column this segment belongs to, in bytes.
    pub column_width: u32,
}

/// Parse the unit-0 header.
pub fn parse_file_header(unit: &[u8]) -> Result<ChunkFileHeader, ChunkError> {
    if unit.len() < FILE_HEADER_LEN {
        return Err(ChunkError::BadPointers(format!(
            "header unit of {} bytes is shorter than the {FILE_HEADER_LEN}-byte header",
            unit.len()
        )));
    }
    let magic = u64::from_le_bytes(unit[0..8].try_into().unwrap());
    if magic != FILE_MAGIC {
        return Err(ChunkError::BadMagic(magic));
    }
    let version = u32::from_le_bytes(unit[8..12].try_into().unwrap());
    if version != FORMAT_VERSION {
        return Err(ChunkError::BadVersion(version));
    }
    let code = u32::from_le_bytes(unit[12..16].try_into().unwrap());
    let compression = u8::try_from(code)
        .ok()
        .and_then(CompressionKind::from_code)
        .ok_or(ChunkError::UnknownCompression(code))?;
    let header_size = u64::from_le_bytes(unit[16..24].try_into().unwrap());
    if header_size < 2 * HEADER_UNIT as u64
        || header_size > MAX_HEADER_BYTES
        || header_size % HEADER_UNIT as u64 != 0
    {
        return Err(ChunkError::BadPointers(format!(
            "header size {header_size} is not a plausible multiple of {HEADER_UNIT}"
        )));
    }
    let block_count = u64::from_le_bytes(unit[24..32].try_into().unwrap());
    let column_width = u32::from_le_bytes(unit[32..36].try_into().unwrap());
    Ok(ChunkFileHeader { compression, header_size, block_count, column_width })
}

/// Parse the pointer units into `(file offset, byte length)` per chunk.
pub fn parse_chunk_pointers(area: &[u8]) -> Result<Vec<(u64, u64)>, ChunkError> {
    let mut offsets = Vec::new();
    for raw in area.chunks_exact(8) {
        let off = u64::from_le_bytes(raw.try_into().unwrap());
        if off == 0 {
            break;
        }
        offsets.push(off);
    }
    let mut ptrs = Vec::with_capacity(offsets.len().saturating_sub(1));
    for pair in offsets.windows(2) {
        if pair[1] <= pair[0] {
            return Err(ChunkError::BadPointers(format!(
                "offset {} does not advance past its predecessor {}",
                pair[1], pair[0]
            )));
        }
        ptrs.push((pair[0], pair[1] - pair[0]));
    }
    Ok(ptrs)
}

/// Read and parse the header and pointer area of an open segment file.
pub fn read_chunk_pointers(file: &File) -> Result<(ChunkFileHeader, Vec<(u64, u64)>), ChunkError> {
    let mut unit0 = vec![0u8; HEADER_UNIT];
    file.read_exact_at(&mut unit0, 0)?;
    let header = parse_file_header(&unit0)?;

    let area_len = (header.header_size - HEADER_UNIT as u64) as usize;
    let mut area = vec![0u8; area_len];
    file.read_exact_at(&mut area, HEADER_UNIT as u64)?;
    let ptrs = parse_chunk_pointers(&area)?;
    Ok((header, ptrs))
}

/// Chunk holding `block`, counting blocks from the start of the file.
pub fn chunk_index_for_block(block: u64) -> usize {
    (block as usize).saturating_mul(BLOCK_SIZE) / CHUNK_SPAN
}

/// Byte offset of `block` inside its decompressed chunk.
pub fn block_offset_in_chunk(block: u64) -> usize {
    (block as usize).saturating_mul(BLOCK_SIZE) % CHUNK_SPAN
}

// ============================================================================
// Chunk codec
// ============================================================================

fn codec_magic(kind: CompressionKind) -> Option<u8> {
    match kind {
        CompressionKind::Snappy => Some(MAGIC_SNAPPY),
        CompressionKind::Lz4 => Some(MAGIC_LZ4),
        CompressionKind::Zstd => Some(MAGIC_ZSTD),
        CompressionKind::None => None,
    }
}

/// Compress one span of blocks into a framed chunk.
pub fn compress_chunk(kind: CompressionKind, data: &[u8]) -> Result<Vec<u8>, ChunkError> {
    let magic = codec_magic(kind).ok_or(ChunkError::UnknownCompression(kind.code() as u32))?;
    let payload = match kind {
        CompressionKind::Snappy => snap::raw::Encoder::new()
            .compress_vec(data)
            .map_err(|e| ChunkError::Io(format!("snappy compress: {e}")))?,
        CompressionKind::Lz4 => lz4_flex::compress_prepend_size(data),
        CompressionKind::Zstd => zstd::bulk::compress(data, 1)
            .map_err(|e| ChunkError::Io(format!("zstd compress: {e}")))?,
        CompressionKind::None => return Err(ChunkError::UnknownCompression(0)),
    };
    let crc = crc32fast::hash(&payload);
    let mut out = Vec::with_capacity(CHUNK_HEADER_LEN + payload.len());
    out.push(magic);
    out.extend_from_slice(&crc.to_le_bytes());
    out.extend_from_slice(&(payload.len() as u32).to_le_bytes());
    out.extend_from_slice(&payload);
    Ok(out)
}

/// Verify and decompress a framed chunk read from a segment file.
pub fn decompress_chunk(kind: CompressionKind, raw: &[u8]) -> Result<Vec<u8>, ChunkError> {
    let magic = codec_magic(kind).ok_or(ChunkError::UnknownCompression(kind.code() as u32))?;
    if raw.len() < CHUNK_HEADER_LEN {
        return Err(ChunkError::Decode(format!(
            "chunk of {} bytes is shorter than its {CHUNK_HEADER_LEN}-byte frame",
            raw.len()
        )));
    }
    if raw[0] != magic {
        return Err(ChunkError::BadCodecMagic { expected: magic, found: raw[0] });
    }
    let stored = u32::from_le_bytes(raw[1..5].try_into().unwrap());
    let len = u32::from_le_bytes(raw[5..9].try_into().unwrap()) as usize;
    let payload = raw
        .get(CHUNK_HEADER_LEN..CHUNK_HEADER_LEN + len)
        .ok_or_else(|| {
            ChunkError::Decode(format!(
                "frame says {len} payload bytes but only {} are present",
                raw.len() - CHUNK_HEADER_LEN
            ))
        })?;
    let actual = crc32fast::hash(payload);
    if actual != stored {
        return Err(ChunkError::ChecksumMismatch { expected: stored, actual });
    }
    let out = match kind {
        CompressionKind::Snappy => snap::raw::Decoder::new()
            .decompress_vec(payload)
            .map_err(|e| ChunkError::Decode(format!("snappy: {e}")))?,
        CompressionKind::Lz4 => lz4_flex::decompress_size_prepended(payload)
            .map_err(|e| ChunkError::Decode(format!("lz4: {e}")))?,
        CompressionKind::Zstd => zstd::bulk::decompress(payload, CHUNK_SPAN)
            .map_err(|e| ChunkError::Decode(format!("zstd: {e}")))?,
        CompressionKind::None => return Err(ChunkError::UnknownCompression(0)),
    };
    if out.len() > CHUNK_SPAN {
        return Err(ChunkError::Decode(format!(
            "chunk inflated to {} bytes, past the {CHUNK_SPAN}-byte span",
            out.len()
        )));
    }
    Ok(out)
}

// ============================================================================
// Writer
// ============================================================================

/// Write `data` as a chunked segment file so tools and tests can produce
/// files the reader accepts. Returns the header that was written.
pub fn write_chunked_file(
    path: &Path,
    kind: CompressionKind,
    column_width: u32,
    data: &[u8],
) -> Result<ChunkFileHeader, ChunkError> {
    let chunks: Vec<Vec<u8>> = data
        .chunks(CHUNK_SPAN)
        .map(|span| compress_chunk(kind, span))
        .collect::<Result<_, _>>()?;

    // One offset per chunk, one end-of-data offset, one zero terminator.
    let offsets_needed = chunks.len() + 2;
    let ptr_units = (offsets_needed * 8).div_ceil(HEADER_UNIT).max(1);
    let header_size = (HEADER_UNIT * (1 + ptr_units)) as u64;
    let header = ChunkFileHeader {
        compression: kind,
        header_size,
        block_count: data.len().div_ceil(BLOCK_SIZE) as u64,
        column_width,
    };

    let mut unit0 = vec![0u8; HEADER_UNIT];
    unit0[0..8].copy_from_slice(&FILE_MAGIC.to_le_bytes());
    unit0[8..12].copy_from_slice(&FORMAT_VERSION.to_le_bytes());
    unit0[12..16].copy_from_slice(&(kind.code() as u32).to_le_bytes());
    unit0[16..24].copy_from_slice(&header_size.to_le_bytes());
    unit0[24..32].copy_from_slice(&header.block_count.to_le_bytes());
    unit0[32..36].copy_from_slice(&column_width.to_le_bytes());

    let mut area = vec![0u8; HEADER_UNIT * ptr_units];
    let mut offset = header_size;
    for (i, chunk) in chunks.iter().enumerate() {
        area[i * 8..i * 8 + 8].copy_from_slice(&offset.to_le_bytes());
        offset += chunk.len() as u64;
    }
    let end = chunks.len() * 8;
    area[end..end + 8].copy_from_slice(&offset.to_le_bytes());

    let mut file = File::create(path)?;
    file.write_all(&unit0)?;
    file.write_all(&area)?;
    for chunk in &chunks {
        file.write_all(chunk)?;
    }
    Ok(header)
}
