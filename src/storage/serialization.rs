//! Flat byte serialization for voxel blocks.
//!
//! Layout: `sx, sy, sz` as little-endian u32, then for each of the 8
//! channels a depth index byte, a compression flag byte (0 = uniform,
//! 1 = raw), the default value in depth-width little-endian bytes, and for
//! raw channels the channel buffer. Channel buffers are copied as-is; the
//! in-memory layout assumes a little-endian host.

use glam::IVec3;

use crate::core::{Error, Result};
use crate::storage::block::{VoxelBlock, MAX_CHANNELS};
use crate::storage::encoding::{self, Depth};

const FLAG_UNIFORM: u8 = 0;
const FLAG_RAW: u8 = 1;

fn write_defval(out: &mut Vec<u8>, value: u64, depth: Depth) {
    out.extend_from_slice(&value.to_le_bytes()[..depth.byte_count()]);
}

fn read_defval(bytes: &[u8], cursor: &mut usize, depth: Depth) -> Result<u64> {
    let width = depth.byte_count();
    let field = bytes
        .get(*cursor..*cursor + width)
        .ok_or_else(|| Error::Serialization("truncated defval field".to_string()))?;
    *cursor += width;
    let mut buffer = [0u8; 8];
    buffer[..width].copy_from_slice(field);
    Ok(u64::from_le_bytes(buffer))
}

/// Serialize a block to bytes (uncompressed).
pub fn serialize_block(block: &VoxelBlock) -> Vec<u8> {
    let size = block.size();
    let mut out = Vec::new();
    out.extend_from_slice(&(size.x as u32).to_le_bytes());
    out.extend_from_slice(&(size.y as u32).to_le_bytes());
    out.extend_from_slice(&(size.z as u32).to_le_bytes());

    for channel_index in 0..MAX_CHANNELS {
        let depth = block.channel_depth(channel_index);
        out.push(depth.index());
        match block.channel_bytes(channel_index) {
            None => {
                out.push(FLAG_UNIFORM);
                write_defval(&mut out, block.channel_defval(channel_index), depth);
            }
            Some(bytes) => {
                out.push(FLAG_RAW);
                write_defval(&mut out, block.channel_defval(channel_index), depth);
                out.extend_from_slice(bytes);
            }
        }
    }
    out
}

/// Deserialize a block from bytes (uncompressed). Strict: bad depth
/// indices, unclamped defaults, zero dimensions, truncated or trailing
/// bytes are all errors.
pub fn deserialize_block(bytes: &[u8]) -> Result<VoxelBlock> {
    let mut cursor = 0usize;

    let read_u32 = |cursor: &mut usize| -> Result<u32> {
        let field = bytes
            .get(*cursor..*cursor + 4)
            .ok_or_else(|| Error::Serialization("truncated dimensions".to_string()))?;
        *cursor += 4;
        Ok(u32::from_le_bytes([field[0], field[1], field[2], field[3]]))
    };
    let sx = read_u32(&mut cursor)?;
    let sy = read_u32(&mut cursor)?;
    let sz = read_u32(&mut cursor)?;
    if sx == 0 || sy == 0 || sz == 0 || sx > i32::MAX as u32 || sy > i32::MAX as u32 || sz > i32::MAX as u32 {
        return Err(Error::Serialization(format!(
            "invalid block dimensions {}x{}x{}",
            sx, sy, sz
        )));
    }
    let volume = (sx as u64)
        .checked_mul(sy as u64)
        .and_then(|v| v.checked_mul(sz as u64))
        .filter(|&v| v <= usize::MAX as u64)
        .ok_or_else(|| Error::Serialization("block volume overflow".to_string()))? as usize;

    let mut block = VoxelBlock::new(IVec3::new(sx as i32, sy as i32, sz as i32));

    for channel_index in 0..MAX_CHANNELS {
        let header = bytes
            .get(cursor..cursor + 2)
            .ok_or_else(|| Error::Serialization("truncated channel header".to_string()))?;
        cursor += 2;
        let depth = Depth::from_index(header[0]).ok_or_else(|| {
            Error::Serialization(format!("invalid depth index {}", header[0]))
        })?;
        let flag = header[1];

        block.set_channel_depth(channel_index, depth);
        let defval = read_defval(bytes, &mut cursor, depth)?;
        if defval > depth.max_value() {
            return Err(Error::Serialization(format!(
                "default value {} exceeds depth max",
                defval
            )));
        }
        block.clear_channel(channel_index, defval);

        match flag {
            FLAG_UNIFORM => {}
            FLAG_RAW => {
                let len = encoding::size_in_bytes(volume, depth);
                let payload = bytes
                    .get(cursor..cursor + len)
                    .ok_or_else(|| Error::Serialization("truncated channel buffer".to_string()))?;
                cursor += len;
                block.decompress_channel(channel_index);
                if let Some(dst) = block.channel_bytes_mut(channel_index) {
                    dst.copy_from_slice(payload);
                }
            }
            _ => {
                return Err(Error::Serialization(format!(
                    "invalid compression flag {}",
                    flag
                )))
            }
        }
    }

    if cursor != bytes.len() {
        return Err(Error::Serialization(format!(
            "{} trailing bytes",
            bytes.len() - cursor
        )));
    }
    Ok(block)
}

/// Serialize and LZ4-compress a block.
pub fn compress_block(block: &VoxelBlock) -> Vec<u8> {
    lz4_flex::compress_prepend_size(&serialize_block(block))
}

/// Decompress and deserialize a block.
pub fn decompress_block(data: &[u8]) -> Result<VoxelBlock> {
    let decompressed = lz4_flex::decompress_size_prepended(data)
        .map_err(|e| Error::Serialization(format!("LZ4 decompression failed: {}", e)))?;
    deserialize_block(&decompressed)
}
