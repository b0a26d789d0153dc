//! Multi-channel voxel block container.
//!
//! A block owns up to [`MAX_CHANNELS`] parallel 3D arrays over the same
//! cubic region. Each channel has its own bit depth and is either
//! materialised (an owned buffer from the global memory pool) or
//! uniform-compressed: no buffer, every voxel logically equal to the
//! channel's default value.
//!
//! Linear indexing is `z * sx * sy + x * sy + y`, so contiguous runs are
//! Y-runs. `fill_area` and the area copy rely on that ordering.

use glam::IVec3;

use crate::storage::encoding::{self, clamp_value, raw_to_real, real_to_raw, Depth};
use crate::storage::memory_pool::BLOCK_MEMORY_POOL;

/// Number of channels per block.
pub const MAX_CHANNELS: usize = 8;

/// Fixed channel identities.
pub mod channels {
    /// Blocky voxel type IDs.
    pub const TYPE: usize = 0;
    /// Signed distance field.
    pub const SDF: usize = 1;
    pub const DATA2: usize = 2;
    pub const DATA3: usize = 3;
    pub const DATA4: usize = 4;
    pub const DATA5: usize = 5;
    pub const DATA6: usize = 6;
    pub const DATA7: usize = 7;
}

/// Storage state of a channel.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Compression {
    /// No buffer; every voxel equals the channel default.
    Uniform,
    /// Materialised buffer.
    None,
}

struct Channel {
    depth: Depth,
    /// Fallback raw value when no buffer is allocated. Always clamped to depth.
    defval: u64,
    /// Pooled 64-bit words; the live byte range is `[0, size_in_bytes)`.
    data: Option<Box<[u64]>>,
    size_in_bytes: usize,
}

impl Channel {
    fn new(defval: u64) -> Self {
        Self {
            depth: Depth::default(),
            defval,
            data: None,
            size_in_bytes: 0,
        }
    }
}

#[inline]
fn channel_bytes(words: &[u64], size_in_bytes: usize) -> &[u8] {
    &bytemuck::cast_slice(words)[..size_in_bytes]
}

#[inline]
fn channel_bytes_mut(words: &mut [u64], size_in_bytes: usize) -> &mut [u8] {
    &mut bytemuck::cast_slice_mut(words)[..size_in_bytes]
}

fn read_raw(words: &[u64], size_in_bytes: usize, depth: Depth, i: usize) -> u64 {
    match depth {
        Depth::D1 => {
            let bytes = channel_bytes(words, size_in_bytes);
            ((bytes[i >> 3] >> (i & 7)) & 1) as u64
        }
        Depth::D8 => channel_bytes(words, size_in_bytes)[i] as u64,
        Depth::D16 => bytemuck::cast_slice::<u64, u16>(words)[i] as u64,
        Depth::D24 => {
            let bytes = channel_bytes(words, size_in_bytes);
            bytes[i * 3] as u64 | (bytes[i * 3 + 1] as u64) << 8 | (bytes[i * 3 + 2] as u64) << 16
        }
        Depth::D32 => bytemuck::cast_slice::<u64, u32>(words)[i] as u64,
        Depth::D64 => words[i],
    }
}

fn write_raw(words: &mut [u64], size_in_bytes: usize, depth: Depth, i: usize, value: u64) {
    match depth {
        Depth::D1 => {
            let bytes = channel_bytes_mut(words, size_in_bytes);
            let mask = 1u8 << (i & 7);
            if value != 0 {
                bytes[i >> 3] |= mask;
            } else {
                bytes[i >> 3] &= !mask;
            }
        }
        Depth::D8 => channel_bytes_mut(words, size_in_bytes)[i] = value as u8,
        Depth::D16 => bytemuck::cast_slice_mut::<u64, u16>(words)[i] = value as u16,
        Depth::D24 => {
            let bytes = channel_bytes_mut(words, size_in_bytes);
            bytes[i * 3] = value as u8;
            bytes[i * 3 + 1] = (value >> 8) as u8;
            bytes[i * 3 + 2] = (value >> 16) as u8;
        }
        Depth::D32 => bytemuck::cast_slice_mut::<u64, u32>(words)[i] = value as u32,
        Depth::D64 => words[i] = value,
    }
}

fn fill_raw(words: &mut [u64], size_in_bytes: usize, volume: usize, depth: Depth, value: u64) {
    match depth {
        Depth::D1 => {
            channel_bytes_mut(words, size_in_bytes).fill(if value != 0 { 0xff } else { 0 })
        }
        Depth::D8 => channel_bytes_mut(words, size_in_bytes).fill(value as u8),
        Depth::D16 => bytemuck::cast_slice_mut::<u64, u16>(words)[..volume].fill(value as u16),
        Depth::D24 => {
            let pattern = [value as u8, (value >> 8) as u8, (value >> 16) as u8];
            for triple in channel_bytes_mut(words, size_in_bytes).chunks_exact_mut(3) {
                triple.copy_from_slice(&pattern);
            }
        }
        Depth::D32 => bytemuck::cast_slice_mut::<u64, u32>(words)[..volume].fill(value as u32),
        Depth::D64 => words[..volume].fill(value),
    }
}

/// Allocate and prime a channel buffer with `fill_value`.
fn create_channel_data(channel: &mut Channel, volume: usize, fill_value: u64) {
    let size_in_bytes = encoding::size_in_bytes(volume, channel.depth);
    let mut words = BLOCK_MEMORY_POOL.allocate(size_in_bytes);
    fill_raw(&mut words, size_in_bytes, volume, channel.depth, fill_value);
    channel.data = Some(words);
    channel.size_in_bytes = size_in_bytes;
}

/// Allocate a channel buffer without priming it. Every byte must be
/// overwritten before it can be read.
fn create_channel_data_noinit(channel: &mut Channel, volume: usize) {
    let size_in_bytes = encoding::size_in_bytes(volume, channel.depth);
    channel.data = Some(BLOCK_MEMORY_POOL.allocate(size_in_bytes));
    channel.size_in_bytes = size_in_bytes;
}

fn delete_channel_data(channel: &mut Channel) {
    if let Some(words) = channel.data.take() {
        BLOCK_MEMORY_POOL.recycle(words);
        channel.size_in_bytes = 0;
    }
}

#[inline]
fn sort_min_max(a: IVec3, b: IVec3) -> (IVec3, IVec3) {
    (a.min(b), a.max(b))
}

/// 3D multi-channel voxel container backed by the global memory pool.
pub struct VoxelBlock {
    channels: [Channel; MAX_CHANNELS],
    size: IVec3,
}

impl VoxelBlock {
    /// Create a block of the given size. All channels start uniform with
    /// their default value; the SDF channel defaults to the "empty"
    /// sentinel (maximum positive of its depth).
    pub fn new(size: IVec3) -> Self {
        let mut block = Self::default();
        block.create(size.x, size.y, size.z);
        block
    }

    /// Block dimensions in voxels.
    #[inline]
    pub fn size(&self) -> IVec3 {
        self.size
    }

    /// Number of voxels per channel.
    #[inline]
    pub fn volume(&self) -> usize {
        (self.size.x * self.size.y * self.size.z) as usize
    }

    /// Linear index of a position. Rows run along Y.
    #[inline]
    pub fn index(&self, x: i32, y: i32, z: i32) -> usize {
        (z * self.size.x * self.size.y + x * self.size.y + y) as usize
    }

    #[inline]
    fn contains(&self, x: i32, y: i32, z: i32) -> bool {
        x >= 0 && y >= 0 && z >= 0 && x < self.size.x && y < self.size.y && z < self.size.z
    }

    #[inline]
    fn check_channel(&self, channel_index: usize) -> bool {
        debug_assert!(channel_index < MAX_CHANNELS, "channel index out of range");
        if channel_index >= MAX_CHANNELS {
            log::error!("channel index {} out of range", channel_index);
            return false;
        }
        true
    }

    /// Resize the block. Fails silently on non-positive dimensions.
    ///
    /// Materialised channels are re-created primed with their own default
    /// value; uniform channels stay uniform.
    pub fn create(&mut self, sx: i32, sy: i32, sz: i32) {
        if sx <= 0 || sy <= 0 || sz <= 0 {
            return;
        }
        let new_size = IVec3::new(sx, sy, sz);
        if new_size == self.size {
            return;
        }
        let new_volume = (sx * sy * sz) as usize;
        for channel in &mut self.channels {
            if channel.data.is_some() {
                delete_channel_data(channel);
                create_channel_data(channel, new_volume, channel.defval);
            }
        }
        self.size = new_size;
    }

    /// Free every materialised channel. Default values are retained.
    pub fn clear(&mut self) {
        for channel in &mut self.channels {
            delete_channel_data(channel);
        }
    }

    /// Make a channel uniform with the given value (clamped to its depth).
    pub fn clear_channel(&mut self, channel_index: usize, clear_value: u64) {
        if !self.check_channel(channel_index) {
            return;
        }
        let channel = &mut self.channels[channel_index];
        delete_channel_data(channel);
        channel.defval = clamp_value(clear_value, channel.depth);
    }

    /// [`Self::clear_channel`] with a real value routed through the
    /// channel's encoding.
    pub fn clear_channel_f(&mut self, channel_index: usize, clear_value: f64) {
        if !self.check_channel(channel_index) {
            return;
        }
        let raw = real_to_raw(clear_value, self.channels[channel_index].depth);
        self.clear_channel(channel_index, raw);
    }

    /// Set every channel's default value without touching allocated data.
    pub fn set_default_values(&mut self, values: [u64; MAX_CHANNELS]) {
        for (channel, &value) in self.channels.iter_mut().zip(values.iter()) {
            channel.defval = clamp_value(value, channel.depth);
        }
    }

    /// Read a voxel. Out-of-range positions return the channel default.
    pub fn get_voxel(&self, x: i32, y: i32, z: i32, channel_index: usize) -> u64 {
        if !self.check_channel(channel_index) {
            return 0;
        }
        let channel = &self.channels[channel_index];
        if !self.contains(x, y, z) {
            return channel.defval;
        }
        match &channel.data {
            None => channel.defval,
            Some(words) => read_raw(
                words,
                channel.size_in_bytes,
                channel.depth,
                self.index(x, y, z),
            ),
        }
    }

    /// Write a voxel (clamped to the channel depth). Out-of-range
    /// positions log an error and leave the block untouched.
    ///
    /// Writing the default value into a uniform channel does not allocate.
    /// Any other write materialises the channel primed with the default
    /// first, so unwritten voxels stay correct.
    pub fn set_voxel(&mut self, value: u64, x: i32, y: i32, z: i32, channel_index: usize) {
        if !self.check_channel(channel_index) {
            return;
        }
        if !self.contains(x, y, z) {
            log::error!(
                "voxel position ({}, {}, {}) out of bounds {}",
                x,
                y,
                z,
                self.size
            );
            return;
        }
        self.set_voxel_unchecked(value, x, y, z, channel_index);
    }

    /// [`Self::set_voxel`] without the out-of-bounds error log. Returns
    /// whether the position was in range.
    pub fn try_set_voxel(&mut self, value: u64, x: i32, y: i32, z: i32, channel_index: usize) -> bool {
        if !self.check_channel(channel_index) {
            return false;
        }
        if !self.contains(x, y, z) {
            return false;
        }
        self.set_voxel_unchecked(value, x, y, z, channel_index);
        true
    }

    /// Caller guarantees the position is in range and the channel valid.
    fn set_voxel_unchecked(&mut self, value: u64, x: i32, y: i32, z: i32, channel_index: usize) {
        let i = self.index(x, y, z);
        let volume = self.volume();
        let channel = &mut self.channels[channel_index];
        let value = clamp_value(value, channel.depth);
        if channel.data.is_none() {
            if channel.defval == value {
                return;
            }
            create_channel_data(channel, volume, channel.defval);
        }
        if let Some(words) = &mut channel.data {
            write_raw(words, channel.size_in_bytes, channel.depth, i, value);
        }
    }

    /// Read a voxel as a real value through the channel's encoding.
    pub fn get_voxel_f(&self, x: i32, y: i32, z: i32, channel_index: usize) -> f64 {
        if !self.check_channel(channel_index) {
            return 0.0;
        }
        raw_to_real(
            self.get_voxel(x, y, z, channel_index),
            self.channels[channel_index].depth,
        )
    }

    /// Write a real value through the channel's encoding.
    pub fn set_voxel_f(&mut self, value: f64, x: i32, y: i32, z: i32, channel_index: usize) {
        if !self.check_channel(channel_index) {
            return;
        }
        let raw = real_to_raw(value, self.channels[channel_index].depth);
        self.set_voxel(raw, x, y, z, channel_index);
    }

    /// Fill a whole channel with one value.
    ///
    /// A uniform channel just changes its default; a materialised channel
    /// is overwritten in place and stays materialised (run
    /// [`Self::compress_uniform_channels`] to fold it back).
    pub fn fill(&mut self, value: u64, channel_index: usize) {
        if !self.check_channel(channel_index) {
            return;
        }
        let volume = self.volume();
        let channel = &mut self.channels[channel_index];
        let value = clamp_value(value, channel.depth);
        match &mut channel.data {
            None => channel.defval = value,
            Some(words) => fill_raw(words, channel.size_in_bytes, volume, channel.depth, value),
        }
    }

    /// [`Self::fill`] with a real value routed through the encoding.
    pub fn fill_f(&mut self, value: f64, channel_index: usize) {
        if !self.check_channel(channel_index) {
            return;
        }
        let raw = real_to_raw(value, self.channels[channel_index].depth);
        self.fill(raw, channel_index);
    }

    /// Fill a box `[min, max)` with one value. Bounds are sorted and
    /// clamped; an empty area is a no-op, as is writing the default value
    /// into a uniform channel.
    pub fn fill_area(&mut self, value: u64, min: IVec3, max: IVec3, channel_index: usize) {
        if !self.check_channel(channel_index) {
            return;
        }
        let (min, max) = sort_min_max(min, max);
        let min = min.clamp(IVec3::ZERO, self.size);
        let max = max.clamp(IVec3::ZERO, self.size);
        let area = max - min;
        if area.x == 0 || area.y == 0 || area.z == 0 {
            return;
        }

        let volume = self.volume();
        let value = clamp_value(value, self.channels[channel_index].depth);
        {
            let channel = &mut self.channels[channel_index];
            if channel.data.is_none() {
                if channel.defval == value {
                    return;
                }
                create_channel_data(channel, volume, channel.defval);
            }
        }

        let depth = self.channels[channel_index].depth;
        match depth {
            // No Y-run fast path; go through the regular write.
            Depth::D1 | Depth::D24 => {
                for z in min.z..max.z {
                    for x in min.x..max.x {
                        for y in min.y..max.y {
                            self.set_voxel_unchecked(value, x, y, z, channel_index);
                        }
                    }
                }
            }
            _ => {
                let (sx, sy) = (self.size.x, self.size.y);
                let run = area.y as usize;
                let channel = &mut self.channels[channel_index];
                if let Some(words) = &mut channel.data {
                    for z in min.z..max.z {
                        for x in min.x..max.x {
                            let ri = (z * sx * sy + x * sy + min.y) as usize;
                            match depth {
                                Depth::D8 => channel_bytes_mut(words, channel.size_in_bytes)
                                    [ri..ri + run]
                                    .fill(value as u8),
                                Depth::D16 => bytemuck::cast_slice_mut::<u64, u16>(words)
                                    [ri..ri + run]
                                    .fill(value as u16),
                                Depth::D32 => bytemuck::cast_slice_mut::<u64, u32>(words)
                                    [ri..ri + run]
                                    .fill(value as u32),
                                Depth::D64 => words[ri..ri + run].fill(value),
                                Depth::D1 | Depth::D24 => unreachable!(),
                            }
                        }
                    }
                }
            }
        }
    }

    /// Whether every voxel of a channel holds the same value.
    ///
    /// A uniform-compressed channel is trivially uniform. Materialised
    /// channels are scanned element-wise; D1 and D24 scan bytes, with the
    /// D1 tail byte masked to the valid bit count.
    pub fn is_uniform(&self, channel_index: usize) -> bool {
        if !self.check_channel(channel_index) {
            return true;
        }
        let channel = &self.channels[channel_index];
        let Some(words) = &channel.data else {
            return true;
        };
        let volume = self.volume();
        match channel.depth {
            Depth::D1 => {
                let bytes = channel_bytes(words, channel.size_in_bytes);
                let first = bytes[0];
                let full_bytes = volume / 8;
                if bytes[..full_bytes].iter().any(|&b| b != first) {
                    return false;
                }
                let tail_bits = volume % 8;
                if tail_bits > 0 {
                    let mask = (1u8 << tail_bits) - 1;
                    if (bytes[full_bytes] ^ first) & mask != 0 {
                        return false;
                    }
                }
                true
            }
            Depth::D8 => {
                let bytes = channel_bytes(words, channel.size_in_bytes);
                bytes.iter().all(|&b| b == bytes[0])
            }
            Depth::D16 => {
                let values = &bytemuck::cast_slice::<u64, u16>(words)[..volume];
                values.iter().all(|&v| v == values[0])
            }
            Depth::D24 => {
                let bytes = channel_bytes(words, channel.size_in_bytes);
                bytes.iter().all(|&b| b == bytes[0])
            }
            Depth::D32 => {
                let values = &bytemuck::cast_slice::<u64, u32>(words)[..volume];
                values.iter().all(|&v| v == values[0])
            }
            Depth::D64 => {
                let values = &words[..volume];
                values.iter().all(|&v| v == values[0])
            }
        }
    }

    /// Fold every materialised-but-uniform channel back to uniform state.
    pub fn compress_uniform_channels(&mut self) {
        for channel_index in 0..MAX_CHANNELS {
            if self.channels[channel_index].data.is_none() {
                continue;
            }
            if !self.is_uniform(channel_index) {
                continue;
            }
            let channel = &self.channels[channel_index];
            let first = match &channel.data {
                Some(words) => read_raw(words, channel.size_in_bytes, channel.depth, 0),
                None => continue,
            };
            self.clear_channel(channel_index, first);
        }
    }

    /// Materialise a uniform channel as a buffer filled with its default.
    pub fn decompress_channel(&mut self, channel_index: usize) {
        if !self.check_channel(channel_index) {
            return;
        }
        let volume = self.volume();
        let channel = &mut self.channels[channel_index];
        if channel.data.is_none() {
            create_channel_data(channel, volume, channel.defval);
        }
    }

    /// Storage state of a channel.
    pub fn channel_compression(&self, channel_index: usize) -> Compression {
        if !self.check_channel(channel_index) {
            return Compression::None;
        }
        match self.channels[channel_index].data {
            None => Compression::Uniform,
            Some(_) => Compression::None,
        }
    }

    /// Full copy of one channel. Requires equal block sizes and equal
    /// channel depths.
    pub fn copy_channel_from(&mut self, other: &VoxelBlock, channel_index: usize) {
        if !self.check_channel(channel_index) {
            return;
        }
        if other.size != self.size {
            log::error!("copy_channel_from: size mismatch {} vs {}", other.size, self.size);
            return;
        }
        let other_channel = &other.channels[channel_index];
        let channel = &mut self.channels[channel_index];
        if other_channel.depth != channel.depth {
            log::error!("copy_channel_from: channel {} depth mismatch", channel_index);
            return;
        }
        match &other_channel.data {
            Some(src_words) => {
                if channel.data.is_none() {
                    create_channel_data_noinit(channel, (self.size.x * self.size.y * self.size.z) as usize);
                }
                if let Some(dst_words) = &mut channel.data {
                    channel_bytes_mut(dst_words, channel.size_in_bytes)
                        .copy_from_slice(channel_bytes(src_words, other_channel.size_in_bytes));
                }
            }
            None => delete_channel_data(channel),
        }
        channel.defval = other_channel.defval;
    }

    /// Full copy of all channels. Requires equal sizes and per-channel
    /// equal depths.
    pub fn copy_from(&mut self, other: &VoxelBlock) {
        for channel_index in 0..MAX_CHANNELS {
            self.copy_channel_from(other, channel_index);
        }
    }

    /// Copy a box of voxels from `other` into this block.
    ///
    /// The source range is sorted and clamped to the source block, the
    /// destination origin to this block, and the copied extent to what
    /// fits at the destination. Same-depth channels only. When the area
    /// spans both blocks entirely this degrades to a full channel copy.
    pub fn copy_channel_from_area(
        &mut self,
        other: &VoxelBlock,
        src_min: IVec3,
        src_max: IVec3,
        dst_min: IVec3,
        channel_index: usize,
    ) {
        if !self.check_channel(channel_index) {
            return;
        }
        {
            let channel = &self.channels[channel_index];
            let other_channel = &other.channels[channel_index];
            if other_channel.depth != channel.depth {
                log::error!("copy_channel_from_area: channel {} depth mismatch", channel_index);
                return;
            }
            if channel.data.is_none()
                && other_channel.data.is_none()
                && channel.defval == other_channel.defval
            {
                return;
            }
        }

        let (src_min, src_max) = sort_min_max(src_min, src_max);
        let src_min = src_min.clamp(IVec3::ZERO, other.size);
        let src_max = src_max.clamp(IVec3::ZERO, other.size);
        let dst_min = dst_min.clamp(IVec3::ZERO, self.size);
        let area = (src_max - src_min).min(self.size - dst_min);

        if area == self.size && area == other.size {
            self.copy_channel_from(other, channel_index);
            return;
        }

        let depth = self.channels[channel_index].depth;
        if other.channels[channel_index].data.is_some() {
            let volume = self.volume();
            {
                let channel = &mut self.channels[channel_index];
                if channel.data.is_none() {
                    create_channel_data(channel, volume, channel.defval);
                }
            }

            if depth == Depth::D8 {
                // Native layout: copy row by row along Y.
                let (dst_sx, dst_sy) = (self.size.x, self.size.y);
                let (src_sx, src_sy) = (other.size.x, other.size.y);
                let run = area.y as usize;
                let other_channel = &other.channels[channel_index];
                let channel = &mut self.channels[channel_index];
                if let (Some(dst_words), Some(src_words)) = (&mut channel.data, &other_channel.data)
                {
                    let src_bytes = channel_bytes(src_words, other_channel.size_in_bytes);
                    let dst_bytes = channel_bytes_mut(dst_words, channel.size_in_bytes);
                    for z in 0..area.z {
                        for x in 0..area.x {
                            let src_ri = ((z + src_min.z) * src_sx * src_sy
                                + (x + src_min.x) * src_sy
                                + src_min.y) as usize;
                            let dst_ri = ((z + dst_min.z) * dst_sx * dst_sy
                                + (x + dst_min.x) * dst_sy
                                + dst_min.y) as usize;
                            dst_bytes[dst_ri..dst_ri + run]
                                .copy_from_slice(&src_bytes[src_ri..src_ri + run]);
                        }
                    }
                }
            } else {
                for z in 0..area.z {
                    for x in 0..area.x {
                        for y in 0..area.y {
                            let v = other.get_voxel(
                                src_min.x + x,
                                src_min.y + y,
                                src_min.z + z,
                                channel_index,
                            );
                            self.set_voxel_unchecked(
                                v,
                                dst_min.x + x,
                                dst_min.y + y,
                                dst_min.z + z,
                                channel_index,
                            );
                        }
                    }
                }
            }
        } else if self.channels[channel_index].defval != other.channels[channel_index].defval {
            let volume = self.volume();
            {
                let channel = &mut self.channels[channel_index];
                if channel.data.is_none() {
                    create_channel_data(channel, volume, channel.defval);
                }
            }
            let src_defval = other.channels[channel_index].defval;
            self.fill_area(src_defval, dst_min, dst_min + area, channel_index);
        }
    }

    /// Nearest-neighbour 2:1 downscale of a source box into `dst`.
    ///
    /// For each destination position `p` in range, samples
    /// `src_min + 2 * (p - dst_min)`. Channels uniform on both sides with
    /// equal defaults are skipped.
    pub fn downscale_to(&self, dst: &mut VoxelBlock, src_min: IVec3, src_max: IVec3, dst_min: IVec3) {
        let src_min = src_min.clamp(IVec3::ZERO, self.size);
        let src_max = src_max.clamp(IVec3::ZERO, self.size);
        let dst_max = dst_min + (src_max - src_min) / 2;
        let dst_min = dst_min.clamp(IVec3::ZERO, dst.size);
        let dst_max = dst_max.clamp(IVec3::ZERO, dst.size);

        for channel_index in 0..MAX_CHANNELS {
            let src_channel = &self.channels[channel_index];
            let dst_channel = &dst.channels[channel_index];
            if src_channel.data.is_none()
                && dst_channel.data.is_none()
                && src_channel.defval == dst_channel.defval
            {
                continue;
            }

            for z in dst_min.z..dst_max.z {
                for x in dst_min.x..dst_max.x {
                    for y in dst_min.y..dst_max.y {
                        let src_pos = src_min + (IVec3::new(x, y, z) - dst_min) * 2;
                        let v = self.get_voxel(src_pos.x, src_pos.y, src_pos.z, channel_index);
                        dst.set_voxel_unchecked(v, x, y, z, channel_index);
                    }
                }
            }
        }
    }

    /// Deep copy preserving per-channel depths, defaults and storage state.
    pub fn duplicate(&self) -> VoxelBlock {
        let mut block = VoxelBlock::new(self.size);
        for (dst, src) in block.channels.iter_mut().zip(self.channels.iter()) {
            dst.depth = src.depth;
            dst.defval = src.defval;
            if let Some(src_words) = &src.data {
                let mut words = BLOCK_MEMORY_POOL.allocate(src.size_in_bytes);
                channel_bytes_mut(&mut words, src.size_in_bytes)
                    .copy_from_slice(channel_bytes(src_words, src.size_in_bytes));
                dst.data = Some(words);
                dst.size_in_bytes = src.size_in_bytes;
            }
        }
        block
    }

    /// Structural equality: sizes, depths and storage states must match.
    ///
    /// A uniform channel and a materialised channel holding the same value
    /// everywhere compare as different; fold with
    /// [`Self::compress_uniform_channels`] first for logical comparison.
    pub fn equals(&self, other: &VoxelBlock) -> bool {
        if self.size != other.size {
            return false;
        }
        for (a, b) in self.channels.iter().zip(other.channels.iter()) {
            if a.depth != b.depth {
                return false;
            }
            match (&a.data, &b.data) {
                (None, None) => {
                    if a.defval != b.defval {
                        return false;
                    }
                }
                (Some(wa), Some(wb)) => {
                    if a.size_in_bytes != b.size_in_bytes {
                        return false;
                    }
                    if channel_bytes(wa, a.size_in_bytes) != channel_bytes(wb, b.size_in_bytes) {
                        return false;
                    }
                }
                _ => return false,
            }
        }
        true
    }

    /// Change a channel's depth. Any materialised data is dropped (no
    /// conversion); the default value is re-clamped to the new depth.
    pub fn set_channel_depth(&mut self, channel_index: usize, new_depth: Depth) {
        if !self.check_channel(channel_index) {
            return;
        }
        let channel = &mut self.channels[channel_index];
        if channel.depth == new_depth {
            return;
        }
        if channel.data.is_some() {
            log::warn!(
                "changing depth of channel {} with data present, resetting the channel",
                channel_index
            );
            delete_channel_data(channel);
        }
        channel.depth = new_depth;
        channel.defval = clamp_value(channel.defval, new_depth);
    }

    pub fn channel_depth(&self, channel_index: usize) -> Depth {
        if !self.check_channel(channel_index) {
            return Depth::default();
        }
        self.channels[channel_index].depth
    }

    pub fn channel_defval(&self, channel_index: usize) -> u64 {
        if !self.check_channel(channel_index) {
            return 0;
        }
        self.channels[channel_index].defval
    }

    /// Raw byte view of a materialised channel, or `None` if uniform.
    pub fn channel_bytes(&self, channel_index: usize) -> Option<&[u8]> {
        if !self.check_channel(channel_index) {
            return None;
        }
        let channel = &self.channels[channel_index];
        channel
            .data
            .as_ref()
            .map(|words| channel_bytes(words, channel.size_in_bytes))
    }

    /// Mutable raw byte view of a materialised channel. Streams use this
    /// to load persisted bytes directly into a block.
    pub fn channel_bytes_mut(&mut self, channel_index: usize) -> Option<&mut [u8]> {
        if !self.check_channel(channel_index) {
            return None;
        }
        let channel = &mut self.channels[channel_index];
        let size_in_bytes = channel.size_in_bytes;
        channel
            .data
            .as_mut()
            .map(|words| channel_bytes_mut(words, size_in_bytes))
    }
}

impl Default for VoxelBlock {
    fn default() -> Self {
        let mut block = Self {
            channels: std::array::from_fn(|_| Channel::new(0)),
            size: IVec3::ZERO,
        };
        // SDF defaults to the "empty" sentinel: maximum positive of D8.
        block.channels[channels::SDF].defval = Depth::default().max_value();
        block
    }
}

impl Drop for VoxelBlock {
    fn drop(&mut self) {
        self.clear();
    }
}

impl std::fmt::Debug for VoxelBlock {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VoxelBlock")
            .field("size", &self.size)
            .field(
                "materialized",
                &self
                    .channels
                    .iter()
                    .map(|c| c.data.is_some())
                    .collect::<Vec<_>>(),
            )
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn block16() -> VoxelBlock {
        VoxelBlock::new(IVec3::splat(16))
    }

    #[test]
    fn test_new_block_is_uniform() {
        let block = block16();
        assert_eq!(block.size(), IVec3::splat(16));
        assert_eq!(block.volume(), 4096);
        for channel_index in 0..MAX_CHANNELS {
            assert_eq!(block.channel_compression(channel_index), Compression::Uniform);
        }
        assert_eq!(block.channel_defval(channels::TYPE), 0);
        assert_eq!(block.channel_defval(channels::SDF), 255);
    }

    #[test]
    fn test_sdf_default_reads_as_positive_one() {
        let block = block16();
        let sdf = block.get_voxel_f(0, 0, 0, channels::SDF);
        // defval 255 decodes to (255 - 127) / 127, just above 1.
        assert!((sdf - 1.0).abs() <= 1.0 / 127.0 + 1e-9);
        assert!(sdf >= 1.0);
    }

    #[test]
    fn test_create_rejects_bad_sizes() {
        let mut block = block16();
        block.create(0, 8, 8);
        block.create(-4, 8, 8);
        assert_eq!(block.size(), IVec3::splat(16));
    }

    #[test]
    fn test_index_ordering() {
        let block = VoxelBlock::new(IVec3::new(4, 5, 6));
        // Rows run along Y.
        assert_eq!(block.index(0, 0, 0), 0);
        assert_eq!(block.index(0, 1, 0), 1);
        assert_eq!(block.index(1, 0, 0), 5);
        assert_eq!(block.index(0, 0, 1), 20);
        assert_eq!(block.index(2, 3, 1), 20 + 10 + 3);
    }

    #[test]
    fn test_set_voxel_materializes_primed() {
        let mut block = block16();
        block.set_voxel(42, 3, 4, 5, channels::TYPE);
        assert_eq!(block.channel_compression(channels::TYPE), Compression::None);
        assert!(!block.is_uniform(channels::TYPE));
        assert_eq!(block.get_voxel(3, 4, 5, channels::TYPE), 42);
        // Unwritten voxels keep the default.
        assert_eq!(block.get_voxel(0, 0, 0, channels::TYPE), 0);
        assert_eq!(block.get_voxel(15, 15, 15, channels::TYPE), 0);
    }

    #[test]
    fn test_set_default_value_does_not_allocate() {
        let mut block = block16();
        block.set_voxel(0, 3, 4, 5, channels::TYPE);
        assert_eq!(block.channel_compression(channels::TYPE), Compression::Uniform);
    }

    #[test]
    fn test_set_voxel_clamps() {
        let mut block = block16();
        block.set_voxel(300, 1, 1, 1, channels::TYPE);
        assert_eq!(block.get_voxel(1, 1, 1, channels::TYPE), 255);
    }

    #[test]
    fn test_get_voxel_out_of_bounds_returns_defval() {
        let mut block = block16();
        block.fill(9, channels::TYPE);
        block.clear_channel(channels::TYPE, 7);
        assert_eq!(block.get_voxel(-1, 0, 0, channels::TYPE), 7);
        assert_eq!(block.get_voxel(0, 16, 0, channels::TYPE), 7);
    }

    #[test]
    fn test_try_set_voxel_out_of_bounds() {
        let mut block = block16();
        assert!(!block.try_set_voxel(5, -1, 0, 0, channels::TYPE));
        assert!(block.try_set_voxel(5, 1, 0, 0, channels::TYPE));
        assert_eq!(block.get_voxel(1, 0, 0, channels::TYPE), 5);
    }

    #[test]
    fn test_raw_roundtrip_all_depths() {
        for depth in [Depth::D1, Depth::D8, Depth::D16, Depth::D24, Depth::D32, Depth::D64] {
            let mut block = VoxelBlock::new(IVec3::splat(8));
            block.set_channel_depth(channels::DATA3, depth);
            let value = 0x0123_4567_89ab_cdefu64;
            block.set_voxel(value, 2, 3, 4, channels::DATA3);
            assert_eq!(
                block.get_voxel(2, 3, 4, channels::DATA3),
                clamp_value(value, depth),
                "depth {:?}",
                depth
            );
        }
    }

    #[test]
    fn test_fill_then_compress() {
        let mut block = block16();
        block.fill(7, channels::TYPE);
        // Uniform channel: only the default changed, no allocation.
        assert_eq!(block.channel_compression(channels::TYPE), Compression::Uniform);
        assert_eq!(block.get_voxel(8, 8, 8, channels::TYPE), 7);

        // Materialise, refill, then fold back.
        block.set_voxel(1, 0, 0, 0, channels::TYPE);
        block.fill(7, channels::TYPE);
        assert_eq!(block.channel_compression(channels::TYPE), Compression::None);
        assert!(block.is_uniform(channels::TYPE));
        block.compress_uniform_channels();
        assert_eq!(block.channel_compression(channels::TYPE), Compression::Uniform);
        assert_eq!(block.channel_defval(channels::TYPE), 7);
    }

    #[test]
    fn test_fill_idempotent() {
        let mut block = block16();
        block.set_voxel(3, 0, 0, 0, channels::TYPE);
        block.fill(5, channels::TYPE);
        let once = block.duplicate();
        block.fill(5, channels::TYPE);
        assert!(block.equals(&once));
    }

    #[test]
    fn test_compress_idempotent() {
        let mut block = block16();
        block.set_voxel(9, 0, 0, 0, channels::TYPE);
        block.fill(9, channels::TYPE);
        block.compress_uniform_channels();
        let once = block.duplicate();
        block.compress_uniform_channels();
        assert!(block.equals(&once));
        assert_eq!(block.channel_compression(channels::TYPE), Compression::Uniform);
    }

    #[test]
    fn test_compress_uses_depth_correct_first_value() {
        let mut block = VoxelBlock::new(IVec3::splat(4));
        block.set_channel_depth(channels::DATA2, Depth::D16);
        block.fill(0x1234, channels::DATA2);
        block.decompress_channel(channels::DATA2);
        block.compress_uniform_channels();
        assert_eq!(block.channel_compression(channels::DATA2), Compression::Uniform);
        assert_eq!(block.channel_defval(channels::DATA2), 0x1234);
    }

    #[test]
    fn test_fill_area() {
        let mut block = block16();
        block.fill_area(4, IVec3::new(2, 3, 4), IVec3::new(6, 7, 8), channels::TYPE);
        for z in 0..16 {
            for x in 0..16 {
                for y in 0..16 {
                    let inside = (2..6).contains(&x) && (3..7).contains(&y) && (4..8).contains(&z);
                    let expected = if inside { 4 } else { 0 };
                    assert_eq!(block.get_voxel(x, y, z, channels::TYPE), expected);
                }
            }
        }
    }

    #[test]
    fn test_fill_area_swapped_bounds() {
        let mut a = block16();
        let mut b = block16();
        a.fill_area(4, IVec3::new(2, 3, 4), IVec3::new(6, 7, 8), channels::TYPE);
        b.fill_area(4, IVec3::new(6, 7, 8), IVec3::new(2, 3, 4), channels::TYPE);
        assert!(a.equals(&b));
    }

    #[test]
    fn test_fill_area_empty_is_noop() {
        let mut block = block16();
        let before = block.duplicate();
        block.fill_area(9, IVec3::new(3, 3, 3), IVec3::new(3, 8, 8), channels::TYPE);
        assert!(block.equals(&before));
        assert_eq!(block.channel_compression(channels::TYPE), Compression::Uniform);
    }

    #[test]
    fn test_fill_area_default_on_uniform_is_noop() {
        let mut block = block16();
        block.fill_area(0, IVec3::ZERO, IVec3::splat(8), channels::TYPE);
        assert_eq!(block.channel_compression(channels::TYPE), Compression::Uniform);
    }

    #[test]
    fn test_fill_area_d16() {
        let mut block = VoxelBlock::new(IVec3::splat(8));
        block.set_channel_depth(channels::DATA2, Depth::D16);
        block.fill_area(0xbeef, IVec3::new(1, 1, 1), IVec3::new(4, 4, 4), channels::DATA2);
        assert_eq!(block.get_voxel(2, 2, 2, channels::DATA2), 0xbeef);
        assert_eq!(block.get_voxel(4, 4, 4, channels::DATA2), 0);
    }

    #[test]
    fn test_fill_area_d24_per_voxel_path() {
        let mut block = VoxelBlock::new(IVec3::splat(8));
        block.set_channel_depth(channels::DATA2, Depth::D24);
        block.fill_area(0xab_cdef, IVec3::new(0, 0, 0), IVec3::new(2, 2, 2), channels::DATA2);
        assert_eq!(block.get_voxel(1, 1, 1, channels::DATA2), 0xab_cdef);
        assert_eq!(block.get_voxel(2, 2, 2, channels::DATA2), 0);
    }

    #[test]
    fn test_is_uniform_d1_tail_masked() {
        // 10 voxels: one full byte plus a 2-bit tail.
        let mut block = VoxelBlock::new(IVec3::new(10, 1, 1));
        block.set_channel_depth(channels::DATA2, Depth::D1);
        block.fill(1, channels::DATA2);
        block.decompress_channel(channels::DATA2);
        assert!(block.is_uniform(channels::DATA2));
        // Flip a bit inside the valid range.
        block.set_voxel(0, 9, 0, 0, channels::DATA2);
        assert!(!block.is_uniform(channels::DATA2));
    }

    #[test]
    fn test_decompress_channel() {
        let mut block = block16();
        block.clear_channel(channels::TYPE, 5);
        block.decompress_channel(channels::TYPE);
        assert_eq!(block.channel_compression(channels::TYPE), Compression::None);
        assert!(block.is_uniform(channels::TYPE));
        assert_eq!(block.get_voxel(7, 7, 7, channels::TYPE), 5);
    }

    #[test]
    fn test_copy_from_full() {
        let mut src = block16();
        src.set_voxel(11, 1, 2, 3, channels::TYPE);
        src.clear_channel(channels::DATA2, 99);
        let mut dst = block16();
        dst.set_voxel(1, 0, 0, 0, channels::DATA2);
        dst.copy_from(&src);
        assert!(dst.equals(&src));
        // Destination DATA2 went back to uniform because the source was.
        assert_eq!(dst.channel_compression(channels::DATA2), Compression::Uniform);
        assert_eq!(dst.channel_defval(channels::DATA2), 99);
    }

    #[test]
    fn test_copy_full_commutes_with_compress() {
        let mut src = block16();
        src.set_voxel(3, 0, 0, 0, channels::TYPE);
        src.fill(3, channels::TYPE);

        let mut a = block16();
        a.copy_from(&src);
        a.compress_uniform_channels();

        let mut src_compressed = src.duplicate();
        src_compressed.compress_uniform_channels();
        let mut b = block16();
        b.copy_from(&src_compressed);

        for pos in [(0, 0, 0), (5, 6, 7), (15, 15, 15)] {
            assert_eq!(
                a.get_voxel(pos.0, pos.1, pos.2, channels::TYPE),
                b.get_voxel(pos.0, pos.1, pos.2, channels::TYPE)
            );
        }
    }

    #[test]
    fn test_copy_area() {
        let mut src = block16();
        src.fill_area(7, IVec3::new(0, 0, 0), IVec3::new(4, 4, 4), channels::TYPE);
        let mut dst = block16();
        dst.copy_channel_from_area(
            &src,
            IVec3::new(0, 0, 0),
            IVec3::new(4, 4, 4),
            IVec3::new(8, 8, 8),
            channels::TYPE,
        );
        assert_eq!(dst.get_voxel(8, 8, 8, channels::TYPE), 7);
        assert_eq!(dst.get_voxel(11, 11, 11, channels::TYPE), 7);
        assert_eq!(dst.get_voxel(12, 12, 12, channels::TYPE), 0);
        assert_eq!(dst.get_voxel(7, 8, 8, channels::TYPE), 0);
    }

    #[test]
    fn test_copy_area_d16_per_voxel_path() {
        let mut src = VoxelBlock::new(IVec3::splat(8));
        src.set_channel_depth(channels::DATA2, Depth::D16);
        src.set_voxel(0x1234, 1, 1, 1, channels::DATA2);
        let mut dst = VoxelBlock::new(IVec3::splat(8));
        dst.set_channel_depth(channels::DATA2, Depth::D16);
        dst.copy_channel_from_area(
            &src,
            IVec3::ZERO,
            IVec3::splat(4),
            IVec3::splat(4),
            channels::DATA2,
        );
        assert_eq!(dst.get_voxel(5, 5, 5, channels::DATA2), 0x1234);
        assert_eq!(dst.get_voxel(4, 4, 4, channels::DATA2), 0);
    }

    #[test]
    fn test_copy_area_uniform_source_fills() {
        let mut src = block16();
        src.clear_channel(channels::TYPE, 9);
        let mut dst = block16();
        dst.set_voxel(1, 0, 0, 0, channels::TYPE);
        dst.copy_channel_from_area(
            &src,
            IVec3::ZERO,
            IVec3::splat(2),
            IVec3::splat(4),
            channels::TYPE,
        );
        assert_eq!(dst.get_voxel(4, 4, 4, channels::TYPE), 9);
        assert_eq!(dst.get_voxel(5, 5, 5, channels::TYPE), 9);
        assert_eq!(dst.get_voxel(6, 6, 6, channels::TYPE), 0);
    }

    #[test]
    fn test_copy_area_both_uniform_equal_is_noop() {
        let src = block16();
        let mut dst = block16();
        dst.copy_channel_from_area(
            &src,
            IVec3::ZERO,
            IVec3::splat(8),
            IVec3::ZERO,
            channels::TYPE,
        );
        assert_eq!(dst.channel_compression(channels::TYPE), Compression::Uniform);
    }

    #[test]
    fn test_downscale_nearest_neighbour() {
        let mut src = block16();
        for z in 0..16 {
            for x in 0..16 {
                for y in 0..16 {
                    src.set_voxel((x + y * 16 + z) as u64 % 251, x, y, z, channels::TYPE);
                }
            }
        }
        let mut dst = VoxelBlock::new(IVec3::splat(8));
        src.downscale_to(&mut dst, IVec3::ZERO, IVec3::splat(16), IVec3::ZERO);
        for z in 0..8 {
            for x in 0..8 {
                for y in 0..8 {
                    assert_eq!(
                        dst.get_voxel(x, y, z, channels::TYPE),
                        src.get_voxel(x * 2, y * 2, z * 2, channels::TYPE)
                    );
                }
            }
        }
    }

    #[test]
    fn test_downscale_skips_equal_uniform() {
        let src = block16();
        let mut dst = VoxelBlock::new(IVec3::splat(8));
        src.downscale_to(&mut dst, IVec3::ZERO, IVec3::splat(16), IVec3::ZERO);
        for channel_index in 0..MAX_CHANNELS {
            assert_eq!(dst.channel_compression(channel_index), Compression::Uniform);
        }
    }

    #[test]
    fn test_downscale_uniform_source_writes_defval() {
        let mut src = block16();
        src.clear_channel(channels::TYPE, 6);
        let mut dst = VoxelBlock::new(IVec3::splat(8));
        src.downscale_to(&mut dst, IVec3::ZERO, IVec3::splat(16), IVec3::ZERO);
        assert_eq!(dst.get_voxel(3, 3, 3, channels::TYPE), 6);
    }

    #[test]
    fn test_duplicate_d16_equals() {
        let mut block = VoxelBlock::new(IVec3::splat(8));
        block.set_channel_depth(channels::DATA2, Depth::D16);
        block.set_voxel(0x1234, 1, 2, 3, channels::DATA2);
        let copy = block.duplicate();
        assert!(copy.equals(&block));
        assert_eq!(copy.get_voxel(1, 2, 3, channels::DATA2), 0x1234);
    }

    #[test]
    fn test_equals_uniform_vs_materialized() {
        let mut a = block16();
        let b = block16();
        // Same logical contents, different storage state.
        a.decompress_channel(channels::TYPE);
        assert!(a.is_uniform(channels::TYPE));
        assert!(!a.equals(&b));
        a.compress_uniform_channels();
        assert!(a.equals(&b));
    }

    #[test]
    fn test_equals_checks_depth_and_size() {
        let a = block16();
        let mut b = block16();
        b.set_channel_depth(channels::DATA2, Depth::D16);
        assert!(!a.equals(&b));
        let c = VoxelBlock::new(IVec3::splat(8));
        assert!(!a.equals(&c));
    }

    #[test]
    fn test_set_channel_depth_reclamps_defval() {
        let mut block = block16();
        // SDF defval 255 survives a widening depth change unchanged.
        block.set_channel_depth(channels::SDF, Depth::D16);
        assert_eq!(block.channel_defval(channels::SDF), 255);
        // Narrowing clamps.
        block.clear_channel(channels::SDF, 0x1ff);
        block.set_channel_depth(channels::SDF, Depth::D1);
        assert_eq!(block.channel_defval(channels::SDF), 1);
    }

    #[test]
    fn test_set_channel_depth_drops_data() {
        let mut block = block16();
        block.set_voxel(3, 0, 0, 0, channels::TYPE);
        block.set_channel_depth(channels::TYPE, Depth::D16);
        assert_eq!(block.channel_compression(channels::TYPE), Compression::Uniform);
    }

    #[test]
    fn test_clear_retains_defvals() {
        let mut block = block16();
        block.clear_channel(channels::DATA2, 42);
        block.set_voxel(1, 0, 0, 0, channels::DATA2);
        block.clear();
        assert_eq!(block.channel_compression(channels::DATA2), Compression::Uniform);
        assert_eq!(block.channel_defval(channels::DATA2), 42);
    }

    #[test]
    fn test_resize_recreates_materialized_channels() {
        let mut block = block16();
        block.set_voxel(3, 0, 0, 0, channels::TYPE);
        block.create(8, 8, 8);
        assert_eq!(block.size(), IVec3::splat(8));
        assert_eq!(block.channel_compression(channels::TYPE), Compression::None);
        // Recreated channels are primed with their own default.
        assert!(block.is_uniform(channels::TYPE));
        assert_eq!(block.get_voxel(0, 0, 0, channels::TYPE), 0);
    }

    #[test]
    fn test_set_default_values() {
        let mut block = block16();
        block.set_voxel(1, 0, 0, 0, channels::TYPE);
        block.set_default_values([300, 7, 1, 2, 3, 4, 5, 6]);
        // Clamped to D8.
        assert_eq!(block.channel_defval(channels::TYPE), 255);
        assert_eq!(block.channel_defval(channels::SDF), 7);
        // Materialised data untouched.
        assert_eq!(block.get_voxel(0, 0, 0, channels::TYPE), 1);
    }

    #[test]
    fn test_fill_f_sdf() {
        let mut block = block16();
        block.fill_f(1.0, channels::SDF);
        assert_eq!(block.channel_defval(channels::SDF), 255);
        block.clear_channel_f(channels::SDF, -1.0);
        assert_eq!(block.channel_defval(channels::SDF), 0);
    }

    #[test]
    fn test_channel_bytes_views() {
        let mut block = VoxelBlock::new(IVec3::splat(4));
        assert!(block.channel_bytes(channels::TYPE).is_none());
        block.decompress_channel(channels::TYPE);
        assert_eq!(block.channel_bytes(channels::TYPE).map(|b| b.len()), Some(64));
        if let Some(bytes) = block.channel_bytes_mut(channels::TYPE) {
            bytes[0] = 77;
        }
        assert_eq!(block.get_voxel(0, 0, 0, channels::TYPE), 77);
    }
}
