//! Buffer layout builder
//!
//! A [`BufferSet`] describes one or more interleaved memory buffers. Each
//! [`MeshBuffer`] has an element stride and a list of [`BufferChannel`]s
//! placed at explicit byte offsets. Bytes not covered by a channel are
//! padding and are always zero.
//!
//! # Example layout
//! ```text
//! buffer 0 (56 bytes): position f32x3 @0, tangent f32x3 @12, binormal f32x3 @24,
//!                      normal f32x4 @36, color nu8x4 @52
//! buffer 1 (32 bytes): texcoords f32x2 @0, @8, @16, @24
//! ```

use crate::packing::{convert_components, read_component};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};

/// What a channel means to the consumer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum BufferSemantic {
    None,
    VertexIndex,
    Position,
    Normal,
    Tangent,
    Binormal,
    TexCoords,
    Color,
    BoneIndices,
    BoneWeights,
    LayoutBlock,
    AltSkinWeight,
    Other,
}

impl BufferSemantic {
    /// Channels the runtime generates itself and that survive reformatting
    pub fn is_system(self) -> bool {
        matches!(self, BufferSemantic::VertexIndex | BufferSemantic::LayoutBlock)
    }
}

/// Storage format of one channel component
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum BufferFormat {
    None,
    Float16,
    Float32,
    UInt8,
    UInt16,
    UInt32,
    Int8,
    Int16,
    Int32,
    NUInt8,
    NUInt16,
    NUInt32,
    NInt8,
    NInt16,
    NInt32,
    PackedDirS8,
}

impl BufferFormat {
    /// Size of one component in bytes
    pub const fn size(self) -> usize {
        match self {
            BufferFormat::None => 0,
            BufferFormat::UInt8
            | BufferFormat::Int8
            | BufferFormat::NUInt8
            | BufferFormat::NInt8
            | BufferFormat::PackedDirS8 => 1,
            BufferFormat::Float16
            | BufferFormat::UInt16
            | BufferFormat::Int16
            | BufferFormat::NUInt16
            | BufferFormat::NInt16 => 2,
            BufferFormat::Float32
            | BufferFormat::UInt32
            | BufferFormat::Int32
            | BufferFormat::NUInt32
            | BufferFormat::NInt32 => 4,
        }
    }

    /// Unsigned integer format able to hold values up to `max`
    pub fn uint_for(max: u64) -> Self {
        if max <= u8::MAX as u64 {
            BufferFormat::UInt8
        } else if max <= u16::MAX as u64 {
            BufferFormat::UInt16
        } else {
            BufferFormat::UInt32
        }
    }
}

/// One attribute inside an interleaved buffer element
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct BufferChannel {
    pub semantic: BufferSemantic,
    pub semantic_index: u32,
    pub format: BufferFormat,
    pub component_count: u16,
    pub offset: u16,
}

impl BufferChannel {
    pub const fn new(
        semantic: BufferSemantic,
        semantic_index: u32,
        format: BufferFormat,
        component_count: u16,
        offset: u16,
    ) -> Self {
        Self {
            semantic,
            semantic_index,
            format,
            component_count,
            offset,
        }
    }

    /// Size of the channel in bytes
    pub const fn size(&self) -> usize {
        self.format.size() * self.component_count as usize
    }

    /// First byte past the channel
    pub const fn end(&self) -> usize {
        self.offset as usize + self.size()
    }
}

/// One interleaved buffer: stride, channels and raw element data
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MeshBuffer {
    pub element_size: u32,
    pub channels: Vec<BufferChannel>,
    pub data: Vec<u8>,
}

impl MeshBuffer {
    /// Standalone buffer with `element_count` zeroed elements
    pub fn with_layout(element_size: u32, channels: &[BufferChannel], element_count: u32) -> Self {
        assert_channels_fit(element_size, channels);
        Self {
            element_size,
            channels: channels.to_vec(),
            data: vec![0; element_size as usize * element_count as usize],
        }
    }

    /// Index of the channel with the given semantic
    pub fn find_channel(&self, semantic: BufferSemantic, semantic_index: u32) -> Option<usize> {
        self.channels
            .iter()
            .position(|c| c.semantic == semantic && c.semantic_index == semantic_index)
    }

    /// Whether some bytes of each element are not covered by a channel
    pub fn has_padding(&self) -> bool {
        let used: usize = self.channels.iter().map(BufferChannel::size).sum();
        used < self.element_size as usize
    }

    pub fn element_count(&self) -> usize {
        if self.element_size == 0 {
            0
        } else {
            self.data.len() / self.element_size as usize
        }
    }

    /// Raw bytes of one element
    pub fn element(&self, index: usize) -> &[u8] {
        let stride = self.element_size as usize;
        &self.data[index * stride..(index + 1) * stride]
    }

    /// Raw bytes of one channel of one element
    pub fn channel_bytes(&self, channel: usize, element: usize) -> &[u8] {
        let ch = self.channels[channel];
        let start = element * self.element_size as usize + ch.offset as usize;
        &self.data[start..start + ch.size()]
    }

    /// Mutable raw bytes of one channel of one element
    pub fn channel_bytes_mut(&mut self, channel: usize, element: usize) -> &mut [u8] {
        let ch = self.channels[channel];
        let start = element * self.element_size as usize + ch.offset as usize;
        &mut self.data[start..start + ch.size()]
    }

    /// Copy `count` elements of a channel from another buffer, converting formats
    pub fn copy_channel_from(
        &mut self,
        channel: usize,
        source: &MeshBuffer,
        source_channel: usize,
        count: usize,
    ) {
        let dst = self.channels[channel];
        let src = source.channels[source_channel];
        for element in 0..count {
            let src_bytes = source.channel_bytes(source_channel, element);
            let dst_bytes = self.channel_bytes_mut(channel, element);
            convert_components(
                src.format,
                src.component_count as usize,
                src_bytes,
                dst.format,
                dst.component_count as usize,
                dst_bytes,
            );
        }
    }

    /// Decode every component of a channel as f64, element-major
    pub fn read_channel(&self, channel: usize) -> Vec<f64> {
        let ch = self.channels[channel];
        let size = ch.format.size();
        let mut values = Vec::with_capacity(self.element_count() * ch.component_count as usize);
        for element in 0..self.element_count() {
            let bytes = self.channel_bytes(channel, element);
            for c in 0..ch.component_count as usize {
                values.push(read_component(ch.format, &bytes[c * size..]));
            }
        }
        values
    }
}

/// Offsets must be monotonic, non-overlapping and inside the element
fn assert_channels_fit(element_size: u32, channels: &[BufferChannel]) {
    let mut cursor = 0usize;
    for channel in channels {
        assert!(
            channel.offset as usize >= cursor,
            "channel {:?}[{}] at offset {} overlaps the previous channel (ends at {})",
            channel.semantic,
            channel.semantic_index,
            channel.offset,
            cursor
        );
        cursor = channel.end();
    }
    assert!(
        cursor <= element_size as usize,
        "channels need {} bytes but the element size is {}",
        cursor,
        element_size
    );
}

/// A set of buffers sharing one element count
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BufferSet {
    element_count: u32,
    buffers: Vec<MeshBuffer>,
}

impl BufferSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn element_count(&self) -> u32 {
        self.element_count
    }

    /// Resize every buffer to hold `count` elements, new bytes zeroed
    pub fn set_element_count(&mut self, count: u32) {
        self.element_count = count;
        for buffer in &mut self.buffers {
            buffer
                .data
                .resize(buffer.element_size as usize * count as usize, 0);
        }
    }

    pub fn buffer_count(&self) -> usize {
        self.buffers.len()
    }

    pub fn set_buffer_count(&mut self, count: usize) {
        self.buffers.resize_with(count, MeshBuffer::default);
    }

    /// Declare the layout of one buffer; its data is reset to zero
    ///
    /// # Panics
    ///
    /// Panics if channel offsets are not monotonic or overflow `element_size`.
    pub fn set_buffer(&mut self, index: usize, element_size: u32, channels: &[BufferChannel]) {
        assert_channels_fit(element_size, channels);
        let buffer = &mut self.buffers[index];
        buffer.element_size = element_size;
        buffer.channels = channels.to_vec();
        buffer.data = vec![0; element_size as usize * self.element_count as usize];
    }

    /// Append a fully built buffer
    ///
    /// # Panics
    ///
    /// Panics if the buffer's element count differs from the set's.
    pub fn push_buffer(&mut self, buffer: MeshBuffer) {
        assert_eq!(
            buffer.element_count(),
            self.element_count as usize,
            "pushed buffer element count mismatch"
        );
        self.buffers.push(buffer);
    }

    pub fn buffers(&self) -> &[MeshBuffer] {
        &self.buffers
    }

    pub fn buffer(&self, index: usize) -> &MeshBuffer {
        &self.buffers[index]
    }

    pub fn buffer_mut(&mut self, index: usize) -> &mut MeshBuffer {
        &mut self.buffers[index]
    }

    /// Keep only buffers matching the predicate
    pub fn retain_buffers(&mut self, keep: impl FnMut(&MeshBuffer) -> bool) {
        self.buffers.retain(keep);
    }

    /// Locate a channel as (buffer index, channel index)
    pub fn find_channel(
        &self,
        semantic: BufferSemantic,
        semantic_index: u32,
    ) -> Option<(usize, usize)> {
        self.buffers.iter().enumerate().find_map(|(b, buffer)| {
            buffer
                .find_channel(semantic, semantic_index)
                .map(|c| (b, c))
        })
    }

    pub fn has_channel(&self, semantic: BufferSemantic, semantic_index: u32) -> bool {
        self.find_channel(semantic, semantic_index).is_some()
    }

    /// Decode a channel as f64 components, or `None` if absent
    pub fn read_channel(&self, semantic: BufferSemantic, semantic_index: u32) -> Option<Vec<f64>> {
        let (b, c) = self.find_channel(semantic, semantic_index)?;
        Some(self.buffers[b].read_channel(c))
    }

    /// Copy with the layout of `self` but no elements
    pub fn layout_only(&self) -> BufferSet {
        BufferSet {
            element_count: 0,
            buffers: self
                .buffers
                .iter()
                .map(|b| MeshBuffer {
                    element_size: b.element_size,
                    channels: b.channels.clone(),
                    data: Vec::new(),
                })
                .collect(),
        }
    }
}

/// Fill `dest` from one interleaved source buffer
///
/// Every destination buffer is cleared to zero and then each of its channels
/// is copied (converting formats when they differ) from the matching source
/// channel. Destination channels missing from the source stay zero. Each
/// destination buffer is written by exactly one rayon task.
pub fn copy_buffer_clearing_padding(dest: &mut BufferSet, source: &MeshBuffer) {
    let element_count = dest.element_count as usize;
    assert!(
        source.data.len() >= element_count * source.element_size as usize,
        "source buffer holds fewer than {} elements",
        element_count
    );

    dest.buffers.par_iter_mut().for_each(|buffer| {
        buffer.data.fill(0);
        for channel in 0..buffer.channels.len() {
            let ch = buffer.channels[channel];
            let Some(source_channel) = source.find_channel(ch.semantic, ch.semantic_index) else {
                continue;
            };
            buffer.copy_channel_from(channel, source, source_channel, element_count);
        }
    });
}

#[cfg(test)]
mod tests {
    use super::*;

    fn source_buffer() -> MeshBuffer {
        // position f32x3 + color nu8x4, two elements
        let channels = [
            BufferChannel::new(BufferSemantic::Position, 0, BufferFormat::Float32, 3, 0),
            BufferChannel::new(BufferSemantic::Color, 0, BufferFormat::NUInt8, 4, 12),
        ];
        let mut buffer = MeshBuffer::with_layout(16, &channels, 2);
        for (i, value) in [1.0f32, 2.0, 3.0].iter().enumerate() {
            buffer.data[i * 4..i * 4 + 4].copy_from_slice(&value.to_le_bytes());
        }
        buffer.data[12..16].copy_from_slice(&[255, 128, 0, 255]);
        buffer.data[16..32].fill(0xAB);
        buffer
    }

    #[test]
    fn test_find_channel() {
        let mut set = BufferSet::new();
        set.set_buffer_count(2);
        set.set_buffer(
            0,
            12,
            &[BufferChannel::new(BufferSemantic::Position, 0, BufferFormat::Float32, 3, 0)],
        );
        set.set_buffer(
            1,
            16,
            &[
                BufferChannel::new(BufferSemantic::TexCoords, 0, BufferFormat::Float32, 2, 0),
                BufferChannel::new(BufferSemantic::TexCoords, 1, BufferFormat::Float32, 2, 8),
            ],
        );
        assert_eq!(set.find_channel(BufferSemantic::TexCoords, 1), Some((1, 1)));
        assert_eq!(set.find_channel(BufferSemantic::Color, 0), None);
    }

    #[test]
    #[should_panic]
    fn test_overlapping_channels_panic() {
        let mut set = BufferSet::new();
        set.set_buffer_count(1);
        set.set_buffer(
            0,
            16,
            &[
                BufferChannel::new(BufferSemantic::Position, 0, BufferFormat::Float32, 3, 0),
                BufferChannel::new(BufferSemantic::Color, 0, BufferFormat::NUInt8, 4, 8),
            ],
        );
    }

    #[test]
    fn test_padding_is_zero_after_copy() {
        let source = source_buffer();
        let mut dest = BufferSet::new();
        dest.set_element_count(2);
        dest.set_buffer_count(1);
        // Color placed after a 4 byte gap, 4 trailing padding bytes
        dest.set_buffer(
            0,
            24,
            &[
                BufferChannel::new(BufferSemantic::Position, 0, BufferFormat::Float32, 3, 0),
                BufferChannel::new(BufferSemantic::Color, 0, BufferFormat::NUInt8, 4, 16),
            ],
        );
        dest.buffer_mut(0).data.fill(0xFF);
        copy_buffer_clearing_padding(&mut dest, &source);

        let buffer = dest.buffer(0);
        assert!(buffer.has_padding());
        for element in 0..2 {
            let bytes = buffer.element(element);
            assert_eq!(&bytes[12..16], &[0, 0, 0, 0]);
            assert_eq!(&bytes[20..24], &[0, 0, 0, 0]);
        }
        assert_eq!(&buffer.element(0)[16..20], &[255, 128, 0, 255]);
    }

    #[test]
    fn test_missing_channel_is_skipped() {
        let source = source_buffer();
        let mut dest = BufferSet::new();
        dest.set_element_count(2);
        dest.set_buffer_count(1);
        dest.set_buffer(
            0,
            8,
            &[BufferChannel::new(BufferSemantic::TexCoords, 0, BufferFormat::Float32, 2, 0)],
        );
        copy_buffer_clearing_padding(&mut dest, &source);
        assert!(dest.buffer(0).data.iter().all(|&b| b == 0));
    }

    #[test]
    fn test_copy_converts_formats() {
        let source = source_buffer();
        let mut dest = BufferSet::new();
        dest.set_element_count(2);
        dest.set_buffer_count(1);
        dest.set_buffer(
            0,
            6,
            &[BufferChannel::new(BufferSemantic::Position, 0, BufferFormat::Float16, 3, 0)],
        );
        copy_buffer_clearing_padding(&mut dest, &source);
        let values = dest.read_channel(BufferSemantic::Position, 0).unwrap();
        assert_eq!(&values[..3], &[1.0, 2.0, 3.0]);
    }

    #[test]
    fn test_result_independent_of_thread_count() {
        let source = source_buffer();
        let build = || {
            let mut dest = BufferSet::new();
            dest.set_element_count(2);
            dest.set_buffer_count(2);
            dest.set_buffer(
                0,
                12,
                &[BufferChannel::new(BufferSemantic::Position, 0, BufferFormat::Float32, 3, 0)],
            );
            dest.set_buffer(
                1,
                8,
                &[BufferChannel::new(BufferSemantic::Color, 0, BufferFormat::NUInt8, 4, 4)],
            );
            dest
        };

        let mut parallel = build();
        copy_buffer_clearing_padding(&mut parallel, &source);

        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(1)
            .build()
            .unwrap();
        let mut serial = build();
        pool.install(|| copy_buffer_clearing_padding(&mut serial, &source));

        assert_eq!(parallel, serial);
    }
}
