//! Mesh reformatting
//!
//! [`mesh_format`] rewrites the buffers of a mesh into a target
//! [`MeshLayout`], converting channel formats and dropping channels the
//! target does not describe. The helpers at the bottom build the canonical
//! buffers used as conversion targets.

use crate::layout::{BufferChannel, BufferFormat, BufferSemantic, BufferSet, MeshBuffer};
use crate::mesh::RuntimeMesh;
use serde::{Deserialize, Serialize};

/// Formatting failure; no partial mesh is produced
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum FormatError {
    /// The target layout needs a channel the source does not have
    #[error("source mesh has no {semantic:?}[{semantic_index}] channel required by the target layout")]
    MissingChannel {
        semantic: BufferSemantic,
        semantic_index: u32,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FormatOptions {
    /// Append source buffers made only of system channels the target lacks
    pub keep_system_buffers: bool,
    pub format_vertices: bool,
    pub format_indices: bool,
    /// Zero-fill target channels missing from the source instead of failing
    pub ignore_missing_channels: bool,
}

impl Default for FormatOptions {
    fn default() -> Self {
        Self {
            keep_system_buffers: true,
            format_vertices: true,
            format_indices: true,
            ignore_missing_channels: false,
        }
    }
}

/// Target buffer layouts for vertices and indices (element counts unused)
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MeshLayout {
    pub vertices: BufferSet,
    pub indices: BufferSet,
}

impl MeshLayout {
    pub fn new(vertex_buffers: Vec<BufferDesc>, index_buffer: BufferDesc) -> Self {
        let mut vertices = BufferSet::new();
        vertices.set_buffer_count(vertex_buffers.len());
        for (i, desc) in vertex_buffers.iter().enumerate() {
            vertices.set_buffer(i, desc.element_size, &desc.channels);
        }

        let mut indices = BufferSet::new();
        indices.set_buffer_count(1);
        indices.set_buffer(0, index_buffer.element_size, &index_buffer.channels);

        Self { vertices, indices }
    }
}

/// Rewrite `source` into `target`
pub fn mesh_format(
    source: &RuntimeMesh,
    target: &MeshLayout,
    options: FormatOptions,
) -> Result<RuntimeMesh, FormatError> {
    let vertices = if options.format_vertices {
        format_buffer_set(&source.vertices, &target.vertices, options)?
    } else {
        source.vertices.clone()
    };
    let indices = if options.format_indices {
        format_buffer_set(&source.indices, &target.indices, options)?
    } else {
        source.indices.clone()
    };

    let mut result = source.clone();
    result.vertices = vertices;
    result.indices = indices;
    Ok(result)
}

fn format_buffer_set(
    source: &BufferSet,
    target: &BufferSet,
    options: FormatOptions,
) -> Result<BufferSet, FormatError> {
    let count = source.element_count();
    let mut result = BufferSet::new();
    result.set_element_count(count);
    result.set_buffer_count(target.buffer_count());
    for (i, buffer) in target.buffers().iter().enumerate() {
        result.set_buffer(i, buffer.element_size, &buffer.channels);
    }

    for b in 0..result.buffer_count() {
        for c in 0..result.buffer(b).channels.len() {
            let channel = result.buffer(b).channels[c];
            if channel.semantic == BufferSemantic::None {
                continue;
            }
            match source.find_channel(channel.semantic, channel.semantic_index) {
                Some((sb, sc)) => {
                    result
                        .buffer_mut(b)
                        .copy_channel_from(c, source.buffer(sb), sc, count as usize);
                }
                None if options.ignore_missing_channels => {
                    tracing::trace!(
                        "zero-filling missing channel {:?}[{}]",
                        channel.semantic,
                        channel.semantic_index
                    );
                }
                None => {
                    return Err(FormatError::MissingChannel {
                        semantic: channel.semantic,
                        semantic_index: channel.semantic_index,
                    });
                }
            }
        }
    }

    if options.keep_system_buffers {
        for buffer in source.buffers() {
            let all_system =
                !buffer.channels.is_empty() && buffer.channels.iter().all(|c| c.semantic.is_system());
            let described = buffer
                .channels
                .iter()
                .any(|c| result.has_channel(c.semantic, c.semantic_index));
            if all_system && !described {
                result.push_buffer(buffer.clone());
            }
        }
    }

    Ok(result)
}

/// Drop vertex and index buffers that carry no meaningful channel
pub fn optimize_buffers(mesh: &mut RuntimeMesh) {
    let useful = |buffer: &MeshBuffer| {
        buffer
            .channels
            .iter()
            .any(|c| c.semantic != BufferSemantic::None && c.component_count > 0)
    };
    mesh.vertices.retain_buffers(useful);
    mesh.indices.retain_buffers(useful);
}

// ============================================================================
// Canonical Buffers
// ============================================================================

/// Layout of one buffer: stride plus channels
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BufferDesc {
    pub element_size: u32,
    pub channels: Vec<BufferChannel>,
}

impl BufferDesc {
    /// Pack channels tightly in the given order
    pub fn packed(channels: &[(BufferSemantic, u32, BufferFormat, u16)]) -> Self {
        let mut offset = 0u16;
        let channels = channels
            .iter()
            .map(|&(semantic, index, format, components)| {
                let channel = BufferChannel::new(semantic, index, format, components, offset);
                offset += channel.size() as u16;
                channel
            })
            .collect();
        Self {
            element_size: offset as u32,
            channels,
        }
    }

    pub fn single(
        semantic: BufferSemantic,
        semantic_index: u32,
        format: BufferFormat,
        components: u16,
    ) -> Self {
        Self::packed(&[(semantic, semantic_index, format, components)])
    }
}

pub fn positions_buffer() -> BufferDesc {
    BufferDesc::single(BufferSemantic::Position, 0, BufferFormat::Float32, 3)
}

/// Tangent and normal as biased bytes, binormal sign in normal.w
pub fn tangent_buffer() -> BufferDesc {
    BufferDesc::packed(&[
        (BufferSemantic::Tangent, 0, BufferFormat::PackedDirS8, 4),
        (BufferSemantic::Normal, 0, BufferFormat::PackedDirS8, 4),
    ])
}

pub fn texcoords_buffer(count: u32, high_precision: bool) -> BufferDesc {
    let format = if high_precision {
        BufferFormat::Float32
    } else {
        BufferFormat::Float16
    };
    let channels: Vec<(BufferSemantic, u32, BufferFormat, u16)> = (0..count)
        .map(|i| (BufferSemantic::TexCoords, i, format, 2))
        .collect();
    BufferDesc::packed(&channels)
}

/// Bone indices (1 or 2 bytes) followed by normalized weights (1 or 2 bytes)
pub fn skin_buffer(index_bytes: u32, weight_bytes: u32, influences: u16) -> BufferDesc {
    skin_channels(None, 0, index_bytes, weight_bytes, influences)
}

/// Alternative skinning: an i32 hash followed by indices and weights
pub fn skin_weight_profile_buffer(
    profile_id: u32,
    index_bytes: u32,
    weight_bytes: u32,
    influences: u16,
) -> BufferDesc {
    skin_channels(
        Some(BufferSemantic::AltSkinWeight),
        profile_id,
        index_bytes,
        weight_bytes,
        influences,
    )
}

fn skin_channels(
    prefix: Option<BufferSemantic>,
    semantic_index: u32,
    index_bytes: u32,
    weight_bytes: u32,
    influences: u16,
) -> BufferDesc {
    let index_format = if index_bytes == 1 {
        BufferFormat::UInt8
    } else {
        BufferFormat::UInt16
    };
    let weight_format = if weight_bytes == 1 {
        BufferFormat::NUInt8
    } else {
        BufferFormat::NUInt16
    };

    let mut channels: Vec<(BufferSemantic, u32, BufferFormat, u16)> = Vec::with_capacity(3);
    if let Some(semantic) = prefix {
        channels.push((semantic, semantic_index, BufferFormat::Int32, 1));
    }
    channels.push((BufferSemantic::BoneIndices, semantic_index, index_format, influences));
    channels.push((BufferSemantic::BoneWeights, semantic_index, weight_format, influences));
    BufferDesc::packed(&channels)
}

pub fn color_buffer() -> BufferDesc {
    BufferDesc::single(BufferSemantic::Color, 0, BufferFormat::NUInt8, 4)
}

pub fn index_buffer() -> BufferDesc {
    BufferDesc::single(BufferSemantic::VertexIndex, 0, BufferFormat::UInt32, 1)
}
