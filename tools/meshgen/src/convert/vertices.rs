//! Section vertex and index copy
//!
//! Vertices are first written to one interleaved buffer holding every
//! attribute as authored, then split into the position/normal/color,
//! texcoord and skin buffers through [`copy_buffer_clearing_padding`].

use super::SkinSettings;
use crate::assets::{SkeletalMeshLod, SkeletalMeshSection, SoftVertex};
use crate::skin::Influences;
use meshgen_common::layout::copy_buffer_clearing_padding;
use meshgen_common::{
    BufferDesc, BufferFormat, BufferSemantic, MeshBuffer, RuntimeMesh, format::index_buffer,
};
use tracing::warn;

const POSITION: usize = 0;
const TANGENT: usize = 1;
const BINORMAL: usize = 2;
const NORMAL: usize = 3;
const TEXCOORD0: usize = 4;
const COLOR: usize = 8;
const BONE_INDICES: usize = 9;
const BONE_WEIGHTS: usize = 10;

/// Texture coordinate sets carried by a section
pub(super) const MAX_TEXCOORDS: u32 = 4;

fn weight_format(skin: &SkinSettings) -> BufferFormat {
    if skin.weight_bytes() == 2 {
        BufferFormat::NUInt16
    } else {
        BufferFormat::NUInt8
    }
}

/// Interleaved layout with every authored attribute
fn source_layout(skin: Option<&SkinSettings>) -> BufferDesc {
    use BufferSemantic::*;

    let mut channels = vec![
        (Position, 0, BufferFormat::Float32, 3),
        (Tangent, 0, BufferFormat::Float32, 3),
        (Binormal, 0, BufferFormat::Float32, 3),
        (Normal, 0, BufferFormat::Float32, 4),
    ];
    for set in 0..MAX_TEXCOORDS {
        channels.push((TexCoords, set, BufferFormat::Float32, 2));
    }
    channels.push((Color, 0, BufferFormat::NUInt8, 4));
    if let Some(skin) = skin {
        let components = skin.components as u16;
        channels.push((BoneIndices, 0, BufferFormat::UInt16, components));
        channels.push((BoneWeights, 0, weight_format(skin), components));
    }
    BufferDesc::packed(&channels)
}

/// Buffers of a converted section before the canonical reformat
fn section_layout(skin: Option<&SkinSettings>) -> Vec<BufferDesc> {
    use BufferSemantic::*;

    let mut buffers = vec![
        BufferDesc::packed(&[
            (Position, 0, BufferFormat::Float32, 3),
            (Tangent, 0, BufferFormat::Float32, 3),
            (Binormal, 0, BufferFormat::Float32, 3),
            (Normal, 0, BufferFormat::Float32, 4),
            (Color, 0, BufferFormat::NUInt8, 4),
        ]),
        BufferDesc::packed(
            &(0..MAX_TEXCOORDS)
                .map(|set| (TexCoords, set, BufferFormat::Float32, 2))
                .collect::<Vec<_>>(),
        ),
    ];
    if let Some(skin) = skin {
        let components = skin.components as u16;
        buffers.push(BufferDesc::packed(&[
            (BoneIndices, 0, BufferFormat::UInt16, components),
            (BoneWeights, 0, weight_format(skin), components),
        ]));
    }
    buffers
}

pub(super) fn put_f32s(buffer: &mut MeshBuffer, channel: usize, element: usize, values: &[f32]) {
    let bytes = buffer.channel_bytes_mut(channel, element);
    for (chunk, value) in bytes.chunks_exact_mut(4).zip(values) {
        chunk.copy_from_slice(&value.to_le_bytes());
    }
}

pub(super) fn put_u32(buffer: &mut MeshBuffer, channel: usize, element: usize, value: u32) {
    buffer
        .channel_bytes_mut(channel, element)
        .copy_from_slice(&value.to_le_bytes());
}

pub(super) fn put_i32(buffer: &mut MeshBuffer, channel: usize, element: usize, value: i32) {
    buffer
        .channel_bytes_mut(channel, element)
        .copy_from_slice(&value.to_le_bytes());
}

/// Write bone indices (UInt16) and weights of one vertex
pub(super) fn put_influences(
    buffer: &mut MeshBuffer,
    index_channel: usize,
    weight_channel: usize,
    element: usize,
    influences: &Influences,
) {
    let weight_format = buffer.channels[weight_channel].format;

    let indices = buffer.channel_bytes_mut(index_channel, element);
    for (chunk, bone) in indices.chunks_exact_mut(2).zip(influences.bones) {
        chunk.copy_from_slice(&bone.to_le_bytes());
    }

    let weights = buffer.channel_bytes_mut(weight_channel, element);
    if weight_format == BufferFormat::NUInt16 {
        for (chunk, weight) in weights.chunks_exact_mut(2).zip(influences.weights) {
            chunk.copy_from_slice(&weight.to_le_bytes());
        }
    } else {
        for (byte, weight) in weights.iter_mut().zip(influences.weights) {
            *byte = weight.min(u8::MAX as u16) as u8;
        }
    }
}

/// Write the vertex buffers of a section into `mesh`
///
/// `skin` carries one processed influence set per vertex.
pub(super) fn write_vertices(
    mesh: &mut RuntimeMesh,
    vertices: &[SoftVertex],
    skin: Option<(&SkinSettings, &[Influences])>,
) {
    let settings = skin.map(|(settings, _)| settings);
    let layout = source_layout(settings);
    let count = vertices.len() as u32;

    let mut source = MeshBuffer::with_layout(layout.element_size, &layout.channels, count);
    for (i, vertex) in vertices.iter().enumerate() {
        put_f32s(&mut source, POSITION, i, &vertex.position.to_array());
        put_f32s(&mut source, TANGENT, i, &vertex.tangent_x.to_array());
        put_f32s(&mut source, BINORMAL, i, &vertex.tangent_y.to_array());
        put_f32s(&mut source, NORMAL, i, &vertex.tangent_z.to_array());
        for (set, uv) in vertex.uvs.iter().take(MAX_TEXCOORDS as usize).enumerate() {
            put_f32s(&mut source, TEXCOORD0 + set, i, &uv.to_array());
        }
        source
            .channel_bytes_mut(COLOR, i)
            .copy_from_slice(&vertex.color);
        if let Some((_, influences)) = skin {
            put_influences(&mut source, BONE_INDICES, BONE_WEIGHTS, i, &influences[i]);
        }
    }

    let buffers = section_layout(settings);
    mesh.vertices.set_element_count(count);
    mesh.vertices.set_buffer_count(buffers.len());
    for (index, desc) in buffers.iter().enumerate() {
        mesh.vertices.set_buffer(index, desc.element_size, &desc.channels);
    }
    copy_buffer_clearing_padding(&mut mesh.vertices, &source);
}

/// Write the section's triangle indices rebased to its first vertex
///
/// Indices outside the section become 0.
pub(super) fn write_indices(
    mesh: &mut RuntimeMesh,
    mesh_name: &str,
    lod: &SkeletalMeshLod,
    section: &SkeletalMeshSection,
) {
    let start = section.base_index as usize;
    let count = section.num_triangles as usize * 3;
    let vertex_count = section.vertices.len() as u32;

    let desc = index_buffer();
    mesh.indices.set_element_count(count as u32);
    mesh.indices.set_buffer_count(1);
    mesh.indices.set_buffer(0, desc.element_size, &desc.channels);

    let mut out_of_range = 0usize;
    let buffer = mesh.indices.buffer_mut(0);
    for i in 0..count {
        let value = lod
            .indices
            .get(start + i)
            .and_then(|index| index.checked_sub(section.base_vertex))
            .filter(|&index| index < vertex_count);
        let value = value.unwrap_or_else(|| {
            out_of_range += 1;
            0
        });
        put_u32(buffer, 0, i, value);
    }

    if out_of_range > 0 {
        warn!(
            "{} indices of SkeletalMesh [{}] fall outside their section and were replaced by 0",
            out_of_range, mesh_name
        );
    }
}

#[cfg(test)]
mod tests {
    use super::super::test_assets::*;
    use super::*;
    use crate::skin::BoneInfluenceMode;

    fn settings() -> SkinSettings {
        SkinSettings {
            mode: BoneInfluenceMode::Four,
            section_influences: 4,
            components: 4,
            bone_map_len: 3,
            source_max_weight: 255,
            max_weight: 255,
            remap: None,
        }
    }

    #[test]
    fn test_vertex_buffers_split_by_usage() {
        let section = &body_mesh().lods[0].sections[0];
        let skin = settings();
        let influences: Vec<Influences> = section
            .vertices
            .iter()
            .map(|v| skin.influences(&v.bones, &v.weights))
            .collect();

        let mut mesh = RuntimeMesh::new();
        write_vertices(&mut mesh, &section.vertices, Some((&skin, &influences)));

        assert_eq!(mesh.vertices.buffer_count(), 3);
        assert_eq!(mesh.vertices.buffer(0).element_size, 56);
        assert_eq!(mesh.vertices.buffer(1).element_size, 32);
        assert_eq!(mesh.vertices.buffer(2).element_size, 12);
        assert_eq!(mesh.vertices.find_channel(BufferSemantic::TexCoords, 0), Some((1, 0)));

        let uvs = mesh.vertices.read_channel(BufferSemantic::TexCoords, 0).unwrap();
        assert_eq!(uvs, vec![0.0, 0.5, 1.0, 0.5, 2.0, 0.5]);
        // Unused texcoord sets stay zero
        let uv3 = mesh.vertices.read_channel(BufferSemantic::TexCoords, 3).unwrap();
        assert!(uv3.iter().all(|&v| v == 0.0));
    }

    #[test]
    fn test_unskinned_has_no_skin_buffer() {
        let section = &body_mesh().lods[0].sections[0];
        let mut mesh = RuntimeMesh::new();
        write_vertices(&mut mesh, &section.vertices, None);
        assert_eq!(mesh.vertices.buffer_count(), 2);
        assert!(!mesh.vertices.has_channel(BufferSemantic::BoneIndices, 0));
    }

    #[test]
    fn test_out_of_range_indices_become_zero() {
        let mut asset = body_mesh();
        asset.lods[0].indices = vec![3, 4, 9, 1, 2, 3];
        let lod = &asset.lods[0];
        let mut mesh = RuntimeMesh::new();
        write_indices(&mut mesh, "SK_Body", lod, &lod.sections[1]);
        assert_eq!(mesh.index_values(), vec![0, 0, 0]);

        write_indices(&mut mesh, "SK_Body", lod, &lod.sections[0]);
        assert_eq!(mesh.index_values(), vec![0, 0, 0]);
    }
}
